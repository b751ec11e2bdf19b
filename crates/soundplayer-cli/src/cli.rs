//! Command-line argument parsing for the soundplayer host.

use std::path::PathBuf;

use clap::Parser;


/// soundplayer - plays keyed sound sessions driven by commands on stdin.
#[derive( Parser, Debug )]
#[command( name = "soundplayer" )]
#[command( version, about, long_about = None )]
pub struct Args {
    /// Settings file to load instead of the default location.
    #[arg( short, long )]
    pub config: Option<PathBuf>,

    /// Resource namespace for bundled sounds.
    #[arg( long )]
    pub package: Option<String>,

    /// Root of the bundled resource tree.
    #[arg( long )]
    pub resource_dir: Option<PathBuf>,

    /// Application-private storage directory.
    #[arg( long )]
    pub storage_dir: Option<PathBuf>,

    /// Initial shared volume (0.0 to 1.0).
    #[arg( long )]
    pub volume: Option<f32>,
}
