//! Host settings
//!
//! Settings live in a JSON file; every field is optional and command-line
//! flags override whatever the file says.

use std::fs;
use std::path::{ Path, PathBuf };

use anyhow::{ Context, Result };
use serde::{ Deserialize, Serialize };

use crate::cli::Args;


/// Host settings.
#[derive( Debug, Clone, Serialize, Deserialize, PartialEq )]
#[serde( default )]
pub struct Settings {
    /// Namespace bundled resources are looked up under
    pub package: String,

    /// Root of the bundled resource tree (`<dir>/raw/<name>.<ext>`)
    pub resource_dir: Option<PathBuf>,

    /// Application-private storage searched after bundled resources
    pub storage_dir: Option<PathBuf>,

    /// Shared volume before the first `setVolume`
    pub initial_volume: f32,

    /// Default tracing filter when `RUST_LOG` is unset
    pub log_filter: String,
}


impl Default for Settings {
    fn default() -> Self {
        Self {
            package: "com.soundplayer.host".into(),
            resource_dir: None,
            storage_dir: None,
            initial_volume: 1.0,
            log_filter: "info".into(),
        }
    }
}


impl Settings {
    /// Returns the default path to the settings file.
    fn settings_path() -> Option<PathBuf> {
        dirs::config_dir().map( |p| p.join( "soundplayer" ).join( "settings.json" ) )
    }


    /// Loads settings from `path`, or from the default location.
    ///
    /// A missing default file yields defaults; an explicitly named file must exist.
    pub fn load( path: Option<&Path> ) -> Result<Self> {
        let path = match path {
            Some( p ) => p.to_path_buf(),
            None => match Self::settings_path() {
                Some( p ) if p.exists() => p,
                _ => return Ok( Self::default() ),
            },
        };

        let contents = fs::read_to_string( &path )
            .with_context( || format!( "read settings {}", path.display() ) )?;
        serde_json::from_str( &contents )
            .with_context( || format!( "parse settings {}", path.display() ) )
    }


    /// Applies command-line overrides.
    pub fn apply( mut self, args: &Args ) -> Self {
        if let Some( package ) = &args.package {
            self.package = package.clone();
        }
        if let Some( dir ) = &args.resource_dir {
            self.resource_dir = Some( dir.clone() );
        }
        if let Some( dir ) = &args.storage_dir {
            self.storage_dir = Some( dir.clone() );
        }
        if let Some( volume ) = args.volume {
            self.initial_volume = volume;
        }
        self
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use clap::Parser;


    #[test]
    fn test_partial_file_uses_defaults() {
        let settings: Settings = serde_json::from_str( r#"{ "package": "com.example.game" }"# ).unwrap();
        assert_eq!( settings.package, "com.example.game" );
        assert_eq!( settings.initial_volume, 1.0 );
        assert_eq!( settings.log_filter, "info" );
        assert_eq!( settings.storage_dir, None );
    }


    #[test]
    fn test_flags_override_file() {
        let args = Args::parse_from( [ "soundplayer", "--package", "com.cli", "--volume", "0.3" ] );
        let settings = Settings::default().apply( &args );
        assert_eq!( settings.package, "com.cli" );
        assert_eq!( settings.initial_volume, 0.3 );
        assert_eq!( settings.resource_dir, None );
    }


    #[test]
    fn test_named_file_must_exist() {
        let missing = std::env::temp_dir().join( "soundplayer-no-such-settings.json" );
        assert!( Settings::load( Some( missing.as_path() ) ).is_err() );
    }
}
