//! soundplayer - line-oriented host for the sound session engine
//!
//! Reads one host method call per line on stdin and prints events as JSON
//! lines on stdout. Logs go to stderr.

mod cli;
mod settings;

use std::io::{ self, BufRead };
use std::sync::Arc;
use std::thread;

use anyhow::{ Context, Result };
use clap::Parser;
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::EnvFilter;

use cli::Args;
use settings::Settings;

use soundplayer_core::{
    command,
    locator::{ default_resource_dir, default_storage_dir },
    ChannelSink, Command, DirectoryCatalog, HostEvent, HostLifecycle, LoggingRouter,
    PlayerOptions, SoundPlayer, SourceResolver, SymphoniaBackend,
};


fn init_tracing( default_filter: &str ) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else( |_| EnvFilter::new( default_filter ) );

    let _ = tracing_subscriber::fmt()
        .with_env_filter( filter )
        .with_writer( io::stderr )
        .try_init();
}


/// Prints every event as one JSON line until the player goes away.
fn print_events( mut events: UnboundedReceiver<HostEvent> ) {
    while let Some( event ) = events.blocking_recv() {
        println!( "{}", json!({ "event": event.name, "payload": event.payload }) );
    }
}


/// Runs one command. Returns false when the host asked to quit.
fn execute( player: &SoundPlayer, command: Command ) -> Result<bool> {
    match command {
        Command::PlaySoundFile { name, kind, key } => player.play_sound_file( &name, &kind, &key ),
        Command::PlaySoundFileWithDelay { name, kind, delay, key } => {
            player.play_sound_file_with_delay( &name, &kind, delay, &key )
        }
        Command::LoadSoundFile { name, kind, key } => player.load_sound_file( &name, &kind, &key ),
        Command::PlayUrl { url, key } => player.play_url( &url, &key ),
        Command::LoadUrl { url, key } => player.load_url( &url, &key ),
        Command::Pause { key } => player.pause( &key ),
        Command::Resume { key } => player.resume( &key ),
        Command::Stop { key } => player.stop( &key ),
        Command::Seek { seconds, key } => player.seek( seconds, &key ),
        Command::SetVolume { volume, key } => player.set_volume( volume, &key ),
        Command::SetLooping { key } => player.set_looping( &key ),
        Command::SetNumberOfLoops { loops, key } => player.set_number_of_loops( loops, &key ),
        Command::GetInfo { key } => {
            let info = player.get_info_blocking( &key )?;
            println!( "{}", serde_json::to_string( &info )? );
        }
        Command::SetSpeaker { on } => player.set_speaker( on ),
        Command::Help => eprintln!( "{}", command::help_text() ),
        Command::Quit => return Ok( false ),
    }
    Ok( true )
}


fn main() -> Result<()> {
    let args = Args::parse();
    let settings = Settings::load( args.config.as_deref() )?.apply( &args );
    init_tracing( &settings.log_filter );

    let resource_dir = settings.resource_dir.clone()
        .or_else( default_resource_dir )
        .context( "no resource directory configured" )?;
    let storage_dir = settings.storage_dir.clone()
        .or_else( default_storage_dir )
        .context( "no storage directory configured" )?;
    tracing::info!( "Resources: {:?}, storage: {:?}", resource_dir, storage_dir );

    let ( sink, events ) = ChannelSink::new();
    let options = PlayerOptions {
        resolver: SourceResolver::new(
            Box::new( DirectoryCatalog::new( resource_dir, settings.package.clone() ) ),
            settings.package.clone(),
            storage_dir,
        ),
        router: Box::new( LoggingRouter::new() ),
        sink: Arc::new( sink ),
        initial_volume: settings.initial_volume,
    };

    let player = SoundPlayer::spawn( Box::new( SymphoniaBackend::new() ), options )?;
    let lifecycle = HostLifecycle::new();
    player.attach( &lifecycle );

    let printer = thread::Builder::new()
        .name( "event-printer".into() )
        .spawn( move || print_events( events ) )?;

    for line in io::stdin().lock().lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with( '#' ) {
            continue;
        }

        match Command::parse( line ) {
            Ok( command ) => {
                tracing::debug!( "Command: {:?}", command );
                if !execute( &player, command )? {
                    break;
                }
            }
            Err( e ) => tracing::warn!( "{}: {:?}", e, line ),
        }
    }

    lifecycle.fire_teardown();
    drop( player );
    if printer.join().is_err() {
        tracing::error!( "Event printer panicked" );
    }

    Ok(())
}
