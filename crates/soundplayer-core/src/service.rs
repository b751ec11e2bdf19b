//! Player service
//!
//! Host calls and decoder callbacks arrive on arbitrary threads. `SoundPlayer`
//! funnels both onto one owner thread that holds the `Engine`, so sessions are
//! only ever touched from there and callbacks are applied in arrival order.

use std::thread;

use thiserror::Error;
use tokio::sync::{ mpsc, oneshot };

use crate::engine::{ Engine, PlayerOptions };
use crate::handle::PlaybackInfo;
use crate::lifecycle::{ LifecycleSource, TeardownHook };
use crate::media::DecoderBackend;
use crate::registry::{ DecoderNotice, NoticeSender };


#[derive( Debug, Error )]
pub enum ServiceError {
    #[error( "Failed to spawn player thread: {0}" )]
    Spawn( #[from] std::io::Error ),

    #[error( "Player thread is not running" )]
    Stopped,
}


enum Request {
    PlaySoundFile { name: String, kind: String, key: String },
    PlaySoundFileWithDelay { name: String, kind: String, delay: f64, key: String },
    LoadSoundFile { name: String, kind: String, key: String },
    PlayUrl { url: String, key: String },
    LoadUrl { url: String, key: String },
    Pause { key: String },
    Resume { key: String },
    Stop { key: String },
    Seek { seconds: f64, key: String },
    SetVolume { volume: f32, key: String },
    SetLooping { key: String },
    SetNumberOfLoops { loops: i32, key: String },
    GetInfo { key: String, reply: oneshot::Sender<Option<PlaybackInfo>> },
    SetSpeaker { on: bool },
    Teardown,
    Notice( DecoderNotice ),
    Shutdown,
}


/// Handle to the player's owner thread. Every method returns immediately.
pub struct SoundPlayer {
    tx: mpsc::UnboundedSender<Request>,
    thread: Option<thread::JoinHandle<()>>,
}


impl SoundPlayer {
    /// Starts the owner thread. Decoders are created on that thread.
    pub fn spawn( backend: Box<dyn DecoderBackend>, options: PlayerOptions ) -> Result<Self, ServiceError> {
        let ( tx, mut rx ) = mpsc::unbounded_channel();

        let notice_tx = tx.clone();
        let notices: NoticeSender = std::sync::Arc::new( move |notice| {
            if notice_tx.send( Request::Notice( notice ) ).is_err() {
                tracing::debug!( "Player thread gone, dropping decoder notice" );
            }
        });

        let thread = thread::Builder::new()
            .name( "sound-player".into() )
            .spawn( move || {
                let mut engine = Engine::new( options, backend, notices );
                tracing::info!( "Player thread started" );

                while let Some( request ) = rx.blocking_recv() {
                    if !Self::dispatch( &mut engine, request ) {
                        break;
                    }
                }

                engine.teardown();
                tracing::info!( "Player thread stopped" );
            })?;

        Ok( Self { tx, thread: Some( thread ) } )
    }


    pub fn play_sound_file( &self, name: &str, kind: &str, key: &str ) {
        self.send( Request::PlaySoundFile { name: name.into(), kind: kind.into(), key: key.into() } );
    }


    /// Mounts now, starts after `delay` seconds.
    pub fn play_sound_file_with_delay( &self, name: &str, kind: &str, delay: f64, key: &str ) {
        self.send( Request::PlaySoundFileWithDelay {
            name: name.into(),
            kind: kind.into(),
            delay,
            key: key.into(),
        });
    }


    pub fn load_sound_file( &self, name: &str, kind: &str, key: &str ) {
        self.send( Request::LoadSoundFile { name: name.into(), kind: kind.into(), key: key.into() } );
    }


    pub fn play_url( &self, url: &str, key: &str ) {
        self.send( Request::PlayUrl { url: url.into(), key: key.into() } );
    }


    pub fn load_url( &self, url: &str, key: &str ) {
        self.send( Request::LoadUrl { url: url.into(), key: key.into() } );
    }


    pub fn pause( &self, key: &str ) {
        self.send( Request::Pause { key: key.into() } );
    }


    pub fn resume( &self, key: &str ) {
        self.send( Request::Resume { key: key.into() } );
    }


    pub fn stop( &self, key: &str ) {
        self.send( Request::Stop { key: key.into() } );
    }


    pub fn seek( &self, seconds: f64, key: &str ) {
        self.send( Request::Seek { seconds, key: key.into() } );
    }


    pub fn set_volume( &self, volume: f32, key: &str ) {
        self.send( Request::SetVolume { volume, key: key.into() } );
    }


    pub fn set_looping( &self, key: &str ) {
        self.send( Request::SetLooping { key: key.into() } );
    }


    pub fn set_number_of_loops( &self, loops: i32, key: &str ) {
        self.send( Request::SetNumberOfLoops { loops, key: key.into() } );
    }


    pub fn set_speaker( &self, on: bool ) {
        self.send( Request::SetSpeaker { on } );
    }


    /// Releases every session. The player stays usable.
    pub fn teardown( &self ) {
        self.send( Request::Teardown );
    }


    /// Position and duration of `key`, answered once earlier requests are done.
    pub fn get_info( &self, key: &str ) -> oneshot::Receiver<Option<PlaybackInfo>> {
        let ( reply, rx ) = oneshot::channel();
        self.send( Request::GetInfo { key: key.into(), reply } );
        rx
    }


    /// Blocking form of `get_info` for callers outside an async runtime.
    pub fn get_info_blocking( &self, key: &str ) -> Result<Option<PlaybackInfo>, ServiceError> {
        self.get_info( key ).blocking_recv().map_err( |_| ServiceError::Stopped )
    }


    /// A hook that releases every session when run.
    pub fn teardown_hook( &self ) -> TeardownHook {
        let tx = self.tx.clone();
        Box::new( move || {
            if tx.send( Request::Teardown ).is_err() {
                tracing::debug!( "Player thread gone before teardown" );
            }
        })
    }


    /// Registers the teardown hook with the host's lifecycle.
    pub fn attach( &self, lifecycle: &dyn LifecycleSource ) {
        lifecycle.on_teardown( self.teardown_hook() );
    }


    fn send( &self, request: Request ) {
        if self.tx.send( request ).is_err() {
            tracing::warn!( "{}", ServiceError::Stopped );
        }
    }


    /// Applies one request. Returns false on shutdown.
    fn dispatch( engine: &mut Engine, request: Request ) -> bool {
        match request {
            Request::PlaySoundFile { name, kind, key } => engine.play_sound_file( &name, &kind, &key ),
            Request::PlaySoundFileWithDelay { name, kind, delay, key } => {
                engine.play_sound_file_with_delay( &name, &kind, delay, &key );
            }
            Request::LoadSoundFile { name, kind, key } => engine.load_sound_file( &name, &kind, &key ),
            Request::PlayUrl { url, key } => engine.play_url( &url, &key ),
            Request::LoadUrl { url, key } => engine.load_url( &url, &key ),
            Request::Pause { key } => engine.pause( &key ),
            Request::Resume { key } => engine.resume( &key ),
            Request::Stop { key } => engine.stop( &key ),
            Request::Seek { seconds, key } => engine.seek( seconds, &key ),
            Request::SetVolume { volume, key } => engine.set_volume( volume, &key ),
            Request::SetLooping { key } => engine.set_looping( &key ),
            Request::SetNumberOfLoops { loops, key } => engine.set_number_of_loops( loops, &key ),
            Request::GetInfo { key, reply } => {
                // The caller may have stopped waiting
                let _ = reply.send( engine.get_info( &key ) );
            }
            Request::SetSpeaker { on } => engine.set_speaker( on ),
            Request::Teardown => engine.teardown(),
            Request::Notice( notice ) => engine.handle_notice( notice ),
            Request::Shutdown => return false,
        }
        true
    }
}


impl Drop for SoundPlayer {
    fn drop( &mut self ) {
        let _ = self.tx.send( Request::Shutdown );
        if let Some( thread ) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!( "Player thread panicked" );
            }
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::event::{ ChannelSink, HostEvent };
    use crate::lifecycle::HostLifecycle;
    use crate::locator::{ DirectoryCatalog, SourceResolver };
    use crate::route::LoggingRouter;
    use crate::testing::{ touch, MockBackend };
    use tempfile::TempDir;
    use std::sync::Arc;


    fn spawn( scratch: &TempDir, backend: &MockBackend ) -> ( SoundPlayer, mpsc::UnboundedReceiver<HostEvent> ) {
        let ( sink, events ) = ChannelSink::new();
        let catalog = DirectoryCatalog::new( scratch.path().join( "res" ), "com.test.app" );
        let options = PlayerOptions {
            resolver: SourceResolver::new( Box::new( catalog ), "com.test.app", scratch.path().join( "files" ) ),
            router: Box::new( LoggingRouter::new() ),
            sink: Arc::new( sink ),
            initial_volume: 1.0,
        };
        let player = SoundPlayer::spawn( Box::new( backend.clone() ), options ).unwrap();
        ( player, events )
    }


    fn drain( events: &mut mpsc::UnboundedReceiver<HostEvent> ) -> Vec<String> {
        let mut names = Vec::new();
        while let Ok( event ) = events.try_recv() {
            names.push( event.name );
        }
        names
    }


    #[test]
    fn test_requests_apply_in_order() {
        let scratch = tempfile::tempdir().unwrap();
        touch( scratch.path(), "res/raw/beep.mp3" );
        let backend = MockBackend::new();
        let ( player, mut events ) = spawn( &scratch, &backend );

        player.play_sound_file( "beep", "mp3", "a" );
        player.seek( 2.0, "a" );
        let info = player.get_info_blocking( "a" ).unwrap().unwrap();

        assert_eq!( info.current_time, 2.0 );
        assert_eq!( info.duration, 3.25 );
        assert_eq!( drain( &mut events ), vec![ "FinishedLoading", "FinishedLoadingFile" ] );
        assert!( player.get_info_blocking( "missing" ).unwrap().is_none() );
    }


    #[test]
    fn test_decoder_callbacks_reach_owner_thread() {
        let scratch = tempfile::tempdir().unwrap();
        let backend = MockBackend::new();
        let ( player, mut events ) = spawn( &scratch, &backend );

        player.play_url( "https://example.com/a.mp3", "u" );
        player.get_info_blocking( "u" ).unwrap();

        backend.finish_prepare( 0, Ok(()) );
        player.get_info_blocking( "u" ).unwrap();
        assert!( backend.probe( 0 ).lock().playing );

        backend.complete( 0 );
        player.get_info_blocking( "u" ).unwrap();
        assert_eq!(
            drain( &mut events ),
            vec![ "FinishedLoading", "FinishedLoadingURL", "FinishedPlaying" ]
        );
    }


    #[test]
    fn test_delayed_start_fires_on_owner_thread() {
        let scratch = tempfile::tempdir().unwrap();
        touch( scratch.path(), "res/raw/beep.mp3" );
        let backend = MockBackend::new();
        let ( player, mut events ) = spawn( &scratch, &backend );

        player.play_sound_file_with_delay( "beep", "mp3", 0.05, "a" );
        player.set_number_of_loops( 1, "a" );
        player.get_info_blocking( "a" ).unwrap();
        assert!( !backend.probe( 0 ).lock().playing );

        std::thread::sleep( std::time::Duration::from_millis( 300 ) );
        player.get_info_blocking( "a" ).unwrap();
        assert!( backend.probe( 0 ).lock().playing );

        backend.complete( 0 );
        player.get_info_blocking( "a" ).unwrap();
        assert!( backend.probe( 0 ).lock().playing );
        assert_eq!(
            drain( &mut events ),
            vec![ "FinishedLoading", "FinishedLoadingFile", "FinishedPlaying" ]
        );
    }


    #[test]
    fn test_lifecycle_teardown_releases_sessions() {
        let scratch = tempfile::tempdir().unwrap();
        touch( scratch.path(), "res/raw/beep.mp3" );
        let backend = MockBackend::new();
        let ( player, _events ) = spawn( &scratch, &backend );
        let lifecycle = HostLifecycle::new();
        player.attach( &lifecycle );

        player.play_sound_file( "beep", "mp3", "a" );
        player.play_sound_file( "beep", "mp3", "b" );
        lifecycle.fire_teardown();

        assert!( player.get_info_blocking( "a" ).unwrap().is_none() );
        assert!( player.get_info_blocking( "b" ).unwrap().is_none() );
        assert_eq!( backend.probe( 0 ).lock().releases, 1 );
        assert_eq!( backend.probe( 1 ).lock().releases, 1 );
    }


    #[test]
    fn test_drop_releases_and_joins() {
        let scratch = tempfile::tempdir().unwrap();
        touch( scratch.path(), "res/raw/beep.mp3" );
        let backend = MockBackend::new();
        let ( player, _events ) = spawn( &scratch, &backend );

        player.play_sound_file( "beep", "mp3", "a" );
        let hook = player.teardown_hook();
        drop( player );
        hook();

        assert_eq!( backend.probe( 0 ).lock().releases, 1 );
    }
}
