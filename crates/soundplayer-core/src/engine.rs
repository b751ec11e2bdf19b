//! Transport control
//!
//! The `Engine` ties the resolver, the registry and the shared playback
//! context together and implements every host-facing operation. Nothing here
//! returns an error to the host: setup failures become `OnSetupError` events,
//! operations on unknown keys are silent no-ops, decoder refusals are logged.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::event::{ Emitter, NotificationSink, PlayerEvent };
use crate::handle::{ BindOutcome, PlaybackInfo };
use crate::locator::{ Resolved, SourceDescriptor, SourceResolver };
use crate::media::{ DecoderBackend, DecoderError };
use crate::registry::{ DecoderNotice, NoticeSender, Repeat, Session, SessionRegistry };
use crate::route::{ AudioMode, AudioRouter };


/// Configuration for an engine.
pub struct PlayerOptions {
    pub resolver: SourceResolver,
    pub router: Box<dyn AudioRouter>,
    pub sink: Arc<dyn NotificationSink>,
    /// Shared volume before any `set_volume` call.
    pub initial_volume: f32,
}


/// Process-wide playback state shared by all sessions.
#[derive( Debug, Clone, Copy, PartialEq )]
pub struct SharedContext {
    pub volume: f32,
    pub speaker_on: bool,
}


/// Why a transport operation did nothing.
#[derive( Debug, Error )]
pub enum TransportError {
    #[error( "No session for key {0:?}" )]
    NoSession( String ),

    #[error( transparent )]
    Decoder( #[from] DecoderError ),
}


impl TransportError {
    /// Logs the error at a level matching its kind and drops it.
    fn report( self, operation: &str ) {
        match self {
            TransportError::NoSession( key ) => {
                tracing::debug!( "{}: no session for key {:?}", operation, key );
            }
            TransportError::Decoder( e ) => tracing::warn!( "{} failed: {}", operation, e ),
        }
    }
}


/// Keyed playback sessions plus the operations the host can invoke on them.
pub struct Engine {
    resolver: SourceResolver,
    registry: SessionRegistry,
    router: Box<dyn AudioRouter>,
    emitter: Emitter,
    context: SharedContext,
    next_ticket: u64,
}


impl Engine {
    /// Creates an engine. `notices` must route decoder callbacks back into
    /// `handle_notice` on the thread that owns the engine.
    pub fn new( options: PlayerOptions, backend: Box<dyn DecoderBackend>, notices: NoticeSender ) -> Self {
        Self {
            resolver: options.resolver,
            registry: SessionRegistry::new( backend, notices ),
            router: options.router,
            emitter: Emitter::new( options.sink ),
            context: SharedContext {
                volume: clamp_volume( options.initial_volume ).unwrap_or( 1.0 ),
                speaker_on: false,
            },
            next_ticket: 1,
        }
    }


    /// Mounts a named sound and starts it.
    pub fn play_sound_file( &mut self, name: &str, kind: &str, key: &str ) {
        if self.mount_file( name, kind, key ) {
            self.resume( key );
        }
    }


    /// Mounts a named sound now and starts it once `delay` seconds have passed.
    ///
    /// A stop, pause, resume or remount of the key before then cancels the
    /// delayed start.
    pub fn play_sound_file_with_delay( &mut self, name: &str, kind: &str, delay: f64, key: &str ) {
        if !self.mount_file( name, kind, key ) {
            return;
        }

        let delay = match Duration::try_from_secs_f64( delay ) {
            Ok( delay ) if !delay.is_zero() => delay,
            Ok( _ ) => return self.resume( key ),
            Err( _ ) => {
                tracing::warn!( "Invalid delay {} for {:?}, starting now", delay, key );
                return self.resume( key );
            }
        };

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        let notices = self.registry.notices();
        let Some( session ) = self.registry.get_mut( key ) else {
            return;
        };
        session.pending_start = Some( ticket );
        let due = DecoderNotice::StartDue {
            key: key.to_string(),
            generation: session.generation(),
            ticket,
        };

        let spawned = thread::Builder::new()
            .name( "sound-delay".into() )
            .spawn( move || {
                thread::sleep( delay );
                notices( due );
            });
        if let Err( e ) = spawned {
            tracing::warn!( "Failed to schedule delayed start for {:?}: {}", key, e );
            self.resume( key );
        }
    }


    /// Mounts a named sound without starting it.
    pub fn load_sound_file( &mut self, name: &str, kind: &str, key: &str ) {
        self.mount_file( name, kind, key );
    }


    /// Mounts a URL and starts it as soon as it is prepared.
    pub fn play_url( &mut self, url: &str, key: &str ) {
        if self.mount_url( url, key ) {
            self.resume( key );
        }
    }


    /// Mounts a URL without starting it.
    pub fn load_url( &mut self, url: &str, key: &str ) {
        self.mount_url( url, key );
    }


    pub fn pause( &mut self, key: &str ) {
        let result = self.with_session( key, |session| {
            session.pending_start = None;
            session.handle.pause()
        });
        if let Err( e ) = result {
            e.report( "pause" );
        }
    }


    /// Applies the shared volume, then starts or continues playback.
    pub fn resume( &mut self, key: &str ) {
        let volume = self.context.volume;
        let result = self.with_session( key, |session| {
            session.pending_start = None;
            session.handle.set_volume( volume );
            session.handle.start()
        });
        if let Err( e ) = result {
            e.report( "resume" );
        }
    }


    /// Stops playback. The session keeps its decoder.
    pub fn stop( &mut self, key: &str ) {
        let result = self.with_session( key, |session| {
            session.pending_start = None;
            session.handle.stop()
        });
        if let Err( e ) = result {
            e.report( "stop" );
        }
    }


    /// Moves the playback head. Out-of-range positions are left to the decoder.
    pub fn seek( &mut self, seconds: f64, key: &str ) {
        let position_ms = seconds_to_millis( seconds );
        let result = self.with_session( key, |session| session.handle.seek( position_ms ) );
        if let Err( e ) = result {
            e.report( "seek" );
        }
    }


    /// Sets the shared volume, and the session's volume when `key` exists.
    pub fn set_volume( &mut self, volume: f32, key: &str ) {
        let Some( volume ) = clamp_volume( volume ) else {
            tracing::warn!( "Ignoring non-finite volume {}", volume );
            return;
        };

        self.context.volume = volume;
        let result = self.with_session( key, |session| {
            session.handle.set_volume( volume );
            Ok(())
        });
        if let Err( e ) = result {
            e.report( "set_volume" );
        }
    }


    /// Restarts the session from the beginning each time it plays to the end.
    ///
    /// Every iteration still emits `FinishedPlaying` before the restart.
    pub fn set_looping( &mut self, key: &str ) {
        let result = self.with_session( key, |session| {
            session.repeat = Repeat::Forever;
            Ok(())
        });
        if let Err( e ) = result {
            e.report( "set_looping" );
        }
    }


    /// Plays the session `loops` more times after the current pass. Negative
    /// loops until stopped, zero turns looping off.
    pub fn set_number_of_loops( &mut self, loops: i32, key: &str ) {
        let result = self.with_session( key, |session| {
            session.repeat = Repeat::from_count( loops );
            Ok(())
        });
        if let Err( e ) = result {
            e.report( "set_number_of_loops" );
        }
    }


    /// Position and duration in seconds, or `None` for an unknown key.
    pub fn get_info( &self, key: &str ) -> Option<PlaybackInfo> {
        self.registry.get( key ).map( |session| session.handle.info() )
    }


    /// Routes audio to the speaker or away from it, device-wide.
    pub fn set_speaker( &mut self, on: bool ) {
        self.router.set_mode( AudioMode::InCommunication );
        self.router.set_speakerphone_on( on );
        self.context.speaker_on = on;
    }


    /// Releases every session. Run by the lifecycle hook at host teardown.
    pub fn teardown( &mut self ) {
        tracing::info!( "Tearing down {} session(s)", self.registry.len() );
        self.registry.release_all();
    }


    /// Applies a decoder callback. Notices for released or rebound sessions
    /// are dropped.
    pub fn handle_notice( &mut self, notice: DecoderNotice ) {
        match notice {
            DecoderNotice::Prepared { key, generation, result } => {
                self.on_prepared( &key, generation, result );
            }
            DecoderNotice::Completed { key, generation } => {
                self.on_completed( &key, generation );
            }
            DecoderNotice::StartDue { key, generation, ticket } => {
                self.on_start_due( &key, generation, ticket );
            }
        }
    }


    pub fn context( &self ) -> SharedContext {
        self.context
    }


    pub fn session( &self, key: &str ) -> Option<&Session> {
        self.registry.get( key )
    }


    pub fn session_keys( &self ) -> Vec<String> {
        let mut keys: Vec<String> = self.registry.keys().map( str::to_string ).collect();
        keys.sort();
        keys
    }


    fn mount_file( &mut self, name: &str, kind: &str, key: &str ) -> bool {
        let resolved = self.resolver.resolve_file( name, kind );
        match self.mount( key, resolved ) {
            Some( BindOutcome::Prepared ) => {
                self.emitter.emit( PlayerEvent::FinishedLoading { success: true } );
                self.emitter.emit( PlayerEvent::FinishedLoadingFile {
                    success: true,
                    name: name.to_string(),
                    kind: kind.to_string(),
                });
                true
            }
            Some( BindOutcome::Pending ) => true,
            None => false,
        }
    }


    fn mount_url( &mut self, url: &str, key: &str ) -> bool {
        let resolved = self.resolver.resolve_url( url );
        self.mount( key, resolved ).is_some()
    }


    /// Mounts and turns a setup failure into an `OnSetupError` event.
    fn mount( &mut self, key: &str, resolved: Resolved ) -> Option<BindOutcome> {
        match self.registry.mount( key, resolved ) {
            Ok( outcome ) => Some( outcome ),
            Err( e ) => {
                tracing::warn!( "Setup failed for {:?}: {}", key, e );
                self.emitter.emit( PlayerEvent::SetupError { error: e.to_string() } );
                None
            }
        }
    }


    fn on_prepared( &mut self, key: &str, generation: u64, result: Result<(), DecoderError> ) {
        let Some( session ) = self.registry.accept_mut( key, generation ) else {
            tracing::debug!( "Dropping stale prepare result for {:?}", key );
            return;
        };

        match session.handle.prepared( result ) {
            Ok(()) => {
                let url = match &session.source {
                    SourceDescriptor::RemoteUrl { url } => url.clone(),
                    other => other.to_string(),
                };
                self.emitter.emit( PlayerEvent::FinishedLoading { success: true } );
                self.emitter.emit( PlayerEvent::FinishedLoadingUrl { success: true, url } );
            }
            Err( e ) => {
                tracing::warn!( "Setup failed for {:?}: {}", key, e );
                self.emitter.emit( PlayerEvent::SetupError { error: e.to_string() } );
            }
        }
    }


    fn on_completed( &mut self, key: &str, generation: u64 ) {
        let Some( session ) = self.registry.accept_mut( key, generation ) else {
            tracing::debug!( "Dropping stale completion for {:?}", key );
            return;
        };

        session.handle.completed();
        self.emitter.emit( PlayerEvent::FinishedPlaying { success: true } );

        if session.repeat.next_pass() {
            let restart = session.handle.seek( 0 ).and_then( |_| session.handle.start() );
            if let Err( e ) = restart {
                tracing::warn!( "Loop restart failed for {:?}: {}", key, e );
            }
        }
    }


    fn on_start_due( &mut self, key: &str, generation: u64, ticket: u64 ) {
        let due = self.registry
            .accept_mut( key, generation )
            .is_some_and( |session| session.pending_start == Some( ticket ) );
        if due {
            self.resume( key );
        } else {
            tracing::debug!( "Dropping cancelled delayed start for {:?}", key );
        }
    }


    fn with_session<T>(
        &mut self,
        key: &str,
        op: impl FnOnce( &mut Session ) -> Result<T, DecoderError>,
    ) -> Result<T, TransportError> {
        let session = self.registry
            .get_mut( key )
            .ok_or_else( || TransportError::NoSession( key.to_string() ) )?;
        Ok( op( session )? )
    }
}


/// Seconds to decoder milliseconds. Negative and NaN inputs saturate to zero.
fn seconds_to_millis( seconds: f64 ) -> u64 {
    ( seconds * 1000.0 ).round() as u64
}


fn clamp_volume( volume: f32 ) -> Option<f32> {
    volume.is_finite().then( || volume.clamp( 0.0, 1.0 ) )
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::handle::DecoderState;
    use crate::locator::{ DirectoryCatalog, Locator };
    use crate::testing::{ notice_channel, touch, MockBackend, RecordingRouter, RecordingSink, RouteCall };
    use tempfile::TempDir;
    use tokio::sync::mpsc::UnboundedReceiver;


    struct Harness {
        engine: Engine,
        backend: MockBackend,
        sink: Arc<RecordingSink>,
        router: RecordingRouter,
        notices: UnboundedReceiver<DecoderNotice>,
        _scratch: TempDir,
    }


    impl Harness {
        fn new() -> Self {
            let scratch = tempfile::tempdir().unwrap();
            touch( scratch.path(), "res/raw/beep.mp3" );

            let backend = MockBackend::new();
            backend.fail_on( "missing" );
            let sink = Arc::new( RecordingSink::default() );
            let ( notices, rx ) = notice_channel();
            let router = RecordingRouter::default();

            let catalog = DirectoryCatalog::new( scratch.path().join( "res" ), "com.test.app" );
            let options = PlayerOptions {
                resolver: SourceResolver::new( Box::new( catalog ), "com.test.app", scratch.path().join( "files" ) ),
                router: Box::new( router.clone() ),
                sink: sink.clone(),
                initial_volume: 1.0,
            };

            Self {
                engine: Engine::new( options, Box::new( backend.clone() ), notices ),
                backend,
                sink,
                router,
                notices: rx,
                _scratch: scratch,
            }
        }


        /// Feeds queued decoder callbacks back into the engine.
        fn pump( &mut self ) {
            while let Ok( notice ) = self.notices.try_recv() {
                self.engine.handle_notice( notice );
            }
        }
    }


    #[test]
    fn test_unknown_key_operations_are_silent() {
        let mut h = Harness::new();

        h.engine.resume( "nope" );
        h.engine.pause( "nope" );
        h.engine.stop( "nope" );
        h.engine.seek( 3.0, "nope" );
        h.engine.set_looping( "nope" );

        assert!( h.engine.get_info( "nope" ).is_none() );
        assert!( h.sink.names().is_empty() );
        assert_eq!( h.backend.created(), 0 );
    }


    #[test]
    fn test_play_local_emits_loading_events_then_plays() {
        let mut h = Harness::new();

        h.engine.play_sound_file( "beep", "mp3", "a" );

        assert_eq!( h.sink.names(), vec![ "FinishedLoading", "FinishedLoadingFile" ] );
        assert_eq!( h.sink.payload( 1 )[ "name" ], "beep" );
        assert_eq!( h.sink.payload( 1 )[ "type" ], "mp3" );
        assert_eq!( h.engine.session( "a" ).unwrap().handle.state(), DecoderState::Playing );
        assert!( h.backend.probe( 0 ).lock().playing );
    }


    #[test]
    fn test_bundled_resource_mounts_bundled_locator() {
        let mut h = Harness::new();

        h.engine.load_sound_file( "beep", "mp3", "a" );

        let source = h.backend.probe( 0 ).lock().source.clone();
        assert!( matches!( source, Some( Locator::Bundled { .. } ) ) );
        assert_eq!( h.engine.session( "a" ).unwrap().handle.state(), DecoderState::Prepared );
    }


    #[test]
    fn test_missing_file_fails_at_prepare() {
        let mut h = Harness::new();

        h.engine.play_sound_file( "missing", "mp3", "b" );
        h.pump();

        assert_eq!( h.sink.names(), vec![ "OnSetupError" ] );
        let source = h.backend.probe( 0 ).lock().source.clone();
        assert!( matches!( source, Some( Locator::File { ref path } ) if path.ends_with( "files/missing.mp3" ) ) );
        assert!( h.engine.session( "b" ).is_none() );
        assert!( !h.sink.names().contains( &"FinishedPlaying".to_string() ) );
    }


    #[test]
    fn test_shared_volume_applies_on_resume() {
        let mut h = Harness::new();

        h.engine.set_volume( 0.25, "later" );
        assert_eq!( h.engine.context().volume, 0.25 );

        h.engine.load_sound_file( "beep", "mp3", "later" );
        assert_eq!( h.backend.probe( 0 ).lock().volume, None );

        h.engine.resume( "later" );
        assert_eq!( h.backend.probe( 0 ).lock().volume, Some( 0.25 ) );
    }


    #[test]
    fn test_set_volume_applies_to_live_session() {
        let mut h = Harness::new();
        h.engine.load_sound_file( "beep", "mp3", "a" );

        h.engine.set_volume( 0.6, "a" );

        assert_eq!( h.backend.probe( 0 ).lock().volume, Some( 0.6 ) );
        assert_eq!( h.engine.session( "a" ).unwrap().handle.state(), DecoderState::Prepared );
    }


    #[test]
    fn test_volume_is_clamped() {
        let mut h = Harness::new();

        h.engine.set_volume( 1.7, "a" );
        assert_eq!( h.engine.context().volume, 1.0 );
        h.engine.set_volume( f32::NAN, "a" );
        assert_eq!( h.engine.context().volume, 1.0 );
        h.engine.set_volume( -0.5, "a" );
        assert_eq!( h.engine.context().volume, 0.0 );
    }


    #[test]
    fn test_looping_restarts_and_reports_each_pass() {
        let mut h = Harness::new();
        h.engine.play_sound_file( "beep", "mp3", "a" );
        h.engine.set_looping( "a" );
        h.sink.clear();

        for _ in 0..3 {
            h.backend.complete( 0 );
            h.pump();
            let probe = h.backend.probe( 0 );
            let probe = probe.lock();
            assert_eq!( probe.position_ms, 0 );
            assert!( probe.playing );
        }

        assert_eq!( h.sink.names(), vec![ "FinishedPlaying"; 3 ] );
    }


    #[test]
    fn test_number_of_loops_counts_down() {
        let mut h = Harness::new();
        h.engine.play_sound_file( "beep", "mp3", "a" );
        h.engine.set_number_of_loops( 2, "a" );
        h.sink.clear();

        for _ in 0..2 {
            h.backend.complete( 0 );
            h.pump();
            assert!( h.backend.probe( 0 ).lock().playing );
        }
        h.backend.complete( 0 );
        h.pump();

        assert_eq!( h.sink.names(), vec![ "FinishedPlaying"; 3 ] );
        assert!( !h.backend.probe( 0 ).lock().playing );
        assert_eq!( h.engine.session( "a" ).unwrap().handle.state(), DecoderState::Completed );
    }


    #[test]
    fn test_zero_loops_turns_looping_off() {
        let mut h = Harness::new();
        h.engine.play_sound_file( "beep", "mp3", "a" );
        h.engine.set_looping( "a" );
        h.engine.set_number_of_loops( 0, "a" );

        h.backend.complete( 0 );
        h.pump();

        assert!( !h.backend.probe( 0 ).lock().playing );
        assert_eq!( h.engine.session( "a" ).unwrap().repeat, Repeat::Off );
    }


    #[test]
    fn test_delayed_start_plays_after_delay() {
        let mut h = Harness::new();

        h.engine.play_sound_file_with_delay( "beep", "mp3", 0.05, "a" );
        assert_eq!( h.sink.names(), vec![ "FinishedLoading", "FinishedLoadingFile" ] );
        assert!( !h.backend.probe( 0 ).lock().playing );

        let due = h.notices.blocking_recv().unwrap();
        h.engine.handle_notice( due );

        assert!( h.backend.probe( 0 ).lock().playing );
        assert_eq!( h.engine.session( "a" ).unwrap().pending_start, None );
    }


    #[test]
    fn test_stop_cancels_delayed_start() {
        let mut h = Harness::new();

        h.engine.play_sound_file_with_delay( "beep", "mp3", 0.05, "a" );
        h.engine.stop( "a" );
        let due = h.notices.blocking_recv().unwrap();
        h.engine.handle_notice( due );

        assert!( !h.backend.probe( 0 ).lock().playing );
        assert_eq!( h.engine.session( "a" ).unwrap().handle.state(), DecoderState::Stopped );
    }


    #[test]
    fn test_zero_delay_starts_immediately() {
        let mut h = Harness::new();

        h.engine.play_sound_file_with_delay( "beep", "mp3", 0.0, "a" );
        assert!( h.backend.probe( 0 ).lock().playing );

        h.engine.play_sound_file_with_delay( "beep", "mp3", f64::NAN, "b" );
        assert!( h.backend.probe( 1 ).lock().playing );
    }


    #[test]
    fn test_failed_seek_recovers_on_resume() {
        let mut h = Harness::new();
        h.engine.play_sound_file( "beep", "mp3", "a" );

        h.backend.probe( 0 ).lock().fail_seek = true;
        h.engine.seek( 1.0e12, "a" );
        assert!( !h.backend.probe( 0 ).lock().playing );
        h.backend.probe( 0 ).lock().fail_seek = false;

        h.engine.resume( "a" );
        assert!( h.backend.probe( 0 ).lock().playing );
        assert_eq!( h.engine.session( "a" ).unwrap().handle.state(), DecoderState::Playing );
    }


    #[test]
    fn test_completion_without_looping_stays_completed() {
        let mut h = Harness::new();
        h.engine.play_sound_file( "beep", "mp3", "a" );

        h.backend.complete( 0 );
        h.pump();

        assert_eq!( h.engine.session( "a" ).unwrap().handle.state(), DecoderState::Completed );
        assert!( !h.backend.probe( 0 ).lock().playing );
        assert_eq!( h.sink.names().last().map( String::as_str ), Some( "FinishedPlaying" ) );
    }


    #[test]
    fn test_play_url_events_arrive_after_prepare() {
        let mut h = Harness::new();

        h.engine.play_url( "https://example.com/song.mp3", "u" );
        assert!( h.sink.names().is_empty() );
        assert!( !h.backend.probe( 0 ).lock().playing );

        h.backend.finish_prepare( 0, Ok(()) );
        h.pump();

        assert_eq!( h.sink.names(), vec![ "FinishedLoading", "FinishedLoadingURL" ] );
        assert_eq!( h.sink.payload( 1 )[ "url" ], "https://example.com/song.mp3" );
        assert!( h.backend.probe( 0 ).lock().playing );
    }


    #[test]
    fn test_remote_prepare_failure_reports_setup_error() {
        let mut h = Harness::new();

        h.engine.load_url( "https://example.com/gone.mp3", "u" );
        h.backend.finish_prepare( 0, Err( DecoderError::Prepare( "HTTP 404".into() ) ) );
        h.pump();

        assert_eq!( h.sink.names(), vec![ "OnSetupError" ] );
        assert_eq!( h.sink.payload( 0 )[ "error" ], "Prepare failed: HTTP 404" );
        assert_eq!( h.engine.session( "u" ).unwrap().handle.state(), DecoderState::Error );
    }


    #[test]
    fn test_prepare_after_release_is_ignored() {
        let mut h = Harness::new();

        h.engine.load_url( "https://example.com/slow.mp3", "u" );
        h.engine.teardown();
        h.backend.finish_prepare( 0, Ok(()) );
        h.pump();

        assert!( h.sink.names().is_empty() );
        assert!( h.engine.session_keys().is_empty() );
    }


    #[test]
    fn test_remount_url_registers_callbacks_again() {
        let mut h = Harness::new();
        h.engine.load_url( "https://example.com/one.mp3", "u" );
        h.backend.finish_prepare( 0, Ok(()) );
        h.pump();
        h.sink.clear();

        h.engine.play_url( "https://example.com/two.mp3", "u" );
        h.backend.finish_prepare( 0, Ok(()) );
        h.pump();
        assert_eq!( h.sink.payload( 1 )[ "url" ], "https://example.com/two.mp3" );

        h.backend.complete( 0 );
        h.pump();
        assert_eq!( h.sink.names().last().map( String::as_str ), Some( "FinishedPlaying" ) );
        assert_eq!( h.backend.created(), 1 );
    }


    #[test]
    fn test_seek_converts_seconds() {
        let mut h = Harness::new();
        h.engine.load_sound_file( "beep", "mp3", "a" );

        h.engine.seek( 1.25, "a" );
        assert_eq!( h.backend.probe( 0 ).lock().position_ms, 1250 );
        assert_eq!( h.engine.get_info( "a" ).unwrap().current_time, 1.25 );

        h.engine.seek( -4.0, "a" );
        assert_eq!( h.backend.probe( 0 ).lock().position_ms, 0 );
    }


    #[test]
    fn test_pause_resume_stop_cycle() {
        let mut h = Harness::new();
        h.engine.play_sound_file( "beep", "mp3", "a" );

        h.engine.pause( "a" );
        assert_eq!( h.engine.session( "a" ).unwrap().handle.state(), DecoderState::Paused );
        h.engine.pause( "a" );
        h.engine.resume( "a" );
        assert_eq!( h.engine.session( "a" ).unwrap().handle.state(), DecoderState::Playing );

        h.engine.stop( "a" );
        assert_eq!( h.engine.session( "a" ).unwrap().handle.state(), DecoderState::Stopped );
        assert_eq!( h.backend.probe( 0 ).lock().releases, 0 );
        assert_eq!( h.backend.probe( 0 ).lock().pauses, 1 );
    }


    #[test]
    fn test_speaker_routing_is_global() {
        let mut h = Harness::new();

        h.engine.set_speaker( true );
        assert!( h.engine.context().speaker_on );
        h.engine.set_speaker( false );
        assert!( !h.engine.context().speaker_on );

        assert_eq!( h.router.calls(), vec![
            RouteCall::Mode( AudioMode::InCommunication ),
            RouteCall::Speakerphone( true ),
            RouteCall::Mode( AudioMode::InCommunication ),
            RouteCall::Speakerphone( false ),
        ]);
        assert!( h.sink.names().is_empty() );
        assert_eq!( h.backend.created(), 0 );
    }


    #[test]
    fn test_teardown_releases_everything_once() {
        let mut h = Harness::new();
        for key in [ "a", "b", "c", "d" ] {
            h.engine.play_sound_file( "beep", "mp3", key );
        }

        h.engine.teardown();

        assert!( h.engine.session_keys().is_empty() );
        for index in 0..4 {
            let probe = h.backend.probe( index );
            let probe = probe.lock();
            assert_eq!( ( probe.stops, probe.releases ), ( 1, 1 ) );
        }
    }
}
