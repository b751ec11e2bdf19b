//! Decoder handle state machine
//!
//! Wraps a `MediaDecoder` and tracks which transitions are legal, so transport
//! calls made in the wrong state turn into errors instead of reaching the
//! platform decoder.
//!
//! ```text
//! Idle -> Preparing -> Prepared -> Playing -> (Paused | Stopped | Completed)
//!   ^                                  |
//!   +------------- reset --------------+            ... -> Released
//! ```

use serde::Serialize;

use crate::locator::Locator;
use crate::media::{ CompletionCallback, DecoderError, MediaDecoder, PreparedCallback };


/// Lifecycle state of a decoder handle.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum DecoderState {
    Idle,
    Preparing,
    Prepared,
    Playing,
    Paused,
    Stopped,
    /// Natural end of media was reached.
    Completed,
    /// The last bind failed; only `reset` or `release` are meaningful.
    Error,
    Released,
}


/// Position and length of the bound media, in seconds.
#[derive( Debug, Clone, Copy, PartialEq, Serialize )]
pub struct PlaybackInfo {
    #[serde( rename = "currentTime" )]
    pub current_time: f64,
    pub duration: f64,
}


/// Callbacks installed on every bind.
pub struct Binding {
    pub on_completion: CompletionCallback,
    pub on_prepared: PreparedCallback,
}


/// Result of a successful bind.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum BindOutcome {
    /// The decoder is ready now.
    Prepared,
    /// Preparation continues in the background; a prepared callback follows.
    Pending,
}


/// A decoder plus the state it is known to be in.
pub struct DecoderHandle {
    decoder: Box<dyn MediaDecoder>,
    state: DecoderState,
    start_when_prepared: bool,
}


impl DecoderHandle {
    pub fn new( decoder: Box<dyn MediaDecoder> ) -> Self {
        Self {
            decoder,
            state: DecoderState::Idle,
            start_when_prepared: false,
        }
    }


    pub fn state( &self ) -> DecoderState {
        self.state
    }


    /// Returns true if a `start` is waiting for an asynchronous prepare.
    pub fn start_pending( &self ) -> bool {
        self.start_when_prepared
    }


    /// Binds `locator` and prepares it. Local media is prepared before this
    /// returns; remote media reports through `binding.on_prepared`.
    pub fn bind( &mut self, locator: &Locator, binding: Binding ) -> Result<BindOutcome, DecoderError> {
        if self.state != DecoderState::Idle {
            return Err( self.invalid( "bind" ) );
        }

        self.decoder.set_on_completion( binding.on_completion );
        if let Err( e ) = self.decoder.set_data_source( locator ) {
            self.state = DecoderState::Error;
            return Err( e );
        }

        self.state = DecoderState::Preparing;
        if locator.is_remote() {
            self.decoder.prepare_async( binding.on_prepared );
            return Ok( BindOutcome::Pending );
        }

        match self.decoder.prepare() {
            Ok(()) => {
                self.state = DecoderState::Prepared;
                Ok( BindOutcome::Prepared )
            }
            Err( e ) => {
                self.state = DecoderState::Error;
                Err( e )
            }
        }
    }


    /// Applies the outcome of an asynchronous prepare.
    ///
    /// A deferred start runs here; its failure is logged, not returned, since
    /// the prepare itself succeeded.
    pub fn prepared( &mut self, result: Result<(), DecoderError> ) -> Result<(), DecoderError> {
        if self.state != DecoderState::Preparing {
            return Err( self.invalid( "finish preparing" ) );
        }

        if let Err( e ) = result {
            self.state = DecoderState::Error;
            self.start_when_prepared = false;
            return Err( e );
        }

        self.state = DecoderState::Prepared;
        if std::mem::take( &mut self.start_when_prepared ) {
            if let Err( e ) = self.start() {
                tracing::warn!( "Deferred start failed: {}", e );
            }
        }
        Ok(())
    }


    pub fn start( &mut self ) -> Result<(), DecoderError> {
        match self.state {
            DecoderState::Playing => Ok(()),
            DecoderState::Preparing => {
                self.start_when_prepared = true;
                Ok(())
            }
            DecoderState::Stopped => {
                // A stopped decoder has to be prepared again before it can start
                if let Err( e ) = self.decoder.prepare() {
                    self.state = DecoderState::Error;
                    return Err( e );
                }
                self.state = DecoderState::Prepared;
                self.start()
            }
            DecoderState::Prepared | DecoderState::Paused | DecoderState::Completed => {
                self.decoder.start()?;
                self.state = DecoderState::Playing;
                Ok(())
            }
            DecoderState::Idle | DecoderState::Error | DecoderState::Released => {
                Err( self.invalid( "start" ) )
            }
        }
    }


    /// Pauses only when actually playing; anything else is a no-op.
    pub fn pause( &mut self ) -> Result<(), DecoderError> {
        if self.state == DecoderState::Playing && self.decoder.is_playing() {
            self.decoder.pause()?;
            self.state = DecoderState::Paused;
        }
        Ok(())
    }


    /// Stops playback. Stopping twice is a no-op, and stopping while
    /// preparing cancels a deferred start.
    pub fn stop( &mut self ) -> Result<(), DecoderError> {
        match self.state {
            DecoderState::Prepared
            | DecoderState::Playing
            | DecoderState::Paused
            | DecoderState::Completed => {
                self.decoder.stop()?;
                self.state = DecoderState::Stopped;
            }
            DecoderState::Preparing => self.start_when_prepared = false,
            DecoderState::Stopped
            | DecoderState::Idle
            | DecoderState::Error
            | DecoderState::Released => {}
        }
        Ok(())
    }


    /// Moves the playback head. After a failed seek the decoder is stopped,
    /// so the next `start` prepares it again instead of trusting a dead stream.
    pub fn seek( &mut self, position_ms: u64 ) -> Result<(), DecoderError> {
        match self.state {
            DecoderState::Prepared
            | DecoderState::Playing
            | DecoderState::Paused
            | DecoderState::Completed => {
                let result = self.decoder.seek_to( position_ms );
                if result.is_err() {
                    if let Err( e ) = self.decoder.stop() {
                        tracing::warn!( "Stop after failed seek failed: {}", e );
                    }
                    self.state = DecoderState::Stopped;
                }
                result
            }
            _ => Err( self.invalid( "seek" ) ),
        }
    }


    pub fn set_volume( &mut self, volume: f32 ) {
        if self.state != DecoderState::Released {
            self.decoder.set_volume( volume );
        }
    }


    /// Current position and duration. Unprepared media reports zeros.
    pub fn info( &self ) -> PlaybackInfo {
        match self.state {
            DecoderState::Prepared
            | DecoderState::Playing
            | DecoderState::Paused
            | DecoderState::Stopped
            | DecoderState::Completed => PlaybackInfo {
                current_time: self.decoder.current_position() as f64 / 1000.0,
                duration: self.decoder.duration().unwrap_or( 0 ) as f64 / 1000.0,
            },
            _ => PlaybackInfo { current_time: 0.0, duration: 0.0 },
        }
    }


    /// Records a natural end of media.
    pub fn completed( &mut self ) {
        if self.state == DecoderState::Playing {
            self.state = DecoderState::Completed;
        }
    }


    /// Drops the current binding so the decoder can be bound again.
    pub fn reset( &mut self ) {
        if self.state != DecoderState::Released {
            self.decoder.reset();
            self.state = DecoderState::Idle;
            self.start_when_prepared = false;
        }
    }


    /// Stops and frees the decoder. The handle is unusable afterwards.
    pub fn release( &mut self ) {
        if self.state == DecoderState::Released {
            return;
        }
        if let Err( e ) = self.stop() {
            tracing::warn!( "Stop before release failed: {}", e );
        }
        self.decoder.release();
        self.state = DecoderState::Released;
        self.start_when_prepared = false;
    }


    fn invalid( &self, operation: &'static str ) -> DecoderError {
        DecoderError::InvalidState { operation, state: self.state }
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::testing::MockBackend;
    use crate::media::DecoderBackend;
    use std::path::PathBuf;


    fn binding() -> Binding {
        Binding {
            on_completion: Box::new( || {} ),
            on_prepared: Box::new( |_| {} ),
        }
    }


    fn file( name: &str ) -> Locator {
        Locator::File { path: PathBuf::from( format!( "/sounds/{}", name ) ) }
    }


    fn handle( backend: &mut MockBackend ) -> DecoderHandle {
        DecoderHandle::new( backend.create().unwrap() )
    }


    #[test]
    fn test_local_bind_prepares_synchronously() {
        let mut backend = MockBackend::new();
        let mut handle = handle( &mut backend );

        let outcome = handle.bind( &file( "a.mp3" ), binding() ).unwrap();
        assert_eq!( outcome, BindOutcome::Prepared );
        assert_eq!( handle.state(), DecoderState::Prepared );
        assert_eq!( backend.probe( 0 ).lock().calls, vec![ "set_on_completion", "set_data_source", "prepare" ] );
    }


    #[test]
    fn test_failed_prepare_leaves_error_state() {
        let mut backend = MockBackend::new();
        backend.fail_on( "broken" );
        let mut handle = handle( &mut backend );

        assert!( handle.bind( &file( "broken.mp3" ), binding() ).is_err() );
        assert_eq!( handle.state(), DecoderState::Error );
        assert!( matches!( handle.start(), Err( DecoderError::InvalidState { operation: "start", .. } ) ) );
    }


    #[test]
    fn test_start_while_preparing_is_deferred() {
        let mut backend = MockBackend::new();
        let mut handle = handle( &mut backend );

        let url = Locator::Url { url: "https://example.com/a.mp3".into() };
        assert_eq!( handle.bind( &url, binding() ).unwrap(), BindOutcome::Pending );

        handle.start().unwrap();
        assert!( handle.start_pending() );
        assert!( !backend.probe( 0 ).lock().playing );

        handle.prepared( Ok(()) ).unwrap();
        assert_eq!( handle.state(), DecoderState::Playing );
        assert!( backend.probe( 0 ).lock().playing );
    }


    #[test]
    fn test_stop_while_preparing_cancels_start() {
        let mut backend = MockBackend::new();
        let mut handle = handle( &mut backend );

        let url = Locator::Url { url: "https://example.com/a.mp3".into() };
        handle.bind( &url, binding() ).unwrap();
        handle.start().unwrap();
        handle.stop().unwrap();
        handle.prepared( Ok(()) ).unwrap();

        assert_eq!( handle.state(), DecoderState::Prepared );
        assert_eq!( backend.probe( 0 ).lock().stops, 0 );
    }


    #[test]
    fn test_pause_only_when_playing() {
        let mut backend = MockBackend::new();
        let mut handle = handle( &mut backend );
        handle.bind( &file( "a.mp3" ), binding() ).unwrap();

        handle.pause().unwrap();
        assert_eq!( handle.state(), DecoderState::Prepared );

        handle.start().unwrap();
        handle.pause().unwrap();
        handle.pause().unwrap();
        assert_eq!( handle.state(), DecoderState::Paused );
        assert_eq!( backend.probe( 0 ).lock().pauses, 1 );
    }


    #[test]
    fn test_start_after_stop_prepares_again() {
        let mut backend = MockBackend::new();
        let mut handle = handle( &mut backend );
        handle.bind( &file( "a.mp3" ), binding() ).unwrap();
        handle.start().unwrap();
        handle.stop().unwrap();
        handle.stop().unwrap();
        assert_eq!( backend.probe( 0 ).lock().stops, 1 );

        handle.start().unwrap();
        assert_eq!( handle.state(), DecoderState::Playing );
        let prepares = backend.probe( 0 ).lock().calls.iter().filter( |c| **c == "prepare" ).count();
        assert_eq!( prepares, 2 );
    }


    #[test]
    fn test_release_is_terminal_and_single() {
        let mut backend = MockBackend::new();
        let mut handle = handle( &mut backend );
        handle.bind( &file( "a.mp3" ), binding() ).unwrap();
        handle.start().unwrap();

        handle.release();
        handle.release();
        handle.reset();

        let probe = backend.probe( 0 );
        let probe = probe.lock();
        assert_eq!( probe.stops, 1 );
        assert_eq!( probe.releases, 1 );
        assert_eq!( handle.state(), DecoderState::Released );
    }


    #[test]
    fn test_failed_seek_stops_so_start_recovers() {
        let mut backend = MockBackend::new();
        let mut handle = handle( &mut backend );
        handle.bind( &file( "a.mp3" ), binding() ).unwrap();
        handle.start().unwrap();

        backend.probe( 0 ).lock().fail_seek = true;
        assert!( handle.seek( 90_000 ).is_err() );
        assert_eq!( handle.state(), DecoderState::Stopped );
        assert!( !backend.probe( 0 ).lock().playing );

        backend.probe( 0 ).lock().fail_seek = false;
        handle.start().unwrap();
        assert_eq!( handle.state(), DecoderState::Playing );
        assert!( backend.probe( 0 ).lock().playing );
    }


    #[test]
    fn test_info_converts_to_seconds() {
        let mut backend = MockBackend::new();
        let mut handle = handle( &mut backend );
        assert_eq!( handle.info(), PlaybackInfo { current_time: 0.0, duration: 0.0 } );

        handle.bind( &file( "a.mp3" ), binding() ).unwrap();
        handle.seek( 1500 ).unwrap();
        let info = handle.info();
        assert_eq!( info.current_time, 1.5 );
        assert_eq!( info.duration, 3.25 );
    }
}
