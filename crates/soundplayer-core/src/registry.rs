//! Session registry
//!
//! Maps session keys to decoder handles. A key holds at most one handle at a
//! time: re-mounting a key resets and rebinds the existing handle, releasing
//! a key removes its entry so the next mount starts from a fresh handle.
//!
//! Decoder callbacks never touch the registry directly. They are turned into
//! `DecoderNotice`s carrying the key and the bind generation, and the owner
//! hands them back through `accept_mut`, which drops anything stale.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::handle::{ BindOutcome, Binding, DecoderHandle };
use crate::locator::{ Resolved, SourceDescriptor };
use crate::media::{ DecoderBackend, DecoderError };


/// Failure to get a session into a playable state.
#[derive( Debug, Error )]
pub enum SetupError {
    #[error( "Failed to initialize decoder for URI: {0}" )]
    DecoderCreation( String ),

    #[error( transparent )]
    Decoder( #[from] DecoderError ),
}


/// A decoder callback, marshalled back to the registry's owner.
#[derive( Debug )]
pub enum DecoderNotice {
    Prepared {
        key: String,
        generation: u64,
        result: Result<(), DecoderError>,
    },
    Completed {
        key: String,
        generation: u64,
    },
    /// A delayed start came due.
    StartDue {
        key: String,
        generation: u64,
        ticket: u64,
    },
}


/// Delivers notices to the registry's owner. Called from decoder threads.
pub type NoticeSender = Arc<dyn Fn( DecoderNotice ) + Send + Sync>;


/// How a session behaves when it plays to the end.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub enum Repeat {
    #[default]
    Off,
    /// Restarts this many more times.
    Times( u32 ),
    Forever,
}


impl Repeat {
    /// Loop count as hosts send it: negative loops forever, zero plays once.
    pub fn from_count( loops: i32 ) -> Self {
        match loops {
            n if n < 0 => Repeat::Forever,
            0 => Repeat::Off,
            n => Repeat::Times( n.unsigned_abs() ),
        }
    }


    /// Uses up one restart. Returns false once there is nothing left to repeat.
    pub fn next_pass( &mut self ) -> bool {
        match *self {
            Repeat::Off => false,
            Repeat::Forever => true,
            Repeat::Times( n ) => {
                *self = if n > 1 { Repeat::Times( n - 1 ) } else { Repeat::Off };
                true
            }
        }
    }
}


/// A keyed playback slot.
pub struct Session {
    key: String,
    pub handle: DecoderHandle,
    pub source: SourceDescriptor,
    /// Survives remounts, like the platform's completion listener.
    pub repeat: Repeat,
    /// Ticket of the delayed start still waiting to fire.
    pub pending_start: Option<u64>,
    generation: u64,
}


impl Session {
    pub fn key( &self ) -> &str {
        &self.key
    }


    /// Bind generation the session's callbacks are tagged with.
    pub fn generation( &self ) -> u64 {
        self.generation
    }
}


/// Owner of every live session.
///
/// Concurrent `mount` and `release` on one key are not serialized here; the
/// registry is meant to be driven from a single owner (see `SoundPlayer`).
pub struct SessionRegistry {
    sessions: HashMap<String, Session>,
    backend: Box<dyn DecoderBackend>,
    notices: NoticeSender,
    next_generation: u64,
}


impl SessionRegistry {
    pub fn new( backend: Box<dyn DecoderBackend>, notices: NoticeSender ) -> Self {
        Self {
            sessions: HashMap::new(),
            backend,
            notices,
            next_generation: 1,
        }
    }


    /// Binds `resolved` to the session for `key`, creating it when absent.
    ///
    /// On the reuse path a failed rebind leaves the session in place with an
    /// unprepared decoder. On the creation path a failed bind releases the new
    /// decoder and no session is recorded.
    pub fn mount( &mut self, key: &str, resolved: Resolved ) -> Result<BindOutcome, SetupError> {
        let generation = self.next_generation;
        self.next_generation += 1;
        let binding = self.binding( key, generation );

        if let Some( session ) = self.sessions.get_mut( key ) {
            tracing::info!( "Remounting {:?} with {}", key, resolved.locator );
            session.handle.reset();
            session.source = resolved.source;
            session.generation = generation;
            session.pending_start = None;
            return Ok( session.handle.bind( &resolved.locator, binding )? );
        }

        tracing::info!( "Mounting {:?} with {}", key, resolved.locator );
        let decoder = self.backend
            .create()
            .ok_or_else( || SetupError::DecoderCreation( resolved.locator.to_string() ) )?;

        let mut handle = DecoderHandle::new( decoder );
        match handle.bind( &resolved.locator, binding ) {
            Ok( outcome ) => {
                self.sessions.insert( key.to_string(), Session {
                    key: key.to_string(),
                    handle,
                    source: resolved.source,
                    repeat: Repeat::Off,
                    pending_start: None,
                    generation,
                });
                Ok( outcome )
            }
            Err( e ) => {
                handle.release();
                Err( e.into() )
            }
        }
    }


    /// Stops and releases the session's decoder, then forgets the key.
    pub fn release( &mut self, key: &str ) -> bool {
        match self.sessions.remove( key ) {
            Some( mut session ) => {
                session.handle.release();
                tracing::info!( "Released {:?}", key );
                true
            }
            None => false,
        }
    }


    /// Releases every session. Safe with no sessions.
    pub fn release_all( &mut self ) {
        let count = self.sessions.len();
        for ( key, mut session ) in self.sessions.drain() {
            session.handle.release();
            tracing::debug!( "Released {:?}", key );
        }
        tracing::info!( "Released {} session(s)", count );
    }


    pub fn get( &self, key: &str ) -> Option<&Session> {
        self.sessions.get( key )
    }


    pub fn get_mut( &mut self, key: &str ) -> Option<&mut Session> {
        self.sessions.get_mut( key )
    }


    /// Returns the session only if it still exists at `generation`.
    pub fn accept_mut( &mut self, key: &str, generation: u64 ) -> Option<&mut Session> {
        self.sessions
            .get_mut( key )
            .filter( |session| session.generation == generation )
    }


    pub fn len( &self ) -> usize {
        self.sessions.len()
    }


    pub fn is_empty( &self ) -> bool {
        self.sessions.is_empty()
    }


    pub fn keys( &self ) -> impl Iterator<Item = &str> {
        self.sessions.keys().map( String::as_str )
    }


    /// The channel decoder callbacks are delivered on.
    pub fn notices( &self ) -> NoticeSender {
        Arc::clone( &self.notices )
    }


    /// Callbacks for one bind. They hold only the key and generation.
    fn binding( &self, key: &str, generation: u64 ) -> Binding {
        let completed = Arc::clone( &self.notices );
        let completed_key = key.to_string();
        let prepared = Arc::clone( &self.notices );
        let prepared_key = key.to_string();

        Binding {
            on_completion: Box::new( move || {
                completed( DecoderNotice::Completed {
                    key: completed_key.clone(),
                    generation,
                });
            }),
            on_prepared: Box::new( move |result| {
                prepared( DecoderNotice::Prepared {
                    key: prepared_key,
                    generation,
                    result,
                });
            }),
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::handle::DecoderState;
    use crate::locator::Locator;
    use crate::testing::{ notice_channel, MockBackend };
    use std::path::PathBuf;


    fn file( name: &str ) -> Resolved {
        Resolved {
            locator: Locator::File { path: PathBuf::from( format!( "/files/{}", name ) ) },
            source: SourceDescriptor::LocalFile { name: name.into(), kind: String::new() },
        }
    }


    fn url( url: &str ) -> Resolved {
        Resolved {
            locator: Locator::Url { url: url.into() },
            source: SourceDescriptor::RemoteUrl { url: url.into() },
        }
    }


    #[test]
    fn test_remount_reuses_single_handle() {
        let backend = MockBackend::new();
        let ( notices, _rx ) = notice_channel();
        let mut registry = SessionRegistry::new( Box::new( backend.clone() ), notices );

        registry.mount( "a", file( "one" ) ).unwrap();
        registry.mount( "a", file( "two" ) ).unwrap();

        assert_eq!( backend.created(), 1 );
        assert_eq!( registry.len(), 1 );
        let probe = backend.probe( 0 );
        let probe = probe.lock();
        assert_eq!( probe.resets, 1 );
        assert_eq!( probe.source, Some( Locator::File { path: PathBuf::from( "/files/two" ) } ) );
    }


    #[test]
    fn test_failed_rebind_keeps_unprepared_session() {
        let backend = MockBackend::new();
        backend.fail_on( "broken" );
        let ( notices, _rx ) = notice_channel();
        let mut registry = SessionRegistry::new( Box::new( backend.clone() ), notices );

        registry.mount( "a", file( "good" ) ).unwrap();
        let result = registry.mount( "a", file( "broken" ) );

        assert!( matches!( result, Err( SetupError::Decoder( _ ) ) ) );
        assert_eq!( registry.get( "a" ).unwrap().handle.state(), DecoderState::Error );
    }


    #[test]
    fn test_failed_first_mount_records_nothing() {
        let backend = MockBackend::new();
        backend.fail_on( "broken" );
        let ( notices, _rx ) = notice_channel();
        let mut registry = SessionRegistry::new( Box::new( backend.clone() ), notices );

        assert!( registry.mount( "a", file( "broken" ) ).is_err() );
        assert!( registry.is_empty() );
        assert_eq!( backend.probe( 0 ).lock().releases, 1 );
    }


    #[test]
    fn test_creation_failure_is_setup_error() {
        let backend = MockBackend::new();
        backend.refuse_create();
        let ( notices, _rx ) = notice_channel();
        let mut registry = SessionRegistry::new( Box::new( backend ), notices );

        let err = registry.mount( "a", file( "one" ) ).unwrap_err();
        assert_eq!( err.to_string(), "Failed to initialize decoder for URI: file:///files/one" );
    }


    #[test]
    fn test_release_then_mount_creates_fresh_handle() {
        let backend = MockBackend::new();
        let ( notices, _rx ) = notice_channel();
        let mut registry = SessionRegistry::new( Box::new( backend.clone() ), notices );

        registry.mount( "a", file( "one" ) ).unwrap();
        assert!( registry.release( "a" ) );
        assert!( !registry.release( "a" ) );
        registry.mount( "a", file( "one" ) ).unwrap();

        assert_eq!( backend.created(), 2 );
        assert_eq!( backend.probe( 0 ).lock().releases, 1 );
        assert_eq!( backend.probe( 1 ).lock().releases, 0 );
    }


    #[test]
    fn test_release_all_releases_each_once() {
        let backend = MockBackend::new();
        let ( notices, _rx ) = notice_channel();
        let mut registry = SessionRegistry::new( Box::new( backend.clone() ), notices );

        for key in [ "a", "b", "c" ] {
            registry.mount( key, file( key ) ).unwrap();
        }
        registry.release_all();
        registry.release_all();

        assert!( registry.is_empty() );
        for index in 0..3 {
            let probe = backend.probe( index );
            let probe = probe.lock();
            assert_eq!( ( probe.stops, probe.releases ), ( 1, 1 ) );
        }
    }


    #[test]
    fn test_repeat_counts_down() {
        let mut repeat = Repeat::from_count( 2 );
        assert!( repeat.next_pass() );
        assert_eq!( repeat, Repeat::Times( 1 ) );
        assert!( repeat.next_pass() );
        assert!( !repeat.next_pass() );
        assert_eq!( repeat, Repeat::Off );

        assert_eq!( Repeat::from_count( 0 ), Repeat::Off );
        let mut forever = Repeat::from_count( -1 );
        assert!( forever.next_pass() && forever.next_pass() );
        assert_eq!( forever, Repeat::Forever );
    }


    #[test]
    fn test_stale_generation_is_rejected() {
        let backend = MockBackend::new();
        let ( notices, mut rx ) = notice_channel();
        let mut registry = SessionRegistry::new( Box::new( backend.clone() ), notices );

        registry.mount( "a", url( "https://example.com/one.mp3" ) ).unwrap();
        let first = registry.get( "a" ).unwrap().generation();
        registry.mount( "a", url( "https://example.com/two.mp3" ) ).unwrap();

        backend.finish_prepare( 0, Ok(()) );
        let notice = rx.try_recv().unwrap();
        match notice {
            DecoderNotice::Prepared { ref key, generation, .. } => {
                assert_eq!( key, "a" );
                assert_eq!( generation, first + 1 );
                assert!( registry.accept_mut( key, generation ).is_some() );
                assert!( registry.accept_mut( key, first ).is_none() );
            }
            other => panic!( "unexpected notice {:?}", other ),
        }
    }
}
