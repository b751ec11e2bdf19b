//! Platform decoder capability surface
//!
//! A `MediaDecoder` is the per-session player primitive the registry drives.
//! Backends create them on demand; the registry never inspects what sits
//! behind the trait.

use thiserror::Error;

use crate::handle::DecoderState;
use crate::locator::Locator;


/// Invoked from the decoder's own thread when playback reaches the end of media.
pub type CompletionCallback = Box<dyn FnMut() + Send>;

/// Invoked from an unspecified thread once an asynchronous prepare settles.
pub type PreparedCallback = Box<dyn FnOnce( Result<(), DecoderError> ) + Send>;


/// Errors reported by a decoder or by the state machine wrapping it.
#[derive( Debug, Error )]
pub enum DecoderError {
    #[error( "Unable to set data source {locator}: {reason}" )]
    DataSource { locator: String, reason: String },

    #[error( "Prepare failed: {0}" )]
    Prepare( String ),

    #[error( "Playback error: {0}" )]
    Playback( String ),

    #[error( "Cannot {operation} while decoder is {state:?}" )]
    InvalidState { operation: &'static str, state: DecoderState },
}


/// The operations a platform decoder must provide.
///
/// Implementations are owned and driven by a single thread. Only the
/// callbacks handed to `set_on_completion` and `prepare_async` may fire
/// from elsewhere.
pub trait MediaDecoder {
    /// Binds the decoder to a locator. Does not touch the media yet.
    fn set_data_source( &mut self, locator: &Locator ) -> Result<(), DecoderError>;

    /// Prepares the bound media, blocking until ready or failed.
    fn prepare( &mut self ) -> Result<(), DecoderError>;

    /// Prepares the bound media in the background and reports through `on_prepared`.
    fn prepare_async( &mut self, on_prepared: PreparedCallback );

    fn start( &mut self ) -> Result<(), DecoderError>;

    fn pause( &mut self ) -> Result<(), DecoderError>;

    fn stop( &mut self ) -> Result<(), DecoderError>;

    /// Moves the playback head. Positions past the end are decoder-defined.
    fn seek_to( &mut self, position_ms: u64 ) -> Result<(), DecoderError>;

    fn set_volume( &mut self, volume: f32 );

    /// Current playback position in milliseconds.
    fn current_position( &self ) -> u64;

    /// Media duration in milliseconds, when known.
    fn duration( &self ) -> Option<u64>;

    fn is_playing( &self ) -> bool;

    /// Replaces the end-of-media callback.
    fn set_on_completion( &mut self, callback: CompletionCallback );

    /// Drops the current binding and returns to the idle state.
    fn reset( &mut self );

    /// Frees every resource held. The decoder is not used afterwards.
    fn release( &mut self );
}


/// Factory for platform decoders.
pub trait DecoderBackend: Send {
    /// Creates a fresh decoder, or `None` when the platform cannot provide one.
    fn create( &mut self ) -> Option<Box<dyn MediaDecoder>>;
}
