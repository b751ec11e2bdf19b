//! SoundPlayer Core - Keyed audio playback manager
//!
//! This crate manages named playback sessions on behalf of a host: it
//! resolves sounds to media locators, owns one decoder per session key,
//! drives transport control and reports lifecycle events back to the host.

pub mod command;
pub mod decoder;
pub mod engine;
pub mod event;
pub mod fetch;
pub mod handle;
pub mod lifecycle;
pub mod locator;
pub mod media;
pub mod output;
pub mod playback;
pub mod registry;
pub mod route;
pub mod service;

#[cfg( test )]
mod testing;

pub use command::{ Command, CommandError, DEFAULT_KEY };
pub use engine::{ Engine, PlayerOptions, SharedContext, TransportError };
pub use event::{ ChannelSink, Emitter, HostEvent, NotificationSink, PlayerEvent };
pub use handle::{ DecoderState, PlaybackInfo };
pub use lifecycle::{ HostLifecycle, LifecycleSource, TeardownHook };
pub use locator::{ DirectoryCatalog, Locator, ResourceCatalog, SourceDescriptor, SourceResolver };
pub use media::{ DecoderBackend, DecoderError, MediaDecoder };
pub use playback::SymphoniaBackend;
pub use registry::{ Repeat, SetupError };
pub use route::{ AudioMode, AudioRouter, LoggingRouter };
pub use service::{ ServiceError, SoundPlayer };
