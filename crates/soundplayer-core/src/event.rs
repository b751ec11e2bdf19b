//! Notifications delivered to the host
//!
//! Events are fire-and-forget: no retry, no buffering. The host decides how
//! to dispatch them through its `NotificationSink`.

use std::sync::Arc;

use serde_json::{ json, Value };
use tokio::sync::mpsc;


pub const EVENT_SETUP_ERROR: &str = "OnSetupError";
pub const EVENT_FINISHED_PLAYING: &str = "FinishedPlaying";
pub const EVENT_FINISHED_LOADING: &str = "FinishedLoading";
pub const EVENT_FINISHED_LOADING_FILE: &str = "FinishedLoadingFile";
pub const EVENT_FINISHED_LOADING_URL: &str = "FinishedLoadingURL";


/// Lifecycle events emitted by the player.
#[derive( Debug, Clone, PartialEq )]
pub enum PlayerEvent {
    SetupError { error: String },
    FinishedPlaying { success: bool },
    FinishedLoading { success: bool },
    FinishedLoadingFile { success: bool, name: String, kind: String },
    FinishedLoadingUrl { success: bool, url: String },
}


impl PlayerEvent {
    /// Name the host knows this event by.
    pub fn name( &self ) -> &'static str {
        match self {
            PlayerEvent::SetupError { .. } => EVENT_SETUP_ERROR,
            PlayerEvent::FinishedPlaying { .. } => EVENT_FINISHED_PLAYING,
            PlayerEvent::FinishedLoading { .. } => EVENT_FINISHED_LOADING,
            PlayerEvent::FinishedLoadingFile { .. } => EVENT_FINISHED_LOADING_FILE,
            PlayerEvent::FinishedLoadingUrl { .. } => EVENT_FINISHED_LOADING_URL,
        }
    }


    /// Event payload as the host sees it.
    pub fn payload( &self ) -> Value {
        match self {
            PlayerEvent::SetupError { error } => json!({ "error": error }),
            PlayerEvent::FinishedPlaying { success } | PlayerEvent::FinishedLoading { success } => {
                json!({ "success": success })
            }
            PlayerEvent::FinishedLoadingFile { success, name, kind } => {
                json!({ "success": success, "name": name, "type": kind })
            }
            PlayerEvent::FinishedLoadingUrl { success, url } => {
                json!({ "success": success, "url": url })
            }
        }
    }
}


/// Host-side receiver of events.
pub trait NotificationSink: Send + Sync {
    fn emit( &self, name: &str, payload: Value );
}


/// Forwards typed events to a sink.
#[derive( Clone )]
pub struct Emitter {
    sink: Arc<dyn NotificationSink>,
}


impl Emitter {
    pub fn new( sink: Arc<dyn NotificationSink> ) -> Self {
        Self { sink }
    }


    pub fn emit( &self, event: PlayerEvent ) {
        tracing::debug!( "Emitting {}: {:?}", event.name(), event );
        self.sink.emit( event.name(), event.payload() );
    }
}


/// An event as handed to the host.
#[derive( Debug, Clone, PartialEq )]
pub struct HostEvent {
    pub name: String,
    pub payload: Value,
}


/// Sink that queues events on a channel for the host to drain.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<HostEvent>,
}


impl ChannelSink {
    pub fn new() -> ( Self, mpsc::UnboundedReceiver<HostEvent> ) {
        let ( tx, rx ) = mpsc::unbounded_channel();
        ( Self { tx }, rx )
    }
}


impl NotificationSink for ChannelSink {
    fn emit( &self, name: &str, payload: Value ) {
        let event = HostEvent { name: name.to_string(), payload };
        if self.tx.send( event ).is_err() {
            tracing::debug!( "Event receiver gone, dropping {}", name );
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_file_payload_uses_type_key() {
        let event = PlayerEvent::FinishedLoadingFile {
            success: true,
            name: "beep".into(),
            kind: "mp3".into(),
        };
        assert_eq!( event.name(), "FinishedLoadingFile" );
        assert_eq!( event.payload(), json!({ "success": true, "name": "beep", "type": "mp3" }) );
    }


    #[test]
    fn test_setup_error_payload() {
        let event = PlayerEvent::SetupError { error: "Prepare failed".into() };
        assert_eq!( event.name(), "OnSetupError" );
        assert_eq!( event.payload(), json!({ "error": "Prepare failed" }) );
    }


    #[test]
    fn test_channel_sink_delivers_in_order() {
        let ( sink, mut rx ) = ChannelSink::new();
        let emitter = Emitter::new( Arc::new( sink ) );

        emitter.emit( PlayerEvent::FinishedLoading { success: true } );
        emitter.emit( PlayerEvent::FinishedLoadingUrl { success: true, url: "https://a/b.mp3".into() } );

        assert_eq!( rx.try_recv().unwrap().name, "FinishedLoading" );
        let url = rx.try_recv().unwrap();
        assert_eq!( url.name, "FinishedLoadingURL" );
        assert_eq!( url.payload[ "url" ], "https://a/b.mp3" );
        assert!( rx.try_recv().is_err() );
    }


    #[test]
    fn test_channel_sink_survives_closed_receiver() {
        let ( sink, rx ) = ChannelSink::new();
        drop( rx );
        sink.emit( "FinishedPlaying", json!({ "success": true }) );
    }
}
