//! Device audio routing
//!
//! Routing is device-wide and independent of any session. The platform
//! exposes it as a mode plus a speakerphone toggle.


/// Audio mode of the device.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub enum AudioMode {
    #[default]
    Normal,
    InCommunication,
}


/// Platform audio routing service.
pub trait AudioRouter: Send {
    fn set_mode( &mut self, mode: AudioMode );

    fn set_speakerphone_on( &mut self, on: bool );
}


/// Router for platforms without a routing service. Remembers and logs
/// the requested route.
#[derive( Debug, Default )]
pub struct LoggingRouter {
    mode: AudioMode,
    speakerphone: bool,
}


impl LoggingRouter {
    pub fn new() -> Self {
        Self::default()
    }


    pub fn mode( &self ) -> AudioMode {
        self.mode
    }


    pub fn speakerphone_on( &self ) -> bool {
        self.speakerphone
    }
}


impl AudioRouter for LoggingRouter {
    fn set_mode( &mut self, mode: AudioMode ) {
        tracing::info!( "Audio mode: {:?}", mode );
        self.mode = mode;
    }


    fn set_speakerphone_on( &mut self, on: bool ) {
        tracing::info!( "Speakerphone: {}", if on { "on" } else { "off" } );
        self.speakerphone = on;
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_logging_router_remembers_route() {
        let mut router = LoggingRouter::new();
        assert_eq!( router.mode(), AudioMode::Normal );
        assert!( !router.speakerphone_on() );

        router.set_mode( AudioMode::InCommunication );
        router.set_speakerphone_on( true );
        assert_eq!( router.mode(), AudioMode::InCommunication );
        assert!( router.speakerphone_on() );
    }
}
