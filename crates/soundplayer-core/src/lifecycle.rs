//! Host lifecycle hook
//!
//! The host owns the process lifecycle. The core only registers a hook to be
//! run when the host tears down, at which point every session is released.

use parking_lot::Mutex;


/// Work to run when the host tears down.
pub type TeardownHook = Box<dyn FnOnce() + Send>;


/// Something that announces process teardown.
pub trait LifecycleSource {
    fn on_teardown( &self, hook: TeardownHook );
}


/// Lifecycle source driven explicitly by the host.
///
/// Each registered hook runs at most once, on the first `fire_teardown`.
#[derive( Default )]
pub struct HostLifecycle {
    hooks: Mutex<Vec<TeardownHook>>,
}


impl HostLifecycle {
    pub fn new() -> Self {
        Self::default()
    }


    /// Runs and forgets every registered hook.
    pub fn fire_teardown( &self ) {
        let hooks = std::mem::take( &mut *self.hooks.lock() );
        tracing::info!( "Host teardown: running {} hook(s)", hooks.len() );
        for hook in hooks {
            hook();
        }
    }
}


impl LifecycleSource for HostLifecycle {
    fn on_teardown( &self, hook: TeardownHook ) {
        self.hooks.lock().push( hook );
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{ AtomicUsize, Ordering };


    #[test]
    fn test_hooks_run_once() {
        let lifecycle = HostLifecycle::new();
        let runs = Arc::new( AtomicUsize::new( 0 ) );

        let counter = Arc::clone( &runs );
        lifecycle.on_teardown( Box::new( move || {
            counter.fetch_add( 1, Ordering::SeqCst );
        }));

        lifecycle.fire_teardown();
        lifecycle.fire_teardown();
        assert_eq!( runs.load( Ordering::SeqCst ), 1 );
    }


    #[test]
    fn test_teardown_without_hooks() {
        HostLifecycle::new().fire_teardown();
    }
}
