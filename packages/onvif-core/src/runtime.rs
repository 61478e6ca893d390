//! Task spawning for fire-and-forget driver work.
//!
//! Discovery runs started by the debouncer or by the host's `discover`
//! callback are detached from the caller. The driver spawns them through
//! [`TaskSpawner`] so an embedding host can run them on its own runtime.

use std::future::Future;

/// Abstraction for spawning detached background tasks.
pub trait TaskSpawner: Send + Sync {
    /// Spawns a future that runs to completion independently of the caller.
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

/// Tokio-based spawner used by the standalone server and the tests.
#[derive(Clone)]
pub struct TokioSpawner {
    handle: tokio::runtime::Handle,
}

impl TokioSpawner {
    #[must_use]
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Uses the handle of the runtime the caller is on.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context.
    #[must_use]
    pub fn current() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }
}

impl TaskSpawner for TokioSpawner {
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }
}
