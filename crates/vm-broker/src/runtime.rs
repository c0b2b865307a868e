//! Spawning background work
//!
//! The dispatcher and every operation runner run as detached tasks. They are
//! launched through [`Spawner`] so the broker can be embedded in any
//! executor; [`SmolSpawner`] is the default.

use futures::StreamExt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Boxed future accepted by a [`Spawner`]
pub type BoxedTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A spawner that can run futures in the background
pub trait Spawner: Send + Sync {
    /// Spawn a future and detach it
    ///
    /// The future runs to completion in the background.
    fn spawn(&self, future: BoxedTask);
}

/// Spawner for the smol runtime
#[derive(Debug, Clone, Copy, Default)]
pub struct SmolSpawner;

impl Spawner for SmolSpawner {
    fn spawn(&self, future: BoxedTask) {
        smol::spawn(future).detach();
    }
}

/// Sleep for the given duration
pub(crate) async fn sleep(duration: Duration) {
    smol::Timer::after(duration).await;
}

/// Periodic tick that never fires when disabled
pub(crate) struct Ticker {
    timer: Option<smol::Timer>,
}

impl Ticker {
    pub fn every(interval: Duration) -> Self {
        Self {
            timer: Some(smol::Timer::interval(interval)),
        }
    }

    pub fn disabled() -> Self {
        Self { timer: None }
    }

    pub async fn tick(&mut self) {
        match &mut self.timer {
            Some(timer) => {
                timer.next().await;
            }
            None => futures::future::pending::<()>().await,
        }
    }
}
