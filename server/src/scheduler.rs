//! Cancellable fixed-rate ticker driving one race per room.
//!
//! Cancellation uses an atomic generation counter: every `start` and
//! `cancel` bumps the generation, and the spawned loop re-checks the
//! generation it captured before applying each tick. A tick that was
//! already past the check finishes its (synchronous) critical section,
//! but no tick runs after the bump, even when a cancel races with a
//! scheduled wake.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

pub struct RaceTicker {
    generation: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl RaceTicker {
    pub fn new() -> Self {
        Self {
            generation: Arc::new(AtomicU64::new(0)),
            handle: None,
        }
    }

    /// Starts a repeating tick, cancelling any previous one first so
    /// at most one loop is live per ticker. The tick future resolves
    /// to `false` to stop the loop (natural completion).
    pub fn start<F, Fut>(&mut self, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.cancel();

        let generation = Arc::clone(&self.generation);
        let my_generation = generation.fetch_add(1, Ordering::SeqCst) + 1;

        self.handle = Some(tokio::spawn(async move {
            let mut interval_timer = interval(period);
            interval_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // Skip the first tick since it fires immediately
            interval_timer.tick().await;

            loop {
                interval_timer.tick().await;

                if generation.load(Ordering::SeqCst) != my_generation {
                    break;
                }
                if !tick().await {
                    break;
                }
            }
        }));
    }

    /// Invalidates the running loop. Idempotent; safe to call whether
    /// or not a loop is live.
    pub fn cancel(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Current generation, exposed for tick-vs-cancel race checks.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

impl Default for RaceTicker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RaceTicker {
    fn drop(&mut self) {
        self.cancel();
    }
}
