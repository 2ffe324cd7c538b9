//! Countdown timer registry.
//!
//! One task per live assignment, keyed by assignment ID. Timers are a latency
//! optimization: expiry is always re-checked against the wall clock, and
//! `sweep_expired` catches anything a lost timer missed.

use std::collections::HashMap;
use std::future::Future;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Owns the countdown task of every live assignment.
#[derive(Default)]
pub struct TimerRegistry {
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl TimerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `task` as the timer for `id`, aborting any previous one.
    pub async fn arm<F>(&self, id: impl Into<String>, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        let mut timers = self.timers.lock().await;
        timers.retain(|_, h| !h.is_finished());
        if let Some(previous) = timers.insert(id.into(), handle) {
            previous.abort();
        }
    }

    /// Stops the timer for `id`. Returns false if none was armed.
    pub async fn cancel(&self, id: &str) -> bool {
        match self.timers.lock().await.remove(id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Checks if a timer for `id` is still running.
    pub async fn is_armed(&self, id: &str) -> bool {
        self.timers
            .lock()
            .await
            .get(id)
            .is_some_and(|h| !h.is_finished())
    }

    /// Number of running timers.
    pub async fn armed_count(&self) -> usize {
        self.timers
            .lock()
            .await
            .values()
            .filter(|h| !h.is_finished())
            .count()
    }

    /// Stops every timer.
    pub async fn cancel_all(&self) {
        for (_, handle) in self.timers.lock().await.drain() {
            handle.abort();
        }
    }
}
