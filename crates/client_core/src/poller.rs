//! Interval-driven refresh in place of a push channel.
//!
//! Every polling timer lives in a [`PollRegistry`] under a [`PollKey`].
//! Starting a key that is already running replaces its timer, so one
//! conversation never has two live timers no matter how often its screen is
//! opened and closed.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use async_trait::async_trait;
use shared::domain::{ConversationId, UserId};
use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// First load of a screen; a loading indicator is shown and failures are
    /// reported to the caller.
    Blocking,
    /// Background tick; failures are logged and otherwise swallowed.
    Silent,
}

#[async_trait]
pub trait PollTarget: Send + Sync + 'static {
    async fn refresh(&self, mode: RefreshMode) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PollKey {
    Conversation(ConversationId),
    ConversationList(UserId),
}

/// Identifies one particular timer started under a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTicket {
    pub key: PollKey,
    generation: u64,
}

struct Timer {
    generation: u64,
    task: JoinHandle<()>,
}

#[derive(Default)]
pub struct PollRegistry {
    timers: Mutex<HashMap<PollKey, Timer>>,
    next_generation: AtomicU64,
}

impl PollRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn timers(&self) -> MutexGuard<'_, HashMap<PollKey, Timer>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts silent refreshes of `target` every `period`, first tick one
    /// period from now. Any timer already registered under `key` is aborted.
    pub fn start(&self, key: PollKey, period: Duration, target: Arc<dyn PollTarget>) -> PollTicket {
        let task_key = key.clone();
        let first_tick = Instant::now() + period;
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(first_tick, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = target.refresh(RefreshMode::Silent).await {
                    warn!(key = ?task_key, error = %err, "poll: silent refresh failed");
                }
            }
        });

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        if let Some(previous) = self
            .timers()
            .insert(key.clone(), Timer { generation, task })
        {
            debug!(key = ?key, "poll: replacing existing timer");
            previous.task.abort();
        }
        info!(key = ?key, period_ms = period.as_millis() as u64, "poll: timer started");
        PollTicket { key, generation }
    }

    /// Stops the timer `ticket` refers to, unless it was already replaced by
    /// a newer one. Idempotent; returns whether a timer was stopped.
    pub fn release(&self, ticket: &PollTicket) -> bool {
        let mut timers = self.timers();
        let current = timers
            .get(&ticket.key)
            .is_some_and(|timer| timer.generation == ticket.generation);
        if !current {
            return false;
        }
        if let Some(timer) = timers.remove(&ticket.key) {
            timer.task.abort();
            info!(key = ?ticket.key, "poll: timer stopped");
        }
        true
    }

    /// Idempotent; returns whether a timer was running.
    pub fn stop(&self, key: &PollKey) -> bool {
        match self.timers().remove(key) {
            Some(timer) => {
                timer.task.abort();
                info!(key = ?key, "poll: timer stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, key: &PollKey) -> bool {
        self.timers()
            .get(key)
            .is_some_and(|timer| !timer.task.is_finished())
    }

    pub fn active_count(&self) -> usize {
        self.timers()
            .values()
            .filter(|timer| !timer.task.is_finished())
            .count()
    }

    pub fn stop_all(&self) {
        for (_, timer) in self.timers().drain() {
            timer.task.abort();
        }
    }
}

impl Drop for PollRegistry {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
#[path = "tests/poller_tests.rs"]
mod tests;
