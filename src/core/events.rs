//! Change notifications published after job records are committed.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::job::{Job, JobSummary};

/// What happened to the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Inserted or modified.
    Update,
    /// Physically removed.
    Delete,
}

/// Notification delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Kind of change.
    pub kind: ChangeKind,
    /// Record state after the change.
    pub job: JobSummary,
    /// When the change was published.
    pub at: DateTime<Utc>,
}

/// Destination for change notifications.
pub trait ChangeSink: Send {
    /// Deliver one event. Must not block for long; the caller holds a lock.
    fn publish(&mut self, event: ChangeEvent);
}

/// Sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullChangeSink;

impl ChangeSink for NullChangeSink {
    fn publish(&mut self, _event: ChangeEvent) {}
}

/// Bounded in-memory sink; the oldest events are evicted first.
///
/// Clones share the same buffer, so a handle kept by the caller observes
/// events published through the engine.
#[derive(Debug, Clone)]
pub struct InMemoryChangeSink {
    events: Arc<Mutex<VecDeque<ChangeEvent>>>,
    max_events: usize,
}

impl InMemoryChangeSink {
    /// Sink keeping at most `max_events` events.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(max_events.min(1024)))),
            max_events,
        }
    }

    /// Snapshot of the buffered events, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<ChangeEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Remove and return the buffered events.
    #[must_use]
    pub fn drain(&self) -> Vec<ChangeEvent> {
        self.events.lock().drain(..).collect()
    }
}

impl ChangeSink for InMemoryChangeSink {
    fn publish(&mut self, event: ChangeEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Sink forwarding events over a channel to a subscriber thread.
#[derive(Debug, Clone)]
pub struct ChannelChangeSink {
    tx: Sender<ChangeEvent>,
}

impl ChannelChangeSink {
    /// Sink and the receiving end for subscribers.
    #[must_use]
    pub fn new() -> (Self, Receiver<ChangeEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx }, rx)
    }
}

impl ChangeSink for ChannelChangeSink {
    fn publish(&mut self, event: ChangeEvent) {
        // A gone subscriber is not an engine failure.
        if self.tx.send(event).is_err() {
            tracing::trace!("change subscriber disconnected");
        }
    }
}

/// Shared handle used by every engine component to publish changes.
#[derive(Clone)]
pub struct ChangePublisher {
    sink: Arc<Mutex<Box<dyn ChangeSink>>>,
}

impl ChangePublisher {
    /// Publisher writing to `sink`.
    pub fn new(sink: impl ChangeSink + 'static) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Box::new(sink))),
        }
    }

    /// Publisher that discards events.
    #[must_use]
    pub fn null() -> Self {
        Self::new(NullChangeSink)
    }

    /// Announce that `job` was inserted or modified.
    pub fn updated(&self, job: &Job, at: DateTime<Utc>) {
        self.publish(ChangeKind::Update, job, at);
    }

    /// Announce that `job` was purged.
    pub fn deleted(&self, job: &Job, at: DateTime<Utc>) {
        self.publish(ChangeKind::Delete, job, at);
    }

    fn publish(&self, kind: ChangeKind, job: &Job, at: DateTime<Utc>) {
        self.sink.lock().publish(ChangeEvent {
            kind,
            job: job.summary(),
            at,
        });
    }
}

impl Default for ChangePublisher {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Debug for ChangePublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangePublisher").finish_non_exhaustive()
    }
}
