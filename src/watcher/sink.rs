//! Hand-off queue between the watch loop and its consumers.

use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::event::GameLogEvent;

/// Default upper bound for one drain.
pub const DEFAULT_DRAIN_LIMIT: usize = 1000;

#[derive(Debug)]
struct Inner {
    /// Durable backlog for the storage writer.
    pending: VecDeque<GameLogEvent>,
    /// Live feed for the notification consumer; `None` when nobody reads it.
    live: Option<VecDeque<GameLogEvent>>,
    /// True while the first tick after activation or reset is replaying
    /// history; pushes then go to the backlog only.
    replaying: bool,
}

impl Inner {
    fn push(&mut self, event: GameLogEvent) {
        if !self.replaying {
            if let Some(live) = &mut self.live {
                live.push_back(event.clone());
            }
        }
        self.pending.push_back(event);
    }
}

/// FIFO of classified events, shared between the watch loop (producer) and
/// any number of consumer handles.
///
/// Pushing never waits on a consumer for longer than a queue append. The
/// live feed only exists on sinks built with [`EventSink::with_live_feed`].
#[derive(Debug, Clone)]
pub struct EventSink {
    inner: Arc<RwLock<Inner>>,
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink {
    /// A sink with a backlog only.
    #[must_use]
    pub fn new() -> Self {
        Self::build(None)
    }

    /// A sink that also keeps a live feed for [`drain_live`](Self::drain_live).
    /// The feed grows until drained, so its consumer must keep up.
    #[must_use]
    pub fn with_live_feed() -> Self {
        Self::build(Some(VecDeque::new()))
    }

    fn build(live: Option<VecDeque<GameLogEvent>>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                pending: VecDeque::new(),
                live,
                replaying: true,
            })),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an event to the backlog, and to the live feed unless replaying.
    pub fn push(&self, event: GameLogEvent) {
        self.write().push(event);
    }

    /// Append events in order under one lock acquisition.
    pub fn extend(&self, events: impl IntoIterator<Item = GameLogEvent>) {
        let mut inner = self.write();
        for event in events {
            inner.push(event);
        }
    }

    /// Remove and return up to `max` backlog events, oldest first.
    pub fn drain(&self, max: usize) -> Vec<GameLogEvent> {
        let mut inner = self.write();
        let n = max.min(inner.pending.len());
        inner.pending.drain(..n).collect()
    }

    /// Put events taken by [`drain`](Self::drain) back at the front of the
    /// backlog, keeping their order. Used when a consumer fails to handle a
    /// batch.
    pub fn requeue(&self, events: Vec<GameLogEvent>) {
        let mut inner = self.write();
        for event in events.into_iter().rev() {
            inner.pending.push_front(event);
        }
    }

    /// Remove and return up to `max` live-feed events, oldest first.
    /// Always empty on a sink without a live feed.
    pub fn drain_live(&self, max: usize) -> Vec<GameLogEvent> {
        let mut inner = self.write();
        let Some(live) = &mut inner.live else {
            return Vec::new();
        };
        let n = max.min(live.len());
        live.drain(..n).collect()
    }

    #[must_use]
    pub fn has_live_feed(&self) -> bool {
        self.read().live.is_some()
    }

    /// Number of events waiting in the live feed.
    #[must_use]
    pub fn live_len(&self) -> usize {
        self.read().live.as_ref().map_or(0, VecDeque::len)
    }

    /// Snapshot of the backlog without removing anything.
    #[must_use]
    pub fn peek_all(&self) -> Vec<GameLogEvent> {
        self.read().pending.iter().cloned().collect()
    }

    /// Number of backlog events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// End the replay phase: the backlog so far is copied to the live feed
    /// once and later pushes go to both. No-op outside a replay.
    pub fn finish_replay(&self) {
        let mut inner = self.write();
        if !inner.replaying {
            return;
        }
        inner.replaying = false;
        let Inner { pending, live, .. } = &mut *inner;
        if let Some(live) = live {
            live.extend(pending.iter().cloned());
        }
    }

    /// Whether the first tick after activation or reset is still pending.
    #[must_use]
    pub fn is_replaying(&self) -> bool {
        self.read().replaying
    }

    /// Drop every queued event and start a new replay phase.
    pub fn clear(&self) {
        let mut inner = self.write();
        inner.pending.clear();
        if let Some(live) = &mut inner.live {
            live.clear();
        }
        inner.replaying = true;
    }
}
