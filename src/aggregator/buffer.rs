//! Ordered buffer of events awaiting persistence

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::events::Event;

#[derive(Debug, Default)]
pub struct EventBuffer {
    events: VecDeque<Event>,
}

impl EventBuffer {
    /// Append in arrival order, returning the new length
    pub fn push(&mut self, event: Event) -> usize {
        self.events.push_back(event);
        self.events.len()
    }

    /// Swap the contents out for an empty buffer
    pub fn take_all(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events).into()
    }

    /// Put events back ahead of anything that arrived since they were taken
    pub fn requeue_front(&mut self, events: Vec<Event>) {
        for event in events.into_iter().rev() {
            self.events.push_front(event);
        }
    }

    /// Drop the oldest events until at most `cap` remain, returning how many were dropped
    pub fn enforce_cap(&mut self, cap: usize) -> usize {
        let excess = self.events.len().saturating_sub(cap);
        self.events.drain(..excess);
        excess
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }
}

/// Buffer shared between the aggregator and the flusher.
///
/// Critical sections never span an await point.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<EventBuffer>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, EventBuffer> {
        // Buffer operations cannot leave it half-updated, so a poisoned lock is still usable
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the buffered events, oldest first
    pub fn to_vec(&self) -> Vec<Event> {
        self.lock().iter().cloned().collect()
    }
}
