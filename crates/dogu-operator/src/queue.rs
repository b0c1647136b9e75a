// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Delaying, deduplicating work queue.
//!
//! Each key is scheduled at most once; adding a key that is already waiting
//! keeps the earlier deadline. A key handed out by [`WorkQueue::pop_ready`]
//! stays in flight until [`WorkQueue::done`], so two passes over the same
//! object never run at once. Adds that arrive meanwhile are parked and
//! rescheduled when the key is done.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use dogu_core::ObjectKey;

use crate::config::MAX_INTERVAL;

#[derive(Default)]
struct State {
    scheduled: HashMap<ObjectKey, Instant>,
    in_flight: HashSet<ObjectKey>,
    parked: HashMap<ObjectKey, Instant>,
}

fn schedule(map: &mut HashMap<ObjectKey, Instant>, key: ObjectKey, at: Instant) {
    map.entry(key)
        .and_modify(|current| *current = (*current).min(at))
        .or_insert(at);
}

/// Work queue keyed by object.
#[derive(Default)]
pub struct WorkQueue {
    state: Mutex<State>,
}

impl WorkQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    // Never held across an await; a poisoned lock still holds a usable map.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Schedule `key` after `delay`, capped at [`MAX_INTERVAL`].
    pub fn add(&self, key: ObjectKey, delay: Duration) {
        let at = Instant::now() + delay.min(MAX_INTERVAL);
        let mut state = self.lock();
        if state.in_flight.contains(&key) {
            schedule(&mut state.parked, key, at);
        } else {
            schedule(&mut state.scheduled, key, at);
        }
    }

    /// Take the most overdue key, marking it in flight.
    pub fn pop_ready(&self) -> Option<ObjectKey> {
        let now = Instant::now();
        let mut state = self.lock();
        let key = state
            .scheduled
            .iter()
            .filter(|(_, at)| **at <= now)
            .min_by_key(|(_, at)| **at)
            .map(|(key, _)| key.clone())?;
        state.scheduled.remove(&key);
        state.in_flight.insert(key.clone());
        Some(key)
    }

    /// Release a key handed out by [`pop_ready`](Self::pop_ready).
    pub fn done(&self, key: &ObjectKey) {
        let mut state = self.lock();
        state.in_flight.remove(key);
        if let Some(at) = state.parked.remove(key) {
            schedule(&mut state.scheduled, key.clone(), at);
        }
    }

    /// Earliest deadline among waiting keys.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.lock().scheduled.values().min().copied()
    }

    /// Whether `key` is being processed.
    pub fn is_in_flight(&self, key: &ObjectKey) -> bool {
        self.lock().in_flight.contains(key)
    }

    /// Number of waiting keys.
    pub fn len(&self) -> usize {
        self.lock().scheduled.len()
    }

    /// Whether no key is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new("Dogu", "ecosystem", name)
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_wait_for_their_delay() {
        let queue = WorkQueue::new();
        queue.add(key("ldap"), Duration::from_secs(5));

        assert_eq!(queue.pop_ready(), None);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(queue.pop_ready(), Some(key("ldap")));
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_delay_is_capped() {
        let queue = WorkQueue::new();
        queue.add(key("ldap"), Duration::MAX);

        assert_eq!(queue.next_deadline(), Some(Instant::now() + MAX_INTERVAL));
        assert_eq!(queue.pop_ready(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_earliest_deadline_wins() {
        let queue = WorkQueue::new();
        queue.add(key("ldap"), Duration::from_secs(60));
        queue.add(key("ldap"), Duration::from_secs(1));
        queue.add(key("ldap"), Duration::from_secs(30));

        assert_eq!(queue.len(), 1);
        assert_eq!(
            queue.next_deadline(),
            Some(Instant::now() + Duration::from_secs(1))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_most_overdue_key_first() {
        let queue = WorkQueue::new();
        queue.add(key("cas"), Duration::from_secs(2));
        queue.add(key("ldap"), Duration::from_secs(1));
        tokio::time::advance(Duration::from_secs(3)).await;

        assert_eq!(queue.pop_ready(), Some(key("ldap")));
        assert_eq!(queue.pop_ready(), Some(key("cas")));
        assert_eq!(queue.pop_ready(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_adds_while_in_flight_are_parked() {
        let queue = WorkQueue::new();
        queue.add(key("ldap"), Duration::ZERO);
        let taken = queue.pop_ready().unwrap();
        assert!(queue.is_in_flight(&taken));

        queue.add(key("ldap"), Duration::ZERO);
        assert_eq!(queue.pop_ready(), None);

        queue.done(&taken);
        assert!(!queue.is_in_flight(&taken));
        assert_eq!(queue.pop_ready(), Some(key("ldap")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_done_without_parked_add_forgets_key() {
        let queue = WorkQueue::new();
        queue.add(key("ldap"), Duration::ZERO);
        let taken = queue.pop_ready().unwrap();
        queue.done(&taken);

        assert!(queue.is_empty());
        assert_eq!(queue.next_deadline(), None);
    }
}
