//! Per-key coalescing of concurrent work.
//!
//! The first caller for a key becomes the leader and runs the producer.
//! Callers arriving while the leader is running wait on the flight and
//! receive a clone of the leader's outcome, error or not. Nothing is stored
//! once the flight lands; storage is the caller's business.
//!
//! If a leader's future is dropped before it finishes, the flight is marked
//! abandoned and the waiters race to become the next leader.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

/// How a caller took part in a flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Ran the producer.
    Leader,
    /// Waited for another caller's producer.
    Follower,
}

/// Outcome recorded before waiters are woken.
enum Outcome<V, E> {
    Done(Result<V, E>),
    Abandoned,
}

/// State shared between a leader and its followers.
struct Flight<V, E> {
    notify: Notify,
    outcome: Mutex<Option<Outcome<V, E>>>,
}

impl<V: Clone, E: Clone> Flight<V, E> {
    fn new() -> Self {
        Self {
            notify: Notify::new(),
            outcome: Mutex::new(None),
        }
    }

    fn outcome(&self) -> MutexGuard<'_, Option<Outcome<V, E>>> {
        self.outcome.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `None` while running, `Some(None)` if abandoned.
    fn landed(&self) -> Option<Option<Result<V, E>>> {
        match &*self.outcome() {
            None => None,
            Some(Outcome::Done(result)) => Some(Some(result.clone())),
            Some(Outcome::Abandoned) => Some(None),
        }
    }
}

enum Join<V, E> {
    Leader(Arc<Flight<V, E>>),
    Follower(Arc<Flight<V, E>>),
}

/// Table of in-flight producers keyed by `K`.
pub struct SingleFlight<K, V, E> {
    in_flight: Mutex<HashMap<K, Arc<Flight<V, E>>>>,
}

impl<K, V, E> Default for SingleFlight<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, E> SingleFlight<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Number of keys currently being produced.
    pub fn in_flight(&self) -> usize {
        self.table().len()
    }

    /// Run `producer` for `key` unless a flight for `key` is already running,
    /// in which case wait for it and share its outcome.
    pub async fn run<F, Fut>(&self, key: K, producer: F) -> (Result<V, E>, Role)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let flight = loop {
            let follower = match self.join(&key) {
                Join::Leader(flight) => break flight,
                Join::Follower(flight) => flight,
            };

            let notified = follower.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            // The outcome is recorded before waiters are notified, so either
            // it is visible here or the notification is still ahead of us.
            if follower.landed().is_none() {
                notified.await;
            }

            match follower.landed() {
                Some(Some(result)) => return (result, Role::Follower),
                // Leader dropped; try to take over.
                _ => continue,
            }
        };

        let guard = LeaderGuard {
            gate: self,
            key: &key,
            flight: &flight,
        };
        let result = producer().await;
        *flight.outcome() = Some(Outcome::Done(result.clone()));
        drop(guard);

        (result, Role::Leader)
    }

    fn join(&self, key: &K) -> Join<V, E> {
        let mut in_flight = self.table();
        if let Some(flight) = in_flight.get(key) {
            return Join::Follower(flight.clone());
        }
        let flight = Arc::new(Flight::new());
        in_flight.insert(key.clone(), flight.clone());
        Join::Leader(flight)
    }

    fn table(&self) -> MutexGuard<'_, HashMap<K, Arc<Flight<V, E>>>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Lands the flight when the leader finishes or is dropped.
struct LeaderGuard<'a, K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    gate: &'a SingleFlight<K, V, E>,
    key: &'a K,
    flight: &'a Arc<Flight<V, E>>,
}

impl<K, V, E> Drop for LeaderGuard<'_, K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    fn drop(&mut self) {
        {
            let mut outcome = self.flight.outcome();
            if outcome.is_none() {
                *outcome = Some(Outcome::Abandoned);
            }
        }
        {
            let mut in_flight = self.gate.table();
            if let Some(current) = in_flight.get(self.key) {
                if Arc::ptr_eq(current, self.flight) {
                    in_flight.remove(self.key);
                }
            }
        }
        self.flight.notify.notify_waiters();
    }
}
