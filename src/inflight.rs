//! Collapsing concurrent work for the same key into one execution.
//!
//! The first caller for a key becomes the leader and runs the work; callers
//! arriving while it runs wait on the same cell and receive a clone of the
//! leader's result. Once a flight finishes, or its leader is dropped, the
//! entry is removed, so a later request for the key starts fresh and
//! abandoned keys never pile up.
//!
//! The map lock is only held to look up or remove an entry, never across an
//! `await`.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Whether a caller ran the work or reused another caller's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Leader,
    Follower,
}

#[derive(Debug)]
pub struct InFlight<T> {
    calls: Mutex<HashMap<String, Arc<OnceCell<T>>>>,
}

impl<T> Default for InFlight<T> {
    fn default() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Clone> InFlight<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drive `work` for `key` unless a flight for it is already running, in
    /// which case drop `work` unpolled, wait for that flight and share its
    /// result.
    ///
    /// If the leader is cancelled before finishing, one of the callers
    /// already waiting takes over and drives its own `work`; callers arriving
    /// after that start a new flight.
    pub async fn run<F>(&self, key: &str, work: F) -> (T, Role)
    where
        F: Future<Output = T>,
    {
        let cell = Arc::clone(self.calls.lock().entry(key.to_string()).or_default());
        let _guard = FlightGuard {
            flights: self,
            key,
            cell: &cell,
        };

        let mut role = Role::Follower;
        let value = cell
            .get_or_init(|| {
                role = Role::Leader;
                work
            })
            .await
            .clone();
        (value, role)
    }

    /// Number of keys with a flight in progress.
    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> InFlight<T> {
    /// Drop the entry for `key` if it is still this flight's cell. A newer
    /// flight under the same key is left alone.
    fn finish(&self, key: &str, cell: &Arc<OnceCell<T>>) {
        let mut calls = self.calls.lock();
        if calls.get(key).is_some_and(|c| Arc::ptr_eq(c, cell)) {
            calls.remove(key);
        }
    }
}

/// Removes the flight's entry when the caller finishes or is dropped.
struct FlightGuard<'a, T> {
    flights: &'a InFlight<T>,
    key: &'a str,
    cell: &'a Arc<OnceCell<T>>,
}

impl<T> Drop for FlightGuard<'_, T> {
    fn drop(&mut self) {
        self.flights.finish(self.key, self.cell);
    }
}
