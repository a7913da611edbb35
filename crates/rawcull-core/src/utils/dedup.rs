//! Request deduplication for concurrent blocking operations.
//!
//! [`Dedup`] folds concurrent calls with the same key into a single execution.
//! The first caller (the leader) runs the operation; everyone arriving while it
//! is in flight blocks on a condvar and receives a clone of the leader's result.
//!
//! If the leader unwinds before producing a result, followers are woken and
//! one of them takes over as the new leader.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Condvar, Mutex};

enum Slot<V, E> {
    Pending,
    Done(Result<V, E>),
    Abandoned,
}

struct Waiter<V, E> {
    slot: Mutex<Slot<V, E>>,
    ready: Condvar,
}

/// Removes the in-flight entry when the leader finishes or unwinds.
struct LeaderGuard<'a, K: Hash + Eq, V, E> {
    dedup: &'a Dedup<K, V, E>,
    key: &'a K,
    waiter: Arc<Waiter<V, E>>,
}

impl<K: Hash + Eq, V, E> Drop for LeaderGuard<'_, K, V, E> {
    fn drop(&mut self) {
        {
            let mut slot = self.waiter.slot.lock().unwrap_or_else(|e| e.into_inner());
            if matches!(*slot, Slot::Pending) {
                *slot = Slot::Abandoned;
            }
        }
        self.waiter.ready.notify_all();
        self.dedup
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(self.key);
    }
}

pub struct Dedup<K, V, E> {
    in_flight: Mutex<HashMap<K, Arc<Waiter<V, E>>>>,
}

impl<K, V, E> Dedup<K, V, E>
where
    K: Hash + Eq + Clone,
    V: Clone,
    E: Clone,
{
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Run `f` unless a call with the same key is already running, in which
    /// case wait for it and return a clone of its result.
    pub fn call<F>(&self, key: K, f: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let mut f = Some(f);
        loop {
            let (waiter, is_leader) = {
                let mut map = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
                match map.get(&key) {
                    Some(waiter) => (Arc::clone(waiter), false),
                    None => {
                        let waiter = Arc::new(Waiter {
                            slot: Mutex::new(Slot::Pending),
                            ready: Condvar::new(),
                        });
                        map.insert(key.clone(), Arc::clone(&waiter));
                        (waiter, true)
                    }
                }
            };

            if is_leader {
                let guard = LeaderGuard {
                    dedup: self,
                    key: &key,
                    waiter: Arc::clone(&waiter),
                };
                // f 只会被领头者消费一次；跟随者永远不会走到这里
                let result = match f.take() {
                    Some(f) => f(),
                    None => unreachable!("leader runs at most once"),
                };
                *waiter.slot.lock().unwrap_or_else(|e| e.into_inner()) =
                    Slot::Done(result.clone());
                drop(guard);
                return result;
            }

            let mut slot = waiter.slot.lock().unwrap_or_else(|e| e.into_inner());
            while matches!(*slot, Slot::Pending) {
                slot = waiter.ready.wait(slot).unwrap_or_else(|e| e.into_inner());
            }
            if let Slot::Done(result) = &*slot {
                return result.clone();
            }
            // 领头者异常退出，重新竞争
        }
    }

    /// Returns the number of keys currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key)
    }
}

impl<K, V, E> Default for Dedup<K, V, E>
where
    K: Hash + Eq + Clone,
    V: Clone,
    E: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
