//! In-process registry of active cooperating tasks.
//!
//! One registry per [`crate::CooperationPoint`]. Tasks are keyed by the key's
//! fingerprint; insert-if-absent on the map is what elects a single leader per
//! key per process.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::task::{CooperatingTask, Participant};

/// Result of offering a candidate task to the registry.
#[derive(Debug)]
pub(crate) enum Registration<T, E> {
    /// The candidate was inserted; the caller leads.
    Leader(Arc<CooperatingTask<T, E>>),
    /// Another task was already registered; the caller joined it.
    Follower(Participant<T, E>),
    /// Another task was registered but already at its participant limit.
    Full {
        /// The saturated task's limit.
        limit: usize,
    },
}

/// Map from key fingerprint to the task currently in flight for that key.
#[derive(Debug)]
pub struct LocalRegistry<T, E> {
    tasks: DashMap<String, Arc<CooperatingTask<T, E>>>,
}

impl<T, E> Default for LocalRegistry<T, E> {
    fn default() -> Self {
        Self {
            tasks: DashMap::new(),
        }
    }
}

impl<T, E> LocalRegistry<T, E> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `candidate` unless a task for the same fingerprint exists, in
    /// which case the caller joins the existing task.
    ///
    /// Insert and join happen under the same shard lock, so a join can never
    /// race with the entry being replaced.
    pub(crate) fn register(&self, candidate: Arc<CooperatingTask<T, E>>) -> Registration<T, E> {
        match self.tasks.entry(candidate.key().fingerprint().to_owned()) {
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::clone(&candidate));
                Registration::Leader(candidate)
            }
            Entry::Occupied(occupied) => {
                let existing = occupied.get();
                match existing.try_join() {
                    Some(participant) => Registration::Follower(participant),
                    None => Registration::Full {
                        limit: existing.participant_limit().unwrap_or_default(),
                    },
                }
            }
        }
    }

    /// Removes `task` if it is still the registered task for its key.
    ///
    /// Returns `false` if the entry is absent or belongs to a newer task.
    pub fn deregister(&self, task: &Arc<CooperatingTask<T, E>>) -> bool {
        self.tasks
            .remove_if(task.key().fingerprint(), |_, current| Arc::ptr_eq(current, task))
            .is_some()
    }

    /// Number of keys with a task in flight.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns `true` if nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Participant count per active key, keyed by the key's label.
    pub fn participants_per_key(&self) -> HashMap<String, usize> {
        self.tasks
            .iter()
            .map(|entry| (entry.value().key().label().to_owned(), entry.value().participants()))
            .collect()
    }
}
