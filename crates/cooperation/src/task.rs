//! The shared, per-key unit of in-flight work.
//!
//! A [`CooperatingTask`] is created as a *candidate* by every `cooperate` call.
//! The candidate that wins registration in the [`crate::registry::LocalRegistry`]
//! becomes the task followers join; losing candidates are dropped.
//!
//! The terminal result travels through a `tokio::sync::watch` channel:
//!
//! - the leader owns the only [`OutcomePublisher`] (the sending half) and
//!   publishes exactly once;
//! - the task keeps a receiver that every follower clones.
//!
//! The publisher is deliberately *not* stored in the task. If the leader is
//! dropped or panics before publishing, the sender goes away and waiting
//! followers observe [`Published::Abandoned`] instead of blocking forever.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::CooperationKey;

type Slot<T, E> = Option<Result<T, E>>;

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// In-flight work for one key, shared by its leader and followers.
#[derive(Debug)]
pub struct CooperatingTask<T, E> {
    key: CooperationKey,
    participant_limit: Option<usize>,
    participants: AtomicUsize,
    outcome: watch::Receiver<Slot<T, E>>,
}

impl<T, E> CooperatingTask<T, E> {
    /// Creates a candidate task with one participant (its would-be leader)
    /// together with the publisher the leader uses to complete it.
    pub fn candidate(
        key: CooperationKey,
        participant_limit: Option<usize>,
    ) -> (Arc<Self>, OutcomePublisher<T, E>) {
        let (tx, rx) = watch::channel(None);
        let task = Arc::new(Self {
            key,
            participant_limit,
            participants: AtomicUsize::new(1),
            outcome: rx,
        });
        (task, OutcomePublisher { tx })
    }

    /// The key this task serves.
    pub fn key(&self) -> &CooperationKey {
        &self.key
    }

    /// Current number of participants, leader included.
    pub fn participants(&self) -> usize {
        self.participants.load(Ordering::Acquire)
    }

    /// Participant cap inherited from the owning point's config.
    pub fn participant_limit(&self) -> Option<usize> {
        self.participant_limit
    }

    /// Adds a follower unless that would exceed the participant limit.
    pub(crate) fn try_join(self: &Arc<Self>) -> Option<Participant<T, E>> {
        let limit = self.participant_limit;
        self.participants
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| match limit {
                Some(max) if current >= max => None,
                _ => Some(current + 1),
            })
            .ok()?;
        Some(Participant {
            task: Arc::clone(self),
        })
    }
}

impl<T, E> CooperatingTask<T, E>
where
    T: Clone,
    E: Clone,
{
    /// Waits for the leader's outcome.
    ///
    /// Cancel-safe: dropping the returned future only stops this wait.
    pub(crate) async fn published(&self) -> Published<T, E> {
        let mut rx = self.outcome.clone();
        // A closed channel still holds whatever was published before the close.
        let _ = rx.wait_for(Option::is_some).await;
        let slot = rx.borrow().clone();
        match slot {
            Some(outcome) => Published::Complete(outcome),
            None => Published::Abandoned,
        }
    }

    /// Like [`Self::published`] but gives up after `wait`.
    pub(crate) async fn published_within(&self, wait: Option<Duration>) -> Option<Published<T, E>> {
        match wait {
            Some(wait) => tokio::time::timeout(wait, self.published()).await.ok(),
            None => Some(self.published().await),
        }
    }
}

/// What a follower observed while waiting on a task.
#[derive(Debug)]
pub(crate) enum Published<T, E> {
    /// The leader finished; every follower sees the same outcome.
    Complete(Result<T, E>),
    /// The leader went away (dropped or panicked) without publishing.
    Abandoned,
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

/// Sending half of a task's outcome channel, owned by the leader.
#[derive(Debug)]
pub struct OutcomePublisher<T, E> {
    tx: watch::Sender<Slot<T, E>>,
}

impl<T, E> OutcomePublisher<T, E> {
    /// Publishes the terminal outcome and wakes every waiting follower.
    ///
    /// Consumes the publisher, so a task completes at most once.
    pub fn publish(self, outcome: Result<T, E>) {
        self.tx.send_replace(Some(outcome));
    }
}

// ---------------------------------------------------------------------------
// Participant slot
// ---------------------------------------------------------------------------

/// A follower's claim on a task's participant slot, released on drop.
#[derive(Debug)]
pub(crate) struct Participant<T, E> {
    task: Arc<CooperatingTask<T, E>>,
}

impl<T, E> Participant<T, E> {
    pub(crate) fn task(&self) -> &Arc<CooperatingTask<T, E>> {
        &self.task
    }
}

impl<T, E> Drop for Participant<T, E> {
    fn drop(&mut self) {
        self.task.participants.fetch_sub(1, Ordering::AcqRel);
    }
}
