//! Cooperation points and the leader/follower protocol.
//!
//! A caller binds a work function with [`CooperationPoint::on`], optionally
//! adds a check function and fallback policy, then calls
//! [`Cooperation::cooperate`]. For each call:
//!
//! 1. The point derives a [`CooperationKey`] from its id, the action and the
//!    nested scope.
//! 2. A candidate [`CooperatingTask`] is offered to the point's registry.
//! 3. If the candidate is inserted, the caller is the **leader**: it runs the
//!    work function, publishes the outcome to every follower, and deregisters
//!    the task. Deregistration happens in a drop guard, so it also runs when
//!    the leader's future is dropped or its work panics.
//! 4. Otherwise the caller is a **follower** of the registered task. It waits
//!    for the leader's outcome, bounded by the major timeout. On timeout, or
//!    when the task is at its participant limit, it either fails or (with
//!    `perform_work_on_fail`) performs the work itself, consulting the check
//!    function first.
//!
//! A follower whose leader disappeared without publishing goes back to step 2
//! and may become the new leader.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::registry::{LocalRegistry, Registration};
use crate::task::{CooperatingTask, OutcomePublisher, Participant, Published};
use crate::{CooperationConfig, CooperationError, CooperationKey, InvalidArgument, PointId};

/// Boxed work function: produces the value this cooperation deduplicates.
pub type WorkFn<'a, T, E> = Box<dyn FnOnce() -> BoxFuture<'a, Result<T, E>> + Send + 'a>;

/// Boxed check function: `Some` means the work was already completed elsewhere.
pub type CheckFn<'a, T, E> = Box<dyn FnOnce() -> BoxFuture<'a, Result<Option<T>, E>> + Send + 'a>;

// ---------------------------------------------------------------------------
// Point
// ---------------------------------------------------------------------------

/// A named, independently configured coordinator for one class of work.
///
/// Cheap to clone; clones share the same registry. Built through
/// [`crate::CooperationPointFactory`].
pub struct CooperationPoint<T, E> {
    inner: Arc<PointInner<T, E>>,
}

struct PointInner<T, E> {
    id: PointId,
    config: CooperationConfig,
    registry: LocalRegistry<T, E>,
}

impl<T, E> Clone for CooperationPoint<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> std::fmt::Debug for CooperationPoint<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CooperationPoint")
            .field("id", &self.inner.id)
            .field("config", &self.inner.config)
            .field("active_keys", &self.inner.registry.len())
            .finish()
    }
}

impl<T, E> CooperationPoint<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(id: PointId, config: CooperationConfig) -> Self {
        Self {
            inner: Arc::new(PointInner {
                id,
                config,
                registry: LocalRegistry::new(),
            }),
        }
    }

    /// The point's identity; the scope of every key it derives.
    pub fn id(&self) -> &PointId {
        &self.inner.id
    }

    /// The configuration snapshot taken when the point was built.
    pub fn config(&self) -> &CooperationConfig {
        &self.inner.config
    }

    /// The key a `cooperate(action, nested_scope)` call on this point uses.
    pub fn key(&self, action: &str, nested_scope: &[&str]) -> Result<CooperationKey, InvalidArgument> {
        CooperationKey::create(self.inner.id.as_str(), action, nested_scope)
    }

    /// Creates a point with a different identity and result type that
    /// inherits this point's configuration. The new point has its own registry.
    pub fn derive<U, F>(&self, id: impl Into<String>) -> Result<CooperationPoint<U, F>, InvalidArgument>
    where
        U: Clone + Send + Sync + 'static,
        F: Clone + Send + Sync + 'static,
    {
        let id = PointId::new(id).ok_or_else(|| InvalidArgument::new("cooperation point id must not be empty"))?;
        Ok(CooperationPoint::new(id, self.inner.config.clone()))
    }

    /// Binds a work function for one cooperation.
    pub fn on<'a, W, Fut>(&'a self, work: W) -> Cooperation<'a, T, E>
    where
        W: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = Result<T, E>> + Send + 'a,
    {
        Cooperation {
            point: self,
            work: Box::new(move || work().boxed()),
            check: None,
            perform_work_on_fail: false,
            cancel: None,
        }
    }

    /// Current participant count (leader plus followers) for every key with
    /// work in flight, keyed by the key's label.
    ///
    /// For metrics only; the numbers may be stale by the time they are read.
    pub fn thread_count_per_key(&self) -> HashMap<String, usize> {
        self.inner.registry.participants_per_key()
    }
}

// ---------------------------------------------------------------------------
// Per-call builder
// ---------------------------------------------------------------------------

/// One pending cooperation on a point: the work, an optional check function
/// and the fallback policy.
#[must_use = "nothing happens until `cooperate` is awaited"]
pub struct Cooperation<'a, T, E> {
    point: &'a CooperationPoint<T, E>,
    work: WorkFn<'a, T, E>,
    check: Option<CheckFn<'a, T, E>>,
    perform_work_on_fail: bool,
    cancel: Option<CancellationToken>,
}

impl<'a, T, E> Cooperation<'a, T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Sets the check consulted before doing the work on fallback.
    ///
    /// Returning `Ok(Some(value))` means the work already happened through
    /// another path and `value` is used instead. Never called on the leader path.
    pub fn check_function<C, Fut>(mut self, check: C) -> Self
    where
        C: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = Result<Option<T>, E>> + Send + 'a,
    {
        self.check = Some(Box::new(move || check().boxed()));
        self
    }

    /// Whether a follower that times out or hits the participant limit falls
    /// back to doing the work itself instead of failing. Default: `false`.
    pub fn perform_work_on_fail(mut self, perform: bool) -> Self {
        self.perform_work_on_fail = perform;
        self
    }

    /// Abandons the wait with [`CooperationError::Cancelled`] when `token` fires.
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Runs the leader/follower protocol for `action` and `nested_scope`.
    #[tracing::instrument(level = "debug", skip_all, fields(point = %self.point.id(), action = action))]
    pub async fn cooperate(self, action: &str, nested_scope: &[&str]) -> Result<T, CooperationError<E>> {
        let Self {
            point,
            work,
            check,
            perform_work_on_fail,
            cancel,
        } = self;

        let key = point.key(action, nested_scope)?;
        let config = point.config();
        if !config.is_enabled() {
            return work().await.map_err(CooperationError::Work);
        }

        let registry = &point.inner.registry;
        let deadline = config.major_wait().and_then(|wait| Instant::now().checked_add(wait));

        loop {
            let (candidate, publisher) = CooperatingTask::candidate(key.clone(), config.participant_limit());
            match registry.register(candidate) {
                Registration::Leader(task) => {
                    tracing::debug!(key = %key.label(), "Leading cooperation");
                    return lead(registry, task, publisher, work).await;
                }
                Registration::Full { limit } => {
                    tracing::warn!(key = %key.label(), limit, "Cooperation is at capacity");
                    if perform_work_on_fail {
                        return failover(&key, check, work).await;
                    }
                    return Err(CooperationError::Capacity {
                        key: key.label().to_owned(),
                        limit,
                    });
                }
                Registration::Follower(participant) => {
                    tracing::debug!(
                        key = %key.label(),
                        participants = participant.task().participants(),
                        "Joined in-flight cooperation"
                    );
                    let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
                    match follow(&participant, remaining, cancel.as_ref()).await {
                        Followed::Published(Published::Complete(outcome)) => {
                            return outcome.map_err(CooperationError::Work);
                        }
                        Followed::Published(Published::Abandoned) => {
                            tracing::warn!(key = %key.label(), "Leader went away without a result; re-registering");
                        }
                        Followed::TimedOut => {
                            drop(participant);
                            tracing::warn!(
                                key = %key.label(),
                                waited = ?config.major_timeout(),
                                fallback = perform_work_on_fail,
                                "Timed out waiting for in-flight cooperation"
                            );
                            if perform_work_on_fail {
                                return failover(&key, check, work).await;
                            }
                            return Err(CooperationError::Timeout {
                                key: key.label().to_owned(),
                                waited: config.major_timeout(),
                            });
                        }
                        Followed::Cancelled => {
                            return Err(CooperationError::Cancelled {
                                key: key.label().to_owned(),
                            });
                        }
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Protocol steps
// ---------------------------------------------------------------------------

/// Removes the leader's task from the registry when dropped.
struct Deregistration<'r, T, E> {
    registry: &'r LocalRegistry<T, E>,
    task: Arc<CooperatingTask<T, E>>,
}

impl<T, E> Drop for Deregistration<'_, T, E> {
    fn drop(&mut self) {
        self.registry.deregister(&self.task);
        tracing::debug!(key = %self.task.key().label(), "Released cooperation");
    }
}

async fn lead<T, E>(
    registry: &LocalRegistry<T, E>,
    task: Arc<CooperatingTask<T, E>>,
    publisher: OutcomePublisher<T, E>,
    work: WorkFn<'_, T, E>,
) -> Result<T, CooperationError<E>>
where
    T: Clone,
    E: Clone,
{
    let registration = Deregistration { registry, task };
    let outcome = work().await;
    publisher.publish(outcome.clone());
    drop(registration);
    outcome.map_err(CooperationError::Work)
}

async fn failover<T, E>(
    key: &CooperationKey,
    check: Option<CheckFn<'_, T, E>>,
    work: WorkFn<'_, T, E>,
) -> Result<T, CooperationError<E>> {
    if let Some(check) = check {
        if let Some(value) = check().await.map_err(CooperationError::Check)? {
            tracing::debug!(key = %key.label(), "Work already completed elsewhere");
            return Ok(value);
        }
    }
    tracing::debug!(key = %key.label(), "Performing work outside cooperation");
    work().await.map_err(CooperationError::Work)
}

enum Followed<T, E> {
    Published(Published<T, E>),
    TimedOut,
    Cancelled,
}

async fn follow<T, E>(
    participant: &Participant<T, E>,
    wait: Option<Duration>,
    cancel: Option<&CancellationToken>,
) -> Followed<T, E>
where
    T: Clone,
    E: Clone,
{
    let waiting = participant.task().published_within(wait);
    let waited = match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => return Followed::Cancelled,
            published = waiting => published,
        },
        None => waiting.await,
    };
    waited.map_or(Followed::TimedOut, Followed::Published)
}
