//! Cluster-wide leadership over a shared lease table.
//!
//! A [`crate::CooperationPoint`] guarantees one leader per key *per process*.
//! When several nodes share a datastore, the work function can additionally
//! run under [`ClusterLeadership::run`], which takes a lease row keyed by the
//! cooperation key's fingerprint before doing the expensive work.
//!
//! Leadership is advisory: leases expire, and a node that cannot get the lease
//! within its wait budget does the work anyway. The lease only reduces
//! duplicate work across nodes; it never guarantees exclusivity.
//!
//! ## Flow for one call
//!
//! | Lease state | Action |
//! |-------------|--------|
//! | free or expired | acquire, do the work, release |
//! | held by another node | poll until released/expired or the wait runs out |
//! | released while waiting | run the check; use its value or acquire and do the work |
//! | still held after the wait | run the check; use its value or do the work without a lease |

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{CooperationKey, LeaseError, LeaseToken, NodeId, Timestamp};

/// Default lifetime of an acquired lease.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(30);

/// Default interval between polls of a lease held by another node.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Lease record
// ---------------------------------------------------------------------------

/// One row of the shared lease table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Fingerprint of the cooperation key this lease guards.
    pub fingerprint: String,
    /// Node that acquired the lease.
    pub holder: NodeId,
    /// Token identifying this particular acquisition.
    pub token: LeaseToken,
    /// Wall-clock time after which other nodes may take the lease over.
    pub expires_at: Timestamp,
}

impl Lease {
    /// Returns `true` if the lease is no longer valid at `now`.
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.expires_at.has_passed(now)
    }
}

// ---------------------------------------------------------------------------
// Port
// ---------------------------------------------------------------------------

/// Shared lease table, implemented by infrastructure crates.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Acquires the lease for `fingerprint` if it is free or expired.
    ///
    /// Returns `Ok(None)` if another holder has a live lease.
    async fn try_acquire(
        &self,
        fingerprint: &str,
        holder: NodeId,
        ttl: Duration,
    ) -> Result<Option<Lease>, LeaseError>;

    /// Releases `lease` using token compare-and-delete semantics.
    ///
    /// Fails with [`LeaseError::NotHeld`] if the row now belongs to another token.
    async fn release(&self, lease: &Lease) -> Result<(), LeaseError>;

    /// Returns the live lease for `fingerprint`, if any.
    async fn holder(&self, fingerprint: &str) -> Result<Option<Lease>, LeaseError>;
}

// ---------------------------------------------------------------------------
// Leadership helper
// ---------------------------------------------------------------------------

/// Runs work under a cluster lease on behalf of one node.
#[derive(Clone)]
pub struct ClusterLeadership {
    store: Arc<dyn LeaseStore>,
    node: NodeId,
    ttl: Duration,
    poll_interval: Duration,
}

impl std::fmt::Debug for ClusterLeadership {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterLeadership")
            .field("node", &self.node)
            .field("ttl", &self.ttl)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl ClusterLeadership {
    /// Creates a helper for `node` over `store` with default TTL and polling.
    pub fn new(store: Arc<dyn LeaseStore>, node: NodeId) -> Self {
        Self {
            store,
            node,
            ttl: DEFAULT_LEASE_TTL,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Sets how long acquired leases stay valid.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets how often a lease held elsewhere is re-read.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// The node this helper acquires leases for.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Runs `work` as the cluster leader for `key`.
    ///
    /// `wait` bounds how long to wait for another node's lease (normally the
    /// point's minor timeout; `None` waits until that lease is released or
    /// expires). `check` is consulted after waiting on another node and may
    /// return its result instead of doing the work again.
    pub async fn run<T, E, W, WFut, C, CFut>(
        &self,
        key: &CooperationKey,
        wait: Option<Duration>,
        check: C,
        work: W,
    ) -> Result<T, E>
    where
        E: From<LeaseError>,
        W: FnOnce() -> WFut,
        WFut: Future<Output = Result<T, E>>,
        C: FnOnce() -> CFut,
        CFut: Future<Output = Result<Option<T>, E>>,
    {
        let fingerprint = key.fingerprint();
        if let Some(lease) = self.store.try_acquire(fingerprint, self.node, self.ttl).await? {
            tracing::debug!(key = %key.label(), node = %self.node, "Acquired cluster lease");
            return self.work_under(lease, work).await;
        }

        let released = self.await_release(key, wait).await?;

        if let Some(value) = check().await? {
            tracing::debug!(key = %key.label(), "Another node completed the work");
            return Ok(value);
        }

        if released {
            if let Some(lease) = self.store.try_acquire(fingerprint, self.node, self.ttl).await? {
                tracing::debug!(key = %key.label(), node = %self.node, "Took over cluster lease");
                return self.work_under(lease, work).await;
            }
        }

        tracing::warn!(
            key = %key.label(),
            node = %self.node,
            "Cluster lease still held elsewhere; working without it"
        );
        work().await
    }

    /// Polls until the lease is gone (`true`) or `wait` runs out (`false`).
    async fn await_release(&self, key: &CooperationKey, wait: Option<Duration>) -> Result<bool, LeaseError> {
        let deadline = wait.and_then(|wait| tokio::time::Instant::now().checked_add(wait));
        loop {
            if self.store.holder(key.fingerprint()).await?.is_none() {
                return Ok(true);
            }
            let pause = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                    if remaining.is_zero() {
                        return Ok(false);
                    }
                    remaining.min(self.poll_interval)
                }
                None => self.poll_interval,
            };
            tokio::time::sleep(pause).await;
        }
    }

    async fn work_under<T, E, W, WFut>(&self, lease: Lease, work: W) -> Result<T, E>
    where
        W: FnOnce() -> WFut,
        WFut: Future<Output = Result<T, E>>,
    {
        let outcome = work().await;
        // An unreleased lease still expires after its TTL, and the work's
        // outcome is already final.
        if let Err(e) = self.store.release(&lease).await {
            tracing::warn!(fingerprint = %lease.fingerprint, error = %e, "Failed to release cluster lease");
        }
        outcome
    }
}
