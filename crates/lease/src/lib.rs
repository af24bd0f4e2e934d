//! In-process shared lease table.
//!
//! Implements the [`cooperation::LeaseStore`] port over a concurrent map. All
//! [`cooperation::ClusterLeadership`] helpers holding the same
//! `Arc<MemoryLeaseStore>` behave like nodes sharing one datastore, which is
//! what tests, single-node deployments and `coopctl simulate --nodes N` need.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** The [`cooperation`] crate sees only the
//! [`cooperation::LeaseStore`] trait.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use cooperation::{Lease, LeaseError, LeaseStore, LeaseToken, NodeId, Timestamp};

/// Lease rows keyed by cooperation-key fingerprint.
#[derive(Debug, Default)]
pub struct MemoryLeaseStore {
    leases: DashMap<String, Lease>,
}

impl MemoryLeaseStore {
    /// Creates an empty lease table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows, live or expired.
    pub fn len(&self) -> usize {
        self.leases.len()
    }

    /// Returns `true` if the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    /// Drops every expired row and returns how many were dropped.
    ///
    /// Rows inserted concurrently are unaffected.
    pub fn purge_expired(&self) -> usize {
        let now = Timestamp::now();
        let mut purged = 0;
        self.leases.retain(|_, lease| {
            let live = !lease.is_expired_at(now);
            if !live {
                purged += 1;
            }
            live
        });
        purged
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn try_acquire(
        &self,
        fingerprint: &str,
        holder: NodeId,
        ttl: Duration,
    ) -> Result<Option<Lease>, LeaseError> {
        let now = Timestamp::now();
        let lease = Lease {
            fingerprint: fingerprint.to_owned(),
            holder,
            token: LeaseToken::new_random(),
            expires_at: now.plus(ttl),
        };

        match self.leases.entry(fingerprint.to_owned()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().is_expired_at(now) {
                    return Ok(None);
                }
                tracing::debug!(
                    fingerprint,
                    previous = %occupied.get().holder,
                    holder = %holder,
                    "Taking over expired lease"
                );
                occupied.insert(lease.clone());
            }
            Entry::Vacant(vacant) => {
                vacant.insert(lease.clone());
            }
        }
        Ok(Some(lease))
    }

    async fn release(&self, lease: &Lease) -> Result<(), LeaseError> {
        self.leases
            .remove_if(&lease.fingerprint, |_, current| current.token == lease.token)
            .map(|_| ())
            .ok_or_else(|| LeaseError::NotHeld {
                fingerprint: lease.fingerprint.clone(),
            })
    }

    async fn holder(&self, fingerprint: &str) -> Result<Option<Lease>, LeaseError> {
        let now = Timestamp::now();
        Ok(self
            .leases
            .get(fingerprint)
            .filter(|lease| !lease.is_expired_at(now))
            .map(|lease| lease.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn live_lease_blocks_other_holders() {
        let store = MemoryLeaseStore::new();
        let (a, b) = (NodeId::new_random(), NodeId::new_random());

        let lease = store.try_acquire("f1", a, Duration::from_secs(30)).await.unwrap().unwrap();
        assert_eq!(lease.holder, a);
        assert!(store.try_acquire("f1", b, Duration::from_secs(30)).await.unwrap().is_none());
        assert_eq!(store.holder("f1").await.unwrap(), Some(lease.clone()));

        store.release(&lease).await.unwrap();
        assert!(store.holder("f1").await.unwrap().is_none());
        assert!(store.try_acquire("f1", b, Duration::from_secs(30)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn expired_lease_can_be_taken_over_but_not_released_by_the_old_token() {
        let store = MemoryLeaseStore::new();
        let (a, b) = (NodeId::new_random(), NodeId::new_random());

        let stale = store.try_acquire("f1", a, Duration::ZERO).await.unwrap().unwrap();
        assert!(store.holder("f1").await.unwrap().is_none());

        let fresh = store.try_acquire("f1", b, Duration::from_secs(30)).await.unwrap().unwrap();
        assert_eq!(
            store.release(&stale).await,
            Err(LeaseError::NotHeld { fingerprint: "f1".into() })
        );
        assert_eq!(store.holder("f1").await.unwrap().map(|l| l.token), Some(fresh.token));
    }

    #[tokio::test]
    async fn purge_drops_only_expired_rows() {
        let store = MemoryLeaseStore::new();
        let node = NodeId::new_random();
        store.try_acquire("expired", node, Duration::ZERO).await.unwrap();
        store.try_acquire("live", node, Duration::from_secs(30)).await.unwrap();

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn purge_runs_alongside_concurrent_acquires() {
        let store = std::sync::Arc::new(MemoryLeaseStore::new());
        let node = NodeId::new_random();

        let writer = {
            let store = std::sync::Arc::clone(&store);
            tokio::spawn(async move {
                for i in 0..2_000 {
                    store.try_acquire(&format!("fresh-{i}"), node, Duration::from_secs(30)).await.unwrap();
                }
            })
        };

        let mut purged = 0;
        while !writer.is_finished() {
            purged += store.purge_expired();
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();

        assert_eq!(purged, 0);
        assert_eq!(store.len(), 2_000);
    }
}
