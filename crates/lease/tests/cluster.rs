//! Cluster leadership across simulated nodes sharing one lease table.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cooperation::{ClusterLeadership, CooperationKey, CooperationPoint, CooperationPointFactory, LeaseError, LeaseStore, NodeId};
use lease::MemoryLeaseStore;

const PAYLOAD: &[u8] = b"lodash-4.17.21.tgz";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
enum FetchError {
    #[error("lease store: {0}")]
    Lease(#[from] LeaseError),
    #[error("upstream: {0}")]
    Upstream(String),
}

/// Stand-in for the blob store every node can read.
#[derive(Clone, Default)]
struct Blobs(Arc<Mutex<Option<Vec<u8>>>>);

impl Blobs {
    fn find(&self) -> Option<Vec<u8>> {
        self.0.lock().unwrap().clone()
    }

    fn put(&self, payload: &[u8]) {
        *self.0.lock().unwrap() = Some(payload.to_vec());
    }
}

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

fn key() -> CooperationKey {
    CooperationKey::create("npm-proxy", "fetch", &["lodash", "4.17.21"]).unwrap()
}

fn node(store: &Arc<MemoryLeaseStore>) -> ClusterLeadership {
    ClusterLeadership::new(Arc::clone(store) as Arc<dyn cooperation::LeaseStore>, NodeId::new_random())
        .with_poll_interval(ms(10))
}

async fn upstream_fetch(calls: Arc<AtomicUsize>, blobs: Blobs, latency: Duration) -> Result<Vec<u8>, FetchError> {
    calls.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(latency).await;
    blobs.put(PAYLOAD);
    Ok(PAYLOAD.to_vec())
}

async fn broken_fetch(calls: Arc<AtomicUsize>, latency: Duration) -> Result<Vec<u8>, FetchError> {
    calls.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(latency).await;
    Err(FetchError::Upstream("connection reset".into()))
}

#[tokio::test(start_paused = true)]
async fn waiting_node_uses_the_other_nodes_result() {
    let store = Arc::new(MemoryLeaseStore::new());
    let (a, b) = (node(&store), node(&store));
    let (calls, blobs) = (Arc::new(AtomicUsize::new(0)), Blobs::default());

    let first = {
        let (calls, blobs) = (Arc::clone(&calls), blobs.clone());
        tokio::spawn(async move {
            a.run(&key(), Some(ms(1000)), || async { Ok(None) }, || upstream_fetch(calls, blobs, ms(100)))
                .await
        })
    };
    tokio::time::sleep(ms(5)).await;

    let second = {
        let lookup = blobs.clone();
        let (calls, blobs) = (Arc::clone(&calls), blobs.clone());
        b.run(
            &key(),
            Some(ms(1000)),
            || async move { Ok(lookup.find()) },
            || upstream_fetch(calls, blobs, ms(100)),
        )
        .await
    };

    assert_eq!(second.unwrap(), PAYLOAD);
    assert_eq!(first.await.unwrap().unwrap(), PAYLOAD);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn node_takes_over_when_the_holder_fails() {
    let store = Arc::new(MemoryLeaseStore::new());
    let (a, b) = (node(&store), node(&store));
    let (calls, blobs) = (Arc::new(AtomicUsize::new(0)), Blobs::default());

    let first = {
        let calls = Arc::clone(&calls);
        tokio::spawn(async move {
            a.run(&key(), None, || async { Ok(None) }, || broken_fetch(calls, ms(100)))
                .await
        })
    };
    tokio::time::sleep(ms(5)).await;

    let lookup = blobs.clone();
    let second = b
        .run(
            &key(),
            None,
            || async move { Ok(lookup.find()) },
            || upstream_fetch(Arc::clone(&calls), blobs.clone(), ms(100)),
        )
        .await;

    assert_eq!(second.unwrap(), PAYLOAD);
    assert_eq!(
        first.await.unwrap(),
        Err(FetchError::Upstream("connection reset".into()))
    );
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(store.is_empty());
}

// Lease expiry is wall-clock, so this one runs on the real tokio clock.
#[tokio::test]
async fn node_takes_over_an_expired_lease_left_by_a_dead_holder() {
    let store = Arc::new(MemoryLeaseStore::new());
    let a = node(&store).with_ttl(ms(50));
    let b = node(&store);
    let (calls, blobs) = (Arc::new(AtomicUsize::new(0)), Blobs::default());

    let hung = {
        let (calls, blobs) = (Arc::clone(&calls), blobs.clone());
        tokio::spawn(async move {
            a.run(&key(), None, || async { Ok(None) }, || upstream_fetch(calls, blobs, Duration::from_secs(60)))
                .await
        })
    };
    tokio::time::sleep(ms(10)).await;
    hung.abort();
    assert!(hung.await.unwrap_err().is_cancelled());

    // The holder died mid-work: its row is still there, unreleased.
    assert_eq!(store.len(), 1);
    let stale = store.holder(key().fingerprint()).await.unwrap().unwrap();

    let lookup = blobs.clone();
    let started = tokio::time::Instant::now();
    let taken_over = b
        .run(
            &key(),
            None,
            || async move { Ok(lookup.find()) },
            || upstream_fetch(Arc::clone(&calls), blobs.clone(), ms(10)),
        )
        .await;

    assert_eq!(taken_over.unwrap(), PAYLOAD);
    assert!(started.elapsed() >= ms(30));
    // One aborted attempt by the dead holder plus the takeover.
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(store.is_empty());
    assert_eq!(
        store.release(&stale).await,
        Err(LeaseError::NotHeld {
            fingerprint: key().fingerprint().to_owned()
        })
    );
}

#[tokio::test(start_paused = true)]
async fn exhausted_wait_works_without_the_lease() {
    let store = Arc::new(MemoryLeaseStore::new());
    let (a, b) = (node(&store), node(&store));
    let (calls, blobs) = (Arc::new(AtomicUsize::new(0)), Blobs::default());

    let first = {
        let (calls, blobs) = (Arc::clone(&calls), blobs.clone());
        tokio::spawn(async move {
            a.run(&key(), None, || async { Ok(None) }, || upstream_fetch(calls, blobs, ms(500)))
                .await
        })
    };
    tokio::time::sleep(ms(5)).await;

    let lookup = blobs.clone();
    let started = tokio::time::Instant::now();
    let second = b
        .run(
            &key(),
            Some(ms(50)),
            || async move { Ok(lookup.find()) },
            || upstream_fetch(Arc::clone(&calls), blobs.clone(), ms(100)),
        )
        .await;

    assert_eq!(second.unwrap(), PAYLOAD);
    assert!(started.elapsed() < ms(500));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // The advisory run never held the lease; the first node still does.
    assert_eq!(store.len(), 1);
    first.await.unwrap().unwrap();
    assert!(store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn points_on_two_nodes_fetch_once() {
    let store = Arc::new(MemoryLeaseStore::new());
    let (calls, blobs) = (Arc::new(AtomicUsize::new(0)), Blobs::default());
    let factory = CooperationPointFactory::default();

    let mut handles = Vec::new();
    for _ in 0..2 {
        let point: CooperationPoint<Vec<u8>, FetchError> = factory
            .configure()
            .minor_timeout(Duration::from_secs(2))
            .build("npm-proxy")
            .unwrap();
        let leadership = node(&store);

        for i in 0..3u64 {
            let (point, leadership) = (point.clone(), leadership.clone());
            let (calls, blobs) = (Arc::clone(&calls), blobs.clone());
            handles.push(tokio::spawn(async move {
                tokio::time::sleep(ms(i)).await;
                let key = point.key("fetch", &["lodash", "4.17.21"]).unwrap();
                let wait = point.config().minor_wait();
                let lookup = blobs.clone();
                point
                    .on(|| async move {
                        leadership
                            .run(
                                &key,
                                wait,
                                || async move { Ok(lookup.find()) },
                                || upstream_fetch(calls, blobs, ms(200)),
                            )
                            .await
                    })
                    .cooperate("fetch", &["lodash", "4.17.21"])
                    .await
            }));
        }
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), PAYLOAD);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(store.is_empty());
}
