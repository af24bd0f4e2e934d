//! Concurrent fetch simulation against one or more simulated nodes.
//!
//! Every node gets its own [`CooperationPoint`] (and so its own registry).
//! With more than one node, the work function also runs under
//! [`ClusterLeadership`] over a shared [`MemoryLeaseStore`], and a shared
//! in-memory "blob store" lets check functions see what other nodes fetched.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cooperation::{
    register_participant_gauge, ClusterLeadership, CooperationError, CooperationPoint, CooperationPointBuilder,
    LeaseError, LeaseStore, NodeId, ParticipantSource,
};
use dashmap::DashMap;
use futures::future::{join_all, ready, BoxFuture, Ready};
use lease::MemoryLeaseStore;
use serde::Serialize;

/// Failure of the simulated upstream fetch.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SimulatedFetchError {
    /// The shared lease table failed.
    #[error(transparent)]
    Lease(#[from] LeaseError),
}

type Payload = String;
type Blobs = Arc<DashMap<String, Payload>>;
type Point = CooperationPoint<Payload, SimulatedFetchError>;

/// One simulation run.
#[derive(Debug, Clone)]
pub struct Scenario {
    /// Point id; the scope of the fetched artifact's key.
    pub scope: String,
    /// Action component of the key.
    pub action: String,
    /// Nested-scope tokens, e.g. package name and version.
    pub nested: Vec<String>,
    /// Simulated nodes, each with its own cooperation point.
    pub nodes: usize,
    /// Concurrent callers per node.
    pub callers: usize,
    /// Upstream latency.
    pub latency: Duration,
    /// Delay between successive callers on a node.
    pub stagger: Duration,
    /// Whether followers fall back to their own fetch.
    pub fallback: bool,
    /// Whether fallbacks consult the blob store first.
    pub check: bool,
}

/// Summary printed by `coopctl simulate`.
#[derive(Debug, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Report {
    pub key: String,
    pub fingerprint: String,
    pub nodes: usize,
    pub callers: usize,
    pub upstream_fetches: usize,
    pub succeeded: usize,
    pub timed_out: usize,
    pub at_capacity: usize,
    pub cancelled: usize,
    pub failed: usize,
    pub elapsed_ms: u128,
}

/// Runs `scenario` with points built from `builder` and returns the tally.
pub async fn run(builder: &CooperationPointBuilder, scenario: Scenario) -> anyhow::Result<Report> {
    let scenario = Arc::new(scenario);
    let store = Arc::new(MemoryLeaseStore::new());
    let blobs: Blobs = Arc::new(DashMap::new());
    let fetches = Arc::new(AtomicUsize::new(0));

    let mut sources: Vec<Arc<dyn ParticipantSource>> = Vec::with_capacity(scenario.nodes);
    let mut handles = Vec::with_capacity(scenario.nodes.saturating_mul(scenario.callers));
    let started = tokio::time::Instant::now();

    for node in 0..scenario.nodes {
        let point: Point = builder.build(scenario.scope.clone())?;
        sources.push(Arc::new(point.clone()));
        let leadership = (scenario.nodes > 1).then(|| {
            ClusterLeadership::new(Arc::clone(&store) as Arc<dyn LeaseStore>, NodeId::new_random())
                .with_poll_interval(Duration::from_millis(10))
        });
        match &leadership {
            Some(leadership) => tracing::debug!(node, node_id = %leadership.node(), "Starting clustered node"),
            None => tracing::debug!(node, "Starting standalone node"),
        }

        for caller in 0..scenario.callers {
            let start_after = scenario.stagger.saturating_mul(u32::try_from(caller).unwrap_or(u32::MAX));
            handles.push(tokio::spawn(fetch_once(
                point.clone(),
                leadership.clone(),
                Arc::clone(&blobs),
                Arc::clone(&fetches),
                Arc::clone(&scenario),
                start_after,
            )));
        }
    }

    let _gauge = register_participant_gauge(&opentelemetry::global::meter("coopctl"), sources);

    let nested: Vec<&str> = scenario.nested.iter().map(String::as_str).collect();
    let key = cooperation::CooperationKey::create(&scenario.scope, &scenario.action, &nested)?;
    let mut report = Report {
        key: key.label().to_owned(),
        fingerprint: key.fingerprint().to_owned(),
        nodes: scenario.nodes,
        callers: scenario.callers,
        ..Report::default()
    };

    for joined in join_all(handles).await {
        match joined? {
            Ok(_) => report.succeeded += 1,
            Err(CooperationError::Timeout { .. }) => report.timed_out += 1,
            Err(CooperationError::Capacity { .. }) => report.at_capacity += 1,
            Err(CooperationError::Cancelled { .. }) => report.cancelled += 1,
            Err(e) => {
                match e.into_caller_error() {
                    Ok(upstream) => tracing::warn!(error = %upstream, "Simulated fetch failed"),
                    Err(coordination) => tracing::warn!(error = %coordination, "Cooperation failed"),
                }
                report.failed += 1;
            }
        }
    }
    let purged = store.purge_expired();
    if purged > 0 {
        tracing::warn!(purged, "Leases outlived their holders");
    }
    report.upstream_fetches = fetches.load(Ordering::SeqCst);
    report.elapsed_ms = started.elapsed().as_millis();
    Ok(report)
}

async fn fetch_once(
    point: Point,
    leadership: Option<ClusterLeadership>,
    blobs: Blobs,
    fetches: Arc<AtomicUsize>,
    scenario: Arc<Scenario>,
    start_after: Duration,
) -> Result<Payload, CooperationError<SimulatedFetchError>> {
    tokio::time::sleep(start_after).await;

    let nested: Vec<&str> = scenario.nested.iter().map(String::as_str).collect();
    let key = point.key(&scenario.action, &nested)?;
    let wait = point.config().minor_wait();
    let fetch = upstream(&key, Arc::clone(&blobs), fetches, scenario.latency);
    let lease_check = lookup(&blobs, key.fingerprint());
    let check = scenario.check.then(|| lookup(&blobs, key.fingerprint()));

    let mut cooperation = point
        .on(move || async move {
            match leadership {
                Some(leadership) => leadership.run(&key, wait, lease_check, fetch).await,
                None => fetch().await,
            }
        })
        .perform_work_on_fail(scenario.fallback);
    if let Some(check) = check {
        cooperation = cooperation.check_function(check);
    }
    cooperation.cooperate(&scenario.action, &nested).await
}

/// Check function reading the shared blob store.
fn lookup(
    blobs: &Blobs,
    fingerprint: &str,
) -> impl FnOnce() -> Ready<Result<Option<Payload>, SimulatedFetchError>> + Send + 'static {
    let (blobs, fingerprint) = (Arc::clone(blobs), fingerprint.to_owned());
    move || ready(Ok(blobs.get(&fingerprint).map(|blob| blob.value().clone())))
}

/// Simulated upstream fetch that stores what it fetched in the blob store.
fn upstream(
    key: &cooperation::CooperationKey,
    blobs: Blobs,
    fetches: Arc<AtomicUsize>,
    latency: Duration,
) -> impl FnOnce() -> BoxFuture<'static, Result<Payload, SimulatedFetchError>> + Send + 'static {
    let (label, fingerprint) = (key.label().to_owned(), key.fingerprint().to_owned());
    move || {
        Box::pin(async move {
            fetches.fetch_add(1, Ordering::SeqCst);
            tracing::info!(key = %label, "Fetching from upstream");
            tokio::time::sleep(latency).await;
            let payload = format!("payload for {label}");
            blobs.insert(fingerprint, payload.clone());
            Ok(payload)
        })
    }
}
