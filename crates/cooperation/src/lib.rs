//! Request deduplication ("single-flight") for expensive I/O.
//!
//! A [`CooperationPoint`] guarantees that, per process, at most one caller at a
//! time performs the work for a given [`CooperationKey`]. Concurrent callers
//! for the same key become followers: they receive the leader's result (or
//! failure), or after a bounded wait fail over to doing the work themselves.
//!
//! ```ignore
//! let point: CooperationPoint<Bytes, FetchError> = CooperationPointFactory::default()
//!     .configure()
//!     .major_timeout(Duration::from_secs(1))
//!     .threads_per_key(10)
//!     .build("npm-proxy")?;
//!
//! let tarball = point
//!     .on(|| upstream.fetch("lodash", "4.17.21"))
//!     .check_function(|| blobs.find("lodash", "4.17.21"))
//!     .perform_work_on_fail(true)
//!     .cooperate("fetch", &["lodash", "4.17.21"])
//!     .await?;
//! ```
//!
//! ## Architectural Layer
//!
//! **Coordination core + port definitions.** This crate has no I/O
//! dependencies. Cluster-wide leadership is reached through the
//! [`LeaseStore`] port; infrastructure crates supply the store.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`key`] | [`CooperationKey`] label and fingerprint derivation |
//! | [`config`] | [`CooperationConfig`] tunables |
//! | [`factory`] | [`CooperationPointFactory`] and [`CooperationPointBuilder`] |
//! | [`point`] | [`CooperationPoint`], [`Cooperation`] and the leader/follower protocol |
//! | [`task`] | [`CooperatingTask`], the shared per-key unit of in-flight work |
//! | [`registry`] | [`LocalRegistry`], fingerprint → in-flight task |
//! | [`metrics`] | Participant accounting exported as OpenTelemetry gauges |
//! | [`lease`] | [`LeaseStore`] port and [`ClusterLeadership`] |
//! | [`identifiers`] | Newtype identifiers (`PointId`, `NodeId`, `LeaseToken`) |
//! | [`types`] | Shared value types (`Timestamp`) |
//! | [`errors`] | Error and retry-policy types |

pub mod config;
pub mod errors;
pub mod factory;
pub mod identifiers;
pub mod key;
pub mod lease;
pub mod metrics;
pub mod point;
pub mod registry;
pub mod task;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use config::CooperationConfig;
pub use errors::{CooperationError, InvalidArgument, LeaseError, RetryPolicy};
pub use factory::{CooperationPointBuilder, CooperationPointFactory};
pub use identifiers::{LeaseToken, NodeId, PointId};
pub use key::{CooperationKey, KEY_DELIMITER};
pub use lease::{ClusterLeadership, Lease, LeaseStore};
pub use metrics::{register_participant_gauge, ParticipantSource};
pub use point::{CheckFn, Cooperation, CooperationPoint, WorkFn};
pub use registry::LocalRegistry;
pub use task::{CooperatingTask, OutcomePublisher};
pub use types::Timestamp;
