//! Per-point cooperation tunables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration snapshot for one [`crate::CooperationPoint`].
///
/// Loaded from external configuration (every field optional) or assembled via
/// [`crate::CooperationPointBuilder`]. Immutable once a point is built.
///
/// A zero value disables the corresponding bound:
///
/// | Field | Zero means |
/// |-------|------------|
/// | `majorTimeout` | followers wait for the leader without a time limit |
/// | `minorTimeout` | dependency waits (e.g. on a cluster lease) are unbounded |
/// | `threadsPerKey` | no limit on participants per key |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CooperationConfig {
    /// How long a follower waits for the leader's result. Default: unbounded.
    major_timeout: Duration,
    /// How long nested waits on I/O dependencies may take. Default: unbounded.
    minor_timeout: Duration,
    /// Maximum participants (leader plus followers) per key. Default: unlimited.
    threads_per_key: usize,
    /// When `false`, points run every work function directly. Default: `true`.
    enabled: bool,
}

impl Default for CooperationConfig {
    fn default() -> Self {
        Self {
            major_timeout: Duration::ZERO,
            minor_timeout: Duration::ZERO,
            threads_per_key: 0,
            enabled: true,
        }
    }
}

impl CooperationConfig {
    /// Raw major timeout; zero means unbounded.
    pub fn major_timeout(&self) -> Duration {
        self.major_timeout
    }

    /// Raw minor timeout; zero means unbounded.
    pub fn minor_timeout(&self) -> Duration {
        self.minor_timeout
    }

    /// Raw participants-per-key limit; zero means unlimited.
    pub fn threads_per_key(&self) -> usize {
        self.threads_per_key
    }

    /// Whether cooperation is active for points built from this config.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Bound on a follower's wait, or `None` if it may wait indefinitely.
    pub fn major_wait(&self) -> Option<Duration> {
        non_zero(self.major_timeout)
    }

    /// Bound on dependency waits, or `None` if they may wait indefinitely.
    pub fn minor_wait(&self) -> Option<Duration> {
        non_zero(self.minor_timeout)
    }

    /// Participant cap per key, or `None` if unlimited.
    pub fn participant_limit(&self) -> Option<usize> {
        (self.threads_per_key > 0).then_some(self.threads_per_key)
    }

    pub(crate) fn set_major_timeout(&mut self, timeout: Duration) {
        self.major_timeout = timeout;
    }

    pub(crate) fn set_minor_timeout(&mut self, timeout: Duration) {
        self.minor_timeout = timeout;
    }

    pub(crate) fn set_threads_per_key(&mut self, threads: usize) {
        self.threads_per_key = threads;
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

fn non_zero(d: Duration) -> Option<Duration> {
    (!d.is_zero()).then_some(d)
}
