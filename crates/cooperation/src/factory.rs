//! Construction of cooperation points.
//!
//! ```ignore
//! let factory = CooperationPointFactory::new(config_from_file);
//! let fetches: CooperationPoint<Bytes, FetchError> = factory
//!     .configure()
//!     .major_timeout(Duration::from_secs(1))
//!     .threads_per_key(10)
//!     .build("npm-proxy")?;
//! ```

use std::time::Duration;

use crate::{CooperationConfig, CooperationPoint, InvalidArgument, PointId, KEY_DELIMITER};

/// Hands out [`CooperationPointBuilder`]s seeded from a set of defaults.
///
/// Typically one factory per process, created at wiring time from the
/// externally loaded [`CooperationConfig`].
#[derive(Debug, Clone, Default)]
pub struct CooperationPointFactory {
    defaults: CooperationConfig,
}

impl CooperationPointFactory {
    /// Creates a factory whose builders start from `defaults`.
    pub fn new(defaults: CooperationConfig) -> Self {
        Self { defaults }
    }

    /// Returns a builder seeded with this factory's defaults.
    pub fn configure(&self) -> CooperationPointBuilder {
        CooperationPointBuilder {
            config: self.defaults.clone(),
        }
    }
}

/// Accumulates point tunables; each `build` call snapshots them.
#[derive(Debug, Clone, Default)]
pub struct CooperationPointBuilder {
    config: CooperationConfig,
}

impl CooperationPointBuilder {
    /// How long followers wait for the leader. Zero waits indefinitely.
    #[must_use]
    pub fn major_timeout(mut self, timeout: Duration) -> Self {
        self.config.set_major_timeout(timeout);
        self
    }

    /// How long nested dependency waits may take. Zero waits indefinitely.
    #[must_use]
    pub fn minor_timeout(mut self, timeout: Duration) -> Self {
        self.config.set_minor_timeout(timeout);
        self
    }

    /// Maximum participants per key, leader included. Zero is unlimited.
    #[must_use]
    pub fn threads_per_key(mut self, threads: usize) -> Self {
        self.config.set_threads_per_key(threads);
        self
    }

    /// `true` turns cooperation on; `false` makes built points call every
    /// work function directly.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.set_enabled(enabled);
        self
    }

    /// The configuration the next `build` call would snapshot.
    pub fn config(&self) -> &CooperationConfig {
        &self.config
    }

    /// Builds a point identified by `id`, with its own empty registry.
    ///
    /// May be called repeatedly; every point gets an independent copy of the
    /// current configuration.
    pub fn build<T, E>(&self, id: impl Into<String>) -> Result<CooperationPoint<T, E>, InvalidArgument>
    where
        T: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        let id = PointId::new(id).ok_or_else(|| InvalidArgument::new("cooperation point id must not be empty"))?;
        Ok(CooperationPoint::new(id, self.config.clone()))
    }

    /// Builds a point whose id is `owner` followed by `keys`, joined with `:`.
    ///
    /// `owner` is usually a type name, e.g. `std::any::type_name::<NpmProxy>()`.
    pub fn build_scoped<T, E>(&self, owner: &str, keys: &[&str]) -> Result<CooperationPoint<T, E>, InvalidArgument>
    where
        T: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        if owner.is_empty() {
            return Err(InvalidArgument::new("cooperation point owner must not be empty"));
        }
        let mut id = owner.to_owned();
        for key in keys {
            id.push(KEY_DELIMITER);
            id.push_str(key);
        }
        self.build(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Point = CooperationPoint<u32, String>;

    #[test]
    fn builder_overrides_factory_defaults() {
        let factory = CooperationPointFactory::default();
        let point: Point = factory
            .configure()
            .major_timeout(Duration::from_secs(1))
            .minor_timeout(Duration::from_millis(250))
            .threads_per_key(10)
            .build("npm-proxy")
            .unwrap();

        let config = point.config();
        assert_eq!(config.major_wait(), Some(Duration::from_secs(1)));
        assert_eq!(config.minor_wait(), Some(Duration::from_millis(250)));
        assert_eq!(config.participant_limit(), Some(10));
        assert!(config.is_enabled());
        assert_eq!(point.id().as_str(), "npm-proxy");
    }

    #[test]
    fn built_points_keep_their_snapshot() {
        let builder = CooperationPointFactory::default().configure().threads_per_key(2);
        let first: Point = builder.build("first").unwrap();
        let builder = builder.threads_per_key(7);
        let second: Point = builder.build("second").unwrap();

        assert_eq!(first.config().participant_limit(), Some(2));
        assert_eq!(second.config().participant_limit(), Some(7));
    }

    #[test]
    fn scoped_ids_join_owner_and_keys() {
        let point: Point = CooperationPointFactory::default()
            .configure()
            .build_scoped("repository::NpmProxy", &["metadata", "v2"])
            .unwrap();
        assert_eq!(point.id().as_str(), "repository::NpmProxy:metadata:v2");
    }

    #[test]
    fn empty_ids_are_rejected() {
        let builder = CooperationPointFactory::default().configure();
        assert!(builder.build::<u32, String>("").is_err());
        assert!(builder.build_scoped::<u32, String>("", &["x"]).is_err());
    }
}
