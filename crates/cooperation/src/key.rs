//! Cooperation keys: the identity of one logical unit of deduplicated work.

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

use crate::InvalidArgument;

/// Separator placed between the scope, action and nested-scope tokens of a label.
pub const KEY_DELIMITER: char = ':';

/// Identity of one logical unit of work, e.g. "fetch lodash 4.17.21 through
/// the npm proxy".
///
/// A key has two parts:
///
/// - `label`: the human-readable `scope:action[:nested…]` string, used for
///   diagnostics and the per-key participant report.
/// - `fingerprint`: the xxh3 64-bit hash of the label, rendered as 16 lowercase
///   hex digits. It is the registry key and the lease row key, so it must be
///   stable across processes.
///
/// Equality and hashing use the fingerprint only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooperationKey {
    label: String,
    fingerprint: String,
}

impl CooperationKey {
    /// Builds a key from a scope, an action and zero or more nested scopes.
    ///
    /// Fails if `scope` or `action` is empty. Nested-scope tokens are appended
    /// as given, including empty ones.
    pub fn create(scope: &str, action: &str, nested_scope: &[&str]) -> Result<Self, InvalidArgument> {
        if scope.is_empty() {
            return Err(InvalidArgument::new("cooperation scope must not be empty"));
        }
        if action.is_empty() {
            return Err(InvalidArgument::new("cooperation action must not be empty"));
        }

        let mut label = String::with_capacity(
            scope.len() + action.len() + nested_scope.iter().map(|s| s.len() + 1).sum::<usize>() + 1,
        );
        label.push_str(scope);
        label.push(KEY_DELIMITER);
        label.push_str(action);
        for token in nested_scope {
            label.push(KEY_DELIMITER);
            label.push_str(token);
        }

        let fingerprint = format!("{:016x}", xxh3_64(label.as_bytes()));
        Ok(Self { label, fingerprint })
    }

    /// Returns the human-readable label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns the stable fingerprint of the label.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl PartialEq for CooperationKey {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint
    }
}

impl Eq for CooperationKey {}

impl std::hash::Hash for CooperationKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.fingerprint.hash(state);
    }
}

impl std::fmt::Display for CooperationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.label, self.fingerprint)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn label_joins_components_in_order() {
        let key = CooperationKey::create("npm-proxy", "fetch", &["lodash", "4.17.21"]).unwrap();
        assert_eq!(key.label(), "npm-proxy:fetch:lodash:4.17.21");

        let bare = CooperationKey::create("npm-proxy", "fetch", &[]).unwrap();
        assert_eq!(bare.label(), "npm-proxy:fetch");
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let a = CooperationKey::create("npm-proxy", "fetch", &["lodash"]).unwrap();
        let b = CooperationKey::create("npm-proxy", "fetch", &["lodash"]).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a, b);
        assert_eq!(a.fingerprint().len(), 16);
        assert_eq!(a.fingerprint(), format!("{:016x}", xxh3_64(b"npm-proxy:fetch:lodash")));
    }

    #[test]
    fn changing_any_component_changes_the_fingerprint() {
        let base = CooperationKey::create("npm-proxy", "fetch", &["lodash", "4.17.21"]).unwrap();
        let variants = [
            CooperationKey::create("maven-proxy", "fetch", &["lodash", "4.17.21"]).unwrap(),
            CooperationKey::create("npm-proxy", "metadata", &["lodash", "4.17.21"]).unwrap(),
            CooperationKey::create("npm-proxy", "fetch", &["lodash", "4.17.20"]).unwrap(),
            CooperationKey::create("npm-proxy", "fetch", &["lodash"]).unwrap(),
        ];
        for variant in &variants {
            assert_ne!(base.label(), variant.label());
            assert_ne!(base, *variant);
        }
    }

    #[test]
    fn absent_scope_or_action_is_rejected() {
        assert!(CooperationKey::create("", "fetch", &[]).is_err());
        let err = CooperationKey::create("npm-proxy", "", &["x"]).unwrap_err();
        assert!(err.reason().contains("action"));
    }

    #[test]
    fn hashing_uses_the_fingerprint() {
        let mut set = HashSet::new();
        set.insert(CooperationKey::create("s", "a", &["n"]).unwrap());
        assert!(set.contains(&CooperationKey::create("s", "a", &["n"]).unwrap()));
    }
}
