// src/runtime/privileged.rs
//! Privileged service setup tracking
//!
//! Each service setup gets a fresh [`SetupId`]. When the service name is in
//! the configured privileged list the id is granted before the engine runs
//! the setup and revoked when it finishes, so a privilege check can only
//! succeed during that one attempt.

use dashmap::DashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;
use ulid::Ulid;

/// Opaque identifier of one service setup attempt
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SetupId(String);

impl SetupId {
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SetupId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SetupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SetupId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Default)]
pub struct PrivilegedSet {
    ids: DashSet<SetupId>,
    grants: AtomicU64,
}

impl PrivilegedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, id: SetupId) {
        debug!("Granting privileged setup {}", id);
        self.grants.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("scripthost_privileged_grants_total").increment(1);
        self.ids.insert(id);
    }

    pub fn revoke(&self, id: &SetupId) {
        self.ids.remove(id);
    }

    pub fn clear(&self) {
        self.ids.clear();
    }

    pub fn is_privileged(&self, id: &SetupId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Total grants since this set was created
    pub fn grants(&self) -> u64 {
        self.grants.load(Ordering::Relaxed)
    }

    /// Grant `id` until the returned guard is dropped
    pub fn grant_scoped(&self, id: SetupId) -> PrivilegedGrant<'_> {
        self.grant(id.clone());
        PrivilegedGrant { set: self, id }
    }
}

/// Live grant of one setup id; revoked on drop, including when the setup
/// future holding it is cancelled
#[must_use = "the grant is revoked as soon as the guard is dropped"]
pub struct PrivilegedGrant<'a> {
    set: &'a PrivilegedSet,
    id: SetupId,
}

impl PrivilegedGrant<'_> {
    pub fn id(&self) -> &SetupId {
        &self.id
    }
}

impl Drop for PrivilegedGrant<'_> {
    fn drop(&mut self) {
        debug!("Revoking privileged setup {}", self.id);
        self.set.revoke(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(SetupId::new(), SetupId::new());
    }

    #[test]
    fn test_grant_revoke() {
        let set = PrivilegedSet::new();
        let id = SetupId::new();
        assert!(!set.is_privileged(&id));

        set.grant(id.clone());
        assert!(set.is_privileged(&id));
        assert_eq!(set.grants(), 1);

        set.revoke(&id);
        assert!(!set.is_privileged(&id));
    }

    #[test]
    fn test_scoped_grant_revoked_on_drop() {
        let set = PrivilegedSet::new();
        let id = SetupId::new();
        {
            let grant = set.grant_scoped(id.clone());
            assert_eq!(grant.id(), &id);
            assert!(set.is_privileged(&id));
        }
        assert!(!set.is_privileged(&id));
        assert_eq!(set.grants(), 1);
    }

    #[test]
    fn test_clear() {
        let set = PrivilegedSet::new();
        set.grant(SetupId::new());
        set.grant(SetupId::new());
        assert_eq!(set.len(), 2);
        set.clear();
        assert!(set.is_empty());
    }
}
