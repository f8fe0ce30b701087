/*!
The data model (spec §3): [`CacheEntry`], the projection [`CacheValue`],
the three expiration policies, and the count/clear scoping modes.
*/

use serde::{Deserialize, Serialize};

/// Maximum parent references an entry may carry. Spec §3.1 requires `N >=
/// 2` and recommends `N = 5`; this deployment uses the recommended value.
pub const MAX_PARENT_KEY_COUNT: usize = 5;

/// Maximum length, in characters, of a `partition` or `key` string (spec
/// §3.1).
pub const MAX_IDENTIFIER_LEN: usize = 2000;

/// A pointer to a parent entry by its own `(partition, key)` identity.
/// Advisory only — the parent need not exist at write time (spec §4.1 tie-
/// breaks); cascading deletion is driven by matching `parent_hash_i`
/// against a deleted entry's hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRef {
    pub hash: i64,
    pub key: String,
}

/// The three expiration policies an entry can carry (spec §3.2 invariants
/// 3-5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpirationPolicy {
    /// `interval = 0`; `utc_expiry` is absolute and immutable through reads.
    Timed { utc_expiry: i64 },
    /// `interval > 0`; each successful `Get` resets `utc_expiry = now +
    /// interval`.
    Sliding { interval_seconds: i64 },
    /// `interval` is the deployment's static interval; behaves like
    /// `Sliding` but the interval is not caller-chosen.
    Static,
}

impl ExpirationPolicy {
    /// The `interval` column value this policy persists.
    pub fn interval_seconds(&self, static_interval_seconds: i64) -> i64 {
        match self {
            ExpirationPolicy::Timed { .. } => 0,
            ExpirationPolicy::Sliding { interval_seconds } => *interval_seconds,
            ExpirationPolicy::Static => static_interval_seconds,
        }
    }

    /// The initial `utc_expiry` for a fresh write at time `now`.
    pub fn initial_expiry(&self, now: i64, static_interval_seconds: i64) -> i64 {
        match self {
            ExpirationPolicy::Timed { utc_expiry } => *utc_expiry,
            ExpirationPolicy::Sliding { interval_seconds } => now + interval_seconds,
            ExpirationPolicy::Static => now + static_interval_seconds,
        }
    }

    /// Whether a successful `Get` against an entry with this policy bumps
    /// `utc_expiry` (spec §3.2 invariants 3-5: static and sliding bump,
    /// timed does not).
    pub fn bumps_on_read(interval_seconds: i64) -> bool {
        interval_seconds > 0
    }
}

/// Whether a count/clear/enumeration scope considers expired rows absent
/// (the normal visibility rule, spec §3.2 invariant 2) or includes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountMode {
    /// Only rows with `utc_expiry >= now` are visible.
    ConsiderExpiry,
    /// Every row in scope is visible, expired or not.
    IgnoreExpiry,
}

/// A persisted cache row (spec §3.1). This is both the SQL-backend
/// representation and the in-memory engine's representation, so the two
/// engines agree on a single shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub hash: i64,
    pub partition: String,
    pub key: String,
    pub utc_creation: i64,
    pub utc_expiry: i64,
    pub interval: i64,
    pub value: Vec<u8>,
    pub compressed: bool,
    /// Up to [`MAX_PARENT_KEY_COUNT`] advisory parent references; absent
    /// slots are `None`.
    pub parents: Vec<Option<ParentRef>>,
}

impl CacheEntry {
    /// True iff `utc_expiry >= now` (spec §3.2 invariant 2).
    pub fn is_valid_at(&self, now: i64) -> bool {
        self.utc_expiry >= now
    }

    /// The byte length of `value`, as used by `GetCacheSizeInBytes` (spec
    /// §4.1) — expired rows are deliberately not excluded here; the size
    /// accounting counts everything, matching the documented source
    /// behavior (spec §9 open question (b)).
    pub fn size_in_bytes(&self) -> i64 {
        self.value.len() as i64
    }

    pub fn non_null_parent_count(&self) -> usize {
        self.parents.iter().filter(|p| p.is_some()).count()
    }
}

/// A narrow projection of [`CacheEntry`] returned by the `Get`/`Peek` fast
/// paths (spec §3.1) — callers of `Get<T>`/`Peek<T>` never need the
/// identity or parent columns, only enough to decode the value and decide
/// whether/how to bump expiry.
#[derive(Debug, Clone)]
pub struct CacheValue {
    pub utc_expiry: i64,
    pub interval: i64,
    pub value: Vec<u8>,
    pub compressed: bool,
}

impl From<&CacheEntry> for CacheValue {
    fn from(e: &CacheEntry) -> Self {
        CacheValue {
            utc_expiry: e.utc_expiry,
            interval: e.interval,
            value: e.value.clone(),
            compressed: e.compressed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timed_policy_stores_interval_zero() {
        let p = ExpirationPolicy::Timed { utc_expiry: 500 };
        assert_eq!(p.interval_seconds(86_400), 0);
        assert_eq!(p.initial_expiry(100, 86_400), 500);
    }

    #[test]
    fn sliding_policy_uses_caller_interval() {
        let p = ExpirationPolicy::Sliding {
            interval_seconds: 30,
        };
        assert_eq!(p.interval_seconds(86_400), 30);
        assert_eq!(p.initial_expiry(100, 86_400), 130);
    }

    #[test]
    fn static_policy_uses_deployment_interval() {
        let p = ExpirationPolicy::Static;
        assert_eq!(p.interval_seconds(86_400), 86_400);
        assert_eq!(p.initial_expiry(100, 86_400), 86_500);
    }

    #[test]
    fn bumps_on_read_is_false_only_for_zero_interval() {
        assert!(!ExpirationPolicy::bumps_on_read(0));
        assert!(ExpirationPolicy::bumps_on_read(1));
        assert!(ExpirationPolicy::bumps_on_read(86_400));
    }

    #[test]
    fn validity_is_inclusive_of_now() {
        let entry = CacheEntry {
            hash: 1,
            partition: "P".into(),
            key: "K".into(),
            utc_creation: 0,
            utc_expiry: 100,
            interval: 0,
            value: vec![1, 2, 3],
            compressed: false,
            parents: vec![],
        };
        assert!(entry.is_valid_at(100));
        assert!(entry.is_valid_at(99));
        assert!(!entry.is_valid_at(101));
    }
}
