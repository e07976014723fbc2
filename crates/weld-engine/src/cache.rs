//! Evaluation-result caching.
//!
//! The engine consumes caching through the narrow [`EvalCache`] interface;
//! eviction strategies live outside. A cached entry stores the raw
//! (pre-negation) node outcome together with the side-channel snapshot the
//! computation produced, so a hit restores parsed arguments and captures
//! without re-running the extractor; extractor side effects only occur on
//! miss.
//!
//! Storage failures must degrade to cache-miss behavior, never to an
//! evaluation failure.

use std::collections::HashMap;

use parking_lot::RwLock;

use weld_core::Value;

use crate::eval::SideState;
use crate::expr::Operator;

/// Full cache key of one binary-node evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// The field whose extraction is being cached.
    pub field: String,
    /// The relational operator.
    pub op: Operator,
    /// Fingerprint of the right-hand operand.
    pub rhs: String,
    /// The event-derived component produced by the field's
    /// [`CachePolicy`](crate::field::CachePolicy).
    pub scope: Value,
}

/// A cached node outcome plus its side-channel snapshot.
#[derive(Debug, Clone)]
pub struct CachedVerdict {
    /// Raw node value, before negation.
    pub value: Value,
    /// Side-channel context produced by the original computation.
    pub side: SideState,
}

/// Narrow storage interface the evaluator talks to.
pub trait EvalCache: Send + Sync {
    /// Looks up a cached verdict. Failures surface as `None`.
    fn get(&self, key: &CacheKey) -> Option<CachedVerdict>;

    /// Stores a verdict. Failures are silently dropped.
    fn put(&self, key: CacheKey, verdict: CachedVerdict);
}

/// Unbounded in-process cache.
///
/// Suitable for tests and single-process deployments; deployments with
/// eviction requirements plug their own [`EvalCache`] in.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<CacheKey, CachedVerdict>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl EvalCache for MemoryCache {
    fn get(&self, key: &CacheKey) -> Option<CachedVerdict> {
        self.entries.read().get(key).cloned()
    }

    fn put(&self, key: CacheKey, verdict: CachedVerdict) {
        self.entries.write().insert(key, verdict);
    }
}

/// A cache that never hits; useful to disable caching wholesale.
pub struct NoCache;

impl EvalCache for NoCache {
    fn get(&self, _key: &CacheKey) -> Option<CachedVerdict> {
        None
    }

    fn put(&self, _key: CacheKey, _verdict: CachedVerdict) {}
}
