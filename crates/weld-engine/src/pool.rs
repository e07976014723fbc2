//! Handler pools: ordered, O(1)-removable registries of (expression,
//! handler) entries.
//!
//! A pool keeps registration order in a doubly-linked node arena and
//! maintains two indexes: token → node for targeted removal, and
//! expression identity → nodes for bulk removal (one-shot cleanup and
//! reload-time mass clearing). Iteration snapshots newest-first, so later
//! registrations take precedence over older, broader ones.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;

use weld_core::Event;

use crate::expr::Expr;
use crate::extract::BoxedHandler;

/// Identity of one pool entry.
pub type Token = u64;

/// An async hook run in the handler's task, before the handler itself.
pub type PreHook = Arc<dyn Fn(Arc<Event>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Registration metadata attached to a pool entry.
#[derive(Clone, Default)]
pub struct Attach {
    /// The module that registered the handler, for logs and help.
    pub module: Option<String>,
    /// Hook run before the handler in the same task.
    pub pre_hook: Option<PreHook>,
    /// Forces an event deep copy even without dynamic operators.
    pub needs_isolation: bool,
    /// Whether the handler sees prefix-stripped message text (`false`
    /// restores the raw text view).
    pub uses_global_prefix: bool,
    /// Survives reload-time mass clearing.
    pub pinned: bool,
    /// Per-clause evaluation tracing.
    pub debug: bool,
    /// Usage line recorded in the help index.
    pub help: Option<String>,
}

impl std::fmt::Debug for Attach {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attach")
            .field("module", &self.module)
            .field("has_pre_hook", &self.pre_hook.is_some())
            .field("needs_isolation", &self.needs_isolation)
            .field("uses_global_prefix", &self.uses_global_prefix)
            .field("pinned", &self.pinned)
            .finish()
    }
}

/// One registered (expression, handler) pair.
#[derive(Clone)]
pub struct PoolEntry {
    /// The compiled condition; shared, its pointer is the bulk-removal key.
    pub key: Arc<Expr>,
    pub handler: BoxedHandler,
    pub token: Token,
    pub attach: Attach,
}

struct Node {
    entry: PoolEntry,
    prev: Option<Token>,
    next: Option<Token>,
}

/// The ordered registry of one (category, context-needs) bucket.
#[derive(Default)]
pub struct HandlerPool {
    nodes: HashMap<Token, Node>,
    /// Oldest entry.
    head: Option<Token>,
    /// Newest entry.
    tail: Option<Token>,
    by_key: HashMap<usize, Vec<Token>>,
}

fn key_identity(key: &Arc<Expr>) -> usize {
    Arc::as_ptr(key) as usize
}

impl HandlerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry in registration order.
    pub fn push(&mut self, entry: PoolEntry) {
        let token = entry.token;
        self.by_key.entry(key_identity(&entry.key)).or_default().push(token);
        let node = Node {
            entry,
            prev: self.tail,
            next: None,
        };
        if let Some(tail) = self.tail {
            if let Some(prev_node) = self.nodes.get_mut(&tail) {
                prev_node.next = Some(token);
            }
        } else {
            self.head = Some(token);
        }
        self.tail = Some(token);
        self.nodes.insert(token, node);
    }

    /// Unlinks one entry by token.
    pub fn remove(&mut self, token: Token) -> Option<PoolEntry> {
        let node = self.nodes.remove(&token)?;
        match node.prev {
            Some(prev) => {
                if let Some(prev_node) = self.nodes.get_mut(&prev) {
                    prev_node.next = node.next;
                }
            }
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => {
                if let Some(next_node) = self.nodes.get_mut(&next) {
                    next_node.prev = node.prev;
                }
            }
            None => self.tail = node.prev,
        }
        let identity = key_identity(&node.entry.key);
        if let Some(tokens) = self.by_key.get_mut(&identity) {
            tokens.retain(|t| *t != token);
            if tokens.is_empty() {
                self.by_key.remove(&identity);
            }
        }
        Some(node.entry)
    }

    /// Removes every entry sharing `key` (by identity).
    pub fn remove_by_key(&mut self, key: &Arc<Expr>) -> Vec<PoolEntry> {
        let tokens = self.by_key.remove(&key_identity(key)).unwrap_or_default();
        tokens.into_iter().filter_map(|t| self.remove(t)).collect()
    }

    /// Removes every entry not marked pinned; returns how many were
    /// dropped. Used for reload-time mass clearing.
    pub fn clear_unpinned(&mut self) -> usize {
        let doomed: Vec<Token> = self
            .nodes
            .values()
            .filter(|n| !n.entry.attach.pinned)
            .map(|n| n.entry.token)
            .collect();
        let count = doomed.len();
        for token in doomed {
            self.remove(token);
        }
        count
    }

    /// A stable snapshot, newest registration first.
    pub fn snapshot_newest_first(&self) -> Vec<PoolEntry> {
        let mut entries = Vec::with_capacity(self.nodes.len());
        let mut cursor = self.tail;
        while let Some(token) = cursor {
            let node = &self.nodes[&token];
            entries.push(node.entry.clone());
            cursor = node.prev;
        }
        entries
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, token: Token) -> bool {
        self.nodes.contains_key(&token)
    }

    pub fn get(&self, token: Token) -> Option<&PoolEntry> {
        self.nodes.get(&token).map(|node| &node.entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::always;
    use std::sync::Arc;

    fn entry(token: Token, key: &Arc<Expr>, pinned: bool) -> PoolEntry {
        PoolEntry {
            key: Arc::clone(key),
            handler: Arc::new(|_| Box::pin(async {})),
            token,
            attach: Attach {
                pinned,
                uses_global_prefix: true,
                ..Attach::default()
            },
        }
    }

    #[test]
    fn snapshot_is_newest_first() {
        let key = Arc::new(always());
        let mut pool = HandlerPool::new();
        for token in 1..=3 {
            pool.push(entry(token, &key, false));
        }
        let order: Vec<Token> =
            pool.snapshot_newest_first().iter().map(|e| e.token).collect();
        assert_eq!(order, vec![3, 2, 1]);
    }

    #[test]
    fn remove_relinks_neighbors() {
        let key = Arc::new(always());
        let mut pool = HandlerPool::new();
        for token in 1..=3 {
            pool.push(entry(token, &key, false));
        }
        assert!(pool.remove(2).is_some());
        assert!(pool.remove(2).is_none());
        let order: Vec<Token> =
            pool.snapshot_newest_first().iter().map(|e| e.token).collect();
        assert_eq!(order, vec![3, 1]);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn remove_head_and_tail() {
        let key = Arc::new(always());
        let mut pool = HandlerPool::new();
        for token in 1..=3 {
            pool.push(entry(token, &key, false));
        }
        pool.remove(1);
        pool.remove(3);
        let order: Vec<Token> =
            pool.snapshot_newest_first().iter().map(|e| e.token).collect();
        assert_eq!(order, vec![2]);
    }

    #[test]
    fn remove_by_key_takes_all_sharers() {
        let shared = Arc::new(always());
        let other = Arc::new(always());
        let mut pool = HandlerPool::new();
        pool.push(entry(1, &shared, false));
        pool.push(entry(2, &other, false));
        pool.push(entry(3, &shared, false));

        let removed = pool.remove_by_key(&shared);
        assert_eq!(removed.len(), 2);
        assert_eq!(pool.len(), 1);
        assert!(pool.contains(2));
    }

    #[test]
    fn clear_unpinned_keeps_pinned_entries() {
        let key = Arc::new(always());
        let mut pool = HandlerPool::new();
        pool.push(entry(1, &key, false));
        pool.push(entry(2, &key, true));
        pool.push(entry(3, &key, false));

        assert_eq!(pool.clear_unpinned(), 2);
        assert_eq!(pool.len(), 1);
        assert!(pool.contains(2));
    }
}
