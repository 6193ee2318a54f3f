use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error};

use crate::error::{CacheError, CacheResult};
use crate::statistics::CacheStatistics;
use crate::traits::CacheKey;

/// Separator used when rendering node paths.
pub const PATH_SEPARATOR: char = '/';

type InFlight<V> = Shared<BoxFuture<'static, CacheResult<V>>>;

/// Value slot of a node.
enum Slot<V> {
    Empty,
    /// A computation is running; `previous` is restored if it fails.
    Pending {
        generation: u64,
        computation: InFlight<V>,
        previous: Option<V>,
    },
    Ready(V),
}

/// State shared by all nodes of one cache tree.
struct TreeState {
    statistics: Arc<CacheStatistics>,
    deduplicate: bool,
    generation: AtomicU64,
}

impl TreeState {
    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed) + 1
    }
}

struct NodeInner<V> {
    key: Option<String>,
    path: String,
    parent: Option<Weak<NodeInner<V>>>,
    slot: Mutex<Slot<V>>,
    children: RwLock<HashMap<String, Arc<NodeInner<V>>>>,
    tree: Arc<TreeState>,
}

impl<V> NodeInner<V> {
    fn root(tree: Arc<TreeState>) -> Self {
        Self {
            key: None,
            path: String::new(),
            parent: None,
            slot: Mutex::new(Slot::Empty),
            children: RwLock::new(HashMap::new()),
            tree,
        }
    }

    fn child(parent: &Arc<NodeInner<V>>, key: String) -> Self {
        let path = if parent.key.is_none() {
            key.clone()
        } else {
            format!("{}{}{}", parent.path, PATH_SEPARATOR, key)
        };
        Self {
            key: Some(key),
            path,
            parent: Some(Arc::downgrade(parent)),
            slot: Mutex::new(Slot::Empty),
            children: RwLock::new(HashMap::new()),
            tree: parent.tree.clone(),
        }
    }
}

/// Handle to one addressable point in a [`HierarchicalCache`].
///
/// Handles are cheap to clone. A handle to a node that has since been removed
/// with [`CacheNode::delete_key`] stays usable but is detached: nothing it
/// stores is visible from the root any more.
pub struct CacheNode<V> {
    inner: Arc<NodeInner<V>>,
}

impl<V> Clone for CacheNode<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<V> fmt::Debug for CacheNode<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheNode")
            .field("path", &self.inner.path)
            .finish()
    }
}

impl<V> CacheNode<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Returns the child node for `key`, creating an empty one if absent.
    pub fn key<K: CacheKey + ?Sized>(&self, key: &K) -> CacheNode<V> {
        let key = key.cache_key();
        if let Some(child) = self.inner.children.read().get(&key) {
            return CacheNode {
                inner: child.clone(),
            };
        }

        let mut children = self.inner.children.write();
        let child = children
            .entry(key)
            .or_insert_with_key(|key| Arc::new(NodeInner::child(&self.inner, key.clone())))
            .clone();
        CacheNode { inner: child }
    }

    /// Returns the child node for `key` without creating it.
    pub fn child<K: CacheKey + ?Sized>(&self, key: &K) -> Option<CacheNode<V>> {
        self.inner
            .children
            .read()
            .get(&key.cache_key())
            .map(|inner| CacheNode {
                inner: inner.clone(),
            })
    }

    /// Walks `keys` from this node, creating missing nodes on the way.
    pub fn descend<K: CacheKey>(&self, keys: &[K]) -> CacheNode<V> {
        keys.iter().fold(self.clone(), |node, key| node.key(key))
    }

    /// Path of this node from the root, segments joined by `/`.
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// The key under which this node is stored in its parent; `None` for the root.
    pub fn key_name(&self) -> Option<&str> {
        self.inner.key.as_deref()
    }

    pub fn is_root(&self) -> bool {
        self.inner.parent.is_none()
    }

    /// Returns the stored value without waiting for an in-flight computation.
    pub fn peek(&self) -> Option<V> {
        match &*self.inner.slot.lock() {
            Slot::Ready(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// True when a resolved value is stored at this node.
    pub fn has_value(&self) -> bool {
        matches!(&*self.inner.slot.lock(), Slot::Ready(_))
    }

    /// True while a computation for this node is in flight.
    pub fn is_pending(&self) -> bool {
        matches!(&*self.inner.slot.lock(), Slot::Pending { .. })
    }

    /// Resolves with the stored value.
    ///
    /// If a computation is in flight the caller waits for it; otherwise an
    /// absent value is reported as [`CacheError::NotFound`]. Never starts a
    /// computation.
    pub async fn get(&self) -> CacheResult<V> {
        let tree = &self.inner.tree;
        let (generation, computation) = {
            let slot = self.inner.slot.lock();
            match &*slot {
                Slot::Ready(value) => {
                    tree.statistics.record_hit();
                    return Ok(value.clone());
                }
                Slot::Pending {
                    generation,
                    computation,
                    ..
                } => {
                    tree.statistics.record_join();
                    (*generation, computation.clone())
                }
                Slot::Empty => {
                    tree.statistics.record_miss();
                    return Err(CacheError::NotFound(self.inner.path.clone()));
                }
            }
        };
        self.settle(generation, computation).await
    }

    /// Stores `value` immediately, replacing whatever was there.
    pub fn set_value(&self, value: V) {
        *self.inner.slot.lock() = Slot::Ready(value);
        self.inner.tree.statistics.record_store();
    }

    /// Resolves `provider` and stores its value at this node.
    ///
    /// If the provider fails nothing is stored, any previous value is kept and
    /// the error is returned.
    pub async fn set<Fut>(&self, provider: Fut) -> CacheResult<V>
    where
        Fut: Future<Output = CacheResult<V>> + Send + 'static,
    {
        if !self.inner.tree.deduplicate {
            let value = provider.await?;
            self.set_value(value.clone());
            return Ok(value);
        }

        let generation = self.inner.tree.next_generation();
        let computation = provider.boxed().shared();
        {
            let mut slot = self.inner.slot.lock();
            let previous = match std::mem::replace(&mut *slot, Slot::Empty) {
                Slot::Ready(value) => Some(value),
                Slot::Pending { previous, .. } => previous,
                Slot::Empty => None,
            };
            *slot = Slot::Pending {
                generation,
                computation: computation.clone(),
                previous,
            };
        }
        self.settle(generation, computation).await
    }

    /// Returns the stored value, or computes it with `provider` on a miss.
    ///
    /// With deduplication enabled, a caller arriving while another caller's
    /// computation is still pending waits on that computation instead of
    /// invoking `provider` again.
    pub async fn get_or_set<F, Fut>(&self, provider: F) -> CacheResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<V>> + Send + 'static,
    {
        let tree = self.inner.tree.clone();
        if !tree.deduplicate {
            match self.get().await {
                Ok(value) => return Ok(value),
                Err(CacheError::NotFound(path)) => debug!("Cache miss at '{}'", path),
                Err(e) => return Err(e),
            }
            let value = provider().await?;
            self.set_value(value.clone());
            return Ok(value);
        }

        if let Some(found) = self.ready_or_pending() {
            return match found {
                Ok(value) => Ok(value),
                Err((generation, computation)) => self.settle(generation, computation).await,
            };
        }

        tree.statistics.record_miss();
        debug!("Cache miss at '{}'", self.inner.path);

        // The provider is invoked outside the lock; another caller may have
        // installed a computation in the meantime.
        let candidate = provider().boxed().shared();
        let (generation, computation) = {
            let mut slot = self.inner.slot.lock();
            let existing = match &*slot {
                Slot::Ready(value) => return Ok(value.clone()),
                Slot::Pending {
                    generation,
                    computation,
                    ..
                } => Some((*generation, computation.clone())),
                Slot::Empty => None,
            };
            match existing {
                Some(in_flight) => {
                    tree.statistics.record_join();
                    in_flight
                }
                None => {
                    let generation = tree.next_generation();
                    *slot = Slot::Pending {
                        generation,
                        computation: candidate.clone(),
                        previous: None,
                    };
                    (generation, candidate)
                }
            }
        };
        self.settle(generation, computation).await
    }

    /// Clears the stored value; children are untouched.
    pub fn delete_value(&self) {
        let previous = std::mem::replace(&mut *self.inner.slot.lock(), Slot::Empty);
        if !matches!(previous, Slot::Empty) {
            self.inner.tree.statistics.record_invalidation();
            debug!("Deleted value at '{}'", self.inner.path);
        }
    }

    /// Removes this node, its value and its whole subtree from its parent.
    ///
    /// Fails with [`CacheError::RootDeletion`] on the root.
    pub fn delete_key(&self) -> CacheResult<()> {
        let Some(parent) = &self.inner.parent else {
            error!("Attempted to delete the root cache node");
            return Err(CacheError::RootDeletion);
        };
        let (Some(parent), Some(key)) = (parent.upgrade(), self.inner.key.as_ref()) else {
            return Ok(());
        };

        let mut children = parent.children.write();
        let is_current = children
            .get(key)
            .is_some_and(|child| Arc::ptr_eq(child, &self.inner));
        if is_current {
            children.remove(key);
            self.inner.tree.statistics.record_invalidation();
            debug!("Deleted key '{}'", self.inner.path);
        }
        Ok(())
    }

    /// Keys of the direct children of this node, sorted.
    pub fn key_array(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.children.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn ready_or_pending(&self) -> Option<Result<V, (u64, InFlight<V>)>> {
        let statistics = &self.inner.tree.statistics;
        match &*self.inner.slot.lock() {
            Slot::Ready(value) => {
                statistics.record_hit();
                Some(Ok(value.clone()))
            }
            Slot::Pending {
                generation,
                computation,
                ..
            } => {
                statistics.record_join();
                Some(Err((*generation, computation.clone())))
            }
            Slot::Empty => None,
        }
    }

    /// Awaits an in-flight computation and, if this node still holds that
    /// exact computation, records its outcome.
    async fn settle(&self, generation: u64, computation: InFlight<V>) -> CacheResult<V> {
        let result = computation.await;

        let mut slot = self.inner.slot.lock();
        let owns_slot = matches!(
            &*slot,
            Slot::Pending { generation: current, .. } if *current == generation
        );
        if owns_slot {
            let previous = match std::mem::replace(&mut *slot, Slot::Empty) {
                Slot::Pending { previous, .. } => previous,
                _ => None,
            };
            *slot = match &result {
                Ok(value) => {
                    self.inner.tree.statistics.record_store();
                    Slot::Ready(value.clone())
                }
                Err(e) => {
                    debug!("Computation at '{}' failed: {}", self.inner.path, e);
                    previous.map_or(Slot::Empty, Slot::Ready)
                }
            };
        }
        result
    }

    fn collect_paths(&self, out: &mut Vec<String>) {
        if self.has_value() {
            out.push(self.inner.path.clone());
        }
        let children: Vec<CacheNode<V>> = self
            .inner
            .children
            .read()
            .values()
            .map(|inner| CacheNode {
                inner: inner.clone(),
            })
            .collect();
        for child in children {
            child.collect_paths(out);
        }
    }
}

/// A keyed tree of memoized values.
///
/// The cache knows nothing about entities or remote calls; callers address
/// nodes with [`CacheNode::key`] and memoize with [`CacheNode::get_or_set`].
pub struct HierarchicalCache<V> {
    root: CacheNode<V>,
    statistics: Arc<CacheStatistics>,
}

impl<V> HierarchicalCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates an empty cache that deduplicates in-flight computations.
    pub fn new() -> Self {
        Self::with_deduplication(true)
    }

    /// Creates an empty cache; with `deduplicate == false` concurrent misses
    /// on the same node each run their own provider.
    pub fn with_deduplication(deduplicate: bool) -> Self {
        let statistics = Arc::new(CacheStatistics::new());
        let tree = Arc::new(TreeState {
            statistics: statistics.clone(),
            deduplicate,
            generation: AtomicU64::new(0),
        });
        Self {
            root: CacheNode {
                inner: Arc::new(NodeInner::root(tree)),
            },
            statistics,
        }
    }

    pub fn root(&self) -> &CacheNode<V> {
        &self.root
    }

    /// Shorthand for `root().key(key)`.
    pub fn key<K: CacheKey + ?Sized>(&self, key: &K) -> CacheNode<V> {
        self.root.key(key)
    }

    /// Returns the node at `keys` if every segment already exists.
    pub fn lookup<K: CacheKey>(&self, keys: &[K]) -> Option<CacheNode<V>> {
        keys.iter()
            .try_fold(self.root.clone(), |node, key| node.child(key))
    }

    pub fn statistics(&self) -> &CacheStatistics {
        &self.statistics
    }

    /// Paths of every node currently holding a resolved value, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        self.root.collect_paths(&mut paths);
        paths.sort();
        paths
    }

    /// Drops every node below the root.
    pub fn clear(&self) {
        let removed = std::mem::take(&mut *self.root.inner.children.write());
        if !removed.is_empty() {
            self.statistics.record_invalidation();
            debug!("Cleared {} top-level cache keys", removed.len());
        }
    }
}

impl<V> Default for HierarchicalCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
