//! Live collections kept consistent with the entity notification stream.
//!
//! A [`LiveCollection`] starts in [`TrackerState::Loading`], becomes
//! [`TrackerState::Ready`] after its initial load and from then on reconciles
//! every event against its current items:
//!
//! 1. every item is offered to [`Updater::update`]; a replacement that no
//!    longer passes the filters removes the item,
//! 2. only if no item was touched, [`Updater::insert`] may produce a new item,
//!    which is prepended when it passes the filters,
//! 3. on any change the items are re-sorted and a new snapshot is published.
//!
//! Snapshots go out through a `tokio::sync::watch` channel, so a view that
//! repaints on `changed()` sees a burst of events as one update.

use std::cmp::Ordering;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{CacheError, CacheResult};
use crate::invalidation::OperationType;
use crate::listener::{EntityNotification, NotificationHandler};
use crate::traits::{EntityId, HasPrimaryKey};

/// Lifecycle of a live collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Loading,
    Ready,
}

/// What an event means for one existing item.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome<T> {
    /// The item changed; the candidate replaces it if it still passes the filters.
    Replace(T),
    /// The item must leave the collection.
    Delete,
    /// The event does not concern this item.
    Unchanged,
}

/// Decides how an event affects a collection.
pub trait Updater<T, E>: Send + Sync {
    fn update(&self, existing: &T, event: &E) -> CacheResult<ReconcileOutcome<T>>;

    fn insert(&self, event: &E) -> CacheResult<Option<T>>;
}

/// [`Updater`] built from two infallible closures.
pub struct FnUpdater<U, I> {
    update: U,
    insert: I,
}

impl<U, I> FnUpdater<U, I> {
    pub fn new(update: U, insert: I) -> Self {
        Self { update, insert }
    }
}

impl<T, E, U, I> Updater<T, E> for FnUpdater<U, I>
where
    U: Fn(&T, &E) -> ReconcileOutcome<T> + Send + Sync,
    I: Fn(&E) -> Option<T> + Send + Sync,
{
    fn update(&self, existing: &T, event: &E) -> CacheResult<ReconcileOutcome<T>> {
        Ok((self.update)(existing, event))
    }

    fn insert(&self, event: &E) -> CacheResult<Option<T>> {
        Ok((self.insert)(event))
    }
}

/// Membership predicate; an item stays only while every filter accepts it.
pub type Filter<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

type Comparator<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// What a view sees of a collection.
#[derive(Debug, Clone)]
pub struct CollectionSnapshot<T> {
    pub state: TrackerState,
    pub items: Arc<Vec<T>>,
    /// Incremented on every published change
    pub revision: u64,
    pub updated_at: DateTime<Utc>,
}

struct CollectionState<T> {
    state: TrackerState,
    items: Arc<Vec<T>>,
    revision: u64,
}

/// Builder for [`LiveCollection`].
pub struct LiveCollectionBuilder<T, E> {
    updater: Arc<dyn Updater<T, E>>,
    filters: Vec<Filter<T>>,
    order: Option<Comparator<T>>,
}

impl<T, E> LiveCollectionBuilder<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: 'static,
{
    /// Add a membership predicate
    pub fn filter(mut self, filter: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Keep items ordered by `key`, ascending
    pub fn sort_by_key<K: Ord + 'static>(mut self, key: impl Fn(&T) -> K + Send + Sync + 'static) -> Self {
        self.order = Some(Arc::new(move |a: &T, b: &T| key(a).cmp(&key(b))));
        self
    }

    /// Keep items ordered by `compare`
    pub fn sort_by(mut self, compare: impl Fn(&T, &T) -> Ordering + Send + Sync + 'static) -> Self {
        self.order = Some(Arc::new(compare));
        self
    }

    pub fn build(self) -> LiveCollection<T, E> {
        let (sender, _) = watch::channel(CollectionSnapshot {
            state: TrackerState::Loading,
            items: Arc::new(Vec::new()),
            revision: 0,
            updated_at: Utc::now(),
        });
        LiveCollection {
            id: Uuid::new_v4(),
            filters: self.filters,
            updater: self.updater,
            order: self.order,
            inner: RwLock::new(CollectionState {
                state: TrackerState::Loading,
                items: Arc::new(Vec::new()),
                revision: 0,
            }),
            sender,
        }
    }
}

/// An in-memory collection mirroring "all entities matching the filters".
///
/// Items are only ever changed by [`LiveCollection::load`] and
/// [`LiveCollection::apply`]; each change is published as a fresh `Arc`, so
/// readers never observe a half-applied event.
pub struct LiveCollection<T, E> {
    id: Uuid,
    filters: Vec<Filter<T>>,
    updater: Arc<dyn Updater<T, E>>,
    order: Option<Comparator<T>>,
    inner: RwLock<CollectionState<T>>,
    sender: watch::Sender<CollectionSnapshot<T>>,
}

impl<T, E> LiveCollection<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: 'static,
{
    pub fn builder(updater: impl Updater<T, E> + 'static) -> LiveCollectionBuilder<T, E> {
        LiveCollectionBuilder {
            updater: Arc::new(updater),
            filters: Vec::new(),
            order: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> TrackerState {
        self.inner.read().state
    }

    /// Current items; the same `Arc` is returned until the next change.
    pub fn items(&self) -> Arc<Vec<T>> {
        self.inner.read().items.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().items.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.inner.read().revision
    }

    /// Receiver notified after each published change.
    pub fn subscribe(&self) -> watch::Receiver<CollectionSnapshot<T>> {
        self.sender.subscribe()
    }

    /// True when `item` passes every filter.
    pub fn accepts(&self, item: &T) -> bool {
        self.filters.iter().all(|filter| filter(item))
    }

    /// Runs the initial load.
    ///
    /// On failure the collection stays in `Loading` and the error is returned;
    /// nothing retries on its own. Loading a collection that is already
    /// `Ready` is an error, including when a concurrent load finished first.
    pub async fn load<Fut>(&self, loader: Fut) -> CacheResult<usize>
    where
        Fut: Future<Output = CacheResult<Vec<T>>>,
    {
        if self.state() == TrackerState::Ready {
            return Err(self.already_loaded());
        }

        let loaded = match loader.await {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!("Initial load of collection {} failed: {}", self.id, e);
                return Err(e);
            }
        };

        let total = loaded.len();
        let mut items: Vec<T> = loaded.into_iter().filter(|item| self.accepts(item)).collect();
        self.sort(&mut items);
        let kept = items.len();

        let mut inner = self.inner.write();
        if inner.state == TrackerState::Ready {
            warn!("Collection {} was loaded concurrently, result dropped", self.id);
            return Err(self.already_loaded());
        }
        inner.state = TrackerState::Ready;
        inner.items = Arc::new(items);
        inner.revision += 1;
        self.publish(&inner);
        debug!(
            "Collection {} ready with {} of {} loaded items",
            self.id, kept, total
        );
        Ok(kept)
    }

    /// Reconciles one event; returns whether the items changed.
    ///
    /// Events that arrive before the initial load completes are ignored. If
    /// the updater fails, the items are left exactly as they were. The
    /// updater, filters and sort order run without holding the collection
    /// lock, so they may read the collection themselves.
    pub fn apply(&self, event: &E) -> CacheResult<bool> {
        loop {
            let Some((items, revision)) = self.ready_items() else {
                debug!("Collection {} still loading, event ignored", self.id);
                return Ok(false);
            };
            let Some(next) = self.reconcile(&items, event)? else {
                return Ok(false);
            };
            if self.commit(revision, next) {
                return Ok(true);
            }
            debug!("Collection {} changed during reconciliation, retrying", self.id);
        }
    }

    fn already_loaded(&self) -> CacheError {
        CacheError::OperationFailed(format!("collection {} is already loaded", self.id))
    }

    /// Current items and revision, or `None` while loading.
    fn ready_items(&self) -> Option<(Arc<Vec<T>>, u64)> {
        let inner = self.inner.read();
        (inner.state == TrackerState::Ready).then(|| (inner.items.clone(), inner.revision))
    }

    /// The items after `event`, or `None` when the event changes nothing.
    fn reconcile(&self, items: &[T], event: &E) -> CacheResult<Option<Vec<T>>> {
        let mut outcomes = Vec::new();
        for (position, item) in items.iter().enumerate() {
            match self.updater.update(item, event)? {
                ReconcileOutcome::Unchanged => {}
                outcome => outcomes.push((position, outcome)),
            }
        }

        let mut next = if outcomes.is_empty() {
            match self.updater.insert(event)? {
                Some(candidate) if self.accepts(&candidate) => {
                    let mut next = Vec::with_capacity(items.len() + 1);
                    next.push(candidate);
                    next.extend(items.iter().cloned());
                    next
                }
                _ => return Ok(None),
            }
        } else {
            self.rebuild(items, outcomes)
        };

        self.sort(&mut next);
        Ok(Some(next))
    }

    /// Publishes `next` unless another change landed after `revision` was read.
    fn commit(&self, revision: u64, next: Vec<T>) -> bool {
        let mut inner = self.inner.write();
        if inner.revision != revision {
            return false;
        }
        inner.items = Arc::new(next);
        inner.revision += 1;
        self.publish(&inner);
        true
    }

    fn rebuild(&self, items: &[T], outcomes: Vec<(usize, ReconcileOutcome<T>)>) -> Vec<T> {
        let mut next = Vec::with_capacity(items.len());
        let mut outcomes = outcomes.into_iter().peekable();

        for (position, item) in items.iter().enumerate() {
            let outcome = match outcomes.peek() {
                Some((touched, _)) if *touched == position => outcomes.next().map(|(_, o)| o),
                _ => None,
            };
            match outcome {
                None | Some(ReconcileOutcome::Unchanged) => next.push(item.clone()),
                Some(ReconcileOutcome::Replace(candidate)) => {
                    if self.accepts(&candidate) {
                        next.push(candidate);
                    }
                }
                Some(ReconcileOutcome::Delete) => {}
            }
        }
        next
    }

    fn sort(&self, items: &mut [T]) {
        if let Some(order) = &self.order {
            items.sort_by(|a, b| order(a, b));
        }
    }

    fn publish(&self, inner: &CollectionState<T>) {
        self.sender.send_replace(CollectionSnapshot {
            state: inner.state,
            items: inner.items.clone(),
            revision: inner.revision,
            updated_at: Utc::now(),
        });
    }
}

impl<T, E> LiveCollection<T, E>
where
    T: HasPrimaryKey + Clone + Send + Sync + 'static,
    E: 'static,
{
    /// Drops the item identified by `id`; returns whether it was present.
    ///
    /// Ignored while loading, like any other event.
    pub fn remove(&self, id: &EntityId) -> bool {
        loop {
            let Some((items, revision)) = self.ready_items() else {
                return false;
            };
            if !items.iter().any(|item| &item.primary_key() == id) {
                return false;
            }
            let next = items
                .iter()
                .filter(|item| &item.primary_key() != id)
                .cloned()
                .collect();
            if self.commit(revision, next) {
                debug!("Collection {} dropped deleted item {}", self.id, id);
                return true;
            }
        }
    }
}

/// Feeds events to every live collection registered with it.
///
/// Collections are independent: a failing updater aborts the event for that
/// collection only.
pub struct LiveCollectionTracker<T, E> {
    collections: RwLock<Vec<Arc<LiveCollection<T, E>>>>,
}

impl<T, E> Default for LiveCollectionTracker<T, E> {
    fn default() -> Self {
        Self {
            collections: RwLock::new(Vec::new()),
        }
    }
}

impl<T, E> LiveCollectionTracker<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a collection; returns the handle used to untrack it.
    pub fn track(&self, collection: Arc<LiveCollection<T, E>>) -> Uuid {
        let id = collection.id();
        self.collections.write().push(collection);
        debug!("Tracking collection {}", id);
        id
    }

    /// Stop feeding a collection, typically when its view is torn down.
    pub fn untrack(&self, id: Uuid) -> bool {
        let mut collections = self.collections.write();
        let before = collections.len();
        collections.retain(|collection| collection.id() != id);
        before != collections.len()
    }

    pub fn len(&self) -> usize {
        self.collections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.read().is_empty()
    }

    /// Reconciles `event` against every collection; returns how many changed.
    pub fn on_event(&self, event: &E) -> usize {
        let collections: Vec<_> = self.collections.read().clone();
        let mut changed = 0;
        for collection in collections {
            match collection.apply(event) {
                Ok(true) => changed += 1,
                Ok(false) => {}
                Err(e) => warn!("Collection {} skipped an event: {}", collection.id(), e),
            }
        }
        changed
    }
}

impl<T, E> LiveCollectionTracker<T, E>
where
    T: HasPrimaryKey + Clone + Send + Sync + 'static,
    E: 'static,
{
    /// Drops the entity `id` from every collection; returns how many held it.
    pub fn on_delete(&self, id: &EntityId) -> usize {
        let collections: Vec<_> = self.collections.read().clone();
        collections
            .iter()
            .filter(|collection| collection.remove(id))
            .count()
    }
}

/// Routes notifications of one entity class to a [`LiveCollectionTracker`].
///
/// A DELETE removes the entity from every collection by its primary key;
/// any other change decodes the notification payload as the tracker's event
/// type and reconciles it.
pub struct TrackerHandler<T, E> {
    name: String,
    entity_class: String,
    tracker: Arc<LiveCollectionTracker<T, E>>,
}

impl<T, E> TrackerHandler<T, E> {
    pub fn new(
        name: impl Into<String>,
        entity_class: impl Into<String>,
        tracker: Arc<LiveCollectionTracker<T, E>>,
    ) -> Self {
        Self {
            name: name.into(),
            entity_class: entity_class.into(),
            tracker,
        }
    }
}

#[async_trait]
impl<T, E> NotificationHandler for TrackerHandler<T, E>
where
    T: HasPrimaryKey + Clone + Send + Sync + 'static,
    E: DeserializeOwned + Send + Sync + 'static,
{
    async fn handle_notification(&self, notification: &EntityNotification) -> CacheResult<()> {
        if notification.operation_type == OperationType::Delete {
            let removed = self.tracker.on_delete(&notification.id);
            debug!(
                "'{}' removed {} {} from {} collections",
                self.name, notification.entity_class, notification.id, removed
            );
            return Ok(());
        }

        let Some(payload) = &notification.payload else {
            warn!(
                "No payload provided for {:?} on {} {}",
                notification.operation_type, notification.entity_class, notification.id
            );
            return Ok(());
        };

        let event: E = serde_json::from_value(payload.clone()).map_err(|e| {
            warn!(
                "'{}' could not decode payload of {} {}: {}",
                self.name, notification.entity_class, notification.id, e
            );
            CacheError::from(e)
        })?;
        let changed = self.tracker.on_event(&event);
        debug!(
            "'{}' applied {} {}: {} collections changed",
            self.name, notification.entity_class, notification.id, changed
        );
        Ok(())
    }

    fn entity_class(&self) -> Option<&str> {
        Some(&self.entity_class)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
