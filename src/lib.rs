//! # Live Entity Cache
//!
//! This crate provides the client-side entity cache of a build dashboard and
//! keeps it, and the collections bound to visible views, consistent with the
//! change notifications pushed by the server.
//!
//! ## Key Components
//!
//! - `HierarchicalCache`: keyed tree of memoized values with in-flight deduplication
//! - `ResourceCache`: read-through binding of remote operations onto the tree,
//!   with write-through identity indexing of list results
//! - `InvalidationHandler`: drops cache paths made stale by an entity change
//! - `LiveCollection` / `LiveCollectionTracker`: in-memory collections
//!   reconciled incrementally against the notification stream
//! - `NotificationListener`: ordered dispatch of pushed notifications
//! - `CacheContext`: composition root owning the shared pieces

mod cache;
mod config;
mod context;
mod digest;
mod error;
mod invalidation;
mod listener;
mod resource;
mod statistics;
mod tracker;
mod traits;

pub use cache::{CacheNode, HierarchicalCache, PATH_SEPARATOR};
pub use config::{CacheConfig, DEFAULT_CHANNEL_CAPACITY};
pub use context::CacheContext;
pub use digest::ArgsDigest;
pub use error::{CacheError, CacheResult};
pub use invalidation::{EntityUpdateEvent, InvalidationHandler, OperationType};
pub use listener::{EntityNotification, NotificationHandler, NotificationListener};
pub use resource::{CachedListOperation, CachedLookupOperation, Page, ResourceCache};
pub use statistics::CacheStatistics;
pub use tracker::{
    CollectionSnapshot, Filter, FnUpdater, LiveCollection, LiveCollectionBuilder,
    LiveCollectionTracker, ReconcileOutcome, TrackerHandler, TrackerState, Updater,
};
pub use traits::{CacheKey, Entity, EntityId, HasPrimaryKey};
