//! Read-through binding of remote operations onto the hierarchical cache.
//!
//! List results are cached under
//! `resource/<entityClass>/<operation>/<argsDigest>` and every returned entity
//! is also written to `resource/<entityClass>/index/id/<id>`, so a later
//! identity lookup for any of them is served without a round trip.
//!
//! Values are stored as `serde_json::Value` because one tree holds pages and
//! entities of every class; the typed wrappers convert at the boundary.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use crate::cache::{CacheNode, HierarchicalCache};
use crate::config::CacheConfig;
use crate::digest::ArgsDigest;
use crate::error::{CacheError, CacheResult};
use crate::traits::{Entity, EntityId};

/// One page of a paged remote listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    #[serde(default)]
    pub page_index: u32,
    #[serde(default)]
    pub page_size: u32,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default = "Vec::new")]
    pub content: Vec<T>,
}

impl<T> Page<T> {
    /// A single page holding all of `content`.
    pub fn single(content: Vec<T>) -> Self {
        Self {
            page_index: 0,
            page_size: u32::try_from(content.len()).unwrap_or(u32::MAX),
            total_pages: 1,
            content,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// Entry point for binding remote operations to the shared cache.
#[derive(Clone)]
pub struct ResourceCache {
    cache: Arc<HierarchicalCache<Value>>,
    config: Arc<CacheConfig>,
}

impl fmt::Debug for ResourceCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceCache")
            .field("config", &self.config)
            .field("paths", &self.cache.paths())
            .finish()
    }
}

impl ResourceCache {
    pub fn new(config: CacheConfig) -> Self {
        let cache = HierarchicalCache::with_deduplication(config.deduplicate_in_flight);
        Self {
            cache: Arc::new(cache),
            config: Arc::new(config),
        }
    }

    pub fn cache(&self) -> &HierarchicalCache<Value> {
        &self.cache
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// `resource/<entityClass>`
    pub fn class_node(&self, entity_class: &str) -> CacheNode<Value> {
        self.cache.key(&self.config.resource_root).key(entity_class)
    }

    /// `resource/<entityClass>`, only if something was ever cached for the class.
    pub fn existing_class_node(&self, entity_class: &str) -> Option<CacheNode<Value>> {
        self.cache
            .root()
            .child(&self.config.resource_root)
            .and_then(|resources| resources.child(entity_class))
    }

    /// `resource/<entityClass>/index/id/<id>`
    pub fn index_node(&self, entity_class: &str, id: &EntityId) -> CacheNode<Value> {
        self.class_node(entity_class)
            .key(&self.config.index_key)
            .key(&self.config.id_key)
            .key(id)
    }

    /// Returns the indexed entity if it is already cached.
    pub fn cached<T: Entity>(&self, id: &EntityId) -> CacheResult<Option<T>> {
        let Some(class) = self.existing_class_node(T::ENTITY_CLASS) else {
            return Ok(None);
        };
        let entry = class
            .child(&self.config.index_key)
            .and_then(|index| index.child(&self.config.id_key))
            .and_then(|ids| ids.child(id))
            .and_then(|node| node.peek());
        entry
            .map(|value| serde_json::from_value(value).map_err(CacheError::from))
            .transpose()
    }

    /// Stores every entity of `items` in the identity index of its class.
    pub fn write_through<T: Entity>(&self, items: &[T]) -> CacheResult<()> {
        for item in items {
            let node = self.index_node(T::ENTITY_CLASS, &item.primary_key());
            node.set_value(serde_json::to_value(item)?);
        }
        if !items.is_empty() {
            debug!(
                "Indexed {} {} entities from list result",
                items.len(),
                T::ENTITY_CLASS
            );
        }
        Ok(())
    }

    /// Wraps a list-returning operation with read-through caching and
    /// write-through identity indexing.
    ///
    /// Fails immediately if `operation` is the reserved index key.
    pub fn decorate<T, A, F, Fut>(
        &self,
        operation: &str,
        fetch: F,
    ) -> CacheResult<CachedListOperation<T, A, F>>
    where
        T: Entity,
        A: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CacheResult<Page<T>>> + Send + 'static,
    {
        self.check_operation_name(operation, T::ENTITY_CLASS)?;
        Ok(CachedListOperation {
            resources: self.clone(),
            operation: operation.to_string(),
            fetch: Arc::new(fetch),
            _marker: PhantomData,
        })
    }

    /// Wraps an identity lookup so it is answered from
    /// `resource/<entityClass>/index/id/<id>` when possible.
    ///
    /// `id_field` names the argument field holding the identifier; the
    /// configured default is used when `None`. Fails immediately if
    /// `operation` is the reserved index key.
    pub fn decorate_index_id<T, A, F, Fut>(
        &self,
        operation: &str,
        id_field: Option<&str>,
        fetch: F,
    ) -> CacheResult<CachedLookupOperation<T, A, F>>
    where
        T: Entity,
        A: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CacheResult<T>> + Send + 'static,
    {
        self.check_operation_name(operation, T::ENTITY_CLASS)?;
        Ok(CachedLookupOperation {
            resources: self.clone(),
            operation: operation.to_string(),
            id_field: id_field
                .unwrap_or(&self.config.default_id_field)
                .to_string(),
            fetch: Arc::new(fetch),
            _marker: PhantomData,
        })
    }

    fn check_operation_name(&self, operation: &str, entity_class: &str) -> CacheResult<()> {
        if operation == self.config.index_key {
            error!(
                "Operation name '{}' on {} collides with the identity index",
                operation, entity_class
            );
            return Err(CacheError::ReservedKey(operation.to_string()));
        }
        Ok(())
    }
}

/// A list-returning remote operation bound to the cache.
pub struct CachedListOperation<T, A, F> {
    resources: ResourceCache,
    operation: String,
    fetch: Arc<F>,
    _marker: PhantomData<fn(A) -> T>,
}

impl<T, A, F, Fut> CachedListOperation<T, A, F>
where
    T: Entity,
    A: Serialize + Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CacheResult<Page<T>>> + Send + 'static,
{
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Cache node this call would use for `args`.
    pub fn node_for(&self, args: &A) -> CacheResult<CacheNode<Value>> {
        let digest = ArgsDigest::of(args)?;
        Ok(self
            .resources
            .class_node(T::ENTITY_CLASS)
            .key(&self.operation)
            .key(&digest))
    }

    pub async fn call(&self, args: A) -> CacheResult<Page<T>> {
        let node = self.node_for(&args)?;
        let fetch = self.fetch.clone();
        let resources = self.resources.clone();

        let value = node
            .get_or_set(move || async move {
                let page = (*fetch)(args).await?;
                resources.write_through(&page.content)?;
                Ok(serde_json::to_value(&page)?)
            })
            .await?;
        Ok(serde_json::from_value(value)?)
    }
}

impl<T, A, F> fmt::Debug for CachedListOperation<T, A, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedListOperation")
            .field("operation", &self.operation)
            .finish()
    }
}

/// An identity lookup bound to the identity index of its entity class.
pub struct CachedLookupOperation<T, A, F> {
    resources: ResourceCache,
    operation: String,
    id_field: String,
    fetch: Arc<F>,
    _marker: PhantomData<fn(A) -> T>,
}

impl<T, A, F, Fut> CachedLookupOperation<T, A, F>
where
    T: Entity,
    A: Serialize + Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CacheResult<T>> + Send + 'static,
{
    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    /// Reads the identifier out of `args`.
    ///
    /// A missing identifier is a programming error and is reported as
    /// [`CacheError::MissingIdField`] without contacting the remote API.
    pub fn id_of(&self, args: &A) -> CacheResult<EntityId> {
        let value = serde_json::to_value(args)?;
        value
            .get(&self.id_field)
            .and_then(EntityId::from_json)
            .ok_or_else(|| {
                error!(
                    "Lookup '{}' on {} called without '{}'",
                    self.operation,
                    T::ENTITY_CLASS,
                    self.id_field
                );
                CacheError::MissingIdField {
                    operation: self.operation.clone(),
                    field: self.id_field.clone(),
                }
            })
    }

    pub async fn call(&self, args: A) -> CacheResult<T> {
        let id = self.id_of(&args)?;
        let node = self.resources.index_node(T::ENTITY_CLASS, &id);
        let fetch = self.fetch.clone();

        let value = node
            .get_or_set(move || async move {
                let entity = (*fetch)(args).await?;
                Ok(serde_json::to_value(&entity)?)
            })
            .await?;
        Ok(serde_json::from_value(value)?)
    }
}

impl<T, A, F> fmt::Debug for CachedLookupOperation<T, A, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedLookupOperation")
            .field("operation", &self.operation)
            .field("id_field", &self.id_field)
            .finish()
    }
}
