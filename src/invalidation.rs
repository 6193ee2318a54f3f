use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::{CacheError, CacheResult};
use crate::listener::{EntityNotification, NotificationHandler};
use crate::resource::ResourceCache;
use crate::traits::EntityId;

/// Kind of change reported for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

impl OperationType {
    /// Whether the change can make an existing identity-index entry stale.
    /// A freshly created entity cannot be in the index yet.
    pub fn stales_index(self) -> bool {
        matches!(self, OperationType::Update | OperationType::Delete)
    }
}

/// Change of a single entity, as pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityUpdateEvent {
    pub id: EntityId,
    pub entity_class: String,
    pub operation_type: OperationType,
}

impl EntityUpdateEvent {
    pub fn new(
        entity_class: impl Into<String>,
        id: impl Into<EntityId>,
        operation_type: OperationType,
    ) -> Self {
        Self {
            id: id.into(),
            entity_class: entity_class.into(),
            operation_type,
        }
    }

    /// Parses and validates a JSON event.
    pub fn from_json(payload: &str) -> CacheResult<Self> {
        let event: Self = serde_json::from_str(payload)
            .map_err(|e| CacheError::MalformedEvent(e.to_string()))?;
        event.validate()?;
        Ok(event)
    }

    /// Rejects events whose class or id is blank.
    pub fn validate(&self) -> CacheResult<()> {
        if self.entity_class.trim().is_empty() {
            return Err(CacheError::MalformedEvent("missing entityClass".to_string()));
        }
        if self.id.as_str().is_empty() {
            return Err(CacheError::MalformedEvent("missing id".to_string()));
        }
        Ok(())
    }
}

/// Drops the cache paths an entity change may have made stale.
///
/// Every cached list of the changed class is dropped, whatever the change:
/// a create, update or delete can alter which entities a filtered, sorted or
/// paged list contains. The identity-index entry of the changed entity is
/// dropped only on update or delete.
#[derive(Debug, Clone)]
pub struct InvalidationHandler {
    resources: ResourceCache,
}

impl InvalidationHandler {
    pub fn new(resources: ResourceCache) -> Self {
        Self { resources }
    }

    /// Applies one event; returns the number of cache keys removed.
    pub fn process_entity_update_event(&self, event: &EntityUpdateEvent) -> CacheResult<usize> {
        if let Err(e) = event.validate() {
            error!("Rejected entity update event {:?}: {}", event, e);
            return Err(e);
        }

        let Some(class) = self.resources.existing_class_node(&event.entity_class) else {
            debug!("Nothing cached for {}", event.entity_class);
            return Ok(0);
        };

        let index_key = &self.resources.config().index_key;
        let id_key = &self.resources.config().id_key;
        let mut removed = 0;

        for key in class.key_array() {
            if &key == index_key {
                if !event.operation_type.stales_index() {
                    continue;
                }
                let entry = class
                    .child(index_key)
                    .and_then(|index| index.child(id_key))
                    .and_then(|ids| ids.child(&event.id));
                if let Some(entry) = entry {
                    entry.delete_key()?;
                    removed += 1;
                }
            } else if let Some(list) = class.child(&key) {
                list.delete_key()?;
                removed += 1;
            }
        }

        debug!(
            "{:?} {} {}: removed {} cache keys",
            event.operation_type, event.entity_class, event.id, removed
        );
        Ok(removed)
    }
}

#[async_trait]
impl NotificationHandler for InvalidationHandler {
    async fn handle_notification(&self, notification: &EntityNotification) -> CacheResult<()> {
        self.process_entity_update_event(&notification.event())
            .map(|_| ())
    }

    fn name(&self) -> &str {
        "cache-invalidation"
    }
}
