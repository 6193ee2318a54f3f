use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, warn};

use crate::error::{CacheError, CacheResult};
use crate::invalidation::{EntityUpdateEvent, OperationType};
use crate::traits::EntityId;

/// Notification payload structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityNotification {
    /// Identifier of the changed entity
    pub id: EntityId,
    /// Logical type of the changed entity
    pub entity_class: String,
    /// The change performed
    pub operation_type: OperationType,
    /// Optional: snapshot of the entity after the change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl EntityNotification {
    pub fn new(
        entity_class: impl Into<String>,
        id: impl Into<EntityId>,
        operation_type: OperationType,
    ) -> Self {
        Self {
            id: id.into(),
            entity_class: entity_class.into(),
            operation_type,
            payload: None,
        }
    }

    /// Attach the entity snapshot carried alongside the change
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// The change without its payload
    pub fn event(&self) -> EntityUpdateEvent {
        EntityUpdateEvent {
            id: self.id.clone(),
            entity_class: self.entity_class.clone(),
            operation_type: self.operation_type,
        }
    }
}

/// Handler trait for entity notifications
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    /// Handle a notification
    async fn handle_notification(&self, notification: &EntityNotification) -> CacheResult<()>;

    /// The entity class this handler is responsible for; `None` receives every class
    fn entity_class(&self) -> Option<&str> {
        None
    }

    /// Name used in logs
    fn name(&self) -> &str;
}

/// Dispatches pushed notifications to registered handlers, strictly in
/// arrival order and, per notification, in registration order.
#[derive(Default)]
pub struct NotificationListener {
    handlers: Vec<Arc<dyn NotificationHandler>>,
}

impl NotificationListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; it runs after every handler registered before it
    pub fn register_handler(&mut self, handler: Arc<dyn NotificationHandler>) {
        debug!(
            "Registering handler '{}' for {}",
            handler.name(),
            handler.entity_class().unwrap_or("all entity classes")
        );
        self.handlers.push(handler);
    }

    /// Remove every handler registered under `name`; returns how many were removed
    pub fn unregister_handler(&mut self, name: &str) -> usize {
        let before = self.handlers.len();
        self.handlers.retain(|handler| handler.name() != name);
        before - self.handlers.len()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Process a single JSON notification payload.
    pub async fn process_notification(&self, payload: &str) -> CacheResult<()> {
        let notification = match serde_json::from_str::<EntityNotification>(payload) {
            Ok(notification) => notification,
            Err(e) => {
                error!("Failed to parse notification payload: {}", e);
                debug!("Payload was: {}", payload);
                return Err(CacheError::MalformedEvent(e.to_string()));
            }
        };
        self.dispatch(&notification).await
    }

    /// Deliver one notification to every interested handler.
    ///
    /// A failing handler does not stop delivery to the others; the first
    /// failure is returned once all handlers have run.
    pub async fn dispatch(&self, notification: &EntityNotification) -> CacheResult<()> {
        notification.event().validate()?;

        let mut first_error = None;
        for handler in &self.handlers {
            if let Some(class) = handler.entity_class() {
                if class != notification.entity_class {
                    continue;
                }
            }
            if let Err(e) = handler.handle_notification(notification).await {
                warn!(
                    "Handler '{}' failed on {:?} {} {}: {}",
                    handler.name(),
                    notification.operation_type,
                    notification.entity_class,
                    notification.id,
                    e
                );
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Consume the channel until every sender is dropped.
    ///
    /// Bad notifications are logged and skipped. Returns the number of
    /// notifications that were dispatched without error.
    pub async fn listen(&self, receiver: mpsc::Receiver<String>) -> usize {
        let mut stream = ReceiverStream::new(receiver);
        let mut processed = 0;
        debug!("Started listening for entity notifications");

        while let Some(payload) = stream.next().await {
            match self.process_notification(&payload).await {
                Ok(()) => processed += 1,
                Err(e) => debug!("Notification skipped: {}", e),
            }
        }

        debug!("Notification channel closed after {} notifications", processed);
        processed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recording {
        name: String,
        class: Option<String>,
        seen: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl NotificationHandler for Recording {
        async fn handle_notification(&self, notification: &EntityNotification) -> CacheResult<()> {
            self.seen
                .lock()
                .push(format!("{}:{}", self.name, notification.id));
            if self.fail {
                return Err(CacheError::Reconcile("boom".to_string()));
            }
            Ok(())
        }

        fn entity_class(&self) -> Option<&str> {
            self.class.as_deref()
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    fn recording(
        name: &str,
        class: Option<&str>,
        fail: bool,
        seen: &Arc<Mutex<Vec<String>>>,
    ) -> Arc<dyn NotificationHandler> {
        Arc::new(Recording {
            name: name.to_string(),
            class: class.map(str::to_string),
            seen: seen.clone(),
            fail,
        })
    }

    #[test]
    fn test_notification_serialization() {
        let notif = EntityNotification::new("BuildRecord", 7, OperationType::Update)
            .with_payload(serde_json::json!({"id": 7, "status": "BUILDING"}));

        let json = serde_json::to_string(&notif).unwrap();
        let deserialized: EntityNotification = serde_json::from_str(&json).unwrap();

        assert_eq!(notif, deserialized);
        assert!(json.contains("\"entityClass\":\"BuildRecord\""));
        assert!(json.contains("\"operationType\":\"UPDATE\""));
    }

    #[tokio::test]
    async fn test_dispatch_order_and_class_routing() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut listener = NotificationListener::new();
        listener.register_handler(recording("all", None, false, &seen));
        listener.register_handler(recording("products", Some("Product"), false, &seen));
        listener.register_handler(recording("builds", Some("BuildRecord"), false, &seen));

        listener
            .process_notification(r#"{"id": 1, "entityClass": "BuildRecord", "operationType": "CREATE"}"#)
            .await
            .unwrap();

        assert_eq!(*seen.lock(), vec!["all:1".to_string(), "builds:1".to_string()]);
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_block_others() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut listener = NotificationListener::new();
        listener.register_handler(recording("first", None, true, &seen));
        listener.register_handler(recording("second", None, false, &seen));

        let result = listener
            .dispatch(&EntityNotification::new("BuildRecord", 2, OperationType::Update))
            .await;

        assert_eq!(result, Err(CacheError::Reconcile("boom".to_string())));
        assert_eq!(seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_listen_skips_malformed_payloads() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut listener = NotificationListener::new();
        listener.register_handler(recording("all", None, false, &seen));

        let (tx, rx) = mpsc::channel(8);
        tx.send(r#"{"id": 1, "entityClass": "E", "operationType": "CREATE"}"#.to_string())
            .await
            .unwrap();
        tx.send("not json".to_string()).await.unwrap();
        tx.send(r#"{"entityClass": "E", "operationType": "CREATE"}"#.to_string())
            .await
            .unwrap();
        tx.send(r#"{"id": 2, "entityClass": "E", "operationType": "DELETE"}"#.to_string())
            .await
            .unwrap();
        drop(tx);

        assert_eq!(listener.listen(rx).await, 2);
        assert_eq!(*seen.lock(), vec!["all:1".to_string(), "all:2".to_string()]);
    }

    #[test]
    fn test_unregister_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut listener = NotificationListener::new();
        listener.register_handler(recording("a", None, false, &seen));
        listener.register_handler(recording("b", None, false, &seen));

        assert_eq!(listener.unregister_handler("a"), 1);
        assert_eq!(listener.handler_count(), 1);
    }
}
