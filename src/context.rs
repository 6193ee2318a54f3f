use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::config::CacheConfig;
use crate::invalidation::InvalidationHandler;
use crate::listener::{NotificationHandler, NotificationListener};
use crate::resource::ResourceCache;

/// Owns the shared pieces of one application session: the resource cache,
/// its invalidation handler and the notification listener feeding both the
/// invalidation handler and any live-collection trackers.
///
/// The invalidation handler is registered first, so a tracker handler
/// reacting to a notification never reads cache entries that notification
/// has made stale.
pub struct CacheContext {
    config: CacheConfig,
    resources: ResourceCache,
    invalidation: Arc<InvalidationHandler>,
    listener: NotificationListener,
}

impl CacheContext {
    pub fn new(config: CacheConfig) -> Self {
        let resources = ResourceCache::new(config.clone());
        let invalidation = Arc::new(InvalidationHandler::new(resources.clone()));
        let mut listener = NotificationListener::new();
        listener.register_handler(invalidation.clone());
        debug!("Created cache context with {:?}", config);

        Self {
            config,
            resources,
            invalidation,
            listener,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn resources(&self) -> &ResourceCache {
        &self.resources
    }

    pub fn invalidation(&self) -> &InvalidationHandler {
        &self.invalidation
    }

    pub fn listener(&self) -> &NotificationListener {
        &self.listener
    }

    /// Register a handler that runs after cache invalidation
    pub fn register_handler(&mut self, handler: Arc<dyn NotificationHandler>) {
        self.listener.register_handler(handler);
    }

    /// Creates the bounded push channel sized from the configuration.
    pub fn channel(&self) -> (mpsc::Sender<String>, mpsc::Receiver<String>) {
        mpsc::channel(self.config.channel_capacity)
    }

    /// Drives the listener until every sender of `receiver` is dropped.
    pub async fn listen(&self, receiver: mpsc::Receiver<String>) -> usize {
        self.listener.listen(receiver).await
    }
}

impl Default for CacheContext {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
