/// Default capacity of the push-channel buffer
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Configuration for the entity cache and its notification channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// First path segment under which every remote resource is cached
    pub resource_root: String,
    /// Reserved segment holding the identity index of an entity class
    pub index_key: String,
    /// Segment under the index holding entries keyed by identifier
    pub id_key: String,
    /// Argument field read by identity lookups when none is named explicitly
    pub default_id_field: String,
    /// Capacity of the bounded notification channel
    pub channel_capacity: usize,
    /// Whether concurrent `get_or_set` calls share one in-flight computation
    pub deduplicate_in_flight: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            resource_root: "resource".to_string(),
            index_key: "index".to_string(),
            id_key: "id".to_string(),
            default_id_field: "id".to_string(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            deduplicate_in_flight: true,
        }
    }
}

impl CacheConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the root segment for cached resources
    pub fn with_resource_root(mut self, root: impl Into<String>) -> Self {
        self.resource_root = root.into();
        self
    }

    /// Set the argument field used by identity lookups
    pub fn with_default_id_field(mut self, field: impl Into<String>) -> Self {
        self.default_id_field = field.into();
        self
    }

    /// Set the notification channel capacity
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Enable or disable in-flight deduplication
    pub fn with_deduplication(mut self, enabled: bool) -> Self {
        self.deduplicate_in_flight = enabled;
        self
    }
}
