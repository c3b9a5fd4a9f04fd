//! Discovered service instance model.
//!
//! A [`ServiceDescriptor`] is an immutable record of one announced instance.
//! Its `properties` carry the endpoint URIs keyed by scheme (`http`, `https`)
//! and an optional `weight`. A [`ServiceDescriptors`] is one versioned lookup
//! result for a `(type, pool)` pair.
use std::{collections::BTreeMap, fmt, time::Duration};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pool used when neither the selector nor the node names one
pub const DEFAULT_POOL: &str = "general";

/// Lifecycle state announced by an instance
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceState {
    Running,
    Stopped,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceState::Running => write!(f, "RUNNING"),
            ServiceState::Stopped => write!(f, "STOPPED"),
        }
    }
}

/// One discovered service instance
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescriptor {
    id: Uuid,
    #[serde(default)]
    node_id: Option<String>,
    #[serde(rename = "type")]
    service_type: String,
    pool: String,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    state: Option<ServiceState>,
    #[serde(default)]
    properties: BTreeMap<String, String>,
}

impl ServiceDescriptor {
    /// Start building a descriptor for the given service type
    pub fn builder(service_type: impl Into<String>) -> ServiceDescriptorBuilder {
        ServiceDescriptorBuilder::new(service_type)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn node_id(&self) -> Option<&str> {
        self.node_id.as_deref()
    }

    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn state(&self) -> Option<ServiceState> {
        self.state
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// Look up a single property
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

impl fmt::Display for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ServiceDescriptor{{id={}, nodeId={}, type='{}', pool='{}', location='{}', state='{}', properties={:?}}}",
            self.id,
            self.node_id.as_deref().unwrap_or("-"),
            self.service_type,
            self.pool,
            self.location.as_deref().unwrap_or("-"),
            self.state
                .map_or_else(|| "-".to_string(), |state| state.to_string()),
            self.properties
        )
    }
}

/// Builder for [`ServiceDescriptor`]; a random id and the default pool are
/// filled in unless overridden.
#[derive(Debug, Clone)]
pub struct ServiceDescriptorBuilder {
    id: Uuid,
    node_id: Option<String>,
    service_type: String,
    pool: String,
    location: Option<String>,
    state: Option<ServiceState>,
    properties: BTreeMap<String, String>,
}

impl ServiceDescriptorBuilder {
    fn new(service_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            node_id: None,
            service_type: service_type.into(),
            pool: DEFAULT_POOL.to_string(),
            location: None,
            state: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = pool.into();
        self
    }

    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn state(mut self, state: ServiceState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn properties<K, V>(mut self, properties: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.properties
            .extend(properties.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn build(self) -> ServiceDescriptor {
        ServiceDescriptor {
            id: self.id,
            node_id: self.node_id,
            service_type: self.service_type,
            pool: self.pool,
            location: self.location,
            state: self.state,
            properties: self.properties,
        }
    }
}

/// A versioned lookup result for one (type, pool)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptors {
    service_type: String,
    pool: String,
    version: Option<String>,
    max_age: Option<Duration>,
    descriptors: Vec<ServiceDescriptor>,
}

impl ServiceDescriptors {
    pub fn new(
        service_type: impl Into<String>,
        pool: impl Into<String>,
        descriptors: Vec<ServiceDescriptor>,
    ) -> Self {
        Self {
            service_type: service_type.into(),
            pool: pool.into(),
            version: None,
            max_age: None,
            descriptors,
        }
    }

    /// Attach the server-side version (ETag) of this snapshot
    pub fn with_version(mut self, version: Option<String>) -> Self {
        self.version = version;
        self
    }

    /// Attach how long this snapshot may be cached before polling again
    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.max_age
    }

    pub fn descriptors(&self) -> &[ServiceDescriptor] {
        &self.descriptors
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
