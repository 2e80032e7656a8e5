//! Universal data types for the spatial data-access layer
//!
//! These types give the query path a normalized representation of backend
//! concepts: endpoint configuration, row values, geometries and extents, and
//! the fully-rendered input a session needs to prepare a native query.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::filter::{Predicate, SpatialOp};

/// Unique identifier for one pooled backend session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection parameters for one backend endpoint.
///
/// Identity and tuning in one immutable value. Equality and hashing cover the
/// endpoint identity only (host, port, instance, user) — two configs that
/// differ just in tuning map to the same pool in the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub server_host: String,
    pub port: u16,
    pub database_instance: String,
    pub user_name: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub namespace: Option<String>,
    /// Sessions created eagerly at pool construction.
    pub min_connections: usize,
    /// Hard upper bound on pool size.
    pub max_connections: usize,
    /// Sessions created per growth step when the pool runs dry.
    pub increment: usize,
    /// How long a blocking acquire waits before reporting exhaustion.
    pub timeout_ms: u64,
}

impl ConnectionConfig {
    pub const DEFAULT_MIN_CONNECTIONS: usize = 1;
    pub const DEFAULT_MAX_CONNECTIONS: usize = 1;
    pub const DEFAULT_INCREMENT: usize = 1;
    pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

    /// Builds a config with the conservative pooling defaults: out of the box
    /// the pool never grows past one connection.
    pub fn new(
        server_host: impl Into<String>,
        port: u16,
        database_instance: impl Into<String>,
        user_name: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            server_host: server_host.into(),
            port,
            database_instance: database_instance.into(),
            user_name: user_name.into(),
            password: password.into(),
            namespace: None,
            min_connections: Self::DEFAULT_MIN_CONNECTIONS,
            max_connections: Self::DEFAULT_MAX_CONNECTIONS,
            increment: Self::DEFAULT_INCREMENT,
            timeout_ms: Self::DEFAULT_TIMEOUT_MS,
        }
    }

    pub fn with_pool(mut self, min: usize, max: usize, increment: usize) -> Self {
        self.min_connections = min;
        self.max_connections = max;
        self.increment = increment;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

// Registry map key: identity-relevant subset only.
impl PartialEq for ConnectionConfig {
    fn eq(&self, other: &Self) -> bool {
        self.server_host == other.server_host
            && self.port == other.port
            && self.database_instance == other.database_instance
            && self.user_name == other.user_name
    }
}

impl Eq for ConnectionConfig {}

impl Hash for ConnectionConfig {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.server_host.hash(state);
        self.port.hash(state);
        self.database_instance.hash(state);
        self.user_name.hash(state);
    }
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Extent {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    /// The extent of an empty result set. `expand_to_include` treats it as
    /// the identity element.
    pub fn empty() -> Self {
        Self {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min_x > self.max_x || self.min_y > self.max_y
    }

    pub fn expand_to_include(&mut self, other: &Extent) {
        if other.is_empty() {
            return;
        }
        self.min_x = self.min_x.min(other.min_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_x = self.max_x.max(other.max_x);
        self.max_y = self.max_y.max(other.max_y);
    }

    pub fn intersects(&self, other: &Extent) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }

    pub fn contains(&self, other: &Extent) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.min_x <= other.min_x
            && self.max_x >= other.max_x
            && self.min_y <= other.min_y
            && self.max_y >= other.max_y
    }
}

/// Geometry shapes the query path moves around.
///
/// Everything this layer does with a geometry is envelope-based; richer shape
/// handling lives with the backend and the feature reconstruction code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Geometry {
    Point { x: f64, y: f64 },
    Envelope(Extent),
    Polygon { shell: Vec<(f64, f64)> },
}

impl Geometry {
    pub fn envelope(&self) -> Extent {
        match self {
            Geometry::Point { x, y } => Extent::new(*x, *y, *x, *y),
            Geometry::Envelope(extent) => *extent,
            Geometry::Polygon { shell } => {
                let mut extent = Extent::empty();
                for (x, y) in shell {
                    extent.expand_to_include(&Extent::new(*x, *y, *x, *y));
                }
                extent
            }
        }
    }
}

/// Universal value representation for row attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(#[serde(with = "base64_bytes")] Vec<u8>),
    Json(serde_json::Value),
    Array(Vec<Value>),
    Geometry(Geometry),
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// One native row: backend row id plus one value per requested column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedRow {
    pub row_id: i64,
    pub values: Vec<Value>,
}

/// Abstract query input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub type_name: String,
    /// Requested columns; empty means all.
    pub property_names: Vec<String>,
    pub predicate: Predicate,
}

impl Query {
    pub fn new(type_name: impl Into<String>, predicate: Predicate) -> Self {
        Self {
            type_name: type_name.into(),
            property_names: Vec::new(),
            predicate,
        }
    }

    pub fn with_properties(mut self, names: Vec<String>) -> Self {
        self.property_names = names;
        self
    }
}

/// One backend-native, index-accelerated geometric filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialConstraint {
    pub column: String,
    pub op: SpatialOp,
    pub geometry: Geometry,
}

/// Everything a session needs to prepare one native query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeQuerySpec {
    pub type_name: String,
    pub columns: Vec<String>,
    pub where_clause: Option<String>,
    pub spatial_constraints: Vec<SpatialConstraint>,
}
