//! geolink — client-side access layer for remote spatial databases.
//!
//! Two jobs, tightly coupled: a bounded pool of expensive backend sessions
//! with blocking/timeout acquisition, and translation of an abstract boolean
//! predicate plus projection into whatever the backend can execute natively,
//! with the rest handed back as a residual for the caller to apply.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use geolink::engine::{
//!     ConnectionConfig, ConnectionPool, Predicate, Query, SpatialDataSource,
//! };
//!
//! let config = ConnectionConfig::new("sde.example.com", 5151, "esri_sde", "gis", "secret");
//! let pool = Arc::new(ConnectionPool::connect(config, factory).await?);
//! let source = SpatialDataSource::new(pool);
//!
//! let query = Query::new("roads", Predicate::IncludeAll);
//! let mut cursor = source.features(&query).await?;
//! while let Some(feature) = cursor.next().await? {
//!     if cursor.matches_residual(&feature) {
//!         println!("{}", feature.id);
//!     }
//! }
//! let total = source.count(&query).await?;
//! let bounds = source.extent(&query).await?;
//! ```

pub mod engine;
pub mod observability;

pub use engine::{
    ConnectionConfig, ConnectionPool, DataSourceError, Feature, FeatureCursor, FilterSet,
    ManagedQuery, PoolRegistry, Predicate, Query, SourceResult, SpatialDataSource,
};
