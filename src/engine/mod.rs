// Spatial data-access engine
// Pooled backend sessions plus predicate decomposition and managed queries

pub mod cursor;
pub mod error;
pub mod filter;
pub mod filter_set;
pub mod pool;
pub mod query;
pub mod registry;
pub mod source;
pub mod traits;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use cursor::{Feature, FeatureCursor};
pub use error::{DataSourceError, SourceResult};
pub use filter::{CompareOp, FilterCapabilities, Predicate, PredicateKind, SpatialOp};
pub use filter_set::{
    EnvelopeSpatialEncoder, FilterSet, SpatialEncoder, SqlEncoder, SqlWhereEncoder,
};
pub use pool::{AcquireResult, ConnectionPool, PooledConnection};
pub use query::ManagedQuery;
pub use registry::PoolRegistry;
pub use source::SpatialDataSource;
pub use traits::{NativeQuery, SessionFactory, SpatialSession};
pub use types::*;
