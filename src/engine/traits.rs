//! Backend session traits
//!
//! This is the seam to the remote spatial database. A [`SessionFactory`]
//! creates expensive sessions for the pool to amortize; a [`SpatialSession`]
//! prepares native queries and answers the native aggregate requests; a
//! [`NativeQuery`] is one server-side cursor.

use async_trait::async_trait;

use crate::engine::error::SourceResult;
use crate::engine::types::{ConnectionConfig, Extent, FetchedRow, NativeQuerySpec};

/// Creates backend sessions. Session creation is the expensive operation the
/// connection pool exists to amortize.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create_session(
        &self,
        config: &ConnectionConfig,
    ) -> SourceResult<Box<dyn SpatialSession>>;
}

/// One live backend session.
///
/// A prepared query's server-side cursor state is independent of the session
/// object that prepared it: the pooled connection can go back to the pool
/// while the cursor is still being consumed.
#[async_trait]
pub trait SpatialSession: Send + Sync {
    /// All column names of a registered type, in backend order.
    async fn table_columns(&self, type_name: &str) -> SourceResult<Vec<String>>;

    /// The geometry column of a registered type.
    async fn geometry_column(&self, type_name: &str) -> SourceResult<String>;

    /// Prepares a native query from a fully-rendered spec.
    async fn prepare(&self, spec: &NativeQuerySpec) -> SourceResult<Box<dyn NativeQuery>>;

    /// Native row count over an optional where-clause. The backend cannot
    /// combine this with spatial constraints; callers needing a spatially
    /// constrained count must stream and count instead.
    async fn count(&self, type_name: &str, where_clause: Option<&str>) -> SourceResult<u64>;

    /// The backend's precomputed per-layer extent. May be wider than the
    /// tight bound of the current rows, never tighter.
    async fn layer_extent(&self, type_name: &str) -> SourceResult<Extent>;

    /// Asks the backend to compute the extent over exactly the result set of
    /// a fresh query spec.
    async fn query_extent(&self, spec: &NativeQuerySpec) -> SourceResult<Extent>;

    async fn close(&self) -> SourceResult<()>;
}

/// One prepared server-side query/cursor
#[async_trait]
pub trait NativeQuery: Send {
    /// Starts server-side streaming for the prepared query.
    async fn execute(&mut self) -> SourceResult<()>;

    /// Next row, or `None` at end of stream.
    async fn fetch(&mut self) -> SourceResult<Option<FetchedRow>>;

    /// Releases backend cursor resources.
    async fn close(&mut self) -> SourceResult<()>;
}
