//! Data source facade
//!
//! Binds one connection pool to the two predicate encoders and exposes the
//! caller-facing surface: a feature cursor plus the count and extent
//! aggregates. This is the seam the application talks to; everything below
//! it is the pool, the decomposition, and the managed query.

use std::sync::Arc;

use crate::engine::cursor::FeatureCursor;
use crate::engine::error::SourceResult;
use crate::engine::filter::Predicate;
use crate::engine::filter_set::{
    EnvelopeSpatialEncoder, FilterSet, SpatialEncoder, SqlEncoder, SqlWhereEncoder,
};
use crate::engine::pool::ConnectionPool;
use crate::engine::query::ManagedQuery;
use crate::engine::types::{Extent, Query};

/// One spatial endpoint seen through its pool and encoders
pub struct SpatialDataSource {
    pool: Arc<ConnectionPool>,
    sql_encoder: Arc<dyn SqlEncoder>,
    spatial_encoder: Arc<dyn SpatialEncoder>,
}

impl SpatialDataSource {
    /// Uses the shipped encoders.
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self::with_encoders(
            pool,
            Arc::new(SqlWhereEncoder::new()),
            Arc::new(EnvelopeSpatialEncoder::new()),
        )
    }

    pub fn with_encoders(
        pool: Arc<ConnectionPool>,
        sql_encoder: Arc<dyn SqlEncoder>,
        spatial_encoder: Arc<dyn SpatialEncoder>,
    ) -> Self {
        Self {
            pool,
            sql_encoder,
            spatial_encoder,
        }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    fn decompose(&self, predicate: &Predicate) -> FilterSet {
        FilterSet::new(
            predicate.clone(),
            Arc::clone(&self.sql_encoder),
            Arc::clone(&self.spatial_encoder),
        )
    }

    /// Opens, executes, and wraps a query in a cursor.
    ///
    /// The cursor yields rows filtered by the natively-executable parts of
    /// the predicate only; the consumer applies the cursor's residual to
    /// each feature.
    pub async fn features(&self, query: &Query) -> SourceResult<FeatureCursor> {
        let filters = self.decompose(&query.predicate);
        let residual = filters.unsupported_filter();
        let mut managed = ManagedQuery::open(Arc::clone(&self.pool), query, &filters).await?;
        managed.execute().await?;
        Ok(FeatureCursor::new(managed, residual))
    }

    /// Number of rows matching the natively-executable parts of the query.
    pub async fn count(&self, query: &Query) -> SourceResult<u64> {
        let filters = self.decompose(&query.predicate);
        ManagedQuery::count_for(&self.pool, query, &filters).await
    }

    /// Bounding box of the rows matching the natively-executable parts of
    /// the query.
    pub async fn extent(&self, query: &Query) -> SourceResult<Extent> {
        let filters = self.decompose(&query.predicate);
        ManagedQuery::extent_for(&self.pool, query, &filters).await
    }
}
