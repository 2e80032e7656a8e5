//! Managed native query
//!
//! One [`ManagedQuery`] owns exactly one backend query/cursor. Its borrowed
//! connection goes back to the pool exactly once on every construction path,
//! success or failure; once the native handle is prepared, the server-side
//! cursor no longer needs the client connection object. The two aggregates
//! borrow fresh connections of their own.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::engine::error::{DataSourceError, SourceResult};
use crate::engine::filter_set::FilterSet;
use crate::engine::pool::{ConnectionPool, PooledConnection};
use crate::engine::traits::NativeQuery;
use crate::engine::types::{Extent, FetchedRow, NativeQuerySpec, Query};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Prepared,
    Streaming,
    Drained,
    Closed,
}

/// One translated query bound to one backend cursor
pub struct ManagedQuery {
    pool: Arc<ConnectionPool>,
    type_name: String,
    columns: Vec<String>,
    /// `None` when the predicate excludes everything; no native query was
    /// built at all in that case.
    spec: Option<NativeQuerySpec>,
    native: Option<Box<dyn NativeQuery>>,
    state: StreamState,
}

impl std::fmt::Debug for ManagedQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedQuery")
            .field("type_name", &self.type_name)
            .field("columns", &self.columns)
            .field("spec", &self.spec)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl ManagedQuery {
    /// Borrows a connection, translates the query, and prepares the native
    /// handle.
    ///
    /// An empty projection expands to all columns of the type. Any failure
    /// here releases the borrowed connection before the error propagates; on
    /// success the connection is back in the pool by the time `open`
    /// returns.
    #[instrument(skip(pool, query, filters), fields(type_name = %query.type_name))]
    pub async fn open(
        pool: Arc<ConnectionPool>,
        query: &Query,
        filters: &FilterSet,
    ) -> SourceResult<Self> {
        if filters.excludes_all() {
            debug!("predicate excludes everything; skipping native query");
            return Ok(Self {
                pool,
                type_name: query.type_name.clone(),
                columns: query.property_names.clone(),
                spec: None,
                native: None,
                state: StreamState::Prepared,
            });
        }

        let conn = pool.acquire_ready().await?;
        let built = Self::build(&conn, query, filters).await;
        pool.release(conn);
        let (spec, native) = built?;

        Ok(Self {
            pool,
            type_name: query.type_name.clone(),
            columns: spec.columns.clone(),
            spec: Some(spec),
            native: Some(native),
            state: StreamState::Prepared,
        })
    }

    async fn build(
        conn: &PooledConnection,
        query: &Query,
        filters: &FilterSet,
    ) -> SourceResult<(NativeQuerySpec, Box<dyn NativeQuery>)> {
        let columns = if query.property_names.is_empty() {
            conn.session().table_columns(&query.type_name).await?
        } else {
            query.property_names.clone()
        };
        let spec = NativeQuerySpec {
            type_name: query.type_name.clone(),
            columns,
            where_clause: filters.sql_where_clause()?,
            spatial_constraints: filters.spatial_constraints()?,
        };
        let native = conn.session().prepare(&spec).await?;
        Ok((spec, native))
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The resolved projection.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Starts server-side streaming for the prepared query.
    pub async fn execute(&mut self) -> SourceResult<()> {
        if self.state == StreamState::Closed {
            return Err(DataSourceError::execution("execute on closed query"));
        }
        if let Some(native) = self.native.as_mut() {
            native.execute().await?;
        }
        self.state = StreamState::Streaming;
        Ok(())
    }

    /// Next row, or `None` exactly once at end of stream.
    ///
    /// Fetching again after end of stream, before `execute`, or after
    /// `close` is an execution error. A mid-stream failure closes the cursor
    /// first and then rethrows, so the same cursor cannot be reused.
    pub async fn fetch(&mut self) -> SourceResult<Option<FetchedRow>> {
        match self.state {
            StreamState::Prepared => Err(DataSourceError::execution("fetch before execute")),
            StreamState::Closed => Err(DataSourceError::execution("fetch on closed query")),
            StreamState::Drained => Err(DataSourceError::execution("fetch after end of stream")),
            StreamState::Streaming => {
                let Some(native) = self.native.as_mut() else {
                    self.state = StreamState::Drained;
                    return Ok(None);
                };
                match native.fetch().await {
                    Ok(Some(row)) => Ok(Some(row)),
                    Ok(None) => {
                        self.state = StreamState::Drained;
                        Ok(None)
                    }
                    Err(err) => {
                        self.close().await;
                        Err(err)
                    }
                }
            }
        }
    }

    /// True once the stream has been consumed to the end.
    pub fn is_drained(&self) -> bool {
        self.state == StreamState::Drained
    }

    /// Releases backend cursor resources. Idempotent; close-time backend
    /// errors are logged and never thrown, so they cannot mask an earlier,
    /// more meaningful error.
    pub async fn close(&mut self) {
        if let Some(mut native) = self.native.take() {
            if let Err(err) = native.close().await {
                warn!(type_name = %self.type_name, error = %err, "error closing native query; ignored");
            }
        }
        self.state = StreamState::Closed;
    }

    /// Number of rows matching this query.
    ///
    /// Without spatial constraints the backend counts natively in one round
    /// trip. With them it cannot, so a fresh geometry-column-only query with
    /// the same constraints is streamed to completion and counted locally.
    #[instrument(skip(self), fields(type_name = %self.type_name))]
    pub async fn count(&self) -> SourceResult<u64> {
        let Some(spec) = self.spec.as_ref() else {
            return Ok(0);
        };
        let conn = self.pool.acquire_ready().await?;
        let result = Self::count_on(&conn, spec).await;
        self.pool.release(conn);
        result
    }

    async fn count_on(conn: &PooledConnection, spec: &NativeQuerySpec) -> SourceResult<u64> {
        if spec.spatial_constraints.is_empty() {
            return conn
                .session()
                .count(&spec.type_name, spec.where_clause.as_deref())
                .await;
        }

        debug!("spatial constraints present; counting by streaming");
        let geometry_column = conn.session().geometry_column(&spec.type_name).await?;
        let count_spec = NativeQuerySpec {
            type_name: spec.type_name.clone(),
            columns: vec![geometry_column],
            where_clause: spec.where_clause.clone(),
            spatial_constraints: spec.spatial_constraints.clone(),
        };
        let mut native = conn.session().prepare(&count_spec).await?;
        let counted = async {
            native.execute().await?;
            let mut rows = 0u64;
            while native.fetch().await?.is_some() {
                rows += 1;
            }
            Ok(rows)
        }
        .await;
        if let Err(err) = native.close().await {
            warn!(error = %err, "error closing count cursor; ignored");
        }
        counted
    }

    /// Bounding box of the rows matching this query.
    ///
    /// For an unconstrained query this is the backend's precomputed layer
    /// extent: one round trip, possibly wider than the tight bound, never
    /// tighter. Otherwise the backend computes the extent over a fresh query
    /// with the same spec — extent cannot be computed on a cursor already
    /// streaming.
    #[instrument(skip(self), fields(type_name = %self.type_name))]
    pub async fn extent(&self) -> SourceResult<Extent> {
        let Some(spec) = self.spec.as_ref() else {
            return Ok(Extent::empty());
        };
        let conn = self.pool.acquire_ready().await?;
        let result = Self::extent_on(&conn, spec).await;
        self.pool.release(conn);
        result
    }

    async fn extent_on(conn: &PooledConnection, spec: &NativeQuerySpec) -> SourceResult<Extent> {
        if spec.where_clause.is_none() && spec.spatial_constraints.is_empty() {
            conn.session().layer_extent(&spec.type_name).await
        } else {
            conn.session().query_extent(spec).await
        }
    }

    /// Row count for a query that was never opened — no cursor is prepared.
    pub async fn count_for(
        pool: &Arc<ConnectionPool>,
        query: &Query,
        filters: &FilterSet,
    ) -> SourceResult<u64> {
        let Some(spec) = Self::aggregate_spec(query, filters)? else {
            return Ok(0);
        };
        let conn = pool.acquire_ready().await?;
        let result = Self::count_on(&conn, &spec).await;
        pool.release(conn);
        result
    }

    /// Extent for a query that was never opened — no cursor is prepared.
    pub async fn extent_for(
        pool: &Arc<ConnectionPool>,
        query: &Query,
        filters: &FilterSet,
    ) -> SourceResult<Extent> {
        let Some(spec) = Self::aggregate_spec(query, filters)? else {
            return Ok(Extent::empty());
        };
        let conn = pool.acquire_ready().await?;
        let result = Self::extent_on(&conn, &spec).await;
        pool.release(conn);
        result
    }

    fn aggregate_spec(query: &Query, filters: &FilterSet) -> SourceResult<Option<NativeQuerySpec>> {
        if filters.excludes_all() {
            return Ok(None);
        }
        Ok(Some(NativeQuerySpec {
            type_name: query.type_name.clone(),
            columns: query.property_names.clone(),
            where_clause: filters.sql_where_clause()?,
            spatial_constraints: filters.spatial_constraints()?,
        }))
    }
}
