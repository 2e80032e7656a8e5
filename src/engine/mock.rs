//! In-memory backend used by the engine tests
//!
//! Implements the session traits over a handful of hash maps, with switches
//! for injecting connection, translation, and mid-stream failures. Spatial
//! constraints are honored envelope-wise; where-clause text is accepted and
//! recorded but not parsed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::engine::error::{DataSourceError, SourceResult};
use crate::engine::filter::SpatialOp;
use crate::engine::traits::{NativeQuery, SessionFactory, SpatialSession};
use crate::engine::types::{ConnectionConfig, Extent, FetchedRow, NativeQuerySpec, Value};

pub(crate) struct MockRow {
    pub row_id: i64,
    pub attributes: HashMap<String, Value>,
}

impl MockRow {
    pub fn new(row_id: i64, pairs: Vec<(&str, Value)>) -> Self {
        Self {
            row_id,
            attributes: pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        }
    }

    fn geometry_envelope(&self, column: &str) -> Option<Extent> {
        match self.attributes.get(column) {
            Some(Value::Geometry(geometry)) => Some(geometry.envelope()),
            _ => None,
        }
    }
}

pub(crate) struct MockTable {
    pub columns: Vec<String>,
    pub geometry_column: String,
    /// What the backend reports as the precomputed layer extent; tests make
    /// it deliberately wider than the tight bound of the rows.
    pub declared_extent: Extent,
    pub rows: Vec<MockRow>,
}

/// Shared state behind every mock session
pub(crate) struct MockBackend {
    tables: Mutex<HashMap<String, MockTable>>,
    fail_connect: AtomicBool,
    fail_prepare: AtomicBool,
    fail_fetch_at: Mutex<Option<usize>>,
    sessions_created: AtomicUsize,
    sessions_closed: AtomicUsize,
    native_count_calls: AtomicUsize,
    layer_extent_calls: AtomicUsize,
    query_extent_calls: AtomicUsize,
    last_spec: Mutex<Option<NativeQuerySpec>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            fail_connect: AtomicBool::new(false),
            fail_prepare: AtomicBool::new(false),
            fail_fetch_at: Mutex::new(None),
            sessions_created: AtomicUsize::new(0),
            sessions_closed: AtomicUsize::new(0),
            native_count_calls: AtomicUsize::new(0),
            layer_extent_calls: AtomicUsize::new(0),
            query_extent_calls: AtomicUsize::new(0),
            last_spec: Mutex::new(None),
        }
    }

    pub fn insert_table(&self, type_name: &str, table: MockTable) {
        self.tables.lock().insert(type_name.to_string(), table);
    }

    pub fn factory(self: &Arc<Self>) -> Arc<dyn SessionFactory> {
        Arc::new(MockFactory {
            backend: Arc::clone(self),
        })
    }

    pub fn fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn fail_prepare(&self, fail: bool) {
        self.fail_prepare.store(fail, Ordering::SeqCst);
    }

    /// Makes the next prepared cursor fail on the fetch with this index.
    pub fn fail_fetch_at(&self, index: Option<usize>) {
        *self.fail_fetch_at.lock() = index;
    }

    pub fn sessions_created(&self) -> usize {
        self.sessions_created.load(Ordering::SeqCst)
    }

    pub fn sessions_closed(&self) -> usize {
        self.sessions_closed.load(Ordering::SeqCst)
    }

    pub fn native_count_calls(&self) -> usize {
        self.native_count_calls.load(Ordering::SeqCst)
    }

    pub fn layer_extent_calls(&self) -> usize {
        self.layer_extent_calls.load(Ordering::SeqCst)
    }

    pub fn query_extent_calls(&self) -> usize {
        self.query_extent_calls.load(Ordering::SeqCst)
    }

    pub fn last_spec(&self) -> Option<NativeQuerySpec> {
        self.last_spec.lock().clone()
    }

    fn with_table<T>(
        &self,
        type_name: &str,
        f: impl FnOnce(&MockTable) -> T,
    ) -> SourceResult<T> {
        let tables = self.tables.lock();
        tables
            .get(type_name)
            .map(f)
            .ok_or_else(|| DataSourceError::internal(format!("no such table: {type_name}")))
    }

    fn matching_rows(&self, spec: &NativeQuerySpec) -> SourceResult<Vec<FetchedRow>> {
        self.with_table(&spec.type_name, |table| {
            table
                .rows
                .iter()
                .filter(|row| {
                    spec.spatial_constraints.iter().all(|constraint| {
                        let Some(envelope) = row.geometry_envelope(&constraint.column) else {
                            return false;
                        };
                        let probe = constraint.geometry.envelope();
                        match constraint.op {
                            SpatialOp::Intersects => envelope.intersects(&probe),
                            SpatialOp::Contains => envelope.contains(&probe),
                            SpatialOp::Within => probe.contains(&envelope),
                            SpatialOp::Disjoint => !envelope.intersects(&probe),
                        }
                    })
                })
                .map(|row| FetchedRow {
                    row_id: row.row_id,
                    values: spec
                        .columns
                        .iter()
                        .map(|column| row.attributes.get(column).cloned().unwrap_or(Value::Null))
                        .collect(),
                })
                .collect()
        })
    }
}

struct MockFactory {
    backend: Arc<MockBackend>,
}

#[async_trait]
impl SessionFactory for MockFactory {
    async fn create_session(
        &self,
        _config: &ConnectionConfig,
    ) -> SourceResult<Box<dyn SpatialSession>> {
        if self.backend.fail_connect.load(Ordering::SeqCst) {
            return Err(DataSourceError::connection_failed(
                "mock backend refused the connection",
            ));
        }
        self.backend.sessions_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            backend: Arc::clone(&self.backend),
        }))
    }
}

struct MockSession {
    backend: Arc<MockBackend>,
}

#[async_trait]
impl SpatialSession for MockSession {
    async fn table_columns(&self, type_name: &str) -> SourceResult<Vec<String>> {
        self.backend.with_table(type_name, |table| table.columns.clone())
    }

    async fn geometry_column(&self, type_name: &str) -> SourceResult<String> {
        self.backend
            .with_table(type_name, |table| table.geometry_column.clone())
    }

    async fn prepare(&self, spec: &NativeQuerySpec) -> SourceResult<Box<dyn NativeQuery>> {
        *self.backend.last_spec.lock() = Some(spec.clone());
        if self.backend.fail_prepare.load(Ordering::SeqCst) {
            return Err(DataSourceError::translation("mock prepare failure"));
        }
        let rows = self.backend.matching_rows(spec)?;
        Ok(Box::new(MockQuery {
            rows,
            cursor: 0,
            executed: false,
            closed: false,
            fail_fetch_at: *self.backend.fail_fetch_at.lock(),
        }))
    }

    async fn count(&self, type_name: &str, _where_clause: Option<&str>) -> SourceResult<u64> {
        self.backend.native_count_calls.fetch_add(1, Ordering::SeqCst);
        self.backend
            .with_table(type_name, |table| table.rows.len() as u64)
    }

    async fn layer_extent(&self, type_name: &str) -> SourceResult<Extent> {
        self.backend.layer_extent_calls.fetch_add(1, Ordering::SeqCst);
        self.backend
            .with_table(type_name, |table| table.declared_extent)
    }

    async fn query_extent(&self, spec: &NativeQuerySpec) -> SourceResult<Extent> {
        self.backend.query_extent_calls.fetch_add(1, Ordering::SeqCst);
        let geometry_column = self
            .backend
            .with_table(&spec.type_name, |table| table.geometry_column.clone())?;
        let mut spec = spec.clone();
        if !spec.columns.contains(&geometry_column) {
            spec.columns.push(geometry_column.clone());
        }
        let rows = self.backend.matching_rows(&spec)?;
        let geometry_index = spec
            .columns
            .iter()
            .position(|c| *c == geometry_column)
            .expect("geometry column present");

        let mut extent = Extent::empty();
        for row in rows {
            if let Some(Value::Geometry(geometry)) = row.values.get(geometry_index) {
                extent.expand_to_include(&geometry.envelope());
            }
        }
        Ok(extent)
    }

    async fn close(&self) -> SourceResult<()> {
        self.backend.sessions_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MockQuery {
    rows: Vec<FetchedRow>,
    cursor: usize,
    executed: bool,
    closed: bool,
    fail_fetch_at: Option<usize>,
}

#[async_trait]
impl NativeQuery for MockQuery {
    async fn execute(&mut self) -> SourceResult<()> {
        if self.closed {
            return Err(DataSourceError::execution("execute on closed cursor"));
        }
        self.executed = true;
        Ok(())
    }

    async fn fetch(&mut self) -> SourceResult<Option<FetchedRow>> {
        if self.closed {
            return Err(DataSourceError::execution("fetch on closed cursor"));
        }
        if !self.executed {
            return Err(DataSourceError::execution("fetch before execute"));
        }
        if self.fail_fetch_at == Some(self.cursor) {
            return Err(DataSourceError::execution("injected fetch failure"));
        }
        if self.cursor < self.rows.len() {
            let row = self.rows[self.cursor].clone();
            self.cursor += 1;
            Ok(Some(row))
        } else {
            Ok(None)
        }
    }

    async fn close(&mut self) -> SourceResult<()> {
        self.closed = true;
        Ok(())
    }
}
