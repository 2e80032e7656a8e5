//! Predicate decomposition
//!
//! [`FilterSet`] splits a predicate into the part the backend can run as a
//! SQL where-clause, the part it can run as native spatial constraints, and
//! an unsupported residual the caller must still apply. The split works on
//! AND-joined top-level conjuncts only: a disjunction or negation at the root
//! is passed through whole as unsupported, never distributed, even when every
//! leaf would be supported on its own.

use std::sync::Arc;

use crate::engine::error::{DataSourceError, SourceResult};
use crate::engine::filter::{
    conjuncts, supported, CompareOp, FilterCapabilities, Predicate, PredicateKind,
};
use crate::engine::types::{SpatialConstraint, Value};

/// Renders supported conjuncts as backend SQL where-clause text
pub trait SqlEncoder: Send + Sync {
    fn capabilities(&self) -> &FilterCapabilities;

    /// Renders the conjuncts as one AND-joined where clause. `None` when
    /// there is nothing to render.
    fn encode_where(&self, parts: &[Predicate]) -> SourceResult<Option<String>>;
}

/// Renders supported conjuncts as backend-native spatial constraint objects
pub trait SpatialEncoder: Send + Sync {
    fn capabilities(&self) -> &FilterCapabilities;

    fn encode_constraints(&self, parts: &[Predicate]) -> SourceResult<Vec<SpatialConstraint>>;
}

/// Default where-clause encoder: scalar comparisons, LIKE, and null checks.
///
/// Deliberately claims no `Or`/`Not` capability so whole disjunctions and
/// negations fall through to the residual.
pub struct SqlWhereEncoder {
    capabilities: FilterCapabilities,
}

impl SqlWhereEncoder {
    pub fn new() -> Self {
        Self {
            capabilities: FilterCapabilities::new()
                .with_kind(PredicateKind::Compare)
                .with_kind(PredicateKind::Like)
                .with_kind(PredicateKind::Null)
                .with_all_compare_ops(),
        }
    }

    pub fn with_capabilities(capabilities: FilterCapabilities) -> Self {
        Self { capabilities }
    }

    fn render(&self, predicate: &Predicate) -> SourceResult<String> {
        match predicate {
            Predicate::Compare { attribute, op, value } => Ok(format!(
                "{} {} {}",
                quote_ident(attribute),
                compare_op_sql(*op),
                format_literal(value)?
            )),
            Predicate::Like { attribute, pattern } => Ok(format!(
                "{} LIKE {}",
                quote_ident(attribute),
                escape_string(pattern)
            )),
            Predicate::Null { attribute, negated } => Ok(format!(
                "{} IS{} NULL",
                quote_ident(attribute),
                if *negated { " NOT" } else { "" }
            )),
            other => Err(DataSourceError::translation(format!(
                "sql encoder cannot render {:?} predicate",
                other.kind()
            ))),
        }
    }
}

impl Default for SqlWhereEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlEncoder for SqlWhereEncoder {
    fn capabilities(&self) -> &FilterCapabilities {
        &self.capabilities
    }

    fn encode_where(&self, parts: &[Predicate]) -> SourceResult<Option<String>> {
        if parts.is_empty() {
            return Ok(None);
        }
        let rendered: Vec<String> = parts
            .iter()
            .map(|part| self.render(part))
            .collect::<SourceResult<_>>()?;
        Ok(Some(rendered.join(" AND ")))
    }
}

/// Default spatial encoder: one constraint object per spatial conjunct
pub struct EnvelopeSpatialEncoder {
    capabilities: FilterCapabilities,
}

impl EnvelopeSpatialEncoder {
    pub fn new() -> Self {
        Self {
            capabilities: FilterCapabilities::new()
                .with_kind(PredicateKind::Spatial)
                .with_all_spatial_ops(),
        }
    }

    pub fn with_capabilities(capabilities: FilterCapabilities) -> Self {
        Self { capabilities }
    }
}

impl Default for EnvelopeSpatialEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SpatialEncoder for EnvelopeSpatialEncoder {
    fn capabilities(&self) -> &FilterCapabilities {
        &self.capabilities
    }

    fn encode_constraints(&self, parts: &[Predicate]) -> SourceResult<Vec<SpatialConstraint>> {
        parts
            .iter()
            .map(|part| match part {
                Predicate::Spatial { attribute, op, geometry } => Ok(SpatialConstraint {
                    column: attribute.clone(),
                    op: *op,
                    geometry: geometry.clone(),
                }),
                other => Err(DataSourceError::translation(format!(
                    "spatial encoder cannot render {:?} predicate",
                    other.kind()
                ))),
            })
            .collect()
    }
}

fn compare_op_sql(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Eq => "=",
        CompareOp::Neq => "<>",
        CompareOp::Gt => ">",
        CompareOp::Gte => ">=",
        CompareOp::Lt => "<",
        CompareOp::Lte => "<=",
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn escape_string(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn format_literal(value: &Value) -> SourceResult<String> {
    match value {
        Value::Null => Ok("NULL".to_string()),
        Value::Bool(b) => Ok(if *b { "TRUE" } else { "FALSE" }.to_string()),
        Value::Int(i) => Ok(i.to_string()),
        Value::Float(f) => Ok(format!("{}", f)),
        Value::Text(s) => Ok(escape_string(s)),
        Value::Bytes(bytes) => {
            let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
            Ok(format!("'\\x{}'", hex))
        }
        Value::Json(json) => {
            let text = serde_json::to_string(json)
                .map_err(|e| DataSourceError::translation(e.to_string()))?;
            Ok(escape_string(&text))
        }
        Value::Array(_) | Value::Geometry(_) => Err(DataSourceError::translation(
            "array and geometry literals have no SQL rendering in this dialect",
        )),
    }
}

/// The three-way split of one source predicate.
///
/// Immutable once built; `sql_filter() AND geometry_filter() AND
/// unsupported_filter()` is logically equivalent to the source predicate.
pub struct FilterSet {
    source: Predicate,
    sql: Vec<Predicate>,
    spatial: Vec<Predicate>,
    unsupported: Vec<Predicate>,
    excludes_all: bool,
    sql_encoder: Arc<dyn SqlEncoder>,
    spatial_encoder: Arc<dyn SpatialEncoder>,
}

impl FilterSet {
    pub fn new(
        source: Predicate,
        sql_encoder: Arc<dyn SqlEncoder>,
        spatial_encoder: Arc<dyn SpatialEncoder>,
    ) -> Self {
        let mut sql = Vec::new();
        let mut spatial = Vec::new();
        let mut unsupported = Vec::new();
        let mut excludes_all = false;

        for conjunct in conjuncts(&source) {
            match conjunct {
                // Tautologies add nothing to any part.
                Predicate::IncludeAll => {}
                // One impossible conjunct makes the whole query impossible.
                Predicate::ExcludeAll => excludes_all = true,
                other if supported(sql_encoder.capabilities(), &other) => sql.push(other),
                other if supported(spatial_encoder.capabilities(), &other) => spatial.push(other),
                other => unsupported.push(other),
            }
        }

        Self {
            source,
            sql,
            spatial,
            unsupported,
            excludes_all,
            sql_encoder,
            spatial_encoder,
        }
    }

    pub fn source(&self) -> &Predicate {
        &self.source
    }

    /// True when the source predicate can match no row at all; the caller
    /// must not build a native query.
    pub fn excludes_all(&self) -> bool {
        self.excludes_all
    }

    pub fn sql_filter(&self) -> Predicate {
        and_join(&self.sql)
    }

    pub fn geometry_filter(&self) -> Predicate {
        and_join(&self.spatial)
    }

    /// The residual the caller applies post-hoc.
    pub fn unsupported_filter(&self) -> Predicate {
        and_join(&self.unsupported)
    }

    pub fn has_spatial_part(&self) -> bool {
        !self.spatial.is_empty()
    }

    /// Renders the sql part as backend where-clause text; `None` when the
    /// part is empty or tautological.
    pub fn sql_where_clause(&self) -> SourceResult<Option<String>> {
        self.sql_encoder.encode_where(&self.sql)
    }

    /// Renders the geometry part as native spatial constraint objects.
    pub fn spatial_constraints(&self) -> SourceResult<Vec<SpatialConstraint>> {
        self.spatial_encoder.encode_constraints(&self.spatial)
    }
}

fn and_join(parts: &[Predicate]) -> Predicate {
    match parts {
        [] => Predicate::IncludeAll,
        [single] => single.clone(),
        many => Predicate::And(many.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::filter::{evaluate, SpatialOp};
    use crate::engine::types::{Extent, Geometry};
    use std::collections::HashMap;

    fn encoders() -> (Arc<dyn SqlEncoder>, Arc<dyn SpatialEncoder>) {
        (
            Arc::new(SqlWhereEncoder::new()),
            Arc::new(EnvelopeSpatialEncoder::new()),
        )
    }

    fn sample_rows() -> Vec<HashMap<String, Value>> {
        let geometries = [
            Extent::new(0.0, 0.0, 1.0, 1.0),
            Extent::new(50.0, 50.0, 60.0, 60.0),
        ];
        let mut rows = Vec::new();
        for name in ["road", "river", "rail"] {
            for depth in [1_i64, 20] {
                for extent in geometries {
                    let mut row = HashMap::new();
                    row.insert("name".to_string(), Value::Text(name.to_string()));
                    row.insert("depth".to_string(), Value::Int(depth));
                    row.insert(
                        "shape".to_string(),
                        Value::Geometry(Geometry::Envelope(extent)),
                    );
                    rows.push(row);
                }
            }
        }
        rows
    }

    #[test]
    fn splits_conjunction_across_encoders() {
        let a = Predicate::compare("depth", CompareOp::Gt, Value::Int(5));
        let b = Predicate::spatial(
            "shape",
            SpatialOp::Intersects,
            Geometry::Envelope(Extent::new(0.0, 0.0, 10.0, 10.0)),
        );
        let c = Predicate::like("name", "r%");
        let source = Predicate::and(vec![a.clone(), b.clone(), c.clone()]);

        let (sql_enc, spatial_enc) = encoders();
        let set = FilterSet::new(source.clone(), sql_enc, spatial_enc);

        assert_eq!(set.sql_filter(), Predicate::And(vec![a, c]));
        assert_eq!(set.geometry_filter(), b);
        assert_eq!(set.unsupported_filter(), Predicate::IncludeAll);

        // Recombined parts decide exactly like the source, row by row.
        let recombined = Predicate::and(vec![
            set.sql_filter(),
            set.geometry_filter(),
            set.unsupported_filter(),
        ]);
        for row in sample_rows() {
            assert_eq!(evaluate(&recombined, &row), evaluate(&source, &row));
        }
    }

    #[test]
    fn residual_keeps_recombination_equivalent() {
        // Not(...) is unsupported by both encoders and must land whole in the
        // residual without disturbing the supported parts.
        let a = Predicate::compare("depth", CompareOp::Lte, Value::Int(10));
        let residual = Predicate::not(Predicate::like("name", "ri%"));
        let source = Predicate::and(vec![a.clone(), residual.clone()]);

        let (sql_enc, spatial_enc) = encoders();
        let set = FilterSet::new(source.clone(), sql_enc, spatial_enc);

        assert_eq!(set.sql_filter(), a);
        assert_eq!(set.unsupported_filter(), residual);

        let recombined = Predicate::and(vec![
            set.sql_filter(),
            set.geometry_filter(),
            set.unsupported_filter(),
        ]);
        for row in sample_rows() {
            assert_eq!(evaluate(&recombined, &row), evaluate(&source, &row));
        }
    }

    #[test]
    fn disjunction_is_never_split() {
        let a = Predicate::compare("depth", CompareOp::Eq, Value::Int(1));
        let b = Predicate::compare("depth", CompareOp::Eq, Value::Int(2));
        let source = Predicate::or(vec![a, b]);

        let (sql_enc, spatial_enc) = encoders();
        let set = FilterSet::new(source.clone(), sql_enc, spatial_enc);

        assert_eq!(set.sql_filter(), Predicate::IncludeAll);
        assert_eq!(set.geometry_filter(), Predicate::IncludeAll);
        assert_eq!(set.unsupported_filter(), source);
        assert_eq!(set.sql_where_clause().unwrap(), None);
    }

    #[test]
    fn exclude_all_short_circuits() {
        let source = Predicate::and(vec![
            Predicate::compare("depth", CompareOp::Eq, Value::Int(1)),
            Predicate::ExcludeAll,
        ]);
        let (sql_enc, spatial_enc) = encoders();
        let set = FilterSet::new(source, sql_enc, spatial_enc);
        assert!(set.excludes_all());
    }

    #[test]
    fn include_all_renders_to_nothing() {
        let (sql_enc, spatial_enc) = encoders();
        let set = FilterSet::new(Predicate::IncludeAll, sql_enc, spatial_enc);
        assert!(!set.excludes_all());
        assert_eq!(set.sql_where_clause().unwrap(), None);
        assert!(set.spatial_constraints().unwrap().is_empty());
    }

    #[test]
    fn where_clause_rendering() {
        let source = Predicate::and(vec![
            Predicate::compare("depth", CompareOp::Gte, Value::Int(5)),
            Predicate::like("name", "it's %"),
            Predicate::is_null("surveyed"),
        ]);
        let (sql_enc, spatial_enc) = encoders();
        let set = FilterSet::new(source, sql_enc, spatial_enc);

        assert_eq!(
            set.sql_where_clause().unwrap().as_deref(),
            Some("\"depth\" >= 5 AND \"name\" LIKE 'it''s %' AND \"surveyed\" IS NULL")
        );
    }

    #[test]
    fn spatial_constraints_rendering() {
        let probe = Geometry::Envelope(Extent::new(1.0, 2.0, 3.0, 4.0));
        let source = Predicate::spatial("shape", SpatialOp::Within, probe.clone());
        let (sql_enc, spatial_enc) = encoders();
        let set = FilterSet::new(source, sql_enc, spatial_enc);

        let constraints = set.spatial_constraints().unwrap();
        assert_eq!(
            constraints,
            vec![SpatialConstraint {
                column: "shape".to_string(),
                op: SpatialOp::Within,
                geometry: probe,
            }]
        );
        assert_eq!(set.sql_where_clause().unwrap(), None);
    }

    #[test]
    fn narrowed_capabilities_shrink_the_native_part() {
        // An encoder that only renders equality pushes range comparisons into
        // the residual.
        let caps = FilterCapabilities::new()
            .with_kind(PredicateKind::Compare)
            .with_compare_op(CompareOp::Eq);
        let sql_enc: Arc<dyn SqlEncoder> = Arc::new(SqlWhereEncoder::with_capabilities(caps));
        let spatial_enc: Arc<dyn SpatialEncoder> = Arc::new(EnvelopeSpatialEncoder::new());

        let eq = Predicate::compare("a", CompareOp::Eq, Value::Int(1));
        let gt = Predicate::compare("b", CompareOp::Gt, Value::Int(2));
        let set = FilterSet::new(Predicate::and(vec![eq.clone(), gt.clone()]), sql_enc, spatial_enc);

        assert_eq!(set.sql_filter(), eq);
        assert_eq!(set.unsupported_filter(), gt);
    }
}
