//! Feature cursor
//!
//! Iteration-style wrapper over a [`ManagedQuery`]. Yields one [`Feature`]
//! per row with the id synthesized as `"<type_name>.<row_id>"`, and closes
//! the query proactively on end of stream so the pool slot is freed even if
//! the consumer never calls `close`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::engine::error::SourceResult;
use crate::engine::filter::{evaluate, Predicate};
use crate::engine::query::ManagedQuery;
use crate::engine::types::Value;

/// One reconstructed row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// `"<type_name>.<row_id>"`
    pub id: String,
    /// One value per cursor column, in column order.
    pub values: Vec<Value>,
}

/// Streaming cursor over the natively-filtered rows of one query.
///
/// The backend only saw the supported parts of the predicate; rows failing
/// the [`residual`](Self::residual) must still be skipped by the consumer,
/// e.g. via [`matches_residual`](Self::matches_residual).
pub struct FeatureCursor {
    query: ManagedQuery,
    residual: Predicate,
    finished: bool,
}

impl FeatureCursor {
    pub(crate) fn new(query: ManagedQuery, residual: Predicate) -> Self {
        Self {
            query,
            residual,
            finished: false,
        }
    }

    pub fn columns(&self) -> &[String] {
        self.query.columns()
    }

    /// The predicate part the backend could not execute.
    pub fn residual(&self) -> &Predicate {
        &self.residual
    }

    /// Next feature, or `None` at end of stream.
    ///
    /// Unlike [`ManagedQuery::fetch`], calling again after the end keeps
    /// returning `None`; the underlying query is closed as soon as the
    /// stream ends.
    pub async fn next(&mut self) -> SourceResult<Option<Feature>> {
        if self.finished {
            return Ok(None);
        }
        match self.query.fetch().await {
            Ok(Some(row)) => Ok(Some(Feature {
                id: format!("{}.{}", self.query.type_name(), row.row_id),
                values: row.values,
            })),
            Ok(None) => {
                self.finished = true;
                self.query.close().await;
                Ok(None)
            }
            // fetch already closed the cursor on a mid-stream failure.
            Err(err) => {
                self.finished = true;
                Err(err)
            }
        }
    }

    /// Evaluates the residual against one yielded feature.
    pub fn matches_residual(&self, feature: &Feature) -> bool {
        let attributes: HashMap<String, Value> = self
            .query
            .columns()
            .iter()
            .cloned()
            .zip(feature.values.iter().cloned())
            .collect();
        evaluate(&self.residual, &attributes)
    }

    /// Idempotent early close.
    pub async fn close(&mut self) {
        self.finished = true;
        self.query.close().await;
    }
}
