// SPDX-License-Identifier: Apache-2.0

//! Normalized error types for the spatial data-access layer
//!
//! Backend-specific failures are mapped to these unified kinds so callers can
//! tell backpressure (`PoolExhausted`) apart from fatal conditions.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::types::ConnectionConfig;

/// Unified error type for all data-source operations
#[derive(Debug, Error, Serialize, Deserialize)]
pub enum DataSourceError {
    /// A backend session could not be created (bad host, credentials, network).
    /// Fatal: no partially-usable pool remains.
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    /// No connection became available within the configured timeout.
    /// Recoverable backpressure, not a hard failure.
    #[error(
        "Connection pool exhausted for {}@{}:{}: {in_use} connection(s) in use",
        .config.user_name, .config.server_host, .config.port
    )]
    PoolExhausted {
        in_use: usize,
        config: ConnectionConfig,
    },

    /// The pool was shut down; no further acquisitions can succeed.
    #[error("Connection pool is closed")]
    PoolClosed,

    /// A predicate or projection could not be rendered by the encoder that
    /// claimed to support it. Indicates an encoder defect.
    #[error("Query translation error: {message}")]
    Translation { message: String },

    /// A query failed mid-stream; the cursor has been closed.
    #[error("Query execution error: {message}")]
    Execution { message: String },

    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DataSourceError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed { message: msg.into() }
    }

    pub fn translation(msg: impl Into<String>) -> Self {
        Self::Translation { message: msg.into() }
    }

    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution { message: msg.into() }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal { message: msg.into() }
    }

    /// True for the non-fatal backpressure kind.
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, Self::PoolExhausted { .. })
    }
}

/// Result type alias for data-source operations
pub type SourceResult<T> = Result<T, DataSourceError>;
