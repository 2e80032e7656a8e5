//! Pool registry
//!
//! One [`ConnectionPool`] per distinct endpoint config, created lazily. The
//! registry is an explicit object owned by the application's top-level
//! context and passed by handle; shutdown is explicit too, closing every
//! cached pool. Creation is serialized under the map lock so concurrent
//! first-requesters for the same config never build two pools.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::engine::error::SourceResult;
use crate::engine::pool::ConnectionPool;
use crate::engine::traits::SessionFactory;
use crate::engine::types::ConnectionConfig;

/// Cache of connection pools keyed by endpoint identity
pub struct PoolRegistry {
    factory: Arc<dyn SessionFactory>,
    // ConnectionConfig equality/hash covers the endpoint identity subset
    // only, so tuning differences do not fork pools.
    pools: Mutex<HashMap<ConnectionConfig, Arc<ConnectionPool>>>,
}

impl PoolRegistry {
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            factory,
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the pool for this endpoint, creating it on first request.
    ///
    /// Pool construction is fatal on session-creation failure and nothing is
    /// cached in that case; the next request retries from scratch.
    #[instrument(
        skip(self, config),
        fields(
            host = %config.server_host,
            port = config.port,
            instance = %config.database_instance,
            user = %config.user_name
        )
    )]
    pub async fn get_or_create(
        &self,
        config: &ConnectionConfig,
    ) -> SourceResult<Arc<ConnectionPool>> {
        let mut pools = self.pools.lock().await;
        if let Some(pool) = pools.get(config) {
            return Ok(Arc::clone(pool));
        }
        debug!("creating connection pool for new endpoint");
        let pool = Arc::new(
            ConnectionPool::connect(config.clone(), Arc::clone(&self.factory)).await?,
        );
        pools.insert(config.clone(), Arc::clone(&pool));
        Ok(pool)
    }

    /// Number of cached pools.
    pub async fn len(&self) -> usize {
        self.pools.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pools.lock().await.is_empty()
    }

    /// Closes every cached pool and forgets it.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        let drained: Vec<Arc<ConnectionPool>> = {
            let mut pools = self.pools.lock().await;
            pools.drain().map(|(_, pool)| pool).collect()
        };
        for pool in drained {
            pool.close_all().await;
        }
        debug!("pool registry shut down");
    }
}
