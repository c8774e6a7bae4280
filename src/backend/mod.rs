//! # Backend Stack
//!
//! Assembles the whole backend from a `BackendConfig`:
//!
//! - user pool and the identity pool federating it
//! - the trip table and its change stream
//! - the API: data sources, trip operations, resolver engine
//! - the stream consumer projecting trip changes
//!
//! The stream poller attaches when the stack is built, so with
//! `StartingPosition::Latest` it sees only writes made after `build`.

mod errors;
pub mod trips;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;

pub use errors::{BackendError, BackendResult};

use crate::auth::{CodeDelivery, IdentityPool, InMemoryUserRepository, UserPool, UserPoolConfig};
use crate::cdc::{PollerConfig, ProjectionSink, StreamPoller, TripProjection, WorkerPool};
use crate::config::{BackendConfig, ResourceNames};
use crate::observability::{Logger, MetricsRegistry};
use crate::resolver::{
    NoneDataSource, OperationRegistry, ResolveRequest, ResolverEngine, ResolverResult,
    TableDataSource,
};
use crate::store::{Table, TableConfig};

/// Every runtime component of the backend
pub struct BackendStack {
    config: BackendConfig,
    names: ResourceNames,
    metrics: Arc<MetricsRegistry>,
    user_pool: Arc<UserPool>,
    identity_pool: Arc<IdentityPool>,
    table: Arc<Table>,
    engine: ResolverEngine,
    poller: Arc<StreamPoller>,
    projection: Arc<TripProjection>,
}

impl BackendStack {
    /// Build all components; `delivery` sends verification and recovery codes
    pub fn build(config: BackendConfig, delivery: Arc<dyn CodeDelivery>) -> BackendResult<Self> {
        config.validate()?;
        let names = config.resource_names();
        let metrics = Arc::new(MetricsRegistry::new());

        let user_pool = Arc::new(UserPool::new(
            UserPoolConfig {
                pool_name: names.user_pool.clone(),
                client_name: names.user_pool_client.clone(),
                password_policy: config.auth.password_policy.clone(),
                jwt_secret: config.auth.jwt.secret.clone(),
                token_ttl: chrono::Duration::minutes(config.auth.jwt.ttl_minutes),
                code_ttl: chrono::Duration::minutes(config.auth.code_ttl_minutes),
            },
            Arc::new(InMemoryUserRepository::new()),
            delivery,
        )?);
        let identity_pool = Arc::new(IdentityPool::new(
            names.identity_pool.clone(),
            config.auth.allow_unauthenticated_identities,
            user_pool.clone(),
        ));

        let table = Arc::new(Table::new(TableConfig {
            name: config.table.name.clone(),
            partition_key: "id".to_string(),
            stream_partitions: config.table.partitions,
        }));

        let mut registry = OperationRegistry::new();
        registry.add_data_source(Arc::new(TableDataSource::new(
            trips::TRIP_TABLE_SOURCE,
            Arc::clone(&table),
        )))?;
        registry.add_data_source(Arc::new(NoneDataSource::new(trips::NONE_SOURCE)))?;
        trips::register(&mut registry)?;

        let engine = ResolverEngine::new(
            Arc::new(registry),
            Arc::clone(&identity_pool),
            Arc::clone(&metrics),
        );

        let stream_config = &config.functions.trip_table_stream;
        let poller = Arc::new(StreamPoller::new(
            table.stream(),
            PollerConfig {
                batch_size: stream_config.batch_size,
                starting_position: stream_config.starting_position,
                visibility_timeout: Duration::from_millis(stream_config.visibility_timeout_ms),
                redelivery_backoff: Duration::from_millis(stream_config.redelivery_backoff_ms),
                max_redelivery_backoff: Duration::from_millis(
                    stream_config.max_redelivery_backoff_ms,
                ),
                ..PollerConfig::default()
            },
        ));
        let projection = Arc::new(TripProjection::new(
            Arc::new(ProjectionSink::new()),
            Arc::clone(&metrics),
        ));

        let operations = engine.registry().operations().len().to_string();
        Logger::info(
            "BACKEND_READY",
            &[("api", &names.api), ("table", &names.table), ("operations", &operations)],
        );

        Ok(Self {
            config,
            names,
            metrics,
            user_pool,
            identity_pool,
            table,
            engine,
            poller,
            projection,
        })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn names(&self) -> &ResourceNames {
        &self.names
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    pub fn user_pool(&self) -> &UserPool {
        &self.user_pool
    }

    pub fn identity_pool(&self) -> &IdentityPool {
        &self.identity_pool
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn engine(&self) -> &ResolverEngine {
        &self.engine
    }

    pub fn poller(&self) -> Arc<StreamPoller> {
        Arc::clone(&self.poller)
    }

    pub fn projection(&self) -> &TripProjection {
        &self.projection
    }

    /// Execute one API call
    pub async fn resolve(&self, request: ResolveRequest) -> ResolverResult<Value> {
        self.engine.execute(request).await
    }

    /// Start the configured number of stream workers
    pub fn start_stream_consumer(&self, shutdown: watch::Receiver<bool>) -> WorkerPool {
        let stream_config = &self.config.functions.trip_table_stream;
        WorkerPool::spawn(
            &self.names.stream_function,
            stream_config.workers,
            self.poller.clone(),
            self.projection.clone(),
            Arc::clone(&self.metrics),
            Some(Duration::from_millis(stream_config.batch_timeout_ms)),
            shutdown,
        )
    }
}
