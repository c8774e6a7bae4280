//! # Pipeline Resolver
//!
//! Multi-stage resolvers for API operations. Each operation runs an ordered
//! list of stages against a shared per-invocation context; each stage makes
//! exactly one data source call.

pub mod context;
pub mod data_source;
pub mod errors;
pub mod operation;
pub mod pipeline;
pub mod stage;

pub use context::{Context, Stash};
pub use data_source::{CallDescription, DataSource, NoneDataSource, TableDataSource};
pub use errors::{
    DataSourceError, RegistryError, ResolverError, ResolverResult, StageRef, TransformError,
    TransformResult,
};
pub use operation::{BoundStage, Operation, OperationBuilder, OperationId, OperationRegistry};
pub use pipeline::{ResolveRequest, ResolverEngine};
pub use stage::{FnStage, Stage};
