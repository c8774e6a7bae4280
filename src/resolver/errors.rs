//! # Resolver Errors
//!
//! Taxonomy surfaced to API callers: authentication failures are raised
//! before any stage runs; stage failures name the stage that raised; data
//! source failures name the stage and the data source, and are never retried
//! here.

use std::fmt;

use thiserror::Error;

use super::operation::OperationId;
use crate::auth::{AuthError, RoleClass};
use crate::store::StoreError;

/// Result type for pipeline execution
pub type ResolverResult<T> = Result<T, ResolverError>;

/// Result type for stage and operation transforms
pub type TransformResult<T> = Result<T, TransformError>;

/// Result type for data source calls
pub type DataSourceResult<T> = Result<T, DataSourceError>;

/// Which part of a pipeline failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageRef {
    /// The operation's opening transform
    Before,
    /// A registered stage; `index` is 1-based registration order
    Stage { index: usize, name: String },
    /// The operation's closing transform
    After,
}

impl StageRef {
    pub fn stage(index: usize, name: impl Into<String>) -> Self {
        StageRef::Stage {
            index,
            name: name.into(),
        }
    }

    /// 1-based stage index, if this is a registered stage
    pub fn index(&self) -> Option<usize> {
        match self {
            StageRef::Stage { index, .. } => Some(*index),
            _ => None,
        }
    }
}

impl fmt::Display for StageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageRef::Before => write!(f, "before"),
            StageRef::Stage { index, name } => write!(f, "stage {} ({})", index, name),
            StageRef::After => write!(f, "after"),
        }
    }
}

/// Raised by a request or response transform
#[derive(Debug, Clone, Error)]
pub enum TransformError {
    #[error("Missing argument: {0}")]
    MissingArgument(String),

    #[error("Invalid argument '{name}': {reason}")]
    InvalidArgument { name: String, reason: String },

    /// The stash is append-only
    #[error("Stash key already set: {0}")]
    StashConflict(String),

    #[error("Missing stash entry: {0}")]
    MissingStash(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// An error raised explicitly by transform logic
    #[error("{0}")]
    Raised(String),

    #[error("Item conversion failed: {0}")]
    Item(#[from] StoreError),
}

impl TransformError {
    pub fn raised(msg: impl Into<String>) -> Self {
        TransformError::Raised(msg.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            TransformError::MissingArgument(_) => "MISSING_ARGUMENT",
            TransformError::InvalidArgument { .. } => "INVALID_ARGUMENT",
            TransformError::StashConflict(_) => "STASH_CONFLICT",
            TransformError::MissingStash(_) => "MISSING_STASH",
            TransformError::NotFound(_) => "NOT_FOUND",
            TransformError::Unauthorized(_) => "UNAUTHORIZED",
            TransformError::Raised(_) => "RAISED",
            TransformError::Item(_) => "INVALID_ITEM",
        }
    }
}

/// Failure of a single data source call
#[derive(Debug, Clone, Error)]
pub enum DataSourceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Data source '{data_source}' does not support {call}")]
    Unsupported {
        data_source: String,
        call: &'static str,
    },
}

impl DataSourceError {
    pub fn code(&self) -> &'static str {
        match self {
            DataSourceError::Store(e) => e.code(),
            DataSourceError::Unsupported { .. } => "UNSUPPORTED_CALL",
        }
    }
}

/// Operation registration errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Operation already registered: {0}")]
    DuplicateOperation(OperationId),

    #[error("Data source already registered: {0}")]
    DuplicateDataSource(String),

    #[error("Stage '{stage}' of {operation} is bound to unknown data source '{binding}'")]
    UnknownDataSource {
        operation: OperationId,
        stage: String,
        binding: String,
    },

    #[error("Operation {0} has no stages")]
    EmptyPipeline(OperationId),

    #[error("Operation {operation} registers stage '{stage}' twice")]
    DuplicateStage { operation: OperationId, stage: String },
}

/// Errors returned to API callers
#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("Authentication failed: {0}")]
    Authentication(#[from] AuthError),

    #[error("Role '{role}' may not invoke {operation}")]
    Unauthorized {
        operation: OperationId,
        role: RoleClass,
    },

    #[error("Operation not found: {0}")]
    OperationNotFound(OperationId),

    #[error("Pipeline failed at {stage}: {cause}")]
    PipelineStage {
        stage: StageRef,
        #[source]
        cause: TransformError,
    },

    #[error("Data source '{data_source}' failed at {stage}: {cause}")]
    DataSource {
        stage: StageRef,
        data_source: String,
        #[source]
        cause: DataSourceError,
    },
}

impl ResolverError {
    /// The failing stage, for stage and data source errors
    pub fn stage(&self) -> Option<&StageRef> {
        match self {
            ResolverError::PipelineStage { stage, .. } | ResolverError::DataSource { stage, .. } => {
                Some(stage)
            }
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ResolverError::Authentication(_) => "AUTHENTICATION_ERROR",
            ResolverError::Unauthorized { .. } => "UNAUTHORIZED",
            ResolverError::OperationNotFound(_) => "OPERATION_NOT_FOUND",
            ResolverError::PipelineStage { .. } => "PIPELINE_STAGE_ERROR",
            ResolverError::DataSource { .. } => "DATA_SOURCE_ERROR",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ResolverError::Authentication(e) => e.status_code(),
            ResolverError::Unauthorized { .. } => 403,
            ResolverError::OperationNotFound(_) => 404,
            ResolverError::PipelineStage { cause, .. } => match cause {
                TransformError::NotFound(_) => 404,
                TransformError::Unauthorized(_) => 403,
                TransformError::StashConflict(_) | TransformError::MissingStash(_) => 500,
                _ => 400,
            },
            ResolverError::DataSource { cause, .. } => match cause {
                DataSourceError::Store(StoreError::ConditionalCheckFailed { .. }) => 409,
                DataSourceError::Store(StoreError::Internal(_)) => 500,
                DataSourceError::Store(_) => 400,
                DataSourceError::Unsupported { .. } => 500,
            },
        }
    }
}
