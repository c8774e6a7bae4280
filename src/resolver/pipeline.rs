//! # Pipeline Resolver
//!
//! Executes one operation invocation:
//!
//! 1. Resolve the caller identity. Failure here means no stage runs.
//! 2. Look up the operation and check the caller's role.
//! 3. Run the before transform.
//! 4. For each stage in order: request transform, one data source call,
//!    response transform. The response output becomes `prev`.
//! 5. Run the after transform; its output is the operation result.
//!
//! The first failure stops the pipeline. Data source failures are not
//! retried.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::context::Context;
use super::errors::{ResolverError, ResolverResult, StageRef};
use super::operation::{Operation, OperationId, OperationRegistry};
use crate::auth::IdentityPool;
use crate::observability::{Logger, MetricsRegistry};

/// An API call as received from a client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveRequest {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(rename = "field")]
    pub field_name: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl ResolveRequest {
    pub fn new(type_name: impl Into<String>, field_name: impl Into<String>, args: Value) -> Self {
        Self {
            type_name: type_name.into(),
            field_name: field_name.into(),
            args,
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn operation_id(&self) -> OperationId {
        OperationId::new(&self.type_name, &self.field_name)
    }
}

/// Resolves operations against the registry
pub struct ResolverEngine {
    registry: Arc<OperationRegistry>,
    identity: Arc<IdentityPool>,
    metrics: Arc<MetricsRegistry>,
}

impl ResolverEngine {
    pub fn new(
        registry: Arc<OperationRegistry>,
        identity: Arc<IdentityPool>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            registry,
            identity,
            metrics,
        }
    }

    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// Execute one invocation
    pub async fn execute(&self, request: ResolveRequest) -> ResolverResult<Value> {
        let id = request.operation_id();
        let op_name = id.to_string();

        let identity = match self.identity.resolve(request.token.as_deref()) {
            Ok(identity) => identity,
            Err(e) => {
                self.metrics.increment_operations_rejected();
                Logger::warn(
                    "OPERATION_REJECTED",
                    &[("operation", &op_name), ("code", e.code())],
                );
                return Err(e.into());
            }
        };

        let operation = match self.registry.get(&id) {
            Some(op) => op,
            None => {
                self.metrics.increment_operations_rejected();
                return Err(ResolverError::OperationNotFound(id));
            }
        };

        if !operation.allows(identity.role_class) {
            self.metrics.increment_operations_rejected();
            let role = identity.role_class.to_string();
            Logger::warn(
                "OPERATION_REJECTED",
                &[("operation", &op_name), ("role", &role), ("code", "UNAUTHORIZED")],
            );
            return Err(ResolverError::Unauthorized {
                operation: id,
                role: identity.role_class,
            });
        }

        let mut ctx = Context::new(id, identity, request.args);
        let request_id = ctx.request_id().to_string();
        let start = Instant::now();

        match self.run(&operation, &mut ctx).await {
            Ok(value) => {
                self.metrics.increment_operations_executed();
                let elapsed = start.elapsed().as_millis().to_string();
                Logger::info(
                    "OPERATION_COMPLETE",
                    &[
                        ("operation", &op_name),
                        ("request_id", &request_id),
                        ("duration_ms", &elapsed),
                    ],
                );
                Ok(value)
            }
            Err(e) => {
                self.metrics.increment_operations_failed();
                let stage = e.stage().map(ToString::to_string).unwrap_or_default();
                let message = e.to_string();
                Logger::error(
                    "STAGE_FAILED",
                    &[
                        ("operation", &op_name),
                        ("request_id", &request_id),
                        ("stage", &stage),
                        ("code", e.code()),
                        ("error", &message),
                    ],
                );
                Err(e)
            }
        }
    }

    async fn run(&self, operation: &Operation, ctx: &mut Context) -> ResolverResult<Value> {
        operation
            .run_before(ctx)
            .map_err(|cause| ResolverError::PipelineStage {
                stage: StageRef::Before,
                cause,
            })?;

        for (i, bound) in operation.stages().iter().enumerate() {
            let stage_ref = StageRef::stage(i + 1, bound.stage.name());

            let call = bound
                .stage
                .request(ctx)
                .map_err(|cause| ResolverError::PipelineStage {
                    stage: stage_ref.clone(),
                    cause,
                })?;

            self.metrics.increment_data_source_calls();
            Logger::trace(
                "DATA_SOURCE_CALL",
                &[
                    ("stage", bound.stage.name()),
                    ("data_source", bound.data_source.name()),
                    ("call", call.kind()),
                ],
            );
            let result =
                bound
                    .data_source
                    .invoke(call)
                    .await
                    .map_err(|cause| ResolverError::DataSource {
                        stage: stage_ref.clone(),
                        data_source: bound.data_source.name().to_string(),
                        cause,
                    })?;

            let output = bound
                .stage
                .response(ctx, result)
                .map_err(|cause| ResolverError::PipelineStage {
                    stage: stage_ref,
                    cause,
                })?;

            ctx.set_prev(output);
            self.metrics.increment_stages_executed();
        }

        operation
            .run_after(ctx)
            .map_err(|cause| ResolverError::PipelineStage {
                stage: StageRef::After,
                cause,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthResult, Identity, IdentityProvider};
    use crate::resolver::data_source::{CallDescription, NoneDataSource};
    use crate::resolver::errors::TransformError;
    use crate::resolver::operation::OperationBuilder;
    use crate::resolver::stage::FnStage;
    use serde_json::json;

    struct StaticProvider;

    impl IdentityProvider for StaticProvider {
        fn verify_token(&self, token: &str) -> AuthResult<Identity> {
            match token {
                "good" => Ok(Identity::authenticated("user-1")),
                _ => Err(crate::auth::AuthError::MalformedToken),
            }
        }
    }

    fn engine(allow_guests: bool, builders: Vec<OperationBuilder>) -> ResolverEngine {
        let mut registry = OperationRegistry::new();
        registry
            .add_data_source(Arc::new(NoneDataSource::new("Local")))
            .unwrap();
        for b in builders {
            registry.register(b).unwrap();
        }
        ResolverEngine::new(
            Arc::new(registry),
            Arc::new(IdentityPool::new("ids", allow_guests, Arc::new(StaticProvider))),
            Arc::new(MetricsRegistry::new()),
        )
    }

    fn echo(name: &str) -> FnStage {
        let name_owned = name.to_string();
        FnStage::new(name, move |ctx| {
            let prev = ctx.prev().cloned().unwrap_or(json!([]));
            let mut trail = prev.as_array().cloned().unwrap_or_default();
            trail.push(json!(name_owned));
            Ok(CallDescription::Local { payload: json!(trail) })
        })
    }

    #[tokio::test]
    async fn test_prev_threads_through_stages() {
        let engine = engine(
            false,
            vec![OperationBuilder::new("Query", "trail")
                .stage(echo("a"), "Local")
                .stage(echo("b"), "Local")
                .stage(echo("c"), "Local")],
        );

        let out = engine
            .execute(ResolveRequest::new("Query", "trail", json!({})).with_token("good"))
            .await
            .unwrap();
        assert_eq!(out, json!(["a", "b", "c"]));
        assert_eq!(engine.metrics().snapshot().stages_executed, 3);
    }

    #[tokio::test]
    async fn test_before_failure_runs_no_stage() {
        let engine = engine(
            false,
            vec![OperationBuilder::new("Query", "trail")
                .before(|_| Err(TransformError::raised("nope")))
                .stage(echo("a"), "Local")],
        );

        let err = engine
            .execute(ResolveRequest::new("Query", "trail", json!({})).with_token("good"))
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some(&StageRef::Before));
        assert_eq!(engine.metrics().snapshot().data_source_calls, 0);
    }

    #[tokio::test]
    async fn test_guest_role_checked() {
        let engine = engine(
            true,
            vec![OperationBuilder::new("Query", "trail").stage(echo("a"), "Local")],
        );

        let err = engine
            .execute(ResolveRequest::new("Query", "trail", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolverError::Unauthorized { .. }));
        assert_eq!(err.status_code(), 403);
    }

    #[tokio::test]
    async fn test_unknown_operation() {
        let engine = engine(false, vec![]);

        let err = engine
            .execute(ResolveRequest::new("Query", "missing", json!({})).with_token("good"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolverError::OperationNotFound(_)));
    }

    #[test]
    fn test_request_wire_names() {
        let req: ResolveRequest = serde_json::from_value(json!({
            "type": "Query",
            "field": "getTrip",
            "args": {"id": "a"},
            "token": "Bearer t"
        }))
        .unwrap();

        assert_eq!(req.operation_id(), OperationId::new("Query", "getTrip"));
        assert_eq!(req.token.as_deref(), Some("Bearer t"));
    }
}
