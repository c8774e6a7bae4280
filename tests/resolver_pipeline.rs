//! Resolver Pipeline Tests
//!
//! - N stages make exactly N data source calls, in registration order
//! - the after transform observes the last stage's output as `prev`
//! - a failing stage stops the pipeline and is named in the error
//! - a write in stage 1 is visible to a read in stage 2
//! - authentication failures happen before any stage runs

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tripstack::auth::{AuthError, AuthResult, Identity, IdentityPool, IdentityProvider};
use tripstack::observability::MetricsRegistry;
use tripstack::resolver::{
    CallDescription, DataSource, DataSourceError, FnStage, OperationBuilder, OperationRegistry,
    ResolveRequest, ResolverEngine, ResolverError, StageRef, TableDataSource, TransformError,
};
use tripstack::resolver::data_source::InvokeFuture;
use tripstack::store::{item_from_json, Table, TableConfig, WriteCondition};

// =============================================================================
// Test Utilities
// =============================================================================

/// Echoes local payloads and records every call it receives
#[derive(Default)]
struct Tape {
    calls: Mutex<Vec<Value>>,
}

impl Tape {
    fn calls(&self) -> Vec<Value> {
        self.calls.lock().unwrap().clone()
    }
}

impl DataSource for Tape {
    fn name(&self) -> &str {
        "Tape"
    }

    fn invoke(&self, call: CallDescription) -> InvokeFuture<'_> {
        Box::pin(async move {
            match call {
                CallDescription::Local { payload } => {
                    self.calls.lock().unwrap().push(payload.clone());
                    Ok(payload)
                }
                other => Err(DataSourceError::Unsupported {
                    data_source: "Tape".into(),
                    call: other.kind(),
                }),
            }
        })
    }
}

struct Tokens;

impl IdentityProvider for Tokens {
    fn verify_token(&self, token: &str) -> AuthResult<Identity> {
        match token {
            "valid" => Ok(Identity::authenticated("user-1")),
            _ => Err(AuthError::InvalidSignature),
        }
    }
}

fn tape_stage(index: usize) -> FnStage {
    FnStage::new(format!("s{}", index), move |_| {
        Ok(CallDescription::Local {
            payload: json!(index),
        })
    })
}

fn engine(registry: OperationRegistry, allow_guests: bool) -> ResolverEngine {
    ResolverEngine::new(
        Arc::new(registry),
        Arc::new(IdentityPool::new("test-ids", allow_guests, Arc::new(Tokens))),
        Arc::new(MetricsRegistry::new()),
    )
}

fn request(field: &str, args: Value) -> ResolveRequest {
    ResolveRequest::new("Query", field, args).with_token("Bearer valid")
}

// =============================================================================
// Stage Ordering
// =============================================================================

#[tokio::test]
async fn test_n_stages_make_n_ordered_calls() {
    let tape = Arc::new(Tape::default());
    let mut registry = OperationRegistry::new();
    registry.add_data_source(tape.clone()).unwrap();

    let mut builder = OperationBuilder::new("Query", "five").after(|ctx| {
        Ok(json!({ "lastPrev": ctx.prev().cloned() }))
    });
    for i in 1..=5 {
        builder = builder.stage(tape_stage(i), "Tape");
    }
    registry.register(builder).unwrap();

    let engine = engine(registry, false);
    let result = engine.execute(request("five", json!({}))).await.unwrap();

    assert_eq!(tape.calls(), vec![json!(1), json!(2), json!(3), json!(4), json!(5)]);
    assert_eq!(result, json!({ "lastPrev": 5 }));
    assert_eq!(engine.metrics().snapshot().data_source_calls, 5);
}

#[tokio::test]
async fn test_prev_is_empty_before_first_stage() {
    let tape = Arc::new(Tape::default());
    let mut registry = OperationRegistry::new();
    registry.add_data_source(tape.clone()).unwrap();
    registry
        .register(
            OperationBuilder::new("Query", "peek")
                .before(|ctx| {
                    if ctx.prev().is_some() {
                        return Err(TransformError::raised("prev set before stage 1"));
                    }
                    Ok(())
                })
                .stage(
                    FnStage::new("first", |ctx| {
                        Ok(CallDescription::Local {
                            payload: json!(ctx.prev().is_none()),
                        })
                    }),
                    "Tape",
                ),
        )
        .unwrap();

    let result = engine(registry, false)
        .execute(request("peek", json!({})))
        .await
        .unwrap();
    assert_eq!(result, json!(true));
}

// =============================================================================
// Stage Failure
// =============================================================================

#[tokio::test]
async fn test_failure_at_stage_k_stops_pipeline() {
    let tape = Arc::new(Tape::default());
    let after_ran = Arc::new(Mutex::new(false));
    let mut registry = OperationRegistry::new();
    registry.add_data_source(tape.clone()).unwrap();

    let flag = after_ran.clone();
    registry
        .register(
            OperationBuilder::new("Query", "breaks")
                .stage(tape_stage(1), "Tape")
                .stage(
                    tape_stage(2).with_response(|_, _| Err(TransformError::raised("bad shape"))),
                    "Tape",
                )
                .stage(tape_stage(3), "Tape")
                .after(move |ctx| {
                    *flag.lock().unwrap() = true;
                    Ok(ctx.prev().cloned().unwrap_or(Value::Null))
                }),
        )
        .unwrap();

    let err = engine(registry, false)
        .execute(request("breaks", json!({})))
        .await
        .unwrap_err();

    assert!(matches!(err, ResolverError::PipelineStage { .. }));
    assert_eq!(err.stage(), Some(&StageRef::stage(2, "s2")));
    assert_eq!(tape.calls(), vec![json!(1), json!(2)]);
    assert!(!*after_ran.lock().unwrap());
}

#[tokio::test]
async fn test_request_failure_skips_data_source_call() {
    let tape = Arc::new(Tape::default());
    let mut registry = OperationRegistry::new();
    registry.add_data_source(tape.clone()).unwrap();
    registry
        .register(
            OperationBuilder::new("Query", "needsId")
                .stage(tape_stage(1), "Tape")
                .stage(
                    FnStage::new("byId", |ctx| {
                        ctx.require_str_arg("id")?;
                        Ok(CallDescription::Local { payload: json!(2) })
                    }),
                    "Tape",
                ),
        )
        .unwrap();

    let err = engine(registry, false)
        .execute(request("needsId", json!({})))
        .await
        .unwrap_err();

    assert_eq!(err.stage().and_then(StageRef::index), Some(2));
    assert_eq!(tape.calls().len(), 1);
}

#[tokio::test]
async fn test_data_source_failure_is_not_retried() {
    let table = Arc::new(Table::new(TableConfig::default()));
    let mut registry = OperationRegistry::new();
    registry
        .add_data_source(Arc::new(TableDataSource::new("Trips", table.clone())))
        .unwrap();
    registry
        .register(OperationBuilder::new("Query", "insertOnce").stage(
            FnStage::new("insert", |_| {
                Ok(CallDescription::PutItem {
                    item: item_from_json(&json!({"id": "a"}))?,
                    condition: WriteCondition::ItemNotExists,
                })
            }),
            "Trips",
        ))
        .unwrap();

    let engine = engine(registry, false);
    engine.execute(request("insertOnce", json!({}))).await.unwrap();
    let err = engine
        .execute(request("insertOnce", json!({})))
        .await
        .unwrap_err();

    assert!(matches!(err, ResolverError::DataSource { ref data_source, .. } if data_source == "Trips"));
    assert_eq!(err.status_code(), 409);
    assert_eq!(engine.metrics().snapshot().data_source_calls, 2);
}

// =============================================================================
// Cross-Stage Visibility
// =============================================================================

#[tokio::test]
async fn test_write_then_read_sees_written_value() {
    let table = Arc::new(Table::new(TableConfig::default()));
    let mut registry = OperationRegistry::new();
    registry
        .add_data_source(Arc::new(TableDataSource::new("Trips", table.clone())))
        .unwrap();
    registry
        .register(
            OperationBuilder::new("Query", "writeRead")
                .stage(
                    FnStage::new("S1", |ctx| {
                        ctx.stash_mut().put("id", json!("a"))?;
                        Ok(CallDescription::PutItem {
                            item: item_from_json(&json!({"id": "a", "name": "written by S1"}))?,
                            condition: WriteCondition::None,
                        })
                    }),
                    "Trips",
                )
                .stage(
                    FnStage::new("S2", |ctx| {
                        Ok(CallDescription::GetItem {
                            key: ctx.stash().require_str("id")?.to_string(),
                        })
                    }),
                    "Trips",
                ),
        )
        .unwrap();

    let result = engine(registry, false)
        .execute(request("writeRead", json!({})))
        .await
        .unwrap();

    assert_eq!(result["id"], "a");
    assert_eq!(result["name"], "written by S1");
}

#[tokio::test]
async fn test_stash_entries_cannot_be_replaced() {
    let tape = Arc::new(Tape::default());
    let mut registry = OperationRegistry::new();
    registry.add_data_source(tape.clone()).unwrap();
    registry
        .register(
            OperationBuilder::new("Query", "overwrite")
                .before(|ctx| ctx.stash_mut().put("k", json!(1)))
                .stage(
                    FnStage::new("clobber", |ctx| {
                        ctx.stash_mut().put("k", json!(2))?;
                        Ok(CallDescription::Local { payload: json!(null) })
                    }),
                    "Tape",
                ),
        )
        .unwrap();

    let err = engine(registry, false)
        .execute(request("overwrite", json!({})))
        .await
        .unwrap_err();

    match err {
        ResolverError::PipelineStage { stage, cause } => {
            assert_eq!(stage.index(), Some(1));
            assert!(matches!(cause, TransformError::StashConflict(ref k) if k == "k"));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(tape.calls().is_empty());
}

// =============================================================================
// Authentication
// =============================================================================

#[tokio::test]
async fn test_invalid_token_rejected_before_stage_zero() {
    let tape = Arc::new(Tape::default());
    let mut registry = OperationRegistry::new();
    registry.add_data_source(tape.clone()).unwrap();
    registry
        .register(
            OperationBuilder::new("Query", "open")
                .stage(tape_stage(1), "Tape")
                .allow(tripstack::auth::RoleClass::Unauthenticated),
        )
        .unwrap();

    // Guests are allowed, but a bad token is never downgraded to a guest
    let engine = engine(registry, true);
    let err = engine
        .execute(ResolveRequest::new("Query", "open", json!({})).with_token("forged"))
        .await
        .unwrap_err();

    assert!(matches!(err, ResolverError::Authentication(_)));
    assert_eq!(err.status_code(), 401);
    assert!(tape.calls().is_empty());
    assert_eq!(engine.metrics().snapshot().operations_rejected, 1);

    let guest = engine
        .execute(ResolveRequest::new("Query", "open", json!({})))
        .await
        .unwrap();
    assert_eq!(guest, json!(1));
}

#[tokio::test]
async fn test_missing_token_rejected_when_guests_disabled() {
    let tape = Arc::new(Tape::default());
    let mut registry = OperationRegistry::new();
    registry.add_data_source(tape.clone()).unwrap();
    registry
        .register(OperationBuilder::new("Query", "private").stage(tape_stage(1), "Tape"))
        .unwrap();

    let err = engine(registry, false)
        .execute(ResolveRequest::new("Query", "private", json!({})))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ResolverError::Authentication(AuthError::AuthenticationRequired)
    ));
    assert!(tape.calls().is_empty());
}
