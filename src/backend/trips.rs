//! # Trip API
//!
//! Pipelines for the trip operations. Every trip item carries `owner`
//! (identity subject of its creator) plus `createdAt`/`updatedAt`; these and
//! `id` are managed here and cannot be set through arguments.
//!
//! Writes to an existing trip load it from the table, then pass it through an
//! owner check bound to the `None` source, then write with a condition on
//! `owner` so a concurrent ownership change still fails the write.

use chrono::Utc;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::auth::RoleClass;
use crate::resolver::{
    CallDescription, Context, FnStage, OperationBuilder, OperationRegistry, RegistryError,
    TransformError, TransformResult,
};
use crate::store::{item_from_json, AttributeValue, WriteCondition};

pub const TRIP_TABLE_SOURCE: &str = "TripTable";
pub const NONE_SOURCE: &str = "None";

const MANAGED: [&str; 4] = ["id", "owner", "createdAt", "updatedAt"];
const DEFAULT_PAGE: usize = 20;
const MAX_PAGE: usize = 100;

/// Register the trip operations; both data sources must already be present
pub fn register(registry: &mut OperationRegistry) -> Result<(), RegistryError> {
    registry.register(create_trip())?;
    registry.register(update_trip())?;
    registry.register(delete_trip())?;
    registry.register(get_trip())?;
    registry.register(list_trips())?;
    Ok(())
}

fn arg_fields(ctx: &Context) -> TransformResult<Map<String, Value>> {
    match ctx.args() {
        Value::Object(map) => Ok(map
            .iter()
            .filter(|(k, v)| !MANAGED.contains(&k.as_str()) && !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()),
        _ => Err(TransformError::InvalidArgument {
            name: "args".into(),
            reason: "must be an object".into(),
        }),
    }
}

fn check_name(fields: &Map<String, Value>, required: bool) -> TransformResult<()> {
    match fields.get("name") {
        Some(Value::String(name)) if !name.trim().is_empty() => Ok(()),
        Some(_) => Err(TransformError::InvalidArgument {
            name: "name".into(),
            reason: "must be a non-empty string".into(),
        }),
        None if required => Err(TransformError::MissingArgument("name".into())),
        None => Ok(()),
    }
}

fn owner_condition(ctx: &Context) -> WriteCondition {
    WriteCondition::AttributeEquals {
        attribute: "owner".into(),
        value: AttributeValue::from(ctx.identity().subject.as_str()),
    }
}

fn get_by_stashed_id(ctx: &mut Context) -> TransformResult<CallDescription> {
    Ok(CallDescription::GetItem {
        key: ctx.stash().require_str("id")?.to_string(),
    })
}

/// Reads the trip named by the `id` argument
fn load_trip() -> FnStage {
    FnStage::new("loadTrip", |ctx| {
        let id = ctx.require_str_arg("id")?.to_string();
        ctx.stash_mut().put("id", json!(id))?;
        Ok(CallDescription::GetItem { key: id })
    })
    .with_response(|ctx, result| {
        if result.is_null() {
            let id = ctx.stash().require_str("id")?.to_string();
            return Err(TransformError::NotFound(format!("trip {}", id)));
        }
        Ok(result)
    })
}

/// Rejects callers other than the owner of the trip in `prev`; yields the trip
fn authorize_owner() -> FnStage {
    FnStage::new("authorizeOwner", |ctx| {
        let owner = ctx
            .prev()
            .and_then(|trip| trip.get("owner"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        Ok(CallDescription::Local {
            payload: json!({"owner": owner, "caller": ctx.identity().subject}),
        })
    })
    .with_response(|ctx, result| {
        let owner = result.get("owner").and_then(Value::as_str).unwrap_or_default();
        let caller = result.get("caller").and_then(Value::as_str).unwrap_or_default();
        if owner.is_empty() || owner != caller {
            return Err(TransformError::Unauthorized("caller does not own this trip".into()));
        }
        ctx.stash_mut().put("owner", json!(owner))?;
        Ok(ctx.prev().cloned().unwrap_or(Value::Null))
    })
}

fn create_trip() -> OperationBuilder {
    OperationBuilder::new("Mutation", "createTrip")
        .before(|ctx| {
            let id = match ctx.arg("id") {
                Some(Value::String(id)) if !id.is_empty() => id.clone(),
                Some(_) => {
                    return Err(TransformError::InvalidArgument {
                        name: "id".into(),
                        reason: "must be a non-empty string".into(),
                    })
                }
                None => Uuid::new_v4().to_string(),
            };
            let owner = ctx.identity().subject.clone();
            let stash = ctx.stash_mut();
            stash.put("id", json!(id))?;
            stash.put("owner", json!(owner))?;
            stash.put("now", json!(Utc::now().to_rfc3339()))?;
            Ok(())
        })
        .stage(
            FnStage::new("writeTrip", |ctx| {
                let mut fields = arg_fields(ctx)?;
                check_name(&fields, true)?;

                let now = ctx.stash().require_str("now")?.to_string();
                fields.insert("id".into(), json!(ctx.stash().require_str("id")?));
                fields.insert("owner".into(), json!(ctx.stash().require_str("owner")?));
                fields.insert("createdAt".into(), json!(now));
                fields.insert("updatedAt".into(), json!(now));

                Ok(CallDescription::PutItem {
                    item: item_from_json(&Value::Object(fields))?,
                    condition: WriteCondition::ItemNotExists,
                })
            }),
            TRIP_TABLE_SOURCE,
        )
        .stage(
            FnStage::new("readTrip", get_by_stashed_id).with_response(|ctx, result| {
                if result.is_null() {
                    let id = ctx.stash().require_str("id")?.to_string();
                    return Err(TransformError::NotFound(format!("trip {}", id)));
                }
                Ok(result)
            }),
            TRIP_TABLE_SOURCE,
        )
}

fn update_trip() -> OperationBuilder {
    OperationBuilder::new("Mutation", "updateTrip")
        .stage(load_trip(), TRIP_TABLE_SOURCE)
        .stage(authorize_owner(), NONE_SOURCE)
        .stage(
            FnStage::new("applyUpdate", |ctx| {
                let mut fields = arg_fields(ctx)?;
                check_name(&fields, false)?;
                fields.insert("updatedAt".into(), json!(Utc::now().to_rfc3339()));

                Ok(CallDescription::UpdateItem {
                    key: ctx.stash().require_str("id")?.to_string(),
                    updates: item_from_json(&Value::Object(fields))?,
                    condition: owner_condition(ctx),
                })
            }),
            TRIP_TABLE_SOURCE,
        )
}

fn delete_trip() -> OperationBuilder {
    OperationBuilder::new("Mutation", "deleteTrip")
        .stage(load_trip(), TRIP_TABLE_SOURCE)
        .stage(authorize_owner(), NONE_SOURCE)
        .stage(
            FnStage::new("removeTrip", |ctx| {
                Ok(CallDescription::DeleteItem {
                    key: ctx.stash().require_str("id")?.to_string(),
                    condition: owner_condition(ctx),
                })
            }),
            TRIP_TABLE_SOURCE,
        )
}

fn get_trip() -> OperationBuilder {
    OperationBuilder::new("Query", "getTrip")
        .stage(
            FnStage::new("readTrip", |ctx| {
                Ok(CallDescription::GetItem {
                    key: ctx.require_str_arg("id")?.to_string(),
                })
            }),
            TRIP_TABLE_SOURCE,
        )
        .allow(RoleClass::Unauthenticated)
}

fn list_trips() -> OperationBuilder {
    OperationBuilder::new("Query", "listTrips")
        .stage(
            FnStage::new("scanTrips", |ctx| {
                let limit = match ctx.arg("limit") {
                    None => DEFAULT_PAGE,
                    Some(value) => match value.as_u64() {
                        Some(n) if (1..=MAX_PAGE as u64).contains(&n) => n as usize,
                        _ => {
                            return Err(TransformError::InvalidArgument {
                                name: "limit".into(),
                                reason: format!("must be between 1 and {}", MAX_PAGE),
                            })
                        }
                    },
                };
                let start_after = match ctx.arg("nextToken") {
                    None => None,
                    Some(Value::String(token)) => Some(token.clone()),
                    Some(_) => {
                        return Err(TransformError::InvalidArgument {
                            name: "nextToken".into(),
                            reason: "must be a string".into(),
                        })
                    }
                };
                Ok(CallDescription::Scan { start_after, limit })
            }),
            TRIP_TABLE_SOURCE,
        )
        .allow(RoleClass::Unauthenticated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Identity;
    use crate::resolver::{OperationId, Stage};

    fn ctx(subject: &str, args: Value) -> Context {
        Context::new(
            OperationId::new("Mutation", "createTrip"),
            Identity::authenticated(subject),
            args,
        )
    }

    #[test]
    fn test_managed_fields_dropped() {
        let ctx = ctx(
            "user-1",
            json!({"id": "x", "owner": "mallory", "name": "Oslo", "createdAt": "then", "notes": null}),
        );
        let fields = arg_fields(&ctx).unwrap();

        assert_eq!(fields.len(), 1);
        assert_eq!(fields["name"], "Oslo");
    }

    #[test]
    fn test_name_checks() {
        let empty = Map::new();
        assert!(matches!(
            check_name(&empty, true),
            Err(TransformError::MissingArgument(_))
        ));
        assert!(check_name(&empty, false).is_ok());

        let mut bad = Map::new();
        bad.insert("name".into(), json!(3));
        assert!(matches!(
            check_name(&bad, false),
            Err(TransformError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_non_object_args_rejected() {
        let ctx = ctx("user-1", json!([1, 2]));
        assert!(arg_fields(&ctx).is_err());
    }

    #[test]
    fn test_owner_check_passes_trip_through() {
        let stage = authorize_owner();
        let mut ctx = ctx("user-1", json!({"id": "t1"}));
        ctx.set_prev(json!({"id": "t1", "owner": "user-1", "name": "Oslo"}));

        let call = stage.request(&mut ctx).unwrap();
        let CallDescription::Local { payload } = call else {
            panic!("owner check must not touch the table");
        };
        let out = stage.response(&mut ctx, payload).unwrap();

        assert_eq!(out["name"], "Oslo");
        assert_eq!(ctx.stash().get("owner"), Some(&json!("user-1")));
    }

    #[test]
    fn test_owner_check_rejects_other_caller() {
        let stage = authorize_owner();
        let mut ctx = ctx("mallory", json!({"id": "t1"}));
        ctx.set_prev(json!({"id": "t1", "owner": "user-1"}));

        let call = stage.request(&mut ctx).unwrap();
        let CallDescription::Local { payload } = call else {
            panic!("owner check must not touch the table");
        };
        assert!(matches!(
            stage.response(&mut ctx, payload),
            Err(TransformError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_register_all() {
        let mut registry = OperationRegistry::new();
        registry
            .add_data_source(std::sync::Arc::new(crate::resolver::NoneDataSource::new(NONE_SOURCE)))
            .unwrap();
        registry
            .add_data_source(std::sync::Arc::new(crate::resolver::TableDataSource::new(
                TRIP_TABLE_SOURCE,
                std::sync::Arc::new(crate::store::Table::new(crate::store::TableConfig::default())),
            )))
            .unwrap();

        register(&mut registry).unwrap();
        assert_eq!(registry.operations().len(), 5);
    }
}
