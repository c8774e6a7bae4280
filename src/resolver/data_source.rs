//! # Data Sources
//!
//! A data source performs one opaque request/response call per stage. The
//! stage's request transform builds a `CallDescription`; the raw JSON result
//! is handed to the stage's response transform.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};

use super::errors::{DataSourceError, DataSourceResult};
use crate::store::{item_to_json, Item, Table, WriteCondition};

/// Future returned by a data source call
pub type InvokeFuture<'a> = Pin<Box<dyn Future<Output = DataSourceResult<Value>> + Send + 'a>>;

/// A single data source call
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "operation")]
pub enum CallDescription {
    GetItem {
        key: String,
    },
    PutItem {
        item: Item,
        condition: WriteCondition,
    },
    UpdateItem {
        key: String,
        updates: Item,
        condition: WriteCondition,
    },
    DeleteItem {
        key: String,
        condition: WriteCondition,
    },
    Scan {
        start_after: Option<String>,
        limit: usize,
    },
    /// Handled without touching storage; the payload is the result
    Local {
        payload: Value,
    },
}

impl CallDescription {
    /// Call name for logs and errors
    pub fn kind(&self) -> &'static str {
        match self {
            CallDescription::GetItem { .. } => "GetItem",
            CallDescription::PutItem { .. } => "PutItem",
            CallDescription::UpdateItem { .. } => "UpdateItem",
            CallDescription::DeleteItem { .. } => "DeleteItem",
            CallDescription::Scan { .. } => "Scan",
            CallDescription::Local { .. } => "Local",
        }
    }
}

/// Something a stage can call
pub trait DataSource: Send + Sync {
    /// Binding name used in operation registration
    fn name(&self) -> &str;

    fn invoke(&self, call: CallDescription) -> InvokeFuture<'_>;
}

/// Data source backed by the table
pub struct TableDataSource {
    name: String,
    table: Arc<Table>,
}

impl TableDataSource {
    pub fn new(name: impl Into<String>, table: Arc<Table>) -> Self {
        Self {
            name: name.into(),
            table,
        }
    }

    fn call(&self, call: CallDescription) -> DataSourceResult<Value> {
        let item_or_null = |item: Option<Item>| -> DataSourceResult<Value> {
            match item {
                Some(item) => Ok(item_to_json(&item)?),
                None => Ok(Value::Null),
            }
        };

        match call {
            CallDescription::GetItem { key } => item_or_null(self.table.get_item(&key)?),
            CallDescription::PutItem { item, condition } => {
                let written = item_to_json(&item)?;
                self.table.put_item(item, &condition)?;
                Ok(written)
            }
            CallDescription::UpdateItem {
                key,
                updates,
                condition,
            } => Ok(item_to_json(
                &self.table.update_item(&key, updates, &condition)?,
            )?),
            CallDescription::DeleteItem { key, condition } => {
                item_or_null(self.table.delete_item(&key, &condition)?)
            }
            CallDescription::Scan { start_after, limit } => {
                let items = self.table.scan(start_after.as_deref(), limit)?;
                let next_token = if items.len() == limit {
                    items
                        .last()
                        .and_then(|item| self.table.key_of(item).ok())
                } else {
                    None
                };
                let items = items
                    .iter()
                    .map(item_to_json)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(json!({ "items": items, "nextToken": next_token }))
            }
            CallDescription::Local { .. } => Err(DataSourceError::Unsupported {
                data_source: self.name.clone(),
                call: "Local",
            }),
        }
    }
}

impl DataSource for TableDataSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, call: CallDescription) -> InvokeFuture<'_> {
        Box::pin(async move { self.call(call) })
    }
}

/// Data source that only echoes local payloads
pub struct NoneDataSource {
    name: String,
}

impl NoneDataSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl DataSource for NoneDataSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, call: CallDescription) -> InvokeFuture<'_> {
        Box::pin(async move {
            match call {
                CallDescription::Local { payload } => Ok(payload),
                other => Err(DataSourceError::Unsupported {
                    data_source: self.name.clone(),
                    call: other.kind(),
                }),
            }
        })
    }
}
