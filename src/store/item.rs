//! # Items and Typed Attribute Values
//!
//! Items are maps from attribute name to a typed value. The wire form tags
//! every value with its type (`{"S": "abc"}`, `{"N": "42"}`, ...); numbers
//! are carried as their decimal string so no precision is lost.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use super::errors::{StoreError, StoreResult};

/// An item: attribute name → typed value
pub type Item = BTreeMap<String, AttributeValue>;

/// A typed attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    #[serde(rename = "S")]
    S(String),
    #[serde(rename = "N")]
    N(String),
    #[serde(rename = "BOOL")]
    Bool(bool),
    #[serde(rename = "NULL")]
    Null(bool),
    #[serde(rename = "M")]
    M(BTreeMap<String, AttributeValue>),
    #[serde(rename = "L")]
    L(Vec<AttributeValue>),
}

impl AttributeValue {
    pub fn as_s(&self) -> Option<&str> {
        match self {
            AttributeValue::S(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_n(&self) -> Option<&str> {
        match self {
            AttributeValue::N(n) => Some(n),
            _ => None,
        }
    }

    /// Short type tag, for error messages
    pub fn type_tag(&self) -> &'static str {
        match self {
            AttributeValue::S(_) => "S",
            AttributeValue::N(_) => "N",
            AttributeValue::Bool(_) => "BOOL",
            AttributeValue::Null(_) => "NULL",
            AttributeValue::M(_) => "M",
            AttributeValue::L(_) => "L",
        }
    }

    /// Convert a plain JSON value into a typed value
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => AttributeValue::Null(true),
            Value::Bool(b) => AttributeValue::Bool(*b),
            Value::Number(n) => AttributeValue::N(n.to_string()),
            Value::String(s) => AttributeValue::S(s.clone()),
            Value::Array(items) => AttributeValue::L(items.iter().map(Self::from_json).collect()),
            Value::Object(map) => AttributeValue::M(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert back to plain JSON
    pub fn to_json(&self) -> StoreResult<Value> {
        Ok(match self {
            AttributeValue::S(s) => Value::String(s.clone()),
            AttributeValue::N(n) => Value::Number(parse_number(n)?),
            AttributeValue::Bool(b) => Value::Bool(*b),
            AttributeValue::Null(_) => Value::Null,
            AttributeValue::M(map) => Value::Object(map_to_json(map)?),
            AttributeValue::L(items) => Value::Array(
                items
                    .iter()
                    .map(AttributeValue::to_json)
                    .collect::<StoreResult<Vec<_>>>()?,
            ),
        })
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::S(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::S(s)
    }
}

fn parse_number(n: &str) -> StoreResult<Number> {
    serde_json::from_str::<Number>(n)
        .map_err(|_| StoreError::InvalidItem(format!("'{}' is not a number", n)))
}

fn map_to_json(map: &BTreeMap<String, AttributeValue>) -> StoreResult<Map<String, Value>> {
    map.iter()
        .map(|(k, v)| -> StoreResult<(String, Value)> { Ok((k.clone(), v.to_json()?)) })
        .collect()
}

/// Build an item from a JSON object
pub fn item_from_json(value: &Value) -> StoreResult<Item> {
    match value {
        Value::Object(map) => Ok(map
            .iter()
            .map(|(k, v)| (k.clone(), AttributeValue::from_json(v)))
            .collect()),
        other => Err(StoreError::InvalidItem(format!(
            "expected an object, got {}",
            other
        ))),
    }
}

/// Render an item as a plain JSON object
pub fn item_to_json(item: &Item) -> StoreResult<Value> {
    Ok(Value::Object(map_to_json(item)?))
}
