//! # Table
//!
//! A single durable keyed table. Each write is atomic for its one item and
//! is appended to the change stream while the table lock is held, so the
//! stream order of a key always matches the order its writes committed.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use super::errors::{StoreError, StoreResult};
use super::item::{AttributeValue, Item};
use super::stream::{EventKind, TableStream};

/// Table configuration
#[derive(Debug, Clone)]
pub struct TableConfig {
    pub name: String,

    /// Name of the string partition key attribute
    pub partition_key: String,

    /// Number of stream partitions
    pub stream_partitions: u32,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            name: "Trip".to_string(),
            partition_key: "id".to_string(),
            stream_partitions: 4,
        }
    }
}

/// Condition guarding a write
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WriteCondition {
    /// Unconditional (last writer wins)
    #[default]
    None,
    /// The item must not exist yet
    ItemNotExists,
    /// The item must exist
    ItemExists,
    /// The item must exist and `attribute` must equal `value`
    AttributeEquals {
        attribute: String,
        value: AttributeValue,
    },
}

impl WriteCondition {
    fn holds(&self, current: Option<&Item>) -> bool {
        match self {
            WriteCondition::None => true,
            WriteCondition::ItemNotExists => current.is_none(),
            WriteCondition::ItemExists => current.is_some(),
            WriteCondition::AttributeEquals { attribute, value } => {
                current.and_then(|item| item.get(attribute)) == Some(value)
            }
        }
    }
}

/// The keyed table
#[derive(Debug)]
pub struct Table {
    config: TableConfig,
    items: RwLock<BTreeMap<String, Item>>,
    stream: Arc<TableStream>,
}

impl Table {
    pub fn new(config: TableConfig) -> Self {
        let stream = Arc::new(TableStream::new(
            config.name.clone(),
            config.stream_partitions,
        ));
        Self {
            config,
            items: RwLock::new(BTreeMap::new()),
            stream,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn partition_key(&self) -> &str {
        &self.config.partition_key
    }

    /// Change stream of this table
    pub fn stream(&self) -> Arc<TableStream> {
        Arc::clone(&self.stream)
    }

    /// Extract the partition key value from an item
    pub fn key_of(&self, item: &Item) -> StoreResult<String> {
        match item.get(&self.config.partition_key) {
            Some(AttributeValue::S(key)) if !key.is_empty() => Ok(key.clone()),
            Some(other) => Err(StoreError::InvalidKey(format!(
                "'{}' must be a non-empty string, got {}",
                self.config.partition_key,
                other.type_tag()
            ))),
            None => Err(StoreError::MissingKey(self.config.partition_key.clone())),
        }
    }

    fn keys_for(&self, key: &str) -> Item {
        Item::from([(
            self.config.partition_key.clone(),
            AttributeValue::S(key.to_string()),
        )])
    }

    fn conflict(&self, key: &str) -> StoreError {
        StoreError::ConditionalCheckFailed {
            table: self.config.name.clone(),
            key: key.to_string(),
        }
    }

    fn poisoned<T>(_: T) -> StoreError {
        StoreError::Internal("Lock poisoned".to_string())
    }

    pub fn get_item(&self, key: &str) -> StoreResult<Option<Item>> {
        let items = self.items.read().map_err(Self::poisoned)?;
        Ok(items.get(key).cloned())
    }

    /// Write a whole item; returns the replaced item, if any
    pub fn put_item(&self, item: Item, condition: &WriteCondition) -> StoreResult<Option<Item>> {
        let key = self.key_of(&item)?;
        let mut items = self.items.write().map_err(Self::poisoned)?;

        let current = items.get(&key);
        if !condition.holds(current) {
            return Err(self.conflict(&key));
        }

        let old = current.cloned();
        let kind = if old.is_some() {
            EventKind::Modify
        } else {
            EventKind::Insert
        };
        // The change record goes first; a failed append leaves the item as it was
        self.stream
            .append(&key, kind, self.keys_for(&key), Some(item.clone()), old.clone())?;
        items.insert(key, item);

        Ok(old)
    }

    /// Set attributes on an existing item; returns the new item.
    ///
    /// The partition key cannot be changed.
    pub fn update_item(
        &self,
        key: &str,
        updates: Item,
        condition: &WriteCondition,
    ) -> StoreResult<Item> {
        if let Some(value) = updates.get(&self.config.partition_key) {
            if value.as_s() != Some(key) {
                return Err(StoreError::InvalidKey(format!(
                    "'{}' cannot be updated",
                    self.config.partition_key
                )));
            }
        }

        let mut items = self.items.write().map_err(Self::poisoned)?;

        let current = items.get(key);
        if current.is_none() || !condition.holds(current) {
            return Err(self.conflict(key));
        }

        let old = current.cloned();
        let mut new = old.clone().unwrap_or_default();
        new.extend(updates);

        self.stream.append(
            key,
            EventKind::Modify,
            self.keys_for(key),
            Some(new.clone()),
            old,
        )?;
        items.insert(key.to_string(), new.clone());

        Ok(new)
    }

    /// Delete an item; returns it if it existed
    pub fn delete_item(&self, key: &str, condition: &WriteCondition) -> StoreResult<Option<Item>> {
        let mut items = self.items.write().map_err(Self::poisoned)?;

        if !condition.holds(items.get(key)) {
            return Err(self.conflict(key));
        }

        let old = items.get(key).cloned();
        if let Some(old) = &old {
            self.stream.append(
                key,
                EventKind::Remove,
                self.keys_for(key),
                None,
                Some(old.clone()),
            )?;
            items.remove(key);
        }

        Ok(old)
    }

    /// Items in key order, starting after `start_after`
    pub fn scan(&self, start_after: Option<&str>, limit: usize) -> StoreResult<Vec<Item>> {
        let items = self.items.read().map_err(Self::poisoned)?;
        Ok(items
            .iter()
            .filter(|(k, _)| start_after.map_or(true, |after| k.as_str() > after))
            .take(limit)
            .map(|(_, item)| item.clone())
            .collect())
    }

    pub fn len(&self) -> usize {
        self.items.read().map(|i| i.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
