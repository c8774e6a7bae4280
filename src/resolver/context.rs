//! # Invocation Context
//!
//! One `Context` exists per operation invocation and is dropped when the
//! invocation returns. It is passed by `&mut` through every transform in
//! order, so only one stage ever touches it at a time.
//!
//! - `args` are fixed at construction.
//! - `stash` is append-only: entries can be added, never replaced or removed.
//! - `prev` is empty until the first stage completes and is then overwritten
//!   with each stage's response.

use std::collections::HashMap;

use serde_json::Value;
use uuid::Uuid;

use super::errors::{TransformError, TransformResult};
use super::operation::OperationId;
use crate::auth::Identity;

/// Cross-stage scratch space of one invocation
#[derive(Debug, Clone, Default)]
pub struct Stash {
    entries: HashMap<String, Value>,
}

impl Stash {
    /// Add an entry. Fails if the key is already present.
    pub fn put(&mut self, key: impl Into<String>, value: Value) -> TransformResult<()> {
        let key = key.into();
        if self.entries.contains_key(&key) {
            return Err(TransformError::StashConflict(key));
        }
        self.entries.insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// A required string entry
    pub fn require_str(&self, key: &str) -> TransformResult<&str> {
        self.entries
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| TransformError::MissingStash(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }
}

/// Per-invocation state shared by the stages of one operation
#[derive(Debug)]
pub struct Context {
    request_id: Uuid,
    operation: OperationId,
    identity: Identity,
    args: Value,
    stash: Stash,
    prev: Option<Value>,
}

impl Context {
    pub fn new(operation: OperationId, identity: Identity, args: Value) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            operation,
            identity,
            args,
            stash: Stash::default(),
            prev: None,
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn operation(&self) -> &OperationId {
        &self.operation
    }

    /// The resolved caller
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn args(&self) -> &Value {
        &self.args
    }

    pub fn arg(&self, name: &str) -> Option<&Value> {
        self.args.get(name).filter(|v| !v.is_null())
    }

    /// A required string argument
    pub fn require_str_arg(&self, name: &str) -> TransformResult<&str> {
        match self.arg(name) {
            Some(Value::String(s)) if !s.is_empty() => Ok(s),
            Some(_) => Err(TransformError::InvalidArgument {
                name: name.to_string(),
                reason: "expected a non-empty string".to_string(),
            }),
            None => Err(TransformError::MissingArgument(name.to_string())),
        }
    }

    pub fn stash(&self) -> &Stash {
        &self.stash
    }

    pub fn stash_mut(&mut self) -> &mut Stash {
        &mut self.stash
    }

    /// Result of the immediately preceding stage
    pub fn prev(&self) -> Option<&Value> {
        self.prev.as_ref()
    }

    pub(crate) fn set_prev(&mut self, value: Value) {
        self.prev = Some(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context(args: Value) -> Context {
        Context::new(
            OperationId::new("Query", "getTrip"),
            Identity::authenticated("user-1"),
            args,
        )
    }

    #[test]
    fn test_stash_is_append_only() {
        let mut stash = Stash::default();
        stash.put("id", json!("a")).unwrap();

        assert!(matches!(
            stash.put("id", json!("b")),
            Err(TransformError::StashConflict(key)) if key == "id"
        ));
        assert_eq!(stash.get("id"), Some(&json!("a")));
        assert_eq!(stash.len(), 1);
    }

    #[test]
    fn test_require_str() {
        let mut stash = Stash::default();
        stash.put("owner", json!("u1")).unwrap();
        stash.put("count", json!(3)).unwrap();

        assert_eq!(stash.require_str("owner").unwrap(), "u1");
        assert!(matches!(stash.require_str("count"), Err(TransformError::MissingStash(_))));
        assert!(matches!(stash.require_str("nope"), Err(TransformError::MissingStash(_))));
    }

    #[test]
    fn test_prev_starts_empty() {
        let mut ctx = context(json!({}));
        assert!(ctx.prev().is_none());

        ctx.set_prev(json!({"id": "a"}));
        ctx.set_prev(json!({"id": "b"}));
        assert_eq!(ctx.prev(), Some(&json!({"id": "b"})));
    }

    #[test]
    fn test_required_args() {
        let ctx = context(json!({"id": "a", "empty": "", "n": 1, "nothing": null}));

        assert_eq!(ctx.require_str_arg("id").unwrap(), "a");
        assert!(matches!(ctx.require_str_arg("missing"), Err(TransformError::MissingArgument(_))));
        assert!(matches!(ctx.require_str_arg("nothing"), Err(TransformError::MissingArgument(_))));
        assert!(matches!(ctx.require_str_arg("empty"), Err(TransformError::InvalidArgument { .. })));
        assert!(matches!(ctx.require_str_arg("n"), Err(TransformError::InvalidArgument { .. })));
    }

    #[test]
    fn test_contexts_are_independent() {
        let mut a = context(json!({}));
        let b = context(json!({}));

        a.stash_mut().put("k", json!(1)).unwrap();
        assert!(b.stash().is_empty());
        assert_ne!(a.request_id(), b.request_id());
    }
}
