//! # Operations
//!
//! An operation is a named API field (`Query.getTrip`, `Mutation.createTrip`)
//! backed by a before transform, an ordered list of stages each bound to a
//! data source, and an after transform. Bindings are resolved when the
//! operation is registered, so a pipeline that references a missing data
//! source never reaches execution.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::context::Context;
use super::data_source::DataSource;
use super::errors::{RegistryError, TransformResult};
use super::stage::Stage;
use crate::auth::RoleClass;

/// Identifies an operation by parent type and field
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationId {
    pub type_name: String,
    pub field_name: String,
}

impl OperationId {
    pub fn new(type_name: impl Into<String>, field_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            field_name: field_name.into(),
        }
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.type_name, self.field_name)
    }
}

pub type BeforeFn = dyn Fn(&mut Context) -> TransformResult<()> + Send + Sync;
pub type AfterFn = dyn Fn(&mut Context) -> TransformResult<Value> + Send + Sync;

/// A stage with its data source resolved
#[derive(Clone)]
pub struct BoundStage {
    pub stage: Arc<dyn Stage>,
    pub data_source: Arc<dyn DataSource>,
}

/// A registered, executable operation
pub struct Operation {
    id: OperationId,
    before: Option<Box<BeforeFn>>,
    after: Option<Box<AfterFn>>,
    stages: Vec<BoundStage>,
    roles: HashSet<RoleClass>,
}

impl Operation {
    pub fn id(&self) -> &OperationId {
        &self.id
    }

    pub fn stages(&self) -> &[BoundStage] {
        &self.stages
    }

    /// Whether a caller with this role may invoke the operation
    pub fn allows(&self, role: RoleClass) -> bool {
        self.roles.contains(&role)
    }

    pub(crate) fn run_before(&self, ctx: &mut Context) -> TransformResult<()> {
        match &self.before {
            Some(before) => before(ctx),
            None => Ok(()),
        }
    }

    /// Without an explicit after transform the last stage's result is returned
    pub(crate) fn run_after(&self, ctx: &mut Context) -> TransformResult<Value> {
        match &self.after {
            Some(after) => after(ctx),
            None => Ok(ctx.prev().cloned().unwrap_or(Value::Null)),
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stages: Vec<(&str, &str)> = self
            .stages
            .iter()
            .map(|b| (b.stage.name(), b.data_source.name()))
            .collect();
        f.debug_struct("Operation")
            .field("id", &self.id)
            .field("stages", &stages)
            .field("roles", &self.roles)
            .finish()
    }
}

/// Declares an operation before its bindings are resolved
pub struct OperationBuilder {
    id: OperationId,
    before: Option<Box<BeforeFn>>,
    after: Option<Box<AfterFn>>,
    stages: Vec<(Arc<dyn Stage>, String)>,
    roles: HashSet<RoleClass>,
}

impl OperationBuilder {
    /// New operation, callable by authenticated identities only
    pub fn new(type_name: impl Into<String>, field_name: impl Into<String>) -> Self {
        Self {
            id: OperationId::new(type_name, field_name),
            before: None,
            after: None,
            stages: Vec::new(),
            roles: HashSet::from([RoleClass::Authenticated]),
        }
    }

    pub fn before<F>(mut self, before: F) -> Self
    where
        F: Fn(&mut Context) -> TransformResult<()> + Send + Sync + 'static,
    {
        self.before = Some(Box::new(before));
        self
    }

    pub fn after<F>(mut self, after: F) -> Self
    where
        F: Fn(&mut Context) -> TransformResult<Value> + Send + Sync + 'static,
    {
        self.after = Some(Box::new(after));
        self
    }

    /// Append a stage bound to the named data source
    pub fn stage(mut self, stage: impl Stage + 'static, binding: impl Into<String>) -> Self {
        self.stages.push((Arc::new(stage), binding.into()));
        self
    }

    /// Also allow callers with this role
    pub fn allow(mut self, role: RoleClass) -> Self {
        self.roles.insert(role);
        self
    }

    pub fn id(&self) -> &OperationId {
        &self.id
    }
}

/// All data sources and operations of one API
#[derive(Default)]
pub struct OperationRegistry {
    data_sources: HashMap<String, Arc<dyn DataSource>>,
    operations: BTreeMap<OperationId, Arc<Operation>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a data source under its own name
    pub fn add_data_source(&mut self, source: Arc<dyn DataSource>) -> Result<(), RegistryError> {
        let name = source.name().to_string();
        if self.data_sources.contains_key(&name) {
            return Err(RegistryError::DuplicateDataSource(name));
        }
        self.data_sources.insert(name, source);
        Ok(())
    }

    pub fn data_source(&self, name: &str) -> Option<Arc<dyn DataSource>> {
        self.data_sources.get(name).cloned()
    }

    /// Resolve every stage binding and register the operation
    pub fn register(&mut self, builder: OperationBuilder) -> Result<Arc<Operation>, RegistryError> {
        let OperationBuilder {
            id,
            before,
            after,
            stages,
            roles,
        } = builder;

        if self.operations.contains_key(&id) {
            return Err(RegistryError::DuplicateOperation(id));
        }
        if stages.is_empty() {
            return Err(RegistryError::EmptyPipeline(id));
        }

        let mut seen = HashSet::new();
        let mut bound = Vec::with_capacity(stages.len());
        for (stage, binding) in stages {
            let name = stage.name().to_string();
            if !seen.insert(name.clone()) {
                return Err(RegistryError::DuplicateStage {
                    operation: id,
                    stage: name,
                });
            }
            let data_source = self.data_sources.get(&binding).cloned().ok_or_else(|| {
                RegistryError::UnknownDataSource {
                    operation: id.clone(),
                    stage: name.clone(),
                    binding: binding.clone(),
                }
            })?;
            bound.push(BoundStage { stage, data_source });
        }

        let operation = Arc::new(Operation {
            id: id.clone(),
            before,
            after,
            stages: bound,
            roles,
        });
        self.operations.insert(id, Arc::clone(&operation));
        Ok(operation)
    }

    pub fn get(&self, id: &OperationId) -> Option<Arc<Operation>> {
        self.operations.get(id).cloned()
    }

    /// Registered operation ids in sorted order
    pub fn operations(&self) -> Vec<OperationId> {
        self.operations.keys().cloned().collect()
    }

    pub fn data_source_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.data_sources.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationRegistry")
            .field("data_sources", &self.data_source_names())
            .field("operations", &self.operations())
            .finish()
    }
}
