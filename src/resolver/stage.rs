//! # Pipeline Stages
//!
//! A stage pairs a request transform with a response transform around one
//! data source call. Stages run strictly in registration order.

use serde_json::Value;

use super::context::Context;
use super::data_source::CallDescription;
use super::errors::TransformResult;

/// One step of an operation pipeline
pub trait Stage: Send + Sync {
    /// Stage name, unique within an operation
    fn name(&self) -> &str;

    /// Build the data source call from the context
    fn request(&self, ctx: &mut Context) -> TransformResult<CallDescription>;

    /// Shape the data source result; the return value becomes `prev`
    fn response(&self, ctx: &mut Context, result: Value) -> TransformResult<Value> {
        let _ = ctx;
        Ok(result)
    }
}

type RequestFn = dyn Fn(&mut Context) -> TransformResult<CallDescription> + Send + Sync;
type ResponseFn = dyn Fn(&mut Context, Value) -> TransformResult<Value> + Send + Sync;

/// Stage built from closures
pub struct FnStage {
    name: String,
    request: Box<RequestFn>,
    response: Option<Box<ResponseFn>>,
}

impl FnStage {
    pub fn new<F>(name: impl Into<String>, request: F) -> Self
    where
        F: Fn(&mut Context) -> TransformResult<CallDescription> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            request: Box::new(request),
            response: None,
        }
    }

    /// Replace the pass-through response transform
    pub fn with_response<F>(mut self, response: F) -> Self
    where
        F: Fn(&mut Context, Value) -> TransformResult<Value> + Send + Sync + 'static,
    {
        self.response = Some(Box::new(response));
        self
    }
}

impl Stage for FnStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn request(&self, ctx: &mut Context) -> TransformResult<CallDescription> {
        (self.request)(ctx)
    }

    fn response(&self, ctx: &mut Context, result: Value) -> TransformResult<Value> {
        match &self.response {
            Some(response) => response(ctx, result),
            None => Ok(result),
        }
    }
}

impl std::fmt::Debug for FnStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage")
            .field("name", &self.name)
            .field("custom_response", &self.response.is_some())
            .finish()
    }
}
