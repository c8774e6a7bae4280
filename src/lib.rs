//! tripstack - trip API backend with pipelined resolvers and a change stream consumer
//!
//! - `resolver`: multi-stage operations over a shared per-invocation context
//! - `cdc`: at-least-once change stream processing with idempotent effects

pub mod auth;
pub mod backend;
pub mod cdc;
pub mod cli;
pub mod config;
pub mod observability;
pub mod resolver;
pub mod store;
