//! Warden authorization engine library crate.
//!
//! # Purpose
//! Exposes the engine facade, its configuration, the durable stores, the
//! fast-path index, and observability wiring for use by the binary and tests.
//!
//! # Notes
//! Module boundaries follow the data flow: `store` is the source of truth,
//! `rbac` keeps the index in step with it, and `engine` ties both to callers.
pub mod config;
pub mod engine;
pub mod observability;
pub mod rbac;
pub mod store;

pub use engine::AuthzEngine;
pub use rbac::{RbacError, RbacResult};
