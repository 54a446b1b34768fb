//! Warden authorization primitives shared by the engine and its stores.
//!
//! # Purpose
//! Centralizes the vocabulary of the role-based authorization engine:
//! canonical role, permission, and resource names, the resource/permission
//! catalog, and the embedded Casbin model used by the fast-path index.
//!
//! # Key invariants
//! - Role, permission, and resource names are case-insensitive; every
//!   constructor lowercases its input.
//! - Resource names are `group.kind`; `group.*` is a template entry that only
//!   contributes vocabulary to the administrator's expanded set.
//! - Principal `0` is the anonymous principal.
//!
//! # Examples
//! ```rust
//! use warden_authz::{ResourceName, RoleName};
//!
//! let resource: ResourceName = "content.story".parse().unwrap();
//! assert_eq!(resource.group(), "content");
//! assert!(RoleName::administrator().is_administrator());
//! ```
//!
//! # Common pitfalls
//! - Comparing raw strings instead of the canonical wrappers misses
//!   case-insensitive matches.

mod casbin_model;
mod catalog;
mod errors;
mod resource;
mod types;

pub use casbin_model::{
    casbin_model, casbin_model_string, parse_principal_subject, parse_role_subject,
    principal_subject, role_subject,
};
pub use catalog::{Catalog, Registration};
pub use errors::{AuthzError, AuthzResult};
pub use resource::{ResourceName, TEMPLATE_KIND};
pub use types::{Permission, PrincipalId, RoleName, parse_permissions, parse_roles};
