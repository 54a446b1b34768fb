//! Role-based authorization core.
//!
//! # Purpose
//! Wires the pieces that keep the durable grant table and the fast-path index
//! in step, and answers authorization questions against the index:
//! - [`index`]: the fast-path store trait and its Casbin implementation.
//! - [`grants`]: grant updates and their validation against the catalog.
//! - [`sync`]: ordered writes (`reconcile`) and disaster recovery (`rebuild_all`).
//! - [`evaluator`]: `allowed`, `allowed_on_instance`, `permitted`.
//! - [`assignments`]: principal to role links.
//! - [`roles`]: role creation and deletion.
//!
//! # Key invariants
//! - `administrator` is never written through `reconcile`; its grants are
//!   derived from the catalog during rebuild.
//! - A failed store call is an error, never a denial or a grant.
use crate::store::StoreError;
use thiserror::Error;
use warden_authz::{AuthzError, Permission, PrincipalId, ResourceName, RoleName};

pub mod assignments;
pub mod evaluator;
pub mod grants;
pub mod index;
pub mod roles;
pub mod sync;

#[derive(Debug, Error)]
pub enum RbacError {
    #[error(transparent)]
    Authz(#[from] AuthzError),
    #[error("unidentified principal: {0}")]
    UnidentifiedPrincipal(PrincipalId),
    #[error("role {0} is protected")]
    ProtectedRole(RoleName),
    #[error("cannot grant on template resource {0}")]
    TemplateGrant(ResourceName),
    #[error("unknown resource: {0}")]
    UnknownResource(ResourceName),
    #[error("permission {permission} is not defined for {resource}")]
    UnknownPermission {
        resource: ResourceName,
        permission: Permission,
    },
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
    #[error("{operation} partially failed: {}", failures.join("; "))]
    PartialFailure {
        operation: &'static str,
        failures: Vec<String>,
    },
}

impl RbacError {
    /// Whether retrying the same call (or running a rebuild) can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RbacError::StoreUnavailable(_) | RbacError::PartialFailure { .. }
        )
    }

    pub(crate) fn partial(operation: &'static str, failures: Vec<String>) -> Self {
        RbacError::PartialFailure {
            operation,
            failures,
        }
    }
}

pub type RbacResult<T> = Result<T, RbacError>;

/// Collect the failures of a joined group, or `Ok` if every member succeeded.
pub(crate) fn collect_failures<T>(
    operation: &'static str,
    results: impl IntoIterator<Item = Result<T, String>>,
) -> RbacResult<Vec<T>> {
    let mut values = Vec::new();
    let mut failures = Vec::new();
    for result in results {
        match result {
            Ok(value) => values.push(value),
            Err(failure) => failures.push(failure),
        }
    }
    if failures.is_empty() {
        Ok(values)
    } else {
        Err(RbacError::partial(operation, failures))
    }
}
