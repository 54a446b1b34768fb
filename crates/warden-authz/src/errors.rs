use std::collections::BTreeSet;

use thiserror::Error;

use crate::{Permission, ResourceName};

#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("invalid resource name: {0}")]
    InvalidResource(String),
    #[error("invalid role name: {0}")]
    InvalidRole(String),
    #[error("invalid permission: {0}")]
    InvalidPermission(String),
    #[error("schema conflict on {resource}: granted permissions {permissions:?} would be removed")]
    SchemaConflict {
        resource: ResourceName,
        permissions: BTreeSet<Permission>,
    },
}

pub type AuthzResult<T> = Result<T, AuthzError>;
