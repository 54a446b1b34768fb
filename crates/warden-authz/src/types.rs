//! Strongly typed identifiers for principals, roles, and permissions.
//!
//! # Purpose
//! Wraps raw identifiers so that role names and permission names are always
//! canonical (trimmed, lowercase) by the time they reach a store or index.
//!
//! # Key invariants
//! - `RoleName` and `Permission` are non-empty and lowercase.
//! - `PrincipalId(0)` is the anonymous principal.
//!
//! # Examples
//! ```rust
//! use warden_authz::{Permission, RoleName};
//!
//! let role = RoleName::new(" Editor ").unwrap();
//! assert_eq!(role.as_str(), "editor");
//! let perm = Permission::new("Edit Own Content").unwrap();
//! assert_eq!(perm.as_str(), "edit own content");
//! ```
use crate::{AuthzError, AuthzResult};
use serde::{Deserialize, Serialize};

/// Numeric principal identifier.
///
/// # Invariants
/// - `0` is reserved for the unauthenticated principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(pub u64);

impl PrincipalId {
    /// The reserved anonymous principal.
    pub const ANONYMOUS: PrincipalId = PrincipalId(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn is_anonymous(self) -> bool {
        self == Self::ANONYMOUS
    }
}

impl std::fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for PrincipalId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Canonical role name.
///
/// # Invariants
/// - Trimmed, lowercase, non-empty.
///
/// # Example
/// ```rust
/// use warden_authz::RoleName;
///
/// assert!(RoleName::new("Administrator").unwrap().is_administrator());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoleName(String);

impl RoleName {
    pub const ADMINISTRATOR: &'static str = "administrator";
    pub const AUTHENTICATED: &'static str = "authenticated";
    pub const UNAUTHENTICATED: &'static str = "unauthenticated";

    /// Canonicalize and validate a role name.
    ///
    /// # Errors
    /// - [`AuthzError::InvalidRole`] when the name is empty after trimming.
    pub fn new(value: impl AsRef<str>) -> AuthzResult<Self> {
        let canonical = value.as_ref().trim().to_lowercase();
        if canonical.is_empty() {
            return Err(AuthzError::InvalidRole(value.as_ref().to_string()));
        }
        Ok(Self(canonical))
    }

    pub fn administrator() -> Self {
        Self(Self::ADMINISTRATOR.to_string())
    }

    pub fn authenticated() -> Self {
        Self(Self::AUTHENTICATED.to_string())
    }

    pub fn unauthenticated() -> Self {
        Self(Self::UNAUTHENTICATED.to_string())
    }

    pub fn is_administrator(&self) -> bool {
        self.0 == Self::ADMINISTRATOR
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RoleName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for RoleName {
    type Err = AuthzError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::new(value)
    }
}

impl TryFrom<String> for RoleName {
    type Error = AuthzError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RoleName> for String {
    fn from(value: RoleName) -> Self {
        value.0
    }
}

/// Canonical permission (task) name, meaningful only within one resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Permission(String);

impl Permission {
    /// Canonicalize and validate a permission name.
    ///
    /// # Errors
    /// - [`AuthzError::InvalidPermission`] when the name is empty after trimming.
    pub fn new(value: impl AsRef<str>) -> AuthzResult<Self> {
        let canonical = value.as_ref().trim().to_lowercase();
        if canonical.is_empty() {
            return Err(AuthzError::InvalidPermission(value.as_ref().to_string()));
        }
        Ok(Self(canonical))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Permission {
    type Err = AuthzError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::new(value)
    }
}

impl TryFrom<String> for Permission {
    type Error = AuthzError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Permission> for String {
    fn from(value: Permission) -> Self {
        value.0
    }
}

/// Parse a list of raw role names, failing on the first invalid entry.
pub fn parse_roles<I, S>(values: I) -> AuthzResult<Vec<RoleName>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    values.into_iter().map(RoleName::new).collect()
}

/// Parse a list of raw permission names, failing on the first invalid entry.
pub fn parse_permissions<I, S>(values: I) -> AuthzResult<Vec<Permission>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    values.into_iter().map(Permission::new).collect()
}
