//! Resource names of the form `group.kind`.
//!
//! # Purpose
//! Parses and canonicalizes the two-part resource identifiers used as grant
//! targets and catalog keys.
//!
//! # Key invariants
//! - Both parts are trimmed, lowercase, and non-empty.
//! - A kind of `*` marks a template entry; templates are catalog vocabulary
//!   only and never grant targets.
//!
//! # Examples
//! ```rust
//! use warden_authz::ResourceName;
//!
//! let story: ResourceName = "Content.Story".parse().unwrap();
//! assert_eq!(story.to_string(), "content.story");
//! assert_eq!(story.template(), "content.*".parse().unwrap());
//! ```
use crate::{AuthzError, AuthzResult};
use serde::{Deserialize, Serialize};

/// Marker kind for template entries.
pub const TEMPLATE_KIND: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceName {
    group: String,
    kind: String,
}

impl ResourceName {
    /// Build a resource name from its parts.
    ///
    /// # Errors
    /// - [`AuthzError::InvalidResource`] if either part is empty or the group
    ///   contains a `.` separator.
    pub fn new(group: impl AsRef<str>, kind: impl AsRef<str>) -> AuthzResult<Self> {
        let group = group.as_ref().trim().to_lowercase();
        let kind = kind.as_ref().trim().to_lowercase();
        if group.is_empty() || kind.is_empty() || group.contains('.') || group == TEMPLATE_KIND {
            return Err(AuthzError::InvalidResource(format!("{group}.{kind}")));
        }
        Ok(Self { group, kind })
    }

    /// Build the template entry for a group (`group.*`).
    pub fn template_of(group: impl AsRef<str>) -> AuthzResult<Self> {
        Self::new(group, TEMPLATE_KIND)
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn is_template(&self) -> bool {
        self.kind == TEMPLATE_KIND
    }

    /// The template entry of this resource's group.
    pub fn template(&self) -> ResourceName {
        ResourceName {
            group: self.group.clone(),
            kind: TEMPLATE_KIND.to_string(),
        }
    }
}

impl std::fmt::Display for ResourceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.group, self.kind)
    }
}

impl std::str::FromStr for ResourceName {
    type Err = AuthzError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        // Split on the first separator so kinds may themselves contain dots.
        let (group, kind) = value
            .split_once('.')
            .ok_or_else(|| AuthzError::InvalidResource(value.to_string()))?;
        Self::new(group, kind)
    }
}

impl TryFrom<String> for ResourceName {
    type Error = AuthzError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResourceName> for String {
    fn from(value: ResourceName) -> Self {
        value.to_string()
    }
}
