use casbin::prelude::DefaultModel;

use crate::{PrincipalId, RoleName};

// Roles hold (resource, permission) pairs; principals reach them through `g`.
const MODEL: &str = r#"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act

[role_definition]
g = _, _

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = g(r.sub, p.sub) && r.obj == p.obj && r.act == p.act
"#;

pub fn casbin_model_string() -> &'static str {
    MODEL
}

pub async fn casbin_model() -> casbin::Result<DefaultModel> {
    DefaultModel::from_str(MODEL).await
}

/// Casbin subject for a principal (`p:{id}`).
pub fn principal_subject(principal: PrincipalId) -> String {
    format!("p:{principal}")
}

/// Casbin subject for a role (`role:{name}`).
pub fn role_subject(role: &RoleName) -> String {
    format!("role:{role}")
}

/// Inverse of [`principal_subject`].
pub fn parse_principal_subject(subject: &str) -> Option<PrincipalId> {
    subject
        .strip_prefix("p:")
        .and_then(|id| id.parse::<u64>().ok())
        .map(PrincipalId::new)
}

/// Inverse of [`role_subject`].
pub fn parse_role_subject(subject: &str) -> Option<RoleName> {
    subject
        .strip_prefix("role:")
        .and_then(|role| RoleName::new(role).ok())
}
