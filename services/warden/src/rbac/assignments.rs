//! Principal to role assignment.
//!
//! Every change is two writes issued together: the principal's durable role
//! list and the index link. Either leg failing reports
//! [`RbacError::PartialFailure`]; the other leg is not rolled back and
//! `rebuild_all` restores agreement.
use super::index::FastPathStore;
use super::{RbacError, RbacResult};
use crate::store::WardenStore;
use std::collections::BTreeSet;
use std::sync::Arc;
use warden_authz::{PrincipalId, RoleName};

pub struct AssignmentManager {
    store: Arc<dyn WardenStore>,
    index: Arc<dyn FastPathStore>,
    registration_roles: Vec<RoleName>,
}

impl AssignmentManager {
    pub fn new(
        store: Arc<dyn WardenStore>,
        index: Arc<dyn FastPathStore>,
        registration_roles: Vec<RoleName>,
    ) -> Self {
        Self {
            store,
            index,
            registration_roles,
        }
    }

    /// Add `roles` to the principal. Re-assigning a held role re-asserts it.
    pub async fn assign(&self, principal: PrincipalId, roles: &[RoleName]) -> RbacResult<()> {
        let roles = self.prepare(principal, roles).await?;
        if roles.is_empty() {
            return Ok(());
        }
        let (durable, fast) = tokio::join!(
            self.store.add_principal_roles(principal, &roles),
            self.index.add_principal_roles(principal, &roles),
        );
        finish("assign", principal, durable, fast)?;
        tracing::info!(%principal, ?roles, "roles assigned");
        Ok(())
    }

    /// Remove `roles` from the principal.
    pub async fn unassign(&self, principal: PrincipalId, roles: &[RoleName]) -> RbacResult<()> {
        let roles = self.prepare(principal, roles).await?;
        if roles.is_empty() {
            return Ok(());
        }
        let (durable, fast) = tokio::join!(
            self.store.remove_principal_roles(principal, &roles),
            self.index.remove_principal_roles(principal, &roles),
        );
        finish("unassign", principal, durable, fast)?;
        tracing::info!(%principal, ?roles, "roles unassigned");
        Ok(())
    }

    /// Grant the configured registration roles to a new principal.
    pub async fn on_registered(&self, principal: PrincipalId) -> RbacResult<()> {
        self.assign(principal, &self.registration_roles).await
    }

    /// Strip every role the principal durably holds.
    pub async fn on_cancelled(&self, principal: PrincipalId) -> RbacResult<()> {
        self.ensure_exists(principal).await?;
        let held: Vec<RoleName> = self
            .store
            .principal_roles(principal)
            .await?
            .into_iter()
            .collect();
        self.unassign(principal, &held).await
    }

    async fn prepare(&self, principal: PrincipalId, roles: &[RoleName]) -> RbacResult<Vec<RoleName>> {
        self.ensure_exists(principal).await?;
        let unique: BTreeSet<RoleName> = roles.iter().cloned().collect();
        Ok(unique.into_iter().collect())
    }

    async fn ensure_exists(&self, principal: PrincipalId) -> RbacResult<()> {
        if principal.is_anonymous() || self.store.principal_exists(principal).await? {
            Ok(())
        } else {
            Err(RbacError::UnidentifiedPrincipal(principal))
        }
    }
}

fn finish(
    operation: &'static str,
    principal: PrincipalId,
    durable: crate::store::StoreResult<()>,
    fast: crate::store::StoreResult<()>,
) -> RbacResult<()> {
    metrics::counter!("warden_role_assignments_total", "op" => operation).increment(1);
    let mut failures = Vec::new();
    if let Err(err) = durable {
        failures.push(format!("durable role list of {principal}: {err}"));
    }
    if let Err(err) = fast {
        failures.push(format!("index links of {principal}: {err}"));
    }
    if failures.is_empty() {
        Ok(())
    } else {
        tracing::warn!(%principal, operation, ?failures, "role assignment diverged");
        Err(RbacError::partial(operation, failures))
    }
}
