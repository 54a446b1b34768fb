//! Grant synchronization between the durable store and the fast-path index.
//!
//! # Write protocol (`reconcile`)
//! 1. Retract every touched `(role, resource)` pair from the index.
//! 2. Stage the new cells (validated against the catalog).
//! 3. Push the non-empty cells into the index.
//! 4. Persist every cell durably.
//!
//! Each step's sub-operations run concurrently and the step is joined before
//! the next one starts. A failed step aborts the protocol with an aggregate
//! error. A failed retraction or push leaves the index denying more than the
//! durable table grants. A failed persist leaves the pushed cells in the index
//! ahead of the table until `rebuild_all` replays the table.
//!
//! # Mutation gate
//! Every index mutation outside a rebuild holds the gate's read side, so
//! mutations never wait on each other. `rebuild_all` takes the write side and
//! therefore never observes a mutation whose index leg landed before its
//! durable leg, or the reverse.
//!
//! # Disaster recovery (`rebuild_all`)
//! Clears the index and replays: the administrator's expanded vocabulary for
//! every concrete catalog resource, every non-administrator grant, the
//! anonymous principal's link to `unauthenticated`, then each principal's
//! durable role list in keyset-paginated batches. A batch is fetched only
//! after the previous batch's links are all asserted; dropping the returned
//! future stops the scan between batches.
use super::grants::{self, GrantUpdate};
use super::index::FastPathStore;
use super::{RbacResult, collect_failures};
use crate::store::{GrantCell, WardenStore};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard};
use warden_authz::{Catalog, PrincipalId, ResourceName, RoleName};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Cells written (including emptied ones).
    pub applied: usize,
    /// Resources whose administrator update was ignored.
    pub skipped: Vec<ResourceName>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildReport {
    pub resources: usize,
    pub grants: usize,
    pub principals: usize,
    /// Stored permissions no longer present in the catalog.
    pub dropped_permissions: usize,
}

pub struct Synchronizer {
    store: Arc<dyn WardenStore>,
    index: Arc<dyn FastPathStore>,
    catalog: Arc<RwLock<Catalog>>,
    batch_size: usize,
    gate: RwLock<()>,
}

impl Synchronizer {
    pub fn new(
        store: Arc<dyn WardenStore>,
        index: Arc<dyn FastPathStore>,
        catalog: Arc<RwLock<Catalog>>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            index,
            catalog,
            batch_size: batch_size.max(1),
            gate: RwLock::new(()),
        }
    }

    /// Replace the given grant cells in both stores.
    ///
    /// # Errors
    /// - Validation errors from [`grants::stage`]; nothing is written.
    /// - [`super::RbacError::PartialFailure`] naming the failed cells of the
    ///   step that aborted.
    pub async fn reconcile(&self, updates: Vec<GrantUpdate>) -> RbacResult<ReconcileReport> {
        let _gate = self.gate.read().await;
        let staged = {
            let catalog = self.catalog.read().await;
            grants::stage(&catalog, updates)?
        };
        for resource in &staged.skipped {
            tracing::warn!(%resource, "ignoring grant update for administrator");
        }

        let result = self.apply_cells(&staged.cells).await;
        let outcome = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!("warden_reconcile_total", "result" => outcome).increment(1);
        result?;

        tracing::info!(cells = staged.cells.len(), "grant table reconciled");
        Ok(ReconcileReport {
            applied: staged.cells.len(),
            skipped: staged.skipped,
        })
    }

    async fn apply_cells(&self, cells: &[GrantCell]) -> RbacResult<()> {
        let index = &self.index;
        let retracted: Vec<_> = cells
            .iter()
            .map(|cell| async move {
                index
                    .revoke_resource(&cell.role, &cell.resource)
                    .await
                    .map_err(|err| format!("retract {} on {}: {err}", cell.role, cell.resource))
            })
            .collect::<FuturesUnordered<_>>()
            .collect()
            .await;
        collect_failures("reconcile", retracted)?;

        let pushed: Vec<_> = cells
            .iter()
            .filter(|cell| !cell.permissions.is_empty())
            .map(|cell| async move {
                index
                    .grant(&cell.role, &cell.resource, &cell.permissions)
                    .await
                    .map_err(|err| format!("assert {} on {}: {err}", cell.role, cell.resource))
            })
            .collect::<FuturesUnordered<_>>()
            .collect()
            .await;
        collect_failures("reconcile", pushed)?;

        let store = &self.store;
        let persisted: Vec<_> = cells
            .iter()
            .map(|cell| async move {
                store
                    .set_grant(cell)
                    .await
                    .map_err(|err| format!("persist {} on {}: {err}", cell.role, cell.resource))
            })
            .collect::<FuturesUnordered<_>>()
            .collect()
            .await;
        collect_failures("reconcile", persisted)?;
        Ok(())
    }

    /// Reseed the index from the catalog, the grant table, and every
    /// principal's durable role list.
    ///
    /// Waits for in-flight mutations to finish and holds off new ones until
    /// the rebuild completes. Concurrent rebuilds are serialized.
    pub async fn rebuild_all(&self) -> RbacResult<RebuildReport> {
        let _gate = self.gate.write().await;
        let result = self.rebuild_inner().await;
        let outcome = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!("warden_rebuild_total", "result" => outcome).increment(1);
        let report = result?;
        tracing::info!(
            resources = report.resources,
            grants = report.grants,
            principals = report.principals,
            dropped = report.dropped_permissions,
            "authorization index rebuilt"
        );
        Ok(report)
    }

    async fn rebuild_inner(&self) -> RbacResult<RebuildReport> {
        let mut report = RebuildReport::default();
        self.index.clear().await?;

        let resources: Vec<ResourceName> = {
            let catalog = self.catalog.read().await;
            catalog.concrete_resources().cloned().collect()
        };
        report.resources = resources.len();
        self.seed_administrator(&resources).await?;

        let mut cells = self.store.list_grants().await?;
        cells.retain(|cell| !cell.role.is_administrator());
        {
            let catalog = self.catalog.read().await;
            for cell in &mut cells {
                let dropped = grants::retain_known(&catalog, cell);
                if !dropped.is_empty() {
                    tracing::warn!(
                        role = %cell.role,
                        resource = %cell.resource,
                        ?dropped,
                        "skipping permissions missing from the catalog"
                    );
                    report.dropped_permissions += dropped.len();
                }
            }
        }
        cells.retain(|cell| !cell.permissions.is_empty());
        report.grants = cells.len();
        let index = &self.index;
        let asserted: Vec<_> = cells
            .iter()
            .map(|cell| async move {
                index
                    .grant(&cell.role, &cell.resource, &cell.permissions)
                    .await
                    .map_err(|err| format!("assert {} on {}: {err}", cell.role, cell.resource))
            })
            .collect::<FuturesUnordered<_>>()
            .collect()
            .await;
        collect_failures("rebuild", asserted)?;

        self.index
            .add_principal_roles(PrincipalId::ANONYMOUS, &[RoleName::unauthenticated()])
            .await?;

        report.principals = self.replay_principals().await?;
        Ok(report)
    }

    async fn replay_principals(&self) -> RbacResult<usize> {
        let mut replayed = 0;
        let mut after = None;
        loop {
            let page = self.store.principal_page(after, self.batch_size).await?;
            let Some(last) = page.last().copied() else {
                break;
            };
            let store = &self.store;
            let index = &self.index;
            let linked: Vec<_> = page
                .iter()
                .map(|principal| async move {
                    let roles: Vec<RoleName> = match store.principal_roles(*principal).await {
                        Ok(roles) => roles.into_iter().collect(),
                        Err(err) => return Err(format!("load roles of {principal}: {err}")),
                    };
                    if roles.is_empty() {
                        return Ok(());
                    }
                    index
                        .add_principal_roles(*principal, &roles)
                        .await
                        .map_err(|err| format!("link {principal}: {err}"))
                })
                .collect::<FuturesUnordered<_>>()
                .collect()
                .await;
            collect_failures("rebuild", linked)?;

            replayed += page.len();
            metrics::counter!("warden_rebuild_principals_total").increment(page.len() as u64);
            tracing::debug!(batch = page.len(), %last, "replayed principal batch");
            if page.len() < self.batch_size {
                break;
            }
            after = Some(last);
        }
        Ok(replayed)
    }

    /// Hold off `rebuild_all` while a caller mutates both stores.
    ///
    /// The guard must not be held across a call to [`Self::reconcile`].
    pub async fn mutation_gate(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read().await
    }

    /// Assert the administrator's expanded vocabulary on each resource.
    pub async fn seed_administrator(&self, resources: &[ResourceName]) -> RbacResult<()> {
        let administrator = RoleName::administrator();
        let expanded: Vec<_> = {
            let catalog = self.catalog.read().await;
            resources
                .iter()
                .filter(|resource| !resource.is_template())
                .map(|resource| (resource, catalog.expand(resource.group(), resource.kind())))
                .filter(|(_, permissions)| !permissions.is_empty())
                .collect()
        };
        let index = &self.index;
        let administrator = &administrator;
        let seeded: Vec<_> = expanded
            .iter()
            .map(|(resource, permissions)| async move {
                index
                    .grant(administrator, resource, permissions)
                    .await
                    .map_err(|err| format!("seed administrator on {resource}: {err}"))
            })
            .collect::<FuturesUnordered<_>>()
            .collect()
            .await;
        collect_failures("rebuild", seeded)?;
        Ok(())
    }
}
