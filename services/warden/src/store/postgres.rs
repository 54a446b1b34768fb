//! Postgres-backed implementation of the Warden stores.
//!
//! # What this module is
//! Implements [`GrantStore`] and [`PrincipalDirectory`] on top of Postgres via
//! `sqlx`. It is the durable half of the dual-store design: the grant table,
//! role registry, catalog extensions, principal role lists, and the instance
//! ownership table live here. The fast-path index is rebuilt from these
//! tables after a restart or a failed write.
//!
//! # Data model
//! - `rbac_roles`: one row per role, including roles with no grants.
//! - `rbac_grants`: one row per `(role, resource, permission)` triple.
//! - `catalog_entries`: one row per `(resource, permission)` runtime extension.
//! - `principals` / `principal_roles`: the durable role list per principal,
//!   with a soft-delete flag on the principal.
//! - `resource_instances`: creator of each resource instance.
//!
//! # Consistency
//! - Each grant cell write runs in its own transaction (delete the cell's
//!   rows, insert the new set). Callers never rely on multi-cell atomicity.
//! - Deleting a role cascades to its grant rows in the same statement.
//!
//! # Operational notes
//! - Migrations run at startup via `sqlx::migrate!("./migrations")`.
//! - Pool sizing and timeouts come from [`PostgresConfig`]; failing fast on an
//!   unavailable database surfaces as a retryable store error.
//! - Database URLs may contain credentials; they are never logged.
use super::{GrantCell, GrantStore, PrincipalDirectory, RoleGrants, StoreError, StoreResult};
use crate::config::PostgresConfig;
use anyhow::anyhow;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{FromRow, PgPool};
use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;
use warden_authz::{Permission, PrincipalId, ResourceName, RoleName};

/// Durable grant table and principal directory backed by Postgres.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

#[derive(Debug, FromRow)]
struct DbGrant {
    role: String,
    resource: String,
    permission: String,
}

#[derive(Debug, FromRow)]
struct DbCatalogEntry {
    resource: String,
    permission: String,
}

impl PostgresStore {
    /// Connect, size the pool, and apply pending migrations.
    ///
    /// # Errors
    /// - Connection, pool setup, or migration failures.
    pub async fn connect(pg: &PostgresConfig) -> StoreResult<Self> {
        let store = Self::connect_without_migrations(pg).await?;
        sqlx::migrate!("./migrations").run(&store.pool).await?;
        Ok(store)
    }

    /// Connect without touching the schema. Intended for callers that manage
    /// migrations externally.
    pub async fn connect_without_migrations(pg: &PostgresConfig) -> StoreResult<Self> {
        let connect_options = PgConnectOptions::from_str(&pg.url)?;
        let pool = tokio::time::timeout(
            Duration::from_millis(pg.connect_timeout_ms),
            PgPoolOptions::new()
                .max_connections(pg.max_connections)
                .acquire_timeout(Duration::from_millis(pg.acquire_timeout_ms))
                .connect_with(connect_options),
        )
        .await
        .map_err(|_| StoreError::Unexpected(anyhow!("postgres connect timed out")))??;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the principal if missing and clear any soft-delete flag.
    pub async fn upsert_principal(&self, principal: PrincipalId) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO principals (principal_id, deleted) VALUES ($1, FALSE)
               ON CONFLICT (principal_id) DO UPDATE SET deleted = FALSE"#,
        )
        .bind(db_id(principal)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Soft-delete a principal; it leaves the disaster-recovery scan.
    pub async fn mark_deleted(&self, principal: PrincipalId) -> StoreResult<()> {
        let result = sqlx::query("UPDATE principals SET deleted = TRUE WHERE principal_id = $1")
            .bind(db_id(principal)?)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("principal {principal}")));
        }
        Ok(())
    }

    /// Record (or overwrite) the creator of a resource instance.
    pub async fn record_instance(
        &self,
        resource: &ResourceName,
        instance_id: &str,
        creator: PrincipalId,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO resource_instances (resource, instance_id, creator) VALUES ($1, $2, $3)
               ON CONFLICT (resource, instance_id) DO UPDATE SET creator = EXCLUDED.creator"#,
        )
        .bind(resource.to_string())
        .bind(instance_id)
        .bind(db_id(creator)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn refresh_role_gauge(&self) -> StoreResult<()> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rbac_roles")
            .fetch_one(&self.pool)
            .await?;
        metrics::gauge!("warden_roles_total").set(count as f64);
        Ok(())
    }

    async fn ensure_principal_exists(&self, principal: PrincipalId) -> StoreResult<i64> {
        let id = db_id(principal)?;
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM principals WHERE principal_id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        if !exists {
            return Err(StoreError::NotFound(format!("principal {principal}")));
        }
        Ok(id)
    }
}

#[async_trait]
impl GrantStore for PostgresStore {
    async fn list_roles(&self) -> StoreResult<Vec<RoleName>> {
        let rows: Vec<String> = sqlx::query_scalar("SELECT role FROM rbac_roles ORDER BY role")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(|role| parse_role(&role)).collect()
    }

    async fn role_exists(&self, role: &RoleName) -> StoreResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM rbac_roles WHERE role = $1)")
                .bind(role.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn create_role(&self, role: &RoleName) -> StoreResult<bool> {
        let result = sqlx::query("INSERT INTO rbac_roles (role) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(role.as_str())
            .execute(&self.pool)
            .await?;
        self.refresh_role_gauge().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_role(&self, role: &RoleName) -> StoreResult<()> {
        // Grant rows cascade from rbac_roles.
        sqlx::query("DELETE FROM rbac_roles WHERE role = $1")
            .bind(role.as_str())
            .execute(&self.pool)
            .await?;
        self.refresh_role_gauge().await?;
        Ok(())
    }

    async fn role_grants(&self, role: &RoleName) -> StoreResult<RoleGrants> {
        let rows = sqlx::query_as::<_, DbGrant>(
            "SELECT role, resource, permission FROM rbac_grants WHERE role = $1 ORDER BY resource, permission",
        )
        .bind(role.as_str())
        .fetch_all(&self.pool)
        .await?;
        let mut grants = RoleGrants::new();
        for row in rows {
            let cell = grant_from_db(row)?;
            grants
                .entry(cell.resource)
                .or_default()
                .extend(cell.permissions);
        }
        Ok(grants)
    }

    async fn set_grant(&self, cell: &GrantCell) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO rbac_roles (role) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(cell.role.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM rbac_grants WHERE role = $1 AND resource = $2")
            .bind(cell.role.as_str())
            .bind(cell.resource.to_string())
            .execute(&mut *tx)
            .await?;
        for permission in &cell.permissions {
            sqlx::query("INSERT INTO rbac_grants (role, resource, permission) VALUES ($1, $2, $3)")
                .bind(cell.role.as_str())
                .bind(cell.resource.to_string())
                .bind(permission.as_str())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_grants(&self) -> StoreResult<Vec<GrantCell>> {
        let rows = sqlx::query_as::<_, DbGrant>(
            "SELECT role, resource, permission FROM rbac_grants ORDER BY role, resource, permission",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut cells: Vec<GrantCell> = Vec::new();
        for row in rows {
            let next = grant_from_db(row)?;
            match cells.last_mut() {
                Some(last) if last.role == next.role && last.resource == next.resource => {
                    last.permissions.extend(next.permissions);
                }
                _ => cells.push(next),
            }
        }
        Ok(cells)
    }

    async fn catalog_entries(&self) -> StoreResult<Vec<(ResourceName, BTreeSet<Permission>)>> {
        let rows = sqlx::query_as::<_, DbCatalogEntry>(
            "SELECT resource, permission FROM catalog_entries ORDER BY resource, permission",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut entries: Vec<(ResourceName, BTreeSet<Permission>)> = Vec::new();
        for row in rows {
            let resource = parse_resource(&row.resource)?;
            let permission = parse_permission(&row.permission)?;
            match entries.last_mut() {
                Some((last, perms)) if *last == resource => {
                    perms.insert(permission);
                }
                _ => entries.push((resource, BTreeSet::from([permission]))),
            }
        }
        Ok(entries)
    }

    async fn put_catalog_entry(
        &self,
        resource: &ResourceName,
        permissions: &BTreeSet<Permission>,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM catalog_entries WHERE resource = $1")
            .bind(resource.to_string())
            .execute(&mut *tx)
            .await?;
        for permission in permissions {
            sqlx::query("INSERT INTO catalog_entries (resource, permission) VALUES ($1, $2)")
                .bind(resource.to_string())
                .bind(permission.as_str())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn is_durable(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

#[async_trait]
impl PrincipalDirectory for PostgresStore {
    async fn principal_exists(&self, principal: PrincipalId) -> StoreResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM principals WHERE principal_id = $1 AND NOT deleted)",
        )
        .bind(db_id(principal)?)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn principal_roles(&self, principal: PrincipalId) -> StoreResult<BTreeSet<RoleName>> {
        let rows: Vec<String> = sqlx::query_scalar(
            r#"SELECT pr.role FROM principal_roles pr
               JOIN principals p ON p.principal_id = pr.principal_id
               WHERE pr.principal_id = $1 AND NOT p.deleted"#,
        )
        .bind(db_id(principal)?)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(|role| parse_role(&role)).collect()
    }

    async fn add_principal_roles(
        &self,
        principal: PrincipalId,
        roles: &[RoleName],
    ) -> StoreResult<()> {
        let id = self.ensure_principal_exists(principal).await?;
        let mut tx = self.pool.begin().await?;
        for role in roles {
            sqlx::query(
                "INSERT INTO principal_roles (principal_id, role) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(id)
            .bind(role.as_str())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn remove_principal_roles(
        &self,
        principal: PrincipalId,
        roles: &[RoleName],
    ) -> StoreResult<()> {
        let id = self.ensure_principal_exists(principal).await?;
        let roles: Vec<String> = roles.iter().map(|role| role.as_str().to_string()).collect();
        sqlx::query("DELETE FROM principal_roles WHERE principal_id = $1 AND role = ANY($2)")
            .bind(id)
            .bind(&roles)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn owner_of(
        &self,
        resource: &ResourceName,
        instance_id: &str,
    ) -> StoreResult<Option<PrincipalId>> {
        let creator: Option<i64> = sqlx::query_scalar(
            "SELECT creator FROM resource_instances WHERE resource = $1 AND instance_id = $2",
        )
        .bind(resource.to_string())
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await?;
        creator.map(principal_from_db).transpose()
    }

    async fn principal_page(
        &self,
        after: Option<PrincipalId>,
        limit: usize,
    ) -> StoreResult<Vec<PrincipalId>> {
        let after = match after {
            Some(principal) => db_id(principal)?,
            None => -1,
        };
        let limit = i64::try_from(limit).map_err(|_| anyhow!("page size {limit} out of range"))?;
        let rows: Vec<i64> = sqlx::query_scalar(
            r#"SELECT principal_id FROM principals
               WHERE principal_id > $1 AND NOT deleted
               ORDER BY principal_id
               LIMIT $2"#,
        )
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(principal_from_db).collect()
    }
}

fn db_id(principal: PrincipalId) -> StoreResult<i64> {
    i64::try_from(principal.get())
        .map_err(|_| StoreError::Unexpected(anyhow!("principal id {principal} out of range")))
}

fn principal_from_db(value: i64) -> StoreResult<PrincipalId> {
    u64::try_from(value)
        .map(PrincipalId::new)
        .map_err(|_| StoreError::Unexpected(anyhow!("negative principal id {value}")))
}

fn parse_role(value: &str) -> StoreResult<RoleName> {
    RoleName::new(value).map_err(|err| StoreError::Unexpected(anyhow!(err)))
}

fn parse_resource(value: &str) -> StoreResult<ResourceName> {
    value
        .parse()
        .map_err(|err| StoreError::Unexpected(anyhow!("stored resource: {err}")))
}

fn parse_permission(value: &str) -> StoreResult<Permission> {
    Permission::new(value).map_err(|err| StoreError::Unexpected(anyhow!(err)))
}

fn grant_from_db(row: DbGrant) -> StoreResult<GrantCell> {
    Ok(GrantCell::new(
        parse_role(&row.role)?,
        parse_resource(&row.resource)?,
        [parse_permission(&row.permission)?],
    ))
}
