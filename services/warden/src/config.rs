use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use warden_authz::{Permission, ResourceName, RoleName};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

impl std::str::FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" => Ok(Self::Postgres),
            other => bail!("unknown storage backend: {other}"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostgresConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_acquire_timeout_ms() -> u64 {
    5_000
}

impl PostgresConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: default_max_connections(),
            connect_timeout_ms: default_connect_timeout_ms(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
        }
    }
}

/// Permission naming for instance-level checks.
///
/// `{action}` and `{group}` are substituted, so with the defaults
/// `edit` on `content.story` checks `edit any content` then `edit own content`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OwnershipVocabulary {
    pub any_template: String,
    pub own_template: String,
}

impl Default for OwnershipVocabulary {
    fn default() -> Self {
        Self {
            any_template: "{action} any {group}".to_string(),
            own_template: "{action} own {group}".to_string(),
        }
    }
}

impl OwnershipVocabulary {
    pub fn any_permission(&self, action: &str, group: &str) -> String {
        render(&self.any_template, action, group)
    }

    pub fn own_permission(&self, action: &str, group: &str) -> String {
        render(&self.own_template, action, group)
    }
}

fn render(template: &str, action: &str, group: &str) -> String {
    template
        .replace("{action}", action)
        .replace("{group}", group)
}

// Engine configuration sourced from environment variables.
#[derive(Debug, Clone)]
pub struct WardenConfig {
    pub metrics_bind: SocketAddr,
    pub storage: StorageBackend,
    pub postgres: Option<PostgresConfig>,
    pub catalog_path: Option<PathBuf>,
    pub rebuild_batch_size: usize,
    pub rebuild_on_start: bool,
    pub ownership: OwnershipVocabulary,
    pub registration_roles: Vec<RoleName>,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            metrics_bind: SocketAddr::from(([0, 0, 0, 0], 9464)),
            storage: StorageBackend::Memory,
            postgres: None,
            catalog_path: None,
            rebuild_batch_size: 500,
            rebuild_on_start: true,
            ownership: OwnershipVocabulary::default(),
            registration_roles: vec![RoleName::authenticated()],
        }
    }
}

#[derive(Debug, Deserialize)]
struct WardenConfigOverride {
    metrics_bind: Option<String>,
    storage: Option<StorageBackend>,
    postgres: Option<PostgresConfig>,
    catalog_path: Option<PathBuf>,
    rebuild_batch_size: Option<usize>,
    rebuild_on_start: Option<bool>,
    ownership: Option<OwnershipVocabulary>,
    registration_roles: Option<Vec<String>>,
}

impl WardenConfig {
    pub fn from_env() -> Result<Self> {
        let config = Self::env_layer()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::env_layer()?;
        if let Ok(path) = std::env::var("WARDEN_CONFIG") {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read WARDEN_CONFIG: {path}"))?;
            config.apply_yaml(&contents)?;
        } else {
            config.validate()?;
        }
        Ok(config)
    }

    fn env_layer() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(value) = std::env::var("WARDEN_METRICS_BIND") {
            config.metrics_bind = value
                .parse()
                .with_context(|| "parse WARDEN_METRICS_BIND")?;
        }
        if let Ok(value) = std::env::var("WARDEN_STORAGE") {
            config.storage = value.parse().with_context(|| "parse WARDEN_STORAGE")?;
        }
        if let Ok(url) = std::env::var("WARDEN_POSTGRES_URL") {
            let mut pg = PostgresConfig::new(url);
            if let Ok(value) = std::env::var("WARDEN_POSTGRES_MAX_CONNECTIONS") {
                pg.max_connections = value
                    .parse()
                    .with_context(|| "parse WARDEN_POSTGRES_MAX_CONNECTIONS")?;
            }
            if let Ok(value) = std::env::var("WARDEN_POSTGRES_CONNECT_TIMEOUT_MS") {
                pg.connect_timeout_ms = value
                    .parse()
                    .with_context(|| "parse WARDEN_POSTGRES_CONNECT_TIMEOUT_MS")?;
            }
            if let Ok(value) = std::env::var("WARDEN_POSTGRES_ACQUIRE_TIMEOUT_MS") {
                pg.acquire_timeout_ms = value
                    .parse()
                    .with_context(|| "parse WARDEN_POSTGRES_ACQUIRE_TIMEOUT_MS")?;
            }
            config.postgres = Some(pg);
        }
        if let Ok(value) = std::env::var("WARDEN_CATALOG") {
            config.catalog_path = Some(PathBuf::from(value));
        }
        if let Ok(value) = std::env::var("WARDEN_REBUILD_BATCH_SIZE") {
            config.rebuild_batch_size = value
                .parse()
                .with_context(|| "parse WARDEN_REBUILD_BATCH_SIZE")?;
        }
        if let Ok(value) = std::env::var("WARDEN_REBUILD_ON_START") {
            config.rebuild_on_start = parse_bool(&value)
                .with_context(|| "parse WARDEN_REBUILD_ON_START")?;
        }
        if let Ok(value) = std::env::var("WARDEN_REGISTRATION_ROLES") {
            config.registration_roles = warden_authz::parse_roles(value.split(','))
                .with_context(|| "parse WARDEN_REGISTRATION_ROLES")?;
        }
        Ok(config)
    }

    fn apply_yaml(&mut self, contents: &str) -> Result<()> {
        let override_cfg: WardenConfigOverride =
            serde_yaml::from_str(contents).with_context(|| "parse warden config yaml")?;
        if let Some(value) = override_cfg.metrics_bind {
            self.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
        }
        if let Some(value) = override_cfg.storage {
            self.storage = value;
        }
        if let Some(value) = override_cfg.postgres {
            self.postgres = Some(value);
        }
        if let Some(value) = override_cfg.catalog_path {
            self.catalog_path = Some(value);
        }
        if let Some(value) = override_cfg.rebuild_batch_size {
            self.rebuild_batch_size = value;
        }
        if let Some(value) = override_cfg.rebuild_on_start {
            self.rebuild_on_start = value;
        }
        if let Some(value) = override_cfg.ownership {
            self.ownership = value;
        }
        if let Some(values) = override_cfg.registration_roles {
            self.registration_roles = values
                .into_iter()
                .map(RoleName::new)
                .collect::<Result<_, _>>()
                .with_context(|| "parse registration_roles")?;
        }
        self.validate()
    }

    fn validate(&self) -> Result<()> {
        if self.rebuild_batch_size == 0 {
            bail!("rebuild_batch_size must be greater than zero");
        }
        if self.storage == StorageBackend::Postgres && self.postgres.is_none() {
            bail!("postgres storage selected but no postgres url configured");
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("invalid boolean: {other}"),
    }
}

/// Resource catalog as loaded from YAML.
///
/// ```yaml
/// resources:
///   content.*: [view]
///   content.story: [create, edit any content, edit own content]
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub resources: BTreeMap<String, Vec<String>>,
}

impl CatalogFile {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("read catalog file: {}", path.display()))?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents).with_context(|| "parse catalog yaml")
    }

    /// Canonicalized entries in file order of their resource names.
    pub fn entries(&self) -> Result<Vec<(ResourceName, Vec<Permission>)>> {
        self.resources
            .iter()
            .map(|(resource, permissions)| {
                let resource: ResourceName = resource
                    .parse()
                    .with_context(|| format!("catalog resource {resource}"))?;
                let permissions = permissions
                    .iter()
                    .map(Permission::new)
                    .collect::<Result<Vec<_>, _>>()
                    .with_context(|| format!("catalog permissions for {resource}"))?;
                Ok((resource, permissions))
            })
            .collect()
    }
}
