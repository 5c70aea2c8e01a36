use anyhow::Result;
use serde::Deserialize;
use anyhow::anyhow;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub host_apply: HostApplyConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub worker_threads: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".into(), port: 8080, worker_threads: Some(4) }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_max_lifetime")]
    pub max_lifetime_secs: u64,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
    #[serde(default)]
    pub sqlx_logging: bool,
}

fn default_max_connections() -> u32 { 10 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 30 }
fn default_idle_timeout() -> u64 { 600 }
fn default_max_lifetime() -> u64 { 3600 }
fn default_acquire_timeout() -> u64 { 30 }

/// Which store backs the host apply engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Postgres,
    Memory,
}

/// Limits and sizing for the host apply engine.
#[derive(Debug, Clone, Deserialize)]
pub struct HostApplyConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Upper bound on template or module IDs accepted by one sync status query.
    #[serde(default = "default_max_sync_status_ids")]
    pub max_sync_status_ids: usize,
    /// Largest page a caller may request when listing rules.
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u64,
    /// Page size used when scanning host-module relations.
    #[serde(default = "default_relation_page_size")]
    pub relation_page_size: u64,
    /// Host IDs per count or update statement; keeps bind parameters under the driver limit.
    #[serde(default = "default_host_shard_size")]
    pub host_shard_size: usize,
    #[serde(default = "default_task_queue_capacity")]
    pub task_queue_capacity: usize,
}

fn default_max_sync_status_ids() -> usize { 100 }
fn default_max_page_size() -> u64 { 1000 }
fn default_relation_page_size() -> u64 { 500 }
fn default_host_shard_size() -> usize { 5000 }
fn default_task_queue_capacity() -> usize { 64 }

impl Default for HostApplyConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            max_sync_status_ids: default_max_sync_status_ids(),
            max_page_size: default_max_page_size(),
            relation_page_size: default_relation_page_size(),
            host_shard_size: default_host_shard_size(),
            task_queue_capacity: default_task_queue_capacity(),
        }
    }
}

pub fn load_default() -> Result<AppConfig> {
    let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    load_from_file(&path)
}

pub fn load_from_file(path: &str) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let cfg: AppConfig = toml::from_str(&content)?;
    Ok(cfg)
}

impl AppConfig {
    pub fn load_and_validate() -> Result<Self> {
        let mut cfg = load_default()?;
        cfg.normalize_and_validate()?;
        Ok(cfg)
    }

    pub fn normalize_and_validate(&mut self) -> Result<()> {
        self.server.normalize()?;
        // the URL may come from DATABASE_URL instead of the file
        self.database.normalize_from_env();
        if self.host_apply.backend == StoreBackend::Postgres {
            self.database.validate()?;
        }
        self.host_apply.validate()?;
        Ok(())
    }
}

impl ServerConfig {
    fn normalize(&mut self) -> Result<()> {
        if self.host.trim().is_empty() {
            self.host = "127.0.0.1".to_string();
        }
        if self.port == 0 {
            return Err(anyhow!("server.port must be within 1..=65535"));
        }
        if let Some(w) = self.worker_threads {
            if w == 0 { self.worker_threads = Some(4); }
        } else {
            self.worker_threads = Some(4);
        }
        Ok(())
    }
}

impl DatabaseConfig {
    pub fn normalize_from_env(&mut self) {
        if self.url.trim().is_empty() {
            let _ = dotenvy::dotenv();
            if let Ok(url) = std::env::var("DATABASE_URL") {
                self.url = url;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(anyhow!("database.url is empty; set it in config.toml or DATABASE_URL"));
        }
        let lower = self.url.to_lowercase();
        if !(lower.starts_with("postgresql://") || lower.starts_with("postgres://")) {
            return Err(anyhow!("database.url must start with postgresql:// or postgres://"));
        }
        if self.min_connections == 0 {
            return Err(anyhow!("database.min_connections must be >= 1"));
        }
        if self.max_connections < self.min_connections {
            return Err(anyhow!("database.max_connections must be >= min_connections"));
        }
        if self.connect_timeout_secs == 0 || self.acquire_timeout_secs == 0 {
            return Err(anyhow!("database timeouts must be positive seconds"));
        }
        Ok(())
    }
}

impl HostApplyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_sync_status_ids == 0 {
            return Err(anyhow!("host_apply.max_sync_status_ids must be >= 1"));
        }
        if self.max_page_size == 0 || self.relation_page_size == 0 {
            return Err(anyhow!("host_apply page sizes must be >= 1"));
        }
        if self.host_shard_size == 0 {
            return Err(anyhow!("host_apply.host_shard_size must be >= 1"));
        }
        if self.task_queue_capacity == 0 {
            return Err(anyhow!("host_apply.task_queue_capacity must be >= 1"));
        }
        Ok(())
    }
}
