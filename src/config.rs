use serde::Deserialize;
use std::{env, fs, path::Path};
use toml_edit::{DocumentMut, Item, Table, value};
use tracing::info;

pub const DEFAULT_CONFIG_PATH: &str = ".config/store_counts.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub store_cache: StoreCacheConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
}

fn default_db_path() -> String {
    "data/store_counts.db".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_origins")]
    pub allowed_origins: Vec<String>,
}

fn default_bind() -> String {
    "0.0.0.0:3333".to_string()
}

fn default_origins() -> Vec<String> {
    vec!["http://localhost:3000".to_string()]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            allowed_origins: default_origins(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_max_requests() -> u32 {
    120
}

fn default_window_secs() -> u64 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreCacheConfig {
    /// 15 minutes unless overridden.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_ttl_secs() -> u64 {
    15 * 60
}

impl Default for StoreCacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default)]
    pub store_code: Option<String>,
}

fn default_base_url() -> String {
    "http://localhost:3333".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            session_token: None,
            store_code: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogConfig {
    /// Replacement classification tables; the built-in ones are used when unset.
    #[serde(default)]
    pub tables_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            server: ServerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            store_cache: StoreCacheConfig::default(),
            client: ClientConfig::default(),
            catalog: CatalogConfig::default(),
        }
    }
}

impl Config {
    /// Load the config file, falling back to defaults when it does not exist.
    /// `STORE_COUNTS_SESSION` and `STORE_COUNTS_STORE` override the client section.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let path = path.as_ref();
        let mut cfg = if path.exists() {
            let content = fs::read_to_string(path)?;
            Self::from_toml_str(&content)?
        } else {
            info!(path = %path.display(), "Config file not found, using defaults");
            Self::default()
        };

        if let Ok(token) = env::var("STORE_COUNTS_SESSION") {
            cfg.client.session_token = Some(token);
        }
        if let Ok(code) = env::var("STORE_COUNTS_STORE") {
            cfg.client.store_code = Some(code);
        }
        Ok(cfg)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Persist the default store code, keeping the rest of the file untouched.
    pub fn update_store_code(
        path: impl AsRef<Path>,
        store_code: &str,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let path = path.as_ref();
        let content = if path.exists() {
            fs::read_to_string(path)?
        } else {
            String::new()
        };
        let updated = set_store_code(&content, store_code)?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, updated)?;
        Ok(())
    }
}

fn set_store_code(content: &str, store_code: &str) -> Result<String, toml_edit::TomlError> {
    let mut doc = content.parse::<DocumentMut>()?;
    if !doc.contains_table("client") {
        doc["client"] = Item::Table(Table::new());
    }
    doc["client"]["store_code"] = value(store_code);
    Ok(doc.to_string())
}
