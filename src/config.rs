use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

use crate::cache::Generation;
use crate::worker::{
  default_identity_providers, default_rules, default_static_extensions, StrategyRule,
  StrategySelector, WorkerConfig,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Application origin the proxy forwards to
  pub origin: String,
  /// Address the proxy listens on
  pub listen: SocketAddr,
  pub cache: CacheConfig,
  /// App shell paths fetched at install
  pub precache: Vec<String>,
  /// Explicit strategy rules, first match wins
  pub strategies: Vec<StrategyRule>,
  /// Hosts or URL fragments of identity providers (always network-first)
  pub identity_providers: Vec<String>,
  /// Path suffixes treated as static assets (cache-first)
  pub static_extensions: Vec<String>,
  pub logging: LoggingConfig,
  /// Where this configuration was read from, if anywhere
  #[serde(skip)]
  pub source: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Partition name prefix; only partitions with it are ever cleaned up
  pub prefix: String,
  /// Generation suffix; bump to retire every existing partition
  pub version: String,
  /// Entry cap of the dynamic partition
  pub dynamic_limit: usize,
  /// Database file (default: $XDG_DATA_HOME/biapo-offline/cache.db)
  pub database: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Write logs to a daily rolling file instead of stderr
  pub file: bool,
  /// Log directory (default: $XDG_DATA_HOME/biapo-offline/logs)
  pub directory: Option<PathBuf>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:5173".to_string(),
      listen: SocketAddr::from(([127, 0, 0, 1], 8787)),
      cache: CacheConfig::default(),
      precache: [
        "/",
        "/index.html",
        "/css/styles.css",
        "/js/app.js",
        "/manifest.json",
        "/offline.html",
      ]
      .iter()
      .map(|s| s.to_string())
      .collect(),
      strategies: default_rules(),
      identity_providers: default_identity_providers(),
      static_extensions: default_static_extensions(),
      logging: LoggingConfig::default(),
      source: None,
    }
  }
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: "biapo".to_string(),
      version: "v1.0.0".to_string(),
      dynamic_limit: 50,
      database: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./biapo-offline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/biapo-offline/config.yaml
  ///
  /// Built-in defaults are used when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("biapo-offline.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("biapo-offline").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let mut config = Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;
    config.source = Some(path.to_path_buf());

    Ok(config)
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    Ok(config)
  }

  /// Build the immutable settings a worker runs with.
  pub fn worker_config(&self) -> Result<WorkerConfig> {
    let origin =
      Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))?;
    if !matches!(origin.scheme(), "http" | "https") {
      return Err(eyre!("Origin must be http or https: {}", self.origin));
    }

    if self.cache.prefix.is_empty() {
      return Err(eyre!("cache.prefix must not be empty"));
    }
    if self.cache.version.is_empty() {
      return Err(eyre!("cache.version must not be empty"));
    }
    if self.cache.dynamic_limit == 0 {
      return Err(eyre!("cache.dynamic_limit must be at least 1"));
    }

    let precache = self
      .precache
      .iter()
      .map(|p| {
        origin
          .join(p)
          .map_err(|e| eyre!("Invalid precache entry '{}': {}", p, e))
      })
      .collect::<Result<Vec<_>>>()?;

    Ok(WorkerConfig {
      generation: Arc::new(Generation::new(
        &self.cache.prefix,
        &self.cache.version,
        self.cache.dynamic_limit,
      )),
      precache,
      selector: StrategySelector::new(
        self.strategies.clone(),
        self.identity_providers.clone(),
        self.static_extensions.clone(),
      ),
      origin,
    })
  }
}
