use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Top-level configuration. Every field has a default, so running without a
/// config file is fine; a YAML file and CLI/env flags override selectively.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Address the HTTP server binds to.
  pub bind: SocketAddr,
  /// Store snapshot file. Defaults to the platform data directory.
  pub snapshot_path: Option<PathBuf>,
  pub refresh: RefreshConfig,
  pub api: ApiConfig,
  pub client: ClientConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      bind: ([0, 0, 0, 0], 8080).into(),
      snapshot_path: None,
      refresh: RefreshConfig::default(),
      api: ApiConfig::default(),
      client: ClientConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
  /// Base scheduler tick, seconds.
  pub interval_secs: u64,
  /// How many stories of each list to hydrate and serve.
  pub list_size: usize,
  /// Concurrent item fetches within one tree level.
  pub fetch_concurrency: usize,
  /// Staleness threshold: refetch when (now - last_updated) exceeds this
  /// fraction of the item's age at capture time.
  pub stale_ratio: f64,
}

impl Default for RefreshConfig {
  fn default() -> Self {
    Self {
      interval_secs: 600,
      list_size: 50,
      fetch_concurrency: 16,
      stale_ratio: 0.25,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  /// Primary content API (per-item fetch, ranked top list).
  pub item_base: String,
  /// Secondary search API (time-windowed and free-text queries).
  pub search_base: String,
  /// Search API page size.
  pub page_size: usize,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      item_base: "https://hacker-news.firebaseio.com/v0".to_string(),
      search_base: "https://hn.algolia.com/api/v1".to_string(),
      page_size: 50,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
  /// Reader-server base URL the sync layer talks to.
  pub server_base: String,
  /// Read/collapse record retention, days.
  pub retention_days: i64,
  /// How many most-recently-read items the local purge keeps.
  pub keep_recent_reads: usize,
  /// Delay between settings hydration and the one-shot local purge, seconds.
  pub purge_delay_secs: u64,
  /// Persistence retry attempts.
  pub persist_attempts: u32,
  /// Initial persistence retry backoff, milliseconds (doubles per attempt).
  pub persist_backoff_ms: u64,
}

impl Default for ClientConfig {
  fn default() -> Self {
    Self {
      server_base: "http://127.0.0.1:8080".to_string(),
      retention_days: 7,
      keep_recent_reads: 50,
      purge_delay_secs: 5,
      persist_attempts: 3,
      persist_backoff_ms: 250,
    }
  }
}

impl Config {
  /// Load configuration.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./embr.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/embr/config.yaml
  ///
  /// With no file anywhere, the defaults apply.
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
    let local = PathBuf::from("embr.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("embr").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Resolve the snapshot file location, falling back to the platform data
  /// directory.
  pub fn snapshot_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.snapshot_path {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("embr").join("store.json"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_match_reference_tuning() {
    let config = Config::default();
    assert_eq!(config.refresh.interval_secs, 600);
    assert_eq!(config.refresh.stale_ratio, 0.25);
    assert_eq!(config.client.retention_days, 7);
    assert_eq!(config.client.keep_recent_reads, 50);
    assert_eq!(config.api.page_size, 50);
  }

  #[test]
  fn test_partial_yaml_overrides_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("embr.yaml");
    std::fs::write(
      &path,
      "bind: 127.0.0.1:9999\nrefresh:\n  interval_secs: 60\n",
    )
    .unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.bind.port(), 9999);
    assert_eq!(config.refresh.interval_secs, 60);
    // Untouched sections keep their defaults.
    assert_eq!(config.refresh.list_size, 50);
    assert_eq!(config.client.persist_attempts, 3);
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    assert!(Config::load(Some(Path::new("/nonexistent/embr.yaml"))).is_err());
  }
}
