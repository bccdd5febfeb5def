use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Retry policy parameters (`[retry]` table in config.toml).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Consecutive failed attempts after which a worker gives up.
    pub max_attempts: u32,
    /// Base delay in seconds for exponential backoff (e.g. 0.25 = 250ms).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_secs: 0.25,
            max_delay_secs: 30,
        }
    }
}

/// Global configuration loaded from `~/.config/rdm/config.toml`.
/// Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RdmConfig {
    /// Largest work unit handed to a worker by one claim, in bytes.
    pub range_size: u64,
    /// Wire chunk size: bytes per queued chunk and per token debit.
    pub chunk_size: usize,
    /// Chunks the writer queue holds before fetchers block.
    pub queue_capacity: usize,
    pub connect_timeout_secs: u64,
    /// Abort a range request slower than this many bytes/s ...
    pub low_speed_limit: u32,
    /// ... for this many seconds.
    pub low_speed_time_secs: u64,
    /// Default bandwidth cap in bytes per second (None = no cap). The CLI argument wins.
    pub max_bytes_per_sec: Option<u64>,
    pub retry: RetryConfig,
}

impl Default for RdmConfig {
    fn default() -> Self {
        Self {
            range_size: 49152,
            chunk_size: crate::chunk::DEFAULT_CHUNK_SIZE,
            queue_capacity: 1024,
            connect_timeout_secs: 10,
            low_speed_limit: 1024,
            low_speed_time_secs: 30,
            max_bytes_per_sec: None,
            retry: RetryConfig::default(),
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("rdm")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<RdmConfig> {
    load_or_init_at(&config_path()?)
}

/// Same as [`load_or_init`] for an explicit path.
pub fn load_or_init_at(path: &Path) -> Result<RdmConfig> {
    if !path.exists() {
        let default_cfg = RdmConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(path)?;
    let cfg: RdmConfig =
        toml::from_str(&data).with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = RdmConfig::default();
        assert_eq!(cfg.range_size, 49152);
        assert_eq!(cfg.chunk_size, 4096);
        assert_eq!(cfg.queue_capacity, 1024);
        assert_eq!(cfg.connect_timeout_secs, 10);
        assert!(cfg.max_bytes_per_sec.is_none());
        assert_eq!(cfg.retry.max_attempts, 5);
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = RdmConfig::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: RdmConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn config_toml_partial_uses_defaults() {
        let toml = r#"
            range_size = 1048576
            max_bytes_per_sec = 1_000_000
        "#;
        let cfg: RdmConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.range_size, 1_048_576);
        assert_eq!(cfg.max_bytes_per_sec, Some(1_000_000));
        assert_eq!(cfg.chunk_size, 4096);
        assert_eq!(cfg.retry, RetryConfig::default());
    }

    #[test]
    fn config_toml_retry_table() {
        let toml = r#"
            chunk_size = 8192

            [retry]
            max_attempts = 3
            base_delay_secs = 0.5
        "#;
        let cfg: RdmConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.chunk_size, 8192);
        assert_eq!(cfg.retry.max_attempts, 3);
        assert!((cfg.retry.base_delay_secs - 0.5).abs() < 1e-9);
        assert_eq!(cfg.retry.max_delay_secs, 30);
    }

    #[test]
    fn load_or_init_writes_defaults_then_reads_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let cfg = load_or_init_at(&path).unwrap();
        assert_eq!(cfg, RdmConfig::default());
        assert!(path.exists());

        fs::write(&path, "queue_capacity = 16\n").unwrap();
        let cfg = load_or_init_at(&path).unwrap();
        assert_eq!(cfg.queue_capacity, 16);
    }

    #[test]
    fn load_rejects_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "range_size = \"big\"\n").unwrap();
        assert!(load_or_init_at(&path).is_err());
    }
}
