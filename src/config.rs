//! Engine configuration
//!
//! Values come from built-in defaults, an optional `PageDiff.toml` in the
//! working directory, and `PAGEDIFF_*` environment variables, in that order.

use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use std::time::Duration;

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-channel absolute difference a pixel may have before it counts as changed
    pub tolerance: u8,
    /// Rasterization resolution for PDF pages
    pub dpi: u32,
    /// Idle time after which a session is swept
    pub session_ttl_secs: u64,
    /// Interval between background sweeps
    pub sweep_interval_secs: u64,
    /// Upper bound on a single diff call
    pub diff_timeout_secs: u64,
    /// Diff worker pool size; 0 lets rayon pick
    pub worker_threads: usize,
    pub max_document_bytes: u64,
    pub max_pages_per_document: usize,
    /// Budget across all live sessions
    pub max_total_bytes: u64,
    pub pdftoppm_path: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tolerance: 30,
            dpi: 200,
            session_ttl_secs: 3600,
            sweep_interval_secs: 60,
            diff_timeout_secs: 300,
            worker_threads: 0,
            max_document_bytes: 64 * MIB,
            max_pages_per_document: 500,
            max_total_bytes: 1024 * MIB,
            pdftoppm_path: "pdftoppm".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn diff_timeout(&self) -> Duration {
        Duration::from_secs(self.diff_timeout_secs)
    }
}

/// Load configuration from `PageDiff.toml` (optional) and the environment
pub fn load_configuration() -> Result<EngineConfig, ConfigError> {
    load_from("PageDiff")
}

/// Load configuration from the named file (extension optional) and the environment
pub fn load_from(name: &str) -> Result<EngineConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name(name).required(false))
        .add_source(Environment::with_prefix("PAGEDIFF"))
        .build()?;
    builder.try_deserialize::<EngineConfig>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.tolerance, 30);
        assert_eq!(config.dpi, 200);
        assert_eq!(config.diff_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = load_from("definitely-not-a-pagediff-config").expect("load");
        assert_eq!(config.max_pages_per_document, 500);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let path = dir.path().join("custom.toml");
        let mut file = std::fs::File::create(&path).expect("create");
        writeln!(file, "tolerance = 12\ndpi = 150").expect("write");

        let config = load_from(path.to_str().expect("utf8 path")).expect("load");
        assert_eq!(config.tolerance, 12);
        assert_eq!(config.dpi, 150);
        assert_eq!(config.session_ttl_secs, 3600);
    }

    #[test]
    fn test_sweep_interval_never_zero() {
        let config = EngineConfig {
            sweep_interval_secs: 0,
            ..EngineConfig::default()
        };
        assert_eq!(config.sweep_interval(), Duration::from_secs(1));
    }
}
