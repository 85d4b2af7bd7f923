//! Configuration file loading
//!
//! Every section is optional. Values from the file become the defaults that
//! command-line flags override.
//!
//! ```toml
//! [bus]
//! fd = true
//! bitrate = 1000000
//! data_bitrate = 4000000
//!
//! [dump]
//! timestamp_mode = "delta"
//! queue_capacity = 20000
//!
//! [send]
//! gap_ms = 50
//! count = 10
//!
//! [play]
//! iterations = "infinite"
//! gap_ms = 2
//! ```

use anyhow::{Context, Result};
use can_trace::{BusParams, DumpConfig, ReplayConfig, SendConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Application configuration (loaded from a TOML file)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// Base bus parameters that channel specs are applied on top of
    #[serde(default)]
    pub bus: BusParams,
    #[serde(default)]
    pub dump: DumpConfig,
    #[serde(default)]
    pub send: SendConfig,
    #[serde(default)]
    pub play: ReplayConfig,
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    config
        .bus
        .validate()
        .with_context(|| format!("Invalid [bus] section in {:?}", path))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use can_trace::{Iterations, TimestampMode};
    use std::io::Write;

    #[test]
    fn test_config_deserialization() {
        let toml_content = r#"
            [bus]
            fd = true

            [dump]
            timestamp_mode = "delta"
            verbose = true

            [send]
            gap_ms = 50

            [play]
            iterations = { count = 3 }
        "#;

        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert!(config.bus.fd);
        assert_eq!(config.bus.bitrate, 500_000);
        assert_eq!(config.dump.timestamp_mode, TimestampMode::Delta);
        assert!(config.dump.verbose);
        assert_eq!(config.dump.queue_capacity, 10_000);
        assert_eq!(config.send.gap_ms, 50);
        assert_eq!(config.send.count, Some(1));
        assert_eq!(config.play.iterations, Iterations::Count(3));
        assert_eq!(config.play.gap_ms, 1);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert!(!config.bus.fd);
        assert_eq!(config.send.gap_ms, 200);
        assert_eq!(config.play.iterations, Iterations::Count(1));
    }

    #[test]
    fn test_infinite_iterations() {
        let config: AppConfig = toml::from_str("[play]\niterations = \"infinite\"\n").unwrap();
        assert_eq!(config.play.iterations, Iterations::Infinite);
    }

    #[test]
    fn test_load_config_rejects_unsupported_bus() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[bus]\nbitrate = 300000").unwrap();
        assert!(load_config(file.path()).is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[bus]\nbitrate = 250000").unwrap();
        assert_eq!(load_config(file.path()).unwrap().bus.bitrate, 250_000);
    }
}
