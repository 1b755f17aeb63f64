//! Configuration model, file loading and validation.
//!
//! Precedence is CLI (if provided) > config file > built-in default. Config
//! files may be YAML, JSON or TOML; the format is picked by file extension.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::cli::{Args, ConfigFormat};
use crate::monitor::MonitorOptions;

// Default configuration constants
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8787;
pub const DEFAULT_PROCESS_LIST_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_SAMPLE_INTERVAL_SECS: u64 = 5;

/// Config file locations tried in order when `-c` is not given.
pub const DEFAULT_CONFIG_LOCATIONS: &[&str] = &[
    "/etc/pidstat/pidstat.yaml",
    "/etc/pidstat/pidstat.yml",
    "/etc/pidstat/pidstat.json",
    "/etc/pidstat/pidstat.toml",
    "./pidstat.yaml",
    "./pidstat.yml",
    "./pidstat.json",
    "./pidstat.toml",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    // Server configuration
    pub port: Option<u16>,
    pub bind: Option<String>,

    // Collection
    #[serde(alias = "process-list-interval-secs")]
    pub process_list_interval_secs: Option<u64>,
    #[serde(alias = "sample-interval-secs")]
    pub sample_interval_secs: Option<u64>,
    /// Maximum retained samples per watched process; unset keeps all
    #[serde(alias = "max-samples")]
    pub max_samples: Option<usize>,

    // Feature flags
    pub enable_health: Option<bool>,
    pub enable_telemetry: Option<bool>,

    /// Serve processes from a JSON test data file instead of /proc
    pub test_data_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: Some(DEFAULT_PORT),
            bind: Some(DEFAULT_BIND_ADDR.to_string()),
            process_list_interval_secs: Some(DEFAULT_PROCESS_LIST_INTERVAL_SECS),
            sample_interval_secs: Some(DEFAULT_SAMPLE_INTERVAL_SECS),
            max_samples: None,
            enable_health: Some(true),
            enable_telemetry: Some(true),
            test_data_file: None,
        }
    }
}

impl Config {
    pub fn bind_addr(&self) -> &str {
        self.bind.as_deref().unwrap_or(DEFAULT_BIND_ADDR)
    }

    pub fn listen_port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    pub fn monitor_options(&self) -> MonitorOptions {
        MonitorOptions {
            process_list_interval: Duration::from_secs(
                self.process_list_interval_secs
                    .unwrap_or(DEFAULT_PROCESS_LIST_INTERVAL_SECS),
            ),
            sample_interval: Duration::from_secs(
                self.sample_interval_secs
                    .unwrap_or(DEFAULT_SAMPLE_INTERVAL_SECS),
            ),
            max_samples: self.max_samples,
        }
    }
}

/// Validate effective config (used by --check-config and at startup)
pub fn validate_effective_config(cfg: &Config) -> anyhow::Result<()> {
    if cfg.process_list_interval_secs == Some(0) {
        anyhow::bail!("process_list_interval_secs must be greater than 0");
    }
    if cfg.sample_interval_secs == Some(0) {
        anyhow::bail!("sample_interval_secs must be greater than 0");
    }
    if cfg.max_samples == Some(0) {
        anyhow::bail!("max_samples must be greater than 0 (leave unset for unbounded)");
    }
    if let Some(bind) = cfg.bind.as_deref() {
        if bind.parse::<std::net::IpAddr>().is_err() {
            anyhow::bail!("Invalid bind address '{}'", bind);
        }
    }
    if let Some(path) = &cfg.test_data_file {
        if !path.exists() {
            anyhow::bail!("Test data file not found: {}", path.display());
        }
    }
    Ok(())
}

/// Resolves configuration from CLI args, config file, and defaults
pub fn resolve_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = if args.no_config {
        Config::default()
    } else {
        load_config(args.config.as_deref())?
    };

    if let Some(bind_ip) = args.bind {
        config.bind = Some(bind_ip.to_string());
    }
    if let Some(port) = args.port {
        config.port = Some(port);
    }
    if let Some(secs) = args.process_list_interval {
        config.process_list_interval_secs = Some(secs);
    }
    if let Some(secs) = args.sample_interval {
        config.sample_interval_secs = Some(secs);
    }
    if args.max_samples.is_some() {
        config.max_samples = args.max_samples;
    }
    if let Some(path) = &args.test_data_file {
        config.test_data_file = Some(path.clone());
    }
    if args.disable_health {
        config.enable_health = Some(false);
    }
    if args.disable_telemetry {
        config.enable_telemetry = Some(false);
    }

    Ok(config)
}

/// Loads a config file. Without an explicit path the default locations are
/// tried; if none exists the built-in defaults are used.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let path = match path {
        Some(p) => {
            if !p.exists() {
                anyhow::bail!("Config file not found: {}", p.display());
            }
            p.to_path_buf()
        }
        None => match DEFAULT_CONFIG_LOCATIONS
            .iter()
            .map(Path::new)
            .find(|p| p.exists())
        {
            Some(p) => p.to_path_buf(),
            None => return Ok(Config::default()),
        },
    };

    let content = fs::read_to_string(&path)?;
    let config = parse_config(&content, &path)?;
    info!("Loaded configuration from: {}", path.display());
    Ok(config)
}

fn parse_config(content: &str, path: &Path) -> anyhow::Result<Config> {
    let config = match path.extension().and_then(|s| s.to_str()) {
        Some("json") => serde_json::from_str(content)?,
        Some("toml") => toml::from_str(content)?,
        // Default to YAML
        _ => serde_yaml::from_str(content)?,
    };
    Ok(config)
}

/// Renders a config in the requested format.
pub fn render_config(config: &Config, format: &ConfigFormat) -> anyhow::Result<String> {
    let output = match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
        ConfigFormat::Yaml => serde_yaml::to_string(config)?,
    };
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;
    use tempfile::Builder;

    fn write_config(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_are_valid() {
        let cfg = Config::default();
        validate_effective_config(&cfg).unwrap();
        let opts = cfg.monitor_options();
        assert_eq!(opts.sample_interval, Duration::from_secs(5));
        assert_eq!(opts.process_list_interval, Duration::from_secs(5));
        assert_eq!(opts.max_samples, None);
    }

    #[test]
    fn test_load_each_format() {
        let yaml = write_config(".yaml", "port: 9000\nsample_interval_secs: 2\n");
        let cfg = load_config(Some(yaml.path())).unwrap();
        assert_eq!(cfg.port, Some(9000));
        assert_eq!(cfg.sample_interval_secs, Some(2));
        // missing keys deserialize as None, not as defaults
        assert_eq!(cfg.bind, None);
        assert_eq!(cfg.bind_addr(), DEFAULT_BIND_ADDR);

        let json = write_config(".json", r#"{"max_samples": 100}"#);
        assert_eq!(load_config(Some(json.path())).unwrap().max_samples, Some(100));

        let toml = write_config(".toml", "bind = \"127.0.0.1\"\n");
        assert_eq!(
            load_config(Some(toml.path())).unwrap().bind.as_deref(),
            Some("127.0.0.1")
        );
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        assert!(load_config(Some(Path::new("/no/such/pidstat.yaml"))).is_err());
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        let mut cfg = Config {
            sample_interval_secs: Some(0),
            ..Config::default()
        };
        assert!(validate_effective_config(&cfg).is_err());

        cfg.sample_interval_secs = Some(1);
        cfg.max_samples = Some(0);
        assert!(validate_effective_config(&cfg).is_err());

        cfg.max_samples = None;
        cfg.bind = Some("not-an-ip".to_string());
        assert!(validate_effective_config(&cfg).is_err());
    }

    #[test]
    fn test_cli_overrides_file() {
        let yaml = write_config(".yaml", "port: 9000\nmax_samples: 10\n");
        let path = yaml.path().to_str().unwrap();
        let args = Args::parse_from([
            "pidstat",
            "-c",
            path,
            "--port",
            "9100",
            "--sample-interval",
            "1",
            "--disable-telemetry",
        ]);

        let cfg = resolve_config(&args).unwrap();
        assert_eq!(cfg.port, Some(9100));
        assert_eq!(cfg.max_samples, Some(10));
        assert_eq!(cfg.sample_interval_secs, Some(1));
        assert_eq!(cfg.enable_telemetry, Some(false));
    }

    #[test]
    fn test_render_round_trips_through_yaml() {
        let cfg = Config::default();
        let out = render_config(&cfg, &ConfigFormat::Yaml).unwrap();
        let parsed: Config = serde_yaml::from_str(&out).unwrap();
        assert_eq!(parsed, cfg);
    }
}
