//! Config command implementation.
//!
//! Writes a default configuration file in the requested format.

use std::fs;
use std::path::{Path, PathBuf};

use crate::cli::ConfigFormat;
use crate::config::{render_config, Config};

/// Generates a configuration file. `-` as output writes to stdout.
pub fn command_config(output: Option<PathBuf>, format: ConfigFormat) -> anyhow::Result<()> {
    let content = render_config(&Config::default(), &format)?;

    let output = output.unwrap_or_else(|| PathBuf::from(default_file_name(&format)));
    if output == Path::new("-") {
        print!("{}", content);
        return Ok(());
    }

    fs::write(&output, content)?;
    println!("✅ Configuration written to: {}", output.display());
    Ok(())
}

fn default_file_name(format: &ConfigFormat) -> &'static str {
    match format {
        ConfigFormat::Yaml => "pidstat.yaml",
        ConfigFormat::Json => "pidstat.json",
        ConfigFormat::Toml => "pidstat.toml",
    }
}
