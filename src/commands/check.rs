//! Check command implementation.
//!
//! Validates the configuration and that processes can be listed and sampled.

use std::time::Duration;

use crate::config::{validate_effective_config, Config};
use crate::source::{ProcessSource, ProcfsSource};

/// Runs the system checks and returns an error if any of them failed.
pub fn command_check(
    proc: bool,
    self_sample: bool,
    all: bool,
    config: &Config,
) -> anyhow::Result<()> {
    println!("🔍 pidstat - System Check");
    println!("=========================");

    let source = ProcfsSource::new();
    let mut all_ok = true;

    if proc || all {
        println!("\n📁 Checking {} filesystem...", source.root().display());
        all_ok &= check_enumeration(&source);
    }

    if self_sample || all {
        println!("\n💾 Checking process sampling...");
        all_ok &= check_self_sample(&source);
    }

    println!("\n⚙️  Checking configuration...");
    match validate_effective_config(config) {
        Ok(()) => println!("   ✅ Configuration is valid"),
        Err(e) => {
            println!("   ❌ Configuration invalid: {}", e);
            all_ok = false;
        }
    }
    if let Some(path) = &config.test_data_file {
        println!("   ℹ️  Test data mode: {}", path.display());
    }

    println!("\n📋 Summary:");
    if all_ok {
        println!("   ✅ All checks passed - system is ready");
        Ok(())
    } else {
        println!("   ❌ Some checks failed - please review warnings");
        anyhow::bail!("system check failed")
    }
}

fn check_enumeration(source: &ProcfsSource) -> bool {
    if !source.root().exists() {
        println!("   ❌ {} not found", source.root().display());
        return false;
    }
    println!("   ✅ {} accessible", source.root().display());

    match source.enumerate() {
        Ok(list) if list.is_empty() => {
            println!("   ❌ Cannot read any process entries");
            false
        }
        Ok(list) => {
            println!("   ✅ Can read {} process entries", list.len());
            true
        }
        Err(e) => {
            println!("   ❌ Process enumeration failed: {}", e);
            false
        }
    }
}

fn check_self_sample(source: &ProcfsSource) -> bool {
    let pid = std::process::id();
    let mut handle = match source.open(pid) {
        Ok(h) => h,
        Err(e) => {
            println!("   ❌ Cannot open own process {}: {}", pid, e);
            return false;
        }
    };

    if let Err(e) = handle.probe() {
        println!("   ❌ Probe of pid {} failed: {}", pid, e);
        return false;
    }
    println!("   ✅ Probe of pid {} succeeded", pid);

    // Second sample carries a CPU delta
    let first = handle.sample();
    std::thread::sleep(Duration::from_millis(100));
    match first.and_then(|_| handle.sample()) {
        Ok(usage) => {
            println!(
                "   ✅ Sampling successful: RSS={}MB, VMS={}MB, swap={}KB, CPU={:.2}%, threads={}",
                usage.resident_memory / 1024 / 1024,
                usage.virtual_memory / 1024 / 1024,
                usage.swap / 1024,
                usage.cpu_percent,
                usage.threads
            );
            true
        }
        Err(e) => {
            println!("   ❌ Sampling failed: {}", e);
            false
        }
    }
}
