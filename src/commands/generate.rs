//! Generate testdata command implementation.
//!
//! Generates synthetic process lists for running without /proc.

use chrono::Utc;
use rand::Rng;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

use crate::source::synthetic::{TestData, TestProcess};

const NAMES: &[&str] = &[
    "nginx", "postgres", "redis-server", "java", "python3", "node", "sshd", "containerd",
    "worker", "cron",
];

/// Writes `count` random processes to `output` as JSON. The first
/// `exiting` of them terminate after a few samples.
pub fn command_generate_testdata(
    output: PathBuf,
    count: usize,
    exiting: usize,
) -> anyhow::Result<()> {
    debug!(
        "Generating test data: count={}, exiting={}, output={}",
        count,
        exiting,
        output.display()
    );

    let test_data = generate_test_data(&mut rand::thread_rng(), count, exiting);
    let json_content = serde_json::to_string_pretty(&test_data)?;
    fs::write(&output, &json_content)?;

    println!(
        "✅ Generated test data: {} processes in {}",
        test_data.processes.len(),
        output.display()
    );
    Ok(())
}

fn generate_test_data(rng: &mut impl Rng, count: usize, exiting: usize) -> TestData {
    let processes = (0..count)
        .map(|i| {
            let name = NAMES[i % NAMES.len()];
            let exits_after = (i < exiting).then(|| rng.gen_range(3..10));
            generate_random_process(rng, 1000 + i as u32, name, i, exits_after)
        })
        .collect();

    TestData {
        version: "1.0".to_string(),
        generated_at: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        processes,
    }
}

/// Generates a random process with realistic memory and CPU values.
fn generate_random_process(
    rng: &mut impl Rng,
    pid: u32,
    name: &str,
    index: usize,
    exits_after: Option<u32>,
) -> TestProcess {
    // RSS: 10 MB - 2 GB (in bytes)
    let rss = rng.gen_range(10 * 1024 * 1024..2 * 1024 * 1024 * 1024_u64);

    // VMS: 1.5x - 4x of RSS
    let vms = (rss as f64 * rng.gen_range(1.5..4.0)) as u64;

    // Swap: mostly zero
    let swap = if rng.gen_bool(0.2) {
        rng.gen_range(0..rss / 4)
    } else {
        0
    };

    TestProcess {
        pid,
        name: name.to_string(),
        cmd_line: format!("/usr/bin/{} --instance={}", name, index + 1),
        rss,
        vms,
        swap,
        cpu_percent: rng.gen_range(0.0..100.0),
        threads: rng.gen_range(1..64),
        exits_after,
    }
}
