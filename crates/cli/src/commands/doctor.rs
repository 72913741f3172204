//! `deskpilot doctor` — Diagnose config and worker health.

use deskpilot_bridge::WorkerBridge;
use deskpilot_config::AppConfig;
use deskpilot_core::worker::CallOptions;
use std::path::Path;
use std::time::Duration;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 DeskPilot Doctor — System Diagnostics");
    println!("========================================\n");

    let mut issues = 0;

    // Check config
    let config_path = AppConfig::config_dir().join("config.toml");
    if !config_path.exists() {
        println!("  ⚠️  No config file — using defaults");
    }
    let config = match AppConfig::load() {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ Config invalid: {e}");
            println!("\n  ⚠️  1 issue(s) found. See above for details.");
            return Ok(());
        }
    };

    // Check worker files
    let (program, args) = config.worker.command();
    if Path::new(&program).exists() {
        println!("  ✅ Worker program found: {program}");
    } else {
        println!("  ❌ Worker program not found: {program}");
        issues += 1;
    }
    for arg in &args {
        if !Path::new(arg).exists() {
            println!("  ❌ Worker script not found: {arg}");
            issues += 1;
        }
    }

    // Check the worker answers
    match WorkerBridge::from_config(&config).await {
        Ok(bridge) => {
            let options = CallOptions::default()
                .with_timeout(PROBE_TIMEOUT)
                .with_retries(0);
            match bridge.call("size", serde_json::json!({}), options).await {
                Ok(size) => println!(
                    "  ✅ Worker responding (screen {}x{})",
                    size["width"], size["height"]
                ),
                Err(e) => {
                    println!("  ❌ Worker not responding: {e}");
                    issues += 1;
                }
            }
            bridge.destroy().await;
        }
        Err(e) => {
            println!("  ❌ Worker failed to start: {e}");
            issues += 1;
        }
    }

    // Summary
    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
