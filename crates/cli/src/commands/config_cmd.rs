//! `deskpilot config` — Configuration management commands.

use deskpilot_config::AppConfig;

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");

            let mut warnings = Vec::new();

            if config.bridge.retries > 10 {
                warnings.push("More than 10 retries; a dead worker will stall runs for a long time");
            }

            if config.history.max_ui_depth == 0 {
                warnings.push("history.max_ui_depth = 0 truncates every UI tree to a marker");
            }

            if config.bridge.request_ids {
                warnings.push("bridge.request_ids requires a worker that echoes \"id\"");
            }

            if warnings.is_empty() {
                println!("   ✅ All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   ⚠️  {w}");
                }
            }

            let (program, args) = config.worker.command();
            println!();
            println!("   Worker:    {program} {}", args.join(" "));
            println!(
                "   Timeout:   {} ms × {} retries",
                config.bridge.timeout_ms, config.bridge.retries
            );
            println!("   History:   {} messages", config.history.max_messages);
            println!("   Steps:     {}", config.run.max_steps);
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}

pub async fn default() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", AppConfig::default_toml());
    Ok(())
}
