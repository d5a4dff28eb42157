//! `tokenrelay config`: configuration management commands.

use tokenrelay_config::AppConfig;
use tokenrelay_core::upstream::mask;

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    println!("{}", redacted(config).to_toml());
    Ok(())
}

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   Config parsed successfully");

            let mut warnings = Vec::new();
            if config.padding.min_size > 0 && config.padding.min_size < 1000 {
                warnings.push("padding.min_size is very small; padding will rarely apply");
            }
            if config.session.cache_key.is_none() && config.upstream.suffix.is_none() {
                warnings.push("No cached credential and no registration suffix; `auto` requests may fail");
            }
            for w in &warnings {
                println!("   warning: {w}");
            }

            println!();
            println!("   Gateway:   {}:{}", config.gateway.host, config.gateway.port);
            println!("   Upstream:  {}", config.upstream.base_url);
            println!("   Locale:    {}", config.locale);
            println!("   Retries:   {}", config.retry.budget);
        }
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}

fn redacted(mut config: AppConfig) -> AppConfig {
    config.session.cache_key = config.session.cache_key.as_deref().map(mask);
    config
}
