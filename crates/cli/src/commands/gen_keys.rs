//! `tokenrelay gen-keys`: acquire fresh session credentials.

use clap::Args;
use std::sync::Arc;
use std::time::Duration;
use tokenrelay_config::AppConfig;
use tokenrelay_providers::HttpUpstream;
use tokenrelay_session::{SessionSettings, SessionTokenManager};
use tracing::{info, warn};

#[derive(Debug, Args)]
pub struct GenKeysArgs {
    /// How many credentials to acquire
    #[arg(short, long, default_value_t = 1)]
    pub count: usize,

    /// Mail domain used when registering
    #[arg(long)]
    pub suffix: Option<String>,

    /// Proxy for upstream requests
    #[arg(long)]
    pub proxy: Option<String>,

    /// Upstream base URL
    #[arg(long)]
    pub base_url: Option<String>,
}

pub async fn run(args: GenKeysArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    let locale = config.locale();
    let base_url = args.base_url.unwrap_or(config.upstream.base_url);
    info!(count = args.count, base_url = %base_url, "Acquiring session credentials");
    let upstream = HttpUpstream::new()?
        .with_base_url(base_url.clone())
        .with_timeout(Duration::from_secs(config.upstream.timeout_secs))?;

    let sessions = SessionTokenManager::new(
        Arc::new(upstream),
        SessionSettings {
            base_url: Some(base_url),
            suffix: args.suffix.or(config.upstream.suffix),
            proxy: args.proxy.or(config.upstream.proxy),
        },
    )
    .with_locale(locale);

    let grants = sessions.generate(args.count).await;
    for grant in &grants {
        println!("identity={}; sessionKey={}", grant.identity, grant.token);
    }

    if grants.len() < args.count {
        warn!(acquired = grants.len(), requested = args.count, "Some acquisitions failed");
        return Err(format!("acquired {} of {} credentials", grants.len(), args.count).into());
    }
    Ok(())
}
