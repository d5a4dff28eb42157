//! `tokenrelay serve`: start the completion gateway.

use clap::Args;
use tokenrelay_config::AppConfig;
use tracing::info;

#[derive(Debug, Default, Args)]
pub struct ServeArgs {
    /// Override the port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Override the bind address
    #[arg(long)]
    pub host: Option<String>,

    /// Proxy for upstream requests (http, https, or socks5 URL)
    #[arg(long)]
    pub proxy: Option<String>,

    /// Upstream base URL
    #[arg(long)]
    pub base_url: Option<String>,

    /// Mail domain used when registering new sessions
    #[arg(long)]
    pub suffix: Option<String>,

    /// Message language (zh or en)
    #[arg(long)]
    pub locale: Option<String>,
}

impl ServeArgs {
    fn apply(self, config: &mut AppConfig) {
        if let Some(port) = self.port {
            config.gateway.port = port;
        }
        if let Some(host) = self.host {
            config.gateway.host = host;
        }
        if let Some(proxy) = self.proxy {
            config.upstream.proxy = Some(proxy);
        }
        if let Some(base_url) = self.base_url {
            config.upstream.base_url = base_url;
        }
        if let Some(suffix) = self.suffix {
            config.upstream.suffix = Some(suffix);
        }
        if let Some(locale) = self.locale {
            config.locale = locale;
        }
    }
}

pub async fn run(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    args.apply(&mut config);
    config.validate()?;

    println!("tokenrelay gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Upstream:  {}", config.upstream.base_url);
    if let Some(proxy) = &config.upstream.proxy {
        println!("   Proxy:     {proxy}");
    }

    info!(
        locale = %config.locale,
        retry_budget = config.retry.budget,
        persist = config.session.persist,
        "Starting gateway"
    );
    tokenrelay_gateway::start(config).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let mut config = AppConfig::default();
        ServeArgs {
            port: Some(9000),
            proxy: Some("socks5://127.0.0.1:1080".into()),
            locale: Some("en".into()),
            ..ServeArgs::default()
        }
        .apply(&mut config);

        assert_eq!(config.gateway.port, 9000);
        assert_eq!(config.gateway.host, "0.0.0.0");
        assert_eq!(config.upstream.proxy.as_deref(), Some("socks5://127.0.0.1:1080"));
        assert_eq!(config.locale, "en");
        assert!(config.validate().is_ok());
    }
}
