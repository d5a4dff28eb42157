//! HTTP completion gateway for tokenrelay.
//!
//! Exposes `POST /v1/complete` (streaming or not) and `GET /health`.
//!
//! Built on Axum.

pub mod api;
pub mod completion;

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    response::Json,
    routing::{get, post},
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use tokenrelay_config::{AppConfig, EnvFile};
use tokenrelay_core::Upstream;
use tokenrelay_engine::{PaddingPolicy, PromptAssembler};
use tokenrelay_providers::HttpUpstream;
use tokenrelay_session::{SessionSettings, SessionTokenManager};

use completion::{CompletionService, CompletionSettings};

/// Inbound prompts can be long conversation transcripts.
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub config: AppConfig,
    pub service: CompletionService,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    /// Wire the session manager, prompt assembler, and completion service
    /// around `upstream`.
    pub fn new(config: AppConfig, upstream: Arc<dyn Upstream>) -> Self {
        let locale = config.locale();

        let mut sessions = SessionTokenManager::new(
            upstream.clone(),
            SessionSettings {
                base_url: Some(config.upstream.base_url.clone()),
                suffix: config.upstream.suffix.clone(),
                proxy: config.upstream.proxy.clone(),
            },
        )
        .with_locale(locale);
        if config.session.persist {
            sessions = sessions.with_store(EnvFile::new(&config.session.env_file));
        }
        if let Some(key) = &config.session.cache_key {
            sessions.seed(key.clone());
        }

        let assembler = PromptAssembler::new(PaddingPolicy {
            filler: config.padding.filler.clone(),
            min_size: config.padding.min_size,
        });

        let service = CompletionService::new(
            upstream,
            Arc::new(sessions),
            assembler,
            CompletionSettings {
                base_url: Some(config.upstream.base_url.clone()),
                proxy: config.upstream.proxy.clone(),
                begin_threshold: config.engine.begin_threshold,
                retry_budget: config.retry.budget,
                locale,
            },
        );

        Self { config, service }
    }
}

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/complete", post(api::complete_handler))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let upstream = HttpUpstream::new()?
        .with_base_url(config.upstream.base_url.clone())
        .with_timeout(Duration::from_secs(config.upstream.timeout_secs))?;

    info!(
        base_url = %config.upstream.base_url,
        proxy = config.upstream.proxy.as_deref().unwrap_or("none"),
        shared_credential = config.session.cache_key.is_some(),
        "Upstream configured"
    );

    let state = Arc::new(GatewayState::new(config, Arc::new(upstream)));
    let app = build_router(state);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
