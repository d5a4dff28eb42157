use std::sync::{Arc, RwLock};
use tokenrelay_config::{CACHE_KEY, EnvFile};
use tokenrelay_core::upstream::mask;
use tokenrelay_core::{
    AUTO_TOKEN, Locale, MessageKey, ModelFamily, RequestError, SessionGrant, Upstream,
    UpstreamError,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Acquire(#[from] UpstreamError),
}

/// Where and how new sessions are acquired.
#[derive(Debug, Clone, Default)]
pub struct SessionSettings {
    pub base_url: Option<String>,
    pub suffix: Option<String>,
    pub proxy: Option<String>,
}

/// The credential to use for one submission.
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedCredential {
    pub token: String,
    pub app_id: Option<String>,
    /// `true` when this is the shared credential, which makes it subject to
    /// invalidation.
    pub shared: bool,
}

impl std::fmt::Debug for ResolvedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedCredential")
            .field("token", &mask(&self.token))
            .field("app_id", &self.app_id)
            .field("shared", &self.shared)
            .finish()
    }
}

/// Owns the shared session credential.
///
/// Reads go through a plain `RwLock` that is never held across an await.
/// Acquisition is serialized by a separate async gate, so concurrent
/// requests that all find the slot empty trigger a single acquisition.
pub struct SessionTokenManager {
    slot: RwLock<Option<String>>,
    gate: Mutex<()>,
    upstream: Arc<dyn Upstream>,
    store: Option<EnvFile>,
    settings: SessionSettings,
    locale: Locale,
}

impl SessionTokenManager {
    pub fn new(upstream: Arc<dyn Upstream>, settings: SessionSettings) -> Self {
        Self {
            slot: RwLock::new(None),
            gate: Mutex::new(()),
            upstream,
            store: None,
            settings,
            locale: Locale::default(),
        }
    }

    /// Persist newly acquired credentials to `store`.
    pub fn with_store(mut self, store: EnvFile) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_locale(mut self, locale: Locale) -> Self {
        self.locale = locale;
        self
    }

    /// Start with a known credential (e.g. the persisted one).
    pub fn seed(&self, token: impl Into<String>) {
        let token = token.into();
        if token.is_empty() {
            return;
        }
        debug!(token = %mask(&token), "Shared credential seeded");
        self.store_slot(Some(token));
    }

    /// The shared credential, if one is held.
    pub fn current(&self) -> Option<String> {
        match self.slot.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Turn the credential a client sent into the one to submit with.
    ///
    /// For families that need an application id the credential has the form
    /// `token,app-id`. Such credentials are always used as given. Otherwise
    /// `auto` selects the shared credential, acquiring one if needed.
    pub async fn resolve(
        &self,
        requested: &str,
        family: ModelFamily,
    ) -> Result<ResolvedCredential, SessionError> {
        if family.requires_app_id() {
            let (token, app_id) = requested
                .split_once(',')
                .map(|(t, a)| (t.trim(), a.trim()))
                .filter(|(_, a)| !a.is_empty())
                .ok_or(RequestError::MissingAppId)?;
            return Ok(ResolvedCredential {
                token: token.to_string(),
                app_id: Some(app_id.to_string()),
                shared: false,
            });
        }

        if requested != AUTO_TOKEN {
            return Ok(ResolvedCredential {
                token: requested.to_string(),
                app_id: None,
                shared: false,
            });
        }

        let token = self.shared().await?;
        Ok(ResolvedCredential {
            token,
            app_id: None,
            shared: true,
        })
    }

    async fn shared(&self) -> Result<String, UpstreamError> {
        if let Some(token) = self.current() {
            return Ok(token);
        }

        let _guard = self.gate.lock().await;
        // Someone else may have finished acquiring while we waited.
        if let Some(token) = self.current() {
            return Ok(token);
        }

        let grant = self.acquire().await?;
        self.store_slot(Some(grant.token.clone()));
        self.persist(&grant.token).await;
        Ok(grant.token)
    }

    /// Drop the shared credential. The next `auto` request acquires a new one.
    pub fn invalidate(&self) {
        if self.current().is_some() {
            info!("Shared session credential invalidated");
        }
        self.store_slot(None);
    }

    /// Drop the shared credential only if it is still `failed`.
    ///
    /// A credential acquired by another request since `failed` was handed
    /// out is kept.
    pub fn invalidate_if(&self, failed: &str) {
        let mut slot = match self.slot.write() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.as_deref() == Some(failed) {
            *slot = None;
            info!(token = %mask(failed), "Shared session credential invalidated");
        } else {
            debug!(token = %mask(failed), "Shared session credential already replaced");
        }
    }

    /// Acquire `count` fresh sessions without touching the shared slot.
    ///
    /// Failures are logged and skipped.
    pub async fn generate(&self, count: usize) -> Vec<SessionGrant> {
        let mut grants = Vec::with_capacity(count);
        for _ in 0..count {
            match self.acquire().await {
                Ok(grant) => grants.push(grant),
                Err(e) => warn!(error = %e, "{}", self.locale.text(MessageKey::SessionGenerateFailed)),
            }
        }
        grants
    }

    async fn acquire(&self) -> Result<SessionGrant, UpstreamError> {
        let result = self
            .upstream
            .acquire_session(
                self.settings.base_url.as_deref(),
                self.settings.suffix.as_deref(),
                self.settings.proxy.as_deref(),
            )
            .await;

        match &result {
            Ok(grant) => info!(
                identity = %grant.identity,
                token = %mask(&grant.token),
                "{}",
                self.locale.text(MessageKey::SessionGenerated)
            ),
            Err(e) => warn!(
                upstream = self.upstream.name(),
                error = %e,
                "{}",
                self.locale.text(MessageKey::SessionGenerateFailed)
            ),
        }
        result
    }

    fn store_slot(&self, value: Option<String>) {
        match self.slot.write() {
            Ok(mut slot) => *slot = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
    }

    async fn persist(&self, token: &str) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let path = store.path().display().to_string();
        let token = token.to_string();
        match tokio::task::spawn_blocking(move || store.upsert(CACHE_KEY, &token)).await {
            Ok(Ok(())) => debug!(path, "Session credential persisted"),
            Ok(Err(e)) => warn!(path, error = %e, "Failed to persist session credential"),
            Err(e) => warn!(path, error = %e, "Credential persistence task failed"),
        }
    }
}
