//! Session client helper
//!
//! A typed HTTP client for the API that owns the caller's session: it attaches
//! the bearer token, refuses to send a token that is about to expire, clears
//! the session when the server rejects it, and asks the host application to
//! return to the login screen shortly after any session failure.

pub mod preview;
pub mod session;

use std::{
    sync::{Arc, RwLock},
    time::Duration,
};

use chrono::Utc;
use reqwest::{Method, StatusCode};
use serde::{Serialize, de::DeserializeOwned};

use crate::models::{LoginRequest, LoginResponse, SessionUser};

pub use preview::{PreviewClaims, TokenInfo, is_near_expiry, preview_claims};
pub use session::{FileSessionStore, MemorySessionStore, Session, SessionStore, SessionStoreError};

/// Delay between a session failure and the login redirect, so the caller can
/// show its error message first.
pub const DEFAULT_REDIRECT_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The token was near expiry before sending, or the server answered 403.
    /// The local session has already been cleared.
    #[error("Tu sesión ha expirado. Por favor, inicia sesión nuevamente.")]
    SessionExpired,

    #[error("HTTP {status}: {message}")]
    Http { status: StatusCode, message: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] SessionStoreError),
}

impl ClientError {
    /// Errors after which the user has to log in again.
    pub fn requires_login(&self) -> bool {
        match self {
            ClientError::SessionExpired => true,
            ClientError::Http { status, .. } => {
                *status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN
            }
            _ => false,
        }
    }
}

/// LoginRedirect
///
/// Host hook invoked (after the redirect delay) when the session is no longer usable.
pub trait LoginRedirect: Send + Sync {
    fn redirect_to_login(&self);
}

/// Default hook: records the event and does nothing else.
#[derive(Debug, Default)]
pub struct LogOnlyRedirect;

impl LoginRedirect for LogOnlyRedirect {
    fn redirect_to_login(&self) {
        tracing::info!("session ended, login required");
    }
}

#[derive(serde::Deserialize)]
struct ErrorMessage {
    mensaje: Option<String>,
}

/// ApiClient
///
/// `base_url` includes the `/api` prefix, e.g. `http://localhost:3000/api`.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    store: Arc<dyn SessionStore>,
    redirect: Arc<dyn LoginRedirect>,
    redirect_delay: Duration,
    // Last token read from the store.
    cached_token: RwLock<Option<String>>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, store: Arc<dyn SessionStore>) -> Self {
        let base_url = base_url.into();
        let cached_token = store.load().ok().and_then(|s| s.token);
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            store,
            redirect: Arc::new(LogOnlyRedirect),
            redirect_delay: DEFAULT_REDIRECT_DELAY,
            cached_token: RwLock::new(cached_token),
        }
    }

    pub fn with_redirect(mut self, redirect: Arc<dyn LoginRedirect>, delay: Duration) -> Self {
        self.redirect = redirect;
        self.redirect_delay = delay;
        self
    }

    /// The token seen on the most recent store read.
    pub fn cached_token(&self) -> Option<String> {
        self.cached_token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn remember(&self, token: Option<String>) {
        *self
            .cached_token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = token;
    }

    fn clear_session(&self) {
        if let Err(e) = self.store.clear() {
            tracing::warn!("could not clear stored session: {}", e);
        }
        self.remember(None);
    }

    fn schedule_redirect(&self) {
        let redirect = self.redirect.clone();
        let delay = self.redirect_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            redirect.redirect_to_login();
        });
    }

    /// request
    ///
    /// Sends one JSON request with the stored token attached. Any error that
    /// means the session is over also schedules the login redirect; the error
    /// is still returned to the caller.
    pub async fn request<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let result = self.send(method, path, body, true).await;
        if let Err(e) = &result {
            if e.requires_login() {
                self.schedule_redirect();
            }
        }
        result
    }

    async fn send<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        with_token: bool,
    ) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.request(method, &url);

        if with_token {
            let token = self.store.load()?.token;
            self.remember(token.clone());

            if let Some(token) = token {
                if is_near_expiry(&token, Utc::now()) {
                    tracing::info!("stored token is expired or about to expire, clearing session");
                    self.clear_session();
                    return Err(ClientError::SessionExpired);
                }
                request = request.bearer_auth(token);
            }
        }

        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();

        if with_token && status == StatusCode::FORBIDDEN {
            tracing::info!(url = %url, "server rejected the session (403), clearing it");
            self.clear_session();
            return Err(ClientError::SessionExpired);
        }

        let bytes = response.bytes().await?;

        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorMessage>(&bytes)
                .ok()
                .and_then(|e| e.mensaje)
                .unwrap_or_else(|| {
                    format!(
                        "Error {}: {}",
                        status.as_u16(),
                        status.canonical_reason().unwrap_or("")
                    )
                });
            return Err(ClientError::Http { status, message });
        }

        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.request::<(), T>(Method::GET, path, None).await
    }

    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        self.request(Method::POST, path, Some(body)).await
    }

    pub async fn put<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        self.request(Method::PUT, path, Some(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.request::<(), T>(Method::DELETE, path, None).await
    }

    /// login
    ///
    /// Sent without any stored token, so a stale session cannot block a fresh
    /// login. On success the token and identity are stored together.
    pub async fn login(&self, correo: &str, contrasena: &str) -> Result<LoginResponse, ClientError> {
        let payload = LoginRequest {
            correo: correo.to_string(),
            contrasena: contrasena.to_string(),
        };

        let response: LoginResponse = self
            .send(Method::POST, "/auth/login", Some(&payload), false)
            .await?;

        self.store.save(&Session {
            token: Some(response.token.clone()),
            usuario: Some(response.usuario.clone()),
        })?;
        self.remember(Some(response.token.clone()));

        tracing::info!(user_id = response.usuario.id, "logged in");
        Ok(response)
    }

    pub fn logout(&self) {
        self.clear_session();
        tracing::info!("logged out");
    }

    /// True when both a token and an identity are stored and the token is not
    /// near expiry. An expired token is cleared as a side effect.
    pub fn is_authenticated(&self) -> bool {
        let session = match self.store.load() {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!("could not read stored session: {}", e);
                return false;
            }
        };

        match (&session.token, &session.usuario) {
            (Some(token), Some(_)) if is_near_expiry(token, Utc::now()) => {
                self.clear_session();
                false
            }
            (Some(_), Some(_)) => true,
            _ => false,
        }
    }

    /// The identity stored at login, if any.
    pub fn user_data(&self) -> Option<SessionUser> {
        self.store.load().ok().and_then(|s| s.usuario)
    }

    /// Unverified view of the stored token. Never mutates the session.
    pub fn token_info(&self) -> Option<TokenInfo> {
        let token = self.store.load().ok()?.token?;
        preview::token_info(&token, Utc::now())
    }
}
