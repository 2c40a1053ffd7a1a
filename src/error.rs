//! HTTP error taxonomy
//!
//! Every handler and extractor returns [`ApiError`]; nothing below the HTTP
//! boundary leaks out unhandled. Messages are user-facing (Spanish, matching the
//! frontend); the JSON body always carries a `mensaje` key.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::{
    password::PasswordError,
    posts::{PersistenceAttempt, PostWriteError},
    repository::RepoError,
    token::TokenError,
};

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing or malformed input.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    /// No credentials presented.
    #[error("{0}")]
    Unauthorized(String),

    /// Credentials presented but invalid, expired, or lacking the required role.
    #[error("{0}")]
    Forbidden(String),

    /// A unique field is already taken.
    #[error("{0}")]
    Conflict(String),

    #[error("{message}")]
    Internal {
        message: String,
        detail: Option<String>,
    },

    /// Every post persistence strategy failed.
    #[error(transparent)]
    PostWrite(PostWriteError),
}

#[derive(Serialize)]
struct ErrorBody {
    mensaje: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detalle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    intentos: Option<Vec<PersistenceAttempt>>,
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Conflict(message.into())
    }

    /// Wrap an unexpected failure. The error's `Display` is surfaced to the
    /// client; its `Debug` form is kept as detail for debug builds.
    pub fn internal<E: std::fmt::Debug + std::fmt::Display>(err: E) -> Self {
        ApiError::Internal {
            message: err.to_string(),
            detail: Some(format!("{:?}", err)),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal { .. } | ApiError::PostWrite(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn log(&self) {
        match self {
            ApiError::Internal { message, .. } => {
                tracing::error!(error = %message, "internal error");
            }
            ApiError::PostWrite(e) => {
                tracing::error!(attempts = e.attempts.len(), error = %e, "post could not be stored");
            }
            ApiError::Forbidden(m) | ApiError::Unauthorized(m) => {
                tracing::warn!(reason = %m, "request rejected");
            }
            _ => {
                tracing::debug!(error = %self, "request failed");
            }
        }
    }

    fn into_body(self) -> ErrorBody {
        match self {
            ApiError::Internal { message, detail } => ErrorBody {
                mensaje: "Error interno del servidor".to_string(),
                error: Some(message),
                detalle: detail.filter(|_| cfg!(debug_assertions)),
                intentos: None,
            },
            ApiError::PostWrite(e) => ErrorBody {
                mensaje: "No se pudo guardar la publicación".to_string(),
                error: Some(e.to_string()),
                detalle: None,
                intentos: Some(e.attempts),
            },
            other => ErrorBody {
                mensaje: other.to_string(),
                error: None,
                detalle: None,
                intentos: None,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.log();
        let status = self.status_code();
        (status, Json(self.into_body())).into_response()
    }
}

impl From<RepoError> for ApiError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound => ApiError::not_found("Recurso no encontrado"),
            RepoError::Conflict(message) => ApiError::Conflict(message),
            other => ApiError::internal(other),
        }
    }
}

impl From<PostWriteError> for ApiError {
    fn from(err: PostWriteError) -> Self {
        match err.missing_foro {
            Some(_) => ApiError::not_found("Foro no encontrado"),
            None => ApiError::PostWrite(err),
        }
    }
}

impl From<PasswordError> for ApiError {
    fn from(err: PasswordError) -> Self {
        ApiError::internal(err)
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Encoding(_) => ApiError::internal(err),
            _ => ApiError::forbidden("Token inválido o expirado"),
        }
    }
}
