//! Hub error type and its HTTP mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use dossier_crd::QuantityError;
use serde_json::json;
use thiserror::Error;

pub type Result<T, E = DossierError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum DossierError {
    /// A named tenant, spawner definition, profile or user does not exist
    #[error("{kind} {name} is not defined.")]
    NotFound { kind: &'static str, name: String },

    /// The user may not use the requested resource
    #[error("{0}")]
    Forbidden(String),

    /// The configured default tenant is missing from the cluster
    #[error("Tenant {0} is not defined.")]
    UndefinedDefaultTenant(String),

    /// Deployment problem: feature disabled, unknown class reference, bad parameters
    #[error("{0}")]
    Configuration(String),

    /// The session is in a state that does not allow the request
    #[error("{0}")]
    Conflict(String),

    #[error("cluster API request failed: {0}")]
    Transport(#[from] kube::Error),

    #[error("invalid value for {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    #[error(transparent)]
    Quantity(#[from] QuantityError),

    #[error("backend {backend} failed: {message}")]
    Backend { backend: String, message: String },

    #[error("failed to render page: {0}")]
    Render(String),
}

impl DossierError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn backend(backend: impl Into<String>, err: &anyhow::Error) -> Self {
        Self::Backend {
            backend: backend.into(),
            message: format!("{err:#}"),
        }
    }

    pub const fn status(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } | Self::UndefinedDefaultTenant(_) => StatusCode::NOT_FOUND,
            Self::Forbidden(_) | Self::Configuration(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Transport(_) => StatusCode::BAD_GATEWAY,
            Self::InvalidInput { .. } | Self::Quantity(_) => StatusCode::BAD_REQUEST,
            Self::Backend { .. } | Self::Render(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for DossierError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, status = %status, "Request rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
