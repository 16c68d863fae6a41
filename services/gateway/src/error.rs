//! Gateway request errors and their HTTP mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dialect::BackendFamily;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("request body has no model field")]
    MissingModel,

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("no endpoint configured for the {0} backend")]
    EndpointNotConfigured(BackendFamily),

    #[error("model {model} is not served on this route (expected a {expected} model)")]
    WrongRoute {
        model: String,
        expected: BackendFamily,
    },

    #[error("no authorization provided")]
    NoAuthorization,

    #[error("no active credentials available")]
    CredentialsExhausted,

    #[error("credential refresh failed: {0}")]
    AuthUnavailable(String),

    #[error("upstream request failed: {0}")]
    Upstream(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingModel | Self::WrongRoute { .. } => StatusCode::BAD_REQUEST,
            Self::ModelNotFound(_) => StatusCode::NOT_FOUND,
            Self::NoAuthorization => StatusCode::UNAUTHORIZED,
            Self::CredentialsExhausted => StatusCode::SERVICE_UNAVAILABLE,
            Self::EndpointNotConfigured(_) | Self::AuthUnavailable(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            Self::MissingModel => "missing_model",
            Self::ModelNotFound(_) => "model_not_found",
            Self::EndpointNotConfigured(_) => "endpoint_not_configured",
            Self::WrongRoute { .. } => "wrong_route",
            Self::NoAuthorization => "no_authorization",
            Self::CredentialsExhausted => "credentials_exhausted",
            Self::AuthUnavailable(_) => "auth_unavailable",
            Self::Upstream(_) => "upstream_error",
        }
    }
}

impl From<keypool::Error> for GatewayError {
    fn from(error: keypool::Error) -> Self {
        match error {
            keypool::Error::NoActiveCredentials => Self::CredentialsExhausted,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let request_id = format!("req_{}", uuid::Uuid::new_v4().simple());
        let body = json!({
            "error": {
                "type": self.error_type(),
                "message": self.to_string(),
                "request_id": request_id,
            }
        });
        (self.status(), Json(body)).into_response()
    }
}
