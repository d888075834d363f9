use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use thiserror::Error;

/// The error taxonomy shared across every UDL component.
///
/// Kinds map to spec.md §7. Propagation policy: `Validation` is a programmer
/// bug and is never swallowed at internal call sites; `TransientIO` is always
/// recoverable and the core continues; everything else has a fixed HTTP
/// status at the boundary (see `IntoResponse` below).
#[derive(Error, Debug)]
pub enum UdlError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("node not found")]
    NotFound,

    #[error("already registered: {0}")]
    AlreadyRegistered(String),

    #[error("webhook signature rejected")]
    SignatureInvalid,

    #[error("payload too large")]
    PayloadTooLarge,

    #[error("transient I/O error: {0}")]
    TransientIo(String),

    #[error("remote peer unreachable: {0}")]
    RemoteUnreachable(String),

    #[error("plugin source failed: {0}")]
    PluginSourceFailure(String),

    #[error("protected field in patch: {0}")]
    ProtectedField(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl IntoResponse for UdlError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            UdlError::Validation(_) | UdlError::ProtectedField(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            UdlError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            UdlError::AlreadyRegistered(_) => (StatusCode::CONFLICT, self.to_string()),
            UdlError::SignatureInvalid => (StatusCode::UNAUTHORIZED, self.to_string()),
            UdlError::PayloadTooLarge => (StatusCode::PAYLOAD_TOO_LARGE, self.to_string()),
            UdlError::TransientIo(_) | UdlError::RemoteUnreachable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            UdlError::PluginSourceFailure(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            UdlError::Anyhow(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
