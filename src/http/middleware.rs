//! Caller identity middleware
//!
//! Credentials are checked by the gateway in front of this service, which
//! forwards the authenticated user as the `X-User-Id` header.

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use crate::game::BOT_ID;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Identity error types
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Missing X-User-Id header")]
    MissingHeader,

    #[error("Invalid X-User-Id header")]
    InvalidFormat,
}

impl IntoResponse for IdentityError {
    fn into_response(self) -> Response {
        let status = match &self {
            IdentityError::MissingHeader => StatusCode::UNAUTHORIZED,
            IdentityError::InvalidFormat => StatusCode::BAD_REQUEST,
        };

        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

/// Authenticated user extractor result
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
}

/// Parse the forwarded identity. The bot identity is never a caller.
pub fn parse_user_id(value: &str) -> Result<Uuid, IdentityError> {
    match value.trim().parse::<Uuid>() {
        Ok(id) if id != BOT_ID => Ok(id),
        _ => Err(IdentityError::InvalidFormat),
    }
}

/// Middleware to require a forwarded identity
pub async fn require_identity(mut request: Request, next: Next) -> Result<Response, IdentityError> {
    let header = request
        .headers()
        .get(USER_ID_HEADER)
        .ok_or(IdentityError::MissingHeader)?
        .to_str()
        .map_err(|_| IdentityError::InvalidFormat)?;

    let user_id = parse_user_id(header)?;

    // Insert into request extensions for handlers to access
    request.extensions_mut().insert(AuthenticatedUser { user_id });

    Ok(next.run(request).await)
}
