//! Shared-secret authentication for the provisioning API.
//!
//! Browsers cannot set headers on a WebSocket handshake, so the login
//! endpoint also accepts the secret as a subprotocol token.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;

use crate::provisioning::types::ApiError;

/// Subprotocol the server negotiates for the login channel.
pub const LOGIN_SUBPROTOCOL: &str = "net.maunium.whatsapp.login";
/// Prefix of the subprotocol token carrying the shared secret.
pub const AUTH_SUBPROTOCOL_PREFIX: &str = "net.maunium.whatsapp.auth-";

#[derive(Clone)]
pub struct AuthState {
    secret: Arc<SecretString>,
}

impl AuthState {
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret: Arc::new(secret),
        }
    }

    /// Constant-time comparison against the configured secret.
    pub fn verify(&self, candidate: &str) -> bool {
        let expected = self.secret.expose_secret().as_bytes();
        !expected.is_empty() && bool::from(expected.ct_eq(candidate.as_bytes()))
    }
}

/// Token presented by the caller, bearer header first.
pub fn presented_token(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    if bearer.is_some() {
        return bearer;
    }

    headers
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())?
        .split(',')
        .map(str::trim)
        .find_map(|part| part.strip_prefix(AUTH_SUBPROTOCOL_PREFIX))
}

pub async fn auth_middleware(
    State(auth): State<AuthState>,
    request: Request,
    next: Next,
) -> Response {
    let authorized = presented_token(request.headers()).is_some_and(|token| auth.verify(token));
    if !authorized {
        tracing::debug!(path = %request.uri().path(), "Rejected unauthenticated request");
        return ApiError::Unauthorized.into_response();
    }
    next.run(request).await
}
