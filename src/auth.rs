//! Bearer-token authentication for the HTTP and WebSocket surfaces.
//!
//! Registration, login and password hashing belong to the identity
//! subsystem. This layer only verifies a presented token and resolves
//! it to the owning user id.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};

/// Resolves bearer tokens to user ids. Built from configuration and
/// passed to the router at construction.
pub struct TokenRegistry {
    tokens: HashMap<String, String>,
}

impl TokenRegistry {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }

    pub fn resolve(&self, token: &str) -> Option<&str> {
        self.tokens.get(token).map(String::as_str)
    }
}

/// The authenticated user id, inserted into request extensions by
/// [`require_auth`].
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

/// Middleware requiring a valid `Authorization: Bearer <token>` header.
pub async fn require_auth(
    State(tokens): State<Arc<TokenRegistry>>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = request
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok());

    match auth_header {
        Some(auth) if auth.starts_with("Bearer ") => {
            let token = &auth[7..];
            match tokens.resolve(token) {
                Some(user_id) => {
                    request.extensions_mut().insert(AuthUser(user_id.to_string()));
                    Ok(next.run(request).await)
                }
                None => {
                    tracing::warn!("Invalid bearer token attempted");
                    Err(StatusCode::UNAUTHORIZED)
                }
            }
        }
        Some(_) => {
            tracing::warn!("Invalid Authorization header format (expected Bearer token)");
            Err(StatusCode::UNAUTHORIZED)
        }
        None => Err(StatusCode::UNAUTHORIZED),
    }
}
