use axum::{extract::Request, http::StatusCode, middleware::Next, response::Response};
use tracing::error;

use crate::config;
use crate::services::auth_service::{authenticate, get_auth_token};

/// The verified identity of the caller, set by [`auth_middleware`] for every
/// request behind it.
#[derive(Clone)]
pub struct CurrentUser {
    pub uid: String,
}

pub async fn auth_middleware(mut req: Request, next: Next) -> Result<Response, StatusCode> {
    // 1. Get the auth token from the request
    let token = match get_auth_token(&req) {
        Ok(token) => token,
        Err(_) => return Err(StatusCode::UNAUTHORIZED),
    };

    // 2. Validate it and resolve the user
    let config = config::get_config();
    let secret = match &config.jwt_secret {
        Some(secret) => secret,
        None => {
            error!("JWT secret not configured");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };
    let uid = match authenticate(&token, secret) {
        Ok(uid) => uid,
        Err(e) => {
            error!("Authentication failed: {}", e);
            return Err(StatusCode::UNAUTHORIZED);
        }
    };

    // 3. Hand the identity to downstream handlers
    req.extensions_mut().insert(CurrentUser { uid });
    Ok(next.run(req).await)
}
