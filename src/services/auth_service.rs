use axum::http;
use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};

/// Get the auth token from a request.
///
/// The `token` query parameter is checked first because the browser
/// WebSocket API cannot set custom headers; the Authorization header is the
/// fallback for REST calls and CLI testing.
pub fn get_auth_token<B>(req: &http::Request<B>) -> Result<String, String> {
    if let Some(query) = req.uri().query() {
        for pair in query.split('&') {
            if let Some(value) = pair.strip_prefix("token=") {
                if !value.is_empty() {
                    return Ok(value.to_string());
                }
            }
        }
    }

    if let Some(auth_header) = req.headers().get(http::header::AUTHORIZATION) {
        let auth_str = auth_header
            .to_str()
            .map_err(|_| "Invalid Authorization header".to_string())?;
        return Ok(auth_str
            .strip_prefix("Bearer ")
            .unwrap_or(auth_str)
            .to_string());
    }

    Err("Missing token query parameter or Authorization header".to_string())
}

/// Validate a JWT token and return the token data
pub fn validate_jwt(
    token: &str,
    secret: &str,
) -> Result<TokenData<serde_json::Value>, jsonwebtoken::errors::Error> {
    let validation = Validation::new(Algorithm::HS256);
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    decode::<serde_json::Value>(token, &decoding_key, &validation)
}

/// Map a credential to a verified user id: the `sub` claim of a valid token.
pub fn authenticate(token: &str, secret: &str) -> Result<String, String> {
    match validate_jwt(token, secret) {
        Ok(token_data) => match token_data.claims.get("sub").and_then(|v| v.as_str()) {
            Some(uid) => Ok(uid.to_string()),
            None => Err("JWT token does not contain 'sub' claim".to_string()),
        },
        Err(e) => Err(format!("JWT validation failed: {}", e)),
    }
}
