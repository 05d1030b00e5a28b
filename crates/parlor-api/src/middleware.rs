use axum::{
    extract::Request,
    http::{StatusCode, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};

use parlor_types::api::Claims;
use parlor_types::models::AuthContext;

/// Extract and validate the bearer token, then attach an explicit
/// [`AuthContext`] as a request extension. Everything below the handlers
/// receives the caller's identity and role as a parameter; nothing does an
/// ambient lookup.
pub async fn require_auth(mut req: Request, next: Next) -> Result<Response, StatusCode> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let secret =
        std::env::var("PARLOR_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| StatusCode::UNAUTHORIZED)?;

    let claims = token_data.claims;
    req.extensions_mut().insert(AuthContext {
        user_id: claims.sub,
        display_name: claims.display_name,
        role: claims.role,
    });
    Ok(next.run(req).await)
}
