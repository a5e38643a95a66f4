//! Bearer-token auth middleware for the web gateway.
//!
//! The dashboard is single-tenant: one static token, checked in constant
//! time. Route-level roles are out of scope.

use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::Next;
use axum::response::Response;
use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;

#[derive(Clone)]
pub struct AuthState {
    pub token: SecretString,
}

pub async fn auth_middleware(
    State(auth): State<AuthState>,
    request: Request,
    next: Next,
) -> Result<Response, (StatusCode, String)> {
    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    let authorized = match provided {
        Some(token) => {
            let expected = auth.token.expose_secret().as_bytes();
            bool::from(expected.ct_eq(token.as_bytes()))
        }
        None => false,
    };
    if !authorized {
        return Err((StatusCode::UNAUTHORIZED, "invalid or missing token".to_string()));
    }
    Ok(next.run(request).await)
}
