use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

use crate::{error::AppError, state::AppState};

/// Header carrying the shared secret.
pub const ACCESS_KEY_HEADER: &str = "access-key";

/// Compares a presented key with the configured one in constant time.
pub fn key_matches(presented: &[u8], expected: &[u8]) -> bool {
    presented.ct_eq(expected).into()
}

/// A middleware that requires the shared secret when one is configured.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `req` - The incoming request.
/// * `next` - The next middleware in the chain.
///
/// # Returns
///
/// A `Response`; 403 when the header is absent or wrong.
pub async fn require_access_key(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.config.access_key.as_ref() else {
        return next.run(req).await;
    };

    let presented = req
        .headers()
        .get(ACCESS_KEY_HEADER)
        .map(|v| v.as_bytes())
        .unwrap_or_default();

    if !key_matches(presented, expected.as_bytes()) {
        return AppError::Forbidden.into_response();
    }

    tracing::debug!("✅ Access key accepted for {}", req.uri().path());
    next.run(req).await
}
