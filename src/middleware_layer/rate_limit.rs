use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{
    error::AppError,
    limiter::{RateDecision, RouteClass},
    middleware_layer::ip_block::client_key,
    state::AppState,
};

/// Writes the `RateLimit-*` headers for `decision`.
fn apply_headers(headers: &mut HeaderMap, decision: &RateDecision, window_secs: u64) {
    let reset = decision.reset_after.as_secs_f64().ceil() as u64;
    headers.insert("ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert("ratelimit-reset", HeaderValue::from(reset));
    if let Ok(policy) = HeaderValue::from_str(&format!("{};w={}", decision.limit, window_secs)) {
        headers.insert("ratelimit-policy", policy);
    }
}

/// Charges one request against `class` for the calling client.
async fn enforce(state: &AppState, class: RouteClass, req: Request<Body>, next: Next) -> Response {
    let client = client_key(&req, state.config.forwarded_hops());
    let config = *state.limiter.config();
    let window_secs = config.window.as_secs();

    let decision = match state.limiter.check(&client, class).await {
        Ok(decision) => decision,
        Err(e) => {
            tracing::error!(
                "Rate limiter unavailable for {} route, letting request through: {}",
                class.as_str(),
                e
            );
            RateDecision::unmetered(config.budget(class), config.window)
        }
    };

    if !decision.allowed {
        tracing::info!(
            "⏳ {} budget exhausted for {} ({} per {}s)",
            class.as_str(),
            client,
            decision.limit,
            window_secs
        );
        let mut response = AppError::RateLimited {
            retry_after_secs: config.retry_after_secs(class),
        }
        .into_response();
        apply_headers(response.headers_mut(), &decision, window_secs);
        return response;
    }

    let mut response = next.run(req).await;
    apply_headers(response.headers_mut(), &decision, window_secs);
    response
}

/// A middleware that rate limits deposits.
pub async fn rate_limit_send(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    enforce(&state, RouteClass::Send, req, next).await
}

/// A middleware that rate limits redemptions, bounding code guesses.
pub async fn rate_limit_receive(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    enforce(&state, RouteClass::Receive, req, next).await
}

/// A middleware that applies the general budget.
pub async fn rate_limit_general(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    enforce(&state, RouteClass::General, req, next).await
}
