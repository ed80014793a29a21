use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use http::{HeaderName, HeaderValue, Method, header};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::{handlers, middleware_layer, state::AppState};

/// Headroom over the content cap for the JSON envelope and escaping.
const BODY_LIMIT_FACTOR: usize = 2;

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("⚠️ Ignoring unusable CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static(middleware_layer::access_key::ACCESS_KEY_HEADER),
        ])
        .expose_headers([
            header::RETRY_AFTER,
            HeaderName::from_static("ratelimit-limit"),
            HeaderName::from_static("ratelimit-remaining"),
            HeaderName::from_static("ratelimit-reset"),
            HeaderName::from_static("ratelimit-policy"),
        ])
        .max_age(Duration::from_secs(86400))
}

/// Builds the full router with every guard in place.
///
/// Serve it with `into_make_service_with_connect_info::<SocketAddr>()` so the
/// guards can see the peer address.
pub fn build_router(state: AppState) -> Router {
    let send_routes = Router::new()
        .route("/api/v1/user/send", post(handlers::exchange::send))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::rate_limit::rate_limit_send,
        ))
        .with_state(state.clone());

    let receive_routes = Router::new()
        .route("/api/v1/user/receive", get(handlers::exchange::receive))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::rate_limit::rate_limit_receive,
        ))
        .with_state(state.clone());

    let general_routes = Router::new()
        .route("/api/v1/user/health", get(handlers::health::health))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::rate_limit::rate_limit_general,
        ))
        .with_state(state.clone());

    let image_routes = Router::new()
        .route(
            "/api/v1/images/upload-url",
            get(handlers::images::upload_url),
        )
        .route(
            "/api/v1/images/download-url",
            get(handlers::images::download_url),
        )
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::access_key::require_access_key,
        ))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::rate_limit::rate_limit_general,
        ))
        .with_state(state.clone());

    let body_limit = state
        .config
        .max_content_bytes
        .saturating_mul(BODY_LIMIT_FACTOR);

    Router::new()
        .merge(send_routes)
        .merge(receive_routes)
        .merge(general_routes)
        .merge(image_routes)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors_layer(&state.config.allowed_origins))
        .layer(from_fn_with_state(
            state.clone(),
            middleware_layer::ip_block::block_ips,
        ))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(
                    DefaultMakeSpan::new()
                        .level(Level::INFO)
                        .include_headers(false),
                )
                .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
        )
}
