use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::{IpAddr, SocketAddr};

use crate::{error::AppError, state::AppState};

/// Resolves the client IP for guard decisions.
///
/// `proxy_hops` is the number of our own proxies that append to
/// `X-Forwarded-For`. The client is the entry that many places from the right;
/// anything left of it was supplied by the client and is ignored. With zero
/// hops, or a header too short or unparsable, the socket peer is used.
/// IPv4-mapped IPv6 addresses are folded to plain IPv4 so the denylist and
/// rate-limit keys see one form.
pub fn client_ip(req: &Request<Body>, proxy_hops: usize) -> Option<IpAddr> {
    if proxy_hops > 0 {
        let forwarded = req
            .headers()
            .get_all("x-forwarded-for")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .collect::<Vec<_>>();
        let hop = forwarded
            .len()
            .checked_sub(proxy_hops)
            .and_then(|i| forwarded.get(i))
            .and_then(|hop| hop.parse::<IpAddr>().ok());
        if let Some(ip) = hop {
            return Some(ip.to_canonical());
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_canonical())
}

/// Same as [`client_ip`], rendered as a rate-limit key.
pub fn client_key(req: &Request<Body>, proxy_hops: usize) -> String {
    client_ip(req, proxy_hops)
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// A middleware that rejects denylisted client IPs before any other work.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `req` - The incoming request.
/// * `next` - The next middleware in the chain.
///
/// # Returns
///
/// A `Response`; 403 for a blocked IP.
pub async fn block_ips(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    if state.config.blocked_ips.is_empty() {
        return next.run(req).await;
    }

    if let Some(ip) = client_ip(&req, state.config.forwarded_hops()) {
        if state.config.blocked_ips.contains(&ip) {
            tracing::info!("🚫 Blocked request from {} to {}", ip, req.uri().path());
            return AppError::Blocked.into_response();
        }
    }

    next.run(req).await
}
