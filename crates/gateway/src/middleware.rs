//! Request decorators.
//!
//! Each function enforces one policy and is installed with
//! `axum::middleware::from_fn` (or `from_fn_with_state`). Routes compose
//! them with `tower::ServiceBuilder`, listed outermost first, so the order
//! checks run in is the order they are written in `server.rs`.

use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use {
    axum::{
        body::Body,
        extract::{ConnectInfo, Request, State},
        http::Method,
        middleware::Next,
        response::{IntoResponse, Response},
    },
    axum_extra::extract::cookie::CookieJar,
    tracing::{info, warn},
};

use crate::{
    error::GatewayError,
    xsrf::{XSRF_COOKIE, XsrfAuthority, client_identity},
};

/// Largest body `no_content` will drain before giving up.
const DRAIN_LIMIT: usize = 64 * 1024;

pub fn is_loopback_peer(ip: IpAddr) -> bool {
    ip.to_canonical().is_loopback()
}

/// Refuse every peer that is not on this machine. Must be the outermost
/// decorator.
pub async fn local_only(
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Response {
    if !is_loopback_peer(peer.ip()) {
        warn!(%peer, path = %req.uri().path(), "refusing remote peer");
        return GatewayError::Origin.into_response();
    }
    next.run(req).await
}

pub async fn log_request(
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Response {
    info!(method = %req.method(), path = %req.uri().path(), %peer, "request");
    next.run(req).await
}

/// Drain the body and refuse the request if there was anything in it.
pub async fn no_content(req: Request, next: Next) -> Result<Response, GatewayError> {
    let (parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, DRAIN_LIMIT)
        .await
        .map_err(|e| GatewayError::bad_request(e.to_string()))?;
    if !bytes.is_empty() {
        return Err(GatewayError::bad_request("Unexpected content"));
    }
    Ok(next.run(Request::from_parts(parts, Body::empty())).await)
}

pub async fn get_only(req: Request, next: Next) -> Result<Response, GatewayError> {
    if req.method() != Method::GET && req.method() != Method::HEAD {
        return Err(GatewayError::method_not_allowed("Only GET is allowed"));
    }
    Ok(next.run(req).await)
}

pub async fn post_only(req: Request, next: Next) -> Result<Response, GatewayError> {
    if req.method() != Method::POST {
        return Err(GatewayError::method_not_allowed("Only POST is allowed"));
    }
    Ok(next.run(req).await)
}

/// Require a valid `XSRF-TOKEN` cookie for the requesting peer.
pub async fn enforce_xsrf(
    State(xsrf): State<Arc<XsrfAuthority>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    jar: CookieJar,
    req: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let Some(cookie) = jar.get(XSRF_COOKIE) else {
        warn!(%peer, path = %req.uri().path(), "missing XSRF-TOKEN cookie");
        return Err(GatewayError::Auth("Missing XSRF-TOKEN cookie"));
    };
    if !xsrf.validate(cookie.value(), &client_identity(&peer)) {
        warn!(%peer, path = %req.uri().path(), token = %cookie.value(), "invalid XSRF-TOKEN cookie");
        return Err(GatewayError::Auth("Invalid XSRF-TOKEN cookie"));
    }
    Ok(next.run(req).await)
}
