//! Client identity resolution.
//!
//! Derives the string key used by the registries from request metadata. The
//! result is an equality key, not a validated IP: a forwarding header's
//! first hop wins, otherwise the transport peer address with the port
//! stripped.

use std::net::SocketAddr;

use http::Request;

/// Header listing the client hops when the service sits behind a proxy.
pub const FORWARDED_FOR: &str = "x-forwarded-for";

/// Transport-level peer address, carried as a request extension.
///
/// The server accept loop is expected to insert this per connection (the
/// same shape as axum's `ConnectInfo`). Without it, and without a
/// forwarding header, identity resolution falls back to the empty key —
/// all such requests then share one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddr(pub SocketAddr);

/// Resolve the client identity for a request.
///
/// Policy: if `X-Forwarded-For` is present, take the first comma-separated
/// hop, trimmed of whitespace; when that hop reads as `host:port`, strip
/// the port so header-derived and transport-derived identities agree.
/// Otherwise use the [`PeerAddr`] extension's IP.
pub fn client_identity<B>(req: &Request<B>) -> String {
    if let Some(value) = req.headers().get(FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        if let Some(hop) = value.split(',').next() {
            let hop = hop.trim();
            if !hop.is_empty() {
                return strip_port(hop).to_string();
            }
        }
    }
    req.extensions()
        .get::<PeerAddr>()
        .map(|peer| peer.0.ip().to_string())
        .unwrap_or_default()
}

fn strip_port(hop: &str) -> &str {
    if hop.parse::<SocketAddr>().is_ok() {
        if let Some(idx) = hop.rfind(':') {
            return &hop[..idx];
        }
    }
    hop
}
