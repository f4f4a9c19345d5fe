//! Client IP extraction utilities.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request};

/// Determine the client address of a request.
///
/// When `trust_forwarded_for` is set, the left-most `X-Forwarded-For` entry is
/// used and a missing or unparsable header is an error (no fallback to the
/// socket address). Otherwise the socket address from `ConnectInfo` is used.
pub fn client_ip(request: &Request, trust_forwarded_for: bool) -> Result<String, &'static str> {
    if trust_forwarded_for {
        let header = request
            .headers()
            .get("x-forwarded-for")
            .ok_or("X-Forwarded-For header not present")?
            .to_str()
            .map_err(|_| "X-Forwarded-For contains invalid characters")?;
        let first = header.split(',').next().unwrap_or_default().trim();
        return first
            .parse::<std::net::IpAddr>()
            .map(|ip| ip.to_string())
            .map_err(|_| "X-Forwarded-For is not an IP address");
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .ok_or("No client IP available")
}
