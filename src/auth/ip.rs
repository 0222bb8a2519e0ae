//! Client IP extraction for per-address throttling.

use std::net::SocketAddr;

use axum::{extract::ConnectInfo, http::Extensions};

/// Key used when the connection address is unavailable (e.g. in-process requests).
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Peer IP from `ConnectInfo`, or [`UNKNOWN_CLIENT`].
pub fn client_ip(extensions: &Extensions) -> String {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_info_ip() {
        let mut extensions = Extensions::new();
        extensions.insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 7], 5555))));
        assert_eq!(client_ip(&extensions), "10.0.0.7");
    }

    #[test]
    fn test_missing_connect_info() {
        assert_eq!(client_ip(&Extensions::new()), UNKNOWN_CLIENT);
    }
}
