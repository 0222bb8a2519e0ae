//! Locating the access token on an incoming request.

use axum::http::{HeaderMap, Uri, header};

/// Query parameter accepted for clients that cannot set headers (browser WebSockets).
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Extract the token from the `token` query parameter.
pub fn query_token(uri: &Uri) -> Option<&str> {
    let query = uri.query()?;
    for pair in query.split('&') {
        if let Some((key, value)) = pair.split_once('=') {
            if key == TOKEN_QUERY_PARAM && !value.is_empty() {
                return Some(value);
            }
        }
    }
    None
}

/// Header first, then query string.
pub fn request_token<'a>(headers: &'a HeaderMap, uri: &'a Uri) -> Option<&'a str> {
    bearer_token(headers).or_else(|| query_token(uri))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc123"),
        );
        assert_eq!(bearer_token(&headers), Some("abc123"));
    }

    #[test]
    fn test_bearer_scheme_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("bearer   abc123 "),
        );
        assert_eq!(bearer_token(&headers), Some("abc123"));
    }

    #[test]
    fn test_other_scheme_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Basic dXNlcjpwdw=="),
        );
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_no_header() {
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_query_token() {
        let uri: Uri = "/ws/notifications?foo=bar&token=xyz".parse().unwrap();
        assert_eq!(query_token(&uri), Some("xyz"));

        let uri: Uri = "/ws/notifications?token=".parse().unwrap();
        assert_eq!(query_token(&uri), None);

        let uri: Uri = "/ws/notifications".parse().unwrap();
        assert_eq!(query_token(&uri), None);
    }

    #[test]
    fn test_header_preferred_over_query() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer from-header"),
        );
        let uri: Uri = "/x?token=from-query".parse().unwrap();
        assert_eq!(request_token(&headers, &uri), Some("from-header"));
        assert_eq!(request_token(&HeaderMap::new(), &uri), Some("from-query"));
    }
}
