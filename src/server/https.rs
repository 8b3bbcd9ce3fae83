//! Plain HTTP to HTTPS redirect
//!
//! TLS is terminated in front of the matchmaker. The terminator marks
//! forwarded requests with `X-Forwarded-Proto: https`; anything else is sent
//! back to the HTTPS origin with the same path and query.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::error;

const FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Middleware: pass secure requests through, redirect the rest.
///
/// State is the public HTTPS port.
pub async fn redirect_to_https(
    State(https_port): State<u16>,
    request: Request,
    next: Next,
) -> Response {
    if is_secure(request.headers()) {
        return next.run(request).await;
    }

    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok());

    match host {
        Some(host) => {
            let location = https_location(host, https_port, request.uri());
            (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
        }
        None => {
            error!(
                "Unable to get host name from header, url path: '{}'",
                request.uri()
            );
            (StatusCode::BAD_REQUEST, "Bad Request").into_response()
        }
    }
}

fn is_secure(headers: &HeaderMap) -> bool {
    headers
        .get(FORWARDED_PROTO)
        .and_then(|v| v.to_str().ok())
        .map(|proto| proto.eq_ignore_ascii_case("https"))
        .unwrap_or(false)
}

/// Build the HTTPS URL for a request that arrived over plain HTTP.
///
/// The port from the `Host` header is dropped; `https_port` is appended
/// unless it is the default 443.
pub fn https_location(host: &str, https_port: u16, uri: &Uri) -> String {
    let host_name = strip_port(host);
    let authority = if https_port == 443 {
        host_name.to_string()
    } else {
        format!("{}:{}", host_name, https_port)
    };
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");

    format!("https://{}{}", authority, path)
}

fn strip_port(host: &str) -> &str {
    // Bracketed IPv6 literal, e.g. "[::1]:90"
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    host.split(':').next().unwrap_or(host)
}
