//! Externally visible URLs, derived from the incoming request.
//!
//! The server may sit behind a proxy and may be nested under a path
//! prefix, so the base URL is assembled from forwarding headers and the
//! difference between the original and routed request paths.

use axum::http::{HeaderMap, Uri};

/// Path of the WebSocket endpoint, relative to the mount point.
pub const WS_PATH: &str = "/ws";
/// Path of the static asset mount, relative to the mount point.
pub const STATIC_PATH: &str = "/static";

const DEFAULT_HOST: &str = "localhost";

/// Compute `scheme://host[/prefix]` with no trailing slash.
pub fn base_url(headers: &HeaderMap, original_uri: &Uri, routed_uri: &Uri) -> String {
    let scheme = header_str(headers, "x-forwarded-proto")
        .map(|v| v.split(',').next().unwrap_or(v).trim().to_owned())
        .or_else(|| original_uri.scheme_str().map(str::to_owned))
        .unwrap_or_else(|| "http".to_owned());

    let host = header_str(headers, "x-forwarded-host")
        .or_else(|| header_str(headers, "host"))
        .map(str::to_owned)
        .or_else(|| original_uri.authority().map(|a| a.as_str().to_owned()))
        .unwrap_or_else(|| DEFAULT_HOST.to_owned());

    let prefix = header_str(headers, "x-forwarded-prefix")
        .map(str::to_owned)
        .unwrap_or_else(|| mount_prefix(original_uri.path(), routed_uri.path()));

    format!("{scheme}://{host}{}", prefix.trim_end_matches('/'))
}

/// The prefix a nested router was mounted under: the part of the original
/// path that routing stripped off.
pub fn mount_prefix(original_path: &str, routed_path: &str) -> String {
    let routed = routed_path.trim_end_matches('/');
    original_path
        .trim_end_matches('/')
        .strip_suffix(routed)
        .unwrap_or("")
        .to_owned()
}

/// WebSocket URL for a base URL: `https` becomes `wss`, anything else `ws`.
pub fn ws_url(base_url: &str) -> String {
    let url = format!("{base_url}{WS_PATH}");
    let rest = url.split_once("://").map_or(url.as_str(), |(_, rest)| rest);
    if base_url.starts_with("https") {
        format!("wss://{rest}")
    } else {
        format!("ws://{rest}")
    }
}

/// Base URL for static assets, with a trailing slash.
pub fn static_url(base_url: &str) -> String {
    format!("{base_url}{STATIC_PATH}/")
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
