//! Socket URL derivation from the configured backend origin.

use tracing::error;
use url::Url;

use canvas_link_core::error::{CanvasLinkError, Result};

/// Path of the realtime endpoint on the backend.
pub const WS_PATH: &str = "/ws";

/// Map an `http`/`https` origin to its `ws`/`wss` socket URL.
pub fn ws_url_for_origin(origin: &str) -> std::result::Result<Url, String> {
    let mut url = Url::parse(origin).map_err(|e| format!("invalid origin '{origin}': {e}"))?;
    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => return Err(format!("unsupported scheme '{other}' in origin '{origin}'")),
    };
    if url.host_str().is_none() {
        return Err(format!("origin '{origin}' has no host"));
    }
    url.set_scheme(scheme)
        .map_err(|_| format!("cannot switch '{origin}' to {scheme}"))?;
    url.set_path(WS_PATH);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// Resolve the socket URL, preferring the configured backend.
///
/// A backend origin that is not `http`/`https` is rejected with a single
/// error log and the page origin is used instead.
pub fn resolve_ws_url(backend: Option<&str>, page_origin: &str) -> Result<Url> {
    if let Some(backend) = backend {
        match ws_url_for_origin(backend) {
            Ok(url) => return Ok(url),
            Err(reason) => {
                error!(%reason, fallback = %page_origin, "Rejected backend origin, using page origin");
            }
        }
    }
    ws_url_for_origin(page_origin).map_err(CanvasLinkError::Config)
}
