//! Backend canvas API.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;
use url::Url;

use canvas_link_core::canvas::{CanvasSnapshot, Composition, PlacedElement};
use canvas_link_core::config::Config;
use canvas_link_core::error::{CanvasLinkError, Result};

/// Remote canvas operations. Every write is idempotent per entity id.
#[async_trait]
pub trait CanvasRemote: Send + Sync {
    /// Fetch the server's full canvas.
    async fn fetch_snapshot(&self) -> Result<CanvasSnapshot>;

    async fn upsert_glyph(&self, glyph: &PlacedElement) -> Result<()>;

    async fn upsert_composition(&self, composition: &Composition) -> Result<()>;

    async fn mark_minimized(&self, id: &str) -> Result<()>;
}

#[derive(Serialize)]
struct MinimizedWindow<'a> {
    id: &'a str,
}

/// [`CanvasRemote`] over the backend's HTTP API.
pub struct HttpCanvasRemote {
    client: reqwest::Client,
    origin: Url,
}

impl HttpCanvasRemote {
    pub const STATE_PATH: &'static str = "/api/canvas/state";
    pub const GLYPHS_PATH: &'static str = "/api/canvas/glyphs";
    pub const COMPOSITIONS_PATH: &'static str = "/api/canvas/compositions";
    pub const MINIMIZED_PATH: &'static str = "/api/canvas/minimized-windows";

    /// Client for the backend at `origin` (an `http`/`https` URL).
    pub fn new(origin: &str) -> Result<Self> {
        let origin = Url::parse(origin)
            .map_err(|e| CanvasLinkError::Config(format!("invalid origin '{origin}': {e}")))?;
        if !matches!(origin.scheme(), "http" | "https") {
            return Err(CanvasLinkError::Config(format!(
                "unsupported scheme '{}' for canvas API",
                origin.scheme()
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CanvasLinkError::Remote(e.to_string()))?;
        Ok(Self { client, origin })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.http_origin())
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.origin
            .join(path)
            .map_err(|e| CanvasLinkError::Config(format!("bad endpoint {path}: {e}")))
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<()> {
        let url = self.endpoint(path)?;
        let resp = self
            .client
            .post(url.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| CanvasLinkError::Remote(format!("POST {url}: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(CanvasLinkError::Remote(format!("HTTP {status} for POST {url}")));
        }
        debug!(url = %url, "Canvas write acknowledged");
        Ok(())
    }
}

#[async_trait]
impl CanvasRemote for HttpCanvasRemote {
    async fn fetch_snapshot(&self) -> Result<CanvasSnapshot> {
        let url = self.endpoint(Self::STATE_PATH)?;
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| CanvasLinkError::Remote(format!("GET {url}: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(CanvasLinkError::Remote(format!("HTTP {status} for GET {url}")));
        }
        resp.json::<CanvasSnapshot>()
            .await
            .map_err(|e| CanvasLinkError::Remote(format!("undecodable canvas state: {e}")))
    }

    async fn upsert_glyph(&self, glyph: &PlacedElement) -> Result<()> {
        self.post(Self::GLYPHS_PATH, glyph).await
    }

    async fn upsert_composition(&self, composition: &Composition) -> Result<()> {
        self.post(Self::COMPOSITIONS_PATH, composition).await
    }

    async fn mark_minimized(&self, id: &str) -> Result<()> {
        self.post(Self::MINIMIZED_PATH, &MinimizedWindow { id }).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use super::*;

    /// In-process remote that records every call.
    pub(crate) struct MockRemote {
        snapshot: Option<CanvasSnapshot>,
        delay: Duration,
        fail_after: Option<usize>,
        calls: Mutex<Vec<String>>,
    }

    impl MockRemote {
        /// Remote whose snapshot fetch fails; writes succeed.
        pub(crate) fn new() -> Self {
            Self {
                snapshot: None,
                delay: Duration::ZERO,
                fail_after: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn with_snapshot(mut self, snapshot: CanvasSnapshot) -> Self {
            self.snapshot = Some(snapshot);
            self
        }

        /// Delay every snapshot fetch.
        pub(crate) fn slow(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        /// Writes after the first `n` fail.
        pub(crate) fn failing_after(mut self, n: usize) -> Self {
            self.fail_after = Some(n);
            self
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record_write(&self, call: String) -> Result<()> {
            let mut calls = self.calls.lock().unwrap();
            let writes = calls.iter().filter(|c| *c != "fetch").count();
            calls.push(call);
            match self.fail_after {
                Some(n) if writes >= n => Err(CanvasLinkError::Remote("HTTP 503".into())),
                _ => Ok(()),
            }
        }
    }

    #[async_trait]
    impl CanvasRemote for MockRemote {
        async fn fetch_snapshot(&self) -> Result<CanvasSnapshot> {
            self.calls.lock().unwrap().push("fetch".into());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.snapshot
                .clone()
                .ok_or_else(|| CanvasLinkError::Remote("connection refused".into()))
        }

        async fn upsert_glyph(&self, glyph: &PlacedElement) -> Result<()> {
            self.record_write(format!("upsert_glyph:{}", glyph.id))
        }

        async fn upsert_composition(&self, composition: &Composition) -> Result<()> {
            self.record_write(format!("upsert_composition:{}", composition.id))
        }

        async fn mark_minimized(&self, id: &str) -> Result<()> {
            self.record_write(format!("mark_minimized:{id}"))
        }
    }

    #[test]
    fn test_rejects_non_http_origin() {
        assert!(matches!(
            HttpCanvasRemote::new("ws://host"),
            Err(CanvasLinkError::Config(_))
        ));
        assert!(HttpCanvasRemote::new("not a url").is_err());
    }

    #[test]
    fn test_endpoints_replace_origin_path() {
        let remote = HttpCanvasRemote::new("https://qntx.example/app/").unwrap();
        let url = remote.endpoint(HttpCanvasRemote::MINIMIZED_PATH).unwrap();
        assert_eq!(url.as_str(), "https://qntx.example/api/canvas/minimized-windows");
    }
}
