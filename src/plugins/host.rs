use std::ops::Deref;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::errors::ScrapeError;
use crate::fetcher::{FetchRequest, FetchResponse, Fetcher};
use crate::media::MediaRequest;
use crate::proxy::ProxyConfig;

pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// Capabilities shared by every provider call: the two fetchers, the
/// proxy endpoints and a progress callback.
#[derive(Clone)]
pub struct Host {
    fetcher: Arc<dyn Fetcher>,
    proxied_fetcher: Arc<dyn Fetcher>,
    proxy: ProxyConfig,
    progress: ProgressFn,
}

impl Host {
    pub fn new(fetcher: Arc<dyn Fetcher>, proxied_fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher, proxied_fetcher, proxy: ProxyConfig::default(), progress: Arc::new(|_| {}) }
    }

    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = proxy;
        self
    }

    /// Proxy endpoints configured for this dispatcher, for building
    /// m3u8 proxy links.
    pub fn proxy(&self) -> &ProxyConfig {
        &self.proxy
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = progress;
        self
    }

    pub async fn fetch(&self, req: FetchRequest) -> Result<FetchResponse, ScrapeError> {
        self.fetcher.fetch(req).await
    }

    /// Fetch through the CORS-bypass proxy.
    pub async fn proxied_fetch(&self, req: FetchRequest) -> Result<FetchResponse, ScrapeError> {
        self.proxied_fetcher.fetch(req).await
    }

    pub async fn fetch_text(&self, req: FetchRequest) -> Result<String, ScrapeError> {
        Ok(self.fetch(req).await?.error_for_status()?.body)
    }

    pub async fn fetch_json<T: DeserializeOwned>(&self, req: FetchRequest) -> Result<T, ScrapeError> {
        self.fetch(req).await?.error_for_status()?.json()
    }

    pub async fn proxied_fetch_json<T: DeserializeOwned>(&self, req: FetchRequest) -> Result<T, ScrapeError> {
        self.proxied_fetch(req).await?.error_for_status()?.json()
    }

    /// Report progress in percent; values above 100 are clamped.
    pub fn progress(&self, percent: u8) {
        (self.progress)(percent.min(100));
    }
}

/// Handed to a source's scrape call.
#[derive(Clone)]
pub struct ScrapeContext {
    pub media: MediaRequest,
    host: Host,
}

impl ScrapeContext {
    pub fn new(media: MediaRequest, host: Host) -> Self {
        Self { media, host }
    }
}

impl Deref for ScrapeContext {
    type Target = Host;

    fn deref(&self) -> &Host {
        &self.host
    }
}

/// Handed to an embed's scrape call. `url` is the opaque value from the
/// embed reference.
#[derive(Clone)]
pub struct EmbedContext {
    pub url: String,
    host: Host,
}

impl EmbedContext {
    pub fn new(url: impl Into<String>, host: Host) -> Self {
        Self { url: url.into(), host }
    }
}

impl Deref for EmbedContext {
    type Target = Host;

    fn deref(&self) -> &Host {
        &self.host
    }
}
