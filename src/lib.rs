pub mod aggregator;
pub mod captions;
pub mod errors;
pub mod fetcher;
pub mod media;
pub mod plugins;
pub mod proxy;
pub mod settings;
pub mod streams;

// --- Library API for embedding ---

/// Convenience re-exports for embedders.
pub mod prelude {
    pub use crate::aggregator::{DispatchOptions, EventSink, RunOutput, ScrapeEvent, ScrapeStatus};
    pub use crate::errors::{ConfigError, NoStreamFound, ProviderFailure, ScrapeError};
    pub use crate::fetcher::{FetchRequest, FetchResponse, Fetcher};
    pub use crate::media::{MediaKind, MediaRequest};
    pub use crate::plugins::{
        make_embed, make_sourcerer, EmbedConfig, EmbedContext, EmbedOutput, EmbedRef, EmbedScraper, ProviderInfo,
        Registry, ScrapeContext, SourceScraper, SourcererConfig, SourcererOutput,
    };
    pub use crate::proxy::ProxyConfig;
    pub use crate::settings::Settings;
    pub use crate::streams::{Caption, CaptionType, Flag, Flags, Quality, Stream, StreamFile};
    pub use crate::Sourcery;
}

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::aggregator::{Aggregator, EventSink, RunOutput};
use crate::captions::WyzieCaptions;
use crate::errors::{NoStreamFound, ScrapeError};
use crate::fetcher::{Fetcher, ProxiedFetcher, ReqwestFetcher};
use crate::media::MediaRequest;
use crate::plugins::{Embed, EmbedOutput, ProviderInfo, Registry, Sourcerer, SourcererOutput};
use crate::proxy::set_m3u8_proxy_url;
use crate::settings::Settings;

/// Async library entry point. Owns the provider registry and the dispatcher.
pub struct Sourcery {
    aggregator: Aggregator,
    settings: Settings,
}

impl Sourcery {
    /// Built-in embeds plus whatever the providers directory declares.
    pub fn new(settings: Settings) -> Result<Self> {
        Self::with_providers(settings, Vec::new(), Vec::new())
    }

    /// Like [`Sourcery::new`], with extra compiled-in providers registered first.
    pub fn with_providers(settings: Settings, sources: Vec<Sourcerer>, embeds: Vec<Embed>) -> Result<Self> {
        let mut registry = Registry::with_builtins().context("registering built-in embeds")?;
        registry.extend(sources, embeds).context("registering providers")?;
        if let Some(dir) = settings.resolved_providers_dir() {
            registry
                .load_providers_from_directory(&dir)
                .with_context(|| format!("loading providers from {}", dir.display()))?;
        }
        let fetcher = ReqwestFetcher::new(&settings.user_agent).context("building http client")?;
        Ok(Self::from_parts(settings, registry, Arc::new(fetcher)))
    }

    /// Assemble from an existing registry and fetcher. The proxied fetcher
    /// wraps `fetcher` with `fetch_proxy_url`, and the process-wide m3u8
    /// proxy base follows `m3u8_proxy_url`.
    pub fn from_parts(settings: Settings, registry: Registry, fetcher: Arc<dyn Fetcher>) -> Self {
        set_m3u8_proxy_url(&settings.m3u8_proxy_url);
        let proxied: Arc<dyn Fetcher> = Arc::new(ProxiedFetcher::new(fetcher.clone(), settings.fetch_proxy_url.clone()));
        let mut aggregator = Aggregator::new(Arc::new(registry), fetcher.clone(), proxied)
            .with_options(settings.dispatch_options())
            .with_proxy(settings.proxy_config());
        if settings.external_captions {
            aggregator = aggregator.with_captions(Arc::new(WyzieCaptions::new(fetcher)));
        }
        info!(
            sources = aggregator.registry().gather_all_sources().len(),
            embeds = aggregator.registry().gather_all_embeds().len(),
            "sourcery ready"
        );
        Self { aggregator, settings }
    }

    pub fn settings(&self) -> &Settings { &self.settings }
    pub fn registry(&self) -> &Registry { self.aggregator.registry() }

    /// Try every eligible source in rank order and return the first playable result.
    pub async fn scrape(&self, media: &MediaRequest) -> Result<RunOutput, NoStreamFound> {
        self.aggregator.run(media).await
    }

    pub async fn scrape_with_events(&self, media: &MediaRequest, events: EventSink) -> Result<RunOutput, NoStreamFound> {
        self.aggregator.run_with_events(media, Some(events)).await
    }

    pub async fn run_source(&self, id: &str, media: &MediaRequest) -> Result<SourcererOutput, ScrapeError> {
        self.aggregator.run_source(id, media).await
    }

    pub async fn run_embed(&self, id: &str, url: &str) -> Result<EmbedOutput, ScrapeError> {
        self.aggregator.run_embed(id, url).await
    }

    pub fn list_sources(&self) -> Vec<ProviderInfo> { self.registry().list_sources() }
    pub fn list_embeds(&self) -> Vec<ProviderInfo> { self.registry().list_embeds() }
}
