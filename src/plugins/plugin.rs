use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{ConfigError, ScrapeError};
use crate::media::MediaKind;
use crate::plugins::host::{EmbedContext, ScrapeContext};
use crate::streams::{Flags, Stream};

/// A deferred result: `url` is opaque to everyone but the embed named `embed_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedRef {
    #[serde(rename = "embedId")]
    pub embed_id: String,
    pub url: String,
}

impl EmbedRef {
    pub fn new(embed_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self { embed_id: embed_id.into(), url: url.into() }
    }
}

/// What a source returns: resolved streams, embed references, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcererOutput {
    #[serde(default)]
    pub stream: Vec<Stream>,
    #[serde(default)]
    pub embeds: Vec<EmbedRef>,
}

impl SourcererOutput {
    pub fn streams(stream: Vec<Stream>) -> Self {
        Self { stream, embeds: Vec::new() }
    }

    pub fn embeds(embeds: Vec<EmbedRef>) -> Self {
        Self { stream: Vec::new(), embeds }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedOutput {
    #[serde(default)]
    pub stream: Vec<Stream>,
}

/// Scraping logic of a top-level source.
///
/// Implement the `scrape_*` methods for the kinds listed by [`media_kinds`](Self::media_kinds);
/// the defaults report the kind as unsupported.
#[async_trait]
pub trait SourceScraper: Send + Sync {
    fn media_kinds(&self) -> &[MediaKind] {
        &[MediaKind::Movie, MediaKind::Show]
    }

    async fn scrape_movie(&self, ctx: &ScrapeContext) -> Result<SourcererOutput, ScrapeError> {
        let _ = ctx;
        Err(ScrapeError::Unsupported(MediaKind::Movie))
    }

    async fn scrape_show(&self, ctx: &ScrapeContext) -> Result<SourcererOutput, ScrapeError> {
        let _ = ctx;
        Err(ScrapeError::Unsupported(MediaKind::Show))
    }
}

/// Resolves one embed url into streams.
#[async_trait]
pub trait EmbedScraper: Send + Sync {
    async fn scrape(&self, ctx: &EmbedContext) -> Result<EmbedOutput, ScrapeError>;
}

/// Registration input for a source; validated by [`make_sourcerer`].
#[derive(Clone, Default)]
pub struct SourcererConfig {
    pub id: String,
    pub name: String,
    pub rank: i32,
    pub disabled: bool,
    pub flags: Flags,
    /// Overrides the dispatcher's default call budget.
    pub timeout: Option<Duration>,
    pub scraper: Option<Arc<dyn SourceScraper>>,
}

/// Registration input for an embed; validated by [`make_embed`].
#[derive(Clone, Default)]
pub struct EmbedConfig {
    pub id: String,
    pub name: String,
    pub rank: i32,
    pub disabled: bool,
    pub timeout: Option<Duration>,
    pub scraper: Option<Arc<dyn EmbedScraper>>,
}

#[derive(Clone)]
pub struct Sourcerer {
    id: String,
    name: String,
    rank: i32,
    disabled: bool,
    flags: Flags,
    media_kinds: Vec<MediaKind>,
    timeout: Option<Duration>,
    scraper: Arc<dyn SourceScraper>,
}

#[derive(Clone)]
pub struct Embed {
    id: String,
    name: String,
    rank: i32,
    disabled: bool,
    timeout: Option<Duration>,
    scraper: Arc<dyn EmbedScraper>,
}

fn required(value: &str, field: &'static str) -> Result<String, ConfigError> {
    let v = value.trim();
    if v.is_empty() {
        return Err(ConfigError::EmptyField { field });
    }
    Ok(v.to_string())
}

fn checked_timeout(id: &str, timeout: Option<Duration>) -> Result<Option<Duration>, ConfigError> {
    match timeout {
        Some(t) if t.is_zero() => Err(ConfigError::Invalid {
            id: id.to_string(),
            reason: "timeout must be greater than zero".into(),
        }),
        other => Ok(other),
    }
}

/// Validate a source registration. Fails on empty id/name, a missing
/// scraper, or a scraper that claims no media kinds.
pub fn make_sourcerer(config: SourcererConfig) -> Result<Sourcerer, ConfigError> {
    let id = required(&config.id, "id")?;
    let name = required(&config.name, "name")?;
    let scraper = config.scraper.ok_or_else(|| ConfigError::MissingScraper { id: id.clone() })?;
    let mut media_kinds = scraper.media_kinds().to_vec();
    media_kinds.dedup();
    if media_kinds.is_empty() {
        return Err(ConfigError::NoMediaKinds { id });
    }
    let timeout = checked_timeout(&id, config.timeout)?;
    Ok(Sourcerer {
        id,
        name,
        rank: config.rank,
        disabled: config.disabled,
        flags: config.flags,
        media_kinds,
        timeout,
        scraper,
    })
}

/// Validate an embed registration. Fails on empty id/name or a missing scraper.
pub fn make_embed(config: EmbedConfig) -> Result<Embed, ConfigError> {
    let id = required(&config.id, "id")?;
    let name = required(&config.name, "name")?;
    let scraper = config.scraper.ok_or_else(|| ConfigError::MissingScraper { id: id.clone() })?;
    let timeout = checked_timeout(&id, config.timeout)?;
    Ok(Embed { id, name, rank: config.rank, disabled: config.disabled, timeout, scraper })
}

impl Sourcerer {
    pub fn id(&self) -> &str { &self.id }
    pub fn name(&self) -> &str { &self.name }
    pub fn rank(&self) -> i32 { self.rank }
    pub fn disabled(&self) -> bool { self.disabled }
    pub fn flags(&self) -> &Flags { &self.flags }
    pub fn media_kinds(&self) -> &[MediaKind] { &self.media_kinds }
    pub fn timeout(&self) -> Option<Duration> { self.timeout }

    pub fn supports(&self, kind: MediaKind) -> bool {
        self.media_kinds.contains(&kind)
    }

    /// Call the scrape method matching the context's media kind.
    pub async fn scrape(&self, ctx: &ScrapeContext) -> Result<SourcererOutput, ScrapeError> {
        let kind = ctx.media.kind();
        if !self.supports(kind) {
            return Err(ScrapeError::Unsupported(kind));
        }
        match kind {
            MediaKind::Movie => self.scraper.scrape_movie(ctx).await,
            MediaKind::Show => self.scraper.scrape_show(ctx).await,
        }
    }
}

impl Embed {
    pub fn id(&self) -> &str { &self.id }
    pub fn name(&self) -> &str { &self.name }
    pub fn rank(&self) -> i32 { self.rank }
    pub fn disabled(&self) -> bool { self.disabled }
    pub fn timeout(&self) -> Option<Duration> { self.timeout }

    pub async fn scrape(&self, ctx: &EmbedContext) -> Result<EmbedOutput, ScrapeError> {
        self.scraper.scrape(ctx).await
    }
}

impl std::fmt::Debug for Sourcerer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sourcerer")
            .field("id", &self.id)
            .field("rank", &self.rank)
            .field("disabled", &self.disabled)
            .field("media_kinds", &self.media_kinds)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for Embed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embed")
            .field("id", &self.id)
            .field("rank", &self.rank)
            .field("disabled", &self.disabled)
            .finish_non_exhaustive()
    }
}
