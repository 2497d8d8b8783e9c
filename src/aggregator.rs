use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::captions::{add_external_captions, CaptionSearch};
use crate::errors::{NoStreamFound, ProviderFailure, ScrapeError};
use crate::fetcher::Fetcher;
use crate::media::MediaRequest;
use crate::plugins::{Embed, EmbedContext, EmbedOutput, EmbedRef, Host, Registry, ScrapeContext, Sourcerer, SourcererOutput};
use crate::proxy::{requires_proxy, ProxyConfig};
use crate::streams::Stream;

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub source_timeout: Duration,
    pub embed_timeout: Duration,
    /// Rewrite winning streams through the stream proxy when they need it.
    pub proxy_streams: bool,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self { source_timeout: DEFAULT_CALL_TIMEOUT, embed_timeout: DEFAULT_CALL_TIMEOUT, proxy_streams: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrapeStatus {
    Pending,
    Success,
    NotFound,
    Failure,
}

/// Progress notifications emitted while a dispatch runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ScrapeEvent {
    #[serde(rename_all = "camelCase")]
    Init { source_ids: Vec<String> },
    Start { id: String },
    Update {
        id: String,
        percent: u8,
        status: ScrapeStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    DiscoverEmbeds { source_id: String, embeds: Vec<EmbedRef> },
}

pub type EventSink = Arc<dyn Fn(ScrapeEvent) + Send + Sync>;

/// The winning provider chain and its streams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutput {
    pub source_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embed_id: Option<String>,
    pub stream: Vec<Stream>,
}

struct Events(Option<EventSink>);

impl Events {
    fn emit(&self, event: ScrapeEvent) {
        if let Some(sink) = &self.0 {
            sink(event);
        }
    }

    fn update(&self, id: &str, status: ScrapeStatus, reason: Option<String>) {
        self.emit(ScrapeEvent::Update { id: id.to_string(), percent: 100, status, reason });
    }
}

/// Ranked fallback dispatch: sources in descending rank, each source's embeds
/// in the order it returned them, first playable result wins.
pub struct Aggregator {
    registry: Arc<Registry>,
    fetcher: Arc<dyn Fetcher>,
    proxied_fetcher: Arc<dyn Fetcher>,
    proxy: ProxyConfig,
    options: DispatchOptions,
    captions: Option<Arc<dyn CaptionSearch>>,
}

impl Aggregator {
    pub fn new(registry: Arc<Registry>, fetcher: Arc<dyn Fetcher>, proxied_fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            registry,
            fetcher,
            proxied_fetcher,
            proxy: ProxyConfig::default(),
            options: DispatchOptions::default(),
            captions: None,
        }
    }

    pub fn with_options(mut self, options: DispatchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = proxy;
        self
    }

    /// Append external captions to winning streams.
    pub fn with_captions(mut self, captions: Arc<dyn CaptionSearch>) -> Self {
        self.captions = Some(captions);
        self
    }

    pub fn registry(&self) -> &Registry { &self.registry }
    pub fn options(&self) -> &DispatchOptions { &self.options }
    pub fn proxy(&self) -> &ProxyConfig { &self.proxy }

    pub async fn run(&self, media: &MediaRequest) -> Result<RunOutput, NoStreamFound> {
        self.run_with_events(media, None).await
    }

    pub async fn run_with_events(
        &self,
        media: &MediaRequest,
        sink: Option<EventSink>,
    ) -> Result<RunOutput, NoStreamFound> {
        let events = Events(sink);
        let order = self.registry.dispatch_order(media.kind());
        events.emit(ScrapeEvent::Init { source_ids: order.iter().map(|s| s.id().to_string()).collect() });

        let mut failures = Vec::new();
        for source in order {
            if let Some(found) = self.try_source(source, media, &events, &mut failures).await {
                return Ok(self.finish(found, media).await);
            }
        }
        warn!(kind = %media.kind(), failures = failures.len(), "no stream found");
        Err(NoStreamFound { failures })
    }

    /// Run one enabled source by id, with the usual timeout and stream checks.
    pub async fn run_source(&self, id: &str, media: &MediaRequest) -> Result<SourcererOutput, ScrapeError> {
        let source = self
            .registry
            .find_source(id)
            .ok_or_else(|| ScrapeError::not_found(format!("no enabled source `{id}`")))?;
        let mut out = self.call_source(source, media, &Events(None)).await?;
        out.stream = self.prepare_streams(playable(out.stream));
        if out.stream.is_empty() && out.embeds.is_empty() {
            return Err(ScrapeError::not_found("no playable streams or embeds"));
        }
        Ok(out)
    }

    pub async fn run_embed(&self, id: &str, url: &str) -> Result<EmbedOutput, ScrapeError> {
        let embed = self
            .registry
            .find_embed(id)
            .ok_or_else(|| ScrapeError::not_found(format!("no enabled embed `{id}`")))?;
        let streams = self.call_embed(embed, url, &Events(None)).await?;
        Ok(EmbedOutput { stream: self.prepare_streams(streams) })
    }

    async fn try_source(
        &self,
        source: &Sourcerer,
        media: &MediaRequest,
        events: &Events,
        failures: &mut Vec<ProviderFailure>,
    ) -> Option<RunOutput> {
        let started = Instant::now();
        let output = match self.call_source(source, media, events).await {
            Ok(output) => output,
            Err(error) => {
                record(events, failures, source.id(), None, error);
                return None;
            }
        };

        let streams = playable(output.stream);
        if !streams.is_empty() {
            info!(source = source.id(), elapsed_ms = started.elapsed().as_millis() as u64, "found stream");
            events.update(source.id(), ScrapeStatus::Success, None);
            return Some(RunOutput { source_id: source.id().to_string(), embed_id: None, stream: streams });
        }
        if output.embeds.is_empty() {
            record(events, failures, source.id(), None, ScrapeError::not_found("no playable streams"));
            return None;
        }

        events.update(source.id(), ScrapeStatus::Success, None);
        events.emit(ScrapeEvent::DiscoverEmbeds { source_id: source.id().to_string(), embeds: output.embeds.clone() });
        for embed_ref in &output.embeds {
            let Some(embed) = self.registry.find_embed(&embed_ref.embed_id) else {
                debug!(source = source.id(), embed = %embed_ref.embed_id, "skipping unknown or disabled embed");
                continue;
            };
            match self.call_embed(embed, &embed_ref.url, events).await {
                Ok(streams) => {
                    info!(
                        source = source.id(),
                        embed = embed.id(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "found stream"
                    );
                    events.update(embed.id(), ScrapeStatus::Success, None);
                    return Some(RunOutput {
                        source_id: source.id().to_string(),
                        embed_id: Some(embed.id().to_string()),
                        stream: streams,
                    });
                }
                Err(error) => record(events, failures, source.id(), Some(embed.id()), error),
            }
        }
        failures.push(ProviderFailure {
            source_id: source.id().to_string(),
            embed_id: None,
            error: ScrapeError::not_found("no embed produced a playable stream"),
        });
        None
    }

    async fn call_source(
        &self,
        source: &Sourcerer,
        media: &MediaRequest,
        events: &Events,
    ) -> Result<SourcererOutput, ScrapeError> {
        events.emit(ScrapeEvent::Start { id: source.id().to_string() });
        let ctx = ScrapeContext::new(media.clone(), self.host(source.id(), events));
        let budget = source.timeout().unwrap_or(self.options.source_timeout);
        debug!(source = source.id(), rank = source.rank(), "trying source");
        with_timeout(budget, source.scrape(&ctx))
            .instrument(info_span!("source", id = source.id()))
            .await
    }

    async fn call_embed(&self, embed: &Embed, url: &str, events: &Events) -> Result<Vec<Stream>, ScrapeError> {
        events.emit(ScrapeEvent::Start { id: embed.id().to_string() });
        let ctx = EmbedContext::new(url, self.host(embed.id(), events));
        let budget = embed.timeout().unwrap_or(self.options.embed_timeout);
        debug!(embed = embed.id(), rank = embed.rank(), "trying embed");
        let output = with_timeout(budget, embed.scrape(&ctx))
            .instrument(info_span!("embed", id = embed.id()))
            .await?;
        let streams = playable(output.stream);
        if streams.is_empty() {
            return Err(ScrapeError::not_found("no playable streams"));
        }
        Ok(streams)
    }

    fn host(&self, id: &str, events: &Events) -> Host {
        let host = Host::new(self.fetcher.clone(), self.proxied_fetcher.clone()).with_proxy(self.proxy.clone());
        let Some(sink) = events.0.clone() else { return host };
        let id = id.to_string();
        host.with_progress(Arc::new(move |percent| {
            sink(ScrapeEvent::Update { id: id.clone(), percent, status: ScrapeStatus::Pending, reason: None })
        }))
    }

    async fn finish(&self, mut found: RunOutput, media: &MediaRequest) -> RunOutput {
        if let Some(search) = &self.captions {
            add_external_captions(search.as_ref(), &mut found.stream, media).await;
        }
        found.stream = self.prepare_streams(found.stream);
        found
    }

    fn prepare_streams(&self, streams: Vec<Stream>) -> Vec<Stream> {
        if !self.options.proxy_streams {
            return streams;
        }
        streams
            .into_iter()
            .map(|s| if requires_proxy(&s) { self.proxy.setup_proxy(s) } else { s })
            .collect()
    }
}

fn record(
    events: &Events,
    failures: &mut Vec<ProviderFailure>,
    source_id: &str,
    embed_id: Option<&str>,
    error: ScrapeError,
) {
    let id = embed_id.unwrap_or(source_id);
    let status = if error.is_not_found() {
        debug!(source = source_id, embed = ?embed_id, error = %error, "nothing found");
        ScrapeStatus::NotFound
    } else {
        warn!(source = source_id, embed = ?embed_id, error = %error, "provider failed");
        ScrapeStatus::Failure
    };
    events.update(id, status, Some(error.to_string()));
    failures.push(ProviderFailure {
        source_id: source_id.to_string(),
        embed_id: embed_id.map(str::to_string),
        error,
    });
}

/// Drops empty file qualities, then streams with nothing left to play.
fn playable(streams: Vec<Stream>) -> Vec<Stream> {
    let total = streams.len();
    let kept: Vec<Stream> = streams
        .into_iter()
        .map(|mut s| {
            if let Stream::File(f) = &mut s {
                f.prune_empty();
            }
            s
        })
        .filter(Stream::is_playable)
        .collect();
    if kept.len() < total {
        debug!(dropped = total - kept.len(), "dropped unplayable streams");
    }
    kept
}

async fn with_timeout<T, F>(budget: Duration, fut: F) -> Result<T, ScrapeError>
where
    F: Future<Output = Result<T, ScrapeError>>,
{
    tokio::time::timeout(budget, fut)
        .await
        .unwrap_or_else(|_| Err(ScrapeError::Timeout(budget)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::{FetchRequest, FetchResponse};
    use crate::plugins::{make_embed, make_sourcerer, EmbedConfig, EmbedScraper, SourceScraper, SourcererConfig};
    use crate::proxy::decode_proxy_payload;
    use crate::streams::{Caption, CaptionType, Flag, Quality, StreamFile};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Offline;

    #[async_trait]
    impl Fetcher for Offline {
        async fn fetch(&self, req: FetchRequest) -> Result<FetchResponse, ScrapeError> {
            Err(ScrapeError::Network(format!("offline: {}", req.url)))
        }
    }

    struct Fixed(SourcererOutput);

    #[async_trait]
    impl SourceScraper for Fixed {
        async fn scrape_movie(&self, ctx: &ScrapeContext) -> Result<SourcererOutput, ScrapeError> {
            ctx.progress(50);
            Ok(self.0.clone())
        }
    }

    struct Hls(&'static str);

    #[async_trait]
    impl EmbedScraper for Hls {
        async fn scrape(&self, ctx: &EmbedContext) -> Result<EmbedOutput, ScrapeError> {
            Ok(EmbedOutput { stream: vec![Stream::hls("e", format!("{}{}", self.0, ctx.url))] })
        }
    }

    struct Captions;

    #[async_trait]
    impl CaptionSearch for Captions {
        async fn search(&self, _media: &MediaRequest) -> Result<Vec<Caption>, ScrapeError> {
            Ok(vec![Caption::new("w1", "https://subs/w1.srt", CaptionType::Srt, "English")])
        }
    }

    fn source(id: &str, rank: i32, out: SourcererOutput) -> Sourcerer {
        make_sourcerer(SourcererConfig {
            id: id.into(),
            name: id.into(),
            rank,
            scraper: Some(Arc::new(Fixed(out))),
            ..Default::default()
        })
        .unwrap()
    }

    fn embed(id: &str, prefix: &'static str, disabled: bool) -> Embed {
        make_embed(EmbedConfig {
            id: id.into(),
            name: id.into(),
            rank: 1,
            disabled,
            scraper: Some(Arc::new(Hls(prefix))),
            ..Default::default()
        })
        .unwrap()
    }

    fn aggregator(sources: Vec<Sourcerer>, embeds: Vec<Embed>) -> Aggregator {
        let registry = Registry::new(sources, embeds).unwrap();
        Aggregator::new(Arc::new(registry), Arc::new(Offline), Arc::new(Offline))
            .with_proxy(ProxyConfig::new("https://p.test/proxy", "https://m.test"))
    }

    fn movie() -> MediaRequest {
        MediaRequest::movie("603", "The Matrix", 1999)
    }

    #[tokio::test]
    async fn test_events_follow_dispatch() {
        let agg = aggregator(
            vec![source("src", 10, SourcererOutput::embeds(vec![EmbedRef::new("emb", "/a.m3u8")]))],
            vec![embed("emb", "https://cdn", false)],
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let out = agg
            .run_with_events(&movie(), Some(Arc::new(move |e| sink.lock().unwrap().push(e))))
            .await
            .unwrap();
        assert_eq!(out.embed_id.as_deref(), Some("emb"));

        let events = seen.lock().unwrap().clone();
        assert_eq!(events[0], ScrapeEvent::Init { source_ids: vec!["src".into()] });
        assert_eq!(events[1], ScrapeEvent::Start { id: "src".into() });
        assert!(matches!(&events[2], ScrapeEvent::Update { percent: 50, status: ScrapeStatus::Pending, .. }));
        assert!(events.iter().any(|e| matches!(e, ScrapeEvent::DiscoverEmbeds { source_id, .. } if source_id == "src")));
        assert!(matches!(events.last(), Some(ScrapeEvent::Update { id, status: ScrapeStatus::Success, .. }) if id == "emb"));

        let json = serde_json::to_value(&events[0]).unwrap();
        assert_eq!(json["event"], "init");
        assert_eq!(json["sourceIds"][0], "src");
    }

    #[tokio::test]
    async fn test_winning_streams_are_proxied_unless_cors_allowed() {
        let out = SourcererOutput::streams(vec![
            Stream::hls("needs", "https://cdn/a.m3u8").with_header("referer", "https://site/"),
            Stream::hls("open", "https://cdn/b.m3u8").with_flags([Flag::CorsAllowed]),
        ]);
        let agg = aggregator(vec![source("s", 1, out)], vec![]);
        let result = agg.run(&movie()).await.unwrap();
        let Stream::Hls(needs) = &result.stream[0] else { panic!("expected hls") };
        assert!(needs.playlist.starts_with("https://p.test/proxy?payload="));
        let payload = decode_proxy_payload(&needs.playlist).unwrap();
        assert_eq!(payload.url.as_deref(), Some("https://cdn/a.m3u8"));
        let Stream::Hls(open) = &result.stream[1] else { panic!("expected hls") };
        assert_eq!(open.playlist, "https://cdn/b.m3u8");

        let raw = aggregator(vec![source("s", 1, SourcererOutput::streams(vec![Stream::hls("x", "https://cdn/a.m3u8")]))], vec![])
            .with_options(DispatchOptions { proxy_streams: false, ..Default::default() });
        let Stream::Hls(untouched) = &raw.run(&movie()).await.unwrap().stream[0] else { panic!("expected hls") };
        assert_eq!(untouched.playlist, "https://cdn/a.m3u8");
    }

    #[tokio::test]
    async fn test_unplayable_streams_fall_through() {
        let agg = aggregator(
            vec![
                source("empty", 9, SourcererOutput::streams(vec![Stream::hls("blank", " ")])),
                source("good", 1, SourcererOutput::streams(vec![Stream::hls("ok", "https://cdn/ok.m3u8")])),
            ],
            vec![],
        );
        let out = agg.run(&movie()).await.unwrap();
        assert_eq!(out.source_id, "good");
    }

    #[tokio::test]
    async fn test_empty_file_qualities_are_dropped_before_proxying() {
        let file = Stream::file(
            "f",
            [(Quality::P1080, StreamFile::mp4("")), (Quality::P720, StreamFile::mp4("https://cdn/720.mp4"))],
        );
        let agg = aggregator(vec![source("s", 1, SourcererOutput::streams(vec![file]))], vec![]);
        let out = agg.run(&movie()).await.unwrap();
        let Stream::File(f) = &out.stream[0] else { panic!("expected file") };
        assert_eq!(f.qualities.keys().copied().collect::<Vec<_>>(), vec![Quality::P720]);
        let (best, entry) = f.best().unwrap();
        assert_eq!(best, Quality::P720);
        assert_eq!(decode_proxy_payload(&entry.url).unwrap().url.as_deref(), Some("https://cdn/720.mp4"));
    }

    #[tokio::test]
    async fn test_unknown_and_disabled_embeds_are_skipped() {
        let agg = aggregator(
            vec![source(
                "src",
                5,
                SourcererOutput::embeds(vec![
                    EmbedRef::new("nope", "/x"),
                    EmbedRef::new("off", "/y"),
                    EmbedRef::new("on", "/z.m3u8"),
                ]),
            )],
            vec![embed("off", "https://off", true), embed("on", "https://on", false)],
        );
        let out = agg.run(&movie()).await.unwrap();
        assert_eq!(out.embed_id.as_deref(), Some("on"));
    }

    #[tokio::test]
    async fn test_external_captions_attached() {
        let agg = aggregator(
            vec![source("s", 1, SourcererOutput::streams(vec![Stream::hls("x", "https://cdn/a.m3u8").with_flags([Flag::CorsAllowed])]))],
            vec![],
        )
        .with_captions(Arc::new(Captions));
        let out = agg.run(&movie()).await.unwrap();
        assert_eq!(out.stream[0].captions().len(), 1);
        assert_eq!(out.stream[0].captions()[0].language, "en");
    }

    #[tokio::test]
    async fn test_run_source_and_run_embed() {
        let agg = aggregator(
            vec![source("src", 1, SourcererOutput::embeds(vec![EmbedRef::new("emb", "/q.m3u8")]))],
            vec![embed("emb", "https://cdn", false)],
        )
        .with_options(DispatchOptions { proxy_streams: false, ..Default::default() });

        let out = agg.run_source("src", &movie()).await.unwrap();
        assert_eq!(out.embeds.len(), 1);
        let out = agg.run_embed("emb", "/q.m3u8").await.unwrap();
        assert!(matches!(&out.stream[0], Stream::Hls(s) if s.playlist == "https://cdn/q.m3u8"));

        assert!(matches!(agg.run_source("missing", &movie()).await, Err(ScrapeError::NotFound(_))));
        let show = MediaRequest::show("1", "x", 2000, 1, 1);
        assert!(matches!(agg.run_source("src", &show).await, Err(ScrapeError::Unsupported(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_source_timeout_override() {
        struct Slow;

        #[async_trait]
        impl SourceScraper for Slow {
            async fn scrape_movie(&self, _ctx: &ScrapeContext) -> Result<SourcererOutput, ScrapeError> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(SourcererOutput::streams(vec![Stream::hls("late", "https://cdn/late.m3u8")]))
            }
        }

        let slow = make_sourcerer(SourcererConfig {
            id: "slow".into(),
            name: "Slow".into(),
            rank: 1,
            timeout: Some(Duration::from_secs(1)),
            scraper: Some(Arc::new(Slow)),
            ..Default::default()
        })
        .unwrap();
        let agg = aggregator(vec![slow], vec![]);
        let err = agg.run(&movie()).await.unwrap_err();
        assert_eq!(err.failures[0].error, ScrapeError::Timeout(Duration::from_secs(1)));
    }
}
