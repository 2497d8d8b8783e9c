//! Generic providers: remote JSON endpoints and plain link wrappers.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::errors::{ConfigError, ScrapeError};
use crate::fetcher::FetchRequest;
use crate::media::MediaKind;
use crate::plugins::host::{EmbedContext, Host, ScrapeContext};
use crate::plugins::plugin::{make_embed, Embed, EmbedConfig, EmbedOutput, EmbedScraper, SourceScraper, SourcererOutput};
use crate::plugins::template::{Scope, UrlTemplate};
use crate::streams::{Flags, Quality, Stream, StreamFile};

/// Source backed by an HTTP endpoint that answers with a `SourcererOutput` document.
pub struct RemoteSource {
    movie_url: Option<UrlTemplate>,
    show_url: Option<UrlTemplate>,
    proxied: bool,
    kinds: Vec<MediaKind>,
}

impl RemoteSource {
    pub fn new(movie_url: Option<UrlTemplate>, show_url: Option<UrlTemplate>, proxied: bool) -> Self {
        let mut kinds = Vec::new();
        if movie_url.is_some() {
            kinds.push(MediaKind::Movie);
        }
        if show_url.is_some() {
            kinds.push(MediaKind::Show);
        }
        Self { movie_url, show_url, proxied, kinds }
    }

    async fn call(&self, ctx: &ScrapeContext, template: Option<&UrlTemplate>) -> Result<SourcererOutput, ScrapeError> {
        let template = template.ok_or(ScrapeError::Unsupported(ctx.media.kind()))?;
        let url = template.render_media(&ctx.media)?;
        debug!(%url, "remote source request");
        let out = get_json(ctx, self.proxied, url).await?;
        ctx.progress(100);
        Ok(out)
    }
}

#[async_trait]
impl SourceScraper for RemoteSource {
    fn media_kinds(&self) -> &[MediaKind] {
        &self.kinds
    }

    async fn scrape_movie(&self, ctx: &ScrapeContext) -> Result<SourcererOutput, ScrapeError> {
        self.call(ctx, self.movie_url.as_ref()).await
    }

    async fn scrape_show(&self, ctx: &ScrapeContext) -> Result<SourcererOutput, ScrapeError> {
        self.call(ctx, self.show_url.as_ref()).await
    }
}

/// Embed that hands its url to an HTTP endpoint answering with an `EmbedOutput` document.
pub struct RemoteEmbed {
    url: UrlTemplate,
    proxied: bool,
}

impl RemoteEmbed {
    pub fn new(url: UrlTemplate, proxied: bool) -> Self {
        Self { url, proxied }
    }
}

#[async_trait]
impl EmbedScraper for RemoteEmbed {
    async fn scrape(&self, ctx: &EmbedContext) -> Result<EmbedOutput, ScrapeError> {
        let url = self.url.render_url(&ctx.url)?;
        debug!(%url, "remote embed request");
        let out = get_json(ctx, self.proxied, url).await?;
        ctx.progress(100);
        Ok(out)
    }
}

async fn get_json<T: serde::de::DeserializeOwned>(host: &Host, proxied: bool, url: String) -> Result<T, ScrapeError> {
    let req = FetchRequest::get(url).header("accept", "application/json");
    if proxied {
        host.proxied_fetch_json(req).await
    } else {
        host.fetch_json(req).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    #[default]
    Hls,
    Mp4,
}

/// Embed whose url already points at the media, possibly after templating.
pub struct LinkEmbed {
    url: UrlTemplate,
    kind: LinkKind,
    quality: Quality,
    flags: Flags,
    headers: BTreeMap<String, String>,
}

impl LinkEmbed {
    pub fn new(url: UrlTemplate, kind: LinkKind) -> Self {
        Self { url, kind, quality: Quality::Unknown, flags: Flags::new(), headers: BTreeMap::new() }
    }

    pub fn quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    pub fn flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    pub fn headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }
}

#[async_trait]
impl EmbedScraper for LinkEmbed {
    async fn scrape(&self, ctx: &EmbedContext) -> Result<EmbedOutput, ScrapeError> {
        let target = self.url.render_url(&ctx.url)?;
        let parsed = Url::parse(&target).map_err(|e| ScrapeError::malformed(format!("`{target}`: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ScrapeError::malformed(format!("unsupported scheme in `{target}`")));
        }
        let stream = match self.kind {
            LinkKind::Hls => Stream::hls("primary", target),
            LinkKind::Mp4 => Stream::file("primary", [(self.quality, StreamFile::mp4(target))]),
        };
        let mut stream = stream.with_flags(self.flags.iter().copied());
        stream.headers_mut().extend(self.headers.clone());
        Ok(EmbedOutput { stream: vec![stream] })
    }
}

/// Embeds every registry carries: direct playlist and direct file links.
pub fn builtin_embeds() -> Result<Vec<Embed>, ConfigError> {
    let raw = || UrlTemplate::parse("{raw_url}", Scope::Embed);
    Ok(vec![
        make_embed(EmbedConfig {
            id: "direct-hls".into(),
            name: "Direct HLS".into(),
            rank: 1,
            scraper: Some(Arc::new(LinkEmbed::new(raw()?, LinkKind::Hls))),
            ..Default::default()
        })?,
        make_embed(EmbedConfig {
            id: "direct-mp4".into(),
            name: "Direct MP4".into(),
            rank: 0,
            scraper: Some(Arc::new(LinkEmbed::new(raw()?, LinkKind::Mp4))),
            ..Default::default()
        })?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::{FetchResponse, Fetcher};
    use crate::media::MediaRequest;
    use crate::streams::Flag;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Canned {
        body: String,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Fetcher for Canned {
        async fn fetch(&self, req: FetchRequest) -> Result<FetchResponse, ScrapeError> {
            self.seen.lock().unwrap().push(req.url.clone());
            Ok(FetchResponse { status: 200, final_url: req.url, body: self.body.clone(), ..Default::default() })
        }
    }

    fn host(direct: Arc<Canned>, proxied: Arc<Canned>) -> Host {
        Host::new(direct, proxied)
    }

    #[tokio::test]
    async fn test_remote_source_decodes_output() {
        let direct = Arc::new(Canned {
            body: r#"{"embeds":[{"embedId":"direct-hls","url":"https://cdn/x.m3u8"}]}"#.into(),
            ..Default::default()
        });
        let proxied = Arc::new(Canned::default());
        let src = RemoteSource::new(
            Some(UrlTemplate::parse("https://api.example/m/{tmdb_id}", Scope::Movie).unwrap()),
            None,
            false,
        );
        assert_eq!(src.media_kinds(), &[MediaKind::Movie]);

        let ctx = ScrapeContext::new(MediaRequest::movie("603", "The Matrix", 1999), host(direct.clone(), proxied.clone()));
        let out = src.scrape_movie(&ctx).await.unwrap();
        assert_eq!(out.embeds[0].embed_id, "direct-hls");
        assert_eq!(*direct.seen.lock().unwrap(), vec!["https://api.example/m/603".to_string()]);
        assert!(proxied.seen.lock().unwrap().is_empty());

        let show = ScrapeContext::new(MediaRequest::show("1", "x", 2000, 1, 1), host(direct, proxied));
        assert!(matches!(src.scrape_show(&show).await, Err(ScrapeError::Unsupported(MediaKind::Show))));
    }

    #[tokio::test]
    async fn test_remote_embed_uses_proxied_fetcher() {
        let direct = Arc::new(Canned::default());
        let proxied = Arc::new(Canned {
            body: r#"{"stream":[{"type":"hls","id":"p","playlist":"https://cdn/p.m3u8","flags":[],"captions":[]}]}"#.into(),
            ..Default::default()
        });
        let embed = RemoteEmbed::new(UrlTemplate::parse("https://resolve/?u={url}", Scope::Embed).unwrap(), true);
        let ctx = EmbedContext::new("https://e/1", host(direct.clone(), proxied.clone()));
        let out = embed.scrape(&ctx).await.unwrap();
        assert_eq!(out.stream.len(), 1);
        assert_eq!(*proxied.seen.lock().unwrap(), vec!["https://resolve/?u=https%3A%2F%2Fe%2F1".to_string()]);
        assert!(direct.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_link_embed_builds_streams() {
        let h = host(Arc::new(Canned::default()), Arc::new(Canned::default()));
        let raw = UrlTemplate::parse("{raw_url}", Scope::Embed).unwrap();

        let hls = LinkEmbed::new(raw.clone(), LinkKind::Hls)
            .flags(Flags::from([Flag::CorsAllowed]))
            .headers(BTreeMap::from([("referer".to_string(), "https://site/".to_string())]));
        let out = hls.scrape(&EmbedContext::new("https://cdn/a.m3u8", h.clone())).await.unwrap();
        assert!(matches!(&out.stream[0], Stream::Hls(s) if s.playlist == "https://cdn/a.m3u8"));
        assert!(out.stream[0].has_flag(Flag::CorsAllowed));
        assert_eq!(out.stream[0].headers()["referer"], "https://site/");

        let mp4 = LinkEmbed::new(raw.clone(), LinkKind::Mp4).quality(Quality::P720);
        let out = mp4.scrape(&EmbedContext::new("https://cdn/a.mp4", h.clone())).await.unwrap();
        match &out.stream[0] {
            Stream::File(f) => assert_eq!(f.qualities[&Quality::P720].url, "https://cdn/a.mp4"),
            other => panic!("expected file stream, got {other:?}"),
        }

        let bad = LinkEmbed::new(raw, LinkKind::Hls);
        assert!(matches!(
            bad.scrape(&EmbedContext::new("ftp://cdn/a", h)).await,
            Err(ScrapeError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_builtin_embed_ids() {
        let ids: Vec<_> = builtin_embeds().unwrap().iter().map(|e| e.id().to_string()).collect();
        assert_eq!(ids, vec!["direct-hls", "direct-mp4"]);
    }
}
