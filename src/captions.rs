//! External subtitle search appended to winning streams.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::errors::ScrapeError;
use crate::fetcher::{FetchRequest, Fetcher};
use crate::media::MediaRequest;
use crate::streams::{Caption, CaptionType, Stream};

pub const WYZIE_SEARCH_URL: &str = "https://sub.wyzie.ru/search";

#[async_trait]
pub trait CaptionSearch: Send + Sync {
    async fn search(&self, media: &MediaRequest) -> Result<Vec<Caption>, ScrapeError>;
}

#[derive(Debug, Deserialize)]
struct WyzieSubtitle {
    id: serde_json::Value,
    url: String,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    language: Option<String>,
}

impl WyzieSubtitle {
    fn into_caption(self) -> Option<Caption> {
        if self.url.trim().is_empty() {
            return None;
        }
        let kind = match self.format.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("vtt") => CaptionType::Vtt,
            Some("srt") => CaptionType::Srt,
            _ => CaptionType::from_url(&self.url).unwrap_or(CaptionType::Srt),
        };
        let id = match self.id {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        Some(Caption::new(id, self.url, kind, self.language.as_deref().unwrap_or("")))
    }
}

/// Wyzie subtitle search over the plain fetcher.
pub struct WyzieCaptions {
    fetcher: Arc<dyn Fetcher>,
    search_url: String,
}

impl WyzieCaptions {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher, search_url: WYZIE_SEARCH_URL.to_string() }
    }

    pub fn with_search_url(mut self, url: impl Into<String>) -> Self {
        self.search_url = url.into();
        self
    }

    fn request(&self, media: &MediaRequest) -> Result<FetchRequest, ScrapeError> {
        let id = match (media.tmdb_id().trim(), media.imdb_id()) {
            (tmdb, _) if !tmdb.is_empty() => tmdb.to_string(),
            (_, Some(imdb)) => imdb.trim_start_matches("tt").to_string(),
            _ => return Err(ScrapeError::not_found("no tmdb or imdb id to search captions")),
        };
        let mut req = FetchRequest::get(&self.search_url).query("id", id).query("format", "srt");
        if let Some((season, episode)) = media.episode() {
            req = req.query("season", season.to_string()).query("episode", episode.to_string());
        }
        Ok(req)
    }
}

#[async_trait]
impl CaptionSearch for WyzieCaptions {
    async fn search(&self, media: &MediaRequest) -> Result<Vec<Caption>, ScrapeError> {
        let req = self.request(media)?;
        let subs: Vec<WyzieSubtitle> = self.fetcher.fetch(req).await?.error_for_status()?.json()?;
        Ok(subs.into_iter().filter_map(WyzieSubtitle::into_caption).collect())
    }
}

/// Append `found` captions whose url is not already present.
pub fn merge_captions(captions: &mut Vec<Caption>, found: &[Caption]) {
    for c in found {
        if !captions.iter().any(|e| e.url == c.url) {
            captions.push(c.clone());
        }
    }
}

/// Search once for `media` and merge the results into every stream. Search
/// failures leave the streams unchanged.
pub async fn add_external_captions(search: &dyn CaptionSearch, streams: &mut [Stream], media: &MediaRequest) {
    match search.search(media).await {
        Ok(found) => {
            debug!(count = found.len(), "external captions found");
            for stream in streams.iter_mut() {
                merge_captions(stream.captions_mut(), &found);
            }
        }
        Err(e) => warn!(error = %e, "external caption search failed"),
    }
}
