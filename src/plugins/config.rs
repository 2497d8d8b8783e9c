//! Declarative providers read from `*.toml` files in the providers directory.
//!
//! ```toml
//! [[source]]
//! id = "vidapi"
//! name = "VidAPI"
//! rank = 120
//! movie_url = "https://vidapi.example/movie/{tmdb_id}"
//! show_url = "https://vidapi.example/tv/{tmdb_id}/{season}/{episode}"
//! call_timeout_ms = 8000
//!
//! [[embed]]
//! id = "vidapi-hls"
//! name = "VidAPI HLS"
//! rank = 90
//! kind = "link"
//! stream = "hls"
//! flags = ["cors-allowed"]
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::str::FromStr;
use std::time::Duration;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};

use crate::errors::ConfigError;
use crate::plugins::builtin::{LinkEmbed, LinkKind, RemoteEmbed, RemoteSource};
use crate::plugins::plugin::{make_embed, make_sourcerer, Embed, EmbedConfig, EmbedScraper, Sourcerer, SourcererConfig};
use crate::plugins::template::{Scope, UrlTemplate};
use crate::streams::{Flag, Quality};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct ProvidersFile {
    #[serde(default, rename = "source")]
    pub sources: Vec<SourceSpec>,
    #[serde(default, rename = "embed")]
    pub embeds: Vec<EmbedSpec>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct SourceSpec {
    pub id: String,
    pub name: String,
    pub rank: i32,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, deserialize_with = "parse_list")]
    pub flags: Vec<Flag>,
    #[serde(default)]
    pub call_timeout_ms: Option<u64>,
    /// Send requests through the fetch proxy.
    #[serde(default)]
    pub proxied: bool,
    #[serde(default)]
    pub movie_url: Option<String>,
    #[serde(default)]
    pub show_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbedKind {
    Remote,
    Link,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct EmbedSpec {
    pub id: String,
    pub name: String,
    pub rank: i32,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub call_timeout_ms: Option<u64>,
    pub kind: EmbedKind,
    /// Required for `remote`; defaults to `{raw_url}` for `link`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub proxied: bool,
    // link only
    #[serde(default)]
    pub stream: LinkKind,
    #[serde(default, deserialize_with = "parse_opt")]
    pub quality: Option<Quality>,
    #[serde(default, deserialize_with = "parse_list")]
    pub flags: Vec<Flag>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

// Flags and qualities are written by hand, so take the lenient spellings
// (`CORS_ALLOWED`, `1080p`, `2160`) their `FromStr` impls accept.
fn parse_list<'de, D, T>(de: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr<Err = String>,
{
    Vec::<String>::deserialize(de)?.iter().map(|s| s.parse().map_err(D::Error::custom)).collect()
}

fn parse_opt<'de, D, T>(de: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr<Err = String>,
{
    Option::<String>::deserialize(de)?.map(|s| s.parse().map_err(D::Error::custom)).transpose()
}

impl ProvidersFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io { path: display.clone(), source })?;
        toml::from_str(&text).map_err(|source| ConfigError::Toml { path: display, source })
    }

    pub fn into_providers(self) -> Result<(Vec<Sourcerer>, Vec<Embed>), ConfigError> {
        let sources = self.sources.into_iter().map(SourceSpec::build).collect::<Result<Vec<_>, _>>()?;
        let embeds = self.embeds.into_iter().map(EmbedSpec::build).collect::<Result<Vec<_>, _>>()?;
        Ok((sources, embeds))
    }
}

fn timeout(ms: Option<u64>) -> Option<Duration> {
    ms.map(Duration::from_millis)
}

impl SourceSpec {
    pub fn build(self) -> Result<Sourcerer, ConfigError> {
        let movie_url = self.movie_url.as_deref().map(|t| UrlTemplate::parse(t, Scope::Movie)).transpose()?;
        let show_url = self.show_url.as_deref().map(|t| UrlTemplate::parse(t, Scope::Show)).transpose()?;
        make_sourcerer(SourcererConfig {
            id: self.id,
            name: self.name,
            rank: self.rank,
            disabled: self.disabled,
            flags: self.flags.into_iter().collect(),
            timeout: timeout(self.call_timeout_ms),
            scraper: Some(Arc::new(RemoteSource::new(movie_url, show_url, self.proxied))),
        })
    }
}

impl EmbedSpec {
    pub fn build(self) -> Result<Embed, ConfigError> {
        let scraper: Arc<dyn EmbedScraper> = match self.kind {
            EmbedKind::Remote => {
                let url = self.url.as_deref().ok_or_else(|| ConfigError::Invalid {
                    id: self.id.clone(),
                    reason: "remote embeds need a `url`".into(),
                })?;
                Arc::new(RemoteEmbed::new(UrlTemplate::parse(url, Scope::Embed)?, self.proxied))
            }
            EmbedKind::Link => {
                let url = UrlTemplate::parse(self.url.as_deref().unwrap_or("{raw_url}"), Scope::Embed)?;
                Arc::new(
                    LinkEmbed::new(url, self.stream)
                        .quality(self.quality.unwrap_or(Quality::Unknown))
                        .flags(self.flags.into_iter().collect())
                        .headers(self.headers),
                )
            }
        };
        make_embed(EmbedConfig {
            id: self.id,
            name: self.name,
            rank: self.rank,
            disabled: self.disabled,
            timeout: timeout(self.call_timeout_ms),
            scraper: Some(scraper),
        })
    }
}
