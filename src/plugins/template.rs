//! `{placeholder}` url templates used by declarative providers.

use percent_encoding::utf8_percent_encode;
use url::Url;

use crate::errors::{ConfigError, ScrapeError};
use crate::media::MediaRequest;
use crate::proxy::URI_COMPONENT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Var {
    TmdbId,
    ImdbId,
    Title,
    Year,
    Season,
    Episode,
    Url,
    RawUrl,
}

impl Var {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "tmdb_id" => Var::TmdbId,
            "imdb_id" => Var::ImdbId,
            "title" => Var::Title,
            "year" => Var::Year,
            "season" => Var::Season,
            "episode" => Var::Episode,
            "url" => Var::Url,
            "raw_url" => Var::RawUrl,
            _ => return None,
        })
    }

    fn name(self) -> &'static str {
        match self {
            Var::TmdbId => "tmdb_id",
            Var::ImdbId => "imdb_id",
            Var::Title => "title",
            Var::Year => "year",
            Var::Season => "season",
            Var::Episode => "episode",
            Var::Url => "url",
            Var::RawUrl => "raw_url",
        }
    }
}

/// Which values a template may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Movie,
    Show,
    Embed,
}

impl Scope {
    fn allows(self, var: Var) -> bool {
        match self {
            Scope::Movie => matches!(var, Var::TmdbId | Var::ImdbId | Var::Title | Var::Year),
            Scope::Show => !matches!(var, Var::Url | Var::RawUrl),
            Scope::Embed => matches!(var, Var::Url | Var::RawUrl),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Var(Var),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl UrlTemplate {
    /// Parse and validate `template` for `scope`. Sample values are rendered
    /// so that a template which can never produce an absolute url is rejected here.
    pub fn parse(template: &str, scope: Scope) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidTemplate { template: template.to_string(), reason };
        let mut segments = Vec::new();
        let mut rest = template;
        while let Some(open) = rest.find('{') {
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            let after = &rest[open + 1..];
            let close = after.find('}').ok_or_else(|| invalid("unclosed `{`".into()))?;
            let name = &after[..close];
            let var = Var::parse(name).ok_or_else(|| invalid(format!("unknown placeholder `{name}`")))?;
            if !scope.allows(var) {
                return Err(invalid(format!("placeholder `{name}` is not available here")));
            }
            segments.push(Segment::Var(var));
            rest = &after[close + 1..];
        }
        if rest.contains('}') {
            return Err(invalid("unmatched `}`".into()));
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        let parsed = Self { source: template.to_string(), segments };
        let sample = parsed.render_with(|var| {
            Ok(match var {
                Var::Url | Var::RawUrl => "https://embed.example/e/1".to_string(),
                _ => "1".to_string(),
            })
        });
        match sample.map(|s| Url::parse(&s)) {
            Ok(Ok(_)) => Ok(parsed),
            Ok(Err(e)) => Err(invalid(format!("does not produce a valid url: {e}"))),
            Err(e) => Err(invalid(e.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Render for a media request. Values are percent-encoded as uri components.
    pub fn render_media(&self, media: &MediaRequest) -> Result<String, ScrapeError> {
        self.render_with(|var| {
            let value = match var {
                Var::TmdbId => media.tmdb_id().to_string(),
                Var::ImdbId => media
                    .imdb_id()
                    .ok_or_else(|| ScrapeError::not_found("no imdb id for this title"))?
                    .to_string(),
                Var::Title => media.title().to_string(),
                Var::Year => media.release_year().to_string(),
                Var::Season | Var::Episode => {
                    let (season, episode) = media.episode().ok_or(ScrapeError::Unsupported(media.kind()))?;
                    let n = if var == Var::Season { season } else { episode };
                    n.to_string()
                }
                Var::Url | Var::RawUrl => return Err(ScrapeError::Unsupported(media.kind())),
            };
            Ok(encode(&value))
        })
    }

    /// Render for an embed url. `{url}` is encoded, `{raw_url}` is inserted as is.
    pub fn render_url(&self, url: &str) -> Result<String, ScrapeError> {
        self.render_with(|var| match var {
            Var::Url => Ok(encode(url)),
            Var::RawUrl => Ok(url.to_string()),
            other => Err(ScrapeError::malformed(format!("`{}` is not available for embeds", other.name()))),
        })
    }

    fn render_with<F>(&self, mut value: F) -> Result<String, ScrapeError>
    where
        F: FnMut(Var) -> Result<String, ScrapeError>,
    {
        let mut out = String::with_capacity(self.source.len());
        for seg in &self.segments {
            match seg {
                Segment::Literal(s) => out.push_str(s),
                Segment::Var(v) => out.push_str(&value(*v)?),
            }
        }
        Ok(out)
    }
}

fn encode(value: &str) -> String {
    utf8_percent_encode(value, URI_COMPONENT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_movie_and_show() {
        let t = UrlTemplate::parse("https://api.example/movie/{tmdb_id}?q={title}&y={year}", Scope::Movie).unwrap();
        let m = MediaRequest::movie("603", "The Matrix", 1999);
        assert_eq!(t.render_media(&m).unwrap(), "https://api.example/movie/603?q=The%20Matrix&y=1999");

        let t = UrlTemplate::parse("https://api.example/tv/{tmdb_id}/{season}/{episode}", Scope::Show).unwrap();
        let s = MediaRequest::show("1399", "Game of Thrones", 2011, 1, 2);
        assert_eq!(t.render_media(&s).unwrap(), "https://api.example/tv/1399/1/2");
    }

    #[test]
    fn test_missing_imdb_is_not_found() {
        let t = UrlTemplate::parse("https://api.example/{imdb_id}", Scope::Movie).unwrap();
        let m = MediaRequest::movie("603", "The Matrix", 1999);
        assert!(matches!(t.render_media(&m), Err(ScrapeError::NotFound(_))));
        let m = m.with_imdb_id("tt0133093");
        assert_eq!(t.render_media(&m).unwrap(), "https://api.example/tt0133093");
    }

    #[test]
    fn test_embed_url_encoding() {
        let t = UrlTemplate::parse("https://resolve.example/?u={url}", Scope::Embed).unwrap();
        assert_eq!(
            t.render_url("https://host/a b").unwrap(),
            "https://resolve.example/?u=https%3A%2F%2Fhost%2Fa%20b"
        );
        let raw = UrlTemplate::parse("{raw_url}", Scope::Embed).unwrap();
        assert_eq!(raw.render_url("https://host/x.m3u8").unwrap(), "https://host/x.m3u8");
    }

    #[test]
    fn test_parse_rejects_bad_templates() {
        for (tpl, scope) in [
            ("https://a/{nope}", Scope::Movie),
            ("https://a/{season}", Scope::Movie),
            ("https://a/{url}", Scope::Show),
            ("https://a/{tmdb_id", Scope::Movie),
            ("https://a/}", Scope::Movie),
            ("/relative/{tmdb_id}", Scope::Movie),
        ] {
            assert!(
                matches!(UrlTemplate::parse(tpl, scope), Err(ConfigError::InvalidTemplate { .. })),
                "{tpl} should be rejected"
            );
        }
    }
}
