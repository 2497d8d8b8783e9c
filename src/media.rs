use serde::{Deserialize, Serialize};

/// Which kind of title a request targets. Sourcerers declare the kinds they support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Movie,
    Show,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Show => "show",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Numbered {
    pub number: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovieRequest {
    pub tmdb_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imdb_id: Option<String>,
    pub title: String,
    pub release_year: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowRequest {
    pub tmdb_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imdb_id: Option<String>,
    pub title: String,
    pub release_year: u16,
    pub season: Numbered,
    pub episode: Numbered,
}

/// A single scrape target. Immutable for the duration of a dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MediaRequest {
    Movie(MovieRequest),
    Show(ShowRequest),
}

impl MediaRequest {
    pub fn movie(tmdb_id: impl Into<String>, title: impl Into<String>, release_year: u16) -> Self {
        MediaRequest::Movie(MovieRequest {
            tmdb_id: tmdb_id.into(),
            imdb_id: None,
            title: title.into(),
            release_year,
        })
    }

    pub fn show(
        tmdb_id: impl Into<String>,
        title: impl Into<String>,
        release_year: u16,
        season: u32,
        episode: u32,
    ) -> Self {
        MediaRequest::Show(ShowRequest {
            tmdb_id: tmdb_id.into(),
            imdb_id: None,
            title: title.into(),
            release_year,
            season: Numbered { number: season },
            episode: Numbered { number: episode },
        })
    }

    pub fn with_imdb_id(mut self, imdb_id: impl Into<String>) -> Self {
        let id = Some(imdb_id.into());
        match &mut self {
            MediaRequest::Movie(m) => m.imdb_id = id,
            MediaRequest::Show(s) => s.imdb_id = id,
        }
        self
    }

    pub fn kind(&self) -> MediaKind {
        match self {
            MediaRequest::Movie(_) => MediaKind::Movie,
            MediaRequest::Show(_) => MediaKind::Show,
        }
    }

    pub fn tmdb_id(&self) -> &str {
        match self {
            MediaRequest::Movie(m) => &m.tmdb_id,
            MediaRequest::Show(s) => &s.tmdb_id,
        }
    }

    pub fn imdb_id(&self) -> Option<&str> {
        match self {
            MediaRequest::Movie(m) => m.imdb_id.as_deref(),
            MediaRequest::Show(s) => s.imdb_id.as_deref(),
        }
    }

    pub fn title(&self) -> &str {
        match self {
            MediaRequest::Movie(m) => &m.title,
            MediaRequest::Show(s) => &s.title,
        }
    }

    pub fn release_year(&self) -> u16 {
        match self {
            MediaRequest::Movie(m) => m.release_year,
            MediaRequest::Show(s) => s.release_year,
        }
    }

    /// `(season, episode)` for shows, `None` for movies.
    pub fn episode(&self) -> Option<(u32, u32)> {
        match self {
            MediaRequest::Movie(_) => None,
            MediaRequest::Show(s) => Some((s.season.number, s.episode.number)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_movie_json_shape() {
        let m = MediaRequest::movie("603", "The Matrix", 1999).with_imdb_id("tt0133093");
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["type"], "movie");
        assert_eq!(v["tmdbId"], "603");
        assert_eq!(v["imdbId"], "tt0133093");
        assert_eq!(v["releaseYear"], 1999);
    }

    #[test]
    fn test_show_accessors() {
        let s: MediaRequest = serde_json::from_str(
            r#"{"type":"show","tmdbId":"1399","title":"Game of Thrones","releaseYear":2011,
                "season":{"number":1},"episode":{"number":2}}"#,
        )
        .unwrap();
        assert_eq!(s.kind(), MediaKind::Show);
        assert_eq!(s.episode(), Some((1, 2)));
        assert_eq!(s.imdb_id(), None);
        assert_eq!(s.title(), "Game of Thrones");
    }
}
