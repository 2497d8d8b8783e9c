//! Error types shared by providers, the registry and the dispatcher.

use std::time::Duration;

use thiserror::Error;

use crate::media::MediaKind;

/// Failure of a single provider call. Every variant is recoverable: the
/// dispatcher records it and moves on to the next candidate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScrapeError {
    /// The provider has nothing for this title or episode.
    #[error("not found: {0}")]
    NotFound(String),

    /// The call exceeded its time budget and was cancelled.
    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Upstream returned data the provider could not decode.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Transport failure or unexpected HTTP status.
    #[error("network error: {0}")]
    Network(String),

    /// The provider does not handle this media kind.
    #[error("unsupported media kind: {0}")]
    Unsupported(MediaKind),
}

impl ScrapeError {
    pub fn not_found(reason: impl Into<String>) -> Self {
        ScrapeError::NotFound(reason.into())
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        ScrapeError::MalformedResponse(reason.into())
    }

    /// Routine "nothing here" outcomes, as opposed to actual failures.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ScrapeError::NotFound(_) | ScrapeError::Unsupported(_))
    }
}

impl From<reqwest::Error> for ScrapeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ScrapeError::MalformedResponse(e.to_string())
        } else if e.is_timeout() {
            ScrapeError::Network(format!("request timed out: {e}"))
        } else {
            ScrapeError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ScrapeError {
    fn from(e: serde_json::Error) -> Self {
        ScrapeError::MalformedResponse(e.to_string())
    }
}

/// Which descriptor list a configuration error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderList {
    Sources,
    Embeds,
}

impl std::fmt::Display for ProviderList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderList::Sources => f.write_str("source"),
            ProviderList::Embeds => f.write_str("embed"),
        }
    }
}

/// Invalid provider descriptor or configuration. Raised while the registry
/// is being built, never during a dispatch.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("provider field `{field}` must not be empty")]
    EmptyField { field: &'static str },

    #[error("provider `{id}` has no scraper")]
    MissingScraper { id: String },

    #[error("source `{id}` supports neither movies nor shows")]
    NoMediaKinds { id: String },

    #[error("duplicate {list} id `{id}`")]
    DuplicateId { list: ProviderList, id: String },

    #[error("provider `{id}`: {reason}")]
    Invalid { id: String, reason: String },

    #[error("invalid url template `{template}`: {reason}")]
    InvalidTemplate { template: String, reason: String },

    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing {path}: {source}")]
    Toml {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// One recorded failure during a dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFailure {
    pub source_id: String,
    /// Set when the failure came from an embed offered by `source_id`.
    pub embed_id: Option<String>,
    pub error: ScrapeError,
}

impl std::fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.embed_id {
            Some(embed) => write!(f, "{} -> {}: {}", self.source_id, embed, self.error),
            None => write!(f, "{}: {}", self.source_id, self.error),
        }
    }
}

/// Every candidate was exhausted without a playable stream.
#[derive(Debug, Clone, Error)]
#[error("no stream found ({} provider failures recorded)", .failures.len())]
pub struct NoStreamFound {
    pub failures: Vec<ProviderFailure>,
}

impl NoStreamFound {
    /// Failures raised by sourcerers themselves, excluding embed failures.
    pub fn source_failures(&self) -> impl Iterator<Item = &ProviderFailure> {
        self.failures.iter().filter(|f| f.embed_id.is_none())
    }
}
