pub mod builtin;
pub mod config;
pub mod host;
pub mod plugin;
pub mod template;

use std::collections::HashSet;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info};

use crate::errors::{ConfigError, ProviderList};
use crate::media::MediaKind;

pub use host::{EmbedContext, Host, ProgressFn, ScrapeContext};
pub use plugin::{
    make_embed, make_sourcerer, Embed, EmbedConfig, EmbedOutput, EmbedRef, EmbedScraper, SourceScraper, Sourcerer,
    SourcererConfig, SourcererOutput,
};

/// Listing entry for a registered provider.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    pub id: String,
    pub name: String,
    pub rank: i32,
    pub disabled: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub media_kinds: Vec<MediaKind>,
}

/// All known sources and embeds. Built once, read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    sources: Vec<Sourcerer>,
    embeds: Vec<Embed>,
}

fn check_unique<'a>(list: ProviderList, ids: impl Iterator<Item = &'a str>) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(ConfigError::DuplicateId { list, id: id.to_string() });
        }
    }
    Ok(())
}

impl Registry {
    /// Fails when two enabled sources (or two enabled embeds) share an id.
    pub fn new(sources: Vec<Sourcerer>, embeds: Vec<Embed>) -> Result<Self, ConfigError> {
        check_unique(ProviderList::Sources, sources.iter().filter(|s| !s.disabled()).map(|s| s.id()))?;
        check_unique(ProviderList::Embeds, embeds.iter().filter(|e| !e.disabled()).map(|e| e.id()))?;
        Ok(Self { sources, embeds })
    }

    /// Registry holding only the `direct-hls` and `direct-mp4` embeds.
    pub fn with_builtins() -> Result<Self, ConfigError> {
        Self::new(Vec::new(), builtin::builtin_embeds()?)
    }

    pub fn extend(&mut self, sources: Vec<Sourcerer>, embeds: Vec<Embed>) -> Result<(), ConfigError> {
        let mut all_sources = self.sources.clone();
        all_sources.extend(sources);
        let mut all_embeds = self.embeds.clone();
        all_embeds.extend(embeds);
        *self = Self::new(all_sources, all_embeds)?;
        Ok(())
    }

    /// Load every `*.toml` provider file in `dir`, in file name order. A
    /// missing directory is not an error; a malformed file is, and leaves the
    /// registry as it was.
    pub fn load_providers_from_directory(&mut self, dir: &Path) -> Result<usize, ConfigError> {
        if !dir.exists() {
            debug!(dir = %dir.display(), "providers directory does not exist");
            return Ok(0);
        }
        let io_err = |source: std::io::Error| ConfigError::Io { path: dir.display().to_string(), source };
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if path.extension().and_then(|s| s.to_str()) == Some("toml") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut staged = self.clone();
        let mut loaded = 0;
        for path in paths {
            let (sources, embeds) = config::ProvidersFile::load(&path)?.into_providers()?;
            let count = sources.len() + embeds.len();
            staged.extend(sources, embeds)?;
            info!(path = %path.display(), count, "loaded providers");
            loaded += count;
        }
        *self = staged;
        Ok(loaded)
    }

    /// Every registered source, including disabled ones, in registration order.
    pub fn gather_all_sources(&self) -> &[Sourcerer] {
        &self.sources
    }

    pub fn gather_all_embeds(&self) -> &[Embed] {
        &self.embeds
    }

    /// Enabled sources supporting `kind`, highest rank first. Ties keep
    /// registration order.
    pub fn dispatch_order(&self, kind: MediaKind) -> Vec<&Sourcerer> {
        let mut order: Vec<&Sourcerer> =
            self.sources.iter().filter(|s| !s.disabled() && s.supports(kind)).collect();
        order.sort_by(|a, b| b.rank().cmp(&a.rank()));
        order
    }

    pub fn find_source(&self, id: &str) -> Option<&Sourcerer> {
        self.sources.iter().find(|s| !s.disabled() && s.id() == id)
    }

    /// Enabled embed with this id.
    pub fn find_embed(&self, id: &str) -> Option<&Embed> {
        self.embeds.iter().find(|e| !e.disabled() && e.id() == id)
    }

    pub fn list_sources(&self) -> Vec<ProviderInfo> {
        let mut list: Vec<ProviderInfo> = self
            .sources
            .iter()
            .map(|s| ProviderInfo {
                id: s.id().to_string(),
                name: s.name().to_string(),
                rank: s.rank(),
                disabled: s.disabled(),
                media_kinds: s.media_kinds().to_vec(),
            })
            .collect();
        list.sort_by(|a, b| b.rank.cmp(&a.rank));
        list
    }

    pub fn list_embeds(&self) -> Vec<ProviderInfo> {
        let mut list: Vec<ProviderInfo> = self
            .embeds
            .iter()
            .map(|e| ProviderInfo {
                id: e.id().to_string(),
                name: e.name().to_string(),
                rank: e.rank(),
                disabled: e.disabled(),
                media_kinds: Vec::new(),
            })
            .collect();
        list.sort_by(|a, b| b.rank.cmp(&a.rank));
        list
    }
}
