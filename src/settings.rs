use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::aggregator::DispatchOptions;
use crate::proxy::{ProxyConfig, DEFAULT_M3U8_PROXY_URL, DEFAULT_PROXY_URL};

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

/// Runtime configuration: defaults, then `config.toml`, then `SOURCERY_*` variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub source_timeout_ms: u64,
    pub embed_timeout_ms: u64,
    pub proxy_url: String,
    pub m3u8_proxy_url: String,
    /// Target of the proxied fetcher. Unset means proxied fetches go direct.
    pub fetch_proxy_url: Option<String>,
    pub proxy_streams: bool,
    pub external_captions: bool,
    pub providers_dir: Option<PathBuf>,
    pub user_agent: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            source_timeout_ms: 20_000,
            embed_timeout_ms: 20_000,
            proxy_url: DEFAULT_PROXY_URL.to_string(),
            m3u8_proxy_url: DEFAULT_M3U8_PROXY_URL.to_string(),
            fetch_proxy_url: None,
            proxy_streams: true,
            external_captions: false,
            providers_dir: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "sourcery", "sourcery")
}

impl Settings {
    /// `config.toml` in the platform config directory.
    pub fn default_config_path() -> Option<PathBuf> {
        project_dirs().map(|p| p.config_dir().join("config.toml"))
    }

    /// `providers/` next to the default config file.
    pub fn default_providers_dir() -> Option<PathBuf> {
        project_dirs().map(|p| p.config_dir().join("providers"))
    }

    /// Load settings. An explicit `path` must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(p) => Self::from_file(p)?,
            None => match Self::default_config_path().filter(|p| p.exists()) {
                Some(p) => Self::from_file(&p)?,
                None => Self::default(),
            },
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading settings: {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing settings: {}", path.display()))
    }

    /// Apply `SOURCERY_*` overrides read through `var`.
    pub fn apply_env<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = var("SOURCERY_SOURCE_TIMEOUT_MS") {
            self.source_timeout_ms = v.trim().parse().context("SOURCERY_SOURCE_TIMEOUT_MS must be milliseconds")?;
        }
        if let Some(v) = var("SOURCERY_EMBED_TIMEOUT_MS") {
            self.embed_timeout_ms = v.trim().parse().context("SOURCERY_EMBED_TIMEOUT_MS must be milliseconds")?;
        }
        if let Some(v) = var("SOURCERY_PROXY_URL") {
            self.proxy_url = v;
        }
        if let Some(v) = var("SOURCERY_M3U8_PROXY_URL") {
            self.m3u8_proxy_url = v;
        }
        if let Some(v) = var("SOURCERY_FETCH_PROXY_URL") {
            self.fetch_proxy_url = Some(v).filter(|s| !s.trim().is_empty());
        }
        if let Some(v) = var("SOURCERY_PROVIDERS_DIR") {
            self.providers_dir = Some(PathBuf::from(v));
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.source_timeout_ms > 0, "source_timeout_ms must be greater than zero");
        anyhow::ensure!(self.embed_timeout_ms > 0, "embed_timeout_ms must be greater than zero");
        url::Url::parse(&self.proxy_url).with_context(|| format!("invalid proxy_url `{}`", self.proxy_url))?;
        url::Url::parse(&self.m3u8_proxy_url)
            .with_context(|| format!("invalid m3u8_proxy_url `{}`", self.m3u8_proxy_url))?;
        Ok(())
    }

    pub fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions {
            source_timeout: Duration::from_millis(self.source_timeout_ms),
            embed_timeout: Duration::from_millis(self.embed_timeout_ms),
            proxy_streams: self.proxy_streams,
        }
    }

    pub fn proxy_config(&self) -> ProxyConfig {
        ProxyConfig::new(self.proxy_url.clone(), self.m3u8_proxy_url.clone())
    }

    /// Configured providers directory, or the platform default.
    pub fn resolved_providers_dir(&self) -> Option<PathBuf> {
        self.providers_dir.clone().or_else(Self::default_providers_dir)
    }
}
