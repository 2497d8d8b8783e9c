//! Stream proxy rewriting.
//!
//! Streams whose origin blocks cross-origin playback (or that need custom
//! request headers) are rewritten to go through a proxy server. Two wire
//! shapes are produced, both consumed by already deployed proxies:
//!
//! * `{proxy_url}?payload=<base64url JSON {headers, options, type, url}>`
//! * `{m3u8_proxy_url}/m3u8-proxy?url=<uri component>&headers=<uri component JSON>`

use std::collections::BTreeMap;
use std::sync::{LazyLock, RwLock};

use base64::alphabet;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::{NoExpand, Regex};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::streams::{Flag, Flags, Stream};

pub const DEFAULT_PROXY_URL: &str = "https://proxy.nsbx.ru/proxy";
pub const DEFAULT_M3U8_PROXY_URL: &str = "https://proxy.fifthwit.net";

// Same set `encodeURIComponent` leaves untouched.
pub(crate) const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

const LENIENT_STANDARD: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);
const LENIENT_URL_SAFE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

static M3U8_PROXY_ORIGIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https://[^/]+/m3u8-proxy").expect("static regex"));
static ORBIT_PROXY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"orbitproxy\.[^/]+/").expect("static regex"));

// Process-wide m3u8 proxy base; set during configuration only.
static CONFIGURED_M3U8_PROXY_URL: RwLock<Option<String>> = RwLock::new(None);

/// Replace the process-wide m3u8 proxy base used by [`ProxyConfig::current`].
pub fn set_m3u8_proxy_url(proxy_url: &str) {
    let mut guard = CONFIGURED_M3U8_PROXY_URL.write().unwrap_or_else(|e| e.into_inner());
    *guard = Some(proxy_url.trim_end_matches('/').to_string());
}

/// The process-wide m3u8 proxy base, or the built-in default.
pub fn m3u8_proxy_url() -> String {
    let guard = CONFIGURED_M3U8_PROXY_URL.read().unwrap_or_else(|e| e.into_inner());
    guard.clone().unwrap_or_else(|| DEFAULT_M3U8_PROXY_URL.to_string())
}

/// True when the stream cannot be played directly by a browser-like client.
pub fn requires_proxy(stream: &Stream) -> bool {
    !stream.has_flag(Flag::CorsAllowed) || !stream.headers().is_empty()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    Hls,
    Mp4,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<u8>,
}

/// JSON carried in the `payload` query parameter. Field order is part of the wire format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub options: ProxyOptions,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<PayloadKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("url has no `payload` parameter")]
    Missing,
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("payload is not base64url: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("payload is not JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Recover the payload from a url produced by [`ProxyConfig::setup_proxy`].
pub fn decode_proxy_payload(proxied: &str) -> Result<ProxyPayload, PayloadError> {
    let url = url::Url::parse(proxied)?;
    let encoded = url
        .query_pairs()
        .find(|(k, _)| k == "payload")
        .map(|(_, v)| v.into_owned())
        .ok_or(PayloadError::Missing)?;
    let raw = URL_SAFE_NO_PAD.decode(encoded.as_bytes())?;
    Ok(serde_json::from_slice(&raw)?)
}

/// Proxy endpoints used by the rewriter. Passed explicitly to whoever rewrites streams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub proxy_url: String,
    pub m3u8_proxy_url: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            proxy_url: DEFAULT_PROXY_URL.to_string(),
            m3u8_proxy_url: DEFAULT_M3U8_PROXY_URL.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OrbitToken {
    u: String,
    #[serde(default)]
    r: Option<String>,
}

impl ProxyConfig {
    pub fn new(proxy_url: impl Into<String>, m3u8_proxy_url: impl Into<String>) -> Self {
        Self {
            proxy_url: proxy_url.into(),
            m3u8_proxy_url: m3u8_proxy_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Defaults plus whatever [`set_m3u8_proxy_url`] configured for the process.
    pub fn current() -> Self {
        Self { m3u8_proxy_url: m3u8_proxy_url(), ..Self::default() }
    }

    /// Route the stream through the payload proxy. Headers move into the
    /// payload; the result carries no headers and only `CORS_ALLOWED`.
    /// File qualities without a url are dropped.
    pub fn setup_proxy(&self, mut stream: Stream) -> Stream {
        let headers = Some(stream.headers().clone()).filter(|h| !h.is_empty());
        match &mut stream {
            Stream::Hls(hls) => {
                let payload = ProxyPayload {
                    headers,
                    options: ProxyOptions { depth: Some(hls.proxy_depth.unwrap_or(0).min(2)) },
                    kind: Some(PayloadKind::Hls),
                    url: Some(hls.playlist.clone()),
                };
                hls.playlist = self.payload_url(&payload);
            }
            Stream::File(file) => {
                let mut payload = ProxyPayload {
                    headers,
                    options: ProxyOptions::default(),
                    kind: Some(PayloadKind::Mp4),
                    url: None,
                };
                file.prune_empty();
                for entry in file.qualities.values_mut() {
                    payload.url = Some(entry.url.clone());
                    entry.url = self.payload_url(&payload);
                }
            }
        }
        stream.headers_mut().clear();
        *stream.flags_mut() = Flags::from([Flag::CorsAllowed]);
        stream
    }

    fn payload_url(&self, payload: &ProxyPayload) -> String {
        // String-keyed maps and plain fields only; serialization cannot fail.
        let json = serde_json::to_string(payload).unwrap_or_default();
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("payload", &URL_SAFE_NO_PAD.encode(json))
            .finish();
        format!("{}?{}", self.proxy_url, query)
    }

    /// Playlist-only proxy link understood by m3u8 proxy deployments.
    pub fn create_m3u8_proxy_url(&self, url: &str, headers: &BTreeMap<String, String>) -> String {
        let headers_json = serde_json::to_string(headers).unwrap_or_else(|_| "{}".to_string());
        format!(
            "{}/m3u8-proxy?url={}&headers={}",
            self.m3u8_proxy_url,
            utf8_percent_encode(url, URI_COMPONENT),
            utf8_percent_encode(&headers_json, URI_COMPONENT),
        )
    }

    /// Point an existing m3u8 proxy link at the configured proxy origin.
    pub fn update_m3u8_proxy_url(&self, url: &str) -> String {
        if !url.contains("/m3u8-proxy?url=") {
            return url.to_string();
        }
        let replacement = format!("{}/m3u8-proxy", self.m3u8_proxy_url);
        M3U8_PROXY_ORIGIN.replacen(url, 1, NoExpand(&replacement)).into_owned()
    }

    /// Undo a third-party redirect wrapper and re-wrap the target with our own
    /// m3u8 proxy. Unrecognized urls only get their proxy origin updated.
    pub fn unwrap_proxied_url(&self, url: &str) -> String {
        if url.contains("orbitproxy") {
            match decode_orbit_token(url) {
                Some(token) => {
                    let mut headers = BTreeMap::new();
                    headers.insert("referer".to_string(), token.r.unwrap_or_default());
                    return self.create_m3u8_proxy_url(&token.u, &headers);
                }
                None => warn!(url, "could not decode orbitproxy url"),
            }
        }
        self.update_m3u8_proxy_url(url)
    }
}

fn decode_orbit_token(url: &str) -> Option<OrbitToken> {
    let mut parts = ORBIT_PROXY.splitn(url, 2);
    parts.next()?;
    let tail = parts.next()?;
    let token = tail.split(".m3u8").next()?;
    let raw = LENIENT_STANDARD
        .decode(token)
        .or_else(|_| LENIENT_URL_SAFE.decode(token))
        .ok()?;
    serde_json::from_slice(&raw).ok()
}
