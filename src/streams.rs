use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

/// Capability flags attached to a provider or a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Flag {
    /// The origin answers cross-origin requests; no proxy needed.
    CorsAllowed,
    /// The URL only works from the IP that resolved it.
    IpLocked,
}

pub type Flags = BTreeSet<Flag>;

impl FromStr for Flag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "cors-allowed" => Ok(Flag::CorsAllowed),
            "ip-locked" => Ok(Flag::IpLocked),
            other => Err(format!("unknown flag `{other}` (expected cors-allowed, ip-locked)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptionType {
    Vtt,
    Srt,
}

impl CaptionType {
    /// Guess the caption format from the URL path extension.
    pub fn from_url(url: &str) -> Option<Self> {
        let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
        if path.ends_with(".vtt") {
            Some(CaptionType::Vtt)
        } else if path.ends_with(".srt") {
            Some(CaptionType::Srt)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Caption {
    pub id: String,
    pub url: String,
    #[serde(rename = "type")]
    pub kind: CaptionType,
    /// ISO-639-1 code or `"unknown"`.
    pub language: String,
    pub has_cors_restrictions: bool,
}

impl Caption {
    pub fn new(id: impl Into<String>, url: impl Into<String>, kind: CaptionType, language: &str) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            kind,
            language: normalize_language(language),
            has_cors_restrictions: false,
        }
    }
}

// Display names providers commonly hand back instead of codes.
const LANGUAGE_NAMES: &[(&str, &str)] = &[
    ("english", "en"),
    ("spanish", "es"),
    ("french", "fr"),
    ("german", "de"),
    ("italian", "it"),
    ("portuguese", "pt"),
    ("russian", "ru"),
    ("arabic", "ar"),
    ("hindi", "hi"),
    ("bengali", "bn"),
    ("tamil", "ta"),
    ("telugu", "te"),
    ("japanese", "ja"),
    ("korean", "ko"),
    ("chinese", "zh"),
    ("dutch", "nl"),
    ("polish", "pl"),
    ("turkish", "tr"),
    ("swedish", "sv"),
    ("greek", "el"),
    ("hebrew", "he"),
    ("indonesian", "id"),
    ("vietnamese", "vi"),
    ("thai", "th"),
];

/// Map a language label (`"en"`, `"en-US"`, `"English"`) to an ISO-639-1 code, or `"unknown"`.
pub fn normalize_language(label: &str) -> String {
    let l = label.trim().to_ascii_lowercase();
    let primary = l.split(['-', '_']).next().unwrap_or("");
    if primary.len() == 2 && primary.chars().all(|c| c.is_ascii_lowercase()) {
        return primary.to_string();
    }
    let word = l.split_whitespace().next().unwrap_or("");
    LANGUAGE_NAMES
        .iter()
        .find(|(name, _)| *name == word)
        .map(|(_, code)| code.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Variant label for file streams, ordered lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Quality {
    #[serde(rename = "unknown")]
    Unknown,
    #[serde(rename = "360")]
    P360,
    #[serde(rename = "480")]
    P480,
    #[serde(rename = "720")]
    P720,
    #[serde(rename = "1080")]
    P1080,
    #[serde(rename = "4k")]
    P4k,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Unknown => "unknown",
            Quality::P360 => "360",
            Quality::P480 => "480",
            Quality::P720 => "720",
            Quality::P1080 => "1080",
            Quality::P4k => "4k",
        }
    }
}

impl FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim().to_ascii_lowercase();
        let t = t.strip_suffix('p').unwrap_or(&t);
        match t {
            "unknown" | "" | "auto" | "original" => Ok(Quality::Unknown),
            "360" => Ok(Quality::P360),
            "480" => Ok(Quality::P480),
            "720" => Ok(Quality::P720),
            "1080" => Ok(Quality::P1080),
            "4k" | "2160" | "uhd" => Ok(Quality::P4k),
            other => Err(format!("unknown quality `{other}`")),
        }
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Mp4,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFile {
    #[serde(rename = "type")]
    pub kind: FileType,
    pub url: String,
}

impl StreamFile {
    pub fn mp4(url: impl Into<String>) -> Self {
        Self { kind: FileType::Mp4, url: url.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HlsStream {
    pub id: String,
    pub playlist: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub captions: Vec<Caption>,
    #[serde(default)]
    pub flags: Flags,
    /// Nested playlist levels the proxy should follow (0, 1 or 2).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_depth: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStream {
    pub id: String,
    pub qualities: BTreeMap<Quality, StreamFile>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub captions: Vec<Caption>,
    #[serde(default)]
    pub flags: Flags,
}

impl FileStream {
    /// Remove quality entries without a url.
    pub fn prune_empty(&mut self) {
        self.qualities.retain(|_, f| !f.url.trim().is_empty());
    }

    /// Highest quality entry with a usable url.
    pub fn best(&self) -> Option<(Quality, &StreamFile)> {
        self.qualities
            .iter()
            .rev()
            .find(|(_, f)| !f.url.trim().is_empty())
            .map(|(q, f)| (*q, f))
    }
}

/// A playable result. Exactly one of `playlist` (hls) or `qualities` (file) exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Stream {
    Hls(HlsStream),
    File(FileStream),
}

impl Stream {
    pub fn hls(id: impl Into<String>, playlist: impl Into<String>) -> Self {
        Stream::Hls(HlsStream {
            id: id.into(),
            playlist: playlist.into(),
            headers: BTreeMap::new(),
            captions: Vec::new(),
            flags: Flags::new(),
            proxy_depth: None,
        })
    }

    pub fn file(id: impl Into<String>, qualities: impl IntoIterator<Item = (Quality, StreamFile)>) -> Self {
        Stream::File(FileStream {
            id: id.into(),
            qualities: qualities.into_iter().collect(),
            headers: BTreeMap::new(),
            captions: Vec::new(),
            flags: Flags::new(),
        })
    }

    pub fn with_flags(mut self, flags: impl IntoIterator<Item = Flag>) -> Self {
        *self.flags_mut() = flags.into_iter().collect();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers_mut().insert(name.into(), value.into());
        self
    }

    pub fn with_captions(mut self, captions: Vec<Caption>) -> Self {
        *self.captions_mut() = captions;
        self
    }

    pub fn id(&self) -> &str {
        match self {
            Stream::Hls(s) => &s.id,
            Stream::File(s) => &s.id,
        }
    }

    pub fn flags(&self) -> &Flags {
        match self {
            Stream::Hls(s) => &s.flags,
            Stream::File(s) => &s.flags,
        }
    }

    pub fn flags_mut(&mut self) -> &mut Flags {
        match self {
            Stream::Hls(s) => &mut s.flags,
            Stream::File(s) => &mut s.flags,
        }
    }

    pub fn has_flag(&self, flag: Flag) -> bool {
        self.flags().contains(&flag)
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        match self {
            Stream::Hls(s) => &s.headers,
            Stream::File(s) => &s.headers,
        }
    }

    pub fn headers_mut(&mut self) -> &mut BTreeMap<String, String> {
        match self {
            Stream::Hls(s) => &mut s.headers,
            Stream::File(s) => &mut s.headers,
        }
    }

    pub fn captions(&self) -> &[Caption] {
        match self {
            Stream::Hls(s) => &s.captions,
            Stream::File(s) => &s.captions,
        }
    }

    pub fn captions_mut(&mut self) -> &mut Vec<Caption> {
        match self {
            Stream::Hls(s) => &mut s.captions,
            Stream::File(s) => &mut s.captions,
        }
    }

    /// Hls needs a playlist; file needs at least one quality with a url.
    pub fn is_playable(&self) -> bool {
        match self {
            Stream::Hls(s) => !s.playlist.trim().is_empty(),
            Stream::File(s) => s.best().is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_ordering() {
        assert!(Quality::Unknown < Quality::P360);
        assert!(Quality::P1080 < Quality::P4k);
        assert_eq!("1080p".parse::<Quality>().unwrap(), Quality::P1080);
        assert_eq!("2160".parse::<Quality>().unwrap(), Quality::P4k);
        assert!("999".parse::<Quality>().is_err());
    }

    #[test]
    fn test_file_stream_json() {
        let s = Stream::file(
            "primary",
            [
                (Quality::P720, StreamFile::mp4("https://a/720.mp4")),
                (Quality::P1080, StreamFile::mp4("https://a/1080.mp4")),
            ],
        )
        .with_flags([Flag::CorsAllowed]);
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(v["type"], "file");
        assert_eq!(v["qualities"]["720"]["url"], "https://a/720.mp4");
        assert_eq!(v["qualities"]["1080"]["type"], "mp4");
        assert_eq!(v["flags"][0], "cors-allowed");
        let back: Stream = serde_json::from_value(v).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn test_hls_json() {
        let s: Stream = serde_json::from_str(
            r#"{"type":"hls","id":"x","playlist":"https://a/master.m3u8",
                "headers":{"Referer":"https://a/"},"captions":[],"flags":["ip-locked"],"proxyDepth":2}"#,
        )
        .unwrap();
        let Stream::Hls(h) = &s else { panic!("expected hls") };
        assert_eq!(h.proxy_depth, Some(2));
        assert!(s.has_flag(Flag::IpLocked));
        assert_eq!(s.headers().get("Referer").map(String::as_str), Some("https://a/"));
    }

    #[test]
    fn test_playable() {
        assert!(Stream::hls("a", "https://a/x.m3u8").is_playable());
        assert!(!Stream::hls("a", " ").is_playable());
        assert!(!Stream::file("a", []).is_playable());
        assert!(!Stream::file("a", [(Quality::P720, StreamFile::mp4(""))]).is_playable());
        let s = Stream::file(
            "a",
            [(Quality::P720, StreamFile::mp4("")), (Quality::Unknown, StreamFile::mp4("https://a/x.mp4"))],
        );
        let Stream::File(f) = &s else { unreachable!() };
        assert_eq!(f.best().map(|(q, _)| q), Some(Quality::Unknown));
        assert!(s.is_playable());
    }

    #[test]
    fn test_caption_helpers() {
        assert_eq!(CaptionType::from_url("https://a/b.VTT?x=1"), Some(CaptionType::Vtt));
        assert_eq!(CaptionType::from_url("https://a/b.srt"), Some(CaptionType::Srt));
        assert_eq!(CaptionType::from_url("https://a/b"), None);
        assert_eq!(normalize_language("en-US"), "en");
        assert_eq!(normalize_language("English"), "en");
        assert_eq!(normalize_language("Portuguese (Brazil)"), "pt");
        assert_eq!(normalize_language("Klingon"), "unknown");
        let c = Caption::new("1", "https://a/b.srt", CaptionType::Srt, "French");
        assert_eq!(c.language, "fr");
        assert!(!c.has_cors_restrictions);
    }

    #[test]
    fn test_flag_parse() {
        assert_eq!("CORS_ALLOWED".parse::<Flag>().unwrap(), Flag::CorsAllowed);
        assert_eq!("ip-locked".parse::<Flag>().unwrap(), Flag::IpLocked);
        assert!("nope".parse::<Flag>().is_err());
    }
}
