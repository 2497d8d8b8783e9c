//! Network capability handed to providers through their scrape context.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use url::Url;

use crate::errors::ScrapeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Get,
    Post,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub method: Method,
    pub headers: BTreeMap<String, String>,
    pub query: Vec<(String, String)>,
    pub body: Option<String>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self { url: url.into(), ..Default::default() }
    }

    pub fn post(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self { url: url.into(), method: Method::Post, body: Some(body.into()), ..Default::default() }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// The target url with `query` appended.
    pub fn full_url(&self) -> Result<Url, ScrapeError> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| ScrapeError::Network(format!("invalid url `{}`: {e}", self.url)))?;
        if !self.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in &self.query {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub final_url: String,
    /// Lowercased header names; repeated headers are joined with `", "`.
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 404 becomes `NotFound`, any other non-2xx becomes `Network`.
    pub fn error_for_status(self) -> Result<Self, ScrapeError> {
        match self.status {
            200..=299 => Ok(self),
            404 => Err(ScrapeError::NotFound(format!("{} returned 404", self.final_url))),
            s => Err(ScrapeError::Network(format!("{} returned HTTP {s}", self.final_url))),
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ScrapeError> {
        serde_json::from_str(&self.body).map_err(|e| {
            ScrapeError::MalformedResponse(format!("decoding body from {}: {e}", self.final_url))
        })
    }
}

/// Performs HTTP requests for providers. Dropping the returned future cancels the request.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, req: FetchRequest) -> Result<FetchResponse, ScrapeError>;
}

/// Plain fetcher backed by reqwest.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().user_agent(user_agent).build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, req: FetchRequest) -> Result<FetchResponse, ScrapeError> {
        let url = req.full_url()?;
        let mut builder = match req.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
        };
        for (k, v) in &req.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }
        if let Some(body) = req.body {
            builder = builder.body(body);
        }
        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in resp.headers() {
            let Ok(value) = value.to_str() else { continue };
            headers
                .entry(name.as_str().to_ascii_lowercase())
                .and_modify(|v| {
                    v.push_str(", ");
                    v.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }
        let body = resp.text().await?;
        Ok(FetchResponse { status, final_url, headers, body })
    }
}

/// Routes requests through a CORS-bypass fetch proxy as
/// `{proxy_url}?destination=<target>`. Without a proxy url it fetches directly.
#[derive(Clone)]
pub struct ProxiedFetcher {
    inner: Arc<dyn Fetcher>,
    proxy_url: Option<String>,
}

impl ProxiedFetcher {
    pub fn new(inner: Arc<dyn Fetcher>, proxy_url: Option<String>) -> Self {
        let proxy_url = proxy_url.map(|p| p.trim().to_string()).filter(|p| !p.is_empty());
        Self { inner, proxy_url }
    }

    pub fn rewrite(&self, req: FetchRequest) -> Result<FetchRequest, ScrapeError> {
        let Some(proxy) = &self.proxy_url else { return Ok(req) };
        let target = req.full_url()?;
        Ok(FetchRequest {
            url: proxy.clone(),
            method: req.method,
            headers: req.headers,
            query: vec![("destination".to_string(), target.to_string())],
            body: req.body,
        })
    }
}

#[async_trait]
impl Fetcher for ProxiedFetcher {
    async fn fetch(&self, req: FetchRequest) -> Result<FetchResponse, ScrapeError> {
        let req = self.rewrite(req)?;
        self.inner.fetch(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Fetcher for Recorder {
        async fn fetch(&self, req: FetchRequest) -> Result<FetchResponse, ScrapeError> {
            let url = req.full_url()?.to_string();
            self.seen.lock().unwrap().push(url.clone());
            Ok(FetchResponse { status: 200, final_url: url, body: "{\"ok\":true}".into(), ..Default::default() })
        }
    }

    #[test]
    fn test_full_url_appends_query() {
        let req = FetchRequest::get("https://api.example.com/search?a=1").query("q", "the matrix");
        assert_eq!(req.full_url().unwrap().as_str(), "https://api.example.com/search?a=1&q=the+matrix");
        assert!(FetchRequest::get("not a url").full_url().is_err());
    }

    #[test]
    fn test_error_for_status() {
        let ok = FetchResponse { status: 204, ..Default::default() };
        assert!(ok.error_for_status().is_ok());
        let nf = FetchResponse { status: 404, final_url: "u".into(), ..Default::default() };
        assert!(matches!(nf.error_for_status(), Err(ScrapeError::NotFound(_))));
        let bad = FetchResponse { status: 503, final_url: "u".into(), ..Default::default() };
        assert!(matches!(bad.error_for_status(), Err(ScrapeError::Network(_))));
    }

    #[test]
    fn test_json_decode_failure_is_malformed() {
        let r = FetchResponse { status: 200, body: "<html>".into(), ..Default::default() };
        assert!(matches!(r.json::<serde_json::Value>(), Err(ScrapeError::MalformedResponse(_))));
    }

    #[tokio::test]
    async fn test_proxied_fetcher_wraps_destination() {
        let rec = Arc::new(Recorder::default());
        let proxied = ProxiedFetcher::new(rec.clone(), Some("https://fetch.proxy/".into()));
        let resp = proxied
            .fetch(FetchRequest::get("https://site.example/embed/603").query("s", "1"))
            .await
            .unwrap();
        assert!(resp.json::<serde_json::Value>().unwrap()["ok"].as_bool().unwrap());
        let seen = rec.seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec!["https://fetch.proxy/?destination=https%3A%2F%2Fsite.example%2Fembed%2F603%3Fs%3D1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_proxied_fetcher_without_proxy_is_direct() {
        let rec = Arc::new(Recorder::default());
        let proxied = ProxiedFetcher::new(rec.clone(), Some("  ".into()));
        proxied.fetch(FetchRequest::get("https://site.example/a")).await.unwrap();
        assert_eq!(rec.seen.lock().unwrap()[0], "https://site.example/a");
    }
}
