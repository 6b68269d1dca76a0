use std::fmt;

use bytes::Bytes;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

/// How the request was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    /// A top-level page load that replaces the whole document.
    Navigate,
    SameOrigin,
    Cors,
    NoCors,
}

impl RequestMode {
    /// Parse a `Sec-Fetch-Mode` header value.
    pub fn from_fetch_mode(value: &str) -> Option<Self> {
        match value {
            "navigate" => Some(RequestMode::Navigate),
            "same-origin" => Some(RequestMode::SameOrigin),
            "cors" => Some(RequestMode::Cors),
            "no-cors" => Some(RequestMode::NoCors),
            _ => None,
        }
    }
}

/// What the response will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Document,
    Script,
    Style,
    Image,
    Font,
    Manifest,
    Empty,
    Other,
}

impl Destination {
    /// Parse a `Sec-Fetch-Dest` header value.
    pub fn from_fetch_dest(value: &str) -> Self {
        match value {
            "document" | "iframe" | "frame" => Destination::Document,
            "script" | "worker" | "sharedworker" => Destination::Script,
            "style" => Destination::Style,
            "image" => Destination::Image,
            "font" => Destination::Font,
            "manifest" => Destination::Manifest,
            "empty" => Destination::Empty,
            _ => Destination::Other,
        }
    }
}

/// Identity under which a response is cached: method plus absolute URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey(String);

impl RequestKey {
    pub fn new(method: &Method, url: &Url) -> Self {
        Self(format!("{} {}", method.as_str(), url))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct AssetRequest {
    pub method: Method,
    pub url: Url,
    pub mode: RequestMode,
    pub destination: Destination,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl AssetRequest {
    /// A plain sub-resource GET.
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            mode: RequestMode::SameOrigin,
            destination: Destination::Empty,
            headers: Vec::new(),
            body: None,
        }
    }

    /// A page navigation to `url`.
    pub fn navigate(url: Url) -> Self {
        Self {
            mode: RequestMode::Navigate,
            destination: Destination::Document,
            ..Self::get(url)
        }
    }

    pub fn with_destination(self, destination: Destination) -> Self {
        Self {
            destination,
            ..self
        }
    }

    pub fn key(&self) -> RequestKey {
        RequestKey::new(&self.method, &self.url)
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }
}

/// Whether a response may be inspected and stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    /// Same-origin response.
    Basic,
    /// Cross-origin response the page is allowed to read.
    Cors,
    /// Cross-origin response whose contents are hidden.
    Opaque,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub kind: ResponseKind,
}

impl AssetResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
            kind: ResponseKind::Basic,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_kind(self, kind: ResponseKind) -> Self {
        Self { kind, ..self }
    }

    /// Only complete, same-origin responses are ever written to the cache.
    pub fn is_cacheable(&self) -> bool {
        self.status == 200 && self.kind == ResponseKind::Basic
    }
}

/// A stored response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedAsset {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl From<AssetResponse> for CachedAsset {
    fn from(resp: AssetResponse) -> Self {
        Self {
            status: resp.status,
            headers: resp.headers,
            body: resp.body,
        }
    }
}

impl From<CachedAsset> for AssetResponse {
    fn from(asset: CachedAsset) -> Self {
        Self {
            status: asset.status,
            headers: asset.headers,
            body: asset.body,
            kind: ResponseKind::Basic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_combines_method_and_url() {
        let url = Url::parse("http://app.local/navigate?x=1").unwrap();
        assert_eq!(
            AssetRequest::get(url).key().as_str(),
            "GET http://app.local/navigate?x=1"
        );
    }

    #[test]
    fn only_ok_basic_responses_are_cacheable() {
        assert!(AssetResponse::new(200, "ok").is_cacheable());
        assert!(!AssetResponse::new(404, "").is_cacheable());
        assert!(!AssetResponse::new(206, "part").is_cacheable());
        assert!(
            !AssetResponse::new(200, "x")
                .with_kind(ResponseKind::Opaque)
                .is_cacheable()
        );
    }

    #[test]
    fn fetch_metadata_parsing() {
        assert_eq!(
            RequestMode::from_fetch_mode("navigate"),
            Some(RequestMode::Navigate)
        );
        assert_eq!(RequestMode::from_fetch_mode("bogus"), None);
        assert_eq!(Destination::from_fetch_dest("iframe"), Destination::Document);
        assert_eq!(Destination::from_fetch_dest("audio"), Destination::Other);
    }
}
