use async_trait::async_trait;
use tracing::debug;

use crate::error::NetworkError;
use crate::request::{AssetRequest, AssetResponse, ResponseKind};

/// Connection-scoped headers that must not be forwarded by a proxy.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

pub(crate) fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// Performs real fetches on behalf of the cache manager.
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &AssetRequest) -> Result<AssetResponse, NetworkError>;
}

/// [`Network`] backed by `reqwest`.
#[derive(Clone, Default)]
pub struct HttpNetwork {
    client: reqwest::Client,
}

impl HttpNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &AssetRequest) -> Result<AssetResponse, NetworkError> {
        debug!(method = %request.method, url = %request.url, "fetching");
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());
        for (name, value) in &request.headers {
            if !is_hop_by_hop(name) {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        let resp = builder.send().await?;
        let kind = if resp.url().origin() == request.url.origin() {
            ResponseKind::Basic
        } else {
            ResponseKind::Cors
        };
        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = resp.bytes().await?;
        Ok(AssetResponse {
            status,
            headers,
            body,
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use url::Url;

    #[tokio::test]
    async fn same_origin_fetch_is_basic() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/manifest.json").header("accept", "application/json");
                then.status(200)
                    .header("content-type", "application/json")
                    .body("{}");
            })
            .await;
        let mut req = AssetRequest::get(Url::parse(&server.url("/manifest.json")).unwrap());
        req.headers.push(("Accept".into(), "application/json".into()));
        req.headers.push(("Connection".into(), "close".into()));

        let resp = HttpNetwork::new().fetch(&req).await.unwrap();
        mock.assert_async().await;
        assert_eq!(resp.status, 200);
        assert_eq!(resp.kind, ResponseKind::Basic);
        assert_eq!(resp.body, "{}");
        assert!(resp
            .headers
            .iter()
            .any(|(n, v)| n == "content-type" && v == "application/json"));
    }

    #[tokio::test]
    async fn error_status_is_still_a_response() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.path("/missing");
                then.status(404);
            })
            .await;
        let req = AssetRequest::get(Url::parse(&server.url("/missing")).unwrap());
        let resp = HttpNetwork::new().fetch(&req).await.unwrap();
        assert_eq!(resp.status, 404);
        assert!(!resp.is_cacheable());
    }

    #[tokio::test]
    async fn refused_connection_is_unreachable() {
        let req = AssetRequest::get(Url::parse("http://127.0.0.1:9/").unwrap());
        let err = HttpNetwork::new().fetch(&req).await.unwrap_err();
        assert!(matches!(err, NetworkError::Unreachable(_)));
    }

    #[test]
    fn hop_by_hop_is_case_insensitive() {
        assert!(is_hop_by_hop("Transfer-Encoding"));
        assert!(!is_hop_by_hop("content-type"));
    }
}
