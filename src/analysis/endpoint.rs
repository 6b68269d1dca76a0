use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, trace};

use crate::error::AnalysisError;
use crate::frame::CapturedFrame;

/// The remote vision-language model.
///
/// Implementations return the raw response body; interpreting it is the
/// orchestrator's job so that malformed bodies can still be spoken.
#[async_trait]
pub trait AnalysisEndpoint: Send + Sync {
    async fn analyze(&self, instruction: &str, frame: &CapturedFrame)
    -> Result<String, AnalysisError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: [ContentPart<'a>; 2],
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

/// Client for an OpenAI-style `chat/completions` endpoint.
#[derive(Clone)]
pub struct ChatCompletionsClient {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
    customer_id: Option<String>,
}

impl ChatCompletionsClient {
    pub fn new(url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            model: model.into(),
            api_key: None,
            customer_id: None,
        }
    }

    pub fn api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key;
        self
    }

    pub fn customer_id(mut self, id: Option<String>) -> Self {
        self.customer_id = id;
        self
    }
}

#[async_trait]
impl AnalysisEndpoint for ChatCompletionsClient {
    async fn analyze(
        &self,
        instruction: &str,
        frame: &CapturedFrame,
    ) -> Result<String, AnalysisError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: [
                    ContentPart::Text { text: instruction },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: frame.to_data_url(),
                        },
                    },
                ],
            }],
        };
        let mut req = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        if let Some(id) = &self.customer_id {
            req = req.header("customerId", id);
        }
        debug!(url = %self.url, model = %self.model, bytes = frame.bytes().len(), "analysis request");
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AnalysisError::Status(status.as_u16()));
        }
        let text = resp.text().await?;
        trace!(%text, "analysis response");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Provenance;
    use httpmock::prelude::*;
    use serde_json::json;

    fn frame() -> CapturedFrame {
        CapturedFrame::new(&b"jpeg"[..], "image/jpeg", Provenance::LiveCamera)
    }

    #[tokio::test]
    async fn sends_instruction_and_image() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/chat/completions")
                    .header("authorization", "Bearer secret")
                    .header("customerid", "me@example.com")
                    .json_body_partial(
                        json!({
                            "model": "vision-model",
                            "messages": [{
                                "role": "user",
                                "content": [
                                    {"type": "text", "text": "describe"},
                                    {"type": "image_url", "image_url": {"url": "data:image/jpeg;base64,anBlZw=="}}
                                ]
                            }]
                        })
                        .to_string(),
                    );
                then.status(200).body("{\"choices\":[]}");
            })
            .await;
        let client = ChatCompletionsClient::new(server.url("/chat/completions"), "vision-model")
            .api_key(Some("secret".into()))
            .customer_id(Some("me@example.com".into()));
        let body = client.analyze("describe", &frame()).await.unwrap();
        assert_eq!(body, "{\"choices\":[]}");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(503);
            })
            .await;
        let client = ChatCompletionsClient::new(server.url("/chat/completions"), "m");
        let err = client.analyze("x", &frame()).await.unwrap_err();
        assert!(matches!(err, AnalysisError::Status(503)));
    }
}
