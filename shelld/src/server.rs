//! HTTP front end: a caching proxy plus the `/__shell/` control surface.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{Path, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use crate::manager::ControlMessage;
use crate::network::is_hop_by_hop;
use crate::notify::PushPayload;
use crate::request::{AssetRequest, AssetResponse, Destination, RequestMode};
use crate::worker::{EventOutcome, ShellWorker, WorkerEvent};

/// Largest request body forwarded upstream.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone)]
struct ShellState {
    worker: Arc<ShellWorker>,
    upstream: Url,
}

/// Build the router serving `upstream` through `worker`.
pub fn router(worker: Arc<ShellWorker>, upstream: Url) -> Router {
    Router::new()
        .route("/__shell/version", get(version))
        .route("/__shell/state", get(lifecycle_state))
        .route("/__shell/message", post(message))
        .route("/__shell/skip-waiting", post(skip_waiting))
        .route("/__shell/push", post(push))
        .route("/__shell/notification-click", post(notification_click))
        .route("/__shell/sync/:tag", post(sync))
        .fallback(proxy)
        .with_state(ShellState { worker, upstream })
}

fn unexpected(outcome: Result<EventOutcome, impl std::fmt::Display>) -> Response {
    match outcome {
        Ok(other) => {
            warn!(?other, "unexpected worker outcome");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(e) => (StatusCode::CONFLICT, e.to_string()).into_response(),
    }
}

async fn control(state: &ShellState, message: ControlMessage) -> Response {
    match state.worker.dispatch(WorkerEvent::Message(message)).await {
        Ok(EventOutcome::Reply(Some(reply))) => Json(reply).into_response(),
        Ok(EventOutcome::Reply(None)) => StatusCode::ACCEPTED.into_response(),
        other => unexpected(other),
    }
}

async fn version(State(state): State<ShellState>) -> Response {
    control(&state, ControlMessage::GetVersion).await
}

async fn message(State(state): State<ShellState>, Json(msg): Json<ControlMessage>) -> Response {
    control(&state, msg).await
}

async fn lifecycle_state(State(state): State<ShellState>) -> Response {
    let manager = state.worker.manager();
    Json(json!({
        "generation": manager.current_generation(),
        "state": manager.state(),
        "clients": manager.client_registry().list().await,
    }))
    .into_response()
}

/// Force activation of an installed generation.
async fn skip_waiting(State(state): State<ShellState>) -> Response {
    let accepted = control(&state, ControlMessage::SkipWaiting).await;
    if !state.worker.manager().ready_to_activate().await {
        return accepted;
    }
    match state.worker.dispatch(WorkerEvent::Activate).await {
        Ok(EventOutcome::Activated(report)) => Json(report).into_response(),
        other => unexpected(other),
    }
}

async fn push(State(state): State<ShellState>, body: Bytes) -> Response {
    let payload = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        match serde_json::from_slice::<PushPayload>(&body) {
            Ok(payload) => Some(payload),
            Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        }
    };
    match state.worker.dispatch(WorkerEvent::Push(payload)).await {
        Ok(EventOutcome::Notified(notification)) => Json(notification).into_response(),
        other => unexpected(other),
    }
}

async fn notification_click(State(state): State<ShellState>) -> Response {
    match state.worker.dispatch(WorkerEvent::NotificationClick).await {
        Ok(EventOutcome::Clicked(outcome)) => Json(outcome).into_response(),
        other => unexpected(other),
    }
}

async fn sync(State(state): State<ShellState>, Path(tag): Path<String>) -> Response {
    match state.worker.dispatch(WorkerEvent::Sync(tag)).await {
        Ok(EventOutcome::Synced(handled)) => Json(json!({ "handled": handled })).into_response(),
        other => unexpected(other),
    }
}

async fn proxy(State(state): State<ShellState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => return (StatusCode::PAYLOAD_TOO_LARGE, e.to_string()).into_response(),
    };
    let asset_request = match asset_request(&state.upstream, &parts, body) {
        Ok(req) => req,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    debug!(url = %asset_request.url, mode = ?asset_request.mode, "proxying");
    match state.worker.dispatch(WorkerEvent::Fetch(asset_request)).await {
        Ok(EventOutcome::Response(Ok(resp))) => into_response(resp),
        Ok(EventOutcome::Response(Err(e))) => {
            warn!(error = %e, "upstream unavailable");
            (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
        }
        other => unexpected(other),
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Translate an incoming request into the manager's terms.
///
/// Origin-form targets resolve against `upstream`; absolute-form targets
/// are kept, which makes them cross-origin unless they name the upstream.
pub(crate) fn asset_request(
    upstream: &Url,
    parts: &Parts,
    body: Bytes,
) -> Result<AssetRequest, url::ParseError> {
    let url = if parts.uri.scheme().is_some() && parts.uri.authority().is_some() {
        Url::parse(&parts.uri.to_string())?
    } else {
        let target = parts
            .uri
            .path_and_query()
            .map_or("/", |pq| pq.as_str());
        upstream.join(target)?
    };

    let mode = header(&parts.headers, "sec-fetch-mode")
        .and_then(|m| RequestMode::from_fetch_mode(&m))
        .unwrap_or_else(|| {
            let wants_html = header(&parts.headers, "accept")
                .is_some_and(|accept| accept.contains("text/html"));
            if parts.method == Method::GET && wants_html {
                RequestMode::Navigate
            } else {
                RequestMode::SameOrigin
            }
        });
    let destination = header(&parts.headers, "sec-fetch-dest")
        .map(|d| Destination::from_fetch_dest(&d))
        .unwrap_or(if mode == RequestMode::Navigate {
            Destination::Document
        } else {
            Destination::Empty
        });
    let headers = parts
        .headers
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    Ok(AssetRequest {
        method: parts.method.clone(),
        url,
        mode,
        destination,
        headers,
        body: (!body.is_empty()).then_some(body),
    })
}

fn into_response(resp: AssetResponse) -> Response {
    let mut response = Response::new(Body::from(resp.body));
    *response.status_mut() = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::BAD_GATEWAY);
    for (name, value) in resp.headers {
        if is_hop_by_hop(&name) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            response.headers_mut().append(name, value);
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request as HttpRequest;

    fn parts(builder: axum::http::request::Builder) -> Parts {
        builder.body(()).unwrap().into_parts().0
    }

    fn upstream() -> Url {
        Url::parse("http://127.0.0.1:3000/").unwrap()
    }

    #[test]
    fn fetch_metadata_drives_mode_and_destination() {
        let p = parts(
            HttpRequest::get("/read-text")
                .header("sec-fetch-mode", "navigate")
                .header("sec-fetch-dest", "document"),
        );
        let req = asset_request(&upstream(), &p, Bytes::new()).unwrap();
        assert_eq!(req.url.as_str(), "http://127.0.0.1:3000/read-text");
        assert!(req.is_navigation());
        assert_eq!(req.destination, Destination::Document);
        assert!(req.body.is_none());
    }

    #[test]
    fn html_accept_counts_as_navigation() {
        let p = parts(HttpRequest::get("/?lang=en").header("accept", "text/html,*/*"));
        let req = asset_request(&upstream(), &p, Bytes::new()).unwrap();
        assert_eq!(req.url.query(), Some("lang=en"));
        assert_eq!(req.mode, RequestMode::Navigate);
        assert_eq!(req.destination, Destination::Document);
    }

    #[test]
    fn plain_requests_are_subresources() {
        let p = parts(
            HttpRequest::post("/api/log")
                .header("accept", "text/html")
                .header("connection", "keep-alive"),
        );
        let req = asset_request(&upstream(), &p, Bytes::from_static(b"{}")).unwrap();
        assert_eq!(req.mode, RequestMode::SameOrigin);
        assert_eq!(req.destination, Destination::Empty);
        assert!(req.headers.iter().all(|(n, _)| n != "connection"));
        assert_eq!(req.body.as_deref(), Some(&b"{}"[..]));
    }

    #[test]
    fn absolute_targets_keep_their_origin() {
        let p = parts(HttpRequest::get("https://cdn.example/lib.js"));
        let req = asset_request(&upstream(), &p, Bytes::new()).unwrap();
        assert_eq!(req.url.host_str(), Some("cdn.example"));
    }

    #[test]
    fn responses_drop_hop_by_hop_headers() {
        let resp = into_response(
            AssetResponse::new(201, "made")
                .with_header("content-type", "text/plain")
                .with_header("transfer-encoding", "chunked"),
        );
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(resp.headers()["content-type"], "text/plain");
        assert!(resp.headers().get("transfer-encoding").is_none());
    }
}
