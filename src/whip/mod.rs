#![forbid(unsafe_code)]

// WHIP ingest - HTTP handlers for broadcast resources
//
// POST creates a resource from an SDP offer, DELETE tears it down, OPTIONS
// answers CORS preflight. Resource state lives in WhipResources.

pub mod resource;

pub use resource::WhipResources;

use crate::engine::EngineError;
use crate::sdp::SdpError;
use crate::signaling::SignalingServer;
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

const MAX_RESOURCE_ID_LEN: usize = 128;

/// WHIP request failures, each mapped to its HTTP status.
#[derive(Error, Debug)]
pub enum WhipError {
    #[error("Content-Type must be application/sdp")]
    UnsupportedMediaType,

    #[error("Invalid resource id: must be 1-{MAX_RESOURCE_ID_LEN} printable characters")]
    InvalidResourceId,

    #[error(transparent)]
    Offer(#[from] SdpError),

    #[error("Offer contains no usable media section")]
    NoUsableMedia,

    #[error("Resource already exists: {0}")]
    ResourceExists(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl WhipError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::InvalidResourceId | Self::Offer(_) | Self::NoUsableMedia => {
                StatusCode::BAD_REQUEST
            }
            Self::ResourceExists(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for WhipError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("WHIP request failed: {}", self);
        }
        (status, self.to_string()).into_response()
    }
}

fn validate_resource_id(resource_id: &str) -> Result<(), WhipError> {
    // The id is echoed into Location and ETag headers, so it has to stay
    // printable ASCII without quotes.
    if resource_id.is_empty()
        || resource_id.len() > MAX_RESOURCE_ID_LEN
        || !resource_id.bytes().all(|b| b.is_ascii_graphic() && b != b'"')
    {
        return Err(WhipError::InvalidResourceId);
    }
    Ok(())
}

/// `POST /whip/{resourceId}` - create an ingest resource from an SDP offer
pub async fn create(
    State(server): State<SignalingServer>,
    Path(resource_id): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, WhipError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !content_type.contains("application/sdp") {
        return Err(WhipError::UnsupportedMediaType);
    }
    validate_resource_id(&resource_id)?;

    let answer = server.whip().create(&resource_id, &body).await?;

    Ok((
        StatusCode::CREATED,
        [
            (header::CONTENT_TYPE, "application/sdp".to_string()),
            (header::LOCATION, format!("/whip/{resource_id}")),
            (header::ETAG, format!("\"{resource_id}\"")),
        ],
        answer,
    )
        .into_response())
}

/// `DELETE /whip/{resourceId}` - tear the resource down
pub async fn delete(
    State(server): State<SignalingServer>,
    Path(resource_id): Path<String>,
) -> Result<StatusCode, WhipError> {
    if server.whip().delete(&resource_id).await {
        Ok(StatusCode::OK)
    } else {
        Err(WhipError::NotFound(resource_id))
    }
}

/// `OPTIONS /whip/{resourceId}` - CORS preflight, no state change
pub async fn preflight() -> impl IntoResponse {
    (StatusCode::OK, [(header::ACCEPT, "application/sdp")])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineConfig, MediaEngine};
    use crate::metrics::ServerMetrics;
    use crate::registry::{ProducerRegistry, ProducerSource};
    use axum::body::Body;
    use axum::http::{Method, Request};
    use axum::Router;
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;

    const AUDIO_OFFER: &str = "v=0\r\n\
        o=- 8444804423782791652 2 IN IP4 127.0.0.1\r\n\
        s=-\r\n\
        t=0 0\r\n\
        a=group:BUNDLE 0\r\n\
        a=fingerprint:sha-256 7B:8B:F0:65:5F:78:E2:51:3B:AC:6F:F3:3F:46:1B:35:DC:B8:5F:64:1A:24:C2:43:F0:A1:58:D0:A1:2C:19:08\r\n\
        a=setup:actpass\r\n\
        m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
        c=IN IP4 0.0.0.0\r\n\
        a=mid:0\r\n\
        a=rtpmap:111 opus/48000/2\r\n\
        a=ssrc:31415926 cname:whip@test\r\n";

    async fn test_router(rtc_port: u16) -> (Router, Arc<ProducerRegistry>) {
        let mut config = EngineConfig::default();
        config.transport.rtc_port = rtc_port;
        let engine = Arc::new(MediaEngine::new(&config).await.expect("engine should start"));
        let registry = Arc::new(ProducerRegistry::new());
        let metrics = ServerMetrics::new();
        let whip = WhipResources::new(Arc::clone(&engine), Arc::clone(&registry), metrics.clone());
        let server = SignalingServer::new(engine, Arc::clone(&registry), whip, metrics);
        (server.router(), registry)
    }

    fn post_offer(resource_id: &str, offer: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(format!("/whip/{resource_id}"))
            .header(header::CONTENT_TYPE, "application/sdp")
            .body(Body::from(offer.to_string()))
            .unwrap()
    }

    fn delete_resource(resource_id: &str) -> Request<Body> {
        Request::builder()
            .method(Method::DELETE)
            .uri(format!("/whip/{resource_id}"))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn delete_before_any_post_is_not_found() {
        let (router, _) = test_router(10711).await;
        let response = router.oneshot(delete_resource("nope")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn post_answers_with_the_resource_headers() {
        let (router, registry) = test_router(10712).await;

        let response = router
            .clone()
            .oneshot(post_offer("test1", AUDIO_OFFER))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "application/sdp");
        assert_eq!(headers[header::LOCATION], "/whip/test1");
        assert_eq!(headers[header::ETAG], "\"test1\"");

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let answer = std::str::from_utf8(&body).unwrap();
        assert_eq!(
            answer.lines().filter(|l| l.starts_with("m=audio")).count(),
            1
        );
        assert_eq!(answer.lines().filter(|l| l.starts_with("m=")).count(), 1);

        let entries = registry.list();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source, ProducerSource::Whip);
        assert_eq!(entries[0].resource_id.as_deref(), Some("test1"));
    }

    #[tokio::test]
    async fn delete_succeeds_once_then_reports_not_found() {
        let (router, registry) = test_router(10713).await;

        let response = router
            .clone()
            .oneshot(post_offer("cam", AUDIO_OFFER))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = router.clone().oneshot(delete_resource("cam")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(registry.is_empty());

        let response = router.oneshot(delete_resource("cam")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn duplicate_post_for_a_live_resource_conflicts() {
        let (router, registry) = test_router(10714).await;

        let first = router
            .clone()
            .oneshot(post_offer("cam", AUDIO_OFFER))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);

        let second = router
            .clone()
            .oneshot(post_offer("cam", AUDIO_OFFER))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);

        // The first resource is untouched by the refused create
        assert_eq!(registry.len(), 1);
        let response = router.oneshot(delete_resource("cam")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn offers_that_cannot_be_used_are_client_errors() {
        let (router, _) = test_router(10715).await;

        // Not SDP at all
        let response = router
            .clone()
            .oneshot(post_offer("bad1", "this is not sdp"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // No DTLS fingerprint
        let no_fingerprint = AUDIO_OFFER
            .lines()
            .filter(|l| !l.starts_with("a=fingerprint"))
            .collect::<Vec<_>>()
            .join("\r\n");
        let response = router
            .clone()
            .oneshot(post_offer("bad2", &no_fingerprint))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // Only an unsupported media kind
        let data_only = AUDIO_OFFER.replace(
            "m=audio 9 UDP/TLS/RTP/SAVPF 111",
            "m=application 9 UDP/DTLS/SCTP webrtc-datachannel",
        );
        let response = router
            .clone()
            .oneshot(post_offer("bad3", &data_only))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // Wrong content type
        let request = Request::builder()
            .method(Method::POST)
            .uri("/whip/bad4")
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from(AUDIO_OFFER))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn preflight_is_stateless() {
        let (router, registry) = test_router(10716).await;

        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/whip/anything")
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(registry.is_empty());
    }
}
