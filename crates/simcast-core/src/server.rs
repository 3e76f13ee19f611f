//! HTTP frame distribution: latest frame, MJPEG-style multipart stream and
//! session status.

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::{BufMut, Bytes, BytesMut};
use futures_util::stream::{self, Stream};
use tokio::net::TcpListener;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info};

use crate::frame::FrameEvent;
use crate::session::CaptureManager;

pub const BOUNDARY: &str = "frame";

pub fn router(capture: Arc<CaptureManager>) -> Router {
    Router::new()
        .route("/devices", get(list_devices))
        .route("/frame/{id}", get(latest_frame))
        .route("/stream/{id}", get(stream_frames))
        .route("/info/{id}", get(capture_info))
        .fallback(not_found)
        .with_state(capture)
}

/// Serve until the listener fails or the future is dropped.
pub async fn serve(listener: TcpListener, capture: Arc<CaptureManager>) -> Result<()> {
    let addr = listener.local_addr().context("listener has no local address")?;
    info!("frame server listening on http://{}", addr);
    axum::serve(listener, router(capture))
        .await
        .context("frame server failed")
}

async fn list_devices(State(capture): State<Arc<CaptureManager>>) -> Json<Vec<String>> {
    Json(capture.active_devices())
}

async fn latest_frame(State(capture): State<Arc<CaptureManager>>, Path(id): Path<String>) -> Response {
    match capture.current_frame(&id) {
        Some(frame) => (
            [(header::CONTENT_TYPE, "image/png"), (header::CACHE_CONTROL, "no-cache")],
            frame,
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "no frame available").into_response(),
    }
}

async fn capture_info(State(capture): State<Arc<CaptureManager>>, Path(id): Path<String>) -> Response {
    match capture.info(&id) {
        Some(info) => Json(info).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn stream_frames(State(capture): State<Arc<CaptureManager>>, Path(id): Path<String>) -> Response {
    debug!("stream subscriber for {}", id);
    let body = Body::from_stream(multipart_parts(capture.subscribe(), id));
    (
        [
            (header::CONTENT_TYPE, format!("multipart/x-mixed-replace; boundary={}", BOUNDARY)),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        body,
    )
        .into_response()
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// One multipart part per frame for `device_id`. Other devices' frames are
/// skipped, as are frames lost to lag. Dropping the stream unsubscribes.
fn multipart_parts(
    rx: broadcast::Receiver<FrameEvent>,
    device_id: String,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    stream::unfold((rx, device_id), |(mut rx, device_id)| async move {
        loop {
            match rx.recv().await {
                Ok(event) if event.device_id == device_id => {
                    let part = encode_part(&event.data);
                    return Some((Ok(part), (rx, device_id)));
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    debug!("stream for {} lagged, skipped {} frames", device_id, skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
}

pub fn encode_part(data: &[u8]) -> Bytes {
    let head = format!(
        "--{}\r\nContent-Type: image/png\r\nContent-Length: {}\r\n\r\n",
        BOUNDARY,
        data.len()
    );
    let mut part = BytesMut::with_capacity(head.len() + data.len() + 2);
    part.put_slice(head.as_bytes());
    part.put_slice(data);
    part.put_slice(b"\r\n");
    part.freeze()
}
