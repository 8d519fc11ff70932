//! WebSocket detection endpoints.
//!
//! Two duplex paths share the `{"objects": ...}` / `{"error": ...}` reply
//! shape:
//!
//! - `/ws/detect`: the client pushes base64 image frames and gets one reply
//!   per frame until the transport closes. Malformed frames produce an error
//!   reply, never a close.
//! - `/ws/stream`: the client names a stream URL once; the server decodes
//!   and infers on its own clock until the stream ends or the client stops
//!   the session.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use argus_models::{is_stop_message, ErrorMessage, ImageFrame, ObjectsMessage, StreamStart};
use argus_vision::{open_stream, spawn_session, Infer, RasterFrame, SessionEvent};

use crate::metrics;
use crate::state::AppState;

/// Global counter for active WebSocket connections.
static ACTIVE_WS_CONNECTIONS: AtomicI64 = AtomicI64::new(0);

/// How long a stream session may sit idle before its opening message.
const HANDSHAKE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

fn connection_opened(endpoint: &str) {
    let count = ACTIVE_WS_CONNECTIONS.fetch_add(1, Ordering::SeqCst) + 1;
    metrics::set_ws_active_connections(count);
    metrics::record_ws_connection(endpoint);
}

fn connection_closed() {
    let count = ACTIVE_WS_CONNECTIONS.fetch_sub(1, Ordering::SeqCst) - 1;
    metrics::set_ws_active_connections(count);
}

/// Serialize a reply; the payload shapes here cannot fail to serialize.
fn to_text(value: &impl serde::Serialize) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| r#"{"error":"serialization failed"}"#.into())
}

/// Process one client image frame into a reply.
///
/// Every failure mode is a reply, not a connection error: the session
/// survives bad frames.
fn process_image_frame(text: &str, model: &dyn Infer) -> Result<ObjectsMessage, ErrorMessage> {
    let frame: ImageFrame = serde_json::from_str(text)
        .map_err(|e| ErrorMessage::new(format!("Invalid message: {}", e)))?;

    let payload = frame
        .base64_payload()
        .ok_or_else(|| ErrorMessage::new("Missing image payload"))?;

    let bytes = BASE64
        .decode(payload)
        .map_err(|e| ErrorMessage::new(format!("Invalid base64 payload: {}", e)))?;

    let raster = RasterFrame::decode_image(&bytes).map_err(|e| ErrorMessage::new(e.to_string()))?;

    let start = Instant::now();
    let objects = model
        .infer(&raster)
        .map_err(|e| ErrorMessage::new(e.to_string()))?;
    metrics::record_inference_duration(start.elapsed().as_secs_f64());

    Ok(ObjectsMessage::now(objects))
}

/// Validate a stream-session opening message.
///
/// Returns the parsed request with a trimmed, non-empty URL, or the error
/// reply the client should see before the close.
fn parse_stream_start(text: &str) -> Result<StreamStart, ErrorMessage> {
    let start: StreamStart = serde_json::from_str(text)
        .map_err(|e| ErrorMessage::new(format!("Invalid request: {}", e)))?;
    if start.url.trim().is_empty() {
        return Err(ErrorMessage::new("missing url"));
    }
    Ok(StreamStart {
        url: start.url.trim().to_string(),
        weights: start.weights,
    })
}

/// WebSocket per-frame detection endpoint.
pub async fn ws_detect(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    connection_opened("detect");
    ws.on_upgrade(|socket| async move {
        handle_detect_socket(socket, state).await;
        connection_closed();
    })
}

async fn handle_detect_socket(mut socket: WebSocket, state: AppState) {
    // The default model serves the whole connection; weight selection is a
    // single-shot and streaming concern.
    let model = match state.registry.get_or_load(None).await {
        Ok(m) => {
            metrics::record_model_load("ok");
            m
        }
        Err(e) => {
            metrics::record_model_load("error");
            warn!(error = %e, "Model unavailable for detect session");
            let reply = to_text(&ErrorMessage::new(e.to_string()));
            let _ = socket.send(Message::Text(reply)).await;
            let _ = socket.close().await;
            return;
        }
    };

    info!("Detect session started");

    while let Some(msg) = socket.recv().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                debug!(error = %e, "Detect socket error");
                break;
            }
        };

        match msg {
            // Every text frame is an image frame. Detect sessions live until
            // the transport closes; only stream sessions have a stop message.
            Message::Text(text) => {
                let reply = match process_image_frame(&text, model.as_ref()) {
                    Ok(objects) => {
                        metrics::record_frame_processed("detect");
                        metrics::record_ws_message_sent("detect", "objects");
                        to_text(&objects)
                    }
                    Err(error) => {
                        metrics::record_ws_message_sent("detect", "error");
                        to_text(&error)
                    }
                };

                if socket.send(Message::Text(reply)).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            // Pings are answered by the library; other frame types are
            // ignored.
            _ => {}
        }
    }

    info!("Detect session closed");
}

/// WebSocket streaming detection endpoint.
pub async fn ws_stream(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    connection_opened("stream");
    ws.on_upgrade(|socket| async move {
        handle_stream_socket(socket, state).await;
        connection_closed();
    })
}

async fn handle_stream_socket(mut socket: WebSocket, state: AppState) {
    // Handshake: the first text frame names the stream and optional weights.
    let handshake = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
        loop {
            match socket.recv().await {
                Some(Ok(Message::Text(text))) => break Some(text),
                Some(Ok(Message::Close(_))) | None => break None,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    debug!(error = %e, "Stream socket error during handshake");
                    break None;
                }
            }
        }
    })
    .await;

    let text = match handshake {
        Ok(Some(text)) => text,
        Ok(None) => return,
        Err(_) => {
            let reply = to_text(&ErrorMessage::new("handshake timed out"));
            let _ = socket.send(Message::Text(reply)).await;
            let _ = socket.close().await;
            return;
        }
    };

    let start = match parse_stream_start(&text) {
        Ok(start) => start,
        Err(error) => {
            let _ = socket.send(Message::Text(to_text(&error))).await;
            let _ = socket.close().await;
            return;
        }
    };
    let url = start.url.clone();

    let resolved = match state.resolver.resolve(&url).await {
        Ok(r) => r,
        Err(e) => {
            warn!(url = %url, error = %e, "Stream resolution failed");
            let reply = to_text(&ErrorMessage::new("unable to resolve stream"));
            let _ = socket.send(Message::Text(reply)).await;
            let _ = socket.close().await;
            return;
        }
    };

    let model = match state.registry.get_or_load(start.weights.as_deref()).await {
        Ok(m) => {
            metrics::record_model_load("ok");
            m
        }
        Err(e) => {
            metrics::record_model_load("error");
            let reply = to_text(&ErrorMessage::new(e.to_string()));
            let _ = socket.send(Message::Text(reply)).await;
            let _ = socket.close().await;
            return;
        }
    };

    let source = match open_stream(&resolved).await {
        Ok(s) => s,
        Err(e) => {
            warn!(url = %url, error = %e, "Failed to open stream");
            let reply = to_text(&ErrorMessage::new(e.to_string()));
            let _ = socket.send(Message::Text(reply)).await;
            let _ = socket.close().await;
            return;
        }
    };

    info!(url = %url, "Stream session started");
    metrics::record_session_started();

    let mut session = spawn_session(
        source,
        model as Arc<dyn Infer>,
        state.config.session_config(),
    );

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            event = session.next_event() => {
                match event {
                    Some(SessionEvent::Detections(objects)) => {
                        metrics::record_frame_processed("stream");
                        metrics::record_ws_message_sent("stream", "objects");
                        if sender.send(Message::Text(to_text(&objects))).await.is_err() {
                            break;
                        }
                    }
                    Some(SessionEvent::Error(error)) => {
                        metrics::record_ws_message_sent("stream", "error");
                        let _ = sender.send(Message::Text(to_text(&error))).await;
                    }
                    // Session terminated (stream ended or fatal error already
                    // reported).
                    None => break,
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) if is_stop_message(&text) => {
                        info!(url = %url, "Stop requested");
                        break;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "Stream socket error");
                        break;
                    }
                }
            }
        }
    }

    session.stop();
    session.join().await;
    let _ = sender.close().await;

    info!(url = %url, "Stream session closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use argus_models::Detection;
    use argus_vision::{VisionError, VisionResult};

    struct FixedModel;

    impl Infer for FixedModel {
        fn infer(&self, _frame: &RasterFrame) -> VisionResult<Vec<Detection>> {
            Ok(vec![Detection::new("person", 0.9, [0.0, 0.0, 5.0, 5.0])])
        }
    }

    struct FailingModel;

    impl Infer for FailingModel {
        fn infer(&self, _frame: &RasterFrame) -> VisionResult<Vec<Detection>> {
            Err(VisionError::detection("inference exploded"))
        }
    }

    /// 1x1 black PNG.
    fn tiny_png_base64() -> String {
        let img = image_bytes();
        BASE64.encode(img)
    }

    fn image_bytes() -> Vec<u8> {
        use std::io::Cursor;
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::new(1, 1));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageOutputFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_valid_frame_produces_objects_reply() {
        let text = format!(r#"{{"image": "{}"}}"#, tiny_png_base64());
        let reply = process_image_frame(&text, &FixedModel).unwrap();

        assert_eq!(reply.objects.len(), 1);
        assert_eq!(reply.objects[0].label, "person");
    }

    #[test]
    fn test_data_url_prefix_is_accepted() {
        let text = format!(
            r#"{{"image": "data:image/png;base64,{}"}}"#,
            tiny_png_base64()
        );
        assert!(process_image_frame(&text, &FixedModel).is_ok());
    }

    #[test]
    fn test_malformed_json_is_an_error_reply() {
        let err = process_image_frame("not json", &FixedModel).unwrap_err();
        assert!(err.error.contains("Invalid message"));
    }

    #[test]
    fn test_missing_payload_is_an_error_reply() {
        let err = process_image_frame("{}", &FixedModel).unwrap_err();
        assert!(err.error.contains("Missing image payload"));
    }

    #[test]
    fn test_bad_base64_is_an_error_reply() {
        let err = process_image_frame(r#"{"image": "@@@not-base64@@@"}"#, &FixedModel).unwrap_err();
        assert!(err.error.contains("Invalid base64"));
    }

    #[test]
    fn test_undecodable_image_is_an_error_reply() {
        let garbage = BASE64.encode(b"definitely not an image");
        let text = format!(r#"{{"image": "{}"}}"#, garbage);
        let err = process_image_frame(&text, &FixedModel).unwrap_err();
        assert!(err.error.contains("Invalid image payload"));
    }

    #[test]
    fn test_stop_literal_is_an_ordinary_detect_frame() {
        // "stop" ends stream sessions only; a detect session treats it like
        // any other non-image message and replies with an error.
        let err = process_image_frame("stop", &FixedModel).unwrap_err();
        assert!(err.error.contains("Invalid message"));
    }

    #[test]
    fn test_handshake_rejects_empty_or_missing_url() {
        let err = parse_stream_start("{}").unwrap_err();
        assert_eq!(err.error, "missing url");

        let err = parse_stream_start(r#"{"url": "   "}"#).unwrap_err();
        assert_eq!(err.error, "missing url");

        let err = parse_stream_start("not json").unwrap_err();
        assert!(err.error.contains("Invalid request"));
    }

    #[test]
    fn test_handshake_trims_url_and_keeps_weights() {
        let start =
            parse_stream_start(r#"{"url": " rtsp://cam/1 ", "weights": "best.onnx"}"#).unwrap();
        assert_eq!(start.url, "rtsp://cam/1");
        assert_eq!(start.weights.as_deref(), Some("best.onnx"));
    }

    #[test]
    fn test_inference_failure_is_an_error_reply() {
        let text = format!(r#"{{"image": "{}"}}"#, tiny_png_base64());
        let err = process_image_frame(&text, &FailingModel).unwrap_err();
        assert!(err.error.contains("inference exploded"));
    }
}
