use axum::extract::ws::Message;

use crate::chat::events::{ClientEvent, ErrorPayload, ServerEvent};

/// Encode an outbound event as a JSON text frame.
/// Encoding a closed enum of plain data cannot fail in practice; a failure is
/// logged and the frame dropped.
pub fn encode_event(event: &ServerEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode outbound event");
            None
        }
    }
}

/// Decode an inbound text frame.
pub fn decode_event(text: &str) -> Result<ClientEvent, serde_json::Error> {
    serde_json::from_str(text)
}

/// Error frame for a payload that could not be decoded at all.
pub fn malformed_frame(detail: &str) -> ServerEvent {
    ServerEvent::MessageError(ErrorPayload {
        code: "invalid".to_string(),
        message: format!("invalid request: {}", detail),
    })
}
