//! Wire format for the replay stream.
//!
//! The gateway delivers WebSocket messages whose payload is a UTF-8 JSON
//! envelope `{"msgType": <int>, "content": "<base64>"}`. `content` carries a
//! raw chunk of recorded terminal output. The server serializes the envelope
//! with `omitempty` semantics, so either field may be absent on the wire;
//! a missing `msgType` reads as `0` (plain content).

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use thiserror::Error;

/// End of the recorded stream. May carry a final printable banner.
pub const MSG_TYPE_CLOSE: i64 = 2;
/// Keepalive; never rendered.
pub const MSG_TYPE_PING: i64 = 3;

/// One decoded replay message. The gateway emits distinct content types for
/// stdout and stderr, so anything that is not a ping or a close is treated as
/// content rather than matching an exhaustive enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A chunk of recorded terminal bytes (may contain escape sequences).
    Content(Vec<u8>),
    /// Keepalive from the gateway.
    Ping,
    /// End of stream, with the server's closing banner when present.
    Close(Vec<u8>),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid utf-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("payload is not a valid envelope: {0}")]
    Envelope(#[from] serde_json::Error),
    #[error("envelope content is not valid base64: {0}")]
    Content(#[from] base64::DecodeError),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "msgType", default)]
    msg_type: i64,
    #[serde(default)]
    content: String,
}

/// Decode one raw message payload into a [`Frame`].
pub fn decode_frame(payload: &[u8]) -> Result<Frame, DecodeError> {
    let text = std::str::from_utf8(payload)?;
    let envelope: Envelope = serde_json::from_str(text)?;
    let content = BASE64.decode(envelope.content.as_bytes())?;
    Ok(match envelope.msg_type {
        MSG_TYPE_PING => Frame::Ping,
        MSG_TYPE_CLOSE => Frame::Close(content),
        _ => Frame::Content(content),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(msg_type: i64, content: &[u8]) -> Vec<u8> {
        json!({ "msgType": msg_type, "content": BASE64.encode(content) })
            .to_string()
            .into_bytes()
    }

    #[test]
    fn decodes_content_frame() {
        let frame = decode_frame(&envelope(0, b"hello\n")).unwrap();
        assert_eq!(frame, Frame::Content(b"hello\n".to_vec()));
    }

    #[test]
    fn any_unreserved_msg_type_is_content() {
        for msg_type in [0, 1, 4, 17, -1] {
            let frame = decode_frame(&envelope(msg_type, b"x")).unwrap();
            assert_eq!(frame, Frame::Content(b"x".to_vec()), "msgType {msg_type}");
        }
    }

    #[test]
    fn decodes_ping_frame() {
        let frame = decode_frame(&envelope(MSG_TYPE_PING, b"ping")).unwrap();
        assert_eq!(frame, Frame::Ping);
    }

    #[test]
    fn decodes_close_frame_with_banner() {
        let frame = decode_frame(&envelope(MSG_TYPE_CLOSE, b"done")).unwrap();
        assert_eq!(frame, Frame::Close(b"done".to_vec()));
    }

    #[test]
    fn missing_msg_type_reads_as_content() {
        let payload = json!({ "content": BASE64.encode(b"out") }).to_string();
        let frame = decode_frame(payload.as_bytes()).unwrap();
        assert_eq!(frame, Frame::Content(b"out".to_vec()));
    }

    #[test]
    fn missing_content_reads_as_empty() {
        let payload = json!({ "msgType": MSG_TYPE_CLOSE }).to_string();
        let frame = decode_frame(payload.as_bytes()).unwrap();
        assert_eq!(frame, Frame::Close(Vec::new()));
    }

    #[test]
    fn rejects_invalid_utf8() {
        let err = decode_frame(&[0xff, 0xfe, b'{']).unwrap_err();
        assert!(matches!(err, DecodeError::Utf8(_)));
    }

    #[test]
    fn rejects_invalid_json() {
        let err = decode_frame(b"not an envelope").unwrap_err();
        assert!(matches!(err, DecodeError::Envelope(_)));
    }

    #[test]
    fn rejects_ill_typed_fields() {
        let err = decode_frame(br#"{"msgType": "two", "content": ""}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Envelope(_)));
    }

    #[test]
    fn rejects_invalid_base64_content() {
        let err = decode_frame(br#"{"msgType": 0, "content": "%%%"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Content(_)));
    }
}
