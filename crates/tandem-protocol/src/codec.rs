//! Codec for encoding and decoding Tandem events.
//!
//! Text frames carry one JSON event each. Binary frames carry
//! MessagePack-encoded events behind a 4-byte big-endian length prefix, so
//! several events may share one buffer.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use thiserror::Error;

/// Maximum encoded event size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Event exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Not enough data to decode an event.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Encode an event as a JSON text frame.
///
/// # Errors
///
/// Returns an error if the event is too large or serialization fails.
pub fn encode<T: Serialize>(event: &T) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(event)?;
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    Ok(text)
}

/// Decode an event from a JSON text frame.
///
/// Opaque payloads can only be kept verbatim when `event` precedes `data`;
/// a frame with the keys the other way round is retried with the tag first.
///
/// # Errors
///
/// Returns an error if the text is too large or is not a known event.
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    match serde_json::from_str(text) {
        Ok(event) => Ok(event),
        Err(e) => match tag_first(text) {
            Some(reordered) => serde_json::from_str(&reordered).map_err(|_| e.into()),
            None => Err(e.into()),
        },
    }
}

/// The `{"event", "data"}` envelope with both members left unparsed.
#[derive(Serialize, Deserialize)]
struct Envelope<'a> {
    #[serde(borrow)]
    event: &'a RawValue,
    #[serde(borrow, default, skip_serializing_if = "Option::is_none")]
    data: Option<&'a RawValue>,
}

/// Re-emit an envelope with `event` first. `None` if the text is not an
/// envelope or already had that order.
fn tag_first(text: &str) -> Option<String> {
    let envelope: Envelope<'_> = serde_json::from_str(text).ok()?;
    let reordered = serde_json::to_string(&envelope).ok()?;
    (reordered != text).then_some(reordered)
}

/// Encode an event as a length-prefixed MessagePack frame.
///
/// # Errors
///
/// Returns an error if the event is too large or encoding fails.
pub fn encode_binary<T: Serialize>(event: &T) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(event, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode an event into an existing buffer.
///
/// # Errors
///
/// Returns an error if the event is too large or encoding fails.
pub fn encode_into<T: Serialize>(event: &T, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let payload = rmp_serde::to_vec_named(event)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    buf.reserve(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);

    Ok(())
}

/// Decode one event from a complete binary frame.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode_binary<T: DeserializeOwned>(data: &[u8]) -> Result<T, ProtocolError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
    }

    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if data.len() < total_size {
        return Err(ProtocolError::Incomplete(total_size - data.len()));
    }

    Ok(rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total_size])?)
}

/// Try to decode an event from a buffer, advancing it if successful.
///
/// Returns `Ok(Some(event))` if a complete frame was decoded,
/// `Ok(None)` if more data is needed, or `Err` on protocol error. A frame
/// that fails to deserialize is still consumed so the stream stays aligned.
///
/// # Errors
///
/// Returns an error if the frame is too large or invalid.
pub fn decode_from<T: DeserializeOwned>(buf: &mut BytesMut) -> Result<Option<T>, ProtocolError> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if buf.len() < total_size {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    let payload = buf.split_to(length);
    let event = rmp_serde::from_slice(&payload)?;

    Ok(Some(event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ClientEvent, ServerEvent};
    use crate::payload::SignalPayload;
    use crate::profile::ProfilePayload;
    use serde_json::json;

    #[test]
    fn test_text_decode_join() {
        let event: ClientEvent =
            decode(r#"{"event":"join","data":{"name":"Alice","age":27,"gender":"female"}}"#)
                .unwrap();
        assert_eq!(
            event,
            ClientEvent::Join(ProfilePayload::new("Alice", 27, "female"))
        );
    }

    #[test]
    fn test_text_decode_malformed() {
        assert!(matches!(
            decode::<ClientEvent>("not json"),
            Err(ProtocolError::Json(_))
        ));
        assert!(matches!(
            decode::<ClientEvent>(r#"{"event":"join","data":{"age":"old"}}"#),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn test_offer_payload_is_preserved() {
        let offer = SignalPayload::from_value(
            &json!({ "type": "offer", "sdp": "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\n" }),
        )
        .unwrap();
        let event = ServerEvent::Offer {
            offer: offer.clone(),
            from: "s-1".into(),
        };

        let text = encode(&event).unwrap();
        let decoded: ServerEvent = decode(&text).unwrap();
        match decoded {
            ServerEvent::Offer { offer: got, from } => {
                assert_eq!(got, offer);
                assert_eq!(from, "s-1");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_relayed_numbers_survive_byte_for_byte() {
        let candidate = r#"{"candidate":"candidate:1 1 UDP 2122252543 192.168.1.2 54321 typ host","big":123456789012345678901234567890,"f":1.10,"e":1e2}"#;
        let text = format!(r#"{{"event":"ice-candidate","data":{{"candidate":{}}}}}"#, candidate);

        let ClientEvent::IceCandidate { candidate: payload } = decode::<ClientEvent>(&text).unwrap()
        else {
            panic!("expected ice-candidate");
        };
        let forwarded = encode(&ServerEvent::IceCandidate {
            candidate: payload,
            from: "s-1".into(),
        })
        .unwrap();

        assert!(forwarded.contains(candidate), "payload rewritten: {}", forwarded);
        assert!(forwarded.contains(r#""f":1.10"#));
        assert!(forwarded.contains("123456789012345678901234567890"));
    }

    #[test]
    fn test_data_before_event_still_decodes() {
        let event: ClientEvent = decode(r#"{"data":{"offer":{"sdp":"v=0","n":1.10}},"event":"offer"}"#)
            .unwrap();
        assert_eq!(
            event,
            ClientEvent::Offer {
                offer: SignalPayload::from_json(r#"{"sdp":"v=0","n":1.10}"#).unwrap(),
            }
        );

        let stop: ClientEvent = decode(r#"{"data":null,"event":"stop"}"#).unwrap();
        assert_eq!(stop, ClientEvent::Stop);
    }

    #[test]
    fn test_binary_relayed_payload() {
        let event = ClientEvent::IceCandidate {
            candidate: SignalPayload::from_json(r#"{"candidate":"c","sdpMLineIndex":0}"#).unwrap(),
        };

        let encoded = encode_binary(&event).unwrap();
        let decoded: ClientEvent = decode_binary(&encoded).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_binary_decode_incomplete() {
        let encoded = encode_binary(&ClientEvent::Stop).unwrap();

        match decode_binary::<ClientEvent>(&encoded[..3]) {
            Err(ProtocolError::Incomplete(_)) => {}
            other => panic!("Expected Incomplete error, got {:?}", other),
        }
    }

    #[test]
    fn test_frame_too_large() {
        let event = ClientEvent::ChatMessage("x".repeat(MAX_FRAME_SIZE + 1));

        match encode(&event) {
            Err(ProtocolError::FrameTooLarge(_)) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_streaming_decode() {
        let first = ClientEvent::ChatMessage("hi".into());
        let second = ClientEvent::AcceptMatchRequest {
            from_socket_id: "s-7".into(),
        };

        let mut buf = BytesMut::new();
        encode_into(&first, &mut buf).unwrap();
        encode_into(&second, &mut buf).unwrap();

        let decoded1: ClientEvent = decode_from(&mut buf).unwrap().unwrap();
        let decoded2: ClientEvent = decode_from(&mut buf).unwrap().unwrap();

        assert_eq!(first, decoded1);
        assert_eq!(second, decoded2);
        assert!(buf.is_empty());
        assert!(decode_from::<ClientEvent>(&mut buf).unwrap().is_none());
    }
}
