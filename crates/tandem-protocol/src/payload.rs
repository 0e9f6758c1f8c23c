//! Opaque negotiation payloads.

use serde::de::Error as _;
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::value::RawValue;
use serde_json::Value;
use std::fmt;

/// An offer, answer or ICE candidate, exactly as the client sent it.
///
/// JSON text frames keep the original bytes and write them back verbatim:
/// number spelling, key order and whitespace inside the payload survive the
/// relay. MessagePack frames carry no JSON text, so a payload read from one
/// is stored in compact JSON form.
#[derive(Clone)]
pub struct SignalPayload(Box<RawValue>);

impl SignalPayload {
    /// Wrap a JSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if `json` is not valid JSON.
    pub fn from_json(json: impl Into<String>) -> Result<Self, serde_json::Error> {
        RawValue::from_string(json.into()).map(Self)
    }

    /// Serialize a JSON value into a payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be serialized.
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        serde_json::value::to_raw_value(value).map(Self)
    }

    /// The payload text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.get()
    }

    /// Parse the payload into a JSON value.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored text is not valid JSON.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(self.as_str())
    }
}

impl PartialEq for SignalPayload {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl fmt::Debug for SignalPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SignalPayload").field(&self.as_str()).finish()
    }
}

impl fmt::Display for SignalPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for SignalPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            self.0.serialize(serializer)
        } else {
            self.to_value()
                .map_err(S::Error::custom)?
                .serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for SignalPayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            Box::<RawValue>::deserialize(deserializer).map(Self)
        } else {
            let value = Value::deserialize(deserializer)?;
            Self::from_value(&value).map_err(D::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_is_kept_verbatim() {
        let text = r#"{ "sdpMLineIndex": 0, "big": 123456789012345678901234567890, "f": 1.10 }"#;
        let payload: SignalPayload = serde_json::from_str(text).unwrap();

        assert_eq!(payload.as_str(), text);
        assert_eq!(serde_json::to_string(&payload).unwrap(), text);
    }

    #[test]
    fn test_invalid_json_rejected() {
        assert!(SignalPayload::from_json("{\"sdp\":").is_err());
    }

    #[test]
    fn test_from_value() {
        let payload = SignalPayload::from_value(&json!({ "type": "answer", "sdp": "v=0" })).unwrap();
        assert_eq!(payload.as_str(), r#"{"type":"answer","sdp":"v=0"}"#);
        assert_eq!(payload.to_value().unwrap()["type"], "answer");
    }

    #[test]
    fn test_messagepack_roundtrip_keeps_value() {
        let payload = SignalPayload::from_json(r#"{"candidate":"c","sdpMid":"0","sdpMLineIndex":1}"#)
            .unwrap();

        let bytes = rmp_serde::to_vec_named(&payload).unwrap();
        let decoded: SignalPayload = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded, payload);
    }
}
