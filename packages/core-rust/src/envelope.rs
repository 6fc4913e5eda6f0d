//! The `{id, data}` envelope carried by every inbound and outbound frame.
//!
//! Inbound frames are validated by [`decode_frame`]: the raw bytes must be
//! UTF-8, parse as a JSON object, and carry a numeric `id` and an object
//! `data`. Additional top-level fields are ignored. Outbound frames are
//! produced by [`Envelope::to_json`] and have exactly the same shape.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::packet::PacketKind;

/// Handler-specific payload carried under the `data` key.
///
/// Opaque to the transport layer; only handlers interpret it.
pub type Payload = Map<String, Value>;

/// Reasons a raw frame is rejected before it reaches dispatch.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("frame has no `id` field")]
    MissingId,
    #[error("frame `id` is not a number")]
    IdNotNumeric,
    #[error("frame has no `data` field")]
    MissingData,
    #[error("frame `data` is not an object")]
    DataNotObject,
}

impl FrameError {
    /// Short stable label, used as a metrics label and in log fields.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::InvalidUtf8(_) => "invalid_utf8",
            Self::Json(_) => "invalid_json",
            Self::NotAnObject => "not_an_object",
            Self::MissingId => "missing_id",
            Self::IdNotNumeric => "id_not_numeric",
            Self::MissingData => "missing_data",
            Self::DataNotObject => "data_not_object",
        }
    }
}

/// A decoded wire message: message type identifier plus payload.
///
/// `id` keeps the exact JSON number received so a forwarded envelope is
/// byte-for-byte faithful to what the client sent; [`Envelope::message_id`]
/// narrows it to an integer for routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Number,
    pub data: Payload,
}

impl Envelope {
    /// Builds an envelope from any integer-like id and a payload map.
    #[must_use]
    pub fn new(id: impl Into<Number>, data: Payload) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    /// Builds an envelope whose payload is the serde representation of `data`.
    ///
    /// # Errors
    ///
    /// Returns `FrameError::Json` if `data` fails to serialize and
    /// `FrameError::DataNotObject` if it serializes to anything but an object.
    pub fn from_payload<T: Serialize>(id: impl Into<Number>, data: &T) -> Result<Self, FrameError> {
        match serde_json::to_value(data)? {
            Value::Object(map) => Ok(Self::new(id, map)),
            _ => Err(FrameError::DataNotObject),
        }
    }

    /// The message type as an unsigned integer.
    ///
    /// Integral floats such as `1.0` or `1e0` name the same type as `1`.
    /// `None` for negative or fractional ids. Such envelopes are well formed
    /// but can never match a registered handler.
    #[must_use]
    #[allow(
        clippy::float_cmp,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn message_id(&self) -> Option<u64> {
        // 2^64, the first float above every u64.
        const U64_BOUND: f64 = 18_446_744_073_709_551_616.0;

        if let Some(id) = self.id.as_u64() {
            return Some(id);
        }
        let id = self.id.as_f64()?;
        (id.fract() == 0.0 && (0.0..U64_BOUND).contains(&id)).then_some(id as u64)
    }

    /// The catalogued packet kind, if the id names one.
    #[must_use]
    pub fn kind(&self) -> Option<PacketKind> {
        self.message_id()
            .and_then(|id| PacketKind::try_from(id).ok())
    }

    /// Serializes the envelope to its JSON text form.
    ///
    /// # Errors
    ///
    /// Propagates `serde_json` serialization failures.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Validates a raw frame and extracts its envelope.
///
/// # Errors
///
/// Returns the first `FrameError` encountered: UTF-8 decoding, JSON parsing,
/// then the shape of `id` and `data`.
pub fn decode_frame(raw: &[u8]) -> Result<Envelope, FrameError> {
    let text = std::str::from_utf8(raw)?;
    decode_text(text)
}

/// Same as [`decode_frame`] for frames already known to be text.
///
/// # Errors
///
/// See [`decode_frame`].
pub fn decode_text(text: &str) -> Result<Envelope, FrameError> {
    let Value::Object(mut fields) = serde_json::from_str::<Value>(text)? else {
        return Err(FrameError::NotAnObject);
    };

    let id = match fields.remove("id") {
        Some(Value::Number(id)) => id,
        Some(_) => return Err(FrameError::IdNotNumeric),
        None => return Err(FrameError::MissingId),
    };

    let data = match fields.remove("data") {
        Some(Value::Object(data)) => data,
        Some(_) => return Err(FrameError::DataNotObject),
        None => return Err(FrameError::MissingData),
    };

    Ok(Envelope { id, data })
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_well_formed_frame() {
        let env = decode_frame(br#"{"id": 1, "data": {"username": "a", "password": "b"}}"#)
            .unwrap();
        assert_eq!(env.message_id(), Some(1));
        assert_eq!(env.kind(), Some(PacketKind::SignIn));
        assert_eq!(env.data["username"], "a");
        assert_eq!(env.data["password"], "b");
    }

    #[test]
    fn ignores_extra_top_level_fields() {
        let env = decode_text(r#"{"id": 7, "data": {}, "seq": 3}"#).unwrap();
        assert_eq!(env.message_id(), Some(7));
        assert!(env.data.is_empty());
    }

    #[test]
    fn rejects_invalid_utf8() {
        let err = decode_frame(&[0x7b, 0xff, 0xfe, 0x7d]).unwrap_err();
        assert!(matches!(err, FrameError::InvalidUtf8(_)));
    }

    #[test]
    fn rejects_unparseable_json() {
        let err = decode_text("{not json").unwrap_err();
        assert!(matches!(err, FrameError::Json(_)));
        assert_eq!(err.label(), "invalid_json");
    }

    #[test]
    fn rejects_non_object_json() {
        assert!(matches!(decode_text("[1, 2]"), Err(FrameError::NotAnObject)));
        assert!(matches!(decode_text("null"), Err(FrameError::NotAnObject)));
        assert!(matches!(decode_text("\"hi\""), Err(FrameError::NotAnObject)));
    }

    #[test]
    fn rejects_bad_id() {
        assert!(matches!(
            decode_text(r#"{"data": {}}"#),
            Err(FrameError::MissingId)
        ));
        assert!(matches!(
            decode_text(r#"{"id": "1", "data": {}}"#),
            Err(FrameError::IdNotNumeric)
        ));
        assert!(matches!(
            decode_text(r#"{"id": null, "data": {}}"#),
            Err(FrameError::IdNotNumeric)
        ));
    }

    #[test]
    fn rejects_bad_data() {
        assert!(matches!(
            decode_text(r#"{"id": 1}"#),
            Err(FrameError::MissingData)
        ));
        assert!(matches!(
            decode_text(r#"{"id": 1, "data": null}"#),
            Err(FrameError::DataNotObject)
        ));
        assert!(matches!(
            decode_text(r#"{"id": 1, "data": [1]}"#),
            Err(FrameError::DataNotObject)
        ));
    }

    #[test]
    fn fractional_and_negative_ids_are_well_formed_but_unroutable() {
        let frac = decode_text(r#"{"id": 1.5, "data": {}}"#).unwrap();
        assert_eq!(frac.message_id(), None);
        assert_eq!(frac.kind(), None);

        let neg = decode_text(r#"{"id": -3, "data": {}}"#).unwrap();
        assert_eq!(neg.message_id(), None);

        let neg_float = decode_text(r#"{"id": -2.0, "data": {}}"#).unwrap();
        assert_eq!(neg_float.message_id(), None);

        let huge = decode_text(r#"{"id": 1e30, "data": {}}"#).unwrap();
        assert_eq!(huge.message_id(), None);
    }

    #[test]
    fn integral_float_ids_route_like_integers() {
        for text in [
            r#"{"id": 1.0, "data": {}}"#,
            r#"{"id": 1e0, "data": {}}"#,
            r#"{"id": 0.1e1, "data": {}}"#,
        ] {
            let env = decode_text(text).unwrap();
            assert_eq!(env.message_id(), Some(1), "{text}");
            assert_eq!(env.kind(), Some(PacketKind::SignIn), "{text}");
        }
    }

    #[test]
    fn outbound_envelope_has_exact_shape() {
        let mut data = Payload::new();
        data.insert("username".to_string(), json!("a"));
        let env = Envelope::new(2_u64, data);

        let text = env.to_json().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"id": 2, "data": {"username": "a"}}));
    }

    #[test]
    fn from_payload_requires_object() {
        let err = Envelope::from_payload(1_u64, &vec![1, 2, 3]).unwrap_err();
        assert!(matches!(err, FrameError::DataNotObject));

        let env = Envelope::from_payload(1_u64, &json!({"k": "v"})).unwrap();
        assert_eq!(env.data["k"], "v");
    }

    proptest! {
        #[test]
        fn scalar_frames_never_decode(n in any::<i64>(), s in "[a-z]{0,12}", b in any::<bool>()) {
            prop_assert!(decode_text(&n.to_string()).is_err());
            prop_assert!(decode_text(&json!(s).to_string()).is_err());
            prop_assert!(decode_text(&b.to_string()).is_err());
        }

        #[test]
        fn numeric_id_with_object_data_always_decodes(id in any::<u32>(), key in "[a-z]{1,8}", val in any::<i32>()) {
            let frame = json!({"id": id, "data": {key.clone(): val}}).to_string();
            let env = decode_text(&frame).unwrap();
            prop_assert_eq!(env.message_id(), Some(u64::from(id)));
            prop_assert_eq!(&env.data[&key], &json!(val));
        }

        #[test]
        fn non_object_data_never_decodes(id in any::<u32>(), val in any::<i64>()) {
            let frame = json!({"id": id, "data": val}).to_string();
            prop_assert!(matches!(decode_text(&frame), Err(FrameError::DataNotObject)));
        }
    }
}
