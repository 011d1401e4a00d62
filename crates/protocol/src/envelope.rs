use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::constants::MessageKind;

/// Errors produced while decoding or interpreting a frame.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message is not a JSON object")]
    NotAnObject,

    #[error("missing message type")]
    MissingType,
}

/// First-pass decode of an incoming frame.
///
/// Captures the `type` tag and optional `msgId`, and retains the full
/// object so handlers can deserialize a typed payload with [`parse`] or
/// pass an unrecognized message through verbatim with [`into_body`].
///
/// [`parse`]: Envelope::parse
/// [`into_body`]: Envelope::into_body
#[derive(Debug, Clone)]
pub struct Envelope {
    pub kind: MessageKind,
    /// Original wire tag, preserved even when `kind` is `Unknown`.
    pub type_name: String,
    /// Non-empty `msgId`, if the frame carried one.
    pub msg_id: Option<String>,
    body: Map<String, Value>,
}

impl Envelope {
    /// Decodes one text frame.
    ///
    /// Fails on malformed JSON, non-object payloads, and a missing or
    /// empty `type` field. An absent, empty, or non-string `msgId` decodes
    /// as `None`; whether that is an error depends on the message kind and
    /// is the dispatcher's call.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(body) = value else {
            return Err(ProtocolError::NotAnObject);
        };

        let type_name = body
            .get("type")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or(ProtocolError::MissingType)?
            .to_string();

        let msg_id = body
            .get("msgId")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        Ok(Self {
            kind: MessageKind::parse(&type_name),
            type_name,
            msg_id,
            body,
        })
    }

    /// Deserializes the retained object into a typed payload.
    ///
    /// Unknown fields (including `type` and `msgId`) are ignored by the
    /// target struct.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        Ok(serde_json::from_value(Value::Object(self.body.clone()))?)
    }

    /// Consumes the envelope and returns the raw object, for passthrough
    /// rebroadcast of unrecognized message types.
    pub fn into_body(self) -> Map<String, Value> {
        self.body
    }

    /// Reads a raw field from the retained object.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.body.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ClientHello;

    #[test]
    fn decode_known_kind() {
        let env =
            Envelope::decode(r#"{"type":"CLIENT_HELLO","incidentId":"I1","responderId":"A"}"#)
                .unwrap();
        assert_eq!(env.kind, MessageKind::ClientHello);
        assert_eq!(env.type_name, "CLIENT_HELLO");
        assert!(env.msg_id.is_none());
    }

    #[test]
    fn decode_captures_msg_id() {
        let env = Envelope::decode(r#"{"type":"CHAT_SEND","msgId":"m1","text":"hi"}"#).unwrap();
        assert_eq!(env.msg_id.as_deref(), Some("m1"));
    }

    #[test]
    fn empty_msg_id_is_none() {
        let env = Envelope::decode(r#"{"type":"CHAT_SEND","msgId":"","text":"hi"}"#).unwrap();
        assert!(env.msg_id.is_none());
    }

    #[test]
    fn non_string_msg_id_is_none() {
        let env = Envelope::decode(r#"{"type":"CHAT_SEND","msgId":7,"text":"hi"}"#).unwrap();
        assert!(env.msg_id.is_none());
    }

    #[test]
    fn unknown_kind_retains_tag() {
        let env = Envelope::decode(r#"{"type":"RADIO_CHECK","msgId":"r1"}"#).unwrap();
        assert_eq!(env.kind, MessageKind::Unknown);
        assert_eq!(env.type_name, "RADIO_CHECK");
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            Envelope::decode("not json {{{"),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn rejects_non_object() {
        assert!(matches!(
            Envelope::decode(r#"["CLIENT_HELLO"]"#),
            Err(ProtocolError::NotAnObject)
        ));
    }

    #[test]
    fn rejects_missing_type() {
        assert!(matches!(
            Envelope::decode(r#"{"msgId":"m1"}"#),
            Err(ProtocolError::MissingType)
        ));
        assert!(matches!(
            Envelope::decode(r#"{"type":""}"#),
            Err(ProtocolError::MissingType)
        ));
        assert!(matches!(
            Envelope::decode(r#"{"type":42}"#),
            Err(ProtocolError::MissingType)
        ));
    }

    #[test]
    fn parse_typed_payload() {
        let env =
            Envelope::decode(r#"{"type":"CLIENT_HELLO","incidentId":"I1","responderId":"A"}"#)
                .unwrap();
        let hello: ClientHello = env.parse().unwrap();
        assert_eq!(hello.incident_id, "I1");
        assert_eq!(hello.responder_id, "A");
    }

    #[test]
    fn parse_missing_field_fails() {
        let env = Envelope::decode(r#"{"type":"CLIENT_HELLO","incidentId":"I1"}"#).unwrap();
        assert!(env.parse::<ClientHello>().is_err());
    }

    #[test]
    fn into_body_keeps_extra_fields() {
        let env = Envelope::decode(r#"{"type":"RADIO_CHECK","msgId":"r1","channel":3}"#).unwrap();
        let body = env.into_body();
        assert_eq!(body.get("channel"), Some(&serde_json::json!(3)));
        assert_eq!(body.get("type"), Some(&serde_json::json!("RADIO_CHECK")));
    }
}
