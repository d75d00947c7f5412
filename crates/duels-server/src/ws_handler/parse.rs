use serde::{de::DeserializeOwned, Deserialize};

#[derive(Debug, Deserialize)]
pub(super) struct IncomingEnvelope {
    #[serde(rename = "type")]
    pub(super) event_type: String,
    #[serde(default)]
    pub(super) payload: serde_json::Value,
}

pub(super) fn parse_incoming_envelope(raw: &str) -> Option<IncomingEnvelope> {
    serde_json::from_str(raw).ok()
}

/// A missing payload decodes like an empty object so all-default requests work.
pub(super) fn decode_payload<T: DeserializeOwned>(payload: serde_json::Value) -> Option<T> {
    let payload = match payload {
        serde_json::Value::Null => serde_json::Value::Object(Default::default()),
        other => other,
    };
    serde_json::from_value(payload).ok()
}
