use serde_json::Value;

use crate::error::QueueError;

/// Something that can be pushed onto the queue.
///
/// Text is pushed verbatim; JSON values are encoded first.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueMessage {
    Text(String),
    Json(Value),
}

impl QueueMessage {
    pub fn into_payload(self) -> Result<String, QueueError> {
        match self {
            QueueMessage::Text(text) => Ok(text),
            QueueMessage::Json(value) => Ok(serde_json::to_string(&value)?),
        }
    }
}

impl From<String> for QueueMessage {
    fn from(text: String) -> Self {
        QueueMessage::Text(text)
    }
}

impl From<&str> for QueueMessage {
    fn from(text: &str) -> Self {
        QueueMessage::Text(text.to_string())
    }
}

impl From<Value> for QueueMessage {
    fn from(value: Value) -> Self {
        QueueMessage::Json(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_is_sent_unchanged() {
        let payload = QueueMessage::from("not json {").into_payload().unwrap();
        assert_eq!(payload, "not json {");
    }

    #[test]
    fn json_is_encoded() {
        let payload = QueueMessage::from(json!({ "choice": "a" }))
            .into_payload()
            .unwrap();
        assert_eq!(payload, r#"{"choice":"a"}"#);
    }
}
