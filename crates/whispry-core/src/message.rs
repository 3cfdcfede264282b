//! Canonical message shape and the normalizer for the backend's wire shapes.
//!
//! Several backend revisions are live at once, so inbound records arrive with
//! camelCase, snake_case, nested (`sender: {id}`) or legacy Turkish field names.
//! Everything downstream works on [`Message`] only.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{domain::UserId, Result};

/// Canonical unit of conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub sender_id: Option<UserId>,
    pub receiver_id: Option<UserId>,
    pub content: String,
    pub timestamp: Option<String>,
}

/// Payload of a local send, as published on the push channel and posted to
/// the REST fallback.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub timestamp: String,
}

impl OutgoingMessage {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Locally rendered copy of this payload under a synthetic id.
    pub fn to_optimistic(&self, local_id: String) -> Message {
        Message {
            id: Some(local_id),
            sender_id: Some(self.sender_id.clone()),
            receiver_id: Some(self.receiver_id.clone()),
            content: self.content.clone(),
            timestamp: Some(self.timestamp.clone()),
        }
    }
}

/// Identity of a logical message across delivery channels.
///
/// The id is deliberately excluded: optimistic sends have no server id yet.
/// Two distinct messages with equal sender, receiver, content and timestamp
/// collapse into one.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DedupKey {
    sender_id: Option<UserId>,
    receiver_id: Option<UserId>,
    content: String,
    timestamp: Option<String>,
}

impl Message {
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            sender_id: self.sender_id.clone(),
            receiver_id: self.receiver_id.clone(),
            content: self.content.clone(),
            timestamp: self.timestamp.clone(),
        }
    }

    /// True when `{sender, receiver}` is the unordered pair `{me, peer}`.
    pub fn is_between(&self, me: &UserId, peer: &UserId) -> bool {
        let (Some(sender), Some(receiver)) = (&self.sender_id, &self.receiver_id) else {
            return false;
        };
        (sender == me && receiver == peer) || (sender == peer && receiver == me)
    }
}

const ID_KEYS: &[&str] = &["id", "messageId", "message_id", "mesajId"];
const SENDER_KEYS: &[&str] = &["senderId", "sender_id", "sender", "gonderenId", "gonderen", "from"];
const RECEIVER_KEYS: &[&str] = &["receiverId", "receiver_id", "receiver", "aliciId", "alici", "to"];
const CONTENT_KEYS: &[&str] = &["content", "text", "message", "icerik", "mesaj", "body"];
const TIMESTAMP_KEYS: &[&str] = &[
    "timestamp",
    "createdAt",
    "created_at",
    "sentAt",
    "sent_at",
    "tarih",
    "zaman",
];

/// Map a raw record in any known wire shape to a [`Message`].
///
/// Total: unknown shapes and non-object input produce blank fields instead of
/// an error so one odd record never fails a whole history batch.
pub fn normalize(raw: &Value) -> Message {
    let Some(obj) = raw.as_object() else {
        return Message {
            id: None,
            sender_id: None,
            receiver_id: None,
            content: String::new(),
            timestamp: None,
        };
    };

    let first = |keys: &[&str]| keys.iter().find_map(|k| obj.get(*k).filter(|v| !v.is_null()));

    Message {
        id: first(ID_KEYS).and_then(scalar_string),
        sender_id: first(SENDER_KEYS).and_then(participant_id).map(UserId),
        receiver_id: first(RECEIVER_KEYS).and_then(participant_id).map(UserId),
        content: first(CONTENT_KEYS)
            .and_then(scalar_string)
            .unwrap_or_default(),
        timestamp: first(TIMESTAMP_KEYS).and_then(scalar_string),
    }
}

/// Parse a push frame body (JSON) and normalize it.
pub fn parse_push_body(body: &str) -> Result<Message> {
    let value: Value = serde_json::from_str(body)?;
    Ok(normalize(&value))
}

/// Participant fields are either a scalar id or an embedded user object.
fn participant_id(v: &Value) -> Option<String> {
    match v {
        Value::Object(user) => ["id", "userId", "kullaniciId"]
            .iter()
            .find_map(|k| user.get(*k))
            .and_then(scalar_string),
        other => scalar_string(other),
    }
}

fn scalar_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_current_shape() {
        let m = normalize(&json!({
            "id": 10,
            "senderId": "1",
            "receiverId": "2",
            "content": "hi",
            "timestamp": "2025-01-01T10:00:00Z"
        }));
        assert_eq!(m.id.as_deref(), Some("10"));
        assert_eq!(m.sender_id, Some(UserId::from("1")));
        assert_eq!(m.receiver_id, Some(UserId::from("2")));
        assert_eq!(m.content, "hi");
        assert_eq!(m.timestamp.as_deref(), Some("2025-01-01T10:00:00Z"));
    }

    #[test]
    fn numeric_and_string_ids_compare_equal() {
        let a = normalize(&json!({"senderId": 7, "receiverId": 8, "content": "x", "timestamp": "T"}));
        let b = normalize(&json!({"senderId": "7", "receiverId": "8", "content": "x", "timestamp": "T"}));
        assert_eq!(a.sender_id, b.sender_id);
        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn normalizes_nested_and_legacy_shapes() {
        let nested = normalize(&json!({
            "sender": {"id": 3, "isim": "Ada"},
            "receiver": {"id": 4},
            "text": "nested",
            "createdAt": "T1"
        }));
        assert_eq!(nested.sender_id, Some(UserId::from("3")));
        assert_eq!(nested.receiver_id, Some(UserId::from("4")));
        assert_eq!(nested.content, "nested");
        assert_eq!(nested.timestamp.as_deref(), Some("T1"));

        let legacy = normalize(&json!({
            "gonderenId": 5,
            "aliciId": 6,
            "icerik": "merhaba",
            "tarih": "T2"
        }));
        assert_eq!(legacy.sender_id, Some(UserId::from("5")));
        assert_eq!(legacy.receiver_id, Some(UserId::from("6")));
        assert_eq!(legacy.content, "merhaba");
        assert_eq!(legacy.timestamp.as_deref(), Some("T2"));

        let snake = normalize(&json!({"sender_id": 1, "receiver_id": 2, "content": "s", "created_at": "T3"}));
        assert_eq!(snake.sender_id, Some(UserId::from("1")));
        assert_eq!(snake.timestamp.as_deref(), Some("T3"));
    }

    #[test]
    fn missing_fields_normalize_to_blank() {
        let m = normalize(&json!({"content": "only"}));
        assert!(m.id.is_none());
        assert!(m.sender_id.is_none());
        assert!(m.receiver_id.is_none());
        assert!(m.timestamp.is_none());

        let m = normalize(&json!({"senderId": null, "content": null}));
        assert!(m.sender_id.is_none());
        assert_eq!(m.content, "");
    }

    #[test]
    fn non_object_input_does_not_fail() {
        for raw in [json!(null), json!(42), json!("text"), json!([1, 2])] {
            let m = normalize(&raw);
            assert!(m.sender_id.is_none());
            assert_eq!(m.content, "");
        }
    }

    #[test]
    fn malformed_push_body_is_an_error() {
        assert!(parse_push_body("{not json").is_err());
        let m = parse_push_body(r#"{"senderId":1,"receiverId":2,"content":"ok"}"#).unwrap();
        assert_eq!(m.content, "ok");
    }

    #[test]
    fn dedup_key_ignores_id() {
        let a = normalize(&json!({"id": 1, "senderId": 1, "receiverId": 2, "content": "x", "timestamp": "T"}));
        let b = normalize(&json!({"senderId": 1, "receiverId": 2, "content": "x", "timestamp": "T"}));
        assert_eq!(a.dedup_key(), b.dedup_key());

        let c = normalize(&json!({"senderId": 1, "receiverId": 2, "content": "x", "timestamp": "T2"}));
        assert_ne!(a.dedup_key(), c.dedup_key());
    }

    #[test]
    fn is_between_matches_both_directions() {
        let me = UserId::from("1");
        let peer = UserId::from("2");
        let out = normalize(&json!({"senderId": 1, "receiverId": 2, "content": "a"}));
        let inc = normalize(&json!({"senderId": 2, "receiverId": 1, "content": "b"}));
        let other = normalize(&json!({"senderId": 3, "receiverId": 1, "content": "c"}));
        assert!(out.is_between(&me, &peer));
        assert!(inc.is_between(&me, &peer));
        assert!(!other.is_between(&me, &peer));
    }

    #[test]
    fn outgoing_serializes_camel_case() {
        let out = OutgoingMessage {
            sender_id: UserId::from("2"),
            receiver_id: UserId::from("1"),
            content: "yo".to_string(),
            timestamp: "T".to_string(),
        };
        let v: Value = serde_json::from_str(&out.to_json().unwrap()).unwrap();
        assert_eq!(
            v,
            json!({"senderId": "2", "receiverId": "1", "content": "yo", "timestamp": "T"})
        );
    }
}
