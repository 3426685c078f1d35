//! Document & Attachment Model (spec.md §3 / §4.H), insofar as it carries
//! revision state and drives the write path's attachment diff.

use std::collections::HashMap;

use serde::de::{DeserializeOwned, Error as DeError};
use serde::ser::Error as SerError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Lifecycle of one attachment entry relative to the server's last known copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentState {
    /// Matches the server; `digest`/`length` are populated.
    Clean,
    /// New locally, not yet uploaded.
    Added,
    /// Exists on the server but the local bytes have changed.
    Modified,
    /// Marked for removal; retained in the set until the server confirms.
    Deleted,
}

/// One attachment, keyed by name within a document's `AttachmentSet`.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub name: String,
    pub content_type: String,
    pub digest: Option<String>,
    pub length: Option<u64>,
    pub inline_bytes: Option<Vec<u8>>,
    pub uri: Option<String>,
    pub document_id: Option<String>,
    pub document_rev: Option<String>,
    pub state: AttachmentState,
}

impl Attachment {
    /// A brand-new attachment, not yet known to the server.
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            digest: None,
            length: None,
            inline_bytes: Some(bytes),
            uri: None,
            document_id: None,
            document_rev: None,
            state: AttachmentState::Added,
        }
    }

    /// Replaces this attachment's bytes, marking it `Modified` unless it was
    /// already `Added` (still un-synced).
    pub fn replace_bytes(&mut self, bytes: Vec<u8>) {
        self.inline_bytes = Some(bytes);
        if self.state != AttachmentState::Added {
            self.state = AttachmentState::Modified;
        }
    }
}

pub type AttachmentSet = HashMap<String, Attachment>;

/// An ephemeral, client-side view of a server document: `{ id, rev,
/// attachments, payload }` (spec.md §3). `T` is the caller's typed payload.
#[derive(Debug, Clone)]
pub struct Document<T> {
    pub id: String,
    pub rev: Option<String>,
    pub attachments: AttachmentSet,
    pub payload: T,
}

impl<T> Document<T> {
    pub fn new(payload: T) -> Self {
        Self {
            id: String::new(),
            rev: None,
            attachments: HashMap::new(),
            payload,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Additions-before-deletions order for the attachment write path
    /// (spec.md §4.H): prevents a rename from racing as delete-then-add
    /// against a stale `rev`.
    pub fn attachment_sync_plan(&self) -> Vec<&Attachment> {
        let mut additions: Vec<&Attachment> = self
            .attachments
            .values()
            .filter(|a| matches!(a.state, AttachmentState::Added | AttachmentState::Modified))
            .collect();
        let mut deletions: Vec<&Attachment> = self
            .attachments
            .values()
            .filter(|a| a.state == AttachmentState::Deleted)
            .collect();
        additions.sort_by(|a, b| a.name.cmp(&b.name));
        deletions.sort_by(|a, b| a.name.cmp(&b.name));
        additions.append(&mut deletions);
        additions
    }
}

const RESERVED_KEYS: [&str; 2] = ["_id", "_rev"];

impl<'de, T> Deserialize<'de> for Document<T>
where
    T: DeserializeOwned,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut map = Map::deserialize(deserializer)?;
        let id = map
            .remove("_id")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let rev = map
            .remove("_rev")
            .and_then(|v| v.as_str().map(str::to_string));
        let attachments = match map.remove("_attachments") {
            Some(Value::Object(wire)) => parse_wire_attachments(wire).map_err(D::Error::custom)?,
            _ => HashMap::new(),
        };
        let payload: T = serde_json::from_value(Value::Object(map)).map_err(D::Error::custom)?;
        Ok(Document {
            id,
            rev,
            attachments,
            payload,
        })
    }
}

impl<T> Serialize for Document<T>
where
    T: Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let payload_value = serde_json::to_value(&self.payload).map_err(S::Error::custom)?;
        let mut map = match payload_value {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(S::Error::custom(format!(
                    "document payload must serialize to a JSON object, got {other}"
                )))
            }
        };
        for key in RESERVED_KEYS {
            map.remove(key);
        }
        if !self.id.is_empty() {
            map.insert("_id".to_string(), Value::String(self.id.clone()));
        }
        if let Some(rev) = &self.rev {
            map.insert("_rev".to_string(), Value::String(rev.clone()));
        }
        if !self.attachments.is_empty() {
            map.insert("_attachments".to_string(), render_wire_attachments(&self.attachments));
        }
        map.serialize(serializer)
    }
}

fn parse_wire_attachments(wire: Map<String, Value>) -> Result<AttachmentSet, String> {
    let mut out = HashMap::new();
    for (name, body) in wire {
        let obj = body
            .as_object()
            .ok_or_else(|| format!("attachment {name} is not an object"))?;
        let content_type = obj
            .get("content_type")
            .and_then(Value::as_str)
            .unwrap_or("application/octet-stream")
            .to_string();
        let digest = obj.get("digest").and_then(Value::as_str).map(str::to_string);
        let length = obj.get("length").and_then(Value::as_u64);
        out.insert(
            name.clone(),
            Attachment {
                name,
                content_type,
                digest,
                length,
                inline_bytes: None,
                uri: None,
                document_id: None,
                document_rev: None,
                state: AttachmentState::Clean,
            },
        );
    }
    Ok(out)
}

fn render_wire_attachments(attachments: &AttachmentSet) -> Value {
    let mut out = Map::new();
    for (name, attachment) in attachments {
        if attachment.state == AttachmentState::Deleted {
            continue;
        }
        let mut stub = Map::new();
        stub.insert("content_type".to_string(), Value::String(attachment.content_type.clone()));
        stub.insert("stub".to_string(), Value::Bool(true));
        if let Some(digest) = &attachment.digest {
            stub.insert("digest".to_string(), Value::String(digest.clone()));
        }
        if let Some(length) = attachment.length {
            stub.insert("length".to_string(), Value::from(length));
        }
        out.insert(name.clone(), Value::Object(stub));
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Person {
        name: String,
        age: u32,
    }

    #[test]
    fn round_trips_id_rev_and_payload() {
        let value = serde_json::json!({
            "_id": "abc",
            "_rev": "1-xyz",
            "name": "ada",
            "age": 30,
        });
        let doc: Document<Person> = serde_json::from_value(value).unwrap();
        assert_eq!(doc.id, "abc");
        assert_eq!(doc.rev.as_deref(), Some("1-xyz"));
        assert_eq!(doc.payload, Person { name: "ada".into(), age: 30 });

        let back = serde_json::to_value(&doc).unwrap();
        assert_eq!(back["_id"], "abc");
        assert_eq!(back["_rev"], "1-xyz");
        assert_eq!(back["name"], "ada");
    }

    #[test]
    fn sync_plan_orders_additions_before_deletions() {
        let mut doc = Document::new(Person { name: "ada".into(), age: 30 }).with_id("abc");
        doc.attachments.insert(
            "z.png".into(),
            Attachment {
                state: AttachmentState::Deleted,
                ..Attachment::new("z.png", "image/png", vec![])
            },
        );
        doc.attachments.insert("a.png".into(), Attachment::new("a.png", "image/png", vec![1, 2]));

        let plan = doc.attachment_sync_plan();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].name, "a.png");
        assert_eq!(plan[0].state, AttachmentState::Added);
        assert_eq!(plan[1].name, "z.png");
        assert_eq!(plan[1].state, AttachmentState::Deleted);
    }
}
