use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// Reserved metadata field names present on every indexed document.
pub mod fields {
    pub const ID: &str = "_id";
    pub const CREATED: &str = "_createdTimestamp";
    pub const MODIFIED: &str = "_modifiedTimestamp";
    pub const FULL_TEXT: &str = "_full_text";

    pub const METADATA: [&str; 3] = [ID, CREATED, MODIFIED];

    /// True for `_id`, `_createdTimestamp`, `_modifiedTimestamp`.
    pub fn is_metadata(name: &str) -> bool {
        METADATA.contains(&name)
    }
}

/// A dynamically typed document value.
///
/// All numeric widths normalize to `f64`; integer/float distinctions are
/// not preserved. Timestamps are UTC with 100-nanosecond resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Guid(Uuid),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_guid(&self) -> Option<Uuid> {
        match self {
            Value::Guid(g) => Some(*g),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Append the full-text string forms of this value to `out`, one line
    /// per leaf. Nulls contribute nothing; arrays and objects flatten
    /// recursively.
    pub(crate) fn append_full_text(&self, out: &mut Vec<String>) {
        match self {
            Value::Null => {}
            Value::Bool(b) => out.push(b.to_string()),
            Value::Number(n) => out.push(format_number(*n)),
            Value::Text(s) => out.push(s.clone()),
            Value::Timestamp(ts) => out.push(ts.format("%Y-%m-%d").to_string()),
            Value::Guid(g) => out.push(g.to_string()),
            Value::Array(items) => {
                for item in items {
                    item.append_full_text(out);
                }
            }
            Value::Object(map) => {
                for value in map.values() {
                    value.append_full_text(out);
                }
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Uuid> for Value {
    fn from(g: Uuid) -> Self {
        Value::Guid(g)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self {
        Value::Timestamp(ts)
    }
}

/// Invariant, non-localized number format: integral doubles print with
/// no fractional part (`3`, not `3.0`).
pub(crate) fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// The number of 100-nanosecond intervals since the Unix epoch.
pub fn timestamp_ticks(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp() * 10_000_000 + i64::from(ts.timestamp_subsec_nanos() / 100)
}

/// A keyed map of values with reserved metadata fields.
///
/// `_id` is the document's stable identity (generated on insert if
/// absent); `_createdTimestamp` and `_modifiedTimestamp` are stamped by
/// the owning collection. All other keys are user-defined.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(BTreeMap<String, Value>);

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn id(&self) -> Option<Uuid> {
        self.0.get(fields::ID).and_then(Value::as_guid)
    }

    pub fn set_id(&mut self, id: Uuid) {
        self.0.insert(fields::ID.to_string(), Value::Guid(id));
    }

    pub fn created_timestamp(&self) -> Option<DateTime<Utc>> {
        self.0.get(fields::CREATED).and_then(Value::as_timestamp)
    }

    pub fn modified_timestamp(&self) -> Option<DateTime<Utc>> {
        self.0.get(fields::MODIFIED).and_then(Value::as_timestamp)
    }

    pub(crate) fn stamp_created(&mut self, ts: DateTime<Utc>) {
        self.0.insert(fields::CREATED.to_string(), Value::Timestamp(ts));
        self.0.insert(fields::MODIFIED.to_string(), Value::Timestamp(ts));
    }

    pub(crate) fn stamp_modified(&mut self, ts: DateTime<Utc>) {
        self.0.insert(fields::MODIFIED.to_string(), Value::Timestamp(ts));
    }

    /// Serialize for the KV store. The tagged representation round-trips
    /// the value model losslessly, including Timestamp and Guid tags.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl From<BTreeMap<String, Value>> for Document {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Document(map)
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Document(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_round_trip() {
        let mut doc = Document::new();
        doc.set_id(Uuid::new_v4());
        doc.set("title", "Hello");
        doc.set("count", 3.0);
        doc.set("flag", true);
        doc.set("when", Utc::now());
        doc.set("tags", Value::Array(vec!["a".into(), "b".into()]));
        let mut author = BTreeMap::new();
        author.insert("name".to_string(), Value::Text("Ada".into()));
        author.insert("age".to_string(), Value::Number(36.0));
        doc.set("author", Value::Object(author));
        doc.set("nothing", Value::Null);

        let bytes = doc.to_bytes().unwrap();
        let restored = Document::from_bytes(&bytes).unwrap();
        assert_eq!(doc, restored);

        // A second pass through the encoding is identical.
        assert_eq!(bytes, restored.to_bytes().unwrap());
    }

    #[test]
    fn id_accessor_requires_guid() {
        let mut doc = Document::new();
        assert_eq!(doc.id(), None);
        doc.set(fields::ID, "not-a-guid");
        assert_eq!(doc.id(), None);
        let id = Uuid::new_v4();
        doc.set_id(id);
        assert_eq!(doc.id(), Some(id));
    }

    #[test]
    fn number_format_is_invariant() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-2.0), "-2");
        assert_eq!(format_number(3.5), "3.5");
        assert_eq!(format_number(0.0), "0");
    }

    #[test]
    fn ticks_resolution() {
        let ts = DateTime::parse_from_rfc3339("1970-01-01T00:00:01.0000001Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(timestamp_ticks(&ts), 10_000_001);
    }

    #[test]
    fn full_text_flattens_nested_values() {
        let mut doc = Document::new();
        doc.set("n", 3.0);
        doc.set("b", false);
        doc.set("tags", Value::Array(vec!["x".into(), Value::Null, "y".into()]));

        let mut lines = Vec::new();
        for (_, value) in doc.iter() {
            value.append_full_text(&mut lines);
        }
        assert_eq!(lines, vec!["false", "3", "x", "y"]);
    }
}
