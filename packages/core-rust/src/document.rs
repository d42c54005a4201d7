//! Insertion-ordered documents.
//!
//! A [`Document`] is the structured payload of every request and reply. Field
//! order is significant: the first field of a command body names the command.
//!
//! Typed structs cross into and out of documents through serde
//! ([`to_document`] / [`from_document`]); attached document sequences use the
//! named `MsgPack` encoding ([`Document::to_msgpack`] / [`Document::from_msgpack`]).

use std::fmt;

use serde::de::{DeserializeOwned, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::types::Value;

/// Errors converting between documents and typed values or encodings.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("{0}")]
    Convert(#[from] serde_json::Error),
    #[error("value did not serialize to a document (got {type_name})")]
    NotADocument { type_name: &'static str },
    #[error("msgpack encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("msgpack decode failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// An ordered list of named fields.
///
/// Duplicate field names are representable (as on the wire) but
/// [`Document::insert`] replaces in place, so documents built through the
/// normal API stay unique.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    fields: Vec<(String, Value)>,
}

impl Document {
    /// Creates an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the document has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns the first field, which for a command body names the command.
    #[must_use]
    pub fn first(&self) -> Option<(&str, &Value)> {
        self.fields.first().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns the first value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Mutable access to the first value stored under `key`.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.fields
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// String value under `key`, if present and a string.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Nested document under `key`, if present and a map.
    #[must_use]
    pub fn get_document(&self, key: &str) -> Option<&Document> {
        self.get(key).and_then(Value::as_document)
    }

    /// Whether a field named `key` exists.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.iter().any(|(k, _)| k == key)
    }

    /// Sets `key` to `value`, replacing an existing field in place or
    /// appending a new one at the end.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((key, value)),
        }
    }

    /// Appends a field without checking for an existing one.
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.push((key.into(), value.into()));
    }

    /// Removes every field named `key`, returning the first removed value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let pos = self.fields.iter().position(|(k, _)| k == key)?;
        let (_, value) = self.fields.remove(pos);
        self.fields.retain(|(k, _)| k != key);
        Some(value)
    }

    /// Removes all fields.
    pub fn clear(&mut self) {
        self.fields.clear();
    }

    /// Iterates over fields in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterates over field names in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    /// Appends every field of `other` that is not already present.
    pub fn extend_missing(&mut self, other: &Document) {
        for (k, v) in other.iter() {
            if !self.contains_key(k) {
                self.append(k, v.clone());
            }
        }
    }

    /// Encodes the document as named `MsgPack`.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Encode`] if serialization fails.
    pub fn to_msgpack(&self) -> Result<Vec<u8>, DocumentError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// Decodes a document from named `MsgPack`.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Decode`] if the bytes are not a `MsgPack` map.
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, DocumentError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(s) => f.write_str(&s),
            Err(_) => f.write_str("{<unprintable>}"),
        }
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

struct DocumentVisitor;

impl<'de> Visitor<'de> for DocumentVisitor {
    type Value = Document;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a document")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Document, A::Error> {
        let mut doc = Document::new();
        while let Some((key, value)) = map.next_entry::<String, Value>()? {
            doc.append(key, value);
        }
        Ok(doc)
    }
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(DocumentVisitor)
    }
}

/// Serializes a typed value into a document, keeping struct field order.
///
/// # Errors
///
/// Returns [`DocumentError::NotADocument`] when the value does not serialize
/// to a map (for example a bare integer), or a conversion error.
pub fn to_document<T: Serialize + ?Sized>(value: &T) -> Result<Document, DocumentError> {
    match serde_json::from_value::<Value>(serde_json::to_value(value)?)? {
        Value::Map(doc) => Ok(doc),
        other => Err(DocumentError::NotADocument {
            type_name: other.type_name(),
        }),
    }
}

/// Deserializes a typed value from a document. Unknown fields are ignored
/// unless the target type opts into `deny_unknown_fields`.
///
/// # Errors
///
/// Returns [`DocumentError::Convert`] describing the first mismatching field.
pub fn from_document<T: DeserializeOwned>(doc: &Document) -> Result<T, DocumentError> {
    Ok(serde_json::from_value(serde_json::to_value(doc)?)?)
}

/// Builds a [`Document`] from `key => value` pairs, preserving order.
///
/// ```
/// use docket_core::doc;
///
/// let body = doc! { "find" => "users", "limit" => 10 };
/// assert_eq!(body.first().map(|(k, _)| k), Some("find"));
/// ```
#[macro_export]
macro_rules! doc {
    () => { $crate::Document::new() };
    ( $( $key:expr => $value:expr ),+ $(,)? ) => {{
        let mut doc = $crate::Document::new();
        $( doc.append($key, $crate::Value::from($value)); )+
        doc
    }};
}
