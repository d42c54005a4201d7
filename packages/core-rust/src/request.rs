//! Decoded client requests.
//!
//! An [`OpMsgRequest`] is what the transport hands to the dispatcher: the
//! target database, a command body whose first field names the command, and
//! zero or more attached [`DocumentSequence`]s.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::document::{Document, DocumentError};
use crate::types::Value;

/// Body field carrying the target database.
pub const DB_FIELD: &str = "$db";

/// Arguments every command accepts regardless of its own parameters. They are
/// stripped before typed parsing and before forwarding a request elsewhere.
pub const GENERIC_ARGUMENTS: &[&str] = &[
    "$db",
    "maxTimeMS",
    "readConcern",
    "writeConcern",
    "apiVersion",
    "apiStrict",
    "apiDeprecationErrors",
    "lsid",
    "txnNumber",
    "autocommit",
    "startTransaction",
    "comment",
    "$readPreference",
    "$clusterTime",
    "$client",
    "$configServerState",
    "$audit",
    "help",
];

/// Whether `field` is one of [`GENERIC_ARGUMENTS`].
#[must_use]
pub fn is_generic_argument(field: &str) -> bool {
    GENERIC_ARGUMENTS.contains(&field)
}

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("request body must carry a string '$db' field")]
    MissingDatabase,
    #[error("document sequence truncated")]
    Truncated,
    #[error("document sequence identifier is not valid UTF-8")]
    BadIdentifier,
    #[error(transparent)]
    Document(#[from] DocumentError),
}

/// A named batch of documents attached to a request outside its body
/// (for example the `documents` of an insert).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DocumentSequence {
    pub identifier: String,
    pub documents: Vec<Document>,
}

impl DocumentSequence {
    #[must_use]
    pub fn new(identifier: impl Into<String>, documents: Vec<Document>) -> Self {
        Self {
            identifier: identifier.into(),
            documents,
        }
    }

    /// Encodes as `u32` total length, NUL-terminated identifier, then each
    /// document as a `u32` length followed by named `MsgPack`.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Document`] if a document fails to encode.
    pub fn encode(&self) -> Result<Bytes, RequestError> {
        let mut payload = BytesMut::new();
        payload.put_slice(self.identifier.as_bytes());
        payload.put_u8(0);
        for doc in &self.documents {
            let encoded = doc.to_msgpack()?;
            payload.put_u32_le(len_u32(encoded.len()));
            payload.put_slice(&encoded);
        }
        let mut out = BytesMut::with_capacity(payload.len() + 4);
        out.put_u32_le(len_u32(payload.len() + 4));
        out.put(payload);
        Ok(out.freeze())
    }

    /// Decodes one sequence from the front of `buf`, advancing past it.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] on truncated input, a non-UTF-8 identifier,
    /// or an undecodable document.
    pub fn decode(buf: &mut Bytes) -> Result<Self, RequestError> {
        if buf.remaining() < 4 {
            return Err(RequestError::Truncated);
        }
        let total = buf.get_u32_le() as usize;
        if total < 4 || buf.remaining() < total - 4 {
            return Err(RequestError::Truncated);
        }
        let mut section = buf.split_to(total - 4);

        let nul = section
            .iter()
            .position(|b| *b == 0)
            .ok_or(RequestError::Truncated)?;
        let identifier = std::str::from_utf8(&section[..nul])
            .map_err(|_| RequestError::BadIdentifier)?
            .to_string();
        section.advance(nul + 1);

        let mut documents = Vec::new();
        while section.has_remaining() {
            if section.remaining() < 4 {
                return Err(RequestError::Truncated);
            }
            let len = section.get_u32_le() as usize;
            if section.remaining() < len {
                return Err(RequestError::Truncated);
            }
            let raw = section.split_to(len);
            documents.push(Document::from_msgpack(&raw)?);
        }
        Ok(Self {
            identifier,
            documents,
        })
    }
}

fn len_u32(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

/// A decoded request ready for dispatch.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OpMsgRequest {
    /// Target database.
    pub db: String,
    /// Command body. The first field names the command.
    pub body: Document,
    /// Attached document sequences.
    pub sequences: Vec<DocumentSequence>,
}

impl OpMsgRequest {
    /// Builds a request for `db`, stamping `$db` into the body if absent.
    #[must_use]
    pub fn new(db: impl Into<String>, mut body: Document) -> Self {
        let db = db.into();
        if !body.contains_key(DB_FIELD) {
            body.append(DB_FIELD, db.as_str());
        }
        Self {
            db,
            body,
            sequences: Vec::new(),
        }
    }

    /// Builds a request from a body that already carries `$db`.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::MissingDatabase`] if `$db` is absent or not a string.
    pub fn from_body(body: Document) -> Result<Self, RequestError> {
        let db = body
            .get_str(DB_FIELD)
            .ok_or(RequestError::MissingDatabase)?
            .to_string();
        Ok(Self {
            db,
            body,
            sequences: Vec::new(),
        })
    }

    #[must_use]
    pub fn with_sequence(mut self, sequence: DocumentSequence) -> Self {
        self.sequences.push(sequence);
        self
    }

    /// Name of the command: the first body field. Empty for an empty body.
    #[must_use]
    pub fn command_name(&self) -> &str {
        self.body.first().map_or("", |(name, _)| name)
    }

    /// Value of the command-name field (usually the target collection or `1`).
    #[must_use]
    pub fn first_value(&self) -> Option<&Value> {
        self.body.first().map(|(_, v)| v)
    }

    /// Whether the client allows the command to run on a secondary, derived
    /// from `$readPreference.mode`.
    #[must_use]
    pub fn secondary_ok(&self) -> bool {
        self.body
            .get_document("$readPreference")
            .and_then(|rp| rp.get_str("mode"))
            .is_some_and(|mode| mode != "primary")
    }

    /// Looks up an attached sequence by identifier.
    #[must_use]
    pub fn sequence(&self, identifier: &str) -> Option<&DocumentSequence> {
        self.sequences.iter().find(|s| s.identifier == identifier)
    }

    /// Whether the body asks for command help.
    #[must_use]
    pub fn is_help(&self) -> bool {
        self.body.get("help").is_some_and(Value::is_truthy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn new_stamps_db_and_keeps_command_first() {
        let req = OpMsgRequest::new("test", doc! { "find" => "users" });
        assert_eq!(req.command_name(), "find");
        assert_eq!(req.body.get_str("$db"), Some("test"));
        assert_eq!(req.first_value(), Some(&Value::from("users")));
    }

    #[test]
    fn from_body_requires_db() {
        assert!(matches!(
            OpMsgRequest::from_body(doc! { "ping" => 1 }),
            Err(RequestError::MissingDatabase)
        ));
        let req = OpMsgRequest::from_body(doc! { "ping" => 1, "$db" => "admin" }).unwrap();
        assert_eq!(req.db, "admin");
    }

    #[test]
    fn empty_body_has_empty_name() {
        assert_eq!(OpMsgRequest::default().command_name(), "");
    }

    #[test]
    fn secondary_ok_follows_read_preference() {
        let primary = OpMsgRequest::new("t", doc! { "find" => "c", "$readPreference" => doc! { "mode" => "primary" } });
        assert!(!primary.secondary_ok());
        let nearest = OpMsgRequest::new("t", doc! { "find" => "c", "$readPreference" => doc! { "mode" => "nearest" } });
        assert!(nearest.secondary_ok());
        assert!(!OpMsgRequest::new("t", doc! { "find" => "c" }).secondary_ok());
    }

    #[test]
    fn help_flag_is_truthy_check() {
        assert!(OpMsgRequest::new("t", doc! { "ping" => 1, "help" => true }).is_help());
        assert!(!OpMsgRequest::new("t", doc! { "ping" => 1, "help" => 0 }).is_help());
    }

    #[test]
    fn sequence_wire_format_decodes_back() {
        let seq = DocumentSequence::new("documents", vec![doc! { "_id" => 1 }, doc! { "_id" => 2, "x" => "y" }]);
        let mut wire = seq.encode().unwrap();
        assert_eq!(DocumentSequence::decode(&mut wire).unwrap(), seq);
        assert!(wire.is_empty());
    }

    #[test]
    fn truncated_sequence_is_rejected() {
        let seq = DocumentSequence::new("documents", vec![doc! { "_id" => 1 }]);
        let wire = seq.encode().unwrap();
        let mut short = wire.slice(..wire.len() - 2);
        assert!(matches!(DocumentSequence::decode(&mut short), Err(RequestError::Truncated)));
    }
}
