//! Reply construction.

use docket_core::{to_document, Document, DocumentSequence, Value};
use serde::Serialize;

use super::error::{CommandError, CommandResult};

/// Accumulates a command reply: body fields plus optional document sequences.
#[derive(Debug, Clone, Default)]
pub struct ReplyBuilder {
    body: Document,
    sequences: Vec<DocumentSequence>,
}

impl ReplyBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn body(&self) -> &Document {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Document {
        &mut self.body
    }

    /// Serializes `value` and appends its fields to the body in declaration order.
    ///
    /// # Errors
    ///
    /// Returns `InternalError` if `value` does not serialize to a document.
    pub fn fill_from<T: Serialize + ?Sized>(&mut self, value: &T) -> CommandResult<()> {
        let doc = to_document(value)
            .map_err(|e| CommandError::internal(format!("failed to serialize reply: {e}")))?;
        for (k, v) in doc {
            self.body.insert(k, v);
        }
        Ok(())
    }

    pub fn append_sequence(&mut self, sequence: DocumentSequence) {
        self.sequences.push(sequence);
    }

    /// Discards everything built so far, e.g. before writing a failure reply.
    pub fn reset(&mut self) {
        self.body.clear();
        self.sequences.clear();
    }

    #[must_use]
    pub fn into_reply(self) -> Reply {
        Reply {
            body: self.body,
            sequences: self.sequences,
        }
    }
}

/// A finished reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    pub body: Document,
    pub sequences: Vec<DocumentSequence>,
}

impl Reply {
    #[must_use]
    pub fn from_body(body: Document) -> Self {
        Self {
            body,
            sequences: Vec::new(),
        }
    }

    /// Success indicator. A reply without `ok` counts as success.
    #[must_use]
    pub fn ok(&self) -> bool {
        self.body.get("ok").map_or(true, Value::is_truthy)
    }

    /// `code` of a failure reply, if any.
    #[must_use]
    pub fn code(&self) -> Option<i64> {
        self.body.get("code").and_then(Value::as_i64)
    }

    #[must_use]
    pub fn errmsg(&self) -> Option<&str> {
        self.body.get_str("errmsg")
    }
}
