//! Read and write concern arguments carried in a command body.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::document::{from_document, to_document, Document, DocumentError};
use crate::types::Value;

pub const READ_CONCERN_FIELD: &str = "readConcern";
pub const WRITE_CONCERN_FIELD: &str = "writeConcern";

#[derive(Debug, thiserror::Error)]
pub enum ConcernError {
    #[error("'{field}' must be an object, got {type_name}")]
    NotADocument {
        field: &'static str,
        type_name: &'static str,
    },
    #[error("invalid {field}: {source}")]
    Invalid {
        field: &'static str,
        #[source]
        source: DocumentError,
    },
}

/// Consistency level requested for a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadConcernLevel {
    Local,
    Majority,
    Linearizable,
    Available,
    Snapshot,
}

impl ReadConcernLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Majority => "majority",
            Self::Linearizable => "linearizable",
            Self::Available => "available",
            Self::Snapshot => "snapshot",
        }
    }
}

impl fmt::Display for ReadConcernLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `readConcern` object of a command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadConcernArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<ReadConcernLevel>,
    /// Cluster time the read must observe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_cluster_time: Option<i64>,
}

impl ReadConcernArgs {
    #[must_use]
    pub fn with_level(level: ReadConcernLevel) -> Self {
        Self {
            level: Some(level),
            after_cluster_time: None,
        }
    }

    /// Parses `readConcern` from a command body. `Ok(None)` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`ConcernError`] if the field is not an object or has a bad level.
    pub fn from_body(body: &Document) -> Result<Option<Self>, ConcernError> {
        parse_field(body, READ_CONCERN_FIELD)
    }

    /// Level to run at; `local` when none was given.
    #[must_use]
    pub fn effective_level(&self) -> ReadConcernLevel {
        self.level.unwrap_or(ReadConcernLevel::Local)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.level.is_none() && self.after_cluster_time.is_none()
    }

    /// # Errors
    ///
    /// Returns [`DocumentError`] if serialization fails.
    pub fn to_document(&self) -> Result<Document, DocumentError> {
        to_document(self)
    }
}

/// The `w` component of a write concern: a node count or a named mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WriteConcernW {
    Nodes(i64),
    Mode(String),
}

/// The `writeConcern` object of a command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteConcernOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub w: Option<WriteConcernW>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub j: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wtimeout: Option<i64>,
}

impl WriteConcernOptions {
    /// `{w: "majority"}` with the given timeout.
    #[must_use]
    pub fn majority(wtimeout: Option<i64>) -> Self {
        Self {
            w: Some(WriteConcernW::Mode("majority".to_string())),
            j: None,
            wtimeout,
        }
    }

    /// Parses `writeConcern` from a command body. `Ok(None)` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`ConcernError`] if the field is not an object or has bad members.
    pub fn from_body(body: &Document) -> Result<Option<Self>, ConcernError> {
        parse_field(body, WRITE_CONCERN_FIELD)
    }

    /// Whether the write concern waits for a majority.
    #[must_use]
    pub fn is_majority(&self) -> bool {
        matches!(&self.w, Some(WriteConcernW::Mode(m)) if m == "majority")
    }

    /// # Errors
    ///
    /// Returns [`DocumentError`] if serialization fails.
    pub fn to_document(&self) -> Result<Document, DocumentError> {
        to_document(self)
    }
}

fn parse_field<T: serde::de::DeserializeOwned>(
    body: &Document,
    field: &'static str,
) -> Result<Option<T>, ConcernError> {
    match body.get(field) {
        None => Ok(None),
        Some(Value::Map(doc)) => from_document(doc)
            .map(Some)
            .map_err(|source| ConcernError::Invalid { field, source }),
        Some(other) => Err(ConcernError::NotADocument {
            field,
            type_name: other.type_name(),
        }),
    }
}
