//! Docket Core: documents, requests, namespaces, and read/write concerns.

pub mod concern;
pub mod context;
pub mod document;
pub mod namespace;
pub mod request;
pub mod types;

pub use concern::{ConcernError, ReadConcernArgs, ReadConcernLevel, WriteConcernOptions, WriteConcernW};
pub use context::RequestContext;
pub use document::{from_document, to_document, Document, DocumentError};
pub use namespace::{NamespaceError, NamespaceOrUuid, NamespaceString};
pub use request::{DocumentSequence, OpMsgRequest, RequestError};
pub use types::{Principal, Value};
