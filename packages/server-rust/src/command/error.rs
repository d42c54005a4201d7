//! Error taxonomy for command execution.
//!
//! Every request-level failure is a [`CommandError`] carrying a stable
//! [`ErrorCode`]. The dispatcher turns it into a structured failure reply, so
//! a failing command never takes down the serving task. Transport-level
//! failures of the tower service are [`DispatchError`].

use std::fmt;

use docket_core::{ConcernError, Document, DocumentError, NamespaceError, RequestError};

/// Error label attached to replies whose code is transient.
pub const RETRYABLE_ERROR_LABEL: &str = "RetryableError";

/// Classification codes surfaced in failure replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Ok,
    InternalError,
    BadValue,
    FailedToParse,
    Unauthorized,
    IllegalOperation,
    MaxTimeMSExpired,
    CommandNotFound,
    WriteConcernFailed,
    InvalidOptions,
    InvalidNamespace,
    OperationNotSupportedInTransaction,
    APIVersionError,
    APIStrictError,
    APIDeprecationError,
    FailedToRunWithReplyBuilder,
    NotWritablePrimary,
    Interrupted,
    NotPrimaryNoSecondaryOk,
    NotPrimaryOrSecondary,
    FailPointEnabled,
    /// A code with no named variant, typically injected through `failCommand`.
    Other(i32),
}

const NAMED: &[ErrorCode] = &[
    ErrorCode::Ok,
    ErrorCode::InternalError,
    ErrorCode::BadValue,
    ErrorCode::FailedToParse,
    ErrorCode::Unauthorized,
    ErrorCode::IllegalOperation,
    ErrorCode::MaxTimeMSExpired,
    ErrorCode::CommandNotFound,
    ErrorCode::WriteConcernFailed,
    ErrorCode::InvalidOptions,
    ErrorCode::InvalidNamespace,
    ErrorCode::OperationNotSupportedInTransaction,
    ErrorCode::APIVersionError,
    ErrorCode::APIStrictError,
    ErrorCode::APIDeprecationError,
    ErrorCode::FailedToRunWithReplyBuilder,
    ErrorCode::NotWritablePrimary,
    ErrorCode::Interrupted,
    ErrorCode::NotPrimaryNoSecondaryOk,
    ErrorCode::NotPrimaryOrSecondary,
    ErrorCode::FailPointEnabled,
];

impl ErrorCode {
    /// Numeric wire code.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::InternalError => 1,
            Self::BadValue => 2,
            Self::FailedToParse => 9,
            Self::Unauthorized => 13,
            Self::IllegalOperation => 20,
            Self::MaxTimeMSExpired => 50,
            Self::CommandNotFound => 59,
            Self::WriteConcernFailed => 64,
            Self::InvalidOptions => 72,
            Self::InvalidNamespace => 73,
            Self::OperationNotSupportedInTransaction => 263,
            Self::APIVersionError => 322,
            Self::APIStrictError => 323,
            Self::APIDeprecationError => 324,
            Self::FailedToRunWithReplyBuilder => 5003,
            Self::NotWritablePrimary => 10107,
            Self::Interrupted => 11601,
            Self::NotPrimaryNoSecondaryOk => 13435,
            Self::NotPrimaryOrSecondary => 13436,
            Self::FailPointEnabled => 50985,
            Self::Other(code) => code,
        }
    }

    /// Symbolic name reported as `codeName`.
    #[must_use]
    pub fn code_name(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::InternalError => "InternalError",
            Self::BadValue => "BadValue",
            Self::FailedToParse => "FailedToParse",
            Self::Unauthorized => "Unauthorized",
            Self::IllegalOperation => "IllegalOperation",
            Self::MaxTimeMSExpired => "MaxTimeMSExpired",
            Self::CommandNotFound => "CommandNotFound",
            Self::WriteConcernFailed => "WriteConcernFailed",
            Self::InvalidOptions => "InvalidOptions",
            Self::InvalidNamespace => "InvalidNamespace",
            Self::OperationNotSupportedInTransaction => "OperationNotSupportedInTransaction",
            Self::APIVersionError => "APIVersionError",
            Self::APIStrictError => "APIStrictError",
            Self::APIDeprecationError => "APIDeprecationError",
            Self::FailedToRunWithReplyBuilder => "FailedToRunWithReplyBuilder",
            Self::NotWritablePrimary => "NotWritablePrimary",
            Self::Interrupted => "Interrupted",
            Self::NotPrimaryNoSecondaryOk => "NotPrimaryNoSecondaryOk",
            Self::NotPrimaryOrSecondary => "NotPrimaryOrSecondary",
            Self::FailPointEnabled => "FailPointEnabled",
            Self::Other(_) => "UnknownError",
        }
    }

    /// Maps a numeric code back to its variant.
    #[must_use]
    pub fn from_code(code: i32) -> Self {
        NAMED
            .iter()
            .copied()
            .find(|c| c.code() == code)
            .unwrap_or(Self::Other(code))
    }

    /// Transient failures a client may retry.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::NotWritablePrimary
                | Self::NotPrimaryNoSecondaryOk
                | Self::NotPrimaryOrSecondary
                | Self::Interrupted
                | Self::WriteConcernFailed
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.code_name(), self.code())
    }
}

/// A classified command failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct CommandError {
    pub code: ErrorCode,
    pub message: String,
    /// Structured detail merged into the failure reply.
    pub detail: Option<Document>,
    /// Extra labels such as `RetryableError` or ones injected by `failCommand`.
    pub labels: Vec<String>,
}

pub type CommandResult<T> = Result<T, CommandError>;

impl CommandError {
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: None,
            labels: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: Document) -> Self {
        self.detail = Some(detail);
        self
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        let label = label.into();
        if !self.labels.contains(&label) {
            self.labels.push(label);
        }
        self
    }

    /// Labels to report: explicit ones plus `RetryableError` for transient codes.
    #[must_use]
    pub fn reply_labels(&self) -> Vec<String> {
        let mut labels = self.labels.clone();
        if self.code.is_retryable() && !labels.iter().any(|l| l == RETRYABLE_ERROR_LABEL) {
            labels.push(RETRYABLE_ERROR_LABEL.to_string());
        }
        labels
    }

    pub fn failed_to_parse(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::FailedToParse, message)
    }

    pub fn invalid_options(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidOptions, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn illegal_operation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::IllegalOperation, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl From<DocumentError> for CommandError {
    fn from(e: DocumentError) -> Self {
        Self::failed_to_parse(e.to_string())
    }
}

impl From<NamespaceError> for CommandError {
    fn from(e: NamespaceError) -> Self {
        Self::new(ErrorCode::InvalidNamespace, e.to_string())
    }
}

impl From<ConcernError> for CommandError {
    fn from(e: ConcernError) -> Self {
        match e {
            ConcernError::NotADocument { .. } => Self::new(ErrorCode::FailedToParse, e.to_string()),
            ConcernError::Invalid { .. } => Self::invalid_options(e.to_string()),
        }
    }
}

impl From<RequestError> for CommandError {
    fn from(e: RequestError) -> Self {
        Self::failed_to_parse(e.to_string())
    }
}

/// Failures of the dispatch service itself; everything else is a reply.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("server overloaded, try again later")]
    Overloaded,
    #[error("connection closed: {reason}")]
    ConnectionClosed { reason: String },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
