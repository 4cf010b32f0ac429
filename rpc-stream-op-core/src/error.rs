//! Metadata error types.
//!
//! This module provides [`MetadataError`], returned when metadata crosses the
//! boundary to or from HTTP headers, and when a batch's linkage check fails.

/// Which of a batch's two lists a linkage error was found in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListKind {
    /// The active list (headers that will be sent or were received).
    Active,
    /// The garbage list (elements retained until the batch is destroyed).
    Garbage,
}

impl ListKind {
    /// Get the string representation of this list.
    pub fn as_str(&self) -> &'static str {
        match self {
            ListKind::Active => "active",
            ListKind::Garbage => "garbage",
        }
    }
}

impl std::fmt::Display for ListKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by metadata batches and their header conversions.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MetadataError {
    /// A key cannot be used as an HTTP header name.
    #[error("invalid metadata key: {0:?}")]
    InvalidKey(String),

    /// A value cannot be used as an HTTP header value.
    #[error("invalid value for metadata key {key:?}")]
    InvalidValue { key: String },

    /// A binary (`-bin`) header value is not valid base64.
    #[error("invalid base64 in binary metadata {key:?}: {reason}")]
    InvalidBinaryValue { key: String, reason: String },

    /// A `grpc-timeout` header value could not be parsed.
    #[error("invalid grpc-timeout value: {0:?}")]
    InvalidTimeout(String),

    /// A list's forward/backward links disagree.
    #[error("corrupt {list} list: {reason}")]
    CorruptList { list: ListKind, reason: String },
}
