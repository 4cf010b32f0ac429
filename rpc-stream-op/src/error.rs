//! Stream operation error types.

/// Errors found while validating how a buffer frames its messages.
///
/// Each variant carries the position of the offending op in the buffer.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StreamOpError {
    /// A slice appeared with no message in progress.
    #[error("op {index}: slice of {len} bytes outside of a message")]
    SliceOutsideMessage { index: usize, len: usize },

    /// Slices carried more bytes than the message declared.
    #[error("op {index}: slice overflows message of {declared} bytes ({received} received)")]
    SliceOverflow {
        index: usize,
        declared: u32,
        received: u64,
    },

    /// A message began before the previous one received all its bytes.
    #[error("op {index}: message began with previous message incomplete ({received} of {declared} bytes)")]
    IncompleteMessage {
        index: usize,
        declared: u32,
        received: u64,
    },

    /// The buffer ended in the middle of a message.
    #[error("buffer ends mid-message ({received} of {declared} bytes)")]
    TruncatedMessage { declared: u32, received: u64 },

    /// A message declared more bytes than the configured maximum.
    #[error("op {index}: message size {declared} bytes exceeds maximum allowed size of {max} bytes")]
    MessageTooLarge {
        index: usize,
        declared: u32,
        max: usize,
    },
}
