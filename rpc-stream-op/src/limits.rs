//! Message size limits applied when validating buffer framing.
//!
//! The default limit of 4 MB matches gRPC's default receive limit.

use crate::error::StreamOpError;

/// Default maximum message size (4 MB), matching gRPC's default receive limit.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Configuration for [`StreamOpBuffer::check_framing`](crate::StreamOpBuffer::check_framing).
///
/// # Example
///
/// ```rust
/// use rpc_stream_op::FramingLimits;
///
/// // Use default 4 MB limit
/// let limits = FramingLimits::default();
///
/// // Custom 16 MB limit for large payloads
/// let limits = FramingLimits::new(16 * 1024 * 1024);
///
/// // No limit
/// let limits = FramingLimits::unlimited();
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FramingLimits {
    /// Largest length a `BEGIN_MESSAGE` may declare.
    /// `None` means unlimited.
    max_message_size: Option<usize>,
}

impl Default for FramingLimits {
    fn default() -> Self {
        Self {
            max_message_size: Some(DEFAULT_MAX_MESSAGE_SIZE),
        }
    }
}

impl FramingLimits {
    /// Create limits with the specified maximum message size in bytes.
    pub fn new(max_message_size: usize) -> Self {
        Self {
            max_message_size: Some(max_message_size),
        }
    }

    /// Create limits with no maximum.
    pub fn unlimited() -> Self {
        Self {
            max_message_size: None,
        }
    }

    /// Returns the maximum message size, or `None` if unlimited.
    pub fn max_message_size(&self) -> Option<usize> {
        self.max_message_size
    }

    /// Check a declared message length against the limit.
    pub(crate) fn check_declared(&self, index: usize, declared: u32) -> Result<(), StreamOpError> {
        match self.max_message_size {
            Some(max) if (declared as usize) > max => Err(StreamOpError::MessageTooLarge {
                index,
                declared,
                max,
            }),
            _ => Ok(()),
        }
    }
}
