//! Stream operations.
//!
//! A [`StreamOp`] is one action to apply to a stream. Ops are staged in a
//! [`StreamOpBuffer`](crate::StreamOpBuffer) and applied in order by the
//! transport.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use bytes::Bytes;
use rpc_stream_op_core::MetadataBatch;

/// Write flags carried by [`BeginMessage`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct WriteFlags(u32);

impl WriteFlags {
    /// No flags.
    pub const NONE: WriteFlags = WriteFlags(0);
    /// The write may be buffered until a later write without this flag.
    pub const BUFFER_HINT: WriteFlags = WriteFlags(0x1);
    /// Send this message uncompressed.
    pub const NO_COMPRESS: WriteFlags = WriteFlags(0x2);

    /// Flags from raw bits. Unknown bits are kept.
    pub const fn from_bits(bits: u32) -> Self {
        WriteFlags(bits)
    }

    /// The raw bits.
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Returns true if every bit in `other` is set.
    pub const fn contains(&self, other: WriteFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if no bit is set.
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for WriteFlags {
    type Output = WriteFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        WriteFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for WriteFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Declares the size and flags of the message whose payload follows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BeginMessage {
    /// Payload bytes the message will carry.
    pub length: u32,
    /// Write flags for the message.
    pub flags: WriteFlags,
}

/// Discriminant of a [`StreamOp`], used for logging and the debug dump.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamOpKind {
    NoOp,
    BeginMessage,
    Metadata,
    Slice,
}

impl StreamOpKind {
    /// Get the string representation of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamOpKind::NoOp => "NO_OP",
            StreamOpKind::BeginMessage => "BEGIN_MESSAGE",
            StreamOpKind::Metadata => "METADATA",
            StreamOpKind::Slice => "SLICE",
        }
    }
}

impl fmt::Display for StreamOpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One operation on a stream.
#[derive(Debug, Default)]
pub enum StreamOp {
    /// Does nothing. Consumers must skip it. Used to erase an op in place.
    #[default]
    NoOp,
    /// Starts a message of a declared length.
    BeginMessage(BeginMessage),
    /// A batch of headers or trailers, owned by the op.
    Metadata(MetadataBatch),
    /// A fragment of the current message's payload.
    Slice(Bytes),
}

impl StreamOp {
    /// The op's discriminant.
    pub fn kind(&self) -> StreamOpKind {
        match self {
            StreamOp::NoOp => StreamOpKind::NoOp,
            StreamOp::BeginMessage(_) => StreamOpKind::BeginMessage,
            StreamOp::Metadata(_) => StreamOpKind::Metadata,
            StreamOp::Slice(_) => StreamOpKind::Slice,
        }
    }

    /// Returns true for [`StreamOp::NoOp`].
    pub fn is_no_op(&self) -> bool {
        matches!(self, StreamOp::NoOp)
    }

    /// Release anything the op owns, keeping its kind.
    ///
    /// Metadata batches are destroyed in place and slices are replaced with an
    /// empty slice. Returns true if something was released.
    pub fn release(&mut self) -> bool {
        match self {
            StreamOp::Metadata(batch) => batch.destroy() > 0,
            StreamOp::Slice(slice) => !std::mem::take(slice).is_empty(),
            StreamOp::NoOp | StreamOp::BeginMessage(_) => false,
        }
    }
}

impl From<BeginMessage> for StreamOp {
    fn from(begin: BeginMessage) -> Self {
        StreamOp::BeginMessage(begin)
    }
}

impl From<MetadataBatch> for StreamOp {
    fn from(batch: MetadataBatch) -> Self {
        StreamOp::Metadata(batch)
    }
}

impl From<Bytes> for StreamOp {
    fn from(slice: Bytes) -> Self {
        StreamOp::Slice(slice)
    }
}

#[cfg(test)]
mod tests {
    use rpc_stream_op_core::MetadataElement;

    use super::*;

    #[test]
    fn test_write_flags() {
        let flags = WriteFlags::BUFFER_HINT | WriteFlags::NO_COMPRESS;
        assert_eq!(flags.bits(), 0x3);
        assert!(flags.contains(WriteFlags::NO_COMPRESS));
        assert!(!WriteFlags::BUFFER_HINT.contains(WriteFlags::NO_COMPRESS));
        assert!(WriteFlags::default().is_empty());

        let mut flags = WriteFlags::NONE;
        flags |= WriteFlags::BUFFER_HINT;
        assert_eq!(flags, WriteFlags::from_bits(1));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(StreamOp::NoOp.kind().as_str(), "NO_OP");
        assert_eq!(StreamOp::from(BeginMessage::default()).kind().as_str(), "BEGIN_MESSAGE");
        assert_eq!(StreamOp::from(MetadataBatch::new()).kind().as_str(), "METADATA");
        assert_eq!(StreamOp::from(Bytes::new()).kind().to_string(), "SLICE");
    }

    #[test]
    fn test_release_keeps_kind() {
        let elem = MetadataElement::new("a", "b");
        let mut batch = MetadataBatch::new();
        batch.add_tail(elem.clone());

        let mut op = StreamOp::from(batch);
        assert!(op.release());
        assert_eq!(op.kind(), StreamOpKind::Metadata);
        assert_eq!(elem.ref_count(), 1);
        assert!(!op.release());

        let mut op = StreamOp::from(Bytes::from_static(b"hello"));
        assert!(op.release());
        assert!(matches!(&op, StreamOp::Slice(s) if s.is_empty()));

        assert!(!StreamOp::NoOp.release());
    }
}
