//! Human-readable dump of stream operations for logs and tests.
//!
//! The format is not stable and must not be parsed:
//!
//! ```text
//! METADATA{content-type=application/grpc} deadline=+950ms, BEGIN_MESSAGE:5, SLICE:5, NO_OP
//! ```

use std::fmt;

use rpc_stream_op_core::{MetadataBatch, MetadataElement, encode_binary_value};

use crate::buffer::StreamOpBuffer;
use crate::op::StreamOp;

impl fmt::Display for StreamOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamOp::NoOp => f.write_str(self.kind().as_str()),
            StreamOp::BeginMessage(begin) => write!(f, "{}:{}", self.kind(), begin.length),
            StreamOp::Slice(slice) => write!(f, "{}:{}", self.kind(), slice.len()),
            StreamOp::Metadata(batch) => {
                write!(f, "{}{{", self.kind())?;
                write_batch(f, batch)?;
                f.write_str("}")?;
                if !batch.deadline().is_infinite() {
                    write!(f, " deadline={}", batch.deadline())?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for StreamOpBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, op) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{op}")?;
        }
        Ok(())
    }
}

fn write_batch(f: &mut fmt::Formatter<'_>, batch: &MetadataBatch) -> fmt::Result {
    for (i, element) in batch.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write_element(f, element)?;
    }
    Ok(())
}

fn write_element(f: &mut fmt::Formatter<'_>, element: &MetadataElement) -> fmt::Result {
    write!(f, "{}=", String::from_utf8_lossy(element.key()))?;
    if element.is_binary() {
        f.write_str(&encode_binary_value(element.value()))
    } else {
        write!(f, "{}", String::from_utf8_lossy(element.value()))
    }
}
