//! Stream operation buffers for RPC transports.
//!
//! A producer stages the actions for one stream in a [`StreamOpBuffer`]:
//! metadata batches, the start of each message, and the payload slices that
//! follow it. The transport then drains the buffer in order, applying each
//! [`StreamOp`] and skipping [`StreamOp::NoOp`].
//!
//! ## Modules
//!
//! - [`op`]: The [`StreamOp`] sum type and write flags
//! - [`buffer`]: The growable buffer with inline small-buffer storage
//! - [`limits`]: Message size limits for framing checks
//! - [`error`]: Framing error types
//!
//! The metadata types from `rpc-stream-op-core` are re-exported at the crate
//! root.
//!
//! ## Ownership at a glance
//!
//! | Append                | Takes ownership | Extra reference |
//! |-----------------------|-----------------|-----------------|
//! | `append_metadata`     | yes (moved in)  | no              |
//! | `append_slice`        | handle moved in | **no**          |
//! | `append_ops` / `append_buffer` | moved in | no          |
//!
//! A slice appended to a buffer is the caller's own handle. Keep a clone if
//! the bytes are still needed once the buffer has been handed to a consumer.

pub mod buffer;
mod dump;
pub mod error;
pub mod limits;
pub mod op;

pub use buffer::{Drain, INLINE_OPS, StreamOpBuffer, unref_owned_objects};
pub use error::StreamOpError;
pub use limits::{DEFAULT_MAX_MESSAGE_SIZE, FramingLimits};
pub use op::{BeginMessage, StreamOp, StreamOpKind, WriteFlags};
pub use rpc_stream_op_core::{
    Deadline, LinkedElement, MetadataBatch, MetadataContext, MetadataElement, MetadataError,
    NodeId,
};
