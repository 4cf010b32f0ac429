//! Core metadata types for RPC stream operations.
//!
//! This crate provides the header side of a stream's operations and is shared
//! by everything that builds or consumes stream operation buffers
//! (`rpc-stream-op`).
//!
//! ## Modules
//!
//! - `element`: Reference-counted metadata elements and their interning table
//! - `batch`: Ordered metadata batches with a garbage list and a deadline
//! - `deadline`: Deadlines and the `grpc-timeout` header
//! - `headers`: Conversion to and from `http::HeaderMap`
//! - `error`: Metadata error types
//!
//! ## Threading
//!
//! [`MetadataElement`] handles and [`MetadataContext`] may be shared freely
//! between threads. A [`MetadataBatch`] has no internal locking; give it one
//! owner at a time and hand it off by moving it.

mod batch;
mod deadline;
mod element;
mod error;
mod headers;

pub use batch::*;
pub use deadline::*;
pub use element::*;
pub use error::*;
pub use headers::*;
