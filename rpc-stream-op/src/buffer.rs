//! Growable buffers of stream operations.
//!
//! A [`StreamOpBuffer`] stages the operations of one send or receive batch.
//! The first [`INLINE_OPS`] operations live inside the buffer itself, so the
//! common case costs no allocation. On the first overflow the contents move to
//! a heap array whose capacity doubles on every later overflow. A buffer never
//! moves back to inline storage.
//!
//! # Ownership
//!
//! The buffer owns every op it holds. What it means to *own* an op differs by
//! kind, and the difference matters to anyone who keeps a handle outside the
//! buffer:
//!
//! - [`append_metadata`](StreamOpBuffer::append_metadata) moves the batch in.
//!   The caller has nothing left to destroy.
//! - [`append_slice`](StreamOpBuffer::append_slice) moves the caller's slice
//!   handle in *without taking a reference of its own*. Whoever drains the op
//!   receives that same handle and is responsible for it from then on. A
//!   caller that wants to keep using the bytes must keep its own clone.
//!
//! Consumers take ops out with [`drain`](StreamOpBuffer::drain), which yields
//! each op by value exactly once.

use std::fmt;

use bytes::Bytes;
use rpc_stream_op_core::MetadataBatch;

use crate::error::StreamOpError;
use crate::limits::FramingLimits;
use crate::op::{BeginMessage, StreamOp, WriteFlags};

/// Number of ops stored inline before the buffer allocates.
pub const INLINE_OPS: usize = 16;

#[allow(clippy::large_enum_variant)]
enum Storage {
    Inline {
        ops: [StreamOp; INLINE_OPS],
        len: usize,
    },
    Heap(Vec<StreamOp>),
}

impl Storage {
    fn inline() -> Self {
        Storage::Inline {
            ops: std::array::from_fn(|_| StreamOp::NoOp),
            len: 0,
        }
    }
}

/// An ordered, growable sequence of [`StreamOp`]s.
///
/// The buffer has no internal locking. Hand a finished buffer to another
/// owner with [`swap`](Self::swap) or by moving it.
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use rpc_stream_op::{MetadataBatch, MetadataContext, StreamOpBuffer, WriteFlags};
///
/// let ctx = MetadataContext::new();
/// let mut headers = MetadataBatch::new();
/// headers.add_tail(ctx.intern("content-type", "application/grpc"));
///
/// let mut sopb = StreamOpBuffer::new();
/// sopb.append_metadata(headers);
/// sopb.append_begin_message(5, WriteFlags::NONE);
/// sopb.append_slice(Bytes::from_static(b"hello"));
///
/// assert_eq!(
///     sopb.to_string(),
///     "METADATA{content-type=application/grpc}, BEGIN_MESSAGE:5, SLICE:5"
/// );
/// ```
pub struct StreamOpBuffer {
    storage: Storage,
}

impl StreamOpBuffer {
    /// Create an empty buffer using inline storage.
    pub fn new() -> Self {
        Self {
            storage: Storage::inline(),
        }
    }

    /// Create an empty buffer able to hold `capacity` ops without growing.
    ///
    /// Capacities up to [`INLINE_OPS`] use inline storage.
    pub fn with_capacity(capacity: usize) -> Self {
        if capacity <= INLINE_OPS {
            return Self::new();
        }
        Self {
            storage: Storage::Heap(Vec::with_capacity(capacity)),
        }
    }

    /// Number of ops in the buffer.
    pub fn len(&self) -> usize {
        match &self.storage {
            Storage::Inline { len, .. } => *len,
            Storage::Heap(ops) => ops.len(),
        }
    }

    /// Returns true if the buffer holds no ops.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of ops the buffer can hold before it must grow.
    pub fn capacity(&self) -> usize {
        match &self.storage {
            Storage::Inline { .. } => INLINE_OPS,
            Storage::Heap(ops) => ops.capacity(),
        }
    }

    /// Returns true while the buffer still uses inline storage.
    pub fn is_inline(&self) -> bool {
        matches!(self.storage, Storage::Inline { .. })
    }

    /// The ops in order.
    pub fn as_slice(&self) -> &[StreamOp] {
        match &self.storage {
            Storage::Inline { ops, len } => &ops[..*len],
            Storage::Heap(ops) => ops,
        }
    }

    /// The ops in order, mutably. Overwrite an op with
    /// [`StreamOp::NoOp`] to erase it without shifting the rest.
    pub fn as_mut_slice(&mut self) -> &mut [StreamOp] {
        match &mut self.storage {
            Storage::Inline { ops, len } => &mut ops[..*len],
            Storage::Heap(ops) => ops,
        }
    }

    /// Address of the backing storage.
    ///
    /// Stays the same across appends that do not grow the buffer.
    pub fn as_ptr(&self) -> *const StreamOp {
        match &self.storage {
            Storage::Inline { ops, .. } => ops.as_ptr(),
            Storage::Heap(ops) => ops.as_ptr(),
        }
    }

    /// Iterate the ops in order.
    pub fn iter(&self) -> std::slice::Iter<'_, StreamOp> {
        self.as_slice().iter()
    }

    /// Iterate the ops in order, mutably.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, StreamOp> {
        self.as_mut_slice().iter_mut()
    }

    /// Make room for at least `additional` more ops.
    ///
    /// Grows by doubling, so a run of appends costs amortized constant time.
    /// Leaving inline storage is permanent.
    pub fn reserve(&mut self, additional: usize) {
        let needed = self.len().saturating_add(additional);
        let capacity = self.capacity();
        if needed <= capacity {
            return;
        }
        let mut target = capacity.max(1);
        while target < needed {
            target = target.saturating_mul(2);
        }

        let promoted = match &mut self.storage {
            Storage::Heap(ops) => {
                ops.reserve_exact(target - ops.len());
                tracing::trace!(
                    from = capacity,
                    to = ops.capacity(),
                    "stream op buffer grown"
                );
                return;
            }
            Storage::Inline { ops, len } => {
                let mut heap = Vec::with_capacity(target);
                heap.extend(ops[..*len].iter_mut().map(std::mem::take));
                heap
            }
        };
        tracing::trace!(
            len = promoted.len(),
            capacity = promoted.capacity(),
            "stream op buffer promoted to heap storage"
        );
        self.storage = Storage::Heap(promoted);
    }

    fn push(&mut self, op: StreamOp) {
        self.reserve(1);
        match &mut self.storage {
            Storage::Inline { ops, len } => {
                ops[*len] = op;
                *len += 1;
            }
            Storage::Heap(ops) => ops.push(op),
        }
    }

    /// Append a [`StreamOp::NoOp`].
    pub fn append_no_op(&mut self) {
        self.push(StreamOp::NoOp);
    }

    /// Append the start of a message of `length` bytes.
    pub fn append_begin_message(&mut self, length: u32, flags: WriteFlags) {
        self.push(StreamOp::BeginMessage(BeginMessage { length, flags }));
    }

    /// Append a metadata batch. The buffer takes ownership of it.
    pub fn append_metadata(&mut self, batch: MetadataBatch) {
        self.push(StreamOp::Metadata(batch));
    }

    /// Append a payload slice.
    ///
    /// This is bookkeeping only: the caller's handle is moved in as-is and no
    /// reference is added. The consumer that drains this op inherits the
    /// handle. Keep a clone if the bytes are needed after the hand-off.
    pub fn append_slice(&mut self, slice: Bytes) {
        self.push(StreamOp::Slice(slice));
    }

    /// Append ops in order, moving each one in.
    pub fn append_ops<I>(&mut self, ops: I)
    where
        I: IntoIterator<Item = StreamOp>,
    {
        let ops = ops.into_iter();
        self.reserve(ops.size_hint().0);
        for op in ops {
            self.push(op);
        }
    }

    /// Move every op out of `other` onto the end of this buffer.
    ///
    /// `other` is left empty with its capacity intact.
    pub fn append_buffer(&mut self, other: &mut StreamOpBuffer) {
        self.append_ops(other.drain());
    }

    /// Take every op out of the buffer in order.
    ///
    /// Each op is yielded by value exactly once. When the iterator is dropped
    /// the buffer is empty; ops that were not taken are released. Capacity is
    /// kept.
    pub fn drain(&mut self) -> Drain<'_> {
        Drain {
            buffer: self,
            next: 0,
        }
    }

    /// Empty the buffer, keeping its capacity for reuse.
    ///
    /// Meant for buffers whose ops have already been handed off. This is not a
    /// plain truncation: any op that still owns a metadata batch or slice is
    /// dropped here, releasing its references, and the count is logged. Use
    /// [`drain`](Self::drain) to hand ops off without releasing them.
    pub fn reset(&mut self) {
        let leftover = self
            .iter()
            .filter(|op| matches!(op, StreamOp::Metadata(_) | StreamOp::Slice(_)))
            .count();
        if leftover > 0 {
            tracing::debug!(leftover, "stream op buffer reset with owned ops still present");
        }
        self.clear();
    }

    fn clear(&mut self) {
        match &mut self.storage {
            Storage::Inline { ops, len } => {
                ops[..*len].fill_with(StreamOp::default);
                *len = 0;
            }
            Storage::Heap(ops) => ops.clear(),
        }
    }

    /// Exchange the entire contents of two buffers.
    pub fn swap(&mut self, other: &mut StreamOpBuffer) {
        std::mem::swap(self, other);
    }

    /// Release everything the buffer owns and free its storage.
    ///
    /// Returns the number of ops that released a metadata batch or slice.
    pub fn destroy(mut self) -> usize {
        let released = unref_owned_objects(self.as_mut_slice());
        tracing::trace!(
            len = self.len(),
            released,
            inline = self.is_inline(),
            "stream op buffer destroyed"
        );
        released
    }

    /// Check that slices fit the messages they belong to.
    ///
    /// Every `SLICE` must follow a `BEGIN_MESSAGE`, the slices of a message
    /// must add up to exactly its declared length before the next message
    /// begins or the buffer ends, and no message may declare more than the
    /// configured maximum. `NO_OP` and `METADATA` are ignored.
    pub fn check_framing(&self, limits: &FramingLimits) -> Result<(), StreamOpError> {
        let mut current: Option<(u32, u64)> = None;

        for (index, op) in self.iter().enumerate() {
            match op {
                StreamOp::NoOp | StreamOp::Metadata(_) => {}
                StreamOp::BeginMessage(begin) => {
                    if let Some((declared, received)) = current {
                        if received < u64::from(declared) {
                            return Err(StreamOpError::IncompleteMessage {
                                index,
                                declared,
                                received,
                            });
                        }
                    }
                    limits.check_declared(index, begin.length)?;
                    current = Some((begin.length, 0));
                }
                StreamOp::Slice(slice) => {
                    let Some((declared, received)) = current.as_mut() else {
                        return Err(StreamOpError::SliceOutsideMessage {
                            index,
                            len: slice.len(),
                        });
                    };
                    *received += slice.len() as u64;
                    if *received > u64::from(*declared) {
                        return Err(StreamOpError::SliceOverflow {
                            index,
                            declared: *declared,
                            received: *received,
                        });
                    }
                }
            }
        }

        match current {
            Some((declared, received)) if received < u64::from(declared) => {
                Err(StreamOpError::TruncatedMessage { declared, received })
            }
            _ => Ok(()),
        }
    }
}

/// Release every metadata batch and slice among `ops`.
///
/// Batches are destroyed in place and slices replaced with empty ones; the
/// kinds and number of ops are left as they were. Returns the number of ops
/// that released something.
pub fn unref_owned_objects(ops: &mut [StreamOp]) -> usize {
    ops.iter_mut().map(|op| op.release()).filter(|&released| released).count()
}

impl Default for StreamOpBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StreamOpBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamOpBuffer")
            .field("ops", &self.as_slice())
            .field("capacity", &self.capacity())
            .field("inline", &self.is_inline())
            .finish()
    }
}

impl Extend<StreamOp> for StreamOpBuffer {
    fn extend<I: IntoIterator<Item = StreamOp>>(&mut self, iter: I) {
        self.append_ops(iter);
    }
}

impl FromIterator<StreamOp> for StreamOpBuffer {
    fn from_iter<I: IntoIterator<Item = StreamOp>>(iter: I) -> Self {
        let mut buffer = StreamOpBuffer::new();
        buffer.append_ops(iter);
        buffer
    }
}

impl<'a> IntoIterator for &'a StreamOpBuffer {
    type Item = &'a StreamOp;
    type IntoIter = std::slice::Iter<'a, StreamOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Draining iterator returned by [`StreamOpBuffer::drain`].
pub struct Drain<'a> {
    buffer: &'a mut StreamOpBuffer,
    next: usize,
}

impl Iterator for Drain<'_> {
    type Item = StreamOp;

    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.buffer.as_mut_slice().get_mut(self.next)?;
        self.next += 1;
        Some(std::mem::take(slot))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.buffer.len() - self.next;
        (left, Some(left))
    }
}

impl ExactSizeIterator for Drain<'_> {}

impl Drop for Drain<'_> {
    fn drop(&mut self) {
        self.buffer.clear();
    }
}
