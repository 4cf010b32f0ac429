//! Producer-to-transport scenarios for stream operation buffers.

use bytes::Bytes;
use proptest::prelude::*;
use rpc_stream_op::{
    FramingLimits, INLINE_OPS, MetadataBatch, MetadataContext, StreamOp, StreamOpBuffer,
    WriteFlags,
};

#[test]
fn test_destroy_releases_metadata_but_not_external_slice() {
    let ctx = MetadataContext::new();
    let content_type = ctx.intern("content-type", "application/grpc");
    let payload = Bytes::from_static(b"hello");

    let mut batch = MetadataBatch::new();
    batch.add_tail(content_type.clone());

    let mut sopb = StreamOpBuffer::new();
    sopb.append_begin_message(5, WriteFlags::NONE);
    sopb.append_slice(payload.clone());
    sopb.append_metadata(batch);
    assert_eq!(sopb.check_framing(&FramingLimits::default()), Ok(()));
    assert_eq!(
        sopb.to_string(),
        "BEGIN_MESSAGE:5, SLICE:5, METADATA{content-type=application/grpc}"
    );

    let before = content_type.ref_count();
    sopb.destroy();

    assert_eq!(content_type.ref_count(), before - 1);
    assert_eq!(payload, "hello");
}

#[test]
fn test_transport_consumes_every_op_once() {
    let ctx = MetadataContext::new();
    let mut headers = MetadataBatch::new();
    headers.add_tail(ctx.intern(":path", "/echo.Echo/Say"));
    headers.add_tail(ctx.intern("te", "trailers"));

    let mut producer = StreamOpBuffer::new();
    producer.append_metadata(headers);
    producer.append_no_op();
    producer.append_begin_message(5, WriteFlags::BUFFER_HINT);
    for chunk in [&b"ab"[..], b"cd", b"e"] {
        producer.append_slice(Bytes::copy_from_slice(chunk));
    }
    assert_eq!(producer.check_framing(&FramingLimits::default()), Ok(()));

    let mut outgoing = StreamOpBuffer::new();
    outgoing.swap(&mut producer);
    assert!(producer.is_empty());

    let mut header_count = 0;
    let mut body = Vec::new();
    for op in outgoing.drain() {
        match op {
            StreamOp::NoOp => {}
            StreamOp::Metadata(batch) => header_count += batch.len(),
            StreamOp::BeginMessage(begin) => assert_eq!(begin.length, 5),
            StreamOp::Slice(slice) => body.extend_from_slice(&slice),
        }
    }

    assert_eq!(header_count, 2);
    assert_eq!(body, b"abcde");
    assert!(outgoing.is_empty());
    outgoing.reset();
    assert_eq!(ctx.collect_garbage(), 2);
}

#[test]
fn test_swap_then_destroy_exchanges_ownership() {
    let ctx = MetadataContext::new();
    let a_elem = ctx.intern("x-owner", "a");
    let b_elem = ctx.intern("x-owner", "b");

    let mut a = StreamOpBuffer::new();
    let mut batch = MetadataBatch::new();
    batch.add_tail(a_elem.clone());
    a.append_metadata(batch);

    let mut b = StreamOpBuffer::new();
    let mut batch = MetadataBatch::new();
    batch.add_tail(b_elem.clone());
    b.append_metadata(batch);

    a.swap(&mut b);
    a.destroy();
    assert_eq!(b_elem.ref_count(), 1);
    assert_eq!(a_elem.ref_count(), 2);

    b.destroy();
    assert_eq!(a_elem.ref_count(), 1);
}

proptest! {
    /// Up to the inline capacity the storage never moves; the first append
    /// past it moves everything once and keeps the order.
    #[test]
    fn inline_then_single_promotion(count in 1usize..=INLINE_OPS * 2) {
        let mut sopb = StreamOpBuffer::new();
        let inline_ptr = sopb.as_ptr();
        let mut heap_ptr = None;

        for i in 0..count {
            sopb.append_begin_message(i as u32, WriteFlags::NONE);
            if i < INLINE_OPS {
                prop_assert_eq!(sopb.as_ptr(), inline_ptr);
                prop_assert!(sopb.is_inline());
            } else {
                let ptr = *heap_ptr.get_or_insert(sopb.as_ptr());
                prop_assert_eq!(sopb.as_ptr(), ptr);
                prop_assert!(!sopb.is_inline());
            }
        }

        let lengths: Vec<u32> = sopb
            .iter()
            .map(|op| match op {
                StreamOp::BeginMessage(begin) => begin.length,
                _ => u32::MAX,
            })
            .collect();
        prop_assert_eq!(lengths, (0..count as u32).collect::<Vec<_>>());
    }

    /// After a reset, refilling up to the old peak never reallocates.
    #[test]
    fn reset_reuses_capacity(first in 0usize..100, second in 0usize..100) {
        let mut sopb = StreamOpBuffer::new();
        for _ in 0..first {
            sopb.append_no_op();
        }
        let capacity = sopb.capacity();
        let ptr = sopb.as_ptr();
        sopb.reset();

        for _ in 0..second.min(capacity) {
            sopb.append_no_op();
        }
        prop_assert_eq!(sopb.capacity(), capacity);
        prop_assert_eq!(sopb.as_ptr(), ptr);
    }
}
