//! Reference-counted metadata elements and the table that interns them.
//!
//! A [`MetadataElement`] is an immutable key/value pair behind an `Arc`.
//! Cloning a handle takes a reference, dropping it releases one. Two handles
//! are equal only when they point at the same element, so elements created
//! through the same [`MetadataContext`] compare cheaply by identity.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use bytes::Bytes;

/// Suffix marking a key whose value is arbitrary binary data.
pub const BINARY_SUFFIX: &str = "-bin";

#[derive(Debug)]
struct ElementInner {
    key: Bytes,
    value: Bytes,
}

/// An immutable, shared metadata key/value pair.
///
/// # Example
///
/// ```
/// use rpc_stream_op_core::MetadataContext;
///
/// let ctx = MetadataContext::new();
/// let a = ctx.intern("content-type", "application/grpc");
/// let b = ctx.intern("content-type", "application/grpc");
///
/// assert_eq!(a, b);
/// assert_eq!(a.ref_count(), 2);
/// ```
#[derive(Clone)]
pub struct MetadataElement {
    inner: Arc<ElementInner>,
}

impl MetadataElement {
    /// Create an element that is not registered with any interning table.
    ///
    /// It is only equal to its own clones.
    pub fn new(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            inner: Arc::new(ElementInner {
                key: key.into(),
                value: value.into(),
            }),
        }
    }

    /// The element's key.
    pub fn key(&self) -> &Bytes {
        &self.inner.key
    }

    /// The element's value.
    pub fn value(&self) -> &Bytes {
        &self.inner.value
    }

    /// Returns true if the key ends in `-bin`.
    pub fn is_binary(&self) -> bool {
        self.inner.key.ends_with(BINARY_SUFFIX.as_bytes())
    }

    /// Returns true if both handles refer to the same element.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Number of live handles to this element.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl PartialEq for MetadataElement {
    fn eq(&self, other: &Self) -> bool {
        Self::ptr_eq(self, other)
    }
}

impl Eq for MetadataElement {}

impl fmt::Debug for MetadataElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataElement")
            .field("key", &self.inner.key)
            .field("value", &self.inner.value)
            .finish()
    }
}

/// Entry count below which `intern` never prunes on its own.
const MIN_PRUNE_THRESHOLD: usize = 64;

#[derive(Debug)]
struct InternTable {
    entries: HashMap<(Bytes, Bytes), Weak<ElementInner>>,
    prune_at: usize,
}

impl InternTable {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            prune_at: MIN_PRUNE_THRESHOLD,
        }
    }

    fn prune(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, weak| weak.strong_count() > 0);
        self.prune_at = MIN_PRUNE_THRESHOLD.max(self.entries.len() * 2);
        before - self.entries.len()
    }
}

impl Default for InternTable {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

/// A thread-safe create-or-lookup table for metadata elements.
///
/// The table only holds weak references: it never keeps an element alive and
/// never shows up in [`MetadataElement::ref_count`]. Entries whose element has
/// been released are pruned by [`collect_garbage`](Self::collect_garbage), or
/// replaced the next time the same pair is interned. `intern` also prunes by
/// itself whenever the table has doubled since the last pass, so the number of
/// entries stays proportional to the number of live elements.
#[derive(Clone, Default)]
pub struct MetadataContext {
    table: Arc<Mutex<InternTable>>,
}

impl MetadataContext {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty table with room for `capacity` distinct pairs.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            table: Arc::new(Mutex::new(InternTable::with_capacity(capacity))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, InternTable> {
        // The table holds no invariant a panicking writer could break.
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the live element for `(key, value)`, creating it if needed.
    pub fn intern(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> MetadataElement {
        let key = key.into();
        let value = value.into();
        let mut table = self.lock();

        if let Some(inner) = table
            .entries
            .get(&(key.clone(), value.clone()))
            .and_then(Weak::upgrade)
        {
            return MetadataElement { inner };
        }

        if table.entries.len() >= table.prune_at {
            let removed = table.prune();
            tracing::trace!(
                removed,
                remaining = table.entries.len(),
                "pruned intern table on growth"
            );
        }

        let inner = Arc::new(ElementInner {
            key: key.clone(),
            value: value.clone(),
        });
        table.entries.insert((key, value), Arc::downgrade(&inner));
        MetadataElement { inner }
    }

    /// Return the live element for `(key, value)` without creating one.
    pub fn lookup(&self, key: &[u8], value: &[u8]) -> Option<MetadataElement> {
        let probe = (Bytes::copy_from_slice(key), Bytes::copy_from_slice(value));
        self.lock()
            .entries
            .get(&probe)
            .and_then(Weak::upgrade)
            .map(|inner| MetadataElement { inner })
    }

    /// Number of entries whose element is still alive.
    pub fn len(&self) -> usize {
        self.lock()
            .entries
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Number of table entries, including ones whose element is gone.
    pub fn entry_count(&self) -> usize {
        self.lock().entries.len()
    }

    /// Returns true if no interned element is alive.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop table entries whose element has been released.
    ///
    /// Returns the number of entries removed.
    pub fn collect_garbage(&self) -> usize {
        let mut table = self.lock();
        let removed = table.prune();
        if removed > 0 {
            tracing::debug!(
                removed,
                remaining = table.entries.len(),
                "pruned dead metadata elements"
            );
        }
        removed
    }
}

impl fmt::Debug for MetadataContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataContext")
            .field("entries", &self.lock().entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_returns_same_element() {
        let ctx = MetadataContext::new();
        let a = ctx.intern("content-type", "application/grpc");
        let b = ctx.intern("content-type", "application/grpc");

        assert!(MetadataElement::ptr_eq(&a, &b));
        assert_eq!(a.ref_count(), 2);
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn test_intern_distinguishes_values() {
        let ctx = MetadataContext::new();
        let a = ctx.intern("te", "trailers");
        let b = ctx.intern("te", "gzip");

        assert_ne!(a, b);
        assert_eq!(ctx.len(), 2);
    }

    #[test]
    fn test_uninterned_elements_compare_by_identity() {
        let a = MetadataElement::new("x-id", "1");
        let b = MetadataElement::new("x-id", "1");

        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_table_does_not_keep_elements_alive() {
        let ctx = MetadataContext::new();
        let elem = ctx.intern("grpc-status", "0");
        assert_eq!(elem.ref_count(), 1);

        drop(elem);
        assert!(ctx.is_empty());
        assert!(ctx.lookup(b"grpc-status", b"0").is_none());
        assert_eq!(ctx.collect_garbage(), 1);
        assert_eq!(ctx.collect_garbage(), 0);
    }

    #[test]
    fn test_unique_interns_stay_bounded_without_manual_gc() {
        let ctx = MetadataContext::new();
        let keep = ctx.intern("content-type", "application/grpc");
        for i in 0..10_000 {
            drop(ctx.intern("x-request-id", i.to_string()));
            assert!(ctx.entry_count() <= MIN_PRUNE_THRESHOLD);
        }
        assert_eq!(ctx.len(), 1);
        assert_eq!(ctx.lookup(b"content-type", b"application/grpc"), Some(keep));
    }

    #[test]
    fn test_growth_prune_keeps_live_elements() {
        let ctx = MetadataContext::new();
        let live: Vec<_> = (0..MIN_PRUNE_THRESHOLD * 3)
            .map(|i| ctx.intern("x-live", i.to_string()))
            .collect();
        assert_eq!(ctx.len(), live.len());
        assert_eq!(ctx.entry_count(), live.len());
        assert!(live.iter().all(|e| e.ref_count() == 1));
    }

    #[test]
    fn test_reintern_after_release_creates_fresh_element() {
        let ctx = MetadataContext::new();
        drop(ctx.intern("a", "b"));

        let elem = ctx.intern("a", "b");
        assert_eq!(elem.ref_count(), 1);
        assert_eq!(ctx.lookup(b"a", b"b"), Some(elem));
    }

    #[test]
    fn test_binary_key() {
        assert!(MetadataElement::new("trace-bin", vec![0u8, 1, 2]).is_binary());
        assert!(!MetadataElement::new("trace", "x").is_binary());
    }

    #[test]
    fn test_shared_across_threads() {
        let ctx = MetadataContext::new();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ctx = ctx.clone();
                std::thread::spawn(move || ctx.intern("user-agent", "grpc-rust"))
            })
            .collect();
        let elems: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(elems.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(elems[0].ref_count(), 4);
    }
}
