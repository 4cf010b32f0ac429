//! Ordered metadata batches.
//!
//! A [`MetadataBatch`] holds one direction's headers (or trailers) for a
//! stream as a doubly-linked list of [`MetadataElement`]s, plus a deadline.
//!
//! Nodes live in an arena owned by the batch and link to each other by index,
//! so splicing at either end, unlinking, and moving a node between lists are
//! all constant time. [`NodeId`] handles stay valid for the life of the batch
//! (until [`destroy`](MetadataBatch::destroy) or a [`merge`](MetadataBatch::merge)
//! that drains it). Both of those start a new generation, so an old handle
//! resolves to nothing even once its arena slot has been reused.
//!
//! Elements removed by [`filter`](MetadataBatch::filter) or
//! [`remove`](MetadataBatch::remove) are not released right away. They move to
//! a second "garbage" list and are released together with the batch, so a
//! component that is still looking at an element mid-batch is never left
//! holding a dangling reference.

use crate::deadline::Deadline;
use crate::element::MetadataElement;
use crate::error::{ListKind, MetadataError};

/// Handle to a node inside a [`MetadataBatch`].
///
/// Carries the arena generation it was issued in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: usize,
    generation: u32,
}

/// A populated node that is not yet part of any batch.
///
/// Linking consumes it, so a node can never be in two lists at once.
#[derive(Debug)]
pub struct LinkedElement {
    element: MetadataElement,
}

impl LinkedElement {
    /// Wrap an element, taking over the caller's reference.
    pub fn new(element: MetadataElement) -> Self {
        Self { element }
    }

    /// The wrapped element.
    pub fn element(&self) -> &MetadataElement {
        &self.element
    }

    /// Unwrap the element without linking it anywhere.
    pub fn into_element(self) -> MetadataElement {
        self.element
    }
}

#[derive(Debug)]
struct Node {
    element: MetadataElement,
    list: ListKind,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Clone, Copy, Debug, Default)]
struct List {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

/// An ordered collection of metadata elements with a deadline.
///
/// # Example
///
/// ```
/// use rpc_stream_op_core::{MetadataBatch, MetadataContext};
///
/// let ctx = MetadataContext::new();
/// let mut batch = MetadataBatch::new();
/// batch.add_tail(ctx.intern("content-type", "application/grpc"));
/// batch.add_head(ctx.intern(":path", "/pkg.Service/Method"));
///
/// let keys: Vec<_> = batch.iter().map(|e| e.key().clone()).collect();
/// assert_eq!(keys, [":path", "content-type"]);
/// ```
#[derive(Debug, Default)]
pub struct MetadataBatch {
    nodes: Vec<Node>,
    list: List,
    garbage: List,
    deadline: Deadline,
    generation: u32,
}

impl MetadataBatch {
    /// Create an empty batch with an infinite deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of elements in the active list.
    pub fn len(&self) -> usize {
        self.list.len
    }

    /// Returns true if the active list is empty.
    pub fn is_empty(&self) -> bool {
        self.list.len == 0
    }

    /// Number of elements retained in the garbage list.
    pub fn garbage_len(&self) -> usize {
        self.garbage.len
    }

    /// The batch deadline.
    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    /// Replace the batch deadline.
    pub fn set_deadline(&mut self, deadline: Deadline) {
        self.deadline = deadline;
    }

    /// Link a populated node at the head of the active list.
    pub fn link_head(&mut self, storage: LinkedElement) -> NodeId {
        let idx = self.alloc(storage.element);
        self.push_front(ListKind::Active, idx);
        self.node_id(idx)
    }

    /// Link a populated node at the tail of the active list.
    pub fn link_tail(&mut self, storage: LinkedElement) -> NodeId {
        let idx = self.alloc(storage.element);
        self.push_back(ListKind::Active, idx);
        self.node_id(idx)
    }

    /// Add an element at the head of the active list.
    ///
    /// The batch takes over the caller's reference.
    pub fn add_head(&mut self, element: MetadataElement) -> NodeId {
        self.link_head(LinkedElement::new(element))
    }

    /// Add an element at the tail of the active list.
    ///
    /// The batch takes over the caller's reference.
    pub fn add_tail(&mut self, element: MetadataElement) -> NodeId {
        self.link_tail(LinkedElement::new(element))
    }

    /// The element at `id` if it is in the active list.
    ///
    /// Handles from before the last `destroy` or draining `merge` return `None`.
    pub fn get(&self, id: NodeId) -> Option<&MetadataElement> {
        if id.generation != self.generation {
            return None;
        }
        self.nodes
            .get(id.index)
            .filter(|node| node.list == ListKind::Active)
            .map(|node| &node.element)
    }

    /// The first active element whose key is `key`.
    pub fn find(&self, key: impl AsRef<[u8]>) -> Option<&MetadataElement> {
        let key = key.as_ref();
        self.iter().find(|element| element.key().as_ref() == key)
    }

    /// Unlink the node at `id` and retain its element in the garbage list.
    ///
    /// Returns false if `id` is not in the active list.
    pub fn remove(&mut self, id: NodeId) -> bool {
        if self.get(id).is_none() {
            return false;
        }
        self.unlink(id.index);
        self.push_back(ListKind::Garbage, id.index);
        true
    }

    /// Iterate the active list front to back.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            nodes: &self.nodes,
            cursor: self.list.head,
            remaining: self.list.len,
        }
    }

    /// Iterate the garbage list front to back.
    pub fn garbage(&self) -> Iter<'_> {
        Iter {
            nodes: &self.nodes,
            cursor: self.garbage.head,
            remaining: self.garbage.len,
        }
    }

    /// Move everything out of `addition` into `self`.
    ///
    /// The active and garbage lists of `addition` are appended, in order, to
    /// the ends of the corresponding lists here. The earlier of the two
    /// deadlines wins. `addition` is left empty with an infinite deadline and
    /// any [`NodeId`] that pointed into it is stale.
    pub fn merge(&mut self, addition: &mut MetadataBatch) {
        let nodes = std::mem::take(&mut addition.nodes);
        let active = std::mem::take(&mut addition.list);
        let garbage = std::mem::take(&mut addition.garbage);
        let deadline = std::mem::take(&mut addition.deadline);
        addition.generation = addition.generation.wrapping_add(1);

        let mut slots: Vec<Option<Node>> = nodes.into_iter().map(Some).collect();
        for (kind, list) in [(ListKind::Active, active), (ListKind::Garbage, garbage)] {
            let mut cursor = list.head;
            while let Some(old) = cursor {
                let Some(node) = slots.get_mut(old).and_then(Option::take) else {
                    break;
                };
                cursor = node.next;
                let idx = self.alloc(node.element);
                self.push_back(kind, idx);
            }
        }

        self.deadline = self.deadline.earliest(deadline);
        self.assert_ok();
    }

    /// Rewrite the active list in place.
    ///
    /// `f` sees every active element once, front to back, and returns:
    /// - the same element: the node is left alone;
    /// - a different element: the node now holds the replacement and the
    ///   original moves to the garbage tail;
    /// - `None`: the node is unlinked and its element moves to the garbage tail.
    ///
    /// `f` must not keep the borrowed element beyond the call; clone it to
    /// hold a reference of its own.
    pub fn filter<F>(&mut self, mut f: F)
    where
        F: FnMut(&MetadataElement) -> Option<MetadataElement>,
    {
        self.assert_ok();

        let mut cursor = self.list.head;
        while let Some(idx) = cursor {
            cursor = self.nodes[idx].next;
            match f(&self.nodes[idx].element) {
                Some(kept) if MetadataElement::ptr_eq(&kept, &self.nodes[idx].element) => {}
                Some(replacement) => {
                    let original = std::mem::replace(&mut self.nodes[idx].element, replacement);
                    let retained = self.alloc(original);
                    self.push_back(ListKind::Garbage, retained);
                }
                None => {
                    self.unlink(idx);
                    self.push_back(ListKind::Garbage, idx);
                }
            }
        }

        self.assert_ok();
    }

    /// Release every element in both lists.
    ///
    /// Returns the number of references released. Calling it again is a
    /// no-op that returns zero. The deadline is kept.
    pub fn destroy(&mut self) -> usize {
        let mut released = 0;
        for list in [std::mem::take(&mut self.list), std::mem::take(&mut self.garbage)] {
            let mut cursor = list.head;
            while let Some(idx) = cursor {
                cursor = self.nodes[idx].next;
                released += 1;
            }
        }
        debug_assert_eq!(released, self.nodes.len(), "arena holds unlinked nodes");
        self.nodes.clear();
        self.generation = self.generation.wrapping_add(1);
        released
    }

    /// Check the linkage of both lists.
    ///
    /// Verifies that heads have no predecessor, tails no successor, every
    /// `prev`/`next` pair is mutual, lengths match, and every arena node sits
    /// in exactly one list.
    pub fn check_links(&self) -> Result<(), MetadataError> {
        let active = self.check_list(ListKind::Active)?;
        let garbage = self.check_list(ListKind::Garbage)?;
        if active + garbage != self.nodes.len() {
            return Err(MetadataError::CorruptList {
                list: ListKind::Garbage,
                reason: format!(
                    "{} nodes allocated but {} linked",
                    self.nodes.len(),
                    active + garbage
                ),
            });
        }
        Ok(())
    }

    /// Panic if [`check_links`](Self::check_links) fails. No-op in release builds.
    #[track_caller]
    pub fn assert_ok(&self) {
        if cfg!(debug_assertions) {
            if let Err(e) = self.check_links() {
                panic!("metadata batch invariant violated: {e}");
            }
        }
    }

    fn check_list(&self, kind: ListKind) -> Result<usize, MetadataError> {
        let list = self.list_ref(kind);
        let corrupt = |reason: String| MetadataError::CorruptList { list: kind, reason };

        let mut count = 0;
        let mut prev: Option<usize> = None;
        let mut cursor = list.head;
        while let Some(idx) = cursor {
            let node = self
                .nodes
                .get(idx)
                .ok_or_else(|| corrupt(format!("link to missing node {idx}")))?;
            if node.list != kind {
                return Err(corrupt(format!("node {idx} is tagged {}", node.list)));
            }
            if node.prev != prev {
                return Err(corrupt(format!(
                    "node {idx} has prev {:?}, expected {prev:?}",
                    node.prev
                )));
            }
            count += 1;
            if count > self.nodes.len() {
                return Err(corrupt("cycle detected".to_string()));
            }
            prev = Some(idx);
            cursor = node.next;
        }

        if list.tail != prev {
            return Err(corrupt(format!(
                "tail is {:?} but last node is {prev:?}",
                list.tail
            )));
        }
        if list.len != count {
            return Err(corrupt(format!(
                "length is {} but {count} nodes are linked",
                list.len
            )));
        }
        Ok(count)
    }

    fn node_id(&self, index: usize) -> NodeId {
        NodeId {
            index,
            generation: self.generation,
        }
    }

    fn alloc(&mut self, element: MetadataElement) -> usize {
        self.nodes.push(Node {
            element,
            list: ListKind::Active,
            prev: None,
            next: None,
        });
        self.nodes.len() - 1
    }

    fn list_ref(&self, kind: ListKind) -> &List {
        match kind {
            ListKind::Active => &self.list,
            ListKind::Garbage => &self.garbage,
        }
    }

    fn list_mut(&mut self, kind: ListKind) -> &mut List {
        match kind {
            ListKind::Active => &mut self.list,
            ListKind::Garbage => &mut self.garbage,
        }
    }

    fn push_front(&mut self, kind: ListKind, idx: usize) {
        let old_head = self.list_ref(kind).head;
        {
            let node = &mut self.nodes[idx];
            node.list = kind;
            node.prev = None;
            node.next = old_head;
        }
        match old_head {
            Some(head) => self.nodes[head].prev = Some(idx),
            None => self.list_mut(kind).tail = Some(idx),
        }
        let list = self.list_mut(kind);
        list.head = Some(idx);
        list.len += 1;
    }

    fn push_back(&mut self, kind: ListKind, idx: usize) {
        let old_tail = self.list_ref(kind).tail;
        {
            let node = &mut self.nodes[idx];
            node.list = kind;
            node.prev = old_tail;
            node.next = None;
        }
        match old_tail {
            Some(tail) => self.nodes[tail].next = Some(idx),
            None => self.list_mut(kind).head = Some(idx),
        }
        let list = self.list_mut(kind);
        list.tail = Some(idx);
        list.len += 1;
    }

    fn unlink(&mut self, idx: usize) {
        let (kind, prev, next) = {
            let node = &self.nodes[idx];
            (node.list, node.prev, node.next)
        };
        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.list_mut(kind).head = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.list_mut(kind).tail = prev,
        }
        let node = &mut self.nodes[idx];
        node.prev = None;
        node.next = None;
        self.list_mut(kind).len -= 1;
    }
}

/// Front-to-back iterator over one of a batch's lists.
#[derive(Clone, Debug)]
pub struct Iter<'a> {
    nodes: &'a [Node],
    cursor: Option<usize>,
    remaining: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a MetadataElement;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.nodes.get(self.cursor?)?;
        self.cursor = node.next;
        self.remaining -= 1;
        Some(&node.element)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Iter<'_> {}

impl<'a> IntoIterator for &'a MetadataBatch {
    type Item = &'a MetadataElement;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
