//! Append-only singly linked list with atomic publication.
//!
//! Inserts are serialized by a mutex and prepend a node whose `next` link is
//! fixed before the node becomes reachable. The head is an [`ArcSwapOption`],
//! so publishing a node is a release store and traversal starts from an
//! acquire load: a reader either sees the complete node or does not see it.
//! Traversal takes no lock and can run concurrently with inserts, including
//! inserts made from inside the traversal itself.

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub(crate) struct Node<T> {
    value: T,
    next: Option<Arc<Node<T>>>,
}

impl<T> Deref for Node<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> Drop for Node<T> {
    // Unlink iteratively so dropping a long list does not recurse per node.
    fn drop(&mut self) {
        let mut next = self.next.take();
        while let Some(node) = next {
            match Arc::try_unwrap(node) {
                Ok(mut owned) => next = owned.next.take(),
                Err(_shared) => break,
            }
        }
    }
}

pub(crate) struct AppendOnlyList<T> {
    head: ArcSwapOption<Node<T>>,
    insert_lock: Mutex<()>,
    len: AtomicUsize,
}

impl<T> AppendOnlyList<T> {
    pub(crate) fn new() -> Self {
        Self {
            head: ArcSwapOption::const_empty(),
            insert_lock: Mutex::new(()),
            len: AtomicUsize::new(0),
        }
    }

    /// Prepend `value`; it becomes the first element seen by new traversals.
    pub(crate) fn push(&self, value: T) {
        let _guard = self.insert_lock.lock();
        let node = Arc::new(Node {
            value,
            next: self.head.load_full(),
        });
        self.head.store(Some(node));
        self.len.fetch_add(1, Ordering::Relaxed);
    }

    /// Iterate from the most recently pushed element.
    ///
    /// The iterator walks a snapshot: elements pushed after it was created
    /// are not visited.
    pub(crate) fn iter(&self) -> Iter<T> {
        Iter {
            cursor: self.head.load_full(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for AppendOnlyList<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct Iter<T> {
    cursor: Option<Arc<Node<T>>>,
}

impl<T> Iterator for Iter<T> {
    type Item = Arc<Node<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.cursor.take()?;
        self.cursor = current.next.clone();
        Some(current)
    }
}
