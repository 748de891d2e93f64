//! A slab-backed doubly linked list of pending work.
//!
//! Nodes live in a single vector and are linked by index, so removing a node
//! from the middle of the list is O(1) given its [`Key`]. Vacant slots are
//! threaded onto a free list and reused by later pushes.

use core::fmt;
use core::mem;

/// Stable handle to a node in a [`LinkedList`].
///
/// The generation guards against a key outliving its node: once the node is
/// removed, the slot may be reused but the old key no longer matches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Key {
    index: usize,
    generation: u64,
}

struct Links {
    prev: Option<usize>,
    next: Option<usize>,
}

enum Entry<T> {
    Occupied { value: T, links: Links },
    Vacant { next_free: Option<usize> },
}

struct Slot<T> {
    generation: u64,
    entry: Entry<T>,
}

pub(crate) struct LinkedList<T> {
    slots: Vec<Slot<T>>,
    head: Option<usize>,
    tail: Option<usize>,
    free: Option<usize>,
    len: usize,
}

impl<T> LinkedList<T> {
    /// Construct a new empty list.
    pub(crate) const fn new() -> Self {
        Self {
            slots: Vec::new(),
            head: None,
            tail: None,
            free: None,
            len: 0,
        }
    }

    /// Number of linked nodes.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Test if the list is empty.
    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Push a value to the back of the list, returning the key of its node.
    pub(crate) fn push_back(&mut self, value: T) -> Key {
        let links = Links {
            prev: self.tail,
            next: None,
        };

        let key = self.insert(value, links);

        match self.tail {
            Some(tail) => self.links_mut(tail).next = Some(key.index),
            None => self.head = Some(key.index),
        }

        self.tail = Some(key.index);
        key
    }

    /// Push a value to the front of the list, returning the key of its node.
    #[cfg(test)]
    pub(crate) fn push_front(&mut self, value: T) -> Key {
        let links = Links {
            prev: None,
            next: self.head,
        };

        let key = self.insert(value, links);

        match self.head {
            Some(head) => self.links_mut(head).prev = Some(key.index),
            None => self.tail = Some(key.index),
        }

        self.head = Some(key.index);
        key
    }

    /// Pop the front element from the list.
    pub(crate) fn pop_front(&mut self) -> Option<T> {
        let head = self.head?;
        Some(self.unlink(head))
    }

    /// Pop the back element from the list.
    #[cfg(test)]
    pub(crate) fn pop_back(&mut self) -> Option<T> {
        let tail = self.tail?;
        Some(self.unlink(tail))
    }

    /// Remove the node associated with `key`.
    ///
    /// Returns `None` if the node has already been removed.
    pub(crate) fn remove(&mut self, key: Key) -> Option<T> {
        if !self.contains(key) {
            return None;
        }

        Some(self.unlink(key.index))
    }

    /// Test if `key` still refers to a linked node.
    pub(crate) fn contains(&self, key: Key) -> bool {
        match self.slots.get(key.index) {
            Some(slot) => {
                slot.generation == key.generation
                    && matches!(slot.entry, Entry::Occupied { .. })
            }
            None => false,
        }
    }

    fn insert(&mut self, value: T, links: Links) -> Key {
        let entry = Entry::Occupied { value, links };
        self.len += 1;

        if let Some(index) = self.free {
            let slot = &mut self.slots[index];

            self.free = match slot.entry {
                Entry::Vacant { next_free } => next_free,
                Entry::Occupied { .. } => unreachable!("free list points at occupied slot"),
            };

            slot.entry = entry;

            return Key {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len();
        self.slots.push(Slot {
            generation: 0,
            entry,
        });

        Key {
            index,
            generation: 0,
        }
    }

    /// Detach the node at `index`, return its slot to the free list and hand
    /// back its value.
    fn unlink(&mut self, index: usize) -> T {
        let slot = &mut self.slots[index];
        let vacant = Entry::Vacant {
            next_free: self.free,
        };

        let (value, links) = match mem::replace(&mut slot.entry, vacant) {
            Entry::Occupied { value, links } => (value, links),
            Entry::Vacant { .. } => unreachable!("unlinking a vacant slot"),
        };

        slot.generation = slot.generation.wrapping_add(1);
        self.free = Some(index);
        self.len -= 1;

        match links.prev {
            Some(prev) => self.links_mut(prev).next = links.next,
            None => {
                debug_assert_eq!(self.head, Some(index));
                self.head = links.next;
            }
        }

        match links.next {
            Some(next) => self.links_mut(next).prev = links.prev,
            None => {
                debug_assert_eq!(self.tail, Some(index));
                self.tail = links.prev;
            }
        }

        value
    }

    fn links_mut(&mut self, index: usize) -> &mut Links {
        match &mut self.slots[index].entry {
            Entry::Occupied { links, .. } => links,
            Entry::Vacant { .. } => unreachable!("linked to a vacant slot"),
        }
    }
}

impl<T> fmt::Debug for LinkedList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkedList")
            .field("head", &self.head)
            .field("tail", &self.tail)
            .field("len", &self.len)
            .finish()
    }
}
