//! AVL-tree component container.
//!
//! Each entity using this container owns a single tree keyed by [`TypeKey`]. A node's payload
//! (`datum`) is a separate heap allocation from the node itself, owned by a `source` shared
//! between sibling nodes of the same allocation: [`SingleNodeSource`] for a lone component,
//! [`MultiNodeSource`] for several components packed into one arena by [`AvlContainer::insert_many`]
//! (used by the entity façade's all-or-nothing multi-`add`). Rotating the tree only moves the
//! `Box<Node>` wrappers — it never touches a component's bytes or runs a destructor, matching the
//! "rotation never relocates payload" requirement.
//!
//! Unlike the reference implementation, nodes are linked by ordinary owning `Box<Node>` pointers
//! rather than a raw-observing-pointer-plus-separate-owner split: Rust's ownership model already
//! gives the rotation functions cheap, destructor-free moves (`Option::take` swaps a pointer, it
//! never invokes `Drop`), so the extra indirection the original uses to get the same property is
//! unnecessary here.

use std::alloc::Layout;
use std::cell::Cell;
use std::cmp::Ordering;
use std::ptr::NonNull;
use std::rc::Rc;

use log::trace;

use super::Container;
use crate::error::{EcsError, Result};
use crate::type_registry::{self, Descriptor, TypeKey};

trait NodeSource {
    /// Destroy the component stored under `key`, owned by this source, and free the source's
    /// allocation once every component it owns has been decremented.
    fn decrement(&self, key: TypeKey);
}

struct SingleNodeSource {
    data: NonNull<u8>,
    descriptor: Descriptor,
}

impl NodeSource for SingleNodeSource {
    fn decrement(&self, _key: TypeKey) {
        unsafe {
            (self.descriptor.drop_fn())(self.data);
            if self.descriptor.layout().size() > 0 {
                std::alloc::dealloc(self.data.as_ptr(), self.descriptor.layout());
            }
        }
    }
}

struct MultiNodeSource {
    data: NonNull<u8>,
    layout: Layout,
    entries: Vec<(TypeKey, usize, Descriptor)>,
    remaining: Cell<usize>,
}

impl NodeSource for MultiNodeSource {
    fn decrement(&self, key: TypeKey) {
        if let Some((_, offset, descriptor)) = self.entries.iter().find(|(k, _, _)| *k == key) {
            let ptr = unsafe { NonNull::new_unchecked(self.data.as_ptr().add(*offset)) };
            unsafe { (descriptor.drop_fn())(ptr) };
        }
        let remaining = self.remaining.get() - 1;
        self.remaining.set(remaining);
        if remaining == 0 && self.layout.size() > 0 {
            unsafe { std::alloc::dealloc(self.data.as_ptr(), self.layout) };
        }
    }
}

struct Node {
    key: TypeKey,
    datum: NonNull<u8>,
    descriptor: Descriptor,
    source: Rc<dyn NodeSource>,
    left: Option<Box<Node>>,
    right: Option<Box<Node>>,
    balance: i8,
}

impl Drop for Node {
    fn drop(&mut self) {
        self.source.decrement(self.key);
    }
}

fn height_of(node: &Option<Box<Node>>) -> i32 {
    node.as_ref()
        .map_or(0, |n| 1 + height_of(&n.left).max(height_of(&n.right)))
}

fn update_balance(node: &mut Node) {
    node.balance = (height_of(&node.left) - height_of(&node.right)) as i8;
}

fn rotate_left(mut node: Box<Node>) -> Box<Node> {
    let mut pivot = node.right.take().expect("rotate_left requires a right child");
    node.right = pivot.left.take();
    update_balance(&mut node);
    pivot.left = Some(node);
    update_balance(&mut pivot);
    pivot
}

fn rotate_right(mut node: Box<Node>) -> Box<Node> {
    let mut pivot = node.left.take().expect("rotate_right requires a left child");
    node.left = pivot.right.take();
    update_balance(&mut node);
    pivot.right = Some(node);
    update_balance(&mut pivot);
    pivot
}

/// Rebalance a node whose children are already balanced, after an insert or remove beneath it.
fn rebalance(mut node: Box<Node>) -> Box<Node> {
    update_balance(&mut node);
    if node.balance > 1 {
        let left = node.left.as_ref().expect("positive balance implies a left child");
        if height_of(&left.left) < height_of(&left.right) {
            let left = node.left.take().unwrap();
            node.left = Some(rotate_left(left));
        }
        node = rotate_right(node);
    } else if node.balance < -1 {
        let right = node.right.as_ref().expect("negative balance implies a right child");
        if height_of(&right.right) < height_of(&right.left) {
            let right = node.right.take().unwrap();
            node.right = Some(rotate_right(right));
        }
        node = rotate_left(node);
    }
    node
}

/// Returns the new subtree root, and the rejected node if `new_node`'s key already exists.
fn insert_node(node: Option<Box<Node>>, new_node: Box<Node>) -> (Option<Box<Node>>, Option<Box<Node>>) {
    match node {
        None => (Some(new_node), None),
        Some(mut n) => match new_node.key.cmp(&n.key) {
            Ordering::Equal => (Some(n), Some(new_node)),
            Ordering::Less => {
                let (left, rejected) = insert_node(n.left.take(), new_node);
                n.left = left;
                (Some(rebalance(n)), rejected)
            }
            Ordering::Greater => {
                let (right, rejected) = insert_node(n.right.take(), new_node);
                n.right = right;
                (Some(rebalance(n)), rejected)
            }
        },
    }
}

/// Detach and return the minimum (leftmost) node of `node`, rebalancing what remains.
fn remove_min_node(mut node: Box<Node>) -> (Option<Box<Node>>, Box<Node>) {
    match node.left.take() {
        None => (node.right.take(), node),
        Some(left) => {
            let (new_left, min) = remove_min_node(left);
            node.left = new_left;
            (Some(rebalance(node)), min)
        }
    }
}

/// Returns the new subtree root and whether a node with `key` was actually removed.
fn remove_node(node: Option<Box<Node>>, key: TypeKey) -> (Option<Box<Node>>, bool) {
    match node {
        None => (None, false),
        Some(mut n) => match key.cmp(&n.key) {
            Ordering::Less => {
                let (left, removed) = remove_node(n.left.take(), key);
                n.left = left;
                (Some(rebalance(n)), removed)
            }
            Ordering::Greater => {
                let (right, removed) = remove_node(n.right.take(), key);
                n.right = right;
                (Some(rebalance(n)), removed)
            }
            Ordering::Equal => match (n.left.take(), n.right.take()) {
                (None, None) => (None, true),
                (Some(left), None) => (Some(left), true),
                (None, Some(right)) => (Some(right), true),
                (Some(left), Some(right)) => {
                    // In-order successor swap: the minimum of the right subtree becomes the
                    // new subtree root in `n`'s place.
                    let (new_right, mut successor) = remove_min_node(right);
                    successor.left = Some(left);
                    successor.right = new_right;
                    (Some(rebalance(successor)), true)
                }
            },
        },
    }
}

fn lookup_node(node: &Option<Box<Node>>, key: TypeKey) -> Option<&Node> {
    node.as_ref().and_then(|n| match key.cmp(&n.key) {
        Ordering::Equal => Some(n.as_ref()),
        Ordering::Less => lookup_node(&n.left, key),
        Ordering::Greater => lookup_node(&n.right, key),
    })
}

fn lookup_node_mut(node: &mut Option<Box<Node>>, key: TypeKey) -> Option<&mut Node> {
    match node {
        None => None,
        Some(n) => match key.cmp(&n.key) {
            Ordering::Equal => Some(n.as_mut()),
            Ordering::Less => lookup_node_mut(&mut n.left, key),
            Ordering::Greater => lookup_node_mut(&mut n.right, key),
        },
    }
}

fn is_avl_node(node: &Option<Box<Node>>) -> bool {
    match node {
        None => true,
        Some(n) => {
            let diff = height_of(&n.left) - height_of(&n.right);
            diff.abs() <= 1 && is_avl_node(&n.left) && is_avl_node(&n.right)
        }
    }
}

/// Per-entity component store backed by an AVL tree keyed by type.
#[derive(Default)]
pub struct AvlContainer {
    root: Option<Box<Node>>,
    len: usize,
}

impl AvlContainer {
    /// Construct an empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Invariant check used by tests: every node's left/right heights differ by at most one.
    pub fn is_avl(&self) -> bool {
        is_avl_node(&self.root)
    }

    fn alloc_single<T: 'static>(value: T, descriptor: Descriptor) -> NonNull<u8> {
        let layout = descriptor.layout();
        let data = if layout.size() == 0 {
            NonNull::dangling()
        } else {
            let raw = unsafe { std::alloc::alloc(layout) };
            let Some(data) = NonNull::new(raw) else {
                std::alloc::handle_alloc_error(layout);
            };
            data
        };
        unsafe { std::ptr::write(data.as_ptr().cast::<T>(), value) };
        data
    }

    /// Insert several components in one packed allocation, all-or-nothing: the caller must have
    /// already verified none of `values`'s types are present (see
    /// [`crate::entity::facade::ComponentList`]), so this never rejects.
    pub(crate) fn insert_many_packed(&mut self, values: Vec<(TypeKey, Descriptor, Box<dyn FnOnce(NonNull<u8>)>)>) {
        if values.is_empty() {
            return;
        }
        let mut layout = Layout::from_size_align(0, 1).unwrap();
        let mut offsets = Vec::with_capacity(values.len());
        for (_, descriptor, _) in &values {
            let (new_layout, offset) = layout.extend(descriptor.layout()).expect("layout overflow");
            layout = new_layout;
            offsets.push(offset);
        }
        layout = layout.pad_to_align();

        let data = if layout.size() == 0 {
            NonNull::dangling()
        } else {
            let raw = unsafe { std::alloc::alloc(layout) };
            let Some(data) = NonNull::new(raw) else {
                std::alloc::handle_alloc_error(layout);
            };
            data
        };

        let mut entries = Vec::with_capacity(values.len());
        for ((key, descriptor, write), offset) in values.into_iter().zip(offsets.iter().copied()) {
            let ptr = unsafe { NonNull::new_unchecked(data.as_ptr().add(offset)) };
            write(ptr);
            entries.push((key, offset, descriptor));
        }

        let remaining = entries.len();
        let source: Rc<dyn NodeSource> = Rc::new(MultiNodeSource {
            data,
            layout,
            entries: entries.clone(),
            remaining: Cell::new(remaining),
        });

        for (key, offset, descriptor) in entries {
            let datum = unsafe { NonNull::new_unchecked(data.as_ptr().add(offset)) };
            let node = Box::new(Node {
                key,
                datum,
                descriptor,
                source: Rc::clone(&source),
                left: None,
                right: None,
                balance: 0,
            });
            let (root, rejected) = insert_node(self.root.take(), node);
            self.root = root;
            debug_assert!(
                rejected.is_none(),
                "insert_many caller must pre-verify every key is absent"
            );
            self.len += 1;
        }
        trace!("packed {remaining} components into one AVL multi-node allocation");
    }
}

impl Container for AvlContainer {
    fn insert<T: 'static>(&mut self, value: T) -> Result<()> {
        let descriptor = type_registry::descriptor_of::<T>();
        let key = descriptor.key();
        let data = Self::alloc_single(value, descriptor);
        let source: Rc<dyn NodeSource> = Rc::new(SingleNodeSource { data, descriptor });
        let node = Box::new(Node {
            key,
            datum: data,
            descriptor,
            source,
            left: None,
            right: None,
            balance: 0,
        });
        let (root, rejected) = insert_node(self.root.take(), node);
        self.root = root;
        if rejected.is_some() {
            return Err(EcsError::Duplicate {
                type_name: descriptor.name(),
            });
        }
        self.len += 1;
        Ok(())
    }

    fn remove<T: 'static>(&mut self) -> Result<()> {
        let type_name = std::any::type_name::<T>();
        let Some(key) = type_registry::global().get::<T>() else {
            return Err(EcsError::Missing { type_name });
        };
        let (root, removed) = remove_node(self.root.take(), key);
        self.root = root;
        if !removed {
            return Err(EcsError::Missing { type_name });
        }
        self.len -= 1;
        Ok(())
    }

    fn get<T: 'static>(&self) -> Option<&T> {
        let key = type_registry::global().get::<T>()?;
        lookup_node(&self.root, key).map(|n| unsafe { &*n.datum.as_ptr().cast::<T>() })
    }

    fn get_mut<T: 'static>(&mut self) -> Option<&mut T> {
        let key = type_registry::global().get::<T>()?;
        lookup_node_mut(&mut self.root, key).map(|n| unsafe { &mut *n.datum.as_ptr().cast::<T>() })
    }

    fn contains<T: 'static>(&self) -> bool {
        match type_registry::global().get::<T>() {
            Some(key) => lookup_node(&self.root, key).is_some(),
            None => false,
        }
    }

    fn len(&self) -> usize {
        self.len
    }

    fn clear(&mut self) {
        self.root = None;
        self.len = 0;
    }

    fn insert_many(&mut self, entries: Vec<(TypeKey, Descriptor, Box<dyn FnOnce(NonNull<u8>)>)>) {
        self.insert_many_packed(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, PartialEq)]
    struct A(i32);
    #[derive(Debug, PartialEq)]
    struct B(i32);
    #[derive(Debug, PartialEq)]
    struct C(i32);

    #[test]
    fn insert_then_get_roundtrips() {
        // Given
        let mut container = AvlContainer::new();

        // When
        container.insert(A(1)).unwrap();

        // Then
        assert_eq!(container.get::<A>(), Some(&A(1)));
        assert!(container.is_avl());
    }

    #[test]
    fn inserting_duplicate_type_fails() {
        // Given
        let mut container = AvlContainer::new();
        container.insert(A(1)).unwrap();

        // When
        let result = container.insert(A(2));

        // Then
        assert!(matches!(result, Err(EcsError::Duplicate { .. })));
        assert_eq!(container.get::<A>(), Some(&A(1)));
    }

    #[test]
    fn remove_missing_type_fails() {
        // Given
        let mut container = AvlContainer::new();

        // When
        let result = Container::remove::<A>(&mut container);

        // Then
        assert!(matches!(result, Err(EcsError::Missing { .. })));
    }

    #[test]
    fn remove_then_readd_is_allowed() {
        // Given
        let mut container = AvlContainer::new();
        container.insert(A(1)).unwrap();

        // When
        Container::remove::<A>(&mut container).unwrap();
        container.insert(A(2)).unwrap();

        // Then
        assert_eq!(container.get::<A>(), Some(&A(2)));
    }

    #[test]
    fn tree_stays_balanced_after_lr_insertion_sequence() {
        // Given: keys inserted in an order that forces a left-right rotation in a plain BST.
        let mut container = AvlContainer::new();

        // When
        container.insert(C(0)).unwrap();
        container.insert(A(0)).unwrap();
        container.insert(B(0)).unwrap();

        // Then
        assert!(container.is_avl());
        assert_eq!(container.len(), 3);
    }

    #[test]
    fn destructor_runs_exactly_once_on_remove() {
        // Given
        use std::cell::RefCell;
        use std::rc::Rc;
        let drops: Rc<RefCell<u32>> = Rc::new(RefCell::new(0));

        struct Counted(Rc<RefCell<u32>>);
        impl Drop for Counted {
            fn drop(&mut self) {
                *self.0.borrow_mut() += 1;
            }
        }

        let mut container = AvlContainer::new();
        container.insert(Counted(Rc::clone(&drops))).unwrap();

        // When
        Container::remove::<Counted>(&mut container).unwrap();

        // Then
        assert_eq!(*drops.borrow(), 1);
    }

    #[test]
    fn destructor_runs_on_container_drop() {
        // Given
        use std::cell::RefCell;
        use std::rc::Rc;
        let drops: Rc<RefCell<u32>> = Rc::new(RefCell::new(0));

        struct Counted(Rc<RefCell<u32>>);
        impl Drop for Counted {
            fn drop(&mut self) {
                *self.0.borrow_mut() += 1;
            }
        }

        let mut container = AvlContainer::new();
        container.insert(Counted(Rc::clone(&drops))).unwrap();

        // When
        drop(container);

        // Then
        assert_eq!(*drops.borrow(), 1);
    }

    #[test]
    fn insert_many_packs_all_components_into_one_allocation() {
        // Given
        let mut container = AvlContainer::new();
        let da = type_registry::descriptor_of::<A>();
        let db = type_registry::descriptor_of::<B>();
        let values: Vec<(TypeKey, Descriptor, Box<dyn FnOnce(NonNull<u8>)>)> = vec![
            (
                da.key(),
                da,
                Box::new(|ptr| unsafe { std::ptr::write(ptr.as_ptr().cast::<A>(), A(10)) }),
            ),
            (
                db.key(),
                db,
                Box::new(|ptr| unsafe { std::ptr::write(ptr.as_ptr().cast::<B>(), B(20)) }),
            ),
        ];

        // When
        container.insert_many(values);

        // Then
        assert_eq!(container.get::<A>(), Some(&A(10)));
        assert_eq!(container.get::<B>(), Some(&B(20)));
        assert!(container.is_avl());
    }

    #[test]
    fn insert_many_drops_every_member_when_container_drops() {
        // Given
        use std::cell::RefCell;
        use std::rc::Rc;
        let drops: Rc<RefCell<u32>> = Rc::new(RefCell::new(0));

        struct CountedA(Rc<RefCell<u32>>);
        impl Drop for CountedA {
            fn drop(&mut self) {
                *self.0.borrow_mut() += 1;
            }
        }
        struct CountedB(Rc<RefCell<u32>>);
        impl Drop for CountedB {
            fn drop(&mut self) {
                *self.0.borrow_mut() += 1;
            }
        }

        let mut container = AvlContainer::new();
        let d_a = type_registry::descriptor_of::<CountedA>();
        let d_b = type_registry::descriptor_of::<CountedB>();
        let a = CountedA(Rc::clone(&drops));
        let b = CountedB(Rc::clone(&drops));
        let values: Vec<(TypeKey, Descriptor, Box<dyn FnOnce(NonNull<u8>)>)> = vec![
            (
                d_a.key(),
                d_a,
                Box::new(move |ptr| unsafe { std::ptr::write(ptr.as_ptr().cast::<CountedA>(), a) }),
            ),
            (
                d_b.key(),
                d_b,
                Box::new(move |ptr| unsafe { std::ptr::write(ptr.as_ptr().cast::<CountedB>(), b) }),
            ),
        ];
        container.insert_many(values);

        // When
        drop(container);

        // Then
        assert_eq!(*drops.borrow(), 2);
    }

    proptest! {
        #[test]
        fn stays_balanced_under_random_insert_remove_sequences(ops in prop::collection::vec(0u8..6, 0..64)) {
            // Given a fixed palette of five component-ish keys, exercised through a real
            // container (not raw keys) so insert/remove rejection paths participate too.
            let mut container = AvlContainer::new();
            let mut present = [false; 5];

            for op in ops {
                let slot = (op % 5) as usize;
                let adding = op >= 5 || !present[slot];
                match slot {
                    0 => exercise::<Key0>(&mut container, &mut present, slot, adding),
                    1 => exercise::<Key1>(&mut container, &mut present, slot, adding),
                    2 => exercise::<Key2>(&mut container, &mut present, slot, adding),
                    3 => exercise::<Key3>(&mut container, &mut present, slot, adding),
                    _ => exercise::<Key4>(&mut container, &mut present, slot, adding),
                }
                prop_assert!(container.is_avl());
            }
        }
    }

    struct Key0;
    struct Key1;
    struct Key2;
    struct Key3;
    struct Key4;

    fn exercise<T: 'static + Default>(
        container: &mut AvlContainer,
        present: &mut [bool; 5],
        slot: usize,
        adding: bool,
    ) {
        if adding {
            if container.insert(T::default()).is_ok() {
                present[slot] = true;
            }
        } else if Container::remove::<T>(container).is_ok() {
            present[slot] = false;
        }
    }

    impl Default for Key0 {
        fn default() -> Self {
            Key0
        }
    }
    impl Default for Key1 {
        fn default() -> Self {
            Key1
        }
    }
    impl Default for Key2 {
        fn default() -> Self {
            Key2
        }
    }
    impl Default for Key3 {
        fn default() -> Self {
            Key3
        }
    }
    impl Default for Key4 {
        fn default() -> Self {
            Key4
        }
    }
}
