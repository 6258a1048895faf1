//! The reference-counted strong/weak handle primitive underlying entity identity.
//!
//! [`Strong<T>`] / [`Weak<T>`] are a from-scratch shared-pointer pair, not `Rc`/`Arc`: they track
//! two *independent* counts (owners and observers) behind one control block, support casting a
//! strong pointer to `dyn Any` and back (used by [`crate::entity::reference`] to erase and later
//! recover an entity's concrete container kind), and expose an `owner_hash` derived from the
//! control block's address — stable for the block's lifetime, which is exactly the identity hash
//! an entity handle needs (see [`crate::entity::facade::Entity::hash`]).
//!
//! `std::rc::Rc`/`Weak` almost fit, but deliberately fuse strong and weak counts into one and
//! offer no hashing and no path from a concrete `Rc<T>` to an `Rc<dyn Any>` that later downcasts
//! back. Reimplementing was the only option; see `DESIGN.md` for the source this is grounded on.

use std::alloc::Layout;
use std::any::Any;
use std::cell::Cell;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::ptr::NonNull;

use crate::error::{EcsError, Result};

struct ParentBlock {
    remaining: Cell<usize>,
    layout: Layout,
}

/// The control block shared by a [`Strong`]/[`Weak`] family derived from one allocation.
struct ControlBlock {
    owners: Cell<u32>,
    observers: Cell<u32>,
    drop_value: unsafe fn(NonNull<u8>),
    release: unsafe fn(*mut ControlBlock),
    /// Set only for slots produced by [`vector_make`]; `release` reads this instead of freeing
    /// its own allocation directly, since the slots of one `vector_make` call share one block.
    parent: Option<NonNull<ParentBlock>>,
}

#[repr(C)]
struct FusedAlloc<T> {
    ctrl: ControlBlock,
    data: T,
}

unsafe fn drop_value_impl<T>(ptr: NonNull<u8>) {
    unsafe { std::ptr::drop_in_place(ptr.as_ptr().cast::<T>()) }
}

unsafe fn release_single<T>(ctrl: *mut ControlBlock) {
    unsafe { std::alloc::dealloc(ctrl.cast::<u8>(), Layout::new::<FusedAlloc<T>>()) }
}

unsafe fn release_vector_slot(ctrl: *mut ControlBlock) {
    let parent = unsafe { (*ctrl).parent }.expect("vector_make slot always carries a parent");
    let remaining = unsafe { parent.as_ref() }.remaining.get() - 1;
    unsafe { parent.as_ref() }.remaining.set(remaining);
    if remaining == 0 {
        let layout = unsafe { parent.as_ref() }.layout;
        unsafe { std::alloc::dealloc(parent.as_ptr().cast::<u8>(), layout) };
    }
}

fn owner_hash_of(ctrl: NonNull<ControlBlock>) -> u64 {
    let mut hasher = DefaultHasher::new();
    (ctrl.as_ptr() as usize).hash(&mut hasher);
    hasher.finish()
}

/// A strong (owning) handle. While any `Strong<T>` derived from the same allocation is alive, the
/// pointee is alive; when the last one drops, the pointee is destroyed in place.
pub struct Strong<T: ?Sized> {
    ptr: NonNull<T>,
    ctrl: NonNull<ControlBlock>,
}

/// A weak (observing) handle. Does not keep the pointee alive; [`Weak::lock`] must re-check that
/// it hasn't already been destroyed.
pub struct Weak<T: ?Sized> {
    ptr: NonNull<T>,
    ctrl: NonNull<ControlBlock>,
}

impl<T> Strong<T> {
    /// Allocate `value` and its control block as one block (the "fused allocation" the spec calls
    /// out as a storage optimization over two independent allocations).
    pub fn make(value: T) -> Self {
        let layout = Layout::new::<FusedAlloc<T>>();
        let raw = unsafe { std::alloc::alloc(layout) }.cast::<FusedAlloc<T>>();
        let Some(block) = NonNull::new(raw) else {
            std::alloc::handle_alloc_error(layout);
        };
        unsafe {
            std::ptr::write(
                std::ptr::addr_of_mut!((*raw).ctrl),
                ControlBlock {
                    owners: Cell::new(1),
                    observers: Cell::new(0),
                    drop_value: drop_value_impl::<T>,
                    release: release_single::<T>,
                    parent: None,
                },
            );
            std::ptr::write(std::ptr::addr_of_mut!((*raw).data), value);
        }
        let ctrl = unsafe { NonNull::new_unchecked(std::ptr::addr_of_mut!((*raw).ctrl)) };
        let ptr = unsafe { NonNull::new_unchecked(std::ptr::addr_of_mut!((*raw).data)) };
        Strong { ptr, ctrl }
    }

    /// Construct `n` independent strong handles from one allocation: `n` control blocks and `n`
    /// values share one block, freed as a unit once every slot's owners *and* observers have both
    /// dropped to zero. Semantically indistinguishable from calling [`Strong::make`] `n` times.
    ///
    /// `f` is called once per index to produce each value *before* any allocation happens, so a
    /// panicking `f` leaves nothing to clean up beyond the `Vec` staging the values.
    pub fn vector_make(n: usize, mut f: impl FnMut(usize) -> T) -> Vec<Strong<T>> {
        if n == 0 {
            return Vec::new();
        }
        let values: Vec<T> = (0..n).map(&mut f).collect();

        let parent_layout = Layout::new::<ParentBlock>();
        let ctrl_array = Layout::array::<ControlBlock>(n).expect("control block array overflow");
        let data_array = Layout::array::<T>(n).expect("data array overflow");
        let (with_ctrl, ctrl_offset) = parent_layout.extend(ctrl_array).expect("layout overflow");
        let (final_layout, data_offset) = with_ctrl.extend(data_array).expect("layout overflow");
        let final_layout = final_layout.pad_to_align();

        let raw = unsafe { std::alloc::alloc(final_layout) };
        let Some(base) = NonNull::new(raw) else {
            std::alloc::handle_alloc_error(final_layout);
        };

        unsafe {
            std::ptr::write(
                base.as_ptr().cast::<ParentBlock>(),
                ParentBlock {
                    remaining: Cell::new(n),
                    layout: final_layout,
                },
            );
        }
        let parent = unsafe { NonNull::new_unchecked(base.as_ptr().cast::<ParentBlock>()) };

        let mut result = Vec::with_capacity(n);
        for (i, value) in values.into_iter().enumerate() {
            let ctrl_ptr = unsafe {
                base.as_ptr()
                    .add(ctrl_offset + i * std::mem::size_of::<ControlBlock>())
                    .cast::<ControlBlock>()
            };
            let data_ptr = unsafe {
                base.as_ptr()
                    .add(data_offset + i * std::mem::size_of::<T>())
                    .cast::<T>()
            };
            unsafe {
                std::ptr::write(
                    ctrl_ptr,
                    ControlBlock {
                        owners: Cell::new(1),
                        observers: Cell::new(0),
                        drop_value: drop_value_impl::<T>,
                        release: release_vector_slot,
                        parent: Some(parent),
                    },
                );
                std::ptr::write(data_ptr, value);
            }
            result.push(Strong {
                ptr: unsafe { NonNull::new_unchecked(data_ptr) },
                ctrl: unsafe { NonNull::new_unchecked(ctrl_ptr) },
            });
        }
        result
    }
}

impl<T: ?Sized> Strong<T> {
    /// Number of strong (owning) handles sharing this allocation.
    pub fn owners(&self) -> u32 {
        unsafe { self.ctrl.as_ref() }.owners.get()
    }

    /// Number of weak (observing) handles sharing this allocation.
    pub fn observers(&self) -> u32 {
        unsafe { self.ctrl.as_ref() }.observers.get()
    }

    /// Identity hash of the control block, stable for the allocation's lifetime.
    pub fn owner_hash(&self) -> u64 {
        owner_hash_of(self.ctrl)
    }

    /// Produce a weak observer of the same allocation.
    pub fn downgrade(&self) -> Weak<T> {
        let ctrl = unsafe { self.ctrl.as_ref() };
        ctrl.observers.set(ctrl.observers.get() + 1);
        Weak {
            ptr: self.ptr,
            ctrl: self.ctrl,
        }
    }

    /// True iff `self` and `other` share the same control block (i.e. the same allocation).
    pub fn ptr_eq(&self, other: &Strong<T>) -> bool {
        self.ctrl == other.ctrl
    }
}

impl<T: Any> Strong<T> {
    /// Erase `T` to `dyn Any`, consuming `self` and transferring its ownership count. Later
    /// recovered via [`Strong::<dyn Any>::downcast`] — this pair is the "safety tag" mechanism
    /// from the spec, using `std::any::Any`'s own `TypeId` check as the tag comparison rather than
    /// a hand-rolled enum, since that's exactly what `Any` already gives for free.
    pub fn upcast_any(self) -> Strong<dyn Any> {
        let ptr = self.ptr;
        let ctrl = self.ctrl;
        std::mem::forget(self);
        Strong {
            ptr: NonNull::new(ptr.as_ptr() as *mut dyn Any).unwrap(),
            ctrl,
        }
    }
}

impl Strong<dyn Any> {
    /// Recover a concrete `Strong<U>` if the erased pointee really is a `U`; otherwise hand back
    /// the original erased handle unchanged (no ownership is lost either way).
    pub fn downcast<U: Any>(self) -> std::result::Result<Strong<U>, Strong<dyn Any>> {
        if unsafe { self.ptr.as_ref() }.is::<U>() {
            let ctrl = self.ctrl;
            let ptr = self.ptr.as_ptr() as *mut U;
            std::mem::forget(self);
            Ok(Strong {
                ptr: unsafe { NonNull::new_unchecked(ptr) },
                ctrl,
            })
        } else {
            Err(self)
        }
    }
}

impl<T: ?Sized> Clone for Strong<T> {
    fn clone(&self) -> Self {
        let ctrl = unsafe { self.ctrl.as_ref() };
        ctrl.owners.set(ctrl.owners.get() + 1);
        Strong {
            ptr: self.ptr,
            ctrl: self.ctrl,
        }
    }
}

impl<T: ?Sized> std::ops::Deref for Strong<T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: ?Sized> PartialEq for Strong<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}
impl<T: ?Sized> Eq for Strong<T> {}

impl<T: ?Sized> Drop for Strong<T> {
    fn drop(&mut self) {
        let ctrl = unsafe { self.ctrl.as_ref() };
        let owners = ctrl.owners.get();
        if owners == 1 {
            unsafe { (ctrl.drop_value)(NonNull::new_unchecked(self.ptr.as_ptr() as *mut u8)) };
            ctrl.owners.set(0);
            if ctrl.observers.get() == 0 {
                unsafe { (ctrl.release)(self.ctrl.as_ptr()) };
            }
        } else {
            ctrl.owners.set(owners - 1);
        }
    }
}

impl<T: ?Sized> Weak<T> {
    /// Promote to a strong handle, incrementing the owner count, unless the pointee has already
    /// been destroyed.
    pub fn lock(&self) -> Result<Strong<T>> {
        let ctrl = unsafe { self.ctrl.as_ref() };
        if ctrl.owners.get() == 0 {
            return Err(EcsError::Expired);
        }
        ctrl.owners.set(ctrl.owners.get() + 1);
        Ok(Strong {
            ptr: self.ptr,
            ctrl: self.ctrl,
        })
    }

    /// True iff the last strong handle has already dropped.
    pub fn has_expired(&self) -> bool {
        unsafe { self.ctrl.as_ref() }.owners.get() == 0
    }

    /// Identity hash of the control block; equal to the hash of every strong/weak handle derived
    /// from the same allocation, for as long as that allocation exists.
    pub fn owner_hash(&self) -> u64 {
        owner_hash_of(self.ctrl)
    }

    /// True iff `self` and `other` observe the same allocation.
    pub fn ptr_eq(&self, other: &Weak<T>) -> bool {
        self.ctrl == other.ctrl
    }
}

impl<T: Any> Weak<T> {
    /// Erase `T` to `dyn Any`, consuming `self` and transferring its observer count.
    pub fn upcast_any(self) -> Weak<dyn Any> {
        let ptr = self.ptr;
        let ctrl = self.ctrl;
        std::mem::forget(self);
        Weak {
            ptr: NonNull::new(ptr.as_ptr() as *mut dyn Any).unwrap(),
            ctrl,
        }
    }
}

impl<T: ?Sized> Clone for Weak<T> {
    fn clone(&self) -> Self {
        let ctrl = unsafe { self.ctrl.as_ref() };
        ctrl.observers.set(ctrl.observers.get() + 1);
        Weak {
            ptr: self.ptr,
            ctrl: self.ctrl,
        }
    }
}

impl<T: ?Sized> PartialEq for Weak<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}
impl<T: ?Sized> Eq for Weak<T> {}

impl<T: ?Sized> Drop for Weak<T> {
    fn drop(&mut self) {
        let ctrl = unsafe { self.ctrl.as_ref() };
        let observers = ctrl.observers.get();
        if observers == 1 && ctrl.owners.get() == 0 {
            unsafe { (ctrl.release)(self.ctrl.as_ptr()) };
        } else {
            ctrl.observers.set(observers - 1);
        }
    }
}
