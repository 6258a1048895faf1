//! Process-wide type registry.
//!
//! Every component type used anywhere in a process is assigned a single, stable [`TypeKey`]
//! the first time [`key_for`] sees it. The registry also records an erased [`Descriptor`] per
//! type: size, alignment, a destructor, and a move-relocator, so that the containers in
//! [`crate::container`] can store and destroy components without knowing their concrete type.
//!
//! ## Thread Safety
//!
//! Registration uses the same lock-free-read / minimal-write pattern as a concurrent map:
//! [`dashmap::DashMap`] holds the `TypeId -> TypeKey` lookup so repeat calls to `key_for::<T>()`
//! never take a lock, and a [`std::sync::RwLock`] guards the (rarely written) descriptor table.
//! This is unrelated to whether a single entity's components may be touched from more than one
//! thread at a time — they may not (see the crate-level concurrency notes) — but two independent
//! scenes in two threads may race to register the same component type for the first time, and
//! that race must resolve to one winning key.

use std::{
    alloc::Layout,
    any::TypeId as StdTypeId,
    ptr::NonNull,
    sync::{
        OnceLock, RwLock,
        atomic::{AtomicU32, Ordering},
    },
};

use dashmap::DashMap;
use log::{debug, error, trace};

/// A component type may implement this to request a stable key instead of an
/// auto-assigned one (useful for serialization or FFI boundaries that need the key to be
/// reproducible across builds). Key `0` is reserved and may not be requested.
pub trait PreferredKey: 'static {
    /// The key this type insists on. Must be nonzero and unique among all `PreferredKey`
    /// implementors registered in the same process.
    const PREFERRED_KEY: u32;
}

/// Companion to [`PreferredKey`]: a diagnostic name to record instead of
/// [`std::any::type_name`].
pub trait PreferredName: 'static {
    /// The name to record in this type's [`Descriptor`].
    fn preferred_name() -> &'static str;
}

/// A stable, process-wide integer key for a registered component type.
///
/// Key `0` is reserved to mean "no type" and is never handed out by [`TypeRegistry::key_for`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeKey(u32);

impl TypeKey {
    /// The reserved empty key. Used as the hash table's sentinel for a free slot.
    pub const EMPTY: TypeKey = TypeKey(0);

    /// Construct a key from a raw value. Exposed for storage code that rebuilds keys from an
    /// on-disk or in-arena representation; prefer [`TypeRegistry::key_for`] otherwise.
    #[inline]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// The index of this key for use in dense, `Vec`-backed storage indexed from zero.
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }

    /// The raw key value.
    #[inline]
    pub fn get(&self) -> u32 {
        self.0
    }

    /// True for [`TypeKey::EMPTY`].
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for TypeKey {
    #[inline]
    fn from(value: u32) -> Self {
        Self::new(value)
    }
}

/// An erased destructor for a registered type.
pub type DropFn = unsafe fn(NonNull<u8>);

/// An erased move-relocator: constructs a copy of the value at `src` into `dst` and leaves
/// `src` logically moved-from (its destructor must not be run afterward).
pub type MoveFn = unsafe fn(src: NonNull<u8>, dst: NonNull<u8>);

/// Erased metadata for a registered component type.
#[derive(Debug, Clone, Copy)]
pub struct Descriptor {
    key: TypeKey,
    name: &'static str,
    std_type_id: StdTypeId,
    layout: Layout,
    drop_fn: DropFn,
    move_fn: MoveFn,
}

impl Descriptor {
    fn new<T: 'static>(key: TypeKey, name: &'static str) -> Self {
        let drop_fn = if std::mem::needs_drop::<T>() {
            Self::drop_impl::<T>
        } else {
            Self::drop_noop
        };
        Self {
            key,
            name,
            std_type_id: StdTypeId::of::<T>(),
            layout: Layout::new::<T>(),
            drop_fn,
            move_fn: Self::move_impl::<T>,
        }
    }

    /// This type's key.
    #[inline]
    pub fn key(&self) -> TypeKey {
        self.key
    }

    /// The diagnostic name recorded for this type.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The `std::any::TypeId` this descriptor was built from, used to cross-check downcasts.
    #[inline]
    pub fn std_type_id(&self) -> StdTypeId {
        self.std_type_id
    }

    /// The type's memory layout.
    #[inline]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Shorthand for `layout().size()`.
    #[inline]
    pub fn size(&self) -> usize {
        self.layout.size()
    }

    /// Shorthand for `layout().align()`.
    #[inline]
    pub fn align(&self) -> usize {
        self.layout.align()
    }

    /// The erased destructor. Safe to call only on a live, initialized instance of this type.
    #[inline]
    pub fn drop_fn(&self) -> DropFn {
        self.drop_fn
    }

    /// The erased move-relocator. Safe to call only with `src` pointing at a live, initialized
    /// instance and `dst` pointing at `size()` bytes of storage aligned to `align()`.
    #[inline]
    pub fn move_fn(&self) -> MoveFn {
        self.move_fn
    }

    unsafe fn drop_impl<T>(ptr: NonNull<u8>) {
        unsafe { std::ptr::drop_in_place(ptr.as_ptr().cast::<T>()) }
    }

    unsafe fn drop_noop(_ptr: NonNull<u8>) {}

    unsafe fn move_impl<T>(src: NonNull<u8>, dst: NonNull<u8>) {
        unsafe {
            let value = std::ptr::read(src.as_ptr().cast::<T>());
            std::ptr::write(dst.as_ptr().cast::<T>(), value);
        }
    }
}

/// A callback invoked after a component is constructed via the entity façade's `add`/`ensure`
/// path. Purely a diagnostics hook; it never influences behavior.
pub type AdditionTracker = Box<dyn Fn(&str, *mut ()) + Send + Sync>;

/// The type registry: translates between static Rust types and the runtime [`Descriptor`]s
/// the erased containers need.
pub struct TypeRegistry {
    type_map: DashMap<StdTypeId, TypeKey>,
    descriptors: RwLock<Vec<Option<Descriptor>>>,
    next_key: AtomicU32,
    addition_tracker: RwLock<Option<AdditionTracker>>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// Construct a new, empty registry. Most callers want the process-wide instance returned
    /// by the free functions in this module; this constructor exists for tests and for hosts
    /// that deliberately want an isolated key space.
    pub fn new() -> Self {
        Self {
            type_map: DashMap::new(),
            descriptors: RwLock::new(Vec::new()),
            // key 0 is reserved, so indices line up 1:1 with keys if we start counting at 1.
            next_key: AtomicU32::new(1),
            addition_tracker: RwLock::new(None),
        }
    }

    /// Return `T`'s key, registering it on first use.
    pub fn key_for<T: 'static>(&self) -> TypeKey {
        self.register::<T>(None, std::any::type_name::<T>())
    }

    /// Like [`TypeRegistry::key_for`], but honors `T`'s [`PreferredKey`]/[`PreferredName`]
    /// implementations. Must be the first call to register `T` in this registry; calling
    /// [`TypeRegistry::key_for`] for `T` first locks in an auto-assigned key instead.
    pub fn key_for_preferred<T: PreferredKey + PreferredName>(&self) -> TypeKey {
        self.register::<T>(Some(T::PREFERRED_KEY), T::preferred_name())
    }

    fn register<T: 'static>(&self, preferred: Option<u32>, name: &'static str) -> TypeKey {
        let std_type_id = StdTypeId::of::<T>();

        if let Some(existing) = self.type_map.get(&std_type_id) {
            trace!("type `{name}` already registered as key {}", existing.get());
            return *existing;
        }

        match self.type_map.entry(std_type_id) {
            dashmap::Entry::Occupied(occupied) => *occupied.get(),
            dashmap::Entry::Vacant(vacant) => {
                let mut descriptors = self.descriptors.write().unwrap();

                let key = match preferred {
                    Some(0) => {
                        error!("type `{name}` requested reserved preferred key 0");
                        panic!("preferred key 0 is reserved for the empty key");
                    }
                    Some(value) => {
                        let index = value as usize;
                        if let Some(Some(existing)) = descriptors.get(index)
                            && existing.std_type_id() != std_type_id
                        {
                            error!(
                                "preferred key {value} already claimed by `{}`, cannot also assign to `{name}`",
                                existing.name()
                            );
                            panic!(
                                "preferred key collision: `{name}` wants key {value}, already held by `{}`",
                                existing.name()
                            );
                        }
                        TypeKey::new(value)
                    }
                    None => TypeKey::new(self.next_key.fetch_add(1, Ordering::Relaxed)),
                };

                let index = key.index();
                if index >= descriptors.len() {
                    descriptors.resize(index + 1, None);
                }
                descriptors[index] = Some(Descriptor::new::<T>(key, name));

                // Keep the auto-increment counter ahead of any preferred key we just consumed,
                // so the next auto-assigned key never collides with it.
                if key.get() >= self.next_key.load(Ordering::Relaxed) {
                    self.next_key.store(key.get() + 1, Ordering::Relaxed);
                }

                debug!("registered type `{name}` as key {}", key.get());
                vacant.insert(key);
                key
            }
        }
    }

    /// Look up `T`'s key without registering it.
    #[inline]
    pub fn get<T: 'static>(&self) -> Option<TypeKey> {
        self.type_map
            .get(&StdTypeId::of::<T>())
            .map(|entry| *entry.value())
    }

    /// Fetch the descriptor for a key, if it has been registered.
    #[inline]
    pub fn descriptor_for(&self, key: TypeKey) -> Option<Descriptor> {
        if key.is_empty() {
            return None;
        }
        self.descriptors.read().unwrap().get(key.index()).copied().flatten()
    }

    /// Fetch the descriptor for `T`, registering it if necessary.
    #[inline]
    pub fn descriptor_of<T: 'static>(&self) -> Descriptor {
        let key = self.key_for::<T>();
        self.descriptor_for(key).expect("just registered")
    }

    /// Install the addition-tracker callback, replacing any previous one.
    pub fn set_addition_tracker(&self, tracker: impl Fn(&str, *mut ()) + Send + Sync + 'static) {
        *self.addition_tracker.write().unwrap() = Some(Box::new(tracker));
    }

    /// Remove the addition-tracker callback, if any.
    pub fn clear_addition_tracker(&self) {
        *self.addition_tracker.write().unwrap() = None;
    }

    /// Invoked by the entity façade after successfully constructing a component.
    pub(crate) fn notify_addition(&self, name: &str, ptr: *mut ()) {
        if let Some(tracker) = self.addition_tracker.read().unwrap().as_ref() {
            tracker(name, ptr);
        }
    }

    /// Number of distinct types registered so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.type_map.len()
    }

    /// True if no type has been registered yet.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

static GLOBAL: OnceLock<TypeRegistry> = OnceLock::new();

/// The process-wide registry shared by every entity in the process.
pub fn global() -> &'static TypeRegistry {
    GLOBAL.get_or_init(TypeRegistry::new)
}

/// Return `T`'s process-wide key, registering it on first use. See [`TypeRegistry::key_for`].
#[inline]
pub fn key_for<T: 'static>() -> TypeKey {
    global().key_for::<T>()
}

/// Return `T`'s process-wide descriptor, registering it on first use.
#[inline]
pub fn descriptor_of<T: 'static>() -> Descriptor {
    global().descriptor_of::<T>()
}

/// Fetch the descriptor for a key in the process-wide registry.
#[inline]
pub fn descriptor_for(key: TypeKey) -> Option<Descriptor> {
    global().descriptor_for(key)
}
