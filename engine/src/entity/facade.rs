//! The public entity handle and its variadic component operations.
//!
//! [`Entity<C>`] is the façade a host interacts with: a cheap-to-clone handle sharing ownership of
//! one [`EntityBody<C>`] through a [`Strong`]. Every multi-component operation (`add`, `get`,
//! `ptr`, `has_all`, `has_any`, `remove`) is expressed once, generically, over [`ComponentList`] —
//! implemented both for a bare `T` and for tuples `(T1, .., Tn)` up to sixteen members, the way the
//! reference engine's `Set`/`Target` pair was generalized from "apply one component" to "apply a
//! whole pack." `ensure` additionally requires [`EnsureList`], which needs every member type to
//! implement `Default`.

use std::any::type_name;
use std::ptr::NonNull;

use crate::container::Container;
use crate::error::{EcsError, Result};
use crate::handle::{Strong, Weak};
use crate::type_registry::{self, Descriptor, TypeKey};

use super::body::{EntityBody, HomeScene};
use super::reference::EntityRef;

/// A handle to an entity's components, parameterized over its storage strategy.
///
/// Cloning an `Entity` shares the same underlying body — both handles see the same components.
/// A default-constructed entity (or one built with [`Entity::null`]) is unbound: every operation
/// on it fails with [`EcsError::NullHandle`] except [`Entity::is_null`] and [`Entity::swap`].
pub struct Entity<C: Container> {
    body: Option<Strong<EntityBody<C>>>,
}

impl<C: Container> Entity<C> {
    pub(crate) fn from_body(body: Strong<EntityBody<C>>) -> Self {
        Self { body: Some(body) }
    }

    /// Build a new, unbound-to-any-scene entity.
    pub fn make_entity() -> Self {
        Self {
            body: Some(Strong::make(EntityBody::new(None))),
        }
    }

    /// Build a new entity recording `home` as the scene that created it.
    pub fn make_entity_in(home: Weak<dyn HomeScene>) -> Self {
        Self {
            body: Some(Strong::make(EntityBody::new(Some(home)))),
        }
    }

    /// A null handle: bound to nothing, equivalent to a default-constructed entity.
    pub fn null() -> Self {
        Self { body: None }
    }

    /// True iff this handle is unbound.
    pub fn is_null(&self) -> bool {
        self.body.is_none()
    }

    /// Identity hash, stable for the entity's lifetime and shared by every clone of this handle
    /// and every [`EntityRef`] promoted from it. Null entities hash to `0`.
    pub fn hash(&self) -> u64 {
        self.body.as_ref().map_or(0, |b| b.owner_hash())
    }

    /// Swap what two handles point at, including either or both being null.
    pub fn swap(&mut self, other: &mut Self) {
        std::mem::swap(&mut self.body, &mut other.body);
    }

    /// Mark this entity for deletion. Idempotent; the owning scene is expected to poll
    /// [`EntityBody::deletion_requested`] and act on the first transition.
    pub fn request_deletion(&self) -> Result<()> {
        self.body()?.request_deletion();
        Ok(())
    }

    /// Record which scene created this entity, for the body's back-reference.
    pub fn set_home_scene(&self, scene: Weak<dyn HomeScene>) -> Result<()> {
        self.body()?.set_home_scene(scene);
        Ok(())
    }

    /// Erase this entity's container kind into a type-agnostic weak reference.
    pub fn as_ref(&self) -> Result<EntityRef> {
        let weak = self.body()?.downgrade();
        Ok(EntityRef::new(weak.upcast_any()))
    }

    /// Erase this entity's container kind into a type-agnostic, read-only weak reference.
    pub fn as_const_ref(&self) -> Result<super::reference::ConstEntityRef> {
        let weak = self.body()?.downgrade();
        Ok(super::reference::ConstEntityRef::new(weak.upcast_any()))
    }

    fn body(&self) -> Result<&Strong<EntityBody<C>>> {
        self.body.as_ref().ok_or(EcsError::NullHandle)
    }

    /// Add one component, or a tuple of several, all-or-nothing: if any requested type is already
    /// present, nothing is added and this fails with [`EcsError::Duplicate`].
    pub fn add<L: ComponentList>(&mut self, values: L) -> Result<L::RefsMut<'_>> {
        L::assert_unique_types();
        let body = self.body.as_ref().ok_or(EcsError::NullHandle)?;
        let container = body.container_mut();
        if let Some(type_name) = L::first_present(container) {
            return Err(EcsError::Duplicate { type_name });
        }
        container.reserve_for_more(&L::descriptors());
        container.insert_many(values.into_entries());
        L::get_mut_refs(container)
    }

    /// Add one component, or a tuple of several, each only if not already present. Never fails.
    pub fn ensure<L: EnsureList>(&mut self) -> Result<L::RefsMut<'_>> {
        L::assert_unique_types();
        let body = self.body.as_ref().ok_or(EcsError::NullHandle)?;
        let container = body.container_mut();
        L::ensure_into(container);
        L::get_mut_refs(container)
    }

    /// Borrow one component, or a tuple of several. Fails with [`EcsError::Missing`] if any
    /// requested type is absent.
    pub fn get<L: ComponentList>(&self) -> Result<L::Refs<'_>> {
        L::assert_unique_types();
        L::get_refs(self.body()?.container())
    }

    /// Mutably borrow one component, or a tuple of several.
    pub fn get_mut<L: ComponentList>(&mut self) -> Result<L::RefsMut<'_>> {
        L::assert_unique_types();
        L::get_mut_refs(self.body()?.container_mut())
    }

    /// Like [`Entity::get`], but absent types yield `None` instead of failing the whole call.
    pub fn ptr<L: ComponentList>(&self) -> Result<L::Ptrs<'_>> {
        L::assert_unique_types();
        Ok(L::ptr_refs(self.body()?.container()))
    }

    /// Like [`Entity::get_mut`], but absent types yield `None` instead of failing the whole call.
    pub fn ptr_mut<L: ComponentList>(&mut self) -> Result<L::PtrsMut<'_>> {
        L::assert_unique_types();
        Ok(L::ptr_mut_refs(self.body()?.container_mut()))
    }

    /// True iff a component of this type is present.
    pub fn has<T: 'static>(&self) -> bool {
        self.has_all::<T>()
    }

    /// True iff every requested type is present.
    pub fn has_all<L: ComponentList>(&self) -> bool {
        self.body.as_ref().is_some_and(|b| L::has_all_in(b.container()))
    }

    /// True iff at least one requested type is present.
    pub fn has_any<L: ComponentList>(&self) -> bool {
        self.body.as_ref().is_some_and(|b| L::has_any_in(b.container()))
    }

    /// Remove one component, or a tuple of several, all-or-nothing: if any requested type is
    /// absent, nothing is removed and this fails with [`EcsError::Missing`].
    pub fn remove<L: ComponentList>(&mut self) -> Result<()> {
        L::assert_unique_types();
        L::remove_all(self.body()?.container_mut())
    }
}

impl<C: Container> Default for Entity<C> {
    fn default() -> Self {
        Self::null()
    }
}

impl<C: Container> Clone for Entity<C> {
    fn clone(&self) -> Self {
        Self {
            body: self.body.clone(),
        }
    }
}

/// A read-only view of an entity, sharing the same body as any [`Entity<C>`] it was obtained
/// from. Rust has no const-qualified smart pointer to mirror the reference implementation's
/// `ConstEntityBase` directly, so this wraps the same [`Strong`] but exposes only the read half
/// of [`Entity`]'s API.
pub struct ConstEntity<C: Container> {
    body: Option<Strong<EntityBody<C>>>,
}

impl<C: Container> ConstEntity<C> {
    pub(crate) fn from_body(body: Strong<EntityBody<C>>) -> Self {
        Self { body: Some(body) }
    }

    pub fn null() -> Self {
        Self { body: None }
    }

    pub fn is_null(&self) -> bool {
        self.body.is_none()
    }

    pub fn hash(&self) -> u64 {
        self.body.as_ref().map_or(0, |b| b.owner_hash())
    }

    fn body(&self) -> Result<&Strong<EntityBody<C>>> {
        self.body.as_ref().ok_or(EcsError::NullHandle)
    }

    pub fn get<L: ComponentList>(&self) -> Result<L::Refs<'_>> {
        L::assert_unique_types();
        L::get_refs(self.body()?.container())
    }

    pub fn ptr<L: ComponentList>(&self) -> Result<L::Ptrs<'_>> {
        L::assert_unique_types();
        Ok(L::ptr_refs(self.body()?.container()))
    }

    pub fn has<T: 'static>(&self) -> bool {
        self.has_all::<T>()
    }

    pub fn has_all<L: ComponentList>(&self) -> bool {
        self.body.as_ref().is_some_and(|b| L::has_all_in(b.container()))
    }

    pub fn has_any<L: ComponentList>(&self) -> bool {
        self.body.as_ref().is_some_and(|b| L::has_any_in(b.container()))
    }
}

impl<C: Container> From<Entity<C>> for ConstEntity<C> {
    fn from(entity: Entity<C>) -> Self {
        Self { body: entity.body }
    }
}

impl<C: Container> Clone for ConstEntity<C> {
    fn clone(&self) -> Self {
        Self {
            body: self.body.clone(),
        }
    }
}

/// Marker for types storable as entity components.
///
/// Deliberately not blanket-implemented for every `T: 'static`: [`ComponentList`] is implemented
/// both for a bare `T: Component` and, via [`crate::all_tuples`], for tuples of plain `'static`
/// types, and those two impls must stay provably disjoint. Requiring an explicit, user-written
/// `impl Component for MyComponent {}` (rather than a blanket one) means a tuple can never also
/// satisfy `Component` — the same trick the reference engine's own `Component` marker
/// (`ecs/component/mod.rs`) relies on to keep its single-type `Set` impl disjoint from its tuple
/// one.
pub trait Component: 'static {}

/// A type, or tuple of up to sixteen types, operable on as a group by [`Entity`]'s component
/// methods. Implemented for any `T: Component` and, via [`crate::all_tuples`], for tuples of
/// them — generalizing the reference engine's `Set`/`Target` pair from "apply one component
/// value" to every façade operation.
pub trait ComponentList: Sized + 'static {
    /// Shared borrows of every member, in list order.
    type Refs<'a>;
    /// Mutable borrows of every member, in list order.
    type RefsMut<'a>;
    /// Optional shared borrows of every member, in list order.
    type Ptrs<'a>;
    /// Optional mutable borrows of every member, in list order.
    type PtrsMut<'a>;

    /// Diagnostic names of every member, in list order.
    fn type_names() -> Vec<&'static str>;

    /// Registry descriptors of every member, in list order.
    fn descriptors() -> Vec<Descriptor>;

    /// Panics if the same type appears twice in this list — a programmer error the original
    /// rejects at compile time via template metaprogramming; here it's a fatal runtime check run
    /// at the top of every façade entry point that takes a `ComponentList`.
    fn assert_unique_types() {
        let names = Self::type_names();
        for i in 0..names.len() {
            for name in &names[i + 1..] {
                if *name == names[i] {
                    panic!("component type `{}` listed twice in one operation", names[i]);
                }
            }
        }
    }

    /// The first member type already present in `container`, if any.
    fn first_present<Cnt: Container>(container: &Cnt) -> Option<&'static str>;

    /// The first member type absent from `container`, if any.
    fn first_missing<Cnt: Container>(container: &Cnt) -> Option<&'static str>;

    /// True iff every member is present.
    fn has_all_in<Cnt: Container>(container: &Cnt) -> bool;

    /// True iff at least one member is present.
    fn has_any_in<Cnt: Container>(container: &Cnt) -> bool;

    /// Consume `self` into one `(key, descriptor, writer)` entry per member, for
    /// [`Container::insert_many`].
    fn into_entries(self) -> Vec<(TypeKey, Descriptor, Box<dyn FnOnce(NonNull<u8>)>)>;

    fn get_refs<Cnt: Container>(container: &Cnt) -> Result<Self::Refs<'_>>;
    fn get_mut_refs<Cnt: Container>(container: &mut Cnt) -> Result<Self::RefsMut<'_>>;
    fn ptr_refs<Cnt: Container>(container: &Cnt) -> Self::Ptrs<'_>;
    fn ptr_mut_refs<Cnt: Container>(container: &mut Cnt) -> Self::PtrsMut<'_>;
    fn remove_all<Cnt: Container>(container: &mut Cnt) -> Result<()>;
}

/// [`ComponentList`]s whose every member also implements `Default`, enabling [`Entity::ensure`].
pub trait EnsureList: ComponentList {
    fn ensure_into<Cnt: Container>(container: &mut Cnt);
}

fn notify_added<T: 'static>(ptr: *mut T) {
    let descriptor = type_registry::descriptor_of::<T>();
    type_registry::global().notify_addition(descriptor.name(), ptr.cast());
}

impl<T: Component> ComponentList for T {
    type Refs<'a> = &'a T;
    type RefsMut<'a> = &'a mut T;
    type Ptrs<'a> = Option<&'a T>;
    type PtrsMut<'a> = Option<&'a mut T>;

    fn type_names() -> Vec<&'static str> {
        vec![type_name::<T>()]
    }

    fn descriptors() -> Vec<Descriptor> {
        vec![type_registry::descriptor_of::<T>()]
    }

    fn first_present<Cnt: Container>(container: &Cnt) -> Option<&'static str> {
        container.contains::<T>().then(type_name::<T>)
    }

    fn first_missing<Cnt: Container>(container: &Cnt) -> Option<&'static str> {
        (!container.contains::<T>()).then(type_name::<T>)
    }

    fn has_all_in<Cnt: Container>(container: &Cnt) -> bool {
        container.contains::<T>()
    }

    fn has_any_in<Cnt: Container>(container: &Cnt) -> bool {
        container.contains::<T>()
    }

    fn into_entries(self) -> Vec<(TypeKey, Descriptor, Box<dyn FnOnce(NonNull<u8>)>)> {
        let descriptor = type_registry::descriptor_of::<T>();
        let key = descriptor.key();
        vec![(
            key,
            descriptor,
            Box::new(move |ptr: NonNull<u8>| unsafe {
                let typed = ptr.as_ptr().cast::<T>();
                std::ptr::write(typed, self);
                notify_added(typed);
            }),
        )]
    }

    fn get_refs<Cnt: Container>(container: &Cnt) -> Result<&T> {
        container.get::<T>().ok_or(EcsError::Missing { type_name: type_name::<T>() })
    }

    fn get_mut_refs<Cnt: Container>(container: &mut Cnt) -> Result<&mut T> {
        let ptr = container
            .get_mut_ptr::<T>()
            .ok_or(EcsError::Missing { type_name: type_name::<T>() })?;
        Ok(unsafe { &mut *ptr.as_ptr() })
    }

    fn ptr_refs<Cnt: Container>(container: &Cnt) -> Option<&T> {
        container.get::<T>()
    }

    fn ptr_mut_refs<Cnt: Container>(container: &mut Cnt) -> Option<&mut T> {
        container.get_mut_ptr::<T>().map(|p| unsafe { &mut *p.as_ptr() })
    }

    fn remove_all<Cnt: Container>(container: &mut Cnt) -> Result<()> {
        container.remove::<T>()
    }
}

impl<T: Component + Default> EnsureList for T {
    fn ensure_into<Cnt: Container>(container: &mut Cnt) {
        if !container.contains::<T>() {
            let _ = container.insert(T::default());
            if let Some(ptr) = container.get_mut_ptr::<T>() {
                notify_added(ptr.as_ptr());
            }
        }
    }
}

macro_rules! tuple_component_list {
    ($($name:ident),*) => {
        impl<$($name: 'static),*> ComponentList for ($($name,)*) {
            type Refs<'a> = ($(&'a $name,)*);
            type RefsMut<'a> = ($(&'a mut $name,)*);
            type Ptrs<'a> = ($(Option<&'a $name>,)*);
            type PtrsMut<'a> = ($(Option<&'a mut $name>,)*);

            fn type_names() -> Vec<&'static str> {
                vec![$(type_name::<$name>()),*]
            }

            fn descriptors() -> Vec<Descriptor> {
                vec![$(type_registry::descriptor_of::<$name>()),*]
            }

            #[allow(unused_variables)]
            fn first_present<Cnt: Container>(container: &Cnt) -> Option<&'static str> {
                $(if container.contains::<$name>() { return Some(type_name::<$name>()); })*
                None
            }

            #[allow(unused_variables)]
            fn first_missing<Cnt: Container>(container: &Cnt) -> Option<&'static str> {
                $(if !container.contains::<$name>() { return Some(type_name::<$name>()); })*
                None
            }

            fn has_all_in<Cnt: Container>(container: &Cnt) -> bool {
                true $(&& container.contains::<$name>())*
            }

            fn has_any_in<Cnt: Container>(container: &Cnt) -> bool {
                false $(|| container.contains::<$name>())*
            }

            #[allow(non_snake_case)]
            fn into_entries(self) -> Vec<(TypeKey, Descriptor, Box<dyn FnOnce(NonNull<u8>)>)> {
                let ($($name,)*) = self;
                vec![$({
                    let descriptor = type_registry::descriptor_of::<$name>();
                    let key = descriptor.key();
                    let value = $name;
                    (key, descriptor, Box::new(move |ptr: NonNull<u8>| unsafe {
                        let typed = ptr.as_ptr().cast::<$name>();
                        std::ptr::write(typed, value);
                        notify_added(typed);
                    }) as Box<dyn FnOnce(NonNull<u8>)>)
                }),*]
            }

            fn get_refs<Cnt: Container>(container: &Cnt) -> Result<Self::Refs<'_>> {
                Ok(($(
                    container.get::<$name>().ok_or(EcsError::Missing { type_name: type_name::<$name>() })?,
                )*))
            }

            #[allow(non_snake_case)]
            fn get_mut_refs<Cnt: Container>(container: &mut Cnt) -> Result<Self::RefsMut<'_>> {
                $(
                    let $name = container
                        .get_mut_ptr::<$name>()
                        .ok_or(EcsError::Missing { type_name: type_name::<$name>() })?;
                )*
                Ok(unsafe { ($(&mut *$name.as_ptr(),)*) })
            }

            fn ptr_refs<Cnt: Container>(container: &Cnt) -> Self::Ptrs<'_> {
                ($(container.get::<$name>(),)*)
            }

            fn ptr_mut_refs<Cnt: Container>(container: &mut Cnt) -> Self::PtrsMut<'_> {
                ($(container.get_mut_ptr::<$name>().map(|p| unsafe { &mut *p.as_ptr() }),)*)
            }

            fn remove_all<Cnt: Container>(container: &mut Cnt) -> Result<()> {
                if let Some(type_name) = Self::first_missing(container) {
                    return Err(EcsError::Missing { type_name });
                }
                $(container.remove::<$name>()?;)*
                Ok(())
            }
        }
    }
}

crate::all_tuples!(tuple_component_list);

macro_rules! tuple_ensure_list {
    ($($name:ident),*) => {
        impl<$($name: 'static + Default),*> EnsureList for ($($name,)*) {
            #[allow(non_snake_case)]
            fn ensure_into<Cnt: Container>(container: &mut Cnt) {
                $(
                    if !container.contains::<$name>() {
                        let _ = container.insert($name::default());
                        if let Some(ptr) = container.get_mut_ptr::<$name>() {
                            notify_added(ptr.as_ptr());
                        }
                    }
                )*
            }
        }
    }
}

crate::all_tuples!(tuple_ensure_list);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{AvlContainer, HashContainer};

    #[derive(Debug, PartialEq, Default)]
    struct Position(i32, i32);
    impl Component for Position {}

    #[derive(Debug, PartialEq, Default)]
    struct Velocity(i32, i32);
    impl Component for Velocity {}

    #[derive(Debug, PartialEq)]
    struct Tag(&'static str);
    impl Component for Tag {}

    #[test]
    fn add_and_get_single_component() {
        let mut e: Entity<AvlContainer> = Entity::make_entity();
        e.add(Position(1, 2)).unwrap();
        assert_eq!(e.get::<Position>().unwrap(), &Position(1, 2));
    }

    #[test]
    fn add_rejects_duplicate_type() {
        let mut e: Entity<HashContainer> = Entity::make_entity();
        e.add(Position(1, 2)).unwrap();
        let err = e.add(Position(3, 4)).unwrap_err();
        assert_eq!(err, EcsError::Duplicate { type_name: type_name::<Position>() });
    }

    #[test]
    fn multi_add_is_all_or_nothing() {
        let mut e: Entity<AvlContainer> = Entity::make_entity();
        e.add(Position(0, 0)).unwrap();
        let err = e.add((Position(1, 1), Velocity(2, 2))).unwrap_err();
        assert_eq!(err, EcsError::Duplicate { type_name: type_name::<Position>() });
        assert!(!e.has::<Velocity>());
    }

    #[test]
    fn multi_add_then_multi_get() {
        let mut e: Entity<HashContainer> = Entity::make_entity();
        e.add((Position(1, 2), Velocity(3, 4))).unwrap();
        let (p, v) = e.get::<(Position, Velocity)>().unwrap();
        assert_eq!(*p, Position(1, 2));
        assert_eq!(*v, Velocity(3, 4));
    }

    #[test]
    fn get_mut_allows_independent_simultaneous_mutation() {
        let mut e: Entity<AvlContainer> = Entity::make_entity();
        e.add((Position(0, 0), Velocity(1, 1))).unwrap();
        let (p, v) = e.get_mut::<(Position, Velocity)>().unwrap();
        p.0 += v.0;
        p.1 += v.1;
        assert_eq!(e.get::<Position>().unwrap(), &Position(1, 1));
    }

    #[test]
    fn ensure_only_inserts_default_once() {
        let mut e: Entity<AvlContainer> = Entity::make_entity();
        e.ensure::<Position>().unwrap().0 = 5;
        e.ensure::<Position>().unwrap();
        assert_eq!(e.get::<Position>().unwrap(), &Position(5, 0));
    }

    #[test]
    fn has_all_and_has_any() {
        let mut e: Entity<HashContainer> = Entity::make_entity();
        e.add(Position(0, 0)).unwrap();
        assert!(e.has_any::<(Position, Velocity)>());
        assert!(!e.has_all::<(Position, Velocity)>());
        e.add(Velocity(0, 0)).unwrap();
        assert!(e.has_all::<(Position, Velocity)>());
    }

    #[test]
    fn remove_is_all_or_nothing() {
        let mut e: Entity<AvlContainer> = Entity::make_entity();
        e.add(Position(0, 0)).unwrap();
        let err = e.remove::<(Position, Velocity)>().unwrap_err();
        assert_eq!(err, EcsError::Missing { type_name: type_name::<Velocity>() });
        assert!(e.has::<Position>());
    }

    #[test]
    fn ptr_never_fails_on_missing_types() {
        let e: Entity<HashContainer> = Entity::make_entity();
        let (p, t) = e.ptr::<(Position, Tag)>().unwrap();
        assert!(p.is_none());
        assert!(t.is_none());
    }

    #[test]
    fn null_entity_fails_every_component_op() {
        let mut e: Entity<AvlContainer> = Entity::null();
        assert!(e.is_null());
        assert_eq!(e.add(Position(0, 0)).unwrap_err(), EcsError::NullHandle);
        assert_eq!(e.get::<Position>().unwrap_err(), EcsError::NullHandle);
    }

    #[test]
    #[should_panic(expected = "listed twice")]
    fn duplicate_type_in_one_pack_is_fatal() {
        let mut e: Entity<AvlContainer> = Entity::make_entity();
        let _ = e.add((Position(0, 0), Position(1, 1)));
    }

    #[test]
    fn swap_exchanges_bound_bodies() {
        let mut a: Entity<AvlContainer> = Entity::make_entity();
        let mut b: Entity<AvlContainer> = Entity::null();
        a.add(Position(9, 9)).unwrap();
        a.swap(&mut b);
        assert!(a.is_null());
        assert_eq!(b.get::<Position>().unwrap(), &Position(9, 9));
    }

    #[test]
    fn clones_share_the_same_body() {
        let mut a: Entity<AvlContainer> = Entity::make_entity();
        a.add(Position(1, 1)).unwrap();
        let b = a.clone();
        a.add(Velocity(2, 2)).unwrap();
        assert!(b.has::<Velocity>());
        assert_eq!(a.hash(), b.hash());
    }
}
