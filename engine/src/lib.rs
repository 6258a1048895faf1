//! `rusty_ecs` — the per-entity component core of an Entity–Component System.
//!
//! An [`Entity`] wraps a reference-counted handle to a [`container::Container`] holding at most
//! one instance of each component type. Two interchangeable container strategies are provided —
//! [`AvlContainer`], a type-keyed AVL tree, and [`HashContainer`], an open-addressed arena-backed
//! hash table — and an entity picks one at construction via the `C` type parameter.
//!
//! This crate deliberately does not include a "scene" (bulk entity lifecycle, deletion-pass
//! scheduling) or a system/query layer over component tuples; those are external collaborators
//! that consume the façade in [`entity`]. See [`entity::HomeScene`] for the seam a host scene
//! implements to receive deletion-request notifications.
//!
//! Every component type must implement the [`Component`] marker before it can be stored — there
//! is no blanket impl, so a plain `impl Component for MyComponent {}` alongside the type
//! definition is required (see [`Component`]'s docs for why it isn't blanket-implemented).
//!
//! # Quick start
//!
//! ```
//! use rusty_ecs::{AvlContainer, Component, Entity};
//!
//! #[derive(Debug, PartialEq, Default)]
//! struct Position(f32, f32);
//! impl Component for Position {}
//!
//! #[derive(Debug, PartialEq, Default)]
//! struct Velocity(f32, f32);
//! impl Component for Velocity {}
//!
//! let mut entity: Entity<AvlContainer> = Entity::make_entity();
//! entity.add((Position(0.0, 0.0), Velocity(1.0, 0.5))).unwrap();
//!
//! let (position, velocity) = entity.get_mut::<(Position, Velocity)>().unwrap();
//! position.0 += velocity.0;
//! position.1 += velocity.1;
//!
//! assert_eq!(entity.get::<Position>().unwrap(), &Position(1.0, 0.5));
//! entity.remove::<Velocity>().unwrap();
//! assert!(!entity.has::<Velocity>());
//! ```

pub mod container;
pub mod entity;
pub mod error;
pub mod handle;
pub mod type_registry;

mod util;

pub use container::{AvlContainer, Container, HashContainer};
pub use entity::{Component, ComponentList, ConstEntity, Entity, EnsureList, EntityBody, EntityRef, ConstEntityRef, HomeScene};
pub use error::{EcsError, Result};
pub use handle::{Strong, Weak};
pub use type_registry::{PreferredKey, PreferredName, TypeKey, TypeRegistry};

/// Convenience re-exports for the common entry points of this crate.
pub mod prelude {
    pub use crate::container::{AvlContainer, Container, HashContainer};
    pub use crate::entity::{Component, ComponentList, ConstEntity, Entity, EnsureList, EntityRef, HomeScene, ConstEntityRef};
    pub use crate::error::{EcsError, Result};
    pub use crate::type_registry::{PreferredKey, PreferredName, TypeKey};
}
