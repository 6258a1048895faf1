//! Entity identity: a body holding components, a façade handle sharing it, and type-erased
//! references that can outlive knowledge of which container kind an entity uses.

pub mod body;
pub mod facade;
pub mod reference;

pub use body::{EntityBody, HomeScene};
pub use facade::{Component, ComponentList, ConstEntity, Entity, EnsureList};
pub use reference::{ConstEntityRef, EntityRef};
