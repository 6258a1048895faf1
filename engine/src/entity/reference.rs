//! Type-erased entity references.
//!
//! [`Entity<C>`](super::facade::Entity) is generic over its container kind; code that holds onto
//! an entity without caring which kind it is (a scene's deletion queue, say) uses [`EntityRef`] or
//! [`ConstEntityRef`] instead. Both erase the container type via `Weak<dyn Any>` and restore it on
//! promotion, checking identity the way the reference implementation's safety tag does — here,
//! with `std::any::Any`'s own `TypeId` downcast.

use std::any::Any;

use crate::container::Container;
use crate::error::{EcsError, Result};
use crate::handle::Weak;

use super::body::EntityBody;
use super::facade::{ConstEntity, Entity};

/// A type-erased, possibly-stale handle to an entity.
///
/// Promoting back to a concrete `Entity<C>` fails with [`EcsError::Expired`] if every strong
/// handle to the entity has been dropped, or [`EcsError::TypeMismatch`] if `C` doesn't match the
/// container kind the entity was actually created with.
pub struct EntityRef {
    weak: Weak<dyn Any>,
}

impl EntityRef {
    pub(crate) fn new(weak: Weak<dyn Any>) -> Self {
        Self { weak }
    }

    /// Identity hash, equal to the hash of the [`Entity`] this reference was taken from.
    pub fn hash(&self) -> u64 {
        self.weak.owner_hash()
    }

    /// True iff every strong handle to the referenced entity has already been dropped.
    pub fn has_expired(&self) -> bool {
        self.weak.has_expired()
    }

    /// Restore a concrete, strongly-held entity handle of container kind `C`.
    pub fn promote<C: Container>(&self) -> Result<Entity<C>> {
        let any = self.weak.lock()?;
        let body = any
            .downcast::<EntityBody<C>>()
            .map_err(|_| EcsError::TypeMismatch)?;
        Ok(Entity::from_body(body))
    }
}

impl Clone for EntityRef {
    fn clone(&self) -> Self {
        Self {
            weak: self.weak.clone(),
        }
    }
}

/// Like [`EntityRef`], but promotes only to a [`ConstEntity`] — read-only access.
pub struct ConstEntityRef {
    weak: Weak<dyn Any>,
}

impl ConstEntityRef {
    pub(crate) fn new(weak: Weak<dyn Any>) -> Self {
        Self { weak }
    }

    pub fn hash(&self) -> u64 {
        self.weak.owner_hash()
    }

    pub fn has_expired(&self) -> bool {
        self.weak.has_expired()
    }

    pub fn promote<C: Container>(&self) -> Result<ConstEntity<C>> {
        let any = self.weak.lock()?;
        let body = any
            .downcast::<EntityBody<C>>()
            .map_err(|_| EcsError::TypeMismatch)?;
        Ok(ConstEntity::from_body(body))
    }
}

impl Clone for ConstEntityRef {
    fn clone(&self) -> Self {
        Self {
            weak: self.weak.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::AvlContainer;
    use crate::container::HashContainer;
    use crate::entity::Component;

    #[derive(Debug, PartialEq)]
    struct Marker(i32);
    impl Component for Marker {}

    #[test]
    fn promotes_back_to_same_entity() {
        let mut e: Entity<AvlContainer> = Entity::make_entity();
        e.add(Marker(7)).unwrap();
        let r = e.as_ref().unwrap();
        let promoted = r.promote::<AvlContainer>().unwrap();
        assert_eq!(promoted.get::<Marker>().unwrap(), &Marker(7));
        assert_eq!(promoted.hash(), e.hash());
    }

    #[test]
    fn promotion_fails_on_expiry() {
        let e: Entity<AvlContainer> = Entity::make_entity();
        let r = e.as_ref().unwrap();
        drop(e);
        assert!(r.has_expired());
        assert_eq!(r.promote::<AvlContainer>().unwrap_err(), EcsError::Expired);
    }

    #[test]
    fn promotion_fails_on_type_mismatch() {
        let e: Entity<AvlContainer> = Entity::make_entity();
        let r = e.as_ref().unwrap();
        assert_eq!(r.promote::<HashContainer>().unwrap_err(), EcsError::TypeMismatch);
    }

    #[test]
    fn const_ref_promotes_to_read_only_view() {
        let mut e: Entity<AvlContainer> = Entity::make_entity();
        e.add(Marker(3)).unwrap();
        let r = e.as_const_ref().unwrap();
        let view = r.promote::<AvlContainer>().unwrap();
        assert_eq!(view.get::<Marker>().unwrap(), &Marker(3));
    }
}
