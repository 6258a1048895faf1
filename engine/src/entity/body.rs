//! The allocation an [`Entity`](super::facade::Entity) handle shares ownership of.
//!
//! A body holds the entity's component [`Container`], a back-reference to whatever scene created
//! it, and a deletion-request flag a scene polls once per frame. It has no knowledge of the
//! façade that wraps it, or of any particular scene implementation — see [`HomeScene`].

use std::any::Any;
use std::cell::{Cell, RefCell, UnsafeCell};

use log::debug;

use crate::container::Container;
use crate::handle::Weak;

/// The seam between an entity's body and whatever owns its scheduling.
///
/// The core never implements a scene: this trait only lets a body hold a back-reference to one
/// and notify it, without the `container`/`handle`/`entity` modules depending on anything outside
/// themselves. A host crate implements this for its own scene type.
pub trait HomeScene: Any {
    /// Called the first time a given entity's deletion is requested.
    fn notify_deletion_requested(&self, _entity_hash: u64) {}
}

/// Owns one entity's components and bookkeeping. Reached only through a
/// [`Strong`](crate::handle::Strong)/[`Weak`](crate::handle::Weak) handle — see
/// [`Entity`](super::facade::Entity).
pub struct EntityBody<C: Container> {
    container: UnsafeCell<C>,
    home: RefCell<Option<Weak<dyn HomeScene>>>,
    deletion_requested: Cell<bool>,
}

impl<C: Container> EntityBody<C> {
    pub(crate) fn new(home: Option<Weak<dyn HomeScene>>) -> Self {
        Self {
            container: UnsafeCell::new(C::default()),
            home: RefCell::new(home),
            deletion_requested: Cell::new(false),
        }
    }

    pub(crate) fn container(&self) -> &C {
        unsafe { &*self.container.get() }
    }

    /// Exclusive access to the container.
    ///
    /// Sound as long as no other live borrow of this body's container exists. The core assumes
    /// one logical owner drives a given entity's mutations at a time (entities are not
    /// thread-safe — see the crate's concurrency notes); a second [`Entity`](super::facade::Entity)
    /// handle cloned from the same body calling this re-entrantly while a borrow from this call is
    /// still alive would be a caller bug, not something this type catches at runtime.
    pub(crate) fn container_mut(&self) -> &mut C {
        unsafe { &mut *self.container.get() }
    }

    pub(crate) fn request_deletion(&self) {
        if !self.deletion_requested.replace(true) {
            debug!("entity body marked for deletion");
        }
    }

    pub(crate) fn deletion_requested(&self) -> bool {
        self.deletion_requested.get()
    }

    pub(crate) fn set_home_scene(&self, scene: Weak<dyn HomeScene>) {
        *self.home.borrow_mut() = Some(scene);
    }

    pub(crate) fn home_scene(&self) -> Option<Weak<dyn HomeScene>> {
        self.home.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::AvlContainer;

    #[test]
    fn deletion_request_only_logs_once() {
        let body: EntityBody<AvlContainer> = EntityBody::new(None);
        assert!(!body.deletion_requested());
        body.request_deletion();
        assert!(body.deletion_requested());
        body.request_deletion();
        assert!(body.deletion_requested());
    }

    #[test]
    fn container_mut_is_reachable_through_shared_reference() {
        let body: EntityBody<AvlContainer> = EntityBody::new(None);
        body.container_mut().insert(42i32).unwrap();
        assert_eq!(body.container().get::<i32>(), Some(&42));
    }
}
