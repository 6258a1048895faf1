//! Component types used across the container benchmarks.
//!
//! Sized to be representative of real game components: a handful of small POD transform
//! components, plus a shared `Data` and a palette of zero-sized markers used to push the
//! component count per entity up without adding payload weight. Every type here implements
//! [`Component`], required to store it through the entity façade.

use rusty_ecs::Component;

/// 3D position component (12 bytes).
#[derive(Clone, Copy, Debug, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}
impl Component for Position {}

/// 3D velocity component (12 bytes).
#[derive(Clone, Copy, Debug, Default)]
pub struct Velocity {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}
impl Component for Velocity {}

/// 4x4 transformation matrix (64 bytes).
#[derive(Clone, Copy, Debug)]
pub struct Transform {
    pub matrix: [[f32; 4]; 4],
}
impl Component for Transform {}

impl Default for Transform {
    fn default() -> Self {
        Self {
            matrix: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }
    }
}

/// Health component for damageable entities.
#[derive(Clone, Copy, Debug, Default)]
pub struct Health {
    pub current: f32,
    pub max: f32,
}
impl Component for Health {}

/// Shared payload component used by the fragmentation-style benchmarks.
#[derive(Clone, Copy, Debug, Default)]
pub struct Data {
    pub value: f64,
}
impl Component for Data {}

// Marker (zero-sized) components for the many-types-per-entity benchmarks.
macro_rules! define_marker_components {
    ($($name:ident),*) => {
        $(
            #[derive(Clone, Copy, Debug, Default)]
            pub struct $name;
            impl Component for $name {}
        )*
    };
}

define_marker_components!(
    MarkerA, MarkerB, MarkerC, MarkerD, MarkerE, MarkerF, MarkerG, MarkerH, MarkerI, MarkerJ,
    MarkerK, MarkerL, MarkerM, MarkerN, MarkerO, MarkerP, MarkerQ, MarkerR, MarkerS, MarkerT
);
