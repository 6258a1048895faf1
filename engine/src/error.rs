//! Error kinds surfaced by the core (see the crate-level docs for the recovery model).
//!
//! Every variant here is returned synchronously at the call site that detects the problem;
//! none of them are retried internally. `Duplicate`, `Missing`, `Expired`, `TypeMismatch`, and
//! `NullHandle` are all ordinary, recoverable failures a caller is expected to match on. Fatal
//! programmer errors (duplicate types in one parameter pack, a colliding preferred key) are not
//! represented here at all: they `panic!` at the point of detection, since a caller has no
//! sensible way to recover from them.

use thiserror::Error;

/// The error type returned by fallible operations on entities, handles, and containers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EcsError {
    /// An `add` (or the first failing member of a multi-`add`) found the type already present.
    #[error("component `{type_name}` is already present on this entity")]
    Duplicate {
        /// The type that was already present.
        type_name: &'static str,
    },

    /// A `get` or `remove` referenced a type that isn't present.
    #[error("component `{type_name}` is not present on this entity")]
    Missing {
        /// The type that was requested but absent.
        type_name: &'static str,
    },

    /// A weak handle was locked after its last strong owner had already dropped.
    #[error("handle has expired; its owning entity has already been destroyed")]
    Expired,

    /// An erased reference was promoted against the wrong concrete entity type.
    #[error("reference does not refer to an entity of the requested kind")]
    TypeMismatch,

    /// An operation was attempted on a null (unbound) entity handle.
    #[error("operation attempted on a null entity handle")]
    NullHandle,
}

/// Convenience alias for `Result<T, EcsError>`.
pub type Result<T> = std::result::Result<T, EcsError>;
