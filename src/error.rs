//! Error types for the region physics core.
//!
//! Provides a unified error type [`PhysicsError`] and a [`Result`] alias.
//! Nothing in this crate propagates an error across the step boundary; taint
//! actions return `Result` and the flush logs failures per action.

use crate::utils::allocator::ObjectId;
use std::fmt;

/// Main error type for physics operations.
#[derive(Debug)]
pub enum PhysicsError {
    /// A caller supplied a non-finite or otherwise unusable value.
    InvalidInput(String),
    /// A native engine call failed (bad mesh, exhausted handles, ...).
    Engine(String),
    /// The referenced object is not present in the arena.
    UnknownObject(ObjectId),
    /// Linking would create a cycle in the linkset tree.
    LinksetCycle { parent: ObjectId, child: ObjectId },
    /// The object's collision geometry has not been realized yet.
    GeometryMissing(ObjectId),
}

impl fmt::Display for PhysicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Self::Engine(msg) => write!(f, "engine call failed: {msg}"),
            Self::UnknownObject(id) => write!(f, "unknown object {id}"),
            Self::LinksetCycle { parent, child } => {
                write!(f, "linking {child} under {parent} would form a cycle")
            }
            Self::GeometryMissing(id) => write!(f, "object {id} has no realized geometry"),
        }
    }
}

impl std::error::Error for PhysicsError {}

/// Convenient Result alias for physics operations.
pub type Result<T> = std::result::Result<T, PhysicsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_object_id() {
        let id = ObjectId::new(3, 1);
        let err = PhysicsError::UnknownObject(id);
        assert!(err.to_string().contains("3v1"));
    }
}
