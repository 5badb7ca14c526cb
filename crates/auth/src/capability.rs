use thiserror::Error;

use bookstock_core::SchoolId;

use crate::actor::{Actor, Role};

/// Authorization failure, distinct from not-found.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("actor carries no school scope")]
    MissingScope,

    #[error("actor scope {actor_school} does not cover school {required}")]
    ScopeMismatch {
        actor_school: SchoolId,
        required: SchoolId,
    },

    #[error("role {role:?} is not entitled to this operation")]
    RoleNotEntitled { role: Role },
}

/// The single capability check for consumer-directed operations
/// (fulfill, return, cancel, reserve, release).
///
/// `owning_school` is the school the consumer resolves to — the school itself,
/// or the school owning the bundle. Pure policy: no IO, no panics.
pub fn authorize_consumer(actor: &Actor, owning_school: SchoolId) -> Result<(), AuthzError> {
    match actor.role {
        Role::Admin => Ok(()),
        Role::SchoolStaff => match actor.school {
            None => Err(AuthzError::MissingScope),
            Some(school) if school == owning_school => Ok(()),
            Some(school) => Err(AuthzError::ScopeMismatch {
                actor_school: school,
                required: owning_school,
            }),
        },
        Role::Warehouse => Err(AuthzError::RoleNotEntitled { role: actor.role }),
    }
}

/// Capability check for stock intake (receiving batches).
pub fn authorize_intake(actor: &Actor) -> Result<(), AuthzError> {
    match actor.role {
        Role::Admin | Role::Warehouse => Ok(()),
        Role::SchoolStaff => Err(AuthzError::RoleNotEntitled { role: actor.role }),
    }
}
