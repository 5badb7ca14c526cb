use serde::{Deserialize, Serialize};

use bookstock_core::{ActorId, SchoolId};

/// Role of an acting caller.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Unscoped; may act on any consumer and on stock intake.
    Admin,
    /// Scoped to one school; may act on that school's consumers only.
    SchoolStaff,
    /// Receiving/stock maintenance; no school-scoped fulfillment rights.
    Warehouse,
}

/// An authenticated caller with its scoping attribute.
///
/// Construction is decoupled from transport: whoever authenticates the caller
/// (out of scope here) builds an `Actor` and passes it into every mutating
/// engine call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub actor_id: ActorId,
    pub role: Role,
    /// Present iff the role is school-scoped.
    pub school: Option<SchoolId>,
}

impl Actor {
    pub fn admin(actor_id: ActorId) -> Self {
        Self {
            actor_id,
            role: Role::Admin,
            school: None,
        }
    }

    pub fn school_staff(actor_id: ActorId, school: SchoolId) -> Self {
        Self {
            actor_id,
            role: Role::SchoolStaff,
            school: Some(school),
        }
    }

    pub fn warehouse(actor_id: ActorId) -> Self {
        Self {
            actor_id,
            role: Role::Warehouse,
            school: None,
        }
    }
}
