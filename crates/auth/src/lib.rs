//! `bookstock-auth` — caller identity and the consumer-scope capability check.
//!
//! The engine trusts the caller to supply an authenticated [`Actor`]; what it
//! enforces itself is that the actor's scope covers the consumer it acts on.
//! That check exists exactly once, in [`capability`], and is injected at the
//! workflow boundary.

pub mod actor;
pub mod capability;

pub use actor::{Actor, Role};
pub use capability::{authorize_consumer, authorize_intake, AuthzError};
