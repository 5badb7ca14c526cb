use thiserror::Error;

use bookstock_auth::AuthzError;
use bookstock_core::{BundleId, DomainError, FulfillmentId, TitleId};

use crate::store::StoreError;

/// Workflow-level failure.
///
/// Every variant is raised before any write of the failing call becomes
/// durable; a storage failure mid-flight rolls the whole transaction back.
/// Conflict variants carry the remaining capacity so callers can self-correct.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("title {0} is not registered")]
    UnknownTitle(TitleId),

    #[error("fulfillment {0} not found")]
    FulfillmentNotFound(FulfillmentId),

    #[error("bundle {0} not found")]
    BundleNotFound(BundleId),

    #[error(transparent)]
    Unauthorized(#[from] AuthzError),

    #[error("fulfillment {0} is already cancelled")]
    AlreadyCancelled(FulfillmentId),

    #[error("bundle {0} already has a fulfilled issue")]
    AlreadyFulfilled(BundleId),

    #[error("cannot return {requested} of title {title}: {returnable} still returnable")]
    OverReturn {
        title: TitleId,
        requested: i64,
        returnable: i64,
    },

    #[error("cannot release {requested} of title {title}: {outstanding} reserved")]
    OverRelease {
        title: TitleId,
        requested: i64,
        outstanding: i64,
    },

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
