use serde::{Deserialize, Serialize};

use bookstock_core::{BundleId, DomainError, DomainResult, SchoolId};

use crate::record::FulfillmentStatus;

/// Combined fulfillment state of a bundle across its issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleStatus {
    NothingFulfilled,
    Fulfilled,
    Partial,
    Blocked,
}

impl BundleStatus {
    /// Recompute from the statuses of the bundle's fulfillments.
    ///
    /// Cancelled issues do not count. Precedence: a fulfilled issue wins,
    /// then a partial one, then a blocked one; with no live issues the bundle
    /// falls back to the nothing-fulfilled baseline.
    pub fn from_siblings<I>(siblings: I) -> Self
    where
        I: IntoIterator<Item = FulfillmentStatus>,
    {
        let mut result = BundleStatus::NothingFulfilled;
        for status in siblings {
            match status {
                FulfillmentStatus::Fulfilled => return BundleStatus::Fulfilled,
                FulfillmentStatus::Partial => result = BundleStatus::Partial,
                FulfillmentStatus::Blocked => {
                    if result == BundleStatus::NothingFulfilled {
                        result = BundleStatus::Blocked;
                    }
                }
                FulfillmentStatus::Cancelled => {}
            }
        }
        result
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BundleStatus::NothingFulfilled => "nothing_fulfilled",
            BundleStatus::Fulfilled => "fulfilled",
            BundleStatus::Partial => "partial",
            BundleStatus::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "nothing_fulfilled" => Ok(BundleStatus::NothingFulfilled),
            "fulfilled" => Ok(BundleStatus::Fulfilled),
            "partial" => Ok(BundleStatus::Partial),
            "blocked" => Ok(BundleStatus::Blocked),
            other => Err(DomainError::validation(format!(
                "unknown bundle status '{other}'"
            ))),
        }
    }
}

/// An order bundle owned by a school; the aggregate whose status reflects its
/// fulfillments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    pub id: BundleId,
    pub school: SchoolId,
    pub status: BundleStatus,
}

impl Bundle {
    pub fn new(id: BundleId, school: SchoolId) -> Self {
        Self {
            id,
            school,
            status: BundleStatus::NothingFulfilled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use FulfillmentStatus::*;

    #[test]
    fn a_fulfilled_sibling_wins() {
        let status = BundleStatus::from_siblings([Blocked, Fulfilled, Partial]);
        assert_eq!(status, BundleStatus::Fulfilled);
    }

    #[test]
    fn partial_outranks_blocked() {
        let status = BundleStatus::from_siblings([Blocked, Partial]);
        assert_eq!(status, BundleStatus::Partial);
    }

    #[test]
    fn cancelled_siblings_are_ignored() {
        assert_eq!(
            BundleStatus::from_siblings([Cancelled, Cancelled]),
            BundleStatus::NothingFulfilled
        );
        assert_eq!(
            BundleStatus::from_siblings([Cancelled, Blocked]),
            BundleStatus::Blocked
        );
    }

    #[test]
    fn no_siblings_means_nothing_fulfilled() {
        assert_eq!(
            BundleStatus::from_siblings(std::iter::empty()),
            BundleStatus::NothingFulfilled
        );
    }
}
