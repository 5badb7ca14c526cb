use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bookstock_core::{ActorId, DomainError, DomainResult, FulfillmentId, TitleId};
use bookstock_ledger::ConsumerRef;

/// One requested line of a demand: a title (or a non-trackable article) in a
/// base quantity, priced for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemandLine {
    /// `None` marks a non-trackable line: no inventory effect, always
    /// counted as fully achieved.
    pub title: Option<TitleId>,
    pub quantity: i64,
    /// Price per unit in the smallest currency unit.
    pub unit_price: u64,
}

/// Per-line outcome of a fulfillment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentLine {
    line_no: u32,
    title: Option<TitleId>,
    requested: i64,
    unit_price: u64,
    achieved: i64,
    returned: i64,
}

impl FulfillmentLine {
    pub fn line_no(&self) -> u32 {
        self.line_no
    }

    pub fn title(&self) -> Option<TitleId> {
        self.title
    }

    pub fn requested(&self) -> i64 {
        self.requested
    }

    pub fn unit_price(&self) -> u64 {
        self.unit_price
    }

    pub fn achieved(&self) -> i64 {
        self.achieved
    }

    pub fn returned(&self) -> i64 {
        self.returned
    }

    /// Portion of the request that could not be allocated.
    pub fn shortfall(&self) -> i64 {
        self.requested - self.achieved
    }

    /// Units handed over and not yet returned.
    pub fn outstanding(&self) -> i64 {
        self.achieved - self.returned
    }
}

/// Status of a fulfillment, always derivable from its lines; `Cancelled` is
/// the one state set explicitly, once, by the cancel workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentStatus {
    Fulfilled,
    Partial,
    Blocked,
    Cancelled,
}

impl FulfillmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FulfillmentStatus::Fulfilled => "fulfilled",
            FulfillmentStatus::Partial => "partial",
            FulfillmentStatus::Blocked => "blocked",
            FulfillmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "fulfilled" => Ok(FulfillmentStatus::Fulfilled),
            "partial" => Ok(FulfillmentStatus::Partial),
            "blocked" => Ok(FulfillmentStatus::Blocked),
            "cancelled" => Ok(FulfillmentStatus::Cancelled),
            other => Err(DomainError::validation(format!(
                "unknown fulfillment status '{other}'"
            ))),
        }
    }
}

/// One applied return, appended to the record's returns log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnRecord {
    pub title: TitleId,
    pub quantity: i64,
    /// Monetary value of the returned units (quantity × line unit price),
    /// in the smallest currency unit.
    pub value: u64,
    pub recorded_at: DateTime<Utc>,
    pub actor: ActorId,
}

/// One attempt to satisfy a multi-line demand for a school or bundle.
///
/// Achieved never exceeds requested per line, and cumulative returns never
/// exceed achieved; both are enforced here, so a record loaded from the store
/// can be trusted as long as it was only ever mutated through these methods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentRecord {
    id: FulfillmentId,
    consumer: ConsumerRef,
    lines: Vec<FulfillmentLine>,
    status: FulfillmentStatus,
    returns: Vec<ReturnRecord>,
    created_at: DateTime<Utc>,
}

impl FulfillmentRecord {
    /// Open a record for a demand scaled by `multiplier`.
    ///
    /// Rejects a multiplier below one, an empty demand, negative quantities
    /// and an all-zero scaled total. Non-trackable lines start fully
    /// achieved; trackable lines start at zero pending allocation.
    pub fn open(
        id: FulfillmentId,
        consumer: ConsumerRef,
        demand: &[DemandLine],
        multiplier: i64,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if !matches!(consumer, ConsumerRef::School(_) | ConsumerRef::Bundle(_)) {
            return Err(DomainError::validation(
                "fulfillment target must be a school or a bundle",
            ));
        }
        if multiplier < 1 {
            return Err(DomainError::validation("multiplier must be at least 1"));
        }
        if demand.is_empty() {
            return Err(DomainError::validation("demand has no lines"));
        }

        let mut lines = Vec::with_capacity(demand.len());
        let mut total_requested = 0i64;
        for (idx, d) in demand.iter().enumerate() {
            let line_no = idx as u32 + 1;
            if d.quantity < 0 {
                return Err(DomainError::validation(format!(
                    "line {line_no}: quantity must not be negative"
                )));
            }
            let requested = d.quantity.checked_mul(multiplier).ok_or_else(|| {
                DomainError::validation(format!("line {line_no}: scaled quantity overflows"))
            })?;
            total_requested += requested;
            lines.push(FulfillmentLine {
                line_no,
                title: d.title,
                requested,
                unit_price: d.unit_price,
                achieved: if d.title.is_none() { requested } else { 0 },
                returned: 0,
            });
        }
        if total_requested == 0 {
            return Err(DomainError::validation(
                "all scaled quantities are zero",
            ));
        }

        let mut record = Self {
            id,
            consumer,
            lines,
            status: FulfillmentStatus::Blocked,
            returns: Vec::new(),
            created_at,
        };
        record.finalize_status();
        Ok(record)
    }

    pub fn id(&self) -> FulfillmentId {
        self.id
    }

    pub fn consumer(&self) -> &ConsumerRef {
        &self.consumer
    }

    pub fn lines(&self) -> &[FulfillmentLine] {
        &self.lines
    }

    pub fn status(&self) -> FulfillmentStatus {
        self.status
    }

    pub fn returns(&self) -> &[ReturnRecord] {
        &self.returns
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == FulfillmentStatus::Cancelled
    }

    pub fn total_requested(&self) -> i64 {
        self.lines.iter().map(|l| l.requested).sum()
    }

    pub fn total_achieved(&self) -> i64 {
        self.lines.iter().map(|l| l.achieved).sum()
    }

    /// Achieved-minus-returned across all lines of one title.
    pub fn outstanding_for(&self, title: TitleId) -> i64 {
        self.lines
            .iter()
            .filter(|l| l.title == Some(title))
            .map(FulfillmentLine::outstanding)
            .sum()
    }

    /// Book an allocation result onto a trackable line.
    pub fn record_allocation(&mut self, line_no: u32, quantity: i64) -> DomainResult<()> {
        if quantity < 0 {
            return Err(DomainError::validation(
                "allocated quantity must not be negative",
            ));
        }
        let line = self
            .lines
            .iter_mut()
            .find(|l| l.line_no == line_no)
            .ok_or(DomainError::NotFound)?;
        if line.title.is_none() {
            return Err(DomainError::invariant(format!(
                "line {line_no} is non-trackable and cannot be allocated against"
            )));
        }
        if line.achieved + quantity > line.requested {
            return Err(DomainError::invariant(format!(
                "line {line_no}: achieved would exceed requested"
            )));
        }
        line.achieved += quantity;
        Ok(())
    }

    /// Re-derive the status from the lines. Never resurrects a cancelled
    /// record.
    pub fn finalize_status(&mut self) {
        if self.status == FulfillmentStatus::Cancelled {
            return;
        }
        self.status = derive_status(&self.lines);
    }

    /// Book a return of `quantity` units of `title`, distributing it across
    /// the record's lines for that title in line order.
    pub fn record_return(
        &mut self,
        title: TitleId,
        quantity: i64,
        actor: ActorId,
        recorded_at: DateTime<Utc>,
    ) -> DomainResult<ReturnRecord> {
        if self.is_cancelled() {
            return Err(DomainError::conflict(
                "cancelled fulfillments accept no returns",
            ));
        }
        if quantity <= 0 {
            return Err(DomainError::validation("return quantity must be positive"));
        }
        let outstanding = self.outstanding_for(title);
        if quantity > outstanding {
            return Err(DomainError::conflict(format!(
                "return of {quantity} exceeds outstanding {outstanding} for title {title}"
            )));
        }

        let mut remaining = quantity;
        let mut value = 0u64;
        for line in self.lines.iter_mut().filter(|l| l.title == Some(title)) {
            if remaining == 0 {
                break;
            }
            let take = remaining.min(line.outstanding());
            if take == 0 {
                continue;
            }
            line.returned += take;
            value += take as u64 * line.unit_price;
            remaining -= take;
        }

        let applied = ReturnRecord {
            title,
            quantity,
            value,
            recorded_at,
            actor,
        };
        self.returns.push(applied);
        Ok(applied)
    }

    /// Cancel the record, once and irrevocably.
    pub fn mark_cancelled(&mut self) -> DomainResult<()> {
        if self.is_cancelled() {
            return Err(DomainError::conflict("fulfillment is already cancelled"));
        }
        self.status = FulfillmentStatus::Cancelled;
        Ok(())
    }
}

fn derive_status(lines: &[FulfillmentLine]) -> FulfillmentStatus {
    let requested: i64 = lines.iter().map(|l| l.requested).sum();
    let achieved: i64 = lines.iter().map(|l| l.achieved).sum();
    if achieved == 0 && requested > 0 {
        FulfillmentStatus::Blocked
    } else if lines.iter().any(|l| l.shortfall() > 0) {
        FulfillmentStatus::Partial
    } else {
        FulfillmentStatus::Fulfilled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bookstock_core::SchoolId;

    fn school_consumer() -> ConsumerRef {
        ConsumerRef::School(SchoolId::new())
    }

    fn open_record(demand: &[DemandLine], multiplier: i64) -> DomainResult<FulfillmentRecord> {
        FulfillmentRecord::open(
            FulfillmentId::new(),
            school_consumer(),
            demand,
            multiplier,
            Utc::now(),
        )
    }

    fn line(quantity: i64) -> DemandLine {
        DemandLine {
            title: Some(TitleId::new()),
            quantity,
            unit_price: 100,
        }
    }

    #[test]
    fn multiplier_scales_every_line() {
        let record = open_record(&[line(2), line(3)], 4).unwrap();
        assert_eq!(record.lines()[0].requested(), 8);
        assert_eq!(record.lines()[1].requested(), 12);
    }

    #[test]
    fn rejects_multiplier_below_one() {
        assert!(open_record(&[line(2)], 0).is_err());
        assert!(open_record(&[line(2)], -1).is_err());
    }

    #[test]
    fn rejects_all_zero_demand() {
        let err = open_record(&[line(0), line(0)], 3).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn rejects_fulfillment_consumer_as_target() {
        let err = FulfillmentRecord::open(
            FulfillmentId::new(),
            ConsumerRef::Fulfillment(FulfillmentId::new()),
            &[line(1)],
            1,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn non_trackable_lines_start_fully_achieved() {
        let demand = [
            DemandLine {
                title: None,
                quantity: 5,
                unit_price: 0,
            },
        ];
        let record = open_record(&demand, 1).unwrap();
        assert_eq!(record.lines()[0].achieved(), 5);
        assert_eq!(record.status(), FulfillmentStatus::Fulfilled);
    }

    #[test]
    fn one_short_line_makes_the_record_partial() {
        let mut record = open_record(&[line(10), line(5)], 1).unwrap();
        record.record_allocation(1, 10).unwrap();
        record.record_allocation(2, 2).unwrap();
        record.finalize_status();

        assert_eq!(record.status(), FulfillmentStatus::Partial);
        assert_eq!(record.lines()[0].shortfall(), 0);
        assert_eq!(record.lines()[1].shortfall(), 3);
    }

    #[test]
    fn nothing_achieved_makes_the_record_blocked() {
        let mut record = open_record(&[line(4), line(2)], 1).unwrap();
        record.finalize_status();
        assert_eq!(record.status(), FulfillmentStatus::Blocked);
    }

    #[test]
    fn achieved_cannot_exceed_requested() {
        let mut record = open_record(&[line(3)], 1).unwrap();
        let err = record.record_allocation(1, 4).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn returns_accumulate_and_cap_at_achieved() {
        let demand = [line(10)];
        let title = demand[0].title.unwrap();
        let mut record = open_record(&demand, 1).unwrap();
        record.record_allocation(1, 10).unwrap();
        record.finalize_status();

        let actor = ActorId::new();
        let first = record.record_return(title, 4, actor, Utc::now()).unwrap();
        assert_eq!(first.value, 400);
        record.record_return(title, 6, actor, Utc::now()).unwrap();

        let err = record.record_return(title, 1, actor, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        assert_eq!(record.returns().len(), 2);
    }

    #[test]
    fn returns_spread_across_lines_of_the_same_title() {
        let title = TitleId::new();
        let demand = [
            DemandLine { title: Some(title), quantity: 2, unit_price: 100 },
            DemandLine { title: Some(title), quantity: 3, unit_price: 200 },
        ];
        let mut record = open_record(&demand, 1).unwrap();
        record.record_allocation(1, 2).unwrap();
        record.record_allocation(2, 3).unwrap();
        record.finalize_status();

        let applied = record
            .record_return(title, 4, ActorId::new(), Utc::now())
            .unwrap();
        // 2 off the first line at 100, 2 off the second at 200.
        assert_eq!(applied.value, 600);
        assert_eq!(record.outstanding_for(title), 1);
    }

    #[test]
    fn cancel_is_single_shot() {
        let mut record = open_record(&[line(1)], 1).unwrap();
        record.mark_cancelled().unwrap();
        assert!(record.is_cancelled());
        assert!(record.mark_cancelled().is_err());
    }

    #[test]
    fn cancelled_record_accepts_no_returns() {
        let demand = [line(2)];
        let title = demand[0].title.unwrap();
        let mut record = open_record(&demand, 1).unwrap();
        record.record_allocation(1, 2).unwrap();
        record.finalize_status();
        record.mark_cancelled().unwrap();

        let err = record
            .record_return(title, 1, ActorId::new(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn finalize_status_never_resurrects_a_cancelled_record() {
        let mut record = open_record(&[line(2)], 1).unwrap();
        record.record_allocation(1, 2).unwrap();
        record.mark_cancelled().unwrap();
        record.finalize_status();
        assert_eq!(record.status(), FulfillmentStatus::Cancelled);
    }
}
