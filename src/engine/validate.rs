use chrono::NaiveDate;

use crate::model::*;

use super::error::Violation;

/// Everything the admission rules look at, already resolved.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub date: NaiveDate,
    pub attendees: u32,
    pub room: &'a Room,
    pub span: Span,
}

/// Decide whether `candidate` may be admitted next to `conflicts`.
///
/// Checks run in a fixed order: date, capacity, overlap. `conflicts` must
/// already exclude the candidate's own id when it is an update. `today` is
/// supplied by the caller; this function never reads the clock.
pub fn validate(
    candidate: &Candidate<'_>,
    conflicts: &[Conflict],
    today: NaiveDate,
) -> Result<(), Violation> {
    if candidate.date < today {
        return Err(Violation::PastDate {
            date: candidate.date,
            today,
        });
    }
    if candidate.attendees > candidate.room.capacity {
        return Err(Violation::CapacityExceeded {
            attendees: candidate.attendees,
            capacity: candidate.room.capacity,
        });
    }
    if let Some(hit) = first_overlap(&candidate.span, conflicts) {
        return Err(Violation::Overlap(hit.reservation_id));
    }
    Ok(())
}

/// First conflict whose slot overlaps `span` (half-open).
pub fn first_overlap<'c>(span: &Span, conflicts: &'c [Conflict]) -> Option<&'c Conflict> {
    conflicts.iter().find(|c| c.span.overlaps(span))
}
