use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::Entity;

/// A business rule the candidate reservation breaks. Produced by the
/// validator; never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    PastDate { date: NaiveDate, today: NaiveDate },
    CapacityExceeded { attendees: u32, capacity: u32 },
    /// Overlaps the reservation with this id.
    Overlap(Ulid),
}

impl Violation {
    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Violation::PastDate { .. } => "past_date",
            Violation::CapacityExceeded { .. } => "capacity_exceeded",
            Violation::Overlap(_) => "overlap",
        }
    }
}

#[derive(Debug)]
pub enum EngineError {
    NotFound(Entity, Ulid),
    /// An id supplied in a partial update does not resolve.
    InvalidReference(Entity, Ulid),
    PastDate { date: NaiveDate, today: NaiveDate },
    CapacityExceeded { attendees: u32, capacity: u32 },
    Overlap(Ulid),
    AlreadyExists(Ulid),
    HasReservations(Entity, Ulid),
    InvalidInput(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            EngineError::NotFound(..) => "not_found",
            EngineError::InvalidReference(..) => "invalid_reference",
            EngineError::PastDate { .. } => "past_date",
            EngineError::CapacityExceeded { .. } => "capacity_exceeded",
            EngineError::Overlap(_) => "overlap",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::HasReservations(..) => "has_reservations",
            EngineError::InvalidInput(_) => "invalid_input",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "error",
        }
    }
}

impl From<Violation> for EngineError {
    fn from(v: Violation) -> Self {
        match v {
            Violation::PastDate { date, today } => EngineError::PastDate { date, today },
            Violation::CapacityExceeded { attendees, capacity } => {
                EngineError::CapacityExceeded { attendees, capacity }
            }
            Violation::Overlap(id) => EngineError::Overlap(id),
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(entity, id) => write!(f, "{entity} not found: {id}"),
            EngineError::InvalidReference(entity, id) => {
                write!(f, "invalid reference: {entity} {id} does not exist")
            }
            EngineError::PastDate { date, today } => {
                write!(f, "date {date} is in the past (today is {today})")
            }
            EngineError::CapacityExceeded { attendees, capacity } => {
                write!(f, "{attendees} attendees exceed room capacity {capacity}")
            }
            EngineError::Overlap(id) => write!(f, "overlaps reservation: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::HasReservations(entity, id) => {
                write!(f, "cannot delete {entity} {id}: has reservations")
            }
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
