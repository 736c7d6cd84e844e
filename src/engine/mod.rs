mod admission;
mod catalog;
mod error;
mod journal;
mod locks;
mod queries;
mod store;
#[cfg(test)]
mod tests;
mod validate;

pub use error::{EngineError, Violation};
pub use locks::{DayLease, DayLocks};
pub use store::{InMemoryStore, Store};
pub use validate::{first_overlap, validate, Candidate};

use std::sync::Arc;

use chrono::NaiveDate;

/// Source of "today" for admission. Injected so tests can pin the date.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Server-local calendar date.
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        chrono::Local::now().date_naive()
    }
}

pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

/// Admission orchestrator plus catalog operations over a [`Store`].
pub struct Engine {
    store: Arc<dyn Store>,
    locks: DayLocks,
    clock: Arc<dyn Clock>,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            locks: DayLocks::new(),
            clock,
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Day keys currently holding a lock entry.
    pub fn locked_days(&self) -> usize {
        self.locks.len()
    }
}
