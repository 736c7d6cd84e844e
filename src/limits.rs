/// Max length of room names, user names and emails (bytes).
pub const MAX_NAME_LEN: usize = 255;

/// Max length of a reservation motive (bytes).
pub const MAX_MOTIVE_LEN: usize = 255;

pub const MAX_ROOMS: usize = 10_000;
pub const MAX_SLOTS: usize = 10_000;
pub const MAX_USERS: usize = 100_000;
pub const MAX_RESERVATIONS: usize = 1_000_000;

/// Max rows a single SELECT may return.
pub const MAX_RESULT_ROWS: usize = 10_000;

/// How many times an update re-acquires day locks when the reservation
/// moved to another day key while it was waiting.
pub const MAX_LOCK_RETRIES: usize = 8;
