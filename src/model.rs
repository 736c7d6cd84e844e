use chrono::{NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. Only used for store-assigned timestamps.
pub type Ms = i64;

/// Admission lock key: one room on one civil date.
pub type DayKey = (Ulid, NaiveDate);

/// Half-open time-of-day range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Span {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// True when the range would not contain any instant.
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Touching ranges (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// The table an id belongs to, for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Room,
    Slot,
    User,
    Reservation,
}

impl Entity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Entity::Room => "room",
            Entity::Slot => "slot",
            Entity::User => "user",
            Entity::Reservation => "reservation",
        }
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Catalog ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub name: String,
    /// Seats available; always > 0.
    pub capacity: u32,
    pub has_computers: bool,
}

/// What a slot is used for during the school day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotKind {
    Teaching,
    Break,
    Midday,
}

impl SlotKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotKind::Teaching => "teaching",
            SlotKind::Break => "break",
            SlotKind::Midday => "midday",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "teaching" => Some(SlotKind::Teaching),
            "break" => Some(SlotKind::Break),
            "midday" => Some(SlotKind::Midday),
            _ => None,
        }
    }
}

/// A reusable time range on a weekday. Reservations reference slots by id,
/// so one slot is shared by every date it is booked on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub id: Ulid,
    pub weekday: Weekday,
    pub kind: SlotKind,
    pub span: Span,
    /// Position of the slot within the day (1 = first period).
    pub session: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Teacher,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "teacher" => Some(Role::Teacher),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Ulid,
    pub name: String,
    pub email: String,
    pub role: Role,
}

// ── Reservations ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub room_id: Ulid,
    pub slot_id: Ulid,
    pub user_id: Ulid,
    pub date: NaiveDate,
    pub motive: String,
    pub attendees: u32,
    pub created_at: Ms,
}

impl Reservation {
    pub fn day_key(&self) -> DayKey {
        (self.room_id, self.date)
    }
}

/// A reservation that has not been stored yet: no id, no timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationDraft {
    pub room_id: Ulid,
    pub slot_id: Ulid,
    pub user_id: Ulid,
    pub date: NaiveDate,
    pub motive: String,
    pub attendees: u32,
}

impl ReservationDraft {
    pub fn day_key(&self) -> DayKey {
        (self.room_id, self.date)
    }
}

/// Partial update. `None` leaves the stored value unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationPatch {
    pub date: Option<NaiveDate>,
    pub motive: Option<String>,
    pub attendees: Option<u32>,
    pub room_id: Option<Ulid>,
    pub slot_id: Option<Ulid>,
    pub user_id: Option<Ulid>,
}

impl ReservationPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Overwrite every present field on a copy of `current`. Id and
    /// creation timestamp are never touched.
    pub fn apply(&self, current: &Reservation) -> Reservation {
        Reservation {
            id: current.id,
            room_id: self.room_id.unwrap_or(current.room_id),
            slot_id: self.slot_id.unwrap_or(current.slot_id),
            user_id: self.user_id.unwrap_or(current.user_id),
            date: self.date.unwrap_or(current.date),
            motive: self.motive.clone().unwrap_or_else(|| current.motive.clone()),
            attendees: self.attendees.unwrap_or(current.attendees),
            created_at: current.created_at,
        }
    }

    /// The day key the merged reservation will live under.
    pub fn target_key(&self, current: &Reservation) -> DayKey {
        (
            self.room_id.unwrap_or(current.room_id),
            self.date.unwrap_or(current.date),
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomPatch {
    pub name: Option<String>,
    pub capacity: Option<u32>,
    pub has_computers: Option<bool>,
}

impl RoomPatch {
    pub fn apply(&self, current: &Room) -> Room {
        Room {
            id: current.id,
            name: self.name.clone().unwrap_or_else(|| current.name.clone()),
            capacity: self.capacity.unwrap_or(current.capacity),
            has_computers: self.has_computers.unwrap_or(current.has_computers),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotPatch {
    pub weekday: Option<Weekday>,
    pub kind: Option<SlotKind>,
    pub start: Option<NaiveTime>,
    pub end: Option<NaiveTime>,
    pub session: Option<u32>,
}

impl SlotPatch {
    /// The merged span may be empty; callers must check before storing.
    pub fn apply(&self, current: &TimeSlot) -> TimeSlot {
        TimeSlot {
            id: current.id,
            weekday: self.weekday.unwrap_or(current.weekday),
            kind: self.kind.unwrap_or(current.kind),
            span: Span {
                start: self.start.unwrap_or(current.span.start),
                end: self.end.unwrap_or(current.span.end),
            },
            session: self.session.unwrap_or(current.session),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
}

impl UserPatch {
    pub fn apply(&self, current: &User) -> User {
        User {
            id: current.id,
            name: self.name.clone().unwrap_or_else(|| current.name.clone()),
            email: self.email.clone().unwrap_or_else(|| current.email.clone()),
            role: self.role.unwrap_or(current.role),
        }
    }
}

// ── Query filters ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoomFilter {
    /// Strictly greater than.
    pub capacity_above: Option<u32>,
    pub has_computers: Option<bool>,
}

impl RoomFilter {
    pub fn matches(&self, room: &Room) -> bool {
        self.capacity_above.is_none_or(|c| room.capacity > c)
            && self.has_computers.is_none_or(|h| room.has_computers == h)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReservationFilter {
    pub room_id: Option<Ulid>,
    pub date: Option<NaiveDate>,
}

impl ReservationFilter {
    pub fn matches(&self, r: &Reservation) -> bool {
        self.room_id.is_none_or(|id| r.room_id == id) && self.date.is_none_or(|d| r.date == d)
    }
}

// ── Query result types ───────────────────────────────────────────

/// One member of a conflict set: an admitted reservation and the time
/// range of the slot it occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conflict {
    pub reservation_id: Ulid,
    pub slot_id: Ulid,
    pub span: Span,
}

/// One variant per stored mutation. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomSaved { room: Room },
    RoomDeleted { id: Ulid },
    SlotSaved { slot: TimeSlot },
    SlotDeleted { id: Ulid },
    UserSaved { user: User },
    UserDeleted { id: Ulid },
    ReservationSaved { reservation: Reservation },
    ReservationDeleted { id: Ulid },
}
