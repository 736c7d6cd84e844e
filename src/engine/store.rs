use std::path::Path;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::wal::Wal;

use super::journal::Journal;
use super::validate::first_overlap;
use super::EngineError;

/// Persistence collaborator consumed by the admission engine.
///
/// Finds never fail for a missing row; they return `None`. Writes enforce
/// referential integrity: a reservation write fails with
/// [`EngineError::InvalidReference`] unless its room, slot and user exist,
/// and catalog deletes are restricted while reservations point at the row.
/// They also enforce the same-day exclusion rule: a reservation whose slot
/// overlaps another reservation for the same room and date is rejected
/// with [`EngineError::Overlap`].
#[async_trait]
pub trait Store: Send + Sync {
    async fn find_room(&self, id: Ulid) -> Result<Option<Room>, EngineError>;
    async fn list_rooms(&self, filter: RoomFilter) -> Result<Vec<Room>, EngineError>;
    /// `AlreadyExists` if the id is taken.
    async fn insert_room(&self, room: Room) -> Result<(), EngineError>;
    /// `NotFound` if the room is gone.
    async fn replace_room(&self, room: Room) -> Result<(), EngineError>;
    async fn delete_room(&self, id: Ulid) -> Result<(), EngineError>;

    async fn find_slot(&self, id: Ulid) -> Result<Option<TimeSlot>, EngineError>;
    async fn list_slots(&self) -> Result<Vec<TimeSlot>, EngineError>;
    async fn insert_slot(&self, slot: TimeSlot) -> Result<(), EngineError>;
    async fn replace_slot(&self, slot: TimeSlot) -> Result<(), EngineError>;
    async fn delete_slot(&self, id: Ulid) -> Result<(), EngineError>;

    async fn find_user(&self, id: Ulid) -> Result<Option<User>, EngineError>;
    async fn list_users(&self) -> Result<Vec<User>, EngineError>;
    async fn insert_user(&self, user: User) -> Result<(), EngineError>;
    async fn replace_user(&self, user: User) -> Result<(), EngineError>;
    async fn delete_user(&self, id: Ulid) -> Result<(), EngineError>;

    async fn find_reservation(&self, id: Ulid) -> Result<Option<Reservation>, EngineError>;
    async fn reservation_exists(&self, id: Ulid) -> Result<bool, EngineError>;
    async fn list_reservations(
        &self,
        filter: ReservationFilter,
    ) -> Result<Vec<Reservation>, EngineError>;
    /// First save: the store assigns the id and creation timestamp.
    async fn insert_reservation(&self, draft: ReservationDraft)
    -> Result<Reservation, EngineError>;
    /// Later saves: overwrite in place, id and timestamp unchanged.
    async fn replace_reservation(
        &self,
        reservation: Reservation,
    ) -> Result<Reservation, EngineError>;
    async fn delete_reservation(&self, id: Ulid) -> Result<(), EngineError>;

    /// Reservations for `room_id` on `date`, minus `exclude`, each paired
    /// with its slot's time range.
    async fn find_conflicts(
        &self,
        room_id: Ulid,
        date: NaiveDate,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Conflict>, EngineError>;
}

/// All state lives in memory. When opened on a WAL path every mutation is
/// made durable before it is applied.
pub struct InMemoryStore {
    rooms: DashMap<Ulid, Room>,
    slots: DashMap<Ulid, TimeSlot>,
    users: DashMap<Ulid, User>,
    reservations: DashMap<Ulid, Reservation>,
    /// (room, date) → ids of reservations booked on that day.
    by_day: DashMap<DayKey, Vec<Ulid>>,
    journal: Option<Journal>,
    /// Catalog writes hold this exclusively. Reservation writes hold it
    /// shared from the reference check to the commit, so a room, slot or
    /// user cannot disappear under a reservation being admitted.
    catalog_gate: RwLock<()>,
    /// Commits hold this shared from WAL append to apply; compaction holds
    /// it exclusively so its snapshot never misses a durable event.
    commit_gate: RwLock<()>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Volatile store, nothing survives a restart.
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            slots: DashMap::new(),
            users: DashMap::new(),
            reservations: DashMap::new(),
            by_day: DashMap::new(),
            journal: None,
            catalog_gate: RwLock::new(()),
            commit_gate: RwLock::new(()),
        }
    }

    /// Replay the WAL at `wal_path` and keep appending to it.
    /// Must be called inside a tokio runtime (spawns the WAL writer).
    pub fn open(wal_path: &Path) -> std::io::Result<Self> {
        let events = Wal::replay(wal_path)?;
        let wal = Wal::open(wal_path)?;
        let mut store = Self::new();
        for event in &events {
            store.apply_event(event);
        }
        store.journal = Some(Journal::spawn(wal));
        tracing::info!(
            "replayed {} events: {} rooms, {} slots, {} users, {} reservations",
            events.len(),
            store.rooms.len(),
            store.slots.len(),
            store.users.len(),
            store.reservations.len()
        );
        Ok(store)
    }

    // ── Reads ────────────────────────────────────────────────

    pub fn room(&self, id: &Ulid) -> Option<Room> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn slot(&self, id: &Ulid) -> Option<TimeSlot> {
        self.slots.get(id).map(|e| e.value().clone())
    }

    pub fn user(&self, id: &Ulid) -> Option<User> {
        self.users.get(id).map(|e| e.value().clone())
    }

    pub fn reservation(&self, id: &Ulid) -> Option<Reservation> {
        self.reservations.get(id).map(|e| e.value().clone())
    }

    pub fn reservation_count(&self) -> usize {
        self.reservations.len()
    }

    /// Ids booked on a day key, in insertion order.
    pub fn day_ids(&self, key: &DayKey) -> Vec<Ulid> {
        self.by_day
            .get(key)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub fn conflicts(
        &self,
        room_id: Ulid,
        date: NaiveDate,
        exclude: Option<Ulid>,
    ) -> Vec<Conflict> {
        self.day_ids(&(room_id, date))
            .into_iter()
            .filter(|id| Some(*id) != exclude)
            .filter_map(|id| {
                let r = self.reservation(&id)?;
                let slot = self.slot(&r.slot_id)?;
                Some(Conflict {
                    reservation_id: id,
                    slot_id: slot.id,
                    span: slot.span,
                })
            })
            .collect()
    }

    fn is_referenced(&self, entity: Entity, id: Ulid) -> bool {
        self.reservations.iter().any(|e| {
            let r = e.value();
            match entity {
                Entity::Room => r.room_id == id,
                Entity::Slot => r.slot_id == id,
                Entity::User => r.user_id == id,
                Entity::Reservation => false,
            }
        })
    }

    // ── Storage constraints ──────────────────────────────────

    fn check_capacity(len: usize, max: usize, msg: &'static str) -> Result<(), EngineError> {
        if len >= max {
            return Err(EngineError::LimitExceeded(msg));
        }
        Ok(())
    }

    fn check_references(&self, r: &Reservation) -> Result<(), EngineError> {
        if !self.rooms.contains_key(&r.room_id) {
            return Err(EngineError::InvalidReference(Entity::Room, r.room_id));
        }
        if !self.slots.contains_key(&r.slot_id) {
            return Err(EngineError::InvalidReference(Entity::Slot, r.slot_id));
        }
        if !self.users.contains_key(&r.user_id) {
            return Err(EngineError::InvalidReference(Entity::User, r.user_id));
        }
        Ok(())
    }

    fn check_delete(&self, entity: Entity, id: Ulid) -> Result<(), EngineError> {
        let exists = match entity {
            Entity::Room => self.rooms.contains_key(&id),
            Entity::Slot => self.slots.contains_key(&id),
            Entity::User => self.users.contains_key(&id),
            Entity::Reservation => self.reservations.contains_key(&id),
        };
        if !exists {
            return Err(EngineError::NotFound(entity, id));
        }
        if self.is_referenced(entity, id) {
            return Err(EngineError::HasReservations(entity, id));
        }
        Ok(())
    }

    /// Exclusion constraint: no two reservations for one room and date may
    /// have overlapping slots. Exact only while the caller holds the day
    /// lock for the reservation's key.
    fn check_exclusion(&self, r: &Reservation) -> Result<(), EngineError> {
        let slot = self
            .slot(&r.slot_id)
            .ok_or(EngineError::InvalidReference(Entity::Slot, r.slot_id))?;
        let conflicts = self.conflicts(r.room_id, r.date, Some(r.id));
        if let Some(hit) = first_overlap(&slot.span, &conflicts) {
            return Err(EngineError::Overlap(hit.reservation_id));
        }
        Ok(())
    }

    // ── Event application ────────────────────────────────────

    /// Apply an event to memory. No validation; callers check first.
    pub fn apply_event(&self, event: &Event) {
        match event {
            Event::RoomSaved { room } => {
                self.rooms.insert(room.id, room.clone());
            }
            Event::RoomDeleted { id } => {
                self.rooms.remove(id);
            }
            Event::SlotSaved { slot } => {
                self.slots.insert(slot.id, slot.clone());
            }
            Event::SlotDeleted { id } => {
                self.slots.remove(id);
            }
            Event::UserSaved { user } => {
                self.users.insert(user.id, user.clone());
            }
            Event::UserDeleted { id } => {
                self.users.remove(id);
            }
            Event::ReservationSaved { reservation } => {
                let key = reservation.day_key();
                let previous = self.reservations.insert(reservation.id, reservation.clone());
                match previous {
                    Some(old) if old.day_key() == key => {}
                    Some(old) => {
                        self.unindex(&old.day_key(), &old.id);
                        self.by_day.entry(key).or_default().push(reservation.id);
                    }
                    None => self.by_day.entry(key).or_default().push(reservation.id),
                }
            }
            Event::ReservationDeleted { id } => {
                if let Some((_, old)) = self.reservations.remove(id) {
                    self.unindex(&old.day_key(), id);
                }
            }
        }
    }

    fn unindex(&self, key: &DayKey, id: &Ulid) {
        if let Some(mut ids) = self.by_day.get_mut(key) {
            ids.retain(|i| i != id);
        }
        self.by_day.remove_if(key, |_, ids| ids.is_empty());
    }

    /// Durably record `event` (when journaled), then apply it.
    async fn commit(&self, event: Event) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        if let Some(journal) = &self.journal {
            journal.append(&event).await?;
        }
        self.apply_event(&event);
        Ok(())
    }

    // ── Compaction ───────────────────────────────────────────

    /// Minimal event list that recreates the current state. Catalog rows
    /// come before the reservations that reference them; each table is in
    /// id order, so equal states compact to identical files.
    pub fn snapshot_events(&self) -> Vec<Event> {
        let mut events = Vec::with_capacity(
            self.rooms.len() + self.slots.len() + self.users.len() + self.reservations.len(),
        );
        events.extend(
            sorted_values(&self.rooms)
                .into_iter()
                .map(|room| Event::RoomSaved { room }),
        );
        events.extend(
            sorted_values(&self.slots)
                .into_iter()
                .map(|slot| Event::SlotSaved { slot }),
        );
        events.extend(
            sorted_values(&self.users)
                .into_iter()
                .map(|user| Event::UserSaved { user }),
        );
        events.extend(
            sorted_values(&self.reservations)
                .into_iter()
                .map(|reservation| Event::ReservationSaved { reservation }),
        );
        events
    }

    /// Rewrite the WAL with [`Self::snapshot_events`]. No-op for a volatile store.
    pub async fn compact(&self) -> Result<(), EngineError> {
        let Some(journal) = &self.journal else {
            return Ok(());
        };
        let _gate = self.commit_gate.write().await;
        journal.compact(self.snapshot_events()).await
    }

    pub async fn appends_since_compact(&self) -> u64 {
        match &self.journal {
            Some(journal) => journal.appends_since_compact().await,
            None => 0,
        }
    }
}

fn sorted_by_id<T>(mut rows: Vec<T>, id: impl Fn(&T) -> Ulid) -> Vec<T> {
    rows.sort_by_key(|r| id(r));
    rows
}

/// Every value of a table keyed by id, ordered by id.
fn sorted_values<V: Clone>(table: &DashMap<Ulid, V>) -> Vec<V> {
    let mut rows: Vec<(Ulid, V)> = table
        .iter()
        .map(|e| (*e.key(), e.value().clone()))
        .collect();
    rows.sort_by_key(|(id, _)| *id);
    rows.into_iter().map(|(_, v)| v).collect()
}

#[async_trait]
impl Store for InMemoryStore {
    async fn find_room(&self, id: Ulid) -> Result<Option<Room>, EngineError> {
        Ok(self.room(&id))
    }

    async fn list_rooms(&self, filter: RoomFilter) -> Result<Vec<Room>, EngineError> {
        let rows = self
            .rooms
            .iter()
            .filter(|e| filter.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        Ok(sorted_by_id(rows, |r: &Room| r.id))
    }

    async fn insert_room(&self, room: Room) -> Result<(), EngineError> {
        let _catalog = self.catalog_gate.write().await;
        if self.rooms.contains_key(&room.id) {
            return Err(EngineError::AlreadyExists(room.id));
        }
        Self::check_capacity(self.rooms.len(), MAX_ROOMS, "too many rooms")?;
        self.commit(Event::RoomSaved { room }).await
    }

    async fn replace_room(&self, room: Room) -> Result<(), EngineError> {
        let _catalog = self.catalog_gate.write().await;
        if !self.rooms.contains_key(&room.id) {
            return Err(EngineError::NotFound(Entity::Room, room.id));
        }
        self.commit(Event::RoomSaved { room }).await
    }

    async fn delete_room(&self, id: Ulid) -> Result<(), EngineError> {
        let _catalog = self.catalog_gate.write().await;
        self.check_delete(Entity::Room, id)?;
        self.commit(Event::RoomDeleted { id }).await
    }

    async fn find_slot(&self, id: Ulid) -> Result<Option<TimeSlot>, EngineError> {
        Ok(self.slot(&id))
    }

    async fn list_slots(&self) -> Result<Vec<TimeSlot>, EngineError> {
        let rows = self.slots.iter().map(|e| e.value().clone()).collect();
        Ok(sorted_by_id(rows, |s: &TimeSlot| s.id))
    }

    async fn insert_slot(&self, slot: TimeSlot) -> Result<(), EngineError> {
        let _catalog = self.catalog_gate.write().await;
        if self.slots.contains_key(&slot.id) {
            return Err(EngineError::AlreadyExists(slot.id));
        }
        Self::check_capacity(self.slots.len(), MAX_SLOTS, "too many slots")?;
        self.commit(Event::SlotSaved { slot }).await
    }

    async fn replace_slot(&self, slot: TimeSlot) -> Result<(), EngineError> {
        let _catalog = self.catalog_gate.write().await;
        if !self.slots.contains_key(&slot.id) {
            return Err(EngineError::NotFound(Entity::Slot, slot.id));
        }
        self.commit(Event::SlotSaved { slot }).await
    }

    async fn delete_slot(&self, id: Ulid) -> Result<(), EngineError> {
        let _catalog = self.catalog_gate.write().await;
        self.check_delete(Entity::Slot, id)?;
        self.commit(Event::SlotDeleted { id }).await
    }

    async fn find_user(&self, id: Ulid) -> Result<Option<User>, EngineError> {
        Ok(self.user(&id))
    }

    async fn list_users(&self) -> Result<Vec<User>, EngineError> {
        let rows = self.users.iter().map(|e| e.value().clone()).collect();
        Ok(sorted_by_id(rows, |u: &User| u.id))
    }

    async fn insert_user(&self, user: User) -> Result<(), EngineError> {
        let _catalog = self.catalog_gate.write().await;
        if self.users.contains_key(&user.id) {
            return Err(EngineError::AlreadyExists(user.id));
        }
        Self::check_capacity(self.users.len(), MAX_USERS, "too many users")?;
        self.commit(Event::UserSaved { user }).await
    }

    async fn replace_user(&self, user: User) -> Result<(), EngineError> {
        let _catalog = self.catalog_gate.write().await;
        if !self.users.contains_key(&user.id) {
            return Err(EngineError::NotFound(Entity::User, user.id));
        }
        self.commit(Event::UserSaved { user }).await
    }

    async fn delete_user(&self, id: Ulid) -> Result<(), EngineError> {
        let _catalog = self.catalog_gate.write().await;
        self.check_delete(Entity::User, id)?;
        self.commit(Event::UserDeleted { id }).await
    }

    async fn find_reservation(&self, id: Ulid) -> Result<Option<Reservation>, EngineError> {
        Ok(self.reservation(&id))
    }

    async fn reservation_exists(&self, id: Ulid) -> Result<bool, EngineError> {
        Ok(self.reservations.contains_key(&id))
    }

    async fn list_reservations(
        &self,
        filter: ReservationFilter,
    ) -> Result<Vec<Reservation>, EngineError> {
        let rows = match (filter.room_id, filter.date) {
            // Day index answers the common (room, date) lookup directly.
            (Some(room_id), Some(date)) => self
                .day_ids(&(room_id, date))
                .iter()
                .filter_map(|id| self.reservation(id))
                .collect(),
            _ => self
                .reservations
                .iter()
                .filter(|e| filter.matches(e.value()))
                .map(|e| e.value().clone())
                .collect(),
        };
        Ok(sorted_by_id(rows, |r: &Reservation| r.id))
    }

    async fn insert_reservation(
        &self,
        draft: ReservationDraft,
    ) -> Result<Reservation, EngineError> {
        Self::check_capacity(
            self.reservations.len(),
            MAX_RESERVATIONS,
            "too many reservations",
        )?;
        let reservation = Reservation {
            id: Ulid::new(),
            room_id: draft.room_id,
            slot_id: draft.slot_id,
            user_id: draft.user_id,
            date: draft.date,
            motive: draft.motive,
            attendees: draft.attendees,
            created_at: chrono::Utc::now().timestamp_millis(),
        };
        let _catalog = self.catalog_gate.read().await;
        self.check_references(&reservation)?;
        self.check_exclusion(&reservation)?;
        self.commit(Event::ReservationSaved {
            reservation: reservation.clone(),
        })
        .await?;
        Ok(reservation)
    }

    async fn replace_reservation(
        &self,
        reservation: Reservation,
    ) -> Result<Reservation, EngineError> {
        if !self.reservations.contains_key(&reservation.id) {
            return Err(EngineError::NotFound(Entity::Reservation, reservation.id));
        }
        let _catalog = self.catalog_gate.read().await;
        self.check_references(&reservation)?;
        self.check_exclusion(&reservation)?;
        self.commit(Event::ReservationSaved {
            reservation: reservation.clone(),
        })
        .await?;
        Ok(reservation)
    }

    async fn delete_reservation(&self, id: Ulid) -> Result<(), EngineError> {
        self.check_delete(Entity::Reservation, id)?;
        self.commit(Event::ReservationDeleted { id }).await
    }

    async fn find_conflicts(
        &self,
        room_id: Ulid,
        date: NaiveDate,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Conflict>, EngineError> {
        Ok(self.conflicts(room_id, date, exclude))
    }
}
