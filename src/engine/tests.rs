use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, Weekday};
use tokio_test::{assert_err, assert_ok};
use ulid::Ulid;

use super::*;
use crate::model::*;

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
}

fn tomorrow() -> NaiveDate {
    today().succ_opt().unwrap()
}

fn t(h: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, 0, 0).unwrap()
}

fn slot(start: u32, end: u32, session: u32) -> TimeSlot {
    TimeSlot {
        id: Ulid::new(),
        weekday: Weekday::Mon,
        kind: SlotKind::Teaching,
        span: Span::new(t(start), t(end)),
        session,
    }
}

struct Fixture {
    engine: Arc<Engine>,
    store: Arc<InMemoryStore>,
    room: Room,
    /// 10:00-12:00
    ten: TimeSlot,
    /// 11:00-13:00
    eleven: TimeSlot,
    /// 12:00-13:00
    noon: TimeSlot,
    user: User,
}

impl Fixture {
    fn draft(&self, slot: &TimeSlot, date: NaiveDate, attendees: u32) -> ReservationDraft {
        ReservationDraft {
            room_id: self.room.id,
            slot_id: slot.id,
            user_id: self.user.id,
            date,
            motive: "Algebra".into(),
            attendees,
        }
    }
}

async fn fixture() -> Fixture {
    let store = Arc::new(InMemoryStore::new());
    let engine = Engine::new(store.clone(), Arc::new(FixedClock(today())));
    build_fixture(engine, store).await
}

async fn build_fixture(engine: Engine, store: Arc<InMemoryStore>) -> Fixture {
    let room = assert_ok!(
        engine
            .create_room(Room {
                id: Ulid::new(),
                name: "Lab 2".into(),
                capacity: 20,
                has_computers: true,
            })
            .await
    );
    let ten = assert_ok!(engine.create_slot(slot(10, 12, 1)).await);
    let eleven = assert_ok!(engine.create_slot(slot(11, 13, 2)).await);
    let noon = assert_ok!(engine.create_slot(slot(12, 13, 3)).await);
    let user = assert_ok!(
        engine
            .create_user(User {
                id: Ulid::new(),
                name: "Lucía".into(),
                email: "lucia@example.org".into(),
                role: Role::Teacher,
            })
            .await
    );
    Fixture {
        engine: Arc::new(engine),
        store,
        room,
        ten,
        eleven,
        noon,
        user,
    }
}

// ── Create ───────────────────────────────────────────────

#[tokio::test]
async fn create_admits_valid_reservation() {
    let f = fixture().await;
    let r = assert_ok!(f.engine.create_reservation(f.draft(&f.ten, today(), 20)).await);
    assert_eq!(r.attendees, 20);
    assert_eq!(r.date, today());
    assert_eq!(assert_ok!(f.engine.get_reservation(r.id).await), r);
    assert_eq!(f.engine.locked_days(), 0);
}

#[tokio::test]
async fn scenario_a_capacity_exceeded_writes_nothing() {
    let f = fixture().await;
    let err = assert_err!(f.engine.create_reservation(f.draft(&f.ten, today(), 25)).await);
    assert!(matches!(
        err,
        EngineError::CapacityExceeded {
            attendees: 25,
            capacity: 20
        }
    ));
    assert_eq!(f.store.reservation_count(), 0);
}

#[tokio::test]
async fn scenario_b_overlapping_slot_is_rejected() {
    let f = fixture().await;
    let first = assert_ok!(f.engine.create_reservation(f.draft(&f.ten, tomorrow(), 5)).await);
    let err = assert_err!(f.engine.create_reservation(f.draft(&f.eleven, tomorrow(), 5)).await);
    assert!(matches!(err, EngineError::Overlap(id) if id == first.id));
    assert_eq!(f.store.reservation_count(), 1);
}

#[tokio::test]
async fn scenario_c_touching_slot_is_admitted() {
    let f = fixture().await;
    assert_ok!(f.engine.create_reservation(f.draft(&f.ten, tomorrow(), 5)).await);
    assert_ok!(f.engine.create_reservation(f.draft(&f.noon, tomorrow(), 5)).await);
    assert_eq!(f.store.reservation_count(), 2);
}

#[tokio::test]
async fn scenario_d_past_date_is_rejected() {
    let f = fixture().await;
    let yesterday = today().pred_opt().unwrap();
    let err = assert_err!(f.engine.create_reservation(f.draft(&f.ten, yesterday, 5)).await);
    assert!(matches!(err, EngineError::PastDate { date, today: t } if date == yesterday && t == today()));
}

#[tokio::test]
async fn same_slot_other_day_or_room_is_independent() {
    let f = fixture().await;
    assert_ok!(f.engine.create_reservation(f.draft(&f.ten, today(), 5)).await);
    assert_ok!(f.engine.create_reservation(f.draft(&f.ten, tomorrow(), 5)).await);

    let other = assert_ok!(
        f.engine
            .create_room(Room {
                id: Ulid::new(),
                name: "Aula 7".into(),
                capacity: 40,
                has_computers: false,
            })
            .await
    );
    let mut draft = f.draft(&f.ten, today(), 5);
    draft.room_id = other.id;
    assert_ok!(f.engine.create_reservation(draft).await);
}

#[tokio::test]
async fn create_with_unknown_references_is_not_found() {
    let f = fixture().await;
    let missing = Ulid::new();

    let mut d = f.draft(&f.ten, today(), 5);
    d.room_id = missing;
    let err = assert_err!(f.engine.create_reservation(d).await);
    assert!(matches!(err, EngineError::NotFound(Entity::Room, id) if id == missing));

    let mut d = f.draft(&f.ten, today(), 5);
    d.slot_id = missing;
    let err = assert_err!(f.engine.create_reservation(d).await);
    assert!(matches!(err, EngineError::NotFound(Entity::Slot, _)));

    let mut d = f.draft(&f.ten, today(), 5);
    d.user_id = missing;
    let err = assert_err!(f.engine.create_reservation(d).await);
    assert!(matches!(err, EngineError::NotFound(Entity::User, _)));
}

#[tokio::test]
async fn create_rejects_bad_fields() {
    let f = fixture().await;
    let err = assert_err!(f.engine.create_reservation(f.draft(&f.ten, today(), 0)).await);
    assert!(matches!(err, EngineError::InvalidInput(_)));

    let mut d = f.draft(&f.ten, today(), 5);
    d.motive = "x".repeat(crate::limits::MAX_MOTIVE_LEN + 1);
    let err = assert_err!(f.engine.create_reservation(d).await);
    assert!(matches!(err, EngineError::LimitExceeded(_)));
}

/// Delegates to an [`InMemoryStore`] but widens the window between the
/// conflict read and the write, and commits reservations without the
/// storage exclusion check. Only the day locks keep admissions apart.
struct UnguardedStore {
    inner: Arc<InMemoryStore>,
}

#[async_trait]
impl Store for UnguardedStore {
    async fn find_room(&self, id: Ulid) -> Result<Option<Room>, EngineError> {
        self.inner.find_room(id).await
    }
    async fn list_rooms(&self, filter: RoomFilter) -> Result<Vec<Room>, EngineError> {
        self.inner.list_rooms(filter).await
    }
    async fn insert_room(&self, room: Room) -> Result<(), EngineError> {
        self.inner.insert_room(room).await
    }
    async fn replace_room(&self, room: Room) -> Result<(), EngineError> {
        self.inner.replace_room(room).await
    }
    async fn delete_room(&self, id: Ulid) -> Result<(), EngineError> {
        self.inner.delete_room(id).await
    }

    async fn find_slot(&self, id: Ulid) -> Result<Option<TimeSlot>, EngineError> {
        self.inner.find_slot(id).await
    }
    async fn list_slots(&self) -> Result<Vec<TimeSlot>, EngineError> {
        self.inner.list_slots().await
    }
    async fn insert_slot(&self, slot: TimeSlot) -> Result<(), EngineError> {
        self.inner.insert_slot(slot).await
    }
    async fn replace_slot(&self, slot: TimeSlot) -> Result<(), EngineError> {
        self.inner.replace_slot(slot).await
    }
    async fn delete_slot(&self, id: Ulid) -> Result<(), EngineError> {
        self.inner.delete_slot(id).await
    }

    async fn find_user(&self, id: Ulid) -> Result<Option<User>, EngineError> {
        self.inner.find_user(id).await
    }
    async fn list_users(&self) -> Result<Vec<User>, EngineError> {
        self.inner.list_users().await
    }
    async fn insert_user(&self, user: User) -> Result<(), EngineError> {
        self.inner.insert_user(user).await
    }
    async fn replace_user(&self, user: User) -> Result<(), EngineError> {
        self.inner.replace_user(user).await
    }
    async fn delete_user(&self, id: Ulid) -> Result<(), EngineError> {
        self.inner.delete_user(id).await
    }

    async fn find_reservation(&self, id: Ulid) -> Result<Option<Reservation>, EngineError> {
        self.inner.find_reservation(id).await
    }
    async fn reservation_exists(&self, id: Ulid) -> Result<bool, EngineError> {
        self.inner.reservation_exists(id).await
    }
    async fn list_reservations(
        &self,
        filter: ReservationFilter,
    ) -> Result<Vec<Reservation>, EngineError> {
        self.inner.list_reservations(filter).await
    }
    async fn insert_reservation(
        &self,
        draft: ReservationDraft,
    ) -> Result<Reservation, EngineError> {
        let reservation = Reservation {
            id: Ulid::new(),
            room_id: draft.room_id,
            slot_id: draft.slot_id,
            user_id: draft.user_id,
            date: draft.date,
            motive: draft.motive,
            attendees: draft.attendees,
            created_at: 1,
        };
        self.inner.apply_event(&Event::ReservationSaved {
            reservation: reservation.clone(),
        });
        Ok(reservation)
    }
    async fn replace_reservation(
        &self,
        reservation: Reservation,
    ) -> Result<Reservation, EngineError> {
        self.inner.apply_event(&Event::ReservationSaved {
            reservation: reservation.clone(),
        });
        Ok(reservation)
    }
    async fn delete_reservation(&self, id: Ulid) -> Result<(), EngineError> {
        self.inner.delete_reservation(id).await
    }

    async fn find_conflicts(
        &self,
        room_id: Ulid,
        date: NaiveDate,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Conflict>, EngineError> {
        let conflicts = self.inner.find_conflicts(room_id, date, exclude).await;
        tokio::time::sleep(Duration::from_millis(2)).await;
        conflicts
    }
}

async fn unguarded_fixture() -> Fixture {
    let store = Arc::new(InMemoryStore::new());
    let unguarded = Arc::new(UnguardedStore { inner: store.clone() });
    let engine = Engine::new(unguarded, Arc::new(FixedClock(today())));
    build_fixture(engine, store).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_overlapping_creates_admit_exactly_one() {
    let f = unguarded_fixture().await;
    let mut handles = Vec::new();
    for i in 0..32 {
        let engine = f.engine.clone();
        let slot = if i % 2 == 0 { &f.ten } else { &f.eleven };
        let draft = f.draft(slot, tomorrow(), 5);
        handles.push(tokio::spawn(async move { engine.create_reservation(draft).await }));
    }

    let mut admitted = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(EngineError::Overlap(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(admitted, 1);
    assert_eq!(f.store.reservation_count(), 1);
    assert_eq!(f.engine.locked_days(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_on_distinct_days_all_admitted() {
    let f = unguarded_fixture().await;
    let mut handles = Vec::new();
    for i in 0..16u64 {
        let engine = f.engine.clone();
        let draft = f.draft(&f.ten, tomorrow() + chrono::Days::new(i), 5);
        handles.push(tokio::spawn(async move { engine.create_reservation(draft).await }));
    }
    for h in handles {
        assert_ok!(h.await.unwrap());
    }
    assert_eq!(f.store.reservation_count(), 16);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn create_racing_user_delete_leaves_no_orphan() {
    let f = fixture().await;
    for i in 0..100u64 {
        let user = assert_ok!(
            f.engine
                .create_user(User {
                    id: Ulid::new(),
                    name: "Suplente".into(),
                    email: "suplente@example.org".into(),
                    role: Role::Teacher,
                })
                .await
        );
        let mut draft = f.draft(&f.ten, tomorrow() + chrono::Days::new(i), 5);
        draft.user_id = user.id;

        let create = {
            let engine = f.engine.clone();
            tokio::spawn(async move { engine.create_reservation(draft).await })
        };
        let delete = {
            let engine = f.engine.clone();
            tokio::spawn(async move { engine.delete_user(user.id).await })
        };
        let created = create.await.unwrap();
        let deleted = delete.await.unwrap();

        match (&created, &deleted) {
            (Ok(_), Err(EngineError::HasReservations(Entity::User, _))) => {}
            (Err(EngineError::NotFound(Entity::User, _)), Ok(())) => {}
            _ => panic!("inconsistent outcome: {created:?} / {deleted:?}"),
        }
        if let Ok(r) = created {
            assert!(f.store.user(&r.user_id).is_some());
        }
    }
}

// ── Update ───────────────────────────────────────────────

#[tokio::test]
async fn update_does_not_conflict_with_itself() {
    let f = fixture().await;
    let r = assert_ok!(f.engine.create_reservation(f.draft(&f.ten, tomorrow(), 5)).await);
    let patch = ReservationPatch {
        attendees: Some(18),
        ..Default::default()
    };
    let updated = assert_ok!(f.engine.update_reservation(r.id, patch).await);
    assert_eq!(updated.attendees, 18);
    assert_eq!(updated.id, r.id);
    assert_eq!(updated.created_at, r.created_at);
}

#[tokio::test]
async fn empty_patch_reproduces_original() {
    let f = fixture().await;
    let r = assert_ok!(f.engine.create_reservation(f.draft(&f.ten, tomorrow(), 5)).await);
    let patch = ReservationPatch::default();
    assert!(patch.is_empty());
    let updated = assert_ok!(f.engine.update_reservation(r.id, patch).await);
    assert_eq!(updated, r);
}

#[tokio::test]
async fn scenario_e_capacity_rechecked_on_motive_only_update() {
    let f = fixture().await;
    let r = assert_ok!(f.engine.create_reservation(f.draft(&f.ten, tomorrow(), 20)).await);
    assert_ok!(
        f.engine
            .update_room(
                f.room.id,
                RoomPatch {
                    capacity: Some(10),
                    ..Default::default()
                }
            )
            .await
    );

    let patch = ReservationPatch {
        motive: Some("Geometry".into()),
        ..Default::default()
    };
    let err = assert_err!(f.engine.update_reservation(r.id, patch).await);
    assert!(matches!(
        err,
        EngineError::CapacityExceeded {
            attendees: 20,
            capacity: 10
        }
    ));
    // Nothing written.
    assert_eq!(assert_ok!(f.engine.get_reservation(r.id).await).motive, "Algebra");
}

#[tokio::test]
async fn update_into_occupied_slot_is_rejected() {
    let f = fixture().await;
    let a = assert_ok!(f.engine.create_reservation(f.draft(&f.ten, tomorrow(), 5)).await);
    let b = assert_ok!(f.engine.create_reservation(f.draft(&f.noon, tomorrow(), 5)).await);

    let patch = ReservationPatch {
        slot_id: Some(f.eleven.id),
        ..Default::default()
    };
    let err = assert_err!(f.engine.update_reservation(b.id, patch).await);
    assert!(matches!(err, EngineError::Overlap(id) if id == a.id));
    assert_eq!(assert_ok!(f.engine.get_reservation(b.id).await).slot_id, f.noon.id);
}

#[tokio::test]
async fn update_moving_date_checks_target_day() {
    let f = fixture().await;
    let blocker = assert_ok!(f.engine.create_reservation(f.draft(&f.ten, tomorrow(), 5)).await);
    let r = assert_ok!(f.engine.create_reservation(f.draft(&f.eleven, today(), 5)).await);

    let patch = ReservationPatch {
        date: Some(tomorrow()),
        ..Default::default()
    };
    let err = assert_err!(f.engine.update_reservation(r.id, patch.clone()).await);
    assert!(matches!(err, EngineError::Overlap(id) if id == blocker.id));

    assert_ok!(f.engine.delete_reservation(blocker.id).await);
    let moved = assert_ok!(f.engine.update_reservation(r.id, patch).await);
    assert_eq!(moved.date, tomorrow());
    assert!(f.store.day_ids(&(f.room.id, today())).is_empty());
    assert_eq!(f.store.day_ids(&(f.room.id, tomorrow())), vec![r.id]);
}

#[tokio::test]
async fn update_to_past_date_is_rejected() {
    let f = fixture().await;
    let r = assert_ok!(f.engine.create_reservation(f.draft(&f.ten, today(), 5)).await);
    let patch = ReservationPatch {
        date: Some(today().pred_opt().unwrap()),
        ..Default::default()
    };
    let err = assert_err!(f.engine.update_reservation(r.id, patch).await);
    assert!(matches!(err, EngineError::PastDate { .. }));
}

#[tokio::test]
async fn update_with_unknown_reference_is_invalid_reference() {
    let f = fixture().await;
    let r = assert_ok!(f.engine.create_reservation(f.draft(&f.ten, today(), 5)).await);
    let missing = Ulid::new();

    for (patch, entity) in [
        (
            ReservationPatch {
                room_id: Some(missing),
                ..Default::default()
            },
            Entity::Room,
        ),
        (
            ReservationPatch {
                slot_id: Some(missing),
                ..Default::default()
            },
            Entity::Slot,
        ),
        (
            ReservationPatch {
                user_id: Some(missing),
                ..Default::default()
            },
            Entity::User,
        ),
    ] {
        let err = assert_err!(f.engine.update_reservation(r.id, patch).await);
        assert!(
            matches!(err, EngineError::InvalidReference(e, id) if e == entity && id == missing),
            "{err}"
        );
    }
}

#[tokio::test]
async fn update_reassigns_user() {
    let f = fixture().await;
    let r = assert_ok!(f.engine.create_reservation(f.draft(&f.ten, today(), 5)).await);
    let other = assert_ok!(
        f.engine
            .create_user(User {
                id: Ulid::new(),
                name: "Marta".into(),
                email: "marta@example.org".into(),
                role: Role::Admin,
            })
            .await
    );
    let patch = ReservationPatch {
        user_id: Some(other.id),
        ..Default::default()
    };
    let updated = assert_ok!(f.engine.update_reservation(r.id, patch).await);
    assert_eq!(updated.user_id, other.id);
}

#[tokio::test]
async fn update_missing_reservation_is_not_found() {
    let f = fixture().await;
    let err = assert_err!(
        f.engine
            .update_reservation(Ulid::new(), ReservationPatch::default())
            .await
    );
    assert!(matches!(err, EngineError::NotFound(Entity::Reservation, _)));
}

// ── Delete ───────────────────────────────────────────────

#[tokio::test]
async fn delete_frees_the_slot() {
    let f = fixture().await;
    let r = assert_ok!(f.engine.create_reservation(f.draft(&f.ten, today(), 5)).await);
    assert_ok!(f.engine.delete_reservation(r.id).await);

    let err = assert_err!(f.engine.get_reservation(r.id).await);
    assert!(matches!(err, EngineError::NotFound(Entity::Reservation, _)));
    let err = assert_err!(f.engine.delete_reservation(r.id).await);
    assert!(matches!(err, EngineError::NotFound(Entity::Reservation, _)));

    assert_ok!(f.engine.create_reservation(f.draft(&f.eleven, today(), 5)).await);
}

// ── Catalog ──────────────────────────────────────────────

#[tokio::test]
async fn duplicate_catalog_ids_are_rejected() {
    let f = fixture().await;
    let err = assert_err!(f.engine.create_room(f.room.clone()).await);
    assert!(matches!(err, EngineError::AlreadyExists(id) if id == f.room.id));
    let err = assert_err!(f.engine.create_slot(f.ten.clone()).await);
    assert!(matches!(err, EngineError::AlreadyExists(_)));
    let err = assert_err!(f.engine.create_user(f.user.clone()).await);
    assert!(matches!(err, EngineError::AlreadyExists(_)));
}

#[tokio::test]
async fn catalog_input_is_checked() {
    let f = fixture().await;
    let err = assert_err!(
        f.engine
            .create_room(Room {
                id: Ulid::new(),
                name: "Empty".into(),
                capacity: 0,
                has_computers: false,
            })
            .await
    );
    assert!(matches!(err, EngineError::InvalidInput(_)));

    let empty = TimeSlot {
        span: Span {
            start: t(12),
            end: t(12),
        },
        ..slot(12, 13, 9)
    };
    let err = assert_err!(f.engine.create_slot(empty).await);
    assert!(matches!(err, EngineError::InvalidInput(_)));

    let patch = SlotPatch {
        end: Some(t(9)),
        ..Default::default()
    };
    let err = assert_err!(f.engine.update_slot(f.ten.id, patch).await);
    assert!(matches!(err, EngineError::InvalidInput(_)));

    let err = assert_err!(
        f.engine
            .update_user(
                f.user.id,
                UserPatch {
                    email: Some("nobody".into()),
                    ..Default::default()
                }
            )
            .await
    );
    assert!(matches!(err, EngineError::InvalidInput(_)));
}

#[tokio::test]
async fn catalog_delete_is_restricted() {
    let f = fixture().await;
    let r = assert_ok!(f.engine.create_reservation(f.draft(&f.ten, today(), 5)).await);

    let err = assert_err!(f.engine.delete_room(f.room.id).await);
    assert!(matches!(err, EngineError::HasReservations(Entity::Room, _)));
    let err = assert_err!(f.engine.delete_user(f.user.id).await);
    assert!(matches!(err, EngineError::HasReservations(Entity::User, _)));
    assert_ok!(f.engine.delete_slot(f.noon.id).await);

    assert_ok!(f.engine.delete_reservation(r.id).await);
    assert_ok!(f.engine.delete_room(f.room.id).await);
    let err = assert_err!(f.engine.get_room(f.room.id).await);
    assert!(matches!(err, EngineError::NotFound(Entity::Room, _)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn update_never_resurrects_deleted_room() {
    let f = fixture().await;
    for _ in 0..100 {
        let id = assert_ok!(
            f.engine
                .create_room(Room {
                    id: Ulid::new(),
                    name: "Aula temporal".into(),
                    capacity: 10,
                    has_computers: false,
                })
                .await
        )
        .id;
        let update = {
            let engine = f.engine.clone();
            let patch = RoomPatch {
                capacity: Some(40),
                ..Default::default()
            };
            tokio::spawn(async move { engine.update_room(id, patch).await })
        };
        let delete = {
            let engine = f.engine.clone();
            tokio::spawn(async move { engine.delete_room(id).await })
        };
        let updated = update.await.unwrap();
        assert_ok!(delete.await.unwrap());
        if let Err(e) = updated {
            assert!(matches!(e, EngineError::NotFound(Entity::Room, _)));
        }
        assert!(f.store.room(&id).is_none());
    }

    assert_ok!(f.engine.delete_room(f.room.id).await);
    let err = assert_err!(f.engine.update_room(f.room.id, RoomPatch::default()).await);
    assert!(matches!(err, EngineError::NotFound(Entity::Room, _)));
    assert!(f.store.room(&f.room.id).is_none());
}

#[tokio::test]
async fn list_rooms_filters() {
    let f = fixture().await;
    assert_ok!(
        f.engine
            .create_room(Room {
                id: Ulid::new(),
                name: "Aula Magna".into(),
                capacity: 200,
                has_computers: false,
            })
            .await
    );
    let big = assert_ok!(
        f.engine
            .list_rooms(RoomFilter {
                capacity_above: Some(20),
                has_computers: None,
            })
            .await
    );
    assert_eq!(big.len(), 1);
    assert_eq!(big[0].name, "Aula Magna");

    let labs = assert_ok!(
        f.engine
            .list_rooms(RoomFilter {
                capacity_above: None,
                has_computers: Some(true),
            })
            .await
    );
    assert_eq!(labs, vec![f.room.clone()]);
    assert_eq!(assert_ok!(f.engine.list_rooms(RoomFilter::default()).await).len(), 2);
}

#[tokio::test]
async fn list_reservations_by_room_and_date() {
    let f = fixture().await;
    let a = assert_ok!(f.engine.create_reservation(f.draft(&f.ten, today(), 5)).await);
    assert_ok!(f.engine.create_reservation(f.draft(&f.ten, tomorrow(), 5)).await);

    let rows = assert_ok!(
        f.engine
            .list_reservations(ReservationFilter {
                room_id: Some(f.room.id),
                date: Some(today()),
            })
            .await
    );
    assert_eq!(rows, vec![a]);
    let by_room = assert_ok!(
        f.engine
            .list_reservations(ReservationFilter {
                room_id: Some(f.room.id),
                date: None,
            })
            .await
    );
    assert_eq!(by_room.len(), 2);
}

// ── Durability ───────────────────────────────────────────

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("aulas_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

#[tokio::test]
async fn wal_replay_restores_state() {
    let path = test_wal_path("replay.wal");
    let (f, kept) = {
        let store = Arc::new(InMemoryStore::open(&path).unwrap());
        let engine = Engine::new(store.clone(), Arc::new(FixedClock(today())));
        let f = build_fixture(engine, store).await;
        let kept = assert_ok!(f.engine.create_reservation(f.draft(&f.ten, today(), 5)).await);
        let gone = assert_ok!(f.engine.create_reservation(f.draft(&f.noon, today(), 5)).await);
        assert_ok!(f.engine.delete_reservation(gone.id).await);
        (f, kept)
    };

    let reopened = InMemoryStore::open(&path).unwrap();
    assert_eq!(reopened.room(&f.room.id), Some(f.room.clone()));
    assert_eq!(reopened.user(&f.user.id), Some(f.user.clone()));
    assert_eq!(reopened.reservation(&kept.id), Some(kept.clone()));
    assert_eq!(reopened.reservation_count(), 1);
    assert_eq!(reopened.day_ids(&kept.day_key()), vec![kept.id]);

    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compaction.wal");
    let store = Arc::new(InMemoryStore::open(&path).unwrap());
    let engine = Engine::new(store.clone(), Arc::new(FixedClock(today())));
    let f = build_fixture(engine, store.clone()).await;
    for _ in 0..10 {
        let r = assert_ok!(f.engine.create_reservation(f.draft(&f.ten, tomorrow(), 5)).await);
        assert_ok!(f.engine.delete_reservation(r.id).await);
    }
    let kept = assert_ok!(f.engine.create_reservation(f.draft(&f.ten, tomorrow(), 5)).await);
    assert!(store.appends_since_compact().await > 20);

    assert_ok!(store.compact().await);
    assert_eq!(store.appends_since_compact().await, 0);

    let reopened = InMemoryStore::open(&path).unwrap();
    assert_eq!(reopened.snapshot_events().len(), store.snapshot_events().len());
    assert_eq!(reopened.reservation(&kept.id), Some(kept));

    let _ = std::fs::remove_file(&path);
}
