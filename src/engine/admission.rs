use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::ADMISSIONS_TOTAL;

use super::validate::{validate, Candidate};
use super::{Engine, EngineError};

impl Engine {
    /// Admit a new reservation or report the first rule it breaks.
    pub async fn create_reservation(
        &self,
        draft: ReservationDraft,
    ) -> Result<Reservation, EngineError> {
        let result = self.admit_create(draft).await;
        record_admission("create", &result);
        result
    }

    /// Merge `patch` into reservation `id` and re-admit the result.
    pub async fn update_reservation(
        &self,
        id: Ulid,
        patch: ReservationPatch,
    ) -> Result<Reservation, EngineError> {
        let result = self.admit_update(id, patch).await;
        record_admission("update", &result);
        result
    }

    pub async fn delete_reservation(&self, id: Ulid) -> Result<(), EngineError> {
        for _ in 0..MAX_LOCK_RETRIES {
            let seen = self
                .store
                .find_reservation(id)
                .await?
                .ok_or(EngineError::NotFound(Entity::Reservation, id))?;
            let _lease = self.locks.acquire([seen.day_key()]).await;
            match self.store.find_reservation(id).await? {
                None => return Err(EngineError::NotFound(Entity::Reservation, id)),
                Some(current) if current.day_key() != seen.day_key() => continue,
                Some(_) => {
                    self.store.delete_reservation(id).await?;
                    tracing::debug!("deleted reservation {id}");
                    return Ok(());
                }
            }
        }
        Err(EngineError::LimitExceeded("reservation moved too often while deleting"))
    }

    async fn admit_create(&self, draft: ReservationDraft) -> Result<Reservation, EngineError> {
        check_fields(Some(&draft.motive), Some(draft.attendees))?;

        let room = self
            .store
            .find_room(draft.room_id)
            .await?
            .ok_or(EngineError::NotFound(Entity::Room, draft.room_id))?;
        let slot = self
            .store
            .find_slot(draft.slot_id)
            .await?
            .ok_or(EngineError::NotFound(Entity::Slot, draft.slot_id))?;
        if self.store.find_user(draft.user_id).await?.is_none() {
            return Err(EngineError::NotFound(Entity::User, draft.user_id));
        }

        let _lease = self.locks.acquire([draft.day_key()]).await;
        let conflicts = self
            .store
            .find_conflicts(draft.room_id, draft.date, None)
            .await?;
        let candidate = Candidate {
            date: draft.date,
            attendees: draft.attendees,
            room: &room,
            span: slot.span,
        };
        validate(&candidate, &conflicts, self.today())?;
        // A reference deleted since it was resolved reads as missing, as above.
        self.store
            .insert_reservation(draft)
            .await
            .map_err(|e| match e {
                EngineError::InvalidReference(entity, id) => EngineError::NotFound(entity, id),
                e => e,
            })
    }

    async fn admit_update(
        &self,
        id: Ulid,
        patch: ReservationPatch,
    ) -> Result<Reservation, EngineError> {
        check_fields(patch.motive.as_deref(), patch.attendees)?;

        let mut seen = self
            .store
            .find_reservation(id)
            .await?
            .ok_or(EngineError::NotFound(Entity::Reservation, id))?;
        self.resolve_patch_refs(&patch).await?;

        for _ in 0..MAX_LOCK_RETRIES {
            let old_key = seen.day_key();
            let _lease = self
                .locks
                .acquire([old_key, patch.target_key(&seen)])
                .await;

            let current = self
                .store
                .find_reservation(id)
                .await?
                .ok_or(EngineError::NotFound(Entity::Reservation, id))?;
            if current.day_key() != old_key {
                // Moved while we waited; the locks we hold are the wrong ones.
                seen = current;
                continue;
            }

            let merged = patch.apply(&current);
            let room = self
                .store
                .find_room(merged.room_id)
                .await?
                .ok_or(EngineError::NotFound(Entity::Room, merged.room_id))?;
            let slot = self
                .store
                .find_slot(merged.slot_id)
                .await?
                .ok_or(EngineError::NotFound(Entity::Slot, merged.slot_id))?;
            let conflicts = self
                .store
                .find_conflicts(merged.room_id, merged.date, Some(id))
                .await?;
            let candidate = Candidate {
                date: merged.date,
                attendees: merged.attendees,
                room: &room,
                span: slot.span,
            };
            validate(&candidate, &conflicts, self.today())?;
            return self.store.replace_reservation(merged).await;
        }
        Err(EngineError::LimitExceeded("reservation moved too often while updating"))
    }

    async fn resolve_patch_refs(&self, patch: &ReservationPatch) -> Result<(), EngineError> {
        if let Some(room_id) = patch.room_id
            && self.store.find_room(room_id).await?.is_none()
        {
            return Err(EngineError::InvalidReference(Entity::Room, room_id));
        }
        if let Some(slot_id) = patch.slot_id
            && self.store.find_slot(slot_id).await?.is_none()
        {
            return Err(EngineError::InvalidReference(Entity::Slot, slot_id));
        }
        if let Some(user_id) = patch.user_id
            && self.store.find_user(user_id).await?.is_none()
        {
            return Err(EngineError::InvalidReference(Entity::User, user_id));
        }
        Ok(())
    }
}

fn check_fields(motive: Option<&str>, attendees: Option<u32>) -> Result<(), EngineError> {
    if let Some(m) = motive
        && m.len() > MAX_MOTIVE_LEN
    {
        return Err(EngineError::LimitExceeded("motive too long"));
    }
    if attendees == Some(0) {
        return Err(EngineError::InvalidInput("attendees must be at least 1"));
    }
    Ok(())
}

fn record_admission(operation: &'static str, result: &Result<Reservation, EngineError>) {
    let outcome = match result {
        Ok(r) => {
            tracing::debug!(
                "{operation}: admitted reservation {} room={} date={}",
                r.id,
                r.room_id,
                r.date
            );
            "admitted"
        }
        Err(e) => {
            tracing::info!("{operation}: rejected: {e}");
            match e {
                EngineError::PastDate { .. }
                | EngineError::CapacityExceeded { .. }
                | EngineError::Overlap(_)
                | EngineError::NotFound(..)
                | EngineError::InvalidReference(..) => e.label(),
                _ => "error",
            }
        }
    };
    metrics::counter!(ADMISSIONS_TOTAL, "operation" => operation, "outcome" => outcome)
        .increment(1);
}
