use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    // ── Rooms ────────────────────────────────────────────────

    pub async fn create_room(&self, room: Room) -> Result<Room, EngineError> {
        check_room(&room)?;
        self.store.insert_room(room.clone()).await?;
        tracing::info!("created room {} ({}, capacity {})", room.id, room.name, room.capacity);
        Ok(room)
    }

    /// Existing reservations are not re-checked against the new capacity;
    /// their next update is. A room deleted since it was read stays deleted.
    pub async fn update_room(&self, id: Ulid, patch: RoomPatch) -> Result<Room, EngineError> {
        let current = self
            .store
            .find_room(id)
            .await?
            .ok_or(EngineError::NotFound(Entity::Room, id))?;
        let updated = patch.apply(&current);
        check_room(&updated)?;
        self.store.replace_room(updated.clone()).await?;
        Ok(updated)
    }

    pub async fn delete_room(&self, id: Ulid) -> Result<(), EngineError> {
        self.store.delete_room(id).await?;
        tracing::info!("deleted room {id}");
        Ok(())
    }

    // ── Slots ────────────────────────────────────────────────

    pub async fn create_slot(&self, slot: TimeSlot) -> Result<TimeSlot, EngineError> {
        check_slot(&slot)?;
        self.store.insert_slot(slot.clone()).await?;
        tracing::info!(
            "created slot {} ({:?} {} {}-{})",
            slot.id,
            slot.weekday,
            slot.kind.as_str(),
            slot.span.start,
            slot.span.end
        );
        Ok(slot)
    }

    pub async fn update_slot(&self, id: Ulid, patch: SlotPatch) -> Result<TimeSlot, EngineError> {
        let current = self
            .store
            .find_slot(id)
            .await?
            .ok_or(EngineError::NotFound(Entity::Slot, id))?;
        let updated = patch.apply(&current);
        check_slot(&updated)?;
        self.store.replace_slot(updated.clone()).await?;
        Ok(updated)
    }

    pub async fn delete_slot(&self, id: Ulid) -> Result<(), EngineError> {
        self.store.delete_slot(id).await?;
        tracing::info!("deleted slot {id}");
        Ok(())
    }

    // ── Users ────────────────────────────────────────────────

    pub async fn create_user(&self, user: User) -> Result<User, EngineError> {
        check_user(&user)?;
        self.store.insert_user(user.clone()).await?;
        tracing::info!("created user {} ({})", user.id, user.role.as_str());
        Ok(user)
    }

    pub async fn update_user(&self, id: Ulid, patch: UserPatch) -> Result<User, EngineError> {
        let current = self
            .store
            .find_user(id)
            .await?
            .ok_or(EngineError::NotFound(Entity::User, id))?;
        let updated = patch.apply(&current);
        check_user(&updated)?;
        self.store.replace_user(updated.clone()).await?;
        Ok(updated)
    }

    pub async fn delete_user(&self, id: Ulid) -> Result<(), EngineError> {
        self.store.delete_user(id).await?;
        tracing::info!("deleted user {id}");
        Ok(())
    }
}

fn check_room(room: &Room) -> Result<(), EngineError> {
    if room.name.is_empty() {
        return Err(EngineError::InvalidInput("room name must not be empty"));
    }
    if room.name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("room name too long"));
    }
    if room.capacity == 0 {
        return Err(EngineError::InvalidInput("room capacity must be at least 1"));
    }
    Ok(())
}

fn check_slot(slot: &TimeSlot) -> Result<(), EngineError> {
    if slot.span.is_empty() {
        return Err(EngineError::InvalidInput("slot must start before it ends"));
    }
    Ok(())
}

fn check_user(user: &User) -> Result<(), EngineError> {
    if user.name.is_empty() {
        return Err(EngineError::InvalidInput("user name must not be empty"));
    }
    if user.name.len() > MAX_NAME_LEN || user.email.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("user name or email too long"));
    }
    if !user.email.contains('@') {
        return Err(EngineError::InvalidInput("email must contain '@'"));
    }
    Ok(())
}
