use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

fn capped<T>(rows: Vec<T>) -> Result<Vec<T>, EngineError> {
    if rows.len() > MAX_RESULT_ROWS {
        return Err(EngineError::LimitExceeded("result set too large, narrow the filter"));
    }
    Ok(rows)
}

impl Engine {
    pub async fn get_room(&self, id: Ulid) -> Result<Room, EngineError> {
        self.store
            .find_room(id)
            .await?
            .ok_or(EngineError::NotFound(Entity::Room, id))
    }

    pub async fn list_rooms(&self, filter: RoomFilter) -> Result<Vec<Room>, EngineError> {
        capped(self.store.list_rooms(filter).await?)
    }

    pub async fn get_slot(&self, id: Ulid) -> Result<TimeSlot, EngineError> {
        self.store
            .find_slot(id)
            .await?
            .ok_or(EngineError::NotFound(Entity::Slot, id))
    }

    pub async fn list_slots(&self) -> Result<Vec<TimeSlot>, EngineError> {
        capped(self.store.list_slots().await?)
    }

    pub async fn get_user(&self, id: Ulid) -> Result<User, EngineError> {
        self.store
            .find_user(id)
            .await?
            .ok_or(EngineError::NotFound(Entity::User, id))
    }

    pub async fn list_users(&self) -> Result<Vec<User>, EngineError> {
        capped(self.store.list_users().await?)
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        self.store
            .find_reservation(id)
            .await?
            .ok_or(EngineError::NotFound(Entity::Reservation, id))
    }

    pub async fn list_reservations(
        &self,
        filter: ReservationFilter,
    ) -> Result<Vec<Reservation>, EngineError> {
        capped(self.store.list_reservations(filter).await?)
    }
}
