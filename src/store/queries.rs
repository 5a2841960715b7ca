use ulid::Ulid;

use crate::model::*;
use crate::query::ReservationQuery;

use super::{EntityKind, SharedPetState, Store, StoreError};

impl Store {
    pub fn get_owner(&self, id: &Ulid) -> Option<Owner> {
        self.owners.get(id).map(|e| e.value().clone())
    }

    /// All owners, ordered by id.
    pub fn list_owners(&self) -> Vec<Owner> {
        let mut owners: Vec<Owner> = self.owners.iter().map(|e| e.value().clone()).collect();
        owners.sort_by_key(|o| o.id);
        owners
    }

    pub async fn get_pet(&self, id: &Ulid) -> Option<Pet> {
        let state = self.get_pet_state(id)?;
        let guard = state.read().await;
        Some(guard.pet.clone())
    }

    /// All pets, ordered by id.
    pub async fn list_pets(&self) -> Vec<Pet> {
        let mut pets = Vec::with_capacity(self.pets.len());
        for state in self.pet_states() {
            pets.push(state.read().await.pet.clone());
        }
        pets.sort_by_key(|p| p.id);
        pets
    }

    pub async fn get_reservation(&self, id: &Ulid) -> Option<Reservation> {
        // The index can point at the old pet while a move is being applied;
        // follow it until the record is found or the index stops changing.
        let mut pet_id = self.pet_for_reservation(id)?;
        loop {
            let state = self.get_pet_state(&pet_id)?;
            if let Some(r) = state.read().await.get_reservation(id) {
                return Some(r.clone());
            }
            match self.pet_for_reservation(id) {
                Some(next) if next != pet_id => pet_id = next,
                _ => return None,
            }
        }
    }

    /// Committed reservations matching `query`, ordered by `since`. A query
    /// pinned to a pet reads only that pet.
    pub async fn query(&self, query: &ReservationQuery) -> Result<Vec<Reservation>, StoreError> {
        let states = match query.pet_id {
            Some(pet_id) => vec![
                self.get_pet_state(&pet_id)
                    .ok_or(StoreError::not_found(EntityKind::Pet, pet_id))?,
            ],
            None => self.pet_states(),
        };

        let mut out = Vec::new();
        for state in states {
            let guard = state.read().await;
            out.extend(query.scan(&guard.reservations).cloned());
        }
        out.sort_by_key(|r| (r.since, r.id));
        Ok(out)
    }

    pub async fn reservations_for_pet(&self, pet_id: Ulid) -> Result<Vec<Reservation>, StoreError> {
        self.query(&ReservationQuery::new().pet(pet_id)).await
    }

    pub async fn reservations_for_owner(&self, owner_id: Ulid) -> Result<Vec<Reservation>, StoreError> {
        if !self.owners.contains_key(&owner_id) {
            return Err(StoreError::not_found(EntityKind::Owner, owner_id));
        }
        self.query(&ReservationQuery::new().owner(owner_id)).await
    }

    /// Snapshot of the pet map, so no shard lock is held across an await.
    pub(super) fn pet_states(&self) -> Vec<SharedPetState> {
        self.pets.iter().map(|e| e.value().clone()).collect()
    }
}
