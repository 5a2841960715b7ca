use std::collections::HashMap;

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard};
use tracing::warn;
use ulid::Ulid;

use super::{EntityKind, PetSlots, Store, StoreError, TransientError, ValidationError, apply_event};
use crate::limits::MAX_RESERVATIONS_PER_PET;
use crate::model::*;
use crate::query::{ReservationLookup, ReservationQuery};

/// Write guards for a transaction's pets, sorted by pet id.
pub(super) struct LockedPets(Vec<(Ulid, OwnedRwLockWriteGuard<PetState>)>);

impl LockedPets {
    fn position(&self, id: &Ulid) -> Option<usize> {
        self.0.binary_search_by_key(id, |(k, _)| *k).ok()
    }

    fn get(&self, id: &Ulid) -> Option<&PetState> {
        self.position(id).map(|i| &*self.0[i].1)
    }

    fn iter(&self) -> impl Iterator<Item = &PetState> {
        self.0.iter().map(|(_, guard)| &**guard)
    }
}

impl PetSlots for LockedPets {
    fn pet_mut(&mut self, id: &Ulid) -> Option<&mut PetState> {
        let i = self.position(id)?;
        Some(&mut *self.0[i].1)
    }
}

/// Exclusive view over a fixed set of pets.
///
/// Reads see committed state with this transaction's staged writes layered on
/// top. Nothing is visible to anyone else until [`Store::commit`]; dropping the
/// transaction discards everything staged.
pub struct Transaction {
    gate: OwnedRwLockReadGuard<()>,
    pets: LockedPets,
    staged: Vec<Event>,
    /// Staged reservation state by id. `None` marks a staged delete.
    overlay: HashMap<Ulid, Option<Reservation>>,
    staged_pets: HashMap<Ulid, Pet>,
}

impl Transaction {
    fn locked(&self, pet_id: &Ulid) -> Result<&PetState, StoreError> {
        self.pets.get(pet_id).ok_or(StoreError::NotLocked(*pet_id))
    }

    pub fn pet_ids(&self) -> impl Iterator<Item = Ulid> + '_ {
        self.pets.0.iter().map(|(id, _)| *id)
    }

    pub fn pet(&self, id: &Ulid) -> Result<&Pet, StoreError> {
        match self.staged_pets.get(id) {
            Some(pet) => Ok(pet),
            None => self.locked(id).map(|ps| &ps.pet),
        }
    }

    /// Looks only at locked pets.
    pub fn get_reservation(&self, id: &Ulid) -> Option<Reservation> {
        if let Some(staged) = self.overlay.get(id) {
            return staged.clone();
        }
        self.pets.iter().find_map(|ps| ps.get_reservation(id)).cloned()
    }

    /// Matching reservations in `since` order. A query pinned to a pet outside
    /// the lock set is an error; an unpinned one covers the locked pets only.
    pub fn query(&self, query: &ReservationQuery) -> Result<Vec<Reservation>, StoreError> {
        let states: Vec<&PetState> = match query.pet_id {
            Some(id) => vec![self.locked(&id)?],
            None => self.pets.iter().collect(),
        };
        let mut out: Vec<Reservation> = states
            .iter()
            .flat_map(|ps| query.scan(&ps.reservations))
            .filter(|r| !self.overlay.contains_key(&r.id))
            .cloned()
            .collect();
        out.extend(self.overlay.values().flatten().filter(|r| query.matches(r)).cloned());
        out.sort_by_key(|r| r.since);
        Ok(out)
    }

    pub fn insert_reservation(&mut self, reservation: Reservation) -> Result<(), StoreError> {
        let committed = self.locked(&reservation.pet_id)?.reservations.len();
        let staged = self
            .overlay
            .values()
            .flatten()
            .filter(|r| r.pet_id == reservation.pet_id)
            .count();
        if committed + staged >= MAX_RESERVATIONS_PER_PET {
            return Err(ValidationError::LimitExceeded("too many reservations on pet").into());
        }
        if self.get_reservation(&reservation.id).is_some() {
            return Err(StoreError::AlreadyExists {
                kind: EntityKind::Reservation,
                id: reservation.id,
            });
        }
        self.staged.push(Event::ReservationCreated {
            reservation: reservation.clone(),
        });
        self.overlay.insert(reservation.id, Some(reservation));
        Ok(())
    }

    /// Replace a reservation, possibly on another locked pet.
    pub fn update_reservation(&mut self, reservation: Reservation) -> Result<(), StoreError> {
        let current = self
            .get_reservation(&reservation.id)
            .ok_or(StoreError::not_found(EntityKind::Reservation, reservation.id))?;
        self.locked(&reservation.pet_id)?;
        self.staged.push(Event::ReservationUpdated {
            reservation: reservation.clone(),
            from_pet: current.pet_id,
        });
        self.overlay.insert(reservation.id, Some(reservation));
        Ok(())
    }

    pub fn delete_reservation(&mut self, id: Ulid) -> Result<Reservation, StoreError> {
        let current = self
            .get_reservation(&id)
            .ok_or(StoreError::not_found(EntityKind::Reservation, id))?;
        self.staged.push(Event::ReservationDeleted {
            id,
            pet_id: current.pet_id,
        });
        self.overlay.insert(id, None);
        Ok(current)
    }

    pub fn update_pet(&mut self, pet: Pet) -> Result<(), StoreError> {
        self.locked(&pet.id)?;
        self.staged.push(Event::PetUpdated { pet: pet.clone() });
        self.staged_pets.insert(pet.id, pet);
        Ok(())
    }
}

impl ReservationLookup for Transaction {
    fn first_match(&self, query: &ReservationQuery) -> Result<Option<Reservation>, StoreError> {
        Ok(self.query(query)?.into_iter().next())
    }
}

impl Store {
    /// Lock `pet_ids` for one transaction. Locks are taken in id order, each
    /// with `lock_timeout`.
    ///
    /// Do not start another write on this store while holding the returned
    /// transaction: a pending compaction would block it forever.
    pub async fn begin(&self, pet_ids: &[Ulid]) -> Result<Transaction, StoreError> {
        let mut ids = pet_ids.to_vec();
        ids.sort();
        ids.dedup();

        let gate = self.commit_gate.clone().read_owned().await;
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            let state = self
                .get_pet_state(&id)
                .ok_or(StoreError::not_found(EntityKind::Pet, id))?;
            let guard = tokio::time::timeout(self.config.lock_timeout, state.write_owned())
                .await
                .map_err(|_| TransientError::LockTimeout(id))?;
            guards.push((id, guard));
        }

        Ok(Transaction {
            gate,
            pets: LockedPets(guards),
            staged: Vec::new(),
            overlay: HashMap::new(),
            staged_pets: HashMap::new(),
        })
    }

    /// Make a transaction's staged writes durable and visible, as one WAL record.
    pub async fn commit(&self, tx: Transaction) -> Result<(), StoreError> {
        let Transaction {
            gate,
            mut pets,
            staged,
            ..
        } = tx;
        if staged.is_empty() {
            return Ok(());
        }

        let written = staged
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    Event::ReservationCreated { .. } | Event::ReservationUpdated { .. }
                )
            })
            .count();
        let commit = Commit { events: staged };
        let events = commit.events.clone();
        let owners = self.owners.clone();
        let index = self.reservation_index.clone();

        self.commit_detached(gate, commit, move || {
            for event in &events {
                apply_event(&mut pets, &owners, &index, event);
            }
            // Pet guards drop here, after the apply.
        })
        .await?;

        if written > 0 {
            metrics::counter!(crate::observability::RESERVATIONS_COMMITTED_TOTAL).increment(written as u64);
        }
        Ok(())
    }

    /// Run `body` under the locks `lock_set` resolves, then commit. Transient
    /// failures in any step re-run the whole attempt after a backoff.
    ///
    /// `body` is synchronous and may run more than once; it must not have side
    /// effects outside the transaction.
    pub async fn run_in_transaction<T, L, F>(&self, lock_set: L, mut body: F) -> Result<T, StoreError>
    where
        L: Fn(&Store) -> Result<Vec<Ulid>, StoreError>,
        F: FnMut(&mut Transaction) -> Result<T, StoreError>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let err = match self.attempt(&lock_set, &mut body).await {
                Ok(value) => return Ok(value),
                Err(StoreError::Transient(e)) => e,
                Err(other) => return Err(other),
            };
            if attempt >= max_attempts {
                metrics::counter!(crate::observability::TXN_RETRIES_EXHAUSTED_TOTAL).increment(1);
                warn!(attempts = attempt, error = %err, "transaction retries exhausted");
                return Err(StoreError::RetriesExhausted {
                    attempts: attempt,
                    last: err,
                });
            }
            let delay = self.config.backoff(attempt);
            warn!(attempt, ?delay, error = %err, "transient failure, retrying transaction");
            metrics::counter!(crate::observability::TXN_RETRIES_TOTAL).increment(1);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn attempt<T, L, F>(&self, lock_set: &L, body: &mut F) -> Result<T, StoreError>
    where
        L: Fn(&Store) -> Result<Vec<Ulid>, StoreError>,
        F: FnMut(&mut Transaction) -> Result<T, StoreError>,
    {
        let pet_ids = lock_set(self)?;
        let mut tx = self.begin(&pet_ids).await?;
        let value = body(&mut tx)?;
        self.commit(tx).await?;
        Ok(value)
    }
}
