use chrono::NaiveDate;
use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::validator::{apply_patch, validate_create, validate_draft, validate_patch, validate_update};

use super::{EntityKind, SharedPetState, Store, StoreError, TransientError, ValidationError};

fn check_name(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    if value.len() > MAX_NAME_LEN {
        return Err(ValidationError::LimitExceeded("name too long"));
    }
    Ok(())
}

impl Store {
    // ── Owners ────────────────────────────────────────────────────

    pub async fn create_owner(&self, id: Ulid, name: String) -> Result<Owner, StoreError> {
        check_name("name", &name)?;
        let gate = self.commit_gate.clone().read_owned().await;
        let registry = self.registry.clone().lock_owned().await;
        if self.owners.contains_key(&id) {
            return Err(StoreError::AlreadyExists {
                kind: EntityKind::Owner,
                id,
            });
        }

        let mut owner = Owner {
            id,
            name,
            timestamps: Timestamps::default(),
        };
        self.lifecycle.on_create(&mut owner);

        let owners = self.owners.clone();
        let record = owner.clone();
        let commit = Commit {
            events: vec![Event::OwnerCreated { owner: owner.clone() }],
        };
        self.commit_detached(gate, commit, move || {
            owners.insert(record.id, record);
            drop(registry);
        })
        .await?;
        debug!("created owner {id}");
        Ok(owner)
    }

    pub async fn update_owner(&self, id: Ulid, name: String) -> Result<Owner, StoreError> {
        check_name("name", &name)?;
        let gate = self.commit_gate.clone().read_owned().await;
        let registry = self.registry.clone().lock_owned().await;
        let mut owner = self
            .get_owner(&id)
            .ok_or(StoreError::not_found(EntityKind::Owner, id))?;
        owner.name = name;
        self.lifecycle.on_update(&mut owner);

        let owners = self.owners.clone();
        let record = owner.clone();
        let commit = Commit {
            events: vec![Event::OwnerUpdated { owner: owner.clone() }],
        };
        self.commit_detached(gate, commit, move || {
            owners.insert(record.id, record);
            drop(registry);
        })
        .await?;
        debug!("updated owner {id}");
        Ok(owner)
    }

    // ── Pets ──────────────────────────────────────────────────────

    pub async fn create_pet(
        &self,
        id: Ulid,
        animal: String,
        name: String,
        birthday: NaiveDate,
    ) -> Result<Pet, StoreError> {
        check_name("animal", &animal)?;
        check_name("name", &name)?;
        let gate = self.commit_gate.clone().read_owned().await;
        let registry = self.registry.clone().lock_owned().await;
        if self.pets.contains_key(&id) {
            return Err(StoreError::AlreadyExists {
                kind: EntityKind::Pet,
                id,
            });
        }

        let mut pet = Pet {
            id,
            animal,
            name,
            birthday,
            timestamps: Timestamps::default(),
        };
        self.lifecycle.on_create(&mut pet);

        let pets = self.pets.clone();
        let state: SharedPetState = std::sync::Arc::new(tokio::sync::RwLock::new(PetState::new(pet.clone())));
        let commit = Commit {
            events: vec![Event::PetCreated { pet: pet.clone() }],
        };
        self.commit_detached(gate, commit, move || {
            pets.insert(id, state);
            drop(registry);
        })
        .await?;
        debug!("created pet {id}");
        Ok(pet)
    }

    pub async fn update_pet(
        &self,
        id: Ulid,
        animal: String,
        name: String,
        birthday: NaiveDate,
    ) -> Result<Pet, StoreError> {
        check_name("animal", &animal)?;
        check_name("name", &name)?;
        let pet = self
            .run_in_transaction(
                |_| Ok(vec![id]),
                |tx| {
                    let mut pet = tx.pet(&id)?.clone();
                    pet.animal = animal.clone();
                    pet.name = name.clone();
                    pet.birthday = birthday;
                    self.lifecycle.on_update(&mut pet);
                    tx.update_pet(pet.clone())?;
                    Ok(pet)
                },
            )
            .await?;
        debug!("updated pet {id}");
        Ok(pet)
    }

    // ── Reservations ──────────────────────────────────────────────

    pub async fn create_reservation(&self, draft: ReservationDraft) -> Result<Reservation, StoreError> {
        let mut created = self.create_reservations(vec![draft]).await?;
        created
            .pop()
            .ok_or(StoreError::Validation(ValidationError::MissingField("reservation")))
    }

    /// Create every draft or none. Drafts are checked against committed
    /// reservations and against each other.
    pub async fn create_reservations(&self, drafts: Vec<ReservationDraft>) -> Result<Vec<Reservation>, StoreError> {
        if drafts.is_empty() {
            return Ok(Vec::new());
        }
        if drafts.len() > MAX_BATCH_SIZE {
            return Err(ValidationError::LimitExceeded("batch too large").into());
        }
        let mut candidates = drafts
            .into_iter()
            .map(validate_draft)
            .collect::<Result<Vec<_>, _>>()?;
        for r in &mut candidates {
            if !self.owners.contains_key(&r.owner_id) {
                return Err(StoreError::not_found(EntityKind::Owner, r.owner_id));
            }
            self.lifecycle.on_create(r);
        }

        let pet_ids: Vec<Ulid> = candidates.iter().map(|r| r.pet_id).collect();
        let policy = self.config.overlap;
        let created = self
            .run_in_transaction(
                |_| Ok(pet_ids.clone()),
                |tx| {
                    for r in &candidates {
                        // Committed elsewhere, or staged earlier in this batch.
                        if self.pet_for_reservation(&r.id).is_some() || tx.get_reservation(&r.id).is_some() {
                            return Err(StoreError::AlreadyExists {
                                kind: EntityKind::Reservation,
                                id: r.id,
                            });
                        }
                        validate_create(&*tx, r, &policy)?;
                        tx.insert_reservation(r.clone())?;
                    }
                    Ok(candidates.clone())
                },
            )
            .await?;

        for r in &created {
            debug!("created reservation {} on pet {} [{}, {})", r.id, r.pet_id, r.since, r.until);
        }
        Ok(created)
    }

    /// Apply `patch` to reservation `id`. Only the interval fields that change
    /// are re-checked for overlap.
    pub async fn update_reservation(&self, id: Ulid, patch: ReservationPatch) -> Result<Reservation, StoreError> {
        validate_patch(&patch)?;
        if let Some(owner_id) = patch.owner_id
            && !self.owners.contains_key(&owner_id)
        {
            return Err(StoreError::not_found(EntityKind::Owner, owner_id));
        }

        let policy = self.config.overlap;
        let updated = self
            .run_in_transaction(
                |store| {
                    let current = store
                        .pet_for_reservation(&id)
                        .ok_or(StoreError::not_found(EntityKind::Reservation, id))?;
                    Ok(match patch.pet_id {
                        Some(target) if target != current => vec![current, target],
                        _ => vec![current],
                    })
                },
                |tx| {
                    // Moved to a pet outside the lock set since it was resolved.
                    let before = tx.get_reservation(&id).ok_or(TransientError::Serialization(id))?;
                    let mut after = apply_patch(&before, &patch)?;
                    self.lifecycle.check_transition(before.status, after.status)?;
                    validate_update(&*tx, &before, &after, &policy)?;
                    self.lifecycle.on_update(&mut after);
                    tx.update_reservation(after.clone())?;
                    Ok(after)
                },
            )
            .await?;

        debug!("updated reservation {id}");
        Ok(updated)
    }

    pub async fn delete_reservation(&self, id: Ulid) -> Result<Reservation, StoreError> {
        let deleted = self
            .run_in_transaction(
                |store| {
                    let pet = store
                        .pet_for_reservation(&id)
                        .ok_or(StoreError::not_found(EntityKind::Reservation, id))?;
                    Ok(vec![pet])
                },
                |tx| {
                    if tx.get_reservation(&id).is_none() {
                        return Err(TransientError::Serialization(id).into());
                    }
                    tx.delete_reservation(id)
                },
            )
            .await?;
        debug!("deleted reservation {id}");
        Ok(deleted)
    }
}
