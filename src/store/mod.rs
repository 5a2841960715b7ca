mod error;
mod mutations;
mod queries;
mod txn;
mod windows;

pub use error::{EntityKind, OverlapError, StoreError, TransientError, ValidationError};
pub use txn::Transaction;
pub use windows::{merge_overlapping, subtract_intervals};

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedRwLockReadGuard, RwLock, mpsc, oneshot};
use tracing::info;
use ulid::Ulid;

use crate::config::StoreConfig;
use crate::lifecycle::{Clock, Lifecycle, SystemClock};
use crate::model::*;
use crate::wal::Wal;

pub type SharedPetState = Arc<RwLock<PetState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        commit: Commit,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        commits: Vec<Commit>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Commit, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { commit, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(commit, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { commit, response }) => batch.push((commit, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        respond_batch(batch, &result);

        // Non-append commands run only after the batch ahead of them is durable.
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let append_err = batch
        .iter()
        .find_map(|(commit, _)| wal.append_buffered(commit).err());
    // Always flush, so partially buffered bytes never leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match append_err.or(flush_err) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn respond_batch(batch: Vec<PendingAppend>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { commits, response } => {
            let result = Wal::write_compact_file(wal.path(), &commits).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// Append one commit through the group-commit writer and wait for its fsync.
async fn wal_append(wal_tx: &mpsc::Sender<WalCommand>, commit: Commit) -> Result<(), TransientError> {
    let (tx, rx) = oneshot::channel();
    wal_tx
        .send(WalCommand::Append { commit, response: tx })
        .await
        .map_err(|_| TransientError::Wal("WAL writer shut down".into()))?;
    rx.await
        .map_err(|_| TransientError::Wal("WAL writer dropped response".into()))?
        .map_err(|e| TransientError::Wal(e.to_string()))
}

/// Pet states a writer holds exclusively.
pub(super) trait PetSlots {
    fn pet_mut(&mut self, id: &Ulid) -> Option<&mut PetState>;
}

impl PetSlots for HashMap<Ulid, PetState> {
    fn pet_mut(&mut self, id: &Ulid) -> Option<&mut PetState> {
        self.get_mut(id)
    }
}

/// Apply one event to exclusively held pet state. Pet creation is handled at the
/// map level by the caller.
fn apply_event(
    slots: &mut impl PetSlots,
    owners: &DashMap<Ulid, Owner>,
    index: &DashMap<Ulid, Ulid>,
    event: &Event,
) {
    match event {
        Event::OwnerCreated { owner } | Event::OwnerUpdated { owner } => {
            owners.insert(owner.id, owner.clone());
        }
        Event::PetCreated { .. } => {}
        Event::PetUpdated { pet } => {
            if let Some(ps) = slots.pet_mut(&pet.id) {
                ps.pet = pet.clone();
            }
        }
        Event::ReservationCreated { reservation } => {
            if let Some(ps) = slots.pet_mut(&reservation.pet_id) {
                ps.insert_reservation(reservation.clone());
                index.insert(reservation.id, reservation.pet_id);
            }
        }
        Event::ReservationUpdated { reservation, from_pet } => {
            if let Some(ps) = slots.pet_mut(from_pet) {
                ps.remove_reservation(reservation.id);
            }
            if let Some(ps) = slots.pet_mut(&reservation.pet_id) {
                ps.insert_reservation(reservation.clone());
                index.insert(reservation.id, reservation.pet_id);
            }
        }
        Event::ReservationDeleted { id, pet_id } => {
            if let Some(ps) = slots.pet_mut(pet_id) {
                ps.remove_reservation(*id);
            }
            index.remove(id);
        }
    }
}

pub struct Store {
    pub(super) pets: Arc<DashMap<Ulid, SharedPetState>>,
    pub(super) owners: Arc<DashMap<Ulid, Owner>>,
    /// Reverse lookup: reservation id → pet id
    pub(super) reservation_index: Arc<DashMap<Ulid, Ulid>>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Shared by every writer, exclusive for compaction. Always taken before any
    /// pet lock.
    pub(super) commit_gate: Arc<RwLock<()>>,
    /// Serializes owner writes and pet creation.
    pub(super) registry: Arc<Mutex<()>>,
    pub(super) lifecycle: Lifecycle,
    pub(super) config: StoreConfig,
}

impl Store {
    pub fn open(config: StoreConfig) -> io::Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Open the store under `config.data_dir`, replaying its WAL. Must run
    /// inside a tokio runtime: the WAL writer is spawned here.
    pub fn with_clock(config: StoreConfig, clock: Arc<dyn Clock>) -> io::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let wal_path = config.wal_path();
        let commits = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let owners = DashMap::new();
        let index = DashMap::new();
        let mut pets: HashMap<Ulid, PetState> = HashMap::new();
        for event in commits.iter().flat_map(|c| &c.events) {
            match event {
                Event::PetCreated { pet } => {
                    pets.insert(pet.id, PetState::new(pet.clone()));
                }
                other => apply_event(&mut pets, &owners, &index, other),
            }
        }
        info!(
            commits = commits.len(),
            owners = owners.len(),
            pets = pets.len(),
            reservations = index.len(),
            "replayed WAL from {}",
            wal_path.display()
        );

        let pets: DashMap<Ulid, SharedPetState> = pets
            .into_iter()
            .map(|(id, ps)| (id, Arc::new(RwLock::new(ps))))
            .collect();

        Ok(Self {
            pets: Arc::new(pets),
            owners: Arc::new(owners),
            reservation_index: Arc::new(index),
            wal_tx,
            commit_gate: Arc::new(RwLock::new(())),
            registry: Arc::new(Mutex::new(())),
            lifecycle: Lifecycle::new(clock, config.status_policy),
            config,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub(super) fn get_pet_state(&self, id: &Ulid) -> Option<SharedPetState> {
        self.pets.get(id).map(|e| e.value().clone())
    }

    pub(super) fn pet_for_reservation(&self, id: &Ulid) -> Option<Ulid> {
        self.reservation_index.get(id).map(|e| *e.value())
    }

    /// Durably append `commit`, then run `apply`. Both happen on a spawned task,
    /// so a caller dropped mid-commit cannot separate the WAL write from the
    /// in-memory apply.
    pub(super) async fn commit_detached<F>(
        &self,
        gate: OwnedRwLockReadGuard<()>,
        commit: Commit,
        apply: F,
    ) -> Result<(), StoreError>
    where
        F: FnOnce() + Send + 'static,
    {
        let wal_tx = self.wal_tx.clone();
        let task = tokio::spawn(async move {
            let _gate = gate;
            wal_append(&wal_tx, commit).await?;
            apply();
            Ok::<(), TransientError>(())
        });
        match task.await {
            Ok(result) => Ok(result?),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(TransientError::Wal(format!("commit task cancelled: {e}")).into()),
        }
    }

    /// Rewrite the WAL with just the commits needed to rebuild current state.
    pub async fn compact_wal(&self) -> Result<(), StoreError> {
        // Exclusive gate: no commit can land between the snapshot and the swap.
        let _gate = self.commit_gate.write().await;

        let mut commits = Vec::with_capacity(self.pets.len() + 1);
        let owners: Vec<Event> = self
            .owners
            .iter()
            .map(|e| Event::OwnerCreated { owner: e.value().clone() })
            .collect();
        if !owners.is_empty() {
            commits.push(Commit { events: owners });
        }

        for state in self.pet_states() {
            let guard = state.read().await;
            let mut events = Vec::with_capacity(guard.reservations.len() + 1);
            events.push(Event::PetCreated { pet: guard.pet.clone() });
            events.extend(
                guard
                    .reservations
                    .iter()
                    .map(|r| Event::ReservationCreated { reservation: r.clone() }),
            );
            commits.push(Commit { events });
        }
        let written = commits.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { commits, response: tx })
            .await
            .map_err(|_| TransientError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| TransientError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| TransientError::Wal(e.to_string()))?;

        metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
        info!(commits = written, "compacted WAL");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
