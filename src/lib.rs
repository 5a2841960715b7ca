//! Overlap-safe reservations of pets by their owners.
//!
//! A [`Store`] keeps owners, pets and reservations in memory behind per-pet
//! locks, persists every commit to a write-ahead log, and refuses any write
//! that would give one pet two reservations with intersecting `[since, until)`
//! intervals.

pub mod compactor;
pub mod config;
pub mod lifecycle;
pub mod limits;
pub mod model;
pub mod observability;
pub mod overlap;
pub mod query;
pub mod store;
pub mod validator;
pub mod wal;

pub use config::StoreConfig;
pub use lifecycle::{Clock, ManualClock, StatusPolicy, SystemClock};
pub use model::{
    IntervalField, Ms, Owner, Pet, Reservation, ReservationDraft, ReservationPatch, ReservationStatus, Span,
};
pub use overlap::OverlapPolicy;
pub use query::ReservationQuery;
pub use store::{EntityKind, OverlapError, Store, StoreError, Transaction, TransientError, ValidationError};
