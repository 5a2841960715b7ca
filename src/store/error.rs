use std::fmt;

use ulid::Ulid;

use crate::model::{IntervalField, Ms, ReservationStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Owner,
    Pet,
    Reservation,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntityKind::Owner => "owner",
            EntityKind::Pet => "pet",
            EntityKind::Reservation => "reservation",
        })
    }
}

/// Rejected before any store access. Never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    MissingField(&'static str),
    EmptyInterval { since: Ms, until: Ms },
    InvalidStatus(u8),
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },
    LimitExceeded(&'static str),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::MissingField(field) => write!(f, "field \"{field}\" is required"),
            ValidationError::EmptyInterval { since, until } => {
                write!(f, "since ({since}) must be before until ({until})")
            }
            ValidationError::InvalidStatus(code) => {
                write!(f, "status {code} must be one of 1 (NEW), 2 (CONFIRMED), 3 (CANCELLED)")
            }
            ValidationError::InvalidTransition { from, to } => {
                write!(f, "status transition {from} -> {to} is not allowed")
            }
            ValidationError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
        }
    }
}

/// A proposed interval collides with another reservation on the same pet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlapError {
    pub reservation_id: Ulid,
    pub pet_id: Ulid,
    pub field: IntervalField,
    pub conflicting_id: Ulid,
}

impl fmt::Display for OverlapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Field \"{}\" overlaps with another reservation ({} on pet {})",
            self.field, self.conflicting_id, self.pet_id
        )
    }
}

/// Store-level failures that a later attempt may not hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransientError {
    LockTimeout(Ulid),
    /// The record changed pets between lock-set resolution and locking.
    Serialization(Ulid),
    Wal(String),
}

impl fmt::Display for TransientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransientError::LockTimeout(id) => write!(f, "timed out waiting for lock on pet {id}"),
            TransientError::Serialization(id) => {
                write!(f, "serialization conflict on reservation {id}")
            }
            TransientError::Wal(e) => write!(f, "WAL error: {e}"),
        }
    }
}

#[derive(Debug)]
pub enum StoreError {
    Validation(ValidationError),
    Overlap(OverlapError),
    Transient(TransientError),
    RetriesExhausted { attempts: u32, last: TransientError },
    NotFound { kind: EntityKind, id: Ulid },
    AlreadyExists { kind: EntityKind, id: Ulid },
    /// A transaction touched a pet it does not hold the lock for.
    NotLocked(Ulid),
}

impl StoreError {
    pub fn not_found(kind: EntityKind, id: Ulid) -> Self {
        StoreError::NotFound { kind, id }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Validation(_) => "validation-failed",
            StoreError::Overlap(_) => "reservation-overlaps",
            StoreError::Transient(_) => "transient-store-error",
            StoreError::RetriesExhausted { .. } => "retries-exhausted",
            StoreError::NotFound { .. } => "not-found",
            StoreError::AlreadyExists { .. } => "already-exists",
            StoreError::NotLocked(_) => "not-locked",
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Validation(e) => write!(f, "validation failed: {e}"),
            StoreError::Overlap(e) => e.fmt(f),
            StoreError::Transient(e) => e.fmt(f),
            StoreError::RetriesExhausted { attempts, last } => {
                write!(f, "gave up after {attempts} attempts: {last}")
            }
            StoreError::NotFound { kind, id } => write!(f, "{kind} not found: {id}"),
            StoreError::AlreadyExists { kind, id } => write!(f, "{kind} already exists: {id}"),
            StoreError::NotLocked(id) => write!(f, "pet {id} is not locked by this transaction"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<ValidationError> for StoreError {
    fn from(e: ValidationError) -> Self {
        StoreError::Validation(e)
    }
}

impl From<OverlapError> for StoreError {
    fn from(e: OverlapError) -> Self {
        StoreError::Overlap(e)
    }
}

impl From<TransientError> for StoreError {
    fn from(e: TransientError) -> Self {
        StoreError::Transient(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlap_message_names_field() {
        let err = StoreError::from(OverlapError {
            reservation_id: Ulid::new(),
            pet_id: Ulid::new(),
            field: IntervalField::Until,
            conflicting_id: Ulid::new(),
        });
        assert!(err.to_string().starts_with("Field \"until\" overlaps with another reservation"));
        assert_eq!(err.code(), "reservation-overlaps");
        assert!(!err.is_transient());
    }

    #[test]
    fn only_transient_is_transient() {
        assert!(StoreError::from(TransientError::LockTimeout(Ulid::new())).is_transient());
        assert!(!StoreError::RetriesExhausted {
            attempts: 3,
            last: TransientError::Wal("disk full".into()),
        }
        .is_transient());
        assert!(!StoreError::from(ValidationError::MissingField("since")).is_transient());
    }
}
