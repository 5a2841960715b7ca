use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::store::ValidationError;

/// Unix milliseconds. Every instant in the store uses this type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// The one overlap predicate: `[s1, u1)` and `[s2, u2)` share an instant
    /// iff `s1 < u2 && s2 < u1`.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Persisted by its numeric code, so a record carrying an unknown code fails
/// to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ReservationStatus {
    #[default]
    New,
    Confirmed,
    Cancelled,
}

impl ReservationStatus {
    pub const ALL: [ReservationStatus; 3] = [Self::New, Self::Confirmed, Self::Cancelled];

    /// Stable numeric code (NEW=1, CONFIRMED=2, CANCELLED=3).
    pub fn code(self) -> u8 {
        match self {
            Self::New => 1,
            Self::Confirmed => 2,
            Self::Cancelled => 3,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, ValidationError> {
        match code {
            1 => Ok(Self::New),
            2 => Ok(Self::Confirmed),
            3 => Ok(Self::Cancelled),
            other => Err(ValidationError::InvalidStatus(other)),
        }
    }

    /// Forward-only lifecycle: NEW → CONFIRMED → CANCELLED, plus NEW → CANCELLED.
    /// Re-writing the current status is always allowed.
    pub fn can_transition_to(self, next: ReservationStatus) -> bool {
        use ReservationStatus::*;
        matches!(
            (self, next),
            (New, New)
                | (New, Confirmed)
                | (New, Cancelled)
                | (Confirmed, Confirmed)
                | (Confirmed, Cancelled)
                | (Cancelled, Cancelled)
        )
    }
}

impl TryFrom<u8> for ReservationStatus {
    type Error = ValidationError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::from_code(code)
    }
}

impl From<ReservationStatus> for u8 {
    fn from(status: ReservationStatus) -> u8 {
        status.code()
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "NEW",
            Self::Confirmed => "CONFIRMED",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// The two interval fields that take part in overlap validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntervalField {
    Since,
    Until,
}

impl IntervalField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Since => "since",
            Self::Until => "until",
        }
    }
}

impl fmt::Display for IntervalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Timestamps {
    pub created_at: Ms,
    /// `None` until the first update.
    pub updated_at: Option<Ms>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub id: Ulid,
    pub name: String,
    pub timestamps: Timestamps,
}

/// The reservable resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pet {
    pub id: Ulid,
    pub animal: String,
    pub name: String,
    pub birthday: NaiveDate,
    pub timestamps: Timestamps,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub pet_id: Ulid,
    pub status: ReservationStatus,
    /// Inclusive start.
    pub since: Ms,
    /// Exclusive end.
    pub until: Ms,
    pub timestamps: Timestamps,
}

impl Reservation {
    pub fn span(&self) -> Span {
        Span::new(self.since, self.until)
    }
}

/// Input for creating a reservation. Required fields are optional here so that
/// missing values surface as validation errors rather than type errors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationDraft {
    pub id: Option<Ulid>,
    pub owner_id: Option<Ulid>,
    pub pet_id: Option<Ulid>,
    pub status: Option<ReservationStatus>,
    pub since: Option<Ms>,
    pub until: Option<Ms>,
}

impl ReservationDraft {
    pub fn new(owner_id: Ulid, pet_id: Ulid, since: Ms, until: Ms) -> Self {
        Self {
            id: None,
            owner_id: Some(owner_id),
            pet_id: Some(pet_id),
            status: None,
            since: Some(since),
            until: Some(until),
        }
    }

    pub fn with_id(mut self, id: Ulid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_status(mut self, status: ReservationStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// Changed fields of a reservation update. `None` leaves the stored value alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationPatch {
    pub owner_id: Option<Ulid>,
    pub pet_id: Option<Ulid>,
    pub status: Option<ReservationStatus>,
    pub since: Option<Ms>,
    pub until: Option<Ms>,
}

impl ReservationPatch {
    pub fn interval(since: Ms, until: Ms) -> Self {
        Self {
            since: Some(since),
            until: Some(until),
            ..Self::default()
        }
    }

    pub fn status(status: ReservationStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Final proposed record: the stored one with every set field replaced.
    /// Identity and timestamps are never patched.
    pub fn apply_to(&self, current: &Reservation) -> Reservation {
        Reservation {
            id: current.id,
            owner_id: self.owner_id.unwrap_or(current.owner_id),
            pet_id: self.pet_id.unwrap_or(current.pet_id),
            status: self.status.unwrap_or(current.status),
            since: self.since.unwrap_or(current.since),
            until: self.until.unwrap_or(current.until),
            timestamps: current.timestamps,
        }
    }
}

/// A pet plus every reservation targeting it, sorted by `since`.
#[derive(Debug, Clone)]
pub struct PetState {
    pub pet: Pet,
    pub reservations: Vec<Reservation>,
}

impl PetState {
    pub fn new(pet: Pet) -> Self {
        Self {
            pet,
            reservations: Vec::new(),
        }
    }

    /// Insert maintaining sort order by `since`.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.since <= reservation.since);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn get_reservation(&self, id: &Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == *id)
    }

    /// Reservations whose interval overlaps `query`. Everything starting at or
    /// after `query.end` is skipped by binary search.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self.reservations.partition_point(|r| r.since < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.until > query.start)
    }
}

/// A single store mutation. Events are grouped into [`Commit`]s on the WAL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    OwnerCreated { owner: Owner },
    OwnerUpdated { owner: Owner },
    PetCreated { pet: Pet },
    PetUpdated { pet: Pet },
    ReservationCreated { reservation: Reservation },
    ReservationUpdated { reservation: Reservation, from_pet: Ulid },
    ReservationDeleted { id: Ulid, pet_id: Ulid },
}

/// One transaction's worth of events. This is the WAL record format: a commit
/// replays whole or not at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub events: Vec<Event>,
}
