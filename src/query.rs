use ulid::Ulid;

use crate::model::{Ms, Reservation, ReservationStatus};
use crate::store::StoreError;

/// Open/closed range comparisons on one instant field. Unset bounds match
/// everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bounds {
    pub lt: Option<Ms>,
    pub lte: Option<Ms>,
    pub gt: Option<Ms>,
    pub gte: Option<Ms>,
}

impl Bounds {
    pub fn matches(&self, v: Ms) -> bool {
        self.below_upper(v)
            && self.gt.is_none_or(|b| v > b)
            && self.gte.is_none_or(|b| v >= b)
    }

    /// Upper-bound half of `matches`. Monotone over ascending values, so it can
    /// cut a sorted scan.
    fn below_upper(&self, v: Ms) -> bool {
        self.lt.is_none_or(|b| v < b) && self.lte.is_none_or(|b| v <= b)
    }
}

/// Filter over reservations: equality on ids and status, ranges on
/// `since`/`until`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationQuery {
    pub pet_id: Option<Ulid>,
    pub owner_id: Option<Ulid>,
    pub status: Option<ReservationStatus>,
    pub status_ne: Option<ReservationStatus>,
    pub exclude_id: Option<Ulid>,
    pub since: Bounds,
    pub until: Bounds,
}

impl ReservationQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pet(mut self, id: Ulid) -> Self {
        self.pet_id = Some(id);
        self
    }

    pub fn owner(mut self, id: Ulid) -> Self {
        self.owner_id = Some(id);
        self
    }

    pub fn status(mut self, status: ReservationStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn status_ne(mut self, status: ReservationStatus) -> Self {
        self.status_ne = Some(status);
        self
    }

    pub fn exclude(mut self, id: Option<Ulid>) -> Self {
        self.exclude_id = id;
        self
    }

    pub fn since_lt(mut self, v: Ms) -> Self {
        self.since.lt = Some(v);
        self
    }

    pub fn since_lte(mut self, v: Ms) -> Self {
        self.since.lte = Some(v);
        self
    }

    pub fn since_gt(mut self, v: Ms) -> Self {
        self.since.gt = Some(v);
        self
    }

    pub fn since_gte(mut self, v: Ms) -> Self {
        self.since.gte = Some(v);
        self
    }

    pub fn until_lt(mut self, v: Ms) -> Self {
        self.until.lt = Some(v);
        self
    }

    pub fn until_lte(mut self, v: Ms) -> Self {
        self.until.lte = Some(v);
        self
    }

    pub fn until_gt(mut self, v: Ms) -> Self {
        self.until.gt = Some(v);
        self
    }

    pub fn until_gte(mut self, v: Ms) -> Self {
        self.until.gte = Some(v);
        self
    }

    pub fn matches(&self, r: &Reservation) -> bool {
        self.pet_id.is_none_or(|id| r.pet_id == id)
            && self.owner_id.is_none_or(|id| r.owner_id == id)
            && self.status.is_none_or(|s| r.status == s)
            && self.status_ne.is_none_or(|s| r.status != s)
            && self.exclude_id.is_none_or(|id| r.id != id)
            && self.since.matches(r.since)
            && self.until.matches(r.until)
    }

    /// Matching reservations from a slice sorted by `since`. Entries past the
    /// upper `since` bound are never visited.
    pub(crate) fn scan<'a>(&'a self, sorted: &'a [Reservation]) -> impl Iterator<Item = &'a Reservation> {
        let right_bound = sorted.partition_point(|r| self.since.below_upper(r.since));
        sorted[..right_bound].iter().filter(move |r| self.matches(r))
    }
}

/// Read access the overlap checker needs from whatever holds reservations.
pub trait ReservationLookup {
    /// First match in `since` order, if any.
    fn first_match(&self, query: &ReservationQuery) -> Result<Option<Reservation>, StoreError>;
}

impl ReservationLookup for [Reservation] {
    fn first_match(&self, query: &ReservationQuery) -> Result<Option<Reservation>, StoreError> {
        Ok(self
            .iter()
            .filter(|r| query.matches(r))
            .min_by_key(|r| r.since)
            .cloned())
    }
}
