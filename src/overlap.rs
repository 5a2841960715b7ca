use ulid::Ulid;

use crate::model::{Reservation, ReservationStatus, Span};
use crate::query::{ReservationLookup, ReservationQuery};
use crate::store::StoreError;

/// Which existing reservations count as occupying their interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlapPolicy {
    /// When false, CANCELLED reservations neither block nor get blocked.
    pub cancelled_blocks: bool,
}

impl Default for OverlapPolicy {
    fn default() -> Self {
        Self {
            cancelled_blocks: true,
        }
    }
}

impl OverlapPolicy {
    pub fn blocks(&self, status: ReservationStatus) -> bool {
        self.cancelled_blocks || status != ReservationStatus::Cancelled
    }
}

/// `pet_id == pet && until > span.start && since < span.end && id != exclude`
pub fn overlap_query(pet_id: Ulid, span: Span, exclude: Option<Ulid>, policy: &OverlapPolicy) -> ReservationQuery {
    let query = ReservationQuery::new()
        .pet(pet_id)
        .until_gt(span.start)
        .since_lt(span.end)
        .exclude(exclude);
    if policy.cancelled_blocks {
        query
    } else {
        query.status_ne(ReservationStatus::Cancelled)
    }
}

/// Earliest other reservation on `pet_id` whose interval overlaps `span`.
pub fn find_overlap<L>(
    lookup: &L,
    pet_id: Ulid,
    span: Span,
    exclude: Option<Ulid>,
    policy: &OverlapPolicy,
) -> Result<Option<Reservation>, StoreError>
where
    L: ReservationLookup + ?Sized,
{
    lookup.first_match(&overlap_query(pet_id, span, exclude, policy))
}

pub fn has_overlap<L>(
    lookup: &L,
    pet_id: Ulid,
    span: Span,
    exclude: Option<Ulid>,
    policy: &OverlapPolicy,
) -> Result<bool, StoreError>
where
    L: ReservationLookup + ?Sized,
{
    Ok(find_overlap(lookup, pet_id, span, exclude, policy)?.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Ms, Timestamps};

    fn reservation(pet_id: Ulid, since: Ms, until: Ms) -> Reservation {
        Reservation {
            id: Ulid::new(),
            owner_id: Ulid::new(),
            pet_id,
            status: ReservationStatus::New,
            since,
            until,
            timestamps: Timestamps::default(),
        }
    }

    #[test]
    fn matches_interval_algebra_on_small_grid() {
        let pet = Ulid::new();
        let policy = OverlapPolicy::default();
        for s1 in 0..6 {
            for u1 in (s1 + 1)..7 {
                let existing = [reservation(pet, s1, u1)];
                for s2 in 0..6 {
                    for u2 in (s2 + 1)..7 {
                        let expected = s1 < u2 && s2 < u1;
                        let got = has_overlap(&existing[..], pet, Span::new(s2, u2), None, &policy).unwrap();
                        assert_eq!(got, expected, "[{s1},{u1}) vs [{s2},{u2})");
                    }
                }
            }
        }
    }

    #[test]
    fn adjacent_intervals_do_not_overlap() {
        let pet = Ulid::new();
        let existing = [reservation(pet, 10, 11)];
        let policy = OverlapPolicy::default();
        assert!(!has_overlap(&existing[..], pet, Span::new(11, 12), None, &policy).unwrap());
        assert!(!has_overlap(&existing[..], pet, Span::new(9, 10), None, &policy).unwrap());
    }

    #[test]
    fn excluded_record_is_ignored() {
        let pet = Ulid::new();
        let r = reservation(pet, 100, 200);
        let existing = [r.clone()];
        let policy = OverlapPolicy::default();
        assert!(has_overlap(&existing[..], pet, Span::new(150, 250), None, &policy).unwrap());
        assert!(!has_overlap(&existing[..], pet, Span::new(150, 250), Some(r.id), &policy).unwrap());
    }

    #[test]
    fn other_pets_are_ignored() {
        let existing = [reservation(Ulid::new(), 100, 200)];
        let policy = OverlapPolicy::default();
        assert!(!has_overlap(&existing[..], Ulid::new(), Span::new(100, 200), None, &policy).unwrap());
    }

    #[test]
    fn cancelled_counts_unless_exempt() {
        let pet = Ulid::new();
        let mut r = reservation(pet, 100, 200);
        r.status = ReservationStatus::Cancelled;
        let existing = [r];

        let strict = OverlapPolicy::default();
        assert!(has_overlap(&existing[..], pet, Span::new(100, 200), None, &strict).unwrap());

        let exempt = OverlapPolicy {
            cancelled_blocks: false,
        };
        assert!(!has_overlap(&existing[..], pet, Span::new(100, 200), None, &exempt).unwrap());
    }

    #[test]
    fn find_returns_earliest_conflict() {
        let pet = Ulid::new();
        let first = reservation(pet, 100, 200);
        let second = reservation(pet, 200, 300);
        let existing = [second, first.clone()];
        let hit = find_overlap(&existing[..], pet, Span::new(150, 250), None, &OverlapPolicy::default())
            .unwrap()
            .unwrap();
        assert_eq!(hit.id, first.id);
    }
}
