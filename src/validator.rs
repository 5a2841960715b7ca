use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::{IntervalField, Ms, Reservation, ReservationDraft, ReservationPatch, Span};
use crate::overlap::{OverlapPolicy, find_overlap};
use crate::query::ReservationLookup;
use crate::store::{OverlapError, StoreError, ValidationError};

fn require<T>(field: &'static str, value: Option<T>) -> Result<T, ValidationError> {
    value.ok_or(ValidationError::MissingField(field))
}

/// `since < until`, both in the valid range, and not wider than the span limit.
pub fn check_interval(since: Ms, until: Ms) -> Result<Span, ValidationError> {
    if since >= until {
        return Err(ValidationError::EmptyInterval { since, until });
    }
    if since < MIN_VALID_TIMESTAMP_MS || until > MAX_VALID_TIMESTAMP_MS {
        return Err(ValidationError::LimitExceeded("timestamp out of range"));
    }
    let span = Span::new(since, until);
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(ValidationError::LimitExceeded("reservation too long"));
    }
    Ok(span)
}

/// Turn a draft into an unstamped reservation. Runs before the store is touched.
pub fn validate_draft(draft: ReservationDraft) -> Result<Reservation, ValidationError> {
    let owner_id = require("owner_id", draft.owner_id)?;
    let pet_id = require("pet_id", draft.pet_id)?;
    let since = require("since", draft.since)?;
    let until = require("until", draft.until)?;
    check_interval(since, until)?;
    Ok(Reservation {
        id: draft.id.unwrap_or_else(Ulid::new),
        owner_id,
        pet_id,
        status: draft.status.unwrap_or_default(),
        since,
        until,
        timestamps: Default::default(),
    })
}

/// Early check on a patch that sets both ends. Single-ended patches are checked
/// against the stored record by [`apply_patch`].
pub fn validate_patch(patch: &ReservationPatch) -> Result<(), ValidationError> {
    if let (Some(since), Some(until)) = (patch.since, patch.until) {
        check_interval(since, until)?;
    }
    Ok(())
}

/// Final proposed record for an update, with the final interval validated.
pub fn apply_patch(current: &Reservation, patch: &ReservationPatch) -> Result<Reservation, ValidationError> {
    let after = patch.apply_to(current);
    check_interval(after.since, after.until)?;
    Ok(after)
}

pub fn validate_create<L>(lookup: &L, reservation: &Reservation, policy: &OverlapPolicy) -> Result<(), StoreError>
where
    L: ReservationLookup + ?Sized,
{
    if !policy.blocks(reservation.status) {
        return Ok(());
    }
    // Both fields share the predicate, so one query settles both; `since` is
    // validated first and is the one reported.
    check_field(lookup, reservation, IntervalField::Since, None, policy)
}

pub fn validate_update<L>(
    lookup: &L,
    before: &Reservation,
    after: &Reservation,
    policy: &OverlapPolicy,
) -> Result<(), StoreError>
where
    L: ReservationLookup + ?Sized,
{
    if !policy.blocks(after.status) {
        return Ok(());
    }
    let Some(field) = changed_interval_field(before, after, policy) else {
        return Ok(());
    };
    check_field(lookup, after, field, Some(after.id), policy)
}

/// First interval field whose effective value changed, in validation order.
/// A pet move, or a cancelled record starting to block again, touches both.
fn changed_interval_field(before: &Reservation, after: &Reservation, policy: &OverlapPolicy) -> Option<IntervalField> {
    let reactivated = !policy.blocks(before.status) && policy.blocks(after.status);
    if before.pet_id != after.pet_id || reactivated || before.since != after.since {
        Some(IntervalField::Since)
    } else if before.until != after.until {
        Some(IntervalField::Until)
    } else {
        None
    }
}

fn check_field<L>(
    lookup: &L,
    candidate: &Reservation,
    field: IntervalField,
    exclude: Option<Ulid>,
    policy: &OverlapPolicy,
) -> Result<(), StoreError>
where
    L: ReservationLookup + ?Sized,
{
    let Some(conflict) = find_overlap(lookup, candidate.pet_id, candidate.span(), exclude, policy)? else {
        return Ok(());
    };
    debug!(
        reservation = %candidate.id,
        pet = %candidate.pet_id,
        conflicting = %conflict.id,
        conflicting_since = conflict.since,
        conflicting_until = conflict.until,
        "{field} overlaps existing reservation"
    );
    metrics::counter!(crate::observability::OVERLAPS_REJECTED_TOTAL, "field" => field.as_str()).increment(1);
    Err(OverlapError {
        reservation_id: candidate.id,
        pet_id: candidate.pet_id,
        field,
        conflicting_id: conflict.id,
    }
    .into())
}
