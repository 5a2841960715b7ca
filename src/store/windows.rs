use ulid::Ulid;

use super::{EntityKind, Store, StoreError, ValidationError};
use crate::limits::MAX_QUERY_WINDOW_MS;
use crate::model::{Ms, Span};

// ── Interval algebra ──────────────────────────────────────────────

/// Collapse spans sorted by start into disjoint spans. Touching spans merge.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::with_capacity(sorted.len());
    for &span in sorted {
        match merged.last_mut() {
            Some(last) if span.start <= last.end => last.end = last.end.max(span.end),
            _ => merged.push(span),
        }
    }
    merged
}

/// `base` minus `holes`. Both inputs sorted and disjoint.
pub fn subtract_intervals(base: &[Span], holes: &[Span]) -> Vec<Span> {
    let mut out = Vec::new();
    let mut first_hole = 0;

    for b in base {
        while first_hole < holes.len() && holes[first_hole].end <= b.start {
            first_hole += 1;
        }

        let mut cursor = b.start;
        for hole in holes[first_hole..].iter().take_while(|h| h.start < b.end) {
            if hole.start > cursor {
                out.push(Span::new(cursor, hole.start));
            }
            cursor = cursor.max(hole.end);
        }
        if cursor < b.end {
            out.push(Span::new(cursor, b.end));
        }
    }

    out
}

impl Store {
    /// Gaps of at least `min_duration` inside `[since, until)` where the pet
    /// has no blocking reservation.
    pub async fn free_windows(
        &self,
        pet_id: Ulid,
        since: Ms,
        until: Ms,
        min_duration: Ms,
    ) -> Result<Vec<Span>, StoreError> {
        if since >= until {
            return Err(ValidationError::EmptyInterval { since, until }.into());
        }
        let window = Span::new(since, until);
        if window.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(ValidationError::LimitExceeded("query window too wide").into());
        }

        let state = self
            .get_pet_state(&pet_id)
            .ok_or(StoreError::not_found(EntityKind::Pet, pet_id))?;
        let policy = self.config.overlap;
        let busy: Vec<Span> = {
            let guard = state.read().await;
            guard
                .overlapping(&window)
                .filter(|r| policy.blocks(r.status))
                .map(|r| Span::new(r.since.max(window.start), r.until.min(window.end)))
                .collect()
        };

        // Already in start order: reservations are sorted by `since`.
        let busy = merge_overlapping(&busy);
        Ok(subtract_intervals(&[window], &busy)
            .into_iter()
            .filter(|gap| gap.duration_ms() >= min_duration)
            .collect())
    }
}
