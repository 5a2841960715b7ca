use crate::model::Ms;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_RESERVATIONS_PER_PET: usize = 100_000;
pub const MAX_BATCH_SIZE: usize = 1_000;

/// 1970-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 9999-12-31T23:59:59.999Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999;

const DAY_MS: Ms = 86_400_000;
pub const MAX_SPAN_DURATION_MS: Ms = 366 * DAY_MS;
pub const MAX_QUERY_WINDOW_MS: Ms = 5 * 366 * DAY_MS;

/// Cap on a single retry sleep, whatever the attempt number.
pub const MAX_RETRY_BACKOFF_MS: u64 = 2_000;
