//! Time and timestamp helpers.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// UTC timestamp used for readings, transitions, event publication, etc.
pub type Timestamp = DateTime<Utc>;

/// Return the current UTC time.
#[must_use]
pub fn now() -> Timestamp {
    Utc::now()
}

/// Whether at least `window` has passed between `since` and `at`.
///
/// A negative span (clock skew, out-of-order input) counts as not elapsed.
#[must_use]
pub fn has_elapsed(since: Timestamp, at: Timestamp, window: Duration) -> bool {
    (at - since)
        .to_std()
        .is_ok_and(|elapsed| elapsed >= window)
}
