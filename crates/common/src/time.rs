//! Wall-clock time helpers for Parley components.

use chrono::Utc;

/// Current wall-clock time as milliseconds since the Unix epoch.
///
/// Chat timestamps use this representation on the wire so that values
/// interoperate with peers that mint `Date.now()`-style integers.
#[must_use]
pub fn epoch_millis() -> i64 {
    Utc::now().timestamp_millis()
}
