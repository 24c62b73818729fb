//! Per-file transfer decision.

use chrono::{DateTime, Utc};

use davsync_storage::Entry;

/// Symmetric tolerance absorbing timestamp-resolution differences between
/// filesystems and storage backends.
const TOLERANCE_MS: i64 = 1_000;

/// Decide whether a file needs to be transferred.
///
/// `dest_modified` is the destination's modification time, or `None` when
/// the destination path does not exist. A missing destination always
/// transfers; otherwise the timestamps are compared with a symmetric
/// one-second tolerance: a difference of exactly 1.000 s counts as
/// unchanged, anything greater as changed. The comparison is the same in
/// both directions; the caller fixes which side is the source for the
/// whole run.
pub fn needs_transfer(source: &Entry, dest_modified: Option<DateTime<Utc>>) -> bool {
    let Some(dest_modified) = dest_modified else {
        return true;
    };
    let delta = source
        .modified
        .signed_duration_since(dest_modified)
        .num_milliseconds()
        .abs();
    delta > TOLERANCE_MS
}
