use chrono::Utc;

/// Seconds since the unix epoch, as stored in `create_at`/`StartAt` fields.
#[inline]
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}
