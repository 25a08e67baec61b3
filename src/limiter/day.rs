//! Day boundary computation.
//!
//! The daily quota resets at local midnight in a configured timezone.
//! Midnight is computed with civil-time arithmetic rather than
//! formatting round-trips, and the two DST hazards are handled
//! explicitly: a skipped midnight (spring-forward gap) advances to the
//! first valid local time that day, and an ambiguous midnight
//! (fall-back overlap) takes the earlier instant.

use chrono::{DateTime, Duration as ChronoDuration, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

/// Returns the first local midnight in `tz` strictly after `after`,
/// as a UTC instant.
#[must_use]
pub fn next_day_boundary(after: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let local_date = after.with_timezone(&tz).date_naive();
    local_date
        .succ_opt()
        .and_then(|next_day| resolve_local_midnight(next_day, tz))
        .unwrap_or_else(|| after + ChronoDuration::days(1))
}

/// Maps a civil date's midnight to a UTC instant, stepping forward
/// hour by hour when midnight itself falls into a DST gap.
fn resolve_local_midnight(date: NaiveDate, tz: Tz) -> Option<DateTime<Utc>> {
    for hour in 0..24u32 {
        let Some(naive) = date.and_hms_opt(hour, 0, 0) else {
            continue;
        };
        match tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => return Some(dt.with_timezone(&Utc)),
            LocalResult::Ambiguous(earliest, _) => return Some(earliest.with_timezone(&Utc)),
            LocalResult::None => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const LA: Tz = chrono_tz::America::Los_Angeles;

    fn t(s: &str) -> DateTime<Utc> {
        s.parse().unwrap_or_else(|e| unreachable!("{e}"))
    }

    #[test]
    fn test_ordinary_day() {
        // 2026-03-02 10:00 PST → boundary 2026-03-03 00:00 PST (08:00 UTC).
        let boundary = next_day_boundary(t("2026-03-02T18:00:00Z"), LA);
        assert_eq!(boundary, t("2026-03-03T08:00:00Z"));
    }

    #[test]
    fn test_boundary_is_strictly_after() {
        // Exactly at local midnight: the boundary is the *next* midnight.
        let at_midnight = t("2026-03-03T08:00:00Z");
        let boundary = next_day_boundary(at_midnight, LA);
        assert_eq!(boundary, t("2026-03-04T08:00:00Z"));
    }

    #[test]
    fn test_dst_spring_forward_day() {
        // US DST starts 2026-03-08 at 02:00 local. Midnight itself is
        // valid; the day is only 23 hours long. From 2026-03-07 late
        // evening PST, the boundary is 2026-03-08 00:00 PST (08:00 UTC)...
        let boundary = next_day_boundary(t("2026-03-08T07:00:00Z"), LA);
        assert_eq!(boundary, t("2026-03-08T08:00:00Z"));

        // ...and the boundary after that lands 23 wall-clock hours
        // later: 2026-03-09 00:00 PDT = 07:00 UTC.
        let next = next_day_boundary(boundary, LA);
        assert_eq!(next, t("2026-03-09T07:00:00Z"));
        assert_eq!((next - boundary).num_hours(), 23);
    }

    #[test]
    fn test_dst_fall_back_day() {
        // US DST ends 2026-11-01 at 02:00 local; that day is 25 hours
        // long. From 2026-10-31 evening PDT, boundary is
        // 2026-11-01 00:00 PDT = 07:00 UTC.
        let boundary = next_day_boundary(t("2026-11-01T04:00:00Z"), LA);
        assert_eq!(boundary, t("2026-11-01T07:00:00Z"));

        // The following boundary is 25 hours away:
        // 2026-11-02 00:00 PST = 08:00 UTC.
        let next = next_day_boundary(boundary, LA);
        assert_eq!(next, t("2026-11-02T08:00:00Z"));
        assert_eq!((next - boundary).num_hours(), 25);
    }

    #[test]
    fn test_gapped_midnight_advances_to_first_valid_hour() {
        // America/Santiago springs forward at midnight: 2025-09-07
        // 00:00 does not exist, clocks jump 00:00 → 01:00. The
        // boundary resolves to 01:00 local rather than failing.
        let scl: Tz = chrono_tz::America::Santiago;
        let before = t("2025-09-06T12:00:00Z");
        let boundary = next_day_boundary(before, scl);
        let local = boundary.with_timezone(&scl);
        use chrono::Timelike;
        assert_eq!(local.hour(), 1);
        assert_eq!(local.minute(), 0);
    }

    #[test]
    fn test_utc_timezone() {
        let boundary = next_day_boundary(t("2026-06-15T23:59:59Z"), chrono_tz::UTC);
        assert_eq!(boundary, t("2026-06-16T00:00:00Z"));
    }
}
