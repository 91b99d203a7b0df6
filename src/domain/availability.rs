//! Slot computation for one shop day.
//!
//! All grid arithmetic happens in wall-clock minutes from local midnight and
//! each candidate start is localized independently. Adding durations to
//! instants is how availability code corrupts itself twice a year: a start
//! that lands in a spring-forward gap simply does not exist, and one in a
//! fall-back fold exists twice. Here a gap start is skipped and a fold start
//! resolves to the earlier instant.

use std::collections::BTreeMap;
use std::ops::Range;

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use super::core::{ProviderId, Schedule, MINUTES_PER_DAY};

/// A bookable start time as shown to a customer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Slot {
    /// Wall-clock start in the shop's timezone, offset included.
    pub start: DateTime<Tz>,
    /// The same instant in UTC.
    pub start_utc: DateTime<Utc>,
    /// How many providers can still take this start.
    pub open_providers: u32,
}

/// Round `minute` up to the next multiple of `interval`.
pub fn ceil_to_interval(minute: u32, interval: u32) -> u32 {
    minute.div_ceil(interval) * interval
}

/// Resolve a wall-clock minute of `date` to an instant, or None when the
/// clock skips over it. An ambiguous minute resolves to its first occurrence.
pub fn localize_minute(date: NaiveDate, minute: u32, tz: Tz) -> Option<DateTime<Tz>> {
    let (date, minute) = match minute >= MINUTES_PER_DAY {
        true => (date.succ_opt()?, minute - MINUTES_PER_DAY),
        false => (date, minute),
    };
    let time = NaiveTime::from_hms_opt(minute / 60, minute % 60, 0)?;
    match tz.from_local_datetime(&date.and_time(time)) {
        LocalResult::Single(dt) => Some(dt),
        LocalResult::Ambiguous(earlier, _) => Some(earlier),
        LocalResult::None => None,
    }
}

fn overlaps(a: &Range<DateTime<Utc>>, b: &Range<DateTime<Utc>>) -> bool {
    a.start < b.end && b.start < a.end
}

/// Starts on `date` at which one provider could take an appointment of
/// `total_minutes`, given their working hours and the intervals already
/// reserved. Starts before `now` are dropped.
pub fn provider_free_starts(
    schedule: &Schedule,
    date: NaiveDate,
    total_minutes: u32,
    reserved: &[Range<DateTime<Utc>>],
    now: DateTime<Utc>,
) -> Vec<DateTime<Utc>> {
    let tz = schedule.timezone().tz();
    let interval = schedule.slot_interval_minutes();
    let mut starts = Vec::new();
    for window in schedule.windows_for(date) {
        let mut minute = ceil_to_interval(window.start_minute, interval);
        while minute + total_minutes <= window.end_minute {
            if let Some(start) = localize_minute(date, minute, tz) {
                let start_utc = start.with_timezone(&Utc);
                let candidate = start_utc..start_utc + Duration::minutes(total_minutes as i64);
                if start_utc >= now && !reserved.iter().any(|r| overlaps(r, &candidate)) {
                    starts.push(start_utc);
                }
            }
            minute += interval;
        }
    }
    starts.sort();
    starts.dedup();
    starts
}

/// Merge per-provider free starts into the customer-facing slot list,
/// counting how many providers are open at each start.
pub fn merge(per_provider: &[(ProviderId, Vec<DateTime<Utc>>)], tz: Tz) -> Vec<Slot> {
    let mut counts: BTreeMap<DateTime<Utc>, u32> = BTreeMap::new();
    for (_, starts) in per_provider {
        for start in starts {
            *counts.entry(*start).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .map(|(start_utc, open_providers)| Slot {
            start: start_utc.with_timezone(&tz),
            start_utc,
            open_providers,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Timelike, Weekday};

    use super::super::core::{ScheduleId, TimezoneId, Window};
    use super::*;

    fn schedule(tz: &str, interval: u32) -> Schedule {
        Schedule::create(ScheduleId::from(1), tz.parse::<TimezoneId>().unwrap(), interval).unwrap()
    }

    fn far_past() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_ceil_to_interval() {
        assert_eq!(ceil_to_interval(540, 30), 540);
        assert_eq!(ceil_to_interval(545, 30), 570);
        assert_eq!(ceil_to_interval(0, 15), 0);
    }

    #[test]
    fn test_full_day_grid() {
        // 09:00 to 17:00, 30 minute grid, 30 minute service: 16 starts.
        let mut s = schedule("America/New_York", 30);
        s.add_window(Weekday::Mon, Window::new(540, 1020)).unwrap();
        let monday = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        let starts = provider_free_starts(&s, monday, 30, &[], far_past());
        assert_eq!(starts.len(), 16);
        let first = starts[0].with_timezone(&chrono_tz::America::New_York);
        assert_eq!((first.hour(), first.minute()), (9, 0));
        let last = starts[15].with_timezone(&chrono_tz::America::New_York);
        assert_eq!((last.hour(), last.minute()), (16, 30));
    }

    #[test]
    fn test_booked_interval_blocks_one_start() {
        let mut s = schedule("America/New_York", 30);
        s.add_window(Weekday::Mon, Window::new(540, 1020)).unwrap();
        let monday = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        // 10:00 to 10:30 local is 14:00 to 14:30 UTC in June.
        let booked = Utc.with_ymd_and_hms(2026, 6, 1, 14, 0, 0).unwrap()
            ..Utc.with_ymd_and_hms(2026, 6, 1, 14, 30, 0).unwrap();
        let starts = provider_free_starts(&s, monday, 30, &[booked.clone()], far_past());
        assert_eq!(starts.len(), 15);
        assert!(!starts.contains(&booked.start));
        // The neighbors survive.
        assert!(starts.contains(&Utc.with_ymd_and_hms(2026, 6, 1, 13, 30, 0).unwrap()));
        assert!(starts.contains(&booked.end));
    }

    #[test]
    fn test_longer_service_blocked_by_partial_overlap() {
        let mut s = schedule("America/New_York", 30);
        s.add_window(Weekday::Mon, Window::new(540, 1020)).unwrap();
        let monday = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        let booked = Utc.with_ymd_and_hms(2026, 6, 1, 14, 0, 0).unwrap()
            ..Utc.with_ymd_and_hms(2026, 6, 1, 14, 30, 0).unwrap();
        // A 60 minute service starting 13:30 UTC would run into the booking.
        let starts = provider_free_starts(&s, monday, 60, &[booked], far_past());
        assert!(!starts.contains(&Utc.with_ymd_and_hms(2026, 6, 1, 13, 30, 0).unwrap()));
        assert!(starts.contains(&Utc.with_ymd_and_hms(2026, 6, 1, 14, 30, 0).unwrap()));
    }

    #[test]
    fn test_spring_forward_gap_skipped() {
        // 2026-03-08 America/New_York: 02:00 to 03:00 local does not exist.
        let mut s = schedule("America/New_York", 30);
        s.add_window(Weekday::Sun, Window::new(60, 240)).unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 3, 8).unwrap();
        let starts = provider_free_starts(&s, date, 30, &[], far_past());
        let local: Vec<(u32, u32)> = starts
            .iter()
            .map(|s| {
                let l = s.with_timezone(&chrono_tz::America::New_York);
                (l.hour(), l.minute())
            })
            .collect();
        assert_eq!(local, vec![(1, 0), (1, 30), (3, 0), (3, 30)]);
        // 01:30 EST plus 30 minutes lands at 03:00 EDT, not in the gap.
        let one_thirty = starts[1];
        assert_eq!(
            (one_thirty + Duration::minutes(30)).with_timezone(&chrono_tz::America::New_York),
            starts[2].with_timezone(&chrono_tz::America::New_York)
        );
    }

    #[test]
    fn test_fall_back_fold_takes_earlier_instant() {
        // 2026-11-01 America/New_York: 01:00 to 02:00 local happens twice.
        let date = NaiveDate::from_ymd_opt(2026, 11, 1).unwrap();
        let dt = localize_minute(date, 90, chrono_tz::America::New_York).unwrap();
        // First occurrence is still EDT, UTC-4.
        assert_eq!(
            dt.with_timezone(&Utc),
            Utc.with_ymd_and_hms(2026, 11, 1, 5, 30, 0).unwrap()
        );
        // Resolving twice gives the same instant.
        assert_eq!(
            localize_minute(date, 90, chrono_tz::America::New_York),
            Some(dt)
        );
    }

    #[test]
    fn test_past_starts_dropped() {
        let mut s = schedule("America/New_York", 30);
        s.add_window(Weekday::Mon, Window::new(540, 1020)).unwrap();
        let monday = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        // Noon local, 16:00 UTC.
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 16, 0, 0).unwrap();
        let starts = provider_free_starts(&s, monday, 30, &[], now);
        assert_eq!(starts.len(), 10);
        assert!(starts.iter().all(|s| *s >= now));
    }

    #[test]
    fn test_merge_counts_open_providers() {
        let a = Utc.with_ymd_and_hms(2026, 6, 1, 13, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2026, 6, 1, 13, 30, 0).unwrap();
        let per_provider = vec![
            (ProviderId::from(1), vec![a, b]),
            (ProviderId::from(2), vec![a]),
        ];
        let slots = merge(&per_provider, chrono_tz::America::New_York);
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].open_providers, 2);
        assert_eq!(slots[1].open_providers, 1);
        assert_eq!(slots[0].start_utc, a);
        assert_eq!((slots[0].start.hour(), slots[0].start.minute()), (9, 0));
        assert_eq!(slots[0].start.weekday(), Weekday::Mon);
    }

    #[test]
    fn test_midnight_spanning_window_end() {
        let mut s = schedule("Asia/Tokyo", 60);
        s.add_window(Weekday::Fri, Window::new(1320, 1440)).unwrap();
        let friday = NaiveDate::from_ymd_opt(2026, 6, 5).unwrap();
        let starts = provider_free_starts(&s, friday, 60, &[], far_past());
        assert_eq!(starts.len(), 2);
        let last = starts[1].with_timezone(&chrono_tz::Asia::Tokyo);
        assert_eq!((last.hour(), last.minute()), (23, 0));
    }
}
