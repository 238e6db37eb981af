//! Fire-time computation for archive schedules.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Timelike, Utc};

use crate::config::ArchiveSchedule;

impl ArchiveSchedule {
    /// First fire time strictly after `now`.
    pub fn next_fire_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            ArchiveSchedule::Interval { every_ms } => {
                now + TimeDelta::milliseconds(i64::try_from(every_ms).unwrap_or(i64::MAX))
            }
            ArchiveSchedule::Hourly { minute } => {
                let this_hour = now
                    .date_naive()
                    .and_hms_opt(now.hour(), minute, 0)
                    .map(|naive| naive.and_utc());
                match this_hour {
                    Some(at) if at > now => at,
                    Some(at) => at + TimeDelta::hours(1),
                    None => now + TimeDelta::hours(1),
                }
            }
        }
    }

    /// Next fire time for the timer loop. `previous` is the fire the loop last
    /// woke for; a wake that lands just before it on the wall clock must not
    /// yield the same instant again.
    pub fn next_fire(
        &self,
        now: DateTime<Utc>,
        previous: Option<DateTime<Utc>>,
    ) -> DateTime<Utc> {
        let next = self.next_fire_after(now);
        match previous {
            Some(prev) if next <= prev => self.next_fire_after(prev),
            _ => next,
        }
    }
}

/// Sleep length from `now` until `fire`, zero if it already passed.
pub fn until(fire: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (fire - now).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use chrono::TimeZone;

    use super::*;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 31, h, m, s).unwrap()
    }

    #[test]
    fn hourly_fires_later_this_hour() {
        let s = ArchiveSchedule::Hourly { minute: 30 };
        assert_eq!(s.next_fire_after(at(10, 12, 0)), at(10, 30, 0));
    }

    #[test]
    fn hourly_rolls_to_next_hour_when_passed_or_equal() {
        let s = ArchiveSchedule::Hourly { minute: 30 };
        assert_eq!(s.next_fire_after(at(10, 30, 0)), at(11, 30, 0));
        assert_eq!(s.next_fire_after(at(10, 45, 10)), at(11, 30, 0));
    }

    #[test]
    fn hourly_rolls_over_midnight() {
        let s = ArchiveSchedule::Hourly { minute: 0 };
        let next = s.next_fire_after(at(23, 59, 59));
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn interval_adds_period() {
        let s = ArchiveSchedule::Interval { every_ms: 90_000 };
        assert_eq!(s.next_fire_after(at(1, 0, 0)), at(1, 1, 30));
        assert_eq!(until(s.next_fire(at(1, 0, 0), None), at(1, 0, 0)), Duration::from_secs(90));
    }

    #[test]
    fn early_wake_does_not_refire_same_slot() {
        let s = ArchiveSchedule::Hourly { minute: 30 };
        let fired = at(10, 30, 0);
        let woke = fired - TimeDelta::microseconds(7);
        assert_eq!(s.next_fire_after(woke), fired);
        assert_eq!(s.next_fire(woke, Some(fired)), at(11, 30, 0));
    }

    #[test]
    fn late_wake_moves_on_from_now() {
        let s = ArchiveSchedule::Hourly { minute: 30 };
        assert_eq!(s.next_fire(at(12, 45, 0), Some(at(10, 30, 0))), at(13, 30, 0));
        assert_eq!(until(at(10, 30, 0), at(10, 31, 0)), Duration::ZERO);
    }
}
