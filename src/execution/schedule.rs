use chrono::{DateTime, Duration, Utc};

use crate::models::Timeframe;

/// Next epoch-aligned timeframe boundary strictly after `now`, plus `safety_delay`.
///
/// The delay gives the exchange time to publish the candle that just closed.
/// A boundary already passed (including the one `now` sits on) is skipped.
pub fn next_cycle_at(now: DateTime<Utc>, timeframe: Timeframe, safety_delay: Duration) -> DateTime<Utc> {
    let period_ms = timeframe.duration().num_milliseconds().max(1);
    let now_ms = now.timestamp_millis();
    let next_boundary_ms = (now_ms.div_euclid(period_ms) + 1) * period_ms;

    DateTime::from_timestamp_millis(next_boundary_ms).unwrap_or(now) + safety_delay
}

/// How long to sleep until the next cycle, never negative
pub fn until_next_cycle(now: DateTime<Utc>, timeframe: Timeframe, safety_delay: Duration) -> std::time::Duration {
    (next_cycle_at(now, timeframe, safety_delay) - now)
        .to_std()
        .unwrap_or(std::time::Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 9, h, m, s).unwrap()
    }

    #[test]
    fn test_mid_interval_rounds_up() {
        let next = next_cycle_at(at(10, 7, 31), Timeframe::Minutes(15), Duration::seconds(20));
        assert_eq!(next, at(10, 15, 20));
    }

    #[test]
    fn test_on_boundary_moves_to_next() {
        let next = next_cycle_at(at(10, 15, 0), Timeframe::Minutes(15), Duration::seconds(20));
        assert_eq!(next, at(10, 30, 20));
    }

    #[test]
    fn test_inside_safety_window_waits_for_following_boundary() {
        // 10:15:05 is past the 10:15 boundary; the next run is 10:30:20
        let next = next_cycle_at(at(10, 15, 5), Timeframe::Minutes(15), Duration::seconds(20));
        assert_eq!(next, at(10, 30, 20));
    }

    #[test]
    fn test_hourly_and_daily_alignment() {
        assert_eq!(
            next_cycle_at(at(10, 59, 59), Timeframe::Hours(1), Duration::zero()),
            at(11, 0, 0)
        );
        assert_eq!(
            next_cycle_at(at(23, 0, 0), Timeframe::Days(1), Duration::zero()),
            Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_until_next_cycle() {
        let wait = until_next_cycle(at(10, 14, 0), Timeframe::Minutes(15), Duration::seconds(20));
        assert_eq!(wait, std::time::Duration::from_secs(80));
    }
}
