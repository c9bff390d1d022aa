//! Fixed quota windows aligned to the server's wall clock.
//!
//! Labels and reset boundaries are computed from local time at decision
//! time; nothing is scheduled. Weekly windows expire at Sunday midnight
//! while the label uses the ISO (Monday-based) week number, matching the
//! inherited deployment behavior.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Datelike, Days, Local, LocalResult, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};

/// Calendar window a quota counter lives in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuotaPeriod {
    #[default]
    #[serde(alias = "daily")]
    Daily,
    #[serde(alias = "weekly")]
    Weekly,
    #[serde(alias = "monthly")]
    Monthly,
}

impl fmt::Display for QuotaPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuotaPeriod::Daily => write!(f, "Daily"),
            QuotaPeriod::Weekly => write!(f, "Weekly"),
            QuotaPeriod::Monthly => write!(f, "Monthly"),
        }
    }
}

impl QuotaPeriod {
    /// Store-key label for the window containing `now`:
    /// `YYYY-MM-DD`, `YYYY-Www` (ISO week), or `YYYY-MM`.
    pub fn label(&self, now: DateTime<Local>) -> String {
        match self {
            QuotaPeriod::Daily => now.format("%Y-%m-%d").to_string(),
            QuotaPeriod::Weekly => {
                let week = now.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
            QuotaPeriod::Monthly => now.format("%Y-%m").to_string(),
        }
    }

    /// Instant the current window ends: next local midnight, the coming
    /// Sunday midnight, or midnight on the first of next month. Always
    /// strictly after `now`.
    pub fn next_reset(&self, now: DateTime<Local>) -> DateTime<Local> {
        let today = now.date_naive();
        let boundary = match self {
            QuotaPeriod::Daily => today + Days::new(1),
            QuotaPeriod::Weekly => {
                let mut days_ahead = (7 - now.weekday().num_days_from_sunday()) % 7;
                if days_ahead == 0 {
                    days_ahead = 7;
                }
                today + Days::new(u64::from(days_ahead))
            }
            QuotaPeriod::Monthly => first_of_next_month(today),
        };
        local_midnight(boundary)
    }

    /// Nominal window length, used for key TTL sanity bounds.
    pub fn approx_window(&self) -> Duration {
        match self {
            QuotaPeriod::Daily => Duration::from_secs(24 * 3600),
            QuotaPeriod::Weekly => Duration::from_secs(7 * 24 * 3600),
            QuotaPeriod::Monthly => Duration::from_secs(30 * 24 * 3600),
        }
    }
}

fn first_of_next_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).expect("first of month is a valid date")
}

fn local_midnight(date: NaiveDate) -> DateTime<Local> {
    let midnight = date.and_hms_opt(0, 0, 0).expect("midnight is a valid time");
    match midnight.and_local_timezone(Local) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => earliest,
        // DST jump can skip midnight; the window then ends an hour later.
        LocalResult::None => {
            let later = date.and_hms_opt(1, 0, 0).expect("valid time");
            Local
                .from_local_datetime(&later)
                .earliest()
                .unwrap_or_else(Local::now)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, hour: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(y, m, d, hour, 30, 0)
            .single()
            .expect("unambiguous local time")
    }

    #[test]
    fn daily_label_is_calendar_date() {
        assert_eq!(QuotaPeriod::Daily.label(at(2025, 6, 15, 12)), "2025-06-15");
    }

    #[test]
    fn weekly_label_uses_iso_week() {
        // 2025-06-15 is a Sunday, still inside ISO week 24 (Jun 9 - Jun 15).
        assert_eq!(QuotaPeriod::Weekly.label(at(2025, 6, 15, 12)), "2025-W24");
        // The following Monday starts ISO week 25.
        assert_eq!(QuotaPeriod::Weekly.label(at(2025, 6, 16, 12)), "2025-W25");
    }

    #[test]
    fn monthly_label_is_year_month() {
        assert_eq!(QuotaPeriod::Monthly.label(at(2025, 6, 15, 12)), "2025-06");
    }

    #[test]
    fn label_is_stable_within_a_window() {
        let morning = at(2025, 6, 15, 1);
        let evening = at(2025, 6, 15, 23);
        for period in [QuotaPeriod::Daily, QuotaPeriod::Weekly, QuotaPeriod::Monthly] {
            assert_eq!(period.label(morning), period.label(evening));
        }
    }

    #[test]
    fn daily_reset_is_next_midnight() {
        let reset = QuotaPeriod::Daily.next_reset(at(2025, 6, 15, 12));
        assert_eq!(reset.date_naive(), NaiveDate::from_ymd_opt(2025, 6, 16).unwrap());
        assert_eq!(reset.time(), chrono::NaiveTime::MIN);
    }

    #[test]
    fn weekly_reset_lands_on_sunday() {
        // Monday 2025-06-16: six days until Sunday 2025-06-22.
        let reset = QuotaPeriod::Weekly.next_reset(at(2025, 6, 16, 12));
        assert_eq!(reset.date_naive(), NaiveDate::from_ymd_opt(2025, 6, 22).unwrap());
    }

    #[test]
    fn weekly_reset_on_sunday_is_a_full_week_out() {
        // On Sunday itself the zero-day distance maps to seven so the reset
        // stays strictly in the future.
        let reset = QuotaPeriod::Weekly.next_reset(at(2025, 6, 15, 12));
        assert_eq!(reset.date_naive(), NaiveDate::from_ymd_opt(2025, 6, 22).unwrap());
    }

    #[test]
    fn monthly_reset_is_first_of_next_month() {
        let reset = QuotaPeriod::Monthly.next_reset(at(2025, 6, 15, 12));
        assert_eq!(reset.date_naive(), NaiveDate::from_ymd_opt(2025, 7, 1).unwrap());
    }

    #[test]
    fn monthly_reset_rolls_over_december() {
        let reset = QuotaPeriod::Monthly.next_reset(at(2025, 12, 31, 23));
        assert_eq!(reset.date_naive(), NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
    }

    #[test]
    fn deserializes_capitalized_and_lowercase_names() {
        for (raw, expected) in [
            ("Daily", QuotaPeriod::Daily),
            ("weekly", QuotaPeriod::Weekly),
            ("Monthly", QuotaPeriod::Monthly),
        ] {
            let parsed: QuotaPeriod = serde_yaml::from_str(raw).unwrap();
            assert_eq!(parsed, expected);
        }
        assert!(serde_yaml::from_str::<QuotaPeriod>("Yearly").is_err());
    }

    #[test]
    fn reset_is_strictly_in_the_future() {
        let now = at(2025, 6, 15, 0);
        for period in [QuotaPeriod::Daily, QuotaPeriod::Weekly, QuotaPeriod::Monthly] {
            assert!(period.next_reset(now) > now, "{period} reset not in future");
        }
    }
}
