//! Censoring dates and the pre/during/post windows hung off an episode.
//!
//! Everything here is a pure function of its inputs; the cohort definitions
//! only differ in the parameter values they pass in.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The last date a patient's records are considered complete: the earliest of
/// deregistration, death and the end of protocol follow-up
/// (`episode_end + follow_up_days`).
///
/// A missing registration end date means the registration was still open, and
/// a missing date of death means the patient was alive at extract time; both
/// are treated as unbounded, so the result is never missing.
pub fn censoring_date(
    registration_end: Option<NaiveDate>,
    date_of_death: Option<NaiveDate>,
    episode_end: NaiveDate,
    follow_up_days: i64,
) -> NaiveDate {
    let mut censor = episode_end + Duration::days(follow_up_days);
    if let Some(reg_end) = registration_end {
        censor = censor.min(reg_end);
    }
    if let Some(dod) = date_of_death {
        censor = censor.min(dod);
    }
    censor
}

/// An inclusive date interval, or explicitly empty.
///
/// Event attribution is "on or between": both endpoints count. Construction
/// clamps rather than inverts, so `end < start` can never be observed;
/// consumers treat an empty window as "no qualifying events", never as an
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    bounds: Option<(NaiveDate, NaiveDate)>,
}

impl TimeWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        if end < start {
            Self::empty()
        } else {
            TimeWindow {
                bounds: Some((start, end)),
            }
        }
    }

    pub fn empty() -> Self {
        TimeWindow { bounds: None }
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_none()
    }

    pub fn start(&self) -> Option<NaiveDate> {
        self.bounds.map(|(start, _)| start)
    }

    pub fn end(&self) -> Option<NaiveDate> {
        self.bounds.map(|(_, end)| end)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        match self.bounds {
            Some((start, end)) => date >= start && date <= end,
            None => false,
        }
    }

    /// Clamp the window so it never extends past `latest`. Collapses to empty
    /// if `latest` precedes the whole window.
    pub fn clip_to(&self, latest: NaiveDate) -> Self {
        match self.bounds {
            Some((start, _)) if latest < start => Self::empty(),
            Some((start, end)) => Self::new(start, end.min(latest)),
            None => Self::empty(),
        }
    }

    /// Number of days covered (inclusive), 0 if empty.
    pub fn len_days(&self) -> i64 {
        match self.bounds {
            Some((start, end)) => (end - start).num_days() + 1,
            None => 0,
        }
    }

    /// Day offset of `date` from the window start, if the date falls inside.
    ///
    /// This is the coordinate transform used by the weekly measures: every
    /// patient's real dates map into the same relative offset space
    /// (0 = window start), so interval bucketing no longer depends on the
    /// calendar.
    pub fn days_into(&self, date: NaiveDate) -> Option<i64> {
        match self.bounds {
            Some((start, end)) if date >= start && date <= end => Some((date - start).num_days()),
            _ => None,
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.bounds {
            Some((start, end)) => write!(f, "{} to {}", start, end),
            None => f.write_str("empty"),
        }
    }
}

/// Window lengths for one cohort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowParams {
    /// Length of the pre-wait window, ending the day before the episode start.
    pub pre_days: i64,
    /// Days after the episode end at which the post window opens.
    pub post_offset_days: i64,
    /// Length of the post window from its opening, before censoring.
    pub post_span_days: i64,
}

/// The three windows used to attribute prescribing to a phase of the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Windows {
    pub pre: TimeWindow,
    pub during: TimeWindow,
    pub post: TimeWindow,
}

/// Build the pre/during/post windows for an episode, clipped by censoring.
///
/// * pre: `[start - pre_days, start - 1]`
/// * during: `[start, min(censor, end)]`
/// * post: `[end + post_offset, min(end + post_offset + post_span, censor)]`,
///   empty unless the patient is still under observation after the episode
///   ends (`censor > end`).
pub fn build_windows(
    episode_start: NaiveDate,
    episode_end: NaiveDate,
    censor: NaiveDate,
    params: &WindowParams,
) -> Windows {
    let pre = TimeWindow::new(
        episode_start - Duration::days(params.pre_days),
        episode_start - Duration::days(1),
    )
    .clip_to(censor);

    let during = TimeWindow::new(episode_start, episode_end).clip_to(censor);

    let post = if censor > episode_end {
        let open = episode_end + Duration::days(params.post_offset_days);
        TimeWindow::new(open, open + Duration::days(params.post_span_days)).clip_to(censor)
    } else {
        TimeWindow::empty()
    };

    Windows { pre, during, post }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    const PARAMS: WindowParams = WindowParams {
        pre_days: 182,
        post_offset_days: 1,
        post_span_days: 181,
    };

    #[test]
    fn censoring_prefers_earliest() {
        // reg end missing -> min(death, end + 182d)
        let censor = censoring_date(None, Some(date(2022, 1, 1)), date(2021, 10, 1), 182);
        assert_eq!(censor, date(2022, 1, 1));
    }

    #[test]
    fn censoring_never_missing() {
        let censor = censoring_date(None, None, date(2021, 10, 1), 182);
        assert_eq!(censor, date(2022, 4, 1));
    }

    #[test]
    fn censoring_is_monotonic() {
        let base = censoring_date(
            Some(date(2021, 12, 1)),
            Some(date(2021, 11, 1)),
            date(2021, 10, 1),
            182,
        );
        // Moving any one input later never moves the result earlier.
        for censor in [
            censoring_date(
                Some(date(2022, 6, 1)),
                Some(date(2021, 11, 1)),
                date(2021, 10, 1),
                182,
            ),
            censoring_date(
                Some(date(2021, 12, 1)),
                Some(date(2022, 6, 1)),
                date(2021, 10, 1),
                182,
            ),
            censoring_date(
                Some(date(2021, 12, 1)),
                Some(date(2021, 11, 1)),
                date(2021, 12, 25),
                182,
            ),
        ] {
            assert!(censor >= base);
        }
    }

    #[test]
    fn pre_window_dates() {
        // 182-day pre window for a 2021-06-01 start, ending the day before.
        let windows = build_windows(date(2021, 6, 1), date(2021, 9, 1), date(2022, 3, 2), &PARAMS);
        assert_eq!(windows.pre.start(), Some(date(2020, 12, 1)));
        assert_eq!(windows.pre.end(), Some(date(2021, 5, 31)));
        assert_eq!(windows.pre.len_days(), 182);
    }

    #[test]
    fn during_clamps_and_post_empties_when_censored_early() {
        let windows = build_windows(date(2021, 6, 1), date(2021, 9, 1), date(2021, 8, 1), &PARAMS);
        assert_eq!(windows.during.start(), Some(date(2021, 6, 1)));
        assert_eq!(windows.during.end(), Some(date(2021, 8, 1)));
        assert!(windows.post.is_empty());
    }

    #[test]
    fn during_empty_if_censored_before_start() {
        let windows = build_windows(date(2021, 6, 1), date(2021, 9, 1), date(2021, 5, 1), &PARAMS);
        assert!(windows.during.is_empty());
        assert!(windows.post.is_empty());
    }

    #[test]
    fn windows_never_invert() {
        let starts = [date(2021, 6, 1), date(2021, 6, 2)];
        let censors = [date(2021, 1, 1), date(2021, 7, 1), date(2023, 1, 1)];
        for start in starts {
            for censor in censors {
                let windows = build_windows(start, date(2021, 9, 1), censor, &PARAMS);
                for window in [windows.pre, windows.during, windows.post] {
                    if let (Some(start), Some(end)) = (window.start(), window.end()) {
                        assert!(end >= start);
                    }
                }
            }
        }
    }

    #[test]
    fn post_window_shape() {
        // Ortho protocol: opens 91 days after the clock stop, runs to day 273.
        let params = WindowParams {
            pre_days: 182,
            post_offset_days: 91,
            post_span_days: 182,
        };
        let windows = build_windows(
            date(2021, 6, 1),
            date(2021, 9, 1),
            date(2022, 9, 1),
            &params,
        );
        assert_eq!(windows.post.start(), Some(date(2021, 12, 1)));
        assert_eq!(windows.post.end(), Some(date(2022, 6, 1)));
    }

    #[test]
    fn offset_transform() {
        let window = TimeWindow::new(date(2021, 6, 1), date(2021, 9, 1));
        assert_eq!(window.days_into(date(2021, 6, 1)), Some(0));
        assert_eq!(window.days_into(date(2021, 6, 8)), Some(7));
        assert_eq!(window.days_into(date(2021, 5, 31)), None);
    }
}
