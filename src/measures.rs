//! Weekly aggregate rates over patient-relative time.
//!
//! Calendar dates are useless for aggregating around the waiting list:
//! everyone's wait starts on a different day. So each phase of follow-up maps
//! events into a shared offset space first (day 0 = the phase anchor, via
//! [`crate::followup::TimeWindow::days_into`] or [`offsets_from`]) and the
//! series buckets those offsets into weeks. A patient only contributes to a
//! week's denominator while still under observation for the whole week, which
//! is how censoring and variable wait lengths are handled.

use crate::{ArcStr, Result};
use chrono::NaiveDate;
use serde::Serialize;
use std::{collections::BTreeMap, path::Path};

/// Week index of a day offset (offset 0-6 -> week 0).
pub fn week_of(offset_days: i64) -> i64 {
    offset_days.div_euclid(7)
}

/// Map event dates to day offsets from an anchor. Offsets can be negative;
/// the series ignores anything outside its week range.
pub fn offsets_from(anchor: NaiveDate, dates: impl Iterator<Item = NaiveDate>) -> Vec<i64> {
    dates.map(|date| (date - anchor).num_days()).collect()
}

#[derive(Debug, Default, Clone, Copy)]
struct Cell {
    numerator: u64,
    denominator: u64,
}

/// One output row: events per patient-week for one stratum of one measure.
#[derive(Debug, Clone, Serialize)]
pub struct MeasureRow {
    pub measure: ArcStr,
    pub group_by: ArcStr,
    pub group: ArcStr,
    pub week: i64,
    pub numerator: u64,
    pub denominator: u64,
}

/// Per-week numerator/denominator accumulation for one measure, optionally
/// stratified by a grouping variable.
pub struct WeeklySeries {
    name: ArcStr,
    group_by: ArcStr,
    weeks: i64,
    cells: BTreeMap<ArcStr, Vec<Cell>>,
}

impl WeeklySeries {
    /// An unstratified series (a single "overall" stratum).
    pub fn new(name: &str, weeks: i64) -> Self {
        Self::grouped(name, "overall", weeks)
    }

    pub fn grouped(name: &str, group_by: &str, weeks: i64) -> Self {
        WeeklySeries {
            name: name.into(),
            group_by: group_by.into(),
            weeks,
            cells: BTreeMap::new(),
        }
    }

    /// Fold one patient in. `offsets` are the patient's event day offsets in
    /// this phase's relative space; `active_until` is the day offset of their
    /// censoring (or other) cutoff. A week counts for the patient only if the
    /// cutoff falls after the week's last day, mirroring the "still on the
    /// list and under observation at the interval end" denominators.
    pub fn add_patient(&mut self, group: &str, offsets: &[i64], active_until: Option<i64>) {
        let weeks = self.weeks;
        let cells = self
            .cells
            .entry(group.into())
            .or_insert_with(|| vec![Cell::default(); weeks as usize]);
        for week in 0..weeks {
            let first_day = week * 7;
            let last_day = first_day + 6;
            if let Some(cutoff) = active_until {
                if cutoff <= last_day {
                    break;
                }
            }
            let cell = &mut cells[week as usize];
            cell.denominator += 1;
            cell.numerator += offsets
                .iter()
                .filter(|&&offset| offset >= first_day && offset <= last_day)
                .count() as u64;
        }
    }

    pub fn rows(&self) -> impl Iterator<Item = MeasureRow> + '_ {
        self.cells.iter().flat_map(move |(group, cells)| {
            cells.iter().enumerate().map(move |(week, cell)| MeasureRow {
                measure: self.name.clone(),
                group_by: self.group_by.clone(),
                group: group.clone(),
                week: week as i64,
                numerator: cell.numerator,
                denominator: cell.denominator,
            })
        })
    }
}

/// Write a set of series as one CSV, in definition order.
pub fn write_series_csv(path: impl AsRef<Path>, series: &[WeeklySeries]) -> Result {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    for s in series {
        for row in s.rows() {
            writer.serialize(&row)?;
        }
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn week_bucketing_is_inclusive() {
        let mut series = WeeklySeries::new("count_wait", 2);
        // Offsets 0 and 6 land in week 0; 7 lands in week 1; 14 is past the
        // series and ignored.
        series.add_patient("overall", &[0, 6, 7, 14], None);
        let rows: Vec<_> = series.rows().collect();
        assert_eq!(rows[0].numerator, 2);
        assert_eq!(rows[0].denominator, 1);
        assert_eq!(rows[1].numerator, 1);
    }

    #[test]
    fn censored_patient_leaves_denominator() {
        let mut series = WeeklySeries::new("count_wait", 3);
        // Cut off on day 13 (the last day of week 1): active for week 0 only.
        series.add_patient("overall", &[0, 8], Some(13));
        let rows: Vec<_> = series.rows().collect();
        assert_eq!((rows[0].numerator, rows[0].denominator), (1, 1));
        assert_eq!((rows[1].numerator, rows[1].denominator), (0, 0));
        assert_eq!((rows[2].numerator, rows[2].denominator), (0, 0));
    }

    #[test]
    fn strata_accumulate_separately() {
        let mut series = WeeklySeries::grouped("count_pre", "sex", 1);
        series.add_patient("female", &[0], None);
        series.add_patient("female", &[], None);
        series.add_patient("male", &[1, 2], None);
        let rows: Vec<_> = series.rows().collect();
        assert_eq!(rows.len(), 2);
        let female = rows.iter().find(|r| &*r.group == "female").unwrap();
        assert_eq!((female.numerator, female.denominator), (1, 2));
        let male = rows.iter().find(|r| &*r.group == "male").unwrap();
        assert_eq!((male.numerator, male.denominator), (2, 1));
    }

    #[test]
    fn offsets_and_weeks() {
        let anchor = NaiveDate::from_ymd_opt(2021, 6, 1).unwrap();
        let offsets = offsets_from(
            anchor,
            [
                NaiveDate::from_ymd_opt(2021, 6, 1).unwrap(),
                NaiveDate::from_ymd_opt(2021, 6, 8).unwrap(),
                NaiveDate::from_ymd_opt(2021, 5, 31).unwrap(),
            ]
            .into_iter(),
        );
        assert_eq!(offsets, vec![0, 7, -1]);
        assert_eq!(week_of(0), 0);
        assert_eq!(week_of(6), 0);
        assert_eq!(week_of(7), 1);
        assert_eq!(week_of(-1), -1);
    }
}
