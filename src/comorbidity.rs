//! Comorbidity flags at the episode start date.
//!
//! Each flag is "any event with a code in the list within the lookback
//! window". The code system varies by list (the older condition lists are
//! CTV3, the newer ones SNOMED CT), and the lookback length and bounds vary
//! by cohort, so both are parameters rather than baked in.

use crate::{
    codelists::{Codelist, StudyCodelists},
    events::{ClinicalEvents, CodeSystem},
    followup::TimeWindow,
    PatientId, Result,
};
use anyhow::bail;
use chrono::{Duration, NaiveDate};

/// Inclusive lookback `[on - days, on]`.
pub fn lookback_days(on: NaiveDate, days: i64) -> TimeWindow {
    TimeWindow::new(on - Duration::days(days), on)
}

/// Inclusive lookback `[on - years, on]` in calendar years (29 Feb anchors
/// fall back to 28 Feb).
pub fn lookback_years(on: NaiveDate, years: i32) -> TimeWindow {
    TimeWindow::new(subtract_years(on, years), on)
}

/// Exclusive lookback `(on - years, on)`, matching "between but not on".
pub fn lookback_years_exclusive(on: NaiveDate, years: i32) -> TimeWindow {
    TimeWindow::new(
        subtract_years(on, years) + Duration::days(1),
        on - Duration::days(1),
    )
}

fn subtract_years(date: NaiveDate, years: i32) -> NaiveDate {
    use chrono::Datelike;
    NaiveDate::from_ymd_opt(date.year() - years, date.month(), date.day())
        .unwrap_or_else(|| NaiveDate::from_ymd_opt(date.year() - years, 2, 28).unwrap())
}

struct Entry {
    name: &'static str,
    system: CodeSystem,
    codes: Codelist,
}

/// The comorbidity lists one cohort reports, in output-column order.
pub struct Comorbidities {
    cancer: Codelist,
    entries: Vec<Entry>,
}

impl Comorbidities {
    /// Build from the study codelists, keeping only the named conditions.
    /// Each cohort reports a different subset, so the list is explicit.
    pub fn subset(codelists: &StudyCodelists, names: &[&'static str]) -> Result<Self> {
        let mut entries = Vec::with_capacity(names.len());
        for &name in names {
            let (system, codes) = match name {
                "diabetes" => (CodeSystem::Ctv3, &codelists.diabetes),
                "cardiac" => (CodeSystem::Ctv3, &codelists.cardiac),
                "copd" => (CodeSystem::Ctv3, &codelists.copd),
                "liver" => (CodeSystem::Ctv3, &codelists.liver),
                "osteoarthritis" | "oa" => (CodeSystem::Ctv3, &codelists.osteoarthritis),
                "ra" => (CodeSystem::Ctv3, &codelists.ra),
                "ckd" => (CodeSystem::Snomed, &codelists.ckd),
                "depression" => (CodeSystem::Snomed, &codelists.depression),
                "anxiety" => (CodeSystem::Snomed, &codelists.anxiety),
                "depress_or_gad" => (CodeSystem::Snomed, &codelists.depress_or_gad),
                "smi" => (CodeSystem::Snomed, &codelists.smi),
                "oud" => (CodeSystem::Snomed, &codelists.oud),
                _ => bail!("unknown comorbidity \"{}\"", name),
            };
            entries.push(Entry {
                name,
                system,
                codes: codes.clone(),
            });
        }
        Ok(Comorbidities {
            cancer: codelists.cancer.clone(),
            entries,
        })
    }

    /// Cancer history, tested over its own (longer) lookback.
    pub fn cancer(&self, events: &ClinicalEvents, id: PatientId, window: &TimeWindow) -> bool {
        events.any_in_window(id, CodeSystem::Snomed, &self.cancer, window)
    }

    /// One (name, present) pair per configured condition, for dataset columns.
    pub fn flags(
        &self,
        events: &ClinicalEvents,
        id: PatientId,
        window: &TimeWindow,
    ) -> Vec<(&'static str, bool)> {
        self.entries
            .iter()
            .map(|entry| {
                (
                    entry.name,
                    events.any_in_window(id, entry.system, &entry.codes, window),
                )
            })
            .collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|entry| entry.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ClinicalEvent;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn lookback_bounds() {
        let on = date(2021, 6, 1);
        let incl = lookback_years(on, 5);
        assert_eq!(incl.start(), Some(date(2016, 6, 1)));
        assert_eq!(incl.end(), Some(on));
        let excl = lookback_years_exclusive(on, 2);
        assert_eq!(excl.start(), Some(date(2019, 6, 2)));
        assert_eq!(excl.end(), Some(date(2021, 5, 31)));
        let days = lookback_days(on, 182);
        assert_eq!(days.start(), Some(date(2020, 12, 1)));
    }

    #[test]
    fn code_system_is_respected() {
        let codelists = test_codelists();
        let comorbs = Comorbidities::subset(&codelists, &["diabetes", "ckd"]).unwrap();
        // The diabetes code appears as a SNOMED code only, so the CTV3
        // diabetes list must not match it.
        let events: ClinicalEvents = vec![ClinicalEvent {
            patient_id: 1,
            date: date(2021, 1, 1),
            snomed_code: Some("X10".into()),
            ctv3_code: None,
        }]
        .into_iter()
        .collect();
        let window = lookback_days(date(2021, 6, 1), 182);
        let flags = comorbs.flags(&events, 1, &window);
        assert_eq!(flags, vec![("diabetes", false), ("ckd", false)]);
    }

    #[test]
    fn flag_found_in_window() {
        let codelists = test_codelists();
        let comorbs = Comorbidities::subset(&codelists, &["diabetes"]).unwrap();
        let events: ClinicalEvents = vec![ClinicalEvent {
            patient_id: 1,
            date: date(2021, 3, 1),
            snomed_code: None,
            ctv3_code: Some("X10".into()),
        }]
        .into_iter()
        .collect();
        let window = lookback_days(date(2021, 6, 1), 182);
        assert_eq!(comorbs.flags(&events, 1, &window), vec![("diabetes", true)]);
        // Outside the lookback: not flagged.
        let early = lookback_days(date(2020, 6, 1), 182);
        assert_eq!(comorbs.flags(&events, 1, &early), vec![("diabetes", false)]);
    }

    fn test_codelists() -> StudyCodelists {
        StudyCodelists::for_tests(
            Codelist::new(["X10"]),  // diabetes (ctv3)
            Codelist::new(["C99"]),  // cancer (snomed)
        )
    }
}
