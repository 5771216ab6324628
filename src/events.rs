//! Event-level tables: prescriptions, coded clinical events and admissions.
//!
//! Attribution of an event to a window is "on or between" — inclusive at both
//! ends — everywhere, whatever the drug class or code system.

use crate::{
    codelists::{CategorisedCodelist, Codelist},
    followup::TimeWindow,
    load, load_orig, save,
    util::{iso_date, optional_string},
    ArcStr, PatientId, Result,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, ops::Deref, path::Path, sync::Arc};

#[derive(Debug, Clone, Deserialize)]
struct MedicationEventRaw {
    patient_id: PatientId,
    #[serde(deserialize_with = "iso_date")]
    date: NaiveDate,
    dmd_code: ArcStr,
}

/// One prescription issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicationEvent {
    pub patient_id: PatientId,
    pub date: NaiveDate,
    pub dmd_code: ArcStr,
}

impl From<MedicationEventRaw> for MedicationEvent {
    fn from(from: MedicationEventRaw) -> Self {
        Self {
            patient_id: from.patient_id,
            date: from.date,
            dmd_code: from.dmd_code,
        }
    }
}

/// The parsed prescriptions table, indexed by patient.
pub struct Medications {
    els: Arc<Vec<MedicationEvent>>,
    id_idx: BTreeMap<PatientId, Vec<usize>>,
}

impl Medications {
    pub fn load_orig(path: impl AsRef<Path>) -> Result<Self> {
        let raw: Vec<MedicationEventRaw> = load_orig(path)?;
        Ok(Self::new(raw.into_iter().map(Into::into).collect()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(load(path)?))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result {
        Ok(save(&self.els, path)?)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MedicationEvent> + '_ {
        self.els.iter()
    }

    pub fn for_patient(
        &self,
        id: PatientId,
    ) -> impl Iterator<Item = &MedicationEvent> + Clone + '_ {
        let idxs = self.id_idx.get(&id).map(Vec::as_slice).unwrap_or(&[]);
        idxs.iter().map(|idx| &self.els[*idx])
    }

    /// Keep only prescriptions for codes in the codelist.
    pub fn filter_by_codelist(&self, codelist: &Codelist) -> Self {
        Self::new(
            self.els
                .iter()
                .filter(|evt| codelist.contains(&evt.dmd_code))
                .cloned()
                .collect(),
        )
    }

    /// Number of prescriptions of the given class attributed to the window.
    pub fn count_in_window(&self, id: PatientId, codelist: &Codelist, window: &TimeWindow) -> u32 {
        self.for_patient(id)
            .filter(|evt| codelist.contains(&evt.dmd_code) && window.contains(evt.date))
            .count() as u32
    }

    pub fn any_in_window(&self, id: PatientId, codelist: &Codelist, window: &TimeWindow) -> bool {
        self.for_patient(id)
            .any(|evt| codelist.contains(&evt.dmd_code) && window.contains(evt.date))
    }

    /// Date of the earliest prescription of the class within the window.
    pub fn first_in_window(
        &self,
        id: PatientId,
        codelist: &Codelist,
        window: &TimeWindow,
    ) -> Option<NaiveDate> {
        self.for_patient(id)
            .filter(|evt| codelist.contains(&evt.dmd_code) && window.contains(evt.date))
            .map(|evt| evt.date)
            .min()
    }

    fn new(els: Vec<MedicationEvent>) -> Self {
        let mut this = Medications {
            els: els.into(),
            id_idx: BTreeMap::new(),
        };
        this.rebuild_index();
        this
    }

    fn rebuild_index(&mut self) {
        self.id_idx.clear();
        for (idx, el) in self.els.iter().enumerate() {
            self.id_idx.entry(el.patient_id).or_default().push(idx);
        }
    }
}

impl Deref for Medications {
    type Target = [MedicationEvent];
    fn deref(&self) -> &Self::Target {
        &*self.els
    }
}

impl FromIterator<MedicationEvent> for Medications {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = MedicationEvent>,
    {
        Self::new(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ClinicalEventRaw {
    patient_id: PatientId,
    #[serde(deserialize_with = "iso_date")]
    date: NaiveDate,
    #[serde(rename = "snomedct_code", deserialize_with = "optional_string")]
    snomed_code: Option<ArcStr>,
    #[serde(rename = "ctv3_code", deserialize_with = "optional_string")]
    ctv3_code: Option<ArcStr>,
}

/// One coded primary-care event. Rows carry a SNOMED CT code, a CTV3 code or
/// both; which one a codelist matches against depends on the list's system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClinicalEvent {
    pub patient_id: PatientId,
    pub date: NaiveDate,
    pub snomed_code: Option<ArcStr>,
    pub ctv3_code: Option<ArcStr>,
}

impl From<ClinicalEventRaw> for ClinicalEvent {
    fn from(from: ClinicalEventRaw) -> Self {
        Self {
            patient_id: from.patient_id,
            date: from.date,
            snomed_code: from.snomed_code,
            ctv3_code: from.ctv3_code,
        }
    }
}

/// Which code column of the clinical events table a codelist matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeSystem {
    Snomed,
    Ctv3,
}

impl ClinicalEvent {
    pub fn code(&self, system: CodeSystem) -> Option<&ArcStr> {
        match system {
            CodeSystem::Snomed => self.snomed_code.as_ref(),
            CodeSystem::Ctv3 => self.ctv3_code.as_ref(),
        }
    }

    pub fn matches(&self, system: CodeSystem, codelist: &Codelist) -> bool {
        self.code(system).map_or(false, |c| codelist.contains(c))
    }
}

/// The parsed clinical events table, indexed by patient.
pub struct ClinicalEvents {
    els: Arc<Vec<ClinicalEvent>>,
    id_idx: BTreeMap<PatientId, Vec<usize>>,
}

impl ClinicalEvents {
    pub fn load_orig(path: impl AsRef<Path>) -> Result<Self> {
        let raw: Vec<ClinicalEventRaw> = load_orig(path)?;
        Ok(Self::new(raw.into_iter().map(Into::into).collect()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(load(path)?))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result {
        Ok(save(&self.els, path)?)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClinicalEvent> + '_ {
        self.els.iter()
    }

    pub fn for_patient(&self, id: PatientId) -> impl Iterator<Item = &ClinicalEvent> + Clone + '_ {
        let idxs = self.id_idx.get(&id).map(Vec::as_slice).unwrap_or(&[]);
        idxs.iter().map(|idx| &self.els[*idx])
    }

    pub fn any_in_window(
        &self,
        id: PatientId,
        system: CodeSystem,
        codelist: &Codelist,
        window: &TimeWindow,
    ) -> bool {
        self.for_patient(id)
            .any(|evt| evt.matches(system, codelist) && window.contains(evt.date))
    }

    /// Category of the patient's most recent event matching the categorised
    /// list, on or before `date` (how ethnicity is derived).
    pub fn last_category_on_or_before(
        &self,
        id: PatientId,
        codelist: &CategorisedCodelist,
        date: NaiveDate,
    ) -> Option<ArcStr> {
        self.for_patient(id)
            .filter(|evt| {
                evt.date <= date
                    && evt
                        .snomed_code
                        .as_ref()
                        .map_or(false, |c| codelist.contains(c))
            })
            .max_by_key(|evt| evt.date)
            .and_then(|evt| {
                evt.snomed_code
                    .as_ref()
                    .and_then(|c| codelist.category(c))
                    .cloned()
            })
    }

    fn new(els: Vec<ClinicalEvent>) -> Self {
        let mut this = ClinicalEvents {
            els: els.into(),
            id_idx: BTreeMap::new(),
        };
        this.rebuild_index();
        this
    }

    fn rebuild_index(&mut self) {
        self.id_idx.clear();
        for (idx, el) in self.els.iter().enumerate() {
            self.id_idx.entry(el.patient_id).or_default().push(idx);
        }
    }
}

impl Deref for ClinicalEvents {
    type Target = [ClinicalEvent];
    fn deref(&self) -> &Self::Target {
        &*self.els
    }
}

impl FromIterator<ClinicalEvent> for ClinicalEvents {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = ClinicalEvent>,
    {
        Self::new(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct AdmissionRaw {
    patient_id: PatientId,
    #[serde(deserialize_with = "iso_date")]
    admission_date: NaiveDate,
    #[serde(rename = "spell_core_hrg_sus", deserialize_with = "optional_string")]
    hrg_code: Option<ArcStr>,
}

/// One hospital admission (APCS spell) with its core HRG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Admission {
    pub patient_id: PatientId,
    pub admission_date: NaiveDate,
    pub hrg_code: Option<ArcStr>,
}

impl From<AdmissionRaw> for Admission {
    fn from(from: AdmissionRaw) -> Self {
        Self {
            patient_id: from.patient_id,
            admission_date: from.admission_date,
            hrg_code: from.hrg_code,
        }
    }
}

/// The parsed admissions table, indexed by patient.
pub struct Admissions {
    els: Arc<Vec<Admission>>,
    id_idx: BTreeMap<PatientId, Vec<usize>>,
}

impl Admissions {
    pub fn load_orig(path: impl AsRef<Path>) -> Result<Self> {
        let raw: Vec<AdmissionRaw> = load_orig(path)?;
        Ok(Self::new(raw.into_iter().map(Into::into).collect()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(load(path)?))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result {
        Ok(save(&self.els, path)?)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Admission> + '_ {
        self.els.iter()
    }

    pub fn for_patient(&self, id: PatientId) -> impl Iterator<Item = &Admission> + Clone + '_ {
        let idxs = self.id_idx.get(&id).map(Vec::as_slice).unwrap_or(&[]);
        idxs.iter().map(|idx| &self.els[*idx])
    }

    pub fn any_in_window(&self, id: PatientId, window: &TimeWindow) -> bool {
        self.for_patient(id)
            .any(|adm| window.contains(adm.admission_date))
    }

    /// The earliest admission in the window.
    pub fn first_in_window(&self, id: PatientId, window: &TimeWindow) -> Option<&Admission> {
        self.for_patient(id)
            .filter(|adm| window.contains(adm.admission_date))
            .min_by_key(|adm| adm.admission_date)
    }

    /// Any admission in the window whose core HRG is in the given group.
    pub fn any_with_hrg_in_window(
        &self,
        id: PatientId,
        hrg_codes: &[&str],
        window: &TimeWindow,
    ) -> bool {
        self.for_patient(id).any(|adm| {
            window.contains(adm.admission_date)
                && adm
                    .hrg_code
                    .as_ref()
                    .map_or(false, |hrg| hrg_codes.contains(&&**hrg))
        })
    }

    fn new(els: Vec<Admission>) -> Self {
        let mut this = Admissions {
            els: els.into(),
            id_idx: BTreeMap::new(),
        };
        this.rebuild_index();
        this
    }

    fn rebuild_index(&mut self) {
        self.id_idx.clear();
        for (idx, el) in self.els.iter().enumerate() {
            self.id_idx.entry(el.patient_id).or_default().push(idx);
        }
    }
}

impl Deref for Admissions {
    type Target = [Admission];
    fn deref(&self) -> &Self::Target {
        &*self.els
    }
}

impl FromIterator<Admission> for Admissions {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = Admission>,
    {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn rx(id: PatientId, on: NaiveDate) -> MedicationEvent {
        MedicationEvent {
            patient_id: id,
            date: on,
            dmd_code: "1234".into(),
        }
    }

    #[test]
    fn attribution_is_inclusive_at_both_ends() {
        let window = TimeWindow::new(date(2020, 12, 2), date(2021, 5, 31));
        let meds = Medications::new(vec![
            rx(1, date(2020, 12, 1)), // day before start: out
            rx(1, date(2020, 12, 2)), // on start: in
            rx(1, date(2021, 5, 31)), // on end: in
            rx(1, date(2021, 6, 1)),  // day after end: out
        ]);
        let opioids = Codelist::new(["1234"]);
        assert_eq!(meds.count_in_window(1, &opioids, &window), 2);
        assert!(meds.any_in_window(1, &opioids, &window));
        assert_eq!(
            meds.first_in_window(1, &opioids, &window),
            Some(date(2020, 12, 2))
        );
    }

    #[test]
    fn empty_window_attributes_nothing() {
        let meds = Medications::new(vec![rx(1, date(2021, 1, 1))]);
        let opioids = Codelist::new(["1234"]);
        let window = TimeWindow::empty();
        assert_eq!(meds.count_in_window(1, &opioids, &window), 0);
        assert!(!meds.any_in_window(1, &opioids, &window));
    }

    #[test]
    fn codelist_restricts_counts() {
        let window = TimeWindow::new(date(2021, 1, 1), date(2021, 12, 31));
        let mut other = rx(1, date(2021, 2, 1));
        other.dmd_code = "9999".into();
        let meds = Medications::new(vec![rx(1, date(2021, 2, 1)), other]);
        let opioids = Codelist::new(["1234"]);
        assert_eq!(meds.count_in_window(1, &opioids, &window), 1);
    }

    #[test]
    fn last_category_wins_by_date() {
        let eth = CategorisedCodelist::new([("111", "1"), ("444", "4")]);
        let events = ClinicalEvents::new(vec![
            ClinicalEvent {
                patient_id: 1,
                date: date(2019, 1, 1),
                snomed_code: Some("111".into()),
                ctv3_code: None,
            },
            ClinicalEvent {
                patient_id: 1,
                date: date(2020, 1, 1),
                snomed_code: Some("444".into()),
                ctv3_code: None,
            },
            // after the index date: ignored
            ClinicalEvent {
                patient_id: 1,
                date: date(2022, 1, 1),
                snomed_code: Some("111".into()),
                ctv3_code: None,
            },
        ]);
        let cat = events.last_category_on_or_before(1, &eth, date(2021, 6, 1));
        assert_eq!(cat.as_deref(), Some("4"));
    }
}
