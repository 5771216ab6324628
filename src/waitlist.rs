//! The national waiting-list extract and per-patient episode selection.
//!
//! Each row is one weekly snapshot of one referral-to-treatment (RTT) pathway.
//! A patient can appear many times (several pathways, several snapshots), so
//! every cohort reduces a patient's rows to a single canonical episode:
//! filter to valid rows, sort by an explicit key list, take the first or last.
//! The sort key order differs between cohorts on purpose; see [`SortKey`].

use crate::{
    load, load_orig, save,
    util::{opt_iso_date, optional_string},
    ArcStr, PatientId, Result,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet},
    ops::Deref,
    path::Path,
    sync::Arc,
};

#[derive(Debug, Clone, Deserialize)]
struct WaitingListRecordRaw {
    patient_id: PatientId,
    #[serde(rename = "pseudo_patient_pathway_identifier")]
    pathway_id: ArcStr,
    #[serde(rename = "pseudo_organisation_code_patient_pathway_identifier_issuer")]
    organisation_id: ArcStr,
    #[serde(rename = "pseudo_referral_identifier")]
    referral_id: ArcStr,
    #[serde(
        rename = "referral_to_treatment_period_start_date",
        deserialize_with = "opt_iso_date"
    )]
    period_start_date: Option<NaiveDate>,
    #[serde(
        rename = "referral_to_treatment_period_end_date",
        deserialize_with = "opt_iso_date"
    )]
    period_end_date: Option<NaiveDate>,
    #[serde(deserialize_with = "opt_iso_date")]
    week_ending_date: Option<NaiveDate>,
    #[serde(deserialize_with = "optional_string")]
    waiting_list_type: Option<ArcStr>,
    #[serde(
        rename = "activity_treatment_function_code",
        deserialize_with = "optional_string"
    )]
    treatment_function_code: Option<ArcStr>,
    #[serde(deserialize_with = "optional_string")]
    priority_type_code: Option<ArcStr>,
}

/// One row of a patient's waiting-list history.
///
/// Dates are optional because the clock-stops extract contains rows with
/// missing end dates and the open-pathways extract has no end date at all;
/// validity is enforced by [`RecordFilter`], not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitingListRecord {
    pub patient_id: PatientId,
    pub pathway_id: ArcStr,
    pub organisation_id: ArcStr,
    pub referral_id: ArcStr,
    pub period_start_date: Option<NaiveDate>,
    pub period_end_date: Option<NaiveDate>,
    pub week_ending_date: Option<NaiveDate>,
    pub waiting_list_type: Option<ArcStr>,
    pub treatment_function_code: Option<ArcStr>,
    pub priority_type_code: Option<ArcStr>,
}

impl From<WaitingListRecordRaw> for WaitingListRecord {
    fn from(from: WaitingListRecordRaw) -> Self {
        Self {
            patient_id: from.patient_id,
            pathway_id: from.pathway_id,
            organisation_id: from.organisation_id,
            referral_id: from.referral_id,
            period_start_date: from.period_start_date,
            period_end_date: from.period_end_date,
            week_ending_date: from.week_ending_date,
            waiting_list_type: from.waiting_list_type,
            treatment_function_code: from.treatment_function_code,
            priority_type_code: from.priority_type_code,
        }
    }
}

/// The parsed waiting-list extract, indexed by patient.
pub struct WaitingLists {
    els: Arc<Vec<WaitingListRecord>>,
    id_idx: BTreeMap<PatientId, Vec<usize>>,
}

impl WaitingLists {
    pub fn load_orig(path: impl AsRef<Path>) -> Result<Self> {
        let raw: Vec<WaitingListRecordRaw> = load_orig(path)?;
        Ok(Self::new(raw.into_iter().map(Into::into).collect()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(load(path)?))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result {
        Ok(save(&self.els, path)?)
    }

    pub fn iter(&self) -> impl Iterator<Item = &WaitingListRecord> + '_ {
        self.els.iter()
    }

    /// All patients with at least one row, in id order.
    pub fn patient_ids(&self) -> impl Iterator<Item = PatientId> + '_ {
        self.id_idx.keys().copied()
    }

    pub fn records_for_patient(
        &self,
        id: PatientId,
    ) -> impl Iterator<Item = &WaitingListRecord> + Clone + '_ {
        let idxs = self.id_idx.get(&id).map(Vec::as_slice).unwrap_or(&[]);
        idxs.iter().map(|idx| &self.els[*idx])
    }

    /// Resolve the canonical episode for one patient under the given rules.
    pub fn episode_for_patient(
        &self,
        id: PatientId,
        filter: &RecordFilter,
        sort_keys: &[SortKey],
        pick: Pick,
    ) -> Option<Episode> {
        resolve_episode(self.records_for_patient(id), filter, sort_keys, pick)
    }

    /// Row-level QC counts over a patient's *valid* rows.
    pub fn counts_for_patient(&self, id: PatientId, filter: &RecordFilter) -> RecordCounts {
        RecordCounts::from_records(self.records_for_patient(id).filter(|r| filter.matches(r)))
    }

    fn new(els: Vec<WaitingListRecord>) -> Self {
        let mut this = WaitingLists {
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

impl Deref for WaitingLists {
    type Target = [WaitingListRecord];
    fn deref(&self) -> &Self::Target {
        &*self.els
    }
}

impl FromIterator<WaitingListRecord> for WaitingLists {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = WaitingListRecord>,
    {
        Self::new(iter.into_iter().collect())
    }
}

/// The inclusion predicate for waiting-list rows.
///
/// A cohort either selects completed episodes (end date within the study
/// period, start on or before end, week-ending within the study period) or a
/// census of open pathways (start date present, week-ending equal to the
/// census date). Both shapes are expressed here so the validity rules live in
/// one place per cohort instead of being re-derived in each definition.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    /// Require `period_end_date` within these inclusive bounds.
    pub end_date_between: Option<(NaiveDate, NaiveDate)>,
    /// Require `period_start_date <= period_end_date` (both present).
    pub start_on_or_before_end: bool,
    /// Require `period_start_date` to be present.
    pub start_required: bool,
    /// Require `week_ending_date` within these inclusive bounds.
    pub week_ending_between: Option<(NaiveDate, NaiveDate)>,
    /// Require `week_ending_date` equal to this census date.
    pub week_ending_on: Option<NaiveDate>,
    /// Allowed waiting-list type codes, if restricted.
    pub waiting_list_types: Option<BTreeSet<ArcStr>>,
    /// Allowed treatment function codes, if restricted.
    pub treatment_functions: Option<BTreeSet<ArcStr>>,
}

impl RecordFilter {
    pub fn matches(&self, record: &WaitingListRecord) -> bool {
        if let Some((from, to)) = self.end_date_between {
            match record.period_end_date {
                Some(end) if end >= from && end <= to => {}
                _ => return false,
            }
        }
        if self.start_on_or_before_end {
            match (record.period_start_date, record.period_end_date) {
                (Some(start), Some(end)) if start <= end => {}
                _ => return false,
            }
        }
        if self.start_required && record.period_start_date.is_none() {
            return false;
        }
        if let Some((from, to)) = self.week_ending_between {
            match record.week_ending_date {
                Some(week) if week >= from && week <= to => {}
                _ => return false,
            }
        }
        if let Some(census) = self.week_ending_on {
            if record.week_ending_date != Some(census) {
                return false;
            }
        }
        if let Some(types) = &self.waiting_list_types {
            match &record.waiting_list_type {
                Some(ty) if types.contains(&**ty) => {}
                _ => return false,
            }
        }
        if let Some(funcs) = &self.treatment_functions {
            match &record.treatment_function_code {
                Some(code) if funcs.contains(&**code) => {}
                _ => return false,
            }
        }
        true
    }

    pub fn codes(codes: &[&str]) -> BTreeSet<ArcStr> {
        codes.iter().map(|c| ArcStr::from(*c)).collect()
    }
}

/// One element of a cohort's sort key list.
///
/// The order of keys is part of each cohort's definition and is *not*
/// interchangeable: sorting by start date first and sorting by end date first
/// can select different rows for the same patient. Each cohort's list is kept
/// verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    PeriodStart,
    PeriodEnd,
    ReferralId,
    PathwayId,
    OrganisationId,
}

impl SortKey {
    fn compare(self, a: &WaitingListRecord, b: &WaitingListRecord) -> Ordering {
        match self {
            SortKey::PeriodStart => a.period_start_date.cmp(&b.period_start_date),
            SortKey::PeriodEnd => a.period_end_date.cmp(&b.period_end_date),
            SortKey::ReferralId => a.referral_id.cmp(&b.referral_id),
            SortKey::PathwayId => a.pathway_id.cmp(&b.pathway_id),
            SortKey::OrganisationId => a.organisation_id.cmp(&b.organisation_id),
        }
    }
}

/// Which end of the sorted candidates is the canonical episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pick {
    First,
    Last,
}

/// The canonical waiting-list episode selected for one patient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub record: WaitingListRecord,
}

impl Episode {
    pub fn start_date(&self) -> Option<NaiveDate> {
        self.record.period_start_date
    }

    pub fn end_date(&self) -> Option<NaiveDate> {
        self.record.period_end_date
    }

    /// Days waited from referral to clock stop. `None` unless both dates are
    /// present (guaranteed for completed-pathway cohorts by the filter).
    pub fn wait_days(&self) -> Option<i64> {
        match (self.record.period_start_date, self.record.period_end_date) {
            (Some(start), Some(end)) => Some((end - start).num_days()),
            _ => None,
        }
    }

    /// Completed weeks waited (days / 7, truncated).
    pub fn wait_weeks(&self) -> Option<i64> {
        self.wait_days().map(|days| days / 7)
    }

    /// Days waited up to an external date (used for open pathways, measured
    /// to the census date).
    pub fn wait_days_until(&self, date: NaiveDate) -> Option<i64> {
        self.record
            .period_start_date
            .map(|start| (date - start).num_days())
    }
}

/// Select the canonical episode from a patient's waiting-list rows.
///
/// Filter, stable-sort ascending by `sort_keys` (in order), then take the
/// first or last row. Rows that tie on every key keep their input order, so
/// resolution is deterministic for a given extract.
pub fn resolve_episode<'a>(
    records: impl IntoIterator<Item = &'a WaitingListRecord>,
    filter: &RecordFilter,
    sort_keys: &[SortKey],
    pick: Pick,
) -> Option<Episode> {
    let mut candidates: Vec<&WaitingListRecord> = records
        .into_iter()
        .filter(|r| filter.matches(r))
        .collect();
    if candidates.is_empty() {
        return None;
    }
    candidates.sort_by(|a, b| {
        sort_keys
            .iter()
            .map(|key| key.compare(a, b))
            .find(|ord| *ord != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
    let record = match pick {
        Pick::First => candidates[0],
        Pick::Last => candidates[candidates.len() - 1],
    };
    Some(Episode {
        record: record.clone(),
    })
}

/// Row-level QC counts reported alongside each dataset (how many rows and how
/// many distinct identifiers fed the selection).
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecordCounts {
    pub rows: usize,
    pub distinct_start_dates: usize,
    pub distinct_pathway_ids: usize,
    pub distinct_organisation_ids: usize,
    pub distinct_referral_ids: usize,
}

impl RecordCounts {
    fn from_records<'a>(records: impl Iterator<Item = &'a WaitingListRecord>) -> Self {
        let mut counts = RecordCounts::default();
        let mut starts = BTreeSet::new();
        let mut pathways = BTreeSet::new();
        let mut organisations = BTreeSet::new();
        let mut referrals = BTreeSet::new();
        for record in records {
            counts.rows += 1;
            if let Some(start) = record.period_start_date {
                starts.insert(start);
            }
            pathways.insert(record.pathway_id.clone());
            organisations.insert(record.organisation_id.clone());
            referrals.insert(record.referral_id.clone());
        }
        counts.distinct_start_dates = starts.len();
        counts.distinct_pathway_ids = pathways.len();
        counts.distinct_organisation_ids = organisations.len();
        counts.distinct_referral_ids = referrals.len();
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn record(start: (i32, u32, u32), end: (i32, u32, u32), referral: &str) -> WaitingListRecord {
        WaitingListRecord {
            patient_id: 1,
            pathway_id: "pw1".into(),
            organisation_id: "org1".into(),
            referral_id: referral.into(),
            period_start_date: Some(date(start.0, start.1, start.2)),
            period_end_date: Some(date(end.0, end.1, end.2)),
            week_ending_date: Some(date(end.0, end.1, end.2)),
            waiting_list_type: Some("IRTT".into()),
            treatment_function_code: Some("110".into()),
            priority_type_code: None,
        }
    }

    fn permissive() -> RecordFilter {
        RecordFilter {
            start_on_or_before_end: true,
            ..RecordFilter::default()
        }
    }

    #[test]
    fn no_valid_records() {
        let records = vec![record((2021, 6, 1), (2021, 9, 1), "r1")];
        let filter = RecordFilter {
            end_date_between: Some((date(2023, 1, 1), date(2023, 12, 31))),
            ..RecordFilter::default()
        };
        let ep = resolve_episode(&records, &filter, &[SortKey::PeriodStart], Pick::Last);
        assert!(ep.is_none());
    }

    #[test]
    fn single_record_ignores_rules() {
        let records = vec![record((2021, 6, 1), (2021, 9, 1), "r1")];
        for pick in [Pick::First, Pick::Last] {
            for keys in [
                &[SortKey::PeriodStart][..],
                &[SortKey::PeriodEnd, SortKey::ReferralId][..],
            ] {
                let ep = resolve_episode(&records, &permissive(), keys, pick).unwrap();
                assert_eq!(ep.record.referral_id, "r1".into());
            }
        }
    }

    #[test]
    fn sort_by_end_then_start_picks_last() {
        // Spec scenario: two overlapping pathways, the later end date wins.
        let records = vec![
            record((2021, 6, 1), (2021, 9, 1), "r1"),
            record((2021, 7, 1), (2021, 10, 1), "r2"),
        ];
        let ep = resolve_episode(
            &records,
            &permissive(),
            &[SortKey::PeriodEnd, SortKey::PeriodStart],
            Pick::Last,
        )
        .unwrap();
        assert_eq!(ep.end_date(), Some(date(2021, 10, 1)));
        assert_eq!(ep.record.referral_id, "r2".into());
    }

    #[test]
    fn divergent_sort_orders_select_different_rows() {
        // A later-starting pathway that finishes earlier: start-first and
        // end-first orders disagree, which is why the per-cohort key lists
        // must not be unified.
        let records = vec![
            record((2021, 6, 1), (2021, 12, 1), "r1"),
            record((2021, 8, 1), (2021, 9, 1), "r2"),
        ];
        let by_start = resolve_episode(
            &records,
            &permissive(),
            &[SortKey::PeriodStart, SortKey::ReferralId],
            Pick::Last,
        )
        .unwrap();
        let by_end = resolve_episode(
            &records,
            &permissive(),
            &[SortKey::PeriodEnd, SortKey::PeriodStart],
            Pick::Last,
        )
        .unwrap();
        assert_eq!(by_start.record.referral_id, "r2".into());
        assert_eq!(by_end.record.referral_id, "r1".into());
    }

    #[test]
    fn tie_break_is_input_order() {
        let a = record((2021, 6, 1), (2021, 9, 1), "r1");
        let mut b = a.clone();
        b.priority_type_code = Some("routine".into());
        let records = vec![a, b];
        let keys = [
            SortKey::PeriodStart,
            SortKey::ReferralId,
            SortKey::PathwayId,
            SortKey::OrganisationId,
        ];
        // Stable sort: the last input row wins under Pick::Last, every time.
        for _ in 0..3 {
            let ep = resolve_episode(&records, &permissive(), &keys, Pick::Last).unwrap();
            assert_eq!(ep.record.priority_type_code, Some("routine".into()));
        }
    }

    #[test]
    fn wait_time_arithmetic() {
        let ep = Episode {
            record: record((2021, 6, 1), (2021, 9, 1), "r1"),
        };
        assert_eq!(ep.wait_days(), Some(92));
        assert_eq!(ep.wait_weeks(), Some(13));
    }

    #[test]
    fn filter_rejects_inverted_and_missing_dates() {
        let mut inverted = record((2021, 9, 2), (2021, 9, 1), "r1");
        inverted.week_ending_date = Some(date(2021, 9, 1));
        let mut missing_end = record((2021, 6, 1), (2021, 9, 1), "r2");
        missing_end.period_end_date = None;
        let filter = permissive();
        assert!(!filter.matches(&inverted));
        assert!(!filter.matches(&missing_end));
    }
}
