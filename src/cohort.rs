//! Named cohort configurations and the per-patient resolution pipeline.
//!
//! Every study variant is one [`CohortConfig`] value: the row filter, the sort
//! key order, the follow-up length, the window shapes, the registration rule
//! and the population rule, all in one place. The variants genuinely differ
//! in small ways (182 vs 365-day follow-up, which identifiers lead the sort,
//! which list types are admitted); none of that is unified here because two
//! variants with different rules can legitimately select different episodes
//! for the same patient.

use crate::{
    followup::{build_windows, censoring_date, WindowParams, Windows},
    waitlist::{Episode, Pick, RecordCounts, RecordFilter, SortKey, WaitingLists},
    PatientId, Patients, Registration, Registrations,
};
use chrono::{Duration, NaiveDate};
use once_cell::sync::Lazy;
use rayon::prelude::*;

/// Sort orders used across the study definitions. These differ between
/// cohorts; each is kept verbatim.
pub const SORT_BY_START_THEN_IDS: &[SortKey] = &[
    SortKey::PeriodStart,
    SortKey::ReferralId,
    SortKey::PathwayId,
    SortKey::OrganisationId,
];

pub const SORT_BY_END_THEN_START_THEN_IDS: &[SortKey] = &[
    SortKey::PeriodEnd,
    SortKey::PeriodStart,
    SortKey::ReferralId,
    SortKey::PathwayId,
    SortKey::OrganisationId,
];

pub const SORT_BY_IDS_THEN_START: &[SortKey] = &[
    SortKey::PathwayId,
    SortKey::OrganisationId,
    SortKey::ReferralId,
    SortKey::PeriodStart,
];

/// List types admitted to the completed-pathway cohorts.
const CLOCKSTOP_LIST_TYPES: &[&str] = &[
    "IRTT", "ORTT", "PTLO", "PTLI", "PLTI", "RTTO", "RTTI", "PTL0", "PTL1",
];

/// List types admitted to the open-pathway census (a shorter list; the
/// remainder never appear in the open extract).
const OPEN_LIST_TYPES: &[&str] = &["IRTT", "ORTT", "PTLO", "PTLI", "RTTO", "RTTI"];

/// Treatment function codes counted as orthopaedic surgery in the weekly
/// measures (trauma & orthopaedics plus related specialties), and the
/// narrower T&O-only subset.
pub const ORTHO_SURGERY_FUNCTIONS: &[&str] = &["110", "111", "108", "115"];
pub const ORTHO_ONLY_FUNCTIONS: &[&str] = &["110"];

/// How the censoring registration is chosen for a cohort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationRule {
    /// Started `lead_days` before the episode start and not ended on or
    /// before it; latest end date wins.
    LatestQualifying { lead_days: i64 },
    /// Must span from `episode_start - lead_days` to the episode end.
    Spanning { lead_days: i64 },
    /// In force on the episode start date, among registrations started
    /// `lead_days` earlier (open-pathway rule).
    OnEpisodeStart { lead_days: i64 },
}

/// The censoring condition a patient must meet to enter the population.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CensorRule {
    /// Censoring date strictly after the episode start.
    StrictlyAfterStart,
    /// Censoring date on or after the episode start.
    OnOrAfterStart,
    /// Censoring date on or after the episode end (still under observation
    /// at the clock stop).
    OnOrAfterEnd,
    /// No censoring condition.
    None,
}

/// One study variant's complete parameterisation.
#[derive(Debug, Clone)]
pub struct CohortConfig {
    pub name: &'static str,
    pub study_start: NaiveDate,
    pub study_end: NaiveDate,
    /// `Some(census)` makes this an open-pathway census cohort: rows need a
    /// start date and the census week-ending date, there are no episode end
    /// dates, and the census date replaces protocol follow-up in censoring.
    pub open_census: Option<NaiveDate>,
    pub waiting_list_types: Option<&'static [&'static str]>,
    pub treatment_functions: Option<&'static [&'static str]>,
    pub sort_keys: &'static [SortKey],
    pub pick: Pick,
    /// Protocol follow-up after the episode end (182 or 365 days).
    pub follow_up_days: i64,
    pub windows: WindowParams,
    pub registration: RegistrationRule,
    /// Inclusive minimum / exclusive maximum age at episode start, if any.
    pub age_bounds: Option<(i32, i32)>,
    pub require_male_or_female: bool,
    pub censor_rule: CensorRule,
    /// Restrict to episodes with these treatment function codes *after*
    /// resolution (the measures cohorts resolve over all specialties, then
    /// keep the orthopaedic ones).
    pub surgery_functions: Option<&'static [&'static str]>,
    /// Whether the population excludes patients with a cancer history (the
    /// caller owns the clinical events, so this is applied by the binaries).
    pub exclude_cancer: bool,
}

impl CohortConfig {
    /// The row-validity filter for this cohort.
    pub fn record_filter(&self) -> RecordFilter {
        match self.open_census {
            Some(census) => RecordFilter {
                start_required: true,
                week_ending_on: Some(census),
                waiting_list_types: self.waiting_list_types.map(RecordFilter::codes),
                treatment_functions: self.treatment_functions.map(RecordFilter::codes),
                ..RecordFilter::default()
            },
            None => RecordFilter {
                end_date_between: Some((self.study_start, self.study_end)),
                start_on_or_before_end: true,
                week_ending_between: Some((self.study_start, self.study_end)),
                waiting_list_types: self.waiting_list_types.map(RecordFilter::codes),
                treatment_functions: self.treatment_functions.map(RecordFilter::codes),
                ..RecordFilter::default()
            },
        }
    }

    fn registration<'a>(
        &self,
        registrations: &'a Registrations,
        id: PatientId,
        start: NaiveDate,
        end: Option<NaiveDate>,
    ) -> Option<&'a Registration> {
        match self.registration {
            RegistrationRule::LatestQualifying { lead_days } => {
                registrations.latest_qualifying(id, start, lead_days)
            }
            RegistrationRule::Spanning { lead_days } => {
                let to = end.unwrap_or(start);
                registrations.spanning(id, start - Duration::days(lead_days), to)
            }
            RegistrationRule::OnEpisodeStart { lead_days } => {
                registrations.qualifying_on(id, start, lead_days)
            }
        }
    }

    /// Resolve one patient against this cohort. `None` means the patient is
    /// not in the population: no valid rows, no qualifying registration, or
    /// failing an age/sex/censoring rule. All inputs are immutable, so the
    /// caller is free to run this over patients in parallel.
    pub fn resolve_patient(
        &self,
        id: PatientId,
        patients: &Patients,
        registrations: &Registrations,
        waiting_lists: &WaitingLists,
        filter: &RecordFilter,
    ) -> Option<EpisodeOutcome> {
        let episode = waiting_lists.episode_for_patient(id, filter, self.sort_keys, self.pick)?;
        let patient = patients.find_by_id(id)?;
        let start = episode.start_date()?;

        if let Some((min, max)) = self.age_bounds {
            let age = patient.age_on(start);
            if age < min || age >= max {
                return None;
            }
        }
        if self.require_male_or_female && !patient.sex.is_male_or_female() {
            return None;
        }

        let registration = self.registration(registrations, id, start, episode.end_date())?;
        let reg_end_date = registration.end_date;

        let (censor_date, windows, censored_before_study_end) = match self.open_census {
            Some(census) => {
                let censor = censoring_date(reg_end_date, patient.date_of_death, census, 0);
                (censor, None, censor < census)
            }
            None => {
                // Completed cohorts: the filter guarantees an end date.
                let end = episode.end_date()?;
                let censor = censoring_date(
                    reg_end_date,
                    patient.date_of_death,
                    end,
                    self.follow_up_days,
                );
                let windows = build_windows(start, end, censor, &self.windows);
                let study_end = end + Duration::days(self.follow_up_days);
                (censor, Some(windows), censor < study_end)
            }
        };

        let in_population = match self.censor_rule {
            CensorRule::StrictlyAfterStart => censor_date > start,
            CensorRule::OnOrAfterStart => censor_date >= start,
            CensorRule::OnOrAfterEnd => episode.end_date().map_or(false, |end| censor_date >= end),
            CensorRule::None => true,
        };
        if !in_population {
            return None;
        }

        let censored_before_episode_end = episode
            .end_date()
            .map_or(false, |end| censor_date < end);

        let counts = waiting_lists.counts_for_patient(id, filter);

        Some(EpisodeOutcome {
            patient_id: id,
            episode,
            counts,
            reg_end_date,
            censor_date,
            windows,
            censored_before_episode_end,
            censored_before_study_end,
        })
    }
}

/// Everything the episode engine derives for one in-population patient.
#[derive(Debug, Clone)]
pub struct EpisodeOutcome {
    pub patient_id: PatientId,
    pub episode: Episode,
    pub counts: RecordCounts,
    pub reg_end_date: Option<NaiveDate>,
    pub censor_date: NaiveDate,
    /// `None` for the open-pathway census (no episode end to hang windows on).
    pub windows: Option<Windows>,
    pub censored_before_episode_end: bool,
    pub censored_before_study_end: bool,
}

/// Resolve a whole cohort. Patients are independent, so this is a stateless
/// parallel map over everyone with at least one waiting-list row.
pub fn resolve_cohort(
    config: &CohortConfig,
    patients: &Patients,
    registrations: &Registrations,
    waiting_lists: &WaitingLists,
) -> Vec<EpisodeOutcome> {
    let filter = config.record_filter();
    let ids: Vec<PatientId> = waiting_lists.patient_ids().collect();
    ids.par_iter()
        .filter_map(|&id| config.resolve_patient(id, patients, registrations, waiting_lists, &filter))
        .collect()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Completed pathways, any specialty, May 2021 - May 2022.
pub static CLOCKSTOPS: Lazy<CohortConfig> = Lazy::new(|| CohortConfig {
    name: "clockstops",
    study_start: date(2021, 5, 1),
    study_end: date(2022, 5, 1),
    open_census: None,
    waiting_list_types: Some(CLOCKSTOP_LIST_TYPES),
    treatment_functions: None,
    sort_keys: SORT_BY_START_THEN_IDS,
    pick: Pick::Last,
    follow_up_days: 182,
    windows: WindowParams {
        pre_days: 182,
        post_offset_days: 1,
        post_span_days: 181,
    },
    registration: RegistrationRule::LatestQualifying { lead_days: 182 },
    age_bounds: Some((18, 110)),
    require_male_or_female: true,
    censor_rule: CensorRule::StrictlyAfterStart,
    surgery_functions: None,
    exclude_cancer: false,
});

/// Pathways still open at the 1 May 2022 census.
pub static OPENPATHWAYS: Lazy<CohortConfig> = Lazy::new(|| CohortConfig {
    name: "openpathways",
    study_start: date(2021, 5, 1),
    study_end: date(2022, 5, 1),
    open_census: Some(date(2022, 5, 1)),
    waiting_list_types: Some(OPEN_LIST_TYPES),
    treatment_functions: None,
    sort_keys: SORT_BY_START_THEN_IDS,
    pick: Pick::Last,
    follow_up_days: 0,
    windows: WindowParams {
        pre_days: 182,
        post_offset_days: 1,
        post_span_days: 181,
    },
    registration: RegistrationRule::OnEpisodeStart { lead_days: 182 },
    age_bounds: Some((18, 110)),
    require_male_or_female: true,
    censor_rule: CensorRule::StrictlyAfterStart,
    surgery_functions: None,
    exclude_cancer: false,
});

/// Completed orthopaedic (T&O) pathways, May 2021 - Apr 2022, with the
/// one-year protocol follow-up and the delayed post window.
pub static ORTHO: Lazy<CohortConfig> = Lazy::new(|| CohortConfig {
    name: "ortho",
    study_start: date(2021, 5, 1),
    study_end: date(2022, 4, 30),
    open_census: None,
    waiting_list_types: None,
    treatment_functions: Some(ORTHO_ONLY_FUNCTIONS),
    sort_keys: SORT_BY_END_THEN_START_THEN_IDS,
    pick: Pick::Last,
    follow_up_days: 365,
    windows: WindowParams {
        pre_days: 182,
        post_offset_days: 91,
        post_span_days: 182,
    },
    registration: RegistrationRule::Spanning { lead_days: 182 },
    age_bounds: None,
    require_male_or_female: false,
    censor_rule: CensorRule::OnOrAfterEnd,
    surgery_functions: None,
    exclude_cancer: false,
});

/// Weekly-rate cohort: all completed pathways, orthopaedic subset applied
/// after resolution, six months of follow-up.
pub static ORTHO_MEASURES: Lazy<CohortConfig> = Lazy::new(|| CohortConfig {
    name: "ortho_measures",
    study_start: date(2021, 5, 1),
    study_end: date(2022, 4, 30),
    open_census: None,
    waiting_list_types: Some(CLOCKSTOP_LIST_TYPES),
    treatment_functions: None,
    sort_keys: SORT_BY_START_THEN_IDS,
    pick: Pick::Last,
    follow_up_days: 182,
    windows: WindowParams {
        pre_days: 182,
        post_offset_days: 1,
        post_span_days: 181,
    },
    registration: RegistrationRule::LatestQualifying { lead_days: 182 },
    age_bounds: Some((18, 110)),
    require_male_or_female: true,
    censor_rule: CensorRule::OnOrAfterStart,
    surgery_functions: Some(ORTHO_SURGERY_FUNCTIONS),
    exclude_cancer: true,
});

/// Variant of [`ORTHO_MEASURES`] kept for comparison runs: identifiers lead
/// the sort, and only T&O itself counts as orthopaedic surgery. The
/// different sort order can select a different episode for patients with
/// several pathways, which is exactly why it stays a separate config.
pub static ANY_OPIOID_MEASURES: Lazy<CohortConfig> = Lazy::new(|| CohortConfig {
    name: "any_opioid_measures",
    study_start: date(2021, 5, 1),
    study_end: date(2022, 5, 1),
    open_census: None,
    waiting_list_types: Some(CLOCKSTOP_LIST_TYPES),
    treatment_functions: None,
    sort_keys: SORT_BY_IDS_THEN_START,
    pick: Pick::Last,
    follow_up_days: 182,
    windows: WindowParams {
        pre_days: 182,
        post_offset_days: 0,
        post_span_days: 182,
    },
    registration: RegistrationRule::LatestQualifying { lead_days: 182 },
    age_bounds: Some((18, 110)),
    require_male_or_female: true,
    censor_rule: CensorRule::None,
    surgery_functions: Some(ORTHO_ONLY_FUNCTIONS),
    exclude_cancer: true,
});

/// Variant with the one-year follow-up and the spanning registration rule,
/// restricted to T&O episodes at the row level (used for the per-class
/// weekly series).
pub static OPIOID_ALL_MEASURES: Lazy<CohortConfig> = Lazy::new(|| CohortConfig {
    name: "opioid_all_measures",
    study_start: date(2021, 5, 1),
    study_end: date(2022, 4, 30),
    open_census: None,
    waiting_list_types: None,
    treatment_functions: Some(ORTHO_ONLY_FUNCTIONS),
    sort_keys: SORT_BY_START_THEN_IDS,
    pick: Pick::Last,
    follow_up_days: 365,
    windows: WindowParams {
        pre_days: 182,
        post_offset_days: 1,
        post_span_days: 181,
    },
    registration: RegistrationRule::Spanning { lead_days: 182 },
    age_bounds: Some((18, 110)),
    require_male_or_female: true,
    censor_rule: CensorRule::None,
    surgery_functions: None,
    exclude_cancer: true,
});

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{waitlist::WaitingListRecord, Patient, Sex};

    fn patient(id: PatientId) -> Patient {
        Patient {
            patient_id: id,
            sex: Sex::Female,
            date_of_birth: date(1960, 1, 15),
            date_of_death: None,
        }
    }

    fn registration(id: PatientId, start: NaiveDate, end: Option<NaiveDate>) -> Registration {
        Registration {
            patient_id: id,
            start_date: start,
            end_date: end,
            region: Some("London".into()),
        }
    }

    fn record(
        id: PatientId,
        start: NaiveDate,
        end: NaiveDate,
        referral: &str,
    ) -> WaitingListRecord {
        WaitingListRecord {
            patient_id: id,
            pathway_id: "pw".into(),
            organisation_id: "org".into(),
            referral_id: referral.into(),
            period_start_date: Some(start),
            period_end_date: Some(end),
            week_ending_date: Some(end),
            waiting_list_type: Some("IRTT".into()),
            treatment_function_code: Some("110".into()),
            priority_type_code: Some("routine".into()),
        }
    }

    #[test]
    fn clockstops_resolves_in_population_patient() {
        let patients: Patients = vec![patient(1)].into_iter().collect();
        let registrations: Registrations =
            vec![registration(1, date(2015, 1, 1), None)].into_iter().collect();
        let waiting_lists: WaitingLists = vec![
            record(1, date(2021, 6, 1), date(2021, 9, 1), "r1"),
            record(1, date(2021, 7, 1), date(2021, 10, 1), "r2"),
        ]
        .into_iter()
        .collect();

        let outcomes = resolve_cohort(&CLOCKSTOPS, &patients, &registrations, &waiting_lists);
        assert_eq!(outcomes.len(), 1);
        let outcome = &outcomes[0];
        // Start-led sort, pick last: the later-starting pathway wins.
        assert_eq!(outcome.episode.record.referral_id, "r2".into());
        assert_eq!(outcome.counts.rows, 2);
        // No deregistration or death: censoring is end + 182 days.
        assert_eq!(outcome.censor_date, date(2021, 10, 1) + Duration::days(182));
        assert!(!outcome.censored_before_episode_end);
        assert!(!outcome.censored_before_study_end);
        let windows = outcome.windows.unwrap();
        assert_eq!(windows.during.start(), Some(date(2021, 7, 1)));
        assert_eq!(windows.during.end(), Some(date(2021, 10, 1)));
        assert_eq!(windows.post.start(), Some(date(2021, 10, 2)));
    }

    #[test]
    fn cohorts_with_different_sort_orders_diverge() {
        // Later-starting pathway ends earlier: clockstops (start-led) and
        // ortho (end-led) pick different episodes.
        let records = vec![
            record(1, date(2021, 6, 1), date(2021, 12, 1), "r1"),
            record(1, date(2021, 8, 1), date(2021, 9, 1), "r2"),
        ];
        let waiting_lists: WaitingLists = records.into_iter().collect();
        let start_led = waiting_lists
            .episode_for_patient(1, &CLOCKSTOPS.record_filter(), CLOCKSTOPS.sort_keys, Pick::Last)
            .unwrap();
        let end_led = waiting_lists
            .episode_for_patient(1, &ORTHO.record_filter(), ORTHO.sort_keys, Pick::Last)
            .unwrap();
        assert_eq!(start_led.record.referral_id, "r2".into());
        assert_eq!(end_led.record.referral_id, "r1".into());
    }

    #[test]
    fn no_qualifying_registration_excludes() {
        let patients: Patients = vec![patient(1)].into_iter().collect();
        // Registered only a month before the episode start; the rule wants
        // six months.
        let registrations: Registrations =
            vec![registration(1, date(2021, 5, 1), None)].into_iter().collect();
        let waiting_lists: WaitingLists =
            vec![record(1, date(2021, 6, 1), date(2021, 9, 1), "r1")]
                .into_iter()
                .collect();
        let outcomes = resolve_cohort(&CLOCKSTOPS, &patients, &registrations, &waiting_lists);
        assert!(outcomes.is_empty());
    }

    #[test]
    fn death_before_start_excludes_from_clockstops() {
        let mut dead = patient(1);
        dead.date_of_death = Some(date(2021, 5, 20));
        let patients: Patients = vec![dead].into_iter().collect();
        let registrations: Registrations =
            vec![registration(1, date(2015, 1, 1), None)].into_iter().collect();
        let waiting_lists: WaitingLists =
            vec![record(1, date(2021, 6, 1), date(2021, 9, 1), "r1")]
                .into_iter()
                .collect();
        // Censoring date (death) precedes the episode start, so the
        // strictly-after rule excludes the patient.
        let outcomes = resolve_cohort(&CLOCKSTOPS, &patients, &registrations, &waiting_lists);
        assert!(outcomes.is_empty());
    }

    #[test]
    fn ortho_requires_observation_to_episode_end() {
        let mut dead = patient(1);
        dead.date_of_death = Some(date(2021, 8, 1));
        let patients: Patients = vec![dead].into_iter().collect();
        let registrations: Registrations =
            vec![registration(1, date(2015, 1, 1), None)].into_iter().collect();
        let waiting_lists: WaitingLists =
            vec![record(1, date(2021, 6, 1), date(2021, 9, 1), "r1")]
                .into_iter()
                .collect();
        let outcomes = resolve_cohort(&ORTHO, &patients, &registrations, &waiting_lists);
        assert!(outcomes.is_empty());
    }

    #[test]
    fn open_census_censors_against_census_date() {
        let census = date(2022, 5, 1);
        let patients: Patients = vec![patient(1)].into_iter().collect();
        let registrations: Registrations =
            vec![registration(1, date(2015, 1, 1), Some(date(2022, 3, 1)))]
                .into_iter()
                .collect();
        let mut open = record(1, date(2021, 6, 1), date(2021, 6, 1), "r1");
        open.period_end_date = None;
        open.week_ending_date = Some(census);
        let waiting_lists: WaitingLists = vec![open].into_iter().collect();

        let outcomes = resolve_cohort(&OPENPATHWAYS, &patients, &registrations, &waiting_lists);
        // The registration covers the episode start (all the rule asks for),
        // and its end date censors the patient before the census.
        assert_eq!(outcomes.len(), 1);
        let outcome = &outcomes[0];
        assert_eq!(outcome.censor_date, date(2022, 3, 1));
        assert!(outcome.windows.is_none());
        assert!(outcome.censored_before_study_end);
        assert_eq!(
            outcome.episode.wait_days_until(census),
            Some((census - date(2021, 6, 1)).num_days())
        );
    }
}
