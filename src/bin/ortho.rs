//! Dataset for people with a completed orthopaedic (T&O) RTT pathway
//! May 2021 - Apr 2022: one-year follow-up, admission/HRG outcomes, and
//! prescribing counts for the full set of analgesic classes.

use chrono::{Duration, NaiveDate};
use itertools::Itertools;
use qu::ick_use::*;
use rtt_opioid_analysis::{
    codelists::{Codelist, StudyCodelists},
    cohort::{resolve_cohort, ORTHO},
    comorbidity::{lookback_years, lookback_years_exclusive, Comorbidities},
    demographics::{age_band, ethnicity6_label, ImdDecile},
    events::{Admissions, ClinicalEvents, Medications},
    header, output_file, percent,
    waitlist::WaitingLists,
    Addresses, Patients, Registrations, TimeWindow,
};
use std::fs;

// Spell core HRGs marking each (non-trauma) orthopaedic procedure group.
const HIP_HRG: &[&str] = &[
    "HN12A", "HN12B", "HN12C", "HN12D", "HN12E", "HN12F", "HN13A", "HN13B", "HN13C", "HN13D",
    "HN13E", "HN13F", "HN13G", "HN13H", "HN14A", "HN14B", "HN14C", "HN14D", "HN14E", "HN14F",
    "HN14G", "HN14H", "HN15A", "HN15B", "HN16A", "HN16B", "HN16C",
];
const KNEE_HRG: &[&str] = &[
    "HN22A", "HN22B", "HN22C", "HN22D", "HN22E", "HN23A", "HN23B", "HN23C", "HN23D", "HN23E",
    "HN24A", "HN24B", "HN24C", "HN24D", "HN24E", "HN24F", "HN25A", "HN25B", "HN26A", "HN26B",
    "HN26C",
];
const FOOT_HRG: &[&str] = &[
    "HN32A", "HN32B", "HN32C", "HN33A", "HN33B", "HN33C", "HN33D", "HN34A", "HN34B", "HN34C",
    "HN34D", "HN35A", "HN35B", "HN36Z",
];
const HAND_HRG: &[&str] = &[
    "HN42A", "HN42B", "HN43A", "HN43B", "HN43C", "HN44A", "HN44B", "HN44C", "HN44D", "HN45A",
    "HN45B", "HN45C", "HN46Z",
];
const SHOULDER_HRG: &[&str] = &[
    "HN52A", "HN52B", "HN52C", "HN53A", "HN53B", "HN53C", "HN54A", "HN54B", "HN54C", "HN54D",
    "HN55Z", "HN56Z",
];
const ELBOW_HRG: &[&str] = &[
    "HN62A", "HN62B", "HN63A", "HN63B", "HN64A", "HN64B", "HN64C", "HN64D", "HN65Z", "HN66Z",
];
const COMPLEX_HRG: &[&str] = &[
    "HN80A", "HN80B", "HN80C", "HN80D", "HN81A", "HN81B", "HN81C", "HN81D", "HN81E", "HN85Z",
    "HN86A", "HN86B", "HN93Z",
];

// Trauma counterparts.
const HIP_TRAUMA_HRG: &[&str] = &[
    "HT12A", "HT12B", "HT12C", "HT12D", "HT12E", "HT13A", "HT13B", "HT13C", "HT13D", "HT13E",
    "HT14A", "HT14B", "HT14C", "HT15Z",
];
const KNEE_TRAUMA_HRG: &[&str] = &[
    "HT22A", "HT22B", "HT22C", "HT23A", "HT23B", "HT23C", "HT23D", "HT23E", "HT24A", "HT24B",
    "HT24C", "HT24D", "HT25Z",
];
const FOOT_TRAUMA_HRG: &[&str] = &[
    "HT32A", "HT32B", "HT32C", "HT33A", "HT33B", "HT33C", "HT33D", "HT33E", "HT34A", "HT34B",
    "HT34C", "HT34D", "HT34E", "HT35Z",
];
const HAND_TRAUMA_HRG: &[&str] = &[
    "HT42A", "HT42B", "HT43A", "HT43B", "HT43C", "HT43D", "HT43E", "HT44A", "HT44B", "HT44C",
    "HT44D", "HT44E", "HT45Z",
];
const SHOULDER_TRAUMA_HRG: &[&str] = &[
    "HT52A", "HT52B", "HT52C", "HT53A", "HT53B", "HT53C", "HT53D", "HT53E", "HT54A", "HT54B",
    "HT54C", "HT54D", "HT55Z",
];
const ELBOW_TRAUMA_HRG: &[&str] = &[
    "HT62A", "HT62B", "HT63A", "HT63B", "HT63C", "HT63D", "HT63E", "HT63F", "HT64A", "HT64B",
    "HT64C", "HT64D", "HT65Z",
];
const COMPLEX_TRAUMA_HRG: &[&str] = &[
    "HT81A", "HT81B", "HT81C", "HT81D", "HT86A", "HT86B", "HT86C",
];

const HRG_GROUPS: &[(&str, &[&str])] = &[
    ("hip_hrg", HIP_HRG),
    ("knee_hrg", KNEE_HRG),
    ("foot_hrg", FOOT_HRG),
    ("hand_hrg", HAND_HRG),
    ("shoulder_hrg", SHOULDER_HRG),
    ("elbow_hrg", ELBOW_HRG),
    ("complex_hrg", COMPLEX_HRG),
    ("hip_trauma_hrg", HIP_TRAUMA_HRG),
    ("knee_trauma_hrg", KNEE_TRAUMA_HRG),
    ("foot_trauma_hrg", FOOT_TRAUMA_HRG),
    ("hand_trauma_hrg", HAND_TRAUMA_HRG),
    ("shoulder_trauma_hrg", SHOULDER_TRAUMA_HRG),
    ("elbow_trauma_hrg", ELBOW_TRAUMA_HRG),
    ("complex_trauma_hrg", COMPLEX_TRAUMA_HRG),
];

/// How far either side of the clock stop an admission still counts as the
/// index procedure.
const ADMISSION_MARGIN_DAYS: i64 = 15;

const COMORBIDITIES: &[&str] = &[
    "diabetes",
    "cardiac",
    "copd",
    "liver",
    "ckd",
    "oa",
    "ra",
    "depression",
    "anxiety",
    "smi",
    "oud",
];

#[qu::ick]
pub fn main() -> Result {
    let patients = Patients::load("patients.bin")?;
    let registrations = Registrations::load("registrations.bin")?;
    let addresses = Addresses::load("addresses.bin")?;
    let medications = Medications::load("medications.bin")?;
    let clinical_events = ClinicalEvents::load("clinical_events.bin")?;
    let admissions = Admissions::load("admissions.bin")?;
    let waiting_lists = WaitingLists::load("wl_clockstops.bin")?;
    let codelists = StudyCodelists::load(&rtt_opioid_analysis::codelists_dir())?;
    let comorbidities = Comorbidities::subset(&codelists, COMORBIDITIES)?;

    // Prescribing is reported per class; the columns are generated from this
    // list, so adding a class is one line.
    let med_classes: &[(&str, &Codelist)] = &[
        ("opioid", &codelists.opioid),
        ("gabapentinoid", &codelists.gabapentinoid),
        ("antidepressant", &codelists.antidepressant),
        ("tca", &codelists.tca),
        ("nsaid", &codelists.nsaid),
        ("weak_opioid", &codelists.weak_opioid),
        ("strong_opioid", &codelists.strong_opioid),
        ("long_opioid", &codelists.long_opioid),
        ("short_opioid", &codelists.short_opioid),
    ];

    let outcomes = resolve_cohort(&ORTHO, &patients, &registrations, &waiting_lists);
    event!(Level::INFO, "{} patients in population", outcomes.len());

    fs::create_dir_all("output")?;
    let out_path = output_file("dataset_ortho.csv");
    let mut writer = csv::Writer::from_path(&out_path)?;

    let mut headers: Vec<String> = [
        "patient_id",
        "count_rtt_rows",
        "count_rtt_start_date",
        "count_patient_id",
        "count_organisation_id",
        "count_referral_id",
        "rtt_start_date",
        "rtt_end_date",
        "wait_time",
        "num_weeks",
        "treatment_function",
        "waiting_list_type",
        "priority_type",
        "any_admission",
        "first_admit",
        "first_admit_days",
        "admit_hrg",
        "reg_end_date",
        "dod",
        "end_date",
        "censor_before_rtt_end",
        "censor_before_study_end",
        "first_opioid_date",
        "age",
        "age_group",
        "sex",
        "imd10",
        "ethnicity6",
        "region",
        "cancer",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    for (name, _) in HRG_GROUPS {
        headers.push(name.to_string());
    }
    let med_columns = med_classes
        .iter()
        .map(|(med, _)| med)
        .cartesian_product(["wait_count", "wait_any", "pre_count", "pre_any", "post_count", "post_any"]);
    for (med, column) in med_columns {
        headers.push(format!("{}_{}", med, column));
    }
    headers.extend(COMORBIDITIES.iter().map(|s| s.to_string()));
    writer.write_record(&headers)?;

    let mut any_admission_count = 0usize;

    for outcome in &outcomes {
        let id = outcome.patient_id;
        let (Some(patient), Some(start), Some(end), Some(windows)) = (
            patients.find_by_id(id),
            outcome.episode.start_date(),
            outcome.episode.end_date(),
            outcome.windows,
        ) else {
            continue;
        };

        // Admissions around the clock stop.
        let admit_window = TimeWindow::new(
            end - Duration::days(ADMISSION_MARGIN_DAYS),
            end + Duration::days(ADMISSION_MARGIN_DAYS),
        );
        let first_admit = admissions.first_in_window(id, &admit_window);
        let any_admission = first_admit.is_some();
        if any_admission {
            any_admission_count += 1;
        }

        // First opioid prescription over the whole observation span.
        let first_opioid_window = TimeWindow::new(
            start - Duration::days(365),
            outcome.censor_date.min(end + Duration::days(365)),
        );
        let first_opioid = medications.first_in_window(id, &codelists.opioid, &first_opioid_window);

        let ethnicity6 =
            clinical_events.last_category_on_or_before(id, &codelists.ethnicity6, start);

        let mut record: Vec<String> = vec![
            id.to_string(),
            outcome.counts.rows.to_string(),
            outcome.counts.distinct_start_dates.to_string(),
            outcome.counts.distinct_pathway_ids.to_string(),
            outcome.counts.distinct_organisation_ids.to_string(),
            outcome.counts.distinct_referral_ids.to_string(),
            start.to_string(),
            end.to_string(),
            outcome.episode.wait_days().unwrap_or(0).to_string(),
            outcome.episode.wait_weeks().unwrap_or(0).to_string(),
            opt_str(outcome.episode.record.treatment_function_code.as_deref()),
            opt_str(outcome.episode.record.waiting_list_type.as_deref()),
            opt_str(outcome.episode.record.priority_type_code.as_deref()),
            any_admission.to_string(),
            opt_date(first_admit.map(|adm| adm.admission_date)),
            first_admit
                .map(|adm| ((adm.admission_date - end).num_days()).to_string())
                .unwrap_or_default(),
            first_admit
                .and_then(|adm| adm.hrg_code.as_deref())
                .unwrap_or("")
                .to_string(),
            opt_date(outcome.reg_end_date),
            opt_date(patient.date_of_death),
            outcome.censor_date.to_string(),
            outcome.censored_before_episode_end.to_string(),
            outcome.censored_before_study_end.to_string(),
            opt_date(first_opioid),
            patient.age_on(start).to_string(),
            age_band(patient.age_on(start)).to_string(),
            patient.sex.to_string(),
            ImdDecile::from_rounded(addresses.imd_rounded_on(id, start)).to_string(),
            ethnicity6_label(ethnicity6.as_deref()).to_string(),
            opt_str(registrations.region_on(id, start).as_deref()),
            comorbidities
                .cancer(&clinical_events, id, &lookback_years_exclusive(start, 5))
                .to_string(),
        ];

        for &(_, hrg_codes) in HRG_GROUPS {
            record.push(
                admissions
                    .any_with_hrg_in_window(id, hrg_codes, &admit_window)
                    .to_string(),
            );
        }

        for &(_, codelist) in med_classes {
            let wait = medications.count_in_window(id, codelist, &windows.during);
            let pre = medications.count_in_window(id, codelist, &windows.pre);
            let post = medications.count_in_window(id, codelist, &windows.post);
            record.push(wait.to_string());
            record.push((wait > 0).to_string());
            record.push(pre.to_string());
            record.push((pre > 0).to_string());
            record.push(post.to_string());
            record.push((post > 0).to_string());
        }

        // Comorbidities over the five years up to and including the start.
        let window = lookback_years(start, 5);
        for (_, flag) in comorbidities.flags(&clinical_events, id, &window) {
            record.push(flag.to_string());
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;
    event!(
        Level::INFO,
        "wrote {} rows to {}",
        outcomes.len(),
        out_path.display()
    );

    header("Admissions");
    println!(
        "patients admitted within {} days of the clock stop: {} ({})",
        ADMISSION_MARGIN_DAYS,
        any_admission_count,
        percent(any_admission_count, outcomes.len()),
    );

    Ok(())
}

fn opt_str(value: Option<&str>) -> String {
    value.unwrap_or("").to_string()
}

fn opt_date(value: Option<NaiveDate>) -> String {
    value.map(|d| d.to_string()).unwrap_or_default()
}
