//! Dataset for people with a completed RTT pathway May 2021 - May 2022,
//! regardless of treatment type or specialty.

use chrono::NaiveDate;
use qu::ick_use::*;
use rtt_opioid_analysis::{
    codelists::StudyCodelists,
    cohort::{resolve_cohort, CLOCKSTOPS},
    comorbidity::{lookback_days, lookback_years},
    demographics::{age_band, ethnicity16_label, ethnicity6_label, wait_band, ImdDecile},
    events::{ClinicalEvents, CodeSystem, Medications},
    header, output_file, percent,
    waitlist::WaitingLists,
    Addresses, ArcStr, Patients, Registrations, Sex,
};
use serde::Serialize;
use std::{collections::BTreeMap, fs};
use term_data_table::{Cell, Row, Table};

#[derive(Serialize)]
struct DatasetRow {
    patient_id: u64,
    count_rtt_rows: usize,
    count_rtt_start_date: usize,
    count_patient_id: usize,
    count_organisation_id: usize,
    count_referral_id: usize,
    rtt_start_date: NaiveDate,
    rtt_end_date: NaiveDate,
    wait_time: i64,
    treatment_function: Option<ArcStr>,
    waiting_list_type: Option<ArcStr>,
    priority_type: Option<ArcStr>,
    reg_end_date: Option<NaiveDate>,
    dod: Option<NaiveDate>,
    end_date: NaiveDate,
    censor_before_rtt_end: bool,
    censor_before_study_end: bool,
    opioid_wait_count: u32,
    opioid_pre_count: u32,
    opioid_post_count: u32,
    hi_opioid_wait_count: u32,
    hi_opioid_pre_count: u32,
    hi_opioid_post_count: u32,
    gaba_wait_count: u32,
    gaba_pre_count: u32,
    gaba_post_count: u32,
    ad_wait_count: u32,
    ad_pre_count: u32,
    ad_post_count: u32,
    nsaid_wait_count: u32,
    nsaid_pre_count: u32,
    nsaid_post_count: u32,
    age: i32,
    age_group: &'static str,
    sex: Sex,
    imd10: String,
    ethnicity6: &'static str,
    ethnicity16: &'static str,
    region: Option<ArcStr>,
    cancer: bool,
    diabetes: bool,
    cardiac: bool,
    copd: bool,
    liver: bool,
    ckd: bool,
    osteoarthritis: bool,
    depress_or_gad: bool,
}

#[qu::ick]
pub fn main() -> Result {
    let patients = Patients::load("patients.bin")?;
    let registrations = Registrations::load("registrations.bin")?;
    let addresses = Addresses::load("addresses.bin")?;
    let medications = Medications::load("medications.bin")?;
    let clinical_events = ClinicalEvents::load("clinical_events.bin")?;
    let waiting_lists = WaitingLists::load("wl_clockstops.bin")?;
    let codelists = StudyCodelists::load(&rtt_opioid_analysis::codelists_dir())?;

    let outcomes = resolve_cohort(&CLOCKSTOPS, &patients, &registrations, &waiting_lists);
    event!(Level::INFO, "{} patients in population", outcomes.len());

    let mut rows = Vec::with_capacity(outcomes.len());
    for outcome in &outcomes {
        let id = outcome.patient_id;
        // The cohort only admits patients it could fully resolve.
        let (Some(patient), Some(start), Some(end), Some(windows)) = (
            patients.find_by_id(id),
            outcome.episode.start_date(),
            outcome.episode.end_date(),
            outcome.windows,
        ) else {
            continue;
        };

        let clin_6mo = lookback_days(start, 182);
        let ethnicity6 =
            clinical_events.last_category_on_or_before(id, &codelists.ethnicity6, start);
        let ethnicity16 =
            clinical_events.last_category_on_or_before(id, &codelists.ethnicity16, start);

        rows.push(DatasetRow {
            patient_id: id,
            count_rtt_rows: outcome.counts.rows,
            count_rtt_start_date: outcome.counts.distinct_start_dates,
            count_patient_id: outcome.counts.distinct_pathway_ids,
            count_organisation_id: outcome.counts.distinct_organisation_ids,
            count_referral_id: outcome.counts.distinct_referral_ids,
            rtt_start_date: start,
            rtt_end_date: end,
            wait_time: outcome.episode.wait_days().unwrap_or(0),
            treatment_function: outcome.episode.record.treatment_function_code.clone(),
            waiting_list_type: outcome.episode.record.waiting_list_type.clone(),
            priority_type: outcome.episode.record.priority_type_code.clone(),
            reg_end_date: outcome.reg_end_date,
            dod: patient.date_of_death,
            end_date: outcome.censor_date,
            censor_before_rtt_end: outcome.censored_before_episode_end,
            censor_before_study_end: outcome.censored_before_study_end,
            opioid_wait_count: medications.count_in_window(id, &codelists.opioid, &windows.during),
            opioid_pre_count: medications.count_in_window(id, &codelists.opioid, &windows.pre),
            opioid_post_count: medications.count_in_window(id, &codelists.opioid, &windows.post),
            hi_opioid_wait_count: medications.count_in_window(
                id,
                &codelists.hi_opioid,
                &windows.during,
            ),
            hi_opioid_pre_count: medications.count_in_window(id, &codelists.hi_opioid, &windows.pre),
            hi_opioid_post_count: medications.count_in_window(
                id,
                &codelists.hi_opioid,
                &windows.post,
            ),
            gaba_wait_count: medications.count_in_window(
                id,
                &codelists.gabapentinoid,
                &windows.during,
            ),
            gaba_pre_count: medications.count_in_window(id, &codelists.gabapentinoid, &windows.pre),
            gaba_post_count: medications.count_in_window(
                id,
                &codelists.gabapentinoid,
                &windows.post,
            ),
            ad_wait_count: medications.count_in_window(
                id,
                &codelists.antidepressant,
                &windows.during,
            ),
            ad_pre_count: medications.count_in_window(id, &codelists.antidepressant, &windows.pre),
            ad_post_count: medications.count_in_window(id, &codelists.antidepressant, &windows.post),
            nsaid_wait_count: medications.count_in_window(id, &codelists.nsaid, &windows.during),
            nsaid_pre_count: medications.count_in_window(id, &codelists.nsaid, &windows.pre),
            nsaid_post_count: medications.count_in_window(id, &codelists.nsaid, &windows.post),
            age: patient.age_on(start),
            age_group: age_band(patient.age_on(start)),
            sex: patient.sex,
            imd10: ImdDecile::from_rounded(addresses.imd_rounded_on(id, start)).to_string(),
            ethnicity6: ethnicity6_label(ethnicity6.as_deref()),
            ethnicity16: ethnicity16_label(ethnicity16.as_deref()),
            region: registrations.region_on(id, start),
            cancer: clinical_events.any_in_window(
                id,
                CodeSystem::Snomed,
                &codelists.cancer,
                &lookback_years(start, 5),
            ),
            diabetes: clinical_events.any_in_window(
                id,
                CodeSystem::Ctv3,
                &codelists.diabetes,
                &clin_6mo,
            ),
            cardiac: clinical_events.any_in_window(
                id,
                CodeSystem::Ctv3,
                &codelists.cardiac,
                &clin_6mo,
            ),
            copd: clinical_events.any_in_window(id, CodeSystem::Ctv3, &codelists.copd, &clin_6mo),
            liver: clinical_events.any_in_window(id, CodeSystem::Ctv3, &codelists.liver, &clin_6mo),
            ckd: clinical_events.any_in_window(id, CodeSystem::Snomed, &codelists.ckd, &clin_6mo),
            osteoarthritis: clinical_events.any_in_window(
                id,
                CodeSystem::Ctv3,
                &codelists.osteoarthritis,
                &clin_6mo,
            ),
            depress_or_gad: clinical_events.any_in_window(
                id,
                CodeSystem::Snomed,
                &codelists.depress_or_gad,
                &clin_6mo,
            ),
        });
    }

    fs::create_dir_all("output")?;
    let out_path = output_file("dataset_clockstops.csv");
    let mut writer = csv::Writer::from_path(&out_path)?;
    for row in &rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    event!(Level::INFO, "wrote {} rows to {}", rows.len(), out_path.display());

    // Terminal summaries for a quick sanity check of the extract.
    let total = rows.len();
    header("Population");
    println!("patients with a completed pathway: {}", total);
    println!(
        "censored before RTT end: {} ({})",
        rows.iter().filter(|r| r.censor_before_rtt_end).count(),
        percent(rows.iter().filter(|r| r.censor_before_rtt_end).count(), total),
    );
    println!(
        "censored before study end: {} ({})",
        rows.iter().filter(|r| r.censor_before_study_end).count(),
        percent(rows.iter().filter(|r| r.censor_before_study_end).count(), total),
    );

    header("Time on waiting list");
    let mut by_band: BTreeMap<&str, usize> = BTreeMap::new();
    for row in &rows {
        *by_band.entry(wait_band(row.wait_time / 7)).or_default() += 1;
    }
    let mut table = Table::new().with_row(
        Row::new()
            .with_cell(Cell::from("Wait"))
            .with_cell(Cell::from("Count"))
            .with_cell(Cell::from("Percentage")),
    );
    for (band, count) in by_band {
        table.add_row(
            Row::new()
                .with_cell(Cell::from(band))
                .with_cell(Cell::from(count.to_string()))
                .with_cell(Cell::from(percent(count, total))),
        );
    }
    println!("{}", table);

    header("Any opioid prescribing");
    let mut table = Table::new().with_row(
        Row::new()
            .with_cell(Cell::from("Window"))
            .with_cell(Cell::from("Patients with any Rx"))
            .with_cell(Cell::from("Percentage")),
    );
    for (label, count) in [
        (
            "6 months pre",
            rows.iter().filter(|r| r.opioid_pre_count > 0).count(),
        ),
        (
            "during wait",
            rows.iter().filter(|r| r.opioid_wait_count > 0).count(),
        ),
        (
            "6 months post",
            rows.iter().filter(|r| r.opioid_post_count > 0).count(),
        ),
    ] {
        table.add_row(
            Row::new()
                .with_cell(Cell::from(label))
                .with_cell(Cell::from(count.to_string()))
                .with_cell(Cell::from(percent(count, total))),
        );
    }
    println!("{}", table);

    Ok(())
}
