//! Dataset for people with an RTT pathway still open at the 1 May 2022
//! census, regardless of treatment type or specialty.

use chrono::NaiveDate;
use qu::ick_use::*;
use rtt_opioid_analysis::{
    codelists::StudyCodelists,
    cohort::{resolve_cohort, OPENPATHWAYS},
    comorbidity::{lookback_years_exclusive, Comorbidities},
    demographics::{age_band, ethnicity16_label, ethnicity6_label, wait_band, ImdDecile},
    events::ClinicalEvents,
    header, output_file, percent,
    waitlist::WaitingLists,
    Addresses, Patients, Registrations,
};
use std::{collections::BTreeMap, fs};
use term_data_table::{Cell, Row, Table};

const COMORBIDITIES: &[&str] = &[
    "diabetes",
    "cardiac",
    "copd",
    "liver",
    "ckd",
    "osteoarthritis",
    "depress_or_gad",
    "ra",
];

#[qu::ick]
pub fn main() -> Result {
    let census = OPENPATHWAYS.open_census.expect("openpathways has a census date");
    let patients = Patients::load("patients.bin")?;
    let registrations = Registrations::load("registrations.bin")?;
    let addresses = Addresses::load("addresses.bin")?;
    let clinical_events = ClinicalEvents::load("clinical_events.bin")?;
    let waiting_lists = WaitingLists::load("wl_openpathways.bin")?;
    let codelists = StudyCodelists::load(&rtt_opioid_analysis::codelists_dir())?;
    let comorbidities = Comorbidities::subset(&codelists, COMORBIDITIES)?;

    let outcomes = resolve_cohort(&OPENPATHWAYS, &patients, &registrations, &waiting_lists);
    event!(Level::INFO, "{} patients waiting at census", outcomes.len());

    fs::create_dir_all("output")?;
    let out_path = output_file("dataset_openpathways.csv");
    let mut writer = csv::Writer::from_path(&out_path)?;

    // Dynamic trailing columns for the comorbidity flags, like the med-class
    // columns in the orthopaedic dataset.
    let mut headers: Vec<String> = [
        "patient_id",
        "count_rtt_rows",
        "count_rtt_start_date",
        "count_patient_id",
        "count_organisation_id",
        "count_referral_id",
        "rtt_start_date",
        "wait_time",
        "treatment_function",
        "waiting_list_type",
        "priority_type",
        "reg_end_date",
        "dod",
        "end_date",
        "censor_before_study_end",
        "age",
        "age_group",
        "sex",
        "imd10",
        "ethnicity6",
        "ethnicity16",
        "region",
        "cancer",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    headers.extend(COMORBIDITIES.iter().map(|s| s.to_string()));
    writer.write_record(&headers)?;

    let mut wait_bands: BTreeMap<&str, usize> = BTreeMap::new();
    let mut censored = 0usize;

    for outcome in &outcomes {
        let id = outcome.patient_id;
        let (Some(patient), Some(start)) =
            (patients.find_by_id(id), outcome.episode.start_date())
        else {
            continue;
        };

        let wait_time = outcome.episode.wait_days_until(census).unwrap_or(0);
        *wait_bands.entry(wait_band(wait_time / 7)).or_default() += 1;
        if outcome.censored_before_study_end {
            censored += 1;
        }

        let ethnicity6 =
            clinical_events.last_category_on_or_before(id, &codelists.ethnicity6, start);
        let ethnicity16 =
            clinical_events.last_category_on_or_before(id, &codelists.ethnicity16, start);
        let cancer = comorbidities.cancer(
            &clinical_events,
            id,
            &lookback_years_exclusive(start, 5),
        );

        let mut record: Vec<String> = vec![
            id.to_string(),
            outcome.counts.rows.to_string(),
            outcome.counts.distinct_start_dates.to_string(),
            outcome.counts.distinct_pathway_ids.to_string(),
            outcome.counts.distinct_organisation_ids.to_string(),
            outcome.counts.distinct_referral_ids.to_string(),
            start.to_string(),
            wait_time.to_string(),
            opt_str(outcome.episode.record.treatment_function_code.as_deref()),
            opt_str(outcome.episode.record.waiting_list_type.as_deref()),
            opt_str(outcome.episode.record.priority_type_code.as_deref()),
            opt_date(outcome.reg_end_date),
            opt_date(patient.date_of_death),
            outcome.censor_date.to_string(),
            outcome.censored_before_study_end.to_string(),
            patient.age_on(start).to_string(),
            age_band(patient.age_on(start)).to_string(),
            patient.sex.to_string(),
            ImdDecile::from_rounded(addresses.imd_rounded_on(id, start)).to_string(),
            ethnicity6_label(ethnicity6.as_deref()).to_string(),
            ethnicity16_label(ethnicity16.as_deref()).to_string(),
            opt_str(registrations.region_on(id, start).as_deref()),
            cancer.to_string(),
        ];
        // Comorbidities over the two years before (but not on) the start.
        let window = lookback_years_exclusive(start, 2);
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

    let total = outcomes.len();
    header("Open pathways at census");
    println!("patients: {}", total);
    println!("censored before census: {} ({})", censored, percent(censored, total));

    header("Time waited so far");
    let mut table = Table::new().with_row(
        Row::new()
            .with_cell(Cell::from("Wait"))
            .with_cell(Cell::from("Count"))
            .with_cell(Cell::from("Percentage")),
    );
    for (band, count) in wait_bands {
        table.add_row(
            Row::new()
                .with_cell(Cell::from(band))
                .with_cell(Cell::from(count.to_string()))
                .with_cell(Cell::from(percent(count, total))),
        );
    }
    println!("{}", table);

    Ok(())
}

fn opt_str(value: Option<&str>) -> String {
    value.unwrap_or("").to_string()
}

fn opt_date(value: Option<NaiveDate>) -> String {
    value.map(|d| d.to_string()).unwrap_or_default()
}
