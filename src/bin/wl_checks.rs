//! Record-level checks on the waiting-list extract: monthly volumes by list
//! type and specialty, rows with missing end dates, and admission volumes by
//! region. Run before the cohorts to understand the shape of the data.

use chrono::{Datelike, NaiveDate};
use qu::ick_use::*;
use rtt_opioid_analysis::{
    events::Admissions,
    header, output_file,
    waitlist::{WaitingListRecord, WaitingLists},
    ArcStr, Registrations,
};
use std::collections::{BTreeMap, BTreeSet};
use term_data_table::{Cell, Row, Table};

/// Admitted vs not-admitted list type codes.
const ADMITTED_TYPES: &[&str] = &["IRTT", "PTLI", "RTTI"];
const NOT_ADMITTED_TYPES: &[&str] = &["ORTT", "PTLO", "RTTO"];
const ORTHO_FUNCTIONS: &[&str] = &["110", "111"];

/// High-volume treatment functions reported individually.
const KEY_FUNCTIONS: &[&str] = &[
    "100", "110", "120", "130", "140", "150", "160", "170", "300", "301", "320", "330", "340",
    "400", "410", "430", "502",
];

const WL_MONTHS_START: (i32, u32) = (2021, 5);
const WL_MONTHS: usize = 13;
const ADMIT_MONTHS_START: (i32, u32) = (2020, 1);
const ADMIT_MONTHS: usize = 36;

fn month_index(date: NaiveDate, start: (i32, u32), months: usize) -> Option<usize> {
    let idx = (date.year() - start.0) * 12 + date.month() as i32 - start.1 as i32;
    (0..months as i32).contains(&idx).then_some(idx as usize)
}

fn month_label(start: (i32, u32), idx: usize) -> String {
    let months0 = start.0 * 12 + start.1 as i32 - 1 + idx as i32;
    format!("{}-{:02}", months0 / 12, months0 % 12 + 1)
}

/// Distinct referral ids per month of clock stop, over rows matching `keep`.
fn monthly_referrals(
    waiting_lists: &WaitingLists,
    keep: impl Fn(&WaitingListRecord) -> bool,
) -> Vec<usize> {
    let mut buckets: Vec<BTreeSet<ArcStr>> = vec![BTreeSet::new(); WL_MONTHS];
    for record in waiting_lists.iter().filter(|r| keep(*r)) {
        let Some(end) = record.period_end_date else {
            continue;
        };
        if let Some(idx) = month_index(end, WL_MONTHS_START, WL_MONTHS) {
            buckets[idx].insert(record.referral_id.clone());
        }
    }
    buckets.into_iter().map(|set| set.len()).collect()
}

fn has_type(record: &WaitingListRecord, types: &[&str]) -> bool {
    record
        .waiting_list_type
        .as_deref()
        .map_or(false, |ty| types.contains(&ty))
}

fn is_ortho(record: &WaitingListRecord) -> bool {
    record
        .treatment_function_code
        .as_deref()
        .map_or(false, |code| ORTHO_FUNCTIONS.contains(&code))
}

#[qu::ick]
pub fn main() -> Result {
    let waiting_lists = WaitingLists::load("wl_clockstops.bin")?;
    let registrations = Registrations::load("registrations.bin")?;
    let admissions = Admissions::load("admissions.bin")?;

    // Rows with missing dates never make it into a cohort; count them first.
    header("Missing dates");
    let total_rows = waiting_lists.len();
    let missing_end = waiting_lists
        .iter()
        .filter(|r| r.period_end_date.is_none())
        .count();
    let missing_end_referrals: BTreeSet<_> = waiting_lists
        .iter()
        .filter(|r| r.period_end_date.is_none())
        .map(|r| r.referral_id.clone())
        .collect();
    println!("total rows: {}", total_rows);
    println!(
        "rows with missing end date: {} ({} distinct referrals)",
        missing_end,
        missing_end_referrals.len()
    );

    header("Monthly closed referrals");
    let measures: Vec<(&str, Vec<usize>)> = vec![
        ("closed_total", monthly_referrals(&waiting_lists, |_| true)),
        (
            "closed_admit_total",
            monthly_referrals(&waiting_lists, |r| has_type(r, ADMITTED_TYPES)),
        ),
        (
            "closed_not_admit_total",
            monthly_referrals(&waiting_lists, |r| has_type(r, NOT_ADMITTED_TYPES)),
        ),
        ("closed_ortho", monthly_referrals(&waiting_lists, is_ortho)),
        (
            "closed_admit_ortho",
            monthly_referrals(&waiting_lists, |r| has_type(r, ADMITTED_TYPES) && is_ortho(r)),
        ),
        (
            "closed_not_admit_ortho",
            monthly_referrals(&waiting_lists, |r| {
                has_type(r, NOT_ADMITTED_TYPES) && is_ortho(r)
            }),
        ),
    ];

    // Per-specialty volumes (CSV only; too wide for the terminal).
    let mut function_measures: Vec<(String, Vec<usize>)> = Vec::new();
    for &code in KEY_FUNCTIONS {
        let matches_code =
            |r: &WaitingListRecord| r.treatment_function_code.as_deref() == Some(code);
        function_measures.push((
            format!("count_{}", code),
            monthly_referrals(&waiting_lists, matches_code),
        ));
        function_measures.push((
            format!("count_admit_{}", code),
            monthly_referrals(&waiting_lists, |r| {
                matches_code(r) && has_type(r, ADMITTED_TYPES)
            }),
        ));
        function_measures.push((
            format!("count_not_admit_{}", code),
            monthly_referrals(&waiting_lists, |r| {
                matches_code(r) && has_type(r, NOT_ADMITTED_TYPES)
            }),
        ));
    }

    let mut table = Table::new();
    let mut head = Row::new().with_cell(Cell::from("Month"));
    for (name, _) in &measures {
        head = head.with_cell(Cell::from(*name));
    }
    table.add_row(head);
    for idx in 0..WL_MONTHS {
        let mut row = Row::new().with_cell(Cell::from(month_label(WL_MONTHS_START, idx)));
        for (_, counts) in &measures {
            row = row.with_cell(Cell::from(counts[idx].to_string()));
        }
        table.add_row(row);
    }
    println!("{}", table);

    std::fs::create_dir_all("output")?;
    let out_path = output_file("wl_checks.csv");
    let mut writer = csv::Writer::from_path(&out_path)?;
    writer.write_record(["measure", "month", "group", "count"])?;
    for (name, counts) in measures
        .iter()
        .map(|(name, counts)| (name.to_string(), counts))
        .chain(
            function_measures
                .iter()
                .map(|(name, counts)| (name.clone(), counts)),
        )
    {
        for (idx, count) in counts.iter().enumerate() {
            writer.write_record([
                name.clone(),
                month_label(WL_MONTHS_START, idx),
                String::new(),
                count.to_string(),
            ])?;
        }
    }

    // Admission volumes by region of the patient's practice at admission.
    header("Admissions by region");
    let mut by_region: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for admission in admissions.iter() {
        let Some(idx) = month_index(admission.admission_date, ADMIT_MONTHS_START, ADMIT_MONTHS)
        else {
            continue;
        };
        let region = registrations
            .region_on(admission.patient_id, admission.admission_date)
            .map(|r| r.to_string())
            .unwrap_or_else(|| "Missing".to_string());
        by_region.entry(region).or_insert_with(|| vec![0; ADMIT_MONTHS])[idx] += 1;
    }
    for (region, counts) in &by_region {
        let total: usize = counts.iter().sum();
        println!("{}: {} admissions", region, total);
        for (idx, count) in counts.iter().enumerate() {
            writer.write_record([
                "admit_count".to_string(),
                month_label(ADMIT_MONTHS_START, idx),
                region.clone(),
                count.to_string(),
            ])?;
        }
    }
    writer.flush()?;
    event!(Level::INFO, "wrote checks to {}", out_path.display());

    Ok(())
}
