//! Weekly prescribing rates in the six months before the wait, during the
//! wait (up to a year) and after it, for completed orthopaedic pathways.
//! One numerator drug class per run, selected with `--codelist`; each rate is
//! also stratified by prior opioid use, age band, IMD decile and sex.
//!
//! `--variant` picks between the cohort parameterisations that were run
//! historically. They differ in sort order, follow-up length and how "prior
//! opioid use" is defined, and are deliberately not merged.

use chrono::Duration;
use clap::Parser;
use qu::ick_use::*;
use rtt_opioid_analysis::{
    codelists::StudyCodelists,
    cohort::{resolve_cohort, CohortConfig, ANY_OPIOID_MEASURES, OPIOID_ALL_MEASURES, ORTHO_MEASURES},
    comorbidity::lookback_years,
    demographics::{age_band, ImdDecile},
    events::{ClinicalEvents, CodeSystem, Medications},
    measures::{offsets_from, write_series_csv, WeeklySeries},
    waitlist::WaitingLists,
    Addresses, Patients, Registrations,
};

#[derive(Parser)]
struct Opt {
    /// Medication codelist for the numerator (e.g. opioid, weak_opioid,
    /// strong_opioid, gabapentinoid).
    #[clap(long, default_value = "opioid")]
    codelist: String,
    /// Cohort parameterisation: "ortho", "any_opioid" or "all".
    #[clap(long, default_value = "ortho")]
    variant: String,
}

const WAIT_WEEKS: i64 = 52;
const PRE_WEEKS: i64 = 26;
const POST_WEEKS: i64 = 26;

/// How many prescriptions in the pre window make a patient a prior user.
/// The "all" variant asks for established use, not just any use.
fn prior_threshold(variant: &str) -> u32 {
    if variant == "all" {
        3
    } else {
        1
    }
}

struct PatientSeries {
    wait_offsets: Vec<i64>,
    wait_active: i64,
    post_offsets: Vec<i64>,
    post_active: i64,
    pre_offsets: Vec<i64>,
    prior_opioid: bool,
    age_group: &'static str,
    imd: String,
    sex: String,
}

#[qu::ick]
pub fn main(opt: Opt) -> Result {
    let config: &CohortConfig = match opt.variant.as_str() {
        "ortho" => &ORTHO_MEASURES,
        "any_opioid" => &ANY_OPIOID_MEASURES,
        "all" => &OPIOID_ALL_MEASURES,
        other => bail!("unknown variant \"{}\"", other),
    };

    let patients = Patients::load("patients.bin")?;
    let registrations = Registrations::load("registrations.bin")?;
    let addresses = Addresses::load("addresses.bin")?;
    let medications = Medications::load("medications.bin")?;
    let clinical_events = ClinicalEvents::load("clinical_events.bin")?;
    let waiting_lists = WaitingLists::load("wl_clockstops.bin")?;
    let codelists = StudyCodelists::load(&rtt_opioid_analysis::codelists_dir())?;
    let numerator_codes = codelists
        .medication_by_name(&opt.codelist)
        .with_context(|| format!("no medication codelist named \"{}\"", opt.codelist))?;

    let outcomes = resolve_cohort(config, &patients, &registrations, &waiting_lists);

    // Resolve first, then keep the orthopaedic, cancer-free population.
    let mut data = Vec::new();
    for outcome in &outcomes {
        let id = outcome.patient_id;
        let is_surgery = config.surgery_functions.map_or(true, |surgery| {
            outcome
                .episode
                .record
                .treatment_function_code
                .as_deref()
                .map_or(false, |code| surgery.contains(&code))
        });
        if !is_surgery {
            continue;
        }
        let (Some(patient), Some(start), Some(end), Some(windows)) = (
            patients.find_by_id(id),
            outcome.episode.start_date(),
            outcome.episode.end_date(),
            outcome.windows,
        ) else {
            continue;
        };
        if config.exclude_cancer
            && clinical_events.any_in_window(
                id,
                CodeSystem::Snomed,
                &codelists.cancer,
                &lookback_years(start, 5),
            )
        {
            continue;
        }

        let rx_dates: Vec<_> = medications
            .for_patient(id)
            .filter(|evt| numerator_codes.contains(&evt.dmd_code))
            .map(|evt| evt.date)
            .collect();
        let censor = outcome.censor_date;
        let post_anchor = end + Duration::days(1);
        let pre_anchor = start - Duration::days(config.windows.pre_days);
        let prior_count = medications.count_in_window(id, &codelists.opioid, &windows.pre);

        data.push(PatientSeries {
            wait_offsets: offsets_from(start, rx_dates.iter().copied()),
            // On the list and under observation: whichever runs out first.
            wait_active: (censor.min(end) - start).num_days(),
            post_offsets: offsets_from(post_anchor, rx_dates.iter().copied()),
            post_active: (censor - post_anchor).num_days(),
            pre_offsets: offsets_from(pre_anchor, rx_dates.iter().copied()),
            prior_opioid: prior_count >= prior_threshold(&opt.variant),
            age_group: age_band(patient.age_on(start)),
            imd: ImdDecile::from_rounded(addresses.imd_rounded_on(id, start)).to_string(),
            sex: patient.sex.to_string(),
        });
    }
    event!(
        Level::INFO,
        "{} of {} resolved patients in the measures population",
        data.len(),
        outcomes.len()
    );

    let mut series = Vec::new();
    for (phase, weeks) in [
        ("wait", WAIT_WEEKS),
        ("post", POST_WEEKS),
        ("pre", PRE_WEEKS),
    ] {
        let mut overall = WeeklySeries::new(&format!("count_{}", phase), weeks);
        let mut by_prior =
            WeeklySeries::grouped(&format!("count_{}_prior", phase), "prior_opioid_rx", weeks);
        let mut by_age = WeeklySeries::grouped(&format!("count_{}_age", phase), "age_group", weeks);
        let mut by_imd = WeeklySeries::grouped(&format!("count_{}_imd", phase), "imd_decile", weeks);
        let mut by_sex = WeeklySeries::grouped(&format!("count_{}_sex", phase), "sex", weeks);

        for patient in &data {
            let (offsets, active) = match phase {
                "wait" => (&patient.wait_offsets, Some(patient.wait_active)),
                "post" => (&patient.post_offsets, Some(patient.post_active)),
                _ => (&patient.pre_offsets, None),
            };
            overall.add_patient("overall", offsets, active);
            by_prior.add_patient(&patient.prior_opioid.to_string(), offsets, active);
            by_age.add_patient(patient.age_group, offsets, active);
            by_imd.add_patient(&patient.imd, offsets, active);
            by_sex.add_patient(&patient.sex, offsets, active);
        }

        series.extend([overall, by_prior, by_age, by_imd, by_sex]);
    }

    std::fs::create_dir_all("output")?;
    let out_path = rtt_opioid_analysis::output_file(&format!(
        "measures_{}_{}.csv",
        opt.variant, opt.codelist
    ));
    write_series_csv(&out_path, &series)?;
    event!(Level::INFO, "wrote weekly series to {}", out_path.display());

    Ok(())
}
