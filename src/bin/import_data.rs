use qu::ick_use::*;

use rtt_opioid_analysis::{
    events::{Admissions, ClinicalEvents, Medications},
    waitlist::WaitingLists,
    Addresses, Patients, Registrations,
};

#[qu::ick]
fn main() -> Result {
    let patients = Patients::load_orig("patients.csv")?;
    patients.save("patients.bin")?;

    let registrations = Registrations::load_orig("practice_registrations.csv")?;
    registrations.save("registrations.bin")?;

    let addresses = Addresses::load_orig("addresses.csv")?;
    addresses.save("addresses.bin")?;

    let medications = Medications::load_orig("medications.csv")?;
    medications.save("medications.bin")?;

    let clinical_events = ClinicalEvents::load_orig("clinical_events.csv")?;
    clinical_events.save("clinical_events.bin")?;

    let admissions = Admissions::load_orig("apcs.csv")?;
    admissions.save("admissions.bin")?;

    let clockstops = WaitingLists::load_orig("wl_clockstops.csv")?;
    clockstops.save("wl_clockstops.bin")?;

    let openpathways = WaitingLists::load_orig("wl_openpathways.csv")?;
    openpathways.save("wl_openpathways.bin")?;

    Ok(())
}
