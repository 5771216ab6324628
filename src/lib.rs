pub mod codelists;
pub mod cohort;
pub mod comorbidity;
pub mod demographics;
pub mod events;
pub mod followup;
pub mod measures;
mod util;
pub mod waitlist;

pub use anyhow::{Context, Error};
use chrono::{Datelike, NaiveDate};
use qu::ick_use::*;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt, fs, io,
    ops::Deref,
    path::{Path, PathBuf},
    sync::Arc,
};

pub use crate::{
    followup::{censoring_date, TimeWindow, WindowParams, Windows},
    util::{header, percent},
    waitlist::{resolve_episode, Episode, Pick, RecordFilter, SortKey, WaitingLists},
};
use crate::util::{iso_date, opt_imd_rounded, opt_iso_date, optional_string};

pub type ArcStr = Arc<str>;
pub type Result<T = (), E = anyhow::Error> = std::result::Result<T, E>;
pub type PatientId = u64;

/// Sex as recorded in the patient table.
///
/// The population definitions only admit male/female; other values survive
/// import so they can be counted before exclusion.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize, Hash, Ord, PartialOrd)]
pub enum Sex {
    #[serde(rename = "male", alias = "M")]
    Male,
    #[serde(rename = "female", alias = "F")]
    Female,
    #[serde(rename = "intersex")]
    Intersex,
    #[serde(rename = "unknown", alias = "")]
    Unknown,
}

impl Sex {
    pub fn is_male_or_female(self) -> bool {
        matches!(self, Sex::Male | Sex::Female)
    }
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Sex::Male => f.write_str("male"),
            Sex::Female => f.write_str("female"),
            Sex::Intersex => f.write_str("intersex"),
            Sex::Unknown => f.write_str("unknown"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct PatientRaw {
    patient_id: PatientId,
    sex: Sex,
    #[serde(deserialize_with = "iso_date")]
    date_of_birth: NaiveDate,
    #[serde(deserialize_with = "opt_iso_date")]
    date_of_death: Option<NaiveDate>,
}

/// A row in the patients dataset.
///
/// In this and future datastructures, `patient_id` always identifies the same
/// patient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub patient_id: PatientId,
    pub sex: Sex,
    pub date_of_birth: NaiveDate,
    pub date_of_death: Option<NaiveDate>,
}

impl From<PatientRaw> for Patient {
    fn from(from: PatientRaw) -> Self {
        Self {
            patient_id: from.patient_id,
            sex: from.sex,
            date_of_birth: from.date_of_birth,
            date_of_death: from.date_of_death,
        }
    }
}

impl Patient {
    /// Age in completed years on the given date.
    pub fn age_on(&self, date: NaiveDate) -> i32 {
        let mut age = date.year() - self.date_of_birth.year();
        if (date.month(), date.day()) < (self.date_of_birth.month(), self.date_of_birth.day()) {
            age -= 1;
        }
        age
    }
}

/// The parsed list of patients, with a pre-built index for the `patient_id` field.
pub struct Patients {
    els: Arc<Vec<Patient>>,
    id_idx: BTreeMap<PatientId, usize>,
}

impl Patients {
    pub fn load_orig(path: impl AsRef<Path>) -> Result<Self, Error> {
        let raw: Vec<PatientRaw> = load_orig(path)?;
        Ok(Self::new(raw.into_iter().map(Into::into).collect()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        Ok(Self::new(load(path)?))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result {
        Ok(save(&self.els, path)?)
    }

    pub fn find_by_id(&self, id: PatientId) -> Option<&Patient> {
        let idx = self.id_idx.get(&id)?;
        self.els.get(*idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Patient> + '_ {
        self.els.iter()
    }

    pub fn filter(&self, f: impl Fn(&Patient) -> bool) -> Self {
        Self::new(self.els.iter().filter(|p| f(p)).cloned().collect())
    }

    pub fn retain(&mut self, f: impl Fn(&Patient) -> bool) {
        Arc::make_mut(&mut self.els).retain(f);
        self.rebuild_index();
    }

    fn new(els: Vec<Patient>) -> Self {
        let mut this = Patients {
            els: els.into(),
            id_idx: BTreeMap::new(),
        };
        this.rebuild_index();
        this
    }

    fn rebuild_index(&mut self) {
        self.id_idx.clear();
        for (idx, el) in self.els.iter().enumerate() {
            self.id_idx.insert(el.patient_id, idx);
        }
    }
}

impl Deref for Patients {
    type Target = [Patient];
    fn deref(&self) -> &Self::Target {
        &*self.els
    }
}

impl FromIterator<Patient> for Patients {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = Patient>,
    {
        Self::new(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RegistrationRaw {
    patient_id: PatientId,
    #[serde(deserialize_with = "iso_date")]
    start_date: NaiveDate,
    #[serde(deserialize_with = "opt_iso_date")]
    end_date: Option<NaiveDate>,
    #[serde(
        rename = "practice_nuts1_region_name",
        deserialize_with = "optional_string"
    )]
    region: Option<ArcStr>,
}

/// A practice registration period. A null end date means the registration was
/// still open at extract time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub patient_id: PatientId,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub region: Option<ArcStr>,
}

impl From<RegistrationRaw> for Registration {
    fn from(from: RegistrationRaw) -> Self {
        Self {
            patient_id: from.patient_id,
            start_date: from.start_date,
            end_date: from.end_date,
            region: from.region,
        }
    }
}

impl Registration {
    /// Sort key treating an open registration as unbounded.
    fn end_or_max(&self) -> NaiveDate {
        self.end_date.unwrap_or(NaiveDate::MAX)
    }

    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start_date <= date && self.end_date.map_or(true, |end| end >= date)
    }
}

/// The parsed list of registration periods, indexed by patient.
pub struct Registrations {
    els: Arc<Vec<Registration>>,
    id_idx: BTreeMap<PatientId, Vec<usize>>,
}

impl Registrations {
    pub fn load_orig(path: impl AsRef<Path>) -> Result<Self, Error> {
        let raw: Vec<RegistrationRaw> = load_orig(path)?;
        Ok(Self::new(raw.into_iter().map(Into::into).collect()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        Ok(Self::new(load(path)?))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result {
        Ok(save(&self.els, path)?)
    }

    pub fn for_patient(&self, id: PatientId) -> impl Iterator<Item = &Registration> + Clone + '_ {
        let idxs = self.id_idx.get(&id).map(Vec::as_slice).unwrap_or(&[]);
        idxs.iter().map(|idx| &self.els[*idx])
    }

    /// The registration used for censoring in the completed-pathway cohorts:
    /// started at least `lead_days` before `episode_start`, not ended on or
    /// before it, latest end date wins (open-ended counts as latest).
    pub fn latest_qualifying(
        &self,
        id: PatientId,
        episode_start: NaiveDate,
        lead_days: i64,
    ) -> Option<&Registration> {
        let cutoff = episode_start - chrono::Duration::days(lead_days);
        self.for_patient(id)
            .filter(|reg| {
                reg.start_date <= cutoff && reg.end_date.map_or(true, |end| end > episode_start)
            })
            .max_by_key(|reg| reg.end_or_max())
    }

    /// The registration used for censoring in the orthopaedic cohort: must
    /// span the whole of `[from, to]`, latest end date wins.
    pub fn spanning(&self, id: PatientId, from: NaiveDate, to: NaiveDate) -> Option<&Registration> {
        self.for_patient(id)
            .filter(|reg| reg.start_date <= from && reg.end_date.map_or(true, |end| end >= to))
            .max_by_key(|reg| reg.end_or_max())
    }

    /// The registration in force on `date` among those started at least
    /// `lead_days` earlier (open-pathway censoring rule).
    pub fn qualifying_on(
        &self,
        id: PatientId,
        date: NaiveDate,
        lead_days: i64,
    ) -> Option<&Registration> {
        let cutoff = date - chrono::Duration::days(lead_days);
        self.for_patient(id)
            .filter(|reg| reg.start_date <= cutoff && reg.covers(date))
            .max_by_key(|reg| reg.end_or_max())
    }

    /// NUTS1 region of the practice the patient was registered with on `date`.
    pub fn region_on(&self, id: PatientId, date: NaiveDate) -> Option<ArcStr> {
        self.for_patient(id)
            .filter(|reg| reg.covers(date))
            .max_by_key(|reg| reg.end_or_max())
            .and_then(|reg| reg.region.clone())
    }

    fn new(els: Vec<Registration>) -> Self {
        let mut this = Registrations {
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

impl Deref for Registrations {
    type Target = [Registration];
    fn deref(&self) -> &Self::Target {
        &*self.els
    }
}

impl FromIterator<Registration> for Registrations {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = Registration>,
    {
        Self::new(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct AddressRaw {
    patient_id: PatientId,
    #[serde(deserialize_with = "opt_iso_date")]
    start_date: Option<NaiveDate>,
    #[serde(deserialize_with = "opt_iso_date")]
    end_date: Option<NaiveDate>,
    #[serde(deserialize_with = "opt_imd_rounded")]
    imd_rounded: Option<u32>,
}

/// An address period carrying the rounded IMD rank of the patient's area.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    pub patient_id: PatientId,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub imd_rounded: Option<u32>,
}

impl From<AddressRaw> for Address {
    fn from(from: AddressRaw) -> Self {
        Self {
            patient_id: from.patient_id,
            start_date: from.start_date,
            end_date: from.end_date,
            imd_rounded: from.imd_rounded,
        }
    }
}

/// The parsed list of address periods, indexed by patient.
pub struct Addresses {
    els: Arc<Vec<Address>>,
    id_idx: BTreeMap<PatientId, Vec<usize>>,
}

impl Addresses {
    pub fn load_orig(path: impl AsRef<Path>) -> Result<Self, Error> {
        let raw: Vec<AddressRaw> = load_orig(path)?;
        Ok(Self::new(raw.into_iter().map(Into::into).collect()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        Ok(Self::new(load(path)?))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result {
        Ok(save(&self.els, path)?)
    }

    pub fn for_patient(&self, id: PatientId) -> impl Iterator<Item = &Address> + '_ {
        let idxs = self.id_idx.get(&id).map(Vec::as_slice).unwrap_or(&[]);
        idxs.iter().map(|idx| &self.els[*idx])
    }

    /// Rounded IMD rank of the address in force on `date` (latest start wins).
    pub fn imd_rounded_on(&self, id: PatientId, date: NaiveDate) -> Option<u32> {
        self.for_patient(id)
            .filter(|addr| {
                addr.start_date.map_or(true, |start| start <= date)
                    && addr.end_date.map_or(true, |end| end >= date)
            })
            .max_by_key(|addr| addr.start_date)
            .and_then(|addr| addr.imd_rounded)
    }

    fn new(els: Vec<Address>) -> Self {
        let mut this = Addresses {
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

impl Deref for Addresses {
    type Target = [Address];
    fn deref(&self) -> &Self::Target {
        &*self.els
    }
}

/// Load data into memory.
pub(crate) fn load<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>> {
    fn inner<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
        let path = util::output_path(path);
        let reader = io::BufReader::new(fs::File::open(path)?);
        bincode::deserialize_from(reader).map_err(Into::into)
    }
    let path = path.as_ref();
    util::check_extension(path, "bin")?;

    inner(path).with_context(|| format!("unable to load data from \"{}\"", path.display()))
}

/// Save data to disk.
pub(crate) fn save<T: Serialize>(contents: &[T], path: impl AsRef<Path>) -> Result {
    fn inner<T: Serialize>(contents: &[T], path: &Path) -> Result {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("could not create parent")?;
        }
        if util::path_exists(path)? {
            event!(
                Level::WARN,
                "overwriting existing file at \"{}\"",
                path.display()
            );
        }
        let mut out = io::BufWriter::new(fs::File::create(path)?);
        bincode::serialize_into(&mut out, contents)?;
        Ok(())
    }
    let path = path.as_ref();
    let path = util::output_path(path);
    util::check_extension(&path, "bin")?;

    inner(contents, &path).with_context(|| format!("unable to save data to \"{}\"", path.display()))
}

/// Load data into memory from the original database extract.
pub(crate) fn load_orig<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>, Error> {
    let path = path.as_ref();
    let path = util::orig_path(path);
    csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(&path)?
        .into_deserialize()
        .collect::<Result<Vec<T>, _>>()
        .with_context(|| format!("while loading \"{}\"", path.display()))
}

pub fn file_exists(path: &Path) -> io::Result<bool> {
    util::path_exists(path)
}

/// Where the analysis binaries write their CSV outputs.
pub fn output_file(name: &str) -> PathBuf {
    util::output_path(Path::new(name))
}

/// Where the codelist CSV exports live.
pub fn codelists_dir() -> PathBuf {
    util::codelists_path(Path::new(""))
}
