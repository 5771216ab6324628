//! Codelists: externally curated sets of clinical and medication codes.
//!
//! Each list is a CSV export from OpenCodelists with a named code column
//! (dm+d for medications, SNOMED CT or CTV3 for clinical events). Some also
//! carry a category column (the ethnicity groupings). `codelists.txt` at the
//! repository root records which exports are expected.

use crate::{ArcStr, Result};
use anyhow::{bail, Context};
use std::{
    collections::{BTreeMap, BTreeSet},
    ops::{Add, Sub},
    path::Path,
    sync::Arc,
};

/// A set of codes. Kind (dm+d/SNOMED/CTV3) is by convention of the source
/// file; codes are compared as exact strings.
#[derive(Debug, Default, Clone)]
pub struct Codelist {
    codes: Arc<BTreeSet<ArcStr>>,
}

impl Codelist {
    /// Duplicates will be removed.
    pub fn new(codes: impl IntoIterator<Item = impl Into<ArcStr>>) -> Self {
        Codelist {
            codes: Arc::new(codes.into_iter().map(Into::into).collect()),
        }
    }

    /// Load a codelist from a CSV export, taking codes from `column`.
    pub fn load(path: impl AsRef<Path>, column: &str) -> Result<Self> {
        fn inner(path: &Path, column: &str) -> Result<Codelist> {
            let mut reader = csv::ReaderBuilder::new()
                .has_headers(true)
                .trim(csv::Trim::All)
                .from_path(path)?;
            let headers = reader.headers()?;
            let Some(idx) = headers.iter().position(|h| h == column) else {
                bail!("no column named \"{}\"", column);
            };
            let mut codes = BTreeSet::new();
            for record in reader.records() {
                let record = record?;
                let code = record.get(idx).unwrap_or("");
                if !code.is_empty() {
                    codes.insert(ArcStr::from(code));
                }
            }
            Ok(Codelist {
                codes: Arc::new(codes),
            })
        }
        let path = path.as_ref();
        inner(path, column)
            .with_context(|| format!("error loading codelist from \"{}\"", path.display()))
    }

    pub fn contains(&self, code: &str) -> bool {
        self.codes.contains(code)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArcStr> + '_ {
        self.codes.iter()
    }
}

// Codelist algebra: the study derives some lists from others (all cancer =
// other + lung + haematological; short-acting opioids = all - long-acting).

impl Add<&Codelist> for &Codelist {
    type Output = Codelist;
    fn add(self, other: &Codelist) -> Codelist {
        Codelist {
            codes: Arc::new(self.codes.union(&other.codes).cloned().collect()),
        }
    }
}

impl Sub<&Codelist> for &Codelist {
    type Output = Codelist;
    fn sub(self, other: &Codelist) -> Codelist {
        Codelist {
            codes: Arc::new(self.codes.difference(&other.codes).cloned().collect()),
        }
    }
}

/// A codelist whose rows also assign each code to a category (e.g. the
/// ethnicity groupings).
#[derive(Debug, Default, Clone)]
pub struct CategorisedCodelist {
    map: Arc<BTreeMap<ArcStr, ArcStr>>,
}

impl CategorisedCodelist {
    pub fn new(
        entries: impl IntoIterator<Item = (impl Into<ArcStr>, impl Into<ArcStr>)>,
    ) -> Self {
        CategorisedCodelist {
            map: Arc::new(
                entries
                    .into_iter()
                    .map(|(code, cat)| (code.into(), cat.into()))
                    .collect(),
            ),
        }
    }

    pub fn load(path: impl AsRef<Path>, code_column: &str, category_column: &str) -> Result<Self> {
        fn inner(path: &Path, code_column: &str, category_column: &str) -> Result<CategorisedCodelist> {
            let mut reader = csv::ReaderBuilder::new()
                .has_headers(true)
                .trim(csv::Trim::All)
                .from_path(path)?;
            let headers = reader.headers()?;
            let Some(code_idx) = headers.iter().position(|h| h == code_column) else {
                bail!("no column named \"{}\"", code_column);
            };
            let Some(cat_idx) = headers.iter().position(|h| h == category_column) else {
                bail!("no column named \"{}\"", category_column);
            };
            let mut map = BTreeMap::new();
            for record in reader.records() {
                let record = record?;
                let code = record.get(code_idx).unwrap_or("");
                let category = record.get(cat_idx).unwrap_or("");
                if !code.is_empty() && !category.is_empty() {
                    map.insert(ArcStr::from(code), ArcStr::from(category));
                }
            }
            Ok(CategorisedCodelist { map: Arc::new(map) })
        }
        let path = path.as_ref();
        inner(path, code_column, category_column)
            .with_context(|| format!("error loading codelist from \"{}\"", path.display()))
    }

    pub fn contains(&self, code: &str) -> bool {
        self.map.contains_key(code)
    }

    pub fn category(&self, code: &str) -> Option<&ArcStr> {
        self.map.get(code)
    }

    pub fn codes(&self) -> Codelist {
        Codelist::new(self.map.keys().cloned())
    }
}

/// Every codelist the study uses, loaded up front so a typo'd filename fails
/// fast rather than partway through an extraction.
pub struct StudyCodelists {
    // medications (dm+d)
    pub opioid: Codelist,
    pub hi_opioid: Codelist,
    pub long_opioid: Codelist,
    pub short_opioid: Codelist,
    pub weak_opioid: Codelist,
    pub strong_opioid: Codelist,
    pub gabapentinoid: Codelist,
    pub antidepressant: Codelist,
    pub tca: Codelist,
    pub nsaid: Codelist,
    // clinical (SNOMED unless noted)
    pub cancer: Codelist,
    pub ckd: Codelist,
    pub depression: Codelist,
    pub anxiety: Codelist,
    pub depress_or_gad: Codelist,
    pub smi: Codelist,
    pub oud: Codelist,
    // clinical (CTV3)
    pub diabetes: Codelist,
    pub cardiac: Codelist,
    pub copd: Codelist,
    pub liver: Codelist,
    pub osteoarthritis: Codelist,
    pub ra: Codelist,
    // demographics
    pub ethnicity6: CategorisedCodelist,
    pub ethnicity16: CategorisedCodelist,
}

impl StudyCodelists {
    /// Load all lists from a directory of OpenCodelists CSV exports.
    pub fn load(dir: &Path) -> Result<Self> {
        let list = |file: &str, column: &str| Codelist::load(dir.join(file), column);

        let opioid = list("user-anschaf-opioids-for-analgesia-dmd.csv", "code")?;
        let long_opioid = list("user-anschaf-long-acting-opioids-dmd.csv", "code")?;
        // Short-acting is defined by exclusion, not its own export.
        let short_opioid = &opioid - &long_opioid;

        let oth_ca = list(
            "opensafely-cancer-excluding-lung-and-haematological-snomed.csv",
            "id",
        )?;
        let lung_ca = list("opensafely-lung-cancer-snomed.csv", "id")?;
        let haem_ca = list("opensafely-haematological-cancer-snomed.csv", "id")?;
        let cancer = &(&oth_ca + &lung_ca) + &haem_ca;

        let depression = list("opensafely-symptoms-depression.csv", "code")?;
        let anxiety = list("opensafely-symptoms-anxiety.csv", "code")?;
        let depress_or_gad = &depression + &anxiety;

        Ok(StudyCodelists {
            hi_opioid: list(
                "opensafely-high-dose-long-acting-opioids-openprescribing-dmd.csv",
                "code",
            )?,
            weak_opioid: list("user-anschaf-weak-opioids-dmd.csv", "code")?,
            strong_opioid: list("user-anschaf-strong-opioids-dmd.csv", "code")?,
            gabapentinoid: list("user-anschaf-gabapentinoids-dmd.csv", "code")?,
            antidepressant: list("user-anschaf-antidepressants-dmd.csv", "code")?,
            tca: list("user-anschaf-tricyclic-antidepressants-dmd.csv", "code")?,
            nsaid: list("opensafely-nsaids-oral.csv", "code")?,
            ckd: list("opensafely-chronic-kidney-disease-snomed.csv", "id")?,
            smi: list("primis-covid19-vacc-uptake-old-sev_mental_cod.csv", "code")?,
            oud: list(
                "user-hjforbes-opioid-dependency-clinical-diagnosis.csv",
                "code",
            )?,
            diabetes: list("opensafely-diabetes.csv", "CTV3ID")?,
            cardiac: list("opensafely-chronic-cardiac-disease.csv", "CTV3ID")?,
            copd: list("opensafely-chronic-respiratory-disease.csv", "CTV3ID")?,
            liver: list("opensafely-chronic-liver-disease.csv", "CTV3ID")?,
            osteoarthritis: list("opensafely-osteoarthritis.csv", "CTV3ID")?,
            ra: list("opensafely-rheumatoid-arthritis.csv", "CTV3ID")?,
            ethnicity6: CategorisedCodelist::load(
                dir.join("opensafely-ethnicity-snomed-0removed.csv"),
                "snomedcode",
                "Grouping_6",
            )?,
            ethnicity16: CategorisedCodelist::load(
                dir.join("opensafely-ethnicity-snomed-0removed.csv"),
                "snomedcode",
                "Grouping_16",
            )?,
            opioid,
            long_opioid,
            short_opioid,
            cancer,
            depression,
            anxiety,
            depress_or_gad,
        })
    }

    /// Look up a medication codelist by the name used on the command line.
    pub fn medication_by_name(&self, name: &str) -> Option<&Codelist> {
        Some(match name {
            "opioid" => &self.opioid,
            "hi_opioid" => &self.hi_opioid,
            "long_opioid" => &self.long_opioid,
            "short_opioid" => &self.short_opioid,
            "weak_opioid" => &self.weak_opioid,
            "strong_opioid" => &self.strong_opioid,
            "gabapentinoid" => &self.gabapentinoid,
            "antidepressant" => &self.antidepressant,
            "tca" => &self.tca,
            "nsaid" => &self.nsaid,
            _ => return None,
        })
    }
}

#[cfg(test)]
impl StudyCodelists {
    /// An all-empty set of lists with just enough filled in for unit tests.
    pub(crate) fn for_tests(diabetes: Codelist, cancer: Codelist) -> Self {
        StudyCodelists {
            opioid: Codelist::default(),
            hi_opioid: Codelist::default(),
            long_opioid: Codelist::default(),
            short_opioid: Codelist::default(),
            weak_opioid: Codelist::default(),
            strong_opioid: Codelist::default(),
            gabapentinoid: Codelist::default(),
            antidepressant: Codelist::default(),
            tca: Codelist::default(),
            nsaid: Codelist::default(),
            cancer,
            ckd: Codelist::default(),
            depression: Codelist::default(),
            anxiety: Codelist::default(),
            depress_or_gad: Codelist::default(),
            smi: Codelist::default(),
            oud: Codelist::default(),
            diabetes,
            cardiac: Codelist::default(),
            copd: Codelist::default(),
            liver: Codelist::default(),
            osteoarthritis: Codelist::default(),
            ra: Codelist::default(),
            ethnicity6: CategorisedCodelist::default(),
            ethnicity16: CategorisedCodelist::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_algebra() {
        let all = Codelist::new(["a", "b", "c"]);
        let long = Codelist::new(["b"]);
        let short = &all - &long;
        assert!(short.contains("a"));
        assert!(!short.contains("b"));
        let both = &short + &long;
        assert_eq!(both.len(), 3);
    }

    #[test]
    fn category_lookup() {
        let eth = CategorisedCodelist::new([("123", "1"), ("456", "4")]);
        assert_eq!(eth.category("123").map(|c| &**c), Some("1"));
        assert_eq!(eth.category("999"), None);
        assert!(eth.codes().contains("456"));
    }
}
