//! Categorisations of demographic variables as reported in the datasets.
//!
//! Labels are reproduced exactly as they appear downstream (the R analysis
//! keys on them), so change them with care.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Age band at the episode start date.
pub fn age_band(age: i32) -> &'static str {
    match age {
        i32::MIN..=39 => "18-39",
        40..=49 => "40-49",
        50..=59 => "50-59",
        60..=69 => "60-69",
        70..=79 => "70-79",
        _ => "80+",
    }
}

/// Grouped wait length, in completed weeks.
pub fn wait_band(weeks: i64) -> &'static str {
    if weeks <= 18 {
        "<=18 weeks"
    } else if weeks <= 52 {
        "19-52 weeks"
    } else {
        ">52 weeks"
    }
}

/// Total number of LSOA ranks in the 2019 English IMD, which the rounded rank
/// is a position within.
const IMD_RANKS: u32 = 32844;

/// Index of multiple deprivation, as deciles of the rounded rank.
///
/// Ordering is arbitrary.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub enum ImdDecile {
    Unknown,
    _1,
    _2,
    _3,
    _4,
    _5,
    _6,
    _7,
    _8,
    _9,
    _10,
}

impl ImdDecile {
    /// Decile of a rounded IMD rank (0 = most deprived end of the scale).
    pub fn from_rounded(rank: Option<u32>) -> Self {
        use ImdDecile::*;
        let Some(rank) = rank else { return Unknown };
        match rank {
            r if r < IMD_RANKS / 10 => _1,
            r if r < IMD_RANKS * 2 / 10 => _2,
            r if r < IMD_RANKS * 3 / 10 => _3,
            r if r < IMD_RANKS * 4 / 10 => _4,
            r if r < IMD_RANKS * 5 / 10 => _5,
            r if r < IMD_RANKS * 6 / 10 => _6,
            r if r < IMD_RANKS * 7 / 10 => _7,
            r if r < IMD_RANKS * 8 / 10 => _8,
            r if r < IMD_RANKS * 9 / 10 => _9,
            _ => _10,
        }
    }
}

impl fmt::Display for ImdDecile {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ImdDecile::*;
        match self {
            Unknown => f.write_str("Unknown"),
            _1 => f.write_str("1 (most deprived)"),
            _2 => f.write_str("2"),
            _3 => f.write_str("3"),
            _4 => f.write_str("4"),
            _5 => f.write_str("5"),
            _6 => f.write_str("6"),
            _7 => f.write_str("7"),
            _8 => f.write_str("8"),
            _9 => f.write_str("9"),
            _10 => f.write_str("10 (least deprived)"),
        }
    }
}

/// Label for the 6-group ethnicity category code.
pub fn ethnicity6_label(category: Option<&str>) -> &'static str {
    match category {
        Some("1") => "White",
        Some("2") => "Mixed",
        Some("3") => "South Asian",
        Some("4") => "Black",
        Some("5") => "Other",
        Some("6") => "Not stated",
        _ => "Unknown",
    }
}

/// Label for the 16-group ethnicity category code.
pub fn ethnicity16_label(category: Option<&str>) -> &'static str {
    match category {
        Some("1") => "White - British",
        Some("2") => "White - Irish",
        Some("3") => "White - Other",
        Some("4") => "Mixed - White/Black Caribbean",
        Some("5") => "Mixed - White/Black African",
        Some("6") => "Mixed - White/Asian",
        Some("7") => "Mixed - Other",
        Some("8") => "Asian or Asian British - Indian",
        Some("9") => "Asian or Asian British - Pakistani",
        Some("10") => "Asian or Asian British - Bangladeshi",
        Some("11") => "Asian or Asian British - Other",
        Some("12") => "Black - Caribbean",
        Some("13") => "Black - African",
        Some("14") => "Black - Other",
        Some("15") => "Other - Chinese",
        Some("16") => "Other - Other",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn age_bands() {
        assert_eq!(age_band(18), "18-39");
        assert_eq!(age_band(39), "18-39");
        assert_eq!(age_band(40), "40-49");
        assert_eq!(age_band(79), "70-79");
        assert_eq!(age_band(80), "80+");
        assert_eq!(age_band(109), "80+");
    }

    #[test]
    fn wait_bands() {
        assert_eq!(wait_band(0), "<=18 weeks");
        assert_eq!(wait_band(18), "<=18 weeks");
        assert_eq!(wait_band(19), "19-52 weeks");
        assert_eq!(wait_band(52), "19-52 weeks");
        assert_eq!(wait_band(53), ">52 weeks");
    }

    #[test]
    fn imd_decile_boundaries() {
        assert_eq!(ImdDecile::from_rounded(None), ImdDecile::Unknown);
        assert_eq!(ImdDecile::from_rounded(Some(0)), ImdDecile::_1);
        // 32844 / 10 = 3284 (truncated): the first rank of decile 2.
        assert_eq!(ImdDecile::from_rounded(Some(3283)), ImdDecile::_1);
        assert_eq!(ImdDecile::from_rounded(Some(3284)), ImdDecile::_2);
        assert_eq!(ImdDecile::from_rounded(Some(32800)), ImdDecile::_10);
        assert_eq!(ImdDecile::_1.to_string(), "1 (most deprived)");
        assert_eq!(ImdDecile::_10.to_string(), "10 (least deprived)");
    }

    #[test]
    fn ethnicity_labels() {
        assert_eq!(ethnicity6_label(Some("3")), "South Asian");
        assert_eq!(ethnicity6_label(None), "Unknown");
        assert_eq!(ethnicity16_label(Some("10")), "Asian or Asian British - Bangladeshi");
        assert_eq!(ethnicity16_label(Some("99")), "Unknown");
    }
}
