use crate::ArcStr;
use chrono::NaiveDate;
use serde::{de, Deserialize, Deserializer};
use std::{
    fs, io,
    path::{Path, PathBuf},
};

/// Converts a not found error to Ok(false)
pub fn path_exists(path: &Path) -> io::Result<bool> {
    match fs::metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if matches!(e.kind(), io::ErrorKind::NotFound) => Ok(false),
        Err(e) => Err(e),
    }
}

// Helpers for serde to parse fields with quirks.

/// Parse a string, but map "null" to `None` (in addition to the default "" -> None mapping)
pub fn optional_string<'de, D>(d: D) -> Result<Option<ArcStr>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(d)?;
    if s.eq_ignore_ascii_case("null") || s.is_empty() {
        Ok(None)
    } else {
        Ok(Some(s.into()))
    }
}

/// Parse a date in ISO format (yyyy-mm-dd), as used throughout the extracts.
pub fn iso_date<'de, D>(d: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let s: &str = Deserialize::deserialize(d)?;
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(de::Error::custom)
}

/// Like `iso_date`, but maps the empty string and "null" to `None`.
pub fn opt_iso_date<'de, D>(d: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: &str = Deserialize::deserialize(d)?;
    if s.is_empty() || s.eq_ignore_ascii_case("null") {
        return Ok(None);
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map(Some)
        .map_err(de::Error::custom)
}

/// Parse the rounded IMD rank, mapping ""/"null" to `None`.
pub fn opt_imd_rounded<'de, D>(d: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: &str = Deserialize::deserialize(d)?;
    if s.is_empty() || s.eq_ignore_ascii_case("null") {
        return Ok(None);
    }
    s.parse::<u32>().map(Some).map_err(de::Error::custom)
}

/// Note: No protection from escaping the root directory.
pub fn orig_path(input: &Path) -> PathBuf {
    Path::new("data/extracts").join(input)
}

/// Note: No protection from escaping the root directory.
pub fn output_path(input: &Path) -> PathBuf {
    Path::new("output").join(input)
}

pub fn codelists_path(input: &Path) -> PathBuf {
    Path::new("codelists").join(input)
}

pub fn check_extension(path: &Path, ext: &str) -> crate::Result<()> {
    use anyhow::ensure;
    ensure!(
        matches!(path.extension(), Some(p) if p == ext),
        "filename should end with `.{}`",
        ext
    );
    Ok(())
}

pub fn header(header: &str) {
    let len = header.len();
    print!("\n{}\n", header);
    for _ in 0..len {
        print!("=");
    }
    println!("\n")
}

/// Format a count as a percentage of a total, for summary tables.
pub fn percent(count: usize, total: usize) -> String {
    if total == 0 {
        "-".into()
    } else {
        format!("{:.1}%", count as f64 / total as f64 * 100.)
    }
}
