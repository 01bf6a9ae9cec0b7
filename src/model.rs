//! Domain types shared by the extractors, reshaper and analyzers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Identity of one source file: its full path, never just the basename.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(PathBuf);

impl RecordId {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    /// File name without extension, e.g. `S01_BestFit` for `.../S01_BestFit.xml`.
    pub fn stem(&self) -> String {
        self.0
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Side {
    #[serde(rename = "L")]
    Left,
    #[serde(rename = "R")]
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    /// Accepts the single-letter codes used in variable names and the
    /// spelled-out forms used in XML attributes and CSV headers.
    pub fn parse(s: &str) -> Option<Side> {
        match s.trim().to_ascii_lowercase().as_str() {
            "l" | "left" => Some(Side::Left),
            "r" | "right" => Some(Side::Right),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Side::Left => "L",
            Side::Right => "R",
        }
    }

    pub fn xml_name(self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Hearing-aid physical style, as detected from vendor exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FormFactor {
    #[serde(rename = "MRIC")]
    MicroRic,
    #[serde(rename = "RIC")]
    Ric,
    #[serde(rename = "RIC_RT")]
    RicRt,
    #[serde(rename = "RIC312")]
    Ric312,
    #[serde(rename = "ITE")]
    Ite,
    #[serde(rename = "ITC")]
    Itc,
    #[serde(rename = "CIC")]
    Cic,
    #[serde(rename = "IIC")]
    Iic,
    #[serde(rename = "OTHER")]
    Other,
}

impl FormFactor {
    pub fn label(self) -> &'static str {
        match self {
            FormFactor::MicroRic => "MRIC",
            FormFactor::Ric => "RIC",
            FormFactor::RicRt => "RIC_RT",
            FormFactor::Ric312 => "RIC312",
            FormFactor::Ite => "ITE",
            FormFactor::Itc => "ITC",
            FormFactor::Cic => "CIC",
            FormFactor::Iic => "IIC",
            FormFactor::Other => "OTHER",
        }
    }

    /// Parses a form-factor label as written in form keys and file names.
    /// Unknown labels map to [`FormFactor::Other`].
    pub fn from_label(s: &str) -> FormFactor {
        match s.trim().to_ascii_uppercase().as_str() {
            "MRIC" => FormFactor::MicroRic,
            "RIC" => FormFactor::Ric,
            "RIC_RT" | "RICRT" => FormFactor::RicRt,
            "RIC312" | "RIC_312" => FormFactor::Ric312,
            "ITE" => FormFactor::Ite,
            "ITC" => FormFactor::Itc,
            "CIC" => FormFactor::Cic,
            "IIC" => FormFactor::Iic,
            _ => FormFactor::Other,
        }
    }

    /// Collapsed reporting group. `Other` has none and is excluded from
    /// collapsed reports.
    pub fn group(self) -> Option<FormGroup> {
        match self {
            FormFactor::MicroRic | FormFactor::Ric | FormFactor::RicRt | FormFactor::Ric312 => {
                Some(FormGroup::Ric)
            }
            FormFactor::Ite | FormFactor::Itc => Some(FormGroup::WirelessCustom),
            FormFactor::Cic | FormFactor::Iic => Some(FormGroup::WiredCustom),
            FormFactor::Other => None,
        }
    }
}

impl fmt::Display for FormFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FormGroup {
    #[serde(rename = "RIC")]
    Ric,
    #[serde(rename = "Wireless Custom")]
    WirelessCustom,
    #[serde(rename = "Wired Custom")]
    WiredCustom,
}

impl fmt::Display for FormGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FormGroup::Ric => "RIC",
            FormGroup::WirelessCustom => "Wireless Custom",
            FormGroup::WiredCustom => "Wired Custom",
        })
    }
}

/// One long-format measurement.
///
/// `value` is `None` when the source marked the frequency as having no data;
/// the frequency label is always kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub record: RecordId,
    pub subject: String,
    pub session: String,
    pub form_factor: Option<FormFactor>,
    pub freq: u32,
    pub side: Side,
    pub level: Option<u8>,
    pub unit: String,
    pub value: Option<f64>,
}

/// Splits a file stem into `(subject, rest)` on the first underscore.
pub fn split_subject(stem: &str) -> (String, String) {
    match stem.split_once('_') {
        Some((subject, rest)) => (subject.to_string(), rest.to_string()),
        None => (stem.to_string(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_parse() {
        assert_eq!(Side::parse("L"), Some(Side::Left));
        assert_eq!(Side::parse("right"), Some(Side::Right));
        assert_eq!(Side::parse("x"), None);
    }

    #[test]
    fn test_form_factor_collapse() {
        assert_eq!(FormFactor::RicRt.group(), Some(FormGroup::Ric));
        assert_eq!(FormFactor::MicroRic.group(), Some(FormGroup::Ric));
        assert_eq!(FormFactor::Itc.group(), Some(FormGroup::WirelessCustom));
        assert_eq!(FormFactor::Iic.group(), Some(FormGroup::WiredCustom));
        assert_eq!(FormFactor::Other.group(), None);
    }

    #[test]
    fn test_unknown_label_is_other() {
        assert_eq!(FormFactor::from_label("BTE"), FormFactor::Other);
        assert_eq!(FormFactor::from_label("ric312"), FormFactor::Ric312);
    }

    #[test]
    fn test_record_id_stem_and_split() {
        let id = RecordId::new("/data/a/S01_BestFit.xml");
        assert_eq!(id.stem(), "S01_BestFit");
        let (subject, rest) = split_subject(&id.stem());
        assert_eq!(subject, "S01");
        assert_eq!(rest, "BestFit");
    }
}
