//! eSTAT target export (`.csv`) extractor.
//!
//! The exports have no header row. Cell (0,0) holds a device description and
//! the layout of the rest of the file depends on the device, so the first
//! step is to classify the file against [`DEVICE_PROFILES`].

use std::collections::BTreeMap;
use std::path::Path;

use csv::ReaderBuilder;
use tracing::{debug, info, warn};

use crate::error::{ExtractError, Result};
use crate::model::{FormFactor, Observation, RecordId, split_subject};
use crate::parser::{parse_optional_number, round1};
use crate::reshape::{RecordMeta, to_observations};
use crate::table::WideTable;

/// Layout of one device family's export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceProfile {
    /// Substring searched for in the device description cell.
    pub label: &'static str,
    pub form_factor: FormFactor,
    /// First row of target data. `None` means the data rows are found by
    /// scanning for rows whose first cell is numeric.
    pub first_data_row: Option<usize>,
}

/// Known device families, matched in order; the first label contained in
/// the description wins.
pub const DEVICE_PROFILES: &[DeviceProfile] = &[
    DeviceProfile {
        label: "MicroRIC",
        form_factor: FormFactor::MicroRic,
        first_data_row: None,
    },
    DeviceProfile {
        label: " RIC RT",
        form_factor: FormFactor::RicRt,
        first_data_row: Some(20),
    },
    DeviceProfile {
        label: " RIC 312",
        form_factor: FormFactor::Ric312,
        first_data_row: Some(20),
    },
    DeviceProfile {
        label: "ITE",
        form_factor: FormFactor::Ite,
        first_data_row: Some(20),
    },
    DeviceProfile {
        label: "ITC",
        form_factor: FormFactor::Itc,
        first_data_row: Some(20),
    },
    DeviceProfile {
        label: "CIC",
        form_factor: FormFactor::Cic,
        first_data_row: Some(19),
    },
    DeviceProfile {
        label: "IIC",
        form_factor: FormFactor::Iic,
        first_data_row: None,
    },
];

/// Profile used for descriptions that match no known device.
pub const FALLBACK_PROFILE: DeviceProfile = DeviceProfile {
    label: "",
    form_factor: FormFactor::Other,
    first_data_row: None,
};

/// Classifies a device description. Never fails: unknown devices get
/// [`FALLBACK_PROFILE`].
pub fn detect_profile(description: &str) -> DeviceProfile {
    DEVICE_PROFILES
        .iter()
        .copied()
        .find(|p| description.contains(p.label))
        .unwrap_or(FALLBACK_PROFILE)
}

/// Targets for both ears of one subject.
#[derive(Debug, Clone)]
pub struct EstatRecord {
    pub meta: RecordMeta,
    pub device: String,
    /// `freq` × `left`, `right`, rounded to 0.1 dB.
    pub targets: WideTable,
}

impl EstatRecord {
    pub fn form_factor(&self) -> FormFactor {
        self.meta.form_factor.unwrap_or(FormFactor::Other)
    }

    pub fn observations(&self) -> Result<Vec<Observation>> {
        to_observations(&self.meta, &self.targets, "estat_target").map_err(|e| {
            ExtractError::Malformed {
                path: self.meta.record.path().to_path_buf(),
                message: e.to_string(),
            }
        })
    }
}

/// Checks that every stem has exactly two `_`-separated parts
/// (`subject_suffix`). All bad names are reported together.
pub fn check_file_names(files: &[RecordId]) -> Result<()> {
    info!("Inspecting eSTAT file names");
    let bad: Vec<String> = files
        .iter()
        .map(RecordId::stem)
        .filter(|stem| stem.split('_').count() != 2)
        .collect();

    if bad.is_empty() {
        return Ok(());
    }
    for name in &bad {
        warn!(name = %name, "Found bad eSTAT file name");
    }
    Err(ExtractError::BadFileNames {
        expected: "subject_suffix".into(),
        names: bad,
    })
}

/// Parses one eSTAT export, keeping the requested frequencies.
#[tracing::instrument(skip(freqs), fields(file = %id))]
pub fn extract(id: &RecordId, freqs: &[u32]) -> Result<EstatRecord> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(id.path())?;

    let mut rows = Vec::new();
    for record in reader.records() {
        rows.push(record?);
    }
    parse_rows(id, &rows, freqs)
}

fn parse_rows(id: &RecordId, rows: &[csv::StringRecord], freqs: &[u32]) -> Result<EstatRecord> {
    let path = id.path();
    let device = rows
        .first()
        .and_then(|r| r.get(0))
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .ok_or_else(|| ExtractError::MissingStructure {
            path: path.to_path_buf(),
            element: "device description in cell (0,0)".into(),
        })?
        .to_string();

    let profile = detect_profile(&device);
    if profile.form_factor == FormFactor::Other {
        warn!(device = %device, "Unrecognized device, using fallback profile");
    }
    debug!(form_factor = %profile.form_factor, ?profile.first_data_row, "Device profile");

    let start = profile.first_data_row.unwrap_or(0);
    let by_freq = two_ear_rows(path, rows, start);

    let mut targets = WideTable::new(["freq"], ["left", "right"]);
    for &freq in freqs {
        match by_freq.get(&freq) {
            Some(&(left, right)) => {
                targets
                    .push_row(vec![freq.to_string()], vec![left, right])
                    .map_err(|e| ExtractError::Malformed {
                        path: path.to_path_buf(),
                        message: e.to_string(),
                    })?;
            }
            None => warn!(freq, "Requested frequency missing from eSTAT export"),
        }
    }

    let (subject, session) = split_subject(&id.stem());
    Ok(EstatRecord {
        meta: RecordMeta {
            record: id.clone(),
            subject,
            session,
            form_factor: Some(profile.form_factor),
        },
        device,
        targets,
    })
}

/// Reads `freq,left,right` rows from `start` on, keyed by frequency and
/// rounded to 0.1 dB.
///
/// Rows whose first cell is not numeric are passed over. A blank or `_`
/// cell is a missing value. A row with an unreadable value is logged and
/// skipped without failing the file.
pub(crate) fn two_ear_rows(
    path: &Path,
    rows: &[csv::StringRecord],
    start: usize,
) -> BTreeMap<u32, (Option<f64>, Option<f64>)> {
    let mut by_freq = BTreeMap::new();
    for (index, row) in rows.iter().enumerate().skip(start) {
        let Some(freq) = row.get(0).and_then(|c| c.trim().parse::<f64>().ok()) else {
            continue;
        };
        let cell = |i: usize| -> Result<Option<f64>> {
            let value = parse_optional_number(path, row.get(i).unwrap_or(""))?;
            Ok(value.map(round1))
        };
        match (cell(1), cell(2)) {
            (Ok(left), Ok(right)) => {
                if left.is_none() || right.is_none() {
                    warn!(freq, "Blank threshold or target cell");
                }
                by_freq.insert(freq as u32, (left, right));
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(row = index, error = %e, "Skipping unreadable row");
            }
        }
    }
    by_freq
}
