//! In-situ audiometry export (`.csv`) extractor.
//!
//! Each file holds one threshold run, named
//! `subject_style_venting_environment` where the environment is `Booth` or
//! `InSitu`. The threshold rows start at a fixed offset and carry
//! `freq,left,right`.

use csv::ReaderBuilder;
use tracing::{debug, warn};

use crate::error::{ExtractError, Result};
use crate::extract::estat::two_ear_rows;
use crate::model::{FormFactor, Observation, RecordId};
use crate::reshape::{RecordMeta, to_observations};
use crate::table::WideTable;

/// Index of the first threshold row.
pub const FIRST_DATA_ROW: usize = 19;

/// Where a threshold run was measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Environment {
    Booth,
    InSitu,
}

impl Environment {
    pub fn parse(s: &str) -> Option<Environment> {
        match s.trim().to_ascii_lowercase().as_str() {
            "booth" => Some(Environment::Booth),
            "insitu" | "in-situ" => Some(Environment::InSitu),
            _ => None,
        }
    }

    /// Unit carried by this environment's observations.
    pub fn unit(self) -> &'static str {
        match self {
            Environment::Booth => "booth",
            Environment::InSitu => "insitu",
        }
    }
}

#[derive(Debug, Clone)]
pub struct InSituRecord {
    /// Session is `style_venting`, so one subject's conditions stay apart.
    pub meta: RecordMeta,
    pub style: String,
    pub venting: String,
    pub environment: Environment,
    /// `freq` × `left`, `right` thresholds, rounded to 0.1 dB.
    pub thresholds: WideTable,
}

impl InSituRecord {
    pub fn observations(&self) -> Result<Vec<Observation>> {
        to_observations(&self.meta, &self.thresholds, self.environment.unit()).map_err(|e| {
            ExtractError::Malformed {
                path: self.meta.record.path().to_path_buf(),
                message: e.to_string(),
            }
        })
    }
}

/// Parses one threshold export. Every frequency row is kept.
#[tracing::instrument(fields(file = %id))]
pub fn extract(id: &RecordId) -> Result<InSituRecord> {
    let path = id.path();
    let stem = id.stem();
    let parts: Vec<&str> = stem.split('_').collect();
    let [subject, style, venting, environment] = parts.as_slice() else {
        return Err(ExtractError::BadFileNames {
            expected: "subject_style_venting_environment".into(),
            names: vec![stem.clone()],
        });
    };
    let environment = Environment::parse(environment).ok_or_else(|| ExtractError::Malformed {
        path: path.to_path_buf(),
        message: format!("unknown environment {environment:?} in file name"),
    })?;
    let form_factor = FormFactor::from_label(style);
    if form_factor == FormFactor::Other {
        warn!(style = %style, "Invalid form factor in in-situ file name");
    }

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    let mut rows = Vec::new();
    for record in reader.records() {
        rows.push(record?);
    }

    let mut thresholds = WideTable::new(["freq"], ["left", "right"]);
    for (freq, (left, right)) in two_ear_rows(path, &rows, FIRST_DATA_ROW) {
        thresholds
            .push_row(vec![freq.to_string()], vec![left, right])
            .map_err(|e| ExtractError::Malformed {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
    }
    if thresholds.is_empty() {
        warn!("No threshold rows");
    }
    debug!(rows = thresholds.len(), ?environment, "In-situ rows kept");

    Ok(InSituRecord {
        meta: RecordMeta {
            record: id.clone(),
            subject: subject.to_string(),
            session: format!("{style}_{venting}"),
            form_factor: Some(form_factor),
        },
        style: style.to_string(),
        venting: venting.to_string(),
        environment,
        thresholds,
    })
}
