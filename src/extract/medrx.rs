//! MedRx REM export (`.csv`) extractor.
//!
//! One file per ear, named `subject_brand_side_style`. The unaided gain
//! column is read by name. After it and the model error column are set
//! aside the remaining columns are positional: frequency, the level-2
//! target, three BestFit curves and three EndStudy curves.

use csv::ReaderBuilder;
use tracing::{debug, warn};

use crate::error::{ExtractError, Result};
use crate::model::{FormFactor, Observation, RecordId, Side};
use crate::parser::parse_number;
use crate::reshape::{RecordMeta, to_observations};
use crate::table::WideTable;

/// Real ear unaided gain, kept as a per-frequency table of its own.
pub const REUG_COLUMN: &str = "Real ear unaided gain";

/// Columns outside the positional layout.
pub const DROPPED_COLUMNS: &[&str] = &[REUG_COLUMN, "Model Error"];

/// Session label carried by unaided gain observations.
pub const UNAIDED: &str = "Unaided";

/// Meaning of the remaining columns, in file order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Freq,
    Target(u8),
    BestFit(u8),
    EndStudy(u8),
}

/// The export carries a target for the 65 dB SPL curve only.
pub const TARGET_LEVEL: u8 = 2;

const LAYOUT: [Column; 8] = [
    Column::Freq,
    Column::Target(TARGET_LEVEL),
    Column::BestFit(2),
    Column::BestFit(1),
    Column::BestFit(3),
    Column::EndStudy(2),
    Column::EndStudy(1),
    Column::EndStudy(3),
];

pub const BESTFIT: &str = "BestFit";
pub const ENDSTUDY: &str = "EndStudy";

#[derive(Debug, Clone)]
pub struct MedRxRecord {
    pub record: RecordId,
    pub subject: String,
    pub brand: String,
    pub side: Side,
    pub form_factor: FormFactor,
    /// `freq` × `target_{S}2`.
    pub targets: WideTable,
    /// `freq` × `spl_{S}{n}` for the BestFit session.
    pub bestfit: WideTable,
    /// `freq` × `spl_{S}{n}` for the EndStudy session.
    pub endstudy: WideTable,
    /// `freq` × `reug_{S}`. Empty when the export has no unaided gain column.
    pub reug: WideTable,
}

impl MedRxRecord {
    fn meta(&self, session: &str) -> RecordMeta {
        RecordMeta {
            record: self.record.clone(),
            subject: self.subject.clone(),
            session: session.to_string(),
            form_factor: Some(self.form_factor),
        }
    }

    /// Measured observations for `session` ([`BESTFIT`] or [`ENDSTUDY`]).
    pub fn measured_observations(&self, session: &str) -> Result<Vec<Observation>> {
        let table = if session == ENDSTUDY {
            &self.endstudy
        } else {
            &self.bestfit
        };
        self.melt(session, table, "spl")
    }

    /// Target observations tagged with `session` so they can be paired with
    /// that session's measurements.
    pub fn target_observations(&self, session: &str) -> Result<Vec<Observation>> {
        self.melt(session, &self.targets, "target")
    }

    /// Real ear unaided gain observations, tagged with the [`UNAIDED`] session.
    pub fn reug_observations(&self) -> Result<Vec<Observation>> {
        self.melt(UNAIDED, &self.reug, "reug")
    }

    fn melt(&self, session: &str, table: &WideTable, unit: &str) -> Result<Vec<Observation>> {
        to_observations(&self.meta(session), table, unit).map_err(|e| ExtractError::Malformed {
            path: self.record.path().to_path_buf(),
            message: e.to_string(),
        })
    }
}

/// Parses one MedRx export, keeping the requested frequencies.
#[tracing::instrument(skip(freqs), fields(file = %id))]
pub fn extract(id: &RecordId, freqs: &[u32]) -> Result<MedRxRecord> {
    let path = id.path();
    let stem = id.stem();
    let parts: Vec<&str> = stem.split('_').collect();
    let [subject, brand, side, style] = parts.as_slice() else {
        return Err(ExtractError::BadFileNames {
            expected: "subject_brand_side_style".into(),
            names: vec![stem.clone()],
        });
    };
    let side = Side::parse(side).ok_or_else(|| ExtractError::Malformed {
        path: path.to_path_buf(),
        message: format!("unknown side {side:?} in file name"),
    })?;
    let form_factor = FormFactor::from_label(style);
    if form_factor == FormFactor::Other {
        warn!(style = %style, "Invalid form factor in MedRx file name");
    }

    let mut reader = ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers = reader.headers()?.clone();
    let kept: Vec<usize> = headers
        .iter()
        .enumerate()
        .filter(|(_, h)| !DROPPED_COLUMNS.contains(&h.trim()))
        .map(|(i, _)| i)
        .collect();
    if kept.len() != LAYOUT.len() {
        return Err(ExtractError::MissingStructure {
            path: path.to_path_buf(),
            element: format!(
                "{} data columns after dropping unused ones (found {})",
                LAYOUT.len(),
                kept.len()
            ),
        });
    }

    let column_name = |column: Column| match column {
        Column::Freq => "freq".to_string(),
        Column::Target(n) => format!("target_{side}{n}"),
        Column::BestFit(n) | Column::EndStudy(n) => format!("spl_{side}{n}"),
    };
    let columns_of = |pick: fn(Column) -> bool| -> Vec<(usize, String)> {
        LAYOUT
            .iter()
            .zip(&kept)
            .filter(|(c, _)| pick(**c))
            .map(|(c, &i)| (i, column_name(*c)))
            .collect()
    };
    let target_cols = columns_of(|c| matches!(c, Column::Target(_)));
    let bestfit_cols = columns_of(|c| matches!(c, Column::BestFit(_)));
    let endstudy_cols = columns_of(|c| matches!(c, Column::EndStudy(_)));
    let freq_col = kept[0];
    let reug_col = headers.iter().position(|h| h.trim() == REUG_COLUMN);
    if reug_col.is_none() {
        warn!("No real ear unaided gain column");
    }
    let reug_cols: Vec<(usize, String)> =
        reug_col.map(|i| (i, format!("reug_{side}"))).into_iter().collect();

    let mut targets = WideTable::new(["freq"], target_cols.iter().map(|(_, n)| n.clone()));
    let mut bestfit = WideTable::new(["freq"], bestfit_cols.iter().map(|(_, n)| n.clone()));
    let mut endstudy = WideTable::new(["freq"], endstudy_cols.iter().map(|(_, n)| n.clone()));
    let mut reug = WideTable::new(["freq"], reug_cols.iter().map(|(_, n)| n.clone()));

    for row in reader.records() {
        let row = row?;
        let Some(freq_text) = row.get(freq_col) else {
            continue;
        };
        let freq = parse_number(path, freq_text)? as u32;
        if !freqs.contains(&freq) {
            continue;
        }

        let values = |cols: &[(usize, String)]| -> Result<Vec<Option<f64>>> {
            cols.iter()
                .map(|(i, _)| match row.get(*i).map(str::trim) {
                    None | Some("") => Ok(None),
                    Some(text) => parse_number(path, text).map(Some),
                })
                .collect()
        };
        let ids = vec![freq.to_string()];
        let push = |table: &mut WideTable, vals| {
            table.push_row(ids.clone(), vals).map_err(|e| ExtractError::Malformed {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
        };
        push(&mut targets, values(&target_cols)?)?;
        push(&mut bestfit, values(&bestfit_cols)?)?;
        push(&mut endstudy, values(&endstudy_cols)?)?;
        if !reug_cols.is_empty() {
            push(&mut reug, values(&reug_cols)?)?;
        }
    }
    debug!(rows = targets.len(), "MedRx rows kept");

    Ok(MedRxRecord {
        record: id.clone(),
        subject: subject.to_string(),
        brand: brand.to_string(),
        side,
        form_factor,
        targets,
        bestfit,
        endstudy,
        reug,
    })
}
