//! Turns per-file wide tables into tagged long observations.

use crate::error::TableError;
use crate::model::{FormFactor, Observation, RecordId};
use crate::table::{WideTable, decompose_variable};

/// Condition metadata attached to every observation melted from one record.
#[derive(Debug, Clone)]
pub struct RecordMeta {
    pub record: RecordId,
    pub subject: String,
    pub session: String,
    pub form_factor: Option<FormFactor>,
}

/// Melts a table keyed by a `freq` id column into observations.
///
/// Each value column name is decomposed into unit/side/level. Columns with
/// no unit take `default_unit`. A column without a side is rejected.
pub fn to_observations(
    meta: &RecordMeta,
    wide: &WideTable,
    default_unit: &str,
) -> Result<Vec<Observation>, TableError> {
    let long = wide.melt(&["freq"])?;
    let mut observations = Vec::with_capacity(long.len());

    for row in long.rows {
        let parts = decompose_variable(&row.variable)?;
        let side = parts
            .side
            .ok_or_else(|| TableError::BadVariableName(row.variable.clone()))?;
        let freq = row.ids[0]
            .parse::<u32>()
            .map_err(|_| TableError::BadVariableName(format!("freq={}", row.ids[0])))?;

        observations.push(Observation {
            record: meta.record.clone(),
            subject: meta.subject.clone(),
            session: meta.session.clone(),
            form_factor: meta.form_factor,
            freq,
            side,
            level: parts.level,
            unit: parts.unit.unwrap_or_else(|| default_unit.to_string()),
            value: row.value,
        });
    }

    Ok(observations)
}
