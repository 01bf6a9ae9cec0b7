//! Subject → form factor key (`PID,Form_Factor`).

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::error::{ExtractError, Result};
use crate::model::FormFactor;

#[derive(Debug, Deserialize)]
struct FormKeyRow {
    #[serde(rename = "PID")]
    pid: String,
    #[serde(rename = "Form_Factor")]
    form_factor: String,
}

pub type FormKey = BTreeMap<String, FormFactor>;

/// Loads the key. A subject listed twice with different form factors is an
/// error rather than last-one-wins.
pub fn load(path: &Path) -> Result<FormKey> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut key = FormKey::new();

    for row in reader.deserialize() {
        let row: FormKeyRow = row?;
        let form = FormFactor::from_label(&row.form_factor);
        let pid = row.pid.trim().to_string();
        if let Some(previous) = key.insert(pid.clone(), form) {
            if previous != form {
                return Err(ExtractError::Malformed {
                    path: path.to_path_buf(),
                    message: format!("subject {pid} listed as both {previous} and {form}"),
                });
            }
        }
    }

    info!(subjects = key.len(), "Form key loaded");
    Ok(key)
}
