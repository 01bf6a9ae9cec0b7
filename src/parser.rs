//! Parsers for the numeric cell formats found in vendor exports.

use std::path::Path;

use crate::error::{ExtractError, Result};

/// Token the Verifit session files use for "no value at this frequency".
pub const NO_VALUE: &str = "_";

/// Parses a space-separated list of numbers, keeping one entry per token.
///
/// [`NO_VALUE`] tokens become `None` in place so that the list stays aligned
/// with its frequency axis.
///
/// # Errors
///
/// Returns [`ExtractError::InvalidNumber`] for any other non-numeric token.
pub fn parse_value_list(path: &Path, text: &str) -> Result<Vec<Option<f64>>> {
    text.split_whitespace()
        .map(|token| parse_optional_number(path, token))
        .collect()
}

/// Parses a frequency axis. Frequencies are written as floats (`250.0`) but
/// used as whole hertz.
pub fn parse_frequency_list(path: &Path, text: &str) -> Result<Vec<u32>> {
    text.split_whitespace()
        .map(|token| parse_number(path, token).map(|hz| hz as u32))
        .collect()
}

/// Parses a single numeric cell.
pub fn parse_number(path: &Path, token: &str) -> Result<f64> {
    token
        .trim()
        .parse::<f64>()
        .map_err(|_| ExtractError::InvalidNumber {
            path: path.to_path_buf(),
            token: token.to_string(),
        })
}

/// Parses a cell that may be empty. Blank cells and [`NO_VALUE`] give `None`.
pub fn parse_optional_number(path: &Path, token: &str) -> Result<Option<f64>> {
    match token.trim() {
        "" | NO_VALUE => Ok(None),
        text => parse_number(path, text).map(Some),
    }
}

/// Rounds to one decimal place, as targets are reported.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
