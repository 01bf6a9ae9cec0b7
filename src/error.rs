//! Error types for each pipeline stage.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while discovering and parsing vendor export files.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("XML parsing error in {path}: {source}")]
    Xml {
        path: PathBuf,
        #[source]
        source: roxmltree::Error,
    },

    #[error("Invalid file pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("Directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Input directory not found: {0}")]
    MissingDirectory(PathBuf),

    #[error("No files matching {pattern:?} in {dir}")]
    NoMatchingFiles { dir: PathBuf, pattern: String },

    #[error("{path}: missing required element {element}")]
    MissingStructure { path: PathBuf, element: String },

    #[error("{path}: invalid numeric token {token:?}")]
    InvalidNumber { path: PathBuf, token: String },

    #[error("{path}: {message}")]
    Malformed { path: PathBuf, message: String },

    #[error("Badly named files (expected {expected}): {names:?}")]
    BadFileNames { expected: String, names: Vec<String> },
}

impl ExtractError {
    /// Structural problems abort the batch; everything else only
    /// invalidates the file it came from.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            ExtractError::MissingDirectory(_)
                | ExtractError::NoMatchingFiles { .. }
                | ExtractError::MissingStructure { .. }
                | ExtractError::BadFileNames { .. }
                | ExtractError::Pattern { .. }
        )
    }
}

/// Errors raised by wide/long reshaping.
#[derive(Error, Debug, PartialEq)]
pub enum TableError {
    #[error("Row {row} has {found} values, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("Unknown id column {0:?}")]
    UnknownColumn(String),

    #[error("Cannot decompose variable name {0:?}")]
    BadVariableName(String),

    #[error("Duplicate cell for ids {ids:?} and variable {variable:?}")]
    DuplicateCell { ids: Vec<String>, variable: String },
}

/// Errors raised when pairing two observation tables.
#[derive(Error, Debug, PartialEq)]
pub enum MatchError {
    #[error("Duplicate join key {key:?} in {table} table")]
    DuplicateKey { table: &'static str, key: Vec<String> },

    #[error(
        "Join key sets differ: {} only in measured, {} only in target (first: {:?} / {:?})",
        only_measured.len(),
        only_target.len(),
        only_measured.first(),
        only_target.first()
    )]
    KeyMismatch {
        only_measured: Vec<Vec<String>>,
        only_target: Vec<Vec<String>>,
    },

    #[error("Subject {0:?} has no form factor assignment")]
    UnknownSubject(String),

    #[error("Subject {subject:?} is described as both {} and {}", first.label(), second.label())]
    ConflictingFormFactor {
        subject: String,
        first: crate::model::FormFactor,
        second: crate::model::FormFactor,
    },

    #[error("No subject could be paired in {context}")]
    NothingPaired { context: String },
}

/// Errors raised by signal-detection calculations.
#[derive(Error, Debug, PartialEq)]
pub enum SdtError {
    #[error("No {0} trials to form a rate")]
    EmptyDenominator(&'static str),

    #[error("{name} rate of {rate} gives an infinite z-score")]
    DegenerateRate { name: &'static str, rate: f64 },

    #[error("Unknown response type {0:?}")]
    UnknownResponse(String),
}

/// Errors raised by outlier screening.
#[derive(Error, Debug, PartialEq)]
pub enum OutlierError {
    #[error(
        "{} outlier value(s) are shared by several subjects and need a tie-breaking decision",
        .0.len()
    )]
    Ambiguous(Vec<crate::analyzers::outliers::AmbiguousOutlier>),
}

/// Errors raised while loading the study configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Invalid(String),
}

pub type Result<T, E = ExtractError> = std::result::Result<T, E>;
