//! Matching, aggregation and reporting of extracted observations.
//!
//! [`matcher`] pairs measured and target observations on explicit keys,
//! [`aggregate`] summarises the differences by group and [`report`] writes
//! them out. [`sdt`] and [`outliers`] cover the behavioural data, and
//! [`analyzer`] wires the stages together for the CLI.

pub mod aggregate;
pub mod analyzer;
pub mod band;
pub mod matcher;
pub mod outliers;
pub mod report;
pub mod sdt;
pub mod study;
pub mod types;
pub mod utility;
