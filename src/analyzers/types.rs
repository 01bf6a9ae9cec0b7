//! Data types produced by the aggregation and reporting stages.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Summary statistics for one group of differences.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSummary {
    /// Group labels joined as `field=value` pairs, e.g. `session=BestFit;freq=500`.
    pub group: String,
    #[serde(skip)]
    pub labels: Vec<(String, String)>,
    /// Number of non-missing differences.
    pub n: usize,
    pub n_missing: usize,
    pub mean: Option<f64>,
    pub rms: Option<f64>,
    pub stddev: Option<f64>,
    /// Maximum allowed |difference|, when a criterion was applied.
    pub ceiling: Option<f64>,
    pub n_within: Option<usize>,
    pub pct_within: Option<f64>,
}

/// Top-level summary written as `summary.json`.
#[derive(Debug, Serialize)]
pub struct ReportSummary {
    pub generated_at: DateTime<Utc>,
    pub title: String,
    pub total_differences: usize,
    pub missing_differences: usize,
    pub groups: Vec<GroupSummary>,
}

/// One aided SII value from a Verifit session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiiRow {
    pub subject: String,
    pub session: String,
    pub side: crate::model::Side,
    pub level: u8,
    pub value: Option<f64>,
}

/// One screened outlier, flattened for CSV output. Ambiguous outliers list
/// every subject that holds the value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutlierRow {
    pub condition: String,
    pub value: f64,
    pub subjects: String,
    pub ambiguous: bool,
}
