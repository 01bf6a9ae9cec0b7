//! Signal detection measures from hit/miss/false-alarm/correct-rejection
//! counts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::analyzers::utility::normal_quantile;
use crate::error::{Result, SdtError};
use crate::model::RecordId;

/// One trial as recorded by the test software.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseRow {
    pub subject: String,
    pub resp_type: String,
}

/// Response tallies for one subject.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResponseCounts {
    pub hits: u32,
    pub misses: u32,
    pub false_alarms: u32,
    pub correct_rejections: u32,
}

impl ResponseCounts {
    pub fn new(hits: u32, misses: u32, false_alarms: u32, correct_rejections: u32) -> Self {
        Self {
            hits,
            misses,
            false_alarms,
            correct_rejections,
        }
    }

    /// Adds one response of type `H`, `M`, `FA` or `CR`.
    pub fn record(&mut self, resp_type: &str) -> Result<(), SdtError> {
        match resp_type.trim() {
            "H" => self.hits += 1,
            "M" => self.misses += 1,
            "FA" => self.false_alarms += 1,
            "CR" => self.correct_rejections += 1,
            other => return Err(SdtError::UnknownResponse(other.to_string())),
        }
        Ok(())
    }

    /// `H / (H + M)`.
    pub fn hit_rate(&self) -> Result<f64, SdtError> {
        rate(self.hits, self.misses, "signal")
    }

    /// `FA / (FA + CR)`.
    pub fn false_alarm_rate(&self) -> Result<f64, SdtError> {
        rate(self.false_alarms, self.correct_rejections, "noise")
    }
}

fn rate(k: u32, rest: u32, trials: &'static str) -> Result<f64, SdtError> {
    let n = k + rest;
    if n == 0 {
        return Err(SdtError::EmptyDenominator(trials));
    }
    Ok(f64::from(k) / f64::from(n))
}

/// Percent correct, `100 · (pH + 1 − pFA) / 2`.
pub fn percent_correct(p_hit: f64, p_fa: f64) -> f64 {
    100.0 * (p_hit + 1.0 - p_fa) / 2.0
}

fn finite_z(name: &'static str, rate: f64) -> Result<f64, SdtError> {
    if rate <= 0.0 || rate >= 1.0 {
        return Err(SdtError::DegenerateRate { name, rate });
    }
    Ok(normal_quantile(rate))
}

/// Sensitivity, `Φ⁻¹(pH) − Φ⁻¹(pFA)`.
pub fn d_prime(p_hit: f64, p_fa: f64) -> Result<f64, SdtError> {
    Ok(finite_z("hit", p_hit)? - finite_z("false alarm", p_fa)?)
}

/// Response bias β via `ln β = ½·d'·(2·zFA − d')`, where `zFA = Φ⁻¹(1 − pFA)`.
pub fn beta(p_hit: f64, p_fa: f64) -> Result<f64, SdtError> {
    let d = d_prime(p_hit, p_fa)?;
    let z_fa = -finite_z("false alarm", p_fa)?;
    Ok((0.5 * d * (2.0 * z_fa - d)).exp())
}

/// Measures for one subject. When a rate is degenerate the rates and PC are
/// still reported and `error` says why d' and β are absent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SdtRow {
    pub subject: String,
    pub hits: u32,
    pub misses: u32,
    pub false_alarms: u32,
    pub correct_rejections: u32,
    pub p_hit: Option<f64>,
    pub p_fa: Option<f64>,
    pub pc: Option<f64>,
    pub d_prime: Option<f64>,
    pub beta: Option<f64>,
    pub error: Option<String>,
}

pub fn evaluate(subject: &str, counts: ResponseCounts) -> SdtRow {
    let mut row = SdtRow {
        subject: subject.to_string(),
        hits: counts.hits,
        misses: counts.misses,
        false_alarms: counts.false_alarms,
        correct_rejections: counts.correct_rejections,
        p_hit: None,
        p_fa: None,
        pc: None,
        d_prime: None,
        beta: None,
        error: None,
    };

    let rates = counts
        .hit_rate()
        .and_then(|h| counts.false_alarm_rate().map(|f| (h, f)));
    let (p_hit, p_fa) = match rates {
        Ok(rates) => rates,
        Err(e) => {
            warn!(subject, error = %e, "Cannot compute SDT rates");
            row.error = Some(e.to_string());
            return row;
        }
    };
    row.p_hit = Some(p_hit);
    row.p_fa = Some(p_fa);
    row.pc = Some(percent_correct(p_hit, p_fa));

    match d_prime(p_hit, p_fa).and_then(|d| beta(p_hit, p_fa).map(|b| (d, b))) {
        Ok((d, b)) => {
            row.d_prime = Some(d);
            row.beta = Some(b);
        }
        Err(e) => {
            warn!(subject, error = %e, "Degenerate SDT rate");
            row.error = Some(e.to_string());
        }
    }
    row
}

/// Tallies responses per subject. Rows with an unknown response type are
/// logged and skipped.
pub fn count_responses(rows: &[ResponseRow]) -> BTreeMap<String, ResponseCounts> {
    let mut counts: BTreeMap<String, ResponseCounts> = BTreeMap::new();
    for row in rows {
        let subject = row.subject.trim();
        let mut tally = counts.get(subject).copied().unwrap_or_default();
        match tally.record(&row.resp_type) {
            Ok(()) => {
                counts.insert(subject.to_string(), tally);
            }
            Err(e) => warn!(
                subject,
                resp_type = %row.resp_type,
                error = %e,
                "Skipping response row"
            ),
        }
    }
    counts
}

/// Reads `subject,resp_type` rows from every file; extra columns are ignored.
pub fn load_responses(files: &[RecordId]) -> Result<Vec<ResponseRow>> {
    let mut rows = Vec::new();
    for file in files {
        let mut reader = csv::Reader::from_path(file.path())?;
        for row in reader.deserialize() {
            rows.push(row?);
        }
    }
    info!(files = files.len(), responses = rows.len(), "Loaded SDT responses");
    Ok(rows)
}
