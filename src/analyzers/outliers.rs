//! Boxplot-rule outlier screening of per-subject scores.
//!
//! Scores are first averaged per subject and condition. Within each
//! condition any mean beyond 1.5 × IQR from the quartiles is a flier. Fliers
//! are traced back to subjects by value, so a flier value held by more than
//! one subject cannot be attributed and is reported as ambiguous.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::analyzers::utility::{mean, quantile};
use crate::error::{OutlierError, Result};

const WHISKER: f64 = 1.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub subject: String,
    pub condition: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outlier {
    pub condition: String,
    pub subject: String,
    pub value: f64,
}

/// A flier value shared by several subjects in one condition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AmbiguousOutlier {
    pub condition: String,
    pub value: f64,
    pub subjects: Vec<String>,
}

/// Fences for one condition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Fences {
    pub q1: f64,
    pub q3: f64,
    pub lower: f64,
    pub upper: f64,
}

impl Fences {
    /// `None` for an empty sample.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let q1 = quantile(&sorted, 0.25);
        let q3 = quantile(&sorted, 0.75);
        let iqr = q3 - q1;
        Some(Self {
            q1,
            q3,
            lower: q1 - WHISKER * iqr,
            upper: q3 + WHISKER * iqr,
        })
    }

    pub fn is_flier(&self, value: f64) -> bool {
        value < self.lower || value > self.upper
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OutlierReport {
    pub outliers: Vec<Outlier>,
    pub ambiguous: Vec<AmbiguousOutlier>,
}

/// Averages repeated scores per `(subject, condition)`.
pub fn subject_means(scores: &[Score]) -> Vec<Score> {
    let mut groups: BTreeMap<(&str, &str), Vec<f64>> = BTreeMap::new();
    for s in scores {
        groups
            .entry((s.subject.as_str(), s.condition.as_str()))
            .or_default()
            .push(s.value);
    }
    groups
        .into_iter()
        .map(|((subject, condition), values)| Score {
            subject: subject.to_string(),
            condition: condition.to_string(),
            value: mean(&values),
        })
        .collect()
}

/// Bit pattern used to group equal flier values; -0.0 and 0.0 share one key.
fn flier_key(value: f64) -> u64 {
    let value = if value == 0.0 { 0.0 } else { value };
    value.to_bits()
}

/// Screens per-subject means condition by condition.
pub fn find_outliers(scores: &[Score]) -> OutlierReport {
    let means = subject_means(scores);
    let mut by_condition: BTreeMap<&str, Vec<&Score>> = BTreeMap::new();
    for s in &means {
        by_condition.entry(s.condition.as_str()).or_default().push(s);
    }

    let mut report = OutlierReport::default();
    for (condition, members) in by_condition {
        let values: Vec<f64> = members.iter().map(|s| s.value).collect();
        let Some(fences) = Fences::from_values(&values) else {
            continue;
        };

        // Flier value -> subjects holding it
        let mut fliers: BTreeMap<u64, Vec<&str>> = BTreeMap::new();
        for s in members.iter().filter(|s| fences.is_flier(s.value)) {
            fliers.entry(flier_key(s.value)).or_default().push(&s.subject);
        }

        for (bits, subjects) in fliers {
            let value = f64::from_bits(bits);
            if let [subject] = subjects.as_slice() {
                report.outliers.push(Outlier {
                    condition: condition.to_string(),
                    subject: subject.to_string(),
                    value,
                });
            } else {
                warn!(
                    condition,
                    value,
                    subjects = ?subjects,
                    "Outlier value shared by several subjects"
                );
                report.ambiguous.push(AmbiguousOutlier {
                    condition: condition.to_string(),
                    value,
                    subjects: subjects.iter().map(|s| s.to_string()).collect(),
                });
            }
        }
    }

    info!(
        outliers = report.outliers.len(),
        ambiguous = report.ambiguous.len(),
        "Outlier screening complete"
    );
    report
}

/// Drops every score belonging to an outlying `(subject, condition)`.
///
/// # Errors
///
/// [`OutlierError::Ambiguous`] while the report holds ambiguous outliers.
pub fn remove_outliers(
    scores: &[Score],
    report: &OutlierReport,
) -> Result<Vec<Score>, OutlierError> {
    if !report.ambiguous.is_empty() {
        return Err(OutlierError::Ambiguous(report.ambiguous.clone()));
    }
    let kept: Vec<Score> = scores
        .iter()
        .filter(|s| {
            !report
                .outliers
                .iter()
                .any(|o| o.subject == s.subject && o.condition == s.condition)
        })
        .cloned()
        .collect();
    info!(before = scores.len(), after = kept.len(), "Removed outliers");
    Ok(kept)
}

/// Reads a `subject,condition,value` CSV.
pub fn load_scores(path: &Path) -> Result<Vec<Score>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut scores = Vec::new();
    for row in reader.deserialize() {
        scores.push(row?);
    }
    Ok(scores)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(condition: &str, values: &[(&str, f64)]) -> Vec<Score> {
        values
            .iter()
            .map(|(subject, value)| Score {
                subject: subject.to_string(),
                condition: condition.to_string(),
                value: *value,
            })
            .collect()
    }

    #[test]
    fn test_fences_use_interpolated_quartiles() {
        let fences = Fences::from_values(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(fences.q1, 1.75);
        assert_eq!(fences.q3, 3.25);
        assert_eq!(fences.lower, 1.75 - 2.25);
        assert_eq!(fences.upper, 3.25 + 2.25);
    }

    #[test]
    fn test_single_outlier_found_and_removed() {
        let data = scores(
            "quiet",
            &[("a", 50.0), ("b", 52.0), ("c", 51.0), ("d", 53.0), ("e", 95.0)],
        );

        let report = find_outliers(&data);
        assert_eq!(report.outliers.len(), 1);
        assert_eq!(report.outliers[0].subject, "e");
        assert!(report.ambiguous.is_empty());

        let clean = remove_outliers(&data, &report).unwrap();
        assert_eq!(clean.len(), 4);
        assert!(clean.iter().all(|s| s.subject != "e"));
    }

    #[test]
    fn test_tied_flier_is_ambiguous() {
        let data = scores(
            "noise",
            &[
                ("a", 50.0),
                ("b", 51.0),
                ("c", 52.0),
                ("d", 50.5),
                ("e", 51.5),
                ("h", 52.5),
                ("i", 53.0),
                ("f", 10.0),
                ("g", 10.0),
            ],
        );

        let report = find_outliers(&data);
        assert!(report.outliers.is_empty());
        assert_eq!(
            report.ambiguous,
            vec![AmbiguousOutlier {
                condition: "noise".into(),
                value: 10.0,
                subjects: vec!["f".into(), "g".into()],
            }]
        );
        assert!(matches!(
            remove_outliers(&data, &report),
            Err(OutlierError::Ambiguous(v)) if v.len() == 1
        ));
    }

    #[test]
    fn test_signed_zero_fliers_are_one_value() {
        assert_eq!(flier_key(-0.0), flier_key(0.0));
        assert_ne!(flier_key(-1.0), flier_key(1.0));

        let data = scores(
            "noise",
            &[
                ("a", 50.0),
                ("b", 51.0),
                ("c", 52.0),
                ("d", 50.5),
                ("e", 51.5),
                ("h", 52.5),
                ("i", 53.0),
                ("f", 0.0),
                ("g", -0.0),
            ],
        );

        let report = find_outliers(&data);
        assert!(report.outliers.is_empty());
        assert_eq!(report.ambiguous.len(), 1);
        assert_eq!(report.ambiguous[0].value, 0.0);
        assert_eq!(report.ambiguous[0].subjects, vec!["f".to_string(), "g".into()]);
    }

    #[test]
    fn test_repeated_scores_are_averaged_first() {
        let mut data = scores("quiet", &[("a", 40.0), ("a", 60.0), ("b", 49.0)]);
        data.extend(scores("noise", &[("a", 1.0)]));

        let means = subject_means(&data);
        assert_eq!(means.len(), 3);
        let a_quiet = means
            .iter()
            .find(|s| s.subject == "a" && s.condition == "quiet")
            .unwrap();
        assert_eq!(a_quiet.value, 50.0);
    }

    #[test]
    fn test_conditions_screened_separately() {
        let mut data = scores("quiet", &[("a", 1.0), ("b", 2.0), ("c", 3.0), ("d", 4.0)]);
        data.extend(scores("noise", &[("a", 100.0), ("b", 101.0), ("c", 102.0), ("d", 103.0)]));
        assert_eq!(find_outliers(&data), OutlierReport::default());
    }
}
