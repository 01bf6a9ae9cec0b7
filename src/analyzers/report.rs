//! Writes difference tables and their summaries to an output directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::analyzers::aggregate::{GroupField, aggregate, group_key};
use crate::analyzers::matcher::DiffRecord;
use crate::analyzers::types::{GroupSummary, ReportSummary};
use crate::output::{write_json, write_records};

pub struct ReportWriter {
    out_dir: PathBuf,
}

impl ReportWriter {
    /// Creates `out_dir` if needed.
    pub fn new(out_dir: &Path) -> Result<Self> {
        fs::create_dir_all(out_dir)
            .with_context(|| format!("creating output directory {}", out_dir.display()))?;
        Ok(Self {
            out_dir: out_dir.to_path_buf(),
        })
    }

    pub fn path(&self, file_name: &str) -> PathBuf {
        self.out_dir.join(file_name)
    }

    pub fn write_differences(&self, diffs: &[DiffRecord]) -> Result<PathBuf> {
        let path = self.path("differences.csv");
        write_records(&path, diffs)?;
        Ok(path)
    }

    /// Writes `summary.csv` and `summary.json`.
    pub fn write_summary(
        &self,
        title: &str,
        diffs: &[DiffRecord],
        groups: Vec<GroupSummary>,
    ) -> Result<()> {
        write_records(&self.path("summary.csv"), &groups)?;

        let summary = ReportSummary {
            generated_at: chrono::Utc::now(),
            title: title.to_string(),
            total_differences: diffs.len(),
            missing_differences: diffs.iter().filter(|d| d.difference.is_none()).count(),
            groups,
        };
        write_json(&self.path("summary.json"), &summary)
    }

    /// Writes the rows of each group to its own `group_<labels>.csv`.
    pub fn write_groups(
        &self,
        diffs: &[DiffRecord],
        group_by: &[GroupField],
    ) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        for summary in aggregate(diffs, group_by, None) {
            let rows: Vec<&DiffRecord> = diffs
                .iter()
                .filter(|d| belongs_to(d, &summary, group_by))
                .collect();
            let path = self.path(&group_file_name(&summary));
            write_records(&path, &rows)?;
            written.push(path);
        }
        info!(files = written.len(), dir = %self.out_dir.display(), "Wrote group tables");
        Ok(written)
    }
}

fn belongs_to(d: &DiffRecord, summary: &GroupSummary, group_by: &[GroupField]) -> bool {
    group_key(d, group_by).is_some_and(|(_, labels)| labels == summary.labels)
}

/// `group_` followed by the group's label values, with anything other than
/// ASCII letters, digits, `-` and `.` replaced by `-`.
pub fn group_file_name(summary: &GroupSummary) -> String {
    let labels: Vec<String> = summary
        .labels
        .iter()
        .map(|(_, value)| {
            value
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '-' })
                .collect()
        })
        .collect();
    format!("group_{}.csv", labels.join("_"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::band::frequency_band;
    use crate::model::{FormFactor, Side};

    fn diff(session: &str, form: FormFactor, freq: u32, value: f64) -> DiffRecord {
        DiffRecord {
            subject: "S01".into(),
            session: session.into(),
            form_factor: Some(form),
            freq,
            band: frequency_band(freq),
            side: Side::Right,
            level: Some(2),
            measured_unit: "spl".into(),
            target_unit: "estat_target".into(),
            measured: Some(60.0 + value),
            target: Some(60.0),
            difference: Some(value),
        }
    }

    #[test]
    fn test_group_file_names() {
        let diffs = vec![diff("BestFit", FormFactor::Ite, 500, 1.0)];
        let groups = aggregate(&diffs, &[GroupField::FormGroup, GroupField::Band], None);
        assert_eq!(group_file_name(&groups[0]), "group_Wireless-Custom_low.csv");
    }

    #[test]
    fn test_writes_all_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("report");
        let writer = ReportWriter::new(&out).unwrap();
        let diffs = vec![
            diff("BestFit", FormFactor::Ric, 500, 1.0),
            diff("EndStudy", FormFactor::Ric, 500, 2.0),
            diff("EndStudy", FormFactor::Ric, 4000, 3.0),
        ];

        writer.write_differences(&diffs).unwrap();
        let groups = aggregate(&diffs, &[GroupField::Session], None);
        writer.write_summary("test", &diffs, groups).unwrap();
        let files = writer.write_groups(&diffs, &[GroupField::Session]).unwrap();

        assert!(out.join("differences.csv").exists());
        assert!(out.join("summary.csv").exists());
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(out.join("summary.json")).unwrap()).unwrap();
        assert_eq!(json["total_differences"], 3);
        assert_eq!(json["groups"][1]["n"], 2);

        assert_eq!(files.len(), 2);
        let end = fs::read_to_string(out.join("group_EndStudy.csv")).unwrap();
        assert_eq!(end.lines().count(), 3);
    }
}
