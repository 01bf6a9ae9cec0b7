//! Stage drivers behind the CLI subcommands.
//!
//! Each driver runs extraction, matching and reporting for one input type
//! and writes its outputs to the paths it is given.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::analyzers::aggregate::{GroupField, aggregate, aggregate_by_criteria};
use crate::analyzers::matcher::DiffRecord;
use crate::analyzers::outliers::{OutlierReport, find_outliers, load_scores, remove_outliers};
use crate::analyzers::report::ReportWriter;
use crate::analyzers::sdt::{count_responses, evaluate, load_responses};
use crate::analyzers::study::{
    assign_form_factors, compare_to_estat, fine_tuning, form_key_from_estat, insitu_diffs,
    medrx_diffs, verifit_target_diffs,
};
use crate::analyzers::types::{OutlierRow, SiiRow};
use crate::config::{CriterionRule, StudyConfig};
use crate::extract::estat::{self, EstatRecord, check_file_names};
use crate::extract::form_key;
use crate::extract::insitu::{self, InSituRecord};
use crate::extract::medrx::{self, MedRxRecord};
use crate::extract::verifit::{self, VerifitOptions, VerifitRecord};
use crate::extract::{discover_files, extract_all};
use crate::model::Observation;
use crate::output::{print_pretty, write_records, write_wide};
use crate::table::WideTable;

/// Input selection shared by the directory-driven commands.
#[derive(Debug, Clone)]
pub struct InputSpec {
    pub dir: PathBuf,
    pub pattern: String,
    pub recursive: bool,
}

impl InputSpec {
    pub fn new(dir: impl Into<PathBuf>, pattern: &str) -> Self {
        Self {
            dir: dir.into(),
            pattern: pattern.to_string(),
            recursive: false,
        }
    }
}

fn verifit_options(config: &StudyConfig) -> VerifitOptions {
    VerifitOptions {
        test_type: config.test_type,
        num_curves: config.num_curves,
        freqs: config.freqs.clone(),
    }
}

fn load_verifit(config: &StudyConfig, input: &InputSpec) -> Result<Vec<VerifitRecord>> {
    let files = discover_files(&input.dir, &input.pattern, input.recursive)?;
    let options = verifit_options(config);
    Ok(extract_all(&files, |id| verifit::extract(id, &options))?)
}

fn load_estat(config: &StudyConfig, input: &InputSpec) -> Result<Vec<EstatRecord>> {
    let files = discover_files(&input.dir, &input.pattern, input.recursive)?;
    check_file_names(&files)?;
    Ok(extract_all(&files, |id| estat::extract(id, &config.freqs))?)
}

fn measured_observations(records: &[VerifitRecord]) -> Result<Vec<Observation>> {
    let mut observations = Vec::new();
    for record in records {
        observations.extend(record.measured_observations()?);
    }
    Ok(observations)
}

fn estat_observations(records: &[EstatRecord]) -> Result<Vec<Observation>> {
    let mut observations = Vec::new();
    for record in records {
        observations.extend(record.observations()?);
    }
    Ok(observations)
}

/// Writes differences, summary and per-group tables for one comparison.
fn write_report(
    out_dir: &Path,
    title: &str,
    diffs: &[DiffRecord],
    group_by: &[GroupField],
    rules: &[CriterionRule],
) -> Result<()> {
    let writer = ReportWriter::new(out_dir)?;
    writer.write_differences(diffs)?;

    let mut by_freq = group_by.to_vec();
    by_freq.push(GroupField::Freq);
    let mut groups = aggregate(diffs, &by_freq, None);
    groups.extend(aggregate_by_criteria(diffs, group_by, rules));
    print_pretty(&groups);
    writer.write_summary(title, diffs, groups)?;

    writer.write_groups(diffs, group_by)?;
    info!(title, out_dir = %out_dir.display(), differences = diffs.len(), "Report written");
    Ok(())
}

/// Every record's measured curves in one wide table keyed by record,
/// subject, session and frequency. Curves a record lacks are left empty.
fn measured_wide(records: &[VerifitRecord]) -> Result<WideTable> {
    let tagged = records
        .iter()
        .map(|r| {
            let ids = [r.meta.record.to_string(), r.meta.subject.clone(), r.meta.session.clone()];
            r.measured.with_leading_ids(&["record", "subject", "session"], &ids)
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(WideTable::concat(&tagged)?)
}

/// Extracts Verifit sessions and reports measured-minus-target differences
/// along with the long measured curves and aided SII values.
#[tracing::instrument(skip(config), fields(dir = %input.dir.display()))]
pub fn run_verifit(config: &StudyConfig, input: &InputSpec, out_dir: &Path) -> Result<()> {
    let records = load_verifit(config, input)?;
    let writer = ReportWriter::new(out_dir)?;

    let measured = measured_observations(&records)?;
    write_records(&writer.path("measured.csv"), &measured)?;
    write_wide(&writer.path("measured_wide.csv"), &measured_wide(&records)?)?;

    let sii: Vec<SiiRow> = records
        .iter()
        .flat_map(|r| {
            r.sii.iter().map(move |s| SiiRow {
                subject: r.meta.subject.clone(),
                session: r.meta.session.clone(),
                side: s.side,
                level: s.level,
                value: s.value,
            })
        })
        .collect();
    write_records(&writer.path("sii.csv"), &sii)?;

    let diffs = verifit_target_diffs(&records);
    write_report(
        out_dir,
        "Verifit measured minus Verifit target",
        &diffs,
        &[GroupField::Session, GroupField::Level],
        &config.criteria,
    )
}

/// Extracts eSTAT targets into one long CSV.
#[tracing::instrument(skip(config), fields(dir = %input.dir.display()))]
pub fn run_estat(config: &StudyConfig, input: &InputSpec, out: &Path) -> Result<()> {
    let records = load_estat(config, input)?;
    for record in &records {
        info!(
            subject = %record.meta.subject,
            form_factor = %record.form_factor(),
            device = %record.device,
            "eSTAT record"
        );
    }
    let observations = estat_observations(&records)?;
    write_records(out, &observations).with_context(|| format!("writing {}", out.display()))?;
    info!(records = records.len(), rows = observations.len(), "eSTAT targets written");
    Ok(())
}

/// Compares Verifit measurements with eSTAT targets and reports fine-tuning
/// relative to the reference session under `out_dir/fine_tuning`.
///
/// Form factors come from `form_key` when given, otherwise from the eSTAT
/// device descriptions.
#[tracing::instrument(skip(config, verifit_input, estat_input))]
pub fn run_compare(
    config: &StudyConfig,
    verifit_input: &InputSpec,
    estat_input: &InputSpec,
    form_key: Option<&Path>,
    collapse: bool,
    out_dir: &Path,
) -> Result<()> {
    let verifit_records = load_verifit(config, verifit_input)?;
    let estat_records = load_estat(config, estat_input)?;

    let form_key = match form_key {
        Some(path) => form_key::load(path)?,
        None => form_key_from_estat(&estat_records)?,
    };
    let mut measured = measured_observations(&verifit_records)?;
    assign_form_factors(&mut measured, &form_key)?;
    let targets = estat_observations(&estat_records)?;

    let form_field = if collapse {
        GroupField::FormGroup
    } else {
        GroupField::FormFactor
    };
    let group_by = [GroupField::Session, form_field];

    let diffs = compare_to_estat(&measured, &targets, config.estat_level)?;
    write_report(
        out_dir,
        "Verifit measured minus eSTAT target",
        &diffs,
        &group_by,
        &config.criteria,
    )?;

    let at_level: Vec<Observation> = measured
        .into_iter()
        .filter(|o| o.level == Some(config.estat_level))
        .collect();
    let tuning = fine_tuning(&at_level, &config.reference_session)?;
    if tuning.is_empty() {
        warn!(reference = %config.reference_session, "No fine-tuning differences");
        return Ok(());
    }
    write_report(
        &out_dir.join("fine_tuning"),
        &format!("{} minus session", config.reference_session),
        &tuning,
        &group_by,
        &config.criteria,
    )
}

/// Reports MedRx measured curves against the MedRx target for both sessions
/// and writes the real ear unaided gain as `reug.csv`.
#[tracing::instrument(skip(config), fields(dir = %input.dir.display()))]
pub fn run_medrx(config: &StudyConfig, input: &InputSpec, out_dir: &Path) -> Result<()> {
    let files = discover_files(&input.dir, &input.pattern, input.recursive)?;
    let records: Vec<MedRxRecord> =
        extract_all(&files, |id| medrx::extract(id, &config.medrx_freqs))?;

    let diffs = medrx_diffs(&records, medrx::TARGET_LEVEL);
    write_report(
        out_dir,
        "MedRx measured minus MedRx target",
        &diffs,
        &[GroupField::Session, GroupField::FormFactor],
        &config.criteria,
    )?;

    let mut reug = Vec::new();
    for record in &records {
        reug.extend(record.reug_observations()?);
    }
    write_records(&out_dir.join("reug.csv"), &reug)?;
    Ok(())
}

/// Pairs booth and in-situ threshold runs and reports booth minus in-situ
/// per condition, once with all pairs and once under `out_dir/cleaned`
/// with only booth thresholds inside the configured limits.
///
/// A difference within the in-situ ceiling counts as a match.
#[tracing::instrument(skip(config), fields(dir = %input.dir.display()))]
pub fn run_insitu(config: &StudyConfig, input: &InputSpec, out_dir: &Path) -> Result<()> {
    let files = discover_files(&input.dir, &input.pattern, input.recursive)?;
    let records: Vec<InSituRecord> = extract_all(&files, insitu::extract)?;

    let mut freqs: Vec<u32> = records
        .iter()
        .flat_map(|r| r.thresholds.rows.iter())
        .filter_map(|row| row.ids[0].parse().ok())
        .collect();
    freqs.sort_unstable();
    freqs.dedup();
    let rules = [CriterionRule {
        freqs,
        ceiling: config.insitu_ceiling,
    }];
    let group_by = [GroupField::FormFactor, GroupField::Session];

    let diffs = insitu_diffs(&records, None)?;
    write_report(out_dir, "Booth minus in-situ threshold", &diffs, &group_by, &rules)?;

    let cleaned = insitu_diffs(&records, Some(config.booth_limits))?;
    if cleaned.is_empty() {
        warn!(limits = ?config.booth_limits, "No pairs inside the booth threshold limits");
        return Ok(());
    }
    write_report(
        &out_dir.join("cleaned"),
        "Booth minus in-situ threshold, booth limits applied",
        &cleaned,
        &group_by,
        &rules,
    )
}

/// Computes d', β and percent correct per subject.
#[tracing::instrument(fields(dir = %input.dir.display()))]
pub fn run_sdt(input: &InputSpec, out: &Path) -> Result<()> {
    let files = discover_files(&input.dir, &input.pattern, input.recursive)?;
    let responses = load_responses(&files)?;
    let counts = count_responses(&responses);

    let rows: Vec<_> = counts
        .iter()
        .map(|(subject, counts)| evaluate(subject, *counts))
        .collect();
    let degenerate = rows.iter().filter(|r| r.error.is_some()).count();
    write_records(out, &rows)?;
    info!(subjects = rows.len(), degenerate, out = %out.display(), "SDT results written");
    Ok(())
}

fn outlier_rows(report: &OutlierReport) -> Vec<OutlierRow> {
    let single = report.outliers.iter().map(|o| OutlierRow {
        condition: o.condition.clone(),
        value: o.value,
        subjects: o.subject.clone(),
        ambiguous: false,
    });
    let ambiguous = report.ambiguous.iter().map(|a| OutlierRow {
        condition: a.condition.clone(),
        value: a.value,
        subjects: a.subjects.join(";"),
        ambiguous: true,
    });
    single.chain(ambiguous).collect()
}

/// Screens scores for outliers. With `clean`, also writes the scores with
/// outliers removed, which fails while any outlier is ambiguous.
#[tracing::instrument]
pub fn run_outliers(input: &Path, out: &Path, clean: Option<&Path>) -> Result<()> {
    let scores = load_scores(input)?;
    let report = find_outliers(&scores);
    write_records(out, &outlier_rows(&report))?;

    if let Some(clean) = clean {
        let kept = remove_outliers(&scores, &report)?;
        write_records(clean, &kept)?;
    }
    Ok(())
}
