use std::collections::BTreeMap;

use tracing::warn;

use crate::analyzers::matcher::{DiffRecord, KeyPart};
use crate::analyzers::types::GroupSummary;
use crate::analyzers::utility::{mean, rms, stddev};
use crate::config::CriterionRule;

/// Categorical factor a difference table can be grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupField {
    Subject,
    Session,
    FormFactor,
    /// Collapsed form factor; records without a group are left out.
    FormGroup,
    Freq,
    Band,
    Side,
    Level,
}

impl GroupField {
    pub fn name(self) -> &'static str {
        match self {
            GroupField::Subject => "subject",
            GroupField::Session => "session",
            GroupField::FormFactor => "form_factor",
            GroupField::FormGroup => "form_group",
            GroupField::Freq => "freq",
            GroupField::Band => "band",
            GroupField::Side => "side",
            GroupField::Level => "level",
        }
    }

    fn part(self, d: &DiffRecord) -> Option<KeyPart> {
        let text = |s: String| Some(KeyPart::Text(s));
        match self {
            GroupField::Subject => text(d.subject.clone()),
            GroupField::Session => text(d.session.clone()),
            GroupField::FormFactor => Some(
                d.form_factor
                    .map_or(KeyPart::Missing, |f| KeyPart::Text(f.label().to_string())),
            ),
            GroupField::FormGroup => d.form_factor?.group().and_then(|g| text(g.to_string())),
            GroupField::Freq => Some(KeyPart::Number(d.freq)),
            // Bands sort low < mid < high
            GroupField::Band => Some(KeyPart::Number(d.band as u32)),
            GroupField::Side => text(d.side.code().to_string()),
            GroupField::Level => {
                Some(d.level.map_or(KeyPart::Missing, |l| KeyPart::Number(l.into())))
            }
        }
    }

    fn label(self, d: &DiffRecord, part: &KeyPart) -> String {
        match self {
            GroupField::Band => d.band.to_string(),
            _ => part.to_string(),
        }
    }
}

/// Sort key and `(field, value)` labels of `d` under `group_by`, or `None`
/// when a field has no value for it.
pub fn group_key(
    d: &DiffRecord,
    group_by: &[GroupField],
) -> Option<(Vec<KeyPart>, Vec<(String, String)>)> {
    let mut key = Vec::with_capacity(group_by.len());
    let mut labels = Vec::with_capacity(group_by.len());
    for field in group_by {
        let part = field.part(d)?;
        labels.push((field.name().to_string(), field.label(d, &part)));
        key.push(part);
    }
    Some((key, labels))
}

/// Groups `diffs` by `group_by` and summarises each group.
///
/// Missing differences are counted but excluded from the statistics. With a
/// `ceiling`, the count and percent of |difference| <= ceiling are reported.
/// Groups come out in ascending key order.
pub fn aggregate(
    diffs: &[DiffRecord],
    group_by: &[GroupField],
    ceiling: Option<f64>,
) -> Vec<GroupSummary> {
    let mut groups: BTreeMap<Vec<KeyPart>, (Vec<(String, String)>, Vec<&DiffRecord>)> =
        BTreeMap::new();
    let mut ungrouped = 0usize;

    for d in diffs {
        let Some((key, labels)) = group_key(d, group_by) else {
            ungrouped += 1;
            continue;
        };
        groups
            .entry(key)
            .or_insert_with(|| (labels, Vec::new()))
            .1
            .push(d);
    }
    if ungrouped > 0 {
        warn!(ungrouped, "Differences without a form group left out of the summary");
    }

    groups
        .into_values()
        .map(|(labels, members)| summarize(labels, &members, ceiling))
        .collect()
}

/// Aggregates once per criterion rule, each time over the differences at
/// that rule's frequencies and with its ceiling.
pub fn aggregate_by_criteria(
    diffs: &[DiffRecord],
    group_by: &[GroupField],
    rules: &[CriterionRule],
) -> Vec<GroupSummary> {
    rules
        .iter()
        .flat_map(|rule| {
            let subset: Vec<DiffRecord> = diffs
                .iter()
                .filter(|d| rule.freqs.contains(&d.freq))
                .cloned()
                .collect();
            aggregate(&subset, group_by, Some(rule.ceiling))
        })
        .collect()
}

fn summarize(
    labels: Vec<(String, String)>,
    members: &[&DiffRecord],
    ceiling: Option<f64>,
) -> GroupSummary {
    let values: Vec<f64> = members.iter().filter_map(|d| d.difference).collect();
    let n = values.len();
    let n_missing = members.len() - n;

    let (avg, root, sd) = if n == 0 {
        (None, None, None)
    } else {
        let m = mean(&values);
        (Some(m), Some(rms(&values)), Some(stddev(&values, m)))
    };

    let n_within = ceiling.map(|c| values.iter().filter(|v| v.abs() <= c).count());
    let pct_within = n_within
        .filter(|_| n > 0)
        .map(|k| k as f64 / n as f64 * 100.0);

    let group = labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(";");

    GroupSummary {
        group,
        labels,
        n,
        n_missing,
        mean: avg,
        rms: root,
        stddev: sd,
        ceiling,
        n_within,
        pct_within,
    }
}
