//! Study-level comparisons built on [`difference`].

use std::collections::{BTreeMap, BTreeSet};

use tracing::{error, info, warn};

use crate::analyzers::matcher::{DiffRecord, KeyField, difference};
use crate::error::MatchError;
use crate::extract::estat::EstatRecord;
use crate::extract::form_key::FormKey;
use crate::extract::insitu::{Environment, InSituRecord};
use crate::extract::medrx::{BESTFIT, ENDSTUDY, MedRxRecord};
use crate::extract::verifit::VerifitRecord;
use crate::model::Observation;

const RECORD_KEY: &[KeyField] = &[
    KeyField::Record,
    KeyField::Freq,
    KeyField::Side,
    KeyField::Level,
];
const SUBJECT_KEY: &[KeyField] = &[KeyField::Subject, KeyField::Freq, KeyField::Side];
const INSITU_KEY: &[KeyField] = &[
    KeyField::Subject,
    KeyField::Session,
    KeyField::Freq,
    KeyField::Side,
];

/// Measured Verifit curves against the targets stored in the same file.
///
/// Measured curves are limited to the frequencies and curves that have a
/// target. A record whose keys still disagree is logged and skipped.
pub fn verifit_target_diffs(records: &[VerifitRecord]) -> Vec<DiffRecord> {
    let mut diffs = Vec::new();
    for record in records {
        let result = record
            .measured_observations()
            .and_then(|m| record.target_observations().map(|t| (m, t)));
        let (measured, targets) = match result {
            Ok(pair) => pair,
            Err(e) => {
                error!(file = %record.meta.record, error = %e, "Skipping record");
                continue;
            }
        };

        let covered: BTreeSet<_> = targets.iter().map(|t| (t.freq, t.side, t.level)).collect();
        let measured: Vec<Observation> = measured
            .into_iter()
            .filter(|m| covered.contains(&(m.freq, m.side, m.level)))
            .collect();

        match difference(&measured, &targets, RECORD_KEY) {
            Ok(mut d) => diffs.append(&mut d),
            Err(e) => error!(
                file = %record.meta.record,
                error = %e,
                "Measured and target curves do not line up"
            ),
        }
    }
    info!(records = records.len(), differences = diffs.len(), "Verifit target differences");
    diffs
}

/// Subject → form factor taken from the eSTAT device descriptions.
///
/// # Errors
///
/// [`MatchError::ConflictingFormFactor`] when two files for one subject
/// describe different devices.
pub fn form_key_from_estat(records: &[EstatRecord]) -> Result<FormKey, MatchError> {
    let mut key = FormKey::new();
    for record in records {
        let subject = &record.meta.subject;
        let form = record.form_factor();
        match key.insert(subject.clone(), form) {
            Some(previous) if previous != form => {
                return Err(MatchError::ConflictingFormFactor {
                    subject: subject.clone(),
                    first: previous,
                    second: form,
                });
            }
            _ => {}
        }
    }
    Ok(key)
}

/// Fills in each observation's form factor from `key`.
///
/// # Errors
///
/// [`MatchError::UnknownSubject`] for a subject missing from the key.
pub fn assign_form_factors(
    observations: &mut [Observation],
    key: &FormKey,
) -> Result<(), MatchError> {
    for o in observations.iter_mut() {
        let form = key
            .get(&o.subject)
            .ok_or_else(|| MatchError::UnknownSubject(o.subject.clone()))?;
        o.form_factor = Some(*form);
    }
    Ok(())
}

fn partition_by<'a>(
    observations: &'a [Observation],
    field: impl Fn(&'a Observation) -> &'a str,
) -> BTreeMap<&'a str, Vec<Observation>> {
    let mut groups: BTreeMap<&str, Vec<Observation>> = BTreeMap::new();
    for o in observations {
        groups.entry(field(o)).or_default().push(o.clone());
    }
    groups
}

fn by_session(observations: &[Observation]) -> BTreeMap<&str, Vec<Observation>> {
    partition_by(observations, |o| o.session.as_str())
}

/// Pairs `measured` with `target` one subject at a time.
///
/// A subject missing from either side, or whose keys do not line up, is
/// logged and left out; the other subjects are kept.
fn difference_by_subject(
    context: &str,
    measured: &[Observation],
    target: &[Observation],
    fields: &[KeyField],
) -> Vec<DiffRecord> {
    let measured = partition_by(measured, |o| o.subject.as_str());
    let target = partition_by(target, |o| o.subject.as_str());
    let subjects: BTreeSet<&str> = measured.keys().chain(target.keys()).copied().collect();

    let mut diffs = Vec::new();
    for subject in subjects {
        let (Some(m), Some(t)) = (measured.get(subject), target.get(subject)) else {
            error!(context, subject, "Subject has nothing to pair with, skipping");
            continue;
        };
        match difference(m, t, fields) {
            Ok(mut d) => diffs.append(&mut d),
            Err(e) => error!(context, subject, error = %e, "Skipping subject"),
        }
    }
    diffs
}

/// Measured curves at `level` against eSTAT targets, session by session,
/// keyed on subject, frequency and side.
///
/// Only eSTAT subjects that appear in a session take part in it. A subject
/// whose curves and targets do not line up is logged and skipped.
///
/// # Errors
///
/// [`MatchError::NothingPaired`] when there were measurements but no
/// subject could be paired.
pub fn compare_to_estat(
    measured: &[Observation],
    estat: &[Observation],
    level: u8,
) -> Result<Vec<DiffRecord>, MatchError> {
    let at_level: Vec<Observation> = measured
        .iter()
        .filter(|o| o.level == Some(level))
        .cloned()
        .collect();

    let mut diffs = Vec::new();
    for (session, observations) in by_session(&at_level) {
        let subjects: BTreeSet<&str> = observations.iter().map(|o| o.subject.as_str()).collect();
        let targets: Vec<Observation> = estat
            .iter()
            .filter(|t| subjects.contains(t.subject.as_str()))
            .cloned()
            .collect();
        info!(session, subjects = subjects.len(), "Comparing session to eSTAT targets");
        diffs.extend(difference_by_subject(session, &observations, &targets, SUBJECT_KEY));
    }

    if diffs.is_empty() && !at_level.is_empty() {
        return Err(MatchError::NothingPaired {
            context: "eSTAT comparison".into(),
        });
    }
    Ok(diffs)
}

/// Reference session minus every other session for subjects that have both.
///
/// Each record carries the compared session's name, so grouping by session
/// gives one set of fine-tuning differences per session. Subjects whose
/// sessions do not line up are logged and skipped.
///
/// # Errors
///
/// [`MatchError::NothingPaired`] when some subject had both sessions but
/// none could be paired.
pub fn fine_tuning(
    measured: &[Observation],
    reference: &str,
) -> Result<Vec<DiffRecord>, MatchError> {
    let sessions = by_session(measured);
    let Some(reference_obs) = sessions.get(reference) else {
        warn!(reference, "No observations for the reference session");
        return Ok(Vec::new());
    };
    let reference_subjects: BTreeSet<&str> =
        reference_obs.iter().map(|o| o.subject.as_str()).collect();

    let mut diffs = Vec::new();
    let mut attempted = false;
    for (session, observations) in sessions.iter().filter(|(s, _)| **s != reference) {
        let (shared, dropped): (Vec<Observation>, Vec<Observation>) = observations
            .iter()
            .cloned()
            .partition(|o| reference_subjects.contains(o.subject.as_str()));
        if !dropped.is_empty() {
            let missing: BTreeSet<&str> = dropped.iter().map(|o| o.subject.as_str()).collect();
            warn!(session, subjects = ?missing, "Subjects without a reference session left out");
        }
        if shared.is_empty() {
            continue;
        }
        attempted = true;

        let subjects: BTreeSet<&str> = shared.iter().map(|o| o.subject.as_str()).collect();
        let reference_part: Vec<Observation> = reference_obs
            .iter()
            .filter(|o| subjects.contains(o.subject.as_str()))
            .cloned()
            .collect();

        for mut d in difference_by_subject(session, &reference_part, &shared, SUBJECT_KEY) {
            d.session = session.to_string();
            diffs.push(d);
        }
    }

    if attempted && diffs.is_empty() {
        return Err(MatchError::NothingPaired {
            context: format!("fine tuning against {reference}"),
        });
    }
    Ok(diffs)
}

/// Booth minus in-situ thresholds, keyed on subject, condition
/// (`style_venting`), frequency and side.
///
/// With `booth_limits`, pairs whose booth threshold falls outside the
/// inclusive range are dropped. Subjects whose runs do not line up are
/// logged and skipped.
///
/// # Errors
///
/// [`MatchError::NothingPaired`] when there were thresholds but no subject
/// could be paired.
pub fn insitu_diffs(
    records: &[InSituRecord],
    booth_limits: Option<(f64, f64)>,
) -> Result<Vec<DiffRecord>, MatchError> {
    let mut booth = Vec::new();
    let mut insitu = Vec::new();
    for record in records {
        let observations = match record.observations() {
            Ok(o) => o,
            Err(e) => {
                error!(file = %record.meta.record, error = %e, "Skipping record");
                continue;
            }
        };
        match record.environment {
            Environment::Booth => booth.extend(observations),
            Environment::InSitu => insitu.extend(observations),
        }
    }

    let mut diffs = difference_by_subject("in-situ", &booth, &insitu, INSITU_KEY);
    if diffs.is_empty() && !(booth.is_empty() && insitu.is_empty()) {
        return Err(MatchError::NothingPaired {
            context: "booth and in-situ thresholds".into(),
        });
    }

    if let Some((low, high)) = booth_limits {
        let before = diffs.len();
        diffs.retain(|d| d.measured.is_some_and(|b| (low..=high).contains(&b)));
        info!(low, high, dropped = before - diffs.len(), "Booth threshold limits applied");
    }
    Ok(diffs)
}

/// MedRx measured curves at `level` against the MedRx target, for both
/// sessions of every record. Records that fail are logged and skipped.
pub fn medrx_diffs(records: &[MedRxRecord], level: u8) -> Vec<DiffRecord> {
    let mut diffs = Vec::new();
    for record in records {
        for session in [BESTFIT, ENDSTUDY] {
            let pair = record
                .measured_observations(session)
                .and_then(|m| record.target_observations(session).map(|t| (m, t)));
            let result = pair.map_err(|e| e.to_string()).and_then(|(measured, targets)| {
                let measured: Vec<Observation> =
                    measured.into_iter().filter(|o| o.level == Some(level)).collect();
                difference(&measured, &targets, RECORD_KEY).map_err(|e| e.to_string())
            });
            match result {
                Ok(mut d) => diffs.append(&mut d),
                Err(e) => {
                    error!(file = %record.record, session, error = %e, "Skipping MedRx session")
                }
            }
        }
    }
    diffs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::matcher::tests::obs;
    use crate::model::{FormFactor, RecordId, Side};

    fn in_session(mut o: Observation, session: &str) -> Observation {
        o.session = session.to_string();
        o
    }

    #[test]
    fn test_compare_to_estat_per_session() {
        let measured = vec![
            in_session(obs("S01", 500, Side::Left, "spl", 70.0), "BestFit"),
            in_session(obs("S01", 500, Side::Left, "spl", 66.0), "EndStudy"),
            in_session(obs("S02", 500, Side::Left, "spl", 60.0), "EndStudy"),
        ];
        let estat = vec![
            obs("S01", 500, Side::Left, "estat_target", 65.0),
            obs("S02", 500, Side::Left, "estat_target", 61.0),
        ];

        let diffs = compare_to_estat(&measured, &estat, 2).unwrap();
        let got: Vec<(&str, &str, Option<f64>)> = diffs
            .iter()
            .map(|d| (d.session.as_str(), d.subject.as_str(), d.difference))
            .collect();
        assert_eq!(
            got,
            vec![
                ("BestFit", "S01", Some(5.0)),
                ("EndStudy", "S01", Some(1.0)),
                ("EndStudy", "S02", Some(-1.0)),
            ]
        );
    }

    #[test]
    fn test_compare_to_estat_nothing_paired_raises() {
        let measured = vec![obs("S01", 500, Side::Left, "spl", 70.0)];
        let estat = vec![
            obs("S01", 500, Side::Left, "estat_target", 65.0),
            obs("S01", 1000, Side::Left, "estat_target", 65.0),
        ];
        assert!(matches!(
            compare_to_estat(&measured, &estat, 2),
            Err(MatchError::NothingPaired { .. })
        ));
    }

    #[test]
    fn test_compare_to_estat_skips_subject_missing_a_side() {
        let measured = vec![
            obs("S01", 500, Side::Left, "spl", 70.0),
            obs("S01", 500, Side::Right, "spl", 60.0),
            obs("S02", 500, Side::Left, "spl", 62.0),
        ];
        let estat = vec![
            obs("S01", 500, Side::Left, "estat_target", 65.0),
            obs("S01", 500, Side::Right, "estat_target", 55.0),
            obs("S02", 500, Side::Left, "estat_target", 60.0),
            obs("S02", 500, Side::Right, "estat_target", 58.0),
        ];

        let diffs = compare_to_estat(&measured, &estat, 2).unwrap();
        assert_eq!(diffs.len(), 2);
        assert!(diffs.iter().all(|d| d.subject == "S01"));
    }

    #[test]
    fn test_fine_tuning_against_reference() {
        let measured = vec![
            in_session(obs("S01", 500, Side::Right, "spl", 70.0), "EndStudy"),
            in_session(obs("S01", 500, Side::Right, "spl", 67.0), "BestFit"),
            in_session(obs("S02", 500, Side::Right, "spl", 60.0), "BestFit"),
        ];

        let diffs = fine_tuning(&measured, "EndStudy").unwrap();
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].subject, "S01");
        assert_eq!(diffs[0].session, "BestFit");
        assert_eq!(diffs[0].difference, Some(3.0));
    }

    #[test]
    fn test_fine_tuning_skips_subject_that_does_not_line_up() {
        let measured = vec![
            in_session(obs("S01", 500, Side::Left, "spl", 70.0), "EndStudy"),
            in_session(obs("S01", 500, Side::Left, "spl", 68.0), "BestFit"),
            in_session(obs("S02", 500, Side::Left, "spl", 60.0), "EndStudy"),
            in_session(obs("S02", 1000, Side::Left, "spl", 61.0), "BestFit"),
        ];

        let diffs = fine_tuning(&measured, "EndStudy").unwrap();
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].subject, "S01");
        assert_eq!(diffs[0].difference, Some(2.0));

        let only_bad = &measured[2..];
        assert!(matches!(
            fine_tuning(only_bad, "EndStudy"),
            Err(MatchError::NothingPaired { .. })
        ));
    }

    fn estat_record(stem: &str, form_factor: FormFactor) -> EstatRecord {
        let (subject, session) = crate::model::split_subject(stem);
        EstatRecord {
            meta: crate::reshape::RecordMeta {
                record: RecordId::new(format!("/d/{stem}.csv")),
                subject,
                session,
                form_factor: Some(form_factor),
            },
            device: form_factor.label().to_string(),
            targets: crate::table::WideTable::new(["freq"], ["left", "right"]),
        }
    }

    #[test]
    fn test_form_key_conflict_names_both_devices() {
        let agreeing = [
            estat_record("S01_a", FormFactor::Cic),
            estat_record("S01_b", FormFactor::Cic),
        ];
        assert_eq!(form_key_from_estat(&agreeing).unwrap()["S01"], FormFactor::Cic);

        let conflicting = [
            estat_record("S01_a", FormFactor::Cic),
            estat_record("S01_b", FormFactor::RicRt),
        ];
        assert_eq!(
            form_key_from_estat(&conflicting),
            Err(MatchError::ConflictingFormFactor {
                subject: "S01".into(),
                first: FormFactor::Cic,
                second: FormFactor::RicRt,
            })
        );
    }

    fn insitu_record(
        subject: &str,
        environment: Environment,
        rows: &[(u32, f64, f64)],
    ) -> InSituRecord {
        let mut thresholds = crate::table::WideTable::new(["freq"], ["left", "right"]);
        for &(freq, left, right) in rows {
            thresholds
                .push_row(vec![freq.to_string()], vec![Some(left), Some(right)])
                .unwrap();
        }
        InSituRecord {
            meta: crate::reshape::RecordMeta {
                record: RecordId::new(format!("/d/{subject}_{environment:?}.csv")),
                subject: subject.to_string(),
                session: "RIC_Open".into(),
                form_factor: Some(FormFactor::Ric),
            },
            style: "RIC".into(),
            venting: "Open".into(),
            environment,
            thresholds,
        }
    }

    #[test]
    fn test_insitu_booth_minus_insitu() {
        let records = [
            insitu_record("P01", Environment::Booth, &[(500, 20.0, 40.0)]),
            insitu_record("P01", Environment::InSitu, &[(500, 25.0, 30.0)]),
            insitu_record("P02", Environment::Booth, &[(500, 20.0, 20.0)]),
        ];

        let all = insitu_diffs(&records, None).unwrap();
        let got: Vec<(Side, Option<f64>)> = all.iter().map(|d| (d.side, d.difference)).collect();
        assert_eq!(got, vec![(Side::Left, Some(-5.0)), (Side::Right, Some(10.0))]);
        assert!(all.iter().all(|d| d.subject == "P01" && d.session == "RIC_Open"));

        let limited = insitu_diffs(&records, Some((15.0, 35.0))).unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].measured, Some(20.0));
    }

    #[test]
    fn test_assign_form_factors() {
        let mut key = FormKey::new();
        key.insert("S01".into(), FormFactor::Cic);

        let mut observations = vec![obs("S01", 500, Side::Left, "spl", 1.0)];
        assign_form_factors(&mut observations, &key).unwrap();
        assert_eq!(observations[0].form_factor, Some(FormFactor::Cic));

        let mut unknown = vec![obs("S09", 500, Side::Left, "spl", 1.0)];
        assert_eq!(
            assign_form_factors(&mut unknown, &key),
            Err(MatchError::UnknownSubject("S09".into()))
        );
    }
}
