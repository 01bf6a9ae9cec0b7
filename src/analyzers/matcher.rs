//! Keyed pairing of measured and target observations.
//!
//! Two tables are aligned only through an explicit composite key. Each
//! table must hold every key exactly once and both tables must hold the same
//! key set; anything else is a [`MatchError`].

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::analyzers::band::{FrequencyBand, frequency_band};
use crate::error::MatchError;
use crate::model::{FormFactor, Observation, Side};

/// Observation attribute that can take part in a join or grouping key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyField {
    Record,
    Subject,
    Session,
    FormFactor,
    Freq,
    Side,
    Level,
    Unit,
}

/// One component of a key. Numbers order numerically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyPart {
    Missing,
    Number(u32),
    Text(String),
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Missing => f.write_str("-"),
            KeyPart::Number(n) => write!(f, "{n}"),
            KeyPart::Text(s) => f.write_str(s),
        }
    }
}

pub type JoinKey = Vec<KeyPart>;

impl KeyField {
    pub fn part(self, o: &Observation) -> KeyPart {
        match self {
            KeyField::Record => KeyPart::Text(o.record.to_string()),
            KeyField::Subject => KeyPart::Text(o.subject.clone()),
            KeyField::Session => KeyPart::Text(o.session.clone()),
            KeyField::FormFactor => o
                .form_factor
                .map_or(KeyPart::Missing, |f| KeyPart::Text(f.label().to_string())),
            KeyField::Freq => KeyPart::Number(o.freq),
            KeyField::Side => KeyPart::Text(o.side.code().to_string()),
            KeyField::Level => o.level.map_or(KeyPart::Missing, |l| KeyPart::Number(l.into())),
            KeyField::Unit => KeyPart::Text(o.unit.clone()),
        }
    }
}

pub fn join_key(o: &Observation, fields: &[KeyField]) -> JoinKey {
    fields.iter().map(|f| f.part(o)).collect()
}

fn render(key: &JoinKey) -> Vec<String> {
    key.iter().map(ToString::to_string).collect()
}

/// A measured observation paired with its target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffRecord {
    pub subject: String,
    pub session: String,
    pub form_factor: Option<FormFactor>,
    pub freq: u32,
    pub band: FrequencyBand,
    pub side: Side,
    pub level: Option<u8>,
    pub measured_unit: String,
    pub target_unit: String,
    pub measured: Option<f64>,
    pub target: Option<f64>,
    /// `measured − target`; `None` when either value is missing.
    pub difference: Option<f64>,
}

fn index<'a>(
    table: &'static str,
    observations: &'a [Observation],
    fields: &[KeyField],
) -> Result<BTreeMap<JoinKey, &'a Observation>, MatchError> {
    let mut map = BTreeMap::new();
    for o in observations {
        let key = join_key(o, fields);
        if map.contains_key(&key) {
            return Err(MatchError::DuplicateKey {
                table,
                key: render(&key),
            });
        }
        map.insert(key, o);
    }
    Ok(map)
}

/// Pairs `measured` with `target` on `fields` and computes differences.
///
/// Output is in ascending key order regardless of input order.
///
/// # Errors
///
/// [`MatchError::DuplicateKey`] if a key occurs twice in one table,
/// [`MatchError::KeyMismatch`] if the key sets differ.
pub fn difference(
    measured: &[Observation],
    target: &[Observation],
    fields: &[KeyField],
) -> Result<Vec<DiffRecord>, MatchError> {
    let measured_idx = index("measured", measured, fields)?;
    let target_idx = index("target", target, fields)?;

    let only_measured: Vec<Vec<String>> = measured_idx
        .keys()
        .filter(|k| !target_idx.contains_key(*k))
        .map(render)
        .collect();
    let only_target: Vec<Vec<String>> = target_idx
        .keys()
        .filter(|k| !measured_idx.contains_key(*k))
        .map(render)
        .collect();
    if !only_measured.is_empty() || !only_target.is_empty() {
        return Err(MatchError::KeyMismatch {
            only_measured,
            only_target,
        });
    }

    Ok(measured_idx
        .into_iter()
        .map(|(key, m)| {
            let t = target_idx[&key];
            DiffRecord {
                subject: m.subject.clone(),
                session: m.session.clone(),
                form_factor: m.form_factor.or(t.form_factor),
                freq: m.freq,
                band: frequency_band(m.freq),
                side: m.side,
                level: m.level.or(t.level),
                measured_unit: m.unit.clone(),
                target_unit: t.unit.clone(),
                measured: m.value,
                target: t.value,
                difference: m.value.zip(t.value).map(|(a, b)| a - b),
            }
        })
        .collect())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::RecordId;

    pub(crate) fn obs(subject: &str, freq: u32, side: Side, unit: &str, value: f64) -> Observation {
        Observation {
            record: RecordId::new(format!("/d/{subject}_{unit}.xml")),
            subject: subject.to_string(),
            session: "BestFit".to_string(),
            form_factor: None,
            freq,
            side,
            level: Some(2),
            unit: unit.to_string(),
            value: Some(value),
        }
    }

    const KEY: &[KeyField] = &[KeyField::Subject, KeyField::Freq, KeyField::Side];

    #[test]
    fn test_difference_of_matching_keys() {
        let measured = vec![
            obs("S01", 500, Side::Left, "spl", 70.0),
            obs("S01", 1000, Side::Left, "spl", 72.0),
            obs("S01", 2000, Side::Left, "spl", 68.0),
        ];
        let target = vec![
            obs("S01", 500, Side::Left, "estat_target", 65.0),
            obs("S01", 1000, Side::Left, "estat_target", 65.0),
            obs("S01", 2000, Side::Left, "estat_target", 65.0),
        ];

        let diffs = difference(&measured, &target, KEY).unwrap();
        let values: Vec<f64> = diffs.iter().map(|d| d.difference.unwrap()).collect();
        assert_eq!(values, vec![5.0, 7.0, 3.0]);
        assert_eq!(diffs[0].band, FrequencyBand::Low);
        assert_eq!(diffs[1].band, FrequencyBand::Mid);
    }

    #[test]
    fn test_pairing_ignores_input_order() {
        let measured = vec![
            obs("S02", 1000, Side::Right, "spl", 60.0),
            obs("S01", 1000, Side::Right, "spl", 70.0),
        ];
        let target = vec![
            obs("S01", 1000, Side::Right, "t", 69.0),
            obs("S02", 1000, Side::Right, "t", 50.0),
        ];

        let diffs = difference(&measured, &target, KEY).unwrap();
        assert_eq!(diffs[0].subject, "S01");
        assert_eq!(diffs[0].difference, Some(1.0));
        assert_eq!(diffs[1].subject, "S02");
        assert_eq!(diffs[1].difference, Some(10.0));
    }

    #[test]
    fn test_frequencies_sort_numerically() {
        let measured = vec![
            obs("S01", 500, Side::Left, "spl", 1.0),
            obs("S01", 1000, Side::Left, "spl", 1.0),
        ];
        let target = measured.clone();
        let diffs = difference(&measured, &target, KEY).unwrap();
        assert_eq!(diffs[0].freq, 500);
        assert_eq!(diffs[1].freq, 1000);
    }

    #[test]
    fn test_unequal_key_sets_raise() {
        let measured = vec![
            obs("S01", 500, Side::Left, "spl", 70.0),
            obs("S01", 1000, Side::Left, "spl", 72.0),
        ];
        let target = vec![obs("S01", 500, Side::Left, "t", 65.0)];

        match difference(&measured, &target, KEY) {
            Err(MatchError::KeyMismatch {
                only_measured,
                only_target,
            }) => {
                assert_eq!(only_measured, vec![vec!["S01".to_string(), "1000".into(), "L".into()]]);
                assert!(only_target.is_empty());
            }
            other => panic!("expected key mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_key_raises() {
        let measured = vec![
            obs("S01", 500, Side::Left, "spl", 70.0),
            obs("S01", 500, Side::Left, "spl", 71.0),
        ];
        let target = vec![obs("S01", 500, Side::Left, "t", 65.0)];

        assert!(matches!(
            difference(&measured, &target, KEY),
            Err(MatchError::DuplicateKey { table: "measured", .. })
        ));
    }

    #[test]
    fn test_missing_value_gives_missing_difference() {
        let measured = vec![obs("S01", 8000, Side::Left, "spl", 50.0)];
        let mut target = vec![obs("S01", 8000, Side::Left, "t", 0.0)];
        target[0].value = None;

        let diffs = difference(&measured, &target, KEY).unwrap();
        assert_eq!(diffs[0].difference, None);
        assert_eq!(diffs[0].band, FrequencyBand::High);
    }
}
