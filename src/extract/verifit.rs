//! Verifit session (`.xml`) extractor.
//!
//! Session files carry two frequency axes under `test[@name='frequencies']`:
//! the 1/12-octave axis used by measured curves and the audiometric axis
//! used by targets. Per-ear curves live under `test[@side=...]` as `data`
//! elements identified by their `internal` attribute.

use roxmltree::{Document, Node};
use tracing::{debug, warn};

use crate::config::TestType;
use crate::error::{ExtractError, Result};
use crate::model::{Observation, RecordId, Side, split_subject};
use crate::parser::{parse_frequency_list, parse_optional_number, parse_value_list};
use crate::reshape::{RecordMeta, to_observations};
use crate::table::WideTable;

/// What to pull out of each session file.
#[derive(Debug, Clone)]
pub struct VerifitOptions {
    pub test_type: TestType,
    pub num_curves: u8,
    pub freqs: Vec<u32>,
}

/// Aided speech intelligibility index for one ear and curve.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SiiValue {
    pub side: Side,
    pub level: u8,
    pub value: Option<f64>,
}

/// Everything extracted from one session file.
#[derive(Debug, Clone)]
pub struct VerifitRecord {
    pub meta: RecordMeta,
    /// `freq` × `spl_{L|R}{n}`, sampled at the configured frequencies.
    pub measured: WideTable,
    /// `freq` × `target_{L|R}{n}`, sampled at the configured frequencies
    /// present on the audiometric axis.
    pub targets: WideTable,
    pub sii: Vec<SiiValue>,
}

impl VerifitRecord {
    pub fn measured_observations(&self) -> Result<Vec<Observation>> {
        to_observations(&self.meta, &self.measured, "spl").map_err(|e| self.malformed(e))
    }

    pub fn target_observations(&self) -> Result<Vec<Observation>> {
        to_observations(&self.meta, &self.targets, "target").map_err(|e| self.malformed(e))
    }

    fn malformed(&self, e: crate::error::TableError) -> ExtractError {
        ExtractError::Malformed {
            path: self.meta.record.path().to_path_buf(),
            message: e.to_string(),
        }
    }
}

/// Parses one Verifit session file.
#[tracing::instrument(skip(options), fields(file = %id))]
pub fn extract(id: &RecordId, options: &VerifitOptions) -> Result<VerifitRecord> {
    let text = std::fs::read_to_string(id.path())?;
    parse_session(id, &text, options)
}

/// Parses session XML already read into memory.
pub fn parse_session(id: &RecordId, text: &str, options: &VerifitOptions) -> Result<VerifitRecord> {
    let path = id.path();
    let doc = Document::parse(text).map_err(|source| ExtractError::Xml {
        path: path.to_path_buf(),
        source,
    })?;
    let root = doc.root_element();

    let required = |name: &str| -> Result<Vec<u32>> {
        let text = find_data(root, ("name", "frequencies"), ("name", name)).ok_or_else(|| {
            ExtractError::MissingStructure {
                path: path.to_path_buf(),
                element: format!("test[@name='frequencies']/data[@name='{name}']"),
            }
        })?;
        parse_frequency_list(path, text)
    };
    let twelfths = required("12ths")?;
    let audiometric = required("audiometric")?;

    let prefix = options.test_type.internal_prefix();
    let stem = id.stem();
    let (subject, session) = split_subject(&stem);

    let measured = sample_curves(id, root, options, &twelfths, "spl", |n| {
        format!("map_{prefix}spl{n}")
    })?;
    if measured.value_columns.is_empty() {
        warn!(file = %stem, "File is missing MEASURED REM data");
    }

    let targets = sample_curves(id, root, options, &audiometric, "target", |n| {
        format!("map_{prefix}_targetspl{n}")
    })?;
    if targets.value_columns.is_empty() {
        warn!(file = %stem, "File is missing TARGET REM data");
    }

    let mut sii = Vec::new();
    for side in Side::BOTH {
        for n in 1..=options.num_curves {
            let internal = format!("map_{prefix}_sii{n}");
            let key = ("internal", internal.as_str());
            let text = find_data(root, ("side", side.xml_name()), key).unwrap_or("");
            let value = parse_optional_number(path, text)?;
            if value.is_none() {
                debug!(file = %stem, %side, curve = n, "No aided SII value");
            }
            sii.push(SiiValue {
                side,
                level: n,
                value,
            });
        }
    }

    Ok(VerifitRecord {
        meta: RecordMeta {
            record: id.clone(),
            subject,
            session,
            form_factor: None,
        },
        measured,
        targets,
        sii,
    })
}

/// Reads every `{unit}_{side}{n}` curve and samples it at the configured
/// frequencies. Curves missing from the file are skipped with a warning.
fn sample_curves(
    id: &RecordId,
    root: Node<'_, '_>,
    options: &VerifitOptions,
    axis: &[u32],
    unit: &str,
    internal_name: impl Fn(u8) -> String,
) -> Result<WideTable> {
    let path = id.path();
    let mut columns: Vec<String> = Vec::new();
    let mut curves: Vec<Vec<Option<f64>>> = Vec::new();

    for n in 1..=options.num_curves {
        let internal = internal_name(n);
        for side in Side::BOTH {
            let key = ("internal", internal.as_str());
            let Some(text) = find_data(root, ("side", side.xml_name()), key) else {
                warn!(file = %id.stem(), %side, %internal, "Curve missing from session file");
                continue;
            };
            let values = parse_value_list(path, text)?;
            if values.len() != axis.len() {
                return Err(ExtractError::Malformed {
                    path: path.to_path_buf(),
                    message: format!(
                        "{internal} ({side}) has {} values for {} frequencies",
                        values.len(),
                        axis.len()
                    ),
                });
            }
            columns.push(format!("{unit}_{side}{n}"));
            curves.push(values);
        }
    }

    let mut table = WideTable::new(["freq"], columns);
    for &freq in &options.freqs {
        let Some(idx) = axis.iter().position(|&f| f == freq) else {
            debug!(file = %id.stem(), freq, unit, "Frequency not on this axis");
            continue;
        };
        let row = curves.iter().map(|curve| curve[idx]).collect();
        table
            .push_row(vec![freq.to_string()], row)
            .map_err(|e| ExtractError::Malformed {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
    }
    Ok(table)
}

/// Text of `./test[@{test_attr}]/data[@{data_attr}]` under `root`.
fn find_data<'a>(
    root: Node<'a, '_>,
    test_attr: (&str, &str),
    data_attr: (&str, &str),
) -> Option<&'a str> {
    root.children()
        .filter(|n| n.has_tag_name("test") && n.attribute(test_attr.0) == Some(test_attr.1))
        .flat_map(|test| test.children())
        .find(|n| n.has_tag_name("data") && n.attribute(data_attr.0) == Some(data_attr.1))
        .and_then(|n| n.text())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SESSION: &str = r#"<session>
  <test name="frequencies">
    <data name="12ths">250 500 1000 2000 4000</data>
    <data name="audiometric">250 500 1000 2000 4000 8000</data>
  </test>
  <test side="left">
    <data internal="map_rearspl1">55 56 57 58 59</data>
    <data internal="map_rearspl2">65 66 67 68 69</data>
    <data internal="map_rear_targetspl2">64 65 66 67 68 _</data>
    <data internal="map_rear_sii2">0.61</data>
  </test>
  <test side="right">
    <data internal="map_rearspl1">54 55 56 57 58</data>
    <data internal="map_rearspl2">64 65 66 67 68</data>
    <data internal="map_rear_targetspl2">63 64 65 66 67 _</data>
  </test>
</session>"#;

    fn options(freqs: &[u32]) -> VerifitOptions {
        VerifitOptions {
            test_type: TestType::OnEar,
            num_curves: 2,
            freqs: freqs.to_vec(),
        }
    }

    fn id() -> RecordId {
        RecordId::new("/data/S01_BestFit.xml")
    }

    #[test]
    fn test_parse_session_measured_and_targets() {
        let record = parse_session(&id(), SESSION, &options(&[500, 2000, 8000])).unwrap();

        assert_eq!(record.meta.subject, "S01");
        assert_eq!(record.meta.session, "BestFit");
        assert_eq!(
            record.measured.value_columns,
            vec!["spl_L1", "spl_R1", "spl_L2", "spl_R2"]
        );
        // 8000 is not on the 12ths axis of this file
        assert_eq!(record.measured.len(), 2);
        assert_eq!(record.measured.rows[1].values[2], Some(68.0));

        assert_eq!(record.targets.value_columns, vec!["target_L2", "target_R2"]);
        assert_eq!(record.targets.len(), 3);
        assert_eq!(record.targets.rows[2].ids, vec!["8000".to_string()]);
        assert_eq!(record.targets.rows[2].values, vec![None, None]);
    }

    #[test]
    fn test_sii_reads_each_side() {
        let record = parse_session(&id(), SESSION, &options(&[500])).unwrap();
        let left2 = record
            .sii
            .iter()
            .find(|s| s.side == Side::Left && s.level == 2)
            .unwrap();
        assert_eq!(left2.value, Some(0.61));
        let right2 = record
            .sii
            .iter()
            .find(|s| s.side == Side::Right && s.level == 2)
            .unwrap();
        assert_eq!(right2.value, None);
    }

    #[test]
    fn test_sii_placeholder_keeps_record() {
        let xml = SESSION.replace(
            "<data internal=\"map_rear_sii2\">0.61</data>",
            concat!(
                "<data internal=\"map_rear_sii1\">_</data>\n",
                "    <data internal=\"map_rear_sii2\"> </data>",
            ),
        );
        let record = parse_session(&id(), &xml, &options(&[500])).unwrap();

        assert!(record.sii.iter().all(|s| s.value.is_none()));
        assert_eq!(record.measured.len(), 1);
        assert_eq!(record.targets.len(), 1);
    }

    #[test]
    fn test_missing_frequency_axis_is_structural() {
        let xml = "<session><test side=\"left\"/></session>";
        let err = parse_session(&id(), xml, &options(&[500])).unwrap_err();
        assert!(err.is_structural());
    }

    #[test]
    fn test_invalid_xml_is_not_structural() {
        let err = parse_session(&id(), "<session>", &options(&[500])).unwrap_err();
        assert!(matches!(err, ExtractError::Xml { .. }));
        assert!(!err.is_structural());
    }

    #[test]
    fn test_curve_length_mismatch_is_malformed() {
        let xml = SESSION.replace("55 56 57 58 59", "55 56");
        let err = parse_session(&id(), &xml, &options(&[500])).unwrap_err();
        assert!(matches!(err, ExtractError::Malformed { .. }));
    }

    #[test]
    fn test_test_box_prefix_finds_nothing_in_on_ear_file() {
        let mut opts = options(&[500]);
        opts.test_type = TestType::TestBox;
        let record = parse_session(&id(), SESSION, &opts).unwrap();
        assert!(record.measured.value_columns.is_empty());
    }

    #[test]
    fn test_observations_from_record() {
        let record = parse_session(&id(), SESSION, &options(&[500, 1000])).unwrap();
        let measured = record.measured_observations().unwrap();
        assert_eq!(measured.len(), 8);
        assert!(measured.iter().all(|o| o.unit == "spl"));

        let targets = record.target_observations().unwrap();
        assert_eq!(targets.len(), 4);
        assert!(targets.iter().all(|o| o.unit == "target" && o.level == Some(2)));
    }
}
