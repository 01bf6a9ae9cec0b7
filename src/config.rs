//! Study parameters, loaded from an optional TOML file.

use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

use crate::error::ConfigError;

/// Verifit session type, which selects the `internal` attribute prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum TestType {
    /// Real-ear measurement (`map_rear...`).
    OnEar,
    /// Test-box measurement (`map_sar...`).
    TestBox,
}

impl TestType {
    pub fn internal_prefix(self) -> &'static str {
        match self {
            TestType::OnEar => "rear",
            TestType::TestBox => "sar",
        }
    }
}

/// Maximum allowed |measured − target| for a list of frequencies.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CriterionRule {
    pub freqs: Vec<u32>,
    pub ceiling: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StudyConfig {
    /// Frequencies sampled from measured curves and eSTAT targets.
    pub freqs: Vec<u32>,
    pub test_type: TestType,
    pub num_curves: u8,
    /// Level whose measured curve is compared with eSTAT targets (65 dB SPL input).
    pub estat_level: u8,
    pub criteria: Vec<CriterionRule>,
    pub medrx_freqs: Vec<u32>,
    /// Session used as the reference for fine-tuning differences.
    pub reference_session: String,
    /// Largest |booth − in-situ| threshold difference that counts as a match.
    pub insitu_ceiling: f64,
    /// Inclusive booth threshold range kept when cleaning in-situ pairs.
    pub booth_limits: (f64, f64),
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            freqs: vec![200, 500, 1000, 1500, 2000, 3000, 4000, 6000, 8000],
            test_type: TestType::OnEar,
            num_curves: 3,
            estat_level: 2,
            criteria: vec![
                CriterionRule {
                    freqs: vec![500, 1000, 2000],
                    ceiling: 5.0,
                },
                CriterionRule {
                    freqs: vec![3000, 4000],
                    ceiling: 8.0,
                },
            ],
            medrx_freqs: vec![200, 500, 800, 1400, 2000, 3000, 3900, 6300, 8100],
            reference_session: "EndStudy".to_string(),
            insitu_ceiling: 10.0,
            booth_limits: (15.0, 35.0),
        }
    }
}

impl StudyConfig {
    /// Reads `path` when given, otherwise returns the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                info!(path = %path.display(), "Loading study config");
                let text = std::fs::read_to_string(path)?;
                toml::from_str::<StudyConfig>(&text)?
            }
            None => {
                debug!("No study config given, using defaults");
                StudyConfig::default()
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.freqs.is_empty() {
            return Err(ConfigError::Invalid("freqs must not be empty".into()));
        }
        if self.num_curves == 0 {
            return Err(ConfigError::Invalid("num_curves must be at least 1".into()));
        }
        if self.estat_level == 0 || self.estat_level > self.num_curves {
            return Err(ConfigError::Invalid(format!(
                "estat_level {} is outside 1..={}",
                self.estat_level, self.num_curves
            )));
        }
        if let Some(rule) = self.criteria.iter().find(|r| r.ceiling < 0.0) {
            return Err(ConfigError::Invalid(format!(
                "criterion ceiling {} is negative",
                rule.ceiling
            )));
        }
        if self.insitu_ceiling < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "insitu_ceiling {} is negative",
                self.insitu_ceiling
            )));
        }
        let (low, high) = self.booth_limits;
        if low > high {
            return Err(ConfigError::Invalid(format!(
                "booth_limits ({low}, {high}) are reversed"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = StudyConfig::load(None).unwrap();
        assert_eq!(config.num_curves, 3);
        assert_eq!(config.criteria.len(), 2);
        assert_eq!(config.test_type.internal_prefix(), "rear");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "test_type = \"test-box\"\nnum_curves = 2").unwrap();

        let config = StudyConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.test_type, TestType::TestBox);
        assert_eq!(config.num_curves, 2);
        assert_eq!(config.freqs, StudyConfig::default().freqs);
    }

    #[test]
    fn test_reversed_booth_limits_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "booth_limits = [35.0, 15.0]").unwrap();

        assert!(matches!(
            StudyConfig::load(Some(file.path())),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_level_above_curves_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "num_curves = 1\nestat_level = 2").unwrap();

        let result = StudyConfig::load(Some(file.path()));
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
