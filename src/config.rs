use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use tracing::debug;

use crate::corrections::{CorrectionRule, Corrections, OwnIdAlias};
use crate::error::{PipelineError, Result};
use crate::exclusion::{ExclusionConfig, ExclusionRules};

pub const DEFAULT_CONFIG_PATH: &str = "owntrack.toml";

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub input_root: PathBuf,
    pub output_root: PathBuf,
    pub database_url: String,
    /// Years to process, in the order their tables are read.
    pub years: Vec<u32>,
    pub min_parcels: usize,
    /// Review sheets read back as manual owner id corrections, relative to
    /// `input_root`.
    pub correction_sheets: Vec<PathBuf>,
    pub exclusions: ExclusionConfig,
    pub corrections: Vec<CorrectionRule>,
    pub own_id_aliases: Vec<OwnIdAlias>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_root: PathBuf::from("input"),
            output_root: PathBuf::from("data"),
            database_url: "data/parcels.sqlite".to_owned(),
            years: (2015..=2024).collect(),
            min_parcels: 10,
            correction_sheets: Vec::new(),
            exclusions: ExclusionConfig::default(),
            corrections: Vec::new(),
            own_id_aliases: Vec::new(),
        }
    }
}

impl Config {
    /// Reads the TOML file at `path`, or `owntrack.toml` when it exists, or
    /// falls back to defaults. `DATABASE_URL` in the environment wins over
    /// the file.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => Self::default(),
        };
        if let Ok(url) = env::var("DATABASE_URL") {
            if !url.trim().is_empty() {
                config.database_url = url;
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: Config = toml::from_str(&content)?;
        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.years.is_empty() {
            return Err(PipelineError::Config("no years configured".to_owned()));
        }
        if self.min_parcels == 0 {
            return Err(PipelineError::Config("min_parcels must be at least 1".to_owned()));
        }
        Ok(())
    }

    pub fn exclusion_rules(&self) -> Result<ExclusionRules> {
        ExclusionRules::from_config(&self.exclusions)
    }

    pub fn corrections(&self) -> Corrections {
        Corrections::new(self.corrections.clone(), self.own_id_aliases.clone())
    }

    pub fn owner_map_path(&self) -> PathBuf {
        self.input_root.join("own-id-map.csv")
    }

    pub fn correction_sheet_paths(&self) -> Vec<PathBuf> {
        self.correction_sheets
            .iter()
            .map(|sheet| self.input_root.join(sheet))
            .collect()
    }

    pub fn parcel_geojson_path(&self, year: u32) -> PathBuf {
        self.input_root
            .join("praxis_geojson")
            .join(format!("praxis{}.geojson", year))
    }

    pub fn zipcodes_path(&self) -> PathBuf {
        self.input_root.join("zipcodes.geojson")
    }

    /// The latest configured year before `year`.
    pub fn prior_year(&self, year: u32) -> Option<u32> {
        self.years.iter().copied().filter(|y| *y < year).max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corrections::NameMatch;

    #[test]
    fn defaults_without_file() {
        let config = Config::default();
        assert_eq!(config.years.first(), Some(&2015));
        assert_eq!(config.years.last(), Some(&2024));
        assert_eq!(config.min_parcels, 10);
        assert_eq!(config.owner_map_path(), PathBuf::from("input/own-id-map.csv"));
        assert!(config.exclusion_rules().unwrap().matches_pattern(Some("CITY OF DETROIT")));
    }

    #[test]
    fn reads_toml_with_partial_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("owntrack.toml");
        fs::write(
            &path,
            r#"
input_root = "raw"
years = [2019, 2020, 2021]
correction_sheets = ["review-2020.csv"]

[exclusions]
literals = ["HUD"]
patterns = ["LAND BANK"]

[[corrections]]
taxpayer = { contains = "ACME" }
own_id = "ACME"

[[own_id_aliases]]
variants = ["ACME HOLDINGS", "ACME INC"]
canonical = "ACME"
"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.input_root, PathBuf::from("raw"));
        assert_eq!(config.output_root, PathBuf::from("data"));
        assert_eq!(config.years, vec![2019, 2020, 2021]);
        assert_eq!(
            config.correction_sheet_paths(),
            vec![PathBuf::from("raw/review-2020.csv")]
        );
        assert_eq!(config.corrections[0].taxpayer, NameMatch::Contains("ACME".into()));
        assert_eq!(config.prior_year(2021), Some(2020));
        assert_eq!(config.prior_year(2019), None);

        let rules = config.exclusion_rules().unwrap();
        assert_eq!(rules.pattern_count(), 1);
        let corrections = config.corrections();
        assert_eq!(corrections.apply(Some("ACME WEST LLC"), "AW".into()), "ACME");
        assert_eq!(corrections.apply(None, "ACME INC".into()), "ACME");
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = Config::from_file(Path::new("/nonexistent/owntrack.toml")).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn empty_years_are_rejected() {
        let config = Config {
            years: Vec::new(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
