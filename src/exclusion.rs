use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Government, institutional and placeholder owners left out of the
/// concentration dataset. Parcels they hold still exist as parcel records.
pub const DEFAULT_EXCLUDED_LITERALS: [&str; 1] = ["HUD"];

pub const DEFAULT_EXCLUDED_PATTERNS: [&str; 28] = [
    "LAND BANK",
    "CITY OF DETROIT",
    "DETROIT PARKS",
    "BRIDGE AUTHORITY",
    "MDOT",
    "DEPARTMENT OF",
    "DEPT OF",
    "UNK_",
    "UNIDENTIFIED",
    "UNKNOWN",
    "TRUST",
    "HENRY FORD",
    "UAT",
    "UAW",
    "DTE",
    "FCA",
    "WAYNE COUNTY",
    "NON-PROFIT",
    "TAXPAYER",
    "RECOVERYPARK",
    "RECOVERY PARK",
    "VHS HARPER",
    "HARPER-HUTZEL",
    "POPE FRANCIS",
    "DETROIT MERCY",
    "CATHEDRAL",
    "PARISH",
    "PERFECTING CHURCH",
];

/// Exclusion rules as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExclusionConfig {
    pub literals: Vec<String>,
    pub patterns: Vec<String>,
}

impl Default for ExclusionConfig {
    fn default() -> Self {
        Self {
            literals: DEFAULT_EXCLUDED_LITERALS.iter().map(|s| s.to_string()).collect(),
            patterns: DEFAULT_EXCLUDED_PATTERNS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Compiled exclusion rules. Literals compare against the whole trimmed name;
/// patterns are case-insensitive regexes searched anywhere in the text.
#[derive(Debug, Clone)]
pub struct ExclusionRules {
    literals: Vec<String>,
    patterns: Vec<Regex>,
}

impl ExclusionRules {
    pub fn from_config(config: &ExclusionConfig) -> Result<Self> {
        let literals = config
            .literals
            .iter()
            .map(|l| l.trim().to_uppercase())
            .filter(|l| !l.is_empty())
            .collect();
        let patterns = config
            .patterns
            .iter()
            .map(|p| RegexBuilder::new(p).case_insensitive(true).build())
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { literals, patterns })
    }

    /// Rules that exclude nothing.
    pub fn empty() -> Self {
        Self {
            literals: Vec::new(),
            patterns: Vec::new(),
        }
    }

    /// The first pattern found in `text`, for reporting which rule fired.
    pub fn matching_pattern(&self, text: Option<&str>) -> Option<&str> {
        let text = text?;
        self.patterns
            .iter()
            .find(|re| re.is_match(text))
            .map(|re| re.as_str())
    }

    pub fn matches_pattern(&self, text: Option<&str>) -> bool {
        self.matching_pattern(text).is_some()
    }

    pub fn is_excluded_literal(&self, name: Option<&str>) -> bool {
        match name {
            Some(name) => {
                let name = name.trim().to_uppercase();
                self.literals.iter().any(|l| *l == name)
            }
            None => false,
        }
    }

    /// Whole-record rule: the owner id or either taxpayer name hits a
    /// pattern, or the primary taxpayer is an excluded literal.
    pub fn excludes(
        &self,
        own_id: Option<&str>,
        taxpayer1: Option<&str>,
        taxpayer2: Option<&str>,
    ) -> bool {
        self.matches_pattern(own_id)
            || self.matches_pattern(taxpayer1)
            || self.matches_pattern(taxpayer2)
            || self.is_excluded_literal(taxpayer1)
    }

    pub fn literals(&self) -> &[String] {
        &self.literals
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }
}

impl Default for ExclusionRules {
    fn default() -> Self {
        // The built-in patterns are plain literals and always compile.
        Self::from_config(&ExclusionConfig::default()).unwrap_or_else(|_| Self::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_institutional_owners() {
        let rules = ExclusionRules::default();
        assert_eq!(rules.pattern_count(), DEFAULT_EXCLUDED_PATTERNS.len());
        assert!(rules.matches_pattern(Some("DETROIT LAND BANK AUTHORITY")));
        assert!(rules.matches_pattern(Some("Wayne County Treasurer")));
        assert!(rules.matches_pattern(Some("UNK_0042")));
        assert!(rules.matches_pattern(Some("HARPER-HUTZEL HOSPITAL")));
        assert!(!rules.matches_pattern(Some("ACME HOLDINGS LLC")));
        assert!(!rules.matches_pattern(None));
    }

    #[test]
    fn reports_which_pattern_fired() {
        let rules = ExclusionRules::default();
        assert_eq!(
            rules.matching_pattern(Some("CITY OF DETROIT-P&DD")),
            Some("CITY OF DETROIT")
        );
    }

    #[test]
    fn literals_match_whole_name_only() {
        let rules = ExclusionRules::default();
        assert!(rules.is_excluded_literal(Some("HUD")));
        assert!(rules.is_excluded_literal(Some(" hud ")));
        assert!(!rules.is_excluded_literal(Some("HUDSON PROPERTIES")));
        assert!(!rules.is_excluded_literal(None));
    }

    #[test]
    fn record_rule_checks_every_field() {
        let rules = ExclusionRules::default();
        assert!(rules.excludes(Some("DETROIT LAND BANK"), Some("ACME"), None));
        assert!(rules.excludes(Some("ACME"), Some("ACME"), Some("C/O DTE ENERGY")));
        assert!(rules.excludes(None, Some("HUD"), None));
        assert!(!rules.excludes(Some("ACME"), Some("ACME LLC"), Some("JANE DOE")));
    }

    #[test]
    fn config_rules_replace_defaults() {
        let rules = ExclusionRules::from_config(&ExclusionConfig {
            literals: vec!["state of michigan".into()],
            patterns: vec![r"^CHURCH\b".into()],
        })
        .unwrap();
        assert!(rules.is_excluded_literal(Some("STATE OF MICHIGAN")));
        assert!(rules.matches_pattern(Some("church of god")));
        assert!(!rules.matches_pattern(Some("FIRST CHURCH")));
        assert!(!rules.matches_pattern(Some("DETROIT LAND BANK")));
    }

    #[test]
    fn bad_pattern_is_an_error() {
        let res = ExclusionRules::from_config(&ExclusionConfig {
            literals: vec![],
            patterns: vec!["(".into()],
        });
        assert!(res.is_err());
    }
}
