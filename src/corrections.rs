//! Hand-maintained owner corrections: literal override rules from the config
//! file and the review sheets a person fills in after reconciliation.

use std::{collections::HashSet, path::Path};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::normalize::{clean_own_id, name_key};
use crate::owner_map::HistoricalPair;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum NameMatch {
    Exact(String),
    Contains(String),
}

impl NameMatch {
    fn matches(&self, key: &str) -> bool {
        match self {
            NameMatch::Exact(name) => name_key(Some(name)) == key,
            NameMatch::Contains(part) => {
                let part = name_key(Some(part));
                !part.is_empty() && key.contains(&part)
            }
        }
    }
}

/// Forces an owner id for taxpayer names known to be mis-entered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorrectionRule {
    pub taxpayer: NameMatch,
    pub own_id: String,
}

/// Merges spelling variants of one owner id into a canonical id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OwnIdAlias {
    pub variants: Vec<String>,
    pub canonical: String,
}

#[derive(Debug, Clone, Default)]
pub struct Corrections {
    rules: Vec<CorrectionRule>,
    aliases: Vec<OwnIdAlias>,
}

impl Corrections {
    pub fn new(rules: Vec<CorrectionRule>, aliases: Vec<OwnIdAlias>) -> Self {
        Self { rules, aliases }
    }

    /// Rewrites an already cleaned owner id. Taxpayer rules take precedence
    /// over id aliases; the first matching rule of each kind applies.
    pub fn apply(&self, taxpayer: Option<&str>, own_id: String) -> String {
        let key = name_key(taxpayer);
        if let Some(rule) = self.rules.iter().find(|r| r.taxpayer.matches(&key)) {
            return clean_own_id(&rule.own_id);
        }
        for alias in &self.aliases {
            if alias.variants.iter().any(|v| clean_own_id(v) == own_id) {
                return clean_own_id(&alias.canonical);
            }
        }
        own_id
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty() && self.aliases.is_empty()
    }
}

/// One line of a manual review sheet. Reviewers fill `own_id1` and, when a
/// taxpayer name covers two owners, `own_id2`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReviewSheetRow {
    pub taxpayer_1: String,
    pub n: usize,
    pub own_id1: Option<String>,
    pub own_id2: Option<String>,
}

/// Reads a filled-in review sheet into pairs: every `own_id1` entry in row
/// order, then every `own_id2` entry. Columns are taken by position since
/// reviewers rename headers.
pub fn read_review_sheet<P: AsRef<Path>>(path: P) -> Result<Vec<HistoricalPair>> {
    let path = path.as_ref();
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let mut rows = Vec::new();
    for (line, result) in rdr.records().enumerate() {
        match result {
            Ok(record) => rows.push(record),
            Err(e) => {
                warn!(file = %path.display(), line = line + 2, error = %e, "skipping unreadable review row");
            }
        }
    }

    let field = |record: &csv::StringRecord, col: usize| {
        record
            .get(col)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_owned)
    };

    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut pairs = Vec::new();
    for col in [2, 3] {
        for record in &rows {
            let (Some(taxpayer), Some(own_id)) = (field(record, 0), field(record, col)) else {
                continue;
            };
            if seen.insert((taxpayer.clone(), own_id.clone())) {
                pairs.push(HistoricalPair::new(&taxpayer, &own_id));
            }
        }
    }
    Ok(pairs)
}

pub fn write_review_sheet<P: AsRef<Path>>(path: P, rows: &[ReviewSheetRow]) -> Result<()> {
    if let Some(parent) = path.as_ref().parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}
