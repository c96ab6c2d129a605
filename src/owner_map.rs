//! Name -> owner identifier map built from prior years' resolved records and
//! manual correction sheets.

use std::{collections::HashMap, path::Path};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::corrections::Corrections;
use crate::error::Result;
use crate::exclusion::ExclusionRules;
use crate::normalize::{clean_own_id, name_key};
use crate::records::canonical_headers;

const PLACEHOLDER_MARKERS: [&str; 2] = ["UNID", "UNK_"];

/// True for owner ids meaning "not identified yet" (`UNK_0042`, `Unidentified`).
pub fn is_placeholder(own_id: &str) -> bool {
    let upper = own_id.to_uppercase();
    PLACEHOLDER_MARKERS.iter().any(|m| upper.contains(m))
}

/// A resolved (or unresolved) owner id as it appeared in some historical table.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HistoricalPair {
    #[serde(default)]
    pub taxpayer1: Option<String>,
    #[serde(default)]
    pub taxpayer2: Option<String>,
    #[serde(default)]
    pub own_id: Option<String>,
}

impl HistoricalPair {
    pub fn new(taxpayer1: &str, own_id: &str) -> Self {
        Self {
            taxpayer1: Some(taxpayer1.to_owned()),
            taxpayer2: None,
            own_id: Some(own_id.to_owned()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapEntry {
    pub own_id: String,
    pub taxpayer1: String,
    pub taxpayer2: Option<String>,
}

/// Lookup from a taxpayer name key to its canonical owner id.
#[derive(Debug, Clone, Default)]
pub struct OwnerIdentityMap {
    entries: HashMap<String, MapEntry>,
    order: Vec<String>,
}

impl OwnerIdentityMap {
    /// Looks up a raw taxpayer name.
    pub fn get(&self, taxpayer: Option<&str>) -> Option<&str> {
        self.entry(taxpayer).map(|e| e.own_id.as_str())
    }

    pub fn entry(&self, taxpayer: Option<&str>) -> Option<&MapEntry> {
        let key = name_key(taxpayer);
        if key.is_empty() {
            return None;
        }
        self.entries.get(&key)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MapEntry)> {
        self.order
            .iter()
            .filter_map(move |k| self.entries.get(k).map(|e| (k.as_str(), e)))
    }

    fn insert_first(&mut self, key: String, entry: MapEntry) -> bool {
        if self.entries.contains_key(&key) {
            return false;
        }
        self.order.push(key.clone());
        self.entries.insert(key, entry);
        true
    }

    fn retain<F: FnMut(&MapEntry) -> bool>(&mut self, mut keep: F) -> usize {
        let before = self.order.len();
        let entries = &mut self.entries;
        self.order.retain(|k| match entries.get(k) {
            Some(e) if keep(e) => true,
            _ => {
                entries.remove(k);
                false
            }
        });
        before - self.order.len()
    }

    /// Persists the map as `taxpayer1,taxpayer2,own_id`.
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(path)?;
        for (_, entry) in self.iter() {
            writer.serialize(HistoricalPair {
                taxpayer1: Some(entry.taxpayer1.clone()),
                taxpayer2: entry.taxpayer2.clone(),
                own_id: Some(entry.own_id.clone()),
            })?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Reloads a map written by [`OwnerIdentityMap::write_csv`] (or any table
    /// with `taxpayer1`/`own_id` columns). No exclusions or corrections apply.
    pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let pairs = read_pairs(path)?;
        let exclusions = ExclusionRules::empty();
        let corrections = Corrections::default();
        let mut builder = OwnerMapBuilder::new(&exclusions, &corrections);
        builder.extend(pairs);
        Ok(builder.build())
    }
}

/// Reads `(taxpayer1, taxpayer2, own_id)` rows from any CSV carrying those
/// columns under one of their known header spellings. Headers go through the
/// same canonical mapping as year tables; malformed rows are logged and skipped.
pub fn read_pairs<P: AsRef<Path>>(path: P) -> Result<Vec<HistoricalPair>> {
    let path = path.as_ref();
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers = canonical_headers(rdr.headers()?);
    if !headers.iter().any(|h| h == "taxpayer1") {
        warn!(file = %path.display(), "no taxpayer name column, no pairs read");
    }

    let mut pairs = Vec::new();
    for result in rdr.records() {
        let raw = result?;
        let pair: std::result::Result<HistoricalPair, _> = raw.deserialize(Some(&headers));
        match pair {
            Ok(pair) => pairs.push(pair),
            Err(e) => warn!(file = %path.display(), error = %e, "skipping malformed row"),
        }
    }
    Ok(pairs)
}

/// Accumulates pairs in priority order; the first usable mapping for a name wins.
pub struct OwnerMapBuilder<'a> {
    exclusions: &'a ExclusionRules,
    corrections: &'a Corrections,
    map: OwnerIdentityMap,
    skipped_missing: usize,
    skipped_placeholder: usize,
    skipped_duplicate: usize,
}

impl<'a> OwnerMapBuilder<'a> {
    pub fn new(exclusions: &'a ExclusionRules, corrections: &'a Corrections) -> Self {
        Self {
            exclusions,
            corrections,
            map: OwnerIdentityMap::default(),
            skipped_missing: 0,
            skipped_placeholder: 0,
            skipped_duplicate: 0,
        }
    }

    pub fn push(&mut self, pair: HistoricalPair) {
        let own_id = match pair.own_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id,
            _ => {
                self.skipped_missing += 1;
                return;
            }
        };
        if is_placeholder(own_id) {
            self.skipped_placeholder += 1;
            return;
        }
        let key = name_key(pair.taxpayer1.as_deref());
        if key.is_empty() {
            self.skipped_missing += 1;
            return;
        }

        let own_id = self
            .corrections
            .apply(pair.taxpayer1.as_deref(), clean_own_id(own_id));

        let entry = MapEntry {
            own_id,
            taxpayer1: pair.taxpayer1.clone().unwrap_or_default(),
            taxpayer2: pair.taxpayer2.clone().filter(|t| !t.trim().is_empty()),
        };
        if !self.map.insert_first(key, entry) {
            self.skipped_duplicate += 1;
        }
    }

    pub fn extend<I: IntoIterator<Item = HistoricalPair>>(&mut self, pairs: I) {
        for pair in pairs {
            self.push(pair);
        }
    }

    /// Finishes the map, dropping entries whose owner or source names are excluded.
    pub fn build(mut self) -> OwnerIdentityMap {
        let exclusions = self.exclusions;
        let excluded = self.map.retain(|e| {
            let drop = exclusions.excludes(
                Some(&e.own_id),
                Some(&e.taxpayer1),
                e.taxpayer2.as_deref(),
            );
            if drop {
                debug!(taxpayer = %e.taxpayer1, own_id = %e.own_id, "excluded from owner map");
            }
            !drop
        });
        info!(
            entries = self.map.len(),
            excluded,
            skipped_missing = self.skipped_missing,
            skipped_placeholder = self.skipped_placeholder,
            skipped_duplicate = self.skipped_duplicate,
            "built owner identity map"
        );
        self.map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corrections::{CorrectionRule, NameMatch, OwnIdAlias};

    fn build(pairs: Vec<HistoricalPair>) -> OwnerIdentityMap {
        let exclusions = ExclusionRules::default();
        let corrections = Corrections::default();
        let mut builder = OwnerMapBuilder::new(&exclusions, &corrections);
        builder.extend(pairs);
        builder.build()
    }

    #[test]
    fn first_writer_wins() {
        let map = build(vec![
            HistoricalPair::new("ACME LLC", "OWN1"),
            HistoricalPair::new("ACME LLC", "OWN2"),
        ]);
        assert_eq!(map.get(Some("ACME LLC")), Some("OWN1"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn first_writer_wins_across_spelling() {
        let map = build(vec![
            HistoricalPair::new("Acme, L.L.C.", "OWN1"),
            HistoricalPair::new("ACME LLC", "OWN2"),
        ]);
        assert_eq!(map.get(Some("acme llc")), Some("OWN1"));
    }

    #[test]
    fn placeholders_and_blanks_are_skipped() {
        let map = build(vec![
            HistoricalPair::new("ACME LLC", "UNK_001"),
            HistoricalPair::new("BETA LLC", "unidentified"),
            HistoricalPair::new("GAMMA LLC", "  "),
            HistoricalPair {
                taxpayer1: Some("DELTA LLC".into()),
                taxpayer2: None,
                own_id: None,
            },
        ]);
        assert!(map.is_empty());
    }

    #[test]
    fn placeholder_does_not_block_later_real_id() {
        let map = build(vec![
            HistoricalPair::new("ACME LLC", "UNK_001"),
            HistoricalPair::new("ACME LLC", "ACME"),
        ]);
        assert_eq!(map.get(Some("ACME LLC")), Some("ACME"));
    }

    #[test]
    fn owner_ids_are_cleaned() {
        let map = build(vec![HistoricalPair::new("ACME LLC", "  acme   holdings ")]);
        assert_eq!(map.get(Some("ACME LLC")), Some("ACME HOLDINGS"));
    }

    #[test]
    fn excluded_entries_are_dropped() {
        let map = build(vec![
            HistoricalPair::new("DETROIT LAND BANK AUTHORITY", "DLBA"),
            HistoricalPair::new("HUD", "FEDERAL"),
            HistoricalPair::new("SOME LLC", "CITY OF DETROIT"),
            HistoricalPair {
                taxpayer1: Some("JANE DOE".into()),
                taxpayer2: Some("C/O WAYNE COUNTY".into()),
                own_id: Some("DOE".into()),
            },
            HistoricalPair::new("ACME LLC", "ACME"),
        ]);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(Some("ACME LLC")), Some("ACME"));
    }

    #[test]
    fn corrections_apply_before_insert() {
        let exclusions = ExclusionRules::default();
        let corrections = Corrections::new(
            vec![CorrectionRule {
                taxpayer: NameMatch::Contains("MAIN HOLD".into()),
                own_id: "MAIN_HOLD".into(),
            }],
            vec![OwnIdAlias {
                variants: vec!["JON SMYTHE".into(), "JOHN SMYTHE".into()],
                canonical: "SMYTHE_J".into(),
            }],
        );
        let mut builder = OwnerMapBuilder::new(&exclusions, &corrections);
        builder.extend(vec![
            HistoricalPair::new("123 MAIN HOLDINGS LLC", "TYPO ID"),
            HistoricalPair::new("JON SMYTHE", "jon smythe"),
            HistoricalPair::new("JOHN SMYTHE", "JOHN SMYTHE"),
        ]);
        let map = builder.build();
        assert_eq!(map.get(Some("123 MAIN HOLDINGS LLC")), Some("MAIN_HOLD"));
        assert_eq!(map.get(Some("JON SMYTHE")), Some("SMYTHE_J"));
        assert_eq!(map.get(Some("JOHN SMYTHE")), Some("SMYTHE_J"));
    }

    #[test]
    fn csv_round_trip_keeps_order_and_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("own-id-map.csv");
        let map = build(vec![
            HistoricalPair::new("ZETA LLC", "ZETA"),
            HistoricalPair {
                taxpayer1: Some("ALPHA LLC".into()),
                taxpayer2: Some("ALPHA MGMT".into()),
                own_id: Some("ALPHA".into()),
            },
        ]);
        map.write_csv(&path).unwrap();

        let reloaded = OwnerIdentityMap::read_csv(&path).unwrap();
        let keys: Vec<&str> = reloaded.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["ZETA LLC", "ALPHA LLC"]);
        assert_eq!(
            reloaded.entry(Some("alpha llc")).and_then(|e| e.taxpayer2.as_deref()),
            Some("ALPHA MGMT")
        );
    }

    #[test]
    fn reads_year_tables_with_other_headers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("PPlusFinal_2016_edit.csv");
        std::fs::write(
            &path,
            "parcelno,taxpayer_1,taxpayer_2,own_id\n01001.,ACME LLC,,ACME\n01002.,BETA LLC,C/O X,\n",
        )
        .unwrap();
        let pairs = read_pairs(&path).unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].taxpayer1.as_deref(), Some("ACME LLC"));
        assert_eq!(pairs[0].taxpayer2, None);
        assert_eq!(pairs[1].own_id, None);
    }

    #[test]
    fn reads_owner_column_spelling() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("PPlusFinal_2017_edit.csv");
        std::fs::write(&path, "parcelno,owner1,owner2,own_id\n01001.,ACME LLC,ACME MGMT,ACME\n").unwrap();
        let pairs = read_pairs(&path).unwrap();
        assert_eq!(
            pairs,
            vec![HistoricalPair {
                taxpayer1: Some("ACME LLC".into()),
                taxpayer2: Some("ACME MGMT".into()),
                own_id: Some("ACME".into()),
            }]
        );
    }

    #[test]
    fn both_taxpayer_spellings_keep_the_canonical_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("PPlusFinal_2018_edit.csv");
        std::fs::write(&path, "taxpayer,taxpayer1,own_id\nOLD NAME,ACME LLC,ACME\n").unwrap();
        let pairs = read_pairs(&path).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].taxpayer1.as_deref(), Some("ACME LLC"));
        assert_eq!(pairs[0].own_id.as_deref(), Some("ACME"));
    }
}
