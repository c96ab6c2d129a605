//! Year-over-year change detection. Parcels whose taxpayer changed and whose
//! tax bill goes somewhere other than the parcel itself are surfaced for a
//! person to assign owner ids, most common new taxpayer first.

use std::collections::HashMap;

use chrono::NaiveDate;
use itertools::Itertools;
use serde::Serialize;
use tracing::info;

use crate::corrections::ReviewSheetRow;
use crate::exclusion::ExclusionRules;
use crate::normalize::{address_key, clean_date, clean_owner, name_key};
use crate::records::TaxpayerRecord;
use crate::resolver::{Resolution, Resolver};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChangeCandidate {
    #[serde(rename = "parcelno")]
    pub parcel_num: String,
    pub prior_taxpayer1: Option<String>,
    pub taxpayer1: Option<String>,
    pub taxpayer2: Option<String>,
    #[serde(rename = "propaddr")]
    pub address: Option<String>,
    #[serde(rename = "tpaddr")]
    pub taxpayer_address: Option<String>,
    #[serde(rename = "tpcity")]
    pub taxpayer_city: Option<String>,
    pub prior_sale_date: Option<NaiveDate>,
    pub sale_date: Option<NaiveDate>,
    pub prior_own_id: Option<String>,
    pub own_id: Option<String>,
    pub resolved_by: &'static str,
    pub flagged: bool,
    /// How many flagged parcels share this taxpayer name. Set by [`rank_for_review`].
    pub name_count: usize,
}

impl ChangeCandidate {
    fn name_key(&self) -> String {
        name_key(self.taxpayer1.as_deref())
    }
}

fn resolution_kind(resolution: &Resolution) -> &'static str {
    match resolution {
        Resolution::Existing(_) => "existing",
        Resolution::Primary(_) => "primary",
        Resolution::Secondary(_) => "secondary",
        Resolution::Unresolved => "unresolved",
    }
}

/// Compares each current record with the prior year's record for the same
/// parcel. A parcel missing from the prior year counts as a name change.
pub fn detect_changes(
    current: &[TaxpayerRecord],
    prior: &[TaxpayerRecord],
    resolver: &Resolver,
    exclusions: &ExclusionRules,
) -> Vec<ChangeCandidate> {
    let mut prior_by_parcel: HashMap<&str, &TaxpayerRecord> = HashMap::new();
    for record in prior {
        prior_by_parcel
            .entry(record.parcel_num.as_str())
            .or_insert(record);
    }

    let candidates: Vec<ChangeCandidate> = current
        .iter()
        .map(|record| {
            let before = prior_by_parcel.get(record.parcel_num.as_str()).copied();
            let resolution = resolver.resolve(record);

            let name_changed = before
                .map(|p| name_key(p.taxpayer1.as_deref()) != name_key(record.taxpayer1.as_deref()))
                .unwrap_or(true);
            let excluded = exclusions.matches_pattern(resolution.own_id())
                || exclusions.matches_pattern(record.taxpayer1.as_deref())
                || exclusions.is_excluded_literal(record.taxpayer1.as_deref());
            let mailed_elsewhere = address_key(record.taxpayer_address.as_deref())
                != address_key(record.address.as_deref());

            ChangeCandidate {
                parcel_num: record.parcel_num.clone(),
                prior_taxpayer1: before.and_then(|p| p.taxpayer1.clone()),
                taxpayer1: record.taxpayer1.clone(),
                taxpayer2: record.taxpayer2.clone(),
                address: record.address.clone(),
                taxpayer_address: record.taxpayer_address.clone(),
                taxpayer_city: record.taxpayer_city.clone(),
                prior_sale_date: before.and_then(|p| clean_date(p.sale_date.as_deref())),
                sale_date: clean_date(record.sale_date.as_deref()),
                prior_own_id: before.and_then(|p| p.own_id.clone()),
                own_id: resolution.own_id().map(String::from),
                resolved_by: resolution_kind(&resolution),
                flagged: name_changed && !excluded && mailed_elsewhere,
                name_count: 0,
            }
        })
        .collect();

    info!(
        records = candidates.len(),
        flagged = candidates.iter().filter(|c| c.flagged).count(),
        "detected ownership changes"
    );
    candidates
}

/// Keeps flagged candidates, most frequent new taxpayer name first, ties by name.
pub fn rank_for_review(candidates: Vec<ChangeCandidate>) -> Vec<ChangeCandidate> {
    let mut flagged: Vec<ChangeCandidate> = candidates.into_iter().filter(|c| c.flagged).collect();
    let counts = flagged.iter().map(|c| c.name_key()).counts();
    for candidate in flagged.iter_mut() {
        candidate.name_count = counts.get(&candidate.name_key()).copied().unwrap_or(0);
    }
    flagged.sort_by_cached_key(|c| (std::cmp::Reverse(c.name_count), c.name_key()));
    flagged
}

/// Collapses ranked candidates to one review line per taxpayer name, keeping
/// rank order. Ids already known are pre-filled so the reviewer can confirm them.
pub fn review_rows(ranked: &[ChangeCandidate]) -> Vec<ReviewSheetRow> {
    ranked
        .iter()
        .chunk_by(|c| c.name_key())
        .into_iter()
        .map(|(_, group)| {
            let group: Vec<&ChangeCandidate> = group.collect();
            let first = group[0];
            ReviewSheetRow {
                taxpayer_1: clean_owner(first.taxpayer1.as_deref()),
                n: group.len(),
                own_id1: group.iter().find_map(|c| c.own_id.clone()),
                own_id2: None,
            }
        })
        .collect()
}
