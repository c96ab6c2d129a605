//! The multi-year ownership dataset: every year's parcels with a resolved,
//! non-excluded owner holding enough parcels that year to matter for
//! concentration analysis.

use std::collections::HashMap;

use chrono::NaiveDate;
use itertools::Itertools;
use serde::Serialize;
use tracing::info;

use crate::exclusion::ExclusionRules;
use crate::normalize::{clean_date, zip5};
use crate::records::TaxpayerRecord;
use crate::resolver::{has_real_own_id, Resolver};

/// Size bucket for an owner's parcel count in one year. Owners with fewer
/// than ten parcels fall in group 0 and are left out of the dataset.
pub fn own_group(count: usize) -> u8 {
    match count {
        0..=9 => 0,
        10..=20 => 1,
        21..=100 => 2,
        101..=200 => 3,
        201..=500 => 4,
        501..=1000 => 5,
        1001..=1500 => 6,
        _ => 7,
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OwnerParcel {
    pub feature_id: usize,
    #[serde(rename = "parcelno")]
    pub parcel_num: String,
    pub year: u32,
    pub own_id: String,
    pub own_count: usize,
    pub own_group: u8,
    #[serde(rename = "taxpayer")]
    pub taxpayer1: Option<String>,
    pub taxpayer2: Option<String>,
    #[serde(rename = "propaddr")]
    pub address: Option<String>,
    pub propno: Option<String>,
    pub propdir: Option<String>,
    /// Zipcode from the parcel polygon, falling back to `propzip2`.
    pub propzip: Option<String>,
    /// Zipcode as the source table had it.
    pub propzip2: Option<String>,
    #[serde(rename = "saledate")]
    pub sale_date: Option<NaiveDate>,
    #[serde(rename = "saleprice")]
    pub sale_price: Option<String>,
    pub totsqft: Option<String>,
    pub totacres: Option<String>,
    pub resyrbuilt: Option<i32>,
    #[serde(rename = "tpaddr")]
    pub taxpayer_address: Option<String>,
    #[serde(rename = "tpcity")]
    pub taxpayer_city: Option<String>,
    #[serde(rename = "tpstate")]
    pub taxpayer_state: Option<String>,
    #[serde(rename = "tpzip")]
    pub taxpayer_zip: Option<String>,
    pub taxstatus: Option<String>,
}

fn build_year(text: Option<&str>) -> Option<i32> {
    let value = text?.trim().parse::<f64>().ok()?;
    (value.fract() == 0.0 && value > 0.0).then_some(value as i32)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CombineStats {
    pub input: usize,
    pub duplicates: usize,
    pub unresolved: usize,
    pub excluded: usize,
    pub small_owners: usize,
    pub kept: usize,
}

pub struct OwnershipRun<'a> {
    resolver: Resolver<'a>,
    exclusions: &'a ExclusionRules,
    min_parcels: usize,
}

impl<'a> OwnershipRun<'a> {
    pub fn new(resolver: Resolver<'a>, exclusions: &'a ExclusionRules, min_parcels: usize) -> Self {
        Self {
            resolver,
            exclusions,
            min_parcels,
        }
    }

    /// Builds the dataset from every year's rows (each stamped with its year).
    /// The first row for a `(parcel, year)` wins.
    pub fn combine(&self, records: Vec<TaxpayerRecord>) -> (Vec<OwnerParcel>, CombineStats) {
        let mut stats = CombineStats {
            input: records.len(),
            ..Default::default()
        };

        let mut records: Vec<TaxpayerRecord> = records
            .into_iter()
            .unique_by(|r| (r.parcel_num.clone(), r.year))
            .collect();
        stats.duplicates = stats.input - records.len();

        self.resolver.apply(&mut records);
        let before = records.len();
        records.retain(|r| has_real_own_id(r.own_id.as_deref()));
        stats.unresolved = before - records.len();

        let before = records.len();
        records.retain(|r| {
            !self.exclusions.excludes(
                r.own_id.as_deref(),
                r.taxpayer1.as_deref(),
                r.taxpayer2.as_deref(),
            )
        });
        stats.excluded = before - records.len();

        let counts: HashMap<(u32, String), usize> = records
            .iter()
            .map(|r| (r.year.unwrap_or_default(), r.own_id.clone().unwrap_or_default()))
            .counts();

        let min_parcels = self.min_parcels;
        let parcels: Vec<OwnerParcel> = records
            .into_iter()
            .filter_map(|r| {
                let year = r.year.unwrap_or_default();
                let own_id = r.own_id.clone().unwrap_or_default();
                let own_count = counts.get(&(year, own_id.clone())).copied().unwrap_or(0);
                let own_group = own_group(own_count);
                if own_count < min_parcels || own_group == 0 {
                    return None;
                }
                Some(OwnerParcel {
                    feature_id: 0,
                    parcel_num: r.parcel_num,
                    year,
                    own_id,
                    own_count,
                    own_group,
                    taxpayer1: r.taxpayer1,
                    taxpayer2: r.taxpayer2,
                    address: r.address,
                    propno: r.propno,
                    propdir: r.propdir,
                    propzip: None,
                    propzip2: r.propzip,
                    sale_date: clean_date(r.sale_date.as_deref()),
                    sale_price: r.sale_price,
                    totsqft: r.totsqft,
                    totacres: r.totacres,
                    resyrbuilt: build_year(r.resyrbuilt.as_deref()),
                    taxpayer_address: r.taxpayer_address,
                    taxpayer_city: r.taxpayer_city,
                    taxpayer_state: r.taxpayer_state,
                    taxpayer_zip: r.taxpayer_zip,
                    taxstatus: r.taxstatus,
                })
            })
            .sorted_by_key(|p| p.year)
            .enumerate()
            .map(|(i, mut p)| {
                p.feature_id = i;
                p
            })
            .collect();

        stats.small_owners = before - stats.excluded - parcels.len();
        stats.kept = parcels.len();
        info!(
            input = stats.input,
            duplicates = stats.duplicates,
            unresolved = stats.unresolved,
            excluded = stats.excluded,
            small_owners = stats.small_owners,
            kept = stats.kept,
            "combined ownership dataset"
        );
        (parcels, stats)
    }
}

/// Sets `propzip` from the polygon overlap, falling back to the table's own
/// zip trimmed to five digits.
pub fn apply_zipcodes(parcels: &mut [OwnerParcel], by_parcel: &HashMap<String, String>) {
    for parcel in parcels.iter_mut() {
        parcel.propzip = by_parcel
            .get(&parcel.parcel_num)
            .cloned()
            .or_else(|| parcel.propzip2.as_deref().map(zip5).filter(|z| !z.is_empty()));
    }
}

/// Distinct owner/taxpayer-name pairs, numbered in first-seen order.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OwnerTaxpayer {
    pub owntax_id: usize,
    pub own_id: String,
    pub taxpayer: Option<String>,
}

/// Distinct mailing details per owner/taxpayer pair.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TaxpayerDetail {
    pub tp_id: usize,
    pub owntax_id: usize,
    pub taxpayer2: Option<String>,
    pub tpaddr: Option<String>,
    pub tpcity: Option<String>,
    pub tpstate: Option<String>,
    pub tpzip: Option<String>,
    pub taxstatus: Option<String>,
}

pub fn owner_taxpayers(parcels: &[OwnerParcel]) -> Vec<OwnerTaxpayer> {
    parcels
        .iter()
        .map(|p| (p.own_id.clone(), p.taxpayer1.clone()))
        .unique()
        .enumerate()
        .map(|(owntax_id, (own_id, taxpayer))| OwnerTaxpayer {
            owntax_id,
            own_id,
            taxpayer,
        })
        .collect()
}

pub fn taxpayer_details(parcels: &[OwnerParcel], owners: &[OwnerTaxpayer]) -> Vec<TaxpayerDetail> {
    let ids: HashMap<(&str, Option<&str>), usize> = owners
        .iter()
        .map(|o| ((o.own_id.as_str(), o.taxpayer.as_deref()), o.owntax_id))
        .collect();
    parcels
        .iter()
        .filter_map(|p| {
            let owntax_id = *ids.get(&(p.own_id.as_str(), p.taxpayer1.as_deref()))?;
            Some((
                owntax_id,
                p.taxpayer2.clone(),
                p.taxpayer_address.clone(),
                p.taxpayer_city.clone(),
                p.taxpayer_state.clone(),
                p.taxpayer_zip.clone(),
                p.taxstatus.clone(),
            ))
        })
        .unique()
        .enumerate()
        .map(
            |(tp_id, (owntax_id, taxpayer2, tpaddr, tpcity, tpstate, tpzip, taxstatus))| {
                TaxpayerDetail {
                    tp_id,
                    owntax_id,
                    taxpayer2,
                    tpaddr,
                    tpcity,
                    tpstate,
                    tpzip,
                    taxstatus,
                }
            },
        )
        .collect()
}
