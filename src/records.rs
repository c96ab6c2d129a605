//! Source table rows. Every year's export names its columns a little
//! differently, so headers are mapped onto one canonical set before rows are
//! deserialized.

use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord, Writer};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::normalize::{fix_parcel_num, house_number};

/// Known header spellings and the canonical column each maps to.
pub const COLUMN_ALIASES: &[(&str, &str)] = &[
    ("parcel_num", "parcelno"),
    ("parcelnum", "parcelno"),
    ("parcelnumber", "parcelno"),
    ("parcel_number", "parcelno"),
    ("pnum", "parcelno"),
    ("taxpayer", "taxpayer1"),
    ("taxpayer_1", "taxpayer1"),
    ("taxpayer 1", "taxpayer1"),
    ("owner1", "taxpayer1"),
    ("taxpayer_2", "taxpayer2"),
    ("taxpayer 2", "taxpayer2"),
    ("owner2", "taxpayer2"),
    ("address", "propaddr"),
    ("addr", "propaddr"),
    ("taxpayerstreet", "tpaddr"),
    ("taxpayer_s", "tpaddr"),
    ("taxpaddr", "tpaddr"),
    ("owner_street", "tpaddr"),
    ("taxpayer_address", "tpaddr"),
    ("taxpayercity", "tpcity"),
    ("taxpayer_c", "tpcity"),
    ("taxpcity", "tpcity"),
    ("owner_city", "tpcity"),
    ("taxpayer_city", "tpcity"),
    ("taxpayerzip", "tpzip"),
    ("taxpayer_z", "tpzip"),
    ("taxpayerstate", "tpstate"),
    ("taxpayer_3", "tpstate"),
    ("sale_date", "saledate"),
    ("sale_price", "saleprice"),
    ("tax_status", "taxstatus"),
    ("totalsquarefootage", "totsqft"),
    ("total_squa", "totsqft"),
    ("total_acre", "totacres"),
    ("yearbuilt", "resyrbuilt"),
    ("year_built", "resyrbuilt"),
    ("cibyrbuilt", "cityrbuilt"),
    ("zipcode", "propzip"),
    ("zip_code", "propzip"),
    ("OBJECTID", "id"),
];

/// Maps header names onto their canonical spelling. An alias is left alone
/// when its canonical column is already present, so the table never ends up
/// with two columns of the same name.
pub fn canonical_headers(headers: &StringRecord) -> StringRecord {
    let trimmed: Vec<String> = headers.iter().map(|h| h.trim().to_owned()).collect();
    let mut out: Vec<String> = Vec::with_capacity(trimmed.len());
    for header in &trimmed {
        let canonical = COLUMN_ALIASES
            .iter()
            .find(|(alias, _)| alias.eq_ignore_ascii_case(header))
            .map(|(_, canonical)| *canonical);
        match canonical {
            Some(c) if !trimmed.iter().any(|h| h == c) && !out.iter().any(|h| h == c) => {
                out.push(c.to_owned())
            }
            _ => out.push(header.to_lowercase()),
        }
    }
    StringRecord::from(out)
}

/// One parcel's taxpayer row for one year.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaxpayerRecord {
    #[serde(rename = "parcelno", default)]
    pub parcel_num: String,
    #[serde(default)]
    pub taxpayer1: Option<String>,
    #[serde(default)]
    pub taxpayer2: Option<String>,
    #[serde(default)]
    pub own_id: Option<String>,
    #[serde(rename = "propaddr", default)]
    pub address: Option<String>,
    #[serde(rename = "tpaddr", default)]
    pub taxpayer_address: Option<String>,
    #[serde(rename = "tpcity", default)]
    pub taxpayer_city: Option<String>,
    #[serde(rename = "tpstate", default)]
    pub taxpayer_state: Option<String>,
    #[serde(rename = "tpzip", default)]
    pub taxpayer_zip: Option<String>,
    #[serde(rename = "saledate", default)]
    pub sale_date: Option<String>,
    #[serde(rename = "saleprice", default)]
    pub sale_price: Option<String>,
    #[serde(default)]
    pub propno: Option<String>,
    #[serde(default)]
    pub propdir: Option<String>,
    #[serde(default)]
    pub propstr: Option<String>,
    #[serde(default)]
    pub propzip: Option<String>,
    #[serde(default)]
    pub taxstatus: Option<String>,
    #[serde(default)]
    pub totsqft: Option<String>,
    #[serde(default)]
    pub totacres: Option<String>,
    #[serde(default)]
    pub resyrbuilt: Option<String>,
    #[serde(default, skip_deserializing)]
    pub year: Option<u32>,
}

pub fn year_table_path<P: AsRef<Path>>(root: P, year: u32) -> PathBuf {
    root.as_ref()
        .join("praxis_csvs")
        .join(format!("PPlusFinal_{}_edit.csv", year))
}

/// Loads one year's table. Parcel numbers are normalized, the year is
/// stamped on every row, and `propno` is derived from the street when the
/// table lacks it. Rows that fail to deserialize or have no parcel number are
/// logged and skipped.
pub fn read_year_table<P: AsRef<Path>>(path: P, year: u32) -> Result<Vec<TaxpayerRecord>> {
    let path = path.as_ref();
    let mut rdr = ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers = canonical_headers(rdr.headers()?);
    if !headers.iter().any(|h| h == "parcelno") {
        return Err(PipelineError::MissingColumn(format!(
            "parcelno in {}",
            path.display()
        )));
    }
    let has_propno = headers.iter().any(|h| h == "propno");

    let mut records = Vec::new();
    let mut failed = 0;
    for result in rdr.records() {
        let raw = result?;
        let mut record: TaxpayerRecord = match raw.deserialize(Some(&headers)) {
            Ok(record) => record,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "skipping malformed row");
                failed += 1;
                continue;
            }
        };
        if record.parcel_num.trim().is_empty() {
            failed += 1;
            continue;
        }
        record.parcel_num = fix_parcel_num(&record.parcel_num);
        record.year = Some(year);
        if !has_propno {
            record.propno = house_number(record.propstr.as_deref()).map(|n| n.to_string());
        }
        records.push(record);
    }
    debug!(file = %path.display(), rows = records.len(), failed, "read year table");
    Ok(records)
}

pub fn write_records<P: AsRef<Path>, T: Serialize>(path: P, rows: &[T]) -> Result<()> {
    if let Some(parent) = path.as_ref().parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}
