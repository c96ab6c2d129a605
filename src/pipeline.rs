//! The four stages the binary exposes. Each reads its inputs from the
//! configured roots, writes its outputs, and returns a short summary.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use geo::MultiPolygon;
use serde::Serialize;
use tracing::{info, info_span, warn};

use crate::config::Config;
use crate::corrections::{read_review_sheet, write_review_sheet};
use crate::error::Result;
use crate::geometry::{
    assign_zipcodes, centroid, read_parcel_shapes, read_zip_shapes, union_by_parcel, write_features,
    Feature, FeatureCollection, GeoJsonGeometry, ZipShape,
};
use crate::owner_map::{read_pairs, OwnerIdentityMap, OwnerMapBuilder};
use crate::ownership::{
    apply_zipcodes, owner_taxpayers, taxpayer_details, CombineStats, OwnerParcel, OwnershipRun,
};
use crate::reconcile::{detect_changes, rank_for_review, review_rows};
use crate::records::{read_year_table, write_records, year_table_path, TaxpayerRecord};
use crate::resolver::{has_real_own_id, ResolveStats, Resolver};
use crate::storage::{ParcelRow, Store};

/// Builds the owner identity map from every configured year up to `through`,
/// oldest first, then the manual correction sheets, and writes it under the
/// input root.
pub fn build_map(config: &Config, through: Option<u32>) -> Result<OwnerIdentityMap> {
    let exclusions = config.exclusion_rules()?;
    let corrections = config.corrections();
    info!(
        patterns = exclusions.pattern_count(),
        literals = exclusions.literals().len(),
        manual_rules = !corrections.is_empty(),
        "building owner map"
    );
    let mut builder = OwnerMapBuilder::new(&exclusions, &corrections);

    let mut years: Vec<u32> = config
        .years
        .iter()
        .copied()
        .filter(|y| through.map_or(true, |t| *y <= t))
        .collect();
    years.sort_unstable();

    for year in years {
        let path = year_table_path(&config.input_root, year);
        if !path.exists() {
            warn!(year, path = %path.display(), "year table missing, skipping");
            continue;
        }
        let pairs = read_pairs(&path)?;
        info!(year, pairs = pairs.len(), "read historical pairs");
        builder.extend(pairs);
    }
    for sheet in config.correction_sheet_paths() {
        let pairs = read_review_sheet(&sheet)?;
        info!(sheet = %sheet.display(), pairs = pairs.len(), "read correction sheet");
        builder.extend(pairs);
    }

    let map = builder.build();
    map.write_csv(config.owner_map_path())?;
    info!(entries = map.len(), path = %config.owner_map_path().display(), "wrote owner map");
    Ok(map)
}

pub fn unresolved_path(config: &Config, year: u32) -> PathBuf {
    config.output_root.join(format!("unresolved-{}.csv", year))
}

/// Resolves one new year's table against the stored owner map.
pub fn resolve_year(config: &Config, year: u32) -> Result<ResolveStats> {
    let _span = info_span!("resolve", year).entered();
    let map = OwnerIdentityMap::read_csv(config.owner_map_path())?;
    if map.is_empty() {
        warn!(path = %config.owner_map_path().display(), "owner map is empty, only existing ids will carry");
    }
    let mut records = read_year_table(year_table_path(&config.input_root, year), year)?;

    let stats = Resolver::new(&map).apply(&mut records);

    let unresolved: Vec<&TaxpayerRecord> = records
        .iter()
        .filter(|r| !has_real_own_id(r.own_id.as_deref()))
        .collect();
    write_records(year_table_path(&config.output_root, year), &records)?;
    write_records(unresolved_path(config, year), &unresolved)?;
    Ok(stats)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub records: usize,
    pub flagged: usize,
    pub review_rows: usize,
}

/// Compares `year` with `prior` (or the previous configured year) and writes
/// the ranked change list and the review sheet.
pub fn reconcile_year(config: &Config, year: u32, prior: Option<u32>) -> Result<ReconcileSummary> {
    let prior = prior
        .or_else(|| config.prior_year(year))
        .unwrap_or(year.saturating_sub(1));
    let _span = info_span!("reconcile", year, prior).entered();

    let map = OwnerIdentityMap::read_csv(config.owner_map_path())?;
    let exclusions = config.exclusion_rules()?;
    let resolver = Resolver::new(&map);

    let current = read_year_table(year_table_path(&config.input_root, year), year)?;
    let before = read_year_table(year_table_path(&config.input_root, prior), prior)?;

    let candidates = detect_changes(&current, &before, &resolver, &exclusions);
    let records = candidates.len();
    let ranked = rank_for_review(candidates);
    let rows = review_rows(&ranked);

    write_records(config.output_root.join(format!("owners-{}.csv", year)), &ranked)?;
    write_review_sheet(config.output_root.join(format!("review-{}.csv", year)), &rows)?;
    Ok(ReconcileSummary {
        records,
        flagged: ranked.len(),
        review_rows: rows.len(),
    })
}

#[derive(Serialize)]
struct ParcelProperties<'a> {
    feature_id: usize,
    parcelno: &'a str,
    propaddr: Option<&'a str>,
    propzip: Option<&'a str>,
    taxpayer: Option<&'a str>,
    year: u32,
    own_id: &'a str,
    own_group: u8,
    own_count: usize,
}

#[derive(Serialize)]
struct CentroidProperties<'a> {
    feature_id: usize,
    parcelno: &'a str,
    propaddr: Option<&'a str>,
    year: u32,
    own_id: &'a str,
    own_group: u8,
    own_count: usize,
    propzip: Option<&'a str>,
}

fn parcel_features(
    parcels: &[OwnerParcel],
    shapes: &HashMap<String, MultiPolygon<f64>>,
) -> Result<(FeatureCollection, FeatureCollection)> {
    let mut polygons = Vec::with_capacity(parcels.len());
    let mut points = Vec::with_capacity(parcels.len());
    for p in parcels {
        let shape = shapes.get(&p.parcel_num);
        polygons.push(Feature::new(
            &ParcelProperties {
                feature_id: p.feature_id,
                parcelno: &p.parcel_num,
                propaddr: p.address.as_deref(),
                propzip: p.propzip.as_deref(),
                taxpayer: p.taxpayer1.as_deref(),
                year: p.year,
                own_id: &p.own_id,
                own_group: p.own_group,
                own_count: p.own_count,
            },
            shape.map(GeoJsonGeometry::from_multi_polygon),
        )?);
        points.push(Feature::new(
            &CentroidProperties {
                feature_id: p.feature_id,
                parcelno: &p.parcel_num,
                propaddr: p.address.as_deref(),
                year: p.year,
                own_id: &p.own_id,
                own_group: p.own_group,
                own_count: p.own_count,
                propzip: p.propzip.as_deref(),
            },
            shape.and_then(centroid).map(GeoJsonGeometry::from_point),
        )?);
    }
    Ok((FeatureCollection::new(polygons), FeatureCollection::new(points)))
}

fn read_zips(path: &Path) -> Result<Vec<ZipShape>> {
    if path.exists() {
        read_zip_shapes(path)
    } else {
        warn!(path = %path.display(), "zipcode polygons missing, using table zipcodes only");
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanSummary {
    pub combine: CombineStats,
    pub owner_taxpayers: usize,
    pub taxpayers: usize,
    pub loaded: bool,
}

/// Combines every configured year into the ownership dataset, attaches
/// parcel shapes and zipcodes, writes the per-year outputs and, unless
/// `skip_db`, appends everything to the database.
pub fn clean(config: &Config, skip_db: bool) -> Result<CleanSummary> {
    let map = OwnerIdentityMap::read_csv(config.owner_map_path())?;
    let exclusions = config.exclusion_rules()?;

    let mut records = Vec::new();
    for &year in &config.years {
        let path = year_table_path(&config.input_root, year);
        if !path.exists() {
            warn!(year, path = %path.display(), "year table missing, skipping");
            continue;
        }
        records.extend(read_year_table(&path, year)?);
    }

    let run = OwnershipRun::new(Resolver::new(&map), &exclusions, config.min_parcels);
    let (mut parcels, combine) = run.combine(records);

    let zips = read_zips(&config.zipcodes_path())?;
    let mut shapes_by_year: HashMap<u32, HashMap<String, MultiPolygon<f64>>> = HashMap::new();

    let mut years = config.years.clone();
    years.sort_unstable();
    years.dedup();
    for year in years {
        let _span = info_span!("clean", year).entered();
        let start = parcels.partition_point(|p| p.year < year);
        let end = parcels.partition_point(|p| p.year <= year);
        let year_parcels = &mut parcels[start..end];

        let shape_path = config.parcel_geojson_path(year);
        let shapes = if shape_path.exists() {
            union_by_parcel(read_parcel_shapes(&shape_path)?)
        } else {
            warn!(path = %shape_path.display(), "parcel polygons missing");
            Vec::new()
        };
        let zip_by_parcel = assign_zipcodes(&shapes, &zips);
        apply_zipcodes(year_parcels, &zip_by_parcel);

        let shapes: HashMap<String, MultiPolygon<f64>> = shapes
            .into_iter()
            .map(|s| (s.parcel_num, s.geometry))
            .collect();

        let year_parcels = &parcels[start..end];
        let (polygons, points) = parcel_features(year_parcels, &shapes)?;
        write_records(config.output_root.join(format!("parcels-{}.csv", year)), year_parcels)?;
        write_features(
            config.output_root.join(format!("parcels-{}.geojson", year)),
            &polygons,
        )?;
        write_features(
            config.output_root.join(format!("parcels-centroids-{}.geojson", year)),
            &points,
        )?;
        info!(parcels = year_parcels.len(), shapes = shapes.len(), "wrote year outputs");
        shapes_by_year.insert(year, shapes);
    }

    let owners = owner_taxpayers(&parcels);
    let taxpayers = taxpayer_details(&parcels, &owners);

    let mut summary = CleanSummary {
        combine,
        owner_taxpayers: owners.len(),
        taxpayers: taxpayers.len(),
        loaded: false,
    };
    if skip_db {
        return Ok(summary);
    }

    let mut store = Store::open(&config.database_url)?;
    let rows: Vec<ParcelRow> = parcels
        .iter()
        .map(|p| {
            let geometry = shapes_by_year
                .get(&p.year)
                .and_then(|shapes| shapes.get(&p.parcel_num));
            ParcelRow {
                parcel: p,
                geometry,
                centroid: geometry.and_then(centroid),
            }
        })
        .collect();
    store.append_zips(&zips)?;
    store.append_parcels(&rows)?;
    store.append_owner_taxpayers(&owners)?;
    store.append_taxpayers(&taxpayers)?;
    info!(total_parcels = store.count("parcels")?, database = %config.database_url, "loaded tables");
    summary.loaded = true;
    Ok(summary)
}
