//! Parcel and zipcode polygons: GeoJSON in and out, per-parcel unions and the
//! most-overlapping zipcode for each parcel. Coordinates stay in lon/lat;
//! overlap areas are measured on the sphere.

use std::{
    collections::{BTreeMap, HashMap},
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};

use geo::{
    BooleanOps, BoundingRect, Centroid, ChamberlainDuquetteArea, Coord, Intersects, LineString,
    MultiPolygon, Point, Polygon, Rect,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::normalize::fix_parcel_num;
use crate::records::COLUMN_ALIASES;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum GeoJsonGeometry {
    Point { coordinates: Vec<f64> },
    Polygon { coordinates: Vec<Vec<Vec<f64>>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Vec<f64>>>> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub properties: Option<Map<String, Value>>,
    pub geometry: Option<GeoJsonGeometry>,
}

impl Feature {
    pub fn new<P: Serialize>(properties: &P, geometry: Option<GeoJsonGeometry>) -> Result<Self> {
        let properties = match serde_json::to_value(properties)? {
            Value::Object(map) => Some(map),
            _ => None,
        };
        Ok(Self {
            kind: "Feature".to_owned(),
            properties,
            geometry,
        })
    }

    /// A property as text, whatever JSON type the exporter used.
    pub fn property(&self, name: &str) -> Option<String> {
        let value = self.properties.as_ref()?.get(name)?;
        match value {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_owned()),
            Value::Number(n) => match n.as_f64() {
                Some(f) if f.fract() == 0.0 => Some(format!("{}", f as i64)),
                _ => Some(n.to_string()),
            },
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub kind: String,
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            kind: "FeatureCollection".to_owned(),
            features,
        }
    }
}

fn ring(points: &[Vec<f64>]) -> Result<LineString<f64>> {
    points
        .iter()
        .map(|p| match p.as_slice() {
            [x, y, ..] => Ok(Coord { x: *x, y: *y }),
            _ => Err(PipelineError::Geometry(format!("position with {} values", p.len()))),
        })
        .collect::<Result<Vec<_>>>()
        .map(LineString::new)
}

fn polygon(rings: &[Vec<Vec<f64>>]) -> Result<Option<Polygon<f64>>> {
    let mut rings = rings.iter().map(|r| ring(r));
    let exterior = match rings.next() {
        Some(exterior) => exterior?,
        None => return Ok(None),
    };
    let interiors = rings.collect::<Result<Vec<_>>>()?;
    Ok(Some(Polygon::new(exterior, interiors)))
}

fn positions(line: &LineString<f64>) -> Vec<Vec<f64>> {
    line.coords().map(|c| vec![c.x, c.y]).collect()
}

impl GeoJsonGeometry {
    pub fn to_multi_polygon(&self) -> Result<MultiPolygon<f64>> {
        match self {
            GeoJsonGeometry::Polygon { coordinates } => {
                Ok(MultiPolygon::new(polygon(coordinates)?.into_iter().collect()))
            }
            GeoJsonGeometry::MultiPolygon { coordinates } => {
                let mut polygons = Vec::with_capacity(coordinates.len());
                for rings in coordinates {
                    polygons.extend(polygon(rings)?);
                }
                Ok(MultiPolygon::new(polygons))
            }
            GeoJsonGeometry::Point { .. } => {
                Err(PipelineError::Geometry("point where a polygon was expected".into()))
            }
        }
    }

    pub fn from_multi_polygon(geometry: &MultiPolygon<f64>) -> Self {
        let coordinates = geometry
            .iter()
            .map(|p| {
                std::iter::once(p.exterior())
                    .chain(p.interiors())
                    .map(positions)
                    .collect()
            })
            .collect();
        GeoJsonGeometry::MultiPolygon { coordinates }
    }

    pub fn from_point(point: Point<f64>) -> Self {
        GeoJsonGeometry::Point {
            coordinates: vec![point.x(), point.y()],
        }
    }
}

pub fn read_features<P: AsRef<Path>>(path: P) -> Result<FeatureCollection> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

pub fn write_features<P: AsRef<Path>>(path: P, collection: &FeatureCollection) -> Result<()> {
    if let Some(parent) = path.as_ref().parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    serde_json::to_writer(BufWriter::new(file), collection)?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ParcelShape {
    pub parcel_num: String,
    pub geometry: MultiPolygon<f64>,
}

#[derive(Debug, Clone)]
pub struct ZipShape {
    pub zipcode: String,
    pub geometry: MultiPolygon<f64>,
}

fn parcel_property(feature: &Feature) -> Option<String> {
    feature.property("parcelno").or_else(|| {
        COLUMN_ALIASES
            .iter()
            .filter(|(_, canonical)| *canonical == "parcelno")
            .find_map(|(alias, _)| feature.property(alias))
    })
}

/// Reads parcel polygons keyed by normalized parcel number. Features without
/// a parcel number or polygon geometry are skipped.
pub fn read_parcel_shapes<P: AsRef<Path>>(path: P) -> Result<Vec<ParcelShape>> {
    let path = path.as_ref();
    let collection = read_features(path)?;
    let mut shapes = Vec::with_capacity(collection.features.len());
    let mut skipped = 0;
    for feature in &collection.features {
        let (Some(parcel), Some(geometry)) = (parcel_property(feature), feature.geometry.as_ref())
        else {
            skipped += 1;
            continue;
        };
        match geometry.to_multi_polygon() {
            Ok(geometry) => shapes.push(ParcelShape {
                parcel_num: fix_parcel_num(&parcel),
                geometry,
            }),
            Err(e) => {
                warn!(file = %path.display(), parcel = %parcel, error = %e, "skipping parcel geometry");
                skipped += 1;
            }
        }
    }
    debug!(file = %path.display(), shapes = shapes.len(), skipped, "read parcel shapes");
    Ok(shapes)
}

pub fn read_zip_shapes<P: AsRef<Path>>(path: P) -> Result<Vec<ZipShape>> {
    let path = path.as_ref();
    let collection = read_features(path)?;
    let mut zips = Vec::new();
    for feature in &collection.features {
        let zipcode = feature
            .property("zipcode")
            .or_else(|| feature.property("zip_code"))
            .or_else(|| feature.property("zip"));
        let (Some(zipcode), Some(geometry)) = (zipcode, feature.geometry.as_ref()) else {
            continue;
        };
        zips.push(ZipShape {
            zipcode,
            geometry: geometry.to_multi_polygon()?,
        });
    }
    info!(file = %path.display(), zips = zips.len(), "read zipcode shapes");
    Ok(zips)
}

/// Merges all polygons sharing a parcel number; output is sorted by parcel.
pub fn union_by_parcel(shapes: Vec<ParcelShape>) -> Vec<ParcelShape> {
    let mut grouped: BTreeMap<String, Vec<MultiPolygon<f64>>> = BTreeMap::new();
    for shape in shapes {
        grouped.entry(shape.parcel_num).or_default().push(shape.geometry);
    }
    grouped
        .into_iter()
        .filter_map(|(parcel_num, geometries)| {
            let mut geometries = geometries.into_iter();
            let first = geometries.next()?;
            let geometry = geometries.fold(first, |acc, g| acc.union(&g));
            Some(ParcelShape {
                parcel_num,
                geometry,
            })
        })
        .collect()
}

/// Picks, for each parcel, the zipcode whose polygon shares the most area
/// with it. Ties go to the zipcode listed first; parcels that overlap no
/// zipcode are absent from the result.
pub fn assign_zipcodes(parcels: &[ParcelShape], zips: &[ZipShape]) -> HashMap<String, String> {
    let zip_bounds: Vec<Option<Rect<f64>>> = zips.iter().map(|z| z.geometry.bounding_rect()).collect();

    let mut assigned = HashMap::with_capacity(parcels.len());
    for parcel in parcels {
        let Some(bounds) = parcel.geometry.bounding_rect() else {
            continue;
        };
        let mut best: Option<(&str, f64)> = None;
        for (zip, zip_rect) in zips.iter().zip(&zip_bounds) {
            let Some(zip_rect) = zip_rect else { continue };
            if !bounds.intersects(zip_rect) || !parcel.geometry.intersects(&zip.geometry) {
                continue;
            }
            let area = parcel
                .geometry
                .intersection(&zip.geometry)
                .chamberlain_duquette_unsigned_area();
            if area > 0.0 && best.map_or(true, |(_, a)| area > a) {
                best = Some((zip.zipcode.as_str(), area));
            }
        }
        if let Some((zipcode, _)) = best {
            assigned.insert(parcel.parcel_num.clone(), zipcode.to_owned());
        }
    }
    info!(
        parcels = parcels.len(),
        assigned = assigned.len(),
        "assigned zipcodes by overlap"
    );
    assigned
}

pub fn centroid(geometry: &MultiPolygon<f64>) -> Option<Point<f64>> {
    geometry.centroid()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x0: f64, y0: f64, size: f64) -> MultiPolygon<f64> {
        let ring = LineString::from(vec![
            (x0, y0),
            (x0 + size, y0),
            (x0 + size, y0 + size),
            (x0, y0 + size),
            (x0, y0),
        ]);
        MultiPolygon::new(vec![Polygon::new(ring, vec![])])
    }

    fn zip(code: &str, geometry: MultiPolygon<f64>) -> ZipShape {
        ZipShape {
            zipcode: code.into(),
            geometry,
        }
    }

    #[test]
    fn picks_zip_with_most_overlap() {
        let parcel = ParcelShape {
            parcel_num: "01.".into(),
            geometry: square(-83.0010, 42.3300, 0.0010),
        };
        // 48201 covers 30% of the parcel, 48202 covers 70%.
        let zips = vec![
            zip("48201", square(-83.0207, 42.3200, 0.0200)),
            zip("48202", square(-83.0007, 42.3200, 0.0200)),
            zip("48226", square(-82.0000, 42.0000, 0.0100)),
        ];
        let assigned = assign_zipcodes(&[parcel], &zips);
        assert_eq!(assigned.get("01.").map(String::as_str), Some("48202"));
    }

    #[test]
    fn parcel_outside_every_zip_is_unassigned() {
        let parcel = ParcelShape {
            parcel_num: "02.".into(),
            geometry: square(10.0, 10.0, 0.001),
        };
        let zips = vec![zip("48201", square(-83.01, 42.32, 0.01))];
        assert!(assign_zipcodes(&[parcel], &zips).is_empty());
    }

    #[test]
    fn parcels_are_unioned_by_number() {
        let shapes = vec![
            ParcelShape {
                parcel_num: "02.".into(),
                geometry: square(0.0, 0.0, 1.0),
            },
            ParcelShape {
                parcel_num: "01.".into(),
                geometry: square(5.0, 5.0, 1.0),
            },
            ParcelShape {
                parcel_num: "02.".into(),
                geometry: square(1.0, 0.0, 1.0),
            },
        ];
        let merged = union_by_parcel(shapes);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].parcel_num, "01.");
        assert_eq!(merged[1].parcel_num, "02.");
        let bounds = merged[1].geometry.bounding_rect().unwrap();
        assert_eq!(bounds.min(), Coord { x: 0.0, y: 0.0 });
        assert_eq!(bounds.max(), Coord { x: 2.0, y: 1.0 });
    }

    #[test]
    fn reads_geojson_parcels_and_zips() {
        let dir = tempfile::tempdir().unwrap();
        let parcels_path = dir.path().join("praxis2020.geojson");
        std::fs::write(
            &parcels_path,
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature","properties":{"parcel_num":"1234567.89"},
                 "geometry":{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,1],[0,0]]]}},
                {"type":"Feature","properties":{"parcelno":12345},
                 "geometry":{"type":"MultiPolygon","coordinates":[[[[0,0,5],[1,0,5],[1,1,5],[0,0,5]]]]}},
                {"type":"Feature","properties":{"parcelno":"9."},"geometry":null},
                {"type":"Feature","properties":null,
                 "geometry":{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,0]]]}}
            ]}"#,
        )
        .unwrap();
        let shapes = read_parcel_shapes(&parcels_path).unwrap();
        let parcels: Vec<&str> = shapes.iter().map(|s| s.parcel_num.as_str()).collect();
        assert_eq!(parcels, vec!["01234567.89", "12345."]);

        let zips_path = dir.path().join("zipcodes.geojson");
        std::fs::write(
            &zips_path,
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature","properties":{"zipcode":48201},
                 "geometry":{"type":"Polygon","coordinates":[[[0,0],[2,0],[2,2],[0,0]]]}}
            ]}"#,
        )
        .unwrap();
        let zips = read_zip_shapes(&zips_path).unwrap();
        assert_eq!(zips[0].zipcode, "48201");
    }

    #[test]
    fn written_features_read_back() {
        #[derive(Serialize)]
        struct Props {
            parcelno: String,
            own_count: usize,
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("parcels-2020.geojson");
        let geometry = square(0.0, 0.0, 1.0);
        let point = centroid(&geometry).unwrap();
        let collection = FeatureCollection::new(vec![
            Feature::new(
                &Props {
                    parcelno: "01.".into(),
                    own_count: 12,
                },
                Some(GeoJsonGeometry::from_multi_polygon(&geometry)),
            )
            .unwrap(),
            Feature::new(
                &Props {
                    parcelno: "01.".into(),
                    own_count: 12,
                },
                Some(GeoJsonGeometry::from_point(point)),
            )
            .unwrap(),
        ]);
        write_features(&path, &collection).unwrap();

        let back = read_features(&path).unwrap();
        assert_eq!(back.features.len(), 2);
        assert_eq!(back.features[0].property("own_count").as_deref(), Some("12"));
        let roundtrip = back.features[0].geometry.as_ref().unwrap().to_multi_polygon().unwrap();
        assert_eq!(roundtrip, geometry);
        assert_eq!(
            back.features[1].geometry,
            Some(GeoJsonGeometry::Point {
                coordinates: vec![0.5, 0.5]
            })
        );
    }
}
