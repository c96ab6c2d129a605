use std::path::Path;

use geo::{MultiPolygon, Point};
use rusqlite::{params, Connection};
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::geometry::{GeoJsonGeometry, ZipShape};
use crate::ownership::{OwnerParcel, OwnerTaxpayer, TaxpayerDetail};

/// A parcel row with its shape, ready to load.
pub struct ParcelRow<'a> {
    pub parcel: &'a OwnerParcel,
    pub geometry: Option<&'a MultiPolygon<f64>>,
    pub centroid: Option<Point<f64>>,
}

fn geometry_text(geometry: &GeoJsonGeometry) -> Result<String> {
    Ok(serde_json::to_string(geometry)?)
}

/// Appends the cleaned tables to a SQLite database. Nothing is deduplicated
/// against rows already loaded.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        info!("Opening database at {}", path.display());
        let store = Self {
            conn: Connection::open(path)?,
        };
        store.run_migrations()?;
        Ok(store)
    }

    #[cfg(test)]
    fn in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let migration_sql = include_str!("../migrations/001_create_tables.sql");
        self.conn.execute_batch(migration_sql)?;
        Ok(())
    }

    pub fn append_zips(&mut self, zips: &[ZipShape]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare("INSERT INTO zips_geom (zipcode, geometry) VALUES (?1, ?2)")?;
            for zip in zips {
                let geometry = geometry_text(&GeoJsonGeometry::from_multi_polygon(&zip.geometry))?;
                stmt.execute(params![zip.zipcode, geometry])?;
            }
        }
        tx.commit()?;
        info!(rows = zips.len(), "wrote zips_geom");
        Ok(zips.len())
    }

    pub fn append_parcels(&mut self, rows: &[ParcelRow]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO parcels (feature_id, parcelno, year, own_id, own_count, own_group, \
                 taxpayer, taxpayer2, propaddr, propno, propdir, propzip, propzip2, saledate, \
                 saleprice, totsqft, totacres, resyrbuilt, tpaddr, tpcity, tpstate, tpzip, \
                 taxstatus, geom, centroid) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, \
                 ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)",
            )?;
            for row in rows {
                let p = row.parcel;
                let geom = row
                    .geometry
                    .map(|g| geometry_text(&GeoJsonGeometry::from_multi_polygon(g)))
                    .transpose()?;
                let centroid = row
                    .centroid
                    .map(|c| geometry_text(&GeoJsonGeometry::from_point(c)))
                    .transpose()?;
                stmt.execute(params![
                    p.feature_id as i64,
                    p.parcel_num,
                    p.year,
                    p.own_id,
                    p.own_count as i64,
                    p.own_group,
                    p.taxpayer1,
                    p.taxpayer2,
                    p.address,
                    p.propno,
                    p.propdir,
                    p.propzip,
                    p.propzip2,
                    p.sale_date.map(|d| d.format("%Y-%m-%d").to_string()),
                    p.sale_price,
                    p.totsqft,
                    p.totacres,
                    p.resyrbuilt,
                    p.taxpayer_address,
                    p.taxpayer_city,
                    p.taxpayer_state,
                    p.taxpayer_zip,
                    p.taxstatus,
                    geom,
                    centroid,
                ])?;
            }
        }
        tx.commit()?;
        info!(rows = rows.len(), "wrote parcels");
        Ok(rows.len())
    }

    pub fn append_owner_taxpayers(&mut self, owners: &[OwnerTaxpayer]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO owner_taxpayer (owntax_id, own_id, taxpayer) VALUES (?1, ?2, ?3)",
            )?;
            for owner in owners {
                stmt.execute(params![owner.owntax_id as i64, owner.own_id, owner.taxpayer])?;
            }
        }
        tx.commit()?;
        info!(rows = owners.len(), "wrote owner_taxpayer");
        Ok(owners.len())
    }

    pub fn append_taxpayers(&mut self, taxpayers: &[TaxpayerDetail]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO taxpayer (tp_id, owntax_id, taxpayer2, tpaddr, tpcity, tpstate, \
                 tpzip, taxstatus) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for t in taxpayers {
                stmt.execute(params![
                    t.tp_id as i64,
                    t.owntax_id as i64,
                    t.taxpayer2,
                    t.tpaddr,
                    t.tpcity,
                    t.tpstate,
                    t.tpzip,
                    t.taxstatus,
                ])?;
            }
        }
        tx.commit()?;
        info!(rows = taxpayers.len(), "wrote taxpayer");
        Ok(taxpayers.len())
    }

    pub fn count(&self, table: &str) -> Result<i64> {
        let sql = match table {
            "zips_geom" | "parcels" | "owner_taxpayer" | "taxpayer" => {
                format!("SELECT COUNT(*) FROM {}", table)
            }
            other => {
                return Err(PipelineError::Config(format!("unknown table {}", other)))
            }
        };
        Ok(self.conn.query_row(&sql, [], |row| row.get(0))?)
    }

    #[cfg(test)]
    fn connection(&self) -> &Connection {
        &self.conn
    }
}
