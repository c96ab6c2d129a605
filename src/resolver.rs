use tracing::{debug, info};

use crate::owner_map::{is_placeholder, OwnerIdentityMap};
use crate::records::TaxpayerRecord;

/// How a record's owner id was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The record already carried a real owner id.
    Existing(String),
    /// Found by the primary taxpayer name.
    Primary(String),
    /// Found by the secondary taxpayer name.
    Secondary(String),
    Unresolved,
}

impl Resolution {
    pub fn own_id(&self) -> Option<&str> {
        match self {
            Resolution::Existing(id) | Resolution::Primary(id) | Resolution::Secondary(id) => {
                Some(id.as_str())
            }
            Resolution::Unresolved => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveStats {
    pub existing: usize,
    pub primary: usize,
    pub secondary: usize,
    pub unresolved: usize,
}

impl ResolveStats {
    pub fn resolved(&self) -> usize {
        self.existing + self.primary + self.secondary
    }
}

pub fn has_real_own_id(own_id: Option<&str>) -> bool {
    matches!(own_id.map(str::trim), Some(id) if !id.is_empty() && !is_placeholder(id))
}

/// Carries owner ids forward onto a new year's records.
pub struct Resolver<'a> {
    map: &'a OwnerIdentityMap,
}

impl<'a> Resolver<'a> {
    pub fn new(map: &'a OwnerIdentityMap) -> Self {
        Self { map }
    }

    /// Existing real id, then primary name, then secondary name.
    pub fn resolve(&self, record: &TaxpayerRecord) -> Resolution {
        if has_real_own_id(record.own_id.as_deref()) {
            let id = record.own_id.as_deref().unwrap_or_default().trim();
            return Resolution::Existing(id.to_owned());
        }
        if let Some(id) = self.map.get(record.taxpayer1.as_deref()) {
            return Resolution::Primary(id.to_owned());
        }
        if let Some(id) = self.map.get(record.taxpayer2.as_deref()) {
            return Resolution::Secondary(id.to_owned());
        }
        Resolution::Unresolved
    }

    /// Resolves every record in place. Unresolved records keep whatever
    /// placeholder they had, or `None`.
    pub fn apply(&self, records: &mut [TaxpayerRecord]) -> ResolveStats {
        let mut stats = ResolveStats::default();
        for record in records.iter_mut() {
            match self.resolve(record) {
                Resolution::Existing(id) => {
                    stats.existing += 1;
                    record.own_id = Some(id);
                }
                Resolution::Primary(id) => {
                    stats.primary += 1;
                    record.own_id = Some(id);
                }
                Resolution::Secondary(id) => {
                    stats.secondary += 1;
                    record.own_id = Some(id);
                }
                Resolution::Unresolved => {
                    stats.unresolved += 1;
                    debug!(parcel = %record.parcel_num, taxpayer = ?record.taxpayer1, "owner unresolved");
                }
            }
        }
        info!(
            existing = stats.existing,
            primary = stats.primary,
            secondary = stats.secondary,
            unresolved = stats.unresolved,
            "resolved owner ids"
        );
        stats
    }
}
