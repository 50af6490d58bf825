//! Country identifiers and the registry that hands them out.
//!
//! Countries are loaded once from the `05_model_parameters` country
//! table (collaborator-owned I/O; this module only defines the shape)
//! and referenced everywhere else by the cheap [`CountryId`] handle.

use std::collections::HashMap;

/// Whether a country polygon represents land territory or an
/// Exclusive Economic Zone / sea area. Used to pick between the land
/// and EEZ coverage tables when distributing sea-destined sectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LandOrSea {
    Land,
    Sea,
}

/// Opaque, value-equal, hashable handle into a [`CountryRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CountryId(pub(crate) u16);

#[derive(Debug, Clone)]
pub struct CountryRecord {
    pub iso_code: String,
    pub name: String,
    pub land_or_sea: LandOrSea,
}

/// The Belgian regions that report diffuse/point split separately from
/// the rest of Europe (see the inventory builder's Belgian-region
/// branch). Flanders (`BEF`) additionally gets its own disaggregation
/// pass at the finest grid.
const BELGIAN_REGION_CODES: [&str; 3] = ["BEB", "BEF", "BEW"];
const FLANDERS_CODE: &str = "BEF";

#[derive(Debug, Default)]
pub struct CountryRegistry {
    records: Vec<CountryRecord>,
    by_code: HashMap<String, CountryId>,
}

impl CountryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a country, returning its handle. Re-registering the
    /// same ISO code returns the existing handle rather than creating
    /// a duplicate, since the country table collaborator may be
    /// re-read across multiple input files.
    pub fn register(&mut self, iso_code: &str, name: &str, land_or_sea: LandOrSea) -> CountryId {
        if let Some(&id) = self.by_code.get(iso_code) {
            return id;
        }

        let id = CountryId(self.records.len() as u16);
        self.records.push(CountryRecord {
            iso_code: iso_code.to_string(),
            name: name.to_string(),
            land_or_sea,
        });
        self.by_code.insert(iso_code.to_string(), id);
        id
    }

    pub fn id_for_code(&self, iso_code: &str) -> Option<CountryId> {
        self.by_code.get(iso_code).copied()
    }

    pub fn record(&self, id: CountryId) -> &CountryRecord {
        &self.records[id.0 as usize]
    }

    pub fn code(&self, id: CountryId) -> &str {
        &self.record(id).iso_code
    }

    pub fn iter(&self) -> impl Iterator<Item = CountryId> + '_ {
        (0..self.records.len() as u16).map(CountryId)
    }

    pub fn is_belgian_region(&self, id: CountryId) -> bool {
        BELGIAN_REGION_CODES.contains(&self.code(id))
    }

    pub fn flanders(&self) -> Option<CountryId> {
        self.id_for_code(FLANDERS_CODE)
    }
}
