//! Sector identifiers: the `{Nfr, Gnfr}` tagged variant plus the
//! `NfrId -> GnfrId` rollup and `Destination` tables that replace the
//! original's sector class hierarchy.

use std::collections::HashMap;

/// Where a sector's emissions physically end up: on land, at sea, or
/// restricted to a country's Exclusive Economic Zone. Determines
/// which coverage table (land or EEZ) the disaggregator uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    Land,
    Sea,
    Eez,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NfrId(pub(crate) u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GnfrId(pub(crate) u16);

/// A sector reference, tagged by taxonomy level. Ordered so NFR
/// sectors and GNFR sectors each sort by their registration index;
/// used as part of [`crate::ids::EmissionKey`]'s `Ord` for the sorted
/// emission collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SectorId {
    Nfr(NfrId),
    Gnfr(GnfrId),
}

#[derive(Debug, Clone)]
pub struct NfrRecord {
    pub code: String,
    pub name: String,
    pub gnfr: GnfrId,
    pub destination: Destination,
}

#[derive(Debug, Clone)]
pub struct GnfrRecord {
    pub code: String,
    pub name: String,
    pub destination: Destination,
}

#[derive(Debug, Default)]
pub struct SectorRegistry {
    nfr: Vec<NfrRecord>,
    gnfr: Vec<GnfrRecord>,
    nfr_by_code: HashMap<String, NfrId>,
    gnfr_by_code: HashMap<String, GnfrId>,
}

impl SectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_gnfr(&mut self, code: &str, name: &str, destination: Destination) -> GnfrId {
        if let Some(&id) = self.gnfr_by_code.get(code) {
            return id;
        }
        let id = GnfrId(self.gnfr.len() as u16);
        self.gnfr.push(GnfrRecord {
            code: code.to_string(),
            name: name.to_string(),
            destination,
        });
        self.gnfr_by_code.insert(code.to_string(), id);
        id
    }

    /// Registers an NFR sector under an already-registered GNFR
    /// parent. The NFR inherits its parent's destination unless a more
    /// specific one is provided (the original allows per-NFR overrides
    /// for e.g. shipping-adjacent sectors).
    pub fn register_nfr(&mut self, code: &str, name: &str, gnfr: GnfrId, destination: Destination) -> NfrId {
        if let Some(&id) = self.nfr_by_code.get(code) {
            return id;
        }
        let id = NfrId(self.nfr.len() as u16);
        self.nfr.push(NfrRecord {
            code: code.to_string(),
            name: name.to_string(),
            gnfr,
            destination,
        });
        self.nfr_by_code.insert(code.to_string(), id);
        id
    }

    pub fn nfr_id_for_code(&self, code: &str) -> Option<NfrId> {
        self.nfr_by_code.get(code).copied()
    }

    pub fn gnfr_id_for_code(&self, code: &str) -> Option<GnfrId> {
        self.gnfr_by_code.get(code).copied()
    }

    pub fn nfr(&self, id: NfrId) -> &NfrRecord {
        &self.nfr[id.0 as usize]
    }

    pub fn gnfr(&self, id: GnfrId) -> &GnfrRecord {
        &self.gnfr[id.0 as usize]
    }

    pub fn nfr_code(&self, id: NfrId) -> &str {
        &self.nfr(id).code
    }

    pub fn gnfr_code(&self, id: GnfrId) -> &str {
        &self.gnfr(id).code
    }

    pub fn gnfr_of(&self, id: NfrId) -> GnfrId {
        self.nfr(id).gnfr
    }

    pub fn destination_of(&self, sector: SectorId) -> Destination {
        match sector {
            SectorId::Nfr(id) => self.nfr(id).destination,
            SectorId::Gnfr(id) => self.gnfr(id).destination,
        }
    }

    /// Converts an NFR-level sector reference to its GNFR-level
    /// parent, used when rolling up totals and when retrying a
    /// spatial-pattern lookup at GNFR granularity.
    pub fn to_gnfr(&self, sector: SectorId) -> SectorId {
        match sector {
            SectorId::Nfr(id) => SectorId::Gnfr(self.gnfr_of(id)),
            gnfr @ SectorId::Gnfr(_) => gnfr,
        }
    }

    pub fn all_nfr(&self) -> impl Iterator<Item = NfrId> + '_ {
        (0..self.nfr.len() as u16).map(NfrId)
    }

    pub fn all_gnfr(&self) -> impl Iterator<Item = GnfrId> + '_ {
        (0..self.gnfr.len() as u16).map(GnfrId)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nfr_rolls_up_to_its_registered_gnfr() {
        let mut reg = SectorRegistry::new();
        let road = reg.register_gnfr("F_RoadTransport", "Road transport", Destination::Land);
        let nfr = reg.register_nfr("1A3bi", "Passenger cars", road, Destination::Land);

        assert_eq!(reg.gnfr_of(nfr), road);
        assert_eq!(reg.to_gnfr(SectorId::Nfr(nfr)), SectorId::Gnfr(road));
    }

    #[test]
    fn register_nfr_is_idempotent_per_code() {
        let mut reg = SectorRegistry::new();
        let g = reg.register_gnfr("G_Shipping", "Shipping", Destination::Sea);
        let a = reg.register_nfr("1A3dii", "Shipping", g, Destination::Sea);
        let b = reg.register_nfr("1A3dii", "Shipping", g, Destination::Sea);
        assert_eq!(a, b);
    }
}
