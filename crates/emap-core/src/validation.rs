//! Validator and run summary: per-key mass-balance bookkeeping plus a
//! record of which pattern source and GNFR corrections were applied,
//! consumed by the I/O layer to write the summary spreadsheet.

use std::collections::{HashMap, HashSet};

use crate::ids::EmissionKey;
use crate::inventory::{GnfrCorrection, Inventory};
use crate::pattern::PatternSourceKind;

#[derive(Debug, Clone, Copy, Default)]
struct Accumulated {
    diffuse_inside: f64,
    diffuse_outside: f64,
    point_total: f64,
}

/// Accumulates, per key, how much diffuse mass landed inside the
/// output grid(s), how much fell outside every grid extent, and the
/// total point-source mass — for the mass-conservation check against
/// the inventory's reconciled totals.
#[derive(Debug, Default)]
pub struct Validator {
    accumulated: HashMap<EmissionKey, Accumulated>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub key: EmissionKey,
    pub diffuse_inside: f64,
    pub diffuse_outside: f64,
    pub point_total: f64,
    pub expected_total: f64,
    pub diff: f64,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_diffuse(&mut self, key: EmissionKey, inside: f64, outside: f64) {
        let entry = self.accumulated.entry(key).or_default();
        entry.diffuse_inside += inside;
        entry.diffuse_outside += outside;
    }

    pub fn record_points(&mut self, key: EmissionKey, total: f64) {
        self.accumulated.entry(key).or_default().point_total += total;
    }

    /// Compares accumulated totals against `inventory`'s reconciled
    /// totals and reports the per-key difference.
    pub fn finalize(&self, inventory: &Inventory) -> Vec<ValidationReport> {
        let mut reports = Vec::new();

        for entry in inventory.iter() {
            let acc = self.accumulated.get(&entry.key).copied().unwrap_or_default();
            let expected_total = entry.scaled_total();
            let actual_total = acc.diffuse_inside + acc.diffuse_outside + acc.point_total;

            reports.push(ValidationReport {
                key: entry.key,
                diffuse_inside: acc.diffuse_inside,
                diffuse_outside: acc.diffuse_outside,
                point_total: acc.point_total,
                expected_total,
                diff: actual_total - expected_total,
            });
        }

        reports
    }
}

/// Diagnostic record accompanying a run: which pattern source was
/// chosen per key, the GNFR corrections applied, and which keys fell
/// back to uniform spread.
#[derive(Debug, Default)]
pub struct RunSummary {
    pattern_choices: HashMap<EmissionKey, PatternSourceKind>,
    gnfr_corrections: Vec<GnfrCorrection>,
    uniform_fallback_events: HashSet<EmissionKey>,
}

impl RunSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_pattern_choice(&mut self, key: EmissionKey, source: PatternSourceKind) {
        self.pattern_choices.insert(key, source);
    }

    pub fn record_gnfr_corrections(&mut self, corrections: Vec<GnfrCorrection>) {
        self.gnfr_corrections.extend(corrections);
    }

    pub fn record_uniform_fallback(&mut self, key: EmissionKey) {
        self.uniform_fallback_events.insert(key);
    }

    pub fn pattern_choices(&self) -> &HashMap<EmissionKey, PatternSourceKind> {
        &self.pattern_choices
    }

    pub fn gnfr_corrections(&self) -> &[GnfrCorrection] {
        &self.gnfr_corrections
    }

    pub fn uniform_fallback_events(&self) -> &HashSet<EmissionKey> {
        &self.uniform_fallback_events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::country::{CountryRegistry, LandOrSea};
    use crate::inventory::EmissionInventoryEntry;
    use crate::pollutant::PollutantRegistry;
    use crate::sector::{Destination, SectorId, SectorRegistry};

    #[test]
    fn finalize_reports_zero_diff_when_mass_fully_accounted() {
        let mut countries = CountryRegistry::new();
        let nl = countries.register("NL", "Netherlands", LandOrSea::Land);
        let mut sectors = SectorRegistry::new();
        let gnfr = sectors.register_gnfr("F_RoadTransport", "Road transport", Destination::Land);
        let nfr = sectors.register_nfr("1A3bi", "Passenger cars", gnfr, Destination::Land);
        let mut pollutants = PollutantRegistry::new();
        let nox = pollutants.register("NOx");
        let key = EmissionKey::new(nl, SectorId::Nfr(nfr), nox);

        let mut inventory = Inventory::new();
        inventory.add_emission(EmissionInventoryEntry::new(key, 100.0, Vec::new())).unwrap();

        let mut validator = Validator::new();
        validator.record_diffuse(key, 80.0, 20.0);

        let reports = validator.finalize(&inventory);
        assert_eq!(reports.len(), 1);
        assert!(reports[0].diff.abs() < 1e-9);
    }
}
