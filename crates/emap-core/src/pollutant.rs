//! Pollutant identifiers and the fallback-pollutant table consulted
//! by the spatial-pattern selection protocol (step 4).

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PollutantId(pub(crate) u16);

#[derive(Debug, Clone)]
pub struct PollutantRecord {
    pub code: String,
    pub fallback: Option<PollutantId>,
}

#[derive(Debug, Default)]
pub struct PollutantRegistry {
    records: Vec<PollutantRecord>,
    by_code: HashMap<String, PollutantId>,
}

impl PollutantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, code: &str) -> PollutantId {
        if let Some(&id) = self.by_code.get(code) {
            return id;
        }
        let id = PollutantId(self.records.len() as u16);
        self.records.push(PollutantRecord {
            code: code.to_string(),
            fallback: None,
        });
        self.by_code.insert(code.to_string(), id);
        id
    }

    /// Sets the fallback pollutant used when no spatial pattern can be
    /// found for `id` (e.g. `PMcoarse -> PM10`). Both pollutants must
    /// already be registered.
    pub fn set_fallback(&mut self, id: PollutantId, fallback: PollutantId) {
        self.records[id.0 as usize].fallback = Some(fallback);
    }

    pub fn id_for_code(&self, code: &str) -> Option<PollutantId> {
        self.by_code.get(code).copied()
    }

    pub fn code(&self, id: PollutantId) -> &str {
        &self.records[id.0 as usize].code
    }

    pub fn fallback_of(&self, id: PollutantId) -> Option<PollutantId> {
        self.records[id.0 as usize].fallback
    }

    pub fn iter(&self) -> impl Iterator<Item = PollutantId> + '_ {
        (0..self.records.len() as u16).map(PollutantId)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_pollutant_is_resolved() {
        let mut reg = PollutantRegistry::new();
        let pmcoarse = reg.register("PMcoarse");
        let pm10 = reg.register("PM10");
        reg.set_fallback(pmcoarse, pm10);

        assert_eq!(reg.fallback_of(pmcoarse), Some(pm10));
        assert_eq!(reg.fallback_of(pm10), None);
    }
}
