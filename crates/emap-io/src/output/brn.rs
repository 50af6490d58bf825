//! BRN-style output: one fixed-column row per emission, diffuse and
//! point sources interleaved in a single file. Named after the
//! OPS/AERMOD `.brn` point/area-source format this engine's original
//! targets.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use emap_core::emissions::{Coordinate, EmissionEntry};
use emap_core::ids::EmissionKey;
use emap_core::output::{OutputBuilder, WriteMode};
use emap_core::pollutant::PollutantId;

/// Buffers rows in memory until `flush_pollutant`/`flush`, since only
/// those calls know whether this is the coarsest level's `Create` or
/// a finer level's `Append`.
pub struct BrnOutputBuilder {
    path: PathBuf,
    pending: Vec<String>,
}

impl BrnOutputBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), pending: Vec::new() }
    }

    pub fn default_path(output_dir: &Path, suffix: Option<&str>) -> PathBuf {
        let name = match suffix {
            Some(suffix) => format!("emissions_{suffix}.brn"),
            None => "emissions.brn".to_string(),
        };
        output_dir.join(name)
    }

    fn write_pending(&mut self, mode: WriteMode) -> emap_core::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(mode == WriteMode::Create)
            .append(mode == WriteMode::Append)
            .open(&self.path)
            .map_err(emap_core::Error::Io)?;

        for line in self.pending.drain(..) {
            writeln!(file, "{line}").map_err(emap_core::Error::Io)?;
        }
        file.flush().map_err(emap_core::Error::Io)?;
        Ok(())
    }
}

impl OutputBuilder for BrnOutputBuilder {
    fn add_point_output_entry(&mut self, entry: &EmissionEntry) -> emap_core::Result<()> {
        let coordinate = entry.coordinate.unwrap_or(Coordinate { x: 0.0, y: 0.0 });
        self.pending.push(format!(
            "P\t{}\t{:.3}\t{:.3}\t{:.6}\t{:.2}\t{:.2}\t{:.2}\t{:.2}",
            entry.key,
            coordinate.x,
            coordinate.y,
            entry.amount_or_zero(),
            entry.stack.height.unwrap_or(0.0),
            entry.stack.diameter.unwrap_or(0.0),
            entry.stack.flow.unwrap_or(0.0),
            entry.stack.temperature.unwrap_or(0.0),
        ));
        Ok(())
    }

    fn add_diffuse_output_entry(&mut self, key: EmissionKey, cell_location: Coordinate, amount: f64, cell_size_meters: f64) -> emap_core::Result<()> {
        self.pending.push(format!("D\t{key}\t{:.3}\t{:.3}\t{:.6}\t{cell_size_meters:.1}", cell_location.x, cell_location.y, amount));
        Ok(())
    }

    fn flush_pollutant(&mut self, _pollutant: PollutantId, mode: WriteMode) -> emap_core::Result<()> {
        self.write_pending(mode)
    }

    fn flush(&mut self, mode: WriteMode) -> emap_core::Result<()> {
        self.write_pending(mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emap_core::country::{CountryRegistry, LandOrSea};
    use emap_core::ids::EmissionKey;
    use emap_core::pollutant::PollutantRegistry;
    use emap_core::sector::{Destination, SectorId, SectorRegistry};
    use std::io::Read;

    fn sample_key() -> EmissionKey {
        let mut countries = CountryRegistry::new();
        let country = countries.register("NL", "Netherlands", LandOrSea::Land);
        let mut sectors = SectorRegistry::new();
        let gnfr = sectors.register_gnfr("A_PublicPower", "Public power", Destination::Land);
        let nfr = sectors.register_nfr("1A1a", "Public electricity", gnfr, Destination::Land);
        let mut pollutants = PollutantRegistry::new();
        let pollutant = pollutants.register("NOx");
        EmissionKey::new(country, SectorId::Nfr(nfr), pollutant)
    }

    fn sample_pollutant() -> PollutantId {
        let mut pollutants = PollutantRegistry::new();
        pollutants.register("NOx")
    }

    #[test]
    fn writes_diffuse_rows_only_on_flush() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut builder = BrnOutputBuilder::new(file.path());

        builder.add_diffuse_output_entry(sample_key(), Coordinate { x: 1.0, y: 2.0 }, 42.0, 1000.0).unwrap();
        let mut contents = String::new();
        std::fs::File::open(file.path()).unwrap().read_to_string(&mut contents).unwrap();
        assert!(contents.is_empty());

        builder.flush_pollutant(sample_pollutant(), WriteMode::Create).unwrap();
        contents.clear();
        std::fs::File::open(file.path()).unwrap().read_to_string(&mut contents).unwrap();
        assert!(contents.starts_with("D\t"));
    }

    #[test]
    fn append_mode_preserves_earlier_rows() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut builder = BrnOutputBuilder::new(file.path());

        builder.add_diffuse_output_entry(sample_key(), Coordinate { x: 1.0, y: 2.0 }, 1.0, 1000.0).unwrap();
        builder.flush_pollutant(sample_pollutant(), WriteMode::Create).unwrap();

        builder.add_diffuse_output_entry(sample_key(), Coordinate { x: 3.0, y: 4.0 }, 2.0, 500.0).unwrap();
        builder.flush_pollutant(sample_pollutant(), WriteMode::Append).unwrap();

        let mut contents = String::new();
        std::fs::File::open(file.path()).unwrap().read_to_string(&mut contents).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
