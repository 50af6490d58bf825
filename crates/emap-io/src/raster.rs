//! Spatial-pattern raster extraction: reads GeoTIFF (CAMS), ESRI ASCII
//! grid (CEIP), and Flanders Excel pattern files and samples them at
//! country coverage cell centers. Implements
//! `emap_core::pattern::RasterExtractor`.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use calamine::{open_workbook, Data, Reader, Xlsx};
use tiff::decoder::{Decoder, DecodingResult};

use emap_core::coverage::CountryCoverage;
use emap_core::pattern::{PatternSourceId, PatternSourceKind, RasterExtractor};

use crate::error::{Error, Result};

/// A pattern raster in its own (typically coarser) projected grid,
/// decoupled from the model grid it will be sampled against.
#[derive(Debug, Clone)]
pub struct RasterGrid {
    pub rows: i32,
    pub cols: i32,
    pub origin_x: f64,
    pub origin_y: f64,
    pub cell_size_x: f64,
    pub cell_size_y: f64,
    pub values: Vec<f64>,
    pub nodata: Option<f64>,
}

impl RasterGrid {
    fn value_at(&self, x: f64, y: f64) -> f64 {
        let col = ((x - self.origin_x) / self.cell_size_x).floor() as i32;
        let row = ((y - self.origin_y) / self.cell_size_y).floor() as i32;

        if row < 0 || row >= self.rows || col < 0 || col >= self.cols {
            return 0.0;
        }

        let value = self.values[(row * self.cols + col) as usize];
        match self.nodata {
            Some(nodata) if (value - nodata).abs() < f64::EPSILON => 0.0,
            _ => value,
        }
    }

    /// Reads a CEIP-style ESRI ASCII grid: a six-line header
    /// (`ncols`/`nrows`/`xllcorner`/`yllcorner`/`cellsize`/`NODATA_value`)
    /// followed by `nrows` rows of `ncols` whitespace-separated values.
    pub fn read_ascii_grid(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut lines = BufReader::new(file).lines();

        let mut header = HashMap::new();
        for _ in 0..6 {
            let line = lines.next().ok_or_else(|| Error::MalformedRow {
                file: path.display().to_string(),
                reason: "truncated ASCII grid header".to_string(),
            })??;
            let mut parts = line.split_whitespace();
            let key = parts.next().unwrap_or_default().to_ascii_lowercase();
            let value = parts.next().unwrap_or_default().to_string();
            header.insert(key, value);
        }

        let parse = |key: &str| -> Result<f64> {
            header
                .get(key)
                .and_then(|v| v.parse::<f64>().ok())
                .ok_or_else(|| Error::MalformedRow {
                    file: path.display().to_string(),
                    reason: format!("missing/invalid '{key}' in ASCII grid header"),
                })
        };

        let cols = parse("ncols")? as i32;
        let rows = parse("nrows")? as i32;
        let origin_x = parse("xllcorner")?;
        let origin_y_ll = parse("yllcorner")?;
        let cell_size = parse("cellsize")?;
        let nodata = header.get("nodata_value").and_then(|v| v.parse::<f64>().ok());

        let mut values = Vec::with_capacity((rows * cols) as usize);
        for line in lines {
            let line = line?;
            for token in line.split_whitespace() {
                values.push(token.parse::<f64>().unwrap_or(nodata.unwrap_or(0.0)));
            }
        }

        Ok(Self {
            rows,
            cols,
            origin_x,
            origin_y: origin_y_ll + rows as f64 * cell_size,
            cell_size_x: cell_size,
            cell_size_y: -cell_size,
            values,
            nodata,
        })
    }

    /// Reads a CAMS-style GeoTIFF pattern file. Georeferencing comes
    /// from the TIFF's `ModelPixelScale`/`ModelTiepoint` tags; a file
    /// missing them cannot be sampled and is a malformed-row error.
    pub fn read_geotiff(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut decoder = Decoder::new(file)?;
        let (cols, rows) = decoder.dimensions()?;

        let pixel_scale = decoder
            .get_tag_f64_vec(tiff::tags::Tag::ModelPixelScaleTag)
            .map_err(|_| Error::MalformedRow {
                file: path.display().to_string(),
                reason: "missing ModelPixelScaleTag".to_string(),
            })?;
        let tiepoint = decoder
            .get_tag_f64_vec(tiff::tags::Tag::ModelTiepointTag)
            .map_err(|_| Error::MalformedRow {
                file: path.display().to_string(),
                reason: "missing ModelTiepointTag".to_string(),
            })?;

        let origin_x = tiepoint[3];
        let origin_y = tiepoint[4];
        let cell_size_x = pixel_scale[0];
        let cell_size_y = -pixel_scale[1];

        let values: Vec<f64> = match decoder.read_image()? {
            DecodingResult::F32(v) => v.into_iter().map(f64::from).collect(),
            DecodingResult::F64(v) => v,
            DecodingResult::U8(v) => v.into_iter().map(f64::from).collect(),
            DecodingResult::U16(v) => v.into_iter().map(f64::from).collect(),
            DecodingResult::U32(v) => v.into_iter().map(f64::from).collect(),
            DecodingResult::U64(v) => v.into_iter().map(|x| x as f64).collect(),
            DecodingResult::I8(v) => v.into_iter().map(f64::from).collect(),
            DecodingResult::I16(v) => v.into_iter().map(f64::from).collect(),
            DecodingResult::I32(v) => v.into_iter().map(f64::from).collect(),
            DecodingResult::I64(v) => v.into_iter().map(|x| x as f64).collect(),
        };

        Ok(Self {
            rows: rows as i32,
            cols: cols as i32,
            origin_x,
            origin_y,
            cell_size_x,
            cell_size_y,
            values,
            nodata: None,
        })
    }

    /// Reads a Flanders pattern table: the first sheet is a dense,
    /// header-less matrix of the fixed "Flanders 1km" grid (154 rows
    /// by 260 columns, Belgian Lambert72, origin at `(0, 296000)`
    /// with a 1 km cell size), one spreadsheet row per grid row
    /// top-to-bottom and one column per grid column left-to-right.
    /// Non-numeric cells (blank, text) are treated as zero.
    pub fn read_flanders_xlsx(path: &Path) -> Result<Self> {
        const ROWS: usize = 154;
        const COLS: usize = 260;

        let mut workbook: Xlsx<_> = open_workbook(path).map_err(|e| Error::Calamine(calamine::Error::Xlsx(e)))?;
        let sheet_name = workbook.sheet_names().first().cloned().ok_or_else(|| Error::MalformedRow {
            file: path.display().to_string(),
            reason: "Flanders pattern workbook has no sheets".to_string(),
        })?;
        let range = workbook.worksheet_range(&sheet_name).map_err(|e| Error::Calamine(calamine::Error::Xlsx(e)))?;

        if range.height() < ROWS || range.width() < COLS {
            return Err(Error::MalformedRow {
                file: path.display().to_string(),
                reason: format!("expected at least {ROWS}x{COLS} cells, sheet is {}x{}", range.height(), range.width()),
            });
        }

        let mut values = Vec::with_capacity(ROWS * COLS);
        for row in 0..ROWS {
            for col in 0..COLS {
                let value = match range.get((row, col)) {
                    Some(Data::Float(v)) => *v,
                    Some(Data::Int(v)) => *v as f64,
                    _ => 0.0,
                };
                values.push(value);
            }
        }

        Ok(Self {
            rows: ROWS as i32,
            cols: COLS as i32,
            origin_x: 0.0,
            origin_y: 296_000.0,
            cell_size_x: 1000.0,
            cell_size_y: -1000.0,
            values,
            nodata: None,
        })
    }
}

#[derive(Debug, Clone)]
pub enum PatternFile {
    AsciiGrid(PathBuf),
    GeoTiff(PathBuf),
    FlandersTable(PathBuf),
}

/// Maps each scanned pattern source id to the file it should be read
/// from, and lazily decodes it on first extraction.
#[derive(Default)]
pub struct PatternFileExtractor {
    files: HashMap<PatternSourceId, (PatternSourceKind, PatternFile)>,
}

impl PatternFileExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: PatternSourceId, kind: PatternSourceKind, file: PatternFile) {
        self.files.insert(id, (kind, file));
    }
}

impl RasterExtractor for PatternFileExtractor {
    fn extract_raw(&self, source: PatternSourceId, coverage: &CountryCoverage) -> emap_core::Result<Vec<f64>> {
        let Some((_, file)) = self.files.get(&source) else {
            return Err(emap_core::Error::InputDataError(format!("no pattern file registered for source {source:?}")));
        };

        let grid = match file {
            PatternFile::AsciiGrid(path) => RasterGrid::read_ascii_grid(path).map_err(|e| emap_core::Error::InputDataError(e.to_string()))?,
            PatternFile::GeoTiff(path) => RasterGrid::read_geotiff(path).map_err(|e| emap_core::Error::InputDataError(e.to_string()))?,
            PatternFile::FlandersTable(path) => RasterGrid::read_flanders_xlsx(path).map_err(|e| emap_core::Error::InputDataError(e.to_string()))?,
        };

        Ok(coverage
            .cells
            .iter()
            .map(|info| {
                let center_x = (info.rect.top_left().x() + info.rect.bottom_right().x()) / 2.0;
                let center_y = (info.rect.top_left().y() + info.rect.bottom_right().y()) / 2.0;
                grid.value_at(center_x, center_y)
            })
            .collect())
    }
}
