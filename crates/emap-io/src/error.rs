use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] emap_core::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("config error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("spreadsheet error: {0}")]
    Calamine(#[from] calamine::Error),
    #[error("raster error: {0}")]
    Tiff(#[from] tiff::TiffError),
    #[error("unrecognized {kind} code: {code}")]
    UnknownCode { kind: &'static str, code: String },
    #[error("malformed row in {file}: {reason}")]
    MalformedRow { file: String, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
