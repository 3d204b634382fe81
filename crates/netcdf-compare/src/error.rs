//! Error types for NetCDF access.

use thiserror::Error;

/// Errors that can occur while reading or comparing NetCDF files.
#[derive(Error, Debug)]
pub enum NcError {
    #[error("Failed to read file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Invalid NetCDF data: {0}")]
    InvalidFormat(String),

    #[error("Missing data: {0}")]
    MissingData(String),
}

impl From<netcdf::Error> for NcError {
    fn from(err: netcdf::Error) -> Self {
        NcError::InvalidFormat(err.to_string())
    }
}

/// Result type for NetCDF operations.
pub type NcResult<T> = std::result::Result<T, NcError>;
