//! Per-task orchestration for the Cloudnet processing engine.
//!
//! The [`processor::Processor`] façade composes the HTTP clients, the NetCDF
//! diff engine and the science-stack boundary; the handler modules implement
//! one node each of the (product kind × task type) dispatch matrix:
//!
//! - [`instrument`] - Level-1b instrument products
//! - [`model`] - harmonized model files
//! - [`product`] - derived products (categorize, Level-2, MWR retrievals, L3)
//! - [`jobs`] - plot, qc, freeze, dvas and housekeeping tasks

pub mod checks;
pub mod instrument;
pub mod instrument_process;
pub mod jobs;
pub mod model;
pub mod plots;
pub mod processor;
pub mod product;
pub mod rawfiles;
pub mod science;

pub use processor::{
    InstrumentParams, ModelParams, ProcessParams, Processor, ProductParams, Uuids,
};
pub use science::{CommandScience, ScienceError, ScienceStack};
