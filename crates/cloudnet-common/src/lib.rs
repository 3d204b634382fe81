//! Shared domain types for the Cloudnet processing engine.

pub mod config;
pub mod error;
pub mod files;
pub mod task;
pub mod time;
pub mod types;

pub use config::Config;
pub use error::{CloudnetError, CloudnetResult};
pub use files::{
    ErrorLevel, ImageDimensions, ProductFileMetadata, ProductPutPayload, QualityException,
    QualityReport, QualityTest, RawFileMetadata, RawFileStatus, Timeliness, VisualizationPayload,
};
pub use task::{Task, TaskOptions, TaskPublish, TaskType};
pub use types::{Calibration, Instrument, Model, Product, ProductType, Site, SiteType};
