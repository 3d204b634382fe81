//! HTTP clients for the external collaborators of the processing engine.
//!
//! - [`MetadataClient`] - the data portal metadata API and task queue
//! - [`StorageClient`] - the S3-compatible object store
//! - [`PidClient`] - the handle PID minting service
//! - [`DvasClient`] - the ACTRIS DVAS federation portal
//! - [`alert`] - Slack failure notifications
//!
//! All clients share a connection-pooled `reqwest::Client` owned by the
//! service that constructs them; transient failures are retried with bounded
//! exponential backoff inside [`retry`].

pub mod alert;
pub mod dvas;
pub mod metadata;
pub mod pid;
pub mod retry;
pub mod storage;

pub use dvas::DvasClient;
pub use metadata::MetadataClient;
pub use pid::{PidClient, PidResult};
pub use storage::{StorageClient, StorageUpload};
