//! Boundary to the scientific transformation stack.
//!
//! The numeric libraries (instrument readers, categorize retrieval, Level-2
//! algorithms, plotting, quality control) are external collaborators. They
//! are reached through the [`ScienceStack`] trait; the production
//! implementation spawns a configured command per operation and speaks JSON
//! over stdin/stdout:
//!
//! ```text
//! cloudnet-science <operation> < request.json > reply.json
//! ```
//!
//! An error reply is `{"error": {"kind": "...", "message": "..."}}` where
//! `kind` is `raw-data-missing`, `misc` or `not-implemented`; these map onto
//! the engine's error taxonomy so handlers can turn them into task skips.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use chrono::NaiveDate;
use cloudnet_common::{CloudnetError, ImageDimensions, QualityReport, RawFileMetadata};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;
use uuid::Uuid;

/// Errors surfaced by the science stack.
#[derive(Debug, Error)]
pub enum ScienceError {
    #[error("{0}")]
    RawDataMissing(String),

    #[error("{0}")]
    Misc(String),

    #[error("{0}")]
    NotImplemented(String),

    /// The model input was unusable for the retrieval.
    #[error("{0}")]
    ModelData(String),

    #[error("{0}")]
    Failed(String),
}

impl From<ScienceError> for CloudnetError {
    fn from(err: ScienceError) -> Self {
        match err {
            ScienceError::RawDataMissing(msg) => CloudnetError::RawDataMissing(msg),
            ScienceError::Misc(msg) => CloudnetError::Misc(msg),
            ScienceError::NotImplemented(_) => {
                CloudnetError::SkipTask("Processing not implemented yet".to_string())
            }
            ScienceError::ModelData(msg) => CloudnetError::Misc(msg),
            ScienceError::Failed(msg) => CloudnetError::Science(msg),
        }
    }
}

/// Site description passed to transforms.
#[derive(Debug, Clone, Serialize)]
pub struct SiteMeta {
    pub id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

/// Instrument description passed to transforms.
#[derive(Debug, Clone, Serialize)]
pub struct InstrumentMeta {
    pub uuid: Uuid,
    pub pid: String,
    pub instrument_id: String,
}

/// One product transformation: inputs grouped by role, options, output path.
#[derive(Debug, Clone, Serialize)]
pub struct TransformRequest {
    pub product_id: String,
    pub site: SiteMeta,
    pub date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instrument: Option<InstrumentMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    /// Volatile UUID to reuse, when replacing an existing volatile file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,
    pub inputs: BTreeMap<String, Vec<PathBuf>>,
    pub options: serde_json::Map<String, serde_json::Value>,
    pub output_path: PathBuf,
}

impl TransformRequest {
    pub fn input(&mut self, role: &str, paths: Vec<PathBuf>) -> &mut Self {
        self.inputs.insert(role.to_string(), paths);
        self
    }

    pub fn option(&mut self, key: &str, value: impl Into<serde_json::Value>) -> &mut Self {
        self.options.insert(key.to_string(), value.into());
        self
    }
}

/// Reply from a transformation.
#[derive(Debug, Clone, Deserialize)]
pub struct TransformReply {
    /// UUID written into the produced file.
    pub uuid: Uuid,
    /// Subset of the raw inputs that were actually used, when the reader
    /// rejects some files. `None` means all inputs were used.
    #[serde(default)]
    pub valid_inputs: Option<Vec<PathBuf>>,
}

/// Render the given fields of a product file to PNGs.
#[derive(Debug, Clone, Serialize)]
pub struct PlotRequest {
    pub input: PathBuf,
    pub product_id: String,
    pub fields: Vec<String>,
    pub max_altitude_km: u32,
    pub output_dir: PathBuf,
}

/// One rendered quicklook. Fields that fail to plot are simply absent.
#[derive(Debug, Clone, Deserialize)]
pub struct RenderedImage {
    pub field: String,
    pub path: PathBuf,
    #[serde(default)]
    pub dimensions: Option<ImageDimensions>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QcRequest {
    pub input: PathBuf,
    pub product_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HousekeepingRequest {
    pub site_id: String,
    pub date: NaiveDate,
    pub instrument_id: String,
    pub instrument_pid: String,
    pub records: Vec<RawFileMetadata>,
}

/// The scientific transformation stack.
#[async_trait]
pub trait ScienceStack: Send + Sync {
    async fn transform(&self, request: &TransformRequest) -> Result<TransformReply, ScienceError>;

    async fn plot(&self, request: &PlotRequest) -> Result<Vec<RenderedImage>, ScienceError>;

    async fn quality_check(&self, request: &QcRequest) -> Result<QualityReport, ScienceError>;

    async fn housekeeping(&self, request: &HousekeepingRequest) -> Result<(), ScienceError>;
}

/// Production implementation: one subprocess per operation.
pub struct CommandScience {
    command: String,
}

impl CommandScience {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    async fn call<T: Serialize, R: DeserializeOwned>(
        &self,
        operation: &str,
        request: &T,
    ) -> Result<R, ScienceError> {
        debug!(command = %self.command, operation, "Invoking science stack");
        let mut child = Command::new(&self.command)
            .arg(operation)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ScienceError::Failed(format!("Failed to spawn {}: {e}", self.command)))?;

        let request_body = serde_json::to_vec(request)
            .map_err(|e| ScienceError::Failed(format!("Failed to encode request: {e}")))?;
        let mut stdin = child.stdin.take().expect("stdin piped");
        stdin
            .write_all(&request_body)
            .await
            .map_err(|e| ScienceError::Failed(format!("Failed to write request: {e}")))?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ScienceError::Failed(format!("Failed to wait for command: {e}")))?;

        let reply: serde_json::Value = match serde_json::from_slice(&output.stdout) {
            Ok(value) => value,
            Err(_) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(ScienceError::Failed(format!(
                    "{} {operation} exited with {}: {}",
                    self.command,
                    output.status,
                    stderr.chars().take(500).collect::<String>()
                )));
            }
        };

        if let Some(error) = reply.get("error") {
            let message = error
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error")
                .to_string();
            return Err(match error.get("kind").and_then(|v| v.as_str()) {
                Some("raw-data-missing") => ScienceError::RawDataMissing(message),
                Some("misc") => ScienceError::Misc(message),
                Some("model-data") => ScienceError::ModelData(message),
                Some("not-implemented") => ScienceError::NotImplemented(message),
                _ => ScienceError::Failed(message),
            });
        }

        serde_json::from_value(reply)
            .map_err(|e| ScienceError::Failed(format!("Invalid {operation} reply: {e}")))
    }
}

#[async_trait]
impl ScienceStack for CommandScience {
    async fn transform(&self, request: &TransformRequest) -> Result<TransformReply, ScienceError> {
        self.call("transform", request).await
    }

    async fn plot(&self, request: &PlotRequest) -> Result<Vec<RenderedImage>, ScienceError> {
        #[derive(Deserialize)]
        struct PlotReply {
            images: Vec<RenderedImage>,
        }
        let reply: PlotReply = self.call("plot", request).await?;
        Ok(reply.images)
    }

    async fn quality_check(&self, request: &QcRequest) -> Result<QualityReport, ScienceError> {
        self.call("qc", request).await
    }

    async fn housekeeping(&self, request: &HousekeepingRequest) -> Result<(), ScienceError> {
        #[derive(Deserialize)]
        struct HkdReply {}
        let _: HkdReply = self.call("hkd", request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn science_errors_map_to_taxonomy() {
        let err: CloudnetError = ScienceError::RawDataMissing("no files".into()).into();
        assert!(matches!(err, CloudnetError::RawDataMissing(_)));

        let err: CloudnetError = ScienceError::NotImplemented("mira-10".into()).into();
        assert!(err.is_skip());

        let err: CloudnetError = ScienceError::Failed("crash".into()).into();
        assert!(!err.into_skip().is_skip());
    }

    #[tokio::test]
    async fn command_reply_parsing() {
        // `cat` echoes the request back; a transform-shaped request is not a
        // valid reply so this must surface as a failure, not a panic.
        let science = CommandScience::new("cat");
        let request = QcRequest {
            input: PathBuf::from("/tmp/in.nc"),
            product_id: "radar".to_string(),
            site_id: None,
        };
        let result = science.quality_check(&request).await;
        assert!(matches!(result, Err(ScienceError::Failed(_))));
    }

    #[tokio::test]
    async fn missing_command_fails_cleanly() {
        let science = CommandScience::new("/nonexistent/science-command");
        let request = QcRequest {
            input: PathBuf::from("/tmp/in.nc"),
            product_id: "radar".to_string(),
            site_id: None,
        };
        assert!(matches!(
            science.quality_check(&request).await,
            Err(ScienceError::Failed(_))
        ));
    }
}
