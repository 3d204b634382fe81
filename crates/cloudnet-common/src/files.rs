//! Metadata records for raw uploads and processed product files.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::types::{Instrument, Model, Product, Site};

/// Lifecycle status of a raw upload. Only ever advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RawFileStatus {
    Uploaded,
    Processed,
    Invalid,
}

/// Worst severity found by quality control. Ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorLevel {
    Pass,
    Info,
    Warning,
    Error,
}

impl ErrorLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorLevel::Pass => "pass",
            ErrorLevel::Info => "info",
            ErrorLevel::Warning => "warning",
            ErrorLevel::Error => "error",
        }
    }
}

/// Delivery timeliness of a product file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timeliness {
    Nrt,
    Rrt,
    Scheduled,
}

/// A raw instrument or model upload, as listed by the data portal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFileMetadata {
    pub uuid: Uuid,
    pub filename: String,
    /// MD5 hex digest of the file contents.
    pub checksum: String,
    #[serde(deserialize_with = "number_or_string")]
    pub size: u64,
    pub s3key: String,
    pub measurement_date: NaiveDate,
    pub status: RawFileStatus,
    #[serde(default)]
    pub site: Option<Site>,
    #[serde(default)]
    pub instrument: Option<Instrument>,
    #[serde(default)]
    pub instrument_pid: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A processed product file, as listed by the data portal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductFileMetadata {
    pub uuid: Uuid,
    pub filename: String,
    /// SHA-256 hex digest of the file contents.
    pub checksum: String,
    #[serde(deserialize_with = "number_or_string")]
    pub size: u64,
    pub measurement_date: NaiveDate,
    pub volatile: bool,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub pid: Option<String>,
    #[serde(default)]
    pub legacy: bool,
    #[serde(default)]
    pub dvas_id: Option<i64>,
    #[serde(default)]
    pub dvas_updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_level: Option<ErrorLevel>,
    #[serde(default)]
    pub source_file_ids: Vec<Uuid>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub timeliness: Option<Timeliness>,
    #[serde(default)]
    pub site: Option<Site>,
    #[serde(default)]
    pub product: Option<Product>,
    #[serde(default)]
    pub instrument: Option<Instrument>,
    #[serde(default)]
    pub model: Option<Model>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stop_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub download_url: Option<String>,
}

impl ProductFileMetadata {
    /// Object-store key, accounting for legacy files living under `legacy/`.
    pub fn s3key(&self) -> String {
        if self.legacy {
            format!("legacy/{}", self.filename)
        } else {
            self.filename.clone()
        }
    }

    pub fn site_id(&self) -> Option<&str> {
        self.site.as_ref().map(|s| s.id.as_str())
    }

    pub fn product_id(&self) -> Option<&str> {
        self.product.as_ref().map(|p| p.id.as_str())
    }

    pub fn model_id(&self) -> Option<&str> {
        self.model.as_ref().map(|m| m.id.as_str())
    }

    pub fn instrument_info_uuid(&self) -> Option<Uuid> {
        self.instrument.as_ref().map(|i| i.uuid)
    }
}

/// Body of `PUT /files/{filename}` describing a freshly produced file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductPutPayload {
    pub uuid: Uuid,
    pub checksum: String,
    pub measurement_date: NaiveDate,
    pub format: String,
    pub size: u64,
    pub volatile: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloudnetpy_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub site: String,
    pub product: String,
    pub source_file_ids: Vec<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instrument_pid: Option<String>,
    pub legacy: bool,
    pub patch: bool,
}

/// One rendered quicklook image.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualizationPayload {
    pub source_file_id: Uuid,
    pub variable_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<ImageDimensions>,
}

/// Pixel geometry of a rendered image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
    pub margin_top: u32,
    pub margin_right: u32,
    pub margin_bottom: u32,
    pub margin_left: u32,
}

/// Quality-control report uploaded to `PUT /quality/{uuid}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityReport {
    pub timestamp: DateTime<Utc>,
    pub qc_version: String,
    pub tests: Vec<QualityTest>,
}

impl QualityReport {
    /// Worst severity across all test exceptions, `Pass` when clean.
    pub fn worst_level(&self) -> ErrorLevel {
        self.tests
            .iter()
            .flat_map(|t| t.exceptions.iter())
            .map(|e| e.result)
            .max()
            .unwrap_or(ErrorLevel::Pass)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityTest {
    pub test_id: String,
    #[serde(default)]
    pub exceptions: Vec<QualityException>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityException {
    pub result: ErrorLevel,
    pub message: String,
}

/// The portal serializes file sizes inconsistently (number or string).
fn number_or_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(u64),
        String(String),
    }
    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

/// Volatile files report their PID as null or an empty string.
fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_level_ordering() {
        assert!(ErrorLevel::Pass < ErrorLevel::Info);
        assert!(ErrorLevel::Info < ErrorLevel::Warning);
        assert!(ErrorLevel::Warning < ErrorLevel::Error);
    }

    #[test]
    fn raw_file_size_as_string() {
        let json = r#"{
            "uuid": "123e4567-e89b-12d3-a456-426614174000",
            "filename": "file1.LV1",
            "checksum": "d41d8cd98f00b204e9800998ecf8427e",
            "size": "120451",
            "s3key": "bucharest/file1.LV1",
            "measurementDate": "2020-10-22",
            "status": "uploaded"
        }"#;
        let raw: RawFileMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(raw.size, 120_451);
        assert_eq!(raw.status, RawFileStatus::Uploaded);
        assert!(raw.tags.is_empty());
    }

    #[test]
    fn product_file_empty_pid_is_none() {
        let json = r#"{
            "uuid": "123e4567-e89b-12d3-a456-426614174000",
            "filename": "20201022_bucharest_radar.nc",
            "checksum": "aa",
            "size": 100,
            "measurementDate": "2020-10-22",
            "volatile": true,
            "pid": ""
        }"#;
        let file: ProductFileMetadata = serde_json::from_str(json).unwrap();
        assert!(file.pid.is_none());
        assert!(file.volatile);
        assert_eq!(file.s3key(), "20201022_bucharest_radar.nc");
    }

    #[test]
    fn legacy_s3key_has_prefix() {
        let json = r#"{
            "uuid": "123e4567-e89b-12d3-a456-426614174000",
            "filename": "old.nc",
            "checksum": "aa",
            "size": 100,
            "measurementDate": "2010-01-01",
            "volatile": false,
            "pid": "https://hdl.handle.net/123/x",
            "legacy": true
        }"#;
        let file: ProductFileMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(file.s3key(), "legacy/old.nc");
        assert_eq!(file.pid.as_deref(), Some("https://hdl.handle.net/123/x"));
    }

    #[test]
    fn quality_report_worst_level() {
        let report = QualityReport {
            timestamp: Utc::now(),
            qc_version: "1.0".to_string(),
            tests: vec![
                QualityTest {
                    test_id: "TestUnits".to_string(),
                    exceptions: vec![],
                },
                QualityTest {
                    test_id: "TestCoverage".to_string(),
                    exceptions: vec![
                        QualityException {
                            result: ErrorLevel::Info,
                            message: "partial day".to_string(),
                        },
                        QualityException {
                            result: ErrorLevel::Warning,
                            message: "gaps".to_string(),
                        },
                    ],
                },
            ],
        };
        assert_eq!(report.worst_level(), ErrorLevel::Warning);

        let clean = QualityReport {
            timestamp: Utc::now(),
            qc_version: "1.0".to_string(),
            tests: vec![],
        };
        assert_eq!(clean.worst_level(), ErrorLevel::Pass);
    }
}
