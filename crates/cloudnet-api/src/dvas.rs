//! Mirroring of frozen products to the ACTRIS DVAS federation.

use base64::Engine;
use chrono::NaiveDate;
use cloudnet_common::{
    CloudnetError, CloudnetResult, Config, ErrorLevel, ProductFileMetadata, Timeliness,
};
use reqwest::Client;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::metadata::MetadataClient;
use crate::retry::send_with_retry;

/// Files measured before this date are flagged as ACTRIS legacy data.
const ACTRIS_ASSOCIATION_DATE: &str = "2023-04-25";

/// A failure reported by the DVAS API itself. These are logged and swallowed
/// by `upload`; data portal failures propagate normally.
#[derive(Debug, Error)]
#[error("DVAS API error: {0}")]
struct DvasApiError(String);

/// Client for the DVAS federation portal.
#[derive(Clone)]
pub struct DvasClient {
    client: Client,
    config: Config,
}

impl DvasClient {
    pub fn new(config: &Config, client: Client) -> Self {
        Self {
            client,
            config: config.clone(),
        }
    }

    /// Upload file metadata to DVAS and record the assigned id in the data
    /// portal. Ineligible files are logged and skipped.
    pub async fn upload(
        &self,
        md_api: &MetadataClient,
        file: &ProductFileMetadata,
    ) -> CloudnetResult<()> {
        let landing_page_url = self.config.file_landing_page_url(&file.uuid);
        info!(url = %landing_page_url, "Uploading metadata to DVAS");
        if file.pid.is_none() {
            error!("Skipping - volatile file");
            return Ok(());
        }
        let Some(product) = file.product.as_ref() else {
            error!("Skipping - file has no product metadata");
            return Ok(());
        };
        if !product.is_geophysical() {
            error!("Skipping - only geophysical products supported for now");
            return Ok(());
        }
        if product.id.contains("categorize") {
            error!("Skipping - categorize file");
            return Ok(());
        }
        if file.site.as_ref().and_then(|s| s.dvas_id.as_ref()).is_none() {
            error!("Skipping - not DVAS site");
            return Ok(());
        }

        let dvas_json = self.create_dvas_json(md_api, file).await?;
        let n_variables = dvas_json["md_content_information"]["attribute_descriptions"]
            .as_array()
            .map_or(0, Vec::len);
        if n_variables == 0 {
            error!("Skipping - no ACTRIS variables");
            return Ok(());
        }

        self.delete_old_versions(md_api, file).await?;

        match self.post(&dvas_json).await {
            Ok(dvas_id) => {
                let timestamp = dvas_json["md_metadata"]["datestamp"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                md_api
                    .update_dvas_info(&file.uuid, &timestamp, dvas_id)
                    .await?;
            }
            Err(err) => {
                error!(filename = %file.filename, "Failed to upload to DVAS");
                debug!(error = %err, "DVAS upload failure");
            }
        }
        Ok(())
    }

    /// Delete file metadata from DVAS by its id.
    pub async fn delete(&self, file: &ProductFileMetadata) -> CloudnetResult<()> {
        let Some(dvas_id) = file.dvas_id else {
            return Err(CloudnetError::Internal(
                "Cannot delete file without dvasId".to_string(),
            ));
        };
        warn!(uuid = %file.uuid, dvas_id, "Deleting file from DVAS");
        let url = format!("{}/Metadata/delete/{dvas_id}", self.config.dvas_portal_url);
        self.delete_url(&url)
            .await
            .map_err(|e| CloudnetError::Http {
                status: None,
                message: e.to_string(),
            })
    }

    /// Purge the full CLU provider namespace. Operator action.
    pub async fn delete_all(&self) -> CloudnetResult<()> {
        let url = format!(
            "{}/Metadata/delete/all/{}",
            self.config.dvas_portal_url, self.config.dvas_provider_id
        );
        self.delete_url(&url)
            .await
            .map_err(|e| CloudnetError::Http {
                status: None,
                message: e.to_string(),
            })?;
        info!("Done. All Cloudnet files deleted from DVAS");
        Ok(())
    }

    /// Delete earlier DVAS versions of the same file before posting a new one.
    async fn delete_old_versions(
        &self,
        md_api: &MetadataClient,
        file: &ProductFileMetadata,
    ) -> CloudnetResult<()> {
        let versions = md_api.file_versions(&file.uuid).await?;
        for version in versions {
            if version.dvas_id.is_none() {
                continue;
            }
            debug!(uuid = %version.uuid, filename = %file.filename, "Deleting old version");
            if let Err(err) = self.delete(&version).await {
                error!(dvas_id = ?version.dvas_id, "Failed to delete from DVAS");
                debug!(error = %err, "DVAS delete failure");
            }
        }
        Ok(())
    }

    async fn post(&self, metadata: &Value) -> Result<i64, DvasApiError> {
        let url = format!("{}/Metadata/add", self.config.dvas_portal_url);
        let request = self
            .client
            .post(&url)
            .header(
                "X-Authorization",
                format!("Bearer {}", self.config.dvas_access_token),
            )
            .json(metadata);
        let response = send_with_retry(request)
            .await
            .map_err(|e| DvasApiError(format!("POST failed: {e}")))?;
        debug!(status = response.status().as_u16(), "POST to DVAS API successful");
        let location = response
            .headers()
            .get("Location")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| DvasApiError("Missing Location header".to_string()))?;
        location
            .rsplit('/')
            .next()
            .and_then(|id| id.parse().ok())
            .ok_or_else(|| DvasApiError(format!("Invalid Location header: {location}")))
    }

    async fn delete_url(&self, url: &str) -> Result<(), DvasApiError> {
        let credentials = base64::engine::general_purpose::STANDARD.encode(format!(
            "{}:{}",
            self.config.dvas_username, self.config.dvas_password
        ));
        let request = self
            .client
            .delete(url)
            .header("X-Authorization", format!("Basic {credentials}"));
        let response = send_with_retry(request)
            .await
            .map_err(|e| DvasApiError(format!("DELETE failed: {e}")))?;
        debug!(status = response.status().as_u16(), "DELETE successful");
        Ok(())
    }

    /// Build the DVAS metadata document from file metadata.
    async fn create_dvas_json(
        &self,
        md_api: &MetadataClient,
        file: &ProductFileMetadata,
    ) -> CloudnetResult<Value> {
        let product = file.product.as_ref().expect("eligibility checked");
        let site = file.site.as_ref().expect("eligibility checked");

        let time_begin = file
            .start_time
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| format!("{}T00:00:00.0000000Z", file.measurement_date));
        let time_end = file
            .stop_time
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| format!("{}T23:59:59.9999999Z", file.measurement_date));
        let title = format!(
            "{} data derived from cloud remote sensing measurements at {}",
            product.human_readable_name, site.human_readable_name
        );

        let variable_names = self.parse_variable_names(md_api, &product.id).await?;
        let instrument_types = self.find_instrument_types(md_api, file).await?;
        let citation = md_api.reference_text(&file.uuid, "citation").await?;
        let acknowledgements = md_api.reference_text(&file.uuid, "acknowledgements").await?;

        let timeliness = parse_timeliness(file.timeliness);
        let file_size_mb = (file.size as f64 / 1000.0 / 1000.0 * 1000.0).round() / 1000.0;

        Ok(json!({
            "md_metadata": {
                "file_identifier": file.filename,
                "language": "en",
                "hierarchy_level": "dataset",
                "online_resource": {"linkage": "https://cloudnet.fmi.fi/"},
                "datestamp": chrono::Utc::now().to_rfc3339(),
                "contact": [{
                    "first_name": "Ewan",
                    "last_name": "O'Connor",
                    "organisation_name": "Finnish Meteorological Institute (FMI)",
                    "role_code": ["pointOfContact"],
                    "country_code": "FI",
                }],
            },
            "md_identification": {
                "abstract": title,
                "title": title,
                "date_type": "creation",
                "contact": [{
                    "first_name": "Simo",
                    "last_name": "Tukiainen",
                    "organisation_name": "Finnish Meteorological Institute (FMI)",
                    "role_code": ["processor"],
                    "country_code": "FI",
                }],
                "online_resource": {"linkage": self.config.file_landing_page_url(&file.uuid)},
                "identifier": {"pid": file.pid, "type": "handle"},
                "date": time_begin,
            },
            "md_constraints": {
                "access_constraints": "license",
                "use_constraints": "license",
                "other_constraints": "N/A",
                "data_licence": "CC-BY-4.0",
                "metadata_licence": "CC-BY-4.0",
                "citation": citation,
                "acknowledgement": acknowledgements,
            },
            "md_keywords": {
                "keywords": ["FMI", "ACTRIS", product.human_readable_name],
            },
            "md_data_identification": {
                "language": "en",
                "topic_category": "climatologyMeteorologyAtmosphere",
                "description": "time series of profile measurements",
                "facility_identifier": site.dvas_id,
            },
            "ex_geographic_bounding_box": {
                "west_bound_longitude": site.longitude,
                "east_bound_longitude": site.longitude,
                "south_bound_latitude": site.latitude,
                "north_bound_latitude": site.latitude,
            },
            "ex_temporal_extent": {
                "time_period_begin": time_begin,
                "time_period_end": time_end,
            },
            "md_content_information": {
                "attribute_descriptions": variable_names,
                "content_type": "physicalMeasurement",
            },
            "md_distribution_information": [{
                "data_format": "netcdf",
                "version_data_format": file.format,
                "dataset_url": file.download_url,
                "protocol": "HTTP",
                "transfersize": file_size_mb,
                "description": "Direct download of data file",
                "function": "download",
                "restriction": {"set": false},
            }],
            "md_actris_specific": {
                "facility_type": "observation platform, fixed",
                "product_type": "observation",
                "matrix": "cloud phase",
                "sub_matrix": null,
                "instrument_type": instrument_types,
                "program_affiliation": parse_affiliation(site),
                "variable_statistical_property": null,
                "legacy_data": file.legacy,
                "observation_timeliness": timeliness,
                "data_product": format!("{timeliness} data"),
            },
            "dq_data_quality_information": {
                "level": "dataset",
                "compliance": parse_compliance(file.measurement_date),
                "quality_control_extent": "full quality control applied",
                "quality_control_outcome": parse_qc_outcome(file.error_level),
            },
        }))
    }

    /// ACTRIS variable names defined for the product.
    async fn parse_variable_names(
        &self,
        md_api: &MetadataClient,
        product_id: &str,
    ) -> CloudnetResult<Vec<String>> {
        let variables = md_api.product_variables().await?;
        let names = variables
            .as_array()
            .into_iter()
            .flatten()
            .filter(|entry| entry["id"].as_str() == Some(product_id))
            .flat_map(|entry| entry["variables"].as_array().cloned().unwrap_or_default())
            .filter_map(|var| var["actrisName"].as_str().map(str::to_string))
            .collect();
        Ok(names)
    }

    /// Gather instrument types from the file's source ancestry.
    async fn find_instrument_types(
        &self,
        md_api: &MetadataClient,
        file: &ProductFileMetadata,
    ) -> CloudnetResult<Vec<String>> {
        let mut dvas_instruments = Vec::new();
        let mut pending = vec![file.uuid];
        while let Some(uuid) = pending.pop() {
            let metadata = md_api.file(&uuid).await?;
            if let Some(instrument) = &metadata.instrument {
                match dvas_instrument_type(&instrument.instrument_id) {
                    Some(name) => dvas_instruments.push(name.to_string()),
                    None => debug!(
                        instrument = %instrument.instrument_id,
                        "No DVAS instrument type mapping"
                    ),
                }
            }
            pending.extend(metadata.source_file_ids);
        }
        Ok(dvas_instruments)
    }
}

// Vocabulary: https://prod-actris-md.nilu.no/vocabulary/instrumenttype
fn dvas_instrument_type(instrument_id: &str) -> Option<&'static str> {
    // Source products carry the generic instrument category in their
    // instrument record, not a hardware model id.
    match instrument_id {
        "radar" => Some("cloud radar"),
        "lidar" => Some("lidar"),
        "mwr" => Some("microwave radiometer"),
        "disdrometer" => Some("particle size spectrometer"),
        "doppler-lidar" => Some("Doppler lidar"),
        _ => None,
    }
}

// Vocabulary: https://prod-actris-md.nilu.no/vocabulary/networkprogram
fn parse_affiliation(site: &cloudnet_common::Site) -> Vec<&'static str> {
    let mut affiliation = vec!["CLOUDNET"];
    if site.types.contains(&cloudnet_common::SiteType::Arm) {
        affiliation.push("ARM");
    }
    if site.types.contains(&cloudnet_common::SiteType::Cloudnet) {
        affiliation.push("ACTRIS");
    }
    affiliation
}

// Vocabulary: https://prod-actris-md.nilu.no/vocabulary/observationtimeliness
fn parse_timeliness(timeliness: Option<Timeliness>) -> &'static str {
    match timeliness {
        Some(Timeliness::Nrt) => "near real-time",
        Some(Timeliness::Rrt) => "real real-time",
        Some(Timeliness::Scheduled) | None => "scheduled",
    }
}

fn parse_compliance(measurement_date: NaiveDate) -> &'static str {
    let association_date: NaiveDate = ACTRIS_ASSOCIATION_DATE.parse().expect("valid date");
    if measurement_date < association_date {
        "ACTRIS legacy"
    } else {
        "ACTRIS associated"
    }
}

fn parse_qc_outcome(error_level: Option<ErrorLevel>) -> &'static str {
    match error_level {
        Some(ErrorLevel::Pass) => "1 - Good",
        Some(ErrorLevel::Info) | Some(ErrorLevel::Warning) => "3 - Questionable/suspect",
        Some(ErrorLevel::Error) => "4 - Bad",
        None => "2 - Not evaluated, not available or unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compliance_boundary() {
        let legacy: NaiveDate = "2023-04-24".parse().unwrap();
        let associated: NaiveDate = "2023-04-25".parse().unwrap();
        assert_eq!(parse_compliance(legacy), "ACTRIS legacy");
        assert_eq!(parse_compliance(associated), "ACTRIS associated");
    }

    #[test]
    fn qc_outcome_mapping() {
        assert_eq!(parse_qc_outcome(Some(ErrorLevel::Pass)), "1 - Good");
        assert_eq!(
            parse_qc_outcome(Some(ErrorLevel::Warning)),
            "3 - Questionable/suspect"
        );
        assert_eq!(parse_qc_outcome(Some(ErrorLevel::Error)), "4 - Bad");
        assert_eq!(
            parse_qc_outcome(None),
            "2 - Not evaluated, not available or unknown"
        );
    }

    #[test]
    fn timeliness_mapping() {
        assert_eq!(parse_timeliness(Some(Timeliness::Nrt)), "near real-time");
        assert_eq!(parse_timeliness(None), "scheduled");
    }

    #[test]
    fn instrument_type_mapping() {
        assert_eq!(dvas_instrument_type("radar"), Some("cloud radar"));
        assert_eq!(dvas_instrument_type("unknown-thing"), None);
    }
}
