//! Processing pipeline for harmonized model files.

use std::path::Path;

use cloudnet_common::{CloudnetError, CloudnetResult, RawFileStatus};
use netcdf_compare::{nc_difference, NcDiff};
use tracing::{info, warn};
use uuid::Uuid;

use crate::checks::check_model_completeness;
use crate::instrument::add_provenance;
use crate::processor::{ModelParams, ProcessParams, Processor};
use crate::science::TransformRequest;

/// Models without harmonization support.
const SKIP_MODELS: &[&str] = &["arpege"];

/// Run a `process` task for a model product.
pub async fn process_model(
    processor: &Processor,
    params: &ModelParams,
    directory: &Path,
) -> CloudnetResult<()> {
    if SKIP_MODELS.contains(&params.model.id.as_str()) {
        return Err(CloudnetError::skip(format!(
            "Processing {} not implemented yet",
            params.model.id
        )));
    }

    let upload_meta = processor
        .get_model_upload(params)
        .await?
        .ok_or_else(|| CloudnetError::skip("No valid model upload found"))?;

    let (full_paths, raw_uuids) = processor
        .download_raw_data(std::slice::from_ref(&upload_meta), directory)
        .await?;
    if full_paths.len() != 1 {
        return Err(CloudnetError::Internal(format!(
            "Found {} files",
            full_paths.len()
        )));
    }
    let raw_path = &full_paths[0];

    let wrapped = ProcessParams::Model(params.clone());
    let mut volatile = true;
    let existing_meta = processor.get_model_file(params).await?;
    let (product_uuid, filename, existing_file) = match &existing_meta {
        Some(existing) => {
            if !existing.volatile {
                warn!("Stable model file found.");
                volatile = false;
            }
            let path = processor
                .storage_api
                .download_product(existing, directory)
                .await?;
            (existing.uuid, existing.filename.clone(), Some(path))
        }
        None => (Uuid::new_v4(), generate_filename(params), None),
    };

    let new_file = directory.join("output.nc");
    let request = TransformRequest {
        product_id: "model".to_string(),
        site: processor.site_meta(&params.site),
        date: params.date,
        instrument: None,
        model_id: Some(params.model.id.clone()),
        uuid: Some(product_uuid),
        inputs: [("raw".to_string(), vec![raw_path.clone()])]
            .into_iter()
            .collect(),
        options: Default::default(),
        output_path: new_file.clone(),
    };
    processor
        .science
        .transform(&request)
        .await
        .map_err(|e| CloudnetError::from(e).into_skip())?;
    check_model_completeness(&new_file, &params.model.id).map_err(CloudnetError::into_skip)?;

    let volatile_pid = existing_meta.as_ref().and_then(|meta| meta.pid.clone());
    processor
        .pid_utils
        .add_pid_to_file(&new_file, volatile_pid.as_deref())
        .await
        .map_err(CloudnetError::into_skip)?;
    add_provenance(&new_file, None)?;

    if let Some(existing_file) = &existing_file {
        let difference = nc_difference(existing_file, &new_file)
            .map_err(|e| CloudnetError::NetCdf(e.to_string()))?;
        if difference == NcDiff::None {
            return Err(CloudnetError::skip(
                "Skipping PUT to data portal, file has not changed",
            ));
        }
    }

    // Model files are always replaced in place, even when stable.
    processor
        .upload_file(&wrapped, &new_file, &filename, volatile, true)
        .await?;

    if params.site.is_hidden() {
        info!("Skipping plotting for hidden site");
    } else {
        processor
            .create_and_upload_images(&new_file, "model", product_uuid, &filename, directory)
            .await?;
    }

    let qc_result = processor
        .upload_quality_report(&new_file, product_uuid, Some(&params.site), "model")
        .await?;
    let link = processor.config.file_landing_page_url(&product_uuid);
    match qc_result {
        Some(level) => info!("Updated model: {link} QC: {}", level.as_str().to_uppercase()),
        None => info!("Updated model: {link}"),
    }
    processor
        .update_statuses(&raw_uuids, RawFileStatus::Processed)
        .await?;
    Ok(())
}

/// Deterministic output filename for a fresh model file.
pub fn generate_filename(params: &ModelParams) -> String {
    format!(
        "{}_{}_{}.nc",
        params.date.format("%Y%m%d"),
        params.site.id,
        params.model.id
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::{model, product, site, test_date};

    #[test]
    fn model_filename() {
        let params = ModelParams {
            site: site("bucharest"),
            date: test_date(),
            product: product("model", &[]),
            model: model("ecmwf"),
        };
        assert_eq!(generate_filename(&params), "20201022_bucharest_ecmwf.nc");
    }

    #[test]
    fn arpege_is_skipped() {
        assert!(SKIP_MODELS.contains(&"arpege"));
    }
}
