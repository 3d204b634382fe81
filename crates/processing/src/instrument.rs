//! Processing pipeline for instrument Level-1b products.

use std::path::Path;

use cloudnet_common::{CloudnetError, CloudnetResult, RawFileStatus};
use netcdf_compare::{nc_difference, NcDiff};
use tracing::info;

use crate::instrument_process::run_transform;
use crate::jobs::process_housekeeping;
use crate::processor::{InstrumentParams, ProcessParams, Processor, Uuids};

/// Run a `process` task for an instrument product.
pub async fn process_instrument(
    processor: &Processor,
    params: &InstrumentParams,
    directory: &Path,
) -> CloudnetResult<()> {
    let mut uuids = Uuids::default();
    let mut pid_to_new_file = None;
    let wrapped = ProcessParams::Instrument(params.clone());

    let existing_product = processor.fetch_product(&wrapped).await?;
    let (filename, existing_file) = match &existing_product {
        Some(existing) => {
            if existing.volatile {
                uuids.volatile = Some(existing.uuid);
                pid_to_new_file = existing.pid.clone();
            }
            let path = processor
                .storage_api
                .download_product(existing, directory)
                .await?;
            (existing.filename.clone(), Some(path))
        }
        None => (generate_filename(params), None),
    };

    let volatile = existing_file.is_none() || uuids.volatile.is_some();

    let new_file = run_transform(processor, params, &mut uuids, directory)
        .await
        .map_err(CloudnetError::into_skip)?;

    if !params.product.experimental {
        processor
            .pid_utils
            .add_pid_to_file(&new_file, pid_to_new_file.as_deref())
            .await?;
    }

    add_provenance(&new_file, Some(&params.instrument.pid))?;

    let mut upload = true;
    let mut patch = false;
    let mut output_file = new_file.clone();
    if let (Some(existing), Some(existing_file)) = (&existing_product, &existing_file) {
        match nc_difference(existing_file, &new_file)
            .map_err(|e| CloudnetError::NetCdf(e.to_string()))?
        {
            NcDiff::None => {
                upload = false;
                output_file = existing_file.clone();
                uuids.product = Some(existing.uuid);
            }
            NcDiff::Minor => {
                // Replace the existing file, keeping its identity.
                patch = true;
                if !params.product.experimental {
                    processor
                        .pid_utils
                        .add_pid_to_file(&new_file, existing.pid.as_deref())
                        .await?;
                }
                netcdf_compare::write_global_attrs(
                    &new_file,
                    &[("file_uuid", &existing.uuid.to_string())],
                )
                .map_err(|e| CloudnetError::NetCdf(e.to_string()))?;
                uuids.product = Some(existing.uuid);
            }
            NcDiff::Major => {}
        }
    }

    if upload {
        processor
            .upload_file(&wrapped, &output_file, &filename, volatile, patch)
            .await?;
    } else {
        info!("Skipping PUT to data portal, file has not changed");
    }

    let product_uuid = uuids
        .product
        .ok_or_else(|| CloudnetError::Internal("Transform produced no UUID".to_string()))?;
    processor
        .create_and_upload_images(&output_file, &params.product.id, product_uuid, &filename, directory)
        .await?;
    let qc_result = processor
        .upload_quality_report(&output_file, product_uuid, Some(&params.site), &params.product.id)
        .await?;
    processor
        .update_statuses(&uuids.raw, RawFileStatus::Processed)
        .await?;
    processor.print_info(&uuids, volatile, patch, upload, qc_result);

    if processor.config.is_production {
        process_housekeeping(processor, params).await;
    }
    Ok(())
}

/// Deterministic output filename for a fresh instrument product.
pub fn generate_filename(params: &InstrumentParams) -> String {
    let mut identifier = params.instrument.instrument_id.clone();
    if params.product.id == "mwr-l1c" {
        identifier.push_str("-l1c");
    } else if params.instrument.instrument_id == "halo-doppler-lidar-calibrated" {
        identifier = "halo-doppler-lidar".to_string();
    } else if params.product.id == "doppler-lidar-wind" {
        identifier.push_str("-wind");
    }
    format!(
        "{}_{}_{}_{}.nc",
        params.date.format("%Y%m%d"),
        params.site.id,
        identifier,
        params.instrument.uuid_prefix()
    )
}

/// Stamp processing-version and instrument-PID provenance attributes.
pub fn add_provenance(full_path: &Path, instrument_pid: Option<&str>) -> CloudnetResult<()> {
    let version = env!("CARGO_PKG_VERSION");
    let mut attrs = vec![("processing_version", version)];
    if let Some(pid) = instrument_pid {
        attrs.push(("instrument_pid", pid));
    }
    netcdf_compare::write_global_attrs(full_path, &attrs)
        .map_err(|e| CloudnetError::NetCdf(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::{instrument, instrument_product, site, test_date};

    fn params(product_id: &str, instrument_id: &str) -> InstrumentParams {
        InstrumentParams {
            site: site("bucharest"),
            date: test_date(),
            product: instrument_product(product_id),
            instrument: instrument(instrument_id),
        }
    }

    #[test]
    fn radar_filename() {
        let params = params("radar", "rpg-fmcw-94");
        let prefix = params.instrument.uuid_prefix();
        assert_eq!(
            generate_filename(&params),
            format!("20201022_bucharest_rpg-fmcw-94_{prefix}.nc")
        );
    }

    #[test]
    fn mwr_l1c_filename_has_suffix() {
        let params = params("mwr-l1c", "hatpro");
        assert!(generate_filename(&params).contains("_hatpro-l1c_"));
    }

    #[test]
    fn doppler_lidar_wind_filename() {
        let params = params("doppler-lidar-wind", "halo-doppler-lidar");
        assert!(generate_filename(&params).contains("_halo-doppler-lidar-wind_"));
    }

    #[test]
    fn calibrated_halo_filename_drops_suffix() {
        let params = params("lidar", "halo-doppler-lidar-calibrated");
        assert!(generate_filename(&params).contains("_halo-doppler-lidar_"));
        assert!(!generate_filename(&params).contains("calibrated"));
    }
}
