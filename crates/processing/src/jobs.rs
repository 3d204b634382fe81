//! Non-process task routines: plot regeneration, quality control, freezing,
//! DVAS upload and housekeeping.

use std::path::{Path, PathBuf};

use chrono::{Datelike, Duration};
use cloudnet_common::{CloudnetError, CloudnetResult, ProductFileMetadata, RawFileMetadata};
use cloudnet_common::time::utc_today;
use tracing::{error, info};

use crate::processor::{InstrumentParams, ProcessParams, Processor};
use crate::science::HousekeepingRequest;

/// Regenerate and re-upload the plots of an existing product.
pub async fn update_plots(
    processor: &Processor,
    params: &ProcessParams,
    directory: &Path,
) -> CloudnetResult<()> {
    let (metadata, full_path) = fetch_data(processor, params, directory).await?;
    match params {
        ProcessParams::Model(p) if p.product.is_evaluation() => {
            processor
                .create_and_upload_l3_images(
                    &full_path,
                    &p.product.id,
                    &p.model.id,
                    metadata.uuid,
                    &metadata.filename,
                    directory,
                )
                .await?;
        }
        _ => {
            processor
                .create_and_upload_images(
                    &full_path,
                    &params.product().id,
                    metadata.uuid,
                    &metadata.filename,
                    directory,
                )
                .await?;
        }
    }
    let url = processor.config.file_landing_page_url(&metadata.uuid);
    info!("Plots updated: {url}/visualizations");
    Ok(())
}

/// Re-run quality control on an existing product.
pub async fn update_qc(
    processor: &Processor,
    params: &ProcessParams,
    directory: &Path,
) -> CloudnetResult<()> {
    let (metadata, full_path) = fetch_data(processor, params, directory).await?;
    let result = processor
        .upload_quality_report(
            &full_path,
            metadata.uuid,
            Some(params.site()),
            &params.product().id,
        )
        .await?;
    let url = processor.config.file_landing_page_url(&metadata.uuid);
    let result_str = result.map_or("FATAL".to_string(), |level| {
        level.as_str().to_uppercase()
    });
    info!("Created quality report: {url}/quality {result_str}");
    Ok(())
}

/// Freeze a volatile product: mint its PID, move it to the stable bucket and
/// drop the volatile object.
pub async fn freeze(
    processor: &Processor,
    params: &ProcessParams,
    directory: &Path,
) -> CloudnetResult<()> {
    let (metadata, full_path) = fetch_data(processor, params, directory).await?;
    if metadata.pid.is_some() {
        return Err(CloudnetError::skip("Product already frozen"));
    }
    info!(uuid = %metadata.uuid, "Freezing product");
    let pid_result = processor.pid_utils.add_pid_to_file(&full_path, None).await?;
    processor
        .upload_file(params, &full_path, &metadata.filename, false, true)
        .await?;
    processor
        .storage_api
        .delete_volatile_product(&metadata.s3key())
        .await?;
    info!(
        "Minted PID \"{}\" to URL \"{}\"",
        pid_result.pid, pid_result.landing_url
    );
    Ok(())
}

/// Mirror a frozen product's metadata to the DVAS federation.
pub async fn upload_to_dvas(processor: &Processor, params: &ProcessParams) -> CloudnetResult<()> {
    let metadata = processor
        .fetch_product(params)
        .await?
        .ok_or_else(|| CloudnetError::skip("Product not found"))?;
    if metadata.dvas_id.is_some() {
        return Err(CloudnetError::skip("Already uploaded to DVAS"));
    }
    processor.dvas.upload(&processor.md_api, &metadata).await?;
    info!("Uploaded to DVAS");
    Ok(())
}

/// Run the housekeeping ingestion for an instrument day (hkd task).
pub async fn hkd(processor: &Processor, params: &InstrumentParams) -> CloudnetResult<()> {
    let retention = Duration::days(processor.config.housekeeping_retention_days);
    if params.date < utc_today() - retention {
        return Err(CloudnetError::skip("Housekeeping skipped for old data"));
    }
    run_housekeeping(processor, params).await
}

/// Best-effort housekeeping after instrument processing; failures are logged,
/// never propagated.
pub async fn process_housekeeping(processor: &Processor, params: &InstrumentParams) {
    let retention = Duration::days(processor.config.housekeeping_retention_days);
    if params.date < utc_today() - retention {
        info!("Skipping housekeeping for old data");
        return;
    }
    info!("Processing housekeeping data");
    if let Err(err) = run_housekeeping(processor, params).await {
        error!(error = %err, "Housekeeping failed");
    }
}

async fn run_housekeeping(
    processor: &Processor,
    params: &InstrumentParams,
) -> CloudnetResult<()> {
    let records = housekeeping_records(processor, params).await?;
    let request = HousekeepingRequest {
        site_id: params.site.id.clone(),
        date: params.date,
        instrument_id: params.instrument.instrument_id.clone(),
        instrument_pid: params.instrument.pid.clone(),
        records,
    };
    processor
        .science
        .housekeeping(&request)
        .await
        .map_err(CloudnetError::from)
}

async fn housekeeping_records(
    processor: &Processor,
    params: &InstrumentParams,
) -> CloudnetResult<Vec<RawFileMetadata>> {
    if params.instrument.instrument_id == "halo-doppler-lidar" {
        // One monthly system-parameters file; take the freshest.
        let first_day_of_month = params.date.with_day(1).expect("valid day");
        let query = vec![
            ("site".to_string(), params.site.id.clone()),
            ("dateFrom".to_string(), first_day_of_month.to_string()),
            ("dateTo".to_string(), params.date.to_string()),
            ("instrumentPid".to_string(), params.instrument.pid.clone()),
            ("filenamePrefix".to_string(), "system_parameters".to_string()),
        ];
        let records = processor.md_api.raw_files(&query).await?;
        Ok(select_halo_hkd_record(records))
    } else {
        let query = vec![
            ("site".to_string(), params.site.id.clone()),
            ("date".to_string(), params.date.to_string()),
            ("instrumentPid".to_string(), params.instrument.pid.clone()),
        ];
        processor.md_api.raw_files(&query).await
    }
}

fn select_halo_hkd_record(records: Vec<RawFileMetadata>) -> Vec<RawFileMetadata> {
    records
        .into_iter()
        .max_by_key(|record| {
            (
                record.measurement_date,
                record.created_at,
                record.updated_at,
                record.size,
            )
        })
        .into_iter()
        .collect()
}

async fn fetch_data(
    processor: &Processor,
    params: &ProcessParams,
    directory: &Path,
) -> CloudnetResult<(ProductFileMetadata, PathBuf)> {
    let metadata = match params {
        ProcessParams::Model(p) if !p.product.is_evaluation() => {
            processor.get_model_file(p).await?
        }
        _ => processor.fetch_product(params).await?,
    };
    let metadata = metadata.ok_or_else(|| CloudnetError::skip("Product not found"))?;
    let full_path = processor
        .storage_api
        .download_product(&metadata, directory)
        .await?;
    Ok((metadata, full_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use test_utils::raw_file;

    #[test]
    fn halo_hkd_keeps_only_freshest_record() {
        let mut old = raw_file("system_parameters_202010.txt", 100);
        old.measurement_date = NaiveDate::from_ymd_opt(2020, 10, 1).unwrap();
        let mut new = raw_file("system_parameters_202010.txt", 120);
        new.measurement_date = NaiveDate::from_ymd_opt(2020, 10, 22).unwrap();

        let selected = select_halo_hkd_record(vec![old, new.clone()]);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].uuid, new.uuid);
    }

    #[test]
    fn halo_hkd_empty_is_empty() {
        assert!(select_halo_hkd_record(vec![]).is_empty());
    }
}
