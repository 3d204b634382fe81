//! The Processor façade: composes the HTTP clients, the diff engine and the
//! science stack, and exposes the primitives task handlers are built from.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use cloudnet_api::{DvasClient, MetadataClient, PidClient, StorageClient};
use cloudnet_common::{
    Calibration, CloudnetError, CloudnetResult, Config, ErrorLevel, Instrument, Model, Product,
    ProductFileMetadata, ProductPutPayload, RawFileMetadata, RawFileStatus, Site,
    VisualizationPayload,
};
use regex::Regex;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::plots::{fields_for_plot, variable_id};
use crate::science::{PlotRequest, QcRequest, ScienceStack, SiteMeta};

/// Parameters of an instrument Level-1b task.
#[derive(Debug, Clone)]
pub struct InstrumentParams {
    pub site: Site,
    pub date: NaiveDate,
    pub product: Product,
    pub instrument: Instrument,
}

/// Parameters of a model or model-evaluation task.
#[derive(Debug, Clone)]
pub struct ModelParams {
    pub site: Site,
    pub date: NaiveDate,
    pub product: Product,
    pub model: Model,
}

/// Parameters of a derived-product task.
#[derive(Debug, Clone)]
pub struct ProductParams {
    pub site: Site,
    pub date: NaiveDate,
    pub product: Product,
    pub instrument: Option<Instrument>,
}

/// Tagged union over the three task parameter shapes.
#[derive(Debug, Clone)]
pub enum ProcessParams {
    Instrument(InstrumentParams),
    Model(ModelParams),
    Product(ProductParams),
}

impl ProcessParams {
    pub fn site(&self) -> &Site {
        match self {
            ProcessParams::Instrument(p) => &p.site,
            ProcessParams::Model(p) => &p.site,
            ProcessParams::Product(p) => &p.site,
        }
    }

    pub fn date(&self) -> NaiveDate {
        match self {
            ProcessParams::Instrument(p) => p.date,
            ProcessParams::Model(p) => p.date,
            ProcessParams::Product(p) => p.date,
        }
    }

    pub fn product(&self) -> &Product {
        match self {
            ProcessParams::Instrument(p) => &p.product,
            ProcessParams::Model(p) => &p.product,
            ProcessParams::Product(p) => &p.product,
        }
    }

    pub fn instrument(&self) -> Option<&Instrument> {
        match self {
            ProcessParams::Instrument(p) => Some(&p.instrument),
            ProcessParams::Model(_) => None,
            ProcessParams::Product(p) => p.instrument.as_ref(),
        }
    }
}

/// UUID accumulator carried through a process task.
#[derive(Debug, Default)]
pub struct Uuids {
    /// Raw files consumed by the transform.
    pub raw: Vec<Uuid>,
    /// UUID of the produced file.
    pub product: Option<Uuid>,
    /// Set iff an existing volatile product is being replaced.
    pub volatile: Option<Uuid>,
}

/// Predicates for selecting raw files of an instrument day.
#[derive(Debug, Default, Clone)]
pub struct DownloadOptions {
    pub include_pattern: Option<String>,
    pub exclude_pattern: Option<String>,
    pub filename_prefix: Option<String>,
    pub filename_suffix: Option<String>,
    pub include_tag_subset: Option<Vec<String>>,
    pub exclude_tag_subset: Option<Vec<String>>,
    /// Keep only the single biggest file.
    pub largest_only: bool,
    /// Empty result is acceptable (no RawDataMissing).
    pub allow_empty: bool,
}

/// A single day or an inclusive date range.
#[derive(Debug, Clone, Copy)]
pub enum DateSelector {
    Single(NaiveDate),
    Range(NaiveDate, NaiveDate),
}

/// Façade over the four clients, the diff engine and the science stack.
pub struct Processor {
    pub md_api: MetadataClient,
    pub storage_api: StorageClient,
    pub pid_utils: PidClient,
    pub dvas: DvasClient,
    pub science: Arc<dyn ScienceStack>,
    pub config: Config,
    site_cache: Mutex<HashMap<String, Site>>,
    product_cache: Mutex<HashMap<String, Product>>,
    instrument_cache: Mutex<HashMap<Uuid, Instrument>>,
    model_cache: Mutex<HashMap<String, Model>>,
}

impl Processor {
    pub fn new(
        md_api: MetadataClient,
        storage_api: StorageClient,
        pid_utils: PidClient,
        dvas: DvasClient,
        science: Arc<dyn ScienceStack>,
        config: Config,
    ) -> Self {
        Self {
            md_api,
            storage_api,
            pid_utils,
            dvas,
            science,
            config,
            site_cache: Mutex::new(HashMap::new()),
            product_cache: Mutex::new(HashMap::new()),
            instrument_cache: Mutex::new(HashMap::new()),
            model_cache: Mutex::new(HashMap::new()),
        }
    }

    // === Cached reference data ===

    pub async fn get_site(&self, site_id: &str) -> CloudnetResult<Site> {
        if let Some(site) = self.site_cache.lock().await.get(site_id) {
            return Ok(site.clone());
        }
        let site = self.md_api.get_site(site_id).await?;
        self.site_cache
            .lock()
            .await
            .insert(site_id.to_string(), site.clone());
        Ok(site)
    }

    pub async fn get_product(&self, product_id: &str) -> CloudnetResult<Product> {
        if let Some(product) = self.product_cache.lock().await.get(product_id) {
            return Ok(product.clone());
        }
        let product = self.md_api.get_product(product_id).await?;
        self.product_cache
            .lock()
            .await
            .insert(product_id.to_string(), product.clone());
        Ok(product)
    }

    pub async fn get_instrument(&self, uuid: &Uuid) -> CloudnetResult<Instrument> {
        if let Some(instrument) = self.instrument_cache.lock().await.get(uuid) {
            return Ok(instrument.clone());
        }
        let instrument = self.md_api.get_instrument(uuid).await?;
        self.instrument_cache
            .lock()
            .await
            .insert(*uuid, instrument.clone());
        Ok(instrument)
    }

    pub async fn get_model(&self, model_id: &str) -> CloudnetResult<Model> {
        if let Some(model) = self.model_cache.lock().await.get(model_id) {
            return Ok(model.clone());
        }
        let model = self.md_api.get_model(model_id).await?;
        self.model_cache
            .lock()
            .await
            .insert(model_id.to_string(), model.clone());
        Ok(model)
    }

    // === Product lookups ===

    /// The unique existing product file for the task target, or `None`.
    pub async fn fetch_product(
        &self,
        params: &ProcessParams,
    ) -> CloudnetResult<Option<ProductFileMetadata>> {
        let rows = match params {
            ProcessParams::Model(p) if !p.product.is_evaluation() => {
                let query = vec![
                    ("site".to_string(), p.site.id.clone()),
                    ("date".to_string(), p.date.to_string()),
                    ("model".to_string(), p.model.id.clone()),
                ];
                self.md_api.model_files(&query).await?
            }
            _ => {
                let mut query = vec![
                    ("site".to_string(), params.site().id.clone()),
                    ("date".to_string(), params.date().to_string()),
                    ("product".to_string(), params.product().id.clone()),
                    ("developer".to_string(), "true".to_string()),
                ];
                if let Some(instrument) = params.instrument() {
                    query.push(("instrumentPid".to_string(), instrument.pid.clone()));
                }
                self.md_api.files(&query).await?
            }
        };
        unique_or_none(rows)
    }

    /// The harmonized model file of the day, or `None`.
    pub async fn get_model_file(
        &self,
        params: &ModelParams,
    ) -> CloudnetResult<Option<ProductFileMetadata>> {
        let query = vec![
            ("site".to_string(), params.site.id.clone()),
            ("date".to_string(), params.date.to_string()),
            ("model".to_string(), params.model.id.clone()),
        ];
        unique_or_none(self.md_api.model_files(&query).await?)
    }

    /// The single valid raw model upload of the day, or `None`.
    ///
    /// Uploads at or below the minimum size are truncated submissions and are
    /// never processed.
    pub async fn get_model_upload(
        &self,
        params: &ModelParams,
    ) -> CloudnetResult<Option<RawFileMetadata>> {
        const MINIMUM_SIZE: u64 = 20_200;
        let query = vec![
            ("site".to_string(), params.site.id.clone()),
            ("date".to_string(), params.date.to_string()),
            ("model".to_string(), params.model.id.clone()),
        ];
        let rows = self.md_api.raw_model_files(&query).await?;
        let rows: Vec<RawFileMetadata> = rows
            .into_iter()
            .filter(|row| row.size > MINIMUM_SIZE)
            .collect();
        match rows.len() {
            0 => Ok(None),
            1 => Ok(rows.into_iter().next()),
            _ => Err(CloudnetError::Internal(
                "Multiple model files found".to_string(),
            )),
        }
    }

    // === Downloads ===

    pub async fn download_raw_data(
        &self,
        metadata: &[RawFileMetadata],
        directory: &Path,
    ) -> CloudnetResult<(Vec<PathBuf>, Vec<Uuid>)> {
        self.storage_api.download_raw_data(metadata, directory).await
    }

    pub async fn download_products(
        &self,
        metadata: &[ProductFileMetadata],
        directory: &Path,
    ) -> CloudnetResult<Vec<PathBuf>> {
        self.storage_api.download_products(metadata, directory).await
    }

    /// List and download the raw files of an instrument day, applying the
    /// selection predicates.
    pub async fn download_instrument(
        &self,
        site_id: &str,
        date: DateSelector,
        instrument_id: &str,
        instrument_pid: &str,
        directory: &Path,
        options: &DownloadOptions,
    ) -> CloudnetResult<(Vec<PathBuf>, Vec<Uuid>)> {
        let mut query = vec![
            ("site".to_string(), site_id.to_string()),
            ("instrument".to_string(), instrument_id.to_string()),
            ("instrumentPid".to_string(), instrument_pid.to_string()),
        ];
        match date {
            DateSelector::Single(date) => query.push(("date".to_string(), date.to_string())),
            DateSelector::Range(from, to) => {
                query.push(("dateFrom".to_string(), from.to_string()));
                query.push(("dateTo".to_string(), to.to_string()));
            }
        }
        let metadata = self.md_api.raw_files(&query).await?;
        let metadata = select_raw_files(metadata, options)?;
        if metadata.is_empty() {
            if options.allow_empty {
                return Ok((Vec::new(), Vec::new()));
            }
            return Err(CloudnetError::RawDataMissing(
                "No raw files to process".to_string(),
            ));
        }
        self.storage_api.download_raw_data(&metadata, directory).await
    }

    /// Fetch today's and tomorrow's raw files, for instruments whose daily
    /// files roll over at local midnight.
    pub async fn download_adjoining_daily_files(
        &self,
        params: &InstrumentParams,
        directory: &Path,
    ) -> CloudnetResult<(Vec<PathBuf>, Vec<Uuid>)> {
        let next_day = params.date + chrono::Duration::days(1);
        self.download_instrument(
            &params.site.id,
            DateSelector::Range(params.date, next_day),
            &params.instrument.instrument_id,
            &params.instrument.pid,
            directory,
            &DownloadOptions::default(),
        )
        .await
    }

    // === Uploads ===

    /// Upload a produced file and register its metadata.
    ///
    /// With `patch` the existing UUID and PID in the file are kept, and the
    /// object at the same key is overwritten in place.
    pub async fn upload_file(
        &self,
        params: &ProcessParams,
        full_path: &Path,
        filename: &str,
        volatile: bool,
        patch: bool,
    ) -> CloudnetResult<()> {
        let upload = self
            .storage_api
            .upload_product(full_path, filename, volatile)
            .await?;
        let payload = self
            .build_put_payload(params, full_path, volatile, patch, upload.version)
            .await?;
        self.md_api.put_file(filename, &payload).await
    }

    async fn build_put_payload(
        &self,
        params: &ProcessParams,
        full_path: &Path,
        volatile: bool,
        patch: bool,
        version: Option<String>,
    ) -> CloudnetResult<ProductPutPayload> {
        let uuid = netcdf_compare::read_file_uuid(full_path)
            .map_err(|e| CloudnetError::NetCdf(e.to_string()))?;
        let pid = read_attr(full_path, "pid")?;
        let cloudnetpy_version = read_attr(full_path, "cloudnetpy_version")?;
        let source_file_ids = read_attr(full_path, "source_file_uuids")?
            .map(|value| {
                value
                    .split(", ")
                    .filter_map(|s| s.parse().ok())
                    .collect::<Vec<Uuid>>()
            })
            .unwrap_or_default();
        let format = netcdf_compare::file_format(full_path)
            .map_err(|e| CloudnetError::NetCdf(e.to_string()))?;
        let data = tokio::fs::read(full_path).await?;
        let checksum = format!("{:x}", Sha256::digest(&data));

        Ok(ProductPutPayload {
            uuid,
            checksum,
            measurement_date: params.date(),
            format,
            size: data.len() as u64,
            volatile,
            pid,
            cloudnetpy_version,
            version,
            site: params.site().id.clone(),
            product: params.product().id.clone(),
            source_file_ids,
            model: match params {
                ProcessParams::Model(p) => Some(p.model.id.clone()),
                _ => None,
            },
            instrument_pid: params.instrument().map(|i| i.pid.clone()),
            legacy: false,
            patch,
        })
    }

    /// Render and upload quicklook images, then register them.
    pub async fn create_and_upload_images(
        &self,
        full_path: &Path,
        product_id: &str,
        product_uuid: Uuid,
        product_s3key: &str,
        directory: &Path,
    ) -> CloudnetResult<()> {
        self.upload_images(full_path, product_id, None, product_uuid, product_s3key, directory)
            .await
    }

    /// Model-evaluation variant: variable ids carry the model id.
    pub async fn create_and_upload_l3_images(
        &self,
        full_path: &Path,
        product_id: &str,
        model_id: &str,
        product_uuid: Uuid,
        product_s3key: &str,
        directory: &Path,
    ) -> CloudnetResult<()> {
        self.upload_images(
            full_path,
            product_id,
            Some(model_id),
            product_uuid,
            product_s3key,
            directory,
        )
        .await
    }

    async fn upload_images(
        &self,
        full_path: &Path,
        product_id: &str,
        model_id: Option<&str>,
        product_uuid: Uuid,
        product_s3key: &str,
        directory: &Path,
    ) -> CloudnetResult<()> {
        let Some((fields, max_altitude_km)) = fields_for_plot(product_id) else {
            warn!(product = product_id, "Plotting not implemented");
            return Ok(());
        };
        let request = PlotRequest {
            input: full_path.to_path_buf(),
            product_id: product_id.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            max_altitude_km,
            output_dir: directory.to_path_buf(),
        };
        let images = self
            .science
            .plot(&request)
            .await
            .map_err(CloudnetError::from)?;

        let uuid_string = product_uuid.to_string();
        let uuid_prefix = &uuid_string[..8];
        let mut visualizations = Vec::with_capacity(images.len());
        for image in &images {
            let img_s3key = product_s3key.replace(
                ".nc",
                &format!("-{uuid_prefix}-{}.png", image.field),
            );
            self.storage_api.upload_image(&image.path, &img_s3key).await?;
            visualizations.push((
                img_s3key,
                VisualizationPayload {
                    source_file_id: product_uuid,
                    variable_id: variable_id(product_id, model_id, &image.field),
                    dimensions: image.dimensions,
                },
            ));
        }
        self.md_api.put_images(&visualizations).await
    }

    /// Run quality control and upload the report. Returns the worst severity,
    /// or `None` when QC itself failed to run.
    pub async fn upload_quality_report(
        &self,
        full_path: &Path,
        product_uuid: Uuid,
        site: Option<&Site>,
        product_id: &str,
    ) -> CloudnetResult<Option<ErrorLevel>> {
        let request = QcRequest {
            input: full_path.to_path_buf(),
            product_id: product_id.to_string(),
            site_id: site.map(|s| s.id.clone()),
        };
        let report = match self.science.quality_check(&request).await {
            Ok(report) => report,
            Err(err) => {
                tracing::error!(error = %err, "Failed to run quality control");
                return Ok(None);
            }
        };
        self.md_api.put_quality(&product_uuid, &report).await?;
        Ok(Some(report.worst_level()))
    }

    /// Advance raw-file statuses, one POST per file.
    pub async fn update_statuses(
        &self,
        raw_uuids: &[Uuid],
        status: RawFileStatus,
    ) -> CloudnetResult<()> {
        for uuid in raw_uuids {
            self.md_api.update_status(uuid, status).await?;
        }
        Ok(())
    }

    pub async fn fetch_calibration(
        &self,
        instrument_pid: &str,
        date: NaiveDate,
    ) -> CloudnetResult<Option<Calibration>> {
        self.md_api.calibration(instrument_pid, date).await
    }

    /// Site description for transform requests.
    pub fn site_meta(&self, site: &Site) -> SiteMeta {
        SiteMeta {
            id: site.id.clone(),
            name: site.human_readable_name.clone(),
            latitude: site.latitude,
            longitude: site.longitude,
            altitude: site.altitude.unwrap_or(0.0),
        }
    }

    /// Success log line with the landing page URL.
    pub fn print_info(
        &self,
        uuids: &Uuids,
        volatile: bool,
        patch: bool,
        upload: bool,
        qc_result: Option<ErrorLevel>,
    ) {
        let Some(product_uuid) = uuids.product else {
            return;
        };
        let action = if !upload {
            "Kept existing file"
        } else if patch {
            "Patched existing file"
        } else if volatile && uuids.volatile.is_some() {
            "Updated volatile file"
        } else if volatile {
            "Created volatile file"
        } else {
            "Created new version"
        };
        let url = self.config.file_landing_page_url(&product_uuid);
        match qc_result {
            Some(level) => info!("{action}: {url} QC: {}", level.as_str().to_uppercase()),
            None => info!("{action}: {url}"),
        }
    }
}

/// Apply the raw-file selection predicates.
fn select_raw_files(
    metadata: Vec<RawFileMetadata>,
    options: &DownloadOptions,
) -> CloudnetResult<Vec<RawFileMetadata>> {
    let compile = |pattern: &Option<String>| -> CloudnetResult<Option<Regex>> {
        pattern
            .as_deref()
            .map(|p| regex::RegexBuilder::new(p).case_insensitive(true).build())
            .transpose()
            .map_err(|e| CloudnetError::Internal(format!("Invalid pattern: {e}")))
    };
    let include = compile(&options.include_pattern)?;
    let exclude = compile(&options.exclude_pattern)?;

    let mut selected: Vec<RawFileMetadata> = metadata
        .into_iter()
        .filter(|row| {
            if let Some(re) = &include {
                if !re.is_match(&row.filename) {
                    return false;
                }
            }
            if let Some(re) = &exclude {
                if re.is_match(&row.filename) {
                    return false;
                }
            }
            if let Some(prefix) = &options.filename_prefix {
                if !row.filename.starts_with(prefix.as_str()) {
                    return false;
                }
            }
            if let Some(suffix) = &options.filename_suffix {
                if !row.filename.ends_with(suffix.as_str()) {
                    return false;
                }
            }
            if let Some(subset) = &options.include_tag_subset {
                if !subset.iter().all(|tag| row.tags.contains(tag)) {
                    return false;
                }
            }
            if let Some(subset) = &options.exclude_tag_subset {
                if subset.iter().all(|tag| row.tags.contains(tag)) {
                    return false;
                }
            }
            true
        })
        .collect();

    if options.largest_only && !selected.is_empty() {
        selected.sort_by_key(|row| row.size);
        let largest = selected.pop().expect("non-empty");
        selected = vec![largest];
    }
    Ok(selected)
}

fn unique_or_none(
    rows: Vec<ProductFileMetadata>,
) -> CloudnetResult<Option<ProductFileMetadata>> {
    match rows.len() {
        0 => Ok(None),
        1 => Ok(rows.into_iter().next()),
        _ => Err(CloudnetError::Internal(
            "Multiple products found".to_string(),
        )),
    }
}

fn read_attr(full_path: &Path, name: &str) -> CloudnetResult<Option<String>> {
    netcdf_compare::read_global_attr(full_path, name)
        .map_err(|e| CloudnetError::NetCdf(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::raw_file;

    #[test]
    fn include_pattern_selects_matching_files() {
        let rows = vec![
            raw_file("201022_000000_P06_ZEN.LV1", 100),
            raw_file("201022_000000_P06_ZEN.LV0", 200),
            raw_file("housekeeping.txt", 50),
        ];
        let options = DownloadOptions {
            include_pattern: Some(r"ZEN.*\.LV1$".to_string()),
            ..Default::default()
        };
        let selected = select_raw_files(rows, &options).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].filename, "201022_000000_P06_ZEN.LV1");
    }

    #[test]
    fn exclude_pattern_removes_files() {
        let rows = vec![
            raw_file("Stare_06_20201022.hpl", 100),
            raw_file("VAD_06_20201022.hpl", 100),
        ];
        let options = DownloadOptions {
            include_pattern: Some(r".*\.hpl".to_string()),
            exclude_pattern: Some("Stare.*".to_string()),
            ..Default::default()
        };
        let selected = select_raw_files(rows, &options).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].filename, "VAD_06_20201022.hpl");
    }

    #[test]
    fn largest_only_keeps_biggest() {
        let rows = vec![
            raw_file("a.nc", 100),
            raw_file("b.nc", 500),
            raw_file("c.nc", 300),
        ];
        let options = DownloadOptions {
            largest_only: true,
            ..Default::default()
        };
        let selected = select_raw_files(rows, &options).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].filename, "b.nc");
    }

    #[test]
    fn tag_subset_filters() {
        let mut co_file = raw_file("Stare_00.hpl", 100);
        co_file.tags = vec!["co".to_string()];
        let mut cross_file = raw_file("Stare_01.hpl", 100);
        cross_file.tags = vec!["cross".to_string()];
        let rows = vec![co_file, cross_file];

        let exclude_cross = DownloadOptions {
            exclude_tag_subset: Some(vec!["cross".to_string()]),
            ..Default::default()
        };
        let selected = select_raw_files(rows.clone(), &exclude_cross).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].tags, vec!["co"]);

        let include_cross = DownloadOptions {
            include_tag_subset: Some(vec!["cross".to_string()]),
            ..Default::default()
        };
        let selected = select_raw_files(rows, &include_cross).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].tags, vec!["cross"]);
    }

    #[test]
    fn prefix_and_suffix_filters() {
        let rows = vec![
            raw_file("Background_202010.txt", 10),
            raw_file("Stare_202010.hpl", 10),
        ];
        let options = DownloadOptions {
            filename_prefix: Some("Background".to_string()),
            filename_suffix: Some(".txt".to_string()),
            ..Default::default()
        };
        let selected = select_raw_files(rows, &options).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].filename, "Background_202010.txt");
    }
}
