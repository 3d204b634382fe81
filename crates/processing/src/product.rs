//! Processing pipelines for derived products: categorize, Level-2 retrievals,
//! MWR single/multi, epsilon, CPR simulation and Level-3 model evaluation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use cloudnet_common::{CloudnetError, CloudnetResult, ProductFileMetadata};
use netcdf_compare::{nc_difference, NcDiff};
use tracing::info;
use uuid::Uuid;

use crate::instrument::add_provenance;
use crate::processor::{
    DateSelector, DownloadOptions, ModelParams, ProcessParams, Processor, ProductParams, Uuids,
};
use crate::science::{InstrumentMeta, ScienceError, TransformRequest};

/// EarthCARE launch; the CPR simulation only applies to earlier dates.
const EARTHCARE_LAUNCH_DATE: &str = "2024-05-28";

/// Run a `process` task for a derived product.
pub async fn process_product(
    processor: &Processor,
    params: &ProductParams,
    directory: &Path,
) -> CloudnetResult<()> {
    let mut uuids = Uuids::default();
    let wrapped = ProcessParams::Product(params.clone());

    let existing_product = processor.fetch_product(&wrapped).await?;
    let (filename, existing_file) = match &existing_product {
        Some(existing) => {
            if existing.volatile {
                uuids.volatile = Some(existing.uuid);
            }
            let path = processor
                .storage_api
                .download_product(existing, directory)
                .await?;
            (existing.filename.clone(), Some(path))
        }
        None => (generate_product_filename(params), None),
    };

    let volatile = existing_file.is_none() || uuids.volatile.is_some();

    let new_file = match params.product.id.as_str() {
        "mwr-single" | "mwr-multi" => process_mwrpy(processor, params, &mut uuids, directory).await,
        "categorize" | "categorize-voodoo" => {
            process_categorize(processor, params, &mut uuids, directory).await
        }
        "cpr-simulation" => process_cpr_simulation(processor, params, &mut uuids, directory).await,
        "epsilon-lidar" => {
            process_epsilon_from_lidar(processor, params, &mut uuids, directory).await
        }
        _ => process_level2(processor, params, &mut uuids, directory).await,
    }
    .map_err(CloudnetError::into_skip)?;

    if !params.product.experimental {
        processor.pid_utils.add_pid_to_file(&new_file, None).await?;
    }

    add_provenance(&new_file, params.instrument.as_ref().map(|i| i.pid.as_str()))?;

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
    processor.print_info(&uuids, volatile, patch, upload, qc_result);

    if processor.config.is_production {
        update_dvas_metadata(processor, params).await?;
    }
    Ok(())
}

/// Run a `process` task for a Level-3 model-evaluation product.
pub async fn process_me(
    processor: &Processor,
    params: &ModelParams,
    directory: &Path,
) -> CloudnetResult<()> {
    let mut uuids = Uuids::default();
    let mut pid_to_new_file = None;
    let wrapped = ProcessParams::Model(params.clone());

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
        None => (generate_me_filename(params), None),
    };

    let volatile = existing_file.is_none() || uuids.volatile.is_some();

    let new_file = process_l3(processor, params, &mut uuids, directory)
        .await
        .map_err(CloudnetError::into_skip)?;

    if !params.product.experimental {
        processor
            .pid_utils
            .add_pid_to_file(&new_file, pid_to_new_file.as_deref())
            .await?;
    }

    add_provenance(&new_file, None)?;

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
        .create_and_upload_l3_images(
            &output_file,
            &params.product.id,
            &params.model.id,
            product_uuid,
            &filename,
            directory,
        )
        .await?;
    let qc_result = processor
        .upload_quality_report(&output_file, product_uuid, Some(&params.site), &params.product.id)
        .await?;
    processor.print_info(&uuids, volatile, patch, upload, qc_result);
    Ok(())
}

// === Filenames ===

/// Deterministic output filename for a fresh derived product.
pub fn generate_product_filename(params: &ProductParams) -> String {
    let identifier = match params.product.id.as_str() {
        "mwr-single" | "mwr-multi" => {
            let instrument = params
                .instrument
                .as_ref()
                .expect("mwr products have an instrument");
            params
                .product
                .id
                .replace("mwr", &instrument.instrument_id)
        }
        "iwc" => "iwc-Z-T-method".to_string(),
        "lwc" => "lwc-scaled-adiabatic".to_string(),
        product_id => product_id.to_string(),
    };
    let mut parts = vec![
        params.date.format("%Y%m%d").to_string(),
        params.site.id.clone(),
        identifier,
    ];
    if let Some(instrument) = &params.instrument {
        parts.push(instrument.uuid_prefix());
    }
    format!("{}.nc", parts.join("_"))
}

/// Deterministic output filename for a fresh Level-3 product.
pub fn generate_me_filename(params: &ModelParams) -> String {
    format!(
        "{}_{}_{}_{}.nc",
        params.date.format("%Y%m%d"),
        params.site.id,
        params.product.id,
        params.model.id
    )
}

// === Transform drivers ===

async fn process_mwrpy(
    processor: &Processor,
    params: &ProductParams,
    uuids: &mut Uuids,
    directory: &Path,
) -> CloudnetResult<PathBuf> {
    let instrument = params
        .instrument
        .as_ref()
        .ok_or_else(|| CloudnetError::Internal("Instrument is None".to_string()))?;
    if params.product.id == "mwr-multi" && instrument.instrument_id == "lhumpro" {
        return Err(CloudnetError::skip("Cannot generate mwr-multi from LHUMPRO"));
    }

    let query = product_query(params, Some("mwr-l1c"), Some(&instrument.pid), None);
    let metadata = processor.md_api.files(&query).await?;
    let l1c_meta = check_response(metadata, "mwr-l1c")?;
    let l1c_file = processor
        .storage_api
        .download_product(&l1c_meta, directory)
        .await?;

    let mut request = base_request(processor, params, uuids, directory);
    request.input("mwr-l1c", vec![l1c_file]);
    run(processor, uuids, &request).await
}

async fn process_categorize(
    processor: &Processor,
    params: &ProductParams,
    uuids: &mut Uuids,
    directory: &Path,
) -> CloudnetResult<PathBuf> {
    let is_voodoo = params.product.id == "categorize-voodoo";
    let meta_records = level1b_metadata_for_categorize(processor, params, is_voodoo).await?;
    let roles: Vec<String> = meta_records.keys().cloned().collect();
    let records: Vec<ProductFileMetadata> = meta_records.values().cloned().collect();
    let paths = processor.download_products(&records, directory).await?;

    let mut request = base_request(processor, params, uuids, directory);
    for (role, path) in roles.iter().zip(&paths) {
        request.input(role, vec![path.clone()]);
    }
    if let Some(offset) = categorize_temperature_offset(&params.site.id) {
        request.option("temperature_offset", offset);
    }
    let mut lv0_uuids = Vec::new();
    if is_voodoo {
        let (lv0_paths, found_uuids) = input_files_for_voodoo(processor, params, directory).await?;
        request.input("lv0", lv0_paths);
        lv0_uuids = found_uuids;
    }

    let reply = match processor.science.transform(&request).await {
        Ok(reply) => reply,
        // Retry once with the fallback model when the primary model data is
        // unusable for the retrieval.
        Err(ScienceError::ModelData(_)) => {
            let query = product_query(params, None, None, Some("gdas1"));
            let metadata = processor.md_api.model_files(&query).await?;
            let Some(fallback_meta) = metadata.into_iter().next() else {
                return Err(CloudnetError::skip("Bad model data and no gdas1"));
            };
            let fallback_file = processor
                .storage_api
                .download_product(&fallback_meta, directory)
                .await?;
            request.input("model", vec![fallback_file]);
            processor
                .science
                .transform(&request)
                .await
                .map_err(CloudnetError::from)?
        }
        Err(err) => return Err(err.into()),
    };
    uuids.product = Some(reply.uuid);
    uuids.raw.extend(lv0_uuids);
    Ok(directory.join("output.nc"))
}

fn categorize_temperature_offset(site_id: &str) -> Option<i64> {
    match site_id {
        "schneefernerhaus" => Some(-7),
        "granada" => Some(3),
        _ => None,
    }
}

async fn process_cpr_simulation(
    processor: &Processor,
    params: &ProductParams,
    uuids: &mut Uuids,
    directory: &Path,
) -> CloudnetResult<PathBuf> {
    let launch_date: NaiveDate = EARTHCARE_LAUNCH_DATE.parse().expect("valid date");
    if params.date > launch_date {
        return Err(CloudnetError::skip(format!(
            "CPR simulation is only feasible for dates before {EARTHCARE_LAUNCH_DATE}"
        )));
    }
    let query = product_query(params, Some("categorize"), None, None);
    let metadata = processor.md_api.files(&query).await?;
    let categorize_meta = check_response(metadata, "categorize")?;
    let categorize_file = processor
        .storage_api
        .download_product(&categorize_meta, directory)
        .await?;

    let mut request = base_request(processor, params, uuids, directory);
    request.input("categorize", vec![categorize_file]);
    request.option("mean_wind", 6);
    run(processor, uuids, &request).await
}

async fn process_epsilon_from_lidar(
    processor: &Processor,
    params: &ProductParams,
    uuids: &mut Uuids,
    directory: &Path,
) -> CloudnetResult<PathBuf> {
    let instrument = params
        .instrument
        .as_ref()
        .ok_or_else(|| CloudnetError::Internal("Instrument is None".to_string()))?;

    let query = product_query(params, Some("doppler-lidar"), Some(&instrument.pid), None);
    let metadata_stare = processor.md_api.files(&query).await?;
    let stare_meta = check_response(metadata_stare, "doppler-lidar")?;

    let query = product_query(params, Some("doppler-lidar-wind"), None, None);
    let mut metadata_wind = processor.md_api.files(&query).await?;
    if metadata_wind.is_empty() {
        return Err(CloudnetError::skip(
            "Missing required input product: doppler-lidar-wind",
        ));
    }
    // Prefer wind from the same unit as the stare.
    metadata_wind.sort_by_key(|meta| {
        let same_unit = meta
            .instrument
            .as_ref()
            .is_some_and(|i| i.pid == instrument.pid);
        if same_unit {
            -1
        } else {
            1
        }
    });

    let records = vec![stare_meta, metadata_wind.remove(0)];
    let paths = processor.download_products(&records, directory).await?;

    let mut request = base_request(processor, params, uuids, directory);
    request.input("lidar", vec![paths[0].clone()]);
    request.input("wind", vec![paths[1].clone()]);
    run(processor, uuids, &request).await
}

async fn process_level2(
    processor: &Processor,
    params: &ProductParams,
    uuids: &mut Uuids,
    directory: &Path,
) -> CloudnetResult<PathBuf> {
    let source = if params.product.id == "classification-voodoo" {
        "categorize-voodoo"
    } else {
        "categorize"
    };
    let query = product_query(params, Some(source), None, None);
    let metadata = processor.md_api.files(&query).await?;
    let categorize_meta = check_response(metadata, source)?;
    let categorize_file = processor
        .storage_api
        .download_product(&categorize_meta, directory)
        .await?;

    let mut request = base_request(processor, params, uuids, directory);
    request.input("categorize", vec![categorize_file]);
    run(processor, uuids, &request).await
}

async fn process_l3(
    processor: &Processor,
    params: &ModelParams,
    uuids: &mut Uuids,
    directory: &Path,
) -> CloudnetResult<PathBuf> {
    let query = vec![
        ("site".to_string(), params.site.id.clone()),
        ("date".to_string(), params.date.to_string()),
        ("model".to_string(), params.model.id.clone()),
    ];
    let model_meta = processor.md_api.model_files(&query).await?;
    let model_meta = check_response(model_meta, "model")?;
    let model_file = processor
        .storage_api
        .download_product(&model_meta, directory)
        .await?;

    let l3_variable = params
        .product
        .id
        .split('-')
        .nth(1)
        .ok_or_else(|| CloudnetError::Internal(format!("Bad L3 id: {}", params.product.id)))?;
    let source = if l3_variable == "cf" {
        "categorize"
    } else {
        l3_variable
    };
    let query = vec![
        ("site".to_string(), params.site.id.clone()),
        ("date".to_string(), params.date.to_string()),
        ("product".to_string(), source.to_string()),
        ("developer".to_string(), "true".to_string()),
    ];
    let product_meta = processor.md_api.files(&query).await?;
    let product_meta = check_response(product_meta, source)?;
    let product_file = processor
        .storage_api
        .download_product(&product_meta, directory)
        .await?;

    let output_path = directory.join("output.nc");
    let request = TransformRequest {
        product_id: params.product.id.clone(),
        site: processor.site_meta(&params.site),
        date: params.date,
        instrument: None,
        model_id: Some(params.model.id.clone()),
        uuid: uuids.volatile,
        inputs: [
            ("model".to_string(), vec![model_file]),
            ("product".to_string(), vec![product_file]),
        ]
        .into_iter()
        .collect(),
        options: Default::default(),
        output_path: output_path.clone(),
    };
    let reply = processor
        .science
        .transform(&request)
        .await
        .map_err(CloudnetError::from)?;
    uuids.product = Some(reply.uuid);
    Ok(output_path)
}

// === Categorize input selection ===

/// Preference rules for choosing between several instruments of a type.
#[derive(Debug, Default)]
pub struct InstrumentPreference<'a> {
    /// Prioritize these instrument types, in order, when several match.
    pub fallback: &'a [&'a str],
    /// Same as `fallback` but the instrument type must be one of these.
    pub require: &'a [&'a str],
    /// Never choose these instrument types.
    pub exclude: &'a [&'a str],
}

async fn level1b_metadata_for_categorize(
    processor: &Processor,
    params: &ProductParams,
    is_voodoo: bool,
) -> CloudnetResult<BTreeMap<String, ProductFileMetadata>> {
    let model = find_model_product(processor, params).await?;

    let mwr = match find_instrument_product(
        processor,
        params,
        "mwr-single",
        &InstrumentPreference::default(),
    )
    .await?
    {
        Some(meta) => Some(meta),
        None => {
            match find_instrument_product(
                processor,
                params,
                "mwr",
                &InstrumentPreference {
                    fallback: &["hatpro", "radiometrics"],
                    ..Default::default()
                },
            )
            .await?
            {
                Some(meta) => Some(meta),
                // RPG radars measure liquid water path themselves.
                None => {
                    find_instrument_product(
                        processor,
                        params,
                        "radar",
                        &InstrumentPreference {
                            require: &["rpg-fmcw-35", "rpg-fmcw-94"],
                            ..Default::default()
                        },
                    )
                    .await?
                }
            }
        }
    };

    let radar = if is_voodoo {
        find_instrument_product(
            processor,
            params,
            "radar",
            &InstrumentPreference {
                require: &["rpg-fmcw-94"],
                ..Default::default()
            },
        )
        .await?
    } else {
        find_instrument_product(
            processor,
            params,
            "radar",
            &InstrumentPreference {
                fallback: &["mira-35", "rpg-fmcw-35", "rpg-fmcw-94", "copernicus"],
                require: &[],
                exclude: &["mira-10"],
            },
        )
        .await?
    };

    let lidar = match find_instrument_product(
        processor,
        params,
        "lidar",
        &InstrumentPreference {
            fallback: &["chm15k", "chm15kx", "cl61d", "cl51", "cl31"],
            ..Default::default()
        },
    )
    .await?
    {
        Some(meta) => Some(meta),
        None => {
            find_instrument_product(
                processor,
                params,
                "doppler-lidar",
                &InstrumentPreference::default(),
            )
            .await?
        }
    };

    let disdrometer = find_instrument_product(
        processor,
        params,
        "disdrometer",
        &InstrumentPreference {
            fallback: &["thies-lnm", "parsivel"],
            ..Default::default()
        },
    )
    .await?;

    let mut records = BTreeMap::new();
    records.insert("model".to_string(), Some(model));
    records.insert("mwr".to_string(), mwr);
    records.insert("radar".to_string(), radar);
    records.insert("lidar".to_string(), lidar);
    records.insert("disdrometer".to_string(), disdrometer);

    const OPTIONAL_PRODUCTS: &[&str] = &["disdrometer", "mwr"];
    for (role, metadata) in &records {
        if metadata.is_none() && !OPTIONAL_PRODUCTS.contains(&role.as_str()) {
            return Err(CloudnetError::skip(format!(
                "Missing required input product: {role}"
            )));
        }
    }
    Ok(records
        .into_iter()
        .filter_map(|(role, metadata)| metadata.map(|m| (role, m)))
        .collect())
}

async fn find_model_product(
    processor: &Processor,
    params: &ProductParams,
) -> CloudnetResult<ProductFileMetadata> {
    let query = vec![
        ("site".to_string(), params.site.id.clone()),
        ("date".to_string(), params.date.to_string()),
    ];
    let metadata = processor.md_api.model_files(&query).await?;
    check_response(metadata, "model")
}

/// The most suitable instrument product for (site, date, product), or `None`.
///
/// The site's nominal instrument wins outright; otherwise the preference
/// order decides.
async fn find_instrument_product(
    processor: &Processor,
    params: &ProductParams,
    product_id: &str,
    preference: &InstrumentPreference<'_>,
) -> CloudnetResult<Option<ProductFileMetadata>> {
    let mut query = product_query(params, Some(product_id), None, None);
    for instrument_id in preference.require {
        query.push(("instrument".to_string(), instrument_id.to_string()));
    }
    let metadata = processor.md_api.files(&query).await?;
    let metadata: Vec<ProductFileMetadata> = metadata
        .into_iter()
        .filter(|file| {
            file.instrument
                .as_ref()
                .map_or(true, |i| !preference.exclude.contains(&i.instrument_id.as_str()))
        })
        .collect();
    if metadata.is_empty() {
        return Ok(None);
    }
    let nominal_pid = processor
        .md_api
        .nominal_instrument_pid(&params.site.id, params.date, product_id)
        .await?;
    let order = if preference.require.is_empty() {
        preference.fallback
    } else {
        preference.require
    };
    Ok(select_preferred(metadata, nominal_pid.as_deref(), order))
}

/// Pick the preferred file: nominal instrument first, then preference order,
/// then listing order.
pub fn select_preferred(
    metadata: Vec<ProductFileMetadata>,
    nominal_pid: Option<&str>,
    preference_order: &[&str],
) -> Option<ProductFileMetadata> {
    metadata.into_iter().min_by_key(|file| {
        let instrument = file.instrument.as_ref();
        if let (Some(nominal), Some(instrument)) = (nominal_pid, instrument) {
            if instrument.pid == nominal {
                return -1;
            }
        }
        instrument
            .and_then(|i| {
                preference_order
                    .iter()
                    .position(|id| *id == i.instrument_id)
            })
            .map_or(999, |index| index as i64)
    })
}

async fn input_files_for_voodoo(
    processor: &Processor,
    params: &ProductParams,
    directory: &Path,
) -> CloudnetResult<(Vec<PathBuf>, Vec<Uuid>)> {
    let query = vec![
        ("site".to_string(), params.site.id.clone()),
        ("date".to_string(), params.date.to_string()),
        ("instrument".to_string(), "rpg-fmcw-94".to_string()),
    ];
    let metadata = processor.md_api.raw_files(&query).await?;
    let instrument_pid = metadata
        .iter()
        .filter_map(|row| row.instrument_pid.as_deref())
        .next()
        .ok_or_else(|| CloudnetError::skip("No rpg-fmcw-94 cloud radar found"))?
        .to_string();

    let lv0_dir = directory.join("lv0");
    std::fs::create_dir_all(&lv0_dir)?;
    processor
        .download_instrument(
            &params.site.id,
            DateSelector::Single(params.date),
            "rpg-fmcw-94",
            &instrument_pid,
            &lv0_dir,
            &DownloadOptions {
                include_pattern: Some(r"\.LV0".to_string()),
                ..Default::default()
            },
        )
        .await
}

// === Shared helpers ===

fn base_request(
    processor: &Processor,
    params: &ProductParams,
    uuids: &Uuids,
    directory: &Path,
) -> TransformRequest {
    TransformRequest {
        product_id: params.product.id.clone(),
        site: processor.site_meta(&params.site),
        date: params.date,
        instrument: params.instrument.as_ref().map(|instrument| InstrumentMeta {
            uuid: instrument.uuid,
            pid: instrument.pid.clone(),
            instrument_id: instrument.instrument_id.clone(),
        }),
        model_id: None,
        uuid: uuids.volatile,
        inputs: Default::default(),
        options: Default::default(),
        output_path: directory.join("output.nc"),
    }
}

async fn run(
    processor: &Processor,
    uuids: &mut Uuids,
    request: &TransformRequest,
) -> CloudnetResult<PathBuf> {
    let reply = processor
        .science
        .transform(request)
        .await
        .map_err(CloudnetError::from)?;
    uuids.product = Some(reply.uuid);
    Ok(request.output_path.clone())
}

fn product_query(
    params: &ProductParams,
    product_id: Option<&str>,
    instrument_pid: Option<&str>,
    model_id: Option<&str>,
) -> Vec<(String, String)> {
    let mut query = vec![
        ("site".to_string(), params.site.id.clone()),
        ("date".to_string(), params.date.to_string()),
        ("developer".to_string(), "true".to_string()),
    ];
    if let Some(product_id) = product_id {
        query.push(("product".to_string(), product_id.to_string()));
    }
    if let Some(pid) = instrument_pid {
        query.push(("instrumentPid".to_string(), pid.to_string()));
    }
    if let Some(model_id) = model_id {
        query.push(("model".to_string(), model_id.to_string()));
    }
    query
}

fn check_response(
    metadata: Vec<ProductFileMetadata>,
    product: &str,
) -> CloudnetResult<ProductFileMetadata> {
    match metadata.len() {
        0 => Err(CloudnetError::skip(format!(
            "Missing required input product: {product}"
        ))),
        1 => Ok(metadata.into_iter().next().expect("non-empty")),
        _ => Err(CloudnetError::Internal("Multiple products found".to_string())),
    }
}

async fn update_dvas_metadata(processor: &Processor, params: &ProductParams) -> CloudnetResult<()> {
    let query = product_query(
        params,
        Some(&params.product.id),
        params.instrument.as_ref().map(|i| i.pid.as_str()),
        None,
    );
    let metadata = processor.md_api.files(&query).await?;
    if let Some(file) = metadata.into_iter().next() {
        processor.dvas.upload(&processor.md_api, &file).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::{geophysical_product, instrument, instrument_product_file, site, test_date};

    fn params(product_id: &str, instrument_id: Option<&str>) -> ProductParams {
        ProductParams {
            site: site("bucharest"),
            date: test_date(),
            product: geophysical_product(product_id),
            instrument: instrument_id.map(instrument),
        }
    }

    #[test]
    fn plain_product_filename() {
        let params = params("classification", None);
        assert_eq!(
            generate_product_filename(&params),
            "20201022_bucharest_classification.nc"
        );
    }

    #[test]
    fn iwc_and_lwc_filename_aliases() {
        assert_eq!(
            generate_product_filename(&params("iwc", None)),
            "20201022_bucharest_iwc-Z-T-method.nc"
        );
        assert_eq!(
            generate_product_filename(&params("lwc", None)),
            "20201022_bucharest_lwc-scaled-adiabatic.nc"
        );
    }

    #[test]
    fn mwr_single_filename_uses_instrument_type() {
        let params = params("mwr-single", Some("hatpro"));
        let prefix = params.instrument.as_ref().unwrap().uuid_prefix();
        assert_eq!(
            generate_product_filename(&params),
            format!("20201022_bucharest_hatpro-single_{prefix}.nc")
        );
    }

    #[test]
    fn me_filename_includes_model() {
        let params = ModelParams {
            site: site("bucharest"),
            date: test_date(),
            product: geophysical_product("l3-cf"),
            model: test_utils::model("ecmwf"),
        };
        assert_eq!(
            generate_me_filename(&params),
            "20201022_bucharest_l3-cf_ecmwf.nc"
        );
    }

    #[test]
    fn nominal_instrument_wins_tie_break() {
        let files = vec![
            instrument_product_file("a.nc", "mira-35", "pid-mira"),
            instrument_product_file("b.nc", "rpg-fmcw-94", "pid-rpg"),
        ];
        let chosen = select_preferred(
            files,
            Some("pid-rpg"),
            &["mira-35", "rpg-fmcw-35", "rpg-fmcw-94", "copernicus"],
        )
        .unwrap();
        assert_eq!(chosen.filename, "b.nc");
    }

    #[test]
    fn preference_order_decides_without_nominal() {
        let files = vec![
            instrument_product_file("a.nc", "rpg-fmcw-94", "pid-rpg"),
            instrument_product_file("b.nc", "mira-35", "pid-mira"),
        ];
        let chosen = select_preferred(
            files,
            None,
            &["mira-35", "rpg-fmcw-35", "rpg-fmcw-94", "copernicus"],
        )
        .unwrap();
        assert_eq!(chosen.filename, "b.nc");
    }

    #[test]
    fn unknown_instrument_ranks_last() {
        let files = vec![
            instrument_product_file("a.nc", "exotic-radar", "pid-x"),
            instrument_product_file("b.nc", "copernicus", "pid-c"),
        ];
        let chosen = select_preferred(
            files,
            None,
            &["mira-35", "rpg-fmcw-35", "rpg-fmcw-94", "copernicus"],
        )
        .unwrap();
        assert_eq!(chosen.filename, "b.nc");
    }

    #[test]
    fn first_listed_wins_among_equals() {
        let files = vec![
            instrument_product_file("a.nc", "exotic-1", "pid-1"),
            instrument_product_file("b.nc", "exotic-2", "pid-2"),
        ];
        let chosen = select_preferred(files, None, &[]).unwrap();
        assert_eq!(chosen.filename, "a.nc");
    }

    #[test]
    fn cpr_simulation_date_guard() {
        let launch: NaiveDate = EARTHCARE_LAUNCH_DATE.parse().unwrap();
        assert!(test_date() <= launch);
    }

    #[test]
    fn temperature_offsets() {
        assert_eq!(categorize_temperature_offset("schneefernerhaus"), Some(-7));
        assert_eq!(categorize_temperature_offset("granada"), Some(3));
        assert_eq!(categorize_temperature_offset("bucharest"), None);
    }
}
