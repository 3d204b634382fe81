//! Per-instrument raw-file selection and transform invocation.
//!
//! One method per (product, instrument type) pair: each decides which raw
//! files the day needs, how they are prepared locally (decompression,
//! concatenation, suffix fixes) and which options the transform gets.
//! Instruments whose hardware support is pending are explicit skips.

use std::path::{Path, PathBuf};

use chrono::Duration;
use cloudnet_common::{CloudnetError, CloudnetResult};
use uuid::Uuid;

use crate::checks;
use crate::processor::{DateSelector, DownloadOptions, InstrumentParams, Processor, Uuids};
use crate::rawfiles;
use crate::science::{InstrumentMeta, TransformReply, TransformRequest};

/// Select inputs, invoke the transform and return the produced file.
pub async fn run_transform(
    processor: &Processor,
    params: &InstrumentParams,
    uuids: &mut Uuids,
    directory: &Path,
) -> CloudnetResult<PathBuf> {
    let process = InstrumentProcess::new(processor, params, directory)?;
    let instrument_id = params.instrument.instrument_id.as_str();

    match (params.product.id.as_str(), instrument_id) {
        ("radar", "rpg-fmcw-94" | "rpg-fmcw-35") => process.rpg(uuids).await?,
        ("radar", "mira" | "mira-35") => process.mira(uuids).await?,
        ("radar", "basta") => process.basta(uuids).await?,
        ("radar", "copernicus") => process.copernicus(uuids).await?,
        ("radar", "galileo") => process.galileo(uuids).await?,
        ("lidar", "chm15k" | "chm15x" | "chm15kx") => process.chm_lidar(uuids).await?,
        ("lidar", "cl31" | "cs135") => process.text_ceilometer(uuids).await?,
        ("lidar", "cl51") => process.cl51(uuids).await?,
        ("lidar", "ct25k") => process.ct25k(uuids).await?,
        ("lidar", "cl61d") => process.cl61d(uuids).await?,
        ("lidar", "pollyxt") => process.pollyxt(uuids).await?,
        ("lidar", "halo-doppler-lidar-calibrated") => process.halo_calibrated(uuids).await?,
        ("doppler-lidar", "halo-doppler-lidar") => process.halo_stare(uuids).await?,
        ("doppler-lidar-wind", "halo-doppler-lidar") => process.halo_wind(uuids).await?,
        ("doppler-lidar-wind", "wls200s") => process.wls200s_wind(uuids).await?,
        ("doppler-lidar-wind", "wls70") => process.wls70_wind(uuids).await?,
        ("mwr", "hatpro") => process.hatpro_mwr(uuids).await?,
        ("mwr", "radiometrics") => process.radiometrics(uuids).await?,
        ("mwr-l1c", "hatpro") => process.hatpro_l1c(uuids).await?,
        ("disdrometer", "parsivel") => process.parsivel(uuids).await?,
        ("disdrometer", "thies-lnm") => process.thies_lnm(uuids).await?,
        ("weather-station", _) => process.weather_station(uuids).await?,
        ("rain-radar", "mrr-pro") => process.mrr_pro(uuids).await?,
        _ => {
            return Err(CloudnetError::SkipTask(
                "Processing not implemented yet".to_string(),
            ))
        }
    }
    Ok(process.output_path)
}

struct InstrumentProcess<'a> {
    processor: &'a Processor,
    params: &'a InstrumentParams,
    raw_dir: PathBuf,
    output_path: PathBuf,
}

impl<'a> InstrumentProcess<'a> {
    fn new(
        processor: &'a Processor,
        params: &'a InstrumentParams,
        directory: &Path,
    ) -> CloudnetResult<Self> {
        let raw_dir = directory.join("raw");
        std::fs::create_dir_all(&raw_dir)?;
        Ok(Self {
            processor,
            params,
            raw_dir,
            output_path: directory.join("output.nc"),
        })
    }

    // === Radars ===

    async fn rpg(&self, uuids: &mut Uuids) -> CloudnetResult<()> {
        let options = DownloadOptions {
            include_pattern: Some(r"zen.*\.lv1$".to_string()),
            ..Default::default()
        };
        let (paths, raw_uuids) = self.download(&options).await?;
        let mut request = self.request(uuids);
        request.input("raw", paths.clone());
        let reply = self.transform(&request).await?;
        self.finish(uuids, reply, paths, raw_uuids);
        Ok(())
    }

    async fn mira(&self, uuids: &mut Uuids) -> CloudnetResult<()> {
        let (paths, raw_uuids) = self.download(&DownloadOptions::default()).await?;
        let paths = rawfiles::unzip_gz_files(paths);
        let paths = rawfiles::fix_suffices(paths, ".mmclx")?;
        let mut request = self.request(uuids);
        request.input("raw", paths.clone());
        let reply = self.transform(&request).await?;
        self.finish(uuids, reply, paths, raw_uuids);
        Ok(())
    }

    async fn basta(&self, uuids: &mut Uuids) -> CloudnetResult<()> {
        let options = DownloadOptions {
            largest_only: true,
            ..Default::default()
        };
        let (paths, raw_uuids) = self.download(&options).await?;
        let mut request = self.request(uuids);
        request.input("raw", paths.clone());
        let reply = self.transform(&request).await?;
        self.finish(uuids, reply, paths, raw_uuids);
        Ok(())
    }

    async fn copernicus(&self, uuids: &mut Uuids) -> CloudnetResult<()> {
        let (paths, raw_uuids) = self.download(&DownloadOptions::default()).await?;
        let mut request = self.request(uuids);
        request.input("raw", paths.clone());
        let range_offset = self
            .calibration_number("range_offset")
            .await?
            .unwrap_or(0.0);
        request.option("range_offset", range_offset);
        let reply = self.transform(&request).await?;
        self.finish(uuids, reply, paths, raw_uuids);
        Ok(())
    }

    async fn galileo(&self, uuids: &mut Uuids) -> CloudnetResult<()> {
        let (paths, raw_uuids) = self.download(&DownloadOptions::default()).await?;
        let mut request = self.request(uuids);
        request.input("raw", paths.clone());
        let reply = self.transform(&request).await?;
        self.finish(uuids, reply, paths, raw_uuids);
        Ok(())
    }

    // === Ceilometers and lidars ===

    async fn chm_lidar(&self, uuids: &mut Uuids) -> CloudnetResult<()> {
        let (paths, raw_uuids) = self.download(&DownloadOptions::default()).await?;
        let mut request = self.request(uuids);
        request.input("raw", paths.clone());
        self.add_ceilo_calibration(&mut request).await?;
        let reply = self.transform(&request).await?;
        self.finish(uuids, reply, paths, raw_uuids);
        Ok(())
    }

    async fn text_ceilometer(&self, uuids: &mut Uuids) -> CloudnetResult<()> {
        let (mut paths, raw_uuids) = self.download(&DownloadOptions::default()).await?;
        paths.sort();
        let daily_path = self.concat_daily(&paths)?;
        let mut request = self.request(uuids);
        request.input("raw", vec![daily_path]);
        self.add_ceilo_calibration(&mut request).await?;
        let reply = self.transform(&request).await?;
        uuids.product = Some(reply.uuid);
        uuids.raw = raw_uuids;
        Ok(())
    }

    async fn cl51(&self, uuids: &mut Uuids) -> CloudnetResult<()> {
        // Norunda files roll over at local midnight.
        let (mut paths, raw_uuids) = if self.params.site.id == "norunda" {
            self.processor
                .download_adjoining_daily_files(self.params, &self.raw_dir)
                .await?
        } else {
            self.download(&DownloadOptions::default()).await?
        };
        paths.sort();
        let daily_path = self.concat_daily(&paths)?;
        let mut request = self.request(uuids);
        request.input("raw", vec![daily_path]);
        self.add_ceilo_calibration(&mut request).await?;
        let reply = self.transform(&request).await?;
        uuids.product = Some(reply.uuid);
        uuids.raw = raw_uuids;
        Ok(())
    }

    async fn ct25k(&self, uuids: &mut Uuids) -> CloudnetResult<()> {
        let (mut paths, raw_uuids) = self.download(&DownloadOptions::default()).await?;
        paths.sort();
        let mut paths = rawfiles::unzip_gz_files(paths);
        paths.sort();
        let daily_path = self.concat_daily(&paths)?;
        let mut request = self.request(uuids);
        request.input("raw", vec![daily_path]);
        self.add_ceilo_calibration(&mut request).await?;
        let reply = self.transform(&request).await?;
        uuids.product = Some(reply.uuid);
        uuids.raw = raw_uuids;
        Ok(())
    }

    async fn cl61d(&self, uuids: &mut Uuids) -> CloudnetResult<()> {
        let options = DownloadOptions {
            exclude_pattern: Some("clu-generated".to_string()),
            ..Default::default()
        };
        let (paths, raw_uuids) = self.download(&options).await?;
        let mut request = self.request(uuids);
        request.input("raw", paths.clone());
        self.add_ceilo_calibration(&mut request).await?;
        let reply = self.transform(&request).await?;
        self.finish(uuids, reply, paths, raw_uuids);
        Ok(())
    }

    async fn pollyxt(&self, uuids: &mut Uuids) -> CloudnetResult<()> {
        let (paths, raw_uuids) = self.download(&DownloadOptions::default()).await?;
        let mut request = self.request(uuids);
        request.input("raw", paths.clone());
        let snr_limit = self.calibration_number("snr_limit").await?.unwrap_or(25.0);
        request.option("snr_limit", snr_limit);
        let reply = self.transform(&request).await?;
        self.finish(uuids, reply, paths, raw_uuids);
        Ok(())
    }

    async fn halo_calibrated(&self, uuids: &mut Uuids) -> CloudnetResult<()> {
        let options = DownloadOptions {
            largest_only: true,
            ..Default::default()
        };
        let (paths, raw_uuids) = self.download(&options).await?;
        let mut request = self.request(uuids);
        request.input("raw", paths);
        request.option("reader", "harmonize");
        let reply = self.transform(&request).await?;
        uuids.product = Some(reply.uuid);
        uuids.raw = raw_uuids;
        Ok(())
    }

    // === Doppler lidars ===

    async fn halo_stare(&self, uuids: &mut Uuids) -> CloudnetResult<()> {
        // Co files either have a "co" tag or no tags at all.
        let co_options = DownloadOptions {
            filename_prefix: Some("Stare".to_string()),
            filename_suffix: Some(".hpl".to_string()),
            exclude_tag_subset: Some(vec!["cross".to_string()]),
            ..Default::default()
        };
        let (paths_co, uuids_co) = self.download_into("co", &co_options, None).await?;
        // Cross files should always have a "cross" tag.
        let cross_options = DownloadOptions {
            filename_prefix: Some("Stare".to_string()),
            filename_suffix: Some(".hpl".to_string()),
            include_tag_subset: Some(vec!["cross".to_string()]),
            allow_empty: true,
            ..Default::default()
        };
        let (paths_cross, uuids_cross) = self.download_into("cross", &cross_options, None).await?;
        // Background files span the previous day as well.
        let bg_options = DownloadOptions {
            filename_prefix: Some("Background".to_string()),
            filename_suffix: Some(".txt".to_string()),
            ..Default::default()
        };
        let bg_dates = DateSelector::Range(self.params.date - Duration::days(1), self.params.date);
        let (paths_bg, _) = self.download_into("bg", &bg_options, Some(bg_dates)).await?;

        let mut request = self.request(uuids);
        request.input("raw", paths_co);
        request.input("cross", paths_cross);
        request.input("background", paths_bg);
        let reply = self.transform(&request).await?;
        checks::check_zenith_angle(&self.output_path)?;
        uuids.product = Some(reply.uuid);
        uuids.raw = [uuids_co, uuids_cross].concat();
        Ok(())
    }

    async fn halo_wind(&self, uuids: &mut Uuids) -> CloudnetResult<()> {
        let options = DownloadOptions {
            include_pattern: Some(r".*\.hpl".to_string()),
            exclude_pattern: Some("Stare.*".to_string()),
            exclude_tag_subset: Some(vec!["cross".to_string()]),
            ..Default::default()
        };
        let (paths, raw_uuids) = self.download(&options).await?;
        let mut request = self.request(uuids);
        request.input("raw", paths.clone());
        self.add_azimuth_offset(&mut request).await?;
        let reply = self.transform(&request).await?;
        self.finish(uuids, reply, paths, raw_uuids);
        Ok(())
    }

    async fn wls200s_wind(&self, uuids: &mut Uuids) -> CloudnetResult<()> {
        let options = DownloadOptions {
            include_pattern: Some(r".*vad.*\.nc.*".to_string()),
            ..Default::default()
        };
        let (paths, raw_uuids) = self.download(&options).await?;
        let paths = rawfiles::unzip_gz_files(paths);
        let mut request = self.request(uuids);
        request.input("raw", paths.clone());
        self.add_azimuth_offset(&mut request).await?;
        let reply = self.transform(&request).await?;
        self.finish(uuids, reply, paths, raw_uuids);
        Ok(())
    }

    async fn wls70_wind(&self, uuids: &mut Uuids) -> CloudnetResult<()> {
        let options = DownloadOptions {
            include_pattern: Some(r".*\.rtd".to_string()),
            ..Default::default()
        };
        let (paths, raw_uuids) = self.download(&options).await?;
        let mut request = self.request(uuids);
        request.input("raw", paths.clone());
        self.add_azimuth_offset(&mut request).await?;
        let reply = self.transform(&request).await?;
        self.finish(uuids, reply, paths, raw_uuids);
        Ok(())
    }

    // === Microwave radiometers ===

    async fn hatpro_mwr(&self, uuids: &mut Uuids) -> CloudnetResult<()> {
        let native = DownloadOptions {
            include_pattern: Some(r"\.(lwp|iwv)$".to_string()),
            exclude_pattern: Some("scan".to_string()),
            ..Default::default()
        };
        let result = self.download(&native).await;
        let (paths, raw_uuids, harmonize) = match result {
            Ok((paths, raw_uuids)) => (paths, raw_uuids, false),
            // Some sites submit pre-processed NetCDF instead of native files.
            Err(CloudnetError::RawDataMissing(_)) => {
                let fallback = DownloadOptions {
                    include_pattern: Some(r"(ufs_l2a\.nc$|clwvi.*\.nc$|\.lwp.*\.nc$)".to_string()),
                    ..Default::default()
                };
                let (paths, raw_uuids) = self.download(&fallback).await?;
                (paths, raw_uuids, true)
            }
            Err(err) => return Err(err),
        };

        let mut request = self.request(uuids);
        request.input("raw", paths.clone());
        if harmonize {
            request.option("reader", "harmonize");
        }
        let reply = self.transform(&request).await?;
        checks::check_hatpro_lwp(&self.output_path)?;
        self.finish(uuids, reply, paths, raw_uuids);
        Ok(())
    }

    async fn radiometrics(&self, uuids: &mut Uuids) -> CloudnetResult<()> {
        let (paths, raw_uuids) = self.download(&DownloadOptions::default()).await?;
        let paths = rawfiles::unzip_gz_files(paths);
        let mut request = self.request(uuids);
        request.input("raw", paths.clone());
        let reply = self.transform(&request).await?;
        self.finish(uuids, reply, paths, raw_uuids);
        Ok(())
    }

    async fn hatpro_l1c(&self, uuids: &mut Uuids) -> CloudnetResult<()> {
        let calibration = self
            .processor
            .fetch_calibration(&self.params.instrument.pid, self.params.date)
            .await?
            .ok_or_else(|| {
                CloudnetError::RawDataMissing(
                    "Skipping due to missing mwrpy coefficients".to_string(),
                )
            })?;

        let options = DownloadOptions {
            include_pattern: Some(r"\.(brt|hkd|met|irt|blb|bls)$".to_string()),
            ..Default::default()
        };
        let (paths, raw_uuids) = self.download(&options).await?;

        let mut coefficient_paths = Vec::new();
        for link in calibration
            .strings("coefficientLinks")
            .unwrap_or_default()
        {
            let filename = link.rsplit('/').next().unwrap_or("coefficient");
            let full_path = self.raw_dir.join(filename);
            self.processor.md_api.download_file(&link, &full_path).await?;
            coefficient_paths.push(full_path);
        }

        let mut request = self.request(uuids);
        request.input("raw", paths.clone());
        request.input("coefficients", coefficient_paths);
        if let Some(data) = calibration.data.as_object() {
            for (key, value) in data {
                if key != "coefficientLinks" {
                    request.option(key, value.clone());
                }
            }
        }
        let reply = self.transform(&request).await?;
        self.finish(uuids, reply, paths, raw_uuids);
        Ok(())
    }

    // === Disdrometers ===

    async fn parsivel(&self, uuids: &mut Uuids) -> CloudnetResult<()> {
        let (paths, raw_uuids) = self.download(&DownloadOptions::default()).await?;
        let mut request = self.request(uuids);
        if paths.len() == 1 && paths[0].extension().and_then(|e| e.to_str()) == Some("nc") {
            request.option("reader", "harmonize");
        } else {
            let calibration = self
                .processor
                .fetch_calibration(&self.params.instrument.pid, self.params.date)
                .await?;
            if let Some(calibration) = calibration {
                if let Some(telegram) = calibration.data.get("telegram") {
                    request.option("telegram", telegram.clone());
                }
                if calibration.boolean("missing_timestamps") == Some(true) {
                    request.option("missing_timestamps", true);
                }
            }
        }
        request.input("raw", paths.clone());
        let reply = self.transform(&request).await?;
        self.finish(uuids, reply, paths, raw_uuids);
        Ok(())
    }

    async fn thies_lnm(&self, uuids: &mut Uuids) -> CloudnetResult<()> {
        let (mut paths, raw_uuids) = self.download(&DownloadOptions::default()).await?;
        paths.sort();
        let daily_path = self.concat_daily(&paths)?;
        let mut request = self.request(uuids);
        request.input("raw", vec![daily_path]);
        if self.params.site.id == "leipzig-lim" {
            request.option("truncate_columns", 23);
        }
        let reply = self.transform(&request).await?;
        uuids.product = Some(reply.uuid);
        uuids.raw = raw_uuids;
        Ok(())
    }

    // === Weather stations and rain radars ===

    async fn weather_station(&self, uuids: &mut Uuids) -> CloudnetResult<()> {
        const SUPPORTED_SITES: &[&str] = &[
            "palaiseau",
            "lindenberg",
            "granada",
            "kenttarova",
            "hyytiala",
            "bucharest",
            "galati",
        ];
        if !SUPPORTED_SITES.contains(&self.params.site.id.as_str()) {
            return Err(CloudnetError::SkipTask(
                "Processing not implemented yet".to_string(),
            ));
        }
        let (mut paths, raw_uuids) =
            if matches!(self.params.site.id.as_str(), "kenttarova" | "bucharest") {
                self.processor
                    .download_adjoining_daily_files(self.params, &self.raw_dir)
                    .await?
            } else {
                self.download(&DownloadOptions {
                    largest_only: true,
                    ..Default::default()
                })
                .await?
            };
        paths.sort();
        let mut request = self.request(uuids);
        request.input("raw", paths);
        if self.params.site.id == "lindenberg" {
            request.option("reader", "harmonize");
        }
        let reply = self.transform(&request).await?;
        uuids.product = Some(reply.uuid);
        uuids.raw = raw_uuids;
        Ok(())
    }

    async fn mrr_pro(&self, uuids: &mut Uuids) -> CloudnetResult<()> {
        let (paths, raw_uuids) = self.download(&DownloadOptions::default()).await?;
        let mut request = self.request(uuids);
        request.input("raw", paths.clone());
        let reply = self.transform(&request).await?;
        self.finish(uuids, reply, paths, raw_uuids);
        Ok(())
    }

    // === Shared plumbing ===

    async fn download(
        &self,
        options: &DownloadOptions,
    ) -> CloudnetResult<(Vec<PathBuf>, Vec<Uuid>)> {
        self.processor
            .download_instrument(
                &self.params.site.id,
                DateSelector::Single(self.params.date),
                &self.params.instrument.instrument_id,
                &self.params.instrument.pid,
                &self.raw_dir,
                options,
            )
            .await
    }

    async fn download_into(
        &self,
        subdir: &str,
        options: &DownloadOptions,
        date: Option<DateSelector>,
    ) -> CloudnetResult<(Vec<PathBuf>, Vec<Uuid>)> {
        let directory = self.raw_dir.join(subdir);
        std::fs::create_dir_all(&directory)?;
        self.processor
            .download_instrument(
                &self.params.site.id,
                date.unwrap_or(DateSelector::Single(self.params.date)),
                &self.params.instrument.instrument_id,
                &self.params.instrument.pid,
                &directory,
                options,
            )
            .await
    }

    fn request(&self, uuids: &Uuids) -> TransformRequest {
        TransformRequest {
            product_id: self.params.product.id.clone(),
            site: self.processor.site_meta(&self.params.site),
            date: self.params.date,
            instrument: Some(InstrumentMeta {
                uuid: self.params.instrument.uuid,
                pid: self.params.instrument.pid.clone(),
                instrument_id: self.params.instrument.instrument_id.clone(),
            }),
            model_id: None,
            uuid: uuids.volatile,
            inputs: Default::default(),
            options: Default::default(),
            output_path: self.output_path.clone(),
        }
    }

    async fn transform(&self, request: &TransformRequest) -> CloudnetResult<TransformReply> {
        self.processor
            .science
            .transform(request)
            .await
            .map_err(CloudnetError::from)
    }

    /// Record the product UUID and the raw files the transform accepted.
    fn finish(
        &self,
        uuids: &mut Uuids,
        reply: TransformReply,
        paths: Vec<PathBuf>,
        raw_uuids: Vec<Uuid>,
    ) {
        uuids.product = Some(reply.uuid);
        uuids.raw = match &reply.valid_inputs {
            Some(valid) => rawfiles::valid_uuids(&raw_uuids, &paths, valid),
            None => raw_uuids,
        };
    }

    fn concat_daily(&self, paths: &[PathBuf]) -> CloudnetResult<PathBuf> {
        let daily_path = self.raw_dir.join("daily.txt");
        rawfiles::concatenate_text_files(paths, &daily_path)?;
        Ok(daily_path)
    }

    async fn calibration_number(&self, key: &str) -> CloudnetResult<Option<f64>> {
        let calibration = self
            .processor
            .fetch_calibration(&self.params.instrument.pid, self.params.date)
            .await?;
        Ok(calibration.and_then(|c| c.number(key)))
    }

    async fn add_ceilo_calibration(&self, request: &mut TransformRequest) -> CloudnetResult<()> {
        let calibration = self
            .processor
            .fetch_calibration(&self.params.instrument.pid, self.params.date)
            .await?;
        if let Some(calibration) = calibration {
            if let Some(factor) = calibration.number("calibration_factor") {
                request.option("calibration_factor", factor);
            }
            if let Some(range_corrected) = calibration.boolean("range_corrected") {
                request.option("range_corrected", range_corrected);
            }
        }
        Ok(())
    }

    async fn add_azimuth_offset(&self, request: &mut TransformRequest) -> CloudnetResult<()> {
        if let Some(offset) = self.calibration_number("azimuth_offset_deg").await? {
            request.option("azimuth_offset_deg", offset);
        }
        Ok(())
    }
}
