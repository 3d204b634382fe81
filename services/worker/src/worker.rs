//! The task loop: receive, classify, dispatch, report.

use chrono::NaiveDate;
use cloudnet_api::alert::{send_slack_alert, AlertContext, AlertSource};
use cloudnet_common::time::{utc_now, utc_today};
use cloudnet_common::{
    CloudnetError, CloudnetResult, Config, Product, Site, Task, TaskOptions, TaskPublish, TaskType,
};
use processing::{
    instrument::process_instrument, jobs, model::process_model, product::process_me,
    product::process_product, InstrumentParams, ModelParams, ProcessParams, Processor,
    ProductParams,
};
use tracing::{info, warn};

use crate::memory_log::LogBuffer;

/// Experimental products that may still be scheduled as follow-ups.
const EXPERIMENTAL_FOLLOWUPS: &[&str] = &["cpr-simulation", "epsilon-lidar"];

pub struct Worker {
    processor: Processor,
    config: Config,
    http: reqwest::Client,
    log_buffer: LogBuffer,
    pub n_processed_tasks: usize,
}

impl Worker {
    pub fn new(
        processor: Processor,
        config: Config,
        http: reqwest::Client,
        log_buffer: LogBuffer,
    ) -> Self {
        Self {
            processor,
            config,
            http,
            log_buffer,
            n_processed_tasks: 0,
        }
    }

    /// Get one task from the queue and process it. Returns false when the
    /// queue was empty.
    pub async fn process_task(&mut self) -> CloudnetResult<bool> {
        let Some(task) = self.processor.md_api.queue_receive().await? else {
            return Ok(false);
        };
        self.log_buffer.clear();
        info!(task = %serde_json::to_string(&task).unwrap_or_default(), "Processing task");

        let outcome = self.run_task(&task).await;
        match outcome {
            Ok(()) => self.processor.md_api.queue_complete(task.id).await?,
            Err(err) if err.is_skip() => {
                warn!("Skipped task: {err}");
                self.processor.md_api.queue_complete(task.id).await?;
            }
            Err(err) => {
                tracing::error!("Failed to process task: {err}");
                let context = AlertContext {
                    site: Some(task.site_id.clone()),
                    date: Some(task.measurement_date.to_string()),
                    product: Some(task.product_id.clone()),
                    model: task.model_id.clone(),
                };
                send_slack_alert(
                    &self.config,
                    &self.http,
                    AlertSource::Data,
                    &err.to_string(),
                    Some(&self.log_buffer.contents()),
                    &context,
                )
                .await;
                self.processor.md_api.queue_fail(task.id).await?;
            }
        }
        info!("Task processed");
        self.n_processed_tasks += 1;
        Ok(true)
    }

    async fn run_task(&self, task: &Task) -> CloudnetResult<()> {
        let site = self.processor.get_site(&task.site_id).await?;
        let product = self.processor.get_product(&task.product_id).await?;
        let date = task.measurement_date;

        // Per-task scratch space, removed on all exit paths.
        let directory = tempfile::tempdir()?;
        let dir = directory.path();

        if product.id == "model" {
            let model_id = task
                .model_id
                .as_deref()
                .ok_or_else(|| CloudnetError::Internal("Model task without modelId".to_string()))?;
            let params = ModelParams {
                site: site.clone(),
                date,
                product: product.clone(),
                model: self.processor.get_model(model_id).await?,
            };
            let wrapped = ProcessParams::Model(params.clone());
            match task.task_type {
                TaskType::Plot => jobs::update_plots(&self.processor, &wrapped, dir).await?,
                TaskType::Qc => jobs::update_qc(&self.processor, &wrapped, dir).await?,
                TaskType::Freeze => jobs::freeze(&self.processor, &wrapped, dir).await?,
                TaskType::Hkd => {
                    return Err(CloudnetError::skip(
                        "Housekeeping not supported for model products",
                    ))
                }
                TaskType::Dvas => {
                    return Err(CloudnetError::skip("DVAS not supported for model products"))
                }
                TaskType::Process => {
                    process_model(&self.processor, &params, dir).await?;
                    if task.options.derived_products {
                        self.publish_followup_tasks(&site, &product, &wrapped).await?;
                    }
                }
                TaskType::Unknown => {
                    return Err(CloudnetError::Internal("Unknown task type".to_string()))
                }
            }
        } else if matches!(product.id.as_str(), "l3-cf" | "l3-lwc" | "l3-iwc") {
            let params = ModelParams {
                site: site.clone(),
                date,
                product: product.clone(),
                // Hard-coded evaluation model for now.
                model: self.processor.get_model("ecmwf").await?,
            };
            let wrapped = ProcessParams::Model(params.clone());
            match task.task_type {
                TaskType::Plot => jobs::update_plots(&self.processor, &wrapped, dir).await?,
                TaskType::Qc => jobs::update_qc(&self.processor, &wrapped, dir).await?,
                TaskType::Freeze => jobs::freeze(&self.processor, &wrapped, dir).await?,
                TaskType::Hkd => {
                    return Err(CloudnetError::skip(
                        "Housekeeping not supported for L3 products",
                    ))
                }
                TaskType::Dvas => {
                    return Err(CloudnetError::skip("DVAS not supported for L3 products"))
                }
                TaskType::Process => {
                    process_me(&self.processor, &params, dir).await?;
                    if task.options.derived_products {
                        self.publish_followup_tasks(&site, &product, &wrapped).await?;
                    }
                }
                TaskType::Unknown => {
                    return Err(CloudnetError::Internal("Unknown task type".to_string()))
                }
            }
        } else if !product.source_instrument_ids.is_empty() {
            let instrument_uuid = task.instrument_info_uuid.ok_or_else(|| {
                CloudnetError::Internal("Instrument task without instrumentInfoUuid".to_string())
            })?;
            let params = InstrumentParams {
                site: site.clone(),
                date,
                product: product.clone(),
                instrument: self.processor.get_instrument(&instrument_uuid).await?,
            };
            let wrapped = ProcessParams::Instrument(params.clone());
            match task.task_type {
                TaskType::Plot => jobs::update_plots(&self.processor, &wrapped, dir).await?,
                TaskType::Qc => jobs::update_qc(&self.processor, &wrapped, dir).await?,
                TaskType::Freeze => jobs::freeze(&self.processor, &wrapped, dir).await?,
                TaskType::Hkd => jobs::hkd(&self.processor, &params).await?,
                TaskType::Dvas => {
                    return Err(CloudnetError::skip(
                        "DVAS not supported for instrument products",
                    ))
                }
                TaskType::Process => {
                    process_instrument(&self.processor, &params, dir).await?;
                    if task.options.derived_products {
                        self.publish_followup_tasks(&site, &product, &wrapped).await?;
                    }
                }
                TaskType::Unknown => {
                    return Err(CloudnetError::Internal("Unknown task type".to_string()))
                }
            }
        } else {
            let instrument = match task.instrument_info_uuid {
                Some(uuid) => Some(self.processor.get_instrument(&uuid).await?),
                None => None,
            };
            let params = ProductParams {
                site: site.clone(),
                date,
                product: product.clone(),
                instrument,
            };
            let wrapped = ProcessParams::Product(params.clone());
            match task.task_type {
                TaskType::Plot => jobs::update_plots(&self.processor, &wrapped, dir).await?,
                TaskType::Qc => jobs::update_qc(&self.processor, &wrapped, dir).await?,
                TaskType::Freeze => jobs::freeze(&self.processor, &wrapped, dir).await?,
                TaskType::Dvas => jobs::upload_to_dvas(&self.processor, &wrapped).await?,
                TaskType::Hkd => {
                    return Err(CloudnetError::skip("Housekeeping not supported for products"))
                }
                TaskType::Process => {
                    process_product(&self.processor, &params, dir).await?;
                    if task.options.derived_products {
                        self.publish_followup_tasks(&site, &product, &wrapped).await?;
                    }
                }
                TaskType::Unknown => {
                    return Err(CloudnetError::Internal("Unknown task type".to_string()))
                }
            }
        }
        Ok(())
    }

    /// Publish a `process` task for every product derived from this one.
    async fn publish_followup_tasks(
        &self,
        site: &Site,
        product: &Product,
        params: &ProcessParams,
    ) -> CloudnetResult<()> {
        if site.is_hidden() || site.is_model_only() {
            info!("Site is model / hidden, will not publish followup tasks");
            return Ok(());
        }
        for product_id in &product.derived_product_ids {
            self.publish_followup_task(product_id, params).await?;
        }
        Ok(())
    }

    async fn publish_followup_task(
        &self,
        product_id: &str,
        params: &ProcessParams,
    ) -> CloudnetResult<()> {
        let product = self.processor.get_product(product_id).await?;
        if product.experimental && !EXPERIMENTAL_FOLLOWUPS.contains(&product.id.as_str()) {
            info!(
                product = %product.id,
                "Will not publish task for experimental product"
            );
            return Ok(());
        }

        let instrument = if product.is_instrument_product() {
            match params.instrument() {
                Some(instrument) => Some(instrument),
                None => {
                    warn!(
                        product = %product.id,
                        "Cannot derive instrument product without an instrument"
                    );
                    return Ok(());
                }
            }
        } else {
            None
        };

        let mut query = vec![
            ("site".to_string(), params.site().id.clone()),
            ("date".to_string(), params.date().to_string()),
            ("product".to_string(), product.id.clone()),
        ];
        if let Some(instrument) = instrument {
            query.push(("instrumentPid".to_string(), instrument.pid.clone()));
        }
        let metadata = self.processor.md_api.files(&query).await?;
        let is_frozen = metadata.len() == 1 && !metadata[0].volatile;

        let delay = followup_delay(is_frozen, product.source_product_ids.len());
        let task = TaskPublish {
            task_type: TaskType::Process,
            site_id: params.site().id.clone(),
            product_id: product.id.clone(),
            measurement_date: params.date(),
            instrument_info_uuid: instrument.map(|i| i.uuid),
            model_id: None,
            scheduled_at: utc_now() + delay,
            priority: followup_priority(utc_today(), params.date()),
            options: Some(TaskOptions {
                derived_products: true,
            }),
        };
        info!(task = %serde_json::to_string(&task).unwrap_or_default(), "Publish task");
        self.processor.md_api.queue_publish(&task).await
    }
}

/// Scheduling delay for a follow-up task.
///
/// Multi-source products wait for their peers; frozen targets are
/// reprocessings and run later still.
pub fn followup_delay(is_frozen: bool, n_source_products: usize) -> chrono::Duration {
    if is_frozen {
        chrono::Duration::hours(1)
    } else if n_source_products > 1 {
        chrono::Duration::minutes(15)
    } else {
        chrono::Duration::zero()
    }
}

/// Newer measurement dates run first; clamped to 0..=10.
pub fn followup_priority(today: NaiveDate, measurement_date: NaiveDate) -> i64 {
    (today - measurement_date).num_days().abs().min(10)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn followup_delay_rules() {
        assert_eq!(followup_delay(false, 1), chrono::Duration::zero());
        assert_eq!(followup_delay(false, 3), chrono::Duration::minutes(15));
        assert_eq!(followup_delay(true, 1), chrono::Duration::hours(1));
        // Frozen target wins over multi-source.
        assert_eq!(followup_delay(true, 3), chrono::Duration::hours(1));
    }

    #[test]
    fn followup_priority_clamps() {
        let today = NaiveDate::from_ymd_opt(2020, 10, 22).unwrap();
        assert_eq!(followup_priority(today, today), 0);
        assert_eq!(
            followup_priority(today, NaiveDate::from_ymd_opt(2020, 10, 19).unwrap()),
            3
        );
        assert_eq!(
            followup_priority(today, NaiveDate::from_ymd_opt(2019, 1, 1).unwrap()),
            10
        );
        // Future dates count as distance too.
        assert_eq!(
            followup_priority(today, NaiveDate::from_ymd_opt(2020, 10, 24).unwrap()),
            2
        );
    }
}
