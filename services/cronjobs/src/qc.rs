//! Enqueue a `qc` task for every file measured yesterday.

use chrono::Duration;
use cloudnet_api::MetadataClient;
use cloudnet_common::time::{utc_now, utc_today};
use cloudnet_common::{CloudnetResult, Config, ProductFileMetadata, TaskPublish, TaskType};
use tracing::info;

pub async fn run(_config: &Config, md_api: &MetadataClient) -> CloudnetResult<()> {
    let yesterday = utc_today() - Duration::days(1);
    let query = vec![("date".to_string(), yesterday.to_string())];

    let regular_files = md_api.files(&query).await?;
    info!(
        "Found {} regular {} to check",
        regular_files.len(),
        plural(regular_files.len())
    );

    let mut models_query = query.clone();
    models_query.push(("allModels".to_string(), "true".to_string()));
    let model_files = md_api.model_files(&models_query).await?;
    info!(
        "Found {} model {} to check",
        model_files.len(),
        plural(model_files.len())
    );

    for file in regular_files.iter().chain(model_files.iter()) {
        publish_qc_task(md_api, file).await?;
    }
    Ok(())
}

async fn publish_qc_task(
    md_api: &MetadataClient,
    file: &ProductFileMetadata,
) -> CloudnetResult<()> {
    let task = TaskPublish {
        task_type: TaskType::Qc,
        site_id: file.site_id().unwrap_or_default().to_string(),
        product_id: file.product_id().unwrap_or("model").to_string(),
        measurement_date: file.measurement_date,
        instrument_info_uuid: file.instrument_info_uuid(),
        model_id: file.model_id().map(str::to_string),
        scheduled_at: utc_now(),
        priority: 100,
        options: None,
    };
    info!(task = %serde_json::to_string(&task).unwrap_or_default(), "Publish task");
    md_api.queue_publish(&task).await
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        "file"
    } else {
        "files"
    }
}
