//! Scan for freezable files and enqueue `freeze` tasks.

use chrono::Duration;
use cloudnet_api::MetadataClient;
use cloudnet_common::time::utc_now;
use cloudnet_common::{
    CloudnetResult, Config, ProductFileMetadata, TaskPublish, TaskType,
};
use tracing::info;
use uuid::Uuid;

pub async fn run(config: &Config, md_api: &MetadataClient) -> CloudnetResult<()> {
    let files = find_files_to_freeze(config, md_api).await?;
    for file in files {
        publish_freeze_task(md_api, &file).await?;
    }
    Ok(())
}

async fn find_files_to_freeze(
    config: &Config,
    md_api: &MetadataClient,
) -> CloudnetResult<Vec<ProductFileMetadata>> {
    let regular_files = md_api.files(&freeze_query(config.freeze_after_days)).await?;
    let mut freezable = Vec::new();
    for file in regular_files {
        if is_freezable(md_api, &file.uuid).await? {
            freezable.push(file);
        }
    }
    info!(
        "Found {} regular {} to freeze",
        freezable.len(),
        plural(freezable.len())
    );

    let mut models_query = freeze_query(config.freeze_model_after_days);
    models_query.push(("allModels".to_string(), "true".to_string()));
    let model_files = md_api.model_files(&models_query).await?;
    info!(
        "Found {} model {} to freeze",
        model_files.len(),
        plural(model_files.len())
    );

    freezable.extend(model_files);
    Ok(freezable)
}

fn freeze_query(freeze_after_days: i64) -> Vec<(String, String)> {
    let released_before = utc_now() - Duration::days(freeze_after_days);
    vec![
        ("volatile".to_string(), "true".to_string()),
        ("releasedBefore".to_string(), released_before.to_rfc3339()),
    ]
}

/// A file is freezable when everything in its source ancestry is already
/// stable and nothing in it is experimental; only the root may still be
/// volatile.
async fn is_freezable(md_api: &MetadataClient, file_uuid: &Uuid) -> CloudnetResult<bool> {
    let mut pending = vec![(*file_uuid, 0u32)];
    while let Some((uuid, depth)) = pending.pop() {
        let file = md_api.file(&uuid).await?;
        if depth > 0 && file.volatile {
            return Ok(false);
        }
        if file.product.as_ref().is_some_and(|p| p.experimental) {
            return Ok(false);
        }
        pending.extend(file.source_file_ids.iter().map(|src| (*src, depth + 1)));
    }
    Ok(true)
}

async fn publish_freeze_task(
    md_api: &MetadataClient,
    file: &ProductFileMetadata,
) -> CloudnetResult<()> {
    let task = TaskPublish {
        task_type: TaskType::Freeze,
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
