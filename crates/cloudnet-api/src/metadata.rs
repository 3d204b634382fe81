//! Typed client for the data portal metadata API and task queue.
//!
//! This is the sole HTTP speaker to the data portal: every other component
//! routes its metadata reads and writes through here. Mutating endpoints use
//! HTTP Basic auth with the data-submission credential.

use chrono::NaiveDate;
use cloudnet_common::{
    Calibration, CloudnetError, CloudnetResult, Config, Instrument, Model, Product,
    ProductFileMetadata, ProductPutPayload, QualityReport, RawFileMetadata, RawFileStatus, Site,
    Task, TaskPublish, VisualizationPayload,
};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::retry::send_with_retry;

/// Query parameters as key-value pairs; repeated keys express list filters.
pub type Query = Vec<(String, String)>;

/// Client for the Cloudnet data portal.
#[derive(Clone)]
pub struct MetadataClient {
    client: Client,
    base_url: String,
    auth: (String, String),
}

impl MetadataClient {
    pub fn new(config: &Config, client: Client) -> Self {
        Self {
            client,
            base_url: config.dataportal_url.clone(),
            auth: config.data_submission_auth.clone(),
        }
    }

    // === Generic operations ===

    /// GET an endpoint and decode the JSON response.
    pub async fn get<T: DeserializeOwned>(&self, endpoint: &str, query: &Query) -> CloudnetResult<T> {
        let url = format!("{}/{}", self.base_url, endpoint);
        debug!(%url, "GET");
        let response = send_with_retry(self.client.get(&url).query(query)).await?;
        Ok(response.json().await.map_err(|e| CloudnetError::Http {
            status: None,
            message: format!("Invalid JSON from {endpoint}: {e}"),
        })?)
    }

    /// POST a JSON body to an endpoint.
    pub async fn post<T: Serialize>(&self, endpoint: &str, body: &T) -> CloudnetResult<()> {
        let url = format!("{}/{}", self.base_url, endpoint);
        debug!(%url, "POST");
        let request = self
            .client
            .post(&url)
            .basic_auth(&self.auth.0, Some(&self.auth.1))
            .json(body);
        send_with_retry(request).await?;
        Ok(())
    }

    /// PUT a JSON body to an endpoint resource.
    pub async fn put<T: Serialize>(
        &self,
        endpoint: &str,
        resource: &str,
        body: &T,
    ) -> CloudnetResult<()> {
        let url = format!("{}/{}/{}", self.base_url, endpoint, resource);
        debug!(%url, "PUT");
        let request = self
            .client
            .put(&url)
            .basic_auth(&self.auth.0, Some(&self.auth.1))
            .json(body);
        send_with_retry(request).await?;
        Ok(())
    }

    /// DELETE an endpoint.
    pub async fn delete(&self, endpoint: &str, query: &Query) -> CloudnetResult<()> {
        let url = format!("{}/{}", self.base_url, endpoint);
        debug!(%url, "DELETE");
        let request = self
            .client
            .delete(&url)
            .basic_auth(&self.auth.0, Some(&self.auth.1))
            .query(query);
        send_with_retry(request).await?;
        Ok(())
    }

    // === Reference data ===

    pub async fn get_site(&self, site_id: &str) -> CloudnetResult<Site> {
        self.get(&format!("api/sites/{site_id}"), &Vec::new()).await
    }

    pub async fn get_product(&self, product_id: &str) -> CloudnetResult<Product> {
        self.get(&format!("api/products/{product_id}"), &Vec::new())
            .await
    }

    pub async fn get_instrument(&self, uuid: &Uuid) -> CloudnetResult<Instrument> {
        self.get(&format!("api/instruments/{uuid}"), &Vec::new())
            .await
    }

    pub async fn get_model(&self, model_id: &str) -> CloudnetResult<Model> {
        self.get(&format!("api/models/{model_id}"), &Vec::new())
            .await
    }

    /// ACTRIS variable definitions per product, used for DVAS records.
    pub async fn product_variables(&self) -> CloudnetResult<serde_json::Value> {
        self.get("api/products/variables", &Vec::new()).await
    }

    // === File listings ===

    pub async fn files(&self, query: &Query) -> CloudnetResult<Vec<ProductFileMetadata>> {
        self.get("api/files", query).await
    }

    pub async fn file(&self, uuid: &Uuid) -> CloudnetResult<ProductFileMetadata> {
        self.get(&format!("api/files/{uuid}"), &Vec::new()).await
    }

    pub async fn file_versions(&self, uuid: &Uuid) -> CloudnetResult<Vec<ProductFileMetadata>> {
        let query = vec![("properties[]".to_string(), "dvasId".to_string())];
        self.get(&format!("api/files/{uuid}/versions"), &query).await
    }

    pub async fn model_files(&self, query: &Query) -> CloudnetResult<Vec<ProductFileMetadata>> {
        self.get("api/model-files", query).await
    }

    pub async fn raw_files(&self, query: &Query) -> CloudnetResult<Vec<RawFileMetadata>> {
        self.get("api/raw-files", query).await
    }

    pub async fn raw_model_files(&self, query: &Query) -> CloudnetResult<Vec<RawFileMetadata>> {
        self.get("api/raw-model-files", query).await
    }

    /// Calibration document for an instrument and date; `None` when the
    /// service has no entry (404).
    pub async fn calibration(
        &self,
        instrument_pid: &str,
        date: NaiveDate,
    ) -> CloudnetResult<Option<Calibration>> {
        let query = vec![
            ("instrumentPid".to_string(), instrument_pid.to_string()),
            ("date".to_string(), date.to_string()),
        ];
        match self.get("api/calibration", &query).await {
            Ok(calibration) => Ok(Some(calibration)),
            Err(err) if err.http_status() == Some(404) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// PID of the instrument the site operators have declared canonical for
    /// (site, date, product); `None` when nothing is configured (404).
    pub async fn nominal_instrument_pid(
        &self,
        site_id: &str,
        date: NaiveDate,
        product_id: &str,
    ) -> CloudnetResult<Option<String>> {
        let query = vec![
            ("site".to_string(), site_id.to_string()),
            ("date".to_string(), date.to_string()),
            ("product".to_string(), product_id.to_string()),
        ];
        let response: Result<serde_json::Value, _> = self.get("api/nominal-instrument", &query).await;
        match response {
            Ok(value) => Ok(value
                .pointer("/nominalInstrument/pid")
                .and_then(|v| v.as_str())
                .map(str::to_string)),
            Err(err) if err.http_status() == Some(404) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Download an arbitrary URL to disk (e.g. MWR coefficient files linked
    /// from calibration documents).
    pub async fn download_file(&self, url: &str, full_path: &std::path::Path) -> CloudnetResult<()> {
        let response = send_with_retry(self.client.get(url)).await?;
        let body = response.bytes().await.map_err(|e| CloudnetError::Http {
            status: None,
            message: e.to_string(),
        })?;
        tokio::fs::write(full_path, &body).await?;
        Ok(())
    }

    /// Citation or acknowledgement text for a file.
    pub async fn reference_text(&self, uuid: &Uuid, kind: &str) -> CloudnetResult<String> {
        let url = format!("{}/api/reference/{uuid}/{kind}", self.base_url);
        let request = self.client.get(&url).query(&[("format", "txt")]);
        let response = send_with_retry(request).await?;
        response.text().await.map_err(|e| CloudnetError::Http {
            status: None,
            message: e.to_string(),
        })
    }

    // === Metadata writes ===

    /// Register a freshly uploaded product file.
    pub async fn put_file(&self, filename: &str, payload: &ProductPutPayload) -> CloudnetResult<()> {
        self.put("files", filename, payload).await
    }

    /// PUT one visualization record per rendered image.
    pub async fn put_images(
        &self,
        images: &[(String, VisualizationPayload)],
    ) -> CloudnetResult<()> {
        for (s3key, payload) in images {
            self.put("visualizations", s3key, payload).await?;
        }
        Ok(())
    }

    pub async fn put_quality(&self, uuid: &Uuid, report: &QualityReport) -> CloudnetResult<()> {
        self.put("quality", &uuid.to_string(), report).await
    }

    /// Advance the status of a raw upload.
    pub async fn update_status(&self, uuid: &Uuid, status: RawFileStatus) -> CloudnetResult<()> {
        self.post("upload-metadata", &json!({"uuid": uuid, "status": status}))
            .await
    }

    pub async fn update_dvas_info(
        &self,
        uuid: &Uuid,
        timestamp: &str,
        dvas_id: i64,
    ) -> CloudnetResult<()> {
        self.post(
            "api/files",
            &json!({"uuid": uuid, "dvasUpdatedAt": timestamp, "dvasId": dvas_id}),
        )
        .await
    }

    pub async fn clean_dvas_info(&self, uuid: &Uuid) -> CloudnetResult<()> {
        self.post(
            "api/files",
            &json!({"uuid": uuid, "dvasUpdatedAt": null, "dvasId": null}),
        )
        .await
    }

    // === Task queue ===

    /// Receive the next task, `None` when the queue is empty (204).
    pub async fn queue_receive(&self) -> CloudnetResult<Option<Task>> {
        let url = format!("{}/queue/receive", self.base_url);
        let response = send_with_retry(self.client.post(&url)).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        Ok(Some(response.json().await.map_err(|e| {
            CloudnetError::Http {
                status: None,
                message: format!("Invalid task JSON: {e}"),
            }
        })?))
    }

    pub async fn queue_complete(&self, task_id: i64) -> CloudnetResult<()> {
        let url = format!("{}/queue/complete/{task_id}", self.base_url);
        send_with_retry(self.client.put(&url)).await?;
        Ok(())
    }

    pub async fn queue_fail(&self, task_id: i64) -> CloudnetResult<()> {
        let url = format!("{}/queue/fail/{task_id}", self.base_url);
        send_with_retry(self.client.put(&url)).await?;
        Ok(())
    }

    pub async fn queue_publish(&self, task: &TaskPublish) -> CloudnetResult<()> {
        self.post("api/queue/publish", task).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudnet_common::TaskType;
    use std::collections::HashMap;

    fn test_config(url: &str) -> Config {
        let env: HashMap<String, String> = [
            ("DATAPORTAL_URL", url),
            ("DATAPORTAL_PUBLIC_URL", "https://cloudnet.fmi.fi"),
            ("STORAGE_SERVICE_URL", "http://storage"),
            ("STORAGE_SERVICE_USER", "test"),
            ("STORAGE_SERVICE_PASSWORD", "test"),
            ("PID_SERVICE_URL", "http://pid"),
            ("FREEZE_AFTER_DAYS", "3"),
            ("FREEZE_MODEL_AFTER_DAYS", "4"),
            ("DVAS_PORTAL_URL", "http://dvas"),
            ("DVAS_ACCESS_TOKEN", "token"),
            ("DVAS_USERNAME", "dvas"),
            ("DVAS_PASSWORD", "dvas"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Config::from_map(&env).unwrap()
    }

    #[tokio::test]
    async fn queue_receive_empty_returns_none() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/queue/receive")
            .with_status(204)
            .create_async()
            .await;

        let client = MetadataClient::new(&test_config(&server.url()), Client::new());
        let task = client.queue_receive().await.unwrap();
        assert!(task.is_none());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn queue_receive_parses_task() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/queue/receive")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"id": 7, "type": "process", "siteId": "bucharest",
                    "productId": "radar", "measurementDate": "2020-10-22",
                    "options": {"derivedProducts": false}}"#,
            )
            .create_async()
            .await;

        let client = MetadataClient::new(&test_config(&server.url()), Client::new());
        let task = client.queue_receive().await.unwrap().unwrap();
        assert_eq!(task.id, 7);
        assert_eq!(task.task_type, TaskType::Process);
        assert_eq!(task.site_id, "bucharest");
    }

    #[tokio::test]
    async fn calibration_404_is_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/calibration")
            .match_query(mockito::Matcher::Any)
            .with_status(404)
            .create_async()
            .await;

        let client = MetadataClient::new(&test_config(&server.url()), Client::new());
        let calibration = client
            .calibration("https://hdl.handle.net/123/abc", NaiveDate::from_ymd_opt(2020, 10, 22).unwrap())
            .await
            .unwrap();
        assert!(calibration.is_none());
    }

    #[tokio::test]
    async fn client_error_surfaces_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/sites/nonexistent")
            .with_status(400)
            .with_body("bad request")
            .create_async()
            .await;

        let client = MetadataClient::new(&test_config(&server.url()), Client::new());
        let err = client.get_site("nonexistent").await.unwrap_err();
        assert_eq!(err.http_status(), Some(400));
    }

    #[tokio::test]
    async fn mutations_send_basic_auth() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/upload-metadata")
            .match_header("authorization", mockito::Matcher::Regex("Basic .*".to_string()))
            .with_status(200)
            .create_async()
            .await;

        let client = MetadataClient::new(&test_config(&server.url()), Client::new());
        client
            .update_status(&Uuid::nil(), RawFileStatus::Processed)
            .await
            .unwrap();
        mock.assert_async().await;
    }
}
