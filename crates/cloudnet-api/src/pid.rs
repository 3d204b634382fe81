//! Handle PID minting for finalized artifacts.

use std::path::Path;

use cloudnet_common::{CloudnetError, CloudnetResult, Config};
use reqwest::Client;
use serde_json::json;
use uuid::Uuid;

use crate::retry::send_with_retry;

/// Result of stamping a PID into a file.
#[derive(Debug, Clone)]
pub struct PidResult {
    pub uuid: Uuid,
    pub pid: String,
    pub landing_url: String,
}

/// Client for the PID minting service.
#[derive(Clone)]
pub struct PidClient {
    client: Client,
    pid_service_url: String,
    dataportal_public_url: String,
    is_production: bool,
}

impl PidClient {
    pub fn new(config: &Config, client: Client) -> Self {
        Self {
            client,
            pid_service_url: format!("{}/pid/", config.pid_service_url),
            dataportal_public_url: config.dataportal_public_url.clone(),
            is_production: config.is_production,
        }
    }

    /// Mint (or reuse) a PID and write it into the file's global attributes.
    ///
    /// With an explicit `pid` the handle is reused as-is (patching an
    /// existing file). Outside production a deterministic fake is written
    /// instead of querying the service. Idempotent given (uuid, landing URL):
    /// the PID service returns the same handle for repeated requests.
    pub async fn add_pid_to_file(
        &self,
        full_path: &Path,
        pid: Option<&str>,
    ) -> CloudnetResult<PidResult> {
        let uuid = netcdf_compare::read_file_uuid(full_path)
            .map_err(|e| CloudnetError::NetCdf(e.to_string()))?;
        let landing_url = format!("{}/file/{}", self.dataportal_public_url, uuid);

        let pid_to_file = match pid {
            Some(pid) => pid.to_string(),
            None if self.is_production => self.mint(&uuid, &landing_url).await?,
            None => format!("https://www.example.pid/{}", &uuid.to_string()[..8]),
        };

        netcdf_compare::write_global_attrs(full_path, &[("pid", &pid_to_file)])
            .map_err(|e| CloudnetError::NetCdf(e.to_string()))?;

        Ok(PidResult {
            uuid,
            pid: pid_to_file,
            landing_url,
        })
    }

    async fn mint(&self, uuid: &Uuid, url: &str) -> CloudnetResult<String> {
        let payload = json!({"type": "file", "uuid": uuid, "url": url});
        let request = self.client.post(&self.pid_service_url).json(&payload);
        let response = send_with_retry(request).await.map_err(|err| {
            CloudnetError::Misc(format!("PID service failed: {err}"))
        })?;
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CloudnetError::Misc(format!("Invalid PID service response: {e}")))?;
        body.get("pid")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| CloudnetError::Misc("PID service response missing pid".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn test_config(pid_url: &str, production: bool) -> Config {
        let mut env: HashMap<String, String> = [
            ("DATAPORTAL_URL", "http://dataportal"),
            ("DATAPORTAL_PUBLIC_URL", "https://cloudnet.fmi.fi"),
            ("STORAGE_SERVICE_URL", "http://storage"),
            ("STORAGE_SERVICE_USER", "test"),
            ("STORAGE_SERVICE_PASSWORD", "test"),
            ("PID_SERVICE_URL", pid_url),
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
        if !production {
            env.insert("PID_SERVICE_TEST_ENV".to_string(), "true".to_string());
        }
        Config::from_map(&env).unwrap()
    }

    fn write_nc_with_uuid(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("product.nc");
        let mut file = netcdf::create(&path).unwrap();
        file.add_attribute("file_uuid", "123e4567-e89b-12d3-a456-426614174000")
            .unwrap();
        drop(file);
        path
    }

    #[tokio::test]
    async fn explicit_pid_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_nc_with_uuid(dir.path());
        let client = PidClient::new(&test_config("http://pid", true), Client::new());

        let result = client
            .add_pid_to_file(&path, Some("https://hdl.handle.net/123/abc"))
            .await
            .unwrap();
        assert_eq!(result.pid, "https://hdl.handle.net/123/abc");
        assert_eq!(
            result.landing_url,
            "https://cloudnet.fmi.fi/file/123e4567-e89b-12d3-a456-426614174000"
        );
        assert_eq!(
            netcdf_compare::read_global_attr(&path, "pid")
                .unwrap()
                .as_deref(),
            Some("https://hdl.handle.net/123/abc")
        );
    }

    #[tokio::test]
    async fn test_environment_writes_fake_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_nc_with_uuid(dir.path());
        let client = PidClient::new(&test_config("http://pid", false), Client::new());

        let result = client.add_pid_to_file(&path, None).await.unwrap();
        assert_eq!(result.pid, "https://www.example.pid/123e4567");
    }

    #[tokio::test]
    async fn production_mints_from_service() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/pid/")
            .with_status(200)
            .with_body(r#"{"pid": "https://hdl.handle.net/21.12132/1.abc"}"#)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let path = write_nc_with_uuid(dir.path());
        let client = PidClient::new(&test_config(&server.url(), true), Client::new());

        let result = client.add_pid_to_file(&path, None).await.unwrap();
        assert_eq!(result.pid, "https://hdl.handle.net/21.12132/1.abc");
        assert_eq!(
            netcdf_compare::read_global_attr(&path, "pid")
                .unwrap()
                .as_deref(),
            Some("https://hdl.handle.net/21.12132/1.abc")
        );
    }
}
