//! Runtime configuration read from environment variables.

use std::collections::HashMap;

use crate::error::{CloudnetError, CloudnetResult};

/// Configuration for all services, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Data portal API base URL (internal)
    pub dataportal_url: String,
    /// Data portal public URL (landing pages)
    pub dataportal_public_url: String,
    /// Object store base URL
    pub storage_service_url: String,
    /// Object store Basic auth credentials
    pub storage_service_auth: (String, String),
    /// Credentials for mutating data portal endpoints
    pub data_submission_auth: (String, String),
    /// PID minting service base URL
    pub pid_service_url: String,
    /// False when PID_SERVICE_TEST_ENV is set: fake PIDs, no housekeeping
    pub is_production: bool,
    /// Days after release before a regular file is frozen
    pub freeze_after_days: i64,
    /// Days after release before a model file is frozen
    pub freeze_model_after_days: i64,
    /// DVAS federation portal base URL
    pub dvas_portal_url: String,
    pub dvas_access_token: String,
    pub dvas_username: String,
    pub dvas_password: String,
    /// CLU provider id in the DVAS federation
    pub dvas_provider_id: String,
    pub slack_api_token: Option<String>,
    pub slack_channel_id: Option<String>,
    /// External command implementing the science stack (JSON over stdio)
    pub science_command: String,
    /// Housekeeping is skipped for data older than this many days
    pub housekeeping_retention_days: i64,
}

impl Config {
    /// Read configuration from process environment variables.
    pub fn from_env() -> CloudnetResult<Self> {
        let env: HashMap<String, String> = std::env::vars().collect();
        Self::from_map(&env)
    }

    /// Read configuration from the given key-value map.
    pub fn from_map(env: &HashMap<String, String>) -> CloudnetResult<Self> {
        let require = |key: &str| -> CloudnetResult<String> {
            env.get(key)
                .map(|v| v.trim_end_matches('/').to_string())
                .ok_or_else(|| {
                    CloudnetError::Internal(format!("Missing environment variable: {key}"))
                })
        };
        let require_days = |key: &str| -> CloudnetResult<i64> {
            require(key)?.parse::<i64>().map_err(|_| {
                CloudnetError::Internal(format!("Invalid integer in environment variable: {key}"))
            })
        };

        let dataportal_url = require("DATAPORTAL_URL")?;
        Ok(Self {
            dataportal_public_url: require("DATAPORTAL_PUBLIC_URL")
                .unwrap_or_else(|_| dataportal_url.clone()),
            dataportal_url,
            storage_service_url: require("STORAGE_SERVICE_URL")?,
            storage_service_auth: (
                require("STORAGE_SERVICE_USER")?,
                require("STORAGE_SERVICE_PASSWORD")?,
            ),
            data_submission_auth: (
                env.get("DATA_SUBMISSION_USERNAME")
                    .cloned()
                    .unwrap_or_else(|| "admin".to_string()),
                env.get("DATA_SUBMISSION_PASSWORD")
                    .cloned()
                    .unwrap_or_else(|| "admin".to_string()),
            ),
            pid_service_url: require("PID_SERVICE_URL")?,
            is_production: !env
                .get("PID_SERVICE_TEST_ENV")
                .is_some_and(|v| !v.is_empty()),
            freeze_after_days: require_days("FREEZE_AFTER_DAYS")?,
            freeze_model_after_days: require_days("FREEZE_MODEL_AFTER_DAYS")?,
            dvas_portal_url: require("DVAS_PORTAL_URL")?,
            dvas_access_token: require("DVAS_ACCESS_TOKEN")?,
            dvas_username: require("DVAS_USERNAME")?,
            dvas_password: require("DVAS_PASSWORD")?,
            dvas_provider_id: "11".to_string(),
            slack_api_token: env.get("SLACK_API_TOKEN").cloned(),
            slack_channel_id: env.get("SLACK_CHANNEL_ID").cloned(),
            science_command: env
                .get("SCIENCE_COMMAND")
                .cloned()
                .unwrap_or_else(|| "cloudnet-science".to_string()),
            housekeeping_retention_days: env
                .get("HOUSEKEEPING_RETENTION_DAYS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
        })
    }

    /// Landing page URL for a product file.
    pub fn file_landing_page_url(&self, uuid: &uuid::Uuid) -> String {
        format!("{}/file/{}", self.dataportal_public_url, uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_env() -> HashMap<String, String> {
        [
            ("DATAPORTAL_URL", "http://dataportal:3000/"),
            ("DATAPORTAL_PUBLIC_URL", "https://cloudnet.fmi.fi"),
            ("STORAGE_SERVICE_URL", "http://storage:5900"),
            ("STORAGE_SERVICE_USER", "test"),
            ("STORAGE_SERVICE_PASSWORD", "test"),
            ("PID_SERVICE_URL", "http://pid:5800"),
            ("FREEZE_AFTER_DAYS", "3"),
            ("FREEZE_MODEL_AFTER_DAYS", "4"),
            ("DVAS_PORTAL_URL", "http://dvas:8080"),
            ("DVAS_ACCESS_TOKEN", "token"),
            ("DVAS_USERNAME", "dvas"),
            ("DVAS_PASSWORD", "dvas"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn reads_required_variables() {
        let config = Config::from_map(&test_env()).unwrap();
        assert_eq!(config.dataportal_url, "http://dataportal:3000");
        assert_eq!(config.freeze_after_days, 3);
        assert!(config.is_production);
        assert!(config.slack_api_token.is_none());
    }

    #[test]
    fn public_url_falls_back_to_portal_url() {
        let mut env = test_env();
        env.remove("DATAPORTAL_PUBLIC_URL");
        let config = Config::from_map(&env).unwrap();
        assert_eq!(config.dataportal_public_url, "http://dataportal:3000");
    }

    #[test]
    fn test_env_disables_production() {
        let mut env = test_env();
        env.insert("PID_SERVICE_TEST_ENV".to_string(), "true".to_string());
        let config = Config::from_map(&env).unwrap();
        assert!(!config.is_production);
    }

    #[test]
    fn missing_variable_is_an_error() {
        let mut env = test_env();
        env.remove("PID_SERVICE_URL");
        assert!(Config::from_map(&env).is_err());
    }

    #[test]
    fn landing_page_url() {
        let config = Config::from_map(&test_env()).unwrap();
        let uuid = uuid::Uuid::nil();
        assert_eq!(
            config.file_landing_page_url(&uuid),
            "https://cloudnet.fmi.fi/file/00000000-0000-0000-0000-000000000000"
        );
    }
}
