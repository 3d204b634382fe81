//! Queue task records.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The six task kinds the worker dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Process,
    Plot,
    Qc,
    Freeze,
    Hkd,
    Dvas,
    /// Forward-compatibility catch-all; dispatching it is a hard error.
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskType::Process => "process",
            TaskType::Plot => "plot",
            TaskType::Qc => "qc",
            TaskType::Freeze => "freeze",
            TaskType::Hkd => "hkd",
            TaskType::Dvas => "dvas",
            TaskType::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// A task delivered by `POST /queue/receive`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: i64,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub site_id: String,
    pub product_id: String,
    pub measurement_date: NaiveDate,
    #[serde(default)]
    pub instrument_info_uuid: Option<Uuid>,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub options: TaskOptions,
}

/// Per-task options.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOptions {
    #[serde(default)]
    pub derived_products: bool,
}

/// Body of `POST /api/queue/publish`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPublish {
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub site_id: String,
    pub product_id: String,
    pub measurement_date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instrument_info_uuid: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    /// 0..100, higher runs later in the queue ordering used by the portal.
    pub priority: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<TaskOptions>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_from_queue_json() {
        let json = r#"{
            "id": 42,
            "type": "process",
            "siteId": "bucharest",
            "productId": "radar",
            "measurementDate": "2020-10-22",
            "instrumentInfoUuid": "123e4567-e89b-12d3-a456-426614174000",
            "scheduledAt": "2020-10-23T00:00:00Z",
            "priority": 0,
            "options": {"derivedProducts": true}
        }"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.id, 42);
        assert_eq!(task.task_type, TaskType::Process);
        assert!(task.options.derived_products);
        assert!(task.model_id.is_none());
    }

    #[test]
    fn options_default_to_false() {
        let json = r#"{
            "id": 1,
            "type": "qc",
            "siteId": "hyytiala",
            "productId": "classification",
            "measurementDate": "2024-02-01"
        }"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert!(!task.options.derived_products);
    }

    #[test]
    fn unknown_task_type_still_parses() {
        let json = r#"{
            "id": 2,
            "type": "defrost",
            "siteId": "hyytiala",
            "productId": "radar",
            "measurementDate": "2024-02-01"
        }"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.task_type, TaskType::Unknown);
    }

    #[test]
    fn publish_body_omits_absent_fields() {
        let publish = TaskPublish {
            task_type: TaskType::Freeze,
            site_id: "bucharest".to_string(),
            product_id: "radar".to_string(),
            measurement_date: NaiveDate::from_ymd_opt(2020, 10, 22).unwrap(),
            instrument_info_uuid: None,
            model_id: None,
            scheduled_at: Utc::now(),
            priority: 100,
            options: None,
        };
        let json = serde_json::to_value(&publish).unwrap();
        assert_eq!(json["type"], "freeze");
        assert!(json.get("instrumentInfoUuid").is_none());
        assert!(json.get("modelId").is_none());
        assert!(json.get("options").is_none());
    }
}
