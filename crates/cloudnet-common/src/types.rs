//! Reference data served by the data portal: sites, instruments, products,
//! models and calibration documents.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A measurement site.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    pub id: String,
    pub human_readable_name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Altitude above sea level in meters; absent in some listing contexts.
    #[serde(default)]
    pub altitude: Option<f64>,
    #[serde(rename = "type", default)]
    pub types: Vec<SiteType>,
    #[serde(default)]
    pub dvas_id: Option<String>,
}

impl Site {
    pub fn is_hidden(&self) -> bool {
        self.types.contains(&SiteType::Hidden)
    }

    pub fn is_model_only(&self) -> bool {
        self.types.contains(&SiteType::Model)
    }
}

/// Site classification tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteType {
    Cloudnet,
    Campaign,
    Arm,
    Hidden,
    Model,
}

/// A hardware unit, identified across sites and time by its UUID and PID.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instrument {
    pub uuid: Uuid,
    pub pid: String,
    /// Instrument type tag, e.g. `chm15k` or `rpg-fmcw-94`.
    pub instrument_id: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl Instrument {
    /// First eight characters of the UUID, used in product filenames.
    pub fn uuid_prefix(&self) -> String {
        self.uuid.to_string()[..8].to_string()
    }
}

/// A product definition with its derivation edges.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub human_readable_name: String,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(rename = "type", default)]
    pub types: Vec<ProductType>,
    #[serde(default)]
    pub experimental: bool,
    /// Instrument types this product can be derived from.
    #[serde(default)]
    pub source_instrument_ids: Vec<String>,
    /// Products this product is derived from.
    #[serde(default)]
    pub source_product_ids: Vec<String>,
    /// Products derived from this product (drives follow-up fan-out).
    #[serde(default)]
    pub derived_product_ids: Vec<String>,
}

impl Product {
    pub fn is_instrument_product(&self) -> bool {
        self.types.contains(&ProductType::Instrument)
    }

    pub fn is_geophysical(&self) -> bool {
        self.types.contains(&ProductType::Geophysical)
    }

    pub fn is_evaluation(&self) -> bool {
        self.types.contains(&ProductType::Evaluation)
    }
}

/// Product classification tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductType {
    Instrument,
    Geophysical,
    Evaluation,
    Experimental,
}

/// A numerical weather prediction model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    pub id: String,
    #[serde(default)]
    pub human_readable_name: Option<String>,
}

/// An instrument calibration document for one day.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Calibration {
    #[serde(default)]
    pub measurement_date: Option<NaiveDate>,
    /// Free-form calibration data (keys vary per instrument type).
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Calibration {
    /// Numeric calibration value by key, tolerating string-encoded numbers.
    pub fn number(&self, key: &str) -> Option<f64> {
        match self.data.get(key)? {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn boolean(&self, key: &str) -> Option<bool> {
        self.data.get(key)?.as_bool()
    }

    pub fn strings(&self, key: &str) -> Option<Vec<String>> {
        Some(
            self.data
                .get(key)?
                .as_array()?
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_from_portal_json() {
        let json = r#"{
            "id": "bucharest",
            "humanReadableName": "Bucharest",
            "latitude": 44.348,
            "longitude": 26.029,
            "altitude": 93,
            "type": ["cloudnet"],
            "dvasId": "ftzh"
        }"#;
        let site: Site = serde_json::from_str(json).unwrap();
        assert_eq!(site.id, "bucharest");
        assert_eq!(site.altitude, Some(93.0));
        assert!(!site.is_hidden());
        assert_eq!(site.dvas_id.as_deref(), Some("ftzh"));
    }

    #[test]
    fn hidden_site_type() {
        let json = r#"{
            "id": "test-site",
            "humanReadableName": "Test",
            "latitude": 0.0,
            "longitude": 0.0,
            "type": ["hidden", "campaign"]
        }"#;
        let site: Site = serde_json::from_str(json).unwrap();
        assert!(site.is_hidden());
        assert!(!site.is_model_only());
    }

    #[test]
    fn instrument_uuid_prefix() {
        let instrument = Instrument {
            uuid: "123e4567-e89b-12d3-a456-426614174000".parse().unwrap(),
            pid: "https://hdl.handle.net/123/abc".to_string(),
            instrument_id: "rpg-fmcw-94".to_string(),
            name: None,
        };
        assert_eq!(instrument.uuid_prefix(), "123e4567");
    }

    #[test]
    fn product_derivation_edges() {
        let json = r#"{
            "id": "radar",
            "humanReadableName": "Radar",
            "level": "1b",
            "type": ["instrument"],
            "experimental": false,
            "sourceInstrumentIds": ["rpg-fmcw-94", "mira-35"],
            "derivedProductIds": ["categorize"]
        }"#;
        let product: Product = serde_json::from_str(json).unwrap();
        assert!(product.is_instrument_product());
        assert!(!product.is_geophysical());
        assert_eq!(product.derived_product_ids, vec!["categorize"]);
    }

    #[test]
    fn calibration_value_access() {
        let calibration: Calibration = serde_json::from_str(
            r#"{"data": {"calibration_factor": "1.2e-11", "range_corrected": true}}"#,
        )
        .unwrap();
        assert_eq!(calibration.number("calibration_factor"), Some(1.2e-11));
        assert_eq!(calibration.boolean("range_corrected"), Some(true));
        assert_eq!(calibration.number("missing"), None);
    }
}
