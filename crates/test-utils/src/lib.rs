//! Shared test fixtures for the cloudnet-engine workspace.
//!
//! Builders for the metadata records unit tests need, with sensible defaults
//! so each test only spells out what it cares about.

use chrono::NaiveDate;
use cloudnet_common::{
    Instrument, Model, Product, ProductFileMetadata, ProductType, RawFileMetadata, RawFileStatus,
    Site, SiteType,
};
use uuid::Uuid;

/// Default measurement date used by the fixtures.
pub fn test_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 10, 22).unwrap()
}

pub fn site(id: &str) -> Site {
    Site {
        id: id.to_string(),
        human_readable_name: capitalize(id),
        latitude: 44.348,
        longitude: 26.029,
        altitude: Some(93.0),
        types: vec![SiteType::Cloudnet],
        dvas_id: None,
    }
}

pub fn hidden_site(id: &str) -> Site {
    let mut site = site(id);
    site.types = vec![SiteType::Hidden];
    site
}

pub fn instrument(instrument_id: &str) -> Instrument {
    Instrument {
        uuid: Uuid::new_v4(),
        pid: format!("https://hdl.handle.net/123/{instrument_id}"),
        instrument_id: instrument_id.to_string(),
        name: None,
    }
}

pub fn product(id: &str, types: &[ProductType]) -> Product {
    Product {
        id: id.to_string(),
        human_readable_name: capitalize(id),
        level: None,
        types: types.to_vec(),
        experimental: false,
        source_instrument_ids: vec![],
        source_product_ids: vec![],
        derived_product_ids: vec![],
    }
}

pub fn instrument_product(id: &str) -> Product {
    product(id, &[ProductType::Instrument])
}

pub fn geophysical_product(id: &str) -> Product {
    product(id, &[ProductType::Geophysical])
}

pub fn model(id: &str) -> Model {
    Model {
        id: id.to_string(),
        human_readable_name: Some(id.to_uppercase()),
    }
}

pub fn raw_file(filename: &str, size: u64) -> RawFileMetadata {
    RawFileMetadata {
        uuid: Uuid::new_v4(),
        filename: filename.to_string(),
        checksum: "d41d8cd98f00b204e9800998ecf8427e".to_string(),
        size,
        s3key: format!("bucharest/{filename}"),
        measurement_date: test_date(),
        status: RawFileStatus::Uploaded,
        site: None,
        instrument: None,
        instrument_pid: None,
        tags: vec![],
        created_at: None,
        updated_at: None,
    }
}

pub fn product_file(filename: &str, volatile: bool) -> ProductFileMetadata {
    ProductFileMetadata {
        uuid: Uuid::new_v4(),
        filename: filename.to_string(),
        checksum: "e3b0c44298fc1c149afbf4c8996fb924".to_string(),
        size: 1000,
        measurement_date: test_date(),
        volatile,
        pid: (!volatile).then(|| "https://hdl.handle.net/123/product".to_string()),
        legacy: false,
        dvas_id: None,
        dvas_updated_at: None,
        error_level: None,
        source_file_ids: vec![],
        format: Some("HDF5 (NetCDF4)".to_string()),
        timeliness: None,
        site: Some(site("bucharest")),
        product: None,
        instrument: None,
        model: None,
        start_time: None,
        stop_time: None,
        download_url: None,
    }
}

/// Product file with a nested instrument record, for tie-break tests.
pub fn instrument_product_file(
    filename: &str,
    instrument_id: &str,
    pid: &str,
) -> ProductFileMetadata {
    let mut file = product_file(filename, true);
    file.instrument = Some(Instrument {
        uuid: Uuid::new_v4(),
        pid: pid.to_string(),
        instrument_id: instrument_id.to_string(),
        name: None,
    });
    file
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
