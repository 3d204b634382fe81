//! Plottable fields per product for quicklook generation.

/// Fields and maximum altitude (km) for a product's quicklooks, `None` when
/// plotting is not implemented for the product.
pub fn fields_for_plot(product_id: &str) -> Option<(&'static [&'static str], u32)> {
    let fields: (&[&str], u32) = match product_id {
        "categorize" | "categorize-voodoo" => (
            &[
                "Z",
                "v",
                "width",
                "ldr",
                "v_sigma",
                "beta",
                "lwp",
                "Tw",
                "radar_gas_atten",
                "radar_liquid_atten",
            ],
            10,
        ),
        "classification" | "classification-voodoo" => {
            (&["target_classification", "detection_status"], 10)
        }
        "iwc" => (&["iwc", "iwc_error", "iwc_retrieval_status"], 10),
        "lwc" => (&["lwc", "lwc_error", "lwc_retrieval_status"], 6),
        "drizzle" => (
            &[
                "Do",
                "mu",
                "S",
                "drizzle_N",
                "drizzle_lwc",
                "drizzle_lwf",
                "v_drizzle",
                "v_air",
            ],
            4,
        ),
        "der" => (&["der", "der_error", "der_retrieval_status"], 10),
        "ier" => (&["ier", "ier_error", "ier_retrieval_status"], 10),
        "model" => (
            &["cloud_fraction", "uwind", "vwind", "temperature", "q", "pressure"],
            12,
        ),
        "radar" => (&["Zh", "v", "width", "ldr"], 10),
        "lidar" => (&["beta", "beta_raw", "depolarisation"], 10),
        "doppler-lidar" => (&["beta", "v"], 10),
        "doppler-lidar-wind" => (&["uwind", "vwind"], 10),
        "mwr" => (&["lwp", "iwv"], 10),
        "mwr-l1c" => (&["tb"], 10),
        "mwr-single" => (&["lwp", "iwv", "temperature", "absolute_humidity"], 10),
        "mwr-multi" => (&["temperature", "relative_humidity", "potential_temperature"], 10),
        "disdrometer" => (&["rainfall_rate", "n_particles"], 10),
        "weather-station" => (
            &["air_temperature", "wind_speed", "wind_direction", "air_pressure"],
            10,
        ),
        "rain-radar" => (&["Zh", "rainfall_rate", "lwc", "pia"], 3),
        "l3-cf" => (&["cf"], 12),
        "l3-iwc" => (&["iwc"], 12),
        "l3-lwc" => (&["lwc"], 12),
        _ => return None,
    };
    Some(fields)
}

/// Identifier for a (product, variable) pair; model-evaluation products also
/// carry the model id.
pub fn variable_id(product_id: &str, model_id: Option<&str>, field: &str) -> String {
    match model_id {
        Some(model_id) => format!("{product_id}-{model_id}-{field}"),
        None => format!("{product_id}-{field}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_products_have_fields() {
        let (fields, max_alt) = fields_for_plot("lwc").unwrap();
        assert!(fields.contains(&"lwc"));
        assert_eq!(max_alt, 6);
    }

    #[test]
    fn unknown_product_is_none() {
        assert!(fields_for_plot("cpr-simulation").is_none());
        assert!(fields_for_plot("epsilon-lidar").is_none());
    }

    #[test]
    fn variable_ids() {
        assert_eq!(variable_id("radar", None, "v"), "radar-v");
        assert_eq!(variable_id("l3-cf", Some("ecmwf"), "cf"), "l3-cf-ecmwf-cf");
    }
}
