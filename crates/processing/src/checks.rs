//! Validations of transformed output that gate the task outcome.

use std::path::Path;

use cloudnet_common::{CloudnetError, CloudnetResult};

/// Expected number of time rows in a harmonized daily model file.
fn expected_model_steps(model_id: &str) -> usize {
    match model_id {
        // Hourly steps 0..24 inclusive.
        "ecmwf" | "ecmwf-open" | "gdas1" | "icon-iglo-12-23" => 25,
        _ => 25,
    }
}

/// Reject model files with fewer time rows than a full day.
pub fn check_model_completeness(full_path: &Path, model_id: &str) -> CloudnetResult<()> {
    let file = netcdf::open(full_path).map_err(|e| CloudnetError::NetCdf(e.to_string()))?;
    let n_steps = file
        .dimension("time")
        .map(|d| d.len())
        .ok_or_else(|| CloudnetError::NetCdf("Model file has no time dimension".to_string()))?;
    if n_steps < expected_model_steps(model_id) {
        return Err(CloudnetError::Misc("Incomplete model file".to_string()));
    }
    Ok(())
}

/// Reject HATPRO days whose liquid water path is off the scale.
pub fn check_hatpro_lwp(full_path: &Path) -> CloudnetResult<()> {
    const MAX_MEDIAN_LWP: f64 = 10.0; // kg m-2
    if let Some(median) = variable_median(full_path, "lwp")? {
        if median > MAX_MEDIAN_LWP {
            return Err(CloudnetError::Misc(format!(
                "Unrealistic median LWP: {median:.1} kg m-2"
            )));
        }
    }
    Ok(())
}

/// Reject Doppler lidar stares that are not close to vertical.
pub fn check_zenith_angle(full_path: &Path) -> CloudnetResult<()> {
    const MAX_MEDIAN_ZENITH: f64 = 15.0; // degrees
    if let Some(median) = variable_median(full_path, "zenith_angle")? {
        if median > MAX_MEDIAN_ZENITH {
            return Err(CloudnetError::Misc(format!(
                "Unrealistic median zenith angle: {median:.1} degrees"
            )));
        }
    }
    Ok(())
}

/// Median of the unmasked values of a variable, `None` when the variable is
/// absent or fully masked.
fn variable_median(full_path: &Path, name: &str) -> CloudnetResult<Option<f64>> {
    let file = netcdf::open(full_path).map_err(|e| CloudnetError::NetCdf(e.to_string()))?;
    let Some(var) = file.variable(name) else {
        return Ok(None);
    };
    let values: Vec<f64> = var
        .get_values(..)
        .map_err(|e| CloudnetError::NetCdf(e.to_string()))?;
    let mut values: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
    if values.is_empty() {
        return Ok(None);
    }
    values.sort_by(|a, b| a.partial_cmp(b).expect("finite values"));
    Ok(Some(values[values.len() / 2]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn model_file(dir: &Path, n_steps: usize) -> PathBuf {
        let path = dir.join(format!("model_{n_steps}.nc"));
        let mut file = netcdf::create(&path).unwrap();
        file.add_dimension("time", n_steps).unwrap();
        let mut var = file.add_variable::<f64>("temperature", &["time"]).unwrap();
        var.put_values(&vec![280.0; n_steps], ..).unwrap();
        path
    }

    fn file_with_variable(dir: &Path, name: &str, values: &[f64]) -> PathBuf {
        let path = dir.join(format!("{name}.nc"));
        let mut file = netcdf::create(&path).unwrap();
        file.add_dimension("time", values.len()).unwrap();
        let mut var = file.add_variable::<f64>(name, &["time"]).unwrap();
        var.put_values(values, ..).unwrap();
        path
    }

    #[test]
    fn complete_model_file_passes() {
        let dir = tempfile::tempdir().unwrap();
        let path = model_file(dir.path(), 25);
        assert!(check_model_completeness(&path, "ecmwf").is_ok());
    }

    #[test]
    fn incomplete_model_file_is_misc_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = model_file(dir.path(), 24);
        let err = check_model_completeness(&path, "ecmwf").unwrap_err();
        assert!(matches!(err, CloudnetError::Misc(_)));
        assert_eq!(err.to_string(), "Incomplete model file");
    }

    #[test]
    fn unrealistic_lwp_is_misc_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = file_with_variable(dir.path(), "lwp", &[12.0, 15.0, 11.0]);
        assert!(matches!(
            check_hatpro_lwp(&path),
            Err(CloudnetError::Misc(_))
        ));

        let path = file_with_variable(dir.path(), "lwp", &[0.1, 0.2, 0.05]);
        assert!(check_hatpro_lwp(&path).is_ok());
    }

    #[test]
    fn tilted_stare_is_misc_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = file_with_variable(dir.path(), "zenith_angle", &[30.0, 28.0, 33.0]);
        assert!(matches!(
            check_zenith_angle(&path),
            Err(CloudnetError::Misc(_))
        ));

        let path = file_with_variable(dir.path(), "zenith_angle", &[2.0, 1.5, 3.0]);
        assert!(check_zenith_angle(&path).is_ok());
    }

    #[test]
    fn missing_variable_passes() {
        let dir = tempfile::tempdir().unwrap();
        let path = file_with_variable(dir.path(), "beta", &[1.0]);
        assert!(check_hatpro_lwp(&path).is_ok());
        assert!(check_zenith_angle(&path).is_ok());
    }
}
