//! Three-valued comparison between an existing product file and a freshly
//! produced one.
//!
//! The verdict decides what happens to the new file:
//! - [`NcDiff::None`] - scientifically identical, the upload is skipped.
//! - [`NcDiff::Minor`] - metadata-only change, the old UUID and PID are
//!   reused and the old object is overwritten in place.
//! - [`NcDiff::Major`] - a new volatile version is created.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use tracing::debug;

use crate::attrs::attr_to_string;
use crate::error::NcResult;

/// Relative tolerance for float comparison of variable values.
const RTOL: f64 = 1e-4;

/// Global attributes that never participate in the comparison.
fn skip_global_attribute(name: &str) -> bool {
    matches!(name, "history" | "file_uuid" | "pid") || name.ends_with("_version")
}

/// Comparison verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NcDiff {
    None,
    Minor,
    Major,
}

/// Compare two NetCDF files.
pub fn nc_difference(old_path: &Path, new_path: &Path) -> NcResult<NcDiff> {
    let old = netcdf::open(old_path)?;
    let new = netcdf::open(new_path)?;

    if let Some(reason) = compare_dimensions(&old, &new) {
        debug!(reason, "Major difference");
        return Ok(NcDiff::Major);
    }
    if let Some(reason) = compare_variables(&old, &new)? {
        debug!(reason, "Major difference");
        return Ok(NcDiff::Major);
    }

    let mut minor = false;
    if let Some(reason) = compare_variable_attributes(&old, &new)? {
        debug!(reason, "Minor difference");
        minor = true;
    }
    if let Some(reason) = compare_global_attributes(&old, &new)? {
        debug!(reason, "Minor difference");
        minor = true;
    }

    Ok(if minor { NcDiff::Minor } else { NcDiff::None })
}

fn compare_dimensions(old: &netcdf::File, new: &netcdf::File) -> Option<String> {
    let dims1: BTreeMap<String, usize> = old
        .dimensions()
        .map(|d| (d.name().to_string(), d.len()))
        .collect();
    let dims2: BTreeMap<String, usize> = new
        .dimensions()
        .map(|d| (d.name().to_string(), d.len()))
        .collect();
    if dims1 != dims2 {
        return Some(format!("dimensions differ: {dims1:?} vs {dims2:?}"));
    }
    None
}

fn compare_variables(old: &netcdf::File, new: &netcdf::File) -> NcResult<Option<String>> {
    let names1: BTreeSet<String> = old.variables().map(|v| v.name().to_string()).collect();
    let names2: BTreeSet<String> = new.variables().map(|v| v.name().to_string()).collect();
    if names1 != names2 {
        return Ok(Some(format!("variables differ: {names1:?} vs {names2:?}")));
    }

    for name in &names1 {
        let var1 = old.variable(name).expect("variable listed but not found");
        let var2 = new.variable(name).expect("variable listed but not found");

        let dtype1 = format!("{:?}", var1.vartype());
        let dtype2 = format!("{:?}", var2.vartype());
        if dtype1 != dtype2 {
            return Ok(Some(format!(
                "variable dtype differs in {name}: {dtype1} vs {dtype2}"
            )));
        }

        let dims1: Vec<String> = var1.dimensions().iter().map(|d| d.name().to_string()).collect();
        let dims2: Vec<String> = var2.dimensions().iter().map(|d| d.name().to_string()).collect();
        if dims1 != dims2 {
            return Ok(Some(format!(
                "variable dimensions differ in {name}: {dims1:?} vs {dims2:?}"
            )));
        }

        match (
            var1.get_values::<f64, _>(..),
            var2.get_values::<f64, _>(..),
        ) {
            (Ok(values1), Ok(values2)) => {
                let fill1 = fill_value(&var1);
                let fill2 = fill_value(&var2);
                if let Some(reason) = compare_values(name, &values1, &values2, fill1, fill2) {
                    return Ok(Some(reason));
                }
            }
            // Non-numeric variable; dtype and dimensions were compared above.
            (Err(_), Err(_)) => continue,
            _ => {
                return Ok(Some(format!(
                    "variable {name} readable in only one of the files"
                )))
            }
        }
    }
    Ok(None)
}

fn compare_values(
    name: &str,
    values1: &[f64],
    values2: &[f64],
    fill1: Option<f64>,
    fill2: Option<f64>,
) -> Option<String> {
    if values1.len() != values2.len() {
        return Some(format!(
            "variable shapes differ in {name}: {} vs {}",
            values1.len(),
            values2.len()
        ));
    }

    let masked = |value: f64, fill: Option<f64>| value.is_nan() || fill.is_some_and(|f| value == f);
    let mask1: Vec<bool> = values1.iter().map(|&v| masked(v, fill1)).collect();
    let mask2: Vec<bool> = values2.iter().map(|&v| masked(v, fill2)).collect();

    if mask1.iter().all(|&m| m) && mask2.iter().all(|&m| m) {
        return None;
    }
    if mask1 != mask2 {
        return Some(format!("variable masks differ in {name}"));
    }

    for ((&v1, &v2), &is_masked) in values1.iter().zip(values2).zip(&mask1) {
        if is_masked {
            continue;
        }
        if !close(v1, v2) {
            return Some(format!("variable values differ in {name}: {v1} vs {v2}"));
        }
    }
    None
}

fn close(a: f64, b: f64) -> bool {
    if a == b {
        return true;
    }
    (a - b).abs() <= RTOL * b.abs()
}

fn fill_value(var: &netcdf::Variable) -> Option<f64> {
    let attr = var.attribute("_FillValue")?;
    match attr.value().ok()? {
        netcdf::AttributeValue::Float(f) => Some(f as f64),
        netcdf::AttributeValue::Double(d) => Some(d),
        netcdf::AttributeValue::Int(i) => Some(i as f64),
        netcdf::AttributeValue::Short(s) => Some(s as f64),
        netcdf::AttributeValue::Schar(c) => Some(c as f64),
        netcdf::AttributeValue::Uchar(c) => Some(c as f64),
        netcdf::AttributeValue::Ushort(s) => Some(s as f64),
        netcdf::AttributeValue::Uint(i) => Some(i as f64),
        netcdf::AttributeValue::Longlong(i) => Some(i as f64),
        netcdf::AttributeValue::Ulonglong(i) => Some(i as f64),
        _ => None,
    }
}

fn compare_variable_attributes(
    old: &netcdf::File,
    new: &netcdf::File,
) -> NcResult<Option<String>> {
    for var1 in old.variables() {
        let name = var1.name().to_string();
        let Some(var2) = new.variable(&name) else {
            continue;
        };
        let attrs1 = attribute_map(var1.attributes())?;
        let attrs2 = attribute_map(var2.attributes())?;
        for key in attrs1.keys().chain(attrs2.keys()) {
            // The fill value is allowed to change between library versions.
            if key == "_FillValue" {
                continue;
            }
            if attrs1.get(key) != attrs2.get(key) {
                return Ok(Some(format!("variable attribute differs: {name} - {key}")));
            }
        }
    }
    Ok(None)
}

fn compare_global_attributes(old: &netcdf::File, new: &netcdf::File) -> NcResult<Option<String>> {
    let attrs1 = attribute_map(old.attributes())?;
    let attrs2 = attribute_map(new.attributes())?;
    for key in attrs1.keys().chain(attrs2.keys()) {
        if skip_global_attribute(key) {
            continue;
        }
        let value1 = attrs1.get(key);
        let value2 = attrs2.get(key);
        if key == "source_file_uuids" {
            if value1.map(|v| uuid_set(v)) != value2.map(|v| uuid_set(v)) {
                return Ok(Some(format!("global attribute differs: {key}")));
            }
            continue;
        }
        if value1 != value2 {
            return Ok(Some(format!("global attribute differs: {key}")));
        }
    }
    Ok(None)
}

fn attribute_map<'a>(
    attrs: impl Iterator<Item = netcdf::Attribute<'a>>,
) -> NcResult<BTreeMap<String, String>> {
    let mut map = BTreeMap::new();
    for attr in attrs {
        let value = attr.value()?;
        map.insert(attr.name().to_string(), attr_to_string(&value));
    }
    Ok(map)
}

/// `source_file_uuids` is an unordered comma-separated list.
fn uuid_set(value: &str) -> BTreeSet<String> {
    value.split(", ").map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write_test_file(
        dir: &Path,
        name: &str,
        values: &[f64],
        title: &str,
        source_file_uuids: Option<&str>,
    ) -> PathBuf {
        let path = dir.join(name);
        let mut file = netcdf::create(&path).unwrap();
        file.add_dimension("time", values.len()).unwrap();
        let mut var = file.add_variable::<f64>("beta", &["time"]).unwrap();
        var.put_values(values, ..).unwrap();
        file.add_attribute("title", title).unwrap();
        file.add_attribute("file_uuid", "123e4567-e89b-12d3-a456-426614174000")
            .unwrap();
        file.add_attribute("history", format!("processed {name}").as_str())
            .unwrap();
        if let Some(uuids) = source_file_uuids {
            file.add_attribute("source_file_uuids", uuids).unwrap();
        }
        path
    }

    #[test]
    fn identical_files_are_none() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_test_file(dir.path(), "a.nc", &[1.0, 2.0, 3.0], "Radar", None);
        let b = write_test_file(dir.path(), "b.nc", &[1.0, 2.0, 3.0], "Radar", None);
        assert_eq!(nc_difference(&a, &b).unwrap(), NcDiff::None);
    }

    #[test]
    fn file_compared_with_itself_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_test_file(dir.path(), "a.nc", &[0.5, 1.5], "Radar", None);
        assert_eq!(nc_difference(&a, &a).unwrap(), NcDiff::None);
    }

    #[test]
    fn history_and_pid_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_test_file(dir.path(), "a.nc", &[1.0], "Radar", None);
        let b = write_test_file(dir.path(), "b.nc", &[1.0], "Radar", None);
        crate::attrs::write_global_attrs(&b, &[("pid", "https://hdl.handle.net/123/x")]).unwrap();
        assert_eq!(nc_difference(&a, &b).unwrap(), NcDiff::None);
    }

    #[test]
    fn float_noise_within_tolerance_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_test_file(dir.path(), "a.nc", &[1.0, 100.0], "Radar", None);
        let b = write_test_file(dir.path(), "b.nc", &[1.00001, 100.001], "Radar", None);
        assert_eq!(nc_difference(&a, &b).unwrap(), NcDiff::None);
    }

    #[test]
    fn changed_values_are_major() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_test_file(dir.path(), "a.nc", &[1.0, 2.0], "Radar", None);
        let b = write_test_file(dir.path(), "b.nc", &[1.0, 2.5], "Radar", None);
        assert_eq!(nc_difference(&a, &b).unwrap(), NcDiff::Major);
    }

    #[test]
    fn changed_metadata_is_minor() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_test_file(dir.path(), "a.nc", &[1.0, 2.0], "Radar", None);
        let b = write_test_file(dir.path(), "b.nc", &[1.0, 2.0], "Radar improved", None);
        assert_eq!(nc_difference(&a, &b).unwrap(), NcDiff::Minor);
    }

    #[test]
    fn newly_populated_source_uuids_is_minor() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_test_file(dir.path(), "a.nc", &[1.0], "Radar", None);
        let b = write_test_file(dir.path(), "b.nc", &[1.0], "Radar", Some("uuid-a, uuid-b"));
        assert_eq!(nc_difference(&a, &b).unwrap(), NcDiff::Minor);
    }

    #[test]
    fn source_uuids_compared_as_unordered_set() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_test_file(dir.path(), "a.nc", &[1.0], "Radar", Some("uuid-a, uuid-b"));
        let b = write_test_file(dir.path(), "b.nc", &[1.0], "Radar", Some("uuid-b, uuid-a"));
        assert_eq!(nc_difference(&a, &b).unwrap(), NcDiff::None);
    }

    #[test]
    fn different_dimensions_are_major() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_test_file(dir.path(), "a.nc", &[1.0, 2.0], "Radar", None);
        let b = write_test_file(dir.path(), "b.nc", &[1.0, 2.0, 3.0], "Radar", None);
        assert_eq!(nc_difference(&a, &b).unwrap(), NcDiff::Major);
    }

    #[test]
    fn all_masked_variables_are_equal() {
        let dir = tempfile::tempdir().unwrap();
        let make = |name: &str, values: &[f64]| {
            let path = dir.path().join(name);
            let mut file = netcdf::create(&path).unwrap();
            file.add_dimension("time", values.len()).unwrap();
            let mut var = file.add_variable::<f64>("lwp", &["time"]).unwrap();
            var.put_attribute("_FillValue", -999.0).unwrap();
            var.put_values(values, ..).unwrap();
            path
        };
        let a = make("a.nc", &[-999.0, -999.0]);
        let b = make("b.nc", &[-999.0, -999.0]);
        assert_eq!(nc_difference(&a, &b).unwrap(), NcDiff::None);
    }
}
