//! Global attribute access for product files.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use uuid::Uuid;

use crate::error::{NcError, NcResult};

/// Read a global attribute as a string, `None` if absent.
pub fn read_global_attr(path: &Path, name: &str) -> NcResult<Option<String>> {
    let file = netcdf::open(path)?;
    match file.attribute(name) {
        Some(attr) => Ok(Some(attr_to_string(&attr.value()?))),
        None => Ok(None),
    }
}

/// Read the `file_uuid` global attribute.
pub fn read_file_uuid(path: &Path) -> NcResult<Uuid> {
    let value = read_global_attr(path, "file_uuid")?
        .ok_or_else(|| NcError::MissingData("file_uuid attribute".to_string()))?;
    value
        .parse()
        .map_err(|_| NcError::InvalidFormat(format!("Invalid file_uuid: {value}")))
}

/// Write (or overwrite) string-valued global attributes in place.
pub fn write_global_attrs(path: &Path, attrs: &[(&str, &str)]) -> NcResult<()> {
    let mut file = netcdf::append(path)?;
    for (name, value) in attrs {
        file.add_attribute(name, *value)?;
    }
    Ok(())
}

/// Detect the on-disk format of a NetCDF file from its magic bytes.
pub fn file_format(path: &Path) -> NcResult<String> {
    let mut magic = [0u8; 4];
    File::open(path)?.read_exact(&mut magic)?;
    match &magic {
        [0x89, b'H', b'D', b'F'] => Ok("HDF5 (NetCDF4)".to_string()),
        [b'C', b'D', b'F', _] => Ok("NetCDF3".to_string()),
        _ => Err(NcError::InvalidFormat(
            "Unrecognized NetCDF magic bytes".to_string(),
        )),
    }
}

/// Render an attribute value as a comparable string.
pub(crate) fn attr_to_string(value: &netcdf::AttributeValue) -> String {
    use netcdf::AttributeValue::*;
    match value {
        Str(s) => s.clone(),
        Strs(v) => v.join(", "),
        Uchar(n) => n.to_string(),
        Schar(n) => n.to_string(),
        Ushort(n) => n.to_string(),
        Short(n) => n.to_string(),
        Uint(n) => n.to_string(),
        Int(n) => n.to_string(),
        Ulonglong(n) => n.to_string(),
        Longlong(n) => n.to_string(),
        Float(n) => n.to_string(),
        Double(n) => n.to_string(),
        Uchars(v) => format!("{v:?}"),
        Schars(v) => format!("{v:?}"),
        Ushorts(v) => format!("{v:?}"),
        Shorts(v) => format!("{v:?}"),
        Uints(v) => format!("{v:?}"),
        Ints(v) => format!("{v:?}"),
        Ulonglongs(v) => format!("{v:?}"),
        Longlongs(v) => format!("{v:?}"),
        Floats(v) => format!("{v:?}"),
        Doubles(v) => format!("{v:?}"),
        #[allow(unreachable_patterns)]
        other => format!("{other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_and_read_back_attributes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.nc");
        {
            let mut file = netcdf::create(&path).unwrap();
            file.add_attribute("file_uuid", "123e4567-e89b-12d3-a456-426614174000")
                .unwrap();
        }

        let uuid = read_file_uuid(&path).unwrap();
        assert_eq!(
            uuid.to_string(),
            "123e4567-e89b-12d3-a456-426614174000".to_string()
        );

        write_global_attrs(&path, &[("pid", "https://hdl.handle.net/123/x")]).unwrap();
        assert_eq!(
            read_global_attr(&path, "pid").unwrap().as_deref(),
            Some("https://hdl.handle.net/123/x")
        );

        // Overwriting replaces the value.
        write_global_attrs(&path, &[("pid", "https://hdl.handle.net/123/y")]).unwrap();
        assert_eq!(
            read_global_attr(&path, "pid").unwrap().as_deref(),
            Some("https://hdl.handle.net/123/y")
        );
    }

    #[test]
    fn missing_attribute_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.nc");
        netcdf::create(&path).unwrap();
        assert!(read_global_attr(&path, "pid").unwrap().is_none());
        assert!(read_file_uuid(&path).is_err());
    }

    #[test]
    fn format_detection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fmt.nc");
        netcdf::create(&path).unwrap();
        let format = file_format(&path).unwrap();
        assert!(format == "HDF5 (NetCDF4)" || format == "NetCDF3");
    }
}
