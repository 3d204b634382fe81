//! Local plumbing for downloaded raw files: decompression, concatenation,
//! suffix fixing.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use cloudnet_common::CloudnetResult;
use flate2::read::GzDecoder;
use tracing::{debug, warn};
use uuid::Uuid;

/// Decompress `.gz` files in place, keeping other files untouched.
///
/// Corrupt members are dropped with a warning; an upload may contain a
/// truncated gzip file without invalidating the rest of the day.
pub fn unzip_gz_files(full_paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut out_paths = Vec::with_capacity(full_paths.len());
    for path_in in full_paths {
        match unzip_gz_file(&path_in) {
            Ok(path_out) => out_paths.push(path_out),
            Err(err) => warn!(path = %path_in.display(), error = %err, "Cannot unzip gz file"),
        }
    }
    out_paths
}

fn unzip_gz_file(path_in: &Path) -> CloudnetResult<PathBuf> {
    if path_in.extension().and_then(|e| e.to_str()) != Some("gz") {
        return Ok(path_in.to_path_buf());
    }
    let path_out = path_in.with_extension("");
    debug!(from = %path_in.display(), to = %path_out.display(), "Decompressing");
    let input = fs::File::open(path_in)?;
    let mut decoder = GzDecoder::new(input);
    let mut output = fs::File::create(&path_out)?;
    std::io::copy(&mut decoder, &mut output)?;
    fs::remove_file(path_in)?;
    Ok(path_out)
}

/// Concatenate text files (sorted order expected from the caller) into one
/// daily file.
pub fn concatenate_text_files(full_paths: &[PathBuf], output_path: &Path) -> CloudnetResult<()> {
    let mut writer = BufWriter::new(fs::File::create(output_path)?);
    for path in full_paths {
        let content = fs::read(path)?;
        writer.write_all(&content)?;
    }
    writer.flush()?;
    Ok(())
}

/// Rename files that carry an incorrect suffix.
pub fn fix_suffices(full_paths: Vec<PathBuf>, suffix: &str) -> CloudnetResult<Vec<PathBuf>> {
    let mut out_paths = Vec::with_capacity(full_paths.len());
    for path in full_paths {
        let current = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_default();
        if current == suffix {
            out_paths.push(path);
        } else {
            let renamed = path.with_extension(suffix.trim_start_matches('.'));
            fs::rename(&path, &renamed)?;
            out_paths.push(renamed);
        }
    }
    Ok(out_paths)
}

/// Raw UUIDs whose files the transform actually used.
pub fn valid_uuids(uuids: &[Uuid], full_paths: &[PathBuf], valid_paths: &[PathBuf]) -> Vec<Uuid> {
    uuids
        .iter()
        .zip(full_paths)
        .filter(|(_, path)| valid_paths.contains(path))
        .map(|(uuid, _)| *uuid)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    #[test]
    fn unzips_gz_and_keeps_plain_files() {
        let dir = tempfile::tempdir().unwrap();
        let gz_path = dir.path().join("data.txt.gz");
        let plain_path = dir.path().join("plain.txt");

        let mut encoder = GzEncoder::new(fs::File::create(&gz_path).unwrap(), Compression::fast());
        encoder.write_all(b"compressed content").unwrap();
        encoder.finish().unwrap();
        fs::write(&plain_path, b"plain content").unwrap();

        let out = unzip_gz_files(vec![gz_path.clone(), plain_path.clone()]);
        assert_eq!(out, vec![dir.path().join("data.txt"), plain_path]);
        assert_eq!(
            fs::read(dir.path().join("data.txt")).unwrap(),
            b"compressed content"
        );
        assert!(!gz_path.exists());
    }

    #[test]
    fn corrupt_gz_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.gz");
        fs::write(&bad, b"not gzip at all").unwrap();
        let out = unzip_gz_files(vec![bad]);
        assert!(out.is_empty());
    }

    #[test]
    fn concatenates_in_given_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        fs::write(&a, b"first\n").unwrap();
        fs::write(&b, b"second\n").unwrap();

        let daily = dir.path().join("daily.txt");
        concatenate_text_files(&[a, b], &daily).unwrap();
        assert_eq!(fs::read(&daily).unwrap(), b"first\nsecond\n");
    }

    #[test]
    fn fixes_wrong_suffices() {
        let dir = tempfile::tempdir().unwrap();
        let wrong = dir.path().join("spectra.zspc");
        let right = dir.path().join("moments.mmclx");
        fs::write(&wrong, b"x").unwrap();
        fs::write(&right, b"y").unwrap();

        let out = fix_suffices(vec![wrong, right.clone()], ".mmclx").unwrap();
        assert_eq!(out, vec![dir.path().join("spectra.mmclx"), right]);
    }

    #[test]
    fn valid_uuid_selection() {
        let uuids = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        let paths = [
            PathBuf::from("/tmp/a"),
            PathBuf::from("/tmp/b"),
            PathBuf::from("/tmp/c"),
        ];
        let valid = [PathBuf::from("/tmp/a"), PathBuf::from("/tmp/c")];
        assert_eq!(
            valid_uuids(&uuids, &paths, &valid),
            vec![uuids[0], uuids[2]]
        );
    }
}
