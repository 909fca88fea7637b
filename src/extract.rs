use std::fs;
use std::io;
use std::path::Path;

use zip::ZipArchive;

use crate::error::UpgradeError;

pub trait Extractor: Send + Sync {
    /// Unpacks `archive` into `destination`. Any failing entry fails the
    /// whole extraction; entries written before it are left in place.
    fn extract(&self, archive: &Path, destination: &Path) -> Result<(), UpgradeError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ZipExtractor;

impl Extractor for ZipExtractor {
    fn extract(&self, archive: &Path, destination: &Path) -> Result<(), UpgradeError> {
        extract_zip(archive, destination)
    }
}

pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<(), UpgradeError> {
    fs::create_dir_all(target_dir).map_err(|err| UpgradeError::Extraction(err.to_string()))?;
    let file = fs::File::open(zip_path).map_err(|err| {
        UpgradeError::Extraction(format!("open zip {}: {err}", zip_path.display()))
    })?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| UpgradeError::Extraction(err.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| UpgradeError::Extraction(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(UpgradeError::Extraction(format!(
                    "zip entry escapes destination: {}",
                    entry.name()
                )));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| UpgradeError::Extraction(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| UpgradeError::Extraction(err.to_string()))?;
        }
        let mut outfile = fs::File::create(&entry_path)
            .map_err(|err| UpgradeError::Extraction(err.to_string()))?;
        io::copy(&mut entry, &mut outfile)
            .map_err(|err| UpgradeError::Extraction(err.to_string()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use assert_matches::assert_matches;
    use zip::write::SimpleFileOptions;

    use super::*;

    fn write_zip(path: &Path, entries: &[(&str, Option<&[u8]>)]) {
        let file = fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, content) in entries {
            match content {
                Some(bytes) => {
                    writer
                        .start_file(*name, SimpleFileOptions::default())
                        .unwrap();
                    writer.write_all(bytes).unwrap();
                }
                None => writer
                    .add_directory(*name, SimpleFileOptions::default())
                    .unwrap(),
            }
        }
        writer.finish().unwrap();
    }

    #[test]
    fn extracts_nested_entries() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("index.zip");
        write_zip(
            &archive,
            &[
                ("css/", None),
                ("css/app.css", Some(b"body {}")),
                ("index.html", Some(b"<html></html>")),
            ],
        );

        let target = temp.path().join("out").join("index");
        ZipExtractor.extract(&archive, &target).unwrap();

        assert!(target.join("css").is_dir());
        assert_eq!(fs::read(target.join("css/app.css")).unwrap(), b"body {}");
        assert_eq!(
            fs::read(target.join("index.html")).unwrap(),
            b"<html></html>"
        );
    }

    #[test]
    fn corrupt_archive_fails() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("index.zip");
        fs::write(&archive, b"definitely not a zip").unwrap();

        let err = ZipExtractor
            .extract(&archive, &temp.path().join("out"))
            .unwrap_err();
        assert_matches!(err, UpgradeError::Extraction(_));
    }

    #[test]
    fn missing_archive_fails() {
        let temp = tempfile::tempdir().unwrap();
        let err = ZipExtractor
            .extract(&temp.path().join("absent.zip"), &temp.path().join("out"))
            .unwrap_err();
        assert_matches!(err, UpgradeError::Extraction(_));
    }
}
