//! Persisted table of local resources already present in the cloud.
//!
//! Each record maps the canonical path of a local resource to the cloud id it
//! was uploaded as. The table is the dedup cache shared by successive runs:
//! it is loaded once at start, grows as uploads complete, and is rewritten in
//! full by [`ReferenceTable::save`].
//!
//! On disk the table is plain text, one `<local path>,<cloud id>` record per
//! line. The last comma splits the two fields, so local paths may contain
//! commas but cloud ids may not.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::ReferenceError;

const DELIMITER: char = ',';

/// Bidirectional local-path ↔ cloud-id mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceTable {
    local_to_cloud: BTreeMap<String, String>,
    cloud_to_local: HashMap<String, String>,
}

impl ReferenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical key for a local resource.
    ///
    /// Existing paths are resolved through the filesystem; paths that do not
    /// exist yet are made absolute against the working directory.
    pub fn canonical_key(path: &Path) -> String {
        fs::canonicalize(path)
            .or_else(|_| std::path::absolute(path))
            .unwrap_or_else(|_| path.to_path_buf())
            .to_string_lossy()
            .into_owned()
    }

    /// Replaces the in-memory table with the records stored at `path`.
    ///
    /// The table is left untouched if the file cannot be read or any record
    /// is malformed.
    pub fn load(&mut self, path: &Path) -> Result<(), ReferenceError> {
        let contents = fs::read_to_string(path).map_err(|source| ReferenceError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut loaded = ReferenceTable::new();
        for (index, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let malformed = || ReferenceError::Parse {
                path: path.to_path_buf(),
                line: index + 1,
                content: line.to_string(),
            };
            let (local, cloud) = line.rsplit_once(DELIMITER).ok_or_else(&malformed)?;
            let cloud = cloud.trim();
            if local.is_empty() || cloud.is_empty() {
                return Err(malformed());
            }
            loaded
                .add_reference(local, cloud)
                .map_err(|_| malformed())?;
        }

        debug!(path = %path.display(), records = loaded.len(), "loaded reference table");
        *self = loaded;
        Ok(())
    }

    /// Loads `path` if it exists, otherwise starts from an empty table.
    pub fn load_or_default(path: &Path) -> Result<Self, ReferenceError> {
        let mut table = Self::new();
        match table.load(path) {
            Ok(()) => Ok(table),
            Err(ReferenceError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no reference table yet, starting empty");
                Ok(table)
            }
            Err(err) => Err(err),
        }
    }

    /// Rewrites `path` with every record, sorted by local path.
    pub fn save(&self, path: &Path) -> Result<(), ReferenceError> {
        let io_err = |source| ReferenceError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let mut contents = String::new();
        for (local, cloud) in &self.local_to_cloud {
            contents.push_str(local);
            contents.push(DELIMITER);
            contents.push_str(cloud);
            contents.push('\n');
        }

        let staging = staging_path(path);
        fs::write(&staging, contents).map_err(io_err)?;
        fs::rename(&staging, path).map_err(io_err)?;

        debug!(path = %path.display(), records = self.len(), "saved reference table");
        Ok(())
    }

    pub fn has_local_path(&self, local_path: &str) -> bool {
        self.local_to_cloud.contains_key(local_path)
    }

    pub fn has_cloud_id(&self, cloud_id: &str) -> bool {
        self.cloud_to_local.contains_key(cloud_id)
    }

    /// Records that `local_path` now lives in the cloud as `cloud_id`.
    ///
    /// Both sides must be unused; a rejected record leaves the table as it was.
    pub fn add_reference(&mut self, local_path: &str, cloud_id: &str) -> Result<(), ReferenceError> {
        validate_field("local path", local_path)?;
        validate_field("cloud id", cloud_id)?;
        if cloud_id.contains(DELIMITER) || cloud_id.trim() != cloud_id {
            return Err(ReferenceError::InvalidField {
                field: "cloud id",
                value: cloud_id.to_string(),
            });
        }

        if let Some(existing) = self.local_to_cloud.get(local_path) {
            return Err(ReferenceError::DuplicateLocalPath {
                local_path: local_path.to_string(),
                existing: existing.clone(),
            });
        }
        if let Some(existing) = self.cloud_to_local.get(cloud_id) {
            return Err(ReferenceError::DuplicateCloudId {
                cloud_id: cloud_id.to_string(),
                existing: existing.clone(),
            });
        }

        self.local_to_cloud
            .insert(local_path.to_string(), cloud_id.to_string());
        self.cloud_to_local
            .insert(cloud_id.to_string(), local_path.to_string());
        Ok(())
    }

    pub fn get_cloud_id_from_local_path(&self, local_path: &str) -> Result<&str, ReferenceError> {
        self.local_to_cloud
            .get(local_path)
            .map(String::as_str)
            .ok_or_else(|| ReferenceError::NotFound(local_path.to_string()))
    }

    pub fn get_local_path_from_cloud_id(&self, cloud_id: &str) -> Result<&str, ReferenceError> {
        self.cloud_to_local
            .get(cloud_id)
            .map(String::as_str)
            .ok_or_else(|| ReferenceError::NotFound(cloud_id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.local_to_cloud.len()
    }

    pub fn is_empty(&self) -> bool {
        self.local_to_cloud.is_empty()
    }

    /// Records as `(local path, cloud id)`, sorted by local path.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.local_to_cloud
            .iter()
            .map(|(local, cloud)| (local.as_str(), cloud.as_str()))
    }
}

fn validate_field(field: &'static str, value: &str) -> Result<(), ReferenceError> {
    if value.trim().is_empty() || value.contains(['\n', '\r']) {
        return Err(ReferenceError::InvalidField {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

// Sibling file so the final rename stays on the same filesystem.
fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn table_with(records: &[(&str, &str)]) -> ReferenceTable {
        let mut table = ReferenceTable::new();
        for (local, cloud) in records {
            table.add_reference(local, cloud).unwrap();
        }
        table
    }

    #[test]
    fn add_and_lookup_both_directions() {
        let table = table_with(&[("/data/photos", "c1")]);
        assert!(table.has_local_path("/data/photos"));
        assert!(table.has_cloud_id("c1"));
        assert_eq!(table.get_cloud_id_from_local_path("/data/photos").unwrap(), "c1");
        assert_eq!(table.get_local_path_from_cloud_id("c1").unwrap(), "/data/photos");
    }

    #[test]
    fn lookups_are_exact_string_keyed() {
        let table = table_with(&[("/data/photos", "c1")]);
        assert!(!table.has_local_path("/data/photos/"));
        assert!(!table.has_local_path("/DATA/photos"));
    }

    #[test]
    fn duplicate_local_path_is_rejected_and_keeps_first_mapping() {
        let mut table = table_with(&[("/data/photos", "c1")]);
        let err = table.add_reference("/data/photos", "c2").unwrap_err();
        assert!(matches!(
            err,
            ReferenceError::DuplicateLocalPath { ref existing, .. } if existing == "c1"
        ));
        assert_eq!(table.get_cloud_id_from_local_path("/data/photos").unwrap(), "c1");
        assert!(!table.has_cloud_id("c2"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn duplicate_cloud_id_is_rejected() {
        let mut table = table_with(&[("/data/photos", "c1")]);
        let err = table.add_reference("/data/other", "c1").unwrap_err();
        assert!(matches!(err, ReferenceError::DuplicateCloudId { .. }));
        assert!(!table.has_local_path("/data/other"));
    }

    #[test]
    fn invalid_fields_are_rejected() {
        let mut table = ReferenceTable::new();
        assert!(matches!(
            table.add_reference("", "c1"),
            Err(ReferenceError::InvalidField { field: "local path", .. })
        ));
        assert!(matches!(
            table.add_reference("/a\nb", "c1"),
            Err(ReferenceError::InvalidField { .. })
        ));
        assert!(matches!(
            table.add_reference("/a", "c,1"),
            Err(ReferenceError::InvalidField { field: "cloud id", .. })
        ));
        assert!(matches!(
            table.add_reference("/a", " c1 "),
            Err(ReferenceError::InvalidField { field: "cloud id", .. })
        ));
        assert!(table.is_empty());
    }

    #[test]
    fn accepted_records_survive_a_save_and_load() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("refs.txt");
        let mut table = ReferenceTable::new();
        table.add_reference("/data/photos", "c1").unwrap();
        table.add_reference(" /data/with space ", "c2").unwrap();
        assert!(table.add_reference("/data/padded", "\tc3").is_err());

        table.save(&file).unwrap();
        let mut loaded = ReferenceTable::new();
        loaded.load(&file).unwrap();

        assert_eq!(loaded, table);
        assert_eq!(loaded.get_local_path_from_cloud_id("c2").unwrap(), " /data/with space ");
    }

    #[test]
    fn missing_lookup_is_not_found() {
        let table = ReferenceTable::new();
        assert!(matches!(
            table.get_cloud_id_from_local_path("/nowhere"),
            Err(ReferenceError::NotFound(_))
        ));
        assert!(matches!(
            table.get_local_path_from_cloud_id("c9"),
            Err(ReferenceError::NotFound(_))
        ));
    }

    #[test]
    fn save_then_load_empty_table() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("refs.txt");

        ReferenceTable::new().save(&path).unwrap();
        let mut loaded = table_with(&[("/stale", "s1")]);
        loaded.load(&path).unwrap();

        assert!(loaded.is_empty());
        assert_eq!(loaded, ReferenceTable::new());
    }

    #[test]
    fn save_then_load_reproduces_mapping() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("refs.txt");
        let table = table_with(&[
            ("/data/photos", "c1"),
            ("/data/orientations, v2", "c2"),
            ("C:\\captures\\site", "c3"),
        ]);

        table.save(&path).unwrap();
        let mut loaded = ReferenceTable::new();
        loaded.load(&path).unwrap();

        assert_eq!(loaded, table);
        assert_eq!(
            loaded.get_cloud_id_from_local_path("/data/orientations, v2").unwrap(),
            "c2"
        );
    }

    #[test]
    fn save_writes_one_sorted_record_per_line() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("refs.txt");
        table_with(&[("/b", "c2"), ("/a", "c1")]).save(&path).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "/a,c1\n/b,c2\n");
        assert!(!tmp.path().join("refs.txt.tmp").exists());
    }

    #[test]
    fn save_overwrites_instead_of_appending() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("refs.txt");
        table_with(&[("/a", "c1"), ("/b", "c2")]).save(&path).unwrap();
        table_with(&[("/a", "c1")]).save(&path).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "/a,c1\n");
    }

    #[test]
    fn load_tolerates_blank_lines_and_trailing_whitespace() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("refs.txt");
        fs::write(&path, "/a,c1\r\n\n/b,c2  \n").unwrap();

        let mut table = ReferenceTable::new();
        table.load(&path).unwrap();
        assert_eq!(table.get_cloud_id_from_local_path("/a").unwrap(), "c1");
        assert_eq!(table.get_cloud_id_from_local_path("/b").unwrap(), "c2");
    }

    #[test]
    fn malformed_line_aborts_load_and_preserves_table() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("refs.txt");
        fs::write(&path, "/a,c1\nnot a record\n/b,c2\n").unwrap();

        let mut table = table_with(&[("/kept", "k1")]);
        let err = table.load(&path).unwrap_err();

        assert!(matches!(err, ReferenceError::Parse { line: 2, .. }));
        assert_eq!(table, table_with(&[("/kept", "k1")]));
    }

    #[test]
    fn empty_field_is_a_parse_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("refs.txt");
        fs::write(&path, "/a,\n").unwrap();

        let err = ReferenceTable::new().load(&path).unwrap_err();
        assert!(matches!(err, ReferenceError::Parse { line: 1, .. }));
    }

    #[test]
    fn repeated_local_path_in_file_is_a_parse_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("refs.txt");
        fs::write(&path, "/a,c1\n/a,c2\n").unwrap();

        let err = ReferenceTable::new().load(&path).unwrap_err();
        assert!(matches!(err, ReferenceError::Parse { line: 2, .. }));
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let tmp = TempDir::new().unwrap();
        let err = ReferenceTable::new()
            .load(&tmp.path().join("absent.txt"))
            .unwrap_err();
        assert!(matches!(err, ReferenceError::Io { .. }));
    }

    #[test]
    fn load_or_default_starts_empty_without_file() {
        let tmp = TempDir::new().unwrap();
        let table = ReferenceTable::load_or_default(&tmp.path().join("absent.txt")).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn reloaded_table_keeps_growing_across_runs() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("refs.txt");

        let mut first_run = ReferenceTable::load_or_default(&path).unwrap();
        first_run.add_reference("/a", "c1").unwrap();
        first_run.save(&path).unwrap();

        let mut second_run = ReferenceTable::load_or_default(&path).unwrap();
        assert!(second_run.has_local_path("/a"));
        second_run.add_reference("/b", "c2").unwrap();
        second_run.save(&path).unwrap();

        let third_run = ReferenceTable::load_or_default(&path).unwrap();
        let records: Vec<_> = third_run.iter().collect();
        assert_eq!(records, vec![("/a", "c1"), ("/b", "c2")]);
    }

    #[test]
    fn canonical_key_is_absolute() {
        let tmp = TempDir::new().unwrap();
        let key = ReferenceTable::canonical_key(tmp.path());
        assert!(Path::new(&key).is_absolute());

        let missing = ReferenceTable::canonical_key(Path::new("not/yet/here"));
        assert!(Path::new(&missing).is_absolute());
        assert!(missing.ends_with("here"));
    }
}
