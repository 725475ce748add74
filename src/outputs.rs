//! Retrieval of the outputs a finished job declares.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{DownloadError, OutputFailure};
use crate::reality::DataTransfer;
use crate::references::ReferenceTable;
use crate::rewrite::{self, ReferenceDocument};

/// Output kind (format name) → output id, when the job produced one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredOutputs(BTreeMap<String, Option<String>>);

impl DeclaredOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: impl Into<String>, id: Option<String>) {
        self.0.insert(kind.into(), id);
    }

    /// `None` if the kind was never declared, `Some(None)` if it has no id.
    pub fn get(&self, kind: &str) -> Option<Option<&str>> {
        self.0.get(kind).map(Option::as_deref)
    }

    /// Declared outputs that carry a non-empty id, ordered by kind.
    pub fn present(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().filter_map(|(kind, id)| match id.as_deref() {
            Some(id) if !id.trim().is_empty() => Some((kind.as_str(), id)),
            _ => None,
        })
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Option<String>)> for DeclaredOutputs {
    fn from_iter<I: IntoIterator<Item = (String, Option<String>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// An output fetched to the local filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadedOutput {
    pub kind: String,
    pub output_id: String,
    pub path: PathBuf,
    pub files: usize,
    pub bytes: u64,
}

pub type OutputResult = Result<DownloadedOutput, DownloadError>;

/// Downloads every present output of a job, one at a time.
pub struct OutputCollector<'a, T> {
    transfer: &'a T,
    project_id: String,
    references: Option<&'a ReferenceTable>,
}

impl<'a, T: DataTransfer> OutputCollector<'a, T> {
    pub fn new(transfer: &'a T, project_id: impl Into<String>) -> Self {
        Self {
            transfer,
            project_id: project_id.into(),
            references: None,
        }
    }

    /// Turn cloud references in downloaded `CCOrientations` and
    /// `ContextScene` outputs back into local paths using `table`.
    pub fn with_references(mut self, table: &'a ReferenceTable) -> Self {
        self.references = Some(table);
        self
    }

    /// Fetches each output into `dest_dir/<kind>`.
    ///
    /// A failed output is reported in its own entry and does not stop the
    /// others; outputs without an id are skipped entirely. Kinds that map to
    /// the same directory name get `_2`, `_3`, ... appended.
    pub async fn collect(
        &self,
        job_id: &str,
        declared: &DeclaredOutputs,
        dest_dir: &Path,
    ) -> Vec<OutputResult> {
        let mut results = Vec::new();
        let mut taken = HashSet::new();

        for (kind, output_id) in declared.present() {
            let target = dest_dir.join(unique_directory_name(kind, &mut taken));
            let fetched = match self
                .transfer
                .download(output_id, &target, &self.project_id)
                .await
            {
                Ok(summary) => self.restore_references(kind, &target).map(|()| summary),
                Err(source) => Err(OutputFailure::Transfer(source)),
            };

            let result = match fetched {
                Ok(summary) => {
                    info!(job_id, kind, output_id, path = %target.display(), "downloaded output");
                    Ok(DownloadedOutput {
                        kind: kind.to_string(),
                        output_id: output_id.to_string(),
                        path: target,
                        files: summary.files,
                        bytes: summary.bytes,
                    })
                }
                Err(source) => {
                    match &source {
                        OutputFailure::Transfer(api) if api.is_not_found() => {
                            warn!(job_id, kind, output_id, "output no longer exists");
                        }
                        _ => warn!(job_id, kind, output_id, error = %source, "output download failed"),
                    }
                    Err(DownloadError {
                        kind: kind.to_string(),
                        output_id: output_id.to_string(),
                        source,
                    })
                }
            };
            results.push(result);
        }

        results
    }

    fn restore_references(&self, kind: &str, dir: &Path) -> Result<(), OutputFailure> {
        match (ReferenceDocument::for_data_type(kind), self.references) {
            (Some(document), Some(table)) => {
                rewrite::restore_after_download(document, dir, table)?;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

// "Cesium 3D Tiles" -> "Cesium_3D_Tiles"
fn directory_name(kind: &str) -> String {
    let name: String = kind
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if name.is_empty() {
        "output".to_string()
    } else {
        name
    }
}

fn unique_directory_name(kind: &str, taken: &mut HashSet<String>) -> String {
    let base = directory_name(kind);
    let mut name = base.clone();
    let mut suffix = 1;
    while !taken.insert(name.clone()) {
        suffix += 1;
        name = format!("{base}_{suffix}");
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reality::{ApiError, TransferSummary};
    use std::cell::RefCell;

    /// Records download calls; ids listed in `failing` return an error.
    struct FakeTransfer {
        failing: Vec<&'static str>,
        downloads: RefCell<Vec<(String, PathBuf, String)>>,
        /// Files written into every destination, as `(name, contents)`.
        files: Vec<(&'static str, String)>,
    }

    impl FakeTransfer {
        fn failing(ids: &[&'static str]) -> Self {
            Self {
                failing: ids.to_vec(),
                downloads: RefCell::new(Vec::new()),
                files: Vec::new(),
            }
        }
    }

    impl DataTransfer for FakeTransfer {
        async fn upload(&self, _: &Path, _: &str, _: &str, _: &str) -> Result<String, ApiError> {
            unreachable!("collector never uploads")
        }

        async fn download(
            &self,
            cloud_id: &str,
            dest_dir: &Path,
            project_id: &str,
        ) -> Result<TransferSummary, ApiError> {
            self.downloads.borrow_mut().push((
                cloud_id.to_string(),
                dest_dir.to_path_buf(),
                project_id.to_string(),
            ));
            if self.failing.iter().any(|id| *id == cloud_id) {
                return Err(ApiError::Status {
                    status: 404,
                    code: "RealityDataNotFound".into(),
                    message: String::new(),
                });
            }
            for (name, contents) in &self.files {
                std::fs::create_dir_all(dest_dir).unwrap();
                std::fs::write(dest_dir.join(name), contents).unwrap();
            }
            Ok(TransferSummary { files: 2, bytes: 64 })
        }
    }

    fn declared(entries: &[(&str, Option<&str>)]) -> DeclaredOutputs {
        entries
            .iter()
            .map(|(kind, id)| (kind.to_string(), id.map(str::to_string)))
            .collect()
    }

    #[test]
    fn present_skips_missing_and_blank_ids() {
        let outputs = declared(&[("A", Some("id1")), ("B", None), ("C", Some(" "))]);
        let present: Vec<_> = outputs.present().collect();
        assert_eq!(present, vec![("A", "id1")]);
        assert_eq!(outputs.len(), 3);
    }

    #[test]
    fn directory_names_are_filesystem_safe() {
        assert_eq!(directory_name("Cesium 3D Tiles"), "Cesium_3D_Tiles");
        assert_eq!(directory_name("OBJ"), "OBJ");
        assert_eq!(directory_name("../x"), "___x");
        assert_eq!(directory_name(""), "output");
    }

    #[tokio::test]
    async fn partial_failure_is_reported_per_output() {
        let transfer = FakeTransfer::failing(&["id1"]);
        let collector = OutputCollector::new(&transfer, "p1");
        let outputs = declared(&[("A", Some("id1")), ("B", None), ("C", Some("id3"))]);

        let results = collector
            .collect("job-1", &outputs, Path::new("/out"))
            .await;

        assert_eq!(results.len(), 2);
        let failure = results[0].as_ref().unwrap_err();
        assert_eq!(failure.kind, "A");
        assert_eq!(failure.output_id, "id1");
        let success = results[1].as_ref().unwrap();
        assert_eq!(success.kind, "C");
        assert_eq!(success.path, Path::new("/out").join("C"));
        assert_eq!(success.files, 2);

        let calls = transfer.downloads.borrow();
        let ids: Vec<_> = calls.iter().map(|(id, _, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["id1", "id3"]);
        assert!(calls.iter().all(|(_, _, project)| project == "p1"));
    }

    #[tokio::test]
    async fn colliding_kinds_get_distinct_directories() {
        let transfer = FakeTransfer::failing(&[]);
        let collector = OutputCollector::new(&transfer, "p1");
        let outputs = declared(&[
            ("3D Tiles", Some("id1")),
            ("3D_Tiles", Some("id2")),
            ("3D-Tiles", Some("id3")),
            ("3D.Tiles", Some("id4")),
        ]);

        let results = collector
            .collect("job-1", &outputs, Path::new("/out"))
            .await;

        let mut dirs: Vec<_> = results
            .iter()
            .map(|r| r.as_ref().unwrap().path.clone())
            .collect();
        dirs.sort();
        dirs.dedup();
        assert_eq!(dirs.len(), 4);
        let by_kind = |kind: &str| {
            results
                .iter()
                .map(|r| r.as_ref().unwrap())
                .find(|d| d.kind == kind)
                .unwrap()
                .path
                .clone()
        };
        // BTreeMap order: "3D Tiles" < "3D-Tiles" < "3D.Tiles" < "3D_Tiles"
        assert_eq!(by_kind("3D Tiles"), Path::new("/out").join("3D_Tiles"));
        assert_eq!(by_kind("3D-Tiles"), Path::new("/out").join("3D-Tiles"));
        assert_eq!(by_kind("3D.Tiles"), Path::new("/out").join("3D_Tiles_2"));
        assert_eq!(by_kind("3D_Tiles"), Path::new("/out").join("3D_Tiles_3"));
    }

    #[tokio::test]
    async fn downloaded_orientations_point_back_to_local_inputs() {
        let tmp = tempfile::TempDir::new().unwrap();
        let photos = ReferenceTable::canonical_key(tmp.path());
        let mut table = ReferenceTable::new();
        table.add_reference(&photos, "c-img").unwrap();
        let transfer = FakeTransfer {
            files: vec![(
                "Orientations.xml",
                "<Photo><ImagePath>rds:c-img/IMG_1.JPG</ImagePath></Photo>".to_string(),
            )],
            ..FakeTransfer::failing(&[])
        };
        let collector = OutputCollector::new(&transfer, "p1").with_references(&table);
        let dest = tmp.path().join("out");

        let results = collector
            .collect(
                "job-1",
                &declared(&[("CCOrientations", Some("o1")), ("OBJ", Some("o2"))]),
                &dest,
            )
            .await;

        assert!(results.iter().all(Result::is_ok));
        let restored =
            std::fs::read_to_string(dest.join("CCOrientations").join("Orientations.xml")).unwrap();
        assert_eq!(
            restored,
            format!("<Photo><ImagePath>{photos}/IMG_1.JPG</ImagePath></Photo>")
        );
        // Non-document outputs are left as downloaded.
        assert_eq!(
            std::fs::read_to_string(dest.join("OBJ").join("Orientations.xml")).unwrap(),
            "<Photo><ImagePath>rds:c-img/IMG_1.JPG</ImagePath></Photo>"
        );
    }

    #[tokio::test]
    async fn unresolvable_reference_fails_that_output() {
        let tmp = tempfile::TempDir::new().unwrap();
        let table = ReferenceTable::new();
        let transfer = FakeTransfer {
            files: vec![(
                "ContextScene.xml",
                "<References><Reference id=\"0\"><Path>rds:gone</Path></Reference></References>"
                    .to_string(),
            )],
            ..FakeTransfer::failing(&[])
        };
        let collector = OutputCollector::new(&transfer, "p1").with_references(&table);

        let results = collector
            .collect("job-1", &declared(&[("ContextScene", Some("o1"))]), tmp.path())
            .await;

        let failure = results[0].as_ref().unwrap_err();
        assert!(matches!(failure.source, OutputFailure::Rewrite(_)));
        assert!(failure.to_string().contains("gone"));
    }

    #[tokio::test]
    async fn nothing_declared_downloads_nothing() {
        let transfer = FakeTransfer::failing(&[]);
        let collector = OutputCollector::new(&transfer, "p1");

        let results = collector
            .collect("job-1", &declared(&[("A", None)]), Path::new("/out"))
            .await;

        assert!(results.is_empty());
        assert!(transfer.downloads.borrow().is_empty());
    }
}
