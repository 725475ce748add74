//! Reference documents: files inside an input or output that point at other
//! reality data by path.
//!
//! Before upload, local paths in the document become cloud references
//! (`rds:<cloud id>/<relative path>`) so the service can resolve them. After
//! download the same document is rewritten back to local paths. Both ways go
//! through the [`ReferenceTable`], so every dependency must be uploaded first.
//!
//! - Orientations: `Orientations.xml`, paths in `<ImagePath>` and `<MaskPath>`.
//!   `Orientations - TiePoints.xml` travels along unchanged.
//! - Context scenes: `ContextScene.xml`, or `ContextScene.json` when there is
//!   no XML, paths in the `Path` of every entry under `References`.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tempfile::TempDir;
use tracing::debug;

use crate::error::RewriteError;
use crate::references::ReferenceTable;
use crate::xml;

pub const CLOUD_PREFIX: &str = "rds:";

const ORIENTATIONS: &str = "Orientations.xml";
const TIE_POINTS: &str = "Orientations - TiePoints.xml";
const SCENE_XML: &str = "ContextScene.xml";
const SCENE_JSON: &str = "ContextScene.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    LocalToCloud,
    CloudToLocal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceDocument {
    Orientations,
    ContextScene,
}

impl ReferenceDocument {
    /// The document carried by reality data of `data_type`, if it has one.
    pub fn for_data_type(data_type: &str) -> Option<Self> {
        let data_type = data_type.trim();
        if data_type.eq_ignore_ascii_case("CCOrientations")
            || data_type.eq_ignore_ascii_case("CCOrientation")
        {
            Some(Self::Orientations)
        } else if data_type.eq_ignore_ascii_case("ContextScene") {
            Some(Self::ContextScene)
        } else {
            None
        }
    }

    /// File name of the document inside `dir`.
    fn locate(self, dir: &Path) -> Result<&'static str, RewriteError> {
        let candidates: &[&'static str] = match self {
            Self::Orientations => &[ORIENTATIONS],
            Self::ContextScene => &[SCENE_XML, SCENE_JSON],
        };
        candidates
            .iter()
            .copied()
            .find(|name| dir.join(name).is_file())
            .ok_or_else(|| RewriteError::MissingDocument {
                dir: dir.to_path_buf(),
                expected: match self {
                    Self::Orientations => ORIENTATIONS,
                    Self::ContextScene => "ContextScene.xml or ContextScene.json",
                },
            })
    }
}

/// Copies the document of `source_dir` into a new temporary directory with
/// its local paths replaced by cloud references.
///
/// The returned directory is what gets uploaded; it is removed when dropped.
pub fn stage_for_upload(
    document: ReferenceDocument,
    source_dir: &Path,
    table: &ReferenceTable,
) -> Result<TempDir, RewriteError> {
    let name = document.locate(source_dir)?;
    let staging = tempfile::Builder::new()
        .prefix("reality-upload-")
        .tempdir()
        .map_err(io_error(std::env::temp_dir()))?;

    rewrite_file(
        &source_dir.join(name),
        &staging.path().join(name),
        source_dir,
        table,
        Direction::LocalToCloud,
    )?;

    if document == ReferenceDocument::Orientations {
        let tie_points = source_dir.join(TIE_POINTS);
        if tie_points.is_file() {
            let target = staging.path().join(TIE_POINTS);
            fs::copy(&tie_points, &target).map_err(io_error(target))?;
        }
    }

    debug!(
        ?document,
        source = %source_dir.display(),
        staging = %staging.path().display(),
        "staged reference document"
    );
    Ok(staging)
}

/// Rewrites the document downloaded into `dir` in place, turning cloud
/// references back into local paths.
pub fn restore_after_download(
    document: ReferenceDocument,
    dir: &Path,
    table: &ReferenceTable,
) -> Result<(), RewriteError> {
    let path = dir.join(document.locate(dir)?);
    rewrite_file(&path, &path, dir, table, Direction::CloudToLocal)?;
    debug!(?document, path = %path.display(), "restored local references");
    Ok(())
}

fn rewrite_file(
    source: &Path,
    target: &Path,
    base_dir: &Path,
    table: &ReferenceTable,
    direction: Direction,
) -> Result<(), RewriteError> {
    let text = fs::read_to_string(source).map_err(io_error(source.to_path_buf()))?;
    let is_json = source
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let is_orientations = source
        .file_name()
        .is_some_and(|name| name == ORIENTATIONS);

    let rewritten = if is_json {
        rewrite_scene_json(&text, base_dir, table, direction)?
    } else if is_orientations {
        rewrite_orientations(&text, base_dir, table, direction)?
    } else {
        rewrite_scene_xml(&text, base_dir, table, direction)?
    };

    fs::write(target, rewritten).map_err(io_error(target.to_path_buf()))
}

/// Rewrites every `<ImagePath>` and `<MaskPath>` of an orientations document.
pub fn rewrite_orientations(
    text: &str,
    base_dir: &Path,
    table: &ReferenceTable,
    direction: Direction,
) -> Result<String, RewriteError> {
    xml::rewrite_elements(text, &["ImagePath", "MaskPath"], |path| {
        convert_reference(path, base_dir, table, direction)
    })
}

/// Rewrites the `<Path>` of every reference inside `<References>`.
pub fn rewrite_scene_xml(
    text: &str,
    base_dir: &Path,
    table: &ReferenceTable,
    direction: Direction,
) -> Result<String, RewriteError> {
    let mut out = String::with_capacity(text.len());
    let mut copied = 0;
    for span in xml::element_spans(text, "References") {
        out.push_str(&text[copied..span.start]);
        out.push_str(&xml::rewrite_elements(&text[span.clone()], &["Path"], |path| {
            convert_reference(path, base_dir, table, direction)
        })?);
        copied = span.end;
    }
    out.push_str(&text[copied..]);
    Ok(out)
}

/// Rewrites `References.<id>.Path` of a JSON context scene.
///
/// Parse errors name `ContextScene.json` under `base_dir`.
pub fn rewrite_scene_json(
    text: &str,
    base_dir: &Path,
    table: &ReferenceTable,
    direction: Direction,
) -> Result<String, RewriteError> {
    let json_error = |source| RewriteError::Json {
        path: base_dir.join(SCENE_JSON),
        source,
    };
    let mut scene: Value = serde_json::from_str(text).map_err(json_error)?;

    if let Some(references) = scene.get_mut("References").and_then(Value::as_object_mut) {
        for reference in references.values_mut() {
            if let Some(Value::String(path)) = reference.get_mut("Path") {
                if let Some(converted) = convert_reference(path, base_dir, table, direction)? {
                    *path = converted;
                }
            }
        }
    }

    serde_json::to_string_pretty(&scene).map_err(json_error)
}

/// Converts one path reference; `None` leaves it as written.
///
/// Local paths resolve against `base_dir` when relative and map through the
/// input that contains them (the longest matching local path in the table).
/// Only `rds:` references are turned back into local paths.
pub fn convert_reference(
    reference: &str,
    base_dir: &Path,
    table: &ReferenceTable,
    direction: Direction,
) -> Result<Option<String>, RewriteError> {
    if reference.is_empty() {
        return Ok(None);
    }

    match direction {
        Direction::LocalToCloud => {
            if reference.starts_with(CLOUD_PREFIX) {
                return Ok(None);
            }
            let path = Path::new(reference);
            let absolute = if path.is_relative() {
                base_dir.join(path)
            } else {
                path.to_path_buf()
            };
            let key = PathBuf::from(ReferenceTable::canonical_key(&absolute));

            let (local, cloud_id) = table
                .iter()
                .filter(|(local, _)| key.starts_with(local))
                .max_by_key(|(local, _)| local.len())
                .ok_or_else(|| RewriteError::UnknownLocalPath {
                    path: reference.to_string(),
                })?;
            let rest: Vec<_> = key
                .strip_prefix(local)
                .map(|rest| {
                    rest.components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect()
                })
                .unwrap_or_default();

            Ok(Some(if rest.is_empty() {
                format!("{CLOUD_PREFIX}{cloud_id}")
            } else {
                format!("{CLOUD_PREFIX}{cloud_id}/{}", rest.join("/"))
            }))
        }
        Direction::CloudToLocal => {
            let Some(cloud) = reference.strip_prefix(CLOUD_PREFIX) else {
                return Ok(None);
            };
            let (cloud_id, rest) = cloud.split_once('/').unwrap_or((cloud, ""));
            let local = table
                .get_local_path_from_cloud_id(cloud_id)
                .map_err(|_| RewriteError::UnknownCloudId {
                    cloud_id: cloud_id.to_string(),
                })?;

            let mut path = PathBuf::from(local);
            path.extend(rest.split('/').filter(|part| !part.is_empty()));
            Ok(Some(path.to_string_lossy().into_owned()))
        }
    }
}

fn io_error(path: PathBuf) -> impl FnOnce(std::io::Error) -> RewriteError {
    move |source| RewriteError::Io { path, source }
}
