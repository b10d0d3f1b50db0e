//! On-disk dataset layout.
//!
//! ```text
//! <root>/
//!   classes.json            class name -> id manifest
//!   data.yaml               dataset descriptor for external trainers
//!   images/{train,val}/     source images
//!   labels/{train,val}/     one .txt per image
//! ```
//!
//! Label lines use the YOLO convention: `class_id x_center y_center width height`,
//! all normalized to [0, 1].

use std::path::{Path, PathBuf};

use sscan_models::{BoundingBox, DatasetSplit};

use crate::error::{TrainingError, TrainingResult};

const MANIFEST_FILE: &str = "classes.json";
const DATA_YAML_FILE: &str = "data.yaml";

/// Paths inside a dataset root.
#[derive(Debug, Clone)]
pub struct DatasetLayout {
    root: PathBuf,
}

impl DatasetLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn images_dir(&self, split: DatasetSplit) -> PathBuf {
        self.root.join("images").join(split.dir_name())
    }

    pub fn labels_dir(&self, split: DatasetSplit) -> PathBuf {
        self.root.join("labels").join(split.dir_name())
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn data_yaml_path(&self) -> PathBuf {
        self.root.join(DATA_YAML_FILE)
    }

    /// Create every split directory.
    pub async fn ensure_dirs(&self) -> TrainingResult<()> {
        for split in DatasetSplit::ALL {
            tokio::fs::create_dir_all(self.images_dir(*split)).await?;
            tokio::fs::create_dir_all(self.labels_dir(*split)).await?;
        }
        Ok(())
    }

    /// Label files for one split, sorted by name.
    pub async fn label_files(&self, split: DatasetSplit) -> TrainingResult<Vec<PathBuf>> {
        let dir = self.labels_dir(split);
        let mut files = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("txt") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Smallest extent a label line can carry at six decimals.
pub const MIN_LABEL_EXTENT: f64 = 1e-6;

/// Format one label line.
///
/// Extents below the written precision are widened to [`MIN_LABEL_EXTENT`]
/// so the line still parses back as a positive-size box.
pub fn format_label_line(class_id: u32, bbox: &BoundingBox) -> String {
    let (cx, cy) = bbox.center();
    format!(
        "{} {:.6} {:.6} {:.6} {:.6}",
        class_id,
        cx,
        cy,
        bbox.width.max(MIN_LABEL_EXTENT),
        bbox.height.max(MIN_LABEL_EXTENT)
    )
}

/// Parse one label line back into a class id and top-left box.
pub fn parse_label_line(line: &str) -> Option<(u32, BoundingBox)> {
    let mut parts = line.split_whitespace();
    let class_id = parts.next()?.parse().ok()?;
    let values: Vec<f64> = parts.map(|p| p.parse().ok()).collect::<Option<_>>()?;
    let [cx, cy, w, h] = values.as_slice() else {
        return None;
    };
    let bbox = BoundingBox::new(cx - w / 2.0, cy - h / 2.0, *w, *h).fitted();
    bbox.is_valid().then_some((class_id, bbox))
}

/// Parse a whole label file, failing on the first malformed line.
pub fn parse_label_file(path: &Path, contents: &str) -> TrainingResult<Vec<(u32, BoundingBox)>> {
    contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|line| {
            parse_label_line(line).ok_or_else(|| TrainingError::LabelLine {
                path: path.to_path_buf(),
                line: line.to_string(),
            })
        })
        .collect()
}

/// Write through a temp file and rename, so readers never see a partial file.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> TrainingResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_line_uses_center_coordinates() {
        let bbox = BoundingBox::new(0.2, 0.2, 0.4, 0.3);
        assert_eq!(format_label_line(0, &bbox), "0 0.400000 0.350000 0.400000 0.300000");
    }

    #[test]
    fn test_label_line_parses_back() {
        let bbox = BoundingBox::new(0.7, 0.3, 0.25, 0.5);
        let line = format_label_line(2, &bbox);
        let (class_id, parsed) = parse_label_line(&line).unwrap();
        assert_eq!(class_id, 2);
        assert!((parsed.x - 0.7).abs() < 1e-6);
        assert!((parsed.height - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_sub_precision_box_still_parses() {
        let bbox = BoundingBox::new(0.1, 0.1, 0.0000004, 0.2);
        let line = format_label_line(0, &bbox);
        let (_, parsed) = parse_label_line(&line).unwrap();
        assert!(parsed.width > 0.0);
        assert!((parsed.height - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_malformed_label_lines() {
        assert!(parse_label_line("").is_none());
        assert!(parse_label_line("x 0.5 0.5 0.1 0.1").is_none());
        assert!(parse_label_line("1 0.5 0.5 0.1").is_none());
        assert!(parse_label_line("1 0.5 0.5 0.1 0.1 0.9").is_none());
    }

    #[test]
    fn test_layout_paths() {
        let layout = DatasetLayout::new("/data");
        assert_eq!(layout.images_dir(DatasetSplit::Val), PathBuf::from("/data/images/val"));
        assert_eq!(layout.labels_dir(DatasetSplit::Train), PathBuf::from("/data/labels/train"));
        assert_eq!(layout.manifest_path(), PathBuf::from("/data/classes.json"));
    }

    #[tokio::test]
    async fn test_label_files_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DatasetLayout::new(dir.path().join("nope"));
        assert!(layout.label_files(DatasetSplit::Train).await.unwrap().is_empty());
    }
}
