//! Persisted class-name to class-id mapping.
//!
//! Ids are assigned once and never renumbered, so label files written before a
//! restart keep their meaning afterwards.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sscan_models::CanonicalLabel;
use tracing::info;

use crate::error::{TrainingError, TrainingResult};
use crate::layout::write_atomic;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct ManifestFile {
    classes: BTreeMap<String, u32>,
}

/// Class index manifest backed by `classes.json`.
#[derive(Debug, Clone)]
pub struct ClassManifest {
    path: PathBuf,
    classes: BTreeMap<String, u32>,
}

impl ClassManifest {
    /// Load the manifest at `path`, creating or extending it so every label in
    /// `vocabulary` has an id. Writes the file back only when it changed.
    pub async fn load_or_create(path: impl Into<PathBuf>, vocabulary: &[CanonicalLabel]) -> TrainingResult<Self> {
        let path = path.into();
        let (classes, existed) = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let file: ManifestFile = serde_json::from_slice(&bytes)
                    .map_err(|e| TrainingError::manifest(&path, e.to_string()))?;
                (file.classes, true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (BTreeMap::new(), false),
            Err(e) => return Err(e.into()),
        };

        let mut manifest = Self { path, classes };
        manifest.validate()?;

        let mut changed = !existed;
        for label in vocabulary {
            changed |= manifest.ensure(*label);
        }
        if changed {
            manifest.save().await?;
            info!(
                path = %manifest.path.display(),
                classes = manifest.classes.len(),
                "Class manifest written"
            );
        }
        Ok(manifest)
    }

    /// Assign an id to `label` if it has none. Returns true when a new id was added.
    ///
    /// Prefers the label's default id; falls back to the next free id.
    pub fn ensure(&mut self, label: CanonicalLabel) -> bool {
        if self.classes.contains_key(label.as_str()) {
            return false;
        }
        let preferred = label.default_class_id();
        let id = if self.classes.values().any(|v| *v == preferred) {
            self.classes.values().max().map_or(0, |m| m + 1)
        } else {
            preferred
        };
        self.classes.insert(label.as_str().to_string(), id);
        true
    }

    pub fn id_for(&self, label: CanonicalLabel) -> Option<u32> {
        self.classes.get(label.as_str()).copied()
    }

    pub fn label_for(&self, id: u32) -> Option<CanonicalLabel> {
        self.classes
            .iter()
            .find(|(_, v)| **v == id)
            .and_then(|(name, _)| name.parse().ok())
    }

    /// `(id, name)` pairs ordered by id.
    pub fn names_by_id(&self) -> Vec<(u32, String)> {
        let mut names: Vec<(u32, String)> = self
            .classes
            .iter()
            .map(|(name, id)| (*id, name.clone()))
            .collect();
        names.sort();
        names
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn save(&self) -> TrainingResult<()> {
        let file = ManifestFile {
            classes: self.classes.clone(),
        };
        let json = serde_json::to_vec_pretty(&file)?;
        write_atomic(&self.path, &json).await
    }

    fn validate(&self) -> TrainingResult<()> {
        let mut seen = std::collections::HashSet::new();
        for (name, id) in &self.classes {
            if !seen.insert(*id) {
                return Err(TrainingError::manifest(
                    &self.path,
                    format!("duplicate class id {} for '{}'", id, name),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_manifest_uses_default_ids() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = ClassManifest::load_or_create(dir.path().join("classes.json"), CanonicalLabel::ALL)
            .await
            .unwrap();

        assert_eq!(manifest.id_for(CanonicalLabel::Toolbox), Some(0));
        assert_eq!(manifest.id_for(CanonicalLabel::OxygenTank), Some(1));
        assert_eq!(manifest.id_for(CanonicalLabel::FireExtinguisher), Some(2));
        assert_eq!(manifest.label_for(3), Some(CanonicalLabel::Astronaut));
        assert!(dir.path().join("classes.json").exists());
    }

    #[tokio::test]
    async fn test_ids_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classes.json");

        // An older deployment that only knew fire extinguishers, numbered 0.
        tokio::fs::write(&path, r#"{"classes":{"fire extinguisher":0}}"#)
            .await
            .unwrap();

        let manifest = ClassManifest::load_or_create(&path, CanonicalLabel::ALL).await.unwrap();
        assert_eq!(manifest.id_for(CanonicalLabel::FireExtinguisher), Some(0));
        // Toolbox's preferred id 0 is taken, so it gets the next free one.
        assert_ne!(manifest.id_for(CanonicalLabel::Toolbox), Some(0));

        let reloaded = ClassManifest::load_or_create(&path, CanonicalLabel::ALL).await.unwrap();
        assert_eq!(reloaded.names_by_id(), manifest.names_by_id());
    }

    #[tokio::test]
    async fn test_duplicate_ids_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classes.json");
        tokio::fs::write(&path, r#"{"classes":{"toolbox":0,"oxygen tank":0}}"#)
            .await
            .unwrap();

        let err = ClassManifest::load_or_create(&path, CanonicalLabel::ALL).await.unwrap_err();
        assert!(matches!(err, TrainingError::Manifest { .. }));
    }
}
