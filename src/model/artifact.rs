//! Model artifact on disk: safetensors weights plus a JSON class list.

use std::fs;
use std::path::{Path, PathBuf};

use candle_nn::VarMap;

use crate::config::ServiceConfig;
use crate::error::ModelError;

const CLASSES_FILE_NAME: &str = "classes.json";

/// Locations of the two files that make up a trained model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelArtifact {
    pub model_path: PathBuf,
    pub classes_path: PathBuf,
}

impl ModelArtifact {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(model_path: P, classes_path: Q) -> Self {
        Self {
            model_path: model_path.into(),
            classes_path: classes_path.into(),
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(&config.model_path, &config.classes_path)
    }

    /// Artifact whose class list sits next to the weights as `classes.json`
    pub fn beside_model<P: AsRef<Path>>(model_path: P) -> Self {
        let model_path = model_path.as_ref();
        let classes_path = model_path
            .parent()
            .map(|dir| dir.join(CLASSES_FILE_NAME))
            .unwrap_or_else(|| PathBuf::from(CLASSES_FILE_NAME));
        Self::new(model_path, classes_path)
    }

    /// `ModelError::NotFound` for the first missing file
    pub fn ensure_present(&self) -> Result<(), ModelError> {
        for path in [&self.model_path, &self.classes_path] {
            if !path.is_file() {
                return Err(ModelError::NotFound { path: path.clone() });
            }
        }
        Ok(())
    }

    /// Write weights and classes
    ///
    /// Each file is written beside its destination and renamed into place,
    /// so a reader never sees a half-written file.
    pub fn save(&self, varmap: &VarMap, classes: &[String]) -> Result<(), ModelError> {
        for path in [&self.model_path, &self.classes_path] {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
        }

        let weights_tmp = staging_path(&self.model_path);
        varmap.save(&weights_tmp)?;
        fs::rename(&weights_tmp, &self.model_path)?;

        let json = serde_json::to_string_pretty(classes).map_err(|err| ModelError::Io {
            details: err.to_string(),
        })?;
        let classes_tmp = staging_path(&self.classes_path);
        fs::write(&classes_tmp, json)?;
        fs::rename(&classes_tmp, &self.classes_path)?;

        log::info!(
            "[ModelArtifact] Saved model to {} and {} classes to {}",
            self.model_path.display(),
            classes.len(),
            self.classes_path.display()
        );
        Ok(())
    }

    pub fn load_classes(&self) -> Result<Vec<String>, ModelError> {
        if !self.classes_path.is_file() {
            return Err(ModelError::NotFound {
                path: self.classes_path.clone(),
            });
        }
        let text = fs::read_to_string(&self.classes_path)?;
        serde_json::from_str(&text).map_err(|err| ModelError::Io {
            details: format!(
                "malformed class mapping {}: {}",
                self.classes_path.display(),
                err
            ),
        })
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_beside_model() {
        let artifact = ModelArtifact::beside_model("models/us8k_cnn.safetensors");
        assert_eq!(artifact.classes_path, PathBuf::from("models/classes.json"));
    }

    #[test]
    fn test_missing_files_are_not_found() {
        let dir = TempDir::new().unwrap();
        let artifact = ModelArtifact::beside_model(dir.path().join("m.safetensors"));
        assert!(matches!(
            artifact.ensure_present(),
            Err(ModelError::NotFound { .. })
        ));
        assert!(matches!(
            artifact.load_classes(),
            Err(ModelError::NotFound { .. })
        ));
    }

    #[test]
    fn test_classes_written_as_json_array() {
        let dir = TempDir::new().unwrap();
        let artifact = ModelArtifact::beside_model(dir.path().join("nested/m.safetensors"));
        let classes = vec!["air_conditioner".to_string(), "siren".to_string()];

        artifact.save(&VarMap::new(), &classes).unwrap();

        let raw = fs::read_to_string(&artifact.classes_path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(parsed.is_array());
        assert_eq!(artifact.load_classes().unwrap(), classes);
        assert!(artifact.ensure_present().is_ok());
    }
}
