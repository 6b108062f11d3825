//! Dataset organization.
//!
//! Two sourcing modes produce the same record list:
//! - directory mode: `<root>/<class>/<clip>.wav`
//! - metadata mode: a table of `(file, fold, class)` rows resolved to
//!   `<audio root>/fold<k>/<file>` and partitioned into train/test by fold
//!
//! Missing clips are logged and skipped; only a missing root or table fails.

pub mod acquire;
pub mod metadata;

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::DatasetError;

pub use metadata::{MetadataRow, LAST_TRAIN_FOLD, MAX_FOLD};

/// File extensions treated as audio in directory mode
pub const AUDIO_EXTENSIONS: &[&str] = &["wav", "flac", "mp3", "ogg"];

/// One labeled clip
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub path: PathBuf,
    pub label: String,
    /// Fold number in metadata mode; `None` in directory mode
    pub fold: Option<u8>,
}

/// Train/test partition of a dataset
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetSplit {
    pub train: Vec<DatasetRecord>,
    pub test: Vec<DatasetRecord>,
}

impl DatasetSplit {
    /// Both partitions, train first
    pub fn all(&self) -> Vec<DatasetRecord> {
        self.train.iter().chain(self.test.iter()).cloned().collect()
    }
}

/// Which part of a split to work on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitSelection {
    All,
    Train,
    Test,
}

impl SplitSelection {
    pub fn select(self, split: &DatasetSplit) -> Vec<DatasetRecord> {
        match self {
            SplitSelection::All => split.all(),
            SplitSelection::Train => split.train.clone(),
            SplitSelection::Test => split.test.clone(),
        }
    }
}

/// Split parallel path/label lists out of records
pub fn paths_and_labels(records: &[DatasetRecord]) -> (Vec<PathBuf>, Vec<String>) {
    records
        .iter()
        .map(|record| (record.path.clone(), record.label.clone()))
        .unzip()
}

/// Sorted unique class names; a label's index is its position in this list
pub fn class_names<'a, I>(labels: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    labels
        .into_iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn is_audio_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| AUDIO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
}

/// Walks labeled audio trees and metadata tables
pub struct DatasetOrganizer;

impl DatasetOrganizer {
    /// Directory mode: each immediate subdirectory of `root` is a class
    ///
    /// Class directories are visited in sorted-name order, and files within
    /// a class are sorted by path so repeated runs yield identical lists.
    ///
    /// # Errors
    /// `DatasetError::NotFound` if `root` is not a directory.
    pub fn from_directory<P: AsRef<Path>>(root: P) -> Result<Vec<DatasetRecord>, DatasetError> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(DatasetError::not_found(root));
        }

        let mut class_dirs: Vec<PathBuf> = fs::read_dir(root)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_dir())
            .collect();
        class_dirs.sort();

        let mut records = Vec::new();
        for class_dir in class_dirs {
            let Some(label) = class_dir.file_name().and_then(|n| n.to_str()) else {
                log::warn!("[Dataset] Skipping non UTF-8 class directory {:?}", class_dir);
                continue;
            };

            let mut files: Vec<PathBuf> = fs::read_dir(&class_dir)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| is_audio_file(path))
                .collect();
            files.sort();

            records.extend(files.into_iter().map(|path| DatasetRecord {
                path,
                label: label.to_string(),
                fold: None,
            }));
        }

        log::info!(
            "[Dataset] Found {} files across {} classes under {}",
            records.len(),
            class_names(records.iter().map(|r| r.label.as_str())).len(),
            root.display()
        );
        Ok(records)
    }

    /// Metadata mode: read the table under `root` and resolve each clip
    ///
    /// Rows whose audio file is missing are logged and skipped. Folds up to
    /// `LAST_TRAIN_FOLD` go to `train`, the rest to `test`.
    ///
    /// # Errors
    /// `DatasetError::NotFound` if `root` or its metadata table is absent.
    pub fn from_metadata<P: AsRef<Path>>(root: P) -> Result<DatasetSplit, DatasetError> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(DatasetError::not_found(root));
        }

        let table_path = metadata::locate_table(root)?;
        let text = fs::read_to_string(&table_path)?;
        let rows = metadata::parse_table(&text)?;
        let audio_root = metadata::audio_root(root);

        let mut split = DatasetSplit::default();
        let mut missing = 0usize;
        for row in rows {
            let path = audio_root
                .join(format!("fold{}", row.fold))
                .join(&row.file_name);
            if !path.is_file() {
                log::warn!("[Dataset] Missing file: {}", path.display());
                missing += 1;
                continue;
            }

            let record = DatasetRecord {
                path,
                label: row.class,
                fold: Some(row.fold),
            };
            if row.fold <= LAST_TRAIN_FOLD {
                split.train.push(record);
            } else {
                split.test.push(record);
            }
        }

        log::info!(
            "[Dataset] Metadata {}: {} train, {} test, {} missing",
            table_path.display(),
            split.train.len(),
            split.test.len(),
            missing
        );
        Ok(split)
    }

    /// Copy a split into `<out>/<class>/<file>` trees for directory mode
    ///
    /// # Returns
    /// Number of files copied into `(train_out, test_out)`
    pub fn organize_split(
        split: &DatasetSplit,
        train_out: &Path,
        test_out: &Path,
    ) -> Result<(usize, usize), DatasetError> {
        let train = Self::copy_records(&split.train, train_out)?;
        let test = Self::copy_records(&split.test, test_out)?;
        log::info!(
            "[Dataset] Organized {} train files into {} and {} test files into {}",
            train,
            train_out.display(),
            test,
            test_out.display()
        );
        Ok((train, test))
    }

    fn copy_records(records: &[DatasetRecord], out: &Path) -> Result<usize, DatasetError> {
        fs::create_dir_all(out)?;
        let mut copied = 0;
        for record in records {
            let Some(file_name) = record.path.file_name() else {
                continue;
            };
            let class_dir = out.join(&record.label);
            fs::create_dir_all(&class_dir)?;
            match fs::copy(&record.path, class_dir.join(file_name)) {
                Ok(_) => copied += 1,
                Err(err) => log::warn!(
                    "[Dataset] Failed to copy {}: {}",
                    record.path.display(),
                    err
                ),
            }
        }
        Ok(copied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::write_tone;
    use tempfile::TempDir;

    fn write_table(root: &Path, body: &str) {
        let meta = root.join("metadata");
        fs::create_dir_all(&meta).unwrap();
        fs::write(
            meta.join("UrbanSound8K.csv"),
            format!("slice_file_name,fsID,start,end,salience,fold,classID,class\n{body}"),
        )
        .unwrap();
    }

    #[test]
    fn test_directory_mode_counts_labels() {
        let dir = TempDir::new().unwrap();
        for i in 0..3 {
            write_tone(&dir.path().join("A").join(format!("a{i}.wav")), 8_000, 440.0, 400);
        }
        for i in 0..5 {
            write_tone(&dir.path().join("B").join(format!("b{i}.wav")), 8_000, 880.0, 400);
        }
        fs::write(dir.path().join("B").join("notes.txt"), "ignored").unwrap();

        let records = DatasetOrganizer::from_directory(dir.path()).unwrap();
        let (paths, labels) = paths_and_labels(&records);

        assert_eq!(paths.len(), labels.len());
        assert_eq!(labels.iter().filter(|l| *l == "A").count(), 3);
        assert_eq!(labels.iter().filter(|l| *l == "B").count(), 5);
        // classes visited in sorted order
        assert_eq!(labels.first().map(String::as_str), Some("A"));
        assert!(records.iter().all(|r| r.fold.is_none()));
    }

    #[test]
    fn test_directory_mode_missing_root() {
        let result = DatasetOrganizer::from_directory("/nonexistent/us8k/train");
        assert!(matches!(result, Err(DatasetError::NotFound { .. })));
    }

    #[test]
    fn test_metadata_mode_partitions_by_fold_and_skips_missing() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write_table(
            root,
            "a.wav,1,0,1,1,1,3,dog_bark\n\
             b.wav,1,0,1,1,8,8,siren\n\
             c.wav,1,0,1,1,9,3,dog_bark\n\
             d.wav,1,0,1,1,10,8,siren\n\
             gone.wav,1,0,1,1,2,8,siren\n",
        );
        write_tone(&root.join("audio/fold1/a.wav"), 8_000, 300.0, 200);
        write_tone(&root.join("audio/fold8/b.wav"), 8_000, 300.0, 200);
        write_tone(&root.join("audio/fold9/c.wav"), 8_000, 300.0, 200);
        write_tone(&root.join("audio/fold10/d.wav"), 8_000, 300.0, 200);

        let split = DatasetOrganizer::from_metadata(root).unwrap();
        assert_eq!(split.train.len(), 2);
        assert_eq!(split.test.len(), 2);
        assert!(split.train.iter().all(|r| r.fold.unwrap() <= 8));
        assert!(split.test.iter().all(|r| r.fold.unwrap() >= 9));
        assert_eq!(split.all().len(), 4);
    }

    #[test]
    fn test_metadata_mode_flat_layout() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::write(
            root.join("UrbanSound8K.csv"),
            "slice_file_name,fold,class\nx.wav,3,drilling\n",
        )
        .unwrap();
        write_tone(&root.join("fold3/x.wav"), 8_000, 300.0, 200);

        let split = DatasetOrganizer::from_metadata(root).unwrap();
        assert_eq!(split.train.len(), 1);
        assert_eq!(split.train[0].label, "drilling");
    }

    #[test]
    fn test_metadata_mode_missing_table() {
        let dir = TempDir::new().unwrap();
        let result = DatasetOrganizer::from_metadata(dir.path());
        assert!(matches!(result, Err(DatasetError::NotFound { .. })));
    }

    #[test]
    fn test_organize_split_copies_into_class_dirs() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        write_table(
            src.path(),
            "a.wav,1,0,1,1,1,3,dog_bark\nc.wav,1,0,1,1,9,8,siren\n",
        );
        write_tone(&src.path().join("audio/fold1/a.wav"), 8_000, 300.0, 200);
        write_tone(&src.path().join("audio/fold9/c.wav"), 8_000, 300.0, 200);

        let split = DatasetOrganizer::from_metadata(src.path()).unwrap();
        let train_out = out.path().join("train");
        let test_out = out.path().join("test");
        let counts = DatasetOrganizer::organize_split(&split, &train_out, &test_out).unwrap();

        assert_eq!(counts, (1, 1));
        assert!(train_out.join("dog_bark/a.wav").is_file());
        assert!(test_out.join("siren/c.wav").is_file());

        let organized = DatasetOrganizer::from_directory(&train_out).unwrap();
        assert_eq!(organized.len(), 1);
        assert_eq!(organized[0].label, "dog_bark");
    }

    #[test]
    fn test_class_names_sorted_unique() {
        let names = class_names(["siren", "dog_bark", "siren", "car_horn"]);
        assert_eq!(names, vec!["car_horn", "dog_bark", "siren"]);
    }
}
