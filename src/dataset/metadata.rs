//! Metadata table parsing.
//!
//! The table is a CSV file with a header row. Only `slice_file_name`, `fold`
//! and `class` are read; any other column is ignored. Rows with an unusable
//! fold are skipped with a warning instead of failing the whole table.

use std::path::{Path, PathBuf};

use crate::error::DatasetError;

/// Highest fold number in the table
pub const MAX_FOLD: u8 = 10;
/// Folds up to and including this one belong to the training split
pub const LAST_TRAIN_FOLD: u8 = 8;

const FILE_COLUMN: &str = "slice_file_name";
const FOLD_COLUMN: &str = "fold";
const CLASS_COLUMN: &str = "class";

/// One usable row of the metadata table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataRow {
    pub file_name: String,
    pub fold: u8,
    pub class: String,
}

/// Find the metadata table under a dataset root
///
/// Looks at `<root>/metadata/UrbanSound8K.csv`, then `<root>/UrbanSound8K.csv`.
pub fn locate_table(root: &Path) -> Result<PathBuf, DatasetError> {
    let candidates = [
        root.join("metadata").join("UrbanSound8K.csv"),
        root.join("UrbanSound8K.csv"),
    ];
    candidates
        .iter()
        .find(|path| path.is_file())
        .cloned()
        .ok_or_else(|| DatasetError::not_found(&candidates[0]))
}

/// Directory holding the `fold<k>` folders: `<root>/audio` when present
pub fn audio_root(root: &Path) -> PathBuf {
    let nested = root.join("audio");
    if nested.is_dir() {
        nested
    } else {
        root.to_path_buf()
    }
}

/// Parse the table text into rows
///
/// # Errors
/// `DatasetError::Format` if the header lacks a required column.
pub fn parse_table(text: &str) -> Result<Vec<MetadataRow>, DatasetError> {
    let mut lines = text.lines().filter(|line| !line.trim().is_empty());
    let header = lines
        .next()
        .ok_or_else(|| DatasetError::format("metadata table is empty"))?;
    let columns = split_fields(header);

    let column = |name: &str| {
        columns
            .iter()
            .position(|c| c.trim() == name)
            .ok_or_else(|| DatasetError::format(format!("missing column '{}'", name)))
    };
    let file_idx = column(FILE_COLUMN)?;
    let fold_idx = column(FOLD_COLUMN)?;
    let class_idx = column(CLASS_COLUMN)?;

    let mut rows = Vec::new();
    for (line_no, line) in lines.enumerate() {
        let fields = split_fields(line);
        let field = |idx: usize| fields.get(idx).map(|f| f.trim()).unwrap_or("");

        let file_name = field(file_idx);
        let class = field(class_idx);
        let fold = match parse_fold(field(fold_idx)) {
            Some(fold) => fold,
            None => {
                log::warn!(
                    "[Metadata] Skipping row {}: invalid fold '{}'",
                    line_no + 2,
                    field(fold_idx)
                );
                continue;
            }
        };
        if file_name.is_empty() || class.is_empty() {
            log::warn!("[Metadata] Skipping row {}: empty file or class", line_no + 2);
            continue;
        }

        rows.push(MetadataRow {
            file_name: file_name.to_string(),
            fold,
            class: class.to_string(),
        });
    }

    Ok(rows)
}

/// Folds are written as integers, occasionally as floats (`"3.0"`)
fn parse_fold(raw: &str) -> Option<u8> {
    let value: f64 = raw.parse().ok()?;
    if value.fract() != 0.0 || value < 1.0 || value > MAX_FOLD as f64 {
        return None;
    }
    Some(value as u8)
}

/// Split one CSV line, honoring double-quoted fields
fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    fields.push(current);
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
slice_file_name,fsID,start,end,salience,fold,classID,class
100032-3-0-0.wav,100032,0.0,0.317551,1,5,3,dog_bark
100263-2-0-117.wav,100263,58.5,62.5,1,5,2,children_playing
\"odd,name.wav\",1,0,1,1,10,8,siren
bad-fold.wav,1,0,1,1,,8,siren
out-of-range.wav,1,0,1,1,11,8,siren
";

    #[test]
    fn test_parse_table_reads_required_columns() {
        let rows = parse_table(TABLE).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(
            rows[0],
            MetadataRow {
                file_name: "100032-3-0-0.wav".into(),
                fold: 5,
                class: "dog_bark".into(),
            }
        );
        assert_eq!(rows[2].file_name, "odd,name.wav");
        assert_eq!(rows[2].fold, 10);
    }

    #[test]
    fn test_missing_column_is_format_error() {
        let result = parse_table("slice_file_name,fold\nx.wav,1\n");
        assert!(matches!(result, Err(DatasetError::Format { .. })));
    }

    #[test]
    fn test_parse_fold_accepts_float_notation() {
        assert_eq!(parse_fold("3.0"), Some(3));
        assert_eq!(parse_fold("0"), None);
        assert_eq!(parse_fold("2.5"), None);
        assert_eq!(parse_fold("nan"), None);
    }
}
