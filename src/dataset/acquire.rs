//! Dataset acquisition: download, unpack and organize the raw archive.

use std::fs;
use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::error::DatasetError;

use super::DatasetOrganizer;

/// Public archive of the UrbanSound8K release
pub const DEFAULT_ARCHIVE_URL: &str =
    "https://zenodo.org/record/1203745/files/UrbanSound8K.tar.gz?download=1";

const DATASET_DIR_NAME: &str = "UrbanSound8K";
const PROGRESS_STEP_BYTES: u64 = 50 * 1024 * 1024;

/// Locations produced by [`prepare_dataset`]
#[derive(Debug, Clone)]
pub struct PreparedDataset {
    pub raw_dir: PathBuf,
    pub train_dir: PathBuf,
    pub test_dir: PathBuf,
    pub train_files: usize,
    pub test_files: usize,
}

/// Stream `url` into `dest`, creating parent directories
pub async fn download_archive(url: &str, dest: &Path) -> Result<u64, DatasetError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    let download_err = |err: reqwest::Error| DatasetError::Download {
        reason: err.to_string(),
    };

    let response = reqwest::get(url)
        .await
        .map_err(download_err)?
        .error_for_status()
        .map_err(download_err)?;
    let total = response.content_length();
    log::info!(
        "[Acquire] Downloading {} ({} bytes) to {}",
        url,
        total.map(|t| t.to_string()).unwrap_or_else(|| "unknown".into()),
        dest.display()
    );

    let mut file = tokio::fs::File::create(dest).await?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;
    let mut next_report = PROGRESS_STEP_BYTES;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(download_err)?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
        if written >= next_report {
            log::info!("[Acquire] {} MiB downloaded", written / (1024 * 1024));
            next_report += PROGRESS_STEP_BYTES;
        }
    }
    file.flush().await?;

    Ok(written)
}

/// Unpack a `.tar.gz` archive into `dest_dir`
pub fn extract_archive(archive: &Path, dest_dir: &Path) -> Result<(), DatasetError> {
    if !archive.is_file() {
        return Err(DatasetError::not_found(archive));
    }
    fs::create_dir_all(dest_dir)?;

    let file = fs::File::open(archive)?;
    let mut tar = tar::Archive::new(flate2::read::GzDecoder::new(file));
    tar.unpack(dest_dir)?;
    Ok(())
}

/// Make sure the raw dataset exists under `<work>/data/raw`, then organize
/// it into `<work>/data/train` and `<work>/data/test` class folders.
///
/// An existing raw directory skips the download. When the download fails,
/// manual instructions are logged and `DatasetError::Download` is returned.
pub async fn prepare_dataset(work_dir: &Path, url: &str) -> Result<PreparedDataset, DatasetError> {
    let raw_parent = work_dir.join("data").join("raw");
    let raw_dir = raw_parent.join(DATASET_DIR_NAME);
    let archive = raw_parent.join(format!("{DATASET_DIR_NAME}.tar.gz"));

    if raw_dir.is_dir() {
        log::info!("[Acquire] Dataset already present at {}", raw_dir.display());
    } else {
        if let Err(err) = download_archive(url, &archive).await {
            log::error!("[Acquire] Automatic download failed: {}", err);
            log::error!(
                "[Acquire] Download the archive manually from https://zenodo.org/record/1203745 and extract it to {}",
                raw_dir.display()
            );
            return Err(err);
        }

        log::info!("[Acquire] Download complete, extracting...");
        let (archive_path, dest) = (archive.clone(), raw_parent.clone());
        tokio::task::spawn_blocking(move || extract_archive(&archive_path, &dest))
            .await
            .map_err(|err| DatasetError::Io {
                details: err.to_string(),
            })??;

        if let Err(err) = fs::remove_file(&archive) {
            log::warn!("[Acquire] Could not remove {}: {}", archive.display(), err);
        }
    }

    let train_dir = work_dir.join("data").join("train");
    let test_dir = work_dir.join("data").join("test");
    let split = DatasetOrganizer::from_metadata(&raw_dir)?;
    let (train_files, test_files) = DatasetOrganizer::organize_split(&split, &train_dir, &test_dir)?;

    Ok(PreparedDataset {
        raw_dir,
        train_dir,
        test_dir,
        train_files,
        test_files,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn build_archive(dir: &Path) -> PathBuf {
        let archive_path = dir.join("bundle.tar.gz");
        let file = fs::File::create(&archive_path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::fast());
        let mut builder = tar::Builder::new(encoder);

        let body = b"slice_file_name,fold,class\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "UrbanSound8K/metadata/UrbanSound8K.csv", &body[..])
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();
        archive_path
    }

    #[test]
    fn test_extract_archive_unpacks_entries() {
        let dir = TempDir::new().unwrap();
        let archive = build_archive(dir.path());
        let dest = dir.path().join("raw");

        extract_archive(&archive, &dest).unwrap();
        let table = dest.join("UrbanSound8K/metadata/UrbanSound8K.csv");
        assert!(table.is_file());
    }

    #[test]
    fn test_extract_missing_archive() {
        let dir = TempDir::new().unwrap();
        let result = extract_archive(&dir.path().join("nope.tar.gz"), dir.path());
        assert!(matches!(result, Err(DatasetError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_prepare_skips_download_when_present() {
        let dir = TempDir::new().unwrap();
        let raw = dir.path().join("data/raw/UrbanSound8K");
        fs::create_dir_all(raw.join("metadata")).unwrap();
        fs::write(
            raw.join("metadata/UrbanSound8K.csv"),
            "slice_file_name,fold,class\na.wav,1,siren\n",
        )
        .unwrap();
        crate::testing::write_tone(&raw.join("audio/fold1/a.wav"), 8_000, 500.0, 200);

        // unreachable URL: must not be contacted
        let prepared = prepare_dataset(dir.path(), "http://127.0.0.1:9/none.tar.gz")
            .await
            .unwrap();
        assert_eq!(prepared.train_files, 1);
        assert_eq!(prepared.test_files, 0);
        assert!(prepared.train_dir.join("siren/a.wav").is_file());
    }
}
