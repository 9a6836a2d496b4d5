use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::{error, info};

use crate::Result;
use crate::error::Error;
use crate::writer::Writer;

/// Writes every batch into its own file under `out_dir`.
#[derive(Debug, Clone)]
pub struct FileWriter {
    out_dir: PathBuf,
}

impl FileWriter {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }
}

impl Writer for FileWriter {
    async fn write(&self, data: Bytes, name: &str) -> Result<String> {
        let path = self.out_dir.join(name);
        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| Error::Write(format!("Failed to write {}: {e}", path.display())))?;
        Ok(path.display().to_string())
    }

    /// Creates the directory when it does not exist yet.
    async fn verify_writable(&self) -> Result<bool> {
        match tokio::fs::metadata(&self.out_dir).await {
            Ok(meta) if !meta.is_dir() => {
                error!(out_dir = %self.out_dir.display(), "Output path is not a directory");
                Ok(false)
            }
            Ok(meta) if meta.permissions().readonly() => {
                error!(out_dir = %self.out_dir.display(), "Output directory is read-only");
                Ok(false)
            }
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                match tokio::fs::create_dir_all(&self.out_dir).await {
                    Ok(()) => {
                        info!(out_dir = %self.out_dir.display(), "Created output directory");
                        Ok(true)
                    }
                    Err(e) => {
                        error!(?e, out_dir = %self.out_dir.display(), "Failed to create output directory");
                        Ok(false)
                    }
                }
            }
            Err(e) => {
                error!(?e, out_dir = %self.out_dir.display(), "Output directory is not accessible");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn test_write_returns_full_path() {
        let tmp = TempDir::new().unwrap();
        let writer = FileWriter::new(tmp.path());

        let identifier = writer
            .write(Bytes::from("123\n456\n"), "1704164645")
            .await
            .unwrap();

        let path = tmp.path().join("1704164645");
        assert_eq!(identifier, path.display().to_string());
        assert_eq!(std::fs::read_to_string(path).unwrap(), "123\n456\n");
    }

    #[tokio::test]
    async fn test_write_into_missing_directory_fails() {
        let tmp = TempDir::new().unwrap();
        let writer = FileWriter::new(tmp.path().join("missing"));

        let result = writer.write(Bytes::from("123\n"), "batch").await;
        assert!(matches!(result, Err(Error::Write(_))));
    }

    #[tokio::test]
    async fn test_verify_creates_directory() {
        let tmp = TempDir::new().unwrap();
        let out_dir = tmp.path().join("nested").join("out");
        let writer = FileWriter::new(&out_dir);

        assert!(writer.verify_writable().await.unwrap());
        assert!(out_dir.is_dir());
        assert_eq!(writer.out_dir(), out_dir.as_path());
    }

    #[tokio::test]
    async fn test_verify_rejects_regular_file() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("not-a-dir");
        std::fs::write(&file, "x").unwrap();

        let writer = FileWriter::new(file);
        assert!(!writer.verify_writable().await.unwrap());
    }
}
