use chrono::{DateTime, Utc};
use std::path::Path;
use thiserror::Error;
use tokio::fs;
use tracing::debug;

#[derive(Error, Debug)]
pub enum TimestampError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Read the previous successful run from the timestamp file.
///
/// A missing file, an empty file or an unparsable first line all mean
/// "never run", so every local file counts as modified.
pub async fn read_last_run(path: &Path) -> Option<DateTime<Utc>> {
    let content = fs::read_to_string(path).await.ok()?;
    let line = content.lines().next()?.trim();

    match DateTime::parse_from_rfc3339(line) {
        Ok(value) => Some(value.with_timezone(&Utc)),
        Err(e) => {
            debug!(file = %path.display(), error = %e, "Ignoring unparsable timestamp");
            None
        }
    }
}

/// Record a successful run as a single line in the timestamp file
pub async fn write_last_run(path: &Path, at: DateTime<Utc>) -> Result<(), TimestampError> {
    fs::write(path, format!("{}\n", at.to_rfc3339())).await?;
    Ok(())
}

/// Whether a local file was modified after the given run.
///
/// Compares file-system modification times only. Files whose metadata cannot
/// be read count as modified so the upload surfaces the real error.
pub async fn modified_since(path: &Path, last_run: Option<DateTime<Utc>>) -> bool {
    let Some(last_run) = last_run else {
        return true;
    };

    match fs::metadata(path).await.and_then(|m| m.modified()) {
        Ok(modified) => DateTime::<Utc>::from(modified) > last_run,
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_means_never_run() {
        let temp = TempDir::new().unwrap();
        assert!(read_last_run(&temp.path().join("lastrun.log")).await.is_none());
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("lastrun.log");
        let now = Utc::now();

        write_last_run(&path, now).await.unwrap();
        let read = read_last_run(&path).await.unwrap();

        assert_eq!(read.timestamp(), now.timestamp());
    }

    #[tokio::test]
    async fn test_garbage_is_ignored() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("lastrun.log");
        fs::write(&path, "yesterday-ish\n").await.unwrap();

        assert!(read_last_run(&path).await.is_none());
    }

    #[tokio::test]
    async fn test_modified_since() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("site.css");
        fs::write(&path, "body {}").await.unwrap();

        assert!(modified_since(&path, None).await);
        assert!(modified_since(&path, Some(Utc::now() - Duration::hours(1))).await);
        assert!(!modified_since(&path, Some(Utc::now() + Duration::hours(1))).await);
    }
}
