use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use std::path::PathBuf;
use thiserror::Error;
use tracing::info;
use wfrec_common::protocol::{ExportArtifact, Step};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Failed to write export: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to serialize workflow: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Hands a finished artifact to the user.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download(&self, filename: &str, contents: &[u8]) -> Result<PathBuf, ExportError>;
}

/// Saves downloads into a directory, like a browser's download folder.
pub struct DirectoryDownloader {
    directory: PathBuf,
}

impl DirectoryDownloader {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }
}

#[async_trait]
impl Downloader for DirectoryDownloader {
    async fn download(&self, filename: &str, contents: &[u8]) -> Result<PathBuf, ExportError> {
        tokio::fs::create_dir_all(&self.directory).await?;
        let path = self.directory.join(filename);
        tokio::fs::write(&path, contents).await?;
        Ok(path)
    }
}

pub struct Exporter {
    downloader: Box<dyn Downloader>,
    filename_prefix: String,
    timestamp_suffix: bool,
}

impl Exporter {
    pub fn new(
        downloader: Box<dyn Downloader>,
        filename_prefix: impl Into<String>,
        timestamp_suffix: bool,
    ) -> Self {
        Self {
            downloader,
            filename_prefix: filename_prefix.into(),
            timestamp_suffix,
        }
    }

    /// `<prefix>-2024-05-01T10-00-00-000Z.json`, or `<prefix>.json` without a suffix.
    pub fn filename(&self, now: DateTime<Utc>) -> String {
        if !self.timestamp_suffix {
            return format!("{}.json", self.filename_prefix);
        }
        let stamp = now
            .to_rfc3339_opts(SecondsFormat::Millis, true)
            .replace([':', '.'], "-");
        format!("{}-{}.json", self.filename_prefix, stamp)
    }

    /// Writes the workflow artifact. An empty log produces nothing.
    pub async fn export(&self, steps: Vec<Step>) -> Result<Option<PathBuf>, ExportError> {
        if steps.is_empty() {
            info!("No steps were recorded.");
            return Ok(None);
        }
        let count = steps.len();
        let json = render(&ExportArtifact { workflow: steps })?;
        let filename = self.filename(Utc::now());
        let path = self.downloader.download(&filename, json.as_bytes()).await?;
        info!(steps = count, path = %path.display(), "Workflow exported");
        Ok(Some(path))
    }
}

/// Pretty-printed JSON with two-space indentation.
pub fn render(artifact: &ExportArtifact) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(artifact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;
    use wfrec_common::protocol::StepKind;

    fn exporter(dir: &TempDir, timestamp_suffix: bool) -> Exporter {
        Exporter::new(
            Box::new(DirectoryDownloader::new(dir.path())),
            "workflow-recording",
            timestamp_suffix,
        )
    }

    #[test]
    fn filename_replaces_colons_and_dots() {
        let dir = TempDir::new().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        assert_eq!(
            exporter(&dir, true).filename(now),
            "workflow-recording-2024-05-01T10-00-00-000Z.json"
        );
        assert_eq!(exporter(&dir, false).filename(now), "workflow-recording.json");
    }

    #[tokio::test]
    async fn empty_log_writes_nothing() {
        let dir = TempDir::new().unwrap();
        assert_eq!(exporter(&dir, true).export(vec![]).await.unwrap(), None);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn writes_pretty_workflow_document() {
        let dir = TempDir::new().unwrap();
        let steps = vec![Step {
            step: 1,
            document_step: 1,
            timestamp: "2024-05-01T10:00:00.000Z".into(),
            url: "https://example.com/".into(),
            kind: StepKind::PageLoad {
                title: "Example".into(),
            },
        }];

        let path = exporter(&dir, true)
            .export(steps.clone())
            .await
            .unwrap()
            .unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.starts_with("{\n  \"workflow\": [\n    {\n      \"step\": 1,"));

        let artifact: ExportArtifact = serde_json::from_str(&content).unwrap();
        assert_eq!(artifact.workflow, steps);
    }
}
