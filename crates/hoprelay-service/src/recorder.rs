//! Recorders persist facts about accepted connections.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("recorder closed")]
    Closed,
}

#[async_trait]
pub trait Recorder: Send + Sync {
    async fn record(&self, payload: &[u8]) -> Result<(), RecorderError>;
}

/// What a service hands to a recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// The client host, without port.
    ClientAddress,
}

impl FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client-address" | "client_address" => Ok(RecordKind::ClientAddress),
            other => Err(other.to_string()),
        }
    }
}

/// A recorder attached to a service together with what it records.
#[derive(Clone)]
pub struct RecorderObject {
    pub name: String,
    pub kind: RecordKind,
    pub recorder: Arc<dyn Recorder>,
}

/// Appends every payload to a file, followed by a separator.
pub struct FileRecorder {
    path: PathBuf,
    separator: Vec<u8>,
    file: Mutex<Option<tokio::fs::File>>,
}

impl FileRecorder {
    pub fn new(path: impl Into<PathBuf>, separator: &str) -> Self {
        Self {
            path: path.into(),
            separator: separator.as_bytes().to_vec(),
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl Recorder for FileRecorder {
    async fn record(&self, payload: &[u8]) -> Result<(), RecorderError> {
        let mut entry = Vec::with_capacity(payload.len() + self.separator.len());
        entry.extend_from_slice(payload);
        entry.extend_from_slice(&self.separator);

        let mut file = self.file.lock().await;
        if file.is_none() {
            let opened = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            *file = Some(opened);
        }
        let Some(f) = file.as_mut() else {
            return Err(RecorderError::Closed);
        };
        let written = match f.write_all(&entry).await {
            Ok(()) => f.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            // Reopen on the next record.
            *file = None;
            return Err(e.into());
        }
        Ok(())
    }
}
