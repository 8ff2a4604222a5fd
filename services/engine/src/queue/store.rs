//! services/engine/src/queue/store.rs
//!
//! Durable storage for the offline request queue: one JSON document holding
//! every request, rewritten in full after each mutation. The wire shape is
//! fixed (camelCase keys, ISO-8601 timestamps) so snapshots stay readable
//! across versions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use storyloom_core::domain::{OfflineRequest, RequestStatus, RequestType};
use tracing::warn;

use crate::error::EngineError;

//=========================================================================================
// Wire Records
//=========================================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StoredRequestType {
    GenerateStory,
    SyncJournalEntry,
    ExportData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StoredRequestStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// One queue slot as persisted on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub request_type: StoredRequestType,
    pub data: BTreeMap<String, String>,
    pub creation_date: DateTime<Utc>,
    pub attempt_count: u32,
    pub status: StoredRequestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl From<&OfflineRequest> for StoredRequest {
    fn from(request: &OfflineRequest) -> Self {
        Self {
            id: request.id.clone(),
            request_type: match request.request_type {
                RequestType::GenerateStory => StoredRequestType::GenerateStory,
                RequestType::SyncJournalEntry => StoredRequestType::SyncJournalEntry,
                RequestType::ExportData => StoredRequestType::ExportData,
            },
            data: request.data.clone(),
            creation_date: request.created_at,
            attempt_count: request.attempt_count,
            status: match request.status {
                RequestStatus::Pending => StoredRequestStatus::Pending,
                RequestStatus::InProgress => StoredRequestStatus::InProgress,
                RequestStatus::Completed => StoredRequestStatus::Completed,
                RequestStatus::Failed => StoredRequestStatus::Failed,
            },
            error_message: request.last_error.clone(),
        }
    }
}

impl From<StoredRequest> for OfflineRequest {
    fn from(stored: StoredRequest) -> Self {
        Self {
            id: stored.id,
            request_type: match stored.request_type {
                StoredRequestType::GenerateStory => RequestType::GenerateStory,
                StoredRequestType::SyncJournalEntry => RequestType::SyncJournalEntry,
                StoredRequestType::ExportData => RequestType::ExportData,
            },
            data: stored.data,
            created_at: stored.creation_date,
            attempt_count: stored.attempt_count,
            status: match stored.status {
                StoredRequestStatus::Pending => RequestStatus::Pending,
                StoredRequestStatus::InProgress => RequestStatus::InProgress,
                StoredRequestStatus::Completed => RequestStatus::Completed,
                StoredRequestStatus::Failed => RequestStatus::Failed,
            },
            last_error: stored.error_message,
        }
    }
}

//=========================================================================================
// QueueStore
//=========================================================================================

/// Owns the queue's snapshot file. Callers serialize access through the
/// queue's state lock, so there is a single writer at any time.
#[derive(Debug, Clone)]
pub struct QueueStore {
    path: PathBuf,
}

impl QueueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the persisted queue. A missing or corrupt file yields an empty
    /// queue: snapshot corruption is data loss, never a fatal error.
    pub async fn load(&self) -> Vec<OfflineRequest> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read queue snapshot, starting empty");
                return Vec::new();
            }
        };
        match serde_json::from_slice::<Vec<StoredRequest>>(&raw) {
            Ok(stored) => {
                let mut requests: Vec<OfflineRequest> =
                    stored.into_iter().map(OfflineRequest::from).collect();
                // An inProgress record means the process died mid-attempt.
                // That attempt was already counted, so the request goes back
                // to pending for the next drain rather than staying wedged.
                for request in &mut requests {
                    if request.status == RequestStatus::InProgress {
                        warn!(id = %request.id, "request was in progress at shutdown, requeueing as pending");
                        request.status = RequestStatus::Pending;
                    }
                }
                requests
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "queue snapshot is corrupt, starting empty");
                Vec::new()
            }
        }
    }

    /// Persists the full queue atomically: serialize, write a temp file next
    /// to the target, then rename over it so a crash never leaves a
    /// truncated snapshot.
    pub async fn save(&self, requests: &[OfflineRequest]) -> Result<(), EngineError> {
        let stored: Vec<StoredRequest> = requests.iter().map(StoredRequest::from).collect();
        let raw = serde_json::to_vec_pretty(&stored)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &raw).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}
