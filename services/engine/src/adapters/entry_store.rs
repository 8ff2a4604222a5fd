//! services/engine/src/adapters/entry_store.rs
//!
//! Read-only lookup into the journal-entry file owned by the surrounding
//! application. It implements the `JournalEntryStore` port from the `core`
//! crate; the engine never writes entries.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use storyloom_core::domain::{JournalEntry, PromptResponse};
use storyloom_core::ports::{JournalEntryStore, PortError, PortResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredPromptResponse {
    prompt_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    selected_option: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    freeform_response: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredEntry {
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    transcription: Option<String>,
    assignment_name: String,
    subject: String,
    #[serde(default)]
    prompt_responses: Vec<StoredPromptResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ai_summary: Option<String>,
}

impl From<StoredEntry> for JournalEntry {
    fn from(stored: StoredEntry) -> Self {
        Self {
            id: stored.id,
            transcription: stored.transcription,
            assignment_name: stored.assignment_name,
            subject: stored.subject,
            prompt_responses: stored
                .prompt_responses
                .into_iter()
                .map(|p| PromptResponse {
                    prompt_text: p.prompt_text,
                    selected_option: p.selected_option,
                    freeform_response: p.freeform_response,
                })
                .collect(),
            ai_summary: stored.ai_summary,
        }
    }
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// Looks entries up in a JSON array file, re-read on every call so edits by
/// the owning application are always visible.
pub struct FileEntryStore {
    path: PathBuf,
}

impl FileEntryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

//=========================================================================================
// `JournalEntryStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl JournalEntryStore for FileEntryStore {
    async fn get_entry(&self, id: &str) -> PortResult<Option<JournalEntry>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(PortError::Unexpected(format!(
                    "failed to read journal entries: {e}"
                )))
            }
        };
        let entries: Vec<StoredEntry> = serde_json::from_slice(&raw)
            .map_err(|e| PortError::Unexpected(format!("malformed journal entry file: {e}")))?;
        Ok(entries
            .into_iter()
            .find(|entry| entry.id == id)
            .map(JournalEntry::from))
    }
}
