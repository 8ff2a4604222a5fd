//! services/engine/src/adapters/arc_store.rs
//!
//! File-backed story-arc persistence. It implements the `StoryArcStore` port
//! from the `core` crate: arcs are appended to a single JSON document and
//! read back most-recent-first to seed narrative continuity.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use storyloom_core::domain::{ChapterResult, StoryArc};
use storyloom_core::ports::{PortError, PortResult, StoryArcStore};
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredArc {
    chapter_text: String,
    cliffhanger: String,
    themes: Vec<String>,
    created_at: DateTime<Utc>,
}

impl From<&StoryArc> for StoredArc {
    fn from(arc: &StoryArc) -> Self {
        Self {
            chapter_text: arc.chapter_text.clone(),
            cliffhanger: arc.cliffhanger.clone(),
            themes: arc.themes.clone(),
            created_at: arc.created_at,
        }
    }
}

impl From<StoredArc> for StoryArc {
    fn from(stored: StoredArc) -> Self {
        Self {
            chapter_text: stored.chapter_text,
            cliffhanger: stored.cliffhanger,
            themes: stored.themes,
            created_at: stored.created_at,
        }
    }
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A JSON-file-backed arc store. Writes are serialized through an internal
/// lock and land atomically (temp file + rename).
pub struct FileArcStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileArcStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// A missing file is simply an empty history; a corrupt one is treated
    /// as data loss, the same policy as the queue snapshot.
    async fn load(&self) -> Vec<StoryArc> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(_) => return Vec::new(),
        };
        match serde_json::from_slice::<Vec<StoredArc>>(&raw) {
            Ok(stored) => stored.into_iter().map(StoryArc::from).collect(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "story arc file is corrupt, starting empty");
                Vec::new()
            }
        }
    }

    async fn save(&self, arcs: &[StoryArc]) -> Result<(), std::io::Error> {
        let stored: Vec<StoredArc> = arcs.iter().map(StoredArc::from).collect();
        let raw = serde_json::to_vec_pretty(&stored)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

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

//=========================================================================================
// `StoryArcStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl StoryArcStore for FileArcStore {
    async fn save_arc(&self, chapter: &ChapterResult, themes: &[String]) -> PortResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut arcs = self.load().await;
        arcs.push(StoryArc {
            chapter_text: chapter.text.clone(),
            cliffhanger: chapter.cliffhanger.clone(),
            themes: themes.to_vec(),
            created_at: Utc::now(),
        });
        self.save(&arcs)
            .await
            .map_err(|e| PortError::Unexpected(format!("failed to save story arc: {e}")))
    }

    async fn recent_arcs(&self, limit: usize) -> PortResult<Vec<String>> {
        let arcs = self.load().await;
        let mut recent: Vec<&StoryArc> = arcs.iter().collect();
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(recent
            .into_iter()
            .take(limit)
            .map(|arc| arc.chapter_text.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn chapter(text: &str) -> ChapterResult {
        ChapterResult {
            text: text.to_string(),
            cliffhanger: "And then?".to_string(),
        }
    }

    #[tokio::test]
    async fn recent_arcs_are_most_recent_first_and_capped() {
        let dir = tempdir().unwrap();
        let store = FileArcStore::new(dir.path().join("arcs.json"));

        for text in ["one", "two", "three", "four"] {
            store
                .save_arc(&chapter(text), &["theme".to_string()])
                .await
                .unwrap();
            // Distinct timestamps so recency ordering is unambiguous.
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let recent = store.recent_arcs(3).await.unwrap();
        assert_eq!(recent, vec!["four", "three", "two"]);
    }

    #[tokio::test]
    async fn insufficient_history_is_not_an_error() {
        let dir = tempdir().unwrap();
        let store = FileArcStore::new(dir.path().join("arcs.json"));
        assert!(store.recent_arcs(3).await.unwrap().is_empty());

        store.save_arc(&chapter("only"), &[]).await.unwrap();
        assert_eq!(store.recent_arcs(3).await.unwrap(), vec!["only"]);
    }

    #[tokio::test]
    async fn arcs_survive_reopening_the_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("arcs.json");

        let store = FileArcStore::new(path.clone());
        store
            .save_arc(&chapter("persisted"), &["school".to_string()])
            .await
            .unwrap();
        drop(store);

        let reopened = FileArcStore::new(path);
        assert_eq!(reopened.recent_arcs(5).await.unwrap(), vec!["persisted"]);
    }
}
