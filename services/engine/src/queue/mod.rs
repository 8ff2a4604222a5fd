//! services/engine/src/queue/mod.rs
//!
//! The offline request queue: a durable, bounded FIFO of deferred work that
//! survives process restarts. Requests are retried up to an attempt cap and
//! drained whenever the network signal reports connectivity.

pub mod store;

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use storyloom_core::domain::{
    GenerateStoryArgs, OfflineRequest, RequestStatus, RequestType,
};
use storyloom_core::ports::{
    ChapterGenerationService, JournalEntryStore, MetadataExtractionService, PortError, PortResult,
    StoryArcStore,
};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::EngineError;
use store::QueueStore;

/// How many prior story arcs are handed to chapter generation as context.
const RECENT_ARC_CONTEXT: usize = 3;

pub const DEFAULT_MAX_QUEUE_SIZE: usize = 50;
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 3;

const MAX_ATTEMPTS_MESSAGE: &str = "maximum retry attempts reached";

//=========================================================================================
// Construction
//=========================================================================================

/// Tunables for the queue. Production uses the defaults; tests shrink them.
#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub max_queue_size: usize,
    pub max_retry_attempts: u32,
    /// Upper bound on a single handler invocation. Expiry is treated exactly
    /// like a handler failure, so a hung network call cannot wedge the
    /// processing flag.
    pub request_timeout: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            request_timeout: Duration::from_secs(120),
        }
    }
}

/// The collaborators a GenerateStory request runs through, injected at
/// construction so the queue stays independent of concrete providers.
#[derive(Clone)]
pub struct QueueServices {
    pub entries: Arc<dyn JournalEntryStore>,
    pub metadata: Arc<dyn MetadataExtractionService>,
    pub chapters: Arc<dyn ChapterGenerationService>,
    pub arcs: Arc<dyn StoryArcStore>,
}

//=========================================================================================
// OfflineRequestQueue
//=========================================================================================

pub struct OfflineRequestQueue {
    /// In-memory queue slots, insertion-ordered. All mutation goes through
    /// this lock, which also serializes snapshot writes (single writer).
    state: Mutex<Vec<OfflineRequest>>,
    store: QueueStore,
    services: QueueServices,
    options: QueueOptions,
    user_id: String,
    /// Non-reentrancy guard: while a drain is in flight, further drain
    /// triggers are no-ops.
    processing: AtomicBool,
    connected: watch::Receiver<bool>,
    /// Handle to ourselves for spawning background drains.
    me: Weak<Self>,
}

impl OfflineRequestQueue {
    /// Opens the queue, rehydrating any persisted snapshot. A missing or
    /// corrupt snapshot yields an empty queue.
    pub async fn open(
        store: QueueStore,
        services: QueueServices,
        user_id: impl Into<String>,
        connected: watch::Receiver<bool>,
        options: QueueOptions,
    ) -> Arc<Self> {
        let requests = store.load().await;
        if !requests.is_empty() {
            info!(count = requests.len(), "rehydrated offline queue from disk");
        }
        let user_id = user_id.into();
        Arc::new_cyclic(|me| Self {
            state: Mutex::new(requests),
            store,
            services,
            options,
            user_id,
            processing: AtomicBool::new(false),
            connected,
            me: me.clone(),
        })
    }

    fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Writes the current snapshot. Write failures are logged and the
    /// in-memory state stays authoritative until the next successful write.
    async fn persist(&self, requests: &[OfflineRequest]) {
        if let Err(e) = self.store.save(requests).await {
            warn!(error = %e, "failed to persist queue snapshot, keeping in-memory state");
        }
    }

    //=====================================================================================
    // Mutating Operations
    //=====================================================================================

    /// Accepts a new Pending request. At capacity, the oldest Pending
    /// request is evicted to make room, then the oldest Failed one;
    /// InProgress and Completed requests are never evicted. With nothing
    /// evictable the enqueue is rejected.
    ///
    /// If the network currently reports connected, a drain is triggered.
    pub async fn enqueue(&self, request: OfflineRequest) -> Result<(), EngineError> {
        {
            let mut requests = self.state.lock().await;
            if requests.len() >= self.options.max_queue_size {
                match Self::eviction_victim(&requests) {
                    Some(index) => {
                        let evicted = requests.remove(index);
                        info!(id = %evicted.id, status = ?evicted.status, "evicted request to make room");
                    }
                    None => return Err(EngineError::QueueFull),
                }
            }
            requests.push(request);
            self.persist(&requests).await;
        }

        if self.is_connected() {
            self.spawn_drain();
        }
        Ok(())
    }

    /// Oldest Pending slot, else oldest Failed, else nothing.
    fn eviction_victim(requests: &[OfflineRequest]) -> Option<usize> {
        let oldest_with = |status: RequestStatus| {
            requests
                .iter()
                .enumerate()
                .filter(|(_, r)| r.status == status)
                .min_by_key(|(_, r)| r.created_at)
                .map(|(index, _)| index)
        };
        oldest_with(RequestStatus::Pending).or_else(|| oldest_with(RequestStatus::Failed))
    }

    /// Re-arms a Failed request: status back to Pending, attempt count kept.
    /// Any other status, or an unknown id, is a no-op. Triggers a drain when
    /// connected.
    ///
    /// Note that a request which exhausted its attempts can still be
    /// re-armed here; the attempt-count gate will immediately re-fail it
    /// without invoking its handler.
    pub async fn retry_request(&self, id: &str) {
        let rearmed = {
            let mut requests = self.state.lock().await;
            match requests
                .iter_mut()
                .find(|r| r.id == id && r.status == RequestStatus::Failed)
            {
                Some(request) => {
                    request.status = RequestStatus::Pending;
                    self.persist(&requests).await;
                    true
                }
                None => false,
            }
        };

        if rearmed && self.is_connected() {
            self.spawn_drain();
        }
    }

    /// Removes a request unconditionally, whatever its status.
    pub async fn remove_request(&self, id: &str) {
        let mut requests = self.state.lock().await;
        requests.retain(|r| r.id != id);
        self.persist(&requests).await;
    }

    /// Drops every Completed request.
    pub async fn clear_completed_requests(&self) {
        let mut requests = self.state.lock().await;
        requests.retain(|r| r.status != RequestStatus::Completed);
        self.persist(&requests).await;
    }

    //=====================================================================================
    // Queries (read-only, never persist or trigger processing)
    //=====================================================================================

    pub async fn pending_request_count(&self) -> usize {
        self.state
            .lock()
            .await
            .iter()
            .filter(|r| r.status == RequestStatus::Pending)
            .count()
    }

    pub async fn request_ids(&self) -> Vec<String> {
        self.state.lock().await.iter().map(|r| r.id.clone()).collect()
    }

    pub async fn request_status(&self, id: &str) -> Option<RequestStatus> {
        self.state
            .lock()
            .await
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.status)
    }

    pub async fn request_creation_date(&self, id: &str) -> Option<DateTime<Utc>> {
        self.state
            .lock()
            .await
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.created_at)
    }

    pub async fn request_attempt_count(&self, id: &str) -> Option<u32> {
        self.state
            .lock()
            .await
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.attempt_count)
    }

    pub async fn request_last_error(&self, id: &str) -> Option<String> {
        self.state
            .lock()
            .await
            .iter()
            .find(|r| r.id == id)
            .and_then(|r| r.last_error.clone())
    }

    //=====================================================================================
    // Drain
    //=====================================================================================

    fn spawn_drain(&self) {
        if let Some(queue) = self.me.upgrade() {
            tokio::spawn(async move {
                queue.process_all_pending().await;
            });
        }
    }

    /// One drain pass: attempt every currently Pending request, in slot
    /// order, one at a time. A second caller while a pass is in flight is a
    /// no-op.
    pub async fn process_all_pending(&self) {
        if self.processing.swap(true, Ordering::SeqCst) {
            return;
        }

        let ids: Vec<String> = {
            let requests = self.state.lock().await;
            requests
                .iter()
                .filter(|r| r.status == RequestStatus::Pending)
                .map(|r| r.id.clone())
                .collect()
        };

        for id in ids {
            self.process_one(&id).await;
        }

        self.processing.store(false, Ordering::SeqCst);
    }

    /// Attempts a single request. The state lock is not held across the
    /// handler await, so queries and removals stay responsive; a request
    /// removed mid-flight is simply not finalized.
    async fn process_one(&self, id: &str) {
        let (request_type, data) = {
            let mut requests = self.state.lock().await;
            let request = match requests
                .iter_mut()
                .find(|r| r.id == id && r.status == RequestStatus::Pending)
            {
                Some(request) => request,
                None => return,
            };

            // Exhausted requests fail without invoking the handler, and
            // without consuming another attempt.
            if request.attempt_count >= self.options.max_retry_attempts {
                request.status = RequestStatus::Failed;
                request.last_error = Some(MAX_ATTEMPTS_MESSAGE.to_string());
                self.persist(&requests).await;
                return;
            }

            request.status = RequestStatus::InProgress;
            request.attempt_count += 1;
            let captured = (request.request_type, request.data.clone());
            self.persist(&requests).await;
            captured
        };

        let outcome = match tokio::time::timeout(
            self.options.request_timeout,
            self.dispatch(request_type, &data),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(PortError::Unexpected(format!(
                "request timed out after {}s",
                self.options.request_timeout.as_secs()
            ))),
        };

        let mut requests = self.state.lock().await;
        let request = match requests.iter_mut().find(|r| r.id == id) {
            Some(request) => request,
            None => return,
        };
        match outcome {
            Ok(()) => {
                request.status = RequestStatus::Completed;
                request.last_error = None;
            }
            Err(e) => {
                warn!(id, error = %e, "request handler failed");
                request.status = RequestStatus::Failed;
                request.last_error = Some(e.to_string());
            }
        }
        self.persist(&requests).await;
    }

    /// Type-specific handlers. Errors are captured by the caller into the
    /// request's status; they never escape a drain pass.
    async fn dispatch(
        &self,
        request_type: RequestType,
        data: &BTreeMap<String, String>,
    ) -> PortResult<()> {
        match request_type {
            RequestType::GenerateStory => self.handle_generate_story(data).await,
            RequestType::SyncJournalEntry => {
                // Backend sync is not yet implemented; complete as a no-op.
                info!("syncJournalEntry handler not yet implemented, completing as no-op");
                Ok(())
            }
            RequestType::ExportData => {
                // Data export is not yet implemented; complete as a no-op.
                info!("exportData handler not yet implemented, completing as no-op");
                Ok(())
            }
        }
    }

    async fn handle_generate_story(&self, data: &BTreeMap<String, String>) -> PortResult<()> {
        let args = GenerateStoryArgs::from_data(data)?;

        let entry = self
            .services
            .entries
            .get_entry(&args.entry_id)
            .await?
            .ok_or_else(|| PortError::NotFound("journal entry".to_string()))?;

        let text = entry.composed_text();
        let metadata = self.services.metadata.extract(&text).await?;
        let previous_arcs = self.services.arcs.recent_arcs(RECENT_ARC_CONTEXT).await?;
        let chapter = self
            .services
            .chapters
            .generate_chapter(&metadata, &self.user_id, &args.genre, &previous_arcs)
            .await?;

        // A chapter that fails to persist as an arc is still delivered;
        // only future continuity degrades.
        if let Err(e) = self.services.arcs.save_arc(&chapter, &metadata.themes).await {
            warn!(error = %e, "failed to save story arc");
        }
        Ok(())
    }

    //=====================================================================================
    // Connectivity
    //=====================================================================================

    /// Watches the network signal and drains the queue on each
    /// disconnected-to-connected transition. Repeated "connected" emissions
    /// do not re-trigger a drain.
    pub fn start_connectivity_watcher(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let queue = self.me.upgrade();
        let mut signal = self.connected.clone();
        tokio::spawn(async move {
            let Some(queue) = queue else { return };
            let mut was_connected = *signal.borrow();
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    changed = signal.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let now_connected = *signal.borrow_and_update();
                        if now_connected && !was_connected {
                            info!("network restored, draining offline queue");
                            queue.process_all_pending().await;
                        }
                        was_connected = now_connected;
                    }
                }
            }
        })
    }
}

//=========================================================================================
// Tests
//=========================================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use storyloom_core::domain::{ChapterResult, JournalEntry, StoryMetadata};
    use tempfile::{tempdir, TempDir};
    use tokio::sync::Notify;

    struct MapEntryStore {
        entries: HashMap<String, JournalEntry>,
    }

    #[async_trait]
    impl JournalEntryStore for MapEntryStore {
        async fn get_entry(&self, id: &str) -> PortResult<Option<JournalEntry>> {
            Ok(self.entries.get(id).cloned())
        }
    }

    struct FixedMetadata;

    #[async_trait]
    impl MetadataExtractionService for FixedMetadata {
        async fn extract(&self, _text: &str) -> PortResult<StoryMetadata> {
            Ok(StoryMetadata {
                sentiment_score: Some(0.4),
                themes: vec!["school".to_string(), "friends".to_string()],
                entities: vec!["Sam".to_string()],
                key_phrases: vec!["school".to_string(), "friends".to_string()],
            })
        }
    }

    #[derive(Default)]
    struct MockChapters {
        delay: Option<Duration>,
        gate: Option<Arc<Notify>>,
        seen_arcs: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl ChapterGenerationService for MockChapters {
        async fn generate_chapter(
            &self,
            _metadata: &StoryMetadata,
            _user_id: &str,
            _genre: &str,
            previous_arcs: &[String],
        ) -> PortResult<ChapterResult> {
            self.seen_arcs.lock().await.push(previous_arcs.to_vec());
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(ChapterResult {
                text: "Once upon a time in the classroom.".to_string(),
                cliffhanger: "But what was behind the door?".to_string(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingArcStore {
        fail_save: bool,
        saved: Mutex<Vec<(ChapterResult, Vec<String>)>>,
    }

    #[async_trait]
    impl StoryArcStore for RecordingArcStore {
        async fn save_arc(&self, chapter: &ChapterResult, themes: &[String]) -> PortResult<()> {
            if self.fail_save {
                return Err(PortError::Unexpected("disk full".to_string()));
            }
            self.saved.lock().await.push((chapter.clone(), themes.to_vec()));
            Ok(())
        }

        async fn recent_arcs(&self, limit: usize) -> PortResult<Vec<String>> {
            let saved = self.saved.lock().await;
            Ok(saved
                .iter()
                .rev()
                .take(limit)
                .map(|(chapter, _)| chapter.text.clone())
                .collect())
        }
    }

    fn entry(id: &str) -> JournalEntry {
        JournalEntry {
            id: id.to_string(),
            transcription: Some("We built a volcano today".to_string()),
            assignment_name: "Science fair".to_string(),
            subject: "Science".to_string(),
            prompt_responses: vec![],
            ai_summary: None,
        }
    }

    fn story_request(entry_id: &str) -> OfflineRequest {
        let mut data = BTreeMap::new();
        data.insert("entryId".to_string(), entry_id.to_string());
        data.insert("genre".to_string(), "adventure".to_string());
        OfflineRequest::new(RequestType::GenerateStory, data)
    }

    struct Harness {
        queue: Arc<OfflineRequestQueue>,
        sender: watch::Sender<bool>,
        arcs: Arc<RecordingArcStore>,
        chapters: Arc<MockChapters>,
        _dir: TempDir,
    }

    async fn harness(connected: bool, options: QueueOptions) -> Harness {
        harness_with(connected, options, MockChapters::default(), RecordingArcStore::default())
            .await
    }

    async fn harness_with(
        connected: bool,
        options: QueueOptions,
        chapters: MockChapters,
        arcs: RecordingArcStore,
    ) -> Harness {
        let dir = tempdir().unwrap();
        let (sender, receiver) = watch::channel(connected);
        let chapters = Arc::new(chapters);
        let arcs = Arc::new(arcs);
        let mut entries = HashMap::new();
        entries.insert("entry-1".to_string(), entry("entry-1"));
        let services = QueueServices {
            entries: Arc::new(MapEntryStore { entries }),
            metadata: Arc::new(FixedMetadata),
            chapters: chapters.clone(),
            arcs: arcs.clone(),
        };
        let queue = OfflineRequestQueue::open(
            QueueStore::new(dir.path().join("queue.json")),
            services,
            "child-1",
            receiver,
            options,
        )
        .await;
        Harness { queue, sender, arcs, chapters, _dir: dir }
    }

    #[tokio::test]
    async fn generate_story_completes_and_saves_arc() {
        let h = harness(false, QueueOptions::default()).await;
        let request = story_request("entry-1");
        let id = request.id.clone();

        h.queue.enqueue(request).await.unwrap();
        h.queue.process_all_pending().await;

        assert_eq!(h.queue.request_status(&id).await, Some(RequestStatus::Completed));
        assert_eq!(h.queue.request_attempt_count(&id).await, Some(1));
        assert!(h.queue.request_last_error(&id).await.is_none());

        let saved = h.arcs.saved.lock().await;
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].1, vec!["school".to_string(), "friends".to_string()]);
    }

    #[tokio::test]
    async fn completed_requests_are_never_reprocessed() {
        let h = harness(false, QueueOptions::default()).await;
        let request = story_request("entry-1");
        let id = request.id.clone();

        h.queue.enqueue(request).await.unwrap();
        h.queue.process_all_pending().await;
        assert_eq!(h.queue.request_status(&id).await, Some(RequestStatus::Completed));

        // Further drains and a manual re-arm leave a Completed request alone.
        h.queue.process_all_pending().await;
        h.queue.retry_request(&id).await;
        h.queue.process_all_pending().await;

        assert_eq!(h.queue.request_status(&id).await, Some(RequestStatus::Completed));
        assert_eq!(h.queue.request_attempt_count(&id).await, Some(1));
        assert!(h.queue.request_last_error(&id).await.is_none());

        // The handler ran exactly once, so exactly one arc was saved.
        assert_eq!(h.chapters.seen_arcs.lock().await.len(), 1);
        assert_eq!(h.arcs.saved.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn second_story_receives_previous_arc_as_context() {
        let h = harness(false, QueueOptions::default()).await;

        h.queue.enqueue(story_request("entry-1")).await.unwrap();
        h.queue.process_all_pending().await;
        h.queue.enqueue(story_request("entry-1")).await.unwrap();
        h.queue.process_all_pending().await;

        let seen = h.chapters.seen_arcs.lock().await;
        assert_eq!(seen.len(), 2);
        assert!(seen[0].is_empty());
        assert_eq!(seen[1], vec!["Once upon a time in the classroom.".to_string()]);
    }

    #[tokio::test]
    async fn missing_payload_keys_fail_with_validation_message() {
        let h = harness(false, QueueOptions::default()).await;
        let request = OfflineRequest::new(RequestType::GenerateStory, BTreeMap::new());
        let id = request.id.clone();

        h.queue.enqueue(request).await.unwrap();
        h.queue.process_all_pending().await;

        assert_eq!(h.queue.request_status(&id).await, Some(RequestStatus::Failed));
        assert_eq!(h.queue.request_attempt_count(&id).await, Some(1));
        let error = h.queue.request_last_error(&id).await.unwrap();
        assert!(error.contains("missing required data"), "got: {error}");
    }

    #[tokio::test]
    async fn retry_exhaustion_gates_the_handler() {
        let h = harness(false, QueueOptions::default()).await;
        let request = story_request("no-such-entry");
        let id = request.id.clone();

        h.queue.enqueue(request).await.unwrap();
        h.queue.process_all_pending().await;

        assert_eq!(h.queue.request_status(&id).await, Some(RequestStatus::Failed));
        assert_eq!(h.queue.request_attempt_count(&id).await, Some(1));
        let error = h.queue.request_last_error(&id).await.unwrap();
        assert!(error.contains("journal entry not found"), "got: {error}");

        // Two manual retries re-run the handler and keep failing.
        for expected_attempts in [2u32, 3u32] {
            h.queue.retry_request(&id).await;
            assert_eq!(h.queue.request_status(&id).await, Some(RequestStatus::Pending));
            h.queue.process_all_pending().await;
            assert_eq!(h.queue.request_status(&id).await, Some(RequestStatus::Failed));
            assert_eq!(h.queue.request_attempt_count(&id).await, Some(expected_attempts));
        }

        // A further re-arm is allowed, but the attempt-count gate re-fails
        // the request without invoking the handler or consuming an attempt.
        h.queue.retry_request(&id).await;
        h.queue.process_all_pending().await;
        assert_eq!(h.queue.request_status(&id).await, Some(RequestStatus::Failed));
        assert_eq!(h.queue.request_attempt_count(&id).await, Some(3));
        let error = h.queue.request_last_error(&id).await.unwrap();
        assert!(error.contains("maximum retry attempts reached"), "got: {error}");
    }

    #[tokio::test]
    async fn capacity_eviction_prefers_pending_then_failed_then_rejects() {
        let options = QueueOptions {
            max_queue_size: 2,
            ..QueueOptions::default()
        };
        let h = harness(false, options).await;

        // Slot 1: a Completed request (sync is a no-op success).
        let completed = OfflineRequest::new(RequestType::SyncJournalEntry, BTreeMap::new());
        let completed_id = completed.id.clone();
        h.queue.enqueue(completed).await.unwrap();
        h.queue.process_all_pending().await;
        assert_eq!(
            h.queue.request_status(&completed_id).await,
            Some(RequestStatus::Completed)
        );

        // Slot 2: a Failed request.
        let failed = story_request("no-such-entry");
        let failed_id = failed.id.clone();
        h.queue.enqueue(failed).await.unwrap();
        h.queue.process_all_pending().await;
        assert_eq!(h.queue.request_status(&failed_id).await, Some(RequestStatus::Failed));

        // Full, no Pending: the Failed slot is evicted, never the Completed one.
        let third = story_request("entry-1");
        let third_id = third.id.clone();
        h.queue.enqueue(third).await.unwrap();
        let ids = h.queue.request_ids().await;
        assert!(ids.contains(&completed_id));
        assert!(ids.contains(&third_id));
        assert!(!ids.contains(&failed_id));

        // Full, with a Pending slot: the Pending one goes first.
        let fourth = story_request("entry-1");
        let fourth_id = fourth.id.clone();
        h.queue.enqueue(fourth).await.unwrap();
        let ids = h.queue.request_ids().await;
        assert!(ids.contains(&completed_id));
        assert!(ids.contains(&fourth_id));
        assert!(!ids.contains(&third_id));

        // Everything Completed: nothing is evictable, the enqueue is rejected.
        h.queue.process_all_pending().await;
        let rejected = h.queue.enqueue(story_request("entry-1")).await;
        assert!(matches!(rejected, Err(EngineError::QueueFull)));
        assert_eq!(h.queue.request_ids().await.len(), 2);
    }

    #[tokio::test]
    async fn retry_is_a_noop_for_non_failed_and_unknown_requests() {
        let h = harness(false, QueueOptions::default()).await;
        let request = story_request("entry-1");
        let id = request.id.clone();
        h.queue.enqueue(request).await.unwrap();

        h.queue.retry_request(&id).await;
        assert_eq!(h.queue.request_status(&id).await, Some(RequestStatus::Pending));
        assert_eq!(h.queue.request_attempt_count(&id).await, Some(0));

        h.queue.retry_request("no-such-id").await;
        assert_eq!(h.queue.request_ids().await.len(), 1);
    }

    #[tokio::test]
    async fn clear_completed_keeps_everything_else() {
        let h = harness(false, QueueOptions::default()).await;

        let done = OfflineRequest::new(RequestType::ExportData, BTreeMap::new());
        let done_id = done.id.clone();
        let failed = story_request("no-such-entry");
        let failed_id = failed.id.clone();
        let pending = story_request("entry-1");
        let pending_id = pending.id.clone();

        h.queue.enqueue(done).await.unwrap();
        h.queue.enqueue(failed).await.unwrap();
        h.queue.process_all_pending().await;
        h.queue.enqueue(pending).await.unwrap();

        h.queue.clear_completed_requests().await;
        let ids = h.queue.request_ids().await;
        assert!(!ids.contains(&done_id));
        assert!(ids.contains(&failed_id));
        assert!(ids.contains(&pending_id));

        h.queue.remove_request(&failed_id).await;
        assert_eq!(h.queue.request_ids().await, vec![pending_id]);
    }

    #[tokio::test]
    async fn sync_and_export_complete_immediately() {
        let h = harness(false, QueueOptions::default()).await;
        let sync = OfflineRequest::new(RequestType::SyncJournalEntry, BTreeMap::new());
        let export = OfflineRequest::new(RequestType::ExportData, BTreeMap::new());
        let sync_id = sync.id.clone();
        let export_id = export.id.clone();

        h.queue.enqueue(sync).await.unwrap();
        h.queue.enqueue(export).await.unwrap();
        h.queue.process_all_pending().await;

        assert_eq!(h.queue.request_status(&sync_id).await, Some(RequestStatus::Completed));
        assert_eq!(h.queue.request_status(&export_id).await, Some(RequestStatus::Completed));
        assert_eq!(h.queue.request_attempt_count(&sync_id).await, Some(1));
        assert_eq!(h.queue.pending_request_count().await, 0);
    }

    #[tokio::test]
    async fn reconnect_transition_triggers_exactly_one_drain() {
        let h = harness(false, QueueOptions::default()).await;
        let shutdown = CancellationToken::new();
        let watcher = h.queue.start_connectivity_watcher(shutdown.clone());

        let request = story_request("entry-1");
        let id = request.id.clone();
        h.queue.enqueue(request).await.unwrap();

        // Disconnected: nothing happens.
        assert_eq!(h.queue.request_status(&id).await, Some(RequestStatus::Pending));
        assert_eq!(h.queue.request_attempt_count(&id).await, Some(0));

        h.sender.send(true).unwrap();

        let mut completed = false;
        for _ in 0..200 {
            if h.queue.request_status(&id).await == Some(RequestStatus::Completed) {
                completed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(completed, "reconnect did not drain the queue");
        assert_eq!(h.queue.request_attempt_count(&id).await, Some(1));

        shutdown.cancel();
        watcher.await.unwrap();
    }

    #[tokio::test]
    async fn restart_rehydrates_persisted_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.json");
        let (_sender, receiver) = watch::channel(false);
        let services = || QueueServices {
            entries: Arc::new(MapEntryStore { entries: HashMap::new() }),
            metadata: Arc::new(FixedMetadata),
            chapters: Arc::new(MockChapters::default()),
            arcs: Arc::new(RecordingArcStore::default()),
        };

        let first = OfflineRequestQueue::open(
            QueueStore::new(path.clone()),
            services(),
            "child-1",
            receiver.clone(),
            QueueOptions::default(),
        )
        .await;
        let a = story_request("entry-1");
        let b = OfflineRequest::new(RequestType::ExportData, BTreeMap::new());
        let a_id = a.id.clone();
        let b_id = b.id.clone();
        let a_created = a.created_at;
        first.enqueue(a).await.unwrap();
        first.enqueue(b).await.unwrap();
        drop(first);

        let second = OfflineRequestQueue::open(
            QueueStore::new(path),
            services(),
            "child-1",
            receiver,
            QueueOptions::default(),
        )
        .await;
        assert_eq!(second.request_ids().await, vec![a_id.clone(), b_id]);
        assert_eq!(second.request_status(&a_id).await, Some(RequestStatus::Pending));
        assert_eq!(second.request_creation_date(&a_id).await, Some(a_created));
        assert_eq!(second.pending_request_count().await, 2);
    }

    #[tokio::test]
    async fn handler_timeout_counts_as_failure() {
        let options = QueueOptions {
            request_timeout: Duration::from_millis(50),
            ..QueueOptions::default()
        };
        let chapters = MockChapters {
            delay: Some(Duration::from_secs(5)),
            ..MockChapters::default()
        };
        let h = harness_with(false, options, chapters, RecordingArcStore::default()).await;

        let request = story_request("entry-1");
        let id = request.id.clone();
        h.queue.enqueue(request).await.unwrap();
        h.queue.process_all_pending().await;

        assert_eq!(h.queue.request_status(&id).await, Some(RequestStatus::Failed));
        let error = h.queue.request_last_error(&id).await.unwrap();
        assert!(error.contains("timed out"), "got: {error}");
    }

    #[tokio::test]
    async fn arc_save_failure_still_completes_the_request() {
        let arcs = RecordingArcStore {
            fail_save: true,
            ..RecordingArcStore::default()
        };
        let h = harness_with(false, QueueOptions::default(), MockChapters::default(), arcs).await;

        let request = story_request("entry-1");
        let id = request.id.clone();
        h.queue.enqueue(request).await.unwrap();
        h.queue.process_all_pending().await;

        assert_eq!(h.queue.request_status(&id).await, Some(RequestStatus::Completed));
    }

    #[tokio::test]
    async fn concurrent_drain_calls_do_not_double_process() {
        let gate = Arc::new(Notify::new());
        let chapters = MockChapters {
            gate: Some(gate.clone()),
            ..MockChapters::default()
        };
        let h = harness_with(false, QueueOptions::default(), chapters, RecordingArcStore::default())
            .await;

        let request = story_request("entry-1");
        let id = request.id.clone();
        h.queue.enqueue(request).await.unwrap();

        let queue = h.queue.clone();
        let first = tokio::spawn(async move { queue.process_all_pending().await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The handler is parked on the gate, so this call must bail out
        // instead of starting a second pass.
        h.queue.process_all_pending().await;

        gate.notify_one();
        first.await.unwrap();

        assert_eq!(h.queue.request_status(&id).await, Some(RequestStatus::Completed));
        assert_eq!(h.queue.request_attempt_count(&id).await, Some(1));
    }

    #[tokio::test]
    async fn failure_in_one_request_does_not_abort_the_pass() {
        let h = harness(false, QueueOptions::default()).await;
        let bad = story_request("no-such-entry");
        let good = story_request("entry-1");
        let bad_id = bad.id.clone();
        let good_id = good.id.clone();

        h.queue.enqueue(bad).await.unwrap();
        h.queue.enqueue(good).await.unwrap();
        h.queue.process_all_pending().await;

        assert_eq!(h.queue.request_status(&bad_id).await, Some(RequestStatus::Failed));
        assert_eq!(h.queue.request_status(&good_id).await, Some(RequestStatus::Completed));
    }
}
