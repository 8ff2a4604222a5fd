//! crates/storyloom_core/src/domain.rs
//!
//! Defines the pure, core data structures for the story engine.
//! These structs are independent of any storage or serialization format.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use uuid::Uuid;

/// The closed set of deferred work kinds the offline queue knows how to
/// dispatch. Adding a kind requires a matching handler in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    GenerateStory,
    SyncJournalEntry,
    ExportData,
}

/// Lifecycle state of a queued request.
///
/// Valid transitions: Pending -> InProgress -> Completed | Failed, and
/// Failed -> Pending via an explicit retry. Completed is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// A unit of deferred work held by the offline queue.
#[derive(Debug, Clone, PartialEq)]
pub struct OfflineRequest {
    pub id: String,
    pub request_type: RequestType,
    /// Request-type-specific arguments, kept as a string map to stay
    /// compatible with the persisted wire shape. Typed views such as
    /// [`GenerateStoryArgs`] validate it at dispatch time.
    pub data: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub attempt_count: u32,
    pub status: RequestStatus,
    pub last_error: Option<String>,
}

impl OfflineRequest {
    /// Creates a fresh request: Pending, zero attempts, new id, stamped now.
    pub fn new(request_type: RequestType, data: BTreeMap<String, String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            request_type,
            data,
            created_at: Utc::now(),
            attempt_count: 0,
            status: RequestStatus::Pending,
            last_error: None,
        }
    }
}

/// Typed view over a GenerateStory request's payload map.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateStoryArgs {
    pub entry_id: String,
    pub genre: String,
}

impl GenerateStoryArgs {
    pub const ENTRY_ID_KEY: &'static str = "entryId";
    pub const GENRE_KEY: &'static str = "genre";

    /// Validates the string payload of a GenerateStory request. Missing
    /// either key is a hard failure of that request.
    pub fn from_data(data: &BTreeMap<String, String>) -> Result<Self, crate::ports::PortError> {
        let entry_id = data.get(Self::ENTRY_ID_KEY);
        let genre = data.get(Self::GENRE_KEY);
        match (entry_id, genre) {
            (Some(entry_id), Some(genre)) => Ok(Self {
                entry_id: entry_id.clone(),
                genre: genre.clone(),
            }),
            _ => Err(crate::ports::PortError::Validation(
                "missing required data".to_string(),
            )),
        }
    }
}

/// Structured signal extracted from a journal entry's free-form text.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StoryMetadata {
    /// Paragraph-level sentiment in [-1.0, 1.0]; absent when the analyzer
    /// found nothing to score.
    pub sentiment_score: Option<f64>,
    /// Up to five themes, ranked by descending frequency.
    pub themes: Vec<String>,
    /// Named people/places/organizations, de-duplicated, in order of first
    /// appearance.
    pub entities: Vec<String>,
    /// Currently always identical to `themes`; kept as a separate field so
    /// the two can diverge without a contract change.
    pub key_phrases: Vec<String>,
}

/// A generated narrative unit: the chapter body plus its cliffhanger line.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterResult {
    pub text: String,
    pub cliffhanger: String,
}

/// A persisted chapter+themes record used to give future generations
/// narrative continuity.
#[derive(Debug, Clone, PartialEq)]
pub struct StoryArc {
    pub chapter_text: String,
    pub cliffhanger: String,
    pub themes: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// One reflection prompt and whatever the child answered.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptResponse {
    pub prompt_text: String,
    pub selected_option: Option<String>,
    pub freeform_response: Option<String>,
}

/// A journal entry as seen by this subsystem. The surrounding application
/// owns creation and editing; the engine only reads entries to feed story
/// generation.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    pub id: String,
    pub transcription: Option<String>,
    pub assignment_name: String,
    pub subject: String,
    pub prompt_responses: Vec<PromptResponse>,
    pub ai_summary: Option<String>,
}

impl JournalEntry {
    /// Builds the text handed to metadata extraction, as blank-line
    /// separated sections in a fixed order: transcription, assignment and
    /// subject, one section per prompt response, then the AI summary.
    ///
    /// A prompt's value prefers the selected option over a freeform
    /// response; when neither exists the literal "(No response)" is used.
    pub fn composed_text(&self) -> String {
        let mut sections: Vec<String> = Vec::new();

        if let Some(transcription) = &self.transcription {
            sections.push(transcription.clone());
        }

        sections.push(format!(
            "Assignment: {}\nSubject: {}",
            self.assignment_name, self.subject
        ));

        for response in &self.prompt_responses {
            let value = response
                .selected_option
                .as_deref()
                .or(response.freeform_response.as_deref())
                .unwrap_or("(No response)");
            sections.push(format!("{}: {}", response.prompt_text, value));
        }

        if let Some(summary) = &self.ai_summary {
            sections.push(format!("Summary: {}", summary));
        }

        sections.join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> JournalEntry {
        JournalEntry {
            id: "entry-1".to_string(),
            transcription: Some("Hello".to_string()),
            assignment_name: "Essay 1".to_string(),
            subject: "Math".to_string(),
            prompt_responses: vec![PromptResponse {
                prompt_text: "How did it go".to_string(),
                selected_option: None,
                freeform_response: Some("Good".to_string()),
            }],
            ai_summary: Some("Nice work".to_string()),
        }
    }

    #[test]
    fn composed_text_matches_exact_layout() {
        let expected = "Hello\n\nAssignment: Essay 1\nSubject: Math\n\nHow did it go: Good\n\nSummary: Nice work";
        assert_eq!(entry().composed_text(), expected);
    }

    #[test]
    fn composed_text_prefers_selected_option_over_freeform() {
        let mut e = entry();
        e.prompt_responses[0].selected_option = Some("Great".to_string());
        assert!(e.composed_text().contains("How did it go: Great"));
        assert!(!e.composed_text().contains("How did it go: Good"));
    }

    #[test]
    fn composed_text_uses_no_response_placeholder() {
        let mut e = entry();
        e.prompt_responses[0].selected_option = None;
        e.prompt_responses[0].freeform_response = None;
        assert!(e.composed_text().contains("How did it go: (No response)"));
    }

    #[test]
    fn composed_text_skips_absent_sections() {
        let mut e = entry();
        e.transcription = None;
        e.ai_summary = None;
        e.prompt_responses.clear();
        assert_eq!(e.composed_text(), "Assignment: Essay 1\nSubject: Math");
    }

    #[test]
    fn new_request_starts_pending_with_zero_attempts() {
        let request = OfflineRequest::new(RequestType::GenerateStory, BTreeMap::new());
        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(request.attempt_count, 0);
        assert!(request.last_error.is_none());
        assert!(!request.id.is_empty());
    }

    #[test]
    fn generate_story_args_require_both_keys() {
        let mut data = BTreeMap::new();
        data.insert("entryId".to_string(), "entry-1".to_string());
        let err = GenerateStoryArgs::from_data(&data).unwrap_err();
        assert!(err.to_string().contains("missing required data"));

        data.insert("genre".to_string(), "adventure".to_string());
        let args = GenerateStoryArgs::from_data(&data).unwrap();
        assert_eq!(args.entry_id, "entry-1");
        assert_eq!(args.genre, "adventure");
    }
}
