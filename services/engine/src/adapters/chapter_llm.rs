//! services/engine/src/adapters/chapter_llm.rs
//!
//! This module contains the adapter for the chapter-generating LLM.
//! It implements the `ChapterGenerationService` port from the `core` crate.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use storyloom_core::domain::{ChapterResult, StoryMetadata};
use storyloom_core::ports::{ChapterGenerationService, PortError, PortResult};

const SYSTEM_INSTRUCTIONS: &str = r#"You are a storyteller for children. You turn the mood and themes of a child's
journal entry into one short chapter of an ongoing, age-appropriate story.

Rules:
- Write 2 to 4 short paragraphs in the requested genre.
- Weave the given themes and named characters in naturally. The child is the hero.
- If previous chapters are provided, continue their story; never contradict them.
- Keep the tone gentle and encouraging, whatever the journal's mood was.
- Never mention the journal, school assignments, or that you are an AI.

At the VERY END of your response, on a new final line, write EXACTLY:
CLIFFHANGER: <one suspenseful sentence that makes the reader want the next chapter>"#;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `ChapterGenerationService` using an
/// OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiChapterAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiChapterAdapter {
    /// Creates a new `OpenAiChapterAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }

    fn build_prompt(
        metadata: &StoryMetadata,
        user_id: &str,
        genre: &str,
        previous_arcs: &[String],
    ) -> String {
        let mut prompt = String::new();
        prompt.push_str(&format!("GENRE: {genre}\n"));
        prompt.push_str(&format!("HERO ID: {user_id}\n"));
        if let Some(score) = metadata.sentiment_score {
            prompt.push_str(&format!("MOOD SCORE (-1 sad to +1 happy): {score:.2}\n"));
        }
        if !metadata.themes.is_empty() {
            prompt.push_str(&format!("THEMES: {}\n", metadata.themes.join(", ")));
        }
        if !metadata.entities.is_empty() {
            prompt.push_str(&format!("CHARACTERS: {}\n", metadata.entities.join(", ")));
        }
        if !previous_arcs.is_empty() {
            prompt.push_str("\nPREVIOUS CHAPTERS (most recent first):\n");
            for (index, arc) in previous_arcs.iter().enumerate() {
                prompt.push_str(&format!("--- Chapter context {} ---\n{}\n", index + 1, arc));
            }
        }
        prompt.push_str("\nWrite the next chapter now.");
        prompt
    }

    /// Splits the trailing `CLIFFHANGER:` line off the chapter body. A
    /// response without the marker degrades to an empty cliffhanger.
    fn split_cliffhanger(raw: &str) -> ChapterResult {
        let mut lines: Vec<&str> = raw.trim().lines().collect();
        match lines.last() {
            Some(last) if last.trim().starts_with("CLIFFHANGER:") => {
                let cliffhanger = last
                    .trim()
                    .trim_start_matches("CLIFFHANGER:")
                    .trim()
                    .to_string();
                lines.pop();
                ChapterResult {
                    text: lines.join("\n").trim().to_string(),
                    cliffhanger,
                }
            }
            _ => ChapterResult {
                text: raw.trim().to_string(),
                cliffhanger: String::new(),
            },
        }
    }
}

//=========================================================================================
// `ChapterGenerationService` Trait Implementation
//=========================================================================================

#[async_trait]
impl ChapterGenerationService for OpenAiChapterAdapter {
    async fn generate_chapter(
        &self,
        metadata: &StoryMetadata,
        user_id: &str,
        genre: &str,
        previous_arcs: &[String],
    ) -> PortResult<ChapterResult> {
        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(SYSTEM_INSTRUCTIONS)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(Self::build_prompt(metadata, user_id, genre, previous_arcs))
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .n(1)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        // Call the API and manually map the error if it occurs, which respects the orphan rule.
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                PortError::Unexpected("Chapter generation LLM returned no text content.".to_string())
            })?;

        Ok(Self::split_cliffhanger(&content))
    }
}
