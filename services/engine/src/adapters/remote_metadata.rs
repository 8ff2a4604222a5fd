//! services/engine/src/adapters/remote_metadata.rs
//!
//! This module contains the adapter for the remote metadata-extraction LLM.
//! It implements the `MetadataExtractionService` port from the `core` crate
//! and is contract-compatible with the on-device analyzer.

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
use serde::Deserialize;
use storyloom_core::domain::StoryMetadata;
use storyloom_core::ports::{MetadataExtractionService, PortError, PortResult};

const SYSTEM_INSTRUCTIONS: &str = r#"You extract story metadata from a child's journal entry.

Respond with a single JSON object and nothing else, using exactly these keys:
{
  "sentimentScore": <number between -1.0 and 1.0, or null if the text carries no sentiment>,
  "themes": [<up to 5 short lowercase theme words, most prominent first>],
  "entities": [<named people, places, and organizations, in order of first appearance, no duplicates>],
  "keyPhrases": [<same values as themes>]
}

Do not wrap the JSON in markdown fences. Do not add commentary."#;

/// The JSON shape the model is asked to produce.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtractionResponse {
    sentiment_score: Option<f64>,
    #[serde(default)]
    themes: Vec<String>,
    #[serde(default)]
    entities: Vec<String>,
    #[serde(default)]
    key_phrases: Vec<String>,
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `MetadataExtractionService` using an
/// OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiMetadataAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiMetadataAdapter {
    /// Creates a new `OpenAiMetadataAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }

    /// Models occasionally fence their JSON despite instructions.
    fn strip_fences(raw: &str) -> &str {
        let trimmed = raw.trim();
        let trimmed = trimmed
            .strip_prefix("```json")
            .or_else(|| trimmed.strip_prefix("```"))
            .unwrap_or(trimmed);
        trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
    }

    fn parse(raw: &str) -> PortResult<StoryMetadata> {
        let response: ExtractionResponse = serde_json::from_str(Self::strip_fences(raw))
            .map_err(|e| {
                PortError::Unexpected(format!("malformed metadata response: {e}"))
            })?;

        let mut themes = response.themes;
        themes.truncate(5);
        let key_phrases = if response.key_phrases.is_empty() {
            themes.clone()
        } else {
            response.key_phrases
        };
        Ok(StoryMetadata {
            sentiment_score: response.sentiment_score.map(|s| s.clamp(-1.0, 1.0)),
            themes,
            entities: response.entities,
            key_phrases,
        })
    }
}

//=========================================================================================
// `MetadataExtractionService` Trait Implementation
//=========================================================================================

#[async_trait]
impl MetadataExtractionService for OpenAiMetadataAdapter {
    async fn extract(&self, text: &str) -> PortResult<StoryMetadata> {
        // The contract tolerates empty text without a network round trip.
        if text.trim().is_empty() {
            return Ok(StoryMetadata::default());
        }

        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(SYSTEM_INSTRUCTIONS)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(text.to_string())
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
                PortError::Unexpected(
                    "Metadata extraction LLM returned no text content.".to_string(),
                )
            })?;

        Self::parse(&content)
    }
}
