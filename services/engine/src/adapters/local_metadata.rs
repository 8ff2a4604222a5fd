//! services/engine/src/adapters/local_metadata.rs
//!
//! On-device metadata extraction: a deterministic, lexicon-based analyzer
//! that needs no network. It implements the `MetadataExtractionService` port
//! from the `core` crate and is interchangeable with the remote variant.

use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use storyloom_core::domain::StoryMetadata;
use storyloom_core::ports::{MetadataExtractionService, PortResult};

/// Themes are capped at the five most frequent lemmas.
const MAX_THEMES: usize = 5;

/// Function words filtered out of theme and entity candidates. This stands in
/// for part-of-speech tagging: what survives is predominantly nouns and verbs.
const STOPWORDS: &[&str] = &[
    "a", "about", "after", "again", "all", "also", "am", "an", "and", "any", "are", "as", "at",
    "be", "because", "been", "before", "being", "but", "by", "can", "could", "did", "do", "does",
    "doing", "down", "for", "from", "get", "got", "had", "has", "have", "he", "her", "here",
    "hers", "him", "his", "how", "i", "if", "in", "into", "is", "it", "its", "just", "like",
    "me", "more", "most", "my", "no", "not", "now", "of", "off", "on", "one", "only", "or",
    "other", "our", "out", "over", "she", "so", "some", "such", "than", "that", "the", "their",
    "them", "then", "there", "these", "they", "this", "those", "through", "to", "too", "under",
    "up", "us", "very", "was", "we", "were", "what", "when", "where", "which", "while", "who",
    "why", "will", "with", "would", "you", "your",
];

const POSITIVE_WORDS: &[&str] = &[
    "amazing", "awesome", "best", "brave", "calm", "cool", "excited", "exciting", "fantastic",
    "favorite", "friend", "friends", "fun", "funny", "glad", "good", "great", "happy", "helped",
    "joy", "kind", "laughed", "love", "loved", "nice", "perfect", "proud", "smile", "smiled",
    "wonderful", "won", "yay",
];

const NEGATIVE_WORDS: &[&str] = &[
    "afraid", "angry", "annoyed", "awful", "bad", "bored", "boring", "broke", "cried", "cry",
    "difficult", "failed", "frustrated", "hard", "hate", "hated", "hurt", "lonely", "lost",
    "mad", "mean", "nervous", "sad", "scared", "scary", "sick", "terrible", "tired", "upset",
    "worried", "worst", "wrong",
];

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A local analyzer producing the same `StoryMetadata` shape as the remote
/// extractor, deterministically: the same text always yields the same score,
/// themes, and entities, in the same order.
pub struct LocalMetadataAdapter {
    word_pattern: Regex,
}

impl Default for LocalMetadataAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalMetadataAdapter {
    pub fn new() -> Self {
        Self {
            word_pattern: Regex::new(r"[A-Za-z][A-Za-z']*").unwrap(),
        }
    }

    fn tokenize(&self, text: &str) -> Vec<String> {
        self.word_pattern
            .find_iter(text)
            .map(|m| m.as_str().to_string())
            .collect()
    }

    /// Paragraph-level sentiment in [-1, 1], or None when no lexicon word
    /// appears in the text.
    fn sentiment(tokens: &[String]) -> Option<f64> {
        let mut positive = 0usize;
        let mut negative = 0usize;
        for token in tokens {
            let lower = token.to_lowercase();
            if POSITIVE_WORDS.contains(&lower.as_str()) {
                positive += 1;
            } else if NEGATIVE_WORDS.contains(&lower.as_str()) {
                negative += 1;
            }
        }
        let total = positive + negative;
        if total == 0 {
            return None;
        }
        Some((positive as f64 - negative as f64) / total as f64)
    }

    /// Runs of capitalized tokens are treated as names; multi-word names are
    /// joined, and the result is de-duplicated preserving first appearance.
    fn entities(tokens: &[String]) -> Vec<String> {
        let mut entities: Vec<String> = Vec::new();
        let mut current: Vec<&str> = Vec::new();

        let flush = |current: &mut Vec<&str>, entities: &mut Vec<String>| {
            if !current.is_empty() {
                let joined = current.join(" ");
                if !entities.contains(&joined) {
                    entities.push(joined);
                }
                current.clear();
            }
        };

        for token in tokens {
            let capitalized = token.chars().next().is_some_and(|c| c.is_uppercase());
            let stopword = STOPWORDS.contains(&token.to_lowercase().as_str());
            if capitalized && !stopword {
                current.push(token.as_str());
            } else {
                flush(&mut current, &mut entities);
            }
        }
        flush(&mut current, &mut entities);
        entities
    }

    /// Crude suffix-stripping lemmatizer, first matching rule wins.
    fn lemmatize(word: &str) -> String {
        if let Some(stem) = word.strip_suffix("ies") {
            if stem.len() >= 2 {
                return format!("{stem}y");
            }
        }
        if word.ends_with("sses") {
            return word[..word.len() - 2].to_string();
        }
        if let Some(stem) = word.strip_suffix("ing") {
            if stem.len() >= 3 {
                return Self::undouble(stem);
            }
        }
        if let Some(stem) = word.strip_suffix("ed") {
            if stem.len() >= 3 {
                return Self::undouble(stem);
            }
        }
        if let Some(stem) = word.strip_suffix('s') {
            if stem.len() >= 3 && !stem.ends_with('s') {
                return stem.to_string();
            }
        }
        word.to_string()
    }

    /// "running" and "stopped" leave doubled-consonant stems after suffix
    /// removal; collapse the pair unless it is l, s, or z ("tell", "pass",
    /// "buzz" keep theirs).
    fn undouble(stem: &str) -> String {
        if let [.., a, b] = stem.as_bytes() {
            if a == b && !matches!(*b, b'a' | b'e' | b'i' | b'o' | b'u' | b'l' | b's' | b'z') {
                return stem[..stem.len() - 1].to_string();
            }
        }
        stem.to_string()
    }

    /// Top lemmas by descending frequency; ties keep first-encounter order
    /// (the sort is stable over an encounter-ordered list).
    fn themes(tokens: &[String]) -> Vec<String> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        let mut order: Vec<String> = Vec::new();

        for token in tokens {
            let lower = token.to_lowercase();
            if STOPWORDS.contains(&lower.as_str()) {
                continue;
            }
            let lemma = Self::lemmatize(&lower);
            if lemma.len() <= 2 {
                continue;
            }
            let count = counts.entry(lemma.clone()).or_insert(0);
            if *count == 0 {
                order.push(lemma);
            }
            *count += 1;
        }

        let mut ranked: Vec<(String, usize)> = order
            .into_iter()
            .map(|lemma| {
                let count = counts[&lemma];
                (lemma, count)
            })
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.into_iter().take(MAX_THEMES).map(|(lemma, _)| lemma).collect()
    }
}

//=========================================================================================
// `MetadataExtractionService` Trait Implementation
//=========================================================================================

#[async_trait]
impl MetadataExtractionService for LocalMetadataAdapter {
    /// Never fails: empty or malformed text yields empty metadata.
    async fn extract(&self, text: &str) -> PortResult<StoryMetadata> {
        let tokens = self.tokenize(text);
        let themes = Self::themes(&tokens);
        Ok(StoryMetadata {
            sentiment_score: Self::sentiment(&tokens),
            entities: Self::entities(&tokens),
            key_phrases: themes.clone(),
            themes,
        })
    }
}
