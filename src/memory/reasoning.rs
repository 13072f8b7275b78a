//! Pluggable reasoning backends for automatic fact extraction
//!
//! The `ReasoningBackend` trait is the seam to whatever judges which parts
//! of a conversational turn are durable facts about the user.
//!
//! ```text
//! (user message, assistant reply, existing memories)
//!         │
//!         ▼
//!   ReasoningBackend::infer ──► Vec<CandidateFact>   (unvalidated)
//!         │
//!         ▼
//!   FactExtractor coerces category / content / importance
//! ```
//!
//! Backends return raw candidates; validation and coercion into the closed
//! category set happen in the extractor, so a backend never has to be
//! trusted to produce well-formed output.

use super::item::MemoryItem;
use super::merge::normalize;
use crate::config::ReasoningConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// A raw fact proposed by a reasoning backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateFact {
    /// Free-form category label, coerced later
    #[serde(default)]
    pub category: String,
    /// Fact text
    pub content: String,
    /// Importance hint, clamped later
    #[serde(default, alias = "importanceHint", alias = "importance_hint")]
    pub importance: Option<i64>,
}

impl CandidateFact {
    /// Create a candidate
    pub fn new(
        category: impl Into<String>,
        content: impl Into<String>,
        importance: Option<i64>,
    ) -> Self {
        Self {
            category: category.into(),
            content: content.into(),
            importance,
        }
    }
}

/// One conversational turn handed to a backend.
#[derive(Debug, Clone, Copy)]
pub struct InferenceRequest<'a> {
    /// What the user said
    pub user_message: &'a str,
    /// What the assistant answered
    pub assistant_reply: &'a str,
    /// Memories already stored for this user
    pub existing: &'a [MemoryItem],
}

/// Reasoning backend interface.
#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    /// Propose candidate facts about the user from one turn.
    async fn infer(&self, request: &InferenceRequest<'_>) -> Result<Vec<CandidateFact>>;

    /// Human-readable name for logs.
    fn name(&self) -> &str;
}

/// Backend that never proposes anything.
pub struct DisabledReasoner;

#[async_trait]
impl ReasoningBackend for DisabledReasoner {
    async fn infer(&self, _request: &InferenceRequest<'_>) -> Result<Vec<CandidateFact>> {
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        "disabled"
    }
}

// ---------------------------------------------------------------------------
// Heuristic backend
// ---------------------------------------------------------------------------

struct FactPattern {
    name: &'static str,
    pattern: Regex,
    category: &'static str,
    importance: i64,
}

/// Deterministic, offline backend that recognises common first-person
/// disclosures in the user's message (names, preferences, projects,
/// locations, occupations and dietary or health constraints).
pub struct HeuristicReasoner {
    patterns: Vec<FactPattern>,
}

const FACT_PATTERNS: &[(&str, &str, &str, i64)] = &[
    (
        "name",
        r"(?i)\b(?:my name is|call me|i am called|i['’]m called)\s+\S+",
        "personal",
        4,
    ),
    (
        "location",
        r"(?i)\b(?:i live in|i['’]m based in|i am based in|i['’]m from|i am from)\s+\S+",
        "personal",
        3,
    ),
    (
        "occupation",
        r"(?i)\b(?:i work (?:as|at|for)|my job is|i['’]m employed at)\s+\S+",
        "personal",
        3,
    ),
    (
        "preference",
        r"(?i)\bi (?:really |much |generally )?(?:prefer|like|love|enjoy|hate|dislike|can['’]t stand)\s+\S+",
        "preference",
        3,
    ),
    (
        "favourite",
        r"(?i)\bmy favou?rite\s+\S+\s+(?:is|are)\s+\S+",
        "preference",
        3,
    ),
    (
        "project",
        r"(?i)\b(?:i['’]m|i am) (?:currently )?(?:working on|building|writing|developing|learning|studying)\s+\S+",
        "fact",
        3,
    ),
    (
        "constraint",
        r"(?i)\b(?:(?:i['’]m|i am) (?:allergic to|vegan|vegetarian|lactose intolerant|diabetic)|i (?:can['’]t|cannot|don['’]t) eat\s+\S+)",
        "fact",
        4,
    ),
];

impl HeuristicReasoner {
    /// Create a reasoner with the built-in fact patterns
    pub fn new() -> Self {
        let patterns = FACT_PATTERNS
            .iter()
            .filter_map(|&(name, pattern, category, importance)| {
                Regex::new(pattern).ok().map(|pattern| FactPattern {
                    name,
                    pattern,
                    category,
                    importance,
                })
            })
            .collect();
        Self { patterns }
    }

    /// Extract candidates from a single utterance
    pub fn scan(&self, text: &str, existing: &[MemoryItem]) -> Vec<CandidateFact> {
        let known: HashSet<String> = existing.iter().map(|m| normalize(&m.content)).collect();
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        for sentence in split_sentences(text) {
            if sentence.ends_with('?') {
                continue;
            }
            for fp in &self.patterns {
                let Some(m) = fp.pattern.find(sentence) else {
                    continue;
                };
                // The fact runs from the cue to the end of the sentence.
                let content = sentence[m.start()..]
                    .trim_end_matches(['.', '!', ';'])
                    .trim();
                let key = normalize(content);
                if key.is_empty() || known.contains(&key) || !seen.insert(key) {
                    continue;
                }
                tracing::debug!(pattern = fp.name, "Heuristic fact candidate");
                candidates.push(CandidateFact::new(
                    fp.category,
                    capitalize_first(content),
                    Some(fp.importance),
                ));
            }
        }

        candidates
    }
}

impl Default for HeuristicReasoner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReasoningBackend for HeuristicReasoner {
    async fn infer(&self, request: &InferenceRequest<'_>) -> Result<Vec<CandidateFact>> {
        Ok(self.scan(request.user_message, request.existing))
    }

    fn name(&self) -> &str {
        "heuristic"
    }
}

/// Split on sentence terminators, keeping a trailing '?' so questions can
/// be skipped. A '.' only ends a sentence when followed by whitespace or
/// the end of the text, so "example.com" and "3.5" stay whole.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((idx, ch)) = chars.next() {
        let terminal = match ch {
            '.' => chars.peek().map_or(true, |&(_, next)| next.is_whitespace()),
            '!' | '?' | '\n' | ';' => true,
            _ => false,
        };
        if terminal {
            let end = idx + ch.len_utf8();
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = end;
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

fn capitalize_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ---------------------------------------------------------------------------
// LLM backend
// ---------------------------------------------------------------------------

/// Backend that asks a `generateContent`-style language model endpoint to
/// list durable facts as a JSON array.
pub struct LlmReasoner {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl LlmReasoner {
    /// Create a reasoner for an endpoint, model and key
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
        })
    }

    /// Create from configuration, reading the API key from the environment
    pub fn from_config(config: &ReasoningConfig) -> Result<Self> {
        let api_key = config.resolve_api_key().ok_or_else(|| {
            Error::Config(format!(
                "reasoning backend 'llm' requires ${} to be set",
                config.api_key_env
            ))
        })?;
        Self::new(
            config.endpoint.clone(),
            config.model.clone(),
            api_key,
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// Request URL. The API key travels in the `x-goog-api-key` header, so
    /// the URL is safe to appear in errors and logs.
    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }
}

/// Transport errors carry the request URL; strip it before it reaches logs.
fn transport_error(e: reqwest::Error) -> Error {
    Error::Http(e.without_url())
}

#[async_trait]
impl ReasoningBackend for LlmReasoner {
    async fn infer(&self, request: &InferenceRequest<'_>) -> Result<Vec<CandidateFact>> {
        let payload = serde_json::json!({
            "contents": [
                { "role": "user", "parts": [{ "text": build_extraction_prompt(request) }] }
            ],
            "generationConfig": {
                "temperature": 0.2,
                "maxOutputTokens": 512,
            },
        });

        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", self.api_key.as_str())
            .json(&payload)
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(Error::ExtractionUnavailable(format!(
                "reasoning endpoint returned {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response.json().await.map_err(transport_error)?;
        let text = body
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                Error::ExtractionUnavailable("reasoning response had no text".to_string())
            })?;

        parse_candidates(text)
    }

    fn name(&self) -> &str {
        "llm"
    }
}

/// Build the extraction prompt for one turn.
pub fn build_extraction_prompt(request: &InferenceRequest<'_>) -> String {
    let known = if request.existing.is_empty() {
        "(none)".to_string()
    } else {
        request
            .existing
            .iter()
            .map(|m| format!("- [{}] {}", m.category, m.content))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "Extract durable facts about the USER from this exchange: their name, \
stated preferences, ongoing projects, and constraints. Skip anything already known, \
anything about the assistant, and small talk.\n\n\
Known facts:\n{known}\n\n\
User: {}\nAssistant: {}\n\n\
Answer with a JSON array only. Each element: \
{{\"category\": one of \"personal\"|\"preference\"|\"fact\"|\"instruction\"|\"other\", \
\"content\": one short sentence, \"importance\": 1-5}}. \
Answer [] if there is nothing new.",
        request.user_message, request.assistant_reply
    )
}

/// Pull a JSON array of candidates out of free text.
///
/// Elements that do not deserialize as a `CandidateFact` are dropped; a
/// reply with no parsable array at all is an extraction failure.
pub fn parse_candidates(text: &str) -> Result<Vec<CandidateFact>> {
    let (start, end) = match (text.find('['), text.rfind(']')) {
        (Some(start), Some(end)) if start < end => (start, end),
        _ => {
            return Err(Error::ExtractionUnavailable(
                "reasoning reply contained no JSON array".to_string(),
            ))
        }
    };

    let values: Vec<serde_json::Value> = serde_json::from_str(&text[start..=end])
        .map_err(|e| Error::ExtractionUnavailable(format!("malformed reasoning reply: {e}")))?;

    let total = values.len();
    let candidates: Vec<CandidateFact> = values
        .into_iter()
        .filter_map(|v| serde_json::from_value(v).ok())
        .collect();

    if candidates.len() < total {
        tracing::debug!(
            dropped = total - candidates.len(),
            "Dropped malformed reasoning candidates"
        );
    }
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::item::{MemoryCategory, MemoryItemBuilder};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    fn request<'a>(user: &'a str, existing: &'a [MemoryItem]) -> InferenceRequest<'a> {
        InferenceRequest {
            user_message: user,
            assistant_reply: "Got it!",
            existing,
        }
    }

    #[tokio::test]
    async fn test_disabled_reasoner() {
        let facts = DisabledReasoner
            .infer(&request("My name is Ada", &[]))
            .await
            .unwrap();
        assert!(facts.is_empty());
        assert_eq!(DisabledReasoner.name(), "disabled");
    }

    #[tokio::test]
    async fn test_heuristic_name_and_preference() {
        let reasoner = HeuristicReasoner::new();
        let facts = reasoner
            .infer(&request(
                "Hi! My name is Ada. I really prefer tabs over spaces.",
                &[],
            ))
            .await
            .unwrap();

        assert_eq!(facts.len(), 2);
        assert_eq!(facts[0].category, "personal");
        assert_eq!(facts[0].content, "My name is Ada");
        assert_eq!(facts[0].importance, Some(4));
        assert_eq!(facts[1].category, "preference");
        assert_eq!(facts[1].content, "I really prefer tabs over spaces");
    }

    #[test]
    fn test_heuristic_project_and_constraint() {
        let reasoner = HeuristicReasoner::new();
        let facts = reasoner.scan(
            "I'm building a compiler in Rust; also I'm allergic to peanuts",
            &[],
        );

        let categories: Vec<&str> = facts.iter().map(|f| f.category.as_str()).collect();
        assert_eq!(categories, vec!["fact", "fact"]);
        assert_eq!(facts[0].content, "I'm building a compiler in Rust");
        assert_eq!(facts[1].content, "I'm allergic to peanuts");
    }

    #[test]
    fn test_heuristic_skips_questions_and_small_talk() {
        let reasoner = HeuristicReasoner::new();
        assert!(reasoner.scan("Do I like pizza?", &[]).is_empty());
        assert!(reasoner.scan("What's the weather like today", &[]).is_empty());
    }

    #[test]
    fn test_heuristic_skips_known_facts() {
        let existing = vec![MemoryItemBuilder::new(MemoryCategory::Personal)
            .content("My name is Ada")
            .build()
            .unwrap()];
        let reasoner = HeuristicReasoner::new();
        assert!(reasoner.scan("my name is ada.", &existing).is_empty());
    }

    #[test]
    fn test_split_sentences() {
        assert_eq!(
            split_sentences("One. Two? Three"),
            vec!["One.", "Two?", "Three"]
        );
        assert!(split_sentences("  ").is_empty());
        assert_eq!(
            split_sentences("I work at example.com now. Version 3.5 is out"),
            vec!["I work at example.com now.", "Version 3.5 is out"]
        );
    }

    #[test]
    fn test_heuristic_keeps_dotted_words() {
        let facts = HeuristicReasoner::new().scan("I work at example.com now", &[]);
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].content, "I work at example.com now");
    }

    #[test]
    fn test_parse_candidates_from_fenced_reply() {
        let text = "Here you go:\n```json\n\
            [{\"category\":\"preference\",\"content\":\"Likes green tea\",\"importance\":3}]\n```";
        let facts = parse_candidates(text).unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].content, "Likes green tea");
        assert_eq!(facts[0].importance, Some(3));
    }

    #[test]
    fn test_parse_candidates_drops_malformed_elements() {
        let text = r#"[{"category":"fact","content":"Runs marathons"}, 42, {"category":"fact"}]"#;
        let facts = parse_candidates(text).unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].importance, None);
    }

    #[test]
    fn test_parse_candidates_importance_hint_alias() {
        let text = r#"[{"category":"fact","content":"Has two cats","importanceHint":2}]"#;
        let facts = parse_candidates(text).unwrap();
        assert_eq!(facts[0].importance, Some(2));
    }

    #[test]
    fn test_parse_candidates_no_array() {
        assert!(matches!(
            parse_candidates("Nothing new to remember."),
            Err(Error::ExtractionUnavailable(_))
        ));
        assert!(matches!(
            parse_candidates("[not json]"),
            Err(Error::ExtractionUnavailable(_))
        ));
    }

    #[test]
    fn test_parse_candidates_empty_array() {
        assert!(parse_candidates("[]").unwrap().is_empty());
    }

    #[test]
    fn test_extraction_prompt_lists_known_facts() {
        let existing = vec![MemoryItemBuilder::new(MemoryCategory::Preference)
            .content("Prefers dark mode")
            .build()
            .unwrap()];
        let prompt = build_extraction_prompt(&request("I use Linux", &existing));
        assert!(prompt.contains("- [preference] Prefers dark mode"));
        assert!(prompt.contains("User: I use Linux"));
        assert!(prompt.contains("Assistant: Got it!"));
    }

    #[test]
    fn test_llm_reasoner_url() {
        let reasoner = LlmReasoner::new(
            "https://example.invalid/v1beta/",
            "gemini-2.0-flash",
            "k",
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(
            reasoner.url(),
            "https://example.invalid/v1beta/models/gemini-2.0-flash:generateContent"
        );
        assert_eq!(reasoner.name(), "llm");
    }

    /// Accept one HTTP request on a loopback port, answer it, and hand back
    /// the raw request head.
    async fn serve_once(
        status: &'static str,
        body: &'static str,
    ) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            let head_end = loop {
                let n = socket.read(&mut chunk).await.unwrap();
                assert!(n > 0, "connection closed before headers");
                buf.extend_from_slice(&chunk[..n]);
                if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };
            let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
            let content_length = head
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            while buf.len() < head_end + content_length {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }

            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\n\
                 content-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            head
        });

        (endpoint, handle)
    }

    fn reasoner_for(endpoint: &str, key: &str) -> LlmReasoner {
        LlmReasoner::new(endpoint, "test-model", key, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_llm_reasoner_sends_key_in_header() {
        let (endpoint, server) = serve_once(
            "200 OK",
            r#"{"candidates":[{"content":{"parts":[{"text":"[{\"category\":\"fact\",\"content\":\"Keeps bees\",\"importance\":2}]"}]}}]}"#,
        )
        .await;

        let facts = reasoner_for(&endpoint, "secret-key-123")
            .infer(&request("I keep bees", &[]))
            .await
            .unwrap();
        assert_eq!(facts, vec![CandidateFact::new("fact", "Keeps bees", Some(2))]);

        let head = server.await.unwrap();
        let request_line = head.lines().next().unwrap();
        assert_eq!(request_line, "POST /models/test-model:generateContent HTTP/1.1");
        assert!(head.to_lowercase().contains("x-goog-api-key: secret-key-123"));
    }

    #[tokio::test]
    async fn test_llm_reasoner_non_success_status() {
        let (endpoint, server) = serve_once("503 Service Unavailable", "{}").await;

        let err = reasoner_for(&endpoint, "secret-key-123")
            .infer(&request("hello", &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ExtractionUnavailable(_)));
        assert!(err.to_string().contains("503"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_llm_reasoner_reply_without_text() {
        let (endpoint, server) = serve_once("200 OK", r#"{"candidates":[]}"#).await;

        let err = reasoner_for(&endpoint, "secret-key-123")
            .infer(&request("hello", &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ExtractionUnavailable(_)));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_llm_reasoner_transport_error_hides_key() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let err = reasoner_for(&endpoint, "SUPERSECRETKEY")
            .infer(&request("hello", &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Http(_)));
        assert!(!err.to_string().contains("SUPERSECRETKEY"));
        assert!(!format!("{err:?}").contains("SUPERSECRETKEY"));
    }
}
