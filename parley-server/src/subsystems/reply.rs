//! Grounded reply generation.
//!
//! Renders retrieved matches into a numbered snippet block, calls the
//! generation backend once and guarantees a non-empty, user-safe reply.

use std::cmp::Ordering;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;

use parley_core::generation::GenerationBackend;
use parley_core::models::KnowledgeMatch;

/// Sent when the generation call fails (network, timeout, non-2xx, blocked).
pub const GENERATION_ERROR_REPLY: &str =
    "Sorry, I'm having trouble answering right now. Please try again in a few minutes.";

/// Sent when the model answers with nothing.
pub const REPHRASE_REPLY: &str =
    "Sorry, I didn't quite get that. Could you rephrase your question?";

const NO_SNIPPETS_NOTE: &str = "No knowledge snippets were found for this message. \
Answer from general knowledge, staying relevant to this business and its customers. \
If you are unsure, say so and offer to put the customer in touch with a person.";

#[derive(Debug, Clone, PartialEq)]
pub enum ReplyOutcome {
    /// Text came from the model.
    Generated { model: String, latency_ms: i64 },
    /// The model answered with an empty string.
    Empty { model: String },
    /// The call failed; the reason is for logs only.
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub text: String,
    pub outcome: ReplyOutcome,
}

impl Reply {
    /// True only when the text sent to the user was produced by the model.
    pub fn ai_used(&self) -> bool {
        matches!(self.outcome, ReplyOutcome::Generated { .. })
    }

    pub fn model(&self) -> Option<&str> {
        match &self.outcome {
            ReplyOutcome::Generated { model, .. } => Some(model),
            _ => None,
        }
    }
}

pub struct ReplyGenerator {
    backend: Arc<dyn GenerationBackend>,
    system_prompt: String,
    max_snippets: usize,
}

impl ReplyGenerator {
    pub fn new(backend: Arc<dyn GenerationBackend>, system_prompt: String, max_snippets: usize) -> Self {
        Self {
            backend,
            system_prompt,
            max_snippets,
        }
    }

    /// Reply text only. Never empty.
    pub async fn generate_reply(&self, user_message: &str, matches: &[KnowledgeMatch]) -> String {
        self.generate(user_message, matches).await.text
    }

    pub async fn generate(&self, user_message: &str, matches: &[KnowledgeMatch]) -> Reply {
        let prompt = build_prompt(user_message, matches, self.max_snippets);
        let model = self.backend.model().to_string();
        let start = Instant::now();

        match self.backend.generate(&self.system_prompt, &prompt).await {
            Ok(text) if !text.trim().is_empty() => {
                let latency_ms = start.elapsed().as_millis() as i64;
                tracing::debug!(model = %model, latency_ms = latency_ms, snippets = matches.len(), "Reply generated");
                Reply {
                    text: text.trim().to_string(),
                    outcome: ReplyOutcome::Generated { model, latency_ms },
                }
            }
            Ok(_) => {
                tracing::warn!(model = %model, "Generation returned empty text");
                Reply {
                    text: REPHRASE_REPLY.to_string(),
                    outcome: ReplyOutcome::Empty { model },
                }
            }
            Err(e) => {
                tracing::error!(model = %model, error = %e, "Generation failed");
                Reply {
                    text: GENERATION_ERROR_REPLY.to_string(),
                    outcome: ReplyOutcome::Failed {
                        reason: e.to_string(),
                    },
                }
            }
        }
    }
}

/// User turn sent to the model: the customer's message plus up to
/// `max_snippets` matches, highest score first.
pub fn build_prompt(user_message: &str, matches: &[KnowledgeMatch], max_snippets: usize) -> String {
    let mut ranked: Vec<&KnowledgeMatch> = matches.iter().collect();
    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    ranked.truncate(max_snippets);

    let mut prompt = String::new();
    let _ = writeln!(prompt, "Customer message:\n{}\n", user_message.trim());

    if ranked.is_empty() {
        prompt.push_str(NO_SNIPPETS_NOTE);
        return prompt;
    }

    prompt.push_str("Knowledge snippets (most relevant first):\n");
    for (i, m) in ranked.iter().enumerate() {
        let title = if m.title.trim().is_empty() { "Untitled" } else { m.title.trim() };
        let _ = writeln!(prompt, "\n[{}] {} (score {:.2})\n{}", i + 1, title, m.score, m.text.trim());
    }
    prompt.push_str("\nAnswer the customer using the snippets above when they are relevant.");
    prompt
}
