//! Context compression via LLM-powered summarization.
//!
//! When the accumulated transcript approaches the model's context budget,
//! an aging prefix is folded into a single running summary while a recent
//! suffix stays verbatim. The rebuilt history is one plain user message:
//! assistant messages that carried tool calls may require provider-specific
//! metadata on replay, and a single user message sidesteps that entirely.

use std::time::Duration;

use tracing::debug;

use crate::llm::tokens::{context_window, estimate_transcript_tokens};
use crate::llm::{ChatMessage, ChatOptions, LlmClient, LlmError, Role};

/// Summarization prompt sent to the LLM.
const SUMMARY_PROMPT: &str = "\
You summarize an agent's working history so it can continue with less context.
Write a dense, factual summary with exactly these sections:

## Task & Goal
What the agent is trying to accomplish.

## Progress
What has been done so far, including tool calls that mattered and their outcomes.

## Current State
Where things stand right now: partial results, open files, known constraints.

## Key Details
Identifiers, paths, values, and decisions that must not be lost.

Do not invent anything. Prefer concrete values over prose.";

/// Tuning knobs for the compressor.
#[derive(Debug, Clone)]
pub struct ResumConfig {
    /// Trailing non-system messages never folded into the summary.
    pub keep_recent: usize,
    /// Fraction of the model's context window that triggers compression.
    pub trigger_ratio: f64,
    /// Model for the summarization call; defaults to the run's model.
    pub summary_model: Option<String>,
    /// Deadline for the summarization call.
    pub summary_timeout: Duration,
    /// Max tokens for the summary response. This cap is also what keeps the
    /// running summary bounded across many compression cycles.
    pub summary_max_tokens: u64,
    /// Character cap on rendered tool-call arguments (summarizer input only).
    pub render_args_limit: usize,
    /// Character cap on rendered tool results (summarizer input only).
    pub render_result_limit: usize,
}

impl Default for ResumConfig {
    fn default() -> Self {
        Self {
            keep_recent: 10,
            trigger_ratio: 0.70,
            summary_model: None,
            summary_timeout: Duration::from_secs(60),
            summary_max_tokens: 2_048,
            render_args_limit: 200,
            render_result_limit: 1_000,
        }
    }
}

/// Stateful per-run context compressor.
pub struct ContextCompressor {
    config: ResumConfig,
    /// Running summary; replaced wholesale on each compression.
    summary: Option<String>,
    /// Non-system messages already folded into the summary. Reset to 0 after
    /// each compression: the rebuilt history itself must stay eligible for
    /// the next fold.
    messages_summarized: usize,
}

impl ContextCompressor {
    pub fn new(config: ResumConfig) -> Self {
        Self {
            config,
            summary: None,
            messages_summarized: 0,
        }
    }

    /// The current running summary, if any.
    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    /// Decide whether the transcript should be compressed before the next
    /// model call.
    ///
    /// Never triggers while the unfolded non-system message count is within
    /// the keep-verbatim window, regardless of token count.
    pub fn should_summarize(&self, messages: &[ChatMessage], model: &str) -> bool {
        let non_system = messages.iter().filter(|m| m.role != Role::System).count();
        if non_system.saturating_sub(self.messages_summarized) <= self.config.keep_recent {
            return false;
        }

        let tokens = estimate_transcript_tokens(messages);
        let budget = (context_window(model) as f64 * self.config.trigger_ratio) as usize;
        tokens > budget
    }

    /// Compress the transcript: fold the aging prefix into the running
    /// summary and rebuild the history as system messages plus one synthetic
    /// user message.
    ///
    /// On failure the caller keeps the uncompressed transcript; compression
    /// is always best-effort.
    pub async fn compress(
        &mut self,
        llm: &dyn LlmClient,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<Vec<ChatMessage>, LlmError> {
        let system: Vec<&ChatMessage> = messages.iter().filter(|m| m.role == Role::System).collect();
        let non_system: Vec<&ChatMessage> =
            messages.iter().filter(|m| m.role != Role::System).collect();

        if non_system.len() <= self.config.keep_recent {
            return Ok(messages.to_vec());
        }

        let cut = safe_cut_index(&non_system, self.config.keep_recent);
        let fold_start = self.messages_summarized.min(cut);
        let fold = &non_system[fold_start..cut];

        if fold.is_empty() {
            debug!("Nothing new to fold; rebuilding from the existing summary");
        } else {
            let rendered = self.render_messages(fold);
            let input = match &self.summary {
                Some(previous) => format!(
                    "## Previous Summary\n{}\n\n## New Messages\n{}",
                    previous, rendered
                ),
                None => format!("## New Messages\n{}", rendered),
            };

            let request = vec![
                ChatMessage::system(SUMMARY_PROMPT),
                ChatMessage::user(input),
            ];
            let options = ChatOptions {
                temperature: Some(0.3),
                max_tokens: Some(self.config.summary_max_tokens),
                timeout: Some(self.config.summary_timeout),
            };
            let summary_model = self.config.summary_model.as_deref().unwrap_or(model);

            let response = llm
                .chat_completion_with_options(summary_model, &request, None, options)
                .await?;

            let text = response
                .content
                .filter(|c| !c.trim().is_empty())
                .ok_or_else(|| {
                    LlmError::empty_response("summarization returned no content".to_string())
                })?;

            debug!(
                "Folded {} message(s) into a {}-char summary",
                fold.len(),
                text.len()
            );
            self.summary = Some(text);
        }

        let recent = &non_system[cut..];
        let combined = format!(
            "## Summary of Previous Work\n{}\n\n## Recent Activity\n{}\n\nContinue from this state.",
            self.summary.as_deref().unwrap_or("(no prior summary)"),
            self.render_messages(recent),
        );

        let mut rebuilt: Vec<ChatMessage> = system.into_iter().cloned().collect();
        rebuilt.push(ChatMessage::user(combined));

        self.messages_summarized = 0;

        Ok(rebuilt)
    }

    /// Render messages to the role-tagged text form fed to the summarizer.
    fn render_messages(&self, messages: &[&ChatMessage]) -> String {
        let mut out = String::new();
        for message in messages {
            match message.role {
                Role::System => {
                    if let Some(text) = message.text_content() {
                        out.push_str(&format!("system: {}\n", text));
                    }
                }
                Role::User => {
                    if let Some(text) = message.text_content() {
                        out.push_str(&format!("user: {}\n", text));
                    }
                }
                Role::Assistant => {
                    if let Some(text) = message.text_content() {
                        if !text.is_empty() {
                            out.push_str(&format!("assistant: {}\n", text));
                        }
                    }
                    if let Some(calls) = &message.tool_calls {
                        for call in calls {
                            out.push_str(&format!(
                                "assistant called {}({})\n",
                                call.function.name,
                                clip(&call.function.arguments, self.config.render_args_limit)
                            ));
                        }
                    }
                }
                Role::Tool => {
                    let name = message.name.as_deref().unwrap_or("tool");
                    let content = message.text_content().unwrap_or("");
                    out.push_str(&format!(
                        "{} returned: {}\n",
                        name,
                        clip(content, self.config.render_result_limit)
                    ));
                }
            }
        }
        out
    }
}

/// Index in `non_system` where the keep-verbatim suffix can begin without
/// splitting an assistant/tool-result pair.
///
/// Starts at `len - keep` and walks backward while the message at the index
/// is a tool result: the suffix must begin with the assistant message that
/// produced it, or later.
pub fn safe_cut_index(non_system: &[&ChatMessage], keep: usize) -> usize {
    let mut cut = non_system.len().saturating_sub(keep);
    while cut > 0 && non_system[cut].role == Role::Tool {
        cut -= 1;
    }
    cut
}

/// Clip text to `limit` characters, noting how much was dropped.
fn clip(text: &str, limit: usize) -> String {
    let char_count = text.chars().count();
    if char_count <= limit {
        return text.to_string();
    }
    let clipped: String = text.chars().take(limit).collect();
    format!("{} [+{} chars]", clipped, char_count - limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatResponse, ToolCall, ToolDefinition};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Mock client returning a fixed summary and counting calls.
    struct MockSummarizer {
        response: Option<String>,
        calls: AtomicUsize,
    }

    impl MockSummarizer {
        fn returning(text: &str) -> Self {
            Self {
                response: Some(text.to_string()),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                response: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmClient for MockSummarizer {
        async fn chat_completion_with_options(
            &self,
            _model: &str,
            _messages: &[ChatMessage],
            _tools: Option<&[ToolDefinition]>,
            _options: ChatOptions,
        ) -> Result<ChatResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.response {
                Some(text) => Ok(ChatResponse {
                    content: Some(text.clone()),
                    tool_calls: None,
                    finish_reason: Some("stop".to_string()),
                    usage: None,
                    model: None,
                    reasoning: None,
                }),
                None => Err(LlmError::server_error(500, "summarizer down".to_string())),
            }
        }
    }

    fn long_user(i: usize) -> ChatMessage {
        ChatMessage::user(format!("message {} {}", i, "x".repeat(4_000)))
    }

    fn transcript(n: usize) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system("You are an agent.")];
        messages.extend((0..n).map(long_user));
        messages
    }

    #[test]
    fn test_never_triggers_within_keep_window() {
        let compressor = ContextCompressor::new(ResumConfig::default());
        // 10 enormous messages: count gate wins regardless of token count
        let messages = transcript(10);
        assert!(!compressor.should_summarize(&messages, "some/unknown-model"));
    }

    #[test]
    fn test_triggers_only_when_both_gates_exceeded() {
        let compressor = ContextCompressor::new(ResumConfig::default());

        // Over the count gate but tiny: no trigger
        let mut small = vec![ChatMessage::system("sys")];
        small.extend((0..30).map(|i| ChatMessage::user(format!("short {}", i))));
        assert!(!compressor.should_summarize(&small, "some/unknown-model"));

        // Over both gates: trigger (128k window * 0.70 = 89.6k tokens;
        // 100 messages * ~1k tokens each)
        let big = transcript(100);
        assert!(compressor.should_summarize(&big, "some/unknown-model"));
    }

    #[test]
    fn test_safe_cut_never_starts_on_tool_message() {
        // 30 non-system messages; 25 is an assistant call, 26 its result
        let mut messages: Vec<ChatMessage> = (0..30).map(|i| ChatMessage::user(format!("m{}", i))).collect();
        messages[25] = ChatMessage::assistant(
            None,
            Some(vec![ToolCall::function("call_25", "search", "{}")]),
            None,
        );
        messages[26] = ChatMessage::tool_result("call_25", "search", "found it");

        let refs: Vec<&ChatMessage> = messages.iter().collect();
        let cut = safe_cut_index(&refs, 10);
        assert!(cut <= 25, "cut index {} would orphan the tool result", cut);
        assert_ne!(cut, 26);
    }

    #[test]
    fn test_safe_cut_walks_past_consecutive_tool_results() {
        let mut messages: Vec<ChatMessage> = (0..12).map(|i| ChatMessage::user(format!("m{}", i))).collect();
        messages[1] = ChatMessage::assistant(
            None,
            Some(vec![
                ToolCall::function("a", "read", "{}"),
                ToolCall::function("b", "read", "{}"),
            ]),
            None,
        );
        messages[2] = ChatMessage::tool_result("a", "read", "one");
        messages[3] = ChatMessage::tool_result("b", "read", "two");

        let refs: Vec<&ChatMessage> = messages.iter().collect();
        // len 12 - keep 10 = 2, which is a tool result; walk back to 1
        assert_eq!(safe_cut_index(&refs, 10), 1);
    }

    #[tokio::test]
    async fn test_compress_rebuilds_single_user_message() {
        let llm = MockSummarizer::returning("SUMMARY OF OLD WORK");
        let mut compressor = ContextCompressor::new(ResumConfig::default());

        let messages = transcript(15);
        let rebuilt = compressor.compress(&llm, "test/model", &messages).await.unwrap();

        // system + exactly one synthetic user message
        assert_eq!(rebuilt.len(), 2);
        assert_eq!(rebuilt[0].role, Role::System);
        assert_eq!(rebuilt[1].role, Role::User);

        let combined = rebuilt[1].text_content().unwrap();
        assert!(combined.contains("Summary of Previous Work"));
        assert!(combined.contains("SUMMARY OF OLD WORK"));
        assert!(combined.contains("Recent Activity"));
        assert!(combined.contains("Continue from this state."));

        // No tool-role message can survive the rebuild
        assert!(rebuilt.iter().all(|m| m.role != Role::Tool));

        assert_eq!(llm.call_count(), 1);
        assert_eq!(compressor.summary(), Some("SUMMARY OF OLD WORK"));
    }

    #[tokio::test]
    async fn test_compress_skips_llm_when_nothing_new_to_fold() {
        let llm = MockSummarizer::returning("unused");
        let mut compressor = ContextCompressor::new(ResumConfig::default());

        // 12 non-system messages where the cut walks back to 0: index 1 is a
        // tool result chain reaching the start.
        let mut messages = vec![ChatMessage::system("sys")];
        let mut body: Vec<ChatMessage> = (0..12).map(|i| ChatMessage::user(format!("m{}", i))).collect();
        body[0] = ChatMessage::assistant(
            None,
            Some(vec![
                ToolCall::function("a", "read", "{}"),
                ToolCall::function("b", "read", "{}"),
            ]),
            None,
        );
        body[1] = ChatMessage::tool_result("a", "read", "one");
        body[2] = ChatMessage::tool_result("b", "read", "two");
        messages.extend(body);

        let rebuilt = compressor.compress(&llm, "test/model", &messages).await.unwrap();
        assert_eq!(llm.call_count(), 0);
        assert_eq!(rebuilt.len(), 2);
        assert!(rebuilt[1]
            .text_content()
            .unwrap()
            .contains("(no prior summary)"));
    }

    #[tokio::test]
    async fn test_compress_failure_leaves_state_untouched() {
        let llm = MockSummarizer::failing();
        let mut compressor = ContextCompressor::new(ResumConfig::default());

        let messages = transcript(15);
        let result = compressor.compress(&llm, "test/model", &messages).await;
        assert!(result.is_err());
        assert!(compressor.summary().is_none());
    }

    #[tokio::test]
    async fn test_second_compression_folds_the_synthetic_message() {
        let llm = MockSummarizer::returning("FRESH SYNTHESIS");
        let mut compressor = ContextCompressor::new(ResumConfig::default());

        let rebuilt = compressor
            .compress(&llm, "test/model", &transcript(15))
            .await
            .unwrap();
        assert_eq!(rebuilt.len(), 2);

        // Grow the rebuilt transcript past the keep window again
        let mut grown = rebuilt;
        grown.extend((0..12).map(long_user));

        let rebuilt_again = compressor.compress(&llm, "test/model", &grown).await.unwrap();
        assert_eq!(rebuilt_again.len(), 2);
        // Two LLM calls total: the synthetic message was folded the second time
        assert_eq!(llm.call_count(), 2);
    }
}
