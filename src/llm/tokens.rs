//! Token estimation and model context-window metadata.
//!
//! Estimates are heuristic (roughly four characters per token) and only used
//! for truncation and summarization triggers, never for billing.

use super::{ChatMessage, MessageContent};

/// Context window to assume when the model id is not recognized.
pub const DEFAULT_CONTEXT_WINDOW: usize = 128_000;

/// Estimate the token count of a piece of text.
pub fn estimate_text_tokens(text: &str) -> usize {
    text.len() / 4
}

/// Estimate the token count of one message, including tool-call payloads.
pub fn estimate_message_tokens(message: &ChatMessage) -> usize {
    let mut chars = 0;

    match &message.content {
        Some(MessageContent::Text(s)) => chars += s.len(),
        Some(MessageContent::Parts(parts)) => {
            for part in parts {
                match part {
                    super::ContentPart::Text { text } => chars += text.len(),
                    // Images are billed in provider-specific units; count a
                    // flat overhead so they are not invisible to the trigger.
                    super::ContentPart::ImageUrl { .. } => chars += 4_000,
                }
            }
        }
        None => {}
    }

    if let Some(calls) = &message.tool_calls {
        for call in calls {
            chars += call.function.name.len() + call.function.arguments.len();
        }
    }

    if let Some(reasoning) = &message.reasoning {
        chars += reasoning.len();
    }

    chars / 4
}

/// Estimate the token count of a whole transcript.
pub fn estimate_transcript_tokens(messages: &[ChatMessage]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Look up the context window for a model id.
///
/// Matches on substrings of the provider-prefixed id (e.g.
/// `anthropic/claude-sonnet-4.5`); unknown models get
/// [`DEFAULT_CONTEXT_WINDOW`].
pub fn context_window(model: &str) -> usize {
    let id = model.to_lowercase();

    if id.contains("gemini") {
        1_000_000
    } else if id.contains("claude") {
        200_000
    } else if id.contains("gpt-4o") || id.contains("gpt-4-turbo") {
        128_000
    } else if id.contains("gpt-5") || id.contains("o3") || id.contains("o4") {
        400_000
    } else if id.contains("deepseek") || id.contains("qwen") {
        131_072
    } else {
        DEFAULT_CONTEXT_WINDOW
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatMessage, ToolCall};

    #[test]
    fn test_text_estimate_is_quarter_of_length() {
        assert_eq!(estimate_text_tokens(""), 0);
        assert_eq!(estimate_text_tokens("abcd"), 1);
        assert_eq!(estimate_text_tokens(&"x".repeat(4000)), 1000);
    }

    #[test]
    fn test_message_estimate_counts_tool_calls() {
        let plain = ChatMessage::user("x".repeat(400));
        assert_eq!(estimate_message_tokens(&plain), 100);

        let mut with_call = ChatMessage::assistant(
            None,
            Some(vec![ToolCall::function("c1", "search", "x".repeat(395))]),
            None,
        );
        // name (6) + arguments (395) ≈ 100 tokens
        assert_eq!(estimate_message_tokens(&with_call), 100);

        with_call.reasoning = Some("y".repeat(400));
        assert_eq!(estimate_message_tokens(&with_call), 200);
    }

    #[test]
    fn test_context_window_lookup() {
        assert_eq!(context_window("anthropic/claude-sonnet-4.5"), 200_000);
        assert_eq!(context_window("google/gemini-2.5-pro"), 1_000_000);
        assert_eq!(context_window("openai/gpt-4o-mini"), 128_000);
        assert_eq!(context_window("some/unknown-model"), DEFAULT_CONTEXT_WINDOW);
    }
}
