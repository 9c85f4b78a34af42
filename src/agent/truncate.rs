//! Tool-result truncation.
//!
//! Bounds the size of any single tool result before it enters the live
//! transcript. Deterministic and stateless: policy in, text out.

use crate::llm::tokens::estimate_text_tokens;
use crate::llm::{ContentPart, MessageContent};

/// Thresholds for tool-result truncation.
#[derive(Debug, Clone)]
pub struct TruncationPolicy {
    /// Above this many characters the raw text is replaced wholesale with an
    /// error message - no truncation is attempted on something this large.
    pub hard_ceiling_chars: usize,
    /// At or below this many estimated tokens the text passes through
    /// unchanged.
    pub pass_through_tokens: usize,
    /// Characters kept from the start when truncating.
    pub head_chars: usize,
    /// Characters kept from the end when truncating.
    pub tail_chars: usize,
    /// Ceiling re-checked on the truncated output. The head/tail windows
    /// stay far under this; it guards against misconfiguration.
    pub truncated_ceiling_chars: usize,
}

impl Default for TruncationPolicy {
    fn default() -> Self {
        Self {
            hard_ceiling_chars: 200_000,
            pass_through_tokens: 24_000,
            head_chars: 20_000,
            tail_chars: 5_000,
            truncated_ceiling_chars: 100_000,
        }
    }
}

impl TruncationPolicy {
    /// Apply the policy to one piece of tool-result text.
    pub fn apply(&self, text: &str) -> String {
        let char_count = text.chars().count();

        if char_count > self.hard_ceiling_chars {
            return format!(
                "[tool result dropped: output was {} characters, above the {}-character limit; \
                 use a more specific query to reduce the output size]",
                char_count, self.hard_ceiling_chars
            );
        }

        if estimate_text_tokens(text) <= self.pass_through_tokens {
            return text.to_string();
        }

        let omitted = char_count.saturating_sub(self.head_chars + self.tail_chars);
        let truncated = format!(
            "{}\n[... {} characters omitted; use a more specific query to see the full output ...]\n{}",
            take_head(text, self.head_chars),
            omitted,
            take_tail(text, self.tail_chars)
        );

        if truncated.chars().count() > self.truncated_ceiling_chars {
            return format!(
                "[tool result dropped: truncated output still exceeded {} characters]",
                self.truncated_ceiling_chars
            );
        }

        truncated
    }

    /// Apply the policy to message content. Text (plain or block) is
    /// rewritten; image parts pass through untouched.
    pub fn apply_content(&self, content: MessageContent) -> MessageContent {
        match content {
            MessageContent::Text(text) => MessageContent::Text(self.apply(&text)),
            MessageContent::Parts(parts) => MessageContent::Parts(
                parts
                    .into_iter()
                    .map(|part| match part {
                        ContentPart::Text { text } => ContentPart::Text {
                            text: self.apply(&text),
                        },
                        other => other,
                    })
                    .collect(),
            ),
        }
    }
}

/// First `n` characters of `text`, on a char boundary.
fn take_head(text: &str, n: usize) -> &str {
    match text.char_indices().nth(n) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Last `n` characters of `text`, on a char boundary.
fn take_tail(text: &str, n: usize) -> &str {
    let char_count = text.chars().count();
    if char_count <= n {
        return text;
    }
    match text.char_indices().nth(char_count - n) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_input_passes_through_byte_identical() {
        let policy = TruncationPolicy::default();
        let text = "a normal sized tool result";
        assert_eq!(policy.apply(text), text);

        // Just under the token threshold (24k tokens ≈ 96k chars)
        let near_limit = "x".repeat(96_000);
        assert_eq!(policy.apply(&near_limit), near_limit);
    }

    #[test]
    fn test_oversized_input_replaced_wholesale() {
        let policy = TruncationPolicy::default();
        let huge = "x".repeat(200_001);
        let out = policy.apply(&huge);
        assert!(out.starts_with("[tool result dropped"));
        assert!(out.len() < 300);
    }

    #[test]
    fn test_head_tail_truncation_keeps_both_ends() {
        let policy = TruncationPolicy::default();
        let text = format!("START{}END", "m".repeat(150_000));
        let out = policy.apply(&text);

        assert!(out.starts_with("START"));
        assert!(out.ends_with("END"));
        assert!(out.contains("characters omitted"));
        assert!(out.chars().count() < text.chars().count());
    }

    #[test]
    fn test_truncation_is_idempotent() {
        let policy = TruncationPolicy::default();
        let text = "y".repeat(150_000);
        let once = policy.apply(&text);
        let twice = policy.apply(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_output_never_exceeds_ceiling() {
        let policy = TruncationPolicy::default();
        for len in [10, 96_000, 120_000, 199_999, 200_001, 500_000] {
            let out = policy.apply(&"z".repeat(len));
            assert!(
                out.chars().count() <= policy.hard_ceiling_chars,
                "output for input length {} exceeded the ceiling",
                len
            );
        }
    }

    #[test]
    fn test_misconfigured_windows_hit_second_ceiling() {
        let policy = TruncationPolicy {
            head_chars: 90_000,
            tail_chars: 90_000,
            truncated_ceiling_chars: 100_000,
            ..TruncationPolicy::default()
        };
        let out = policy.apply(&"w".repeat(190_000));
        assert!(out.starts_with("[tool result dropped"));
    }

    #[test]
    fn test_multibyte_text_respects_char_boundaries() {
        let policy = TruncationPolicy::default();
        let text = "é".repeat(120_000);
        // Must not panic on a char boundary.
        let out = policy.apply(&text);
        assert!(out.contains("characters omitted"));
    }

    #[test]
    fn test_blocks_only_rewrite_text_parts() {
        let policy = TruncationPolicy::default();
        let content = MessageContent::Parts(vec![
            ContentPart::text("t".repeat(150_000)),
            ContentPart::image_url("data:image/png;base64,AAAA"),
        ]);
        let out = policy.apply_content(content);
        match out {
            MessageContent::Parts(parts) => {
                match &parts[0] {
                    ContentPart::Text { text } => assert!(text.contains("characters omitted")),
                    _ => panic!("expected text part"),
                }
                assert_eq!(
                    parts[1],
                    ContentPart::image_url("data:image/png;base64,AAAA")
                );
            }
            _ => panic!("expected parts"),
        }
    }
}
