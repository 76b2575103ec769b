//! Re-chunks model text into word or line sized fragments with a small delay
//! between them, so clients render steady output regardless of how the
//! provider batched its deltas.
use std::time::Duration;

use async_stream::stream;
use futures::{Stream, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::providers::{GenerationChunk, ProviderError};

static WORD_BOUNDARY: Lazy<Regex> = Lazy::new(|| Regex::new(r"\S+\s+").expect("valid regex"));
static LINE_BOUNDARY: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n+").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chunking {
    #[default]
    Word,
    Line,
}

impl Chunking {
    fn pattern(&self) -> &'static Regex {
        match self {
            Chunking::Word => &WORD_BOUNDARY,
            Chunking::Line => &LINE_BOUNDARY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmoothingConfig {
    pub chunking: Chunking,
    pub delay: Duration,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            chunking: Chunking::Word,
            delay: Duration::from_millis(10),
        }
    }
}

/// Split off everything up to and including the first boundary match.
fn take_fragment(buffer: &mut String, pattern: &Regex) -> Option<String> {
    let end = pattern.find(buffer)?.end();
    let rest = buffer.split_off(end);
    Some(std::mem::replace(buffer, rest))
}

/// Wrap a generation stream so text deltas leave it one fragment at a time.
///
/// Reasoning, tool calls and finish markers pass through unchanged, but any text
/// still buffered is flushed first so ordering is preserved. The concatenation
/// of emitted text equals the concatenation of input text.
pub fn smooth_stream<S>(
    input: S,
    config: SmoothingConfig,
) -> impl Stream<Item = Result<GenerationChunk, ProviderError>> + Send
where
    S: Stream<Item = Result<GenerationChunk, ProviderError>> + Send + 'static,
{
    let pattern = config.chunking.pattern();
    let delay = config.delay;

    stream! {
        let mut buffer = String::new();
        let mut input = Box::pin(input);

        while let Some(item) = input.next().await {
            match item {
                Ok(GenerationChunk::TextDelta(text)) => {
                    buffer.push_str(&text);
                    while let Some(fragment) = take_fragment(&mut buffer, pattern) {
                        yield Ok(GenerationChunk::TextDelta(fragment));
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
                other => {
                    if !buffer.is_empty() {
                        yield Ok(GenerationChunk::TextDelta(std::mem::take(&mut buffer)));
                    }
                    yield other;
                }
            }
        }

        if !buffer.is_empty() {
            yield Ok(GenerationChunk::TextDelta(buffer));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{FinishReason, Usage};
    use futures::stream;
    use tokio::time::Instant;

    fn text(s: &str) -> Result<GenerationChunk, ProviderError> {
        Ok(GenerationChunk::TextDelta(s.to_string()))
    }

    async fn run(
        input: Vec<Result<GenerationChunk, ProviderError>>,
        config: SmoothingConfig,
    ) -> Vec<Result<GenerationChunk, ProviderError>> {
        smooth_stream(stream::iter(input), config).collect().await
    }

    fn texts(items: &[Result<GenerationChunk, ProviderError>]) -> Vec<String> {
        items
            .iter()
            .filter_map(|item| match item {
                Ok(GenerationChunk::TextDelta(t)) => Some(t.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_line_chunking_splits_on_newlines() {
        let config = SmoothingConfig {
            chunking: Chunking::Line,
            delay: Duration::from_millis(5),
        };
        let output = run(vec![text("first li"), text("ne\nsecond\n\nthi"), text("rd")], config).await;
        assert_eq!(texts(&output), vec!["first line\n", "second\n\n", "third"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_word_chunking_preserves_text() {
        let input = "The quick  brown fox\tjumps";
        let output = run(vec![text("The qu"), text("ick  brown fox\tjumps")], SmoothingConfig::default()).await;
        let fragments = texts(&output);
        assert_eq!(fragments, vec!["The ", "quick  ", "brown ", "fox\t", "jumps"]);
        assert_eq!(fragments.concat(), input);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_between_fragments() {
        let config = SmoothingConfig {
            chunking: Chunking::Line,
            delay: Duration::from_millis(5),
        };
        let start = Instant::now();
        run(vec![text("a\nb\nc\n")], config).await;
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flushes_before_tool_call_and_finish() {
        let call = GenerationChunk::ToolCall(crate::message::ToolCallRequest {
            id: "c1".to_string(),
            name: "search".to_string(),
            arguments: serde_json::json!({}),
        });
        let finish = GenerationChunk::Finish {
            reason: FinishReason::ToolCalls,
            usage: Usage::default(),
        };
        let config = SmoothingConfig {
            chunking: Chunking::Line,
            delay: Duration::ZERO,
        };
        let output = run(vec![text("no newline yet"), Ok(call.clone()), Ok(finish.clone())], config).await;
        assert_eq!(
            output,
            vec![text("no newline yet"), Ok(call), Ok(finish)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_passes_through_after_buffered_text() {
        let config = SmoothingConfig {
            chunking: Chunking::Line,
            delay: Duration::ZERO,
        };
        let error = ProviderError::ServerError("upstream died".to_string());
        let output = run(vec![text("done\npartial"), Err(error.clone())], config).await;
        assert_eq!(output, vec![text("done\n"), text("partial"), Err(error)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reasoning_is_not_chunked() {
        let output = run(
            vec![Ok(GenerationChunk::ReasoningDelta("thinking about it".to_string()))],
            SmoothingConfig::default(),
        )
        .await;
        assert_eq!(
            output,
            vec![Ok(GenerationChunk::ReasoningDelta("thinking about it".to_string()))]
        );
    }
}
