//! Free-text consent pattern scanner.
//!
//! Text from every frame is joined with newlines and matched against a
//! table of case-insensitive patterns. Matching itself is a pure function
//! of the text; reading the text is best-effort.

use cmpscan_cdp::{ControlChannel, EvaluateRequest};
use futures::future::join_all;
use indexmap::IndexSet;
use regex::{Regex, RegexBuilder};

use crate::error::{CollectorError, Result, log_channel_error};

/// World used to read frame text without touching page globals.
pub const SCAN_WORLD_NAME: &str = "cmpcollector-scan";

/// Scroll step in pixels.
const SCROLL_STEP_PX: u32 = 200;
/// Upper bound on scroll steps (keeps infinite-scroll pages finite).
const MAX_SCROLL_STEPS: u32 = 250;

const FRAME_TEXT_SCRIPT: &str =
    "document.documentElement ? document.documentElement.innerText : ''";

/// Compiled detection patterns, in table order.
#[derive(Clone, Debug)]
pub struct PatternTable {
    patterns: Vec<(String, Regex)>,
}

/// Matches found in a block of text.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TextMatches {
    /// Source of every pattern that matched at least once.
    pub patterns: Vec<String>,
    /// Distinct matched substrings, truncated, in first-seen order.
    pub snippets: Vec<String>,
}

impl PatternTable {
    /// Compile `sources` case-insensitively.
    pub fn compile<S: AsRef<str>>(sources: &[S]) -> Result<Self> {
        let patterns = sources
            .iter()
            .map(|src| {
                let src = src.as_ref();
                RegexBuilder::new(src)
                    .case_insensitive(true)
                    .build()
                    .map(|re| (src.to_string(), re))
                    .map_err(|source| CollectorError::InvalidPattern {
                        pattern: src.to_string(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Number of patterns.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Whether the table has no patterns.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Match every pattern against `text`.
    pub fn scan(&self, text: &str, snippet_max_len: usize) -> TextMatches {
        let mut patterns = IndexSet::new();
        let mut snippets = IndexSet::new();
        for (source, re) in &self.patterns {
            let mut hit = false;
            for m in re.find_iter(text) {
                hit = true;
                let _ = snippets.insert(truncate_chars(m.as_str(), snippet_max_len));
            }
            if hit {
                let _ = patterns.insert(source.clone());
            }
        }
        TextMatches {
            patterns: patterns.into_iter().collect(),
            snippets: snippets.into_iter().collect(),
        }
    }
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// Read the visible text of every frame, joined with newlines.
///
/// A frame whose text cannot be read contributes an empty string.
pub async fn collect_frame_texts(channel: &dyn ControlChannel) -> String {
    let frames = match channel.frame_ids().await {
        Ok(frames) => frames,
        Err(e) => {
            log_channel_error(&e, "getFrameTree");
            return String::new();
        }
    };
    let texts = join_all(frames.iter().map(|frame| frame_text(channel, frame))).await;
    texts.join("\n")
}

async fn frame_text(channel: &dyn ControlChannel, frame_id: &str) -> String {
    let world = match channel.create_isolated_world(frame_id, SCAN_WORLD_NAME).await {
        Ok(world) => world,
        Err(e) => {
            tracing::warn!(frame_id, error = %e, "error retrieving frame text");
            return String::new();
        }
    };
    let request = EvaluateRequest::new(FRAME_TEXT_SCRIPT)
        .in_context(world)
        .by_value();
    match channel.evaluate(request).await {
        Ok(eval) if !eval.is_exception() => eval.value.as_str().unwrap_or_default().to_string(),
        Ok(eval) => {
            tracing::warn!(frame_id, error = ?eval.exception, "frame text script threw");
            String::new()
        }
        Err(e) => {
            tracing::warn!(frame_id, error = %e, "error retrieving frame text");
            String::new()
        }
    }
}

/// Scroll the main frame to the bottom so lazily rendered banners appear.
pub async fn scroll_to_bottom(channel: &dyn ControlChannel) {
    let script = format!(
        "new Promise(resolve => {{
            let total = 0;
            let steps = 0;
            const timer = setInterval(() => {{
                window.scrollBy(0, {SCROLL_STEP_PX});
                total += {SCROLL_STEP_PX};
                steps += 1;
                const height = document.body ? document.body.scrollHeight : 0;
                if (total >= height || steps >= {MAX_SCROLL_STEPS}) {{
                    clearInterval(timer);
                    resolve(steps);
                }}
            }}, 10);
        }})"
    );
    let request = EvaluateRequest::new(script).by_value().awaiting();
    match channel.evaluate(request).await {
        Ok(eval) if eval.is_exception() => {
            tracing::warn!(error = ?eval.exception, "scroll script threw");
        }
        Ok(eval) => tracing::debug!(steps = %eval.value, "scrolled to bottom"),
        Err(e) => log_channel_error(&e, "scroll"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeChannel;
    use cmpscan_cdp::{ChannelError, Evaluation};
    use cmpscan_settings::DEFAULT_PATTERNS;
    use serde_json::json;

    fn default_table() -> PatternTable {
        PatternTable::compile(DEFAULT_PATTERNS).unwrap()
    }

    #[test]
    fn default_patterns_compile() {
        assert_eq!(default_table().len(), DEFAULT_PATTERNS.len());
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let err = PatternTable::compile(&["ok", "(broken"]).unwrap_err();
        assert!(matches!(err, CollectorError::InvalidPattern { ref pattern, .. } if pattern == "(broken"));
    }

    #[test]
    fn matches_case_insensitively() {
        let found = default_table().scan("Please ACCEPT COOKIES now", 200);
        assert_eq!(found.patterns, vec!["accept cookies".to_string()]);
        assert_eq!(found.snippets, vec!["ACCEPT COOKIES".to_string()]);
    }

    #[test]
    fn pattern_recorded_once_snippets_deduplicated() {
        let table = PatternTable::compile(&["accept all"]).unwrap();
        let found = table.scan("Accept all\nAccept all\naccept all", 200);
        assert_eq!(found.patterns.len(), 1);
        assert_eq!(found.snippets, vec!["Accept all".to_string(), "accept all".to_string()]);
    }

    #[test]
    fn matches_do_not_cross_lines() {
        let table = PatternTable::compile(&["by clicking.*(accept|agree|allow)"]).unwrap();
        assert!(table.scan("By clicking\nyou accept", 200).patterns.is_empty());
        assert_eq!(
            table.scan("By clicking OK you agree", 200).snippets,
            vec!["By clicking OK you agree".to_string()]
        );
    }

    #[test]
    fn snippets_truncate_on_char_boundaries() {
        let table = PatternTable::compile(&["cookies.*"]).unwrap();
        let text = format!("cookies {}", "é".repeat(300));
        let found = table.scan(&text, 10);
        assert_eq!(found.snippets[0].chars().count(), 10);
        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[test]
    fn scanning_is_idempotent() {
        let table = default_table();
        let text = "We use cookies. Accept all. Reject all. Use of cookies.";
        assert_eq!(table.scan(text, 200), table.scan(text, 200));
    }

    #[tokio::test]
    async fn frame_texts_are_joined_and_failures_are_empty() {
        let channel = FakeChannel::new()
            .with_frames(&["main", "gone", "ad"])
            .with_failing_frame("gone", "No frame for given id found")
            .with_responder(|req| match req.context_id.map(|c| c.0) {
                Some(100) => Ok(Evaluation::value(json!("Main text"))),
                Some(101) => Err(ChannelError::Cdp("Target closed.".into())),
                _ => Ok(Evaluation::default()),
            });
        let text = collect_frame_texts(&channel).await;
        assert_eq!(text, "Main text\n\n");
        assert!(channel.worlds.lock().iter().all(|(_, world)| world == SCAN_WORLD_NAME));
    }

    #[tokio::test]
    async fn scroll_failure_is_not_fatal() {
        let channel =
            FakeChannel::new().with_responder(|_| Err(ChannelError::Cdp("Session closed.".into())));
        scroll_to_bottom(&channel).await;
        let sent = channel.requests.lock();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].await_promise);
        assert!(sent[0].context_id.is_none());
    }
}
