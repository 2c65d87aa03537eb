//! Prompt detection for the interactive TQL shell.
//!
//! TQL prints no framing around responses. The only completion signal is
//! the prompt that follows the output: `TQL [database=<name>]> ` when the shell
//! is idle, or the continuation marker (`$> `) while a statement is still
//! open. [`ReadCycle`] accumulates the text of one response and scans it
//! incrementally for those markers.

use std::fmt;

use regex::Regex;

use crate::config::RemoteConfig;
use crate::error::TqlError;

/// Prompt state of the shell after the most recent response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PromptKind {
    /// No prompt observed yet
    #[default]
    None,
    /// Idle at top level, scoped to the named database
    Ready(String),
    /// Waiting for the rest of a multi-line statement
    Partial,
}

/// Session state shown to a human.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionState {
    kind: PromptKind,
}

impl SessionState {
    pub fn kind(&self) -> &PromptKind {
        &self.kind
    }

    pub(crate) fn set_kind(&mut self, kind: PromptKind) {
        self.kind = kind;
    }

    /// Active database, if a ready prompt has been seen.
    pub fn database(&self) -> Option<&str> {
        match &self.kind {
            PromptKind::Ready(database) => Some(database),
            _ => None,
        }
    }

    pub fn prompt_text(&self) -> String {
        match &self.kind {
            PromptKind::Partial => "$> ".to_string(),
            PromptKind::Ready(database) => format!("rtql [database=({database})] > "),
            PromptKind::None => "rtql [database=(none)] > ".to_string(),
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prompt_text())
    }
}

/// How a response ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Ready { database: String },
    Partial,
}

impl Completion {
    pub fn prompt_kind(&self) -> PromptKind {
        match self {
            Completion::Ready { database } => PromptKind::Ready(database.clone()),
            Completion::Partial => PromptKind::Partial,
        }
    }
}

/// Compiled prompt markers for one tool.
#[derive(Debug, Clone)]
pub struct PromptDetector {
    ready: Regex,
    ready_prefix: String,
    continuation: String,
}

impl PromptDetector {
    /// Build a detector for `<tool_name> [database=<name>]` and `continuation`.
    pub fn new(tool_name: &str, continuation: &str) -> crate::Result<Self> {
        if tool_name.is_empty() || continuation.is_empty() {
            return Err(TqlError::InvalidConfig(
                "prompt markers must not be empty".to_string(),
            ));
        }
        let ready_prefix = format!("{tool_name} [database=");
        let ready = Regex::new(&format!(r"{}([^\]\r\n]*)\]", regex::escape(&ready_prefix)))
            .map_err(|e| TqlError::InvalidConfig(format!("invalid tool name: {e}")))?;
        Ok(Self {
            ready,
            ready_prefix,
            continuation: continuation.to_string(),
        })
    }

    pub fn from_config(config: &RemoteConfig) -> crate::Result<Self> {
        Self::new(&config.tool_name, &config.continuation_marker)
    }

    /// Longest text that can precede a marker match without being
    /// conclusive on its own.
    fn holdback(&self) -> usize {
        self.ready_prefix.len().max(self.continuation.len())
    }
}

/// Text of one response, accumulated across reads.
#[derive(Debug, Default)]
pub struct ReadCycle {
    text: String,
    /// Trailing bytes of an incomplete UTF-8 sequence
    pending: Vec<u8>,
    /// Byte offset in `text` before which no marker can start
    cursor: usize,
}

impl ReadCycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.pending.is_empty()
    }

    /// Append raw channel bytes.
    ///
    /// A multi-byte character split across reads is completed by the next
    /// push; bytes that can never form valid UTF-8 are dropped.
    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        let pending = std::mem::take(&mut self.pending);
        let mut rest = &pending[..];

        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    self.text.push_str(valid);
                    return;
                }
                Err(e) => {
                    let (valid, tail) = rest.split_at(e.valid_up_to());
                    if let Ok(valid) = std::str::from_utf8(valid) {
                        self.text.push_str(valid);
                    }
                    match e.error_len() {
                        Some(invalid) => rest = &tail[invalid..],
                        None => {
                            self.pending = tail.to_vec();
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Look for a prompt in text not yet ruled out.
    ///
    /// The ready marker wins over the continuation marker. When neither is
    /// found the cursor advances so the next scan only covers new text plus
    /// enough overlap to catch a marker split across reads.
    pub fn scan(&mut self, detector: &PromptDetector) -> Option<Completion> {
        let start = self.cursor;

        if let Some(captures) = detector.ready.captures_at(&self.text, start) {
            let database = captures
                .get(1)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            return Some(Completion::Ready { database });
        }

        if self.text[start..].contains(&detector.continuation) {
            return Some(Completion::Partial);
        }

        let mut next = self.text.len().saturating_sub(detector.holdback());
        // An opened but unterminated ready marker must be rescanned
        if let Some(offset) = self.text[start..].rfind(&detector.ready_prefix) {
            next = next.min(start + offset);
        }
        let mut next = next.max(start);
        while !self.text.is_char_boundary(next) {
            next -= 1;
        }
        self.cursor = next;
        None
    }

    /// Output lines of a completed response.
    ///
    /// For a ready prompt the first line (echoed command) and last line (the
    /// prompt itself) are removed. A continuation prompt yields no output.
    pub fn into_output(self, completion: &Completion) -> Vec<String> {
        if *completion == Completion::Partial {
            return Vec::new();
        }
        let text = self.text.replace('\r', "");
        let lines: Vec<&str> = text.split('\n').collect();
        if lines.len() < 2 {
            return Vec::new();
        }
        lines[1..lines.len() - 1]
            .iter()
            .map(|line| line.to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> PromptDetector {
        PromptDetector::new("TQL", "$> ").unwrap()
    }

    #[test]
    fn test_initial_prompt_text() {
        let state = SessionState::default();
        assert_eq!(state.kind(), &PromptKind::None);
        assert_eq!(state.prompt_text(), "rtql [database=(none)] > ");
        assert_eq!(state.database(), None);
    }

    #[test]
    fn test_prompt_text_per_kind() {
        let mut state = SessionState::default();
        state.set_kind(PromptKind::Ready("foo".to_string()));
        assert_eq!(state.prompt_text(), "rtql [database=(foo)] > ");
        assert_eq!(state.database(), Some("foo"));
        state.set_kind(PromptKind::Partial);
        assert_eq!(state.to_string(), "$> ");
    }

    #[test]
    fn test_ready_prompt_strips_echo_and_prompt() {
        let mut cycle = ReadCycle::new();
        cycle.push(b"select count(*) from foo;\r\n3\r\nTQL [database=foo]> ");
        let completion = cycle.scan(&detector()).unwrap();
        assert_eq!(
            completion,
            Completion::Ready {
                database: "foo".to_string()
            }
        );
        assert_eq!(cycle.into_output(&completion), vec!["3".to_string()]);
    }

    #[test]
    fn test_partial_prompt_returns_no_output() {
        let mut cycle = ReadCycle::new();
        cycle.push(b"select *\r\n$> ");
        let completion = cycle.scan(&detector()).unwrap();
        assert_eq!(completion, Completion::Partial);
        assert_eq!(completion.prompt_kind(), PromptKind::Partial);
        assert!(cycle.into_output(&completion).is_empty());
    }

    #[test]
    fn test_ready_takes_precedence_over_partial() {
        let mut cycle = ReadCycle::new();
        cycle.push(b"x\n$> y\nTQL [database=bar]> ");
        assert_eq!(
            cycle.scan(&detector()),
            Some(Completion::Ready {
                database: "bar".to_string()
            })
        );
    }

    #[test]
    fn test_no_marker_yet() {
        let mut cycle = ReadCycle::new();
        cycle.push(b"select 1;\r\nstill working");
        assert_eq!(cycle.scan(&detector()), None);
    }

    #[test]
    fn test_marker_split_across_reads() {
        let detector = detector();
        let mut cycle = ReadCycle::new();
        cycle.push(b"show tables;\r\nfoo\r\nTQL [data");
        assert_eq!(cycle.scan(&detector), None);
        cycle.push(b"base=sal");
        assert_eq!(cycle.scan(&detector), None);
        cycle.push(b"es]> ");
        assert_eq!(
            cycle.scan(&detector),
            Some(Completion::Ready {
                database: "sales".to_string()
            })
        );
    }

    #[test]
    fn test_continuation_split_across_reads() {
        let detector = detector();
        let mut cycle = ReadCycle::new();
        cycle.push(b"create table t (\r\n$");
        assert_eq!(cycle.scan(&detector), None);
        cycle.push(b"> ");
        assert_eq!(cycle.scan(&detector), Some(Completion::Partial));
    }

    #[test]
    fn test_cursor_skips_scanned_text() {
        let detector = detector();
        let mut cycle = ReadCycle::new();
        cycle.push(&[b'x'; 4096]);
        assert_eq!(cycle.scan(&detector), None);
        assert!(cycle.cursor >= 4096 - detector.holdback());
    }

    #[test]
    fn test_split_utf8_sequence_is_completed() {
        let bytes = "caf\u{e9}\n".as_bytes();
        let (head, tail) = bytes.split_at(4);
        let mut cycle = ReadCycle::new();
        cycle.push(head);
        assert_eq!(cycle.text(), "caf");
        cycle.push(tail);
        assert_eq!(cycle.text(), "caf\u{e9}\n");
    }

    #[test]
    fn test_invalid_bytes_are_dropped() {
        let mut cycle = ReadCycle::new();
        cycle.push(b"a\xffb\xfe\xfdc");
        assert_eq!(cycle.text(), "abc");
    }

    #[test]
    fn test_cursor_respects_char_boundaries() {
        let detector = detector();
        let mut cycle = ReadCycle::new();
        cycle.push("\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}\u{e9}".as_bytes());
        assert_eq!(cycle.scan(&detector), None);
        cycle.push("\r\nTQL [database=\u{e9}t\u{e9}]> ".as_bytes());
        assert_eq!(
            cycle.scan(&detector),
            Some(Completion::Ready {
                database: "\u{e9}t\u{e9}".to_string()
            })
        );
    }

    #[test]
    fn test_custom_tool_name_is_escaped() {
        let detector = PromptDetector::new("T.QL", "...> ").unwrap();
        let mut cycle = ReadCycle::new();
        cycle.push(b"x\nTxQL [database=a]> ");
        assert_eq!(cycle.scan(&detector), None);
        cycle.push(b"\nT.QL [database=a]> ");
        assert!(matches!(cycle.scan(&detector), Some(Completion::Ready { .. })));
    }

    #[test]
    fn test_short_buffer_yields_no_lines() {
        let mut cycle = ReadCycle::new();
        cycle.push(b"TQL [database=foo]> ");
        let completion = cycle.scan(&detector()).unwrap();
        assert!(cycle.into_output(&completion).is_empty());
    }
}
