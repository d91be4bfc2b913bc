//! Virtual UART line scanning.
//!
//! CLI bytes written by the node arrive as uart-write events. The scanner
//! assembles them into lines, strips embedded log lines (recognized by a
//! `[C]/[W]/[N]/[I]/[D]/[T]/[L]` prefix, long forms included) and routes
//! them separately from genuine CLI output.

use threadsim_common::WatchLogLevel;

/// One complete line out of the scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UartLine {
    /// A node log line with its detected level; the text retains the level
    /// tag for the log file.
    Log { level: WatchLogLevel, text: String },
    /// A CLI output line (command echo, command output, `Done`, `Error ...`).
    Cli(String),
}

/// Incremental line scanner over the virtual UART byte stream.
#[derive(Debug, Default)]
pub struct UartLineScanner {
    buf: Vec<u8>,
}

impl UartLineScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds raw UART bytes; returns every line completed by this chunk.
    pub fn push(&mut self, data: &[u8]) -> Vec<UartLine> {
        let mut lines = Vec::new();
        for &b in data {
            if b == b'\n' {
                let raw = std::mem::take(&mut self.buf);
                let mut line = String::from_utf8_lossy(&raw).into_owned();
                if line.ends_with('\r') {
                    line.pop();
                }
                if let Some(l) = classify_line(&line) {
                    lines.push(l);
                }
            } else {
                self.buf.push(b);
            }
        }
        lines
    }

    /// Bytes of a partial line still waiting for its newline.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }
}

/// Classifies one line; empty lines and bare prompts are dropped.
fn classify_line(raw: &str) -> Option<UartLine> {
    // Remove the input prompt to make CLI output easier to parse.
    let mut line = raw.strip_prefix("> ").unwrap_or(raw);

    // A generic log marker may wrap a line that carries its own level tag.
    let mut wrapped_log = false;
    if let Some(rest) = line.strip_prefix("[L] ") {
        line = rest;
        wrapped_log = true;
    }

    if line.is_empty() {
        return None;
    }

    if let Some(level) = log_level_of(line) {
        return Some(UartLine::Log {
            level,
            text: line.to_string(),
        });
    }
    if wrapped_log {
        // No inner level tag: keep it as a generic log line.
        return Some(UartLine::Log {
            level: WatchLogLevel::Debug,
            text: line.to_string(),
        });
    }
    Some(UartLine::Cli(line.to_string()))
}

/// Detects a `[X] ...` or `[XXXX] ...` log level tag at the start of a line.
fn log_level_of(line: &str) -> Option<WatchLogLevel> {
    let rest = line.strip_prefix('[')?;
    let end = rest.find(']')?;
    let tag = &rest[..end];
    match tag {
        "-" => Some(WatchLogLevel::Debug),
        "CRIT" => Some(WatchLogLevel::Crit),
        "WARN" => Some(WatchLogLevel::Warn),
        "NOTE" => Some(WatchLogLevel::Note),
        "INFO" => Some(WatchLogLevel::Info),
        "DEBG" => Some(WatchLogLevel::Debug),
        t if t.len() == 1 => WatchLogLevel::from_indicator(t.chars().next().unwrap()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_lines_across_chunks() {
        let mut s = UartLineScanner::new();
        assert!(s.push(b"rou").is_empty());
        assert_eq!(s.pending_len(), 3);
        let lines = s.push(b"ter\r\nDone\r\n");
        assert_eq!(
            lines,
            vec![
                UartLine::Cli("router".into()),
                UartLine::Cli("Done".into())
            ]
        );
        assert_eq!(s.pending_len(), 0);
    }

    #[test]
    fn strips_prompt_prefix() {
        let mut s = UartLineScanner::new();
        let lines = s.push(b"> state\n");
        assert_eq!(lines, vec![UartLine::Cli("state".into())]);
    }

    #[test]
    fn recognizes_short_log_tags() {
        let mut s = UartLineScanner::new();
        let lines = s.push(b"[I] Mle-----------: Role detached -> child\n");
        assert_eq!(lines.len(), 1);
        match &lines[0] {
            UartLine::Log { level, text } => {
                assert_eq!(*level, WatchLogLevel::Info);
                assert!(text.starts_with("[I] Mle"));
            }
            other => panic!("expected log line, got {other:?}"),
        }
    }

    #[test]
    fn recognizes_long_log_tags_and_wrapped_marker() {
        let mut s = UartLineScanner::new();
        let lines = s.push(b"[L] [CRIT] Platform------: assert failed\n");
        assert_eq!(
            lines,
            vec![UartLine::Log {
                level: WatchLogLevel::Crit,
                text: "[CRIT] Platform------: assert failed".into()
            }]
        );

        let lines = s.push(b"[L] free-form platform message\n");
        assert_eq!(
            lines,
            vec![UartLine::Log {
                level: WatchLogLevel::Debug,
                text: "free-form platform message".into()
            }]
        );
    }

    #[test]
    fn cli_output_passes_through() {
        let mut s = UartLineScanner::new();
        let lines = s.push(b"fdde:ad00:beef:0:0:ff:fe00:fc00\nDone\n");
        assert_eq!(lines.len(), 2);
        assert!(matches!(lines[0], UartLine::Cli(_)));
    }

    #[test]
    fn empty_lines_are_dropped() {
        let mut s = UartLineScanner::new();
        assert!(s.push(b"\r\n\n> \n").is_empty());
    }

    #[test]
    fn bracketed_non_log_output_is_cli() {
        let mut s = UartLineScanner::new();
        // A scan result table row is not a log line.
        let lines = s.push(b"| 1 | OpenThread | dead00beef00cafe | 11 | -20 | 0 |\n");
        assert!(matches!(lines[0], UartLine::Cli(_)));
    }
}
