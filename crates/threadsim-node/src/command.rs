//! The synchronous CLI command protocol.
//!
//! Every node CLI command is echoed back, followed by zero or more output
//! lines, and terminated by either `Done` or `Error N: <message>`. The
//! [`CommandSession`] state machine consumes the pending-output queue one
//! line at a time; the controller pumps dispatcher events between lines and
//! enforces the timeout.

use std::time::{Duration, Instant};

use crate::NodeError;

/// Progress of one in-flight command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    /// Still waiting for the command echo line.
    AwaitingEcho,
    /// Echo seen; collecting output until the terminator.
    Collecting,
    /// Terminator seen; the command output (without the terminator).
    Done(Vec<String>),
    /// `Error N:` terminator seen. Recoverable; the node keeps running.
    Failed { code: u32, message: String },
}

/// State machine matching the echo and terminator of a single command.
#[derive(Debug)]
pub struct CommandSession {
    cmd: String,
    echo_seen: bool,
    output: Vec<String>,
    deadline: Instant,
}

impl CommandSession {
    pub fn new(cmd: &str, timeout: Duration) -> Self {
        CommandSession {
            cmd: cmd.to_string(),
            echo_seen: false,
            output: Vec::new(),
            deadline: Instant::now() + timeout,
        }
    }

    pub fn command(&self) -> &str {
        &self.cmd
    }

    /// True once the wall-clock timeout for this command has passed.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Feeds the next pending CLI line.
    pub fn feed_line(&mut self, line: &str) -> SessionStatus {
        if !self.echo_seen {
            if line == self.cmd {
                self.echo_seen = true;
                return SessionStatus::Collecting;
            }
            // Stray output ahead of the echo is discarded.
            return SessionStatus::AwaitingEcho;
        }

        if line == "Done" {
            return SessionStatus::Done(std::mem::take(&mut self.output));
        }
        if let Some((code, message)) = parse_error_line(line) {
            return SessionStatus::Failed { code, message };
        }
        self.output.push(line.to_string());
        SessionStatus::Collecting
    }
}

/// Parses an `Error N: <message>` terminator line.
pub fn parse_error_line(line: &str) -> Option<(u32, String)> {
    let rest = line.strip_prefix("Error ")?;
    let colon = rest.find(':')?;
    let code: u32 = rest[..colon].parse().ok()?;
    let message = rest[colon + 1..].trim_start().to_string();
    Some((code, message))
}

/// True for either terminator shape.
pub fn is_terminator_line(line: &str) -> bool {
    line == "Done" || parse_error_line(line).is_some()
}

// ----------------------------------------------------------------------
// Typed result parsing for the convenience command variants
// ----------------------------------------------------------------------

/// Expects exactly one output line.
pub fn expect_single_line(output: Vec<String>) -> Result<String, NodeError> {
    if output.len() != 1 {
        return Err(NodeError::UnexpectedOutput(format!(
            "expected 1 line, got {}: {:?}",
            output.len(),
            output
        )));
    }
    Ok(output.into_iter().next().unwrap())
}

/// Parses a decimal or `0x`-prefixed integer result.
pub fn parse_int(s: &str) -> Result<i64, NodeError> {
    let v = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16)
    } else {
        s.parse()
    };
    v.map_err(|_| NodeError::UnexpectedOutput(format!("expected integer, got '{s}'")))
}

/// Parses a bare hex string result (e.g. `rloc16`, `extaddr`).
pub fn parse_hex(s: &str) -> Result<u64, NodeError> {
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    u64::from_str_radix(digits, 16)
        .map_err(|_| NodeError::UnexpectedOutput(format!("expected hex value, got '{s}'")))
}

/// Parses an `Enabled` / `Disabled` result.
pub fn parse_enabled(s: &str) -> Result<bool, NodeError> {
    match s {
        "Enabled" => Ok(true),
        "Disabled" => Ok(false),
        _ => Err(NodeError::UnexpectedOutput(format!(
            "expected Enabled/Disabled, got '{s}'"
        ))),
    }
}
