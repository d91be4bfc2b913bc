//! Watch log levels: the per-node filter on which node log output is
//! surfaced to the operator.

use std::str::FromStr;

/// Verbosity levels for node log output, ordered from least to most verbose.
/// A node's watch level selects which log lines reach the watch sink; all
/// lines are still written to the node's log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum WatchLogLevel {
    Off = 0,
    Crit = 1,
    Warn = 2,
    Note = 3,
    Info = 4,
    Debug = 5,
    Trace = 6,
}

impl WatchLogLevel {
    /// Default watch level for newly added nodes.
    pub const DEFAULT: WatchLogLevel = WatchLogLevel::Warn;

    /// Classifies a log line by the single-character level indicator used in
    /// node output (`[C]`, `[W]`, `[N]`, `[I]`, `[D]`, `[T]`). The generic
    /// `[L]` marker carries no level of its own and maps to Debug.
    pub fn from_indicator(c: char) -> Option<Self> {
        match c {
            'C' => Some(WatchLogLevel::Crit),
            'W' => Some(WatchLogLevel::Warn),
            'N' => Some(WatchLogLevel::Note),
            'I' => Some(WatchLogLevel::Info),
            'D' | 'L' => Some(WatchLogLevel::Debug),
            'T' => Some(WatchLogLevel::Trace),
            _ => None,
        }
    }

    /// Single-character indicator for log file output.
    pub fn indicator(&self) -> char {
        match self {
            WatchLogLevel::Off => '-',
            WatchLogLevel::Crit => 'C',
            WatchLogLevel::Warn => 'W',
            WatchLogLevel::Note => 'N',
            WatchLogLevel::Info => 'I',
            WatchLogLevel::Debug => 'D',
            WatchLogLevel::Trace => 'T',
        }
    }
}

impl FromStr for WatchLogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(WatchLogLevel::Off),
            "crit" | "critical" => Ok(WatchLogLevel::Crit),
            "warn" | "warning" => Ok(WatchLogLevel::Warn),
            "note" => Ok(WatchLogLevel::Note),
            "info" | "default" => Ok(WatchLogLevel::Info),
            "debug" => Ok(WatchLogLevel::Debug),
            "trace" | "all" => Ok(WatchLogLevel::Trace),
            _ => Err(format!("unknown watch level: {s}")),
        }
    }
}

impl std::fmt::Display for WatchLogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WatchLogLevel::Off => "off",
            WatchLogLevel::Crit => "crit",
            WatchLogLevel::Warn => "warn",
            WatchLogLevel::Note => "note",
            WatchLogLevel::Info => "info",
            WatchLogLevel::Debug => "debug",
            WatchLogLevel::Trace => "trace",
        };
        write!(f, "{s}")
    }
}
