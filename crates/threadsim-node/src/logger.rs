//! Per-node log files.
//!
//! Every line a node produces (CLI output, embedded log lines, stderr) is
//! appended to `<tmp>/<simId>_<nodeId>.log`, timestamped with the
//! dispatcher's virtual time. Writing happens on a dedicated thread so the
//! dispatcher never blocks on disk I/O.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use crossbeam_channel::Sender;
use tracing::warn;

use threadsim_common::{NodeId, SimTime, WatchLogLevel};

/// Handle to a node's log file writer thread.
#[derive(Debug)]
pub struct NodeLogWriter {
    tx: Option<Sender<String>>,
    handle: Option<JoinHandle<()>>,
    path: PathBuf,
}

impl NodeLogWriter {
    /// Opens (appending) the log file and starts the writer thread.
    pub fn open(path: &Path, node_id: NodeId) -> std::io::Result<Self> {
        let mut file = OpenOptions::new().append(true).create(true).open(path)?;
        let (tx, rx) = crossbeam_channel::unbounded::<String>();

        let log_path = path.to_path_buf();
        let handle = std::thread::Builder::new()
            .name(format!("nodelog-{node_id}"))
            .spawn(move || {
                let _ = writeln!(file, "# node {node_id} log");
                let _ = writeln!(file, "# SimTimeUs Lev Message");
                for line in rx {
                    if writeln!(file, "{line}").is_err() {
                        warn!(node = node_id, "node log file write failed, closing");
                        break;
                    }
                }
                let _ = file.flush();
            })
            .map_err(std::io::Error::other)?;

        Ok(NodeLogWriter {
            tx: Some(tx),
            handle: Some(handle),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one line, stamped with the virtual time.
    pub fn log(&self, timestamp: SimTime, level: WatchLogLevel, msg: &str) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(format!("{timestamp:>11} [{}] {msg}", level.indicator()));
        }
    }

    /// Closes the channel and joins the writer thread, flushing the file.
    pub fn close(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for NodeLogWriter {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn writes_timestamped_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("0_1.log");
        let mut w = NodeLogWriter::open(&path, 1).unwrap();
        w.log(12345, WatchLogLevel::Info, "role changed to router");
        w.log(23456, WatchLogLevel::Crit, "process failed");
        w.close();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("# node 1 log"));
        assert!(content.contains("12345 [I] role changed to router"));
        assert!(content.contains("23456 [C] process failed"));
    }

    #[test]
    fn append_keeps_existing_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("0_2.log");
        std::fs::write(&path, "previous run\n").unwrap();
        let mut w = NodeLogWriter::open(&path, 2).unwrap();
        w.log(1, WatchLogLevel::Debug, "booted");
        w.close();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("previous run\n"));
        assert!(content.contains("[D] booted"));
    }
}
