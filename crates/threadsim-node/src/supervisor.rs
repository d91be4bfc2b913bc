//! The per-node process supervisor.
//!
//! Owns the child process running one Thread node, its pipes and its log
//! file. The node's CLI traffic travels as uart-write events through the
//! dispatcher; stdout carries platform output that goes straight to the log,
//! and anything on stderr is treated as a fatal error for the node.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};

use crossbeam_channel::Receiver;
use tracing::{debug, warn};

use threadsim_common::{
    NodeConfig, NodeId, SimTime, SimulationConfig, WatchLogLevel,
};

use crate::{NodeError, NodeLogWriter, UartLine, UartLineScanner};

/// Stderr lines observed since the last poll. Any stderr output marks the
/// node process as failed.
#[derive(Debug, Default)]
pub struct PipeActivity {
    pub stderr_lines: Vec<String>,
    pub first_failure: bool,
}

#[derive(Debug)]
pub struct NodeSupervisor {
    pub id: NodeId,
    cfg: NodeConfig,
    child: Child,
    scanner: UartLineScanner,
    pending_lines: VecDeque<String>,
    log_writer: NodeLogWriter,
    stdout_rx: Receiver<String>,
    stderr_rx: Receiver<String>,
    process_failed: bool,
    exit_status: Option<ExitStatus>,
}

impl NodeSupervisor {
    /// Prepares the node's files and spawns its process with the node id
    /// and the dispatcher socket path as arguments.
    pub fn spawn(
        id: NodeId,
        cfg: &NodeConfig,
        sim_cfg: &SimulationConfig,
        socket_path: &Path,
    ) -> Result<Self, NodeError> {
        // Flash and log files survive only for restored nodes.
        if !cfg.restore {
            let _ = std::fs::remove_file(sim_cfg.flash_file(id));
            let _ = std::fs::remove_file(sim_cfg.log_file(id));
        }

        let exe_name = sim_cfg.exe.executable_for(cfg);
        let exe = sim_cfg.exe.find_executable(&exe_name)?;
        debug!(node = id, exe = %exe.display(), "spawning node process");

        let mut child = Command::new(&exe)
            .arg(id.to_string())
            .arg(socket_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(NodeError::Spawn)?;

        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");
        let stdout_rx = spawn_line_reader(stdout, id, "stdout");
        let stderr_rx = spawn_line_reader(stderr, id, "stderr");

        let log_writer = NodeLogWriter::open(&sim_cfg.log_file(id), id)?;

        Ok(NodeSupervisor {
            id,
            cfg: cfg.clone(),
            child,
            scanner: UartLineScanner::new(),
            pending_lines: VecDeque::new(),
            log_writer,
            stdout_rx,
            stderr_rx,
            process_failed: false,
            exit_status: None,
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.cfg
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn has_process_failed(&self) -> bool {
        self.process_failed
    }

    // ------------------------------------------------------------------
    // Virtual UART
    // ------------------------------------------------------------------

    /// Feeds uart-write bytes from the node. Embedded log lines go to the
    /// log pipeline and are returned (with their level) for watch routing;
    /// CLI lines enter the pending-output queue.
    pub fn on_uart_write(
        &mut self,
        data: &[u8],
        now: SimTime,
    ) -> Vec<(WatchLogLevel, String)> {
        let mut log_lines = Vec::new();
        for line in self.scanner.push(data) {
            match line {
                UartLine::Log { level, text } => {
                    self.log_writer.log(now, level, &text);
                    log_lines.push((level, text));
                }
                UartLine::Cli(text) => {
                    self.log_writer.log(now, WatchLogLevel::Debug, &text);
                    self.pending_lines.push_back(text);
                }
            }
        }
        log_lines
    }

    /// Next pending CLI output line, if any.
    pub fn pop_pending_line(&mut self) -> Option<String> {
        self.pending_lines.pop_front()
    }

    pub fn pending_line_count(&self) -> usize {
        self.pending_lines.len()
    }

    /// Discards buffered CLI output (used after a command timeout so stale
    /// output cannot satisfy the next command).
    pub fn clear_pending_lines(&mut self) {
        self.pending_lines.clear();
    }

    /// Writes a line to the node's log file at the dispatcher time `now`.
    pub fn log(&self, now: SimTime, level: WatchLogLevel, msg: &str) {
        self.log_writer.log(now, level, msg);
    }

    // ------------------------------------------------------------------
    // Pipes and process state
    // ------------------------------------------------------------------

    /// Drains the stdout/stderr reader channels. Stdout goes to the log;
    /// stderr marks the node failed and is reported to the caller.
    pub fn poll_pipes(&mut self, now: SimTime) -> PipeActivity {
        while let Ok(line) = self.stdout_rx.try_recv() {
            self.log_writer.log(now, WatchLogLevel::Debug, &line);
        }

        let mut activity = PipeActivity::default();
        while let Ok(line) = self.stderr_rx.try_recv() {
            self.log_writer
                .log(now, WatchLogLevel::Crit, &format!("StdErr> {line}"));
            if !self.process_failed {
                self.process_failed = true;
                activity.first_failure = true;
                warn!(node = self.id, line, "node process wrote to stderr");
            }
            activity.stderr_lines.push(line);
        }
        activity
    }

    /// Non-blocking exit check; remembers the status once collected.
    pub fn try_wait(&mut self) -> Option<ExitStatus> {
        if self.exit_status.is_some() {
            return self.exit_status;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.exit_status = Some(status);
                self.exit_status
            }
            Ok(None) => None,
            Err(e) => {
                warn!(node = self.id, error = %e, "try_wait failed");
                None
            }
        }
    }

    pub fn has_exited(&self) -> bool {
        self.exit_status.is_some()
    }

    /// Asks the process to exit (SIGTERM). Safe to call more than once.
    pub fn signal_exit(&self) {
        if self.exit_status.is_some() {
            return;
        }
        // SAFETY: plain kill(2) on the child's pid with a standard signal.
        unsafe {
            libc::kill(self.child.id() as libc::pid_t, libc::SIGTERM);
        }
    }

    /// Hard-kills a process that ignored SIGTERM.
    pub fn kill(&mut self) {
        if self.exit_status.is_none() {
            let _ = self.child.kill();
            let _ = self.child.wait().map(|s| self.exit_status = Some(s));
        }
    }

    /// Blocks up to `timeout` for the process to exit, then hard-kills it.
    pub fn wait_or_kill(&mut self, timeout: std::time::Duration) -> Option<ExitStatus> {
        let deadline = std::time::Instant::now() + timeout;
        while std::time::Instant::now() < deadline {
            if let Some(status) = self.try_wait() {
                return Some(status);
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        self.kill();
        self.exit_status
    }

    /// Closes the log file after the process is gone.
    pub fn close_log(&mut self) {
        self.log_writer.close();
    }

    /// Writes raw bytes to the node's stdin pipe. Unused for virtual-time
    /// UART traffic but kept wired for raw-mode experiments.
    pub fn write_stdin(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self.child.stdin.as_mut() {
            Some(stdin) => {
                stdin.write_all(data)?;
                stdin.flush()
            }
            None => Err(std::io::Error::other("stdin closed")),
        }
    }
}

/// Starts a reader thread that forwards complete lines from a pipe.
fn spawn_line_reader<R: std::io::Read + Send + 'static>(
    pipe: R,
    node_id: NodeId,
    name: &'static str,
) -> Receiver<String> {
    let (tx, rx) = crossbeam_channel::unbounded();
    let _ = std::thread::Builder::new()
        .name(format!("{name}-{node_id}"))
        .spawn(move || {
            let reader = BufReader::new(pipe);
            for line in reader.lines() {
                match line {
                    Ok(l) => {
                        if tx.send(l).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });
    rx
}
