//! The `Simulation` facade.
//!
//! Owns the dispatcher, the node supervisors and the PRNG tree, and
//! serializes every mutation of shared state on the caller's (single)
//! thread. External CLIs and visualizers talk to this type only.

use std::collections::BTreeMap;
use std::time::Duration;

use crossbeam_channel::Receiver;
use tracing::{debug, info, warn};

use threadsim_common::{
    default_init_script, NodeConfig, NodeId, Prng, SimTime, SimulationConfig, WatchLogLevel,
};
use threadsim_dispatcher::{
    Dispatcher, DispatcherCallback, DispatcherConfig, DispatcherCounters, FailTime, NodeOverview,
};
use threadsim_node::{
    expect_single_line, parse_enabled, parse_hex, parse_int, CommandSession, NodeError,
    NodeSupervisor, SessionStatus,
};
use threadsim_radio::{ChannelStats, PhyStats};

use crate::{NodeAutoPlacer, SimError};

/// A watch line surfaced to the operator.
#[derive(Debug, Clone)]
pub struct WatchLine {
    pub time: SimTime,
    pub node: NodeId,
    pub level: WatchLogLevel,
    pub text: String,
}

pub struct Simulation {
    cfg: SimulationConfig,
    dispatcher: Dispatcher,
    callbacks: Receiver<DispatcherCallback>,
    nodes: BTreeMap<NodeId, NodeSupervisor>,
    placer: NodeAutoPlacer,
    watch_lines: Vec<WatchLine>,
    pending_deletes: Vec<NodeId>,
    udp_to_host_bytes: u64,
    stopped: bool,
}

impl Simulation {
    /// Creates the simulation: prepares the tmp directory, seeds the PRNG
    /// tree, selects the radio model and binds the event socket.
    pub fn new(cfg: SimulationConfig) -> Result<Self, SimError> {
        cfg.port_base()?;
        std::fs::create_dir_all(&cfg.tmp_dir).map_err(threadsim_common::ConfigError::TmpDir)?;
        clean_stale_files(&cfg)?;

        let mut prng = Prng::new(cfg.random_seed);
        info!(seed = prng.root_seed(), "simulation PRNG seeded");

        let model_seed = prng.next_radio_model_seed();
        let radio_model = threadsim_radio::RadioModel::create(&cfg.radio_model, model_seed)
            .ok_or_else(|| {
                SimError::Dispatcher(threadsim_dispatcher::DispatcherError::UnknownRadioModel(
                    cfg.radio_model.clone(),
                ))
            })?;

        let dispatcher_cfg = DispatcherConfig {
            socket_path: cfg.socket_path(),
            speed: cfg.speed,
            default_watch_level: cfg.default_watch_level,
            packet_loss_ratio: cfg.packet_loss_ratio,
            ..Default::default()
        };
        let (tx, rx) = crossbeam_channel::unbounded();
        let dispatcher = Dispatcher::new(dispatcher_cfg, radio_model, prng, tx)?;

        Ok(Simulation {
            cfg,
            dispatcher,
            callbacks: rx,
            nodes: BTreeMap::new(),
            placer: NodeAutoPlacer::new(),
            watch_lines: Vec::new(),
            pending_deletes: Vec::new(),
            udp_to_host_bytes: 0,
            stopped: false,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.cfg
    }

    pub fn cur_time(&self) -> SimTime {
        self.dispatcher.cur_time()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    // ------------------------------------------------------------------
    // Node lifecycle
    // ------------------------------------------------------------------

    /// Adds a node: registers it with the dispatcher, spawns its process,
    /// waits for its boot alarm and runs the init script. On any failure the
    /// partial state is rolled back and the node does not exist.
    pub fn add_node(&mut self, mut cfg: NodeConfig) -> Result<NodeId, SimError> {
        if self.stopped {
            return Err(SimError::ShuttingDown);
        }
        cfg.validate()?;

        let id = if cfg.id == 0 {
            self.next_free_id()
        } else {
            if self.nodes.contains_key(&cfg.id) {
                return Err(SimError::NodeExists(cfg.id));
            }
            cfg.id
        };
        cfg.id = id;

        if cfg.is_auto_placed {
            let fine = cfg.is_mtd || !cfg.is_router;
            let (x, y) = self.placer.next_node_position(fine);
            cfg.x = x;
            cfg.y = y;
        } else {
            self.placer.update_reference(cfg.x, cfg.y);
        }

        self.dispatcher.add_node(id, &cfg)?;
        let supervisor =
            match NodeSupervisor::spawn(id, &cfg, &self.cfg, &self.cfg.socket_path()) {
                Ok(s) => s,
                Err(e) => {
                    let _ = self.dispatcher.delete_node(id);
                    if cfg.is_auto_placed {
                        self.placer.reuse_next_node_position();
                    }
                    return Err(e.into());
                }
            };
        self.nodes.insert(id, supervisor);

        if let Err(e) = self.dispatcher.await_node_boot(id) {
            warn!(node = id, error = %e, "node failed to boot");
            self.reap_node(id);
            if cfg.is_auto_placed {
                self.placer.reuse_next_node_position();
            }
            return Err(e.into());
        }
        self.drain_callbacks();
        debug!(node = id, "node booted");

        let script = cfg
            .init_script
            .clone()
            .unwrap_or_else(|| default_init_script(self.cfg.channel));
        let mode = cfg.mode_string();
        let setup: Vec<String> = script
            .into_iter()
            .chain(std::iter::once(format!("mode {mode}")))
            .collect();
        for cmd in setup {
            if let Err(e) = self.node_command(id, &cmd, self.cfg.command_timeout) {
                warn!(node = id, cmd, error = %e, "init script failed, deleting node");
                let _ = self.delete_node(id);
                if cfg.is_auto_placed {
                    self.placer.reuse_next_node_position();
                }
                return Err(e);
            }
        }

        Ok(id)
    }

    fn next_free_id(&self) -> NodeId {
        let mut id = 1;
        while self.nodes.contains_key(&id) {
            id += 1;
        }
        id
    }

    /// Deletes a node: signals its process, drains its in-flight events,
    /// removes it everywhere and closes its log.
    pub fn delete_node(&mut self, id: NodeId) -> Result<(), SimError> {
        if !self.nodes.contains_key(&id) {
            return Err(SimError::NodeNotFound(id));
        }
        if let Some(sup) = self.nodes.get(&id) {
            sup.signal_exit();
        }
        match self.dispatcher.delete_node(id) {
            Ok(()) | Err(threadsim_dispatcher::DispatcherError::NodeNotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        self.drain_callbacks();
        self.reap_node(id);
        Ok(())
    }

    /// Final process teardown for a node that is already out of the
    /// dispatcher.
    fn reap_node(&mut self, id: NodeId) {
        if self.dispatcher.node(id).is_some() {
            let _ = self.dispatcher.delete_node(id);
        }
        if let Some(mut sup) = self.nodes.remove(&id) {
            sup.signal_exit();
            sup.wait_or_kill(Duration::from_secs(2));
            let now = self.dispatcher.cur_time();
            let _ = sup.poll_pipes(now);
            sup.close_log();
        }
    }

    /// Moves a node to a new position.
    pub fn move_node(&mut self, id: NodeId, x: f64, y: f64, z: f64) -> Result<(), SimError> {
        self.dispatcher.set_node_pos(id, x, y, z)?;
        self.placer.update_reference(x, y);
        Ok(())
    }

    pub fn set_node_failed(&mut self, id: NodeId, failed: bool) -> Result<(), SimError> {
        self.dispatcher.set_node_failed(id, failed)?;
        self.drain_callbacks();
        Ok(())
    }

    pub fn set_node_fail_time(&mut self, id: NodeId, ft: FailTime) -> Result<(), SimError> {
        self.dispatcher.set_node_fail_time(id, ft)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Synchronous node commands
    // ------------------------------------------------------------------

    /// Runs one CLI command against a node and returns its output lines.
    /// `Error N:` terminators and timeouts are recoverable failures; the
    /// node is not killed on timeout.
    pub fn node_command(
        &mut self,
        id: NodeId,
        cmd: &str,
        timeout: Duration,
    ) -> Result<Vec<String>, SimError> {
        if !self.nodes.contains_key(&id) {
            return Err(SimError::NodeNotFound(id));
        }
        if !self.dispatcher.send_to_uart(id, format!("{cmd}\n").as_bytes()) {
            return Err(SimError::Node(NodeError::NodeGone));
        }

        let mut session = CommandSession::new(cmd, timeout);
        loop {
            self.pump()?;

            let Some(sup) = self.nodes.get_mut(&id) else {
                return Err(SimError::Node(NodeError::NodeGone));
            };
            while let Some(line) = sup.pop_pending_line() {
                match session.feed_line(&line) {
                    SessionStatus::Done(output) => return Ok(output),
                    SessionStatus::Failed { code, message } => {
                        return Err(SimError::Node(NodeError::Command { code, message }))
                    }
                    SessionStatus::AwaitingEcho | SessionStatus::Collecting => {}
                }
            }

            if session.is_expired() {
                if let Some(sup) = self.nodes.get_mut(&id) {
                    sup.clear_pending_lines();
                }
                return Err(SimError::Node(NodeError::CommandTimeout(cmd.to_string())));
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Command expecting exactly one output line.
    pub fn node_command_string(&mut self, id: NodeId, cmd: &str) -> Result<String, SimError> {
        let out = self.node_command(id, cmd, self.cfg.command_timeout)?;
        expect_single_line(out).map_err(SimError::Node)
    }

    /// Command expecting a decimal or `0x`-prefixed integer.
    pub fn node_command_int(&mut self, id: NodeId, cmd: &str) -> Result<i64, SimError> {
        let s = self.node_command_string(id, cmd)?;
        parse_int(&s).map_err(SimError::Node)
    }

    /// Command expecting a bare hex value (`rloc16`, `extaddr`, ...).
    pub fn node_command_hex(&mut self, id: NodeId, cmd: &str) -> Result<u64, SimError> {
        let s = self.node_command_string(id, cmd)?;
        parse_hex(&s).map_err(SimError::Node)
    }

    /// Command expecting `Enabled` or `Disabled`.
    pub fn node_command_enabled(&mut self, id: NodeId, cmd: &str) -> Result<bool, SimError> {
        let s = self.node_command_string(id, cmd)?;
        parse_enabled(&s).map_err(SimError::Node)
    }

    /// Starts an asynchronous ping from a node; results arrive in the
    /// node's log as the simulation advances.
    pub fn ping(
        &mut self,
        id: NodeId,
        dest: &str,
        datasize: u32,
        count: u32,
        interval_s: u32,
    ) -> Result<(), SimError> {
        let cmd = format!("ping async {dest} {datasize} {count} {interval_s}");
        // The async variant answers Done immediately; replies come later.
        self.node_command(id, &cmd, self.cfg.command_timeout)?;
        Ok(())
    }

    /// Runs an energy scan / active scan style command that needs virtual
    /// time to pass: the command is issued and the simulation advanced in
    /// slices until the terminator arrives.
    pub fn node_command_with_time(
        &mut self,
        id: NodeId,
        cmd: &str,
        timeout: Duration,
        slice_us: SimTime,
    ) -> Result<Vec<String>, SimError> {
        if !self.nodes.contains_key(&id) {
            return Err(SimError::NodeNotFound(id));
        }
        if !self.dispatcher.send_to_uart(id, format!("{cmd}\n").as_bytes()) {
            return Err(SimError::Node(NodeError::NodeGone));
        }

        let mut session = CommandSession::new(cmd, timeout);
        loop {
            self.go(slice_us)?;

            let Some(sup) = self.nodes.get_mut(&id) else {
                return Err(SimError::Node(NodeError::NodeGone));
            };
            while let Some(line) = sup.pop_pending_line() {
                match session.feed_line(&line) {
                    SessionStatus::Done(output) => return Ok(output),
                    SessionStatus::Failed { code, message } => {
                        return Err(SimError::Node(NodeError::Command { code, message }))
                    }
                    _ => {}
                }
            }
            if session.is_expired() {
                if let Some(sup) = self.nodes.get_mut(&id) {
                    sup.clear_pending_lines();
                }
                return Err(SimError::Node(NodeError::CommandTimeout(cmd.to_string())));
            }
        }
    }

    pub fn scan(&mut self, id: NodeId) -> Result<Vec<String>, SimError> {
        self.node_command_with_time(id, "scan", Duration::from_secs(30), 100_000)
    }

    // ------------------------------------------------------------------
    // Time control
    // ------------------------------------------------------------------

    /// Advances virtual time by `duration` µs at the configured speed,
    /// blocking until the deadline is reached. Node process failures and
    /// watch output are handled along the way.
    pub fn go(&mut self, duration: SimTime) -> Result<(), SimError> {
        let done = self.dispatcher.go(duration);
        loop {
            let active = self.dispatcher.process()?;
            self.drain_callbacks();
            self.poll_node_processes();
            if !active {
                break;
            }
        }
        let _ = done.try_recv();
        Ok(())
    }

    /// Cancels a go period (the `pause` operation).
    pub fn pause(&mut self) {
        self.dispatcher.go_cancel();
    }

    pub fn speed(&self) -> f64 {
        self.dispatcher.speed()
    }

    pub fn set_speed(&mut self, speed: f64) {
        self.dispatcher.set_speed(speed);
    }

    // ------------------------------------------------------------------
    // Radio configuration
    // ------------------------------------------------------------------

    pub fn radio_model_name(&self) -> &'static str {
        self.dispatcher.radio_model().name()
    }

    pub fn set_radio_model(&mut self, name: &str) -> Result<(), SimError> {
        self.dispatcher.set_radio_model(name)?;
        Ok(())
    }

    pub fn radio_param(&self, name: &str) -> Option<f64> {
        self.dispatcher.radio_model().params().get(name)
    }

    pub fn set_radio_param(&mut self, name: &str, value: f64) -> bool {
        self.dispatcher.radio_model_mut().params_mut().set(name, value)
    }

    pub fn packet_loss_ratio(&self) -> f64 {
        self.dispatcher.packet_loss_ratio()
    }

    pub fn set_packet_loss_ratio(&mut self, plr: f64) {
        self.dispatcher.set_packet_loss_ratio(plr);
    }

    // ------------------------------------------------------------------
    // Watch / observation
    // ------------------------------------------------------------------

    pub fn set_watch(&mut self, id: NodeId, level: WatchLogLevel) -> Result<(), SimError> {
        if !self.dispatcher.set_watch_level(id, level) {
            return Err(SimError::NodeNotFound(id));
        }
        Ok(())
    }

    pub fn unwatch(&mut self, id: NodeId) -> Result<(), SimError> {
        self.set_watch(id, WatchLogLevel::Off)
    }

    /// Watch lines accumulated since the last call.
    pub fn take_watch_lines(&mut self) -> Vec<WatchLine> {
        std::mem::take(&mut self.watch_lines)
    }

    pub fn node_overviews(&self) -> Vec<NodeOverview> {
        self.dispatcher.node_overviews()
    }

    pub fn partitions(&self) -> Vec<(u32, Vec<NodeId>)> {
        self.dispatcher.partitions()
    }

    pub fn counters(&self) -> DispatcherCounters {
        self.dispatcher.counters()
    }

    pub fn channel_stats(&self, ch: u8) -> ChannelStats {
        self.dispatcher.radio_model().channel_stats(ch)
    }

    pub fn active_channels(&self) -> Vec<(u8, ChannelStats)> {
        self.dispatcher.radio_model().active_channels()
    }

    pub fn node_phy_stats(&self, id: NodeId) -> PhyStats {
        self.dispatcher.radio_model().node_phy_stats(id)
    }

    pub fn udp_to_host_bytes(&self) -> u64 {
        self.udp_to_host_bytes
    }

    // ------------------------------------------------------------------
    // Plumbing
    // ------------------------------------------------------------------

    /// Pumps the dispatcher socket and routes the resulting callbacks.
    fn pump(&mut self) -> Result<(), SimError> {
        self.dispatcher.recv_events()?;
        self.drain_callbacks();
        self.poll_node_processes();
        Ok(())
    }

    /// Routes dispatcher callbacks into the supervisors and the watch sink,
    /// then executes any deletions they scheduled.
    fn drain_callbacks(&mut self) {
        let now = self.dispatcher.cur_time();
        while let Ok(cb) = self.callbacks.try_recv() {
            match cb {
                DispatcherCallback::UartWrite { node, data } => {
                    if let Some(sup) = self.nodes.get_mut(&node) {
                        for (level, text) in sup.on_uart_write(&data, now) {
                            if level <= self.dispatcher.watch_level(node) {
                                self.watch_lines.push(WatchLine {
                                    time: now,
                                    node,
                                    level,
                                    text,
                                });
                            }
                        }
                    }
                }
                DispatcherCallback::NodeFailed { node } => {
                    self.push_watch(now, node, WatchLogLevel::Warn, "radio failed");
                }
                DispatcherCallback::NodeRecovered { node } => {
                    self.push_watch(now, node, WatchLogLevel::Warn, "radio recovered");
                }
                DispatcherCallback::NodeTerminated { node, reason } => {
                    self.push_watch(
                        now,
                        node,
                        WatchLogLevel::Crit,
                        &format!("node terminated: {reason}"),
                    );
                    self.pending_deletes.push(node);
                }
                DispatcherCallback::StatusPush { .. } => {}
                DispatcherCallback::UdpToHost { data, .. } => {
                    self.udp_to_host_bytes += data.len() as u64;
                }
                DispatcherCallback::WatchMessage { node, level, msg } => {
                    self.push_watch(now, node, level, &msg);
                }
                DispatcherCallback::NextEventTime { .. } => {}
            }
        }

        let deletes = std::mem::take(&mut self.pending_deletes);
        for id in deletes {
            if self.nodes.contains_key(&id) {
                info!(node = id, "removing terminated node");
                let _ = self.delete_node(id);
            }
        }
    }

    fn push_watch(&mut self, time: SimTime, node: NodeId, level: WatchLogLevel, text: &str) {
        if let Some(sup) = self.nodes.get(&node) {
            sup.log(time, level, text);
        }
        self.watch_lines.push(WatchLine {
            time,
            node,
            level,
            text: text.to_string(),
        });
    }

    /// Single collection point for node process exits and stderr output.
    fn poll_node_processes(&mut self) {
        let now = self.dispatcher.cur_time();
        let mut failed = Vec::new();
        for (id, sup) in self.nodes.iter_mut() {
            let activity = sup.poll_pipes(now);
            if activity.first_failure {
                failed.push((*id, activity.stderr_lines.first().cloned()));
            } else if sup.try_wait().is_some() && self.dispatcher.node(*id).is_some() {
                // Unexpected clean exit also removes the node.
                failed.push((*id, None));
            }
        }
        for (id, line) in failed {
            let msg = match line {
                Some(l) => format!("process failed: StdErr> {l}"),
                None => "process exited".to_string(),
            };
            self.push_watch(now, id, WatchLogLevel::Crit, &msg);
            self.pending_deletes.push(id);
        }
        if !self.pending_deletes.is_empty() {
            let deletes = std::mem::take(&mut self.pending_deletes);
            for id in deletes {
                if self.nodes.contains_key(&id) {
                    let _ = self.delete_node(id);
                }
            }
        }
    }

    /// Shuts the simulation down: cancels any go period, signals every node
    /// process, drains remaining events with a bounded wait, and hard-kills
    /// laggards.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        info!("stopping simulation and exiting nodes");
        self.stopped = true;
        self.dispatcher.go_cancel();

        for sup in self.nodes.values() {
            sup.signal_exit();
        }
        let ids = self.node_ids();
        for id in ids {
            let _ = self.dispatcher.delete_node(id);
            if let Some(mut sup) = self.nodes.remove(&id) {
                sup.wait_or_kill(Duration::from_secs(2));
                sup.close_log();
            }
        }
        self.dispatcher.stop();
        debug!("all simulation nodes exited");
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Removes flash and log files of a previous run with the same simulation
/// id. Files of restored nodes are re-created by their supervisors only if
/// the restore flag is absent.
fn clean_stale_files(cfg: &SimulationConfig) -> Result<(), SimError> {
    let prefix = format!("{}_", cfg.id);
    let entries = match std::fs::read_dir(&cfg.tmp_dir) {
        Ok(e) => e,
        Err(_) => return Ok(()),
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with(&prefix) && (name.ends_with(".flash") || name.ends_with(".log")) {
            let _ = std::fs::remove_file(entry.path());
        }
    }
    Ok(())
}
