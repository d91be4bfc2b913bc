//! The dispatcher: global event ordering, socket I/O, pacing and the
//! per-node alarm discipline.
//!
//! # Socket protocol
//!
//! All node processes of a simulation exchange datagrams with the
//! dispatcher over one Unix datagram socket. A node binds its own socket at
//! `<tmp>/<simId>_<nodeId>.sock` and sends its events to the dispatcher
//! socket; the dispatcher learns the node's address from the first datagram
//! and derives the node id from the socket file name. Ingress parsing is
//! two-phase: the fixed header is validated first (bounded payload length),
//! then exactly the declared payload is decoded. Any violation terminates
//! the offending node; other nodes continue.
//!
//! # Aliveness
//!
//! Every event sent to a node increments that node's sent counter; the node
//! acknowledges deliveries by echoing the count of events it has received in
//! its next alarm-fired message, which doubles as its next wake-up request.
//! A node is *alive* from the first unacknowledged delivery until its
//! acknowledgment arrives, and the dispatcher never advances virtual time
//! while any node is alive.

use std::collections::BTreeMap;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;
use tracing::{debug, trace, warn};

use threadsim_common::{
    NodeConfig, NodeId, Prng, RadioState, SimTime, WatchLogLevel, INVALID_TIMESTAMP,
    MAX_SIMULATE_SPEED,
};
use threadsim_event::{
    Event, EventKind, EventPayload, EventQueue, Header, RfSimParamData, EVENT_HEADER_LEN,
    MAX_EVENT_DATA_LEN,
};
use threadsim_radio::RadioModel;

use crate::{
    DispNode, DispatcherCallback, DispatcherError, FailTime, FailureTransition, NodeLifecycle,
    NodeStatus, Pacer, SimEventQueue,
};

/// Tuning knobs of the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Path of the dispatcher's datagram socket.
    pub socket_path: PathBuf,
    /// Simulation speed; >= `MAX_SIMULATE_SPEED` disables pacing.
    pub speed: f64,
    /// Watch level applied to newly added nodes.
    pub default_watch_level: WatchLogLevel,
    /// Global packet loss ratio in [0, 1] applied to frame deliveries.
    pub packet_loss_ratio: f64,
    /// Window for a new node's process to connect and submit its boot alarm.
    pub startup_timeout: Duration,
    /// Window for an alive node to deliver its next reply.
    pub reply_timeout: Duration,
    /// Socket poll interval; bounds how quickly dead processes are noticed.
    pub recv_poll: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig {
            socket_path: PathBuf::from("tmp/0_dispatcher.sock"),
            speed: MAX_SIMULATE_SPEED,
            default_watch_level: WatchLogLevel::DEFAULT,
            packet_loss_ratio: 0.0,
            startup_timeout: Duration::from_secs(10),
            reply_timeout: Duration::from_secs(5),
            recv_poll: Duration::from_millis(50),
        }
    }
}

/// Event and error counters, reported by the `counters` command.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatcherCounters {
    pub events_processed: u64,
    pub alarm_events: u64,
    pub radio_events: u64,
    pub uart_events: u64,
    pub status_pushes: u64,
    pub dispatch_vetoed: u64,
    pub packets_lost: u64,
    pub protocol_errors: u64,
}

/// One-line node summary for snapshots (`nodes` command, visualizers).
#[derive(Debug, Clone, Serialize)]
pub struct NodeOverview {
    pub id: NodeId,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub role: String,
    pub rloc16: u16,
    pub partition_id: u32,
    pub failed: bool,
    pub alive: bool,
}

#[derive(Debug)]
struct GoPeriod {
    deadline: SimTime,
    done: Sender<()>,
}

pub struct Dispatcher {
    cfg: DispatcherConfig,
    socket: UnixDatagram,
    cur_time: SimTime,
    speed: f64,
    packet_loss_ratio: f64,
    queue: SimEventQueue,
    nodes: BTreeMap<NodeId, DispNode>,
    radio_model: RadioModel,
    prng: Prng,
    pacer: Pacer,
    go: Option<GoPeriod>,
    callbacks: Sender<DispatcherCallback>,
    counters: DispatcherCounters,
}

impl Dispatcher {
    /// Binds the event socket and creates an idle dispatcher. `callbacks`
    /// receives uart, watch, status and lifecycle messages for the owner to
    /// drain between dispatcher calls.
    pub fn new(
        cfg: DispatcherConfig,
        radio_model: RadioModel,
        prng: Prng,
        callbacks: Sender<DispatcherCallback>,
    ) -> Result<Self, DispatcherError> {
        if let Some(dir) = cfg.socket_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let _ = std::fs::remove_file(&cfg.socket_path);
        let socket = UnixDatagram::bind(&cfg.socket_path)?;
        socket.set_read_timeout(Some(cfg.recv_poll))?;

        let speed = cfg.speed;
        let packet_loss_ratio = cfg.packet_loss_ratio;
        Ok(Dispatcher {
            socket,
            cur_time: 0,
            speed,
            packet_loss_ratio,
            queue: SimEventQueue::new(),
            nodes: BTreeMap::new(),
            radio_model,
            prng,
            pacer: Pacer::new(speed, 0),
            go: None,
            callbacks,
            counters: DispatcherCounters::default(),
            cfg,
        })
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn cur_time(&self) -> SimTime {
        self.cur_time
    }

    pub fn socket_path(&self) -> &Path {
        &self.cfg.socket_path
    }

    pub fn counters(&self) -> DispatcherCounters {
        self.counters
    }

    pub fn node(&self, id: NodeId) -> Option<&DispNode> {
        self.nodes.get(&id)
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    pub fn is_alive(&self, id: NodeId) -> bool {
        self.nodes.get(&id).is_some_and(|n| n.is_alive())
    }

    pub fn radio_model(&self) -> &RadioModel {
        &self.radio_model
    }

    pub fn radio_model_mut(&mut self) -> &mut RadioModel {
        &mut self.radio_model
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn set_speed(&mut self, speed: f64) {
        self.speed = speed.max(0.001);
        self.pacer.restart(self.speed, self.cur_time);
    }

    pub fn packet_loss_ratio(&self) -> f64 {
        self.packet_loss_ratio
    }

    pub fn set_packet_loss_ratio(&mut self, plr: f64) {
        self.packet_loss_ratio = plr.clamp(0.0, 1.0);
    }

    pub fn set_watch_level(&mut self, id: NodeId, level: WatchLogLevel) -> bool {
        match self.nodes.get_mut(&id) {
            Some(n) => {
                n.watch_level = level;
                true
            }
            None => false,
        }
    }

    pub fn watch_level(&self, id: NodeId) -> WatchLogLevel {
        self.nodes
            .get(&id)
            .map(|n| n.watch_level)
            .unwrap_or(WatchLogLevel::Off)
    }

    /// Snapshot of all nodes, ascending by id.
    pub fn node_overviews(&self) -> Vec<NodeOverview> {
        self.nodes
            .values()
            .map(|n| {
                let (x, y, z) = self
                    .radio_model
                    .node(n.id)
                    .map(|r| r.position())
                    .unwrap_or_default();
                NodeOverview {
                    id: n.id,
                    x,
                    y,
                    z,
                    role: n.role.to_string(),
                    rloc16: n.rloc16,
                    partition_id: n.partition_id,
                    failed: n.is_failed,
                    alive: n.is_alive(),
                }
            })
            .collect()
    }

    /// Distinct non-zero partition ids currently reported by nodes.
    pub fn partitions(&self) -> Vec<(u32, Vec<NodeId>)> {
        let mut map: BTreeMap<u32, Vec<NodeId>> = BTreeMap::new();
        for n in self.nodes.values() {
            if n.partition_id > 0 {
                map.entry(n.partition_id).or_default().push(n.id);
            }
        }
        map.into_iter().collect()
    }

    // ------------------------------------------------------------------
    // Node lifecycle
    // ------------------------------------------------------------------

    /// Registers a node record ahead of its process start.
    pub fn add_node(&mut self, id: NodeId, cfg: &NodeConfig) -> Result<(), DispatcherError> {
        if self.nodes.contains_key(&id) {
            return Err(DispatcherError::DuplicateNode(id));
        }
        let mut node = DispNode::new(id, self.cfg.default_watch_level);
        node.reply_deadline = Some(Instant::now() + self.cfg.startup_timeout);
        self.nodes.insert(id, node);
        self.radio_model.add_node(id, cfg);
        debug!(node = id, "dispatcher node added");
        Ok(())
    }

    /// Blocks until the node has connected and submitted its boot alarm, or
    /// its startup window expired. On failure the node record is removed.
    pub fn await_node_boot(&mut self, id: NodeId) -> Result<(), DispatcherError> {
        let deadline = Instant::now() + self.cfg.startup_timeout;
        loop {
            self.recv_events()?;
            match self.nodes.get(&id) {
                None => return Err(DispatcherError::NodeStartupTimeout(id)),
                Some(n) if n.lifecycle == NodeLifecycle::Terminated => {
                    self.remove_node_state(id);
                    return Err(DispatcherError::NodeStartupTimeout(id));
                }
                Some(n) if n.is_connected() && n.lifecycle == NodeLifecycle::Idle => {
                    return Ok(());
                }
                Some(_) => {}
            }
            if Instant::now() >= deadline {
                self.remove_node_state(id);
                return Err(DispatcherError::NodeStartupTimeout(id));
            }
        }
    }

    /// Removes a node: drains in-flight events addressed to it and deletes
    /// it from the queue, the radio model and the interference bookkeeping.
    pub fn delete_node(&mut self, id: NodeId) -> Result<(), DispatcherError> {
        if !self.nodes.contains_key(&id) {
            return Err(DispatcherError::NodeNotFound(id));
        }
        // Let any still-in-flight replies of the node drain first.
        if let Some(n) = self.nodes.get_mut(&id) {
            n.lifecycle = NodeLifecycle::Terminated;
        }
        self.recv_events()?;
        self.remove_node_state(id);
        debug!(node = id, "dispatcher node deleted");
        Ok(())
    }

    fn remove_node_state(&mut self, id: NodeId) {
        self.queue.purge_node(id);
        self.radio_model.delete_node(id, self.cur_time);
        self.nodes.remove(&id);
        debug_assert!(!self.queue.references_node(id));
    }

    /// Marks a node failed / recovered by operator command. A failed node's
    /// radio traffic is suppressed in both directions.
    pub fn set_node_failed(&mut self, id: NodeId, failed: bool) -> Result<(), DispatcherError> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or(DispatcherError::NodeNotFound(id))?;
        if node.is_failed == failed {
            return Ok(());
        }
        node.is_failed = failed;
        let cb = if failed {
            DispatcherCallback::NodeFailed { node: id }
        } else {
            DispatcherCallback::NodeRecovered { node: id }
        };
        let _ = self.callbacks.send(cb);
        Ok(())
    }

    /// Assigns scripted failure timing to a node.
    pub fn set_node_fail_time(
        &mut self,
        id: NodeId,
        fail_time: FailTime,
    ) -> Result<(), DispatcherError> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or(DispatcherError::NodeNotFound(id))?;
        node.failure_ctrl.set_fail_time(fail_time);
        Ok(())
    }

    /// Moves a node; takes effect for all subsequent RSSI computations.
    pub fn set_node_pos(
        &mut self,
        id: NodeId,
        x: f64,
        y: f64,
        z: f64,
    ) -> Result<(), DispatcherError> {
        let node = self
            .radio_model
            .node_mut(id)
            .ok_or(DispatcherError::NodeNotFound(id))?;
        node.set_position(x, y, z);
        Ok(())
    }

    /// Switches the radio model, carrying every node's radio record over.
    pub fn set_radio_model(&mut self, name: &str) -> Result<(), DispatcherError> {
        let seed = self.prng.next_radio_model_seed();
        let mut new_model = RadioModel::create(name, seed)
            .ok_or_else(|| DispatcherError::UnknownRadioModel(name.to_string()))?;
        for id in self.nodes.keys() {
            let Some(old) = self.radio_model.node(*id) else {
                continue;
            };
            let cfg = NodeConfig {
                x: old.x,
                y: old.y,
                z: old.z,
                radio_range: old.radio_range,
                ..Default::default()
            };
            new_model.add_node(*id, &cfg);
            let fresh = new_model.node_mut(*id).expect("node just added");
            fresh.tx_power = old.tx_power;
            fresh.rx_sensitivity = old.rx_sensitivity;
            fresh.cca_ed_threshold = old.cca_ed_threshold;
            fresh.set_channel(old.channel);
            fresh.set_state(old.state, old.sub_state);
        }
        self.radio_model = new_model;
        Ok(())
    }

    // ------------------------------------------------------------------
    // UART
    // ------------------------------------------------------------------

    /// Injects CLI bytes toward a node as a uart-write event at the current
    /// virtual time. Returns whether the node's socket accepted them.
    pub fn send_to_uart(&mut self, id: NodeId, data: &[u8]) -> bool {
        let Some(node) = self.nodes.get(&id) else {
            return false;
        };
        if !node.is_connected() {
            return false;
        }
        let mut evt = Event::uart_write(id, data.to_vec());
        evt.timestamp = self.cur_time;
        self.send_event_to_node(id, evt).is_ok()
    }

    // ------------------------------------------------------------------
    // Go / stepping
    // ------------------------------------------------------------------

    /// Starts (or replaces) a go period of `duration` µs. The returned
    /// channel fires once when the deadline is reached or the period is
    /// cancelled. A new `go` cancels any unfinished previous one.
    pub fn go(&mut self, duration: SimTime) -> Receiver<()> {
        self.go_cancel();
        let (tx, rx) = crossbeam_channel::bounded(1);
        let deadline = self.cur_time.saturating_add(duration);
        self.go = Some(GoPeriod { deadline, done: tx });
        self.pacer.restart(self.speed, self.cur_time);
        rx
    }

    /// Cancels the active go period, if any, firing its done signal.
    pub fn go_cancel(&mut self) {
        if let Some(go) = self.go.take() {
            let _ = go.done.send(());
        }
    }

    pub fn is_go_active(&self) -> bool {
        self.go.is_some()
    }

    pub fn go_deadline(&self) -> Option<SimTime> {
        self.go.as_ref().map(|g| g.deadline)
    }

    /// One stepping iteration of the central algorithm: wait for all alive
    /// nodes, advance to the next event time, deliver the equal-timestamp
    /// batch, and run the radio model's batch hook. Returns false when no go
    /// period is active (caller should idle).
    pub fn process(&mut self) -> Result<bool, DispatcherError> {
        let Some(deadline) = self.go.as_ref().map(|g| g.deadline) else {
            return Ok(false);
        };

        self.recv_events()?;

        let next_alarm = self
            .nodes
            .values()
            .filter(|n| n.lifecycle == NodeLifecycle::Idle && n.alarm_us != INVALID_TIMESTAMP)
            .map(|n| n.alarm_us)
            .min();
        let t_next = match (self.queue.next_timestamp(), next_alarm) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        let t = match t_next {
            Some(t) if t <= deadline => t,
            _ => {
                // Nothing left inside the window: suspend at the deadline.
                self.advance_time(deadline);
                self.go_cancel();
                return Ok(false);
            }
        };

        if let Some(wait) = self.pacer.sleep_before(t) {
            std::thread::sleep(wait);
        }

        self.advance_time(t);
        self.deliver_batch(t)?;
        self.radio_model.on_next_event_time(t);

        let next = self
            .queue
            .next_timestamp()
            .unwrap_or(deadline)
            .min(deadline);
        let _ = self
            .callbacks
            .send(DispatcherCallback::NextEventTime { cur: t, next });
        Ok(true)
    }

    /// Advances `cur_time`, driving every node's failure control.
    fn advance_time(&mut self, new_time: SimTime) {
        debug_assert!(new_time >= self.cur_time);
        if new_time == self.cur_time {
            return;
        }
        let old_time = self.cur_time;
        self.cur_time = new_time;

        let mut transitions = Vec::new();
        for node in self.nodes.values_mut() {
            let t = node
                .failure_ctrl
                .on_time_advanced(old_time, new_time, node.is_failed, &mut self.prng);
            match t {
                FailureTransition::Failed => {
                    node.is_failed = true;
                    transitions.push((node.id, true));
                }
                FailureTransition::Recovered => {
                    node.is_failed = false;
                    transitions.push((node.id, false));
                }
                FailureTransition::None => {}
            }
        }
        for (id, failed) in transitions {
            let cb = if failed {
                DispatcherCallback::NodeFailed { node: id }
            } else {
                DispatcherCallback::NodeRecovered { node: id }
            };
            let _ = self.callbacks.send(cb);
        }
    }

    /// Delivers alarms and queued events scheduled exactly at `t`.
    fn deliver_batch(&mut self, t: SimTime) -> Result<(), DispatcherError> {
        // Alarms first, ascending node id.
        let due: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|n| {
                n.lifecycle == NodeLifecycle::Idle
                    && n.alarm_us != INVALID_TIMESTAMP
                    && n.alarm_us <= t
            })
            .map(|n| n.id)
            .collect();
        for id in due {
            let node = self.nodes.get_mut(&id).expect("due node exists");
            node.alarm_us = INVALID_TIMESTAMP;
            let msg_id = node.sent_msg_id + 1;
            let mut evt = Event::alarm(id, msg_id);
            evt.timestamp = t;
            self.send_filtered(id, evt)?;
            self.counters.alarm_events += 1;
        }

        for evt in self.queue.pop_batch(t) {
            self.counters.events_processed += 1;
            if evt.must_dispatch {
                self.dispatch_to_nodes(evt)?;
            } else {
                // Internal radio event: hand it to the model, which may
                // schedule follow-ons back onto the queue.
                let src_failed = self
                    .nodes
                    .get(&evt.node_id)
                    .map(|n| n.is_failed)
                    .unwrap_or(true);
                if src_failed && evt.kind.has_radio_comm_data() {
                    continue;
                }
                self.radio_model.handle_event(&mut self.queue, &evt);
            }
        }
        Ok(())
    }

    /// Sends a must-dispatch event to its receiver(s), consulting the radio
    /// model's per-event hook for every delivery.
    fn dispatch_to_nodes(&mut self, evt: Event) -> Result<(), DispatcherError> {
        let src = evt.node_id;
        let src_failed = self.nodes.get(&src).map(|n| n.is_failed).unwrap_or(true);

        let broadcast = matches!(evt.kind, EventKind::RadioCommStart | EventKind::RadioRxDone);
        if broadcast {
            if src_failed {
                return Ok(());
            }
            let targets: Vec<NodeId> = self
                .nodes
                .values()
                .filter(|n| n.id != src && n.is_connected() && !n.is_failed)
                .map(|n| n.id)
                .collect();
            for dst in targets {
                let mut copy = evt.clone();
                copy.node_id = dst;
                if evt.kind == EventKind::RadioRxDone
                    && self.packet_loss_ratio > 0.0
                    && self.prng.next_prob() < self.packet_loss_ratio
                {
                    self.counters.packets_lost += 1;
                    continue;
                }
                if !self.radio_model.on_event_dispatch(src, dst, &mut copy) {
                    self.counters.dispatch_vetoed += 1;
                    continue;
                }
                self.send_filtered(dst, copy)?;
            }
        } else {
            // Unicast back to the originating node (tx-done, sample-done).
            if src_failed && evt.kind.has_radio_comm_data() {
                return Ok(());
            }
            let mut copy = evt;
            if !self.radio_model.on_event_dispatch(src, src, &mut copy) {
                self.counters.dispatch_vetoed += 1;
                return Ok(());
            }
            self.send_filtered(src, copy)?;
        }
        Ok(())
    }

    /// Sends to a node, swallowing the node-gone case (the target was
    /// terminated between scheduling and delivery). Invariant violations and
    /// socket-level failures still propagate.
    fn send_filtered(&mut self, id: NodeId, evt: Event) -> Result<(), DispatcherError> {
        match self.send_event_to_node(id, evt) {
            Ok(()) | Err(DispatcherError::NodeNotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Serializes and sends one event to a node, updating its clock and
    /// aliveness. The event's timestamp must be the current delivery time.
    /// A failed socket send terminates the node (node-scoped failure) and
    /// reports it as not found.
    fn send_event_to_node(&mut self, id: NodeId, mut evt: Event) -> Result<(), DispatcherError> {
        let node = self
            .nodes
            .get(&id)
            .ok_or(DispatcherError::NodeNotFound(id))?;
        if node.lifecycle == NodeLifecycle::Terminated {
            return Err(DispatcherError::NodeNotFound(id));
        }
        let Some(conn) = node.conn.clone() else {
            return Err(DispatcherError::NodeNotFound(id));
        };
        if evt.timestamp < node.cur_time {
            return Err(DispatcherError::Invariant(format!(
                "event at {} behind node {} clock {}",
                evt.timestamp, id, node.cur_time
            )));
        }
        evt.delay = evt.timestamp - node.cur_time;
        let buf = evt.serialize();
        trace!(node = id, %evt, "send");
        if let Err(e) = self.socket.send_to(&buf, &conn) {
            warn!(node = id, error = %e, "socket send to node failed");
            self.terminate_node(id, "socket send failed");
            return Err(DispatcherError::NodeNotFound(id));
        }
        let node = self.nodes.get_mut(&id).expect("node still present");
        node.on_event_sent(evt.timestamp, self.cfg.reply_timeout);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Receiving
    // ------------------------------------------------------------------

    /// Drains the socket until every alive (or still-connecting) node has
    /// delivered its next request or been declared dead. Returns the number
    /// of events drained.
    pub fn recv_events(&mut self) -> Result<usize, DispatcherError> {
        let mut buf = vec![0u8; EVENT_HEADER_LEN + MAX_EVENT_DATA_LEN + 64];
        let mut drained = 0;

        loop {
            // Blocking phase: some node still owes a reply (or its boot).
            while self.any_waiting() {
                match self.socket.recv_from(&mut buf) {
                    Ok((n, addr)) => {
                        let path = addr.as_pathname().map(Path::to_path_buf);
                        self.handle_datagram(&buf[..n], path);
                        drained += 1;
                    }
                    Err(e)
                        if e.kind() == std::io::ErrorKind::WouldBlock
                            || e.kind() == std::io::ErrorKind::TimedOut =>
                    {
                        self.check_reply_deadlines();
                    }
                    Err(e) => return Err(DispatcherError::Socket(e)),
                }
            }

            // Flush whatever else is already queued without waiting.
            self.socket.set_nonblocking(true)?;
            let flush_result = loop {
                match self.socket.recv_from(&mut buf) {
                    Ok((n, addr)) => {
                        let path = addr.as_pathname().map(Path::to_path_buf);
                        self.handle_datagram(&buf[..n], path);
                        drained += 1;
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break Ok(()),
                    Err(e) => break Err(e),
                }
            };
            self.socket.set_nonblocking(false)?;
            flush_result?;

            // Handling a flushed datagram may have produced a new delivery
            // (e.g. an rfsim-param reply); wait for its acknowledgment too.
            if !self.any_waiting() {
                break;
            }
        }
        Ok(drained)
    }

    fn any_waiting(&self) -> bool {
        self.nodes.values().any(|n| match n.lifecycle {
            NodeLifecycle::Alive => true,
            NodeLifecycle::Connecting => n.reply_deadline.is_some(),
            _ => false,
        })
    }

    /// Declares nodes dead whose reply (or startup) window expired.
    fn check_reply_deadlines(&mut self) {
        let now = Instant::now();
        let expired: Vec<(NodeId, &'static str)> = self
            .nodes
            .values()
            .filter(|n| n.reply_deadline.map(|d| now >= d).unwrap_or(false))
            .filter_map(|n| match n.lifecycle {
                NodeLifecycle::Alive => Some((n.id, "no reply within the timeout window")),
                NodeLifecycle::Connecting => Some((n.id, "did not connect in time")),
                _ => None,
            })
            .collect();
        for (id, reason) in expired {
            self.terminate_node(id, reason);
        }
    }

    /// Moves a node to terminated and notifies the owner. Queued events for
    /// the node are dropped; the supervisor completes the deletion.
    fn terminate_node(&mut self, id: NodeId, reason: &str) {
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        if node.lifecycle == NodeLifecycle::Terminated {
            return;
        }
        warn!(node = id, reason, "node terminated");
        node.lifecycle = NodeLifecycle::Terminated;
        node.reply_deadline = None;
        self.queue.purge_node(id);
        let _ = self.callbacks.send(DispatcherCallback::NodeTerminated {
            node: id,
            reason: reason.to_string(),
        });
    }

    /// Handles one ingress datagram. Codec violations are node-fatal, never
    /// simulation-fatal.
    fn handle_datagram(&mut self, buf: &[u8], from: Option<PathBuf>) {
        let Some(path) = from else {
            warn!("datagram from unnamed socket ignored");
            return;
        };
        let Some(id) = node_id_from_socket_path(&path) else {
            warn!(?path, "datagram from unrecognized socket path ignored");
            return;
        };
        if !self.nodes.contains_key(&id) {
            trace!(node = id, "datagram from unknown/deleted node ignored");
            return;
        }

        let parsed = Header::parse(buf).and_then(|header| {
            let payload = &buf[EVENT_HEADER_LEN..];
            if payload.len() != header.payload_len {
                return Err(threadsim_event::CodecError::LengthMismatch {
                    declared: header.payload_len,
                    received: payload.len(),
                });
            }
            Event::deserialize_payload(header, payload)
        });
        let mut evt = match parsed {
            Ok(evt) => evt,
            Err(e) => {
                self.counters.protocol_errors += 1;
                self.terminate_node(id, &format!("protocol error: {e}"));
                return;
            }
        };
        evt.node_id = id;

        let node = self.nodes.get_mut(&id).expect("checked above");
        if node.lifecycle == NodeLifecycle::Terminated {
            return;
        }
        if node.conn.is_none() {
            node.conn = Some(path);
            debug!(node = id, "node connected");
        }
        evt.timestamp = node.cur_time.saturating_add(evt.delay);

        match evt.kind {
            EventKind::AlarmFired => {
                let alarm = evt.alarm_data().copied().unwrap_or_default();
                node.on_alarm_reply(alarm.msg_id, evt.delay);
                self.counters.alarm_events += 1;
            }
            EventKind::UartWrite => {
                self.counters.uart_events += 1;
                let _ = self.callbacks.send(DispatcherCallback::UartWrite {
                    node: id,
                    data: evt.data,
                });
            }
            EventKind::RadioCommStart | EventKind::RadioChannelSample => {
                self.counters.radio_events += 1;
                if node.is_failed {
                    return;
                }
                evt.must_dispatch = false;
                self.queue.add(evt);
            }
            EventKind::RadioState => {
                if let EventPayload::RadioState(s) = &evt.payload {
                    let state = RadioState::from_wire(s.state);
                    match state {
                        Some(state) => {
                            if let Some(radio) = self.radio_model.node_mut(id) {
                                radio.set_state(state, s.sub_state);
                                radio.set_channel(s.channel);
                                radio.tx_power = s.power_dbm as f64;
                            }
                        }
                        None => {
                            self.counters.protocol_errors += 1;
                            self.terminate_node(id, "invalid radio state value");
                        }
                    }
                }
            }
            EventKind::StatusPush => {
                self.counters.status_pushes += 1;
                self.handle_status_push(id, &evt.data);
            }
            EventKind::RfSimParamGet | EventKind::RfSimParamSet => {
                self.handle_rfsim_param(id, &evt);
            }
            EventKind::UdpFromHost => {
                if let EventPayload::UdpHost(u) = &evt.payload {
                    let _ = self.callbacks.send(DispatcherCallback::UdpToHost {
                        node: id,
                        src_port: u.src_port,
                        dst_port: u.dst_port,
                        dst_ip6: u.dst_ip6,
                        data: evt.data,
                    });
                }
            }
            EventKind::RadioTxDone | EventKind::RadioRxDone => {
                // These flow from the dispatcher to nodes only.
                self.counters.protocol_errors += 1;
                self.terminate_node(id, "unexpected event direction");
            }
        }
    }

    fn handle_status_push(&mut self, id: NodeId, data: &[u8]) {
        let status: NodeStatus = match serde_json::from_slice(data) {
            Ok(s) => s,
            Err(e) => {
                let _ = self.callbacks.send(DispatcherCallback::WatchMessage {
                    node: id,
                    level: WatchLogLevel::Warn,
                    msg: format!("malformed status push: {e}"),
                });
                return;
            }
        };
        if let Some(node) = self.nodes.get_mut(&id) {
            if let Some(role) = status.role {
                node.role = role;
            }
            if let Some(p) = status.partition_id {
                node.partition_id = p;
            }
            if let Some(r) = status.rloc16 {
                node.rloc16 = r;
            }
            if let Some(e) = status.ext_addr {
                node.ext_addr = e;
            }
        }
        let _ = self
            .callbacks
            .send(DispatcherCallback::StatusPush { node: id, status });
    }

    /// Answers rfsim parameter reads/writes with an echo event carrying the
    /// (new) value.
    fn handle_rfsim_param(&mut self, id: NodeId, evt: &Event) {
        let EventPayload::RfSimParam(p) = &evt.payload else {
            return;
        };
        let value = match (evt.kind, p.value) {
            (EventKind::RfSimParamSet, Some(v)) => {
                self.radio_model.set_node_param(id, p.param, v);
                Some(v)
            }
            _ => self.radio_model.get_node_param(id, p.param),
        };
        let Some(value) = value else {
            return;
        };
        let mut reply = Event::new(evt.kind, id);
        reply.payload = EventPayload::RfSimParam(RfSimParamData {
            param: p.param,
            value: Some(value),
        });
        reply.timestamp = self.cur_time.max(evt.timestamp);
        let _ = self.send_event_to_node(id, reply);
    }

    /// Cancels the go period and terminates every node connection. Called
    /// once at shutdown after the supervisors signalled their processes.
    pub fn stop(&mut self) {
        self.go_cancel();
        let ids = self.node_ids();
        for id in ids {
            self.remove_node_state(id);
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.cfg.socket_path);
    }
}

/// Extracts the node id from a node socket path `<dir>/<simId>_<nodeId>.sock`.
fn node_id_from_socket_path(path: &Path) -> Option<NodeId> {
    let stem = path.file_stem()?.to_str()?;
    let id_part = stem.rsplit('_').next()?;
    id_part.parse().ok()
}
