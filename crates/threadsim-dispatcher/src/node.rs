//! Per-node dispatcher records.

use std::path::PathBuf;
use std::time::Instant;

use threadsim_common::{NodeId, SimTime, WatchLogLevel, INVALID_TIMESTAMP};

use crate::{FailTime, FailureCtrl, NodeRole};

/// Lifecycle of a node from the dispatcher's point of view:
/// connecting -> idle (next-alarm submitted) -> alive (event delivered,
/// reply outstanding) -> idle | terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeLifecycle {
    /// Process spawned; first event on the socket not yet seen.
    Connecting,
    /// All delivered events acknowledged; next alarm cursor valid.
    Idle,
    /// At least one delivered event awaits its reply.
    Alive,
    /// Socket lost or protocol violated; pending deletion.
    Terminated,
}

/// Dispatcher-side record of a node.
#[derive(Debug)]
pub struct DispNode {
    pub id: NodeId,
    /// Socket path the node sends from; set on first contact.
    pub conn: Option<PathBuf>,
    pub lifecycle: NodeLifecycle,

    /// The node's virtual clock: time of the last event delivered to it.
    pub cur_time: SimTime,
    /// Earliest instant the node asked to be resumed at.
    pub alarm_us: SimTime,

    /// Events sent to / acknowledged by the node. The node echoes the count
    /// of received events in its alarm-fired replies.
    pub sent_msg_id: u64,
    pub acked_msg_id: u64,

    /// Wall-clock deadline for the node's next reply while alive.
    pub reply_deadline: Option<Instant>,

    /// Radio suppressed while failed (scripted or operator-forced).
    pub is_failed: bool,
    pub failure_ctrl: FailureCtrl,

    pub watch_level: WatchLogLevel,

    /// Last status pushed by the node.
    pub role: NodeRole,
    pub partition_id: u32,
    pub rloc16: u16,
    pub ext_addr: u64,
}

impl DispNode {
    pub fn new(id: NodeId, watch_level: WatchLogLevel) -> Self {
        DispNode {
            id,
            conn: None,
            lifecycle: NodeLifecycle::Connecting,
            cur_time: 0,
            alarm_us: INVALID_TIMESTAMP,
            sent_msg_id: 0,
            acked_msg_id: 0,
            reply_deadline: None,
            is_failed: false,
            failure_ctrl: FailureCtrl::new(FailTime::NON_FAIL),
            watch_level,
            role: NodeRole::default(),
            partition_id: 0,
            rloc16: 0,
            ext_addr: 0,
        }
    }

    /// True while the dispatcher waits for this node's next reply.
    pub fn is_alive(&self) -> bool {
        self.lifecycle == NodeLifecycle::Alive
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some() && self.lifecycle != NodeLifecycle::Terminated
    }

    /// Marks an event as sent; the node owes a reply.
    pub fn on_event_sent(&mut self, timestamp: SimTime, reply_timeout: std::time::Duration) {
        debug_assert!(timestamp >= self.cur_time, "node clock must not go back");
        self.cur_time = timestamp;
        self.sent_msg_id += 1;
        self.lifecycle = NodeLifecycle::Alive;
        self.reply_deadline = Some(Instant::now() + reply_timeout);
    }

    /// Applies an alarm-fired reply: acknowledges deliveries and records the
    /// next wake request. Returns true when the node became idle.
    pub fn on_alarm_reply(&mut self, acked: u64, delay: u64) -> bool {
        if acked > self.acked_msg_id {
            self.acked_msg_id = acked;
        }
        self.alarm_us = self.cur_time.saturating_add(delay);
        if self.acked_msg_id >= self.sent_msg_id {
            self.lifecycle = NodeLifecycle::Idle;
            self.reply_deadline = None;
            true
        } else {
            false
        }
    }
}
