//! Callback stream from the dispatcher to its owner.
//!
//! The dispatcher never calls up into the supervisor layer directly; it
//! emits messages on a channel that the owning facade drains between
//! dispatcher calls, keeping all mutation single-threaded.

use serde::{Deserialize, Serialize};
use threadsim_common::{NodeId, SimTime, WatchLogLevel};

/// Thread device role, as reported by nodes through status-push events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    #[default]
    Disabled,
    Detached,
    Child,
    Router,
    Leader,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeRole::Disabled => "disabled",
            NodeRole::Detached => "detached",
            NodeRole::Child => "child",
            NodeRole::Router => "router",
            NodeRole::Leader => "leader",
        };
        write!(f, "{s}")
    }
}

/// Status fields a node may report in a status-push event (JSON payload).
/// Absent fields leave the previous value untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub role: Option<NodeRole>,
    #[serde(rename = "par_id")]
    pub partition_id: Option<u32>,
    pub rloc16: Option<u16>,
    #[serde(rename = "ext_addr")]
    pub ext_addr: Option<u64>,
}

/// Messages emitted by the dispatcher for the owning facade.
#[derive(Debug)]
pub enum DispatcherCallback {
    /// A node wrote CLI/log bytes to its virtual UART.
    UartWrite { node: NodeId, data: Vec<u8> },
    /// Scripted failure control took the node's radio down.
    NodeFailed { node: NodeId },
    /// Scripted failure control brought the node's radio back.
    NodeRecovered { node: NodeId },
    /// Socket loss or protocol violation; the node is gone and must be
    /// reaped by the supervisor.
    NodeTerminated { node: NodeId, reason: String },
    /// A node pushed updated status fields.
    StatusPush { node: NodeId, status: NodeStatus },
    /// A node sent a UDP datagram addressed to a simulated host.
    UdpToHost {
        node: NodeId,
        src_port: u16,
        dst_port: u16,
        dst_ip6: [u8; 16],
        data: Vec<u8>,
    },
    /// A log-worthy dispatcher observation about a node.
    WatchMessage {
        node: NodeId,
        level: WatchLogLevel,
        msg: String,
    },
    /// The dispatcher finished a delivery batch; `next` is the upcoming
    /// event time (or the go deadline when the queue runs dry).
    NextEventTime { cur: SimTime, next: SimTime },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_push_json_parses_partial_fields() {
        let status: NodeStatus =
            serde_json::from_str(r#"{"role":"router","par_id":123}"#).unwrap();
        assert_eq!(status.role, Some(NodeRole::Router));
        assert_eq!(status.partition_id, Some(123));
        assert_eq!(status.rloc16, None);
    }

    #[test]
    fn status_push_json_full() {
        let status: NodeStatus = serde_json::from_str(
            r#"{"role":"leader","par_id":7,"rloc16":17408,"ext_addr":1311768467463790320}"#,
        )
        .unwrap();
        assert_eq!(status.role, Some(NodeRole::Leader));
        assert_eq!(status.rloc16, Some(0x4400));
        assert_eq!(status.ext_addr, Some(0x1234_5678_9abc_def0));
    }
}
