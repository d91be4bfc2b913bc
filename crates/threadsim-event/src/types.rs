//! Event kinds and typed payloads.

use threadsim_common::{ChannelId, NodeId, SimTime, INVALID_TIMESTAMP, OT_ERROR_NONE};

/// Length of the fixed event message header (delay + kind + payload length).
pub const EVENT_HEADER_LEN: usize = 11;

/// Maximum accepted payload length. Generously above the largest 802.15.4
/// PSDU plus prefixes; anything longer is a protocol violation.
pub const MAX_EVENT_DATA_LEN: usize = 2048;

/// Stable event kind identifiers, shared with the node's radio platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventKind {
    /// Node woke at its requested alarm time; also the node's "done" reply.
    AlarmFired = 0,
    /// CLI/UART bytes, in either direction.
    UartWrite = 1,
    /// A transmission starts (node -> sim), or a frame starts arriving at a
    /// receiver (sim -> node).
    RadioCommStart = 2,
    /// Transmission finished; reports the outcome to the transmitter.
    RadioTxDone = 3,
    /// Energy-detect channel sample (CCA / energy scan) window.
    RadioChannelSample = 4,
    /// Frame reception finished at a receiver.
    RadioRxDone = 5,
    /// Radio state report from the node (off/sleep/rx/tx + sub-state).
    RadioState = 6,
    /// Node status line (role, partition, addresses) as JSON.
    StatusPush = 7,
    /// Read a simulated-radio parameter.
    RfSimParamGet = 8,
    /// Write a simulated-radio parameter.
    RfSimParamSet = 9,
    /// UDP datagram forwarded between a node and a simulated host.
    UdpFromHost = 10,
}

impl EventKind {
    pub fn from_wire(v: u8) -> Option<Self> {
        match v {
            0 => Some(EventKind::AlarmFired),
            1 => Some(EventKind::UartWrite),
            2 => Some(EventKind::RadioCommStart),
            3 => Some(EventKind::RadioTxDone),
            4 => Some(EventKind::RadioChannelSample),
            5 => Some(EventKind::RadioRxDone),
            6 => Some(EventKind::RadioState),
            7 => Some(EventKind::StatusPush),
            8 => Some(EventKind::RfSimParamGet),
            9 => Some(EventKind::RfSimParamSet),
            10 => Some(EventKind::UdpFromHost),
            _ => None,
        }
    }

    /// True for kinds whose payload carries the radio-comm prefix.
    pub fn has_radio_comm_data(&self) -> bool {
        matches!(
            self,
            EventKind::RadioCommStart
                | EventKind::RadioTxDone
                | EventKind::RadioChannelSample
                | EventKind::RadioRxDone
        )
    }

    /// True for kinds that carry a PSDU after a repeated channel byte.
    pub fn has_psdu(&self) -> bool {
        matches!(self, EventKind::RadioCommStart | EventKind::RadioRxDone)
    }
}

/// Typed prefix of all radio-comm events (11 bytes on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RadioCommData {
    pub channel: ChannelId,
    /// Tx power on ingress; rewritten to the receiver's RSSI on delivery.
    pub power_dbm: i8,
    /// OpenThread error sentinel (none / FCS / abort / CCA failure).
    pub error: u8,
    /// Frame airtime, or sample window length, in µs.
    pub duration: u64,
}

pub const RADIO_COMM_DATA_LEN: usize = 11;

/// Typed payload of radio-state events (5 bytes on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RadioStateData {
    pub channel: ChannelId,
    pub power_dbm: i8,
    /// Energy state of the radio hardware (vendor-defined).
    pub energy_state: u8,
    pub sub_state: u8,
    /// Main radio state, decoded by `RadioState::from_wire` at use sites.
    pub state: u8,
}

pub const RADIO_STATE_DATA_LEN: usize = 5;

/// Payload of alarm-fired events: the message id being acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AlarmData {
    pub msg_id: u64,
}

pub const ALARM_DATA_LEN: usize = 8;

/// Simulated-radio parameters addressable via rfsim-param events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RfSimParam {
    RxSensitivity = 0,
    CcaThreshold = 1,
    CslAccuracy = 2,
    CslUncertainty = 3,
    TxPower = 4,
}

impl RfSimParam {
    pub fn from_wire(v: u8) -> Option<Self> {
        match v {
            0 => Some(RfSimParam::RxSensitivity),
            1 => Some(RfSimParam::CcaThreshold),
            2 => Some(RfSimParam::CslAccuracy),
            3 => Some(RfSimParam::CslUncertainty),
            4 => Some(RfSimParam::TxPower),
            _ => None,
        }
    }
}

/// Payload of rfsim-param events. Get requests omit the value; set requests
/// and all replies carry it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RfSimParamData {
    pub param: RfSimParam,
    pub value: Option<i32>,
}

/// Payload prefix of udp-from-host events (20 bytes before the datagram).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UdpHostData {
    pub src_port: u16,
    pub dst_port: u16,
    pub dst_ip6: [u8; 16],
}

pub const UDP_HOST_DATA_LEN: usize = 20;

/// Structured payload of an event, selected by its kind.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    None,
    Alarm(AlarmData),
    RadioComm(RadioCommData),
    RadioState(RadioStateData),
    RfSimParam(RfSimParamData),
    UdpHost(UdpHostData),
}

/// The unit of time-ordered work exchanged with node processes.
///
/// `timestamp` is the authoritative virtual time of delivery; it is local
/// metadata and never serialized. `delay` is the relative form used on the
/// wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Absolute virtual delivery time; `INVALID_TIMESTAMP` until assigned.
    pub timestamp: SimTime,
    /// Relative delay in µs as carried on the wire.
    pub delay: u64,
    pub kind: EventKind,
    /// Target (or, on ingress, source) node of this event.
    pub node_id: NodeId,
    /// Typed payload selected by `kind`.
    pub payload: EventPayload,
    /// Raw trailing bytes: PSDU, UART bytes, or JSON status.
    pub data: Vec<u8>,
    /// When set, the dispatcher must deliver this event to every candidate
    /// receiver (filtered per receiver by the radio model); internal events
    /// are consumed by the radio model only.
    pub must_dispatch: bool,
}

impl Event {
    /// A new event with no payload, to be timestamped by the dispatcher.
    pub fn new(kind: EventKind, node_id: NodeId) -> Self {
        Event {
            timestamp: INVALID_TIMESTAMP,
            delay: 0,
            kind,
            node_id,
            payload: EventPayload::None,
            data: Vec::new(),
            must_dispatch: false,
        }
    }

    /// An alarm-fired event acknowledging `msg_id`, used both as the node
    /// wake-up and as the dispatcher's time grant.
    pub fn alarm(node_id: NodeId, msg_id: u64) -> Self {
        Event {
            payload: EventPayload::Alarm(AlarmData { msg_id }),
            ..Event::new(EventKind::AlarmFired, node_id)
        }
    }

    /// A uart-write event carrying CLI bytes.
    pub fn uart_write(node_id: NodeId, data: Vec<u8>) -> Self {
        Event {
            data,
            ..Event::new(EventKind::UartWrite, node_id)
        }
    }

    /// A radio event of `kind` with the given comm prefix and PSDU.
    pub fn radio(kind: EventKind, node_id: NodeId, comm: RadioCommData, psdu: Vec<u8>) -> Self {
        debug_assert!(kind.has_radio_comm_data());
        Event {
            payload: EventPayload::RadioComm(comm),
            data: psdu,
            ..Event::new(kind, node_id)
        }
    }

    pub fn radio_comm(&self) -> Option<&RadioCommData> {
        match &self.payload {
            EventPayload::RadioComm(c) => Some(c),
            _ => None,
        }
    }

    pub fn radio_comm_mut(&mut self) -> Option<&mut RadioCommData> {
        match &mut self.payload {
            EventPayload::RadioComm(c) => Some(c),
            _ => None,
        }
    }

    pub fn alarm_data(&self) -> Option<&AlarmData> {
        match &self.payload {
            EventPayload::Alarm(a) => Some(a),
            _ => None,
        }
    }

    /// Error field of a radio event, `OT_ERROR_NONE` for others.
    pub fn radio_error(&self) -> u8 {
        self.radio_comm().map(|c| c.error).unwrap_or(OT_ERROR_NONE)
    }
}

/// Destination for follow-on events generated while handling an event.
/// Implemented by the dispatcher's scheduling queue.
pub trait EventQueue {
    /// Schedules `evt` at its timestamp.
    fn add(&mut self, evt: Event);
}

impl EventQueue for Vec<Event> {
    fn add(&mut self, evt: Event) {
        self.push(evt);
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Ev{{{:?} node={} dly={} len={}}}",
            self.kind,
            self.node_id,
            self.delay,
            self.data.len()
        )
    }
}
