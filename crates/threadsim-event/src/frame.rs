//! Serialization of events to and from the wire format.
//!
//! Ingress validation is two-phase, mirroring the dispatcher's receive path:
//! `Header::parse` checks the fixed header and bounds the payload length,
//! then `Event::deserialize_payload` consumes exactly the declared bytes.
//! Any short payload or unknown kind is a fatal protocol error for the
//! sending node.

use bytes::{BufMut, BytesMut};
use threadsim_common::INVALID_TIMESTAMP;

use crate::{
    AlarmData, CodecError, Event, EventKind, EventPayload, RadioCommData, RadioStateData,
    RfSimParam, RfSimParamData, UdpHostData, ALARM_DATA_LEN, EVENT_HEADER_LEN,
    MAX_EVENT_DATA_LEN, RADIO_COMM_DATA_LEN, RADIO_STATE_DATA_LEN, UDP_HOST_DATA_LEN,
};

/// Parsed fixed header of an event message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub delay: u64,
    pub kind: EventKind,
    pub payload_len: usize,
}

impl Header {
    /// Parses and validates the 11-byte header.
    pub fn parse(buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < EVENT_HEADER_LEN {
            return Err(CodecError::HeaderTooShort(buf.len()));
        }
        let delay = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        let kind = EventKind::from_wire(buf[8]).ok_or(CodecError::UnknownKind(buf[8]))?;
        let payload_len = u16::from_le_bytes(buf[9..11].try_into().unwrap()) as usize;
        if payload_len > MAX_EVENT_DATA_LEN {
            return Err(CodecError::PayloadTooLong(payload_len));
        }
        Ok(Header {
            delay,
            kind,
            payload_len,
        })
    }
}

impl Event {
    /// Serializes this event for transmission. The timestamp is not sent,
    /// only the delay.
    pub fn serialize(&self) -> Vec<u8> {
        let mut payload = BytesMut::with_capacity(32 + self.data.len());
        match &self.payload {
            EventPayload::None => {}
            EventPayload::Alarm(a) => payload.put_u64_le(a.msg_id),
            EventPayload::RadioComm(c) => {
                payload.put_u8(c.channel);
                payload.put_i8(c.power_dbm);
                payload.put_u8(c.error);
                payload.put_u64_le(c.duration);
                if self.kind.has_psdu() {
                    // Frame-carrying kinds repeat the channel ahead of the PSDU.
                    payload.put_u8(c.channel);
                }
            }
            EventPayload::RadioState(s) => {
                payload.put_u8(s.channel);
                payload.put_i8(s.power_dbm);
                payload.put_u8(s.energy_state);
                payload.put_u8(s.sub_state);
                payload.put_u8(s.state);
            }
            EventPayload::RfSimParam(p) => {
                payload.put_u8(p.param as u8);
                if let Some(v) = p.value {
                    payload.put_i32_le(v);
                }
            }
            EventPayload::UdpHost(u) => {
                payload.put_u16_le(u.src_port);
                payload.put_u16_le(u.dst_port);
                payload.put_slice(&u.dst_ip6);
            }
        }
        payload.put_slice(&self.data);

        let mut msg = BytesMut::with_capacity(EVENT_HEADER_LEN + payload.len());
        msg.put_u64_le(self.delay);
        msg.put_u8(self.kind as u8);
        msg.put_u16_le(payload.len() as u16);
        msg.put_slice(&payload);
        msg.to_vec()
    }

    /// Deserializes a complete message (header + payload) as received from a
    /// node. The timestamp is set to invalid; the dispatcher assigns it.
    pub fn deserialize(buf: &[u8]) -> Result<Event, CodecError> {
        let header = Header::parse(buf)?;
        let payload = &buf[EVENT_HEADER_LEN..];
        if payload.len() != header.payload_len {
            return Err(CodecError::LengthMismatch {
                declared: header.payload_len,
                received: payload.len(),
            });
        }
        Event::deserialize_payload(header, payload)
    }

    /// Decodes the payload of an already-validated header.
    pub fn deserialize_payload(header: Header, payload: &[u8]) -> Result<Event, CodecError> {
        let kind = header.kind;
        let short = |len| CodecError::TruncatedPayload { kind, len };

        let (typed, data) = match kind {
            EventKind::AlarmFired => {
                // Boot events may omit the msg id.
                if payload.is_empty() {
                    (EventPayload::Alarm(AlarmData::default()), &payload[..])
                } else if payload.len() < ALARM_DATA_LEN {
                    return Err(short(payload.len()));
                } else {
                    let msg_id = u64::from_le_bytes(payload[0..8].try_into().unwrap());
                    (
                        EventPayload::Alarm(AlarmData { msg_id }),
                        &payload[ALARM_DATA_LEN..],
                    )
                }
            }
            EventKind::UartWrite | EventKind::StatusPush => (EventPayload::None, payload),
            k if k.has_radio_comm_data() => {
                if payload.len() < RADIO_COMM_DATA_LEN {
                    return Err(short(payload.len()));
                }
                let comm = RadioCommData {
                    channel: payload[0],
                    power_dbm: payload[1] as i8,
                    error: payload[2],
                    duration: u64::from_le_bytes(payload[3..11].try_into().unwrap()),
                };
                let mut rest = &payload[RADIO_COMM_DATA_LEN..];
                if k.has_psdu() {
                    if rest.is_empty() {
                        return Err(short(payload.len()));
                    }
                    if rest[0] != comm.channel {
                        return Err(CodecError::ChannelMismatch {
                            prefix: comm.channel,
                            repeat: rest[0],
                        });
                    }
                    rest = &rest[1..];
                }
                (EventPayload::RadioComm(comm), rest)
            }
            EventKind::RadioState => {
                if payload.len() < RADIO_STATE_DATA_LEN {
                    return Err(short(payload.len()));
                }
                let state = RadioStateData {
                    channel: payload[0],
                    power_dbm: payload[1] as i8,
                    energy_state: payload[2],
                    sub_state: payload[3],
                    state: payload[4],
                };
                (
                    EventPayload::RadioState(state),
                    &payload[RADIO_STATE_DATA_LEN..],
                )
            }
            EventKind::RfSimParamGet | EventKind::RfSimParamSet => {
                if payload.is_empty() {
                    return Err(short(0));
                }
                let param =
                    RfSimParam::from_wire(payload[0]).ok_or(CodecError::UnknownKind(payload[0]))?;
                let value = if payload.len() >= 5 {
                    Some(i32::from_le_bytes(payload[1..5].try_into().unwrap()))
                } else if kind == EventKind::RfSimParamSet {
                    return Err(short(payload.len()));
                } else {
                    None
                };
                let consumed = if value.is_some() { 5 } else { 1 };
                (
                    EventPayload::RfSimParam(RfSimParamData { param, value }),
                    &payload[consumed..],
                )
            }
            EventKind::UdpFromHost => {
                if payload.len() < UDP_HOST_DATA_LEN {
                    return Err(short(payload.len()));
                }
                let mut dst_ip6 = [0u8; 16];
                dst_ip6.copy_from_slice(&payload[4..20]);
                let udp = UdpHostData {
                    src_port: u16::from_le_bytes(payload[0..2].try_into().unwrap()),
                    dst_port: u16::from_le_bytes(payload[2..4].try_into().unwrap()),
                    dst_ip6,
                };
                (EventPayload::UdpHost(udp), &payload[UDP_HOST_DATA_LEN..])
            }
            _ => unreachable!("kind dispatch is exhaustive"),
        };

        Ok(Event {
            timestamp: INVALID_TIMESTAMP,
            delay: header.delay,
            kind,
            node_id: 0,
            payload: typed,
            data: data.to_vec(),
            must_dispatch: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(evt: &Event) -> Event {
        let wire = evt.serialize();
        Event::deserialize(&wire).expect("roundtrip decode")
    }

    #[test]
    fn header_layout() {
        let evt = Event {
            delay: 0x0102030405060708,
            ..Event::uart_write(1, b"abc".to_vec())
        };
        let wire = evt.serialize();
        assert_eq!(wire.len(), EVENT_HEADER_LEN + 3);
        assert_eq!(&wire[0..8], &[8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(wire[8], EventKind::UartWrite as u8);
        assert_eq!(&wire[9..11], &[3, 0]);
        assert_eq!(&wire[11..], b"abc");
    }

    #[test]
    fn alarm_roundtrip() {
        let evt = Event {
            delay: 12345,
            ..Event::alarm(4, 0xdead_beef_cafe)
        };
        let back = roundtrip(&evt);
        assert_eq!(back.delay, 12345);
        assert_eq!(back.alarm_data().unwrap().msg_id, 0xdead_beef_cafe);
        assert_eq!(back.timestamp, INVALID_TIMESTAMP);
    }

    #[test]
    fn radio_comm_start_roundtrip_with_psdu() {
        let comm = RadioCommData {
            channel: 15,
            power_dbm: -10,
            error: 0,
            duration: 4256,
        };
        let psdu = vec![0xaa; 127];
        let evt = Event::radio(EventKind::RadioCommStart, 3, comm, psdu.clone());
        let back = roundtrip(&evt);
        assert_eq!(*back.radio_comm().unwrap(), comm);
        assert_eq!(back.data, psdu);
    }

    #[test]
    fn tx_done_has_no_psdu_repeat() {
        let comm = RadioCommData {
            channel: 11,
            power_dbm: 0,
            error: 0,
            duration: 1000,
        };
        let evt = Event::radio(EventKind::RadioTxDone, 1, comm, Vec::new());
        let wire = evt.serialize();
        assert_eq!(wire.len(), EVENT_HEADER_LEN + RADIO_COMM_DATA_LEN);
        let back = roundtrip(&evt);
        assert_eq!(*back.radio_comm().unwrap(), comm);
        assert!(back.data.is_empty());
    }

    #[test]
    fn radio_state_roundtrip() {
        let evt = Event {
            payload: EventPayload::RadioState(RadioStateData {
                channel: 26,
                power_dbm: -7,
                energy_state: 1,
                sub_state: 2,
                state: 3,
            }),
            ..Event::new(EventKind::RadioState, 9)
        };
        let back = roundtrip(&evt);
        assert_eq!(back.payload, evt.payload);
    }

    #[test]
    fn rfsim_param_get_and_set_roundtrip() {
        let get = Event {
            payload: EventPayload::RfSimParam(RfSimParamData {
                param: RfSimParam::CcaThreshold,
                value: None,
            }),
            ..Event::new(EventKind::RfSimParamGet, 2)
        };
        assert_eq!(roundtrip(&get).payload, get.payload);

        let set = Event {
            payload: EventPayload::RfSimParam(RfSimParamData {
                param: RfSimParam::TxPower,
                value: Some(-12),
            }),
            ..Event::new(EventKind::RfSimParamSet, 2)
        };
        assert_eq!(roundtrip(&set).payload, set.payload);
    }

    #[test]
    fn udp_from_host_roundtrip() {
        let mut ip = [0u8; 16];
        ip[15] = 1;
        let evt = Event {
            payload: EventPayload::UdpHost(UdpHostData {
                src_port: 5683,
                dst_port: 53,
                dst_ip6: ip,
            }),
            data: b"dns-query".to_vec(),
            ..Event::new(EventKind::UdpFromHost, 6)
        };
        let back = roundtrip(&evt);
        assert_eq!(back.payload, evt.payload);
        assert_eq!(back.data, evt.data);
    }

    #[test]
    fn status_push_is_raw_bytes() {
        let evt = Event {
            data: br#"{"role":"router"}"#.to_vec(),
            ..Event::new(EventKind::StatusPush, 1)
        };
        let back = roundtrip(&evt);
        assert_eq!(back.data, evt.data);
        assert_eq!(back.payload, EventPayload::None);
    }

    #[test]
    fn rejects_unknown_kind() {
        let mut wire = Event::uart_write(1, Vec::new()).serialize();
        wire[8] = 200;
        assert_eq!(Event::deserialize(&wire), Err(CodecError::UnknownKind(200)));
    }

    #[test]
    fn rejects_short_header_and_length_mismatch() {
        assert!(matches!(
            Event::deserialize(&[0u8; 5]),
            Err(CodecError::HeaderTooShort(5))
        ));

        let mut wire = Event::uart_write(1, b"xyz".to_vec()).serialize();
        wire.truncate(wire.len() - 1);
        assert!(matches!(
            Event::deserialize(&wire),
            Err(CodecError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn rejects_oversized_payload_declaration() {
        let mut wire = Event::uart_write(1, Vec::new()).serialize();
        wire[9] = 0xff;
        wire[10] = 0xff;
        assert!(matches!(
            Event::deserialize(&wire),
            Err(CodecError::PayloadTooLong(_))
        ));
    }

    #[test]
    fn rejects_channel_repeat_mismatch() {
        let comm = RadioCommData {
            channel: 15,
            power_dbm: 0,
            error: 0,
            duration: 100,
        };
        let mut wire = Event::radio(EventKind::RadioRxDone, 1, comm, vec![1, 2, 3]).serialize();
        // Corrupt the repeated channel byte.
        wire[EVENT_HEADER_LEN + RADIO_COMM_DATA_LEN] = 16;
        assert!(matches!(
            Event::deserialize(&wire),
            Err(CodecError::ChannelMismatch { .. })
        ));
    }

    #[test]
    fn truncated_radio_payload_is_an_error() {
        let comm = RadioCommData {
            channel: 11,
            power_dbm: 0,
            error: 0,
            duration: 100,
        };
        let mut wire = Event::radio(EventKind::RadioTxDone, 1, comm, Vec::new()).serialize();
        wire.truncate(EVENT_HEADER_LEN + 4);
        wire[9] = 4;
        wire[10] = 0;
        assert!(matches!(
            Event::deserialize(&wire),
            Err(CodecError::TruncatedPayload { .. })
        ));
    }
}
