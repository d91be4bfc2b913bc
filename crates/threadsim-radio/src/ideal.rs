//! The ideal radio models: no interference, every detectable frame arrives
//! clean. `Ideal` reports a constant RSSI inside the disc; `Ideal_Rssi` adds
//! ITU indoor log-distance pathloss.

use threadsim_common::{
    clip_rssi, DbValue, NodeId, OT_ERROR_ABORT, OT_ERROR_NONE, RSSI_INVALID,
    RSSI_MINUS_INFINITY,
};
use threadsim_event::{Event, EventKind, EventQueue};

use crate::core::ModelCore;
use crate::{RadioModelParams, RadioNode};

#[derive(Debug)]
pub struct RadioModelIdeal {
    name: &'static str,
    pub(crate) core: ModelCore,
}

impl RadioModelIdeal {
    pub fn new(name: &'static str, params: RadioModelParams, seed: u64) -> Self {
        RadioModelIdeal {
            name,
            core: ModelCore::new(params, seed),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn check_radio_reachable(&self, src: NodeId, dst: NodeId) -> bool {
        if src == dst {
            return false;
        }
        let rssi = self.get_tx_rssi(src, dst);
        rssi != RSSI_INVALID && rssi > RSSI_MINUS_INFINITY
    }

    pub fn get_tx_rssi(&self, src: NodeId, dst: NodeId) -> DbValue {
        self.core.get_tx_rssi(src, dst)
    }

    pub fn handle_event(&mut self, q: &mut dyn EventQueue, evt: &Event) {
        match evt.kind {
            EventKind::RadioCommStart => self.tx_start(q, evt),
            EventKind::RadioTxDone => self.tx_stop(q, evt),
            EventKind::RadioChannelSample => self.channel_sample_start(q, evt),
            _ => {}
        }
    }

    pub fn on_event_dispatch(&mut self, src: NodeId, dst: NodeId, evt: &mut Event) -> bool {
        match evt.kind {
            EventKind::RadioCommStart | EventKind::RadioRxDone => {
                let channel = evt.radio_comm().map(|c| c.channel).unwrap_or_default();
                if self.core.node(dst).map(|n| n.channel) != Some(channel) {
                    return false;
                }
                let rssi = self.get_tx_rssi(src, dst);
                if rssi == RSSI_INVALID || rssi <= RSSI_MINUS_INFINITY {
                    return false;
                }
                if let Some(comm) = evt.radio_comm_mut() {
                    comm.power_dbm = clip_rssi(rssi);
                }
                if evt.kind == EventKind::RadioRxDone {
                    self.core.count_rx_frame(dst, evt.data.len());
                }
                true
            }
            EventKind::RadioChannelSample => {
                let peak = self.core.sample_finish(dst);
                if let Some(comm) = evt.radio_comm_mut() {
                    comm.power_dbm = clip_rssi(peak);
                }
                true
            }
            _ => true,
        }
    }

    fn tx_start(&mut self, q: &mut dyn EventQueue, evt: &Event) {
        let id = evt.node_id;
        let Some(comm) = evt.radio_comm().copied() else {
            return;
        };

        // A node cannot start a second transmission or transmit while
        // sampling; the request bounces straight back.
        if self.core.is_transmitting(id, comm.channel) || self.core.is_sampling(id, comm.channel) {
            let mut abort = evt.clone();
            abort.kind = EventKind::RadioTxDone;
            abort.timestamp = evt.timestamp + 1;
            abort.must_dispatch = true;
            abort.data.clear();
            if let Some(c) = abort.radio_comm_mut() {
                c.error = OT_ERROR_ABORT;
            }
            q.add(abort);
            return;
        }

        if let Some(node) = self.core.node_mut(id) {
            node.tx_power = comm.power_dbm as DbValue;
            node.set_channel(comm.channel);
        }
        self.core.tx_register(id, comm.channel, evt.timestamp);
        self.core.update_samplers_on_tx(id, comm.channel);

        // Inform every potential receiver that a frame starts arriving.
        let mut rx_start = evt.clone();
        rx_start.must_dispatch = true;
        if let Some(c) = rx_start.radio_comm_mut() {
            c.error = OT_ERROR_NONE;
        }
        q.add(rx_start);

        // Internal bookkeeping event at the end of the frame airtime.
        let mut tx_done = evt.clone();
        tx_done.kind = EventKind::RadioTxDone;
        tx_done.timestamp = evt.timestamp + comm.duration;
        tx_done.must_dispatch = false;
        q.add(tx_done);
    }

    fn tx_stop(&mut self, q: &mut dyn EventQueue, evt: &Event) {
        let id = evt.node_id;
        let Some(comm) = evt.radio_comm().copied() else {
            return;
        };
        self.core.tx_unregister(id, comm.channel, evt.timestamp);
        self.core.count_tx_frame(id, evt.data.len());

        let mut tx_done = evt.clone();
        tx_done.must_dispatch = true;
        tx_done.data.clear();
        if let Some(c) = tx_done.radio_comm_mut() {
            c.error = OT_ERROR_NONE;
        }
        q.add(tx_done);

        let mut rx_done = evt.clone();
        rx_done.kind = EventKind::RadioRxDone;
        rx_done.must_dispatch = true;
        if let Some(c) = rx_done.radio_comm_mut() {
            c.error = OT_ERROR_NONE;
        }
        q.add(rx_done);
    }

    fn channel_sample_start(&mut self, q: &mut dyn EventQueue, evt: &Event) {
        let id = evt.node_id;
        let Some(comm) = evt.radio_comm().copied() else {
            return;
        };
        self.core.sample_begin(id, comm.channel);

        let mut done = evt.clone();
        done.timestamp = evt.timestamp + comm.duration;
        done.must_dispatch = true;
        q.add(done);
    }

    pub(crate) fn add_node(&mut self, node: RadioNode) {
        self.core.add_node(node);
    }

    pub(crate) fn delete_node(&mut self, id: NodeId, now: u64) {
        self.core.delete_node(id, now);
    }
}
