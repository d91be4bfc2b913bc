//! The global event queue: a min-heap keyed by (timestamp, target node id,
//! insertion sequence).
//!
//! The tie-break is the simulation's determinism anchor: at equal timestamp,
//! events for the lower node id are delivered first, and events for the same
//! node in insertion order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use threadsim_common::{NodeId, SimTime};
use threadsim_event::{Event, EventQueue};

#[derive(Debug)]
struct QueuedEvent {
    evt: Event,
    seq: u64,
}

impl QueuedEvent {
    fn key(&self) -> (SimTime, NodeId, u64) {
        (self.evt.timestamp, self.evt.node_id, self.seq)
    }
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QueuedEvent {}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for min-heap behaviour on BinaryHeap.
        other.key().cmp(&self.key())
    }
}

/// Min-heap of scheduled, not-yet-delivered events.
#[derive(Debug, Default)]
pub struct SimEventQueue {
    heap: BinaryHeap<QueuedEvent>,
    next_seq: u64,
}

impl SimEventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Timestamp of the earliest scheduled event.
    pub fn next_timestamp(&self) -> Option<SimTime> {
        self.heap.peek().map(|q| q.evt.timestamp)
    }

    /// Pops the earliest event, honoring the deterministic tie-break.
    pub fn pop(&mut self) -> Option<Event> {
        self.heap.pop().map(|q| q.evt)
    }

    /// Pops every event scheduled exactly at `ts`, in delivery order.
    pub fn pop_batch(&mut self, ts: SimTime) -> Vec<Event> {
        let mut batch = Vec::new();
        while self.next_timestamp() == Some(ts) {
            batch.push(self.pop().expect("peeked event present"));
        }
        batch
    }

    /// Drops every queued event addressed to (or originated by) `id`.
    /// Called on node deletion so that no stale event reaches a dead node.
    pub fn purge_node(&mut self, id: NodeId) {
        let drained = std::mem::take(&mut self.heap);
        self.heap = drained
            .into_iter()
            .filter(|q| q.evt.node_id != id)
            .collect();
    }

    /// True if any queued event references `id`.
    pub fn references_node(&self, id: NodeId) -> bool {
        self.heap.iter().any(|q| q.evt.node_id == id)
    }
}

impl EventQueue for SimEventQueue {
    fn add(&mut self, evt: Event) {
        debug_assert_ne!(
            evt.timestamp,
            threadsim_common::INVALID_TIMESTAMP,
            "event queued without a timestamp: {evt}"
        );
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueuedEvent { evt, seq });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use threadsim_event::EventKind;

    fn evt(node: NodeId, ts: SimTime) -> Event {
        let mut e = Event::new(EventKind::AlarmFired, node);
        e.timestamp = ts;
        e
    }

    #[test]
    fn orders_by_timestamp() {
        let mut q = SimEventQueue::new();
        q.add(evt(1, 300));
        q.add(evt(1, 100));
        q.add(evt(1, 200));
        assert_eq!(q.pop().unwrap().timestamp, 100);
        assert_eq!(q.pop().unwrap().timestamp, 200);
        assert_eq!(q.pop().unwrap().timestamp, 300);
    }

    #[test]
    fn equal_timestamps_order_by_node_id_then_insertion() {
        // Inserted for nodes 3, 1, 2 at the same timestamp: delivery order
        // must be 1, 2, 3.
        let mut q = SimEventQueue::new();
        q.add(evt(3, 5000));
        q.add(evt(1, 5000));
        q.add(evt(2, 5000));
        let order: Vec<NodeId> = q.pop_batch(5000).iter().map(|e| e.node_id).collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert!(q.is_empty());
    }

    #[test]
    fn same_node_keeps_insertion_order() {
        let mut q = SimEventQueue::new();
        let mut a = evt(1, 42);
        a.data = vec![1];
        let mut b = evt(1, 42);
        b.data = vec![2];
        q.add(a);
        q.add(b);
        assert_eq!(q.pop().unwrap().data, vec![1]);
        assert_eq!(q.pop().unwrap().data, vec![2]);
    }

    #[test]
    fn pop_batch_stops_at_next_timestamp() {
        let mut q = SimEventQueue::new();
        q.add(evt(1, 10));
        q.add(evt(2, 10));
        q.add(evt(1, 11));
        let batch = q.pop_batch(10);
        assert_eq!(batch.len(), 2);
        assert_eq!(q.next_timestamp(), Some(11));
    }

    #[test]
    fn purge_node_removes_all_references() {
        let mut q = SimEventQueue::new();
        q.add(evt(1, 10));
        q.add(evt(2, 20));
        q.add(evt(1, 30));
        q.purge_node(1);
        assert!(!q.references_node(1));
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop().unwrap().node_id, 2);
    }
}
