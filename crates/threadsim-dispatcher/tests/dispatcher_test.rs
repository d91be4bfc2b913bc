//! Integration tests driving the dispatcher over its real datagram socket
//! with scripted stand-in node processes.

use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Receiver;
use tempfile::TempDir;

use threadsim_common::{NodeConfig, NodeId, Prng, WatchLogLevel, OT_ERROR_NONE};
use threadsim_dispatcher::{Dispatcher, DispatcherCallback, DispatcherConfig, DispatcherCounters};
use threadsim_event::{Event, EventKind, RadioCommData};
use threadsim_radio::RadioModel;

const FAR_FUTURE: u64 = 1_000_000_000;

/// A scripted stand-in for a node process. Owns its socket, counts received
/// events (the acknowledgment protocol) and logs everything it sees.
struct StubNode {
    id: NodeId,
    socket: UnixDatagram,
    dispatcher: PathBuf,
    received: u64,
    cur_time: u64,
    log: Vec<Event>,
}

impl StubNode {
    fn new(dir: &Path, sim_id: u32, id: NodeId, dispatcher: &Path) -> Self {
        let path = dir.join(format!("{sim_id}_{id}.sock"));
        let socket = UnixDatagram::bind(&path).expect("bind stub socket");
        socket
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();
        StubNode {
            id,
            socket,
            dispatcher: dispatcher.to_path_buf(),
            received: 0,
            cur_time: 0,
            log: Vec::new(),
        }
    }

    fn send(&self, evt: &Event) {
        self.socket
            .send_to(&evt.serialize(), &self.dispatcher)
            .expect("send to dispatcher");
    }

    /// Acknowledges all deliveries so far and requests the next wake-up in
    /// `delay` µs.
    fn send_alarm(&self, delay: u64) {
        let mut evt = Event::alarm(self.id, self.received);
        evt.delay = delay;
        self.send(&evt);
    }

    fn recv(&mut self) -> Option<Event> {
        let mut buf = [0u8; 4096];
        let (n, _) = self.socket.recv_from(&mut buf).ok()?;
        let evt = Event::deserialize(&buf[..n]).expect("stub decodes event");
        self.received += 1;
        self.cur_time += evt.delay;
        self.log.push(evt.clone());
        Some(evt)
    }

    /// Runs the stub on its own thread: boots with an alarm request, then
    /// feeds every received event to `handler`, acknowledging with the delay
    /// the handler returns. Exits after `quiet` consecutive read timeouts.
    fn run(
        mut self,
        boot_delay: u64,
        quiet: u32,
        mut handler: impl FnMut(&mut StubNode, &Event) -> u64 + Send + 'static,
    ) -> JoinHandle<Vec<Event>> {
        std::thread::spawn(move || {
            self.send_alarm(boot_delay);
            let mut timeouts = 0;
            while timeouts < quiet {
                match self.recv() {
                    Some(evt) => {
                        timeouts = 0;
                        let next = handler(&mut self, &evt);
                        self.send_alarm(next);
                    }
                    None => timeouts += 1,
                }
            }
            self.log
        })
    }
}

struct TestSim {
    dispatcher: Dispatcher,
    callbacks: Receiver<DispatcherCallback>,
    dir: TempDir,
}

impl TestSim {
    fn new(radio_model: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let cfg = DispatcherConfig {
            socket_path: dir.path().join("0_dispatcher.sock"),
            startup_timeout: Duration::from_secs(5),
            reply_timeout: Duration::from_secs(5),
            recv_poll: Duration::from_millis(20),
            ..Default::default()
        };
        let (tx, rx) = crossbeam_channel::unbounded();
        let model = RadioModel::create(radio_model, 1).unwrap();
        let dispatcher = Dispatcher::new(cfg, model, Prng::new(7), tx).unwrap();
        TestSim {
            dispatcher,
            callbacks: rx,
            dir,
        }
    }

    fn spawn_node(
        &mut self,
        id: NodeId,
        x: f64,
        boot_delay: u64,
        handler: impl FnMut(&mut StubNode, &Event) -> u64 + Send + 'static,
    ) -> JoinHandle<Vec<Event>> {
        let cfg = NodeConfig {
            x,
            radio_range: 250.0,
            ..Default::default()
        };
        self.dispatcher.add_node(id, &cfg).unwrap();
        let stub = StubNode::new(
            self.dir.path(),
            0,
            id,
            self.dispatcher.socket_path(),
        );
        let handle = stub.run(boot_delay, 6, handler);
        self.dispatcher.await_node_boot(id).unwrap();
        handle
    }

    fn run_go(&mut self, duration: u64) {
        let done = self.dispatcher.go(duration);
        while self.dispatcher.process().unwrap() {}
        done.try_recv().expect("go period completed");
    }
}

#[test]
fn boot_and_alarm_delivery() {
    let mut sim = TestSim::new("Ideal");
    let handle = sim.spawn_node(1, 0.0, 1000, |_stub, evt| {
        assert_eq!(evt.kind, EventKind::AlarmFired);
        FAR_FUTURE
    });

    assert!(!sim.dispatcher.is_alive(1));
    assert_eq!(sim.dispatcher.node(1).unwrap().alarm_us, 1000);

    sim.run_go(5000);
    assert_eq!(sim.dispatcher.cur_time(), 5000);

    let log = handle.join().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].kind, EventKind::AlarmFired);
    assert_eq!(log[0].delay, 1000);
    assert_eq!(log[0].alarm_data().unwrap().msg_id, 1);
}

#[test]
fn uart_write_round_trip() {
    let mut sim = TestSim::new("Ideal");
    let handle = sim.spawn_node(1, 0.0, FAR_FUTURE, |stub, evt| {
        if evt.kind == EventKind::UartWrite {
            // Echo the bytes back over the virtual UART.
            let mut reply = Event::uart_write(stub.id, evt.data.clone());
            reply.delay = 0;
            stub.send(&reply);
        }
        FAR_FUTURE
    });

    assert!(sim.dispatcher.send_to_uart(1, b"state\n"));
    sim.dispatcher.recv_events().unwrap();

    let mut uart_data = Vec::new();
    while let Ok(cb) = sim.callbacks.try_recv() {
        if let DispatcherCallback::UartWrite { node, data } = cb {
            assert_eq!(node, 1);
            uart_data.extend_from_slice(&data);
        }
    }
    assert_eq!(uart_data, b"state\n");
    drop(sim);
    handle.join().unwrap();
}

#[test]
fn frame_flows_from_transmitter_to_receiver() {
    let mut sim = TestSim::new("Ideal");

    // Node 1 transmits a frame when its alarm at t=100 fires.
    let tx_handle = sim.spawn_node(1, 0.0, 100, |stub, evt| {
        if evt.kind == EventKind::AlarmFired && stub.cur_time == 100 {
            let mut tx = Event::radio(
                EventKind::RadioCommStart,
                stub.id,
                RadioCommData {
                    channel: 11,
                    power_dbm: 0,
                    error: OT_ERROR_NONE,
                    duration: 1000,
                },
                vec![0x42; 16],
            );
            tx.delay = 0;
            stub.send(&tx);
        }
        FAR_FUTURE
    });

    // Node 2 just listens.
    let rx_handle = sim.spawn_node(2, 200.0, FAR_FUTURE, |_stub, _evt| FAR_FUTURE);

    sim.run_go(5000);
    assert_eq!(sim.dispatcher.cur_time(), 5000);

    let tx_log = tx_handle.join().unwrap();
    let rx_log = rx_handle.join().unwrap();

    // The transmitter got its tx-done at the end of the airtime.
    let tx_done = tx_log
        .iter()
        .find(|e| e.kind == EventKind::RadioTxDone)
        .expect("tx-done delivered to transmitter");
    assert_eq!(tx_done.radio_error(), OT_ERROR_NONE);

    // The receiver saw the frame start and the completed reception, with
    // the Ideal model's constant RSSI and the original PSDU.
    let comm_start = rx_log
        .iter()
        .find(|e| e.kind == EventKind::RadioCommStart)
        .expect("comm-start delivered to receiver");
    assert_eq!(comm_start.radio_comm().unwrap().power_dbm, -60);

    let rx_done = rx_log
        .iter()
        .find(|e| e.kind == EventKind::RadioRxDone)
        .expect("rx-done delivered to receiver");
    assert_eq!(rx_done.radio_error(), OT_ERROR_NONE);
    assert_eq!(rx_done.data, vec![0x42; 16]);
    assert_eq!(rx_done.radio_comm().unwrap().power_dbm, -60);

    // comm-start arrived before rx-done.
    let start_idx = rx_log
        .iter()
        .position(|e| e.kind == EventKind::RadioCommStart)
        .unwrap();
    let done_idx = rx_log
        .iter()
        .position(|e| e.kind == EventKind::RadioRxDone)
        .unwrap();
    assert!(start_idx < done_idx);

    assert_eq!(sim.dispatcher.counters().radio_events, 1);
    assert_eq!(
        sim.dispatcher.radio_model().channel_stats(11).frame_count,
        1
    );
    assert_eq!(
        sim.dispatcher.radio_model().channel_stats(11).busy_time_us,
        1000
    );
}

#[test]
fn overlapping_go_cancels_the_previous_one() {
    let mut sim = TestSim::new("Ideal");
    let first = sim.dispatcher.go(1_000_000);
    let second = sim.dispatcher.go(500);
    // The first period's signal fired on cancellation.
    first
        .recv_timeout(Duration::from_millis(100))
        .expect("cancelled go signals its caller");
    while sim.dispatcher.process().unwrap() {}
    second.try_recv().expect("second go ran to completion");
    assert_eq!(sim.dispatcher.cur_time(), 500);
}

#[test]
fn delete_node_leaves_no_trace() {
    let mut sim = TestSim::new("MutualInterference");
    let handle = sim.spawn_node(1, 0.0, FAR_FUTURE, |_stub, _evt| FAR_FUTURE);
    let _h2 = sim.spawn_node(2, 50.0, FAR_FUTURE, |_stub, _evt| FAR_FUTURE);

    sim.dispatcher.delete_node(1).unwrap();
    assert!(sim.dispatcher.node(1).is_none());
    assert!(sim.dispatcher.radio_model().node(1).is_none());
    assert!(sim.dispatcher.node(2).is_some());

    // Deleting again reports not-found instead of corrupting state.
    assert!(sim.dispatcher.delete_node(1).is_err());
    drop(sim);
    handle.join().unwrap();
}

#[test]
fn startup_timeout_fails_add_node() {
    let dir = TempDir::new().unwrap();
    let cfg = DispatcherConfig {
        socket_path: dir.path().join("0_dispatcher.sock"),
        startup_timeout: Duration::from_millis(200),
        recv_poll: Duration::from_millis(20),
        ..Default::default()
    };
    let (tx, _rx) = crossbeam_channel::unbounded();
    let model = RadioModel::create("Ideal", 1).unwrap();
    let mut dispatcher = Dispatcher::new(cfg, model, Prng::new(7), tx).unwrap();

    dispatcher.add_node(9, &NodeConfig::default()).unwrap();
    // No stub process ever connects.
    let err = dispatcher.await_node_boot(9).unwrap_err();
    assert!(matches!(
        err,
        threadsim_dispatcher::DispatcherError::NodeStartupTimeout(9)
    ));
    assert!(dispatcher.node(9).is_none());
}

#[test]
fn set_speed_and_watch_level_round_trip() {
    let mut sim = TestSim::new("Ideal");
    sim.dispatcher.set_speed(4.0);
    assert_eq!(sim.dispatcher.speed(), 4.0);

    let handle = sim.spawn_node(1, 0.0, FAR_FUTURE, |_stub, _evt| FAR_FUTURE);
    assert!(sim.dispatcher.set_watch_level(1, WatchLogLevel::Debug));
    assert_eq!(sim.dispatcher.watch_level(1), WatchLogLevel::Debug);
    assert!(!sim.dispatcher.set_watch_level(99, WatchLogLevel::Debug));
    drop(sim);
    handle.join().unwrap();
}

/// Runs a fixed two-node scenario and returns a trace of what the receiver
/// saw plus the final dispatcher counters.
fn run_traffic_scenario(seed: u64) -> (Vec<(EventKind, u64, Vec<u8>)>, DispatcherCounters) {
    let dir = TempDir::new().unwrap();
    let cfg = DispatcherConfig {
        socket_path: dir.path().join("0_dispatcher.sock"),
        recv_poll: Duration::from_millis(20),
        ..Default::default()
    };
    let (tx, _rx) = crossbeam_channel::unbounded();
    let model = RadioModel::create("MutualInterference", seed).unwrap();
    let mut dispatcher = Dispatcher::new(cfg, model, Prng::new(seed), tx).unwrap();

    let node_cfg = NodeConfig {
        radio_range: 250.0,
        ..Default::default()
    };
    // Transmitter: sends one frame per alarm, three alarms total.
    dispatcher.add_node(1, &node_cfg).unwrap();
    let stub1 = StubNode::new(dir.path(), 0, 1, dispatcher.socket_path());
    let h1 = stub1.run(1000, 6, |stub, evt| {
        if evt.kind == EventKind::AlarmFired && stub.cur_time < 10_000 {
            let mut frame = Event::radio(
                EventKind::RadioCommStart,
                stub.id,
                RadioCommData {
                    channel: 11,
                    power_dbm: 0,
                    error: OT_ERROR_NONE,
                    duration: 500,
                },
                vec![stub.cur_time as u8; 32],
            );
            frame.delay = 0;
            stub.send(&frame);
        }
        2000
    });
    dispatcher.await_node_boot(1).unwrap();

    dispatcher.add_node(2, &NodeConfig { x: 40.0, ..node_cfg }).unwrap();
    let stub2 = StubNode::new(dir.path(), 0, 2, dispatcher.socket_path());
    let h2 = stub2.run(FAR_FUTURE, 6, |_stub, _evt| FAR_FUTURE);
    dispatcher.await_node_boot(2).unwrap();

    let done = dispatcher.go(20_000);
    while dispatcher.process().unwrap() {}
    done.try_recv().unwrap();

    let counters = dispatcher.counters();
    drop(dispatcher);
    let _ = h1.join().unwrap();
    let rx_log = h2.join().unwrap();
    let trace = rx_log
        .into_iter()
        .map(|e| (e.kind, e.delay, e.data))
        .collect();
    (trace, counters)
}

#[test]
fn identical_seeds_give_identical_traces() {
    let (trace_a, counters_a) = run_traffic_scenario(1234);
    let (trace_b, counters_b) = run_traffic_scenario(1234);
    assert!(!trace_a.is_empty());
    assert_eq!(trace_a, trace_b);
    assert_eq!(counters_a, counters_b);
}

#[test]
fn radio_model_switch_preserves_node_records() {
    let mut sim = TestSim::new("Ideal");
    let handle = sim.spawn_node(1, 123.0, FAR_FUTURE, |_stub, _evt| FAR_FUTURE);

    sim.dispatcher.set_node_pos(1, 10.0, 20.0, 0.0).unwrap();
    sim.dispatcher.set_radio_model("MutualInterference").unwrap();
    assert_eq!(sim.dispatcher.radio_model().name(), "MutualInterference");
    let node = sim.dispatcher.radio_model().node(1).unwrap();
    assert_eq!(node.position(), (10.0, 20.0, 0.0));
    assert_eq!(node.radio_range, 250.0);

    assert!(sim.dispatcher.set_radio_model("Bogus").is_err());
    drop(sim);
    handle.join().unwrap();
}
