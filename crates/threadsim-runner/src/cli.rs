//! The operator command protocol: a line-based request/response grammar.
//! Every command answers zero or more output lines followed by `Done`, or a
//! single `Error N: <message>` line.

use std::io::Write;

use threadsim_common::{NodeConfig, NodeId, WatchLogLevel, MAX_SIMULATE_SPEED};
use threadsim_dispatcher::FailTime;
use threadsim_node::NodeError;

use crate::{SimError, Simulation};

fn unknown_radio_param(name: &str) -> SimError {
    SimError::Node(NodeError::UnexpectedOutput(format!(
        "unknown radio parameter '{name}'"
    )))
}

/// A parsed operator command.
#[derive(Debug, Clone, PartialEq)]
pub enum CliCommand {
    Add {
        device: DeviceType,
        x: Option<f64>,
        y: Option<f64>,
        id: Option<NodeId>,
        radio_range: Option<f64>,
        executable: Option<String>,
        restore: bool,
    },
    Del(Vec<NodeId>),
    Move {
        id: NodeId,
        x: f64,
        y: f64,
        z: f64,
    },
    RadioOn(Vec<NodeId>),
    RadioOff(Vec<NodeId>),
    RadioFailTime {
        ids: Vec<NodeId>,
        fail_duration_s: f64,
        fail_interval_s: f64,
    },
    RadioModel(Option<String>),
    RadioParam {
        name: Option<String>,
        value: Option<f64>,
    },
    Plr(Option<f64>),
    Ping {
        id: NodeId,
        dest: String,
        datasize: u32,
        count: u32,
        interval: u32,
    },
    Scan(NodeId),
    Watch {
        ids: Vec<NodeId>,
        level: Option<WatchLogLevel>,
    },
    Unwatch(Vec<NodeId>),
    Go {
        duration_us: u64,
    },
    Speed(Option<f64>),
    NodeCmd {
        id: NodeId,
        cmd: String,
    },
    Nodes,
    Partitions,
    Counters,
    Time,
    Help,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Router,
    Fed,
    Med,
    Sed,
}

impl DeviceType {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "router" => Some(DeviceType::Router),
            "fed" => Some(DeviceType::Fed),
            "med" => Some(DeviceType::Med),
            "sed" => Some(DeviceType::Sed),
            _ => None,
        }
    }
}

/// Parses one command line. Empty lines and `#` comments yield `None`.
pub fn parse_command(line: &str) -> Result<Option<CliCommand>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let cmd = match tokens[0] {
        "add" => parse_add(&tokens[1..])?,
        "del" => CliCommand::Del(parse_ids(&tokens[1..])?),
        "move" => {
            if tokens.len() < 4 {
                return Err("move <id> <x> <y> [z]".into());
            }
            CliCommand::Move {
                id: parse_id(tokens[1])?,
                x: parse_f64(tokens[2])?,
                y: parse_f64(tokens[3])?,
                z: tokens.get(4).map(|t| parse_f64(t)).transpose()?.unwrap_or(0.0),
            }
        }
        "radio" => parse_radio(&tokens[1..])?,
        "radiomodel" => CliCommand::RadioModel(tokens.get(1).map(|s| s.to_string())),
        "radioparam" => CliCommand::RadioParam {
            name: tokens.get(1).map(|s| s.to_string()),
            value: tokens.get(2).map(|t| parse_f64(t)).transpose()?,
        },
        "plr" => CliCommand::Plr(tokens.get(1).map(|t| parse_f64(t)).transpose()?),
        "ping" => {
            if tokens.len() < 3 {
                return Err("ping <id> <dest-addr> [datasize] [count] [interval]".into());
            }
            CliCommand::Ping {
                id: parse_id(tokens[1])?,
                dest: tokens[2].to_string(),
                datasize: tokens.get(3).map(|t| parse_u32(t)).transpose()?.unwrap_or(4),
                count: tokens.get(4).map(|t| parse_u32(t)).transpose()?.unwrap_or(1),
                interval: tokens.get(5).map(|t| parse_u32(t)).transpose()?.unwrap_or(1),
            }
        }
        "scan" => {
            if tokens.len() != 2 {
                return Err("scan <id>".into());
            }
            CliCommand::Scan(parse_id(tokens[1])?)
        }
        "watch" => {
            let (ids, level) = match tokens.last() {
                Some(last) if last.parse::<NodeId>().is_err() && tokens.len() > 1 => {
                    let level: WatchLogLevel = last.parse().map_err(|e: String| e)?;
                    (parse_ids(&tokens[1..tokens.len() - 1])?, Some(level))
                }
                _ => (parse_ids(&tokens[1..])?, None),
            };
            CliCommand::Watch { ids, level }
        }
        "unwatch" => CliCommand::Unwatch(parse_ids(&tokens[1..])?),
        "go" => {
            if tokens.len() != 2 {
                return Err("go <duration>[s|ms|us]".into());
            }
            CliCommand::Go {
                duration_us: parse_duration_us(tokens[1])?,
            }
        }
        "speed" => {
            let v = match tokens.get(1) {
                None => None,
                Some(&"max") => Some(MAX_SIMULATE_SPEED),
                Some(t) => Some(parse_f64(t)?),
            };
            CliCommand::Speed(v)
        }
        "node" => {
            if tokens.len() < 3 {
                return Err("node <id> <command...>".into());
            }
            let cmd = tokens[2..].join(" ");
            let cmd = cmd.trim_matches('"').to_string();
            CliCommand::NodeCmd {
                id: parse_id(tokens[1])?,
                cmd,
            }
        }
        "nodes" => CliCommand::Nodes,
        "partitions" | "pts" => CliCommand::Partitions,
        "counters" => CliCommand::Counters,
        "time" => CliCommand::Time,
        "help" => CliCommand::Help,
        "exit" | "quit" => CliCommand::Exit,
        other => return Err(format!("unknown command: {other}")),
    };
    Ok(Some(cmd))
}

fn parse_add(tokens: &[&str]) -> Result<CliCommand, String> {
    let Some(device) = tokens.first().and_then(|t| DeviceType::parse(t)) else {
        return Err("add router|fed|med|sed [x <x>] [y <y>] [id <id>] [rr <r>] [exe <path>] [restore]".into());
    };
    let mut cmd = CliCommand::Add {
        device,
        x: None,
        y: None,
        id: None,
        radio_range: None,
        executable: None,
        restore: false,
    };
    let CliCommand::Add {
        x,
        y,
        id,
        radio_range,
        executable,
        restore,
        ..
    } = &mut cmd
    else {
        unreachable!()
    };

    let mut i = 1;
    while i < tokens.len() {
        match tokens[i] {
            "x" => {
                *x = Some(parse_f64(tokens.get(i + 1).ok_or("x needs a value")?)?);
                i += 2;
            }
            "y" => {
                *y = Some(parse_f64(tokens.get(i + 1).ok_or("y needs a value")?)?);
                i += 2;
            }
            "id" => {
                *id = Some(parse_id(tokens.get(i + 1).ok_or("id needs a value")?)?);
                i += 2;
            }
            "rr" => {
                *radio_range =
                    Some(parse_f64(tokens.get(i + 1).ok_or("rr needs a value")?)?);
                i += 2;
            }
            "exe" => {
                *executable = Some(tokens.get(i + 1).ok_or("exe needs a value")?.to_string());
                i += 2;
            }
            "restore" => {
                *restore = true;
                i += 1;
            }
            other => return Err(format!("unknown add option: {other}")),
        }
    }
    Ok(cmd)
}

fn parse_radio(tokens: &[&str]) -> Result<CliCommand, String> {
    let split = tokens
        .iter()
        .position(|t| matches!(*t, "on" | "off" | "ft"))
        .ok_or("radio <id>... on|off|ft <duration_s> <interval_s>")?;
    let ids = parse_ids(&tokens[..split])?;
    if ids.is_empty() {
        return Err("radio needs at least one node id".into());
    }
    match tokens[split] {
        "on" => Ok(CliCommand::RadioOn(ids)),
        "off" => Ok(CliCommand::RadioOff(ids)),
        "ft" => {
            let d = parse_f64(tokens.get(split + 1).ok_or("ft needs duration and interval")?)?;
            let iv = parse_f64(tokens.get(split + 2).ok_or("ft needs duration and interval")?)?;
            Ok(CliCommand::RadioFailTime {
                ids,
                fail_duration_s: d,
                fail_interval_s: iv,
            })
        }
        _ => unreachable!(),
    }
}

fn parse_ids(tokens: &[&str]) -> Result<Vec<NodeId>, String> {
    if tokens.is_empty() {
        return Err("expected node id(s)".into());
    }
    tokens.iter().map(|t| parse_id(t)).collect()
}

fn parse_id(t: &str) -> Result<NodeId, String> {
    t.parse().map_err(|_| format!("invalid node id: {t}"))
}

fn parse_f64(t: &str) -> Result<f64, String> {
    t.parse().map_err(|_| format!("invalid number: {t}"))
}

fn parse_u32(t: &str) -> Result<u32, String> {
    t.parse().map_err(|_| format!("invalid number: {t}"))
}

/// Parses a go duration: seconds by default, `ms`/`us` suffixes accepted.
fn parse_duration_us(t: &str) -> Result<u64, String> {
    if let Some(us) = t.strip_suffix("us") {
        return us.parse().map_err(|_| format!("invalid duration: {t}"));
    }
    if let Some(ms) = t.strip_suffix("ms") {
        let v: f64 = ms.parse().map_err(|_| format!("invalid duration: {t}"))?;
        return Ok((v * 1e3) as u64);
    }
    let secs = t.strip_suffix('s').unwrap_or(t);
    let v: f64 = secs.parse().map_err(|_| format!("invalid duration: {t}"))?;
    Ok((v * 1e6) as u64)
}

/// Executes parsed commands against a simulation, writing the line-based
/// responses.
pub struct CommandRunner {
    sim: Simulation,
    exit_requested: bool,
}

impl CommandRunner {
    pub fn new(sim: Simulation) -> Self {
        CommandRunner {
            sim,
            exit_requested: false,
        }
    }

    pub fn simulation(&self) -> &Simulation {
        &self.sim
    }

    pub fn simulation_mut(&mut self) -> &mut Simulation {
        &mut self.sim
    }

    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }

    /// Runs one command line, writing output lines and the `Done` /
    /// `Error N:` terminator.
    pub fn run_line(&mut self, line: &str, out: &mut impl Write) -> std::io::Result<()> {
        match parse_command(line) {
            Ok(None) => Ok(()),
            Ok(Some(cmd)) => {
                let result = self.execute(cmd, out);
                self.flush_watch_lines(out)?;
                match result {
                    Ok(()) => writeln!(out, "Done"),
                    Err(e) => writeln!(out, "Error {}: {e}", e.code()),
                }
            }
            Err(msg) => writeln!(out, "Error 1: {msg}"),
        }
    }

    fn flush_watch_lines(&mut self, out: &mut impl Write) -> std::io::Result<()> {
        for w in self.sim.take_watch_lines() {
            writeln!(
                out,
                "{:>11} Node<{}> [{}] {}",
                w.time,
                w.node,
                w.level.indicator(),
                w.text
            )?;
        }
        Ok(())
    }

    fn execute(&mut self, cmd: CliCommand, out: &mut impl Write) -> Result<(), SimError> {
        match cmd {
            CliCommand::Add {
                device,
                x,
                y,
                id,
                radio_range,
                executable,
                restore,
            } => {
                let mut cfg = NodeConfig {
                    id: id.unwrap_or(0),
                    is_auto_placed: x.is_none() || y.is_none(),
                    restore,
                    ..Default::default()
                };
                if let (Some(x), Some(y)) = (x, y) {
                    cfg.x = x;
                    cfg.y = y;
                }
                if let Some(rr) = radio_range {
                    cfg.radio_range = rr;
                }
                if let Some(exe) = executable {
                    cfg.executable = exe;
                }
                match device {
                    DeviceType::Router => {}
                    DeviceType::Fed => {
                        cfg.is_router = false;
                    }
                    DeviceType::Med => {
                        cfg.is_router = false;
                        cfg.is_mtd = true;
                    }
                    DeviceType::Sed => {
                        cfg.is_router = false;
                        cfg.is_mtd = true;
                        cfg.rx_off_when_idle = true;
                    }
                }
                let id = self.sim.add_node(cfg)?;
                let _ = writeln!(out, "{id}");
                Ok(())
            }
            CliCommand::Del(ids) => {
                for id in ids {
                    self.sim.delete_node(id)?;
                }
                Ok(())
            }
            CliCommand::Move { id, x, y, z } => self.sim.move_node(id, x, y, z),
            CliCommand::RadioOn(ids) => {
                for id in ids {
                    self.sim.set_node_failed(id, false)?;
                }
                Ok(())
            }
            CliCommand::RadioOff(ids) => {
                for id in ids {
                    self.sim.set_node_failed(id, true)?;
                }
                Ok(())
            }
            CliCommand::RadioFailTime {
                ids,
                fail_duration_s,
                fail_interval_s,
            } => {
                let ft = FailTime {
                    fail_duration: (fail_duration_s * 1e6) as u64,
                    fail_interval: (fail_interval_s * 1e6) as u64,
                };
                for id in ids {
                    self.sim.set_node_fail_time(id, ft)?;
                }
                Ok(())
            }
            CliCommand::RadioModel(name) => {
                if let Some(name) = name {
                    self.sim.set_radio_model(&name)?;
                }
                let _ = writeln!(out, "{}", self.sim.radio_model_name());
                Ok(())
            }
            CliCommand::RadioParam { name, value } => {
                match (name, value) {
                    (None, _) => {
                        for name in threadsim_radio::RadioModelParams::names() {
                            if let Some(v) = self.sim.radio_param(name) {
                                let _ = writeln!(out, "{name} {v}");
                            }
                        }
                    }
                    (Some(name), None) => {
                        let v = self
                            .sim
                            .radio_param(&name)
                            .ok_or_else(|| unknown_radio_param(&name))?;
                        let _ = writeln!(out, "{v}");
                    }
                    (Some(name), Some(v)) => {
                        if !self.sim.set_radio_param(&name, v) {
                            return Err(unknown_radio_param(&name));
                        }
                    }
                }
                Ok(())
            }
            CliCommand::Plr(ratio) => {
                if let Some(r) = ratio {
                    self.sim.set_packet_loss_ratio(r);
                }
                let _ = writeln!(out, "{}", self.sim.packet_loss_ratio());
                Ok(())
            }
            CliCommand::Ping {
                id,
                dest,
                datasize,
                count,
                interval,
            } => self.sim.ping(id, &dest, datasize, count, interval),
            CliCommand::Scan(id) => {
                let lines = self.sim.scan(id)?;
                for l in lines {
                    let _ = writeln!(out, "{l}");
                }
                Ok(())
            }
            CliCommand::Watch { ids, level } => {
                let level = level.unwrap_or(WatchLogLevel::Info);
                for id in ids {
                    self.sim.set_watch(id, level)?;
                }
                Ok(())
            }
            CliCommand::Unwatch(ids) => {
                for id in ids {
                    self.sim.unwatch(id)?;
                }
                Ok(())
            }
            CliCommand::Go { duration_us } => self.sim.go(duration_us),
            CliCommand::Speed(v) => {
                if let Some(v) = v {
                    self.sim.set_speed(v);
                }
                let speed = self.sim.speed();
                if speed >= MAX_SIMULATE_SPEED {
                    let _ = writeln!(out, "max");
                } else {
                    let _ = writeln!(out, "{speed}");
                }
                Ok(())
            }
            CliCommand::NodeCmd { id, cmd } => {
                let timeout = self.sim.config().command_timeout;
                let lines = self.sim.node_command(id, &cmd, timeout)?;
                for l in lines {
                    let _ = writeln!(out, "{l}");
                }
                Ok(())
            }
            CliCommand::Nodes => {
                for n in self.sim.node_overviews() {
                    let _ = writeln!(
                        out,
                        "id={} x={:.0} y={:.0} role={} rloc16={:04x} failed={}",
                        n.id, n.x, n.y, n.role, n.rloc16, n.failed
                    );
                }
                Ok(())
            }
            CliCommand::Partitions => {
                for (par, ids) in self.sim.partitions() {
                    let ids: Vec<String> = ids.iter().map(|i| i.to_string()).collect();
                    let _ = writeln!(out, "partition=0x{par:x} nodes={}", ids.join(","));
                }
                Ok(())
            }
            CliCommand::Counters => {
                let c = self.sim.counters();
                let _ = writeln!(out, "events_processed {}", c.events_processed);
                let _ = writeln!(out, "alarm_events {}", c.alarm_events);
                let _ = writeln!(out, "radio_events {}", c.radio_events);
                let _ = writeln!(out, "uart_events {}", c.uart_events);
                let _ = writeln!(out, "status_pushes {}", c.status_pushes);
                let _ = writeln!(out, "dispatch_vetoed {}", c.dispatch_vetoed);
                let _ = writeln!(out, "packets_lost {}", c.packets_lost);
                let _ = writeln!(out, "protocol_errors {}", c.protocol_errors);
                for (ch, stats) in self.sim.active_channels() {
                    let _ = writeln!(
                        out,
                        "channel {ch}: busy_us={} frames={}",
                        stats.busy_time_us, stats.frame_count
                    );
                }
                Ok(())
            }
            CliCommand::Time => {
                let _ = writeln!(out, "{}", self.sim.cur_time());
                Ok(())
            }
            CliCommand::Help => {
                for line in HELP_TEXT.lines() {
                    let _ = writeln!(out, "{line}");
                }
                Ok(())
            }
            CliCommand::Exit => {
                self.exit_requested = true;
                self.sim.stop();
                Ok(())
            }
        }
    }
}

const HELP_TEXT: &str = "\
add router|fed|med|sed [x <x>] [y <y>] [id <id>] [rr <range>] [exe <path>] [restore]
del <id>...
move <id> <x> <y> [z]
radio <id>... on|off|ft <duration_s> <interval_s>
radiomodel [Ideal|Ideal_Rssi|MutualInterference|MIDisc|Outdoor]
radioparam [<name> [<value>]]
plr [<ratio>]
ping <id> <dest-addr> [datasize] [count] [interval]
scan <id>
watch <id>... [off|crit|warn|note|info|debug|trace]
unwatch <id>...
go <duration>[s|ms|us]
speed [<factor>|max]
node <id> <cli command...>
nodes | partitions | counters | time
exit";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_add_with_options() {
        let cmd = parse_command("add router x 100 y 200 id 7 rr 300 restore")
            .unwrap()
            .unwrap();
        assert_eq!(
            cmd,
            CliCommand::Add {
                device: DeviceType::Router,
                x: Some(100.0),
                y: Some(200.0),
                id: Some(7),
                radio_range: Some(300.0),
                executable: None,
                restore: true,
            }
        );
    }

    #[test]
    fn parses_device_types() {
        for (s, d) in [
            ("router", DeviceType::Router),
            ("fed", DeviceType::Fed),
            ("med", DeviceType::Med),
            ("sed", DeviceType::Sed),
        ] {
            match parse_command(&format!("add {s}")).unwrap().unwrap() {
                CliCommand::Add { device, .. } => assert_eq!(device, d),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(parse_command("add gateway").is_err());
    }

    #[test]
    fn parses_del_and_move() {
        assert_eq!(
            parse_command("del 1 2 3").unwrap().unwrap(),
            CliCommand::Del(vec![1, 2, 3])
        );
        assert_eq!(
            parse_command("move 2 150 250").unwrap().unwrap(),
            CliCommand::Move {
                id: 2,
                x: 150.0,
                y: 250.0,
                z: 0.0
            }
        );
    }

    #[test]
    fn parses_radio_subcommands() {
        assert_eq!(
            parse_command("radio 1 2 off").unwrap().unwrap(),
            CliCommand::RadioOff(vec![1, 2])
        );
        assert_eq!(
            parse_command("radio 3 ft 10 60").unwrap().unwrap(),
            CliCommand::RadioFailTime {
                ids: vec![3],
                fail_duration_s: 10.0,
                fail_interval_s: 60.0
            }
        );
        assert!(parse_command("radio 1").is_err());
    }

    #[test]
    fn parses_go_durations() {
        assert_eq!(
            parse_command("go 5").unwrap().unwrap(),
            CliCommand::Go {
                duration_us: 5_000_000
            }
        );
        assert_eq!(
            parse_command("go 1.5s").unwrap().unwrap(),
            CliCommand::Go {
                duration_us: 1_500_000
            }
        );
        assert_eq!(
            parse_command("go 250ms").unwrap().unwrap(),
            CliCommand::Go {
                duration_us: 250_000
            }
        );
        assert_eq!(
            parse_command("go 42us").unwrap().unwrap(),
            CliCommand::Go { duration_us: 42 }
        );
        assert!(parse_command("go fast").is_err());
    }

    #[test]
    fn parses_speed_and_watch() {
        assert_eq!(
            parse_command("speed max").unwrap().unwrap(),
            CliCommand::Speed(Some(MAX_SIMULATE_SPEED))
        );
        assert_eq!(
            parse_command("speed").unwrap().unwrap(),
            CliCommand::Speed(None)
        );
        assert_eq!(
            parse_command("watch 1 2 debug").unwrap().unwrap(),
            CliCommand::Watch {
                ids: vec![1, 2],
                level: Some(WatchLogLevel::Debug)
            }
        );
        assert_eq!(
            parse_command("watch 4").unwrap().unwrap(),
            CliCommand::Watch {
                ids: vec![4],
                level: None
            }
        );
    }

    #[test]
    fn parses_node_passthrough() {
        assert_eq!(
            parse_command(r#"node 3 "state""#).unwrap().unwrap(),
            CliCommand::NodeCmd {
                id: 3,
                cmd: "state".into()
            }
        );
        assert_eq!(
            parse_command("node 3 ipaddr mleid").unwrap().unwrap(),
            CliCommand::NodeCmd {
                id: 3,
                cmd: "ipaddr mleid".into()
            }
        );
    }

    #[test]
    fn empty_and_comment_lines_are_skipped() {
        assert_eq!(parse_command("").unwrap(), None);
        assert_eq!(parse_command("   ").unwrap(), None);
        assert_eq!(parse_command("# a comment").unwrap(), None);
    }

    #[test]
    fn unknown_verbs_are_rejected() {
        assert!(parse_command("teleport 1").is_err());
    }
}
