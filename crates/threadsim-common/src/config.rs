//! Simulation and node configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{ChannelId, ConfigError, NodeId, WatchLogLevel, DEFAULT_CHANNEL};

/// Default network parameters pushed to every new node via the init script.
pub const DEFAULT_NETWORK_NAME: &str = "threadsim";
pub const DEFAULT_NETWORK_KEY: &str = "00112233445566778899aabbccddeeff";
pub const DEFAULT_PANID: u16 = 0xface;

/// Default timeout for synchronous node CLI commands.
pub const DEFAULT_COMMAND_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Builds the default init script sent to a freshly booted node.
pub fn default_init_script(channel: ChannelId) -> Vec<String> {
    vec![
        format!("networkname {DEFAULT_NETWORK_NAME}"),
        format!("networkkey {DEFAULT_NETWORK_KEY}"),
        format!("panid 0x{DEFAULT_PANID:x}"),
        format!("channel {channel}"),
        "routerselectionjitter 1".to_string(),
        "ifconfig up".to_string(),
        "thread start".to_string(),
    ]
}

/// Configuration of a single node, as given to `AddNode`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Requested node id; 0 lets the simulation pick the next free id.
    pub id: NodeId,
    /// Position in dimensionless grid units.
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Whether the position was given explicitly or should be auto-placed.
    pub is_auto_placed: bool,
    /// Radio range in grid units; disc-limited models drop frames beyond it.
    pub radio_range: f64,
    /// Full Thread device able to become router.
    pub is_router: bool,
    /// Minimal Thread device (MTD).
    pub is_mtd: bool,
    /// Sleepy device: radio off while idle. Only valid for MTDs.
    pub rx_off_when_idle: bool,
    /// Override of the node executable; empty selects by device type.
    pub executable: String,
    /// Keep flash/log files from a previous run with the same id.
    pub restore: bool,
    /// CLI commands sent to the node after it boots. `None` uses the default
    /// script built from the simulation's channel.
    pub init_script: Option<Vec<String>>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            id: 0,
            x: 0.0,
            y: 0.0,
            z: 0.0,
            is_auto_placed: true,
            radio_range: 220.0,
            is_router: true,
            is_mtd: false,
            rx_off_when_idle: false,
            executable: String::new(),
            restore: false,
            init_script: None,
        }
    }
}

impl NodeConfig {
    /// Derives the Thread mode string (`rdn`, `rn`, `n`, ...) for this node.
    pub fn mode_string(&self) -> String {
        let mut mode = String::new();
        if !self.rx_off_when_idle {
            mode.push('r');
        }
        if !self.is_mtd {
            mode.push('d');
        }
        mode.push('n');
        mode
    }

    /// Rejects inconsistent device-type combinations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.is_router && self.is_mtd {
            return Err(ConfigError::InvalidNodeConfig(
                "a router cannot be an MTD".into(),
            ));
        }
        if self.rx_off_when_idle && !self.is_mtd {
            return Err(ConfigError::InvalidNodeConfig(
                "rx-off-when-idle requires an MTD".into(),
            ));
        }
        if self.radio_range < 0.0 {
            return Err(ConfigError::InvalidNodeConfig(
                "radio range must be >= 0".into(),
            ));
        }
        Ok(())
    }
}

/// Node executable names and the directories searched for them.
///
/// Lookup order is the current directory, then the configured relative
/// search paths, then `$PATH`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutableConfig {
    pub ftd: String,
    pub mtd: String,
    pub search_paths: Vec<PathBuf>,
}

impl Default for ExecutableConfig {
    fn default() -> Self {
        ExecutableConfig {
            ftd: "ot-cli-ftd".to_string(),
            mtd: "ot-cli-mtd".to_string(),
            search_paths: vec![PathBuf::from("."), PathBuf::from("./ot-rfsim/ot-versions")],
        }
    }
}

impl ExecutableConfig {
    /// Picks the executable name for a node based on its device type, unless
    /// the node config carries an explicit override.
    pub fn executable_for(&self, cfg: &NodeConfig) -> String {
        if !cfg.executable.is_empty() {
            return cfg.executable.clone();
        }
        if cfg.is_mtd {
            self.mtd.clone()
        } else {
            self.ftd.clone()
        }
    }

    /// Locates `name` in the search paths, falling back to `$PATH`.
    /// Absolute paths are returned as-is.
    pub fn find_executable(&self, name: &str) -> Result<PathBuf, ConfigError> {
        let p = Path::new(name);
        if p.is_absolute() {
            return Ok(p.to_path_buf());
        }
        for dir in &self.search_paths {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        if let Some(path_var) = std::env::var_os("PATH") {
            for dir in std::env::split_paths(&path_var) {
                let candidate = dir.join(name);
                if candidate.is_file() {
                    return Ok(candidate);
                }
            }
        }
        Err(ConfigError::ExecutableNotFound(name.to_string()))
    }
}

/// Process-wide simulation configuration, fixed at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Simulation instance id; selects the port base and tmp file prefix.
    pub id: u32,
    /// Channel configured in the default node init script.
    pub channel: ChannelId,
    /// Radio model selected at startup (may be switched at runtime).
    pub radio_model: String,
    /// Simulation speed; `MAX_SIMULATE_SPEED` and above disables pacing.
    pub speed: f64,
    /// Root seed of the PRNG tree; 0 draws a fresh seed.
    pub random_seed: u64,
    /// Executable names and search paths.
    pub exe: ExecutableConfig,
    /// Directory for per-node flash and log files.
    pub tmp_dir: PathBuf,
    /// Watch level applied to new nodes.
    pub default_watch_level: WatchLogLevel,
    /// Global packet loss ratio in [0, 1] applied to radio frame deliveries.
    pub packet_loss_ratio: f64,
    /// Default timeout for node CLI commands.
    #[serde(skip, default = "default_command_timeout")]
    pub command_timeout: std::time::Duration,
}

fn default_command_timeout() -> std::time::Duration {
    DEFAULT_COMMAND_TIMEOUT
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            id: 0,
            channel: DEFAULT_CHANNEL,
            radio_model: "MutualInterference".to_string(),
            speed: 8.0,
            random_seed: 0,
            exe: ExecutableConfig::default(),
            tmp_dir: PathBuf::from("tmp"),
            default_watch_level: WatchLogLevel::DEFAULT,
            packet_loss_ratio: 0.0,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

impl SimulationConfig {
    /// TCP/UDP port base for this simulation id: `9000 + 10 * id`.
    pub fn port_base(&self) -> Result<u32, ConfigError> {
        let base = 9000 + 10 * self.id;
        if base < 9000 || base % 10 != 0 {
            return Err(ConfigError::InvalidSimulationId(self.id));
        }
        Ok(base)
    }

    /// Path of the dispatcher's datagram socket for this simulation.
    pub fn socket_path(&self) -> PathBuf {
        self.tmp_dir.join(format!("{}_dispatcher.sock", self.id))
    }

    /// Path of a node's flash file.
    pub fn flash_file(&self, node_id: NodeId) -> PathBuf {
        self.tmp_dir.join(format!("{}_{}.flash", self.id, node_id))
    }

    /// Path of a node's log file.
    pub fn log_file(&self, node_id: NodeId) -> PathBuf {
        self.tmp_dir.join(format!("{}_{}.log", self.id, node_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_string_for_device_types() {
        let router = NodeConfig::default();
        assert_eq!(router.mode_string(), "rdn");

        let med = NodeConfig {
            is_router: false,
            is_mtd: true,
            ..Default::default()
        };
        assert_eq!(med.mode_string(), "rn");

        let sed = NodeConfig {
            is_router: false,
            is_mtd: true,
            rx_off_when_idle: true,
            ..Default::default()
        };
        assert_eq!(sed.mode_string(), "n");
    }

    #[test]
    fn node_config_validation() {
        assert!(NodeConfig::default().validate().is_ok());

        let bad = NodeConfig {
            is_router: true,
            is_mtd: true,
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let bad = NodeConfig {
            rx_off_when_idle: true,
            is_mtd: false,
            is_router: false,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn port_base_follows_sim_id() {
        let cfg = SimulationConfig {
            id: 3,
            ..Default::default()
        };
        assert_eq!(cfg.port_base().unwrap(), 9030);
        assert_eq!(
            SimulationConfig::default().port_base().unwrap(),
            9000
        );
    }

    #[test]
    fn file_names_follow_sim_and_node_id() {
        let cfg = SimulationConfig {
            id: 2,
            ..Default::default()
        };
        assert_eq!(cfg.flash_file(7), PathBuf::from("tmp/2_7.flash"));
        assert_eq!(cfg.log_file(7), PathBuf::from("tmp/2_7.log"));
    }

    #[test]
    fn default_init_script_contains_network_setup() {
        let script = default_init_script(15);
        assert!(script.iter().any(|l| l == "channel 15"));
        assert!(script.iter().any(|l| l == "thread start"));
        assert_eq!(script.last().unwrap(), "thread start");
    }
}
