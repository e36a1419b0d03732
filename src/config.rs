//! Node configuration.
//!
//! One TOML file describes an acquisition node: the command and telemetry
//! endpoints, the monitored synchrophasor devices, the Modbus register set,
//! and the write-back channel. `validate()` rejects inconsistent configs
//! before anything connects.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use crate::acquire::modbus::{RegisterAccess, RegisterKind};
use crate::core::error::{BridgeError, Result};
use crate::writeback::WireKind;

/// Top-level node configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub node: NodeSection,

    #[serde(default)]
    pub pmu: Vec<PmuSection>,

    #[serde(default)]
    pub modbus: Option<ModbusSection>,

    #[serde(default)]
    pub writeback: Option<WriteBackSection>,

    #[serde(default)]
    pub csv_log: Option<CsvLogSection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeSection {
    /// Node name, used in logs.
    pub name: String,

    /// Bind address for the command server.
    #[serde(default = "default_command_bind")]
    pub command_bind: String,

    /// Telemetry endpoint string; the multicast group derives from it.
    pub publish_endpoint: String,

    /// Publish period in milliseconds. `0` means fire-hose mode: loop as
    /// fast as possible.
    #[serde(default = "default_publish_interval_ms")]
    pub publish_interval_ms: u64,

    /// Diagnostics snapshot period in milliseconds.
    #[serde(default = "default_diagnostics_interval_ms")]
    pub diagnostics_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PmuSection {
    /// Device label; tag names are prefixed with it.
    pub label: String,

    /// Device driver. `sim` is built in; anything else is a config error.
    #[serde(default = "default_pmu_driver")]
    pub driver: String,

    /// Phasor channel names for the simulated driver.
    #[serde(default)]
    pub channels: Vec<String>,

    /// Frames per second for the simulated driver.
    #[serde(default = "default_data_rate")]
    pub data_rate: u32,

    /// Consecutive frame failures tolerated before a full reconnect.
    #[serde(default = "default_retry_limit")]
    pub frame_retry_limit: u32,

    /// Delay between frame retries, milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Delay between reconnect attempts, milliseconds.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModbusSection {
    /// Device endpoint, `host:port`.
    pub address: String,

    #[serde(default = "default_slave_id")]
    pub slave_id: u8,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,

    #[serde(default = "default_modbus_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,

    pub registers: Vec<RegisterSection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterSection {
    pub tag: String,
    pub address: u16,
    pub kind: RegisterKind,

    #[serde(default = "default_register_access")]
    pub access: RegisterAccess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteBackMode {
    /// Datagram delivery on a fixed schedule (send-on-timer).
    Udp,

    /// Stream delivery after every write (send-on-write).
    Tcp,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WriteBackSection {
    pub mode: WriteBackMode,

    /// Target endpoint, `host:port`.
    pub target: String,

    /// Full-state send period for `udp` mode, milliseconds.
    #[serde(default = "default_send_interval_ms")]
    pub send_interval_ms: u64,

    /// Delay between connection rebuilds for `tcp` mode, milliseconds.
    #[serde(default = "default_writeback_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    pub tags: Vec<WriteBackTagSection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WriteBackTagSection {
    pub tag: String,
    pub kind: WireKind,

    #[serde(default)]
    pub initial: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CsvLogSection {
    pub path: String,
}

fn default_command_bind() -> String {
    "0.0.0.0:1330".to_string()
}
fn default_publish_interval_ms() -> u64 {
    1000
}
fn default_diagnostics_interval_ms() -> u64 {
    30000
}
fn default_pmu_driver() -> String {
    "sim".to_string()
}
fn default_data_rate() -> u32 {
    30
}
fn default_retry_limit() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1000
}
fn default_modbus_retry_delay_ms() -> u64 {
    500
}
fn default_reconnect_delay_ms() -> u64 {
    5000
}
fn default_slave_id() -> u8 {
    1
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_io_timeout_ms() -> u64 {
    3000
}
fn default_register_access() -> RegisterAccess {
    RegisterAccess::Read
}
fn default_send_interval_ms() -> u64 {
    100
}
fn default_writeback_reconnect_delay_ms() -> u64 {
    1000
}

impl NodeConfig {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            BridgeError::config(format!("read {}: {}", path.as_ref().display(), e))
        })?;
        Self::parse(&raw)
    }

    /// Parse and validate configuration text.
    pub fn parse(raw: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| BridgeError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject inconsistent configurations.
    pub fn validate(&self) -> Result<()> {
        if self.node.name.is_empty() {
            return Err(BridgeError::config("node.name must not be empty"));
        }
        if self.node.publish_endpoint.is_empty() {
            return Err(BridgeError::config("node.publish_endpoint must not be empty"));
        }

        let mut labels = HashSet::new();
        for pmu in &self.pmu {
            if !labels.insert(pmu.label.as_str()) {
                return Err(BridgeError::config(format!(
                    "duplicate pmu label: {}",
                    pmu.label
                )));
            }
            if !pmu.driver.eq_ignore_ascii_case("sim") {
                return Err(BridgeError::config(format!(
                    "unknown pmu driver: {} (available: sim)",
                    pmu.driver
                )));
            }
            if pmu.channels.is_empty() {
                return Err(BridgeError::config(format!(
                    "pmu {} has no channels configured",
                    pmu.label
                )));
            }
        }

        if let Some(modbus) = &self.modbus {
            if modbus.registers.is_empty() {
                return Err(BridgeError::config("modbus.registers must not be empty"));
            }
            let mut tags = HashSet::new();
            for reg in &modbus.registers {
                if !tags.insert(reg.tag.as_str()) {
                    return Err(BridgeError::config(format!(
                        "duplicate modbus register tag: {}",
                        reg.tag
                    )));
                }
            }
        }

        if let Some(writeback) = &self.writeback {
            if writeback.tags.is_empty() {
                return Err(BridgeError::config("writeback.tags must not be empty"));
            }
            let mut tags = HashSet::new();
            for tag in &writeback.tags {
                if !tags.insert(tag.tag.as_str()) {
                    return Err(BridgeError::config(format!(
                        "duplicate writeback tag: {}",
                        tag.tag
                    )));
                }
            }
        }

        Ok(())
    }

    /// Embedded example configuration.
    pub fn example() -> &'static str {
        EXAMPLE_CONFIG
    }
}

const EXAMPLE_CONFIG: &str = r#"# tagbridge acquisition node

[node]
name = "rtds-bridge"
command_bind = "0.0.0.0:1330"
publish_endpoint = "testbed-telemetry:7723"
publish_interval_ms = 1000      # 0 = fire-hose mode
diagnostics_interval_ms = 30000

[[pmu]]
label = "pmu1"
driver = "sim"
channels = ["VA", "VB", "VC"]
data_rate = 30
frame_retry_limit = 3
retry_delay_ms = 1000

[[pmu]]
label = "pmu2"
driver = "sim"
channels = ["VA", "IA"]
data_rate = 30

[modbus]
address = "192.168.1.50:502"
slave_id = 1
poll_interval_ms = 1000
retry_limit = 3
retry_delay_ms = 500

[[modbus.registers]]
tag = "plant.flow"
address = 100
kind = "float32"
access = "read"

[[modbus.registers]]
tag = "plant.setpoint"
address = 102
kind = "float32"
access = "read_write"

[[modbus.registers]]
tag = "plant.pump"
address = 10
kind = "coil"
access = "read_write"

[writeback]
mode = "udp"                    # "tcp" sends on write instead of on a timer
target = "192.168.1.60:7750"
send_interval_ms = 100

[[writeback.tags]]
tag = "breaker1"
kind = "int32"
initial = 0.0

[[writeback.tags]]
tag = "setpoint"
kind = "float32"
initial = 50.0

[csv_log]
path = "frames.csv"
"#;
