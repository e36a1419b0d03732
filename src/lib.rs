//! # tagbridge
//!
//! Real-time data-acquisition and control bridge for cyber-physical
//! testbeds: polls live telemetry from simulation equipment over multiple
//! wire protocols, maintains a unified named-point ("tag") state, and
//! exposes it to the rest of the testbed through a request/reply command
//! channel and a periodic multicast telemetry feed, while pushing write
//! commands back out to the equipment over a fixed-schema binary protocol.
//!
//! ## Architecture
//!
//! ```text
//! PMU poller ──┐
//! PMU poller ──┤ frame queue ──> writer ──> TagStore <──> command server
//! Modbus poller ───────────────────────────────┘ │  │
//!                                                │  └──> publisher (multicast)
//!                                                └─────> write-back encoder ──> device
//! ```
//!
//! Every poller owns its device link exclusively and runs an independent
//! reconnect/retry state machine; the tag store is the only state shared
//! across tasks. Command callers only ever see `ACK=`/`ERR=` replies:
//! connection churn shows up as stale values and log output, never as a
//! protocol error.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use tagbridge::config::NodeConfig;
//! use tagbridge::node::AcquisitionNode;
//!
//! let config = NodeConfig::load("node.toml")?;
//! AcquisitionNode::new(config).run().await?;
//! ```

pub mod acquire;
pub mod command;
pub mod config;
pub mod core;
pub mod node;
pub mod sink;
pub mod store;
pub mod transport;
pub mod writeback;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::{
        error::{BridgeError, Result},
        frame::{FrameEnvelope, Phasor, PhasorFrame, PmuSchema},
        tag::{TagKind, TagValue},
        TimeCorrelationMap,
    };
    pub use crate::store::TagStore;
    pub use crate::transport::{CommandClient, CommandServer, Publisher, Subscriber};
}

// Re-export core types at crate root for convenience
pub use crate::core::error::{BridgeError, Result};
pub use crate::core::tag::{TagKind, TagValue};
pub use crate::store::TagStore;
