//! Core types for the acquisition bridge.
//!
//! This module provides the foundational data model shared by every
//! component: tag values, measurement frames, time correlation, and errors.

pub mod correlation;
pub mod error;
pub mod frame;
pub mod tag;

pub use correlation::TimeCorrelationMap;
pub use error::{BridgeError, Result};
pub use frame::{FrameEnvelope, Phasor, PhasorFrame, PmuSchema};
pub use tag::{TagKind, TagValue};
