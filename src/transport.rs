//! Transport protocol: request/reply commands and group pub/sub telemetry.
//!
//! Two socket patterns cover every acquisition node:
//!
//! - [`CommandServer`]/[`CommandClient`]: one NUL-terminated ASCII request,
//!   one NUL-terminated reply, one outstanding request at a time.
//! - [`Publisher`]/[`Subscriber`]: multicast group telemetry, at-most-once,
//!   MTU-bounded fragmentation of whole `tag:value` tokens.

pub mod framing;
pub mod publish;
pub mod request;

pub use framing::{
    encode_telemetry, encode_write_message, fragment_payload, multicast_group,
    parse_write_message, MAX_PAYLOAD,
};
pub use publish::{Publisher, Subscriber};
pub use request::{AckHandler, CommandClient, CommandServer, RequestHandler};
