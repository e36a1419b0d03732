//! Wire framing for the command and telemetry channels.
//!
//! Commands are ASCII strings with one trailing NUL byte in both directions.
//! Telemetry bodies are comma-separated `tag:value` tokens; bodies above the
//! MTU bound are split into fragments of whole tokens. The multicast group
//! for a telemetry endpoint is derived from a stable hash of the endpoint
//! string, so publishers and subscribers agree on the group without any
//! coordination.

use std::net::Ipv4Addr;

use crate::core::error::{BridgeError, Result};
use crate::core::tag::TagValue;

/// Maximum telemetry payload per transmission unit, in bytes.
pub const MAX_PAYLOAD: usize = 1465;

/// Default telemetry port when the endpoint string carries none.
pub const DEFAULT_TELEMETRY_PORT: u16 = 7723;

/// Append the NUL terminator to an outgoing message.
pub fn terminate(message: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(message.len() + 1);
    buf.extend_from_slice(message.as_bytes());
    buf.push(0);
    buf
}

/// Decode an incoming datagram, stripping one trailing NUL if present.
pub fn strip_terminator(buf: &[u8]) -> Result<&str> {
    let body = match buf.last() {
        Some(0) => &buf[..buf.len() - 1],
        _ => buf,
    };
    std::str::from_utf8(body)
        .map_err(|e| BridgeError::protocol(format!("non-ASCII request: {}", e)))
}

/// Split a reply on the first `=` into status and data.
pub fn split_reply(reply: &str) -> (&str, &str) {
    match reply.split_once('=') {
        Some((status, data)) => (status, data),
        None => (reply, ""),
    }
}

/// Split a telemetry body into fragments of whole `tag:value` tokens.
///
/// Each fragment ends with a trailing comma and never exceeds `limit`
/// bytes; a token is never split across two fragments. A single token
/// larger than the limit is emitted on its own (oversized) fragment rather
/// than truncated.
pub fn fragment_payload(payload: &str, limit: usize) -> Vec<String> {
    let mut fragments = Vec::new();
    let mut current = String::new();

    for token in payload.split(',').filter(|t| !t.is_empty()) {
        // +1 for the trailing comma this token brings
        if !current.is_empty() && current.len() + token.len() + 1 > limit {
            fragments.push(std::mem::take(&mut current));
        }
        current.push_str(token);
        current.push(',');
    }
    if !current.is_empty() {
        fragments.push(current);
    }

    fragments
}

/// Encode a tag snapshot as a telemetry body (`tag:value,...,`).
pub fn encode_telemetry(pairs: &[(String, TagValue)]) -> String {
    let mut body = String::new();
    for (name, value) in pairs {
        body.push_str(name);
        body.push(':');
        body.push_str(&value.to_string());
        body.push(',');
    }
    body
}

/// Encode a write envelope for the telemetry channel (`Write={tag:value,...}`).
pub fn encode_write_message(pairs: &[(String, TagValue)]) -> String {
    let mut body = String::from("Write={");
    for (i, (name, value)) in pairs.iter().enumerate() {
        if i > 0 {
            body.push(',');
        }
        body.push_str(name);
        body.push(':');
        body.push_str(&value.to_string());
    }
    body.push('}');
    body
}

/// Parse a write envelope back into raw `(tag, value)` text pairs.
///
/// Returns `None` for bodies that are not write envelopes.
pub fn parse_write_message(body: &str) -> Option<Vec<(String, String)>> {
    let inner = body.strip_prefix("Write={")?.strip_suffix('}')?;
    let mut pairs = Vec::new();
    for token in inner.split(',').filter(|t| !t.is_empty()) {
        let (name, value) = token.split_once(':')?;
        pairs.push((name.to_string(), value.to_string()));
    }
    Some(pairs)
}

/// Derive the multicast group for a telemetry endpoint string.
///
/// The group is `239.192.x.y` inside the organization-local scope, with
/// `x.y` taken from a stable FNV-1a hash of the endpoint; the port is the
/// endpoint's trailing `:<port>` if present, otherwise the default. The
/// same endpoint string always maps to the same group on every node.
pub fn multicast_group(endpoint: &str) -> (Ipv4Addr, u16) {
    let (name, port) = match endpoint.rsplit_once(':') {
        Some((name, port_str)) => match port_str.parse::<u16>() {
            Ok(port) => (name, port),
            Err(_) => (endpoint, DEFAULT_TELEMETRY_PORT),
        },
        None => (endpoint, DEFAULT_TELEMETRY_PORT),
    };

    let hash = fnv1a64(name.as_bytes());
    let group = Ipv4Addr::new(239, 192, (hash >> 8) as u8, hash as u8);
    (group, port)
}

/// FNV-1a, 64-bit. Deterministic across processes and platforms, unlike the
/// standard library's randomized hasher.
pub(crate) fn fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = OFFSET;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminator_round_trip() {
        let wire = terminate("QUERY=");
        assert_eq!(wire.last(), Some(&0u8));
        assert_eq!(strip_terminator(&wire).unwrap(), "QUERY=");
        // tolerate a missing terminator
        assert_eq!(strip_terminator(b"READ=a").unwrap(), "READ=a");
    }

    #[test]
    fn test_split_reply() {
        assert_eq!(split_reply("ACK=1.5"), ("ACK", "1.5"));
        assert_eq!(split_reply("ERR=Tag not found"), ("ERR", "Tag not found"));
        assert_eq!(split_reply("garbage"), ("garbage", ""));
        assert_eq!(split_reply("ACK=a=b"), ("ACK", "a=b"));
    }

    #[test]
    fn test_fragmentation_preserves_tokens() {
        // Build a payload guaranteed to exceed several MTUs.
        let pairs: Vec<(String, TagValue)> = (0..400)
            .map(|i| (format!("device{}.channel{}.real", i % 7, i), TagValue::Number(i as f64 + 0.125)))
            .collect();
        let payload = encode_telemetry(&pairs);
        assert!(payload.len() > 2 * MAX_PAYLOAD);

        let fragments = fragment_payload(&payload, MAX_PAYLOAD);
        assert!(fragments.len() > 2);

        let original: Vec<&str> = payload.split(',').filter(|t| !t.is_empty()).collect();
        let mut rejoined = Vec::new();
        for fragment in &fragments {
            assert!(fragment.len() <= MAX_PAYLOAD);
            assert!(fragment.ends_with(','));
            rejoined.extend(fragment.split(',').filter(|t| !t.is_empty()));
        }
        assert_eq!(original, rejoined);
    }

    #[test]
    fn test_fragmentation_small_payload_single_fragment() {
        let fragments = fragment_payload("a:1,b:2,", MAX_PAYLOAD);
        assert_eq!(fragments, vec!["a:1,b:2,".to_string()]);
    }

    #[test]
    fn test_fragmentation_empty() {
        assert!(fragment_payload("", MAX_PAYLOAD).is_empty());
    }

    #[test]
    fn test_write_message_round_trip() {
        let pairs = vec![
            ("breaker1".to_string(), TagValue::Bool(true)),
            ("setpoint".to_string(), TagValue::Number(51.5)),
        ];
        let body = encode_write_message(&pairs);
        assert_eq!(body, "Write={breaker1:true,setpoint:51.5}");

        let parsed = parse_write_message(&body).unwrap();
        assert_eq!(parsed[0], ("breaker1".to_string(), "true".to_string()));
        assert_eq!(parsed[1], ("setpoint".to_string(), "51.5".to_string()));

        assert!(parse_write_message("a:1,b:2,").is_none());
    }

    #[test]
    fn test_multicast_group_stable() {
        let (group_a, port_a) = multicast_group("pmu-feed:7801");
        let (group_b, port_b) = multicast_group("pmu-feed:7801");
        assert_eq!(group_a, group_b);
        assert_eq!(port_a, 7801);
        assert_eq!(port_b, 7801);
        assert!(group_a.octets()[0] == 239 && group_a.octets()[1] == 192);

        // Distinct endpoints land on distinct groups (for these names).
        let (other, port) = multicast_group("load-feed");
        assert_ne!(group_a, other);
        assert_eq!(port, DEFAULT_TELEMETRY_PORT);
    }
}
