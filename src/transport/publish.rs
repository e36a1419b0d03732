//! Group publish/subscribe telemetry channel.
//!
//! Delivery is at-most-once: fragments of one logical update are sent
//! back-to-back by one task (per-sender FIFO), but nothing is retransmitted
//! and subscribers exert no backpressure on publishers.

use std::net::{Ipv4Addr, SocketAddrV4};

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::core::error::{BridgeError, Result};
use crate::transport::framing::{fragment_payload, multicast_group, MAX_PAYLOAD};

/// Telemetry publisher for one multicast group.
pub struct Publisher {
    socket: UdpSocket,
    group: SocketAddrV4,
}

impl Publisher {
    /// Open a publisher for the group derived from `endpoint`.
    pub async fn open(endpoint: &str) -> Result<Self> {
        let (group_ip, port) = multicast_group(endpoint);
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket
            .set_multicast_ttl_v4(1)
            .map_err(|e| BridgeError::connection(format!("multicast ttl: {}", e)))?;
        socket
            .set_multicast_loop_v4(true)
            .map_err(|e| BridgeError::connection(format!("multicast loop: {}", e)))?;
        Ok(Self {
            socket,
            group: SocketAddrV4::new(group_ip, port),
        })
    }

    /// The multicast group this publisher sends to.
    pub fn group(&self) -> SocketAddrV4 {
        self.group
    }

    /// Publish one telemetry body, fragmenting above the MTU bound.
    ///
    /// Returns the number of datagrams sent.
    pub async fn publish(&self, payload: &str) -> Result<usize> {
        let fragments = fragment_payload(payload, MAX_PAYLOAD);
        for fragment in &fragments {
            self.socket
                .send_to(fragment.as_bytes(), self.group)
                .await?;
        }
        debug!(group = %self.group, fragments = fragments.len(), "published");
        Ok(fragments.len())
    }

    /// Publish a pre-formed message (write envelopes) without fragmentation.
    pub async fn publish_raw(&self, message: &str) -> Result<()> {
        self.socket.send_to(message.as_bytes(), self.group).await?;
        Ok(())
    }
}

/// Telemetry subscriber joined to one multicast group.
pub struct Subscriber {
    socket: UdpSocket,
    group: SocketAddrV4,
}

impl Subscriber {
    /// Join the group derived from `endpoint`.
    pub async fn join(endpoint: &str) -> Result<Self> {
        let (group_ip, port) = multicast_group(endpoint);
        let socket = UdpSocket::bind(("0.0.0.0", port)).await?;
        socket
            .join_multicast_v4(group_ip, Ipv4Addr::UNSPECIFIED)
            .map_err(|e| BridgeError::connection(format!("join {}: {}", group_ip, e)))?;
        Ok(Self {
            socket,
            group: SocketAddrV4::new(group_ip, port),
        })
    }

    /// The multicast group this subscriber is joined to.
    pub fn group(&self) -> SocketAddrV4 {
        self.group
    }

    /// Receive messages until shutdown, invoking `handler` per datagram.
    ///
    /// A transport-reported miss or a malformed datagram is logged and the
    /// loop continues: no retransmission, no backpressure.
    pub async fn listen<F>(&self, handler: F, mut shutdown: watch::Receiver<bool>) -> Result<()>
    where
        F: Fn(&str),
    {
        let mut buf = vec![0u8; 65536];
        loop {
            tokio::select! {
                _ = shutdown.changed() => return Ok(()),
                received = self.socket.recv_from(&mut buf) => {
                    let (len, _peer) = match received {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(group = %self.group, error = %e, "telemetry receive miss");
                            continue;
                        }
                    };
                    match std::str::from_utf8(&buf[..len]) {
                        Ok(message) => handler(message),
                        Err(e) => {
                            warn!(group = %self.group, error = %e, "dropping malformed telemetry");
                        }
                    }
                }
            }
        }
    }
}
