//! Request/reply command channel.
//!
//! One datagram request, one datagram reply, both NUL-terminated ASCII.
//! The server handles a single request at a time; a slow handler blocks
//! all other command traffic, which keeps dispatch ordering trivial.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::core::error::{BridgeError, Result};
use crate::transport::framing::{split_reply, strip_terminator, terminate};

/// Handler invoked for every well-formed request.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: &str) -> String;
}

/// Default handler: acknowledge everything without acting on it.
pub struct AckHandler;

#[async_trait]
impl RequestHandler for AckHandler {
    async fn handle(&self, _request: &str) -> String {
        "ACK=".to_string()
    }
}

/// Command server: blocking receive/dispatch/reply loop.
pub struct CommandServer {
    socket: UdpSocket,
    handler: Arc<dyn RequestHandler>,
}

impl CommandServer {
    /// Bind the server socket. Replies use the default [`AckHandler`] until
    /// a handler is registered.
    pub async fn bind(addr: &str) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| BridgeError::connection(format!("bind {}: {}", addr, e)))?;
        Ok(Self {
            socket,
            handler: Arc::new(AckHandler),
        })
    }

    /// Register the request handler.
    pub fn set_handler(&mut self, handler: Arc<dyn RequestHandler>) {
        self.handler = handler;
    }

    /// Address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Serve requests until shutdown.
    ///
    /// Requests are handled one at a time. Malformed datagrams and reply
    /// send failures are logged and skipped; they never stop the loop.
    pub async fn serve(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut buf = vec![0u8; 65536];
        loop {
            tokio::select! {
                _ = shutdown.changed() => return Ok(()),
                received = self.socket.recv_from(&mut buf) => {
                    let (len, peer) = match received {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "command receive failed");
                            continue;
                        }
                    };
                    let request = match strip_terminator(&buf[..len]) {
                        Ok(request) => request,
                        Err(e) => {
                            warn!(%peer, error = %e, "dropping malformed request");
                            continue;
                        }
                    };
                    debug!(%peer, request, "command received");
                    let reply = self.handler.handle(request).await;
                    if let Err(e) = self.socket.send_to(&terminate(&reply), peer).await {
                        warn!(%peer, error = %e, "command reply failed");
                    }
                }
            }
        }
    }
}

/// Command client: send one request, block for exactly one reply.
pub struct CommandClient {
    socket: UdpSocket,
    target: SocketAddr,
    reply_timeout: Duration,
}

impl CommandClient {
    /// Create a client for the given server endpoint.
    pub async fn connect(target: &str) -> Result<Self> {
        let target = lookup_host(target)
            .await
            .map_err(|e| BridgeError::connection(format!("resolve {}: {}", target, e)))?
            .next()
            .ok_or_else(|| BridgeError::connection(format!("no address for {}", target)))?;
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket
            .connect(target)
            .await
            .map_err(|e| BridgeError::connection(format!("connect {}: {}", target, e)))?;
        Ok(Self {
            socket,
            target,
            reply_timeout: Duration::from_secs(5),
        })
    }

    /// Set the reply timeout.
    #[must_use]
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Send a request and wait for its reply.
    ///
    /// The reply is split on the first `=`: on `ACK` the data part is passed
    /// to `on_reply`; an `ERR` reply is logged and dropped. A missing reply
    /// is a transport error.
    pub async fn send<F>(&self, message: &str, on_reply: F) -> Result<()>
    where
        F: FnOnce(&str),
    {
        self.socket.send(&terminate(message)).await?;

        let mut buf = vec![0u8; 65536];
        let len = tokio::time::timeout(self.reply_timeout, self.socket.recv(&mut buf))
            .await
            .map_err(|_| {
                BridgeError::connection(format!("no reply from {} in time", self.target))
            })??;

        let reply = strip_terminator(&buf[..len])?;
        let (status, data) = split_reply(reply);
        if status == "ACK" {
            on_reply(data);
        } else {
            warn!(server = %self.target, request = message, reply, "command rejected");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoHandler;

    #[async_trait]
    impl RequestHandler for EchoHandler {
        async fn handle(&self, request: &str) -> String {
            format!("ACK={}", request)
        }
    }

    struct RejectHandler;

    #[async_trait]
    impl RequestHandler for RejectHandler {
        async fn handle(&self, _request: &str) -> String {
            "ERR=nope".to_string()
        }
    }

    async fn start_server(handler: Arc<dyn RequestHandler>) -> (SocketAddr, watch::Sender<bool>) {
        let mut server = CommandServer::bind("127.0.0.1:0").await.unwrap();
        server.set_handler(handler);
        let addr = server.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            let _ = server.serve(shutdown_rx).await;
        });
        (addr, shutdown_tx)
    }

    #[tokio::test]
    async fn test_request_reply_round_trip() {
        let (addr, shutdown) = start_server(Arc::new(EchoHandler)).await;
        let client = CommandClient::connect(&addr.to_string()).await.unwrap();

        let mut got = String::new();
        client
            .send("READ=grid.frequency", |data| got = data.to_string())
            .await
            .unwrap();
        assert_eq!(got, "READ=grid.frequency");

        let _ = shutdown.send(true);
    }

    #[tokio::test]
    async fn test_err_reply_is_dropped() {
        let (addr, shutdown) = start_server(Arc::new(RejectHandler)).await;
        let client = CommandClient::connect(&addr.to_string()).await.unwrap();

        let mut invoked = false;
        client.send("WRITE=a:1", |_| invoked = true).await.unwrap();
        assert!(!invoked);

        let _ = shutdown.send(true);
    }

    #[tokio::test]
    async fn test_default_handler_acks() {
        let server = CommandServer::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            let _ = server.serve(shutdown_rx).await;
        });

        let client = CommandClient::connect(&addr.to_string()).await.unwrap();
        let mut got = None;
        client.send("anything=", |data| got = Some(data.to_string())).await.unwrap();
        assert_eq!(got.as_deref(), Some(""));

        let _ = shutdown_tx.send(true);
    }
}
