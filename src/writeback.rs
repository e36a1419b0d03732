//! Fixed-schema binary write-back protocol.
//!
//! The target device has no other way to learn current values, so every
//! outbound frame carries the *entire* configured state: one 4-byte
//! big-endian field per tag, in declaration order, no header, no
//! delimiters. The receiver knows the schema out-of-band; field order is
//! fixed at configuration time and never changes at runtime.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::core::error::{BridgeError, Result};
use crate::core::tag::TagValue;

/// Wire type of one write-back field.
///
/// The wire format has no boolean type; boolean commands coerce to `1`/`0`
/// on integer fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireKind {
    /// 4-byte big-endian signed integer.
    Int32,

    /// 4-byte big-endian IEEE-754 float.
    Float32,
}

impl WireKind {
    /// One-character layout code.
    pub const fn code(&self) -> char {
        match self {
            Self::Int32 => 'i',
            Self::Float32 => 'f',
        }
    }
}

/// A typed field value, already coerced to its wire kind.
#[derive(Debug, Clone, Copy, PartialEq)]
enum WireValue {
    Int(i32),
    Float(f32),
}

impl WireValue {
    fn coerce(kind: WireKind, value: TagValue) -> Self {
        match kind {
            WireKind::Int32 => Self::Int(value.as_f64() as i32),
            WireKind::Float32 => Self::Float(value.as_f64() as f32),
        }
    }

    fn to_be_bytes(self) -> [u8; 4] {
        match self {
            Self::Int(v) => v.to_be_bytes(),
            Self::Float(v) => v.to_be_bytes(),
        }
    }
}

/// One configured write-back tag.
#[derive(Debug, Clone)]
pub struct WriteBackTag {
    pub name: String,
    pub kind: WireKind,
    pub initial: f64,
}

impl WriteBackTag {
    pub fn int(name: impl Into<String>, initial: f64) -> Self {
        Self {
            name: name.into(),
            kind: WireKind::Int32,
            initial,
        }
    }

    pub fn float(name: impl Into<String>, initial: f64) -> Self {
        Self {
            name: name.into(),
            kind: WireKind::Float32,
            initial,
        }
    }
}

/// Maintains the full ordered device state and serializes it on demand.
///
/// Every [`encode`](Self::encode) call produces every configured field; a
/// partial frame is never emitted.
#[derive(Debug)]
pub struct WriteBackEncoder {
    /// `(tag name, wire kind)` in declaration order. Never changes.
    layout: Vec<(String, WireKind)>,

    /// Tag name -> layout index.
    index: HashMap<String, usize>,

    /// Current values, one per layout slot, always populated.
    values: Mutex<Vec<WireValue>>,
}

impl WriteBackEncoder {
    /// Build the encoder from the configured tag list, seeding every slot
    /// from its configured initial value.
    pub fn new(tags: &[WriteBackTag]) -> Self {
        let mut layout = Vec::with_capacity(tags.len());
        let mut index = HashMap::with_capacity(tags.len());
        let mut values = Vec::with_capacity(tags.len());

        for (i, tag) in tags.iter().enumerate() {
            layout.push((tag.name.clone(), tag.kind));
            index.insert(tag.name.clone(), i);
            values.push(WireValue::coerce(tag.kind, TagValue::Number(tag.initial)));
        }

        Self {
            layout,
            index,
            values: Mutex::new(values),
        }
    }

    /// Number of configured fields.
    pub fn len(&self) -> usize {
        self.layout.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.is_empty()
    }

    /// The fixed field layout, in declaration order.
    pub fn layout(&self) -> &[(String, WireKind)] {
        &self.layout
    }

    /// Compact layout description, e.g. `"iff"` for int32, float32, float32.
    pub fn layout_string(&self) -> String {
        self.layout.iter().map(|(_, kind)| kind.code()).collect()
    }

    /// Seed values for declaring the write-back tags in the tag store.
    pub fn initial_store_values(&self) -> Vec<(String, TagValue)> {
        let values = self.values.lock().expect("write-back state poisoned");
        self.layout
            .iter()
            .zip(values.iter())
            .map(|((name, _), value)| {
                let v = match value {
                    WireValue::Int(v) => *v as f64,
                    WireValue::Float(v) => *v as f64,
                };
                (name.clone(), TagValue::Number(v))
            })
            .collect()
    }

    /// Apply incoming writes, coercing each value to its field's wire kind.
    ///
    /// Tags outside the fixed layout are ignored (they belong to other
    /// components). Returns the number of fields updated.
    pub fn apply_write(&self, pairs: &[(String, TagValue)]) -> usize {
        let mut values = self.values.lock().expect("write-back state poisoned");
        let mut updated = 0;
        for (name, value) in pairs {
            if let Some(&i) = self.index.get(name) {
                values[i] = WireValue::coerce(self.layout[i].1, *value);
                updated += 1;
            }
        }
        updated
    }

    /// Serialize the full current state: `4 × len()` bytes, big-endian,
    /// declaration order, no delimiters.
    pub fn encode(&self) -> Vec<u8> {
        let snapshot: Vec<WireValue> = {
            let values = self.values.lock().expect("write-back state poisoned");
            values.clone()
        };
        let mut frame = Vec::with_capacity(snapshot.len() * 4);
        for value in snapshot {
            frame.extend_from_slice(&value.to_be_bytes());
        }
        frame
    }
}

/// Spawn the continuous (datagram) sender: encode and send the full state
/// every tick, changed or not, until shutdown.
pub fn spawn_continuous_sender(
    encoder: Arc<WriteBackEncoder>,
    target: String,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let addr = match lookup_host(&target).await.ok().and_then(|mut a| a.next()) {
            Some(addr) => addr,
            None => {
                error!(endpoint = %target, "cannot resolve write-back target");
                return;
            }
        };
        let socket = match UdpSocket::bind("0.0.0.0:0").await {
            Ok(socket) => socket,
            Err(e) => {
                error!(error = %e, "cannot open write-back socket");
                return;
            }
        };

        info!(endpoint = %target, layout = %encoder.layout_string(), "continuous write-back sender started");
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    let frame = encoder.encode();
                    if let Err(e) = socket.send_to(&frame, addr).await {
                        // fire-and-forget: log and keep the schedule
                        warn!(endpoint = %target, error = %e, "write-back send failed");
                    }
                }
            }
        }
        debug!(endpoint = %target, "continuous write-back sender stopped");
    })
}

/// On-demand (stream) sender: transmits the full state synchronously after
/// each write, rebuilding the connection on failure until shutdown.
pub struct OnDemandSender {
    encoder: Arc<WriteBackEncoder>,
    target: String,
    reconnect_delay: Duration,
    conn: tokio::sync::Mutex<Option<TcpStream>>,
    shutdown: watch::Receiver<bool>,
}

impl OnDemandSender {
    pub fn new(
        encoder: Arc<WriteBackEncoder>,
        target: impl Into<String>,
        reconnect_delay: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            encoder,
            target: target.into(),
            reconnect_delay,
            conn: tokio::sync::Mutex::new(None),
            shutdown,
        }
    }

    pub fn encoder(&self) -> &Arc<WriteBackEncoder> {
        &self.encoder
    }

    /// Send the full current state, reconnecting as long as it takes.
    ///
    /// Returns an error only when shutdown interrupts the retry loop.
    pub async fn send_current(&self) -> Result<()> {
        let frame = self.encoder.encode();
        let mut conn = self.conn.lock().await;
        let mut shutdown = self.shutdown.clone();

        loop {
            if *shutdown.borrow() {
                return Err(BridgeError::connection("shutdown during write-back send"));
            }

            if conn.is_none() {
                match TcpStream::connect(&self.target).await {
                    Ok(stream) => {
                        info!(endpoint = %self.target, "write-back connection established");
                        *conn = Some(stream);
                    }
                    Err(e) => {
                        warn!(endpoint = %self.target, error = %e, "write-back connect failed; retrying");
                        tokio::select! {
                            _ = shutdown.changed() => continue,
                            _ = tokio::time::sleep(self.reconnect_delay) => continue,
                        }
                    }
                }
            }

            if let Some(stream) = conn.as_mut() {
                match stream.write_all(&frame).await {
                    Ok(()) => return Ok(()),
                    Err(e) => {
                        warn!(endpoint = %self.target, error = %e, "write-back send failed; rebuilding connection");
                        *conn = None;
                    }
                }
            }
        }
    }
}

/// How command-path writes reach the write-back device.
pub enum WriteBackRoute {
    /// State is buffered; the continuous sender delivers on its own clock.
    Buffered(Arc<WriteBackEncoder>),

    /// Full state is sent synchronously after each applied write.
    Immediate(Arc<OnDemandSender>),
}

impl WriteBackRoute {
    /// Fold applied writes into the write-back state and deliver per mode.
    pub async fn apply(&self, pairs: &[(String, TagValue)]) {
        match self {
            Self::Buffered(encoder) => {
                encoder.apply_write(pairs);
            }
            Self::Immediate(sender) => {
                if sender.encoder().apply_write(pairs) > 0 {
                    if let Err(e) = sender.send_current().await {
                        warn!(error = %e, "on-demand write-back interrupted");
                    }
                }
            }
        }
    }
}
