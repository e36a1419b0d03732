//! Modbus register poller.
//!
//! One poller per acquisition node. Every configured readable register is
//! read on a fixed interval and the whole set is folded into the tag store
//! as one batch, so command callers never observe a torn read across
//! registers. Write commands arrive on a channel and are applied between
//! poll cycles.
//!
//! A 32-bit float occupies two consecutive 16-bit register words,
//! big-endian; a coil is a single boolean.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::net::lookup_host;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::MissedTickBehavior;
use tokio_modbus::client::{Context as ModbusContext, Reader, Writer};
use tokio_modbus::Slave;
use tracing::{debug, error, info, warn};

use crate::acquire::{ConnectionState, Diagnostics, RetryPolicy, SharedDiagnostics};
use crate::core::error::{BridgeError, Result};
use crate::core::tag::TagValue;
use crate::store::TagStore;

// ============================================================================
// Register table
// ============================================================================

/// Wire shape of a configured register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterKind {
    /// IEEE-754 float over two consecutive big-endian register words.
    Float32,

    /// Single-bit coil / discrete output.
    Coil,
}

/// Access flags for a configured register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterAccess {
    Read,
    Write,
    ReadWrite,
}

impl RegisterAccess {
    #[inline]
    pub const fn readable(&self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    #[inline]
    pub const fn writable(&self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }
}

/// One configured register.
#[derive(Debug, Clone)]
pub struct RegisterDef {
    /// Tag name this register maps to.
    pub tag: String,

    /// Register / coil address.
    pub address: u16,

    pub kind: RegisterKind,
    pub access: RegisterAccess,
}

impl RegisterDef {
    /// Seed value for declaring this register's tag before the first poll.
    pub fn initial_value(&self) -> TagValue {
        match self.kind {
            RegisterKind::Float32 => TagValue::Number(0.0),
            RegisterKind::Coil => TagValue::Bool(false),
        }
    }
}

/// Decode two big-endian register words into a float.
pub fn decode_f32(words: &[u16]) -> Result<f64> {
    if words.len() < 2 {
        return Err(BridgeError::decode(format!(
            "need 2 register words for float32, got {}",
            words.len()
        )));
    }
    let bytes = [
        (words[0] >> 8) as u8,
        words[0] as u8,
        (words[1] >> 8) as u8,
        words[1] as u8,
    ];
    let value = f32::from_be_bytes(bytes);
    if value.is_nan() || value.is_infinite() {
        return Err(BridgeError::decode("non-finite float32 register value"));
    }
    Ok(value as f64)
}

/// Encode a float into two big-endian register words.
pub fn encode_f32(value: f64) -> [u16; 2] {
    let bytes = (value as f32).to_be_bytes();
    [
        ((bytes[0] as u16) << 8) | bytes[1] as u16,
        ((bytes[2] as u16) << 8) | bytes[3] as u16,
    ]
}

// ============================================================================
// Client seam
// ============================================================================

/// Narrow Modbus client contract the poller drives.
///
/// Errors are classified by variant: `Connection`/`Protocol` are transient
/// and feed the retry machinery, `Decode` is fatal.
#[async_trait]
pub trait RegisterClient: Send {
    async fn read_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>>;

    async fn read_coils(&mut self, address: u16, count: u16) -> Result<Vec<bool>>;

    async fn write_registers(&mut self, address: u16, words: &[u16]) -> Result<()>;

    async fn write_coil(&mut self, address: u16, value: bool) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// Connects (and re-connects) clients to one Modbus endpoint.
#[async_trait]
pub trait ModbusConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn RegisterClient>>;
}

/// Modbus TCP connector backed by `tokio-modbus`.
#[derive(Debug, Clone)]
pub struct TcpRegisterConnector {
    pub address: String,
    pub slave_id: u8,
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
}

impl TcpRegisterConnector {
    pub fn new(address: impl Into<String>, slave_id: u8) -> Self {
        Self {
            address: address.into(),
            slave_id,
            connect_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(3),
        }
    }
}

#[async_trait]
impl ModbusConnector for TcpRegisterConnector {
    async fn connect(&self) -> Result<Box<dyn RegisterClient>> {
        let addr = lookup_host(&self.address)
            .await
            .map_err(|e| BridgeError::connection(format!("resolve {}: {}", self.address, e)))?
            .next()
            .ok_or_else(|| BridgeError::connection(format!("no address for {}", self.address)))?;

        let ctx = tokio::time::timeout(
            self.connect_timeout,
            tokio_modbus::client::tcp::connect_slave(addr, Slave(self.slave_id)),
        )
        .await
        .map_err(|_| BridgeError::connection(format!("connect {} timed out", self.address)))?
        .map_err(|e| BridgeError::connection(format!("connect {}: {}", self.address, e)))?;

        Ok(Box::new(TcpRegisterClient {
            ctx,
            io_timeout: self.io_timeout,
        }))
    }
}

struct TcpRegisterClient {
    ctx: ModbusContext,
    io_timeout: Duration,
}

#[async_trait]
impl RegisterClient for TcpRegisterClient {
    async fn read_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        tokio::time::timeout(self.io_timeout, self.ctx.read_holding_registers(address, count))
            .await
            .map_err(|_| BridgeError::connection("read_holding_registers timed out"))?
            .map_err(|e| BridgeError::connection(format!("read_holding_registers: {}", e)))?
            .map_err(|e| BridgeError::protocol(format!("modbus exception: {}", e)))
    }

    async fn read_coils(&mut self, address: u16, count: u16) -> Result<Vec<bool>> {
        tokio::time::timeout(self.io_timeout, self.ctx.read_coils(address, count))
            .await
            .map_err(|_| BridgeError::connection("read_coils timed out"))?
            .map_err(|e| BridgeError::connection(format!("read_coils: {}", e)))?
            .map_err(|e| BridgeError::protocol(format!("modbus exception: {}", e)))
    }

    async fn write_registers(&mut self, address: u16, words: &[u16]) -> Result<()> {
        tokio::time::timeout(
            self.io_timeout,
            self.ctx.write_multiple_registers(address, words),
        )
        .await
        .map_err(|_| BridgeError::connection("write_multiple_registers timed out"))?
        .map_err(|e| BridgeError::connection(format!("write_multiple_registers: {}", e)))?
        .map_err(|e| BridgeError::protocol(format!("modbus exception: {}", e)))
    }

    async fn write_coil(&mut self, address: u16, value: bool) -> Result<()> {
        tokio::time::timeout(self.io_timeout, self.ctx.write_single_coil(address, value))
            .await
            .map_err(|_| BridgeError::connection("write_single_coil timed out"))?
            .map_err(|e| BridgeError::connection(format!("write_single_coil: {}", e)))?
            .map_err(|e| BridgeError::protocol(format!("modbus exception: {}", e)))
    }

    async fn close(&mut self) -> Result<()> {
        let _ = self.ctx.disconnect().await;
        Ok(())
    }
}

// ============================================================================
// Poller
// ============================================================================

/// Modbus register poller with bounded retry and reconnect fallback.
pub struct ModbusPoller {
    connector: Arc<dyn ModbusConnector>,
    registers: Arc<Vec<RegisterDef>>,
    store: Arc<TagStore>,
    poll_interval: Duration,
    retry: RetryPolicy,
    reconnect_delay: Duration,
    writes: mpsc::Receiver<Vec<(String, TagValue)>>,
    diagnostics: SharedDiagnostics,
    shutdown: watch::Receiver<bool>,
}

impl ModbusPoller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        connector: Arc<dyn ModbusConnector>,
        registers: Vec<RegisterDef>,
        store: Arc<TagStore>,
        poll_interval: Duration,
        retry: RetryPolicy,
        reconnect_delay: Duration,
        writes: mpsc::Receiver<Vec<(String, TagValue)>>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let mut diag = Diagnostics::new("modbus");
        diag.extra = serde_json::json!({ "registers": registers.len() });
        Self {
            connector,
            registers: Arc::new(registers),
            store,
            poll_interval,
            retry,
            reconnect_delay,
            writes,
            diagnostics: Arc::new(RwLock::new(diag)),
            shutdown,
        }
    }

    pub fn diagnostics(&self) -> SharedDiagnostics {
        Arc::clone(&self.diagnostics)
    }

    /// Declare readable register tags so `QUERY`/`READ` see them before the
    /// first poll completes.
    pub fn declare_tags(&self) {
        for reg in self.registers.iter().filter(|r| r.access.readable()) {
            self.store.declare(reg.tag.clone(), reg.initial_value());
        }
    }

    /// Run until shutdown.
    ///
    /// Returns an error only for fatal decode/configuration mismatches;
    /// transient faults never escape the retry/reconnect machinery.
    pub async fn run(mut self) -> Result<()> {
        let Some(mut client) = self.connect_until_ready().await else {
            return Ok(());
        };

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    let _ = client.close().await;
                    return Ok(());
                }
                _ = ticker.tick() => {
                    match self.poll_cycle(&mut client).await {
                        Ok(batch) => {
                            self.store.apply_batch(&batch);
                            let mut diag = self.diagnostics.write().await;
                            diag.read_count += 1;
                        }
                        Err(e) if e.is_fatal() => {
                            error!(error = %e, "register decode mismatch, stopping poller");
                            let _ = client.close().await;
                            return Err(e);
                        }
                        Err(e) => {
                            warn!(error = %e, "poll retry bound exceeded; rebuilding link");
                            let _ = client.close().await;
                            {
                                let mut diag = self.diagnostics.write().await;
                                diag.reconnect_count += 1;
                                diag.state = ConnectionState::Reconnecting;
                            }
                            match self.connect_until_ready().await {
                                Some(fresh) => client = fresh,
                                None => return Ok(()),
                            }
                        }
                    }
                }
                // The pattern disables this branch once every sender is
                // gone, instead of spinning on a closed channel.
                Some(pairs) = self.writes.recv() => {
                    self.apply_writes(&mut client, &pairs).await;
                }
            }
        }
    }

    /// Blocking reconnect loop: retries until a link is established or the
    /// node shuts down.
    async fn connect_until_ready(&mut self) -> Option<Box<dyn RegisterClient>> {
        self.set_state(ConnectionState::Connecting).await;
        loop {
            if *self.shutdown.borrow() {
                return None;
            }
            match self.connector.connect().await {
                Ok(client) => {
                    self.set_state(ConnectionState::Connected).await;
                    info!("modbus link established");
                    return Some(client);
                }
                Err(e) => {
                    self.record_error(&e).await;
                    warn!(error = %e, "modbus connect failed; retrying");
                    tokio::select! {
                        _ = self.shutdown.changed() => return None,
                        _ = tokio::time::sleep(self.reconnect_delay) => {}
                    }
                }
            }
        }
    }

    /// Read every readable register into one batch.
    async fn poll_cycle(
        &mut self,
        client: &mut Box<dyn RegisterClient>,
    ) -> Result<Vec<(String, TagValue)>> {
        let registers = Arc::clone(&self.registers);
        let mut batch = Vec::with_capacity(registers.len());
        for reg in registers.iter().filter(|r| r.access.readable()) {
            let value = self.read_with_retry(client.as_mut(), reg).await?;
            batch.push((reg.tag.clone(), value));
        }
        Ok(batch)
    }

    async fn read_with_retry(
        &mut self,
        client: &mut dyn RegisterClient,
        reg: &RegisterDef,
    ) -> Result<TagValue> {
        let mut attempts = 0u32;
        loop {
            match read_register(client, reg).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    attempts += 1;
                    self.record_error(&e).await;
                    if attempts > self.retry.max_retries {
                        return Err(e);
                    }
                    debug!(tag = %reg.tag, attempt = attempts, error = %e, "register read failed; retrying");
                    tokio::select! {
                        _ = self.shutdown.changed() => {
                            return Err(BridgeError::connection("shutdown during register retry"));
                        }
                        _ = tokio::time::sleep(self.retry.delay) => {}
                    }
                }
            }
        }
    }

    /// Apply write commands to registers whose access flags allow it.
    async fn apply_writes(
        &mut self,
        client: &mut Box<dyn RegisterClient>,
        pairs: &[(String, TagValue)],
    ) {
        let registers = Arc::clone(&self.registers);
        for (name, value) in pairs {
            // Writes fan out to every component; tags that are not Modbus
            // registers simply belong to someone else.
            let Some(reg) = registers.iter().find(|r| r.tag == *name) else {
                continue;
            };
            if !reg.access.writable() {
                warn!(tag = %name, "register is not writable, dropping command");
                continue;
            }

            let written = match reg.kind {
                RegisterKind::Float32 => {
                    let words = encode_f32(value.as_f64());
                    client.write_registers(reg.address, &words).await
                }
                RegisterKind::Coil => client.write_coil(reg.address, value.as_bool()).await,
            };

            match written {
                Ok(()) => {
                    let mut diag = self.diagnostics.write().await;
                    diag.write_count += 1;
                }
                Err(e) => {
                    self.record_error(&e).await;
                    warn!(tag = %name, error = %e, "register write failed");
                }
            }
        }
    }

    async fn set_state(&self, state: ConnectionState) {
        self.diagnostics.write().await.state = state;
    }

    async fn record_error(&self, error: &BridgeError) {
        let mut diag = self.diagnostics.write().await;
        diag.error_count += 1;
        diag.last_error = Some(error.to_string());
    }
}

/// Read and decode one register.
async fn read_register(client: &mut dyn RegisterClient, reg: &RegisterDef) -> Result<TagValue> {
    match reg.kind {
        RegisterKind::Coil => {
            let coils = client.read_coils(reg.address, 1).await?;
            let value = coils.first().copied().ok_or_else(|| {
                BridgeError::decode(format!("empty coil response for {}", reg.tag))
            })?;
            Ok(TagValue::Bool(value))
        }
        RegisterKind::Float32 => {
            let words = client.read_registers(reg.address, 2).await?;
            let value = decode_f32(&words)
                .map_err(|e| BridgeError::decode(format!("{}: {}", reg.tag, e)))?;
            Ok(TagValue::Number(value))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[test]
    fn test_f32_codec_big_endian() {
        // 51.5f32 = 0x424E0000
        assert_eq!(encode_f32(51.5), [0x424E, 0x0000]);
        assert_eq!(decode_f32(&[0x424E, 0x0000]).unwrap(), 51.5);

        let words = encode_f32(-1.25);
        assert_eq!(decode_f32(&words).unwrap(), -1.25);
    }

    #[test]
    fn test_f32_decode_rejects_bad_shape() {
        assert!(decode_f32(&[0x424E]).unwrap_err().is_fatal());
        // 0x7FC00000 is a quiet NaN
        assert!(decode_f32(&[0x7FC0, 0x0000]).unwrap_err().is_fatal());
    }

    #[test]
    fn test_access_flags() {
        assert!(RegisterAccess::Read.readable());
        assert!(!RegisterAccess::Read.writable());
        assert!(RegisterAccess::Write.writable());
        assert!(!RegisterAccess::Write.readable());
        assert!(RegisterAccess::ReadWrite.readable() && RegisterAccess::ReadWrite.writable());
    }

    // ------------------------------------------------------------------
    // Mock client
    // ------------------------------------------------------------------

    #[derive(Default)]
    struct MockState {
        connects: AtomicU32,
        read_failures_left: AtomicU32,
        registers: Mutex<HashMap<u16, [u16; 2]>>,
        coils: Mutex<HashMap<u16, bool>>,
        register_writes: Mutex<Vec<(u16, Vec<u16>)>>,
        coil_writes: Mutex<Vec<(u16, bool)>>,
        /// When set, register reads return a single word (decode mismatch).
        truncate_reads: std::sync::atomic::AtomicBool,
    }

    struct MockConnector {
        state: Arc<MockState>,
    }

    struct MockClient {
        state: Arc<MockState>,
    }

    #[async_trait]
    impl ModbusConnector for MockConnector {
        async fn connect(&self) -> Result<Box<dyn RegisterClient>> {
            self.state.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockClient {
                state: Arc::clone(&self.state),
            }))
        }
    }

    impl MockClient {
        fn maybe_fail(&self) -> Result<()> {
            let left = self.state.read_failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.state.read_failures_left.store(left - 1, Ordering::SeqCst);
                return Err(BridgeError::connection("mock read failure"));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl RegisterClient for MockClient {
        async fn read_registers(&mut self, address: u16, _count: u16) -> Result<Vec<u16>> {
            self.maybe_fail()?;
            let registers = self.state.registers.lock().unwrap();
            let words = registers
                .get(&address)
                .copied()
                .ok_or_else(|| BridgeError::protocol("illegal data address"))?;
            if self.state.truncate_reads.load(Ordering::SeqCst) {
                Ok(vec![words[0]])
            } else {
                Ok(words.to_vec())
            }
        }

        async fn read_coils(&mut self, address: u16, _count: u16) -> Result<Vec<bool>> {
            self.maybe_fail()?;
            let coils = self.state.coils.lock().unwrap();
            let value = coils
                .get(&address)
                .copied()
                .ok_or_else(|| BridgeError::protocol("illegal data address"))?;
            Ok(vec![value])
        }

        async fn write_registers(&mut self, address: u16, words: &[u16]) -> Result<()> {
            self.state
                .register_writes
                .lock()
                .unwrap()
                .push((address, words.to_vec()));
            Ok(())
        }

        async fn write_coil(&mut self, address: u16, value: bool) -> Result<()> {
            self.state.coil_writes.lock().unwrap().push((address, value));
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn register_table() -> Vec<RegisterDef> {
        vec![
            RegisterDef {
                tag: "plant.flow".into(),
                address: 100,
                kind: RegisterKind::Float32,
                access: RegisterAccess::ReadWrite,
            },
            RegisterDef {
                tag: "plant.pump".into(),
                address: 10,
                kind: RegisterKind::Coil,
                access: RegisterAccess::ReadWrite,
            },
            RegisterDef {
                tag: "plant.trip".into(),
                address: 11,
                kind: RegisterKind::Coil,
                access: RegisterAccess::Write,
            },
        ]
    }

    fn seeded_state() -> Arc<MockState> {
        let state = Arc::new(MockState::default());
        state
            .registers
            .lock()
            .unwrap()
            .insert(100, encode_f32(12.5));
        state.coils.lock().unwrap().insert(10, true);
        state
    }

    struct Harness {
        state: Arc<MockState>,
        store: Arc<TagStore>,
        writes: mpsc::Sender<Vec<(String, TagValue)>>,
        shutdown: watch::Sender<bool>,
        task: tokio::task::JoinHandle<Result<()>>,
        diagnostics: SharedDiagnostics,
    }

    fn start_poller(state: Arc<MockState>, max_retries: u32) -> Harness {
        let store = Arc::new(TagStore::new());
        let (write_tx, write_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let poller = ModbusPoller::new(
            Arc::new(MockConnector {
                state: Arc::clone(&state),
            }),
            register_table(),
            Arc::clone(&store),
            Duration::from_millis(1),
            RetryPolicy::fixed(max_retries, Duration::from_millis(1)),
            Duration::from_millis(1),
            write_rx,
            shutdown_rx,
        );
        poller.declare_tags();
        let diagnostics = poller.diagnostics();
        let task = tokio::spawn(poller.run());
        Harness {
            state,
            store,
            writes: write_tx,
            shutdown: shutdown_tx,
            task,
            diagnostics,
        }
    }

    async fn wait_for<F: Fn() -> bool>(what: &str, cond: F) {
        for _ in 0..500 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("timed out waiting for {}", what);
    }

    #[tokio::test]
    async fn test_poll_batches_all_readable_registers() {
        let h = start_poller(seeded_state(), 3);

        // Write-only registers are never declared or read.
        assert!(!h.store.contains("plant.trip"));

        wait_for("first poll", || {
            h.store.get("plant.flow") == Some(TagValue::Number(12.5))
        })
        .await;
        assert_eq!(h.store.get("plant.pump"), Some(TagValue::Bool(true)));

        let _ = h.shutdown.send(true);
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_retry_recovers_within_bound() {
        let state = seeded_state();
        state.read_failures_left.store(2, Ordering::SeqCst);
        let h = start_poller(Arc::clone(&state), 3);

        wait_for("recovery", || {
            h.store.get("plant.flow") == Some(TagValue::Number(12.5))
        })
        .await;
        // Bound covered the failures: the initial connect is the only one.
        assert_eq!(state.connects.load(Ordering::SeqCst), 1);

        let _ = h.shutdown.send(true);
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_retry_bound_exceeded_triggers_reconnect() {
        let state = seeded_state();
        state.read_failures_left.store(4, Ordering::SeqCst);
        let h = start_poller(Arc::clone(&state), 1);

        wait_for("recovery after reconnect", || {
            h.store.get("plant.flow") == Some(TagValue::Number(12.5))
        })
        .await;
        assert!(state.connects.load(Ordering::SeqCst) >= 2);
        assert!(h.diagnostics.read().await.reconnect_count >= 1);

        let _ = h.shutdown.send(true);
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_decode_mismatch_is_fatal() {
        let state = seeded_state();
        state.truncate_reads.store(true, Ordering::SeqCst);
        let h = start_poller(state, 3);

        let result = tokio::time::timeout(Duration::from_secs(5), h.task)
            .await
            .expect("poller did not stop")
            .unwrap();
        assert!(result.unwrap_err().is_fatal());
    }

    #[tokio::test]
    async fn test_write_commands_reach_device() {
        let h = start_poller(seeded_state(), 3);

        h.writes
            .send(vec![
                ("plant.flow".into(), TagValue::Number(33.25)),
                ("plant.trip".into(), TagValue::Bool(true)),
                ("not.modbus".into(), TagValue::Number(1.0)),
            ])
            .await
            .unwrap();

        wait_for("writes applied", || {
            !h.state.coil_writes.lock().unwrap().is_empty()
                && !h.state.register_writes.lock().unwrap().is_empty()
        })
        .await;

        assert_eq!(
            h.state.register_writes.lock().unwrap()[0],
            (100, encode_f32(33.25).to_vec())
        );
        assert_eq!(h.state.coil_writes.lock().unwrap()[0], (11, true));

        let _ = h.shutdown.send(true);
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_read_only_register_rejects_write() {
        let mut table = register_table();
        table[0].access = RegisterAccess::Read;

        let state = seeded_state();
        let store = Arc::new(TagStore::new());
        let (write_tx, write_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let poller = ModbusPoller::new(
            Arc::new(MockConnector {
                state: Arc::clone(&state),
            }),
            table,
            store,
            Duration::from_millis(1),
            RetryPolicy::default(),
            Duration::from_millis(1),
            write_rx,
            shutdown_rx,
        );
        let task = tokio::spawn(poller.run());

        write_tx
            .send(vec![("plant.flow".into(), TagValue::Number(1.0))])
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(state.register_writes.lock().unwrap().is_empty());

        let _ = shutdown_tx.send(true);
        task.await.unwrap().unwrap();
    }
}
