//! Synchrophasor device poller.
//!
//! One poller per monitored device. The device link is rebuilt from scratch
//! on connection loss: close, reconnect, re-fetch the channel schema, resend
//! the start command. The tag namespace for a device therefore only exists
//! after the first successful connect; channel names come from the device,
//! not from configuration.

use std::f64::consts::TAU;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, info, warn};

use crate::acquire::{ConnectionState, Diagnostics, RetryPolicy, SharedDiagnostics};
use crate::core::error::{BridgeError, Result};
use crate::core::frame::{FrameEnvelope, Phasor, PhasorFrame, PmuSchema};

/// One synchrophasor device session.
///
/// Implementations wrap the actual device/decoder; the poller drives the
/// session through this narrow contract and owns it exclusively.
#[async_trait]
pub trait PhasorDevice: Send {
    /// Request device metadata. Best-effort: some device types do not
    /// answer this particular request, so callers log a failure and move on.
    async fn fetch_header(&mut self) -> Result<String>;

    /// Request the channel schema. Tag names derive from it.
    async fn fetch_config(&mut self) -> Result<PmuSchema>;

    /// Tell the device to start streaming.
    async fn start(&mut self) -> Result<()>;

    /// Request the next data frame.
    async fn next_frame(&mut self) -> Result<PhasorFrame>;

    /// Close the session. Best-effort.
    async fn close(&mut self) -> Result<()>;
}

/// Connects (and re-connects) sessions to one device.
#[async_trait]
pub trait PhasorConnector: Send + Sync {
    /// Device label used as the tag name prefix.
    fn label(&self) -> &str;

    async fn connect(&self) -> Result<Box<dyn PhasorDevice>>;
}

/// Poller for one synchrophasor device.
///
/// Decoded frames are pushed onto the shared acquisition queue; the writer
/// task folds them into the tag store.
pub struct PmuPoller {
    connector: Arc<dyn PhasorConnector>,
    queue: mpsc::Sender<FrameEnvelope>,
    retry: RetryPolicy,
    reconnect_delay: Duration,
    diagnostics: SharedDiagnostics,
    shutdown: watch::Receiver<bool>,
}

impl PmuPoller {
    pub fn new(
        connector: Arc<dyn PhasorConnector>,
        queue: mpsc::Sender<FrameEnvelope>,
        retry: RetryPolicy,
        reconnect_delay: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let diagnostics = Arc::new(RwLock::new(Diagnostics::new(connector.label())));
        Self {
            connector,
            queue,
            retry,
            reconnect_delay,
            diagnostics,
            shutdown,
        }
    }

    pub fn diagnostics(&self) -> SharedDiagnostics {
        Arc::clone(&self.diagnostics)
    }

    /// Run until shutdown. Never returns an error: every fault on this path
    /// is answered by rebuilding the link.
    pub async fn run(mut self) {
        let label: Arc<str> = Arc::from(self.connector.label());

        'session: loop {
            if *self.shutdown.borrow() {
                break;
            }

            // Establish the session: connect, header (best-effort), schema,
            // start. Any failure here restarts the whole sequence.
            self.set_state(ConnectionState::Connecting).await;
            let mut device = match self.connector.connect().await {
                Ok(device) => device,
                Err(e) => {
                    self.record_error(&e).await;
                    warn!(device = %label, error = %e, "connect failed; retrying");
                    if self.sleep_interrupted(self.reconnect_delay).await {
                        break 'session;
                    }
                    continue 'session;
                }
            };

            match device.fetch_header().await {
                Ok(header) => debug!(device = %label, header = %header, "device header"),
                Err(e) => debug!(device = %label, error = %e, "device header unavailable"),
            }

            let schema = match device.fetch_config().await {
                Ok(schema) => Arc::new(schema),
                Err(e) => {
                    self.record_error(&e).await;
                    warn!(device = %label, error = %e, "schema fetch failed; rebuilding link");
                    self.teardown(&mut device).await;
                    continue 'session;
                }
            };

            if let Err(e) = device.start().await {
                self.record_error(&e).await;
                warn!(device = %label, error = %e, "start command failed; rebuilding link");
                self.teardown(&mut device).await;
                continue 'session;
            }

            self.set_state(ConnectionState::Connected).await;
            info!(device = %label, channels = schema.channels.len(), "device streaming");

            // Frame loop: bounded retries on a failed frame request, full
            // rebuild once the bound is exceeded.
            let mut failures = 0u32;
            loop {
                if *self.shutdown.borrow() {
                    let _ = device.close().await;
                    break 'session;
                }

                match device.next_frame().await {
                    Ok(frame) => {
                        failures = 0;
                        {
                            let mut diag = self.diagnostics.write().await;
                            diag.read_count += 1;
                        }
                        let envelope =
                            FrameEnvelope::new(Arc::clone(&label), Arc::clone(&schema), frame);
                        tokio::select! {
                            _ = self.shutdown.changed() => {
                                let _ = device.close().await;
                                break 'session;
                            }
                            sent = self.queue.send(envelope) => {
                                if sent.is_err() {
                                    // writer gone: the node is shutting down
                                    let _ = device.close().await;
                                    break 'session;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        failures += 1;
                        self.record_error(&e).await;
                        if failures > self.retry.max_retries {
                            warn!(device = %label, failures, error = %e,
                                "frame retry bound exceeded; rebuilding link");
                            self.teardown(&mut device).await;
                            continue 'session;
                        }
                        debug!(device = %label, attempt = failures, error = %e, "frame request failed; retrying");
                        if self.sleep_interrupted(self.retry.delay).await {
                            let _ = device.close().await;
                            break 'session;
                        }
                    }
                }
            }
        }

        self.set_state(ConnectionState::Disconnected).await;
        debug!(device = %self.connector.label(), "poller stopped");
    }

    async fn teardown(&mut self, device: &mut Box<dyn PhasorDevice>) {
        let _ = device.close().await;
        let mut diag = self.diagnostics.write().await;
        diag.reconnect_count += 1;
        diag.state = ConnectionState::Reconnecting;
    }

    async fn set_state(&self, state: ConnectionState) {
        self.diagnostics.write().await.state = state;
    }

    async fn record_error(&self, error: &BridgeError) {
        let mut diag = self.diagnostics.write().await;
        diag.error_count += 1;
        diag.last_error = Some(error.to_string());
    }

    /// Sleep for `duration`, returning true if shutdown arrived first.
    async fn sleep_interrupted(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown.changed() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }
}

// ============================================================================
// Simulated device driver
// ============================================================================

/// Deterministic simulated synchrophasor device.
///
/// Produces sinusoidal phasors on a simulated clock at a fixed data rate, so
/// a node is runnable end-to-end without lab hardware. The simulated device
/// does not answer the header request, exercising the best-effort path.
pub struct SimPhasorConnector {
    label: String,
    channels: Vec<String>,
    data_rate: u32,
}

impl SimPhasorConnector {
    pub fn new(label: impl Into<String>, channels: Vec<String>, data_rate: u32) -> Self {
        Self {
            label: label.into(),
            channels,
            data_rate: data_rate.max(1),
        }
    }
}

#[async_trait]
impl PhasorConnector for SimPhasorConnector {
    fn label(&self) -> &str {
        &self.label
    }

    async fn connect(&self) -> Result<Box<dyn PhasorDevice>> {
        Ok(Box::new(SimPhasorDevice {
            channels: self.channels.clone(),
            period: Duration::from_secs_f64(1.0 / self.data_rate as f64),
            tick: 0,
            started: false,
        }))
    }
}

struct SimPhasorDevice {
    channels: Vec<String>,
    period: Duration,
    tick: u64,
    started: bool,
}

#[async_trait]
impl PhasorDevice for SimPhasorDevice {
    async fn fetch_header(&mut self) -> Result<String> {
        Err(BridgeError::protocol(
            "simulated device does not answer header requests",
        ))
    }

    async fn fetch_config(&mut self) -> Result<PmuSchema> {
        Ok(PmuSchema::new(self.channels.clone()))
    }

    async fn start(&mut self) -> Result<()> {
        self.started = true;
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<PhasorFrame> {
        if !self.started {
            return Err(BridgeError::protocol("stream not started"));
        }

        tokio::time::sleep(self.period).await;
        let t = self.tick as f64 * self.period.as_secs_f64();
        self.tick += 1;

        let phasors = (0..self.channels.len())
            .map(|i| {
                let offset = i as f64 * TAU / 3.0;
                Phasor::new(
                    1.0 + 0.05 * (TAU * 0.2 * t + offset).sin(),
                    ((TAU * 0.5 * t + offset) % TAU) - TAU / 2.0,
                )
            })
            .collect();

        Ok(PhasorFrame {
            sim_time: t,
            frequency: 50.0 + 0.01 * (TAU * 0.1 * t).sin(),
            rocof: 0.01 * TAU * 0.1 * (TAU * 0.1 * t).cos(),
            phasors,
            analog: Vec::new(),
            digital: Vec::new(),
        })
    }

    async fn close(&mut self) -> Result<()> {
        self.started = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Shared script state: fail the first `failures_left` frame requests
    /// (counted across sessions), then stream successfully.
    struct Script {
        connects: AtomicU32,
        failures_left: AtomicU32,
    }

    struct ScriptedConnector {
        label: String,
        script: Arc<Script>,
    }

    impl ScriptedConnector {
        fn new(fail_frames: u32) -> Self {
            Self {
                label: "pmu1".into(),
                script: Arc::new(Script {
                    connects: AtomicU32::new(0),
                    failures_left: AtomicU32::new(fail_frames),
                }),
            }
        }
    }

    struct ScriptedDevice {
        script: Arc<Script>,
        frame_no: u64,
    }

    #[async_trait]
    impl PhasorConnector for ScriptedConnector {
        fn label(&self) -> &str {
            &self.label
        }

        async fn connect(&self) -> Result<Box<dyn PhasorDevice>> {
            self.script.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedDevice {
                script: Arc::clone(&self.script),
                frame_no: 0,
            }))
        }
    }

    #[async_trait]
    impl PhasorDevice for ScriptedDevice {
        async fn fetch_header(&mut self) -> Result<String> {
            Ok("scripted".into())
        }

        async fn fetch_config(&mut self) -> Result<PmuSchema> {
            Ok(PmuSchema::new(vec!["VA".into()]))
        }

        async fn start(&mut self) -> Result<()> {
            Ok(())
        }

        async fn next_frame(&mut self) -> Result<PhasorFrame> {
            let left = self.script.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.script.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(BridgeError::connection("scripted frame failure"));
            }
            self.frame_no += 1;
            Ok(PhasorFrame {
                sim_time: self.frame_no as f64 * 0.02,
                frequency: 50.0,
                rocof: 0.0,
                phasors: vec![Phasor::new(1.0, 0.0)],
                analog: Vec::new(),
                digital: Vec::new(),
            })
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    async fn run_until_first_frame(connector: ScriptedConnector, max_retries: u32) -> (u32, u64) {
        let script = Arc::clone(&connector.script);
        let (tx, mut rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let poller = PmuPoller::new(
            Arc::new(connector),
            tx,
            RetryPolicy::fixed(max_retries, Duration::from_millis(1)),
            Duration::from_millis(1),
            shutdown_rx,
        );
        let diagnostics = poller.diagnostics();
        let task = tokio::spawn(poller.run());

        let envelope = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("poller produced no frame")
            .expect("queue closed");
        assert_eq!(&*envelope.device, "pmu1");
        assert_eq!(envelope.schema.channels, vec!["VA".to_string()]);

        let _ = shutdown_tx.send(true);
        drop(rx);
        let _ = task.await;

        let reconnects = diagnostics.read().await.reconnect_count;
        (script.connects.load(Ordering::SeqCst), reconnects)
    }

    #[tokio::test]
    async fn test_retry_bound_covers_failures() {
        // 3 failures, bound 3: recovers in-session, no reconnect.
        let connector = ScriptedConnector::new(3);
        let (connects, reconnects) = run_until_first_frame(connector, 3).await;
        assert_eq!(connects, 1);
        assert_eq!(reconnects, 0);
    }

    #[tokio::test]
    async fn test_retry_bound_exceeded_reconnects_once() {
        // 3 failures, bound 1: failures 1..2 exhaust the bound, one rebuild,
        // remaining failure is absorbed by the fresh retry budget.
        let connector = ScriptedConnector::new(3);
        let (connects, reconnects) = run_until_first_frame(connector, 1).await;
        assert_eq!(connects, 2);
        assert_eq!(reconnects, 1);
    }

    #[tokio::test]
    async fn test_sim_device_streams_frames() {
        let connector = SimPhasorConnector::new("sim1", vec!["VA".into(), "VB".into()], 200);
        let mut device = connector.connect().await.unwrap();

        assert!(device.fetch_header().await.is_err());
        let schema = device.fetch_config().await.unwrap();
        assert_eq!(schema.channels.len(), 2);

        // Frames are rejected before start.
        assert!(device.next_frame().await.is_err());
        device.start().await.unwrap();

        let first = device.next_frame().await.unwrap();
        let second = device.next_frame().await.unwrap();
        assert_eq!(first.phasors.len(), 2);
        assert!(second.sim_time > first.sim_time);
        assert!((first.frequency - 50.0).abs() < 0.1);
    }
}
