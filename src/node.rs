//! Acquisition node orchestration.
//!
//! Wires the whole bridge together: the write-back sender, one poller task
//! per synchrophasor device, the Modbus poller, a single queue-draining
//! writer task, the command server, the periodic publish loop, and a
//! diagnostics logger. Shutdown is one watch channel flipped on ctrl-c (or
//! on a fatal poller error) and observed by every loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::acquire::modbus::{ModbusPoller, RegisterDef, TcpRegisterConnector};
use crate::acquire::pmu::{PhasorConnector, PmuPoller, SimPhasorConnector};
use crate::acquire::{RetryPolicy, SharedDiagnostics};
use crate::command::CommandDispatcher;
use crate::config::{NodeConfig, WriteBackMode};
use crate::core::correlation::TimeCorrelationMap;
use crate::core::error::{BridgeError, Result};
use crate::core::frame::FrameEnvelope;
use crate::sink::{CsvFrameLog, FrameSink};
use crate::store::TagStore;
use crate::transport::framing::encode_telemetry;
use crate::transport::publish::Publisher;
use crate::transport::request::CommandServer;
use crate::writeback::{
    spawn_continuous_sender, OnDemandSender, WriteBackEncoder, WriteBackRoute, WriteBackTag,
};

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

/// A started node: its tasks plus the handles tests and `run()` need.
pub struct NodeHandle {
    /// The node's tag store.
    pub store: Arc<TagStore>,

    /// Bound command server address.
    pub command_addr: SocketAddr,

    tasks: Vec<JoinHandle<()>>,
    fatal_rx: mpsc::Receiver<BridgeError>,
    // Keeps the fatal channel open when no poller can fail fatally.
    _fatal_tx: mpsc::Sender<BridgeError>,
}

impl NodeHandle {
    /// Wait for a fatal poller error (a configuration/decode mismatch).
    pub async fn wait_fatal(&mut self) -> Option<BridgeError> {
        self.fatal_rx.recv().await
    }

    /// Wait for every task to finish.
    pub async fn join(self) {
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// The acquisition node.
pub struct AcquisitionNode {
    config: NodeConfig,
}

impl AcquisitionNode {
    pub fn new(config: NodeConfig) -> Self {
        Self { config }
    }

    /// Run until ctrl-c or a fatal poller error.
    pub async fn run(self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handle = self.start(shutdown_rx).await?;

        let fatal = tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "signal handler failed");
                }
                info!("shutdown signal received");
                None
            }
            fatal = handle.wait_fatal() => fatal,
        };

        let _ = shutdown_tx.send(true);
        handle.join().await;

        match fatal {
            Some(e) => {
                error!(error = %e, "node stopped on fatal poller error");
                Err(e)
            }
            None => {
                info!("node stopped");
                Ok(())
            }
        }
    }

    /// Start every task of the node and return a handle to it.
    pub async fn start(&self, shutdown: watch::Receiver<bool>) -> Result<NodeHandle> {
        let config = &self.config;
        let store = Arc::new(TagStore::new());
        let correlation = Arc::new(TimeCorrelationMap::new());
        let (fatal_tx, fatal_rx) = mpsc::channel(1);
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        let mut diagnostics: Vec<SharedDiagnostics> = Vec::new();

        // Sinks.
        let mut sinks: Vec<Arc<dyn FrameSink>> = Vec::new();
        if let Some(csv) = &config.csv_log {
            sinks.push(Arc::new(CsvFrameLog::create(&csv.path)?));
            info!(path = %csv.path, "csv frame log enabled");
        }

        // Write-back encoder and its delivery mode.
        let mut writeback_route = None;
        if let Some(wb) = &config.writeback {
            let tags: Vec<WriteBackTag> = wb
                .tags
                .iter()
                .map(|t| WriteBackTag {
                    name: t.tag.clone(),
                    kind: t.kind,
                    initial: t.initial,
                })
                .collect();
            let encoder = Arc::new(WriteBackEncoder::new(&tags));
            for (name, value) in encoder.initial_store_values() {
                store.declare(name, value);
            }
            info!(target = %wb.target, layout = %encoder.layout_string(), "write-back configured");

            match wb.mode {
                WriteBackMode::Udp => {
                    tasks.push(spawn_continuous_sender(
                        Arc::clone(&encoder),
                        wb.target.clone(),
                        ms(wb.send_interval_ms.max(1)),
                        shutdown.clone(),
                    ));
                    writeback_route = Some(WriteBackRoute::Buffered(encoder));
                }
                WriteBackMode::Tcp => {
                    let sender = Arc::new(OnDemandSender::new(
                        encoder,
                        wb.target.clone(),
                        ms(wb.reconnect_delay_ms),
                        shutdown.clone(),
                    ));
                    writeback_route = Some(WriteBackRoute::Immediate(sender));
                }
            }
        }

        // Synchrophasor pollers, one task per device.
        let (frame_tx, frame_rx) = mpsc::channel::<FrameEnvelope>(1024);
        for pmu in &config.pmu {
            let connector: Arc<dyn PhasorConnector> = Arc::new(SimPhasorConnector::new(
                &pmu.label,
                pmu.channels.clone(),
                pmu.data_rate,
            ));
            let poller = PmuPoller::new(
                connector,
                frame_tx.clone(),
                RetryPolicy::fixed(pmu.frame_retry_limit, ms(pmu.retry_delay_ms)),
                ms(pmu.reconnect_delay_ms),
                shutdown.clone(),
            );
            diagnostics.push(poller.diagnostics());
            tasks.push(tokio::spawn(poller.run()));
        }
        drop(frame_tx);

        // Modbus poller.
        let mut device_write_tx = None;
        if let Some(mb) = &config.modbus {
            let (write_tx, write_rx) = mpsc::channel(64);
            device_write_tx = Some(write_tx);

            let connector = Arc::new(TcpRegisterConnector {
                address: mb.address.clone(),
                slave_id: mb.slave_id,
                connect_timeout: ms(mb.connect_timeout_ms),
                io_timeout: ms(mb.io_timeout_ms),
            });
            let registers: Vec<RegisterDef> = mb
                .registers
                .iter()
                .map(|r| RegisterDef {
                    tag: r.tag.clone(),
                    address: r.address,
                    kind: r.kind,
                    access: r.access,
                })
                .collect();
            let poller = ModbusPoller::new(
                connector,
                registers,
                Arc::clone(&store),
                ms(mb.poll_interval_ms),
                RetryPolicy::fixed(mb.retry_limit, ms(mb.retry_delay_ms)),
                ms(mb.reconnect_delay_ms),
                write_rx,
                shutdown.clone(),
            );
            poller.declare_tags();
            diagnostics.push(poller.diagnostics());

            let fatal_tx = fatal_tx.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = poller.run().await {
                    let _ = fatal_tx.try_send(e);
                }
            }));
        }

        // Writer task: the only path from the acquisition queue into the store.
        tasks.push(spawn_writer(
            frame_rx,
            Arc::clone(&store),
            correlation,
            sinks,
            shutdown.clone(),
        ));

        // Command server.
        let mut dispatcher = CommandDispatcher::new(Arc::clone(&store));
        if let Some(route) = writeback_route {
            dispatcher = dispatcher.with_write_back(route);
        }
        if let Some(tx) = device_write_tx {
            dispatcher = dispatcher.with_device_writes(tx);
        }
        let mut server = CommandServer::bind(&config.node.command_bind).await?;
        server.set_handler(Arc::new(dispatcher));
        let command_addr = server.local_addr()?;
        {
            let shutdown = shutdown.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = server.serve(shutdown).await {
                    error!(error = %e, "command server stopped");
                }
            }));
        }

        // Periodic publish loop.
        let publisher = Publisher::open(&config.node.publish_endpoint).await?;
        info!(group = %publisher.group(), "telemetry publisher opened");
        tasks.push(spawn_publisher(
            publisher,
            Arc::clone(&store),
            config.node.publish_interval_ms,
            shutdown.clone(),
        ));

        // Diagnostics logger.
        tasks.push(spawn_diagnostics(
            diagnostics,
            ms(config.node.diagnostics_interval_ms.max(1)),
            shutdown,
        ));

        info!(node = %config.node.name, %command_addr, "acquisition node started");
        Ok(NodeHandle {
            store,
            command_addr,
            tasks,
            fatal_rx,
            _fatal_tx: fatal_tx,
        })
    }
}

/// Drain the acquisition queue into the store and the sinks.
fn spawn_writer(
    mut frames: mpsc::Receiver<FrameEnvelope>,
    store: Arc<TagStore>,
    correlation: Arc<TimeCorrelationMap>,
    sinks: Vec<Arc<dyn FrameSink>>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                envelope = frames.recv() => {
                    let Some(envelope) = envelope else { break };
                    // First observer of a simulation instant fixes its
                    // ingestion time for every device.
                    let ingested = correlation.ingestion_time(envelope.frame.sim_time);
                    store.apply_batch(&envelope.tag_updates());
                    for sink in &sinks {
                        if let Err(e) = sink.record(&envelope, ingested).await {
                            warn!(error = %e, "frame sink failed");
                        }
                    }
                }
            }
        }
    })
}

/// Snapshot-and-publish loop. A zero interval is fire-hose mode: loop as
/// fast as possible, yielding between sends.
fn spawn_publisher(
    publisher: Publisher,
    store: Arc<TagStore>,
    interval_ms: u64,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if *shutdown.borrow() {
                break;
            }
            let payload = encode_telemetry(&store.snapshot());
            if !payload.is_empty() {
                if let Err(e) = publisher.publish(&payload).await {
                    warn!(error = %e, "telemetry publish failed");
                }
            }
            if interval_ms == 0 {
                tokio::task::yield_now().await;
            } else {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(ms(interval_ms)) => {}
                }
            }
        }
    })
}

/// Periodically log a serialized snapshot of every poller's diagnostics.
fn spawn_diagnostics(
    diagnostics: Vec<SharedDiagnostics>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // the immediate first tick carries no data yet
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    for diag in &diagnostics {
                        let snapshot = diag.read().await.clone();
                        match serde_json::to_string(&snapshot) {
                            Ok(json) => info!(source = %snapshot.source, diagnostics = %json, "poller diagnostics"),
                            Err(e) => warn!(error = %e, "diagnostics serialization failed"),
                        }
                    }
                }
            }
        }
    })
}
