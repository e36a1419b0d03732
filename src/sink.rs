//! Frame sinks.
//!
//! The writer task forwards every ingested frame to the configured sinks.
//! The bulk telemetry indexer lives outside this crate; [`FrameSink`] is its
//! integration point. A basic CSV log ships here for lab captures.

use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::error::{BridgeError, Result};
use crate::core::frame::FrameEnvelope;

/// Consumer of ingested frames.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn record(&self, envelope: &FrameEnvelope, ingested: DateTime<Utc>) -> Result<()>;
}

/// Sink that discards everything.
pub struct NullSink;

#[async_trait]
impl FrameSink for NullSink {
    async fn record(&self, _envelope: &FrameEnvelope, _ingested: DateTime<Utc>) -> Result<()> {
        Ok(())
    }
}

/// CSV frame log: one row per phasor channel per frame.
pub struct CsvFrameLog {
    writer: Mutex<csv::Writer<File>>,
}

impl CsvFrameLog {
    /// Create (or truncate) the log file and write the header row.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        let mut writer = csv::Writer::from_writer(file);
        writer
            .write_record([
                "ingested", "device", "sim_time", "frequency", "rocof", "channel", "real", "angle",
            ])
            .map_err(csv_error)?;
        writer.flush()?;
        Ok(Self {
            writer: Mutex::new(writer),
        })
    }
}

fn csv_error(e: csv::Error) -> BridgeError {
    BridgeError::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
}

#[async_trait]
impl FrameSink for CsvFrameLog {
    async fn record(&self, envelope: &FrameEnvelope, ingested: DateTime<Utc>) -> Result<()> {
        let mut writer = self.writer.lock().expect("csv writer poisoned");
        for (i, phasor) in envelope.frame.phasors.iter().enumerate() {
            writer
                .write_record([
                    ingested.to_rfc3339(),
                    envelope.device.to_string(),
                    envelope.frame.sim_time.to_string(),
                    envelope.frame.frequency.to_string(),
                    envelope.frame.rocof.to_string(),
                    envelope.schema.channel_name(i),
                    phasor.real.to_string(),
                    phasor.angle.to_string(),
                ])
                .map_err(csv_error)?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::frame::{Phasor, PhasorFrame, PmuSchema};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_csv_rows_per_channel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames.csv");
        let sink = CsvFrameLog::create(&path).unwrap();

        let envelope = FrameEnvelope::new(
            Arc::from("pmu1"),
            Arc::new(PmuSchema::new(vec!["VA".into(), "VB".into()])),
            PhasorFrame {
                sim_time: 0.02,
                frequency: 50.0,
                rocof: 0.0,
                phasors: vec![Phasor::new(1.0, 0.0), Phasor::new(0.98, -2.1)],
                analog: Vec::new(),
                digital: Vec::new(),
            },
        );
        sink.record(&envelope, Utc::now()).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3); // header + one row per channel
        assert!(lines[0].starts_with("ingested,device,"));
        assert!(lines[1].contains("pmu1"));
        assert!(lines[1].contains("VA"));
        assert!(lines[2].contains("VB"));
    }
}
