//! Synchrophasor measurement frames.
//!
//! A frame is one decoded measurement batch from a synchrophasor device,
//! stamped with the device's simulation-time clock. Frames are ephemeral:
//! the writer task folds them into the tag store and discards them.

use std::sync::Arc;

use crate::core::tag::TagValue;

/// One phasor measurement: real part and angle.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Phasor {
    pub real: f64,
    pub angle: f64,
}

impl Phasor {
    pub fn new(real: f64, angle: f64) -> Self {
        Self { real, angle }
    }
}

/// One decoded measurement batch from a synchrophasor device.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PhasorFrame {
    /// Simulation time in seconds, as reported by the device clock.
    pub sim_time: f64,

    /// Measured frequency.
    pub frequency: f64,

    /// Rate of change of frequency.
    pub rocof: f64,

    /// Phasor measurements, in the channel order of the device schema.
    pub phasors: Vec<Phasor>,

    /// Analog words.
    pub analog: Vec<f64>,

    /// Digital status bits.
    pub digital: Vec<bool>,
}

/// Channel schema reported by a synchrophasor device.
///
/// Channel names are only known after the configuration fetch, so the tag
/// namespace for a device is finalized at first successful connect, not at
/// configuration time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PmuSchema {
    /// Phasor channel names, in transmission order.
    pub channels: Vec<String>,
}

impl PmuSchema {
    pub fn new(channels: Vec<String>) -> Self {
        Self { channels }
    }

    /// Name for the phasor channel at `index`.
    ///
    /// Falls back to a positional name when the device reports fewer channel
    /// names than phasors.
    pub fn channel_name(&self, index: usize) -> String {
        self.channels
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("ph{}", index))
    }
}

/// A frame queued for ingestion, paired with its source device and schema.
#[derive(Debug, Clone)]
pub struct FrameEnvelope {
    /// Device label from configuration.
    pub device: Arc<str>,

    /// Schema resolved at connect time.
    pub schema: Arc<PmuSchema>,

    /// The decoded frame.
    pub frame: PhasorFrame,
}

impl FrameEnvelope {
    pub fn new(device: Arc<str>, schema: Arc<PmuSchema>, frame: PhasorFrame) -> Self {
        Self {
            device,
            schema,
            frame,
        }
    }

    /// Derive the tag updates this frame contributes.
    ///
    /// Phasors map to `<device>_<channel>.real` / `.angle`; frequency and
    /// ROCOF to `<device>.frequency` / `.rocof`; analog and digital words to
    /// positional `<device>.analog<i>` / `.digital<i>` names.
    pub fn tag_updates(&self) -> Vec<(String, TagValue)> {
        let device = &self.device;
        let mut updates =
            Vec::with_capacity(self.frame.phasors.len() * 2 + self.frame.analog.len() + self.frame.digital.len() + 2);

        for (i, phasor) in self.frame.phasors.iter().enumerate() {
            let channel = self.schema.channel_name(i);
            updates.push((
                format!("{}_{}.real", device, channel),
                TagValue::Number(phasor.real),
            ));
            updates.push((
                format!("{}_{}.angle", device, channel),
                TagValue::Number(phasor.angle),
            ));
        }

        updates.push((
            format!("{}.frequency", device),
            TagValue::Number(self.frame.frequency),
        ));
        updates.push((format!("{}.rocof", device), TagValue::Number(self.frame.rocof)));

        for (i, v) in self.frame.analog.iter().enumerate() {
            updates.push((format!("{}.analog{}", device, i), TagValue::Number(*v)));
        }
        for (i, v) in self.frame.digital.iter().enumerate() {
            updates.push((format!("{}.digital{}", device, i), TagValue::Bool(*v)));
        }

        updates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope() -> FrameEnvelope {
        let schema = Arc::new(PmuSchema::new(vec!["VA".into(), "VB".into()]));
        let frame = PhasorFrame {
            sim_time: 1.25,
            frequency: 50.01,
            rocof: -0.002,
            phasors: vec![Phasor::new(1.02, 0.0), Phasor::new(1.01, -2.09)],
            analog: vec![230.4],
            digital: vec![true, false],
        };
        FrameEnvelope::new(Arc::from("pmu1"), schema, frame)
    }

    #[test]
    fn test_tag_derivation() {
        let updates = envelope().tag_updates();
        let names: Vec<&str> = updates.iter().map(|(n, _)| n.as_str()).collect();

        assert!(names.contains(&"pmu1_VA.real"));
        assert!(names.contains(&"pmu1_VA.angle"));
        assert!(names.contains(&"pmu1_VB.real"));
        assert!(names.contains(&"pmu1.frequency"));
        assert!(names.contains(&"pmu1.rocof"));
        assert!(names.contains(&"pmu1.analog0"));
        assert!(names.contains(&"pmu1.digital1"));
        assert_eq!(updates.len(), 4 + 2 + 1 + 2);
    }

    #[test]
    fn test_channel_name_fallback() {
        let schema = PmuSchema::new(vec!["VA".into()]);
        assert_eq!(schema.channel_name(0), "VA");
        assert_eq!(schema.channel_name(3), "ph3");
    }

    #[test]
    fn test_digital_maps_to_bool() {
        let updates = envelope().tag_updates();
        let digital0 = updates
            .iter()
            .find(|(n, _)| n == "pmu1.digital0")
            .map(|(_, v)| *v)
            .unwrap();
        assert_eq!(digital0, TagValue::Bool(true));
    }
}
