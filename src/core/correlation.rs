//! Cross-source time correlation.
//!
//! Poller tasks run on independent schedules, so two devices reporting the
//! same simulation instant reach the writer at slightly different wall-clock
//! times. The correlation map pins each distinct simulation-time value to
//! the wall-clock time it was first observed at, and every later observer of
//! the same instant gets that same ingestion time.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Map from simulation-time key to first-observed ingestion wall-clock time.
///
/// Keys are the raw bit patterns of the reported simulation time, so devices
/// sharing a simulation clock correlate bit-exactly. Entries are created
/// lazily and never removed; unbounded growth over a very long run is a
/// known, accepted trade-off.
#[derive(Debug, Default)]
pub struct TimeCorrelationMap {
    entries: DashMap<u64, DateTime<Utc>>,
}

impl TimeCorrelationMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingestion wall-clock time for a simulation instant.
    ///
    /// The first caller for a given simulation-time value fixes the
    /// ingestion time for every device reporting that same instant.
    pub fn ingestion_time(&self, sim_time: f64) -> DateTime<Utc> {
        *self
            .entries
            .entry(sim_time.to_bits())
            .or_insert_with(Utc::now)
    }

    /// Number of distinct simulation instants observed.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_instant_same_ingestion() {
        let map = TimeCorrelationMap::new();
        let a = map.ingestion_time(0.02);
        let b = map.ingestion_time(0.02);
        assert_eq!(a, b);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_new_instant_gets_fresh_time() {
        let map = TimeCorrelationMap::new();
        let before = Utc::now();
        let t = map.ingestion_time(0.04);
        let after = Utc::now();
        assert!(t >= before && t <= after);

        let _ = map.ingestion_time(0.06);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_concurrent_observers_agree() {
        use std::sync::Arc;

        let map = Arc::new(TimeCorrelationMap::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let map = Arc::clone(&map);
            handles.push(std::thread::spawn(move || map.ingestion_time(1.5)));
        }
        let times: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(times.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(map.len(), 1);
    }
}
