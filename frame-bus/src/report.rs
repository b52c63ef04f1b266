use std::fmt::{Display, Formatter};

use parking_lot::Mutex;

/// Average bitrate of a finished branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bitrate {
    /// Bits per second.
    Measured(u64),
    /// No chunk covered any time span.
    NoData,
}

impl Bitrate {
    pub fn bits_per_second(&self) -> Option<u64> {
        match self {
            Bitrate::Measured(bps) => Some(*bps),
            Bitrate::NoData => None,
        }
    }
}

impl Display for Bitrate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Bitrate::Measured(bps) => write!(f, "{} bps", bps),
            Bitrate::NoData => write!(f, "no data"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Metric {
    Frames(u64),
    Bitrate(Bitrate),
    Failed(String),
}

impl Display for Metric {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Metric::Frames(n) => write!(f, "{} frames", n),
            Metric::Bitrate(bitrate) => write!(f, "{}", bitrate),
            Metric::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Destination for final per-stage numbers.
pub trait Reporter: Send + Sync {
    fn report(&self, name: &str, metric: &Metric);
}

/// Writes reports through the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&self, name: &str, metric: &Metric) {
        match metric {
            Metric::Failed(_) => log::error!("{}: {}", name, metric),
            _ => log::info!("{}: {}", name, metric),
        }
    }
}

/// Keeps every report in memory, in arrival order.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    entries: Mutex<Vec<(String, Metric)>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(String, Metric)> {
        self.entries.lock().clone()
    }

    /// Reports filed under `name`.
    pub fn metrics_for(&self, name: &str) -> Vec<Metric> {
        self.entries
            .lock()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

impl Reporter for MemoryReporter {
    fn report(&self, name: &str, metric: &Metric) {
        self.entries.lock().push((name.to_string(), metric.clone()));
    }
}
