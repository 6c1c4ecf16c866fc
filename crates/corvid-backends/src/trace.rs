//! Trace collectors
//!
//! A trace collector is an observer attached to a context. Devices hand every
//! active collector the events of a launch. Profiling payloads are a tagged
//! enum keyed by [`ProfileKind`].

use std::fmt;

use parking_lot::Mutex;

/// Identity of the launch a collector is observing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSummary {
    pub device: String,
    pub module: String,
    pub kernel: String,
    pub work_groups: [u32; 3],
    pub local_size: [u32; 3],
}

impl LaunchSummary {
    pub fn work_items(&self) -> u64 {
        self.work_groups
            .iter()
            .chain(self.local_size.iter())
            .map(|&d| d as u64)
            .product()
    }
}

/// Kind of a [`ProfileRecord`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileKind {
    InstructionCount,
    MemoryTraffic,
    ClockCycles,
    BranchDivergence,
}

/// Out-of-band profiling data produced by a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileRecord {
    InstructionCount { instructions: u64 },
    MemoryTraffic { loads: u64, stores: u64, bytes: u64 },
    ClockCycles { work_group: u32, cycles: u64 },
    BranchDivergence { branches: u64, divergent: u64 },
}

impl ProfileRecord {
    pub fn kind(&self) -> ProfileKind {
        match self {
            Self::InstructionCount { .. } => ProfileKind::InstructionCount,
            Self::MemoryTraffic { .. } => ProfileKind::MemoryTraffic,
            Self::ClockCycles { .. } => ProfileKind::ClockCycles,
            Self::BranchDivergence { .. } => ProfileKind::BranchDivergence,
        }
    }
}

/// Execution event delivered to collectors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    LaunchBegin(LaunchSummary),
    Profile(ProfileRecord),
    LaunchEnd { kernel: String, succeeded: bool },
}

/// Observer of execution events
pub trait TraceCollector: Send + Sync {
    /// Called once before the first event of a launch.
    fn initialize(&self, _launch: &LaunchSummary) {}

    fn event(&self, event: &TraceEvent);

    /// Called once after the last event of a launch.
    fn finish(&self) {}
}

/// Collector that keeps every event it sees.
#[derive(Default)]
pub struct RecordingCollector {
    events: Mutex<Vec<TraceEvent>>,
    launches: Mutex<u32>,
}

impl RecordingCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().clone()
    }

    /// Number of launches this collector was initialized for.
    pub fn launches(&self) -> u32 {
        *self.launches.lock()
    }
}

impl TraceCollector for RecordingCollector {
    fn initialize(&self, _launch: &LaunchSummary) {
        *self.launches.lock() += 1;
    }

    fn event(&self, event: &TraceEvent) {
        self.events.lock().push(event.clone());
    }
}

impl fmt::Debug for RecordingCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingCollector")
            .field("events", &self.events.lock().len())
            .field("launches", &self.launches())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_kind_tags() {
        let record = ProfileRecord::MemoryTraffic {
            loads: 4,
            stores: 2,
            bytes: 24,
        };
        assert_eq!(record.kind(), ProfileKind::MemoryTraffic);
        assert_eq!(
            ProfileRecord::InstructionCount { instructions: 1 }.kind(),
            ProfileKind::InstructionCount
        );
    }

    #[test]
    fn test_recording_collector() {
        let collector = RecordingCollector::new();
        let summary = LaunchSummary {
            device: "dev".into(),
            module: "m".into(),
            kernel: "k".into(),
            work_groups: [4, 1, 1],
            local_size: [256, 1, 1],
        };
        assert_eq!(summary.work_items(), 1024);

        collector.initialize(&summary);
        collector.event(&TraceEvent::LaunchBegin(summary.clone()));
        collector.finish();

        assert_eq!(collector.launches(), 1);
        assert_eq!(collector.events(), vec![TraceEvent::LaunchBegin(summary)]);
    }
}
