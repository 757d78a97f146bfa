use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Counters of one acquisition run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub packets_received: u64,
    /// Complete frames handed to the processing queue.
    pub frames_received: u64,
    /// Complete frames dropped because the processing queue stayed full.
    pub frames_dropped: u64,
    /// Incomplete frames abandoned during resynchronisation.
    pub frames_discarded: u64,
    pub frames_processed: u64,
    pub errors: u64,
}

pub struct MetricsRecorder {
    inner: Mutex<MetricsSnapshot>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MetricsSnapshot::default()),
        }
    }

    fn update<F: FnOnce(&mut MetricsSnapshot)>(&self, apply: F) {
        if let Ok(mut metrics) = self.inner.lock() {
            apply(&mut metrics);
        }
    }

    pub fn record_packet(&self) {
        self.update(|m| m.packets_received += 1);
    }

    pub fn record_frame_received(&self) -> u64 {
        let mut count = 0;
        self.update(|m| {
            m.frames_received += 1;
            count = m.frames_received;
        });
        count
    }

    pub fn record_frame_dropped(&self) {
        self.update(|m| m.frames_dropped += 1);
    }

    pub fn record_frames_discarded(&self, count: u64) {
        self.update(|m| m.frames_discarded += count);
    }

    pub fn record_processed(&self) -> u64 {
        let mut count = 0;
        self.update(|m| {
            m.frames_processed += 1;
            count = m.frames_processed;
        });
        count
    }

    pub fn record_error(&self) {
        self.update(|m| m.errors += 1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        if let Ok(metrics) = self.inner.lock() {
            *metrics
        } else {
            MetricsSnapshot::default()
        }
    }

    pub fn reset(&self) {
        self.update(|m| *m = MetricsSnapshot::default());
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}
