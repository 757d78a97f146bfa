use log::{debug, info, warn};

/// Frames between two periodic progress messages.
pub const LOG_INTERVAL: u64 = 100;

pub struct LogManager {
    component: &'static str,
    interval: u64,
}

impl LogManager {
    pub fn new(component: &'static str) -> Self {
        Self {
            component,
            interval: LOG_INTERVAL,
        }
    }

    pub fn with_interval(component: &'static str, interval: u64) -> Self {
        Self {
            component,
            interval: interval.max(1),
        }
    }

    pub fn record(&self, message: &str) {
        info!("[{}] {}", self.component, message);
    }

    pub fn warn(&self, message: &str) {
        warn!("[{}] {}", self.component, message);
    }

    /// Emits a debug message only on every `interval`-th count.
    pub fn periodic<F: FnOnce() -> String>(&self, count: u64, message: F) -> bool {
        if count == 0 || count % self.interval != 0 {
            return false;
        }
        debug!("[{}] {}", self.component, message());
        true
    }
}

impl Default for LogManager {
    fn default() -> Self {
        Self::new("mmwcore")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn periodic_fires_on_interval_multiples() {
        let logger = LogManager::with_interval("test", 10);
        assert!(!logger.periodic(0, String::new));
        assert!(!logger.periodic(9, String::new));
        assert!(logger.periodic(10, String::new));
        assert!(logger.periodic(20, String::new));
    }
}
