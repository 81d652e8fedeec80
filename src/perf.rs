// src/perf.rs

//! Lightweight performance samples.
//!
//! A sample times one operation and carries a few metadata pairs. Samples
//! log at debug level; slow ones (or force-logged ones, e.g. failures) are
//! promoted to info so they show up under default logging.

use std::time::{Duration, Instant};

use tracing::{debug, info};

/// Samples at or above this duration are always logged at info.
const SLOW_SAMPLE: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub struct PerfSample {
    name: &'static str,
    start: Instant,
    elapsed: Option<Duration>,
    meta: Vec<(&'static str, String)>,
    will_log: bool,
}

impl PerfSample {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
            elapsed: None,
            meta: Vec::new(),
            will_log: false,
        }
    }

    pub fn add_meta(&mut self, key: &'static str, value: impl Into<String>) {
        self.meta.push((key, value.into()));
    }

    /// Stop the clock. Returns true when the sample will be logged at info.
    pub fn finish(&mut self) -> bool {
        let elapsed = *self.elapsed.get_or_insert_with(|| self.start.elapsed());
        if elapsed >= SLOW_SAMPLE {
            self.will_log = true;
        }
        self.will_log
    }

    /// Promote the sample to info regardless of its duration.
    pub fn force_log(&mut self) {
        self.will_log = true;
    }

    pub fn log(&mut self) {
        let elapsed = *self.elapsed.get_or_insert_with(|| self.start.elapsed());
        if self.will_log {
            info!(
                sample = self.name,
                elapsed_ms = elapsed.as_millis() as u64,
                meta = ?self.meta,
                "perf sample"
            );
        } else {
            debug!(
                sample = self.name,
                elapsed_ms = elapsed.as_millis() as u64,
                meta = ?self.meta,
                "perf sample"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_samples_are_not_promoted() {
        let mut sample = PerfSample::new("test");
        assert!(!sample.finish());
    }

    #[test]
    fn force_log_promotes_regardless_of_duration() {
        let mut sample = PerfSample::new("test");
        sample.force_log();
        assert!(sample.finish());
    }
}
