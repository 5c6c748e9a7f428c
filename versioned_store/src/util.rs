// versioned_store/src/util.rs

use std::time::Instant;

use log::info;

/// Coarse phase timer logging named checkpoints, used by the long-running
/// scans.
pub struct Timer {
    name: String,
    started: Instant,
    last: Instant,
}

impl Timer {
    pub fn new(name: &str) -> Self {
        let now = Instant::now();
        Timer {
            name: name.to_string(),
            started: now,
            last: now,
        }
    }

    pub fn checkpoint(&mut self, message: &str) {
        let now = Instant::now();
        info!(
            "{}: {} ({} ms)",
            self.name,
            message,
            now.duration_since(self.last).as_millis()
        );
        self.last = now;
    }

    pub fn finish(self) {
        info!(
            "{}: finished in {} ms",
            self.name,
            self.started.elapsed().as_millis()
        );
    }
}
