//! Stage timing.

use std::time::Instant;

/// A simple timer for measuring pipeline stage durations.
pub struct Timer {
    name: String,
    start: Instant,
}

impl Timer {
    /// Start a new timer with the given stage name.
    pub fn start(name: &str) -> Self {
        Self {
            name: name.to_string(),
            start: Instant::now(),
        }
    }

    /// Finish the timer and print the elapsed time.
    pub fn finish(self) {
        println!("  {}", format_elapsed(&self.name, self.start.elapsed().as_secs_f64()));
    }
}

fn format_elapsed(name: &str, secs: f64) -> String {
    if secs >= 60.0 {
        format!("[{:.1}m] {}", secs / 60.0, name)
    } else {
        format!("[{:.1}s] {}", secs, name)
    }
}
