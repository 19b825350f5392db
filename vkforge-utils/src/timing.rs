// Timing helpers shared by the logging macros and the render loop.
//
// vkforge contributors

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, used as the timestamp prefix on
/// every log line.
pub fn get_current_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_millis(0))
        .as_millis()
}

/// Tracks the wall-clock time of one render-loop iteration.
///
/// The render loop (vkforge::frame::RenderLoop) uses this to compute how
/// long a frame took and how long to sleep before the next scheduled
/// invocation.
pub struct StopWatch {
    start: Instant,
}

impl StopWatch {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn restart(&mut self) {
        self.start = Instant::now();
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for StopWatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopwatch_elapses() {
        let sw = StopWatch::new();
        std::thread::sleep(Duration::from_millis(5));
        assert!(sw.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn current_millis_increases() {
        let a = get_current_millis();
        std::thread::sleep(Duration::from_millis(2));
        let b = get_current_millis();
        assert!(b >= a);
    }
}
