use std::time::{Duration, Instant};

/// Wall-clock phase timer. `elapsed_seconds` is what gets logged per phase.
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    started: Instant,
}

impl Stopwatch {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopwatch_is_monotonic() {
        let sw = Stopwatch::start();
        let a = sw.elapsed();
        std::thread::sleep(Duration::from_millis(2));
        assert!(sw.elapsed() > a);
        assert!(sw.elapsed_seconds() >= 0.002);
    }
}
