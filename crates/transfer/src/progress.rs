use std::sync::Mutex;
use std::time::{Duration, Instant};

struct SpeedSample {
    bytes: u64,
    timestamp: Instant,
}

/// Transfer speed over a sliding window of completed-chunk samples.
pub struct SpeedCalculator {
    inner: Mutex<SpeedInner>,
}

struct SpeedInner {
    samples: Vec<SpeedSample>,
    max_samples: usize,
    window_size: Duration,
}

impl SpeedCalculator {
    /// Creates a calculator.
    ///
    /// - `window_size`: time window for the speed estimate (default 5 s).
    /// - `max_samples`: maximum retained samples (default 100).
    pub fn new(window_size: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(SpeedInner {
                samples: Vec::new(),
                max_samples: max_samples.unwrap_or(100),
                window_size: window_size.unwrap_or(Duration::from_secs(5)),
            }),
        }
    }

    /// Records `bytes` transferred at the current instant.
    pub fn record(&self, bytes: u64) {
        let mut s = self.inner.lock().unwrap();
        let now = Instant::now();
        s.samples.push(SpeedSample {
            bytes,
            timestamp: now,
        });

        // Prune samples outside the window.
        let window = s.window_size;
        s.samples
            .retain(|sample| now.duration_since(sample.timestamp) <= window);

        if s.samples.len() > s.max_samples {
            let excess = s.samples.len() - s.max_samples;
            s.samples.drain(..excess);
        }
    }

    /// Average speed in bytes/second within the window.
    ///
    /// Returns 0.0 with fewer than two samples.
    pub fn bytes_per_second(&self) -> f64 {
        let s = self.inner.lock().unwrap();
        if s.samples.len() < 2 {
            return 0.0;
        }

        let first = &s.samples[0];
        let last = &s.samples[s.samples.len() - 1];
        let elapsed = last.timestamp.duration_since(first.timestamp);
        if elapsed.is_zero() {
            return 0.0;
        }

        let total_bytes: u64 = s.samples.iter().map(|sample| sample.bytes).sum();
        total_bytes as f64 / elapsed.as_secs_f64()
    }

    /// Estimated time to move `remaining_bytes` at the current speed.
    ///
    /// Returns `None` while the speed is unknown.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }

    /// Clears all recorded samples; a fresh run starts with a fresh window.
    pub fn reset(&self) {
        let mut s = self.inner.lock().unwrap();
        s.samples.clear();
    }
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_samples_means_no_estimate() {
        let calc = SpeedCalculator::new(None, None);
        assert_eq!(calc.bytes_per_second(), 0.0);
        assert!(calc.eta(1000).is_none());
    }

    #[test]
    fn single_sample_is_not_enough() {
        let calc = SpeedCalculator::new(None, None);
        calc.record(100);
        assert_eq!(calc.bytes_per_second(), 0.0);
    }

    #[test]
    fn multiple_samples_yield_a_positive_speed() {
        let calc = SpeedCalculator::new(Some(Duration::from_secs(10)), None);
        calc.record(500);
        std::thread::sleep(Duration::from_millis(50));
        calc.record(500);
        assert!(calc.bytes_per_second() > 0.0);
    }

    #[test]
    fn eta_scales_with_remaining_bytes() {
        let calc = SpeedCalculator::new(Some(Duration::from_secs(10)), None);
        calc.record(500);
        std::thread::sleep(Duration::from_millis(50));
        calc.record(500);

        let near = calc.eta(1_000).unwrap();
        let far = calc.eta(100_000).unwrap();
        assert!(far > near);
    }

    #[test]
    fn reset_clears_the_window() {
        let calc = SpeedCalculator::new(None, None);
        calc.record(100);
        calc.record(200);
        calc.reset();
        assert_eq!(calc.bytes_per_second(), 0.0);
    }

    #[test]
    fn sample_count_is_bounded() {
        let calc = SpeedCalculator::new(Some(Duration::from_secs(60)), Some(5));
        for i in 0..20 {
            calc.record(i * 10);
        }
        let s = calc.inner.lock().unwrap();
        assert!(s.samples.len() <= 5);
    }

    #[test]
    fn concurrent_recording_does_not_deadlock() {
        use std::sync::Arc;
        use std::thread;

        let calc = Arc::new(SpeedCalculator::new(None, None));
        let mut handles = vec![];
        for _ in 0..10 {
            let c = Arc::clone(&calc);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    c.record(1);
                    let _ = c.bytes_per_second();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let _ = calc.bytes_per_second();
    }
}
