use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

const WINDOW: Duration = Duration::from_secs(60);
const MIN_SPAN: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashRateSample {
    pub at: Instant,
    pub count: u64,
}

/// Trailing one-minute hash counter.
#[derive(Debug, Default)]
pub struct HashRateMeter {
    samples: VecDeque<HashRateSample>,
}

impl HashRateMeter {
    pub fn record(&mut self, sample: HashRateSample) {
        self.samples.push_back(sample);
    }

    fn prune(&mut self, now: Instant) {
        while let Some(first) = self.samples.front() {
            if now.saturating_duration_since(first.at) > WINDOW {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Hashes per second over the window, `None` until it spans ten seconds.
    pub fn rate(&mut self, now: Instant) -> Option<u64> {
        self.prune(now);
        let first = self.samples.front()?;
        let span = now.saturating_duration_since(first.at);
        if span < MIN_SPAN {
            return None;
        }
        let total: u64 = self.samples.iter().map(|s| s.count).sum();
        Some((total as u128 * 1000 / span.as_millis()) as u64)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_rate_before_ten_seconds() {
        let start = Instant::now();
        let mut meter = HashRateMeter::default();
        meter.record(HashRateSample { at: start, count: 0 });
        meter.record(HashRateSample { at: start + Duration::from_secs(5), count: 2000 });
        assert_eq!(meter.rate(start + Duration::from_secs(9)), None);
    }

    #[test]
    fn rate_over_the_window() {
        let start = Instant::now();
        let mut meter = HashRateMeter::default();
        for s in 0..=20 {
            meter.record(HashRateSample { at: start + Duration::from_secs(s), count: 1000 });
        }
        // 21 000 hashes over 20 s
        assert_eq!(meter.rate(start + Duration::from_secs(20)), Some(1050));
    }

    #[test]
    fn old_samples_fall_out() {
        let start = Instant::now();
        let mut meter = HashRateMeter::default();
        meter.record(HashRateSample { at: start, count: 1_000_000 });
        meter.record(HashRateSample { at: start + Duration::from_secs(70), count: 2000 });
        meter.record(HashRateSample { at: start + Duration::from_secs(85), count: 2000 });
        assert_eq!(meter.rate(start + Duration::from_secs(90)), Some(200));
    }
}
