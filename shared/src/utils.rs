use std::{future::Future, time::Duration};

use tokio::time::{sleep, Instant};
use tracing::debug;

pub const RETRY_TIMES: u32 = 5;
pub const RETRY_DELAY: u64 = 300;

pub async fn retry<T, E, F, Fut>(retry_fn: F, max_retries: u32, delay: u64) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>> + Send,
    F: Fn() -> Fut,
    E: std::fmt::Debug, {
    let mut retries = 0;
    let d = Duration::from_millis(delay);
    loop {
        match retry_fn().await {
            Ok(value) => return Ok(value),
            Err(err) if retries < max_retries => {
                retries += 1;
                debug!("attempt {retries}/{max_retries} failed: {err:?}");
                sleep(d).await;
            }
            Err(err) => {
                return Err(err);
            }
        }
    }
}

/// Length of a validated key, ignoring salt separators.
pub fn key_length(key: &str) -> u32 {
    key.chars().filter(|c| *c != '-').count() as u32
}

/// Wall clock aligned with the ledger's block timestamps.
///
/// The offset is captured once against the monotonic clock, so `now` keeps
/// moving even if the host clock is adjusted.
#[derive(Debug, Clone, Copy)]
pub struct SyncedClock {
    anchor: Instant,
    anchor_secs: i64,
}

impl SyncedClock {
    /// Starts from the host clock until `sync` is called.
    pub fn new() -> Self {
        Self {
            anchor: Instant::now(),
            anchor_secs: chrono::Utc::now().timestamp(),
        }
    }

    /// Starts from an explicit chain time.
    pub fn at(chain_secs: i64) -> Self {
        Self {
            anchor: Instant::now(),
            anchor_secs: chain_secs,
        }
    }

    pub fn sync(&mut self, chain_secs: i64) {
        let delta = chain_secs - self.now();
        debug!("chain clock delta: {delta}s");
        *self = Self::at(chain_secs);
    }

    pub fn now(&self) -> i64 {
        self.anchor_secs + self.anchor.elapsed().as_secs() as i64
    }
}

impl Default for SyncedClock {
    fn default() -> Self {
        Self::new()
    }
}

pub fn format_duration(seconds: u64) -> String {
    let minutes = seconds / 60;
    let remaining_seconds = seconds % 60;
    format!("{:02}:{:02}", minutes, remaining_seconds)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn key_length_skips_dashes() {
        assert_eq!(key_length("00ab12cd"), 8);
        assert_eq!(key_length("00ab12cd-1f"), 10);
        assert_eq!(key_length(""), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn synced_clock_follows_monotonic_time() {
        let mut clock = SyncedClock::new();
        clock.sync(1_000);
        assert_eq!(clock.now(), 1_000);
        tokio::time::advance(Duration::from_secs(90)).await;
        assert_eq!(clock.now(), 1_090);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let res: Result<(), &str> = retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("down") }
            },
            3,
            10,
        )
        .await;
        assert_eq!(res, Err("down"));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn duration_is_minutes_and_seconds() {
        assert_eq!(format_duration(75), "01:15");
    }
}
