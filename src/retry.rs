use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::error::Result;

pub const MAX_ATTEMPTS: u32 = 3;
pub const INITIAL_DELAY: Duration = Duration::from_secs(1);

/// Fixed-count retry with doubling delay, shared by every remote client.
///
/// A failed attempt is logged and followed by a sleep before the next one,
/// including after the last attempt, so a call that never succeeds blocks for
/// `1 + 2 + 4` seconds with the default policy. No state survives between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(MAX_ATTEMPTS, INITIAL_DELAY)
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `op` until it succeeds or the attempt budget is spent.
    ///
    /// Returns `None` once every attempt has failed; the individual errors are
    /// only visible in the `event` log records.
    pub fn run<F, T>(&self, event: &'static str, resource_uri: &str, mut op: F) -> Option<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut delay = self.initial_delay;

        for attempt in 1..=self.max_attempts {
            match op() {
                Ok(val) => return Some(val),
                Err(e) => {
                    warn!(
                        event,
                        resource_uri,
                        error = %e,
                        retry = %attempt,
                        delay_ms = delay.as_millis() as u64,
                        "remote call failed"
                    );
                    thread::sleep(delay);
                    delay *= 2;
                }
            }
        }

        None
    }
}
