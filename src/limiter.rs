// src/limiter.rs

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RateParseError {
    #[error("empty rate limit")]
    Empty,
    #[error("invalid rate limit {0:?}, expected e.g. 500kB, 10MiB or 1048576")]
    Invalid(String),
}

/// A token bucket for rate limiting, shared by every chunk of a transfer.
#[derive(Clone)]
pub struct SpeedLimiter {
    state: Arc<Mutex<TokenBucket>>,
}

/// The internal state of the token bucket.
struct TokenBucket {
    /// The maximum number of tokens (bytes) the bucket can hold. This controls burstiness.
    capacity: u64,
    /// The current number of tokens (bytes) in the bucket.
    tokens: u64,
    /// Tokens added per second. 0 disables limiting.
    rate: u64,
    last_refill: Instant,
}

impl SpeedLimiter {
    /// Creates a new speed limiter.
    /// A rate of 0 means the limiter is disabled (unlimited speed).
    pub fn new(rate_bytes_per_sec: u64) -> Self {
        let capacity = capacity_for(rate_bytes_per_sec);
        Self {
            state: Arc::new(Mutex::new(TokenBucket {
                capacity,
                tokens: capacity,
                rate: rate_bytes_per_sec,
                last_refill: Instant::now(),
            })),
        }
    }

    /// Waits until `amount` bytes may pass.
    ///
    /// Amounts above the bucket capacity are taken in capacity-sized slices,
    /// otherwise they could never be satisfied.
    pub async fn take(&self, amount: u64) {
        let mut left = amount;
        while left > 0 {
            let slice = {
                let bucket = self.state.lock().await;
                left.min(bucket.capacity)
            };
            self.take_slice(slice).await;
            left -= slice;
        }
    }

    async fn take_slice(&self, amount: u64) {
        loop {
            let mut bucket = self.state.lock().await;
            bucket.refill();

            if bucket.tokens >= amount {
                bucket.tokens -= amount;
                return;
            }

            let tokens_needed = amount - bucket.tokens;
            let wait_time = if bucket.rate > 0 {
                Duration::from_secs_f64(tokens_needed as f64 / bucket.rate as f64)
            } else {
                Duration::from_secs(0)
            };

            // Never sleep while holding the lock.
            drop(bucket);
            tokio::time::sleep(wait_time).await;
        }
    }
}

impl TokenBucket {
    /// Adds tokens to the bucket based on elapsed time.
    fn refill(&mut self) {
        if self.rate == 0 {
            self.tokens = self.capacity;
            return;
        }

        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill);
        let tokens_to_add = (elapsed.as_secs_f64() * self.rate as f64) as u64;

        if tokens_to_add > 0 {
            self.tokens = self.tokens.saturating_add(tokens_to_add).min(self.capacity);
            self.last_refill = now;
        }
    }
}

fn capacity_for(rate: u64) -> u64 {
    if rate == 0 {
        u64::MAX
    } else {
        rate
    }
}

/// Parses a bandwidth limit such as `10kB`, `10KiB`, `5MB`, `1MiB`, `2G`
/// or a plain byte count into bytes per second.
pub fn parse_rate(input: &str) -> Result<u64, RateParseError> {
    let text = input.trim();
    if text.is_empty() {
        return Err(RateParseError::Empty);
    }

    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| RateParseError::Invalid(input.to_string()))?;

    let unit = unit.trim().trim_end_matches("/s");
    let multiplier: u64 = match unit.to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" => 1_000,
        "kib" => 1 << 10,
        "m" | "mb" => 1_000_000,
        "mib" => 1 << 20,
        "g" | "gb" => 1_000_000_000,
        "gib" => 1 << 30,
        _ => return Err(RateParseError::Invalid(input.to_string())),
    };

    Ok((value * multiplier as f64) as u64)
}
