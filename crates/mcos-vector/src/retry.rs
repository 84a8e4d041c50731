//! Exponential backoff for `VectorStore` calls (spec §4.4 "Resilience").
//!
//! Schedule: base 500 ms, factor 2, cap 4 s, max 5 attempts — the same
//! doubling-with-jitter shape as the teacher's channel-reconnect backoff
//! (`skynet-channels::manager::connect_with_backoff`), generalized here to
//! return a typed `Result<T>` instead of logging-and-skipping, since a
//! terminal vector-store failure must propagate to the caller (spec §4.4:
//! "terminal failures are surfaced to the caller").

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{Result, VectorError};

const BASE_DELAY_MS: u64 = 500;
const MAX_DELAY_MS: u64 = 4_000;
const MAX_ATTEMPTS: u32 = 5;
/// Jitter is up to 10% of the current delay, mirroring the teacher's `JITTER_FRACTION`.
const JITTER_FRACTION: f64 = 0.1;

/// Retry `op` with exponential backoff. Only [`McosError::is_retryable`]
/// failures are retried; anything else (e.g. invalid input folded in from a
/// collaborator) returns immediately on the first attempt.
pub async fn with_backoff<T, F, Fut>(op_name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay_ms = BASE_DELAY_MS;

    for attempt in 1..=MAX_ATTEMPTS {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                let retryable = matches!(e, VectorError::Transient(_));
                if !retryable || attempt == MAX_ATTEMPTS {
                    if attempt == MAX_ATTEMPTS && retryable {
                        return Err(VectorError::Terminal {
                            attempts: attempt,
                            reason: e.to_string(),
                        });
                    }
                    return Err(e);
                }
                let jitter_ms = jitter_ms(delay_ms);
                let total = delay_ms + jitter_ms;
                warn!(
                    op = op_name,
                    attempt,
                    max = MAX_ATTEMPTS,
                    error = %e,
                    retry_after_ms = total,
                    "vector store call failed, retrying with backoff"
                );
                tokio::time::sleep(Duration::from_millis(total)).await;
                delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
            }
        }
    }
    unreachable!("backoff loop exited without returning")
}

fn jitter_ms(base_ms: u64) -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let max_jitter = ((base_ms as f64) * JITTER_FRACTION) as u64;
    if max_jitter == 0 {
        return 0;
    }
    (nanos as u64) % max_jitter
}
