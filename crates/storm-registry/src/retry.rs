//! Bounded retry for transient state store errors.

use std::time::Duration;

use rand::Rng;
use storm_state::StateResult;
use tracing::warn;

use crate::error::RegistryError;

const ATTEMPTS: u32 = 3;
const BASE_DELAY_MS: u64 = 10;

/// Run a store operation with bounded exponential backoff and jitter.
///
/// redb serializes writers, so a transient failure that survives three
/// attempts indicates a broken store; it surfaces as `StoreUnavailable`.
pub(crate) fn with_retries<T, F>(op_name: &str, mut op: F) -> Result<T, RegistryError>
where
    F: FnMut() -> StateResult<T>,
{
    let mut delay_ms = BASE_DELAY_MS;
    let mut last = None;
    for attempt in 1..=ATTEMPTS {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!(op = op_name, attempt, error = %e, "state store operation failed");
                last = Some(e);
                if attempt < ATTEMPTS {
                    let jitter = rand::thread_rng().gen_range(0..delay_ms);
                    std::thread::sleep(Duration::from_millis(delay_ms + jitter));
                    delay_ms *= 2;
                }
            }
        }
    }
    Err(RegistryError::StoreUnavailable(
        last.map(|e| e.to_string()).unwrap_or_default(),
    ))
}
