use std::thread;
use std::time::Duration;

use crate::{INDEX_RETRY_DELAY_MS, INDEX_RETRY_LIMIT};

/// Outcome of a write that may lose a race for the file guard. `Busy` is
/// the only retryable signal; `Failed` is definitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Done,
    Busy,
    Failed,
}

/// Run an operation until it reports `Done`, retrying `Busy` results up
/// to the configured attempt limit with a fixed delay between attempts.
/// `Failed` stops immediately. Exhausting the attempts is logged and
/// surfaced as plain failure; the caller cannot tell the cases apart.
pub fn run_with_retry<F>(operation: &str, mut attempt_op: F) -> bool
where
    F: FnMut() -> WriteOutcome,
{
    let mut attempts = 0;
    while attempts < INDEX_RETRY_LIMIT {
        match attempt_op() {
            WriteOutcome::Done => return true,
            WriteOutcome::Failed => break,
            WriteOutcome::Busy => {
                attempts += 1;
                thread::sleep(Duration::from_millis(INDEX_RETRY_DELAY_MS));
            }
        }
    }

    log::error!("Failed to run operation: {}", operation);
    false
}
