//! Timeout wrapper for long-running native calls
//!
//! ASR and diarization go through native runners that can wedge. Every
//! such call is wrapped here: the closure runs on its own thread and the
//! caller waits with a deadline. Cancellation of the native side is
//! best-effort only — on timeout the thread may still complete, and its
//! result is then discarded with the channel.

use anyhow::Result;
use std::sync::mpsc;
use std::time::Duration;

/// Run `f` with a deadline.
///
/// Returns `Err` when the deadline passes; the underlying computation is
/// left to finish on its detached thread.
pub fn run_with_timeout<T, F>(label: &str, timeout: Duration, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);

    std::thread::Builder::new()
        .name(format!("timeout-{}", label))
        .spawn(move || {
            let result = f();
            let _ = tx.send(result);
        })?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => {
            tracing::warn!("{}: timed out after {:?}", label, timeout);
            anyhow::bail!("{} timed out after {:?}", label, timeout)
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            anyhow::bail!("{} worker thread died", label)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_call_returns_result() {
        let result = run_with_timeout("fast", Duration::from_secs(1), || Ok(42));
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn test_slow_call_times_out() {
        let result = run_with_timeout("slow", Duration::from_millis(50), || {
            std::thread::sleep(Duration::from_millis(500));
            Ok(1)
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_error_propagates() {
        let result: Result<i32> = run_with_timeout("failing", Duration::from_secs(1), || {
            anyhow::bail!("native failure")
        });
        assert!(result.unwrap_err().to_string().contains("native failure"));
    }
}
