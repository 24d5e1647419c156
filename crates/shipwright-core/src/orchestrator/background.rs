use crate::error::Result;
use std::future::Future;
use tracing::{debug, warn};

/// Run a best-effort task detached from the cycle. A supervisor awaits it
/// and logs failures and panics; nothing propagates back to the caller.
pub fn spawn_best_effort<F>(name: &'static str, fut: F)
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    let handle = tokio::spawn(fut);
    tokio::spawn(async move {
        match handle.await {
            Ok(Ok(())) => debug!(task = name, "background task finished"),
            Ok(Err(e)) => warn!(task = name, error = %e, "background task failed"),
            Err(e) if e.is_panic() => warn!(task = name, "background task panicked"),
            Err(e) => warn!(task = name, error = %e, "background task cancelled"),
        }
    });
}
