//! Cooperative cancellation for in-flight generations

use std::future::Future;

pub use tokio_util::sync::CancellationToken;

use crate::error::{AgentError, Result};

/// Race `fut` against `cancel`
///
/// If the token fires first the future is dropped, which aborts any HTTP
/// request it owns, and `AgentError::Cancelled` is returned.
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(AgentError::Cancelled);
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AgentError::Cancelled),
        result = fut => result,
    }
}
