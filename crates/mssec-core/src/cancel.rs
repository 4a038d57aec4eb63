//! Cancellation of in-flight I/O

use std::future::Future;

pub use tokio_util::sync::CancellationToken;

use crate::{MssecError, Result};

/// Drive `fut` to completion unless `cancel` fires first.
///
/// When the token wins, `fut` is dropped and `MssecError::Cancelled` is
/// returned. Drivers are expected to discard any connection whose request
/// was abandoned this way.
pub async fn cancellable<F, T>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(MssecError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(MssecError::Cancelled),
        result = fut => result,
    }
}
