//! Byte-sink seam between the session and the physical link.
//!
//! The driver never opens a BLE connection itself; whoever owns the
//! transport implements [`PenLink`] and feeds inbound notification bytes to
//! the session.  Writes that fail are retried once after a short delay -
//! BLE stacks drop the occasional write during connection-parameter
//! renegotiation, and one deferred retry is enough in practice.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

/// Error type for link writes.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The link rejected or lost the write.
    #[error("link write failed: {0}")]
    WriteFailed(String),
    /// The link is gone; the session should disconnect.
    #[error("link closed")]
    Closed,
}

/// Write half of the pen link.
///
/// Implementations wrap a BLE write characteristic (or a mock in tests).
/// The inbound half is push-based: the transport owner calls
/// `PenSession::feed` with each notification.
#[async_trait]
pub trait PenLink: Send + Sync {
    /// Writes one complete frame to the pen.
    async fn write(&self, bytes: &[u8]) -> Result<(), LinkError>;
}

/// Writes a frame, retrying once after `retry_delay` if the first attempt
/// fails.  The second failure is returned to the caller.
pub async fn send_with_retry(
    link: &Arc<dyn PenLink>,
    bytes: &[u8],
    retry_delay: Duration,
) -> Result<(), LinkError> {
    match link.write(bytes).await {
        Ok(()) => Ok(()),
        Err(first) => {
            warn!(%first, delay_ms = retry_delay.as_millis() as u64, "link write failed; retrying");
            tokio::time::sleep(retry_delay).await;
            link.write(bytes).await
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records writes and fails the first `fail_first` attempts.
    pub(crate) struct FlakyLink {
        pub writes: Mutex<Vec<Vec<u8>>>,
        pub attempts: AtomicUsize,
        pub fail_first: usize,
    }

    impl FlakyLink {
        fn new(fail_first: usize) -> Self {
            Self {
                writes: Mutex::new(Vec::new()),
                attempts: AtomicUsize::new(0),
                fail_first,
            }
        }
    }

    #[async_trait]
    impl PenLink for FlakyLink {
        async fn write(&self, bytes: &[u8]) -> Result<(), LinkError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_first {
                return Err(LinkError::WriteFailed("injected".into()));
            }
            self.writes.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_send_succeeds_without_retry() {
        let link = Arc::new(FlakyLink::new(0));
        let dyn_link: Arc<dyn PenLink> = link.clone();
        send_with_retry(&dyn_link, &[1, 2, 3], Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(link.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(link.writes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_send_retries_once_after_failure() {
        let link = Arc::new(FlakyLink::new(1));
        let dyn_link: Arc<dyn PenLink> = link.clone();
        send_with_retry(&dyn_link, &[9], Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(link.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(link.writes.lock().unwrap().as_slice(), &[vec![9]]);
    }

    #[tokio::test]
    async fn test_second_failure_is_surfaced() {
        let link = Arc::new(FlakyLink::new(2));
        let dyn_link: Arc<dyn PenLink> = link.clone();
        let err = send_with_retry(&dyn_link, &[9], Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::WriteFailed(_)));
        assert_eq!(link.attempts.load(Ordering::SeqCst), 2, "exactly one retry");
    }
}
