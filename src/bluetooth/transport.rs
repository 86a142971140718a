use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransportError;

/// Duplex byte channel to an already connected speaker.
///
/// Connection setup and reconnection belong to the implementor. Sends are
/// fire-and-forget: LWACP has no acknowledgement frame for writes.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Best-effort read of whatever arrives within `deadline`.
    ///
    /// `Ok(None)` means nothing arrived in time, which is normal.
    async fn receive(&mut self, _deadline: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        Ok(None)
    }
}
