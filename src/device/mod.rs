pub mod status;

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::bluetooth::transport::Transport;
use crate::error::Result;
use crate::protocol::commands::Operation;
use crate::protocol::frame::{find_value, hex};
use crate::protocol::{CommandRegistry, LwacpFrame};

/// A connected speaker: validated frames go out through one transport.
pub struct Speaker<T> {
    registry: CommandRegistry,
    transport: T,
    response_timeout: Duration,
}

impl<T: Transport> Speaker<T> {
    pub fn new(transport: T, registry: CommandRegistry, response_timeout: Duration) -> Self {
        Self {
            registry,
            transport,
            response_timeout,
        }
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    #[cfg(test)]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send one frame, then log whatever the speaker answers within the
    /// response timeout. A missing answer is normal.
    pub async fn send(&mut self, frame: &LwacpFrame) -> Result<()> {
        info!("Sending {}", frame);
        self.transport.send(&frame.to_bytes()).await?;

        if self.response_timeout.is_zero() {
            return Ok(());
        }
        match self.transport.receive(self.response_timeout).await {
            Ok(Some(resp)) => debug!("Response to {:02X}: {}", frame.command_id(), hex::spaced(&resp)),
            Ok(None) => debug!("No response to {:02X}", frame.command_id()),
            Err(e) => warn!("Read-back after {:02X} failed: {}", frame.command_id(), e),
        }
        Ok(())
    }

    /// Read the current value of a query-capable setting.
    ///
    /// Returns `Ok(None)` if the speaker does not answer in time.
    pub async fn query(&mut self, operation: Operation) -> Result<Option<u8>> {
        let frame = self.registry.query(operation)?;
        let command_id = frame.command_id();
        self.transport.send(&frame.to_bytes()).await?;

        let deadline = Instant::now() + self.response_timeout * 2;
        let mut collected = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.transport.receive(remaining).await {
                Ok(Some(chunk)) => {
                    collected.extend_from_slice(&chunk);
                    if let Some(value) = find_value(&collected, command_id) {
                        debug!("Query {:02X} = {}", command_id, value);
                        return Ok(Some(value));
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Query {:02X} read failed: {}", command_id, e);
                    break;
                }
            }
        }
        debug!("Query {:02X} got no value", command_id);
        Ok(None)
    }
}
