pub mod connection;
pub mod gatt;
pub mod scanner;
pub mod transport;

use std::time::Duration;

use anyhow::{Context, Result};
use bluer::Address;
use tracing::info;

use crate::device::Speaker;
use crate::protocol::CommandRegistry;
use connection::RfcommConnection;

/// Connection parameters resolved once at startup.
#[derive(Debug, Clone, Copy)]
pub struct LinkSettings {
    pub rfcomm_channel: Option<u8>,
    pub send_timeout: Duration,
    pub response_timeout: Duration,
}

/// Open the LWACP control channel to `address`.
pub async fn open_speaker(
    address: Address,
    settings: LinkSettings,
) -> Result<Speaker<RfcommConnection>> {
    let channel = connection::resolve_channel(address, settings.rfcomm_channel).await;
    let conn = RfcommConnection::connect(address, channel, settings.send_timeout)
        .await
        .with_context(|| format!("opening LWACP channel to {}", address))?;

    // Settle time before the first frame
    tokio::time::sleep(Duration::from_millis(300)).await;
    info!("LWACP channel to {} ready", address);

    Ok(Speaker::new(
        conn,
        CommandRegistry::default(),
        settings.response_timeout,
    ))
}
