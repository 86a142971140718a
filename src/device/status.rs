use anyhow::Result;
use async_trait::async_trait;
use bluer::{Address, Session};
use tracing::debug;

use crate::pairing::{ProbeSignal, StatusProbe};

/// Connection and battery state as reported by BlueZ.
#[derive(Debug, Clone, Default)]
pub struct SpeakerStatus {
    pub name: Option<String>,
    /// Only set when it differs from `name`.
    pub alias: Option<String>,
    pub paired: bool,
    pub connected: bool,
    pub battery: Option<u8>,
    pub modalias: Option<String>,
}

/// Read the speaker's status from BlueZ.
pub async fn read_status(address: Address) -> Result<SpeakerStatus> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    let device = adapter.device(address)?;

    let name = device.name().await?;
    let alias = device.alias().await.ok().filter(|a| Some(a) != name.as_ref());
    // Battery1 is only exported while connected
    let battery = device.battery_percentage().await.ok().flatten();
    let modalias = device
        .modalias()
        .await
        .ok()
        .flatten()
        .map(|m| format!("{:?}", m));

    Ok(SpeakerStatus {
        name,
        alias,
        paired: device.is_paired().await?,
        connected: device.is_connected().await?,
        battery,
        modalias,
    })
}

/// Battery percentage, or `None` if BlueZ does not know it.
pub async fn read_battery(address: Address) -> Result<Option<u8>> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    Ok(adapter.device(address)?.battery_percentage().await?)
}

/// Pairing probe backed by BlueZ.
///
/// BlueZ cannot see the speaker-to-speaker link, so this never reports
/// `Linked`; it only records that the primary speaker is still reachable.
pub struct BluezProbe {
    address: Address,
}

impl BluezProbe {
    pub fn new(address: Address) -> Self {
        Self { address }
    }
}

#[async_trait]
impl StatusProbe for BluezProbe {
    async fn probe(&self) -> Result<ProbeSignal> {
        let status = read_status(self.address).await?;
        debug!(
            "Probe: {} connected={} battery={:?}",
            self.address, status.connected, status.battery
        );
        Ok(ProbeSignal::NoSignal)
    }
}
