use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use bluer::gatt::remote::Characteristic;
use bluer::{Address, Session};
use tracing::{debug, info};
use uuid::{uuid, Uuid};

/// Primary GATT service of the speaker.
pub const SERVICE_UUID: Uuid = uuid!("000061fe-0000-1000-8000-00805f9b34fb");

/// Named BLE characteristics. These are plain reads/writes outside LWACP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Attribute {
    Battery,
    Name,
    Firmware,
    Serial,
    Color,
    Alarm,
    Power,
}

impl Attribute {
    pub fn uuid(self) -> Uuid {
        match self {
            Attribute::Battery => uuid!("00002a19-0000-1000-8000-00805f9b34fb"),
            Attribute::Name => uuid!("00002a00-0000-1000-8000-00805f9b34fb"),
            Attribute::Firmware => uuid!("00002a28-0000-1000-8000-00805f9b34fb"),
            Attribute::Serial => uuid!("00002a25-0000-1000-8000-00805f9b34fb"),
            Attribute::Color => uuid!("54f7f292-7ebb-4267-83c2-8e6ee7e881ff"),
            Attribute::Alarm => uuid!("16e005bb-3862-43c7-8f5c-6f654a4ffdd2"),
            Attribute::Power => uuid!("c6d6dc0d-07f5-47ef-9b59-630622b01fd3"),
        }
    }

    /// Whether the value is text rather than raw bytes.
    pub fn is_text(self) -> bool {
        matches!(self, Attribute::Name | Attribute::Firmware | Attribute::Serial)
    }
}

async fn find_characteristic(address: Address, attribute: Attribute) -> Result<Characteristic> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    let device = adapter.device(address)?;
    if !device.is_connected().await? {
        info!("Connecting to {} for GATT access", address);
        device.connect().await.context("BLE connect")?;
    }
    for _ in 0..20 {
        if device.is_services_resolved().await? {
            break;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    let wanted = attribute.uuid();
    for service in device.services().await? {
        for characteristic in service.characteristics().await? {
            if characteristic.uuid().await? == wanted {
                let origin = if service.uuid().await? == SERVICE_UUID {
                    "speaker"
                } else {
                    "standard"
                };
                debug!("Found {:?} in {} service", attribute, origin);
                return Ok(characteristic);
            }
        }
    }
    Err(anyhow!("characteristic {:?} ({}) not found on {}", attribute, wanted, address))
}

pub async fn read_attribute(address: Address, attribute: Attribute) -> Result<Vec<u8>> {
    let characteristic = find_characteristic(address, attribute).await?;
    let value = characteristic.read().await?;
    debug!("GATT read {:?}: {} bytes", attribute, value.len());
    Ok(value)
}

pub async fn write_attribute(address: Address, attribute: Attribute, value: &[u8]) -> Result<()> {
    let characteristic = find_characteristic(address, attribute).await?;
    characteristic.write(value).await?;
    info!("GATT write {:?}: {} bytes", attribute, value.len());
    Ok(())
}

/// Render a characteristic value for display.
pub fn format_value(attribute: Attribute, value: &[u8]) -> String {
    match attribute {
        Attribute::Battery if value.len() == 1 => format!("{}%", value[0]),
        a if a.is_text() => String::from_utf8_lossy(value).trim_end_matches('\0').to_string(),
        _ => crate::protocol::frame::hex::spaced(value),
    }
}
