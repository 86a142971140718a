use anyhow::Result;
use bluer::{Address, Session};
use tracing::{debug, info};

/// OUI prefixes of UE / Logitech hardware, for speakers renamed by their owner.
const UE_OUI_PREFIXES: &[&str] = &["88:C6:26", "38:F0:C8", "44:73:D6", "94:02:30", "C8:DB:26"];

const UE_NAME_KEYWORDS: &[&str] = &["UE", "BOOM", "MINI"];

/// A paired Bluetooth device.
#[derive(Debug, Clone)]
pub struct BluetoothDevice {
    pub name: String,
    pub address: Address,
    pub connected: bool,
}

/// List paired devices, optionally keeping only recognised speakers.
pub async fn list_paired_devices(filter_known: bool) -> Result<Vec<BluetoothDevice>> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;

    let mut result = Vec::new();
    for addr in adapter.device_addresses().await? {
        let device = adapter.device(addr)?;
        if !device.is_paired().await? {
            continue;
        }
        let name = device.name().await?.unwrap_or_default();
        if filter_known && !is_known_device(addr, &name) {
            continue;
        }
        let connected = device.is_connected().await?;

        debug!("Found speaker: {} ({}), connected={}", name, addr, connected);
        result.push(BluetoothDevice {
            name,
            address: addr,
            connected,
        });
    }

    info!("Found {} paired speakers", result.len());
    Ok(result)
}

/// A device is a speaker of this family if its name carries a UE keyword or
/// its address carries a UE/Logitech OUI.
pub fn is_known_device(address: Address, name: &str) -> bool {
    let upper = name.to_uppercase();
    if UE_NAME_KEYWORDS.iter().any(|kw| upper.contains(kw)) {
        return true;
    }
    let addr = address.to_string().to_uppercase();
    UE_OUI_PREFIXES.iter().any(|prefix| addr.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_by_name() {
        let addr = Address::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        assert!(is_known_device(addr, "UE MINI BOOM"));
        assert!(is_known_device(addr, "my boom"));
        assert!(!is_known_device(addr, "Pixel Buds"));
    }

    #[test]
    fn test_known_by_oui() {
        let addr = Address::new([0x88, 0xC6, 0x26, 0xAA, 0xBB, 0xCC]);
        assert!(is_known_device(addr, "Kitchen"));
        let logi = Address::new([0xc8, 0xdb, 0x26, 0x01, 0x02, 0x03]);
        assert!(is_known_device(logi, ""));
    }
}
