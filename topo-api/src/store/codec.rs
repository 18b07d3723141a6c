use crate::command::Entry;
use crate::device::{Device, DeviceId, Revision};

use super::error::Result;

/// Serialize a device for storage. The key and version are managed by the
/// map, so `id` and `revision` in the payload are never trusted on decode.
pub(crate) fn encode(device: &Device) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(device)?)
}

/// Rebuild a device from a map entry.
pub(crate) fn decode(entry: &Entry) -> Result<Device> {
    let mut device: Device = serde_json::from_slice(&entry.value)?;
    device.id = DeviceId(entry.key.clone());
    device.revision = Revision(entry.version);
    Ok(device)
}

/// Decode an entry, skipping it with a warning when the payload is corrupt.
pub(crate) fn decode_or_skip(entry: &Entry) -> Option<Device> {
    match decode(entry) {
        Ok(device) => Some(device),
        Err(e) => {
            tracing::warn!("Skipping undecodable entry '{}': {}", entry.key, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, value: &[u8], version: u64) -> Entry {
        Entry {
            key: key.to_string(),
            value: value.to_vec(),
            version,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_decode_takes_key_and_version_from_entry() {
        let mut device = Device::new("stale-id");
        device.address = "device-foo:1234".to_string();
        device.revision = Revision(99);

        let decoded = decode(&entry("device-foo", &encode(&device).unwrap(), 7)).unwrap();
        assert_eq!(decoded.id.as_str(), "device-foo");
        assert_eq!(decoded.revision, Revision(7));
        assert_eq!(decoded.address, "device-foo:1234");
    }

    #[test]
    fn test_decode_or_skip_corrupt() {
        assert!(decode_or_skip(&entry("device-foo", b"not json", 1)).is_none());
    }
}
