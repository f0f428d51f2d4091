use serde::{Deserialize, Serialize};

/// OTA subsystem configuration.
///
/// Carried by the orchestrator for the life of the device; the boot address
/// and boot-control region are part of the compatibility contract with the
/// external bootloader.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OtaConfig {
    /// Reject plaintext (non-https) download URLs.
    pub enforce_tls: bool,

    /// Reject `start()` when the ledger drive is under storage pressure.
    pub check_free_sectors: bool,
    /// Free-sector floor for the storage-pressure check.
    pub min_free_sectors: u32,

    /// Require and verify an image signature alongside the digest.
    pub signature_verification: bool,

    /// Entry point programmed into a committed boot-control record.
    pub boot_address: u32,
    /// Flash offset of the boot-control record's reserved sector.
    pub boot_ctl_region: u32,

    /// Ledger directory holding downloaded images.
    pub image_dir: String,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            enforce_tls: false,
            check_free_sectors: false,
            min_free_sectors: 10,
            signature_verification: false,
            boot_address: 0xB002_1000,
            boot_ctl_region: 0,
            image_dir: "ota".to_string(),
        }
    }
}

pub fn load_or_default(bytes: &[u8]) -> OtaConfig {
    match serde_json::from_slice(bytes) {
        Ok(config) => {
            log::info!("Loaded OTA configuration");
            config
        }
        Err(e) => {
            log::warn!("Failed to parse OTA config: {:?}, using defaults", e);
            OtaConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_serialization() {
        let config = OtaConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: OtaConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_load_falls_back_to_defaults() {
        let config = load_or_default(b"not json");
        assert_eq!(config, OtaConfig::default());
    }

    #[test]
    fn test_defaults() {
        let config = OtaConfig::default();
        assert!(!config.enforce_tls);
        assert_eq!(config.min_free_sectors, 10);
        assert_eq!(config.boot_address, 0xB002_1000);
    }
}
