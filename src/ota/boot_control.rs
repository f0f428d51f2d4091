// Boot-control record: persistent metadata the external bootloader reads to
// pick the next image. The byte layout is a compatibility contract with the
// bootloader and must not change independently of it.

use anyhow::{bail, Result};
use log::info;

use crate::drivers::{FlashDriver, SystemControl};

/// Size of the record's reserved flash block (one erase sector).
pub const BOOT_CTL_BLOCK_SIZE: usize = 4096;

/// Trailer byte marking a fully programmed record. Written last, so a record
/// interrupted mid-program decodes as invalid.
pub const BOOT_CTL_SIGNATURE: u8 = 0x5A;

/// Order marker meaning "newest".
pub const ORDER_NEWEST: u8 = 0xFF;

const HEADER_LEN: usize = 12;
const _: () = assert!(HEADER_LEN <= BOOT_CTL_BLOCK_SIZE - 1);

/// Image lifecycle status. Values only ever clear bits from the erased state
/// (0xFF), so a status can be advanced in place without a sector erase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ImageStatus {
    Blank = 0xFF,
    Downloaded = 0xFE,
    Unbooted = 0xFC,
    Valid = 0xF8,
    Disabled = 0xF0,
}

impl ImageStatus {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0xFF => Some(Self::Blank),
            0xFE => Some(Self::Downloaded),
            0xFC => Some(Self::Unbooted),
            0xF8 => Some(Self::Valid),
            0xF0 => Some(Self::Disabled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ImageType {
    Production = 0x01,
    FactoryReset = 0x02,
}

impl ImageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Production),
            0x02 => Some(Self::FactoryReset),
            _ => None,
        }
    }
}

/// Header of the boot-control block.
///
/// On-storage layout: status, type, order, one reserved byte, then version
/// and boot address as little-endian u32, padding (0xFF) up to the block
/// size, and the trailer signature in the final byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootControlRecord {
    pub status: ImageStatus,
    pub image_type: ImageType,
    pub order: u8,
    pub version: u32,
    pub boot_address: u32,
}

impl BootControlRecord {
    /// Renders the record into a freshly allocated erase-sector-sized block.
    pub fn encode(&self) -> Vec<u8> {
        let mut block = vec![0xFF; BOOT_CTL_BLOCK_SIZE];
        block[0] = self.status as u8;
        block[1] = self.image_type as u8;
        block[2] = self.order;
        block[3] = 0xFF;
        block[4..8].copy_from_slice(&self.version.to_le_bytes());
        block[8..12].copy_from_slice(&self.boot_address.to_le_bytes());
        block[BOOT_CTL_BLOCK_SIZE - 1] = BOOT_CTL_SIGNATURE;
        block
    }

    pub fn decode(block: &[u8]) -> Result<Self> {
        if block.len() < BOOT_CTL_BLOCK_SIZE {
            bail!("boot-control block too short: {} bytes", block.len());
        }
        if block[BOOT_CTL_BLOCK_SIZE - 1] != BOOT_CTL_SIGNATURE {
            bail!("boot-control trailer signature missing");
        }
        let status = match ImageStatus::from_u8(block[0]) {
            Some(status) => status,
            None => bail!("unknown image status 0x{:02X}", block[0]),
        };
        let image_type = match ImageType::from_u8(block[1]) {
            Some(image_type) => image_type,
            None => bail!("unknown image type 0x{:02X}", block[1]),
        };
        let mut version = [0u8; 4];
        version.copy_from_slice(&block[4..8]);
        let mut boot_address = [0u8; 4];
        boot_address.copy_from_slice(&block[8..12]);
        Ok(Self {
            status,
            image_type,
            order: block[2],
            version: u32::from_le_bytes(version),
            boot_address: u32::from_le_bytes(boot_address),
        })
    }

    /// Reads and validates the record from its reserved flash region.
    pub fn read<F: FlashDriver>(flash: &mut F, region: u32) -> Result<Self> {
        let mut block = vec![0u8; BOOT_CTL_BLOCK_SIZE];
        flash.open()?;
        let result = flash.read(region, &mut block);
        flash.close();
        result?;
        Self::decode(&block)
    }
}

/// Commits a freshly downloaded image as the next-boot image and restarts
/// the device.
///
/// Erase-before-write plus the trailer byte keep a partial program
/// detectable: after a power loss mid-write the record decodes as invalid
/// and the bootloader stays on the image it already rotated in. This is the
/// single irreversible step in the OTA flow; after the restart the external
/// bootloader decides whether to boot the new record.
pub fn commit<F: FlashDriver, S: SystemControl>(
    flash: &mut F,
    system: &mut S,
    region: u32,
    version: u32,
    boot_address: u32,
) -> Result<()> {
    info!("OTA: updating boot control record, version {}", version);

    let record = BootControlRecord {
        status: ImageStatus::Downloaded,
        image_type: ImageType::Production,
        order: ORDER_NEWEST,
        version,
        boot_address,
    };
    let block = record.encode();

    flash.open()?;
    flash.erase(region, BOOT_CTL_BLOCK_SIZE)?;
    flash.write(region, &block)?;
    // Program/erase completion is hardware-bounded and short; this is the
    // one place the core waits for it inline.
    while flash.busy() {}
    flash.close();

    info!("OTA: boot control committed, restarting");
    system.restart();
    Ok(())
}
