//! Bank configuration
//!
//! A bank is a contiguous, independently erasable stretch of flash
//! holding one rotating log of records. Its geometry is fixed at
//! configuration time and validated up front; none of the checks here
//! ever run on a hot path.
//!
//! The region is split into two equal planes. Records append into the
//! active plane; when it fills up, the live image is compacted into the
//! (erased) other plane. This is why a bank must hold an even number of
//! records.

use crate::checksum::ChecksumWidth;
use crate::record::{RecordLayout, MAX_RECORD_LEN};

/// Maximum number of banks one facade instance multiplexes over.
pub const MAX_BANKS: usize = 4;

/// Default wear-warning threshold in percent.
pub const WEAR_WARN_DEFAULT: u8 = 80;

/// Rejected configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// End address does not lie beyond the start address
    EmptyRegion,
    /// Payload size of zero stores nothing
    ZeroPayload,
    /// Record (header + payload) exceeds [`MAX_RECORD_LEN`]
    RecordTooLarge,
    /// Region size is not an exact multiple of the record size
    RegionNotMultiple,
    /// Region must hold an even number of records, at least two
    OddCapacity,
    /// Erase endurance rating must be positive
    ZeroEndurance,
    /// Bank count outside 1..=[`MAX_BANKS`]
    BankCount,
    /// Wear-warning threshold outside 1..=99
    WearThreshold,
    /// Region or plane boundary not aligned to the flash erase unit
    Misaligned,
    /// 0xFFFF is the erased pattern and cannot name a variable
    ProhibitedVirtualAddress,
    /// Page size is not a positive multiple of one entry
    PageGeometry,
}

/// Which half of a bank's region a record lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Plane {
    A,
    B,
}

impl Plane {
    /// The other plane of the pair.
    pub const fn other(self) -> Self {
        match self {
            Plane::A => Plane::B,
            Plane::B => Plane::A,
        }
    }
}

/// Static geometry of one bank.
///
/// Addresses are absolute byte offsets into the flash device; `end` is
/// exclusive, so the bank occupies `start..end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BankConfig {
    start: u32,
    end: u32,
    payload_len: u16,
    checksum_width: ChecksumWidth,
    endurance: u32,
}

impl BankConfig {
    /// Validate and build a bank geometry.
    pub fn new(
        start: u32,
        end: u32,
        payload_len: u16,
        checksum_width: ChecksumWidth,
        endurance: u32,
    ) -> Result<Self, ConfigError> {
        if end <= start {
            return Err(ConfigError::EmptyRegion);
        }
        if payload_len == 0 {
            return Err(ConfigError::ZeroPayload);
        }
        let layout = RecordLayout::new(checksum_width, payload_len as usize);
        if layout.record_len() > MAX_RECORD_LEN {
            return Err(ConfigError::RecordTooLarge);
        }
        let region_len = end - start;
        let record_len = layout.record_len() as u32;
        if region_len % record_len != 0 {
            return Err(ConfigError::RegionNotMultiple);
        }
        let slots = region_len / record_len;
        if slots < 2 || slots % 2 != 0 {
            return Err(ConfigError::OddCapacity);
        }
        if endurance == 0 {
            return Err(ConfigError::ZeroEndurance);
        }
        Ok(Self {
            start,
            end,
            payload_len,
            checksum_width,
            endurance,
        })
    }

    pub const fn start(&self) -> u32 {
        self.start
    }

    /// Exclusive end of the region.
    pub const fn end(&self) -> u32 {
        self.end
    }

    pub const fn payload_len(&self) -> usize {
        self.payload_len as usize
    }

    pub const fn checksum_width(&self) -> ChecksumWidth {
        self.checksum_width
    }

    /// Rated erase cycles before the region degrades.
    pub const fn endurance(&self) -> u32 {
        self.endurance
    }

    /// The record geometry shared by writer and scanner.
    pub const fn layout(&self) -> RecordLayout {
        RecordLayout::new(self.checksum_width, self.payload_len as usize)
    }

    pub const fn record_len(&self) -> u32 {
        self.layout().record_len() as u32
    }

    pub const fn region_len(&self) -> u32 {
        self.end - self.start
    }

    /// Records per plane.
    pub const fn capacity(&self) -> u32 {
        self.region_len() / self.record_len() / 2
    }

    pub const fn plane_len(&self) -> u32 {
        self.region_len() / 2
    }

    pub const fn plane_base(&self, plane: Plane) -> u32 {
        match plane {
            Plane::A => self.start,
            Plane::B => self.start + self.plane_len(),
        }
    }

    /// One past the last byte of `plane`.
    pub const fn plane_end(&self, plane: Plane) -> u32 {
        self.plane_base(plane) + self.plane_len()
    }

    /// Which plane an address inside the region belongs to.
    pub const fn plane_of(&self, address: u32) -> Plane {
        if address < self.start + self.plane_len() {
            Plane::A
        } else {
            Plane::B
        }
    }

    /// Check that compaction-time erases can hit plane boundaries
    /// exactly on this device.
    pub fn check_alignment(&self, erase_granularity: u32) -> Result<(), ConfigError> {
        if self.start % erase_granularity != 0 || self.plane_len() % erase_granularity != 0 {
            return Err(ConfigError::Misaligned);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_exact_two_plane_region() {
        // record = 2 + 4 + 4 + 6 = 16 bytes; 128-byte region = 8 slots
        let cfg = BankConfig::new(0, 128, 6, ChecksumWidth::U16, 100).unwrap();
        assert_eq!(cfg.record_len(), 16);
        assert_eq!(cfg.capacity(), 4);
        assert_eq!(cfg.plane_len(), 64);
        assert_eq!(cfg.plane_base(Plane::B), 64);
        assert_eq!(cfg.plane_of(63), Plane::A);
        assert_eq!(cfg.plane_of(64), Plane::B);
    }

    #[test]
    fn rejects_empty_region() {
        assert_eq!(
            BankConfig::new(64, 64, 6, ChecksumWidth::U16, 100),
            Err(ConfigError::EmptyRegion)
        );
    }

    #[test]
    fn rejects_non_multiple_region() {
        assert_eq!(
            BankConfig::new(0, 100, 6, ChecksumWidth::U16, 100),
            Err(ConfigError::RegionNotMultiple)
        );
    }

    #[test]
    fn rejects_odd_slot_count() {
        // 48-byte region holds exactly 3 records: no twin plane possible
        assert_eq!(
            BankConfig::new(0, 48, 6, ChecksumWidth::U16, 100),
            Err(ConfigError::OddCapacity)
        );
    }

    #[test]
    fn rejects_oversized_record() {
        assert_eq!(
            BankConfig::new(0, 4096, 500, ChecksumWidth::U32, 100),
            Err(ConfigError::RecordTooLarge)
        );
    }

    #[test]
    fn rejects_zero_endurance() {
        assert_eq!(
            BankConfig::new(0, 128, 6, ChecksumWidth::U16, 0),
            Err(ConfigError::ZeroEndurance)
        );
    }

    #[test]
    fn alignment_check_against_erase_unit() {
        let cfg = BankConfig::new(0, 128, 6, ChecksumWidth::U16, 100).unwrap();
        assert!(cfg.check_alignment(64).is_ok());
        assert_eq!(cfg.check_alignment(128), Err(ConfigError::Misaligned));
    }
}
