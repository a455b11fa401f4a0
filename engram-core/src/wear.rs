//! Wear tracking and diagnostics
//!
//! Wear is derived from persisted sequence numbers rather than RAM
//! counters, so it survives resets: one full plane of records costs one
//! erase cycle, so `sequence / capacity` approximates the cycles spent.
//! Crossing a threshold only raises a status flag; nothing here ever
//! blocks an operation.
//!
//! The operation counters are compiled out without the `diagnostics`
//! feature.

use crate::status::MemoryStatus;

/// Wear of a bank in percent of its rated endurance, clamped at 100.
pub fn wear_percent(last_sequence: u32, capacity: u32, endurance: u32) -> u8 {
    let cycles = (last_sequence / capacity) as u64;
    let percent = cycles * 100 / endurance as u64;
    percent.min(100) as u8
}

/// Raise the wear status flags crossed by `wear`.
pub fn apply_wear_flags(status: &mut MemoryStatus, wear: u8, warn_threshold: u8) {
    if wear >= 100 {
        status.raise(MemoryStatus::WEAR_THRS_2_ERR);
    } else if wear >= warn_threshold {
        status.raise(MemoryStatus::WEAR_THRS_1_WARN);
    }
}

/// Per-bank operation counters.
///
/// Purely observational; with the `diagnostics` feature disabled every
/// method is a no-op and the struct is zero-sized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DiagCounters {
    #[cfg(feature = "diagnostics")]
    pub load_calls: u32,
    #[cfg(feature = "diagnostics")]
    pub store_calls: u32,
    #[cfg(feature = "diagnostics")]
    pub read_attempts: u32,
    #[cfg(feature = "diagnostics")]
    pub read_ok: u32,
    #[cfg(feature = "diagnostics")]
    pub write_attempts: u32,
    #[cfg(feature = "diagnostics")]
    pub write_ok: u32,
    #[cfg(feature = "diagnostics")]
    pub erase_attempts: u32,
    #[cfg(feature = "diagnostics")]
    pub erase_ok: u32,
    #[cfg(feature = "diagnostics")]
    pub bytes_read: u32,
    #[cfg(feature = "diagnostics")]
    pub bytes_written: u32,
    #[cfg(feature = "diagnostics")]
    pub bytes_erased: u32,
    #[cfg(feature = "diagnostics")]
    pub last_sequence: u32,
    #[cfg(feature = "diagnostics")]
    pub wear_percent: u8,
}

impl DiagCounters {
    pub fn note_load_call(&mut self) {
        #[cfg(feature = "diagnostics")]
        {
            self.load_calls += 1;
        }
    }

    pub fn note_store_call(&mut self) {
        #[cfg(feature = "diagnostics")]
        {
            self.store_calls += 1;
        }
    }

    pub fn note_read_attempt(&mut self) {
        #[cfg(feature = "diagnostics")]
        {
            self.read_attempts += 1;
        }
    }

    pub fn note_read_ok(&mut self, _bytes: u32) {
        #[cfg(feature = "diagnostics")]
        {
            self.read_ok += 1;
            self.bytes_read += _bytes;
        }
    }

    pub fn note_write_attempt(&mut self) {
        #[cfg(feature = "diagnostics")]
        {
            self.write_attempts += 1;
        }
    }

    pub fn note_write_ok(&mut self, _bytes: u32) {
        #[cfg(feature = "diagnostics")]
        {
            self.write_ok += 1;
            self.bytes_written += _bytes;
        }
    }

    pub fn note_erase_attempt(&mut self) {
        #[cfg(feature = "diagnostics")]
        {
            self.erase_attempts += 1;
        }
    }

    pub fn note_erase_ok(&mut self, _bytes: u32) {
        #[cfg(feature = "diagnostics")]
        {
            self.erase_ok += 1;
            self.bytes_erased += _bytes;
        }
    }

    pub fn note_record_state(&mut self, _sequence: u32, _wear: u8) {
        #[cfg(feature = "diagnostics")]
        {
            self.last_sequence = _sequence;
            self.wear_percent = _wear;
        }
    }
}
