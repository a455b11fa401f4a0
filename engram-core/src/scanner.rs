//! Bank scanner
//!
//! Rebuilds a bank's runtime parameters from flash content alone: the
//! newest valid record and the next free slot. Runs at init and after
//! every compaction; it is the only source of truth after a power loss,
//! which is what makes torn writes recoverable.

use engram_hal::{FlashAccess, FlashError};

use crate::config::BankConfig;
use crate::record::MAX_RECORD_LEN;

/// Address and sequence number of the newest valid record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LastValid {
    pub address: u32,
    pub sequence: u32,
}

/// Result of scanning one bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScanReport {
    /// Newest valid record, if the bank holds any
    pub last_valid: Option<LastValid>,
    /// First free slot in the active plane; `None` means the plane is
    /// full and the next store must compact
    pub next_write: Option<u32>,
}

/// Slot address after `address`, wrapping at the bank margins.
pub fn next_record_addr(cfg: &BankConfig, address: u32) -> u32 {
    let next = address + cfg.record_len();
    if next >= cfg.end() {
        cfg.start()
    } else {
        next
    }
}

/// Slot address before `address`, wrapping at the bank margins.
pub fn prev_record_addr(cfg: &BankConfig, address: u32) -> u32 {
    if address < cfg.start() + cfg.record_len() {
        cfg.end() - cfg.record_len()
    } else {
        address - cfg.record_len()
    }
}

/// Rebuild the runtime parameters of one bank by scanning its region.
pub fn scan<F: FlashAccess>(flash: &mut F, cfg: &BankConfig) -> Result<ScanReport, FlashError> {
    let layout = cfg.layout();
    let record_len = cfg.record_len();
    let mut slot = [0u8; MAX_RECORD_LEN];
    let slot = &mut slot[..record_len as usize];

    // Pass 1: the highest sequence number among signature-bearing slots.
    // Later slots win ties, matching the write order within a plane.
    let mut best: Option<LastValid> = None;
    let mut addr = cfg.start();
    while addr < cfg.end() {
        flash.read(addr, slot)?;
        if layout.signature_ok(slot) {
            let sequence = layout.sequence(slot);
            if best.map_or(true, |b| sequence >= b.sequence) {
                best = Some(LastValid {
                    address: addr,
                    sequence,
                });
            }
        }
        addr += record_len;
    }

    let Some(candidate) = best else {
        // Wholly erased bank: not an error, writing starts at the front.
        // A dirty bank with no recognizable record forces a compaction.
        let next_write = if flash.is_blank(cfg.start(), cfg.plane_len())? {
            Some(cfg.start())
        } else {
            None
        };
        return Ok(ScanReport {
            last_valid: None,
            next_write,
        });
    };

    // Pass 2: the winner must also carry a matching checksum; a torn
    // write rolls back to the previous record that validates in full.
    flash.read(candidate.address, slot)?;
    let last_valid = if layout.checksum_ok(slot) {
        Some(candidate)
    } else {
        find_previous_valid(flash, cfg, candidate.address, slot)?
    };

    let next_write = match &last_valid {
        Some(last) => find_blank_after(flash, cfg, last.address)?,
        None => {
            if flash.is_blank(cfg.start(), cfg.plane_len())? {
                Some(cfg.start())
            } else {
                None
            }
        }
    };

    Ok(ScanReport {
        last_valid,
        next_write,
    })
}

/// Walk backward (wrapping) from `from` to the nearest record that
/// validates in full. Stops after one lap.
fn find_previous_valid<F: FlashAccess>(
    flash: &mut F,
    cfg: &BankConfig,
    from: u32,
    slot: &mut [u8],
) -> Result<Option<LastValid>, FlashError> {
    let layout = cfg.layout();
    let mut addr = prev_record_addr(cfg, from);
    while addr != from {
        flash.read(addr, slot)?;
        if layout.is_valid(slot) {
            return Ok(Some(LastValid {
                address: addr,
                sequence: layout.sequence(slot),
            }));
        }
        addr = prev_record_addr(cfg, addr);
    }
    Ok(None)
}

/// First blank slot after `last` within its plane, skipping garbage
/// left by torn writes. `None` means the plane is exhausted.
fn find_blank_after<F: FlashAccess>(
    flash: &mut F,
    cfg: &BankConfig,
    last: u32,
) -> Result<Option<u32>, FlashError> {
    let record_len = cfg.record_len();
    let plane_end = cfg.plane_end(cfg.plane_of(last));
    let mut addr = last + record_len;
    while addr < plane_end {
        if flash.is_blank(addr, record_len)? {
            return Ok(Some(addr));
        }
        addr += record_len;
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::ChecksumWidth;
    use engram_hal::mock::MockFlash;

    type Flash = MockFlash<256, 64>;

    fn cfg() -> BankConfig {
        // 16-byte records, 4 per plane
        BankConfig::new(0, 128, 6, ChecksumWidth::U16, 100).unwrap()
    }

    fn write_record(flash: &mut Flash, cfg: &BankConfig, addr: u32, sequence: u32, fill: u8) {
        let mut slot = [0u8; 16];
        cfg.layout()
            .encode(sequence, &[fill; 6], &mut slot)
            .unwrap();
        flash.program(addr, &slot).unwrap();
    }

    #[test]
    fn erased_bank_reports_nothing_found() {
        let mut flash = Flash::new();
        let cfg = cfg();
        let report = scan(&mut flash, &cfg).unwrap();
        assert_eq!(report.last_valid, None);
        assert_eq!(report.next_write, Some(0));
    }

    #[test]
    fn single_record_found() {
        let mut flash = Flash::new();
        let cfg = cfg();
        write_record(&mut flash, &cfg, 0, 1, 0xAB);

        let report = scan(&mut flash, &cfg).unwrap();
        assert_eq!(
            report.last_valid,
            Some(LastValid {
                address: 0,
                sequence: 1
            })
        );
        assert_eq!(report.next_write, Some(16));
    }

    #[test]
    fn highest_sequence_wins_across_planes() {
        let mut flash = Flash::new();
        let cfg = cfg();
        // Stale full plane A, newer image at plane B after a compaction
        for (i, seq) in (1..=4).enumerate() {
            write_record(&mut flash, &cfg, i as u32 * 16, seq, seq as u8);
        }
        write_record(&mut flash, &cfg, 64, 5, 0x55);

        let report = scan(&mut flash, &cfg).unwrap();
        assert_eq!(
            report.last_valid,
            Some(LastValid {
                address: 64,
                sequence: 5
            })
        );
        assert_eq!(report.next_write, Some(80));
    }

    #[test]
    fn full_plane_reports_no_free_slot() {
        let mut flash = Flash::new();
        let cfg = cfg();
        for (i, seq) in (1..=4).enumerate() {
            write_record(&mut flash, &cfg, i as u32 * 16, seq, seq as u8);
        }
        let report = scan(&mut flash, &cfg).unwrap();
        assert_eq!(report.last_valid.unwrap().sequence, 4);
        assert_eq!(report.next_write, None);
    }

    #[test]
    fn torn_newest_record_rolls_back() {
        let mut flash = Flash::new();
        let cfg = cfg();
        write_record(&mut flash, &cfg, 0, 1, 0x11);
        write_record(&mut flash, &cfg, 16, 2, 0x22);
        // Corrupt the newest record's checksum, signature stays intact
        let mut byte = [0u8; 1];
        flash.read(16, &mut byte).unwrap();
        flash.poke(16, &[byte[0] ^ 0x01]);

        let report = scan(&mut flash, &cfg).unwrap();
        assert_eq!(
            report.last_valid,
            Some(LastValid {
                address: 0,
                sequence: 1
            })
        );
        // The garbage slot is skipped, not reused
        assert_eq!(report.next_write, Some(32));
    }

    #[test]
    fn unrecognizable_garbage_forces_compaction_path() {
        let mut flash = Flash::new();
        let cfg = cfg();
        flash.poke(0, &[0x00; 16]);

        let report = scan(&mut flash, &cfg).unwrap();
        assert_eq!(report.last_valid, None);
        assert_eq!(report.next_write, None);
    }

    #[test]
    fn address_wrap_at_margins() {
        let cfg = cfg();
        assert_eq!(next_record_addr(&cfg, 0), 16);
        assert_eq!(next_record_addr(&cfg, 112), 0);
        assert_eq!(prev_record_addr(&cfg, 0), 112);
        assert_eq!(prev_record_addr(&cfg, 16), 0);
    }
}
