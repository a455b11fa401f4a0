//! Bank manager
//!
//! Serializes the load/store/compaction protocol for one bank. A store
//! appends a whole-image snapshot record; reads always come from the
//! newest valid record. When the active plane has no free slot left, the
//! merged image is compacted into the erased twin plane and the old plane
//! is retired.
//!
//! The cached runtime parameters are an optimization only: after power
//! loss they are rebuilt from flash by [`attach`](Bank::attach), never
//! trusted. A store either completes or leaves the bank in a state the
//! scanner can recover by rescanning.

use engram_hal::{EraseRegion, FlashAccess};
use heapless::Vec;

use crate::config::{BankConfig, Plane};
use crate::record::MAX_RECORD_LEN;
use crate::scanner::{self, LastValid};
use crate::status::MemoryStatus;
use crate::wear::{self, DiagCounters};
use crate::Error;

/// Volatile per-bank parameters, rebuilt by scanning.
#[derive(Debug, Clone, Copy, Default)]
struct BankParams {
    /// Newest valid record, if any
    last_valid: Option<LastValid>,
    /// Next free slot in the active plane; `None` forces compaction
    next_write: Option<u32>,
}

/// One bank of emulated EEPROM.
#[derive(Debug)]
pub struct Bank {
    cfg: BankConfig,
    params: BankParams,
    wear_warn: u8,
    diag: DiagCounters,
}

impl Bank {
    /// Create a bank over `cfg`. Call [`attach`](Self::attach) before use.
    pub fn new(cfg: BankConfig, wear_warn: u8) -> Self {
        Self {
            cfg,
            params: BankParams::default(),
            wear_warn,
            diag: DiagCounters::default(),
        }
    }

    pub fn config(&self) -> &BankConfig {
        &self.cfg
    }

    pub fn diag(&self) -> &DiagCounters {
        &self.diag
    }

    pub(crate) fn set_wear_warning(&mut self, percent: u8) {
        self.wear_warn = percent;
    }

    /// Wear of this bank in percent of its rated endurance.
    pub fn wear_percent(&self) -> u8 {
        let sequence = self.params.last_valid.map_or(0, |l| l.sequence);
        wear::wear_percent(sequence, self.cfg.capacity(), self.cfg.endurance())
    }

    /// Rebuild the runtime parameters from flash content.
    pub fn attach<F: FlashAccess>(
        &mut self,
        flash: &mut F,
        status: &mut MemoryStatus,
    ) -> Result<(), Error> {
        match scanner::scan(flash, &self.cfg) {
            Ok(report) => {
                self.params = BankParams {
                    last_valid: report.last_valid,
                    next_write: report.next_write,
                };
                Ok(())
            }
            Err(e) => {
                status.raise(MemoryStatus::READ_ERR);
                Err(e.into())
            }
        }
    }

    /// Copy `buf.len()` payload bytes at `offset` out of the newest
    /// valid record. The caller has validated the range.
    pub fn load<F: FlashAccess>(
        &mut self,
        flash: &mut F,
        offset: usize,
        buf: &mut [u8],
        status: &mut MemoryStatus,
    ) -> Result<(), Error> {
        self.diag.note_load_call();
        let Some(last) = self.params.last_valid else {
            return Err(Error::NotFound);
        };

        let address = last.address + self.cfg.layout().payload_offset() as u32 + offset as u32;
        self.diag.note_read_attempt();
        match flash.read(address, buf) {
            Ok(()) => {
                self.diag.note_read_ok(buf.len() as u32);
                Ok(())
            }
            Err(e) => {
                status.raise(MemoryStatus::READ_ERR);
                Err(e.into())
            }
        }
    }

    /// Append a record whose payload is the previous image with `data`
    /// overlaid at `offset`. The caller has validated the range.
    pub fn store<F: FlashAccess>(
        &mut self,
        flash: &mut F,
        offset: usize,
        data: &[u8],
        status: &mut MemoryStatus,
    ) -> Result<(), Error> {
        self.diag.note_store_call();
        let layout = self.cfg.layout();

        // Stage the merged payload image: previous snapshot as the base,
        // zeros on first use. Capacity was validated against the config.
        let mut image: Vec<u8, MAX_RECORD_LEN> = Vec::new();
        image
            .resize(self.cfg.payload_len(), 0)
            .map_err(|_| Error::InvalidLength)?;
        if let Some(last) = self.params.last_valid {
            let payload_address = last.address + layout.payload_offset() as u32;
            self.diag.note_read_attempt();
            if let Err(e) = flash.read(payload_address, &mut image) {
                status.raise(MemoryStatus::READ_ERR);
                return Err(e.into());
            }
            self.diag.note_read_ok(image.len() as u32);
        }
        image[offset..offset + data.len()].copy_from_slice(data);

        let sequence = self.params.last_valid.map_or(1, |l| l.sequence.wrapping_add(1));
        let mut slot: Vec<u8, MAX_RECORD_LEN> = Vec::new();
        slot.resize(self.cfg.record_len() as usize, 0)
            .map_err(|_| Error::InvalidLength)?;
        layout
            .encode(sequence, &image, &mut slot)
            .map_err(|_| Error::InvalidLength)?;

        flash.unlock()?;
        match self.params.next_write {
            Some(address) => self.program_record(flash, address, &slot, sequence, status),
            None => self.compact(flash, &slot, sequence, status),
        }
    }

    fn program_record<F: FlashAccess>(
        &mut self,
        flash: &mut F,
        address: u32,
        slot: &[u8],
        sequence: u32,
        status: &mut MemoryStatus,
    ) -> Result<(), Error> {
        self.diag.note_write_attempt();
        if let Err(e) = flash.program(address, slot) {
            status.raise(MemoryStatus::WRITE_ERR);
            return Err(e.into());
        }
        self.diag.note_write_ok(slot.len() as u32);
        self.commit(address, sequence, status);
        Ok(())
    }

    /// Move the live image into the twin plane and retire the full one.
    ///
    /// Order matters: the new record lands completely before the old
    /// plane is touched, so at every step one plane holds an unambiguous
    /// valid image and a power cut anywhere degrades to a rescan.
    fn compact<F: FlashAccess>(
        &mut self,
        flash: &mut F,
        slot: &[u8],
        sequence: u32,
        status: &mut MemoryStatus,
    ) -> Result<(), Error> {
        let active = self
            .params
            .last_valid
            .map_or(Plane::A, |l| self.cfg.plane_of(l.address));
        let target = active.other();
        let target_base = self.cfg.plane_base(target);

        self.ensure_plane_blank(flash, target_base, status)?;
        self.program_record(flash, target_base, slot, sequence, status)?;
        self.ensure_plane_blank(flash, self.cfg.plane_base(active), status)
    }

    /// Erase a plane unless it is already blank.
    fn ensure_plane_blank<F: FlashAccess>(
        &mut self,
        flash: &mut F,
        base: u32,
        status: &mut MemoryStatus,
    ) -> Result<(), Error> {
        let blank = flash.is_blank(base, self.cfg.plane_len()).map_err(|e| {
            status.raise(MemoryStatus::READ_ERR);
            Error::from(e)
        })?;
        if blank {
            return Ok(());
        }
        self.diag.note_erase_attempt();
        match flash.erase(EraseRegion::new(base, self.cfg.plane_len())) {
            Ok(()) => {
                self.diag.note_erase_ok(self.cfg.plane_len());
                Ok(())
            }
            Err(e) => {
                status.raise(MemoryStatus::ERASE_ERR);
                Err(e.into())
            }
        }
    }

    /// Update the cached parameters after a successful program, without
    /// rescanning. The slot after the new record is blank by the plane
    /// invariant (planes are erased before use).
    fn commit(&mut self, address: u32, sequence: u32, status: &mut MemoryStatus) {
        self.params.last_valid = Some(LastValid { address, sequence });
        let next = address + self.cfg.record_len();
        self.params.next_write =
            (next < self.cfg.plane_end(self.cfg.plane_of(address))).then_some(next);

        let wear = wear::wear_percent(sequence, self.cfg.capacity(), self.cfg.endurance());
        wear::apply_wear_flags(status, wear, self.wear_warn);
        self.diag.note_record_state(sequence, wear);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::ChecksumWidth;
    use engram_hal::mock::MockFlash;
    use engram_hal::FlashError;

    type Flash = MockFlash<256, 64>;

    fn bank() -> Bank {
        // 16-byte records, 4 per plane
        let cfg = BankConfig::new(0, 128, 6, ChecksumWidth::U16, 100).unwrap();
        Bank::new(cfg, 80)
    }

    fn attach(bank: &mut Bank, flash: &mut Flash) -> MemoryStatus {
        let mut status = MemoryStatus::default();
        bank.attach(flash, &mut status).unwrap();
        status
    }

    #[test]
    fn load_from_fresh_bank_is_not_found() {
        let mut flash = Flash::new();
        let mut bank = bank();
        let mut status = attach(&mut bank, &mut flash);

        let mut buf = [0u8; 6];
        assert_eq!(
            bank.load(&mut flash, 0, &mut buf, &mut status),
            Err(Error::NotFound)
        );
    }

    #[test]
    fn store_then_load_roundtrip() {
        let mut flash = Flash::new();
        let mut bank = bank();
        let mut status = attach(&mut bank, &mut flash);

        bank.store(&mut flash, 0, &[0x11, 0x22], &mut status).unwrap();
        let mut buf = [0u8; 2];
        bank.load(&mut flash, 0, &mut buf, &mut status).unwrap();
        assert_eq!(buf, [0x11, 0x22]);

        // Unwritten image bytes default to zero
        let mut rest = [0xFFu8; 4];
        bank.load(&mut flash, 2, &mut rest, &mut status).unwrap();
        assert_eq!(rest, [0, 0, 0, 0]);
    }

    #[test]
    fn partial_store_preserves_previous_image() {
        let mut flash = Flash::new();
        let mut bank = bank();
        let mut status = attach(&mut bank, &mut flash);

        bank.store(&mut flash, 0, &[1, 2, 3, 4, 5, 6], &mut status)
            .unwrap();
        bank.store(&mut flash, 3, &[0x99], &mut status).unwrap();

        let mut buf = [0u8; 6];
        bank.load(&mut flash, 0, &mut buf, &mut status).unwrap();
        assert_eq!(buf, [1, 2, 3, 0x99, 5, 6]);
    }

    #[test]
    fn fifth_store_compacts_once_into_twin_plane() {
        let mut flash = Flash::new();
        let mut bank = bank();
        let mut status = attach(&mut bank, &mut flash);

        for i in 1..=4u8 {
            bank.store(&mut flash, 0, &[i; 6], &mut status).unwrap();
        }
        assert_eq!(flash.erase_count(0), 0);

        bank.store(&mut flash, 0, &[5; 6], &mut status).unwrap();

        // Target plane was factory-blank, old plane erased exactly once
        assert_eq!(flash.erase_count(0), 1);
        assert_eq!(flash.erase_count(64), 0);

        let mut buf = [0u8; 6];
        bank.load(&mut flash, 0, &mut buf, &mut status).unwrap();
        assert_eq!(buf, [5; 6]);
    }

    #[test]
    fn compaction_carries_the_untouched_image_forward() {
        let mut flash = Flash::new();
        let mut bank = bank();
        let mut status = attach(&mut bank, &mut flash);

        bank.store(&mut flash, 0, &[1, 2, 3, 4, 5, 6], &mut status)
            .unwrap();
        for i in 0..3u8 {
            bank.store(&mut flash, 0, &[i], &mut status).unwrap();
        }
        // Plane is full; this partial store rides the compaction
        bank.store(&mut flash, 1, &[0x77], &mut status).unwrap();

        let mut buf = [0u8; 6];
        bank.load(&mut flash, 0, &mut buf, &mut status).unwrap();
        assert_eq!(buf, [2, 0x77, 3, 4, 5, 6]);
    }

    #[test]
    fn sequences_stay_monotonic_across_compactions() {
        let mut flash = Flash::new();
        let mut bank = bank();
        let mut status = attach(&mut bank, &mut flash);

        let mut previous = 0u32;
        for i in 0..13u8 {
            bank.store(&mut flash, 0, &[i; 6], &mut status).unwrap();
            let report = scanner::scan(&mut flash, bank.config()).unwrap();
            let sequence = report.last_valid.unwrap().sequence;
            assert!(sequence > previous);
            previous = sequence;
        }
        assert_eq!(previous, 13);
    }

    #[test]
    fn program_failure_sets_write_err_and_propagates() {
        let mut flash = Flash::new();
        let mut bank = bank();
        let mut status = attach(&mut bank, &mut flash);

        flash.fail_next_program(FlashError::Timeout);
        assert_eq!(
            bank.store(&mut flash, 0, &[1; 6], &mut status),
            Err(Error::Flash(FlashError::Timeout))
        );
        assert!(status.contains(MemoryStatus::WRITE_ERR));

        // The bank recovers: the slot is reusable after a rescan
        let mut status = attach(&mut bank, &mut flash);
        bank.store(&mut flash, 0, &[2; 6], &mut status).unwrap();
    }

    #[test]
    fn erase_failure_during_compaction_keeps_new_image() {
        let mut flash = Flash::new();
        let mut bank = bank();
        let mut status = attach(&mut bank, &mut flash);

        for i in 1..=4u8 {
            bank.store(&mut flash, 0, &[i; 6], &mut status).unwrap();
        }
        // Target plane is blank, so the injected failure hits the
        // old-plane retirement erase
        flash.fail_next_erase(FlashError::Io);
        assert_eq!(
            bank.store(&mut flash, 0, &[5; 6], &mut status),
            Err(Error::Flash(FlashError::Io))
        );
        assert!(status.contains(MemoryStatus::ERASE_ERR));

        // The new image landed and wins by sequence number
        let mut buf = [0u8; 6];
        bank.load(&mut flash, 0, &mut buf, &mut status).unwrap();
        assert_eq!(buf, [5; 6]);
    }

    #[test]
    fn wear_flags_raise_with_age() {
        let mut flash = Flash::new();
        // Endurance of 10 cycles, 4 records per cycle
        let cfg = BankConfig::new(0, 128, 6, ChecksumWidth::U16, 10).unwrap();
        let mut bank = Bank::new(cfg, 80);
        let mut status = attach(&mut bank, &mut flash);

        for i in 0..36u32 {
            bank.store(&mut flash, 0, &[i as u8; 6], &mut status).unwrap();
        }
        // 36 records = 9 cycles = 90% of rated endurance
        assert_eq!(bank.wear_percent(), 90);
        assert!(status.contains(MemoryStatus::WEAR_THRS_1_WARN));
        assert!(!status.contains(MemoryStatus::WEAR_THRS_2_ERR));

        for i in 0..4u32 {
            bank.store(&mut flash, 0, &[i as u8; 6], &mut status).unwrap();
        }
        assert_eq!(bank.wear_percent(), 100);
        assert!(status.contains(MemoryStatus::WEAR_THRS_2_ERR));
    }
}
