//! Two-page emulated EEPROM for 16-bit variables
//!
//! The classic double-buffered page scheme: two flash pages rotate, each
//! carrying a persisted status half-word at its base followed by an
//! append-only log of `{value, virtual address}` half-word pairs. Reads
//! scan from the page's high end backward, so the physically last write
//! of a variable wins.
//!
//! Unlike the record log in [`crate::bank`], which snapshots a whole
//! image per store, this store keeps one latest value per virtual
//! address. The page status is load-bearing for crash recovery: every
//! legal pair of status words maps to exactly one repair action at
//! [`init`](VariableStore::init), and every illegal pair (both pages
//! valid included) is resolved by reformatting, with data loss accepted
//! because the state is unreachable under correct operation.

use engram_hal::{EraseRegion, FlashAccess, ERASED_BYTE};

use crate::config::ConfigError;
use crate::Error;

/// Page status: still erased.
pub const STATUS_ERASED: u16 = 0xFFFF;
/// Page status: receiving data during a transfer.
pub const STATUS_RECEIVE: u16 = 0xEEEE;
/// Page status: the active page.
pub const STATUS_VALID: u16 = 0x0000;

/// One `{value, virtual address}` entry.
const ENTRY_SIZE: u32 = 4;

/// Decoded page status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PageStatus {
    Erased,
    Receiving,
    Valid,
    /// Any other bit pattern
    Corrupt,
}

impl PageStatus {
    pub const fn from_raw(raw: u16) -> Self {
        match raw {
            STATUS_ERASED => PageStatus::Erased,
            STATUS_RECEIVE => PageStatus::Receiving,
            STATUS_VALID => PageStatus::Valid,
            _ => PageStatus::Corrupt,
        }
    }
}

/// The two pages of the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PageId {
    Page0,
    Page1,
}

impl PageId {
    pub const fn other(self) -> Self {
        match self {
            PageId::Page0 => PageId::Page1,
            PageId::Page1 => PageId::Page0,
        }
    }
}

/// Geometry of the page pair: two `page_size` pages starting at `base`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PagePairConfig {
    base: u32,
    page_size: u32,
}

impl PagePairConfig {
    pub fn new(base: u32, page_size: u32) -> Result<Self, ConfigError> {
        // Header slot plus at least one entry
        if page_size < 2 * ENTRY_SIZE || page_size % ENTRY_SIZE != 0 {
            return Err(ConfigError::PageGeometry);
        }
        Ok(Self { base, page_size })
    }

    pub const fn base(&self) -> u32 {
        self.base
    }

    pub const fn page_size(&self) -> u32 {
        self.page_size
    }

    pub const fn page_base(&self, page: PageId) -> u32 {
        match page {
            PageId::Page0 => self.base,
            PageId::Page1 => self.base + self.page_size,
        }
    }

    /// Entry slots per page (the first slot holds the status word).
    pub const fn entry_capacity(&self) -> u32 {
        self.page_size / ENTRY_SIZE - 1
    }
}

/// Two-page store for up to `VARS` tracked 16-bit variables.
///
/// The variable set is fixed at construction; `0xFFFF` is prohibited as
/// a virtual address because it is indistinguishable from erased flash.
pub struct VariableStore<F: FlashAccess, const VARS: usize> {
    flash: F,
    cfg: PagePairConfig,
    virt_table: [u16; VARS],
}

impl<F: FlashAccess, const VARS: usize> VariableStore<F, VARS> {
    /// Validate the variable table against the geometry and build the
    /// store. No flash is touched until [`init`](Self::init).
    pub fn new(flash: F, cfg: PagePairConfig, virt_table: [u16; VARS]) -> Result<Self, ConfigError> {
        if virt_table.iter().any(|&v| v == STATUS_ERASED) {
            return Err(ConfigError::ProhibitedVirtualAddress);
        }
        if VARS as u32 > cfg.entry_capacity() {
            return Err(ConfigError::PageGeometry);
        }
        Ok(Self {
            flash,
            cfg,
            virt_table,
        })
    }

    pub fn config(&self) -> &PagePairConfig {
        &self.cfg
    }

    /// Low-level access to the owned flash device.
    pub fn flash(&mut self) -> &mut F {
        &mut self.flash
    }

    /// Give the flash device back.
    pub fn release(self) -> F {
        self.flash
    }

    /// Restore the page pair to a known good state after power loss.
    ///
    /// Every legal status pairing maps to exactly one repair action;
    /// anything else is treated as corruption and reformatted.
    pub fn init(&mut self) -> Result<(), Error> {
        let granularity = self.flash.erase_granularity();
        if self.cfg.base % granularity != 0 || self.cfg.page_size % granularity != 0 {
            return Err(ConfigError::Misaligned.into());
        }

        let status0 = self.page_status(PageId::Page0)?;
        let status1 = self.page_status(PageId::Page1)?;
        use PageStatus::*;
        match (status0, status1) {
            // Stable states: make sure the idle page is really blank,
            // without re-erasing one that already is
            (Erased, Valid) => self.ensure_page_blank(PageId::Page0),
            (Valid, Erased) => self.ensure_page_blank(PageId::Page1),

            // A transfer finished writing but the mark never landed
            (Erased, Receiving) => {
                self.ensure_page_blank(PageId::Page0)?;
                self.mark_page(PageId::Page1, STATUS_VALID)
            }
            (Receiving, Erased) => {
                self.ensure_page_blank(PageId::Page1)?;
                self.mark_page(PageId::Page0, STATUS_VALID)
            }

            // A transfer was interrupted mid-copy: finish it
            (Receiving, Valid) => self.complete_transfer(PageId::Page1, PageId::Page0),
            (Valid, Receiving) => self.complete_transfer(PageId::Page0, PageId::Page1),

            // First use, or anything unaccounted for (both pages valid
            // included): format, accepting the loss
            _ => self.format(),
        }
    }

    /// Erase both pages (where needed) and mark page 0 valid.
    pub fn format(&mut self) -> Result<(), Error> {
        self.ensure_page_blank(PageId::Page0)?;
        self.mark_page(PageId::Page0, STATUS_VALID)?;
        self.ensure_page_blank(PageId::Page1)
    }

    /// Latest value written for `virt`.
    pub fn read(&mut self, virt: u16) -> Result<u16, Error> {
        let page = self.find_valid_page(Operation::Read)?;
        self.find_in_page(page, virt)?.ok_or(Error::NotFound)
    }

    /// Write (or update) `virt`, transferring to the other page when the
    /// active one is full.
    pub fn write(&mut self, virt: u16, value: u16) -> Result<(), Error> {
        let page = self.find_valid_page(Operation::Write)?;
        match self.write_into_page(page, virt, value) {
            Err(Error::PageFull) => self.page_transfer(virt, value),
            other => other,
        }
    }

    /// Read a 32-bit value spread over the virtual-address pair packed
    /// into `virt_pair` (low half-word names the LSB variable, high
    /// half-word the MSB variable).
    pub fn read_u32(&mut self, virt_pair: u32) -> Result<u32, Error> {
        let lsb = self.read(virt_pair as u16)?;
        let msb = self.read((virt_pair >> 16) as u16)?;
        Ok(lsb as u32 | (msb as u32) << 16)
    }

    /// Write a 32-bit value over the virtual-address pair of `virt_pair`.
    pub fn write_u32(&mut self, virt_pair: u32, value: u32) -> Result<(), Error> {
        self.write(virt_pair as u16, value as u16)?;
        self.write((virt_pair >> 16) as u16, (value >> 16) as u16)
    }

    fn page_status(&mut self, page: PageId) -> Result<PageStatus, Error> {
        let raw = self.read_half(self.cfg.page_base(page))?;
        Ok(PageStatus::from_raw(raw))
    }

    fn find_valid_page(&mut self, operation: Operation) -> Result<PageId, Error> {
        let status0 = self.page_status(PageId::Page0)?;
        let status1 = self.page_status(PageId::Page1)?;
        use PageStatus::*;
        let page = match operation {
            // Writes land in the receiving page of an ongoing transfer
            Operation::Write => match (status0, status1) {
                (Receiving, Valid) => PageId::Page0,
                (_, Valid) => PageId::Page1,
                (Valid, Receiving) => PageId::Page1,
                (Valid, _) => PageId::Page0,
                _ => return Err(Error::NoValidPage),
            },
            // Reads always come from the marked-valid page
            Operation::Read => match (status0, status1) {
                (Valid, _) => PageId::Page0,
                (_, Valid) => PageId::Page1,
                _ => return Err(Error::NoValidPage),
            },
        };
        Ok(page)
    }

    /// Backward scan for the latest entry matching `virt`.
    fn find_in_page(&mut self, page: PageId, virt: u16) -> Result<Option<u16>, Error> {
        let base = self.cfg.page_base(page);
        for slot in (1..=self.cfg.entry_capacity()).rev() {
            let entry = base + slot * ENTRY_SIZE;
            if self.read_half(entry + 2)? == virt {
                return Ok(Some(self.read_half(entry)?));
            }
        }
        Ok(None)
    }

    /// Append `{value, virt}` into the first blank entry of `page`.
    ///
    /// The value half-word is programmed before the address half-word: a
    /// write torn between the two leaves an entry no scan will ever
    /// match.
    fn write_into_page(&mut self, page: PageId, virt: u16, value: u16) -> Result<(), Error> {
        let base = self.cfg.page_base(page);
        for slot in 1..=self.cfg.entry_capacity() {
            let entry = base + slot * ENTRY_SIZE;
            let mut word = [0u8; ENTRY_SIZE as usize];
            self.flash.read(entry, &mut word)?;
            if word.iter().all(|&b| b == ERASED_BYTE) {
                self.program_half(entry, value)?;
                self.program_half(entry + 2, virt)?;
                return Ok(());
            }
        }
        Err(Error::PageFull)
    }

    /// Move the latest value of every variable to the other page.
    ///
    /// Order matters for crash recovery: mark receiving, write the
    /// incoming value, copy the rest, erase the old page, mark valid.
    fn page_transfer(&mut self, virt: u16, value: u16) -> Result<(), Error> {
        let old = self.find_valid_page(Operation::Read)?;
        let new = old.other();

        self.mark_page(new, STATUS_RECEIVE)?;
        self.write_into_page(new, virt, value)?;
        for index in 0..VARS {
            let other = self.virt_table[index];
            if other == virt {
                continue;
            }
            if let Some(live) = self.find_in_page(old, other)? {
                self.write_into_page(new, other, live)?;
            }
        }
        self.ensure_page_blank(old)?;
        self.mark_page(new, STATUS_VALID)
    }

    /// Finish an interrupted transfer found at init: copy every variable
    /// not yet present in the receiving page, then promote it.
    fn complete_transfer(&mut self, source: PageId, receiving: PageId) -> Result<(), Error> {
        for index in 0..VARS {
            let virt = self.virt_table[index];
            if self.find_in_page(receiving, virt)?.is_some() {
                continue;
            }
            if let Some(live) = self.find_in_page(source, virt)? {
                self.write_into_page(receiving, virt, live)?;
            }
        }
        self.mark_page(receiving, STATUS_VALID)?;
        self.ensure_page_blank(source)
    }

    /// Erase `page` unless it already reads fully blank.
    fn ensure_page_blank(&mut self, page: PageId) -> Result<(), Error> {
        let base = self.cfg.page_base(page);
        if self.flash.is_blank(base, self.cfg.page_size)? {
            return Ok(());
        }
        self.flash.unlock()?;
        self.flash
            .erase(EraseRegion::new(base, self.cfg.page_size))?;
        Ok(())
    }

    fn mark_page(&mut self, page: PageId, status: u16) -> Result<(), Error> {
        self.program_half(self.cfg.page_base(page), status)
    }

    fn read_half(&mut self, address: u32) -> Result<u16, Error> {
        let mut raw = [0u8; 2];
        self.flash.read(address, &mut raw)?;
        Ok(u16::from_le_bytes(raw))
    }

    fn program_half(&mut self, address: u32, value: u16) -> Result<(), Error> {
        self.flash.unlock()?;
        self.flash.program(address, &value.to_le_bytes())?;
        Ok(())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Operation {
    Read,
    Write,
}
