//! RAM-backed flash simulator
//!
//! Models the worst of NOR flash on the host so the emulation core can be
//! tested without hardware: erases set a whole sector to `0xFF`, programs
//! can only clear bits, and faults can be injected at any byte offset to
//! simulate power loss mid-write.
//!
//! Per-sector erase counters let tests assert exactly how much endurance
//! an operation consumed.

use crate::flash::{EraseRegion, FlashAccess, FlashError, ERASED_BYTE};

/// Upper bound on simulated sectors, independent of geometry.
pub const MAX_SECTORS: usize = 64;

/// Operation attempt/success counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpCounters {
    pub read_attempts: u32,
    pub read_ok: u32,
    pub program_attempts: u32,
    pub program_ok: u32,
    pub erase_attempts: u32,
    pub erase_ok: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Read,
    Program,
    Erase,
}

/// Simulated NOR flash of `SIZE` bytes with `SECTOR`-byte erase units.
///
/// `SIZE` must be a multiple of `SECTOR`, and at most [`MAX_SECTORS`]
/// sectors.
pub struct MockFlash<const SIZE: usize, const SECTOR: usize = 4096> {
    mem: [u8; SIZE],
    counters: OpCounters,
    erase_counts: [u32; MAX_SECTORS],
    fault: Option<(Op, FlashError)>,
    /// Bytes of programming left before simulated power loss
    power_budget: Option<u32>,
    dead: bool,
}

impl<const SIZE: usize, const SECTOR: usize> Default for MockFlash<SIZE, SECTOR> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const SIZE: usize, const SECTOR: usize> MockFlash<SIZE, SECTOR> {
    /// Create a factory-fresh (fully erased) device.
    pub fn new() -> Self {
        debug_assert!(SIZE % SECTOR == 0);
        debug_assert!(SIZE / SECTOR <= MAX_SECTORS);
        Self {
            mem: [ERASED_BYTE; SIZE],
            counters: OpCounters::default(),
            erase_counts: [0; MAX_SECTORS],
            fault: None,
            power_budget: None,
            dead: false,
        }
    }

    /// Operation counters so far.
    pub fn counters(&self) -> OpCounters {
        self.counters
    }

    /// How often the sector containing `address` has been erased.
    pub fn erase_count(&self, address: u32) -> u32 {
        self.erase_counts[address as usize / SECTOR]
    }

    /// Fail the next read with `err`.
    pub fn fail_next_read(&mut self, err: FlashError) {
        self.fault = Some((Op::Read, err));
    }

    /// Fail the next program with `err`.
    pub fn fail_next_program(&mut self, err: FlashError) {
        self.fault = Some((Op::Program, err));
    }

    /// Fail the next erase with `err`.
    pub fn fail_next_erase(&mut self, err: FlashError) {
        self.fault = Some((Op::Erase, err));
    }

    /// Cut power after `bytes` more bytes have been programmed.
    ///
    /// The program call that crosses the budget writes exactly the
    /// remaining bytes, then the device goes dark: every operation fails
    /// with [`FlashError::PowerLoss`] until [`Self::restart`].
    pub fn power_cut_after(&mut self, bytes: u32) {
        self.power_budget = Some(bytes);
    }

    /// Power the device back up. Memory contents and counters survive,
    /// pending faults do not.
    pub fn restart(&mut self) {
        self.dead = false;
        self.fault = None;
        self.power_budget = None;
    }

    /// Direct view of the array, bypassing the device model.
    pub fn contents(&self) -> &[u8] {
        &self.mem
    }

    /// Write bytes directly into the array, bypassing the device model.
    ///
    /// For constructing on-media states (corrupt records, interrupted
    /// transfers) that are awkward to reach through the API.
    pub fn poke(&mut self, address: u32, data: &[u8]) {
        let start = address as usize;
        self.mem[start..start + data.len()].copy_from_slice(data);
    }

    fn check_fault(&mut self, op: Op) -> Result<(), FlashError> {
        if self.dead {
            return Err(FlashError::PowerLoss);
        }
        if let Some((fault_op, err)) = self.fault {
            if fault_op == op {
                self.fault = None;
                return Err(err);
            }
        }
        Ok(())
    }

    fn check_bounds(address: u32, len: usize) -> Result<(), FlashError> {
        let end = address as usize + len;
        if end > SIZE {
            return Err(FlashError::OutOfBounds);
        }
        Ok(())
    }
}

impl<const SIZE: usize, const SECTOR: usize> FlashAccess for MockFlash<SIZE, SECTOR> {
    fn erase_granularity(&self) -> u32 {
        SECTOR as u32
    }

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        self.counters.read_attempts += 1;
        self.check_fault(Op::Read)?;
        Self::check_bounds(address, buf.len())?;
        let start = address as usize;
        buf.copy_from_slice(&self.mem[start..start + buf.len()]);
        self.counters.read_ok += 1;
        Ok(())
    }

    fn program(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        self.counters.program_attempts += 1;
        self.check_fault(Op::Program)?;
        Self::check_bounds(address, data.len())?;

        let mut writable = data.len();
        let mut lights_out = false;
        if let Some(budget) = self.power_budget {
            if (data.len() as u32) > budget {
                writable = budget as usize;
                lights_out = true;
            } else {
                self.power_budget = Some(budget - data.len() as u32);
            }
        }

        let start = address as usize;
        for (cell, byte) in self.mem[start..start + writable].iter_mut().zip(data) {
            // NOR programming can only clear bits
            *cell &= byte;
        }

        if lights_out {
            self.dead = true;
            self.power_budget = None;
            return Err(FlashError::PowerLoss);
        }
        self.counters.program_ok += 1;
        Ok(())
    }

    fn erase(&mut self, region: EraseRegion) -> Result<(), FlashError> {
        self.counters.erase_attempts += 1;
        self.check_fault(Op::Erase)?;
        Self::check_bounds(region.start, region.length as usize)?;
        if region.start as usize % SECTOR != 0 || region.length as usize % SECTOR != 0 {
            return Err(FlashError::NotAligned);
        }
        let start = region.start as usize;
        let end = region.end() as usize;
        self.mem[start..end].fill(ERASED_BYTE);
        for sector in (start / SECTOR)..(end / SECTOR) {
            self.erase_counts[sector] += 1;
        }
        self.counters.erase_ok += 1;
        Ok(())
    }
}
