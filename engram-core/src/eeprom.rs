//! Emulated EEPROM facade
//!
//! The only type callers interact with. One [`Eeprom`] instance owns one
//! flash device (or partition) and multiplexes loads and stores over its
//! configured banks. All persisted state is re-derived from flash content
//! at [`init`](Eeprom::init), so running it twice, or after an unclean
//! shutdown, reconstructs the same state as a clean run.
//!
//! Completion is reported three ways: the synchronous `Result`, the sticky
//! [`MemoryStatus`] mask, and an optional per-job-type callback fired at
//! the end of each load/store.

use engram_hal::FlashAccess;

use crate::bank::Bank;
use crate::config::{BankConfig, ConfigError, MAX_BANKS, WEAR_WARN_DEFAULT};
use crate::status::{JobCallback, JobKind, JobResult, MemoryStatus};
use crate::wear::DiagCounters;
use crate::Error;

/// Logical location of emulated EEPROM data: a bank index and a byte
/// offset into that bank's payload image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LogicalAddress {
    pub bank: u8,
    pub offset: u16,
}

impl LogicalAddress {
    pub const fn new(bank: u8, offset: u16) -> Self {
        Self { bank, offset }
    }

    /// Unpack the packed form: bank in bits 16..24, offset in the low
    /// word.
    pub const fn from_raw(raw: u32) -> Self {
        Self {
            bank: (raw >> 16) as u8,
            offset: raw as u16,
        }
    }

    /// The packed form accepted by [`Self::from_raw`].
    pub const fn into_raw(self) -> u32 {
        ((self.bank as u32) << 16) | self.offset as u32
    }
}

/// Emulated EEPROM over `BANKS` banks of one flash device.
pub struct Eeprom<F: FlashAccess, const BANKS: usize> {
    flash: F,
    banks: [Bank; BANKS],
    status: MemoryStatus,
    job_result: JobResult,
    initialized: bool,
    load_callback: Option<(u8, JobCallback)>,
    store_callback: Option<(u8, JobCallback)>,
}

impl<F: FlashAccess, const BANKS: usize> Eeprom<F, BANKS> {
    /// Validate the bank layout against the device and build the
    /// context. No flash is touched until [`init`](Self::init).
    pub fn new(flash: F, configs: [BankConfig; BANKS]) -> Result<Self, ConfigError> {
        if BANKS == 0 || BANKS > MAX_BANKS {
            return Err(ConfigError::BankCount);
        }
        for cfg in &configs {
            cfg.check_alignment(flash.erase_granularity())?;
        }
        Ok(Self {
            flash,
            banks: configs.map(|cfg| Bank::new(cfg, WEAR_WARN_DEFAULT)),
            status: MemoryStatus::clear_all(),
            job_result: JobResult::Ok,
            initialized: false,
            load_callback: None,
            store_callback: None,
        })
    }

    /// Override the wear-warning threshold (percent, 1..=99).
    pub fn with_wear_warning(mut self, percent: u8) -> Result<Self, ConfigError> {
        if percent == 0 || percent > 99 {
            return Err(ConfigError::WearThreshold);
        }
        for bank in &mut self.banks {
            bank.set_wear_warning(percent);
        }
        Ok(self)
    }

    /// Rebuild every bank's runtime parameters by scanning flash and
    /// clear the status mask. Idempotent: nothing carried over in RAM is
    /// trusted, so a second run (or a run after power loss) reconstructs
    /// the same state.
    pub fn init(&mut self) -> Result<(), Error> {
        self.initialized = false;
        self.status = MemoryStatus::clear_all();
        self.job_result = JobResult::Ok;
        for bank in &mut self.banks {
            bank.attach(&mut self.flash, &mut self.status)?;
        }
        self.initialized = true;
        Ok(())
    }

    /// Drop the initialized state. Flash content is untouched.
    pub fn deinit(&mut self) {
        self.initialized = false;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Load `buf.len()` bytes from the newest valid image of the
    /// addressed bank. [`Error::NotFound`] on first use means "supply
    /// your default".
    pub fn load(&mut self, address: LogicalAddress, buf: &mut [u8]) -> Result<(), Error> {
        self.guard(address, buf.len())?;
        self.job_result = JobResult::Pending;
        let result = self.banks[address.bank as usize].load(
            &mut self.flash,
            address.offset as usize,
            buf,
            &mut self.status,
        );
        self.finish(JobKind::Load, result)
    }

    /// Store `data` at the addressed offset. The rest of the bank's
    /// image is carried forward from the previous record (zeros on first
    /// use). A full bank compacts automatically; compaction failure is
    /// the only way bank-full surfaces to the caller.
    pub fn store(&mut self, address: LogicalAddress, data: &[u8]) -> Result<(), Error> {
        self.guard(address, data.len())?;
        self.job_result = JobResult::Pending;
        let result = self.banks[address.bank as usize].store(
            &mut self.flash,
            address.offset as usize,
            data,
            &mut self.status,
        );
        self.finish(JobKind::Store, result)
    }

    /// Register (or clear, with `None`) the end-of-job callback for one
    /// job type. Fired synchronously today; a DMA-backed flash driver
    /// may fire it from interrupt context instead.
    pub fn set_job_callback(
        &mut self,
        kind: JobKind,
        event_id: u8,
        callback: Option<JobCallback>,
    ) -> Result<(), Error> {
        if !self.initialized {
            return Err(Error::NotInitialized);
        }
        let slot = match kind {
            JobKind::Load => &mut self.load_callback,
            JobKind::Store => &mut self.store_callback,
        };
        *slot = callback.map(|cb| (event_id, cb));
        Ok(())
    }

    /// Result of the most recent job.
    pub fn job_result(&self) -> JobResult {
        if self.initialized {
            self.job_result
        } else {
            JobResult::NotOk
        }
    }

    /// The sticky condition mask.
    pub fn memory_status(&self) -> MemoryStatus {
        self.status
    }

    /// Clear the given status bits, leaving the others set.
    pub fn clear_memory_status(&mut self, mask: u32) {
        self.status.clear(mask);
    }

    /// Wear of one bank in percent of its rated endurance.
    pub fn wear_percent(&self, bank: usize) -> Option<u8> {
        self.banks.get(bank).map(Bank::wear_percent)
    }

    /// Diagnostics counters of one bank.
    pub fn diag(&self, bank: usize) -> Option<&DiagCounters> {
        self.banks.get(bank).map(Bank::diag)
    }

    /// Low-level access to the owned flash device.
    pub fn flash(&mut self) -> &mut F {
        &mut self.flash
    }

    /// Give the flash device back.
    pub fn release(self) -> F {
        self.flash
    }

    fn guard(&self, address: LogicalAddress, len: usize) -> Result<(), Error> {
        if !self.initialized {
            return Err(Error::NotInitialized);
        }
        let Some(bank) = self.banks.get(address.bank as usize) else {
            return Err(Error::InvalidAddress);
        };
        let payload_len = bank.config().payload_len();
        if len > payload_len {
            return Err(Error::InvalidLength);
        }
        if address.offset as usize + len > payload_len {
            return Err(Error::InvalidAddress);
        }
        Ok(())
    }

    /// Record the job outcome and notify. Jobs that reached flash fire
    /// the callback either way; precondition failures do not.
    fn finish(&mut self, kind: JobKind, result: Result<(), Error>) -> Result<(), Error> {
        match &result {
            Ok(()) => {
                self.job_result = JobResult::Ok;
                self.notify(kind);
            }
            Err(Error::Flash(_)) => {
                self.job_result = JobResult::NotOk;
                self.notify(kind);
            }
            Err(_) => {
                self.job_result = JobResult::NotOk;
            }
        }
        result
    }

    fn notify(&self, kind: JobKind) {
        let slot = match kind {
            JobKind::Load => &self.load_callback,
            JobKind::Store => &self.store_callback,
        };
        if let Some((event_id, callback)) = slot {
            callback(*event_id, self.job_result);
        }
    }
}
