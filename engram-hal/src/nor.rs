//! Adapter over `embedded-storage` NOR devices
//!
//! Any blocking [`embedded_storage::nor_flash::NorFlash`] implementation
//! (on-chip flash, SPI NOR drivers, ...) can back the emulation core
//! through [`NorFlashAdapter`]. Failed programs and erases are retried
//! within the per-class budgets from [`crate::flash`] before being
//! reported as [`FlashError::Timeout`].

use embedded_storage::nor_flash::{NorFlash, NorFlashError, NorFlashErrorKind};

use crate::flash::{
    EraseRegion, EraseUnit, FlashAccess, FlashError, PAGE_PROGRAM_MAX_ATTEMPTS,
};

/// Wraps a blocking `embedded-storage` NOR device as a [`FlashAccess`].
pub struct NorFlashAdapter<T> {
    inner: T,
}

impl<T> NorFlashAdapter<T> {
    /// Wrap a NOR device.
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    /// Get the wrapped device back.
    pub fn release(self) -> T {
        self.inner
    }

    /// Access the wrapped device.
    pub fn inner_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

fn map_err<E: NorFlashError>(err: E) -> FlashError {
    match err.kind() {
        NorFlashErrorKind::NotAligned => FlashError::NotAligned,
        NorFlashErrorKind::OutOfBounds => FlashError::OutOfBounds,
        _ => FlashError::Io,
    }
}

impl<T: NorFlash> FlashAccess for NorFlashAdapter<T> {
    fn erase_granularity(&self) -> u32 {
        T::ERASE_SIZE as u32
    }

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        self.inner.read(address, buf).map_err(map_err)
    }

    fn program(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        for _ in 0..PAGE_PROGRAM_MAX_ATTEMPTS {
            match self.inner.write(address, data) {
                Ok(()) => return Ok(()),
                // Alignment and bounds will not improve on retry
                Err(e) => match map_err(e) {
                    err @ (FlashError::NotAligned | FlashError::OutOfBounds) => return Err(err),
                    _ => continue,
                },
            }
        }
        Err(FlashError::Timeout)
    }

    fn erase(&mut self, region: EraseRegion) -> Result<(), FlashError> {
        let attempts = EraseUnit::covering(region.length).max_attempts();
        for _ in 0..attempts {
            match self.inner.erase(region.start, region.end()) {
                Ok(()) => return Ok(()),
                Err(e) => match map_err(e) {
                    err @ (FlashError::NotAligned | FlashError::OutOfBounds) => return Err(err),
                    _ => continue,
                },
            }
        }
        Err(FlashError::Timeout)
    }
}
