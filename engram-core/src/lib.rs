//! EEPROM emulation over block-erasable flash
//!
//! Flash only flips bits one way; erase is the only way back, and it is
//! block-sized and endurance-limited. This crate emulates small
//! byte-addressable EEPROM on top of that, in two flavors:
//!
//! - [`eeprom::Eeprom`]: a multi-bank, checksum-and-signature-protected
//!   record log. Each store appends a sequence-numbered snapshot of the
//!   bank's whole data image; each load reads the newest valid one. When
//!   a bank's active plane fills up, the image is compacted into the
//!   erased twin plane.
//! - [`twopage::VariableStore`]: the classic two-page scheme for 16-bit
//!   variables, with a persisted per-page status word and
//!   per-virtual-address last-writer-wins reads.
//!
//! Both recover from power loss purely by rescanning flash content:
//! nothing in RAM is ever trusted across a reset.
//!
//! Callers must serialize access externally; no internal locking is
//! performed. `&mut self` on every operation makes a second in-flight
//! operation unrepresentable within one context, but separate contexts
//! over the same flash region are undefined behavior by contract.

#![no_std]
#![deny(unsafe_code)]

pub mod bank;
pub mod checksum;
pub mod config;
pub mod eeprom;
pub mod record;
pub mod scanner;
pub mod status;
pub mod twopage;
pub mod wear;

use engram_hal::FlashError;

/// Errors surfaced by the emulation core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// No valid record/variable exists yet; the caller supplies a default
    NotFound,
    /// Neither page of a pair carries a valid status word
    NoValidPage,
    /// No free entry slot left while completing a page transfer
    PageFull,
    /// The context has not been initialized (or was deinitialized)
    NotInitialized,
    /// Bank index or data offset outside the configured layout
    InvalidAddress,
    /// Length exceeds the configured payload size
    InvalidLength,
    /// Rejected configuration
    Config(config::ConfigError),
    /// Flash-level failure, propagated verbatim
    Flash(FlashError),
}

impl From<FlashError> for Error {
    fn from(err: FlashError) -> Self {
        Error::Flash(err)
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err)
    }
}
