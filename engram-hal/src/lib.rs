//! Flash access boundary for the Engram EEPROM emulation
//!
//! This crate defines the contract the emulation core expects from a
//! physical flash device, without depending on any specific chip or MCU:
//!
//! - The [`FlashAccess`] trait (byte-range read, bit-clearing program,
//!   block erase, blank check, write-protection toggles)
//! - Error and erase-region types shared across implementations
//! - An adapter over any blocking [`embedded_storage`] NOR device
//! - A RAM-backed simulator with fault injection (behind the `mock`
//!   feature) for host-side testing

#![no_std]
#![deny(unsafe_code)]

pub mod flash;
pub mod nor;

#[cfg(feature = "mock")]
pub mod mock;

pub use flash::{EraseRegion, EraseUnit, FlashAccess, FlashError, ERASED_BYTE};
