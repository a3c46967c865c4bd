// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Tessera Authors

//! Platform abstraction for the Tessera VM.
//!
//! This module provides the seams between the portable core and a board:
//! a free-running microsecond clock, one duplex byte channel to the host
//! IDE, and word-addressed non-volatile storage for the code store. Mock
//! implementations let every VM component be tested on the host system.


#[cfg(any(test, feature = "std"))]
mod mock;

#[cfg(any(test, feature = "std"))]
pub use mock::{Frame, MockPlatform, RamFlash, parse_frames};

/// The bit pattern of an erased flash word.
pub const ERASED_WORD: u32 = 0xFFFF_FFFF;

/// Word-addressed non-volatile storage.
///
/// The code store divides this space into two equal half-spaces; the
/// half-space size must be a multiple of [`Flash::erase_unit_words`].
/// Implementations range from memory-mapped MCU flash to a backing file;
/// tests use [`RamFlash`].
pub trait Flash {
    /// Total words of storage.
    fn word_count(&self) -> usize;

    /// Words per erase unit (page or sector).
    fn erase_unit_words(&self) -> usize;

    /// Erase `start..end`, leaving every word as [`ERASED_WORD`].
    /// Both bounds are multiples of the erase unit.
    fn erase(&mut self, start: usize, end: usize);

    /// Read one word.
    fn read_word(&self, index: usize) -> u32;

    /// Write one word. Only called between `unlock` and `lock`.
    fn write_word(&mut self, index: usize, word: u32);

    /// Allow modification. Default: nothing to do.
    fn unlock(&mut self) {}

    /// Protect against accidental modification. Default: nothing to do.
    fn lock(&mut self) {}
}

/// Board services: clock, host channel, identity, reset.
pub trait Platform {
    /// Free-running 32-bit microsecond clock; wraps every ~72 minutes.
    fn microsecs(&mut self) -> u32;

    /// Millisecond clock, approximated from the microsecond clock on
    /// boards without a separate timer, so its precision is ~1024 us and
    /// it is effectively 22 bits wide.
    fn millisecs(&mut self) -> u32 {
        self.microsecs() >> 10
    }

    /// Read available bytes from the host channel into `buf`; returns the
    /// byte count. Never blocks.
    fn read_bytes(&mut self, buf: &mut [u8]) -> usize;

    /// True when the channel can accept one outgoing byte.
    fn can_send_byte(&self) -> bool;

    /// Send one byte to the host.
    fn send_byte(&mut self, byte: u8);

    /// Short board identity string reported after the VM version.
    fn board_type(&self) -> &'static str;

    /// Reboot the board. May return in hosted environments.
    fn system_reset(&mut self);
}
