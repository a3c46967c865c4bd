// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Tessera Authors

//! Persistent code store: an append-only log in non-volatile storage.
//!
//! The store owns two equal half-spaces. Each begins with the header word
//! `'S'<<24 | cycleCount` and is followed by records of the form:
//!
//! ```text
//! word 0   'R'<<24 | recType<<16 | id<<8 | extra
//! word 1   wordCount of the data that follows
//! word 2.. wordCount little-endian data words
//! ```
//!
//! Appends advance a free pointer through the active half. When a record
//! does not fit, the newest live information for every chunk, variable,
//! and comment id is copied into the other half (tombstones suppress
//! everything they shadow) and the new half's cycle-count header is
//! written **last**: that single word commits the compaction. At boot the
//! half with the larger cycle count is active; its free pointer is found
//! by scanning records until erased flash or a bad header appears.
//!
//! Returned record addresses are word indices into the flash address
//! space. The runtime reads bytecode in place through
//! [`CodeStore::read_word`], so a stored chunk executes directly from
//! flash.
//!
//! Half-space geometry is a parameter: flash page sizes differ per board,
//! and the only hard requirement is that a half-space is a whole number of
//! erase units.


use crate::platform::{ERASED_WORD, Flash};
use tessera_abi::chunk::ATTRIBUTE_COUNT;
use tessera_abi::record::{HALF_SPACE_TAG, RECORD_HEADER_WORDS, RECORD_TAG, RecordType};

#[cfg(any(test, feature = "std"))]
use std::vec::Vec;

#[cfg(not(any(test, feature = "std")))]
use alloc::vec::Vec;

/// Store geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreConfig {
    /// Words per half-space; must be a multiple of the flash erase unit.
    pub half_space_words: usize,
}

/// Why a store could not be built on the given flash.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreError {
    /// The half-space is not a whole number of erase units.
    MisalignedHalfSpace {
        /// Requested half-space size in words.
        half_space_words: usize,
        /// The flash erase unit in words.
        erase_unit_words: usize,
    },
    /// The flash cannot hold two half-spaces of the requested size.
    InsufficientFlash {
        /// Words needed for both half-spaces.
        needed_words: usize,
        /// Words the flash actually has.
        flash_words: usize,
    },
}

/// One record found in the active half-space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Record {
    /// Word address of the record header.
    pub addr: usize,
    /// Raw record type byte (may be unassigned on corrupt media).
    pub type_byte: u8,
    /// Chunk, variable, or comment id.
    pub id: u8,
    /// Record-specific extra byte (chunk type, attribute id).
    pub extra: u8,
    /// Data words following the two header words.
    pub word_count: usize,
}

impl Record {
    /// The decoded record type, if assigned.
    #[must_use]
    pub fn record_type(&self) -> Option<RecordType> {
        RecordType::from_byte(self.type_byte)
    }

    /// Word address of the first data word.
    #[must_use]
    pub fn data_addr(&self) -> usize {
        self.addr + RECORD_HEADER_WORDS
    }
}

/// The result of a successful append.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Appended {
    /// Word address of the new record's header.
    pub addr: usize,
    /// True when the append forced a compaction first. Every record
    /// address handed out earlier is invalid; tables referencing the
    /// store must be rebuilt.
    pub compacted: bool,
}

/// Append-only half-space log over a [`Flash`] device.
#[derive(Debug)]
pub struct CodeStore<F: Flash> {
    flash: F,
    half_space: usize,
    current: usize,
    free_ptr: usize,
}

impl<F: Flash> CodeStore<F> {
    /// Open (or initialize) the store on the given flash.
    ///
    /// # Errors
    /// Fails when the geometry does not fit the device.
    pub fn new(flash: F, config: StoreConfig) -> Result<Self, StoreError> {
        let half = config.half_space_words;
        if half == 0 || half % flash.erase_unit_words() != 0 {
            return Err(StoreError::MisalignedHalfSpace {
                half_space_words: half,
                erase_unit_words: flash.erase_unit_words(),
            });
        }
        if flash.word_count() < 2 * half {
            return Err(StoreError::InsufficientFlash {
                needed_words: 2 * half,
                flash_words: flash.word_count(),
            });
        }
        let mut store = Self {
            flash,
            half_space: half,
            current: 0,
            free_ptr: 1,
        };
        store.start_up();
        Ok(store)
    }

    /// Release the flash device (test reboots re-open it).
    #[must_use]
    pub fn into_flash(self) -> F {
        self.flash
    }

    /// The active half-space (0 or 1).
    #[must_use]
    pub fn current_half(&self) -> usize {
        self.current
    }

    /// Cycle count of the given half-space, or zero when uninitialized.
    #[must_use]
    pub fn cycle_count(&self, half: usize) -> u32 {
        let word = self.flash.read_word(self.half_start(half));
        if (word >> 24) as u8 == HALF_SPACE_TAG {
            word & 0x00FF_FFFF
        } else {
            0
        }
    }

    /// Words used in the active half, including its cycle header.
    #[must_use]
    pub fn used_words(&self) -> usize {
        self.free_ptr - self.half_start(self.current)
    }

    /// Words still free in the active half.
    #[must_use]
    pub fn free_words(&self) -> usize {
        self.half_end(self.current) - self.free_ptr
    }

    /// Read one word of the flash address space.
    #[inline]
    #[must_use]
    pub fn read_word(&self, addr: usize) -> u32 {
        self.flash.read_word(addr)
    }

    /// One past the highest readable word address.
    #[inline]
    #[must_use]
    pub fn word_limit(&self) -> usize {
        self.flash.word_count()
    }

    /// Iterate the records of the active half, oldest first.
    pub fn records(&self) -> impl Iterator<Item = Record> + '_ {
        let mut next = self.record_after(None);
        core::iter::from_fn(move || {
            let addr = next?;
            next = self.record_after(Some(addr));
            Some(self.record_at(addr))
        })
    }

    /// Append a record; compacts first when the active half is full.
    ///
    /// Returns `None` when the record does not fit even after compaction.
    pub fn append(
        &mut self,
        rec_type: RecordType,
        id: u8,
        extra: u8,
        data: &[u8],
    ) -> Option<Appended> {
        let word_count = data.len().div_ceil(4);
        let mut compacted = false;
        if self.free_ptr + RECORD_HEADER_WORDS + word_count > self.half_end(self.current) {
            self.compact();
            compacted = true;
            if self.free_ptr + RECORD_HEADER_WORDS + word_count > self.half_end(self.current) {
                return None;
            }
        }

        let addr = self.free_ptr;
        self.flash.unlock();
        self.flash.write_word(
            addr,
            (u32::from(RECORD_TAG) << 24)
                | (u32::from(rec_type as u8) << 16)
                | (u32::from(id) << 8)
                | u32::from(extra),
        );
        self.flash.write_word(addr + 1, word_count as u32);
        for (i, chunk) in data.chunks(4).enumerate() {
            let mut le = [0u8; 4];
            le[..chunk.len()].copy_from_slice(chunk);
            self.flash
                .write_word(addr + RECORD_HEADER_WORDS + i, u32::from_le_bytes(le));
        }
        self.flash.lock();

        self.free_ptr = addr + RECORD_HEADER_WORDS + word_count;
        Some(Appended { addr, compacted })
    }

    /// Copy the bytes of a record's data (padding included up to
    /// `4 * word_count`).
    #[must_use]
    pub fn record_bytes(&self, record: &Record) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 * record.word_count);
        for i in 0..record.word_count {
            bytes.extend_from_slice(&self.flash.read_word(record.data_addr() + i).to_le_bytes());
        }
        bytes
    }

    /// Erase the inactive half, switch to it, and bump the cycle count.
    /// Discards every record.
    pub fn clear(&mut self) {
        let count = self.cycle_count(0).max(self.cycle_count(1));
        let target = 1 - self.current;
        self.erase_half(target);
        self.set_cycle_count(target, count + 1);
        self.current = target;
        self.free_ptr = self.half_start(target) + 1;
    }

    /// Copy the newest live record set into the other half and commit it.
    ///
    /// Record addresses handed out before this call are invalid afterward.
    pub fn compact(&mut self) {
        let mut chunk_done = [false; 256];
        let mut var_done = [false; 256];
        let mut comment_done = [false; 256];

        let target = 1 - self.current;
        self.erase_half(target);
        let mut dst = self.half_start(target) + 1;

        self.flash.unlock();
        let mut src = self.record_after(None);
        while let Some(addr) = src {
            let record = self.record_at(addr);
            if let Some(rec_type) = record.record_type() {
                let id = usize::from(record.id);
                if rec_type.is_chunk_record() && !chunk_done[id] {
                    dst = self.copy_chunk_info(record.id, addr, dst);
                    chunk_done[id] = true;
                } else if rec_type.is_var_record() && !var_done[id] {
                    dst = self.copy_var_info(record.id, addr, dst);
                    var_done[id] = true;
                } else if rec_type.is_comment_record() && !comment_done[id] {
                    dst = self.copy_comment_info(record.id, addr, dst);
                    comment_done[id] = true;
                }
            }
            src = self.record_after(Some(addr));
        }
        self.flash.lock();

        // writing the new cycle count last commits the compaction
        self.set_cycle_count(target, self.cycle_count(self.current) + 1);
        self.current = target;
        self.free_ptr = dst;
    }

    // --- half-space geometry ---

    #[inline]
    fn half_start(&self, half: usize) -> usize {
        half * self.half_space
    }

    #[inline]
    fn half_end(&self, half: usize) -> usize {
        (half + 1) * self.half_space
    }

    fn erase_half(&mut self, half: usize) {
        self.flash.erase(self.half_start(half), self.half_end(half));
    }

    fn set_cycle_count(&mut self, half: usize, count: u32) {
        self.flash.unlock();
        self.flash.write_word(
            self.half_start(half),
            (u32::from(HALF_SPACE_TAG) << 24) | (count & 0x00FF_FFFF),
        );
        self.flash.lock();
    }

    // --- boot ---

    /// Pick the active half and find the free pointer, initializing the
    /// store on first boot.
    fn start_up(&mut self) {
        let c0 = self.cycle_count(0);
        let c1 = self.cycle_count(1);

        if c0 == 0 && c1 == 0 {
            // flash has never held a store; erase it all
            self.flash.erase(0, 2 * self.half_space);
            self.set_cycle_count(0, 1);
            self.current = 0;
            self.free_ptr = self.half_start(0) + 1;
            return;
        }

        self.current = usize::from(c1 > c0);
        let end = self.half_end(self.current);
        let mut p = self.half_start(self.current) + 1;
        while p < end && self.flash.read_word(p) != ERASED_WORD {
            if (self.flash.read_word(p) >> 24) as u8 != RECORD_TAG {
                break; // bad record: free space starts here
            }
            p += self.flash.read_word(p + 1) as usize + RECORD_HEADER_WORDS;
        }
        self.free_ptr = p.min(end);
    }

    // --- record traversal ---

    fn record_at(&self, addr: usize) -> Record {
        let header = self.flash.read_word(addr);
        Record {
            addr,
            type_byte: (header >> 16) as u8,
            id: (header >> 8) as u8,
            extra: header as u8,
            word_count: self.flash.read_word(addr + 1) as usize,
        }
    }

    /// The record after `prev` in the active half, or the first record
    /// when `prev` is `None`.
    fn record_after(&self, prev: Option<usize>) -> Option<usize> {
        let end = self.half_end(self.current);
        let p = match prev {
            None => self.half_start(self.current) + 1,
            Some(addr) => {
                if addr >= end || (self.flash.read_word(addr) >> 24) as u8 != RECORD_TAG {
                    return None;
                }
                addr + self.flash.read_word(addr + 1) as usize + RECORD_HEADER_WORDS
            }
        };
        if p + 1 < end && (self.flash.read_word(p) >> 24) as u8 == RECORD_TAG {
            Some(p)
        } else {
            None
        }
    }

    // --- compaction helpers ---

    /// Copy `word_count + 2` words of the record at `src` to `dst`;
    /// returns the next destination.
    fn copy_record(&mut self, src: usize, dst: usize) -> usize {
        let total = self.flash.read_word(src + 1) as usize + RECORD_HEADER_WORDS;
        for i in 0..total {
            let word = self.flash.read_word(src + i);
            self.flash.write_word(dst + i, word);
        }
        dst + total
    }

    /// Gather the newest live records for chunk `id`, starting from its
    /// first occurrence, and copy them to the target half.
    fn copy_chunk_info(&mut self, id: u8, first: usize, mut dst: usize) -> usize {
        let mut code = None;
        let mut position = None;
        let mut source = None;
        let mut attributes = [None; ATTRIBUTE_COUNT as usize];

        let mut src = Some(first);
        while let Some(addr) = src {
            let record = self.record_at(addr);
            if record.id == id {
                match record.record_type() {
                    Some(RecordType::ChunkCode) => code = Some(addr),
                    Some(RecordType::ChunkPosition) => position = Some(addr),
                    Some(RecordType::ChunkSource) => source = Some(addr),
                    Some(RecordType::ChunkAttribute) => {
                        if let Some(slot) = attributes.get_mut(usize::from(record.extra)) {
                            *slot = Some(addr);
                        }
                    }
                    Some(RecordType::ChunkDeleted) => {
                        code = None;
                        position = None;
                        source = None;
                        attributes = [None; ATTRIBUTE_COUNT as usize];
                    }
                    _ => {}
                }
            }
            src = self.record_after(Some(addr));
        }

        if let Some(code_addr) = code {
            dst = self.copy_record(code_addr, dst);
            if let Some(addr) = position {
                dst = self.copy_record(addr, dst);
            }
            if let Some(addr) = source {
                dst = self.copy_record(addr, dst);
            }
            for addr in attributes.into_iter().flatten() {
                dst = self.copy_record(addr, dst);
            }
        }
        dst
    }

    /// Gather the newest live records for variable `id` and copy them.
    fn copy_var_info(&mut self, id: u8, first: usize, mut dst: usize) -> usize {
        let mut value = None;
        let mut name = None;

        let mut src = Some(first);
        while let Some(addr) = src {
            let record = self.record_at(addr);
            if record.id == id {
                match record.record_type() {
                    Some(RecordType::VarValue) => value = Some(addr),
                    Some(RecordType::VarName) => name = Some(addr),
                    Some(RecordType::VarDeleted) => {
                        value = None;
                        name = None;
                    }
                    _ => {}
                }
            }
            src = self.record_after(Some(addr));
        }

        // a variable may have a name but no stored value
        if let Some(addr) = name {
            dst = self.copy_record(addr, dst);
        }
        if let Some(addr) = value {
            dst = self.copy_record(addr, dst);
        }
        dst
    }

    /// Gather the newest live records for comment `id` and copy them.
    fn copy_comment_info(&mut self, id: u8, first: usize, mut dst: usize) -> usize {
        let mut comment = None;
        let mut position = None;

        let mut src = Some(first);
        while let Some(addr) = src {
            let record = self.record_at(addr);
            if record.id == id {
                match record.record_type() {
                    Some(RecordType::Comment) => comment = Some(addr),
                    Some(RecordType::CommentPosition) => position = Some(addr),
                    Some(RecordType::CommentDeleted) => {
                        comment = None;
                        position = None;
                    }
                    _ => {}
                }
            }
            src = self.record_after(Some(addr));
        }

        if let Some(addr) = comment {
            dst = self.copy_record(addr, dst);
            if let Some(addr) = position {
                dst = self.copy_record(addr, dst);
            }
        }
        dst
    }
}
