// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Tessera Authors

//! Primitive registry: the seam between the interpreter and collaborators.
//!
//! Primitives are reached two ways:
//!
//! - **By name**: collaborators register named sets of `{name, fn}`
//!   entries with [`Registry::add_primitive_set`]. A compiler resolves
//!   `(set name, primitive name)` to a `(set id, index)` coordinate once
//!   at load time; the `Primitive` opcode carries that coordinate and
//!   dispatch is one table lookup.
//! - **By fixed opcode**: board I/O opcodes (`analogRead`, `digitalWrite`,
//!   `i2cGet`, `peek`, ...) dispatch through a slot table that boards fill
//!   in at startup. An unfilled slot fails the task with
//!   `primitiveNotImplemented`, so the core runs unchanged on boards
//!   without the peripheral.
//!
//! Every primitive has the same shape: it receives the machine and its
//! popped arguments, validates, may allocate, and either returns a value
//! or records an error through [`Machine::fail`] and returns the false
//! sentinel. Primitives that return nothing useful return false by
//! convention.


pub mod data;
pub mod misc;

use crate::platform::{Flash, Platform};
use crate::runtime::Machine;
use crate::value::Obj;

#[cfg(any(test, feature = "std"))]
use std::vec::Vec;

#[cfg(not(any(test, feature = "std")))]
use alloc::vec::Vec;

/// Maximum arguments a primitive call can pop.
pub const MAX_PRIM_ARGS: usize = 16;

/// Set id of the built-in data primitives.
pub const DATA_PRIMS: u8 = 0;

/// Set id of the built-in misc primitives.
pub const MISC_PRIMS: u8 = 1;

/// A primitive: validates its arguments, may allocate, may fail.
pub type PrimFn<F, P> = fn(&mut Machine<F, P>, &[Obj]) -> Obj;

/// One named entry of a primitive set.
pub struct PrimEntry<F: Flash, P: Platform> {
    /// Name the compiler resolves against.
    pub name: &'static str,
    /// The implementation.
    pub func: PrimFn<F, P>,
}

struct PrimSet<F: Flash, P: Platform> {
    id: u8,
    name: &'static str,
    entries: Vec<PrimEntry<F, P>>,
}

/// Board I/O slots addressed by fixed opcodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum BoardSlot {
    /// `analogRead(pin)`
    AnalogRead = 0,
    /// `analogWrite(pin, value)`
    AnalogWrite = 1,
    /// `digitalRead(pin)`
    DigitalRead = 2,
    /// `digitalWrite(pin, bool)`
    DigitalWrite = 3,
    /// `setLED(bool)`
    SetLed = 4,
    /// number of analog pins
    AnalogPins = 5,
    /// number of digital pins
    DigitalPins = 6,
    /// `i2cGet(device, register)`
    I2cGet = 7,
    /// `i2cSet(device, register, value)`
    I2cSet = 8,
    /// `peek(address)`
    Peek = 9,
    /// `poke(address, value)`
    Poke = 10,
}

const BOARD_SLOT_COUNT: usize = 11;

/// Name -> function tables shared by the interpreter and collaborators.
pub struct Registry<F: Flash, P: Platform> {
    sets: Vec<PrimSet<F, P>>,
    board: [Option<PrimFn<F, P>>; BOARD_SLOT_COUNT],
}

impl<F: Flash, P: Platform> Registry<F, P> {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sets: Vec::new(),
            board: [None; BOARD_SLOT_COUNT],
        }
    }

    /// A registry with the core `data` and `misc` sets installed.
    #[must_use]
    pub fn with_core_sets() -> Self {
        let mut registry = Self::new();
        registry.add_primitive_set(DATA_PRIMS, "data", data::entries());
        registry.add_primitive_set(MISC_PRIMS, "misc", misc::entries());
        registry
    }

    /// Register (or replace) a primitive set.
    pub fn add_primitive_set(
        &mut self,
        set_id: u8,
        set_name: &'static str,
        entries: Vec<PrimEntry<F, P>>,
    ) {
        self.sets.retain(|s| s.id != set_id);
        self.sets.push(PrimSet {
            id: set_id,
            name: set_name,
            entries,
        });
    }

    /// Resolve `(set name, primitive name)` to an opcode coordinate.
    /// Compilers call this once at load time.
    #[must_use]
    pub fn find(&self, set_name: &str, prim_name: &str) -> Option<(u8, u8)> {
        let set = self.sets.iter().find(|s| s.name == set_name)?;
        let index = set.entries.iter().position(|e| e.name == prim_name)?;
        Some((set.id, index as u8))
    }

    /// The function at a coordinate, if any.
    #[must_use]
    pub fn lookup(&self, set_id: u8, index: u8) -> Option<PrimFn<F, P>> {
        let set = self.sets.iter().find(|s| s.id == set_id)?;
        set.entries.get(usize::from(index)).map(|e| e.func)
    }

    /// Install a board I/O implementation.
    pub fn set_board_slot(&mut self, slot: BoardSlot, func: PrimFn<F, P>) {
        self.board[slot as usize] = Some(func);
    }

    /// The board implementation for a slot, if registered.
    #[must_use]
    pub fn board_slot(&self, slot: BoardSlot) -> Option<PrimFn<F, P>> {
        self.board[slot as usize]
    }
}

impl<F: Flash, P: Platform> Default for Registry<F, P> {
    fn default() -> Self {
        Self::new()
    }
}
