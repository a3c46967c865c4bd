// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Tessera Authors

//! # Tessera VM
//!
//! The on-device virtual machine of Tessera, a live tile-based programming
//! environment for microcontrollers.
//!
//! This crate provides:
//! - Tagged 32-bit value representation and object memory with an optional
//!   mark-sweep-compact collector
//! - Bytecode format and a stack-machine interpreter
//! - Cooperative task scheduler (up to 16 tasks, round-robin, yield at
//!   suspension points only)
//! - Append-only persistent code store with half-space compaction
//! - Framed host-IDE wire protocol over one abstract duplex channel
//! - Primitive registry through which board collaborators plug in
//!
//! Board-specific peripherals, the IDE, and boot glue live outside this
//! crate and interact with it only through the [`platform`] traits and the
//! [`prims`] registry.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[cfg(any(test, feature = "std"))]
extern crate std;

#[cfg(not(any(test, feature = "std")))]
extern crate alloc;

pub mod bytecode;
pub mod interp;
pub mod mem;
pub mod persist;
pub mod platform;
pub mod prims;
pub mod runtime;
pub mod value;

// Re-export commonly used types at crate root
pub use mem::ObjMem;
pub use persist::{CodeStore, StoreConfig};
pub use platform::{Flash, Platform};
pub use runtime::{Machine, Task, TaskStatus};
pub use value::{Obj, ObjType};

/// VM version reported to the IDE.
pub const VM_VERSION: &str = "v001";
