// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Tessera Authors

//! Host protocol framing constants and message types.
//!
//! The VM and the IDE exchange framed messages over one abstract duplex
//! byte channel (serial, BLE, or a test loopback). Two frame kinds exist:
//!
//! - **Short message**, 3 bytes: `0xFA, msgType, chunkOrVarId`
//! - **Long message**: `0xFB, msgType, id, lenLo, lenHi`, then `len` body
//!   bytes whose final byte is the terminator `0xFE` (`len` counts the
//!   terminator)
//!
//! All numeric payload fields are little-endian. All ids fit in one byte.

#[cfg(test)]
mod protocol_test;

/// First byte of a short (3-byte) frame.
pub const SHORT_MESSAGE_START: u8 = 0xFA;

/// First byte of a long (variable-length) frame.
pub const LONG_MESSAGE_START: u8 = 0xFB;

/// Final body byte of every long frame.
pub const MESSAGE_TERMINATOR: u8 = 0xFE;

/// Byte length of a long frame header (start, type, id, lenLo, lenHi).
pub const LONG_HEADER_BYTES: usize = 5;

/// Inter-byte receive timeout in microseconds.
///
/// A truncated frame older than this is abandoned and the receive buffer
/// resynchronizes on the next legal start byte.
pub const RECEIVE_TIMEOUT_USECS: u32 = 20_000;

/// A message type byte.
///
/// Values outside `0x01..=0x20` are never valid; the resynchronization
/// scan uses this to reject frame starts found mid-stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// IDE -> VM (long): store bytecode for a chunk. Body: type byte, code.
    StoreChunk = 1,
    /// IDE -> VM: delete a chunk and stop its task.
    DeleteChunk = 2,
    /// IDE -> VM: start a task for a chunk.
    StartChunk = 3,
    /// IDE -> VM: stop the task for a chunk.
    StopChunk = 4,
    /// IDE -> VM: start tasks for all hat chunks.
    StartAll = 5,
    /// IDE -> VM: stop every task.
    StopAll = 6,
    /// IDE -> VM: report the value of a global variable.
    GetVar = 7,
    /// IDE -> VM: delete a global variable.
    DeleteVar = 8,
    /// IDE -> VM: delete an IDE comment.
    DeleteComment = 9,
    /// IDE -> VM: delete every chunk.
    DeleteAllCode = 14,
    /// IDE -> VM: reboot the board.
    SystemReset = 15,
    /// VM -> IDE: a task was started for a chunk.
    TaskStarted = 16,
    /// VM -> IDE: a task finished without a value.
    TaskDone = 17,
    /// VM -> IDE: a task finished with a value. Body: typed value.
    TaskReturnedValue = 18,
    /// VM -> IDE: a task failed. Body: error code byte, 4-byte location.
    TaskError = 19,
    /// VM -> IDE: output from say/print. Body: typed value.
    OutputValue = 20,
    /// VM -> IDE: the value of a requested variable. Body: typed value.
    ArgValue = 21,
    /// VM -> IDE: VM version and board type string.
    Version = 22,
    /// IDE -> VM (long): editor position for a chunk (4 bytes).
    ChunkPosition = 23,
    /// IDE -> VM (long): a chunk attribute. Body: attribute id, data.
    ChunkAttribute = 24,
    /// IDE -> VM (long): the name of a global variable.
    VarName = 25,
    /// IDE -> VM (long): an IDE comment.
    Comment = 26,
    /// IDE -> VM: request the version string.
    GetVersion = 27,
    /// IDE -> VM (long): editor position for a comment (4 bytes).
    CommentPosition = 28,
}

impl MessageType {
    /// Decode a message type byte. Returns `None` for unassigned values.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            1 => Self::StoreChunk,
            2 => Self::DeleteChunk,
            3 => Self::StartChunk,
            4 => Self::StopChunk,
            5 => Self::StartAll,
            6 => Self::StopAll,
            7 => Self::GetVar,
            8 => Self::DeleteVar,
            9 => Self::DeleteComment,
            14 => Self::DeleteAllCode,
            15 => Self::SystemReset,
            16 => Self::TaskStarted,
            17 => Self::TaskDone,
            18 => Self::TaskReturnedValue,
            19 => Self::TaskError,
            20 => Self::OutputValue,
            21 => Self::ArgValue,
            22 => Self::Version,
            23 => Self::ChunkPosition,
            24 => Self::ChunkAttribute,
            25 => Self::VarName,
            26 => Self::Comment,
            27 => Self::GetVersion,
            28 => Self::CommentPosition,
            _ => return None,
        })
    }

    /// True if this byte could begin any assigned or future message type.
    ///
    /// Used during resynchronization: a start byte is only trusted when the
    /// byte after it falls in this range.
    #[inline]
    #[must_use]
    pub const fn in_valid_range(byte: u8) -> bool {
        byte >= 0x01 && byte <= 0x20
    }
}

/// Value type discriminators used in typed payloads
/// (`OutputValue`, `TaskReturnedValue`, `ArgValue`).
pub mod value_type {
    /// 32-bit little-endian signed integer.
    pub const INTEGER: u8 = 1;
    /// UTF-8 string bytes.
    pub const STRING: u8 = 2;
    /// One byte, 0 or 1.
    pub const BOOLEAN: u8 = 3;
}
