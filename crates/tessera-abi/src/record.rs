// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Tessera Authors

//! Persistent store record types.
//!
//! The persistent store is an append-only log of records. Each record
//! begins with the header word `'R'<<24 | recType<<16 | id<<8 | extra`
//! followed by a word count and that many little-endian data words.
//!
//! Tombstone types (`ChunkDeleted`, `VarDeleted`, `CommentDeleted`)
//! supersede every earlier record for the same id.


/// Tag byte of every record header word.
pub const RECORD_TAG: u8 = b'R';

/// Tag byte of every half-space cycle-count header word.
pub const HALF_SPACE_TAG: u8 = b'S';

/// Words in a record header (tag word + word count).
pub const RECORD_HEADER_WORDS: usize = 2;

/// The kind of a persistent record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Bytecode for chunk `id`; `extra` carries the chunk type.
    ChunkCode = 10,
    /// Editor position for chunk `id` (4 bytes).
    ChunkPosition = 11,
    /// Source text for chunk `id`.
    ChunkSource = 12,
    /// Attribute `extra` for chunk `id`.
    ChunkAttribute = 13,
    /// Tombstone: chunk `id` and its metadata are gone.
    ChunkDeleted = 19,
    /// Last-written value of variable `id`.
    VarValue = 20,
    /// Name of variable `id`.
    VarName = 21,
    /// Tombstone: variable `id` and its records are gone.
    VarDeleted = 29,
    /// IDE comment `id`.
    Comment = 30,
    /// Editor position for comment `id` (4 bytes).
    CommentPosition = 31,
    /// Tombstone: comment `id` and its records are gone.
    CommentDeleted = 39,
}

impl RecordType {
    /// Decode a record type byte. Returns `None` for unassigned values.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            10 => Self::ChunkCode,
            11 => Self::ChunkPosition,
            12 => Self::ChunkSource,
            13 => Self::ChunkAttribute,
            19 => Self::ChunkDeleted,
            20 => Self::VarValue,
            21 => Self::VarName,
            29 => Self::VarDeleted,
            30 => Self::Comment,
            31 => Self::CommentPosition,
            39 => Self::CommentDeleted,
            _ => return None,
        })
    }

    /// True for record types describing a chunk.
    #[inline]
    #[must_use]
    pub const fn is_chunk_record(self) -> bool {
        matches!(
            self,
            Self::ChunkCode
                | Self::ChunkPosition
                | Self::ChunkSource
                | Self::ChunkAttribute
                | Self::ChunkDeleted
        )
    }

    /// True for record types describing a variable.
    #[inline]
    #[must_use]
    pub const fn is_var_record(self) -> bool {
        matches!(self, Self::VarValue | Self::VarName | Self::VarDeleted)
    }

    /// True for record types describing an IDE comment.
    #[inline]
    #[must_use]
    pub const fn is_comment_record(self) -> bool {
        matches!(
            self,
            Self::Comment | Self::CommentPosition | Self::CommentDeleted
        )
    }

    /// True for tombstones.
    #[inline]
    #[must_use]
    pub const fn is_tombstone(self) -> bool {
        matches!(
            self,
            Self::ChunkDeleted | Self::VarDeleted | Self::CommentDeleted
        )
    }
}
