// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Tessera Authors

//! Tests for chunk types and attributes.

use super::{ATTRIBUTE_COUNT, ChunkAttribute, ChunkType};

#[test]
fn chunk_type_round_trip() {
    for byte in 0..=5u8 {
        let t = ChunkType::from_byte(byte);
        assert_eq!(t as u8, byte);
    }
}

#[test]
fn unknown_chunk_type_is_unused() {
    assert_eq!(ChunkType::from_byte(200), ChunkType::Unused);
    assert_eq!(ChunkType::default(), ChunkType::Unused);
}

#[test]
fn only_hats_start_on_start_all() {
    assert!(ChunkType::StartHat.starts_on_start_all());
    assert!(ChunkType::WhenConditionHat.starts_on_start_all());
    assert!(!ChunkType::Command.starts_on_start_all());
    assert!(!ChunkType::Reporter.starts_on_start_all());
    assert!(!ChunkType::FunctionHat.starts_on_start_all());
    assert!(!ChunkType::Unused.starts_on_start_all());
}

#[test]
fn attribute_ids_bounded() {
    for byte in 0..ATTRIBUTE_COUNT {
        assert!(ChunkAttribute::from_byte(byte).is_some());
    }
    assert!(ChunkAttribute::from_byte(ATTRIBUTE_COUNT).is_none());
}
