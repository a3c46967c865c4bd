// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Tessera Authors

//! Miscellaneous primitives (the `"misc"` set).

use super::PrimEntry;
use crate::platform::{Flash, Platform};
use crate::runtime::Machine;
use crate::value::{Obj, ObjType};
use tessera_abi::error::ErrorCode;

#[cfg(any(test, feature = "std"))]
use std::{vec, vec::Vec};

#[cfg(not(any(test, feature = "std")))]
use alloc::{vec, vec::Vec};

/// The `"misc"` primitive set, in coordinate order.
pub fn entries<F: Flash, P: Platform>() -> Vec<PrimEntry<F, P>> {
    vec![PrimEntry { name: "hexToInt", func: prim_hex_to_int }]
}

/// `hexToInt(string)`: parse hexadecimal, with an optional leading `#`.
/// The result must fit the 30-bit signed range.
pub(crate) fn prim_hex_to_int<F: Flash, P: Platform>(m: &mut Machine<F, P>, args: &[Obj]) -> Obj {
    let Some(&arg) = args.first() else {
        return m.fail(ErrorCode::NeedsString);
    };
    if !arg.is_reference() || m.type_of(arg) != ObjType::String {
        return m.fail(ErrorCode::NeedsString);
    }

    let bytes = m.string_bytes(arg);
    let mut i = 0;
    if bytes.first() == Some(&b'#') {
        i += 1;
    }
    let negative = bytes.get(i) == Some(&b'-');
    if negative {
        i += 1;
    }

    // parse leading hex digits; trailing junk is ignored
    let mut value: i64 = 0;
    while let Some(&b) = bytes.get(i) {
        let Some(digit) = (b as char).to_digit(16) else {
            break;
        };
        value = value * 16 + i64::from(digit);
        if value > 0x3FFF_FFFF {
            return m.fail(ErrorCode::HexRange);
        }
        i += 1;
    }
    if negative {
        value = -value;
    }
    if !(-536_870_912..=536_870_911).contains(&value) {
        return m.fail(ErrorCode::HexRange);
    }
    Obj::int(value as i32)
}
