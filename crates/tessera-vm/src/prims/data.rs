// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Tessera Authors

//! List, byte array, and string primitives (the `"data"` set).
//!
//! Indexing is 1-based everywhere. String indexing counts Unicode code
//! points, not bytes. The index argument of `at`, `atPut`, and `delete`
//! also accepts the keywords `"last"`, `"random"` (`at` only), and
//! `"all"` (`atPut`/`delete`), plus numeric strings.

use super::PrimEntry;
use crate::platform::{Flash, Platform};
use crate::runtime::Machine;
use crate::value::{Obj, ObjType};
use tessera_abi::error::ErrorCode;

#[cfg(any(test, feature = "std"))]
use std::{vec, vec::Vec};

#[cfg(not(any(test, feature = "std")))]
use alloc::{vec, vec::Vec};

/// The `"data"` primitive set, in coordinate order.
pub fn entries<F: Flash, P: Platform>() -> Vec<PrimEntry<F, P>> {
    vec![
        PrimEntry { name: "makeList", func: prim_make_list },
        PrimEntry { name: "newList", func: prim_new_list },
        PrimEntry { name: "range", func: prim_range },
        PrimEntry { name: "addLast", func: prim_add_last },
        PrimEntry { name: "delete", func: prim_delete },
        PrimEntry { name: "join", func: prim_join },
        PrimEntry { name: "split", func: prim_split },
        PrimEntry { name: "copyFromTo", func: prim_copy_from_to },
        PrimEntry { name: "find", func: prim_find },
        PrimEntry { name: "length", func: prim_length },
        PrimEntry { name: "joinStrings", func: prim_join_strings },
        PrimEntry { name: "unicodeAt", func: prim_unicode_at },
        PrimEntry { name: "unicodeString", func: prim_unicode_string },
        PrimEntry { name: "newByteArray", func: prim_new_byte_array },
        PrimEntry { name: "asByteArray", func: prim_as_byte_array },
        PrimEntry { name: "freeMemory", func: prim_free_memory },
    ]
}

// --- UTF-8 helpers ---

/// Offset of the code point after the one starting at `i` (identity at
/// the end of the buffer).
pub(crate) fn next_utf8(bytes: &[u8], i: usize) -> usize {
    if i >= bytes.len() {
        return i;
    }
    let first = bytes[i];
    if first < 0x80 {
        return i + 1;
    }
    let mut j = i + 1;
    while j < bytes.len() && bytes[j] & 0xC0 == 0x80 {
        j += 1;
    }
    j
}

/// Number of code points in the buffer.
pub(crate) fn count_utf8(bytes: &[u8]) -> usize {
    let mut count = 0;
    let mut i = 0;
    while i < bytes.len() {
        i = next_utf8(bytes, i);
        count += 1;
    }
    count
}

/// The code point starting at `i`, or -1 for a malformed sequence.
pub(crate) fn code_point_at(bytes: &[u8], i: usize) -> i32 {
    let b = |k: usize| i32::from(*bytes.get(i + k).unwrap_or(&0));
    let first = b(0);
    if first < 0x80 {
        first
    } else if first < 0xE0 {
        ((first & 0x1F) << 6) | (b(1) & 0x3F)
    } else if first < 0xF0 {
        ((first & 0x0F) << 12) | ((b(1) & 0x3F) << 6) | (b(2) & 0x3F)
    } else if first < 0xF8 {
        ((first & 0x07) << 18) | ((b(1) & 0x3F) << 12) | ((b(2) & 0x3F) << 6) | (b(3) & 0x3F)
    } else {
        -1
    }
}

/// UTF-8 length of a code point; zero for values outside Unicode.
pub(crate) fn bytes_for_code_point(cp: i32) -> usize {
    if cp < 0 {
        0
    } else if cp < 0x80 {
        1
    } else if cp < 0x800 {
        2
    } else if cp < 0x10000 {
        3
    } else if cp < 0x11_0000 {
        4
    } else {
        0
    }
}

/// Append the UTF-8 encoding of `cp` (ignored when out of range).
pub(crate) fn append_utf8(out: &mut Vec<u8>, cp: i32) {
    match bytes_for_code_point(cp) {
        1 => out.push(cp as u8),
        2 => {
            out.push(0xC0 | ((cp >> 6) & 0x1F) as u8);
            out.push(0x80 | (cp & 0x3F) as u8);
        }
        3 => {
            out.push(0xE0 | ((cp >> 12) & 0x0F) as u8);
            out.push(0x80 | ((cp >> 6) & 0x3F) as u8);
            out.push(0x80 | (cp & 0x3F) as u8);
        }
        4 => {
            out.push(0xF0 | ((cp >> 18) & 0x07) as u8);
            out.push(0x80 | ((cp >> 12) & 0x3F) as u8);
            out.push(0x80 | ((cp >> 6) & 0x3F) as u8);
            out.push(0x80 | (cp & 0x3F) as u8);
        }
        _ => {}
    }
}

// --- shared helpers ---

/// Parse a decimal integer from string bytes (optional leading minus).
pub(crate) fn parse_int_bytes(bytes: &[u8]) -> Option<i32> {
    if bytes.is_empty() {
        return None;
    }
    let (negative, digits) = match bytes[0] {
        b'-' => (true, &bytes[1..]),
        _ => (false, bytes),
    };
    if digits.is_empty() {
        return None;
    }
    let mut n: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return None;
        }
        n = n * 10 + i64::from(b - b'0');
        if n > i64::from(i32::MAX) {
            return None;
        }
    }
    Some(if negative { -(n as i32) } else { n as i32 })
}

/// Logical element count of a list (clamped to its capacity).
pub(crate) fn list_count<F: Flash, P: Platform>(m: &Machine<F, P>, list: Obj) -> usize {
    let stored = m.mem.field(list, 0).as_int();
    let capacity = m.mem.words_of(list) as usize - 1;
    (stored.max(0) as usize).min(capacity)
}

fn is_heap_list<F: Flash, P: Platform>(m: &Machine<F, P>, obj: Obj) -> bool {
    obj.is_heap_reference() && m.type_of(obj) == ObjType::List
}

fn is_heap_array<F: Flash, P: Platform>(m: &Machine<F, P>, obj: Obj) -> bool {
    obj.is_heap_reference() && m.type_of(obj) == ObjType::Array
}

fn is_heap_byte_array<F: Flash, P: Platform>(m: &Machine<F, P>, obj: Obj) -> bool {
    obj.is_heap_reference() && m.type_of(obj) == ObjType::ByteArray
}

fn is_string<F: Flash, P: Platform>(m: &Machine<F, P>, obj: Obj) -> bool {
    obj.is_reference() && m.type_of(obj) == ObjType::String
}

/// Allocate, or record `insufficientMemory` and return `None`.
fn alloc_or_fail<F: Flash, P: Platform>(
    m: &mut Machine<F, P>,
    obj_type: ObjType,
    words: u32,
    fill: Obj,
) -> Option<Obj> {
    let obj = m.mem.alloc(obj_type, words, fill);
    if obj.is_none() {
        m.fail(ErrorCode::InsufficientMemory);
    }
    obj
}

fn new_string_or_fail<F: Flash, P: Platform>(m: &mut Machine<F, P>, bytes: &[u8]) -> Option<Obj> {
    let obj = m.mem.new_string(bytes);
    if obj.is_none() {
        m.fail(ErrorCode::InsufficientMemory);
    }
    obj
}

/// How `at`-family primitives resolved their index argument.
enum Index {
    /// A 1-based position, already range-checked.
    Position(usize),
    /// The `"all"` keyword.
    All,
}

/// Resolve an index argument against a sequence of `count` elements.
///
/// Returns `None` with an error recorded on failure. `"random"` and
/// `"all"` are only legal where the caller says so.
fn resolve_index<F: Flash, P: Platform>(
    m: &mut Machine<F, P>,
    arg: Obj,
    count: usize,
    allow_random: bool,
    allow_all: bool,
) -> Option<Index> {
    let i: i64 = if arg.is_int() {
        i64::from(arg.as_int())
    } else if is_string(m, arg) {
        let bytes = m.string_bytes(arg);
        if allow_all && bytes == b"all" {
            return Some(Index::All);
        }
        if bytes == b"last" {
            count as i64
        } else if allow_random && bytes == b"random" {
            if count == 0 {
                m.fail(ErrorCode::IndexOutOfRange);
                return None;
            }
            (m.next_random() as usize % count + 1) as i64
        } else if let Some(n) = parse_int_bytes(&bytes) {
            i64::from(n)
        } else {
            m.fail(ErrorCode::NeedsIntegerIndex);
            return None;
        }
    } else {
        m.fail(ErrorCode::NeedsIntegerIndex);
        return None;
    };

    if i < 1 || i > count as i64 {
        m.fail(ErrorCode::IndexOutOfRange);
        return None;
    }
    Some(Index::Position(i as usize))
}

// --- primitives ---

/// `makeList(items...)`: a new list holding the arguments.
pub(crate) fn prim_make_list<F: Flash, P: Platform>(m: &mut Machine<F, P>, args: &[Obj]) -> Obj {
    let Some(list) = alloc_or_fail(m, ObjType::List, args.len() as u32 + 1, Obj::FALSE) else {
        return Obj::FALSE;
    };
    m.mem.set_field(list, 0, Obj::int(args.len() as i32));
    for (i, &item) in args.iter().enumerate() {
        m.mem.set_field(list, i + 1, item);
    }
    list
}

/// `newList(size?, fill?)`: a list of `size` copies of `fill`.
pub(crate) fn prim_new_list<F: Flash, P: Platform>(m: &mut Machine<F, P>, args: &[Obj]) -> Obj {
    let count = args.first().filter(|a| a.is_int()).map_or(0, |a| a.as_int()).max(0);
    let fill = args.get(1).copied().unwrap_or(Obj::zero());
    let Some(list) = alloc_or_fail(m, ObjType::List, count as u32 + 1, fill) else {
        return Obj::FALSE;
    };
    m.mem.set_field(list, 0, Obj::int(count));
    list
}

/// `range(start, end, incr?)`: a list counting from start to end.
pub(crate) fn prim_range<F: Flash, P: Platform>(m: &mut Machine<F, P>, args: &[Obj]) -> Obj {
    if args.len() < 2 {
        return m.fail(ErrorCode::NeedsInteger);
    }
    let start = m.eval_int(args[0]);
    let end = m.eval_int(args[1]);
    let mut incr = if args.len() > 2 { m.eval_int(args[2]) } else { 1 };
    if m.pending_error().is_error() {
        return Obj::FALSE;
    }
    if incr < 1 {
        return m.fail(ErrorCode::NeedsNonNegative);
    }

    let count = if end >= start {
        (end - start) / incr + 1
    } else {
        let n = (start - end) / incr + 1;
        incr = -incr;
        n
    };
    let Some(list) = alloc_or_fail(m, ObjType::List, count as u32 + 1, Obj::FALSE) else {
        return Obj::FALSE;
    };
    m.mem.set_field(list, 0, Obj::int(count));
    let mut n = start;
    for i in 0..count as usize {
        m.mem.set_field(list, i + 1, Obj::int(n));
        n = n.wrapping_add(incr);
    }
    list
}

/// `at(index, sequence)`: 1-based read (opcode `At` lands here too).
pub(crate) fn prim_at<F: Flash, P: Platform>(m: &mut Machine<F, P>, args: &[Obj]) -> Obj {
    if args.len() < 2 {
        return m.fail(ErrorCode::NeedsIntegerIndex);
    }
    let obj = args[1];

    let count = if is_heap_list(m, obj) {
        list_count(m, obj)
    } else if is_string(m, obj) {
        count_utf8(&m.string_bytes(obj))
    } else if obj.is_reference() && m.type_of(obj) == ObjType::ByteArray {
        m.byte_array_len(obj)
    } else if is_heap_array(m, obj) {
        m.mem.words_of(obj) as usize
    } else {
        return m.fail(ErrorCode::NeedsArray);
    };

    let i = match resolve_index(m, args[0], count, true, false) {
        Some(Index::Position(i)) => i,
        _ => return Obj::FALSE,
    };

    if is_heap_list(m, obj) {
        m.mem.field(obj, i)
    } else if is_string(m, obj) {
        let bytes = m.string_bytes(obj);
        let mut start = 0;
        for _ in 1..i {
            start = next_utf8(&bytes, start);
        }
        let end = next_utf8(&bytes, start);
        match new_string_or_fail(m, &bytes[start..end]) {
            Some(s) => s,
            None => Obj::FALSE,
        }
    } else if is_heap_array(m, obj) {
        m.mem.field(obj, i - 1)
    } else {
        Obj::int(i32::from(m.payload_byte(obj, i - 1)))
    }
}

/// `atPut(index, sequence, value)`: 1-based store (opcode `AtPut`).
pub(crate) fn prim_at_put<F: Flash, P: Platform>(m: &mut Machine<F, P>, args: &[Obj]) -> Obj {
    if args.len() < 3 {
        return m.fail(ErrorCode::NeedsIntegerIndex);
    }
    let obj = args[1];
    let value = args[2];

    let (count, byte_value) = if is_heap_list(m, obj) {
        (list_count(m, obj), 0)
    } else if is_heap_array(m, obj) {
        (m.mem.words_of(obj) as usize, 0)
    } else if is_heap_byte_array(m, obj) {
        if !value.is_int() {
            return m.fail(ErrorCode::ByteArrayStore);
        }
        let b = value.as_int();
        if !(0..=255).contains(&b) {
            return m.fail(ErrorCode::ByteArrayStore);
        }
        (m.byte_array_len(obj), b as u8)
    } else {
        return m.fail(ErrorCode::NeedsArray);
    };

    let i = match resolve_index(m, args[0], count, false, true) {
        Some(Index::Position(i)) => i,
        Some(Index::All) => {
            for i in 1..=count {
                if is_heap_byte_array(m, obj) {
                    m.mem.set_payload_byte(obj, i - 1, byte_value);
                } else if is_heap_list(m, obj) {
                    m.mem.set_field(obj, i, value);
                } else {
                    m.mem.set_field(obj, i - 1, value);
                }
            }
            return Obj::FALSE;
        }
        None => return Obj::FALSE,
    };

    if is_heap_list(m, obj) {
        m.mem.set_field(obj, i, value);
    } else if is_heap_array(m, obj) {
        m.mem.set_field(obj, i - 1, value);
    } else {
        m.mem.set_payload_byte(obj, i - 1, byte_value);
    }
    Obj::FALSE
}

/// `fillArray(sequence, value)` (opcode `FillArray`).
pub(crate) fn prim_fill<F: Flash, P: Platform>(m: &mut Machine<F, P>, args: &[Obj]) -> Obj {
    if args.len() < 2 {
        return m.fail(ErrorCode::NeedsArray);
    }
    let obj = args[0];
    let value = args[1];

    if is_heap_list(m, obj) {
        let count = list_count(m, obj);
        for i in 1..=count {
            m.mem.set_field(obj, i, value);
        }
    } else if is_heap_array(m, obj) {
        let count = m.mem.words_of(obj) as usize;
        for i in 0..count {
            m.mem.set_field(obj, i, value);
        }
    } else if is_heap_byte_array(m, obj) {
        if !value.is_int() {
            return m.fail(ErrorCode::ByteArrayStore);
        }
        let b = value.as_int();
        if !(0..=255).contains(&b) {
            return m.fail(ErrorCode::ByteArrayStore);
        }
        let len = m.byte_array_len(obj);
        for i in 0..len {
            m.mem.set_payload_byte(obj, i, b as u8);
        }
    } else {
        return m.fail(ErrorCode::NeedsArray);
    }
    Obj::FALSE
}

/// `length(sequence)`.
pub(crate) fn prim_length<F: Flash, P: Platform>(m: &mut Machine<F, P>, args: &[Obj]) -> Obj {
    let Some(&obj) = args.first() else {
        return m.fail(ErrorCode::NeedsArray);
    };
    if is_heap_list(m, obj) {
        Obj::int(list_count(m, obj) as i32)
    } else if obj.is_reference() && m.type_of(obj) == ObjType::ByteArray {
        Obj::int(m.byte_array_len(obj) as i32)
    } else if is_string(m, obj) {
        Obj::int(count_utf8(&m.string_bytes(obj)) as i32)
    } else if is_heap_array(m, obj) {
        Obj::int(m.mem.words_of(obj) as i32)
    } else {
        Obj::zero()
    }
}

/// `addLast(item, list)`: append, growing the list when full.
pub(crate) fn prim_add_last<F: Flash, P: Platform>(m: &mut Machine<F, P>, args: &[Obj]) -> Obj {
    if args.len() < 2 {
        return m.fail(ErrorCode::NeedsArray);
    }
    let mut item = args[0];
    let mut list = args[1];
    if !is_heap_list(m, list) {
        return m.fail(ErrorCode::NeedsArray);
    }

    let count = list_count(m, list);
    let capacity = m.mem.words_of(list) as usize - 1;
    if count >= capacity {
        let grow_by = ((count / 3) as u32).clamp(3, 100);
        let old = list;
        match m.resize_with_roots(list, m.mem.words_of(list) + grow_by) {
            Some(new_list) => {
                list = new_list;
                if item == old {
                    item = new_list; // a list may contain itself
                }
            }
            None => return m.fail(ErrorCode::InsufficientMemory),
        }
    }

    m.mem.set_field(list, count + 1, item);
    m.mem.set_field(list, 0, Obj::int(count as i32 + 1));
    Obj::FALSE
}

/// `delete(index, list)`: remove item(s); the tail shifts left and the
/// vacated slot is cleared to zero.
pub(crate) fn prim_delete<F: Flash, P: Platform>(m: &mut Machine<F, P>, args: &[Obj]) -> Obj {
    if args.len() < 2 {
        return m.fail(ErrorCode::NeedsArray);
    }
    let list = args[1];
    if !is_heap_list(m, list) {
        return m.fail(ErrorCode::NeedsArray);
    }
    let count = list_count(m, list);

    let mut i = match resolve_index(m, args[0], count, false, true) {
        Some(Index::Position(i)) => i,
        Some(Index::All) => {
            for i in 0..=count {
                m.mem.set_field(list, i, Obj::zero());
            }
            return Obj::FALSE;
        }
        None => return Obj::FALSE,
    };

    while i < count {
        let next = m.mem.field(list, i + 1);
        m.mem.set_field(list, i, next);
        i += 1;
    }
    m.mem.set_field(list, count, Obj::zero());
    m.mem.set_field(list, 0, Obj::int(count as i32 - 1));
    Obj::FALSE
}

/// `join(a, b, ...)`: concatenation driven by the first argument's type.
pub(crate) fn prim_join<F: Flash, P: Platform>(m: &mut Machine<F, P>, args: &[Obj]) -> Obj {
    if args.len() < 2 {
        return m.fail(ErrorCode::JoinArgsNotSameType);
    }
    let first = args[0];

    if is_heap_list(m, first) {
        let mut total = 0;
        for &arg in args {
            if !is_heap_list(m, arg) {
                return m.fail(ErrorCode::JoinArgsNotSameType);
            }
            total += list_count(m, arg);
        }
        let Some(result) = alloc_or_fail(m, ObjType::List, total as u32 + 1, Obj::zero()) else {
            return Obj::FALSE;
        };
        m.mem.set_field(result, 0, Obj::int(total as i32));
        let mut dst = 1;
        for &arg in args {
            for i in 1..=list_count(m, arg) {
                let item = m.mem.field(arg, i);
                m.mem.set_field(result, dst, item);
                dst += 1;
            }
        }
        result
    } else if first.is_reference() && m.type_of(first) == ObjType::ByteArray {
        let mut bytes: Vec<u8> = Vec::new();
        for &arg in args {
            if arg.is_reference() && m.type_of(arg) == ObjType::ByteArray {
                let len = m.byte_array_len(arg);
                bytes.extend((0..len).map(|i| m.payload_byte(arg, i)));
            } else if is_string(m, arg) {
                bytes.extend(m.string_bytes(arg));
            } else {
                return m.fail(ErrorCode::JoinArgsNotSameType);
            }
        }
        match m.mem.new_byte_array(bytes.len(), 0) {
            Some(result) => {
                for (i, &b) in bytes.iter().enumerate() {
                    m.mem.set_payload_byte(result, i, b);
                }
                result
            }
            None => m.fail(ErrorCode::InsufficientMemory),
        }
    } else {
        let mut bytes: Vec<u8> = Vec::new();
        for &arg in args {
            if !append_text_of(m, arg, &mut bytes) {
                return m.fail(ErrorCode::JoinArgsNotSameType);
            }
        }
        match new_string_or_fail(m, &bytes) {
            Some(s) => s,
            None => Obj::FALSE,
        }
    }
}

/// Append the textual form of a string, int, boolean, or byte array.
/// Returns false for types `join` cannot stringify.
fn append_text_of<F: Flash, P: Platform>(m: &Machine<F, P>, arg: Obj, out: &mut Vec<u8>) -> bool {
    if is_string(m, arg) {
        out.extend(m.string_bytes(arg));
    } else if arg.is_int() {
        let mut buf = [0u8; 12];
        out.extend_from_slice(format_int(arg.as_int(), &mut buf));
    } else if arg.is_boolean() {
        out.push(if arg == Obj::TRUE { b'1' } else { b'0' });
    } else if arg.is_reference() && m.type_of(arg) == ObjType::ByteArray {
        let len = m.byte_array_len(arg);
        out.extend((0..len).map(|i| m.payload_byte(arg, i)));
    } else {
        return false;
    }
    true
}

/// Format a signed integer into the buffer, returning the used slice.
fn format_int(n: i32, buf: &mut [u8; 12]) -> &[u8] {
    let mut i = buf.len();
    let negative = n < 0;
    let mut v = i64::from(n).unsigned_abs();
    loop {
        i -= 1;
        buf[i] = b'0' + (v % 10) as u8;
        v /= 10;
        if v == 0 {
            break;
        }
    }
    if negative {
        i -= 1;
        buf[i] = b'-';
    }
    &buf[i..]
}

/// `split(string, delimiter)`: list of substrings. An empty delimiter
/// explodes into single-character strings.
pub(crate) fn prim_split<F: Flash, P: Platform>(m: &mut Machine<F, P>, args: &[Obj]) -> Obj {
    if args.len() < 2 {
        return m.fail(ErrorCode::NeedsString);
    }
    if !is_string(m, args[0]) || !is_string(m, args[1]) {
        return m.fail(ErrorCode::NeedsString);
    }
    let s = m.string_bytes(args[0]);
    let delim = m.string_bytes(args[1]);

    let pieces: Vec<&[u8]> = if delim.is_empty() {
        let mut out = Vec::new();
        let mut i = 0;
        while i < s.len() {
            let j = next_utf8(&s, i);
            out.push(&s[i..j]);
            i = j;
        }
        out
    } else {
        let mut out = Vec::new();
        let mut start = 0;
        let mut i = 0;
        while i + delim.len() <= s.len() {
            if &s[i..i + delim.len()] == delim.as_slice() {
                out.push(&s[start..i]);
                i += delim.len();
                start = i;
            } else {
                i += 1;
            }
        }
        out.push(&s[start..]);
        out
    };

    let Some(list) = alloc_or_fail(m, ObjType::List, pieces.len() as u32 + 1, Obj::zero()) else {
        return Obj::FALSE;
    };
    m.mem.set_field(list, 0, Obj::int(pieces.len() as i32));

    // anchor the list in the scratch root while the items allocate
    m.scratch = list;
    for (i, piece) in pieces.iter().enumerate() {
        let Some(item) = new_string_or_fail(m, piece) else {
            m.scratch = Obj::FALSE;
            return Obj::FALSE;
        };
        let list = m.scratch;
        m.mem.set_field(list, i + 1, item);
    }
    let list = m.scratch;
    m.scratch = Obj::FALSE;
    list
}

/// `joinStrings(list, separator?)`.
pub(crate) fn prim_join_strings<F: Flash, P: Platform>(m: &mut Machine<F, P>, args: &[Obj]) -> Obj {
    let Some(&list) = args.first() else {
        return m.fail(ErrorCode::NeedsArray);
    };
    if !is_heap_list(m, list) {
        return m.fail(ErrorCode::NeedsArray);
    }
    let count = list_count(m, list);
    if count == 0 {
        return match new_string_or_fail(m, b"") {
            Some(s) => s,
            None => Obj::FALSE,
        };
    }
    let separator = match args.get(1) {
        Some(&sep) if is_string(m, sep) => m.string_bytes(sep),
        _ => Vec::new(),
    };

    let mut bytes: Vec<u8> = Vec::new();
    for i in 1..=count {
        let item = m.mem.field(list, i);
        if !append_text_of(m, item, &mut bytes) {
            return m.fail(ErrorCode::NeedsString);
        }
        if i < count {
            bytes.extend_from_slice(&separator);
        }
    }
    match new_string_or_fail(m, &bytes) {
        Some(s) => s,
        None => Obj::FALSE,
    }
}

/// `copyFromTo(sequence, start, end?)`: 1-based inclusive slice copy.
pub(crate) fn prim_copy_from_to<F: Flash, P: Platform>(m: &mut Machine<F, P>, args: &[Obj]) -> Obj {
    if args.len() < 2 {
        return m.fail(ErrorCode::NeedsInteger);
    }
    if !args[1].is_int() || (args.len() > 2 && !args[2].is_int()) {
        return m.fail(ErrorCode::NeedsInteger);
    }
    let start = args[1].as_int().max(1) as usize;
    let src = args[0];

    if is_heap_list(m, src) {
        let len = list_count(m, src);
        let end = args.get(2).map_or(len, |e| e.as_int().max(0) as usize).min(len);
        let result_len = end.saturating_sub(start - 1);
        let Some(result) = alloc_or_fail(m, ObjType::List, result_len as u32 + 1, Obj::zero())
        else {
            return Obj::FALSE;
        };
        m.mem.set_field(result, 0, Obj::int(result_len as i32));
        for (dst, i) in (start..=end).enumerate() {
            let item = m.mem.field(src, i);
            m.mem.set_field(result, dst + 1, item);
        }
        result
    } else if is_string(m, src) {
        let bytes = m.string_bytes(src);
        let len = count_utf8(&bytes);
        let end = args.get(2).map_or(len, |e| e.as_int().max(0) as usize).min(len);
        if start > end {
            return match new_string_or_fail(m, b"") {
                Some(s) => s,
                None => Obj::FALSE,
            };
        }
        let mut from = 0;
        for _ in 1..start {
            from = next_utf8(&bytes, from);
        }
        let mut to = from;
        for _ in start..=end {
            to = next_utf8(&bytes, to);
        }
        match new_string_or_fail(m, &bytes[from..to]) {
            Some(s) => s,
            None => Obj::FALSE,
        }
    } else if src.is_reference() && m.type_of(src) == ObjType::ByteArray {
        let len = m.byte_array_len(src);
        let end = args.get(2).map_or(len, |e| e.as_int().max(0) as usize).min(len);
        let result_len = end.saturating_sub(start - 1);
        match m.mem.new_byte_array(result_len, 0) {
            Some(result) => {
                for (dst, i) in (start..=end).enumerate() {
                    let b = m.payload_byte(src, i - 1);
                    m.mem.set_payload_byte(result, dst, b);
                }
                result
            }
            None => m.fail(ErrorCode::InsufficientMemory),
        }
    } else {
        m.fail(ErrorCode::NeedsArray)
    }
}

/// `find(sought, in, startOffset?)`: 1-based index or -1.
pub(crate) fn prim_find<F: Flash, P: Platform>(m: &mut Machine<F, P>, args: &[Obj]) -> Obj {
    if args.len() < 2 {
        return m.fail(ErrorCode::NeedsString);
    }
    let sought = args[0];
    let target = args[1];
    let start = args
        .get(2)
        .filter(|a| a.is_int())
        .map_or(1, |a| a.as_int())
        .max(1) as usize;

    if is_string(m, target) {
        if !is_string(m, sought) {
            return m.fail(ErrorCode::NeedsString);
        }
        let s = m.string_bytes(target);
        let needle = m.string_bytes(sought);
        if needle.is_empty() || start > s.len() {
            return Obj::int(-1);
        }
        let mut i = start - 1;
        while i + needle.len() <= s.len() {
            if &s[i..i + needle.len()] == needle.as_slice() {
                // report the position in code points, not bytes
                return Obj::int(count_utf8(&s[..i]) as i32 + 1);
            }
            i += 1;
        }
        Obj::int(-1)
    } else if is_heap_list(m, target) {
        let count = list_count(m, target);
        for i in start..=count {
            let item = m.mem.field(target, i);
            if item == sought
                || (is_string(m, sought) && is_string(m, item) && m.strings_equal(sought, item))
            {
                return Obj::int(i as i32);
            }
        }
        Obj::int(-1)
    } else if target.is_reference() && m.type_of(target) == ObjType::ByteArray {
        let hay_len = m.byte_array_len(target);
        let needle: Vec<u8> = if is_string(m, sought) {
            m.string_bytes(sought)
        } else if sought.is_reference() && m.type_of(sought) == ObjType::ByteArray {
            (0..m.byte_array_len(sought))
                .map(|i| m.payload_byte(sought, i))
                .collect()
        } else {
            return m.fail(ErrorCode::NeedsString);
        };
        if needle.is_empty() || needle.len() > hay_len || start > hay_len {
            return Obj::int(-1);
        }
        let hay: Vec<u8> = (0..hay_len).map(|i| m.payload_byte(target, i)).collect();
        for i in (start - 1)..=(hay_len - needle.len()) {
            if hay[i..i + needle.len()] == needle[..] {
                return Obj::int(i as i32 + 1);
            }
        }
        Obj::int(-1)
    } else {
        m.fail(ErrorCode::NeedsString)
    }
}

/// `unicodeAt(index, string)`: the code point at a 1-based position.
pub(crate) fn prim_unicode_at<F: Flash, P: Platform>(m: &mut Machine<F, P>, args: &[Obj]) -> Obj {
    if args.len() < 2 {
        return m.fail(ErrorCode::NeedsString);
    }
    if !args[0].is_int() {
        return m.fail(ErrorCode::NeedsIntegerIndex);
    }
    if !is_string(m, args[1]) {
        return m.fail(ErrorCode::NeedsString);
    }
    let bytes = m.string_bytes(args[1]);
    let i = args[0].as_int();
    if i < 1 || i as usize > count_utf8(&bytes) {
        return m.fail(ErrorCode::IndexOutOfRange);
    }
    let mut offset = 0;
    for _ in 1..i {
        offset = next_utf8(&bytes, offset);
    }
    Obj::int(code_point_at(&bytes, offset))
}

/// `unicodeString(codePoint | list)`: build a string from code points.
pub(crate) fn prim_unicode_string<F: Flash, P: Platform>(
    m: &mut Machine<F, P>,
    args: &[Obj],
) -> Obj {
    let Some(&arg) = args.first() else {
        return m.fail(ErrorCode::NeedsInteger);
    };

    if arg.is_int() {
        let cp = arg.as_int();
        if bytes_for_code_point(cp) == 0 {
            return m.fail(ErrorCode::InvalidUnicode);
        }
        let mut bytes = Vec::with_capacity(4);
        append_utf8(&mut bytes, cp);
        match new_string_or_fail(m, &bytes) {
            Some(s) => s,
            None => Obj::FALSE,
        }
    } else if is_heap_list(m, arg) {
        let count = list_count(m, arg);
        let mut bytes = Vec::new();
        for i in 1..=count {
            let item = m.mem.field(arg, i);
            if !item.is_int() {
                return m.fail(ErrorCode::NeedsListOfIntegers);
            }
            let cp = item.as_int();
            if bytes_for_code_point(cp) == 0 {
                return m.fail(ErrorCode::InvalidUnicode);
            }
            append_utf8(&mut bytes, cp);
        }
        match new_string_or_fail(m, &bytes) {
            Some(s) => s,
            None => Obj::FALSE,
        }
    } else {
        m.fail(ErrorCode::NeedsInteger)
    }
}

/// `newByteArray(size, fill?)` (opcode `NewByteArray` lands here too).
pub(crate) fn prim_new_byte_array<F: Flash, P: Platform>(
    m: &mut Machine<F, P>,
    args: &[Obj],
) -> Obj {
    let Some(&size) = args.first() else {
        return m.fail(ErrorCode::NeedsInteger);
    };
    if !size.is_int() {
        return m.fail(ErrorCode::NeedsInteger);
    }
    let byte_count = size.as_int().max(0) as usize;

    let fill = match args.get(1) {
        None => 0u8,
        Some(f) => {
            if !f.is_int() {
                return m.fail(ErrorCode::NeedsInteger);
            }
            let b = f.as_int();
            if !(0..=255).contains(&b) {
                return m.fail(ErrorCode::ByteArrayStore);
            }
            b as u8
        }
    };

    match m.mem.new_byte_array(byte_count, fill) {
        Some(b) => b,
        None => m.fail(ErrorCode::InsufficientMemory),
    }
}

/// `asByteArray(x)`: bytes of an int (0-255), string, list, or byte array.
pub(crate) fn prim_as_byte_array<F: Flash, P: Platform>(m: &mut Machine<F, P>, args: &[Obj]) -> Obj {
    let Some(&arg) = args.first() else {
        return m.fail(ErrorCode::NeedsInteger);
    };

    let bytes: Vec<u8> = if arg.is_int() {
        let b = arg.as_int();
        if !(0..=255).contains(&b) {
            return m.fail(ErrorCode::ByteArrayStore);
        }
        vec![b as u8]
    } else if is_string(m, arg) {
        m.string_bytes(arg)
    } else if arg.is_reference() && m.type_of(arg) == ObjType::ByteArray {
        (0..m.byte_array_len(arg))
            .map(|i| m.payload_byte(arg, i))
            .collect()
    } else if is_heap_list(m, arg) {
        let count = list_count(m, arg);
        let mut out = Vec::with_capacity(count);
        for i in 1..=count {
            let item = m.mem.field(arg, i);
            if !item.is_int() {
                return m.fail(ErrorCode::NeedsListOfIntegers);
            }
            let b = item.as_int();
            if !(0..=255).contains(&b) {
                return m.fail(ErrorCode::ByteArrayStore);
            }
            out.push(b as u8);
        }
        out
    } else {
        return m.fail(ErrorCode::NeedsArray);
    };

    match m.mem.new_byte_array(bytes.len(), 0) {
        Some(result) => {
            for (i, &b) in bytes.iter().enumerate() {
                m.mem.set_payload_byte(result, i, b);
            }
            result
        }
        None => m.fail(ErrorCode::InsufficientMemory),
    }
}

/// `freeMemory()`: words left in the object store.
pub(crate) fn prim_free_memory<F: Flash, P: Platform>(m: &mut Machine<F, P>, _args: &[Obj]) -> Obj {
    Obj::int(m.mem.words_free() as i32)
}
