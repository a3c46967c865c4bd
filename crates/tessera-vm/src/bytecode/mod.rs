// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Tessera Authors

//! Bytecode format for the Tessera VM.
//!
//! Instructions are fixed 32-bit words: the low 8 bits are the opcode, the
//! high 24 bits an immediate argument (signed for jumps and immediates,
//! unsigned for indices). `PushBigImmediate` is followed by one extra word
//! carrying a full value. Literal pools are inlined in the instruction
//! stream: `PushLiteral` carries a signed word offset from the next
//! instruction to the literal's header word.
//!
//! `CallFunction` packs its operands into the 24-bit argument:
//!
//! ```text
//! arg = localCount << 16 | argCount << 8 | calleeChunkIndex
//! ```
//!
//! and the `Primitive` opcode packs a registry coordinate the same way:
//!
//! ```text
//! arg = argCount << 16 | setId << 8 | primIndex
//! ```


use crate::value::{Obj, ObjType, header};
use num_enum::{TryFromPrimitive, TryFromPrimitiveError};

#[cfg(any(test, feature = "std"))]
use std::vec::Vec;

#[cfg(not(any(test, feature = "std")))]
use alloc::vec::Vec;

/// Bytecode opcodes (low byte of each instruction word).
// `TryFromPrimitive` is implemented by hand below instead of derived: the
// `Primitive` variant's name collides with the trait's associated type of
// the same name, which the derive's generated code writes as an unqualified
// `Self::Primitive` and rustc rejects as ambiguous (rust-lang/rust#57644).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    /// Stop this task.
    Halt = 0,
    /// Do nothing.
    Noop = 1,
    /// Push the 24-bit sign-extended value word.
    PushImmediate = 2,
    /// Push the full value in the following word.
    PushBigImmediate = 3,
    /// Push a reference to the inline literal at `ip + arg`.
    PushLiteral = 4,
    /// Push global variable `arg`.
    PushVar = 5,
    /// Pop into global variable `arg`.
    PopVar = 6,
    /// Add the popped value to global variable `arg`.
    IncrementVar = 7,
    /// Push the current call's argument count.
    PushArgCount = 8,
    /// Push function argument `arg`.
    PushArg = 9,
    /// Push local variable `arg`.
    PushLocal = 10,
    /// Pop into local variable `arg`.
    PopLocal = 11,
    /// Add the popped value to local variable `arg`.
    IncrementLocal = 12,
    /// Drop `arg` values from the stack.
    Pop = 13,
    /// Relative jump; a backward jump yields.
    Jmp = 14,
    /// Pop; jump if true (a taken backward jump yields).
    JmpTrue = 15,
    /// Pop; jump if false (a taken backward jump yields).
    JmpFalse = 16,
    /// Decrement the loop counter on the stack; jump back while positive.
    DecrementAndJmp = 17,
    /// Call the user function chunk packed into the argument.
    CallFunction = 18,
    /// Return the top of stack from a function or finish the task.
    ReturnResult = 19,
    /// Sleep for the popped number of microseconds.
    WaitMicros = 20,
    /// Sleep for the popped number of milliseconds.
    WaitMillis = 21,
    /// Print the top `arg` values to the IDE console.
    PrintIt = 22,
    /// Stop every task.
    StopAll = 23,
    Add = 24,
    Subtract = 25,
    Multiply = 26,
    Divide = 27,
    LessThan = 28,
    /// Allocate an array; size on the stack.
    NewArray = 29,
    /// Allocate a byte array; size on the stack.
    NewByteArray = 30,
    /// Fill an array or byte array with a value.
    FillArray = 31,
    /// 1-based indexed read from a list, string, or byte array.
    At = 32,
    /// 1-based indexed store into a list or byte array.
    AtPut = 33,
    AnalogRead = 34,
    AnalogWrite = 35,
    DigitalRead = 36,
    DigitalWrite = 37,
    SetLed = 38,
    /// Push the microsecond clock (low 30 bits).
    Micros = 39,
    /// Push the millisecond clock.
    Millis = 40,
    Peek = 41,
    Poke = 42,
    Modulo = 43,
    LessOrEq = 44,
    Equal = 45,
    GreaterOrEq = 46,
    GreaterThan = 47,
    Not = 48,
    /// Show the top value in the IDE next to this script.
    SayIt = 49,
    AnalogPins = 50,
    DigitalPins = 51,
    HexToInt = 52,
    I2cGet = 53,
    I2cSet = 54,
    /// Variadic registry dispatch; coordinate packed into the argument.
    Primitive = 55,
}

impl TryFromPrimitive for Op {
    type Primitive = u8;
    type Error = TryFromPrimitiveError<Self>;

    const NAME: &'static str = "Op";

    fn try_from_primitive(
        number: <Self as TryFromPrimitive>::Primitive,
    ) -> Result<Self, <Self as TryFromPrimitive>::Error> {
        match number {
            0 => Ok(Self::Halt),
            1 => Ok(Self::Noop),
            2 => Ok(Self::PushImmediate),
            3 => Ok(Self::PushBigImmediate),
            4 => Ok(Self::PushLiteral),
            5 => Ok(Self::PushVar),
            6 => Ok(Self::PopVar),
            7 => Ok(Self::IncrementVar),
            8 => Ok(Self::PushArgCount),
            9 => Ok(Self::PushArg),
            10 => Ok(Self::PushLocal),
            11 => Ok(Self::PopLocal),
            12 => Ok(Self::IncrementLocal),
            13 => Ok(Self::Pop),
            14 => Ok(Self::Jmp),
            15 => Ok(Self::JmpTrue),
            16 => Ok(Self::JmpFalse),
            17 => Ok(Self::DecrementAndJmp),
            18 => Ok(Self::CallFunction),
            19 => Ok(Self::ReturnResult),
            20 => Ok(Self::WaitMicros),
            21 => Ok(Self::WaitMillis),
            22 => Ok(Self::PrintIt),
            23 => Ok(Self::StopAll),
            24 => Ok(Self::Add),
            25 => Ok(Self::Subtract),
            26 => Ok(Self::Multiply),
            27 => Ok(Self::Divide),
            28 => Ok(Self::LessThan),
            29 => Ok(Self::NewArray),
            30 => Ok(Self::NewByteArray),
            31 => Ok(Self::FillArray),
            32 => Ok(Self::At),
            33 => Ok(Self::AtPut),
            34 => Ok(Self::AnalogRead),
            35 => Ok(Self::AnalogWrite),
            36 => Ok(Self::DigitalRead),
            37 => Ok(Self::DigitalWrite),
            38 => Ok(Self::SetLed),
            39 => Ok(Self::Micros),
            40 => Ok(Self::Millis),
            41 => Ok(Self::Peek),
            42 => Ok(Self::Poke),
            43 => Ok(Self::Modulo),
            44 => Ok(Self::LessOrEq),
            45 => Ok(Self::Equal),
            46 => Ok(Self::GreaterOrEq),
            47 => Ok(Self::GreaterThan),
            48 => Ok(Self::Not),
            49 => Ok(Self::SayIt),
            50 => Ok(Self::AnalogPins),
            51 => Ok(Self::DigitalPins),
            52 => Ok(Self::HexToInt),
            53 => Ok(Self::I2cGet),
            54 => Ok(Self::I2cSet),
            55 => Ok(Self::Primitive),
            _ => Err(TryFromPrimitiveError::new(number)),
        }
    }
}

impl core::convert::TryFrom<u8> for Op {
    type Error = TryFromPrimitiveError<Self>;

    #[inline]
    fn try_from(number: u8) -> Result<Self, Self::Error> {
        <Self as TryFromPrimitive>::try_from_primitive(number)
    }
}

/// Pack an instruction word.
#[inline]
#[must_use]
pub const fn op_word(op: Op, arg: i32) -> u32 {
    ((arg as u32) << 8) | (op as u32 & 0xFF)
}

/// The opcode byte of an instruction word.
#[inline]
#[must_use]
pub const fn opcode(word: u32) -> u8 {
    (word & 0xFF) as u8
}

/// The 24-bit argument, sign-extended.
#[inline]
#[must_use]
pub const fn arg(word: u32) -> i32 {
    (word as i32) >> 8
}

/// Pack a `CallFunction` instruction.
#[inline]
#[must_use]
pub const fn call_word(chunk_index: u8, arg_count: u8, local_count: u8) -> u32 {
    ((local_count as u32) << 24)
        | ((arg_count as u32) << 16)
        | ((chunk_index as u32) << 8)
        | (Op::CallFunction as u32)
}

/// Pack a `Primitive` instruction for the registry coordinate
/// `(set_id, prim_index)` with `arg_count` stack arguments.
#[inline]
#[must_use]
pub const fn primitive_word(set_id: u8, prim_index: u8, arg_count: u8) -> u32 {
    ((arg_count as u32) << 24)
        | ((set_id as u32) << 16)
        | ((prim_index as u32) << 8)
        | (Op::Primitive as u32)
}

/// Words for an inline String literal: header, UTF-8 bytes, NUL, padding.
///
/// Compilers append these after the code and reference them with
/// `PushLiteral`.
#[must_use]
pub fn string_literal_words(s: &str) -> Vec<u32> {
    let bytes = s.as_bytes();
    let word_count = (bytes.len() + 1).div_ceil(4);
    let mut padded = Vec::with_capacity(word_count * 4);
    padded.extend_from_slice(bytes);
    padded.resize(word_count * 4, 0);

    let mut words = Vec::with_capacity(word_count + 1);
    words.push(header(ObjType::String, word_count as u32));
    for chunk in padded.chunks_exact(4) {
        words.push(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }
    words
}

/// Encode a value for `PushImmediate` if it fits in the 24-bit argument.
///
/// Booleans always fit; integers fit when their tagged encoding survives
/// the 24-bit sign extension. Out-of-range values need
/// `PushBigImmediate`.
#[must_use]
pub fn immediate_arg(value: Obj) -> Option<i32> {
    let word = value.raw() as i32;
    let truncated = (word << 8) >> 8;
    if truncated == word { Some(word) } else { None }
}
