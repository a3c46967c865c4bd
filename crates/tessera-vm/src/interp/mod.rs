// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Tessera Authors

//! The bytecode interpreter.
//!
//! [`Machine::run_task`] runs one task until it blocks, yields, or
//! completes. Execution state lives in the task table entry; the
//! interpreter works on an [`ExecState`] copy of `(code, ip, sp, fp)` and
//! writes it back at every suspension point:
//!
//! - `halt` or a top-level `returnResult` (task completes)
//! - `waitMicros` / `waitMillis` (task sleeps)
//! - a backward `jmp`, or a **taken** backward `jmpTrue`/`jmpFalse` or
//!   `decrementAndJmp` (the yield that keeps a tight loop from starving
//!   its peers; forward jumps never yield)
//! - `printIt` / `sayIt` with a full output buffer (the instruction
//!   pointer backs up one word so the opcode retries after the yield)
//!
//! A failure leaves an error code on the machine (primitives) or returns
//! it directly (stack and code shape errors); either way the task is
//! retired with a `taskError` message carrying the location word
//! `(ip << 8) | chunkIndex`.
//!
//! Dispatch is a single `match` on the opcode byte. Call frames follow
//! this layout (the stack grows upward):
//!
//! ```text
//! local M-1
//! ...
//! local 0      <- fp: local m is stack[fp + m]
//! old fp       stack[fp - 1]
//! return addr  stack[fp - 2], (ip << 8) | chunkIndex as a tagged int
//! arg count    stack[fp - 3]
//! arg N-1
//! ...
//! arg 0        arg k is stack[fp - argCount - 3 + k]
//! ```

#[cfg(test)]
mod interp_test;

use crate::bytecode::Op;
use crate::platform::{Flash, Platform};
use crate::prims::{self, BoardSlot, MAX_PRIM_ARGS, PrimFn};
use crate::runtime::{Machine, TASK_STACK_WORDS, TaskStatus};
use crate::value::{Obj, ObjType};
use tessera_abi::error::ErrorCode;
use tessera_abi::record::RECORD_HEADER_WORDS;

#[cfg(any(test, feature = "std"))]
use std::string::String;

#[cfg(not(any(test, feature = "std")))]
use alloc::string::String;

/// Longest printed line; a `printIt` needs this much output space free.
const PRINT_BUF_SIZE: usize = 100;

/// The working registers of a running task.
struct ExecState {
    /// Flash word address of the current chunk's record.
    code: usize,
    /// Instruction pointer, in words from `code`.
    ip: usize,
    /// Stack pointer (next free slot).
    sp: usize,
    /// Frame pointer; zero at top level.
    fp: usize,
    /// One past the last readable flash word.
    limit: usize,
}

/// What one instruction asked the dispatch loop to do.
enum Flow {
    /// Keep executing.
    Continue,
    /// Save state and give the scheduler a turn.
    Suspend,
    /// The task table was torn down (`stopAll`); save nothing.
    Stopped,
}

impl<F: Flash, P: Platform> Machine<F, P> {
    /// Run one task until its next suspension point.
    pub(crate) fn run_task(&mut self, t: usize) {
        let mut st = ExecState {
            code: self.tasks[t].code,
            ip: self.tasks[t].ip,
            sp: self.tasks[t].sp,
            fp: self.tasks[t].fp,
            limit: self.store.word_limit(),
        };

        loop {
            match self.exec_one(t, &mut st) {
                Ok(Flow::Continue) => {
                    if self.error.is_error() {
                        let code = self.error;
                        self.error = ErrorCode::NoError;
                        self.retire_with_error(t, &st, code);
                        return;
                    }
                }
                Ok(Flow::Suspend) => {
                    self.tasks[t].ip = st.ip;
                    self.tasks[t].sp = st.sp;
                    self.tasks[t].fp = st.fp;
                    return;
                }
                Ok(Flow::Stopped) => return,
                Err(code) => {
                    self.error = ErrorCode::NoError;
                    self.retire_with_error(t, &st, code);
                    return;
                }
            }
        }
    }

    /// Report a task error with its location and free the task entry.
    fn retire_with_error(&mut self, t: usize, st: &ExecState, code: ErrorCode) {
        let location = ((st.ip as u32) << 8) | u32::from(self.tasks[t].current_chunk_index);
        let hat = self.tasks[t].hat_chunk_index;
        self.send_task_error(hat, code, location);
        self.tasks[t].status = TaskStatus::Unused;
    }

    /// Fetch, decode, and execute one instruction.
    fn exec_one(&mut self, t: usize, st: &mut ExecState) -> Result<Flow, ErrorCode> {
        let fetch = st.code + st.ip;
        if fetch >= st.limit {
            return Err(ErrorCode::Unspecified); // ran off the code store
        }
        let word = self.store.read_word(fetch);
        st.ip += 1;

        let op =
            Op::try_from(crate::bytecode::opcode(word)).map_err(|_| ErrorCode::Unspecified)?;
        let arg = crate::bytecode::arg(word);
        let uarg = (word >> 8) as usize;

        match op {
            Op::Halt => {
                let hat = self.tasks[t].hat_chunk_index;
                self.send_task_done(hat);
                self.tasks[t].status = TaskStatus::Unused;
                return Ok(Flow::Suspend);
            }

            Op::Noop => {}

            Op::PushImmediate => self.push_val(t, st, Obj::reference(arg as u32))?,

            Op::PushBigImmediate => {
                if st.code + st.ip >= st.limit {
                    return Err(ErrorCode::Unspecified);
                }
                let value = self.store.read_word(st.code + st.ip);
                st.ip += 1;
                self.push_val(t, st, Obj::reference(value))?;
            }

            Op::PushLiteral => {
                // arg is a word offset from the next instruction to the
                // literal's header in this chunk's code
                let lit = (st.code + st.ip) as i64 + i64::from(arg);
                if lit < 0 || lit as usize >= st.limit {
                    return Err(ErrorCode::Unspecified);
                }
                self.push_val(t, st, Self::code_ref(lit as usize))?;
            }

            Op::PushVar => {
                let value = self.var(uarg);
                self.push_val(t, st, value)?;
            }

            Op::PopVar => {
                let value = self.pop_val(t, st)?;
                self.set_var(uarg, value);
            }

            Op::IncrementVar => {
                let inc = self.pop_val(t, st)?;
                let inc = self.eval_int(inc);
                let base = self.eval_int(self.var(uarg));
                self.set_var(uarg, Obj::int(base.wrapping_add(inc)));
            }

            Op::PushArgCount => {
                let value = self.tasks[t].stack[slot(st.fp as i64 - 3)?];
                self.push_val(t, st, value)?;
            }

            Op::PushArg => {
                let arg_count = self.tasks[t].stack[slot(st.fp as i64 - 3)?].as_int();
                let idx = slot(st.fp as i64 - i64::from(arg_count) - 3 + i64::from(arg))?;
                let value = self.tasks[t].stack[idx];
                self.push_val(t, st, value)?;
            }

            Op::PushLocal => {
                let value = self.tasks[t].stack[slot(st.fp as i64 + i64::from(arg))?];
                self.push_val(t, st, value)?;
            }

            Op::PopLocal => {
                let value = self.pop_val(t, st)?;
                let idx = slot(st.fp as i64 + i64::from(arg))?;
                self.tasks[t].stack[idx] = value;
            }

            Op::IncrementLocal => {
                let inc = self.pop_val(t, st)?;
                let inc = self.eval_int(inc);
                let idx = slot(st.fp as i64 + i64::from(arg))?;
                let base = self.tasks[t].stack[idx].as_int();
                self.tasks[t].stack[idx] = Obj::int(base.wrapping_add(inc));
            }

            Op::Pop => {
                if uarg > st.sp {
                    return Err(ErrorCode::Unspecified); // stack underflow
                }
                st.sp -= uarg;
            }

            Op::Jmp => {
                st.ip = jump_target(st, arg)?;
                if arg < 0 {
                    return Ok(Flow::Suspend); // backward jump: yield
                }
            }

            Op::JmpTrue => {
                let value = self.pop_val(t, st)?;
                if value == Obj::TRUE {
                    st.ip = jump_target(st, arg)?;
                    if arg < 0 {
                        return Ok(Flow::Suspend); // taken backward jump
                    }
                }
            }

            Op::JmpFalse => {
                let value = self.pop_val(t, st)?;
                if value == Obj::FALSE {
                    st.ip = jump_target(st, arg)?;
                    if arg < 0 {
                        return Ok(Flow::Suspend); // taken backward jump
                    }
                }
            }

            Op::DecrementAndJmp => {
                if st.sp == 0 {
                    return Err(ErrorCode::Unspecified);
                }
                let counter = self.tasks[t].stack[st.sp - 1].as_int() - 1;
                if counter > 0 {
                    self.tasks[t].stack[st.sp - 1] = Obj::int(counter);
                    st.ip = jump_target(st, arg)?;
                    return Ok(Flow::Suspend); // loop edge: yield
                }
                st.sp -= 1; // loop done, pop the counter
            }

            Op::CallFunction => {
                let callee = ((word >> 8) & 0xFF) as u8;
                let arg_count = ((word >> 16) & 0xFF) as i32;
                let local_count = ((word >> 24) & 0xFF) as usize;

                self.push_val(t, st, Obj::int(arg_count))?;
                let ret = ((st.ip as i32) << 8) | i32::from(self.tasks[t].current_chunk_index);
                self.push_val(t, st, Obj::int(ret))?;
                self.push_val(t, st, Obj::int(st.fp as i32))?;
                st.fp = st.sp;
                for _ in 0..local_count {
                    self.push_val(t, st, Obj::zero())?;
                }

                let Some(callee_code) = self.chunks[usize::from(callee)].code else {
                    return Err(ErrorCode::BadChunkIndex);
                };
                self.tasks[t].current_chunk_index = callee;
                st.code = callee_code;
                st.ip = RECORD_HEADER_WORDS;
            }

            Op::ReturnResult => {
                if st.sp == 0 {
                    return Err(ErrorCode::Unspecified);
                }
                let result = self.tasks[t].stack[st.sp - 1];

                if st.fp == 0 {
                    // not inside a call: the task is done
                    let hat = self.tasks[t].hat_chunk_index;
                    self.send_task_return_value(hat, result);
                    self.tasks[t].status = TaskStatus::Unused;
                    return Ok(Flow::Suspend);
                }

                let arg_count = self.tasks[t].stack[slot(st.fp as i64 - 3)?].as_int();
                let ret = self.tasks[t].stack[slot(st.fp as i64 - 2)?].as_int();
                let old_fp = self.tasks[t].stack[slot(st.fp as i64 - 1)?].as_int();

                st.sp = slot(st.fp as i64 - i64::from(arg_count) - 3)?;
                self.tasks[t].stack[st.sp] = result;
                st.sp += 1;

                let ret_chunk = (ret & 0xFF) as u8;
                let Some(ret_code) = self.chunks[usize::from(ret_chunk)].code else {
                    return Err(ErrorCode::BadChunkIndex);
                };
                self.tasks[t].current_chunk_index = ret_chunk;
                st.code = ret_code;
                st.ip = ((ret >> 8) & 0x003F_FFFF) as usize;
                st.fp = slot(i64::from(old_fp))?;
            }

            Op::WaitMicros => {
                let delay = self.pop_val(t, st)?;
                let delay = self.eval_int(delay);
                if self.error.is_error() {
                    return Ok(Flow::Continue); // reported by the loop
                }
                self.tasks[t].status = TaskStatus::WaitingMicros;
                self.tasks[t].wake_time = self.platform.microsecs().wrapping_add(delay as u32);
                return Ok(Flow::Suspend);
            }

            Op::WaitMillis => {
                let delay = self.pop_val(t, st)?;
                let delay = self.eval_int(delay);
                if self.error.is_error() {
                    return Ok(Flow::Continue);
                }
                self.tasks[t].status = TaskStatus::WaitingMillis;
                self.tasks[t].wake_time = self.platform.millisecs().wrapping_add(delay as u32);
                return Ok(Flow::Suspend);
            }

            Op::PrintIt => {
                if !self.has_output_space(PRINT_BUF_SIZE + 5) {
                    st.ip -= 1; // retry when the buffer drains
                    return Ok(Flow::Suspend);
                }
                let n = uarg.min(st.sp);
                let mut text = String::new();
                for i in (st.sp - n)..st.sp {
                    if !text.is_empty() {
                        text.push(' ');
                    }
                    let value = self.tasks[t].stack[i];
                    self.print_value_into(&mut text, value);
                }
                text.truncate(PRINT_BUF_SIZE);
                self.output_string(&text);
                if n == 0 {
                    self.push_val(t, st, Obj::FALSE)?;
                } else {
                    st.sp -= n - 1;
                }
            }

            Op::StopAll => {
                self.stop_all_tasks();
                return Ok(Flow::Stopped);
            }

            Op::Add | Op::Subtract | Op::Multiply | Op::Divide | Op::Modulo => {
                if st.sp < 2 {
                    return Err(ErrorCode::Unspecified);
                }
                let a = self.tasks[t].stack[st.sp - 2];
                let b = self.tasks[t].stack[st.sp - 1];
                let a = self.eval_int(a);
                let b = self.eval_int(b);
                if self.error.is_error() {
                    return Ok(Flow::Continue);
                }
                let result = match op {
                    Op::Add => a.wrapping_add(b),
                    Op::Subtract => a.wrapping_sub(b),
                    Op::Multiply => a.wrapping_mul(b),
                    // division wraps rather than trapping on the
                    // smallest-int / -1 edge
                    Op::Divide if b == 0 => return Err(ErrorCode::DivideByZero),
                    Op::Divide => a.wrapping_div(b),
                    Op::Modulo if b == 0 => return Err(ErrorCode::DivideByZero),
                    _ => a.wrapping_rem(b),
                };
                self.tasks[t].stack[st.sp - 2] = Obj::int(result);
                st.sp -= 1;
            }

            Op::LessThan | Op::LessOrEq | Op::GreaterOrEq | Op::GreaterThan => {
                if st.sp < 2 {
                    return Err(ErrorCode::Unspecified);
                }
                let a = self.tasks[t].stack[st.sp - 2];
                let b = self.tasks[t].stack[st.sp - 1];
                let a = self.eval_int(a);
                let b = self.eval_int(b);
                if self.error.is_error() {
                    return Ok(Flow::Continue);
                }
                let result = match op {
                    Op::LessThan => a < b,
                    Op::LessOrEq => a <= b,
                    Op::GreaterOrEq => a >= b,
                    _ => a > b,
                };
                self.tasks[t].stack[st.sp - 2] = Obj::boolean(result);
                st.sp -= 1;
            }

            Op::Equal => {
                if st.sp < 2 {
                    return Err(ErrorCode::Unspecified);
                }
                let a = self.tasks[t].stack[st.sp - 2];
                let b = self.tasks[t].stack[st.sp - 1];
                let result = self.values_equal(a, b);
                if self.error.is_error() {
                    return Ok(Flow::Continue);
                }
                self.tasks[t].stack[st.sp - 2] = Obj::boolean(result);
                st.sp -= 1;
            }

            Op::Not => {
                let value = self.pop_val(t, st)?;
                if value == Obj::TRUE {
                    self.push_val(t, st, Obj::FALSE)?;
                } else if value == Obj::FALSE {
                    self.push_val(t, st, Obj::TRUE)?;
                } else {
                    return Err(ErrorCode::NeedsBoolean);
                }
            }

            Op::NewArray => {
                if st.sp == 0 {
                    return Err(ErrorCode::Unspecified);
                }
                let size = self.tasks[t].stack[st.sp - 1];
                if !size.is_int() || size.as_int() < 0 {
                    return Err(ErrorCode::NeedsNonNegative);
                }
                let Some(array) = self.mem.alloc(ObjType::Array, size.as_int() as u32, Obj::zero())
                else {
                    return Err(ErrorCode::InsufficientMemory);
                };
                self.tasks[t].stack[st.sp - 1] = array;
            }

            Op::NewByteArray => self.call_prim(t, st, uarg, prims::data::prim_new_byte_array)?,

            Op::FillArray => self.call_prim(t, st, uarg, prims::data::prim_fill)?,

            Op::At => self.call_prim(t, st, uarg, prims::data::prim_at)?,

            Op::AtPut => self.call_prim(t, st, uarg, prims::data::prim_at_put)?,

            Op::Micros => {
                let now = self.platform.microsecs();
                // low 30 bits, so the result is a positive int
                self.push_val(t, st, Obj::int((now & 0x3FFF_FFFF) as i32))?;
            }

            Op::Millis => {
                let now = self.platform.millisecs();
                self.push_val(t, st, Obj::int(now as i32))?;
            }

            Op::HexToInt => self.call_prim(t, st, uarg, prims::misc::prim_hex_to_int)?,

            Op::SayIt => {
                if st.sp < uarg || uarg == 0 {
                    return Err(ErrorCode::Unspecified);
                }
                let value = self.tasks[t].stack[st.sp - uarg];
                if !self.has_output_space(self.bytes_for_value(value)) {
                    st.ip -= 1; // retry when the buffer drains
                    return Ok(Flow::Suspend);
                }
                let hat = self.tasks[t].hat_chunk_index;
                self.output_value(value, hat);
                st.sp -= uarg - 1;
            }

            Op::AnalogRead
            | Op::AnalogWrite
            | Op::DigitalRead
            | Op::DigitalWrite
            | Op::SetLed
            | Op::AnalogPins
            | Op::DigitalPins
            | Op::I2cGet
            | Op::I2cSet
            | Op::Peek
            | Op::Poke => {
                let slot = match op {
                    Op::AnalogRead => BoardSlot::AnalogRead,
                    Op::AnalogWrite => BoardSlot::AnalogWrite,
                    Op::DigitalRead => BoardSlot::DigitalRead,
                    Op::DigitalWrite => BoardSlot::DigitalWrite,
                    Op::SetLed => BoardSlot::SetLed,
                    Op::AnalogPins => BoardSlot::AnalogPins,
                    Op::DigitalPins => BoardSlot::DigitalPins,
                    Op::I2cGet => BoardSlot::I2cGet,
                    Op::I2cSet => BoardSlot::I2cSet,
                    Op::Peek => BoardSlot::Peek,
                    _ => BoardSlot::Poke,
                };
                let Some(func) = self.registry.board_slot(slot) else {
                    return Err(ErrorCode::PrimitiveNotImplemented);
                };
                self.call_prim(t, st, uarg, func)?;
            }

            Op::Primitive => {
                let index = ((word >> 8) & 0xFF) as u8;
                let set_id = ((word >> 16) & 0xFF) as u8;
                let n = ((word >> 24) & 0xFF) as usize;
                let Some(func) = self.registry.lookup(set_id, index) else {
                    return Err(ErrorCode::PrimitiveNotImplemented);
                };
                self.call_prim(t, st, n, func)?;
            }
        }

        Ok(Flow::Continue)
    }

    /// Push one value, failing the task when the fixed stack is full.
    fn push_val(&mut self, t: usize, st: &mut ExecState, value: Obj) -> Result<(), ErrorCode> {
        if st.sp >= TASK_STACK_WORDS {
            return Err(ErrorCode::InsufficientMemory);
        }
        self.tasks[t].stack[st.sp] = value;
        st.sp += 1;
        Ok(())
    }

    /// Pop one value.
    fn pop_val(&mut self, t: usize, st: &mut ExecState) -> Result<Obj, ErrorCode> {
        if st.sp == 0 {
            return Err(ErrorCode::Unspecified);
        }
        st.sp -= 1;
        Ok(self.tasks[t].stack[st.sp])
    }

    /// Pop `n` arguments, call a primitive, push its result.
    ///
    /// Primitive failures flow through the machine error slot, which the
    /// dispatch loop checks next.
    fn call_prim(
        &mut self,
        t: usize,
        st: &mut ExecState,
        n: usize,
        func: PrimFn<F, P>,
    ) -> Result<(), ErrorCode> {
        if n > MAX_PRIM_ARGS || st.sp < n {
            return Err(ErrorCode::Unspecified);
        }
        let mut args = [Obj::FALSE; MAX_PRIM_ARGS];
        args[..n].copy_from_slice(&self.tasks[t].stack[st.sp - n..st.sp]);
        let result = func(self, &args[..n]);
        if n == 0 {
            self.push_val(t, st, result)?;
        } else {
            self.tasks[t].stack[st.sp - n] = result;
            st.sp -= n - 1;
        }
        Ok(())
    }

    /// `equal` semantics: identity, then numeric/boolean/string content;
    /// the false sentinel (which doubles as nil) is only comparable to
    /// itself.
    fn values_equal(&mut self, a: Obj, b: Obj) -> bool {
        if a == b {
            return true;
        }
        if a.is_int() && b.is_int() {
            return false; // different values
        }
        if a.is_boolean() && b.is_boolean() {
            return false; // true vs false
        }
        if a.is_reference()
            && b.is_reference()
            && self.type_of(a) == ObjType::String
            && self.type_of(b) == ObjType::String
        {
            return self.strings_equal(a, b);
        }
        if a == Obj::FALSE || b == Obj::FALSE {
            self.fail(ErrorCode::NonComparable); // nil vs non-nil
            return false;
        }
        if a.is_boolean() || b.is_boolean() {
            return false; // true vs a non-boolean
        }
        self.fail(ErrorCode::NonComparable);
        false
    }

    /// Append a printable form of `value` (for `printIt`).
    fn print_value_into(&self, out: &mut String, value: Obj) {
        use core::fmt::Write;
        if value.is_int() {
            let _ = write!(out, "{}", value.as_int());
        } else if value == Obj::TRUE {
            out.push_str("true");
        } else if value == Obj::FALSE {
            out.push_str("false");
        } else if self.type_of(value) == ObjType::String {
            let bytes = self.string_bytes(value);
            out.push_str(&String::from_utf8_lossy(&bytes));
        } else {
            let _ = write!(out, "<{}>", self.type_of(value).name());
        }
    }
}

/// Bounds-check a stack slot index (guards compiler bugs and corrupted
/// frames).
fn slot(index: i64) -> Result<usize, ErrorCode> {
    if index < 0 || index >= TASK_STACK_WORDS as i64 {
        return Err(ErrorCode::InsufficientMemory);
    }
    Ok(index as usize)
}

/// Validate a jump and return the new instruction pointer.
fn jump_target(st: &ExecState, arg: i32) -> Result<usize, ErrorCode> {
    let target = st.ip as i64 + i64::from(arg);
    if target < 0 || st.code as i64 + target >= st.limit as i64 {
        return Err(ErrorCode::Unspecified);
    }
    Ok(target as usize)
}
