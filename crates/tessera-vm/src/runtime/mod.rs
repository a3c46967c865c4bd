// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Tessera Authors

//! Runtime: chunk table, task table, globals, and the scheduling loop.
//!
//! The [`Machine`] owns every core component: object memory, persistent
//! code store, primitive registry, task table, global variables, and the
//! host channel buffers. Execution is single-threaded and cooperative:
//! exactly one task runs at a time, and the scheduler switches tasks only
//! at the interpreter's suspension points.
//!
//! One outer iteration of the scheduling loop ([`Machine::service`])
//! drains one pending host message, rotates the task cursor while waking
//! any sleeper whose time has arrived, and runs the first runnable task to
//! its next suspension.

#[cfg(test)]
mod runtime_test;

mod comm;

use crate::mem::{ObjMem, Roots};
use crate::persist::CodeStore;
use crate::platform::{Flash, Platform};
use crate::prims::Registry;
use crate::value::Obj;
use tessera_abi::chunk::{ChunkType, MAX_CHUNKS};
use tessera_abi::error::ErrorCode;
use tessera_abi::record::{RECORD_HEADER_WORDS, RecordType};

#[cfg(any(test, feature = "std"))]
use std::vec::Vec;

#[cfg(not(any(test, feature = "std")))]
use alloc::vec::Vec;

pub(crate) use comm::{OUT_BUF_SIZE, RCV_BUF_SIZE};

/// Maximum number of concurrent tasks.
pub const MAX_TASKS: usize = 16;

/// Number of global variables.
pub const MAX_VARS: usize = 64;

/// Value words in each task's fixed stack.
pub const TASK_STACK_WORDS: usize = 32;

/// How far past its wake time a sleeping task is still considered due,
/// in microseconds. Keeps wake checks correct across timer wrap.
pub const RECENT_USECS: u32 = 100_000;

/// The wake window for the millisecond clock (~100 ms).
pub const RECENT_MSECS: u32 = 100;

/// Mask selecting the effective bits of the millisecond clock.
pub const MSEC_MASK: u32 = 0x003F_FFFF;

/// Scheduling state of one task table entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskStatus {
    /// Entry is available.
    #[default]
    Unused = 0,
    /// Sleeping until the microsecond clock reaches `wake_time`.
    WaitingMicros = 1,
    /// Sleeping until the millisecond clock reaches `wake_time`.
    WaitingMillis = 2,
    /// Ready to run.
    Runnable = 3,
}

/// One entry of the task table.
///
/// A task's saved state is exactly its `(ip, sp, fp, stack)` tuple plus
/// the chunk it is executing; the VM itself is the coroutine runtime.
#[derive(Clone, Copy, Debug)]
pub struct Task {
    /// Scheduling state.
    pub status: TaskStatus,
    /// Chunk index of the hat this task was started for.
    pub hat_chunk_index: u8,
    /// Chunk index currently executing (differs inside function calls).
    pub current_chunk_index: u8,
    /// Clock value this task sleeps until.
    pub wake_time: u32,
    /// Flash word address of the current chunk's record.
    pub code: usize,
    /// Instruction pointer, in words from `code`.
    pub ip: usize,
    /// Stack pointer (next free stack slot).
    pub sp: usize,
    /// Frame pointer; zero means top level.
    pub fp: usize,
    /// Fixed value stack.
    pub stack: [Obj; TASK_STACK_WORDS],
}

impl Default for Task {
    fn default() -> Self {
        Self {
            status: TaskStatus::Unused,
            hat_chunk_index: 0,
            current_chunk_index: 0,
            wake_time: 0,
            code: 0,
            ip: 0,
            sp: 0,
            fp: 0,
            stack: [Obj::zero(); TASK_STACK_WORDS],
        }
    }
}

/// One entry of the chunk table.
#[derive(Clone, Copy, Debug, Default)]
pub struct ChunkEntry {
    /// The chunk's kind; `Unused` for empty entries.
    pub chunk_type: ChunkType,
    /// Flash word address of the chunk's newest `ChunkCode` record.
    pub code: Option<usize>,
}

/// The whole VM: every core component wired together.
pub struct Machine<F: Flash, P: Platform> {
    /// RAM object memory.
    pub mem: ObjMem,
    /// Persistent code store.
    pub store: CodeStore<F>,
    /// Board services.
    pub platform: P,
    /// Primitive registry.
    pub registry: Registry<F, P>,

    pub(crate) chunks: [ChunkEntry; MAX_CHUNKS],
    pub(crate) tasks: [Task; MAX_TASKS],
    pub(crate) task_count: usize,
    current_task: usize,

    pub(crate) vars: [Obj; MAX_VARS],
    pub(crate) error: ErrorCode,
    /// Scratch root protecting an in-progress result across a nested
    /// allocation inside a primitive.
    pub(crate) scratch: Obj,

    // host channel buffers (see comm.rs)
    pub(crate) out_buf: [u8; OUT_BUF_SIZE],
    pub(crate) out_start: usize,
    pub(crate) out_end: usize,
    pub(crate) rcv_buf: [u8; RCV_BUF_SIZE],
    pub(crate) rcv_count: usize,
    pub(crate) last_rcv_time: u32,

    rng: u32,
}

impl<F: Flash, P: Platform> Machine<F, P> {
    /// Assemble a machine from its parts. Core primitive sets are
    /// registered; call [`Machine::restore_scripts`] to rebuild the chunk
    /// table from the store.
    #[must_use]
    pub fn new(mem: ObjMem, store: CodeStore<F>, platform: P) -> Self {
        Self {
            mem,
            store,
            platform,
            registry: Registry::with_core_sets(),
            chunks: [ChunkEntry::default(); MAX_CHUNKS],
            tasks: [Task::default(); MAX_TASKS],
            task_count: 0,
            current_task: 0,
            vars: [Obj::zero(); MAX_VARS],
            error: ErrorCode::NoError,
            scratch: Obj::FALSE,
            out_buf: [0; OUT_BUF_SIZE],
            out_start: 0,
            out_end: 0,
            rcv_buf: [0; RCV_BUF_SIZE],
            rcv_count: 0,
            last_rcv_time: 0,
            rng: 0x2F6E_2B1,
        }
    }

    // --- error reporting (the primitive failure convention) ---

    /// Record an error on the current task and return the false sentinel.
    ///
    /// The interpreter checks the error slot after every fallible opcode
    /// and turns it into a `TaskError` message.
    pub fn fail(&mut self, code: ErrorCode) -> Obj {
        self.error = code;
        Obj::FALSE
    }

    /// The pending error, if any.
    #[must_use]
    pub fn pending_error(&self) -> ErrorCode {
        self.error
    }

    /// An integer operand, or zero with `needsInteger` recorded.
    pub(crate) fn eval_int(&mut self, value: Obj) -> i32 {
        if value.is_int() {
            value.as_int()
        } else {
            self.fail(ErrorCode::NeedsInteger);
            0
        }
    }

    // --- global variables ---

    /// Read global `index` (false for out-of-range indices).
    #[must_use]
    pub fn var(&self, index: usize) -> Obj {
        self.vars.get(index).copied().unwrap_or(Obj::FALSE)
    }

    /// Write global `index`; out-of-range writes are dropped.
    pub fn set_var(&mut self, index: usize, value: Obj) {
        if let Some(slot) = self.vars.get_mut(index) {
            *slot = value;
        }
    }

    // --- pseudo random numbers (for the "random" index keyword) ---

    /// Next word of a xorshift32 sequence.
    pub(crate) fn next_random(&mut self) -> u32 {
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.rng = x;
        x
    }

    // --- collector plumbing ---

    /// Run a collection over every VM root: globals, the live prefix of
    /// each task stack, and the scratch slot.
    pub fn collect_garbage(&mut self) {
        let mem = &mut self.mem;
        let mut slots: Vec<&mut [Obj]> = Vec::with_capacity(MAX_TASKS + 2);
        slots.push(&mut self.vars);
        slots.push(core::slice::from_mut(&mut self.scratch));
        for task in &mut self.tasks {
            let sp = task.sp;
            slots.push(&mut task.stack[..sp]);
        }
        mem.collect(&mut Roots { slots: &mut slots });
    }

    /// Resize a heap object, updating every root that references it.
    pub(crate) fn resize_with_roots(&mut self, obj: Obj, new_words: u32) -> Option<Obj> {
        let mem = &mut self.mem;
        let mut slots: Vec<&mut [Obj]> = Vec::with_capacity(MAX_TASKS + 2);
        slots.push(&mut self.vars);
        slots.push(core::slice::from_mut(&mut self.scratch));
        for task in &mut self.tasks {
            let sp = task.sp;
            slots.push(&mut task.stack[..sp]);
        }
        mem.resize(obj, new_words, &mut Roots { slots: &mut slots })
    }

    // --- chunk table and persistence ---

    /// Rebuild the chunk table from the store (startup, and after
    /// compaction moves every record).
    pub fn restore_scripts(&mut self) {
        self.chunks = [ChunkEntry::default(); MAX_CHUNKS];
        let mut updates: Vec<(u8, u8, Option<usize>)> = Vec::new();
        for record in self.store.records() {
            match record.record_type() {
                Some(RecordType::ChunkCode) => {
                    updates.push((record.id, record.extra, Some(record.addr)));
                }
                Some(RecordType::ChunkDeleted) => {
                    updates.push((record.id, 0, None));
                }
                _ => {}
            }
        }
        for (id, chunk_type, code) in updates {
            self.chunks[usize::from(id)] = ChunkEntry {
                chunk_type: ChunkType::from_byte(chunk_type),
                code,
            };
        }
    }

    /// Append a record; when the append compacts the store, re-resolve the
    /// chunk table and every running task's code address.
    pub(crate) fn append_record(
        &mut self,
        rec_type: RecordType,
        id: u8,
        extra: u8,
        data: &[u8],
    ) -> Option<usize> {
        let appended = self.store.append(rec_type, id, extra, data)?;
        if appended.compacted {
            self.restore_scripts();
            // the just-appended record is not in the table yet
            if rec_type == RecordType::ChunkCode {
                self.chunks[usize::from(id)] = ChunkEntry {
                    chunk_type: ChunkType::from_byte(extra),
                    code: Some(appended.addr),
                };
            }
            self.reresolve_task_code();
        }
        Some(appended.addr)
    }

    /// Point every live task at the new location of its chunk. Tasks
    /// whose chunk vanished are stopped.
    fn reresolve_task_code(&mut self) {
        for i in 0..MAX_TASKS {
            if self.tasks[i].status == TaskStatus::Unused {
                continue;
            }
            let chunk = usize::from(self.tasks[i].current_chunk_index);
            match self.chunks[chunk].code {
                Some(addr) => self.tasks[i].code = addr,
                None => self.tasks[i].status = TaskStatus::Unused,
            }
        }
    }

    /// Store bytecode for a chunk: first body byte is the chunk type, the
    /// rest is little-endian code words.
    pub fn store_code_chunk(&mut self, chunk_index: u8, body: &[u8]) {
        let Some((&type_byte, code_bytes)) = body.split_first() else {
            return;
        };
        let Some(addr) = self.append_record(RecordType::ChunkCode, chunk_index, type_byte, code_bytes)
        else {
            return;
        };
        self.chunks[usize::from(chunk_index)] = ChunkEntry {
            chunk_type: ChunkType::from_byte(type_byte),
            code: Some(addr),
        };
    }

    /// Delete a chunk: stop its task, clear its entry, append a tombstone.
    pub fn delete_code_chunk(&mut self, chunk_index: u8) {
        self.stop_task_for_chunk(chunk_index);
        self.chunks[usize::from(chunk_index)] = ChunkEntry::default();
        self.append_record(RecordType::ChunkDeleted, chunk_index, 0, &[]);
    }

    /// Delete every chunk.
    pub fn delete_all_chunks(&mut self) {
        self.stop_all_tasks();
        for chunk_index in 0..MAX_CHUNKS {
            if self.chunks[chunk_index].code.is_some() {
                self.append_record(RecordType::ChunkDeleted, chunk_index as u8, 0, &[]);
            }
        }
        self.chunks = [ChunkEntry::default(); MAX_CHUNKS];
    }

    /// Reset a global to zero and append its tombstone.
    pub fn delete_var(&mut self, var_index: u8) {
        if usize::from(var_index) < MAX_VARS {
            self.vars[usize::from(var_index)] = Obj::zero();
        }
        self.append_record(RecordType::VarDeleted, var_index, 0, &[]);
    }

    // --- task management ---

    /// Clear the task table.
    pub fn init_tasks(&mut self) {
        self.tasks = [Task::default(); MAX_TASKS];
        self.task_count = 0;
        self.current_task = 0;
    }

    /// Number of live (non-unused) tasks.
    #[must_use]
    pub fn active_task_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.status != TaskStatus::Unused)
            .count()
    }

    /// Start a task for the given chunk unless one is already running.
    pub fn start_task_for_chunk(&mut self, chunk_index: u8) {
        let entry = self.chunks[usize::from(chunk_index)];
        let Some(code) = entry.code else {
            self.send_task_error(chunk_index, ErrorCode::BadChunkIndex, 0);
            return;
        };

        for task in &self.tasks {
            if task.status != TaskStatus::Unused && task.hat_chunk_index == chunk_index {
                return; // already running
            }
        }
        let Some(slot) = self
            .tasks
            .iter()
            .position(|t| t.status == TaskStatus::Unused)
        else {
            self.output_string("No free task entries");
            return;
        };

        self.tasks[slot] = Task {
            status: TaskStatus::Runnable,
            hat_chunk_index: chunk_index,
            current_chunk_index: chunk_index,
            wake_time: 0,
            code,
            ip: RECORD_HEADER_WORDS,
            sp: 0,
            fp: 0,
            stack: [Obj::zero(); TASK_STACK_WORDS],
        };
        if slot >= self.task_count {
            self.task_count = slot + 1;
        }
        self.send_task_started(chunk_index);
    }

    /// Stop the task whose hat chunk matches, if any.
    pub fn stop_task_for_chunk(&mut self, chunk_index: u8) {
        let Some(slot) = self.tasks.iter().position(|t| {
            t.status != TaskStatus::Unused && t.hat_chunk_index == chunk_index
        }) else {
            return;
        };
        self.tasks[slot] = Task::default();
        if slot + 1 == self.task_count {
            self.task_count -= 1;
        }
        self.send_task_done(chunk_index);
    }

    /// Start a task for every start-hat and condition-hat chunk.
    pub fn start_all(&mut self) {
        self.stop_all_tasks();
        for chunk_index in 0..MAX_CHUNKS {
            if self.chunks[chunk_index].chunk_type.starts_on_start_all() {
                self.start_task_for_chunk(chunk_index as u8);
            }
        }
    }

    /// Stop every task, emitting `taskDone` for each one still active.
    pub fn stop_all_tasks(&mut self) {
        for i in 0..MAX_TASKS {
            if self.tasks[i].status != TaskStatus::Unused {
                let chunk = self.tasks[i].hat_chunk_index;
                self.send_task_done(chunk);
            }
        }
        self.init_tasks();
    }

    // --- scheduling ---

    /// One outer iteration of the scheduling loop: drain one pending host
    /// message, wake due sleepers, run one runnable task to suspension.
    pub fn service(&mut self) {
        self.process_message();
        if self.task_count == 0 {
            return;
        }

        let mut usecs: Option<u32> = None;
        let mut msecs: Option<u32> = None;
        for _ in 0..self.task_count {
            self.current_task = (self.current_task + 1) % self.task_count;
            let t = self.current_task;
            match self.tasks[t].status {
                TaskStatus::Unused => continue,
                TaskStatus::Runnable => {
                    self.run_task(t);
                    break;
                }
                TaskStatus::WaitingMicros => {
                    let now = *usecs.get_or_insert_with(|| self.platform.microsecs());
                    if now.wrapping_sub(self.tasks[t].wake_time) < RECENT_USECS {
                        self.tasks[t].status = TaskStatus::Runnable;
                        self.run_task(t);
                        break;
                    }
                }
                TaskStatus::WaitingMillis => {
                    // the millisecond clock is effectively 22 bits, so the
                    // wrap-tolerant difference is masked to those bits
                    let now = *msecs.get_or_insert_with(|| self.platform.millisecs());
                    if (now.wrapping_sub(self.tasks[t].wake_time) & MSEC_MASK) < RECENT_MSECS {
                        self.tasks[t].status = TaskStatus::Runnable;
                        self.run_task(t);
                        break;
                    }
                }
            }
        }
    }

    /// Drive the machine until every task is done or `max_slices` outer
    /// iterations have passed. Returns true when the task table drained.
    /// Testing and benchmarking support.
    pub fn run_until_done(&mut self, max_slices: usize) -> bool {
        for _ in 0..max_slices {
            if self.active_task_count() == 0 {
                return true;
            }
            self.service();
        }
        self.active_task_count() == 0
    }

    // --- value facade over both address spaces ---
    //
    // Bytecode literals live in the code space and are read in place from
    // the store; everything else lives in the RAM heap. These accessors
    // dispatch on the address partition so primitives need not care.

    /// The reference for a code-space word address.
    #[must_use]
    pub fn code_ref(addr: usize) -> Obj {
        Obj::reference(crate::value::CODE_BASE + (addr as u32) * 4)
    }

    /// Flash word index of a code-space reference.
    #[inline]
    pub(crate) fn code_index(obj: Obj) -> usize {
        ((obj.addr() - crate::value::CODE_BASE) / 4) as usize
    }

    /// Header word of a reference in either address space.
    fn header_of(&self, obj: Obj) -> u32 {
        if obj.is_code_reference() {
            self.store.read_word(Self::code_index(obj))
        } else {
            self.mem.word(ObjMem::index_of(obj))
        }
    }

    /// The type of any value, wherever it lives.
    #[must_use]
    pub fn type_of(&self, obj: Obj) -> crate::value::ObjType {
        use crate::value::{ObjType, header_type};
        if obj.is_int() {
            ObjType::Integer
        } else if obj.is_boolean() {
            ObjType::Boolean
        } else {
            ObjType::try_from(header_type(self.header_of(obj))).unwrap_or(ObjType::Free)
        }
    }

    /// Payload word count of a reference in either address space.
    #[must_use]
    pub fn words_of(&self, obj: Obj) -> u32 {
        if obj.is_reference() {
            crate::value::header_words(self.header_of(obj))
        } else {
            0
        }
    }

    /// Payload byte `i` of a string or byte array in either space.
    #[must_use]
    pub fn payload_byte(&self, obj: Obj, i: usize) -> u8 {
        if obj.is_code_reference() {
            let word = self.store.read_word(Self::code_index(obj) + 1 + i / 4);
            word.to_le_bytes()[i % 4]
        } else {
            self.mem.payload_byte(obj, i)
        }
    }

    /// Byte length of a string in either space.
    #[must_use]
    pub fn string_len(&self, obj: Obj) -> usize {
        let words = self.words_of(obj) as usize;
        if words == 0 {
            return 0;
        }
        let mut len = 4 * (words - 1);
        while len < 4 * words && self.payload_byte(obj, len) != 0 {
            len += 1;
        }
        len
    }

    /// Copy of a string's bytes, wherever it lives.
    #[must_use]
    pub fn string_bytes(&self, obj: Obj) -> Vec<u8> {
        let len = self.string_len(obj);
        (0..len).map(|i| self.payload_byte(obj, i)).collect()
    }

    /// Byte length of a byte array in either space.
    #[must_use]
    pub fn byte_array_len(&self, obj: Obj) -> usize {
        let header = self.header_of(obj);
        (4 * crate::value::header_words(header) - crate::value::header_byte_adjust(header)) as usize
    }

    /// Content equality for two strings in any combination of spaces.
    #[must_use]
    pub fn strings_equal(&self, a: Obj, b: Obj) -> bool {
        a == b || self.string_bytes(a) == self.string_bytes(b)
    }
}
