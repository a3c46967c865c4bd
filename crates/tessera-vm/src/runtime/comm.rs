// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Tessera Authors

//! Host-IDE wire protocol: buffering, framing, and message dispatch.
//!
//! Outgoing messages are queued in a circular buffer and trickled to the
//! channel one byte per scheduling iteration, so a slow serial line never
//! blocks the interpreter. Opcodes that emit output check for free space
//! first and retry after a yield when the buffer is full.
//!
//! Incoming bytes accumulate in a bounded receive buffer. A bad first
//! byte, a bad terminator, or a receive timeout (~20 ms without progress
//! on an incomplete frame) resynchronizes by scanning for the next legal
//! start byte followed by an in-range message type.

use super::{MAX_VARS, Machine};
use crate::platform::{Flash, Platform};
use crate::value::Obj;
use tessera_abi::chunk::{ChunkAttribute, MAX_CHUNKS};
use tessera_abi::error::ErrorCode;
use tessera_abi::protocol::{
    LONG_HEADER_BYTES, LONG_MESSAGE_START, MESSAGE_TERMINATOR, MessageType, RECEIVE_TIMEOUT_USECS,
    SHORT_MESSAGE_START, value_type,
};
use tessera_abi::record::RecordType;

#[cfg(any(test, feature = "std"))]
use std::vec::Vec;

#[cfg(not(any(test, feature = "std")))]
use alloc::vec::Vec;

/// Circular output buffer size; must be a power of two.
pub(crate) const OUT_BUF_SIZE: usize = 1024;

const OUT_BUF_MASK: usize = OUT_BUF_SIZE - 1;

/// Receive buffer size.
pub(crate) const RCV_BUF_SIZE: usize = 1024;

/// Longest string payload sent in one value message.
const MAX_VALUE_STRING_BYTES: usize = 200;

impl<F: Flash, P: Platform> Machine<F, P> {
    // --- circular output buffer ---

    fn out_buf_bytes(&self) -> usize {
        (self.out_end.wrapping_sub(self.out_start)) & OUT_BUF_MASK
    }

    /// True when `byte_count` more bytes fit in the output buffer.
    #[must_use]
    pub fn has_output_space(&self, byte_count: usize) -> bool {
        OUT_BUF_MASK - self.out_buf_bytes() > byte_count
    }

    fn queue_byte(&mut self, byte: u8) {
        self.out_buf[self.out_end] = byte;
        self.out_end = (self.out_end + 1) & OUT_BUF_MASK;
    }

    /// Push at most one queued byte to the channel.
    pub(crate) fn send_next_byte(&mut self) {
        if self.out_start != self.out_end && self.platform.can_send_byte() {
            self.platform.send_byte(self.out_buf[self.out_start]);
            self.out_start = (self.out_start + 1) & OUT_BUF_MASK;
        }
    }

    /// Drain the whole output buffer to the channel (testing support;
    /// stops early if the channel stalls).
    pub fn flush_output(&mut self) {
        while self.out_start != self.out_end && self.platform.can_send_byte() {
            self.send_next_byte();
        }
    }

    // --- message assembly ---

    /// Queue a short frame, or a long frame when `data` is present.
    fn send_message(&mut self, msg_type: MessageType, id: u8, data: Option<&[u8]>) {
        match data {
            None => {
                self.queue_byte(SHORT_MESSAGE_START);
                self.queue_byte(msg_type as u8);
                self.queue_byte(id);
            }
            Some(data) => {
                let len = data.len() + 1; // body plus terminator
                if LONG_HEADER_BYTES + len > OUT_BUF_MASK - self.out_buf_bytes() {
                    return; // no room; opcodes that retry check space first
                }
                self.queue_byte(LONG_MESSAGE_START);
                self.queue_byte(msg_type as u8);
                self.queue_byte(id);
                self.queue_byte((len & 0xFF) as u8);
                self.queue_byte((len >> 8) as u8);
                for &b in data {
                    self.queue_byte(b);
                }
                self.queue_byte(MESSAGE_TERMINATOR);
            }
        }
    }

    /// Body bytes a value message for `value` will need, header included.
    /// Zero for values that have no wire representation.
    pub(crate) fn bytes_for_value(&self, value: Obj) -> usize {
        let header = LONG_HEADER_BYTES + 2; // frame header + type byte + terminator
        if value.is_int() {
            header + 4
        } else if value.is_boolean() {
            header + 1
        } else if self.type_of(value) == crate::value::ObjType::String {
            header + self.string_len(value).min(MAX_VALUE_STRING_BYTES)
        } else {
            0 // arrays and byte arrays are not serialized
        }
    }

    /// Queue a typed value message (`outputValue`, `taskReturnedValue`,
    /// `argValue`).
    fn send_value_message(&mut self, msg_type: MessageType, id: u8, value: Obj) {
        let mut data: Vec<u8> = Vec::with_capacity(8);
        if value.is_int() {
            data.push(value_type::INTEGER);
            data.extend_from_slice(&value.as_int().to_le_bytes());
        } else if value.is_boolean() {
            data.push(value_type::BOOLEAN);
            data.push(u8::from(value == Obj::TRUE));
        } else if self.type_of(value) == crate::value::ObjType::String {
            data.push(value_type::STRING);
            let bytes = self.string_bytes(value);
            let take = bytes.len().min(MAX_VALUE_STRING_BYTES);
            data.extend_from_slice(&bytes[..take]);
        } else {
            return; // not serializable
        }
        self.send_message(msg_type, id, Some(&data));
    }

    /// Queue a diagnostic string for the IDE console.
    pub fn output_string(&mut self, s: &str) {
        let mut data: Vec<u8> = Vec::with_capacity(s.len() + 1);
        data.push(value_type::STRING);
        let take = s.len().min(MAX_VALUE_STRING_BYTES);
        data.extend_from_slice(&s.as_bytes()[..take]);
        self.send_message(MessageType::OutputValue, 0, Some(&data));
    }

    /// Queue an `outputValue` for a say/print block of the given chunk.
    pub fn output_value(&mut self, value: Obj, chunk_index: u8) {
        self.send_value_message(MessageType::OutputValue, chunk_index, value);
    }

    pub(crate) fn send_task_started(&mut self, chunk_index: u8) {
        self.send_message(MessageType::TaskStarted, chunk_index, None);
    }

    pub(crate) fn send_task_done(&mut self, chunk_index: u8) {
        self.send_message(MessageType::TaskDone, chunk_index, None);
    }

    pub(crate) fn send_task_return_value(&mut self, chunk_index: u8, value: Obj) {
        self.send_value_message(MessageType::TaskReturnedValue, chunk_index, value);
    }

    /// Queue a task error: one code byte plus the 32-bit location
    /// `(ip << 8) | chunkIndex`.
    pub(crate) fn send_task_error(&mut self, chunk_index: u8, code: ErrorCode, location: u32) {
        let mut data = [0u8; 5];
        data[0] = code.as_byte();
        data[1..5].copy_from_slice(&location.to_le_bytes());
        self.send_message(MessageType::TaskError, chunk_index, Some(&data));
    }

    fn send_variable_value(&mut self, var_index: u8) {
        if usize::from(var_index) < MAX_VARS {
            let value = self.vars[usize::from(var_index)];
            self.send_value_message(MessageType::ArgValue, var_index, value);
        }
    }

    fn send_version(&mut self) {
        let mut data: Vec<u8> = Vec::new();
        data.push(value_type::STRING);
        data.extend_from_slice(crate::VM_VERSION.as_bytes());
        data.push(b' ');
        data.extend_from_slice(self.platform.board_type().as_bytes());
        self.send_message(MessageType::Version, 0, Some(&data));
    }

    // --- receiving ---

    /// Pump the channel: push one pending output byte, pull everything
    /// the host has sent, process at most one complete message.
    pub fn process_message(&mut self) {
        self.send_next_byte();

        loop {
            let free = RCV_BUF_SIZE - self.rcv_count;
            if free == 0 {
                break;
            }
            let start = self.rcv_count;
            let mut chunk = [0u8; 64];
            let take = free.min(chunk.len());
            let n = self.platform.read_bytes(&mut chunk[..take]);
            if n == 0 {
                break;
            }
            self.rcv_buf[start..start + n].copy_from_slice(&chunk[..n]);
            self.rcv_count += n;
            self.last_rcv_time = self.platform.microsecs();
        }
        if self.rcv_count == 0 {
            return;
        }

        match self.rcv_buf[0] {
            SHORT_MESSAGE_START => self.process_short_message(),
            LONG_MESSAGE_START => self.process_long_message(),
            _ => self.skip_to_start_byte_after(1), // dropped bytes
        }
    }

    /// True when an incomplete frame has gone stale.
    fn receive_timeout(&mut self) -> bool {
        let now = self.platform.microsecs();
        now.wrapping_sub(self.last_rcv_time) > RECEIVE_TIMEOUT_USECS
    }

    fn process_short_message(&mut self) {
        if self.rcv_count < 3 {
            if self.receive_timeout() {
                self.skip_to_start_byte_after(1);
            }
            return; // message incomplete
        }
        let cmd = self.rcv_buf[1];
        let id = self.rcv_buf[2];
        match MessageType::from_byte(cmd) {
            Some(MessageType::DeleteChunk) => self.delete_code_chunk(id),
            Some(MessageType::StartChunk) => self.start_task_for_chunk(id),
            Some(MessageType::StopChunk) => self.stop_task_for_chunk(id),
            Some(MessageType::StartAll) => self.start_all(),
            Some(MessageType::StopAll) => {
                self.stop_all_tasks();
                self.output_string("All tasks stopped");
            }
            Some(MessageType::GetVar) => self.send_variable_value(id),
            Some(MessageType::DeleteVar) => self.delete_var(id),
            Some(MessageType::DeleteComment) => {
                self.append_record(RecordType::CommentDeleted, id, 0, &[]);
            }
            Some(MessageType::GetVersion) => self.send_version(),
            Some(MessageType::DeleteAllCode) => self.delete_all_chunks(),
            Some(MessageType::SystemReset) => self.platform.system_reset(),
            _ => {} // unknown or inapplicable: ignore
        }
        self.skip_to_start_byte_after(3);
    }

    fn process_long_message(&mut self) {
        if self.rcv_count < LONG_HEADER_BYTES {
            if self.receive_timeout() {
                self.skip_to_start_byte_after(1);
            }
            return;
        }
        let msg_len = usize::from(self.rcv_buf[3]) | (usize::from(self.rcv_buf[4]) << 8);
        let total = LONG_HEADER_BYTES + msg_len;
        if self.rcv_count < total {
            if self.receive_timeout() {
                self.skip_to_start_byte_after(1);
            }
            return;
        }
        if msg_len == 0 || self.rcv_buf[total - 1] != MESSAGE_TERMINATOR {
            self.skip_to_start_byte_after(1);
            return;
        }

        let cmd = self.rcv_buf[1];
        let id = self.rcv_buf[2];
        let body_end = total - 1; // strip terminator
        let mut body = [0u8; RCV_BUF_SIZE];
        let body_len = body_end - LONG_HEADER_BYTES;
        body[..body_len].copy_from_slice(&self.rcv_buf[LONG_HEADER_BYTES..body_end]);
        let body = &body[..body_len];

        match MessageType::from_byte(cmd) {
            Some(MessageType::StoreChunk) => self.store_code_chunk(id, body),
            Some(MessageType::ChunkPosition) => {
                if usize::from(id) < MAX_CHUNKS && body.len() == 4 {
                    self.append_record(RecordType::ChunkPosition, id, 0, body);
                }
            }
            Some(MessageType::ChunkAttribute) => {
                if let Some((&attr, rest)) = body.split_first() {
                    if usize::from(id) < MAX_CHUNKS && ChunkAttribute::from_byte(attr).is_some() {
                        self.append_record(RecordType::ChunkAttribute, id, attr, rest);
                    }
                }
            }
            Some(MessageType::VarName) => {
                self.append_record(RecordType::VarName, id, 0, body);
            }
            Some(MessageType::Comment) => {
                self.append_record(RecordType::Comment, id, 0, body);
            }
            Some(MessageType::CommentPosition) => {
                if body.len() == 4 {
                    self.append_record(RecordType::CommentPosition, id, 0, body);
                }
            }
            _ => {} // unknown or inapplicable: ignore
        }
        self.skip_to_start_byte_after(total);
    }

    /// Drop everything before the next plausible frame start at or after
    /// `start_index`: a start byte whose following byte (when present) is
    /// an in-range message type.
    fn skip_to_start_byte_after(&mut self, start_index: usize) {
        let mut next_start = None;
        let mut i = start_index;
        while i < self.rcv_count {
            let b = self.rcv_buf[i];
            if b == SHORT_MESSAGE_START || b == LONG_MESSAGE_START {
                if i + 1 < self.rcv_count && !MessageType::in_valid_range(self.rcv_buf[i + 1]) {
                    i += 1;
                    continue; // illegal message type; keep scanning
                }
                next_start = Some(i);
                break;
            }
            i += 1;
        }

        match next_start {
            None => self.rcv_count = 0,
            Some(start) => {
                self.rcv_buf.copy_within(start..self.rcv_count, 0);
                self.rcv_count -= start;
            }
        }
    }
}
