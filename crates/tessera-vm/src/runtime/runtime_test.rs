// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Tessera Authors

//! Tests for the scheduler and the host wire protocol.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::bytecode::{Op, immediate_arg, op_word};
use crate::mem::ObjMem;
use crate::persist::{CodeStore, StoreConfig};
use crate::platform::{Frame, MockPlatform, RamFlash, parse_frames};
use crate::runtime::{Machine, TaskStatus};
use crate::value::Obj;
use tessera_abi::chunk::ChunkType;
use tessera_abi::protocol::MessageType;
use tessera_abi::record::RecordType;

type TestMachine = Machine<RamFlash, MockPlatform>;

const HALF: usize = 1024;

fn machine_on(flash: RamFlash, tick: u32) -> TestMachine {
    let store = CodeStore::new(flash, StoreConfig { half_space_words: HALF }).unwrap();
    let mut m = Machine::new(ObjMem::new(4096), store, MockPlatform::new(tick));
    m.restore_scripts();
    m
}

fn machine() -> TestMachine {
    machine_on(RamFlash::new(2 * HALF, 64), 0)
}

fn chunk_body(chunk_type: ChunkType, words: &[u32]) -> Vec<u8> {
    let mut body = vec![chunk_type as u8];
    body.extend(words.iter().flat_map(|w| w.to_le_bytes()));
    body
}

fn push_int(n: i32) -> u32 {
    op_word(Op::PushImmediate, immediate_arg(Obj::int(n)).unwrap())
}

fn drain(m: &mut TestMachine) -> Vec<Frame> {
    m.flush_output();
    parse_frames(&m.platform.take_output())
}

fn frames_of_type(frames: &[Frame], msg_type: MessageType) -> usize {
    frames.iter().filter(|f| f.msg_type() == msg_type as u8).count()
}

// --- wire protocol basics ---

#[test]
fn get_version_replies_with_version_string() {
    let mut m = machine();
    m.platform.host_sends_short(MessageType::GetVersion as u8, 0);
    m.service();

    let frames = drain(&mut m);
    assert_eq!(frames.len(), 1);
    match &frames[0] {
        Frame::Long { msg_type, body, .. } => {
            assert_eq!(*msg_type, MessageType::Version as u8);
            assert_eq!(body[0], 2); // string payload
            let text = String::from_utf8(body[1..].to_vec()).unwrap();
            assert!(text.contains("mock"), "version string: {text}");
        }
        Frame::Short { .. } => panic!("version must be a long frame"),
    }
}

#[test]
fn store_chunk_then_start_all_runs_the_hat() {
    let mut m = machine();
    let body = chunk_body(
        ChunkType::StartHat,
        &[push_int(7), op_word(Op::ReturnResult, 0)],
    );
    m.platform
        .host_sends_long(MessageType::StoreChunk as u8, 5, &body);
    m.service();
    m.platform.host_sends_short(MessageType::StartAll as u8, 0);
    m.service();
    assert!(m.run_until_done(100));

    let frames = drain(&mut m);
    assert!(frames.contains(&Frame::Short {
        msg_type: MessageType::TaskStarted as u8,
        id: 5
    }));
    assert_eq!(frames_of_type(&frames, MessageType::TaskReturnedValue), 1);
}

#[test]
fn start_all_skips_non_hat_chunks() {
    let mut m = machine();
    let hat = chunk_body(ChunkType::StartHat, &[op_word(Op::Halt, 0)]);
    let cmd = chunk_body(ChunkType::Command, &[op_word(Op::Halt, 0)]);
    m.platform.host_sends_long(MessageType::StoreChunk as u8, 1, &hat);
    m.service();
    m.platform.host_sends_long(MessageType::StoreChunk as u8, 2, &cmd);
    m.service();

    m.start_all();
    let frames = drain(&mut m);
    assert_eq!(frames_of_type(&frames, MessageType::TaskStarted), 1);
}

#[test]
fn stop_chunk_stops_only_the_matching_task() {
    let mut m = machine();
    m.store_code_chunk(0, &chunk_body(ChunkType::StartHat, &[op_word(Op::Jmp, -1)]));
    m.store_code_chunk(1, &chunk_body(ChunkType::StartHat, &[op_word(Op::Jmp, -1)]));
    m.start_task_for_chunk(0);
    m.start_task_for_chunk(1);
    drain(&mut m);

    m.platform.host_sends_short(MessageType::StopChunk as u8, 0);
    m.service();

    assert_eq!(m.active_task_count(), 1);
    let frames = drain(&mut m);
    assert!(frames.contains(&Frame::Short {
        msg_type: MessageType::TaskDone as u8,
        id: 0
    }));
}

#[test]
fn start_chunk_without_code_reports_bad_chunk_index() {
    let mut m = machine();
    m.platform.host_sends_short(MessageType::StartChunk as u8, 9);
    m.service();

    let frames = drain(&mut m);
    assert_eq!(frames_of_type(&frames, MessageType::TaskError), 1);
}

#[test]
fn starting_a_running_chunk_is_a_no_op() {
    let mut m = machine();
    m.store_code_chunk(3, &chunk_body(ChunkType::StartHat, &[op_word(Op::Jmp, -1)]));
    m.start_task_for_chunk(3);
    m.start_task_for_chunk(3);
    assert_eq!(m.active_task_count(), 1);

    let frames = drain(&mut m);
    assert_eq!(frames_of_type(&frames, MessageType::TaskStarted), 1);
}

#[test]
fn delete_all_code_clears_chunks_and_tasks() {
    let mut m = machine();
    m.store_code_chunk(0, &chunk_body(ChunkType::StartHat, &[op_word(Op::Jmp, -1)]));
    m.start_task_for_chunk(0);
    m.platform.host_sends_short(MessageType::DeleteAllCode as u8, 0);
    m.service();

    assert_eq!(m.active_task_count(), 0);
    // a restore finds nothing
    m.restore_scripts();
    m.start_task_for_chunk(0);
    let frames = drain(&mut m);
    assert!(frames_of_type(&frames, MessageType::TaskError) >= 1);
}

#[test]
fn system_reset_reaches_the_platform() {
    let mut m = machine();
    m.platform.host_sends_short(MessageType::SystemReset as u8, 0);
    m.service();
    assert_eq!(m.platform.reset_count(), 1);
}

#[test]
fn var_name_comment_and_position_records_are_stored() {
    let mut m = machine();
    m.platform
        .host_sends_long(MessageType::VarName as u8, 2, b"speed");
    m.service();
    m.platform
        .host_sends_long(MessageType::Comment as u8, 1, b"a note");
    m.service();
    m.platform
        .host_sends_long(MessageType::CommentPosition as u8, 1, &[9, 0, 9, 0]);
    m.service();
    // wrong-size position body is ignored
    m.platform
        .host_sends_long(MessageType::ChunkPosition as u8, 1, &[1, 2, 3]);
    m.service();

    let types: Vec<_> = m.store.records().filter_map(|r| r.record_type()).collect();
    assert!(types.contains(&RecordType::VarName));
    assert!(types.contains(&RecordType::Comment));
    assert!(types.contains(&RecordType::CommentPosition));
    assert!(!types.contains(&RecordType::ChunkPosition));
}

#[test]
fn delete_var_zeroes_and_tombstones() {
    let mut m = machine();
    m.set_var(4, Obj::int(99));
    m.platform.host_sends_short(MessageType::DeleteVar as u8, 4);
    m.service();

    assert_eq!(m.var(4), Obj::zero());
    let tombstones = m
        .store
        .records()
        .filter(|r| r.record_type() == Some(RecordType::VarDeleted))
        .count();
    assert_eq!(tombstones, 1);
}

// --- frame resynchronization ---

#[test]
fn unknown_long_message_is_skipped_without_error() {
    let mut m = machine();
    // malformed: unknown message type 0x99 in an otherwise valid frame
    m.platform
        .host_sends(&[0xFB, 0x99, 0x00, 0x05, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFE]);
    m.platform.host_sends_short(MessageType::GetVersion as u8, 0);
    m.service();
    m.service();

    let frames = drain(&mut m);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].msg_type(), MessageType::Version as u8);
}

#[test]
fn garbage_bytes_resync_to_the_next_frame() {
    let mut m = machine();
    m.platform.host_sends(&[0x00, 0x42, 0x13, 0x37]);
    m.platform.host_sends_short(MessageType::GetVersion as u8, 0);
    for _ in 0..8 {
        m.service();
    }

    let frames = drain(&mut m);
    assert_eq!(frames_of_type(&frames, MessageType::Version), 1);
}

#[test]
fn start_byte_inside_garbage_needs_valid_type() {
    let mut m = machine();
    // 0xFA followed by an out-of-range type byte must not be taken as a
    // frame start during resync
    m.platform.host_sends(&[0x11, 0xFA, 0x99]);
    m.platform.host_sends_short(MessageType::GetVersion as u8, 0);
    for _ in 0..8 {
        m.service();
    }

    let frames = drain(&mut m);
    assert_eq!(frames_of_type(&frames, MessageType::Version), 1);
}

#[test]
fn truncated_frame_recovers_after_timeout() {
    let mut m = machine_on(RamFlash::new(2 * HALF, 64), 0);
    // a long-frame header promising more bytes than ever arrive
    m.platform.host_sends(&[0xFB, 0x01, 0x00, 0x40, 0x00]);
    m.service();
    m.service(); // incomplete, still waiting

    // 25 ms of silence passes; the stale frame is abandoned
    m.platform.advance_micros(25_000);
    m.service();

    // the channel is usable again
    m.platform.host_sends_short(MessageType::GetVersion as u8, 0);
    for _ in 0..4 {
        m.service();
    }

    let frames = drain(&mut m);
    assert_eq!(frames_of_type(&frames, MessageType::Version), 1);
}

#[test]
fn bad_terminator_resyncs_within_one_frame() {
    let mut m = machine();
    // complete long frame with a wrong terminator byte
    m.platform
        .host_sends(&[0xFB, 0x01, 0x00, 0x02, 0x00, 0xAA, 0xBB]);
    m.platform.host_sends_short(MessageType::GetVersion as u8, 0);
    for _ in 0..8 {
        m.service();
    }

    let frames = drain(&mut m);
    assert_eq!(frames_of_type(&frames, MessageType::Version), 1);
}

// --- scheduling ---

#[test]
fn two_wait_printing_tasks_share_time_evenly() {
    // both tasks: forever { waitMillis 10; sayIt <marker>; }
    let mut m = machine();
    for id in 0..2u8 {
        let words = [
            push_int(10),               // 0
            op_word(Op::WaitMillis, 0), // 1
            push_int(i32::from(id)),    // 2
            op_word(Op::SayIt, 1),      // 3
            op_word(Op::Pop, 1),        // 4
            op_word(Op::Jmp, -6),       // 5 -> 0
        ];
        m.store_code_chunk(id, &chunk_body(ChunkType::StartHat, &words));
        m.start_task_for_chunk(id);
    }
    drain(&mut m);

    // simulate one second, advancing 50us per scheduler iteration
    let mut output = Vec::new();
    for _ in 0..20_000 {
        m.platform.advance_micros(50);
        m.service();
        output.extend(m.platform.take_output());
    }
    m.flush_output();
    output.extend(m.platform.take_output());

    let frames = parse_frames(&output);
    let count = |id: u8| {
        frames
            .iter()
            .filter(|f| match f {
                Frame::Long { msg_type, id: fid, .. } => {
                    *msg_type == MessageType::OutputValue as u8 && *fid == id
                }
                Frame::Short { .. } => false,
            })
            .count()
    };
    let (a, b) = (count(0), count(1));
    // ~97 wakes per task in a simulated second (millis has ~1.024ms units)
    assert!((85..=115).contains(&a), "task 0 printed {a} times");
    assert!((85..=115).contains(&b), "task 1 printed {b} times");
    assert!((170..=230).contains(&(a + b)));
}

#[test]
fn sleeping_tasks_do_not_burn_slices() {
    let mut m = machine();
    let words = [
        push_int(1000),
        op_word(Op::WaitMillis, 0),
        op_word(Op::Halt, 0),
    ];
    m.store_code_chunk(0, &chunk_body(ChunkType::StartHat, &words));
    m.start_task_for_chunk(0);
    m.service(); // runs to the wait

    for _ in 0..100 {
        m.service();
    }
    assert_eq!(m.tasks[0].status, TaskStatus::WaitingMillis);
}

#[test]
fn when_condition_hats_poll_in_bytecode() {
    // a when-hat compiles to: <condition>; jmpFalse back; <body>
    let mut m = machine();
    let words = [
        op_word(Op::PushVar, 0),      // 0: condition: var0
        op_word(Op::JmpFalse, -2),    // 1: false -> poll again (yields)
        push_int(123),                // 2: body
        op_word(Op::PopVar, 1),
        op_word(Op::Halt, 0),
    ];
    m.store_code_chunk(0, &chunk_body(ChunkType::WhenConditionHat, &words));
    m.start_all();

    for _ in 0..20 {
        m.service();
    }
    assert_eq!(m.var(1), Obj::zero(), "body must not run while false");
    assert_eq!(m.active_task_count(), 1);

    m.set_var(0, Obj::TRUE);
    for _ in 0..5 {
        m.service();
    }
    assert_eq!(m.var(1), Obj::int(123));
    assert_eq!(m.active_task_count(), 0);
}

// --- persistence interplay ---

#[test]
fn reboot_restores_scripts_from_flash() {
    let mut m = machine();
    let body = chunk_body(
        ChunkType::StartHat,
        &[push_int(31), op_word(Op::ReturnResult, 0)],
    );
    m.store_code_chunk(6, &body);

    // reboot: new machine over the same flash
    let flash = m.store.into_flash();
    let mut m = machine_on(flash, 0);
    m.start_task_for_chunk(6);
    assert!(m.run_until_done(100));

    let frames = drain(&mut m);
    assert_eq!(frames_of_type(&frames, MessageType::TaskReturnedValue), 1);
}

#[test]
fn compaction_mid_run_keeps_tasks_alive() {
    let mut m = machine();
    // a long-lived counting task
    let words = [
        push_int(1),                  // 0
        op_word(Op::IncrementVar, 0), // 1
        op_word(Op::Jmp, -3),         // 2 -> 0 (yields)
    ];
    m.store_code_chunk(0, &chunk_body(ChunkType::StartHat, &words));
    m.start_task_for_chunk(0);
    let cycle_before = m.store.cycle_count(m.store.current_half());

    // flood the store with chunk updates until it compacts several times
    let filler = chunk_body(ChunkType::Command, &[op_word(Op::Halt, 0); 8]);
    for round in 0..200 {
        let id = 1 + (round % 8) as u8;
        m.platform
            .host_sends_long(MessageType::StoreChunk as u8, id, &filler);
        m.service();
    }
    assert!(
        m.store.cycle_count(m.store.current_half()) > cycle_before,
        "flood must force at least one compaction"
    );

    // the counting task survived every compaction and still runs
    assert_eq!(m.active_task_count(), 1);
    let counted = m.var(0).as_int();
    assert!(counted > 0);
    for _ in 0..10 {
        m.service();
    }
    assert!(m.var(0).as_int() > counted);

    let frames = drain(&mut m);
    assert_eq!(frames_of_type(&frames, MessageType::TaskError), 0);
}

#[test]
fn collect_garbage_keeps_everything_the_vm_can_reach() {
    use crate::prims::data;

    let mut m = machine();
    // reachable: a list in a global and a string on a paused task stack
    let kept = data::prim_make_list(&mut m, &[Obj::int(1), Obj::int(2)]);
    m.set_var(0, kept);
    let stack_str = m.mem.new_string(b"on the stack").unwrap();
    m.store_code_chunk(0, &chunk_body(ChunkType::StartHat, &[op_word(Op::Jmp, -1)]));
    m.start_task_for_chunk(0);
    m.tasks[0].stack[0] = stack_str;
    m.tasks[0].sp = 1;

    // unreachable: garbage with no root
    data::prim_make_list(&mut m, &[Obj::int(9); 8]);
    let free_before = m.mem.words_free();

    m.collect_garbage();

    assert!(m.mem.words_free() > free_before);
    let kept = m.var(0);
    assert_eq!(data::list_count(&m, kept), 2);
    assert_eq!(m.mem.field(kept, 2), Obj::int(2));
    assert_eq!(m.mem.string_bytes(m.tasks[0].stack[0]), b"on the stack");

    // the machine still schedules normally afterward
    for _ in 0..5 {
        m.service();
    }
    assert_eq!(m.active_task_count(), 1);
}

#[test]
fn deleting_a_chunk_mid_compaction_stops_its_task() {
    let mut m = machine();
    m.store_code_chunk(0, &chunk_body(ChunkType::StartHat, &[op_word(Op::Jmp, -1)]));
    m.start_task_for_chunk(0);
    m.delete_code_chunk(0);
    assert_eq!(m.active_task_count(), 0);

    // after a compaction the chunk is really gone
    m.store.compact();
    m.restore_scripts();
    m.start_task_for_chunk(0);
    let frames = drain(&mut m);
    assert!(frames_of_type(&frames, MessageType::TaskError) >= 1);
}
