// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 The Tessera Authors

//! Tests for the interpreter: opcode semantics, the call convention,
//! suspension points, and error reporting.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::bytecode::{Op, call_word, immediate_arg, op_word, string_literal_words};
use crate::mem::ObjMem;
use crate::persist::{CodeStore, StoreConfig};
use crate::platform::{Frame, MockPlatform, RamFlash, parse_frames};
use crate::runtime::{Machine, TaskStatus};
use crate::value::Obj;
use tessera_abi::chunk::ChunkType;
use tessera_abi::error::ErrorCode;
use tessera_abi::protocol::MessageType;

type TestMachine = Machine<RamFlash, MockPlatform>;

fn machine() -> TestMachine {
    let flash = RamFlash::new(2048, 64);
    let store = CodeStore::new(flash, StoreConfig { half_space_words: 1024 }).unwrap();
    let mut m = Machine::new(ObjMem::new(4096), store, MockPlatform::new(7));
    m.restore_scripts();
    m
}

fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

fn store_chunk(m: &mut TestMachine, id: u8, chunk_type: ChunkType, words: &[u32]) {
    let mut body = vec![chunk_type as u8];
    body.extend(words_to_bytes(words));
    m.store_code_chunk(id, &body);
}

fn push_int(n: i32) -> u32 {
    op_word(Op::PushImmediate, immediate_arg(Obj::int(n)).unwrap())
}

/// Store a chunk, run it as a task, and return every emitted frame.
fn run_chunk(m: &mut TestMachine, words: &[u32]) -> Vec<Frame> {
    store_chunk(m, 0, ChunkType::StartHat, words);
    m.start_task_for_chunk(0);
    assert!(m.run_until_done(10_000), "task should finish");
    m.flush_output();
    parse_frames(&m.platform.take_output())
}

/// A decoded typed-value payload.
#[derive(Debug, PartialEq, Eq)]
enum Sent {
    Int(i32),
    Str(Vec<u8>),
    Bool(bool),
}

fn decode_value(body: &[u8]) -> Sent {
    match body[0] {
        1 => Sent::Int(i32::from_le_bytes([body[1], body[2], body[3], body[4]])),
        2 => Sent::Str(body[1..].to_vec()),
        3 => Sent::Bool(body[1] != 0),
        other => panic!("unknown value type {other}"),
    }
}

/// The value returned by the first `taskReturnedValue` frame.
fn returned(frames: &[Frame]) -> Sent {
    frames
        .iter()
        .find_map(|f| match f {
            Frame::Long { msg_type, body, .. }
                if *msg_type == MessageType::TaskReturnedValue as u8 =>
            {
                Some(decode_value(body))
            }
            _ => None,
        })
        .expect("no taskReturnedValue frame")
}

fn task_errors(frames: &[Frame]) -> Vec<(u8, u32)> {
    frames
        .iter()
        .filter_map(|f| match f {
            Frame::Long { msg_type, body, .. } if *msg_type == MessageType::TaskError as u8 => {
                Some((
                    body[0],
                    u32::from_le_bytes([body[1], body[2], body[3], body[4]]),
                ))
            }
            _ => None,
        })
        .collect()
}

// --- scenario: push 42, return it ---

#[test]
fn return_immediate_emits_started_and_value() {
    let mut m = machine();
    let frames = run_chunk(
        &mut m,
        &[push_int(42), op_word(Op::ReturnResult, 0)],
    );

    assert_eq!(
        frames[0],
        Frame::Short {
            msg_type: MessageType::TaskStarted as u8,
            id: 0
        }
    );
    assert_eq!(returned(&frames), Sent::Int(42));
}

#[test]
fn halt_emits_task_done() {
    let mut m = machine();
    let frames = run_chunk(&mut m, &[op_word(Op::Halt, 0)]);
    assert!(frames.contains(&Frame::Short {
        msg_type: MessageType::TaskDone as u8,
        id: 0
    }));
}

// --- literals and immediates ---

#[test]
fn big_immediate_round_trips() {
    let mut m = machine();
    let value = Obj::int(0x1234_5678);
    let frames = run_chunk(
        &mut m,
        &[
            op_word(Op::PushBigImmediate, 0),
            value.raw(),
            op_word(Op::ReturnResult, 0),
        ],
    );
    assert_eq!(returned(&frames), Sent::Int(0x1234_5678));
}

#[test]
fn negative_immediate_sign_extends() {
    let mut m = machine();
    let frames = run_chunk(&mut m, &[push_int(-7), op_word(Op::ReturnResult, 0)]);
    assert_eq!(returned(&frames), Sent::Int(-7));
}

#[test]
fn push_literal_reads_string_from_code_space() {
    // code: pushLiteral L; returnResult; L: <string "tile">
    let mut code = vec![op_word(Op::PushLiteral, 1), op_word(Op::ReturnResult, 0)];
    code.extend(string_literal_words("tile"));

    let mut m = machine();
    let frames = run_chunk(&mut m, &code);
    assert_eq!(returned(&frames), Sent::Str(b"tile".to_vec()));
}

// --- arithmetic ---

fn binary_op(m: &mut TestMachine, a: i32, b: i32, op: Op) -> Vec<Frame> {
    run_chunk(
        m,
        &[
            push_int(a),
            push_int(b),
            op_word(op, 2),
            op_word(Op::ReturnResult, 0),
        ],
    )
}

#[test]
fn integer_arithmetic() {
    let mut m = machine();
    assert_eq!(returned(&binary_op(&mut m, 2, 3, Op::Add)), Sent::Int(5));
    let mut m = machine();
    assert_eq!(
        returned(&binary_op(&mut m, 10, 3, Op::Subtract)),
        Sent::Int(7)
    );
    let mut m = machine();
    assert_eq!(
        returned(&binary_op(&mut m, 6, 7, Op::Multiply)),
        Sent::Int(42)
    );
    let mut m = machine();
    assert_eq!(returned(&binary_op(&mut m, 20, 4, Op::Divide)), Sent::Int(5));
    let mut m = machine();
    assert_eq!(returned(&binary_op(&mut m, 17, 5, Op::Modulo)), Sent::Int(2));
}

#[test]
fn division_by_zero_fails_the_task() {
    let mut m = machine();
    let frames = binary_op(&mut m, 1, 0, Op::Divide);
    let errors = task_errors(&frames);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, ErrorCode::DivideByZero.as_byte());
    // location encodes (ip << 8) | chunkIndex; chunk 0, ip past the divide
    assert_eq!(errors[0].1 & 0xFF, 0);
    assert!(errors[0].1 >> 8 >= 3);
}

#[test]
fn smallest_int_divided_by_minus_one_wraps() {
    // -2^30 / -1 is 2^30, which wraps to -2^30 in the 31-bit encoding
    let mut m = machine();
    let frames = run_chunk(
        &mut m,
        &[
            op_word(Op::PushBigImmediate, 0),
            Obj::int(crate::value::INT_MIN).raw(),
            push_int(-1),
            op_word(Op::Divide, 2),
            op_word(Op::ReturnResult, 0),
        ],
    );
    assert_eq!(returned(&frames), Sent::Int(crate::value::INT_MIN));
    assert!(task_errors(&frames).is_empty());
}

#[test]
fn arithmetic_on_a_boolean_needs_integer() {
    let mut m = machine();
    let frames = run_chunk(
        &mut m,
        &[
            push_int(1),
            op_word(Op::PushImmediate, immediate_arg(Obj::TRUE).unwrap()),
            op_word(Op::Add, 2),
            op_word(Op::ReturnResult, 0),
        ],
    );
    assert_eq!(
        task_errors(&frames)[0].0,
        ErrorCode::NeedsInteger.as_byte()
    );
}

// --- comparison and logic ---

#[test]
fn comparisons() {
    let mut m = machine();
    assert_eq!(
        returned(&binary_op(&mut m, 1, 2, Op::LessThan)),
        Sent::Bool(true)
    );
    let mut m = machine();
    assert_eq!(
        returned(&binary_op(&mut m, 2, 2, Op::LessOrEq)),
        Sent::Bool(true)
    );
    let mut m = machine();
    assert_eq!(
        returned(&binary_op(&mut m, 1, 2, Op::GreaterThan)),
        Sent::Bool(false)
    );
    let mut m = machine();
    assert_eq!(
        returned(&binary_op(&mut m, 3, 3, Op::GreaterOrEq)),
        Sent::Bool(true)
    );
}

#[test]
fn equal_on_identical_ints() {
    let mut m = machine();
    assert_eq!(
        returned(&binary_op(&mut m, 42, 42, Op::Equal)),
        Sent::Bool(true)
    );
    let mut m = machine();
    assert_eq!(
        returned(&binary_op(&mut m, 1, 2, Op::Equal)),
        Sent::Bool(false)
    );
}

#[test]
fn equal_compares_string_content() {
    // two separate literals with the same text
    let mut code = vec![
        op_word(Op::PushLiteral, 3), // literal at word 4
        op_word(Op::PushLiteral, 4), // literal at word 6
        op_word(Op::Equal, 2),
        op_word(Op::ReturnResult, 0),
    ];
    code.extend(string_literal_words("abc")); // words 4..=5
    code.extend(string_literal_words("abc")); // words 6..=7

    let mut m = machine();
    let frames = run_chunk(&mut m, &code);
    assert_eq!(returned(&frames), Sent::Bool(true));
}

#[test]
fn equal_false_against_value_is_non_comparable() {
    let mut m = machine();
    let frames = run_chunk(
        &mut m,
        &[
            op_word(Op::PushImmediate, immediate_arg(Obj::FALSE).unwrap()),
            push_int(3),
            op_word(Op::Equal, 2),
            op_word(Op::ReturnResult, 0),
        ],
    );
    assert_eq!(
        task_errors(&frames)[0].0,
        ErrorCode::NonComparable.as_byte()
    );
}

#[test]
fn not_inverts_booleans_only() {
    let mut m = machine();
    let frames = run_chunk(
        &mut m,
        &[
            op_word(Op::PushImmediate, immediate_arg(Obj::TRUE).unwrap()),
            op_word(Op::Not, 1),
            op_word(Op::ReturnResult, 0),
        ],
    );
    assert_eq!(returned(&frames), Sent::Bool(false));

    let mut m = machine();
    let frames = run_chunk(
        &mut m,
        &[push_int(1), op_word(Op::Not, 1), op_word(Op::ReturnResult, 0)],
    );
    assert_eq!(task_errors(&frames)[0].0, ErrorCode::NeedsBoolean.as_byte());
}

// --- variables ---

#[test]
fn global_variables_round_trip() {
    let mut m = machine();
    let frames = run_chunk(
        &mut m,
        &[
            push_int(11),
            op_word(Op::PopVar, 3),
            op_word(Op::PushVar, 3),
            op_word(Op::ReturnResult, 0),
        ],
    );
    assert_eq!(returned(&frames), Sent::Int(11));
    assert_eq!(m.var(3), Obj::int(11));
}

#[test]
fn increment_var_accumulates() {
    let mut m = machine();
    run_chunk(
        &mut m,
        &[
            push_int(5),
            op_word(Op::IncrementVar, 0),
            push_int(7),
            op_word(Op::IncrementVar, 0),
            op_word(Op::Halt, 0),
        ],
    );
    assert_eq!(m.var(0), Obj::int(12));
}

// --- control flow and yielding ---

#[test]
fn backward_jump_yields_but_stays_runnable() {
    let mut m = machine();
    // an infinite loop: jmp -1 re-executes itself forever
    store_chunk(&mut m, 0, ChunkType::StartHat, &[op_word(Op::Jmp, -1)]);
    m.start_task_for_chunk(0);

    for _ in 0..50 {
        m.service(); // must not spin forever inside one slice
    }
    assert_eq!(m.active_task_count(), 1);
}

#[test]
fn forward_jump_skips() {
    let mut m = machine();
    let frames = run_chunk(
        &mut m,
        &[
            op_word(Op::Jmp, 1),
            push_int(1), // skipped
            push_int(2),
            op_word(Op::ReturnResult, 0),
        ],
    );
    assert_eq!(returned(&frames), Sent::Int(2));
}

#[test]
fn jmp_false_takes_branch_on_false() {
    let mut m = machine();
    let frames = run_chunk(
        &mut m,
        &[
            op_word(Op::PushImmediate, immediate_arg(Obj::FALSE).unwrap()),
            op_word(Op::JmpFalse, 1),
            push_int(1), // skipped
            push_int(2),
            op_word(Op::ReturnResult, 0),
        ],
    );
    assert_eq!(returned(&frames), Sent::Int(2));
}

#[test]
fn decrement_and_jmp_counts_and_yields() {
    // push 4 iterations; each loop edge increments var 0 and yields
    let mut m = machine();
    let frames = run_chunk(
        &mut m,
        &[
            push_int(4),
            push_int(1),                       // 1: loop body
            op_word(Op::IncrementVar, 0),      // 2
            op_word(Op::DecrementAndJmp, -3),  // 3: back to 1
            op_word(Op::Halt, 0),
        ],
    );
    assert_eq!(m.var(0), Obj::int(4));
    assert!(task_errors(&frames).is_empty());
}

#[test]
fn million_increments_reach_exactly_a_million() {
    let mut m = machine();
    store_chunk(
        &mut m,
        0,
        ChunkType::StartHat,
        &[
            op_word(Op::PushBigImmediate, 0),
            Obj::int(1_000_000).raw(),
            push_int(1),                      // 2: loop body
            op_word(Op::IncrementVar, 0),     // 3
            op_word(Op::DecrementAndJmp, -3), // 4: back to 2
            op_word(Op::Halt, 0),
        ],
    );
    m.start_task_for_chunk(0);
    assert!(m.run_until_done(1_100_000));
    assert_eq!(m.var(0), Obj::int(1_000_000));

    // the IDE reads the result back over the wire
    m.platform.take_output();
    m.platform.host_sends_short(MessageType::GetVar as u8, 0);
    m.service();
    m.flush_output();
    let frames = parse_frames(&m.platform.take_output());
    match &frames[0] {
        Frame::Long { msg_type, id, body } => {
            assert_eq!(*msg_type, MessageType::ArgValue as u8);
            assert_eq!(*id, 0);
            assert_eq!(decode_value(body), Sent::Int(1_000_000));
        }
        Frame::Short { .. } => panic!("expected a long frame"),
    }
}

// --- function calls ---

#[test]
fn call_function_passes_args_and_returns() {
    let mut m = machine();
    // chunk 1: add its two arguments
    store_chunk(
        &mut m,
        1,
        ChunkType::FunctionHat,
        &[
            op_word(Op::PushArg, 0),
            op_word(Op::PushArg, 1),
            op_word(Op::Add, 2),
            op_word(Op::ReturnResult, 0),
        ],
    );
    let frames = run_chunk(
        &mut m,
        &[
            push_int(3),
            push_int(4),
            call_word(1, 2, 0),
            op_word(Op::ReturnResult, 0),
        ],
    );
    assert_eq!(returned(&frames), Sent::Int(7));
}

#[test]
fn locals_are_zero_initialized_and_writable() {
    let mut m = machine();
    // chunk 1: local0 = arg0 + 5; return local0 + argCount
    store_chunk(
        &mut m,
        1,
        ChunkType::FunctionHat,
        &[
            op_word(Op::PushArg, 0),
            push_int(5),
            op_word(Op::Add, 2),
            op_word(Op::PopLocal, 0),
            op_word(Op::PushLocal, 0),
            op_word(Op::PushArgCount, 0),
            op_word(Op::Add, 2),
            op_word(Op::ReturnResult, 0),
        ],
    );
    let frames = run_chunk(
        &mut m,
        &[push_int(10), call_word(1, 1, 1), op_word(Op::ReturnResult, 0)],
    );
    assert_eq!(returned(&frames), Sent::Int(16));
}

#[test]
fn nested_calls_restore_caller_state() {
    let mut m = machine();
    // chunk 2: double the argument
    store_chunk(
        &mut m,
        2,
        ChunkType::FunctionHat,
        &[
            op_word(Op::PushArg, 0),
            op_word(Op::PushArg, 0),
            op_word(Op::Add, 2),
            op_word(Op::ReturnResult, 0),
        ],
    );
    // chunk 1: double(arg) + 1
    store_chunk(
        &mut m,
        1,
        ChunkType::FunctionHat,
        &[
            op_word(Op::PushArg, 0),
            call_word(2, 1, 0),
            push_int(1),
            op_word(Op::Add, 2),
            op_word(Op::ReturnResult, 0),
        ],
    );
    let frames = run_chunk(
        &mut m,
        &[push_int(20), call_word(1, 1, 0), op_word(Op::ReturnResult, 0)],
    );
    assert_eq!(returned(&frames), Sent::Int(41));
}

#[test]
fn calling_a_missing_chunk_reports_bad_chunk_index() {
    let mut m = machine();
    let frames = run_chunk(&mut m, &[call_word(200, 0, 0), op_word(Op::ReturnResult, 0)]);
    assert_eq!(
        task_errors(&frames)[0].0,
        ErrorCode::BadChunkIndex.as_byte()
    );
}

// --- waits ---

#[test]
fn wait_millis_sleeps_until_due() {
    let mut m = machine();
    m.platform.set_micros(0);
    store_chunk(
        &mut m,
        0,
        ChunkType::StartHat,
        &[push_int(10), op_word(Op::WaitMillis, 0), op_word(Op::Halt, 0)],
    );
    m.start_task_for_chunk(0);
    m.service(); // runs until the wait
    assert_eq!(m.tasks[0].status, TaskStatus::WaitingMillis);

    m.service(); // not due yet
    assert_eq!(m.tasks[0].status, TaskStatus::WaitingMillis);

    m.platform.advance_micros(11 * 1024); // ~11ms
    m.service(); // wakes and halts
    assert_eq!(m.active_task_count(), 0);
}

#[test]
fn wait_millis_zero_still_yields() {
    let mut m = machine();
    // task A: forever { waitMillis 0 }
    store_chunk(
        &mut m,
        0,
        ChunkType::StartHat,
        &[
            push_int(0),                 // 0
            op_word(Op::WaitMillis, 0),  // 1
            op_word(Op::Jmp, -3),        // 2
        ],
    );
    // task B: count 20 loop iterations, then halt
    store_chunk(
        &mut m,
        1,
        ChunkType::StartHat,
        &[
            push_int(20),
            push_int(1),
            op_word(Op::IncrementVar, 1),
            op_word(Op::DecrementAndJmp, -3),
            op_word(Op::Halt, 0),
        ],
    );
    m.start_task_for_chunk(0);
    m.start_task_for_chunk(1);

    // B must finish even though A never terminates
    for _ in 0..500 {
        m.service();
    }
    assert_eq!(m.var(1), Obj::int(20));
    assert_eq!(m.active_task_count(), 1); // only A remains
}

#[test]
fn wait_micros_tolerates_clock_wrap() {
    let mut m = machine();
    m.platform.set_micros(u32::MAX - 50);
    store_chunk(
        &mut m,
        0,
        ChunkType::StartHat,
        &[push_int(100), op_word(Op::WaitMicros, 0), op_word(Op::Halt, 0)],
    );
    m.start_task_for_chunk(0);
    m.service(); // sleeps across the wrap boundary
    assert_eq!(m.tasks[0].status, TaskStatus::WaitingMicros);

    m.platform.set_micros(60); // clock wrapped; 110us elapsed
    m.service();
    assert_eq!(m.active_task_count(), 0);
}

// --- output and backpressure ---

#[test]
fn print_emits_output_value_with_joined_text() {
    let mut code = vec![
        op_word(Op::PushLiteral, 3), // "x =" at word 4
        push_int(5),
        op_word(Op::PrintIt, 2),
        op_word(Op::Halt, 0),
    ];
    code.extend(string_literal_words("x ="));

    let mut m = machine();
    let frames = run_chunk(&mut m, &code);
    let printed = frames
        .iter()
        .find_map(|f| match f {
            Frame::Long { msg_type, body, .. }
                if *msg_type == MessageType::OutputValue as u8 =>
            {
                Some(decode_value(body))
            }
            _ => None,
        })
        .unwrap();
    assert_eq!(printed, Sent::Str(b"x = 5".to_vec()));
}

#[test]
fn say_it_reports_value_for_its_chunk() {
    let mut m = machine();
    let frames = run_chunk(
        &mut m,
        &[push_int(9), op_word(Op::SayIt, 1), op_word(Op::Halt, 0)],
    );
    let said = frames
        .iter()
        .find(|f| f.msg_type() == MessageType::OutputValue as u8)
        .unwrap();
    match said {
        Frame::Long { id, body, .. } => {
            assert_eq!(*id, 0);
            assert_eq!(decode_value(body), Sent::Int(9));
        }
        Frame::Short { .. } => panic!("outputValue must be long"),
    }
}

#[test]
fn full_output_buffer_backs_up_and_retries() {
    let mut code = vec![
        op_word(Op::PushLiteral, 3), // 0: literal at word 4
        op_word(Op::PrintIt, 1),     // 1
        op_word(Op::Pop, 1),         // 2
        op_word(Op::Jmp, -4),        // 3: forever
    ];
    code.extend(string_literal_words("a fairly long line of output"));

    let mut m = machine();
    store_chunk(&mut m, 0, ChunkType::StartHat, &code);
    // stall the channel completely so the ring buffer fills
    m.platform.set_send_limit(Some(0));
    m.start_task_for_chunk(0);

    for _ in 0..200 {
        m.service();
    }
    // no errors, task alive and parked on the retry
    assert_eq!(m.active_task_count(), 1);

    // open the channel and let it drain; output must be well-formed
    m.platform.set_send_limit(None);
    for _ in 0..50 {
        m.service();
    }
    m.flush_output();
    let frames = parse_frames(&m.platform.take_output());
    assert!(frames.len() > 20);
    assert!(
        frames
            .iter()
            .all(|f| f.msg_type() != MessageType::TaskError as u8)
    );
}

// --- stopAll ---

#[test]
fn stop_all_clears_every_task_immediately() {
    let mut m = machine();
    store_chunk(&mut m, 0, ChunkType::StartHat, &[op_word(Op::Jmp, -1)]);
    store_chunk(
        &mut m,
        1,
        ChunkType::StartHat,
        &[op_word(Op::StopAll, 0), op_word(Op::Halt, 0)],
    );
    m.start_task_for_chunk(0);
    m.start_task_for_chunk(1);
    m.platform.take_output();

    // run both: task 0 yields on its loop, task 1 stops the world
    m.service();
    m.service();
    assert_eq!(m.active_task_count(), 0);

    m.flush_output();
    let frames = parse_frames(&m.platform.take_output());
    let dones = frames
        .iter()
        .filter(|f| f.msg_type() == MessageType::TaskDone as u8)
        .count();
    assert_eq!(dones, 2);
}

// --- indexing opcodes ---

#[test]
fn at_indexes_a_string_literal_by_code_point() {
    let mut code = vec![
        push_int(2),
        op_word(Op::PushLiteral, 2), // literal after returnResult
        op_word(Op::At, 2),
        op_word(Op::ReturnResult, 0),
    ];
    code.extend(string_literal_words("héllo"));

    let mut m = machine();
    let frames = run_chunk(&mut m, &code);
    assert_eq!(returned(&frames), Sent::Str("é".as_bytes().to_vec()));
}

#[test]
fn at_out_of_range_fails() {
    let mut code = vec![
        push_int(6),
        op_word(Op::PushLiteral, 2),
        op_word(Op::At, 2),
        op_word(Op::ReturnResult, 0),
    ];
    code.extend(string_literal_words("hello"));

    let mut m = machine();
    let frames = run_chunk(&mut m, &code);
    assert_eq!(
        task_errors(&frames)[0].0,
        ErrorCode::IndexOutOfRange.as_byte()
    );
}

#[test]
fn new_array_fill_and_at_put_round_trip() {
    let mut m = machine();
    let frames = run_chunk(
        &mut m,
        &[
            push_int(3),
            op_word(Op::NewArray, 1),  // [0,0,0]
            op_word(Op::PopVar, 9),
            push_int(2),               // index
            op_word(Op::PushVar, 9),
            push_int(55),              // value
            op_word(Op::AtPut, 3),
            op_word(Op::Pop, 1),
            push_int(2),
            op_word(Op::PushVar, 9),
            op_word(Op::At, 2),
            op_word(Op::ReturnResult, 0),
        ],
    );
    assert_eq!(returned(&frames), Sent::Int(55));
}

// --- board slots ---

#[test]
fn unregistered_board_opcode_fails_gracefully() {
    let mut m = machine();
    let frames = run_chunk(
        &mut m,
        &[push_int(1), op_word(Op::AnalogRead, 1), op_word(Op::ReturnResult, 0)],
    );
    assert_eq!(
        task_errors(&frames)[0].0,
        ErrorCode::PrimitiveNotImplemented.as_byte()
    );
}

#[test]
fn registered_board_slot_is_called() {
    use crate::prims::BoardSlot;

    fn fake_analog_read(
        m: &mut TestMachine,
        args: &[Obj],
    ) -> Obj {
        let pin = m.eval_int(args[0]);
        Obj::int(pin * 100)
    }

    let mut m = machine();
    m.registry
        .set_board_slot(BoardSlot::AnalogRead, fake_analog_read);
    let frames = run_chunk(
        &mut m,
        &[push_int(3), op_word(Op::AnalogRead, 1), op_word(Op::ReturnResult, 0)],
    );
    assert_eq!(returned(&frames), Sent::Int(300));
}

// --- clocks ---

#[test]
fn micros_pushes_the_truncated_clock() {
    let mut m = machine();
    m.platform.set_micros(0x7FFF_FFFF);
    let frames = run_chunk(
        &mut m,
        &[op_word(Op::Micros, 0), op_word(Op::ReturnResult, 0)],
    );
    // low 30 bits only, so the value is positive
    match returned(&frames) {
        Sent::Int(n) => assert!(n >= 0),
        other => panic!("expected int, got {other:?}"),
    }
}

// --- malformed code ---

#[test]
fn bad_opcode_fails_the_task() {
    let mut m = machine();
    let frames = run_chunk(&mut m, &[op_word(Op::Noop, 0) | 0xF0, op_word(Op::Halt, 0)]);
    let errors = task_errors(&frames);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, ErrorCode::Unspecified.as_byte());
}

#[test]
fn runaway_code_cannot_escape_the_store() {
    let mut m = machine();
    // no returnResult: execution runs into erased flash and fails
    let frames = run_chunk(&mut m, &[push_int(1)]);
    assert_eq!(task_errors(&frames).len(), 1);
}
