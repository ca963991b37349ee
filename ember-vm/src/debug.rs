// ember-vm - Bytecode compiler and virtual machine for the Ember programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Bytecode disassembler, for tracing and debugging.

use crate::chunk::Chunk;
use crate::heap::Heap;
use crate::opcode::Op;
use crate::value::Value;

/// Print every instruction in a chunk under a heading.
pub fn disassemble_chunk(heap: &Heap, chunk: &Chunk, name: &str) {
    eprintln!("== {} ==", name);
    for offset in 0..chunk.code.len() {
        disassemble_instruction(heap, chunk, offset);
    }
}

/// Print one instruction with its offset and source line.
pub fn disassemble_instruction(heap: &Heap, chunk: &Chunk, offset: usize) {
    eprint!("{:04} ", offset);
    if offset > 0 && chunk.line(offset) == chunk.line(offset - 1) {
        eprint!("   | ");
    } else {
        eprint!("{:4} ", chunk.line(offset));
    }

    let op = match chunk.code.get(offset) {
        Some(op) => *op,
        None => {
            eprintln!("<end of chunk>");
            return;
        }
    };

    match op {
        Op::Constant(idx) => constant_instruction(heap, chunk, "CONSTANT", idx),
        Op::Nil => eprintln!("NIL"),
        Op::True => eprintln!("TRUE"),
        Op::False => eprintln!("FALSE"),
        Op::Negate => eprintln!("NEGATE"),
        Op::Add => eprintln!("ADD"),
        Op::Subtract => eprintln!("SUBTRACT"),
        Op::Multiply => eprintln!("MULTIPLY"),
        Op::Divide => eprintln!("DIVIDE"),
        Op::Modulo => eprintln!("MODULO"),
        Op::Not => eprintln!("NOT"),
        Op::Equal => eprintln!("EQUAL"),
        Op::Greater => eprintln!("GREATER"),
        Op::Less => eprintln!("LESS"),
        Op::Pop => eprintln!("POP"),
        Op::DefineGlobal(idx) => constant_instruction(heap, chunk, "DEFINE_GLOBAL", idx),
        Op::GetGlobal(idx) => constant_instruction(heap, chunk, "GET_GLOBAL", idx),
        Op::SetGlobal(idx) => constant_instruction(heap, chunk, "SET_GLOBAL", idx),
        Op::GetLocal(slot) => eprintln!("GET_LOCAL        {}", slot),
        Op::SetLocal(slot) => eprintln!("SET_LOCAL        {}", slot),
        Op::GetUpvalue(slot) => eprintln!("GET_UPVALUE      {}", slot),
        Op::SetUpvalue(slot) => eprintln!("SET_UPVALUE      {}", slot),
        Op::CloseUpvalue => eprintln!("CLOSE_UPVALUE"),
        Op::Jump(distance) => jump_instruction("JUMP", offset, distance as isize),
        Op::JumpIfFalse(distance) => jump_instruction("JUMP_IF_FALSE", offset, distance as isize),
        Op::Loop(distance) => jump_instruction("LOOP", offset, -(distance as isize)),
        Op::Call(argc) => eprintln!("CALL             {}", argc),
        Op::Closure(idx) => constant_instruction(heap, chunk, "CLOSURE", idx),
        Op::CaptureLocal(index) => eprintln!("   |  capture local {}", index),
        Op::CaptureUpvalue(index) => eprintln!("   |  capture upvalue {}", index),
        Op::Return => eprintln!("RETURN"),
        Op::Class(idx) => constant_instruction(heap, chunk, "CLASS", idx),
        Op::Method(idx) => constant_instruction(heap, chunk, "METHOD", idx),
        Op::Inherit => eprintln!("INHERIT"),
        Op::GetProperty(idx) => constant_instruction(heap, chunk, "GET_PROPERTY", idx),
        Op::SetProperty(idx) => constant_instruction(heap, chunk, "SET_PROPERTY", idx),
        Op::GetSuper(idx) => constant_instruction(heap, chunk, "GET_SUPER", idx),
        Op::Invoke(idx, argc) => invoke_instruction(heap, chunk, "INVOKE", idx, argc),
        Op::SuperInvoke(idx, argc) => invoke_instruction(heap, chunk, "SUPER_INVOKE", idx, argc),
        Op::Print => eprintln!("PRINT"),
    }
}

fn constant_instruction(heap: &Heap, chunk: &Chunk, name: &str, idx: u8) {
    let value = chunk
        .constants
        .get(idx as usize)
        .copied()
        .unwrap_or(Value::Nil);
    eprintln!("{:<16} {} '{}'", name, idx, value.show(heap));
}

fn invoke_instruction(heap: &Heap, chunk: &Chunk, name: &str, idx: u8, argc: u8) {
    let value = chunk
        .constants
        .get(idx as usize)
        .copied()
        .unwrap_or(Value::Nil);
    eprintln!("{:<16} ({} args) {} '{}'", name, argc, idx, value.show(heap));
}

fn jump_instruction(name: &str, offset: usize, distance: isize) {
    let target = offset as isize + 1 + distance;
    eprintln!("{:<16} {} -> {}", name, offset, target);
}
