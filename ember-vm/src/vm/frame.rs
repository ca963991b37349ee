// ember-vm - Bytecode compiler and virtual machine for the Ember programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Call frames for the VM.

use std::rc::Rc;

use crate::chunk::Chunk;
use crate::heap::ObjKey;

/// A call frame on the VM's call stack.
#[derive(Debug, Clone)]
pub struct CallFrame {
    /// The closure being executed; a GC root while the frame is live.
    pub closure: ObjKey,

    /// The closure's function's chunk, cached here so dispatch does not go
    /// through the heap for every instruction.
    pub chunk: Rc<Chunk>,

    /// Instruction pointer (index into `chunk.code`).
    pub ip: usize,

    /// Index of the frame's stack window: slot 0 of the callee. Holds the
    /// callee itself for functions and the receiver for methods.
    pub base: usize,
}

impl CallFrame {
    /// Create a frame starting at the function's first instruction.
    pub fn new(closure: ObjKey, chunk: Rc<Chunk>, base: usize) -> Self {
        CallFrame {
            closure,
            chunk,
            ip: 0,
            base,
        }
    }
}
