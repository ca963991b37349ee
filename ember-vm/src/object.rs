// ember-vm - Bytecode compiler and virtual machine for the Ember programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Heap object payloads.
//!
//! Every variant lives in the [`Heap`](crate::heap::Heap) arena and is
//! referenced by key. Chunks are shared between a function object and the
//! call frames executing it via `Rc`; they are never mutated after
//! compilation.

use std::rc::Rc;

use crate::chunk::Chunk;
use crate::heap::{ObjKey, StrId};
use crate::natives::NativeFn;
use crate::table::Table;
use crate::value::Value;

/// A heap object. The GC matches exhaustively on this in its mark, size, and
/// free paths.
#[derive(Debug)]
pub enum Obj {
    Str(StrObj),
    Function(FunctionObj),
    Closure(ClosureObj),
    Upvalue(UpvalueObj),
    Class(ClassObj),
    Instance(InstanceObj),
    BoundMethod(BoundMethodObj),
    Native(NativeObj),
}

/// An interned, immutable string with its precomputed FNV-1a hash.
#[derive(Debug)]
pub struct StrObj {
    pub chars: String,
    pub hash: u32,
}

/// A compiled function prototype.
#[derive(Debug)]
pub struct FunctionObj {
    pub arity: u8,
    pub upvalue_count: usize,
    /// Shared with every call frame running this function.
    pub chunk: Rc<Chunk>,
    /// `None` for the top-level script.
    pub name: Option<StrId>,
}

/// A function plus its captured upvalues.
#[derive(Debug)]
pub struct ClosureObj {
    pub function: ObjKey,
    pub upvalues: Vec<ObjKey>,
}

/// A captured variable.
///
/// While open it aliases a live value-stack slot; once the slot's scope ends
/// the value moves inline and every capturing closure observes the same
/// storage.
#[derive(Debug)]
pub struct UpvalueObj {
    pub state: UpvalueState,
    /// Link in the VM's open-upvalue list, ordered by descending slot.
    pub next: Option<ObjKey>,
}

#[derive(Debug, Clone, Copy)]
pub enum UpvalueState {
    /// Absolute index of the captured value-stack slot.
    Open(usize),
    /// The slot's final value, owned by the upvalue itself.
    Closed(Value),
}

/// A class: a name and a method table of closures.
#[derive(Debug)]
pub struct ClassObj {
    pub name: StrId,
    pub methods: Table,
}

/// An instance of a class with its field table.
#[derive(Debug)]
pub struct InstanceObj {
    pub class: ObjKey,
    pub fields: Table,
}

/// A method closure bound to a receiver.
#[derive(Debug)]
pub struct BoundMethodObj {
    pub receiver: Value,
    pub method: ObjKey,
}

/// A host function callable from Ember code.
pub struct NativeObj {
    pub function: NativeFn,
}

impl std::fmt::Debug for NativeObj {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NativeObj(<native fn>)")
    }
}
