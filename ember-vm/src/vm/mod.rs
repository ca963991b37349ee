// ember-vm - Bytecode compiler and virtual machine for the Ember programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Stack-based virtual machine for executing Ember bytecode.
//!
//! One `Vm` owns the heap, the value and call stacks, the globals table, and
//! the open-upvalue list. Collection happens only at the VM's allocation
//! wrappers; any value an instruction needs to survive an allocating call is
//! kept on the value stack across it. After a runtime error the stacks are
//! reset but globals, interned strings, and the heap survive, so a REPL can
//! keep going.

pub mod error;
pub mod frame;
pub mod stack;

use std::io::{self, Write};

use crate::compiler::compile;
use crate::debug;
use crate::heap::{Heap, ObjKey, RootSet, StrId};
use crate::natives::{clock_native, NativeFn};
use crate::object::{
    BoundMethodObj, ClassObj, ClosureObj, InstanceObj, NativeObj, Obj, UpvalueObj, UpvalueState,
};
use crate::opcode::Op;
use crate::table::Table;
use crate::value::Value;

pub use error::{InterpretError, RuntimeError, TraceFrame};
pub use frame::CallFrame;
pub use stack::ValueStack;

/// Maximum call depth.
pub const FRAMES_MAX: usize = 64;

/// Maximum value-stack depth.
pub const STACK_MAX: usize = FRAMES_MAX * 256;

type OpResult = Result<(), RuntimeError>;

/// The Ember virtual machine.
pub struct Vm {
    heap: Heap,
    stack: ValueStack,
    frames: Vec<CallFrame>,
    globals: Table,
    /// Head of the intrusive open-upvalue list, ordered by descending slot.
    open_upvalues: Option<ObjKey>,
    /// Cached so constructor lookup is a table probe, and a GC root.
    init_string: StrId,
    out: Box<dyn Write>,
    gc_stress: bool,
    trace_execution: bool,
}

impl Vm {
    /// Create a VM printing to stdout.
    pub fn new() -> Self {
        Vm::with_output(Box::new(io::stdout()))
    }

    /// Create a VM with `print` output routed to the given writer.
    pub fn with_output(out: Box<dyn Write>) -> Self {
        let mut heap = Heap::new();
        let init_string = heap.intern("init");

        let mut vm = Vm {
            heap,
            stack: ValueStack::new(),
            frames: Vec::with_capacity(FRAMES_MAX),
            globals: Table::new(),
            open_upvalues: None,
            init_string,
            out,
            gc_stress: false,
            trace_execution: false,
        };
        vm.define_native("clock", clock_native);
        vm
    }

    /// Collect on every allocation instead of waiting for the threshold.
    pub fn set_gc_stress(&mut self, stress: bool) {
        self.gc_stress = stress;
    }

    /// Log collections to stderr.
    pub fn set_gc_log(&mut self, log: bool) {
        self.heap.set_log_gc(log);
    }

    /// Print the stack and each instruction before dispatching it.
    pub fn set_trace(&mut self, trace: bool) {
        self.trace_execution = trace;
    }

    /// The VM's heap, for inspection.
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Compile and run a source string.
    pub fn interpret(&mut self, source: &str) -> Result<(), InterpretError> {
        let function = compile(source, &mut self.heap).map_err(InterpretError::Compile)?;

        self.stack.push(Value::Obj(function));
        let closure = self.gc_alloc(Obj::Closure(ClosureObj {
            function,
            upvalues: Vec::new(),
        }));
        let _ = self.stack.pop();
        self.stack.push(Value::Obj(closure));

        let result = self
            .call_value(Value::Obj(closure), 0)
            .and_then(|_| self.run());

        match result {
            Ok(()) => Ok(()),
            Err(error) => {
                self.reset_stack();
                Err(InterpretError::Runtime(error))
            }
        }
    }

    // ------------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------------

    fn run(&mut self) -> OpResult {
        loop {
            if self.trace_execution {
                self.trace_instruction();
            }

            match self.read_op()? {
                Op::Constant(idx) => {
                    let value = self.read_constant(idx)?;
                    self.stack.push(value);
                }
                Op::Nil => self.stack.push(Value::Nil),
                Op::True => self.stack.push(Value::Bool(true)),
                Op::False => self.stack.push(Value::Bool(false)),

                Op::Negate => match self.peek(0)? {
                    Value::Number(n) => {
                        self.pop()?;
                        self.stack.push(Value::Number(-n));
                    }
                    _ => return Err(self.error("Operand must be a number.")),
                },
                Op::Add => self.add()?,
                Op::Subtract => self.binary_number_op(|a, b| Value::Number(a - b))?,
                Op::Multiply => self.binary_number_op(|a, b| Value::Number(a * b))?,
                Op::Divide => self.binary_number_op(|a, b| Value::Number(a / b))?,
                Op::Modulo => self.modulo()?,

                Op::Not => {
                    let value = self.pop()?;
                    self.stack.push(Value::Bool(value.is_falsy()));
                }
                Op::Equal => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(Value::Bool(a == b));
                }
                Op::Greater => self.binary_number_op(|a, b| Value::Bool(a > b))?,
                Op::Less => self.binary_number_op(|a, b| Value::Bool(a < b))?,

                Op::Pop => {
                    self.pop()?;
                }

                Op::DefineGlobal(idx) => {
                    let name = self.read_string(idx)?;
                    let value = self.peek(0)?;
                    self.globals.set(name, value);
                    self.pop()?;
                }
                Op::GetGlobal(idx) => {
                    let name = self.read_string(idx)?;
                    match self.globals.get(name) {
                        Some(value) => self.stack.push(value),
                        None => {
                            return Err(self.undefined_variable(name));
                        }
                    }
                }
                Op::SetGlobal(idx) => {
                    let name = self.read_string(idx)?;
                    let value = self.peek(0)?;
                    if self.globals.set(name, value) {
                        // The assignment created the key; roll it back.
                        self.globals.delete(name);
                        return Err(self.undefined_variable(name));
                    }
                }
                Op::GetLocal(slot) => {
                    let base = self.frame()?.base;
                    let value = self.stack_get(base + slot as usize)?;
                    self.stack.push(value);
                }
                Op::SetLocal(slot) => {
                    let value = self.peek(0)?;
                    let base = self.frame()?.base;
                    self.stack_set(base + slot as usize, value)?;
                }
                Op::GetUpvalue(slot) => {
                    let upvalue = self.frame_upvalue(slot)?;
                    let value = match self.heap.get(upvalue) {
                        Some(Obj::Upvalue(u)) => match u.state {
                            UpvalueState::Open(stack_slot) => self.stack_get(stack_slot)?,
                            UpvalueState::Closed(value) => value,
                        },
                        _ => return Err(RuntimeError::internal("missing upvalue")),
                    };
                    self.stack.push(value);
                }
                Op::SetUpvalue(slot) => {
                    let value = self.peek(0)?;
                    let upvalue = self.frame_upvalue(slot)?;
                    let open_slot = match self.heap.get_mut(upvalue) {
                        Some(Obj::Upvalue(u)) => match u.state {
                            UpvalueState::Open(stack_slot) => Some(stack_slot),
                            UpvalueState::Closed(_) => {
                                u.state = UpvalueState::Closed(value);
                                None
                            }
                        },
                        _ => return Err(RuntimeError::internal("missing upvalue")),
                    };
                    if let Some(stack_slot) = open_slot {
                        self.stack_set(stack_slot, value)?;
                    }
                }
                Op::CloseUpvalue => {
                    self.close_upvalues(self.stack.len().saturating_sub(1));
                    self.pop()?;
                }

                Op::Jump(distance) => {
                    self.frame_mut()?.ip += distance as usize;
                }
                Op::JumpIfFalse(distance) => {
                    if self.peek(0)?.is_falsy() {
                        self.frame_mut()?.ip += distance as usize;
                    }
                }
                Op::Loop(distance) => {
                    self.frame_mut()?.ip -= distance as usize;
                }

                Op::Call(argc) => {
                    let callee = self.peek(argc as usize)?;
                    self.call_value(callee, argc as usize)?;
                }
                Op::Closure(idx) => self.make_closure(idx)?,
                Op::CaptureLocal(_) | Op::CaptureUpvalue(_) => {
                    return Err(RuntimeError::internal(
                        "capture instruction outside closure",
                    ));
                }
                Op::Return => {
                    let result = self.pop()?;
                    let frame = self
                        .frames
                        .pop()
                        .ok_or_else(|| RuntimeError::internal("no active frame"))?;

                    self.close_upvalues(frame.base);

                    if self.frames.is_empty() {
                        // The script closure itself.
                        self.pop()?;
                        return Ok(());
                    }

                    self.stack.truncate(frame.base);
                    self.stack.push(result);
                }

                Op::Class(idx) => {
                    let name = self.read_string(idx)?;
                    let class = self.gc_alloc(Obj::Class(ClassObj {
                        name,
                        methods: Table::new(),
                    }));
                    self.stack.push(Value::Obj(class));
                }
                Op::Method(idx) => {
                    let name = self.read_string(idx)?;
                    let method = self.peek(0)?;
                    if let Value::Obj(class_key) = self.peek(1)? {
                        if let Some(Obj::Class(class)) = self.heap.get_mut(class_key) {
                            class.methods.set(name, method);
                        }
                    }
                    self.pop()?;
                }
                Op::Inherit => {
                    let methods = match self.peek(1)? {
                        Value::Obj(super_key) => match self.heap.get(super_key) {
                            Some(Obj::Class(superclass)) => superclass.methods.clone(),
                            _ => return Err(self.error("Superclass must be a class.")),
                        },
                        _ => return Err(self.error("Superclass must be a class.")),
                    };
                    if let Value::Obj(sub_key) = self.peek(0)? {
                        if let Some(Obj::Class(subclass)) = self.heap.get_mut(sub_key) {
                            subclass.methods.add_all(&methods);
                        }
                    }
                    self.pop()?;
                }
                Op::GetProperty(idx) => self.get_property(idx)?,
                Op::SetProperty(idx) => self.set_property(idx)?,
                Op::GetSuper(idx) => {
                    let name = self.read_string(idx)?;
                    let superclass = match self.pop()? {
                        Value::Obj(key) => key,
                        _ => return Err(RuntimeError::internal("superclass is not an object")),
                    };
                    self.bind_method(superclass, name)?;
                }
                Op::Invoke(idx, argc) => {
                    let name = self.read_string(idx)?;
                    self.invoke(name, argc as usize)?;
                }
                Op::SuperInvoke(idx, argc) => {
                    let name = self.read_string(idx)?;
                    let superclass = match self.pop()? {
                        Value::Obj(key) => key,
                        _ => return Err(RuntimeError::internal("superclass is not an object")),
                    };
                    self.invoke_from_class(superclass, name, argc as usize)?;
                }

                Op::Print => {
                    let value = self.pop()?;
                    let rendered = value.show(&self.heap).to_string();
                    let _ = writeln!(self.out, "{}", rendered);
                }
            }
        }
    }

    fn trace_instruction(&self) {
        eprint!("          ");
        for value in self.stack.as_slice() {
            eprint!("[ {} ]", value.show(&self.heap));
        }
        eprintln!();
        if let Some(frame) = self.frames.last() {
            debug::disassemble_instruction(&self.heap, &frame.chunk, frame.ip);
        }
    }

    // ------------------------------------------------------------------------
    // Arithmetic
    // ------------------------------------------------------------------------

    fn add(&mut self) -> OpResult {
        let b = self.peek(0)?;
        let a = self.peek(1)?;

        if let (Value::Number(x), Value::Number(y)) = (a, b) {
            self.pop()?;
            self.pop()?;
            self.stack.push(Value::Number(x + y));
            return Ok(());
        }

        // Both operands stay on the stack until the result is interned, so a
        // collection triggered by the allocation cannot reclaim them.
        if let Some(chars) = self.concatenated(a, b) {
            let id = self.gc_intern_owned(chars);
            self.pop()?;
            self.pop()?;
            self.stack.push(Value::Obj(id.key()));
            return Ok(());
        }

        Err(self.error("Operands must be either 2 numbers or 2 strings."))
    }

    fn concatenated(&self, a: Value, b: Value) -> Option<String> {
        let (a, b) = match (a, b) {
            (Value::Obj(a), Value::Obj(b)) => (a, b),
            _ => return None,
        };
        match (self.heap.get(a), self.heap.get(b)) {
            (Some(Obj::Str(a)), Some(Obj::Str(b))) => {
                let mut chars = String::with_capacity(a.chars.len() + b.chars.len());
                chars.push_str(&a.chars);
                chars.push_str(&b.chars);
                Some(chars)
            }
            _ => None,
        }
    }

    fn modulo(&mut self) -> OpResult {
        let (a, b) = match (self.peek(1)?, self.peek(0)?) {
            (Value::Number(a), Value::Number(b)) => (a, b),
            _ => return Err(self.error("Operands must be numbers.")),
        };

        let divisor = b as i64;
        if divisor == 0 {
            return Err(self.error("Modulo by zero."));
        }

        self.pop()?;
        self.pop()?;
        self.stack
            .push(Value::Number(((a as i64) % divisor) as f64));
        Ok(())
    }

    fn binary_number_op(&mut self, op: impl FnOnce(f64, f64) -> Value) -> OpResult {
        let (a, b) = match (self.peek(1)?, self.peek(0)?) {
            (Value::Number(a), Value::Number(b)) => (a, b),
            _ => return Err(self.error("Operands must be numbers.")),
        };
        self.pop()?;
        self.pop()?;
        self.stack.push(op(a, b));
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------------

    fn call_value(&mut self, callee: Value, argc: usize) -> OpResult {
        enum Callee {
            Bound(Value, ObjKey),
            Class,
            Closure,
            Native(NativeFn),
            NotCallable,
        }

        let kind = match callee {
            Value::Obj(key) => match self.heap.get(key) {
                Some(Obj::BoundMethod(bound)) => Callee::Bound(bound.receiver, bound.method),
                Some(Obj::Class(_)) => Callee::Class,
                Some(Obj::Closure(_)) => Callee::Closure,
                Some(Obj::Native(native)) => Callee::Native(native.function),
                _ => Callee::NotCallable,
            },
            _ => Callee::NotCallable,
        };

        match kind {
            Callee::Bound(receiver, method) => {
                let slot = self.stack.len() - argc - 1;
                self.stack_set(slot, receiver)?;
                self.call(method, argc)
            }
            Callee::Class => {
                let class = match callee {
                    Value::Obj(key) => key,
                    _ => return Err(RuntimeError::internal("class callee is not an object")),
                };

                // The class is rooted at the callee slot until the instance
                // replaces it.
                let instance = self.gc_alloc(Obj::Instance(InstanceObj {
                    class,
                    fields: Table::new(),
                }));
                let slot = self.stack.len() - argc - 1;
                self.stack_set(slot, Value::Obj(instance))?;

                let initializer = match self.heap.get(class) {
                    Some(Obj::Class(c)) => c.methods.get(self.init_string),
                    _ => None,
                };
                match initializer {
                    Some(Value::Obj(init)) => self.call(init, argc),
                    Some(_) => Err(RuntimeError::internal("initializer is not a closure")),
                    None if argc != 0 => {
                        Err(self.error(format!("Expected 0 arguments but got {}.", argc)))
                    }
                    None => Ok(()),
                }
            }
            Callee::Closure => match callee {
                Value::Obj(closure) => self.call(closure, argc),
                _ => Err(RuntimeError::internal("closure callee is not an object")),
            },
            Callee::Native(function) => {
                let first_arg = self.stack.len() - argc;
                let result = function(&self.stack.as_slice()[first_arg..]);
                self.stack.truncate(first_arg - 1);
                self.stack.push(result);
                Ok(())
            }
            Callee::NotCallable => Err(self.error("You can only call functions and classes.")),
        }
    }

    fn call(&mut self, closure: ObjKey, argc: usize) -> OpResult {
        let (arity, chunk) = match self.heap.get(closure) {
            Some(Obj::Closure(c)) => match self.heap.get(c.function) {
                Some(Obj::Function(f)) => (f.arity as usize, f.chunk.clone()),
                _ => return Err(RuntimeError::internal("closure without function")),
            },
            _ => return Err(RuntimeError::internal("call target is not a closure")),
        };

        if argc != arity {
            return Err(self.error(format!(
                "Expected {} arguments but got {} instead.",
                arity, argc
            )));
        }

        if self.frames.len() == FRAMES_MAX {
            return Err(self.error("Stack overflow."));
        }

        let base = self.stack.len() - argc - 1;
        self.frames.push(CallFrame::new(closure, chunk, base));
        Ok(())
    }

    fn invoke(&mut self, name: StrId, argc: usize) -> OpResult {
        let receiver = self.peek(argc)?;

        let parts = match receiver {
            Value::Obj(key) => match self.heap.get(key) {
                Some(Obj::Instance(instance)) => {
                    Some((instance.class, instance.fields.get(name)))
                }
                _ => None,
            },
            _ => None,
        };
        let (class, shadowing_field) = match parts {
            Some(parts) => parts,
            None => return Err(self.error("Only instances have methods.")),
        };

        // A field with the method's name shadows it.
        if let Some(value) = shadowing_field {
            let slot = self.stack.len() - argc - 1;
            self.stack_set(slot, value)?;
            return self.call_value(value, argc);
        }

        self.invoke_from_class(class, name, argc)
    }

    fn invoke_from_class(&mut self, class: ObjKey, name: StrId, argc: usize) -> OpResult {
        let method = match self.heap.get(class) {
            Some(Obj::Class(c)) => c.methods.get(name),
            _ => None,
        };
        match method {
            Some(Value::Obj(method)) => self.call(method, argc),
            _ => Err(self.undefined_property(name)),
        }
    }

    fn bind_method(&mut self, class: ObjKey, name: StrId) -> OpResult {
        let method = match self.heap.get(class) {
            Some(Obj::Class(c)) => c.methods.get(name),
            _ => None,
        };
        let method = match method {
            Some(Value::Obj(method)) => method,
            _ => return Err(self.undefined_property(name)),
        };

        let receiver = self.peek(0)?;
        let bound = self.gc_alloc(Obj::BoundMethod(BoundMethodObj { receiver, method }));
        self.pop()?;
        self.stack.push(Value::Obj(bound));
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------------

    fn get_property(&mut self, idx: u8) -> OpResult {
        let name = self.read_string(idx)?;
        let receiver = self.peek(0)?;

        let parts = match receiver {
            Value::Obj(key) => match self.heap.get(key) {
                Some(Obj::Instance(instance)) => {
                    Some((instance.class, instance.fields.get(name)))
                }
                _ => None,
            },
            _ => None,
        };
        let (class, field) = match parts {
            Some(parts) => parts,
            None => return Err(self.error("Only instances have properties.")),
        };

        match field {
            Some(value) => {
                self.pop()?;
                self.stack.push(value);
                Ok(())
            }
            None => self.bind_method(class, name),
        }
    }

    fn set_property(&mut self, idx: u8) -> OpResult {
        let name = self.read_string(idx)?;
        let target = self.peek(1)?;
        let value = self.peek(0)?;

        let instance = match target {
            Value::Obj(key) if matches!(self.heap.get(key), Some(Obj::Instance(_))) => key,
            _ => return Err(self.error("Only instances have fields.")),
        };
        if let Some(Obj::Instance(i)) = self.heap.get_mut(instance) {
            i.fields.set(name, value);
        }

        let value = self.pop()?;
        self.pop()?;
        self.stack.push(value);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Closures & upvalues
    // ------------------------------------------------------------------------

    fn make_closure(&mut self, idx: u8) -> OpResult {
        let function = match self.read_constant(idx)? {
            Value::Obj(key) => key,
            _ => return Err(RuntimeError::internal("closure constant is not an object")),
        };
        let upvalue_count = match self.heap.get(function) {
            Some(Obj::Function(f)) => f.upvalue_count,
            _ => return Err(RuntimeError::internal("closure constant is not a function")),
        };

        // The upvalue array is fully populated before the closure exists:
        // locals-captures are rooted through the open list, inherited ones
        // through the enclosing closure.
        let mut upvalues = Vec::with_capacity(upvalue_count);
        for _ in 0..upvalue_count {
            match self.read_op()? {
                Op::CaptureLocal(index) => {
                    let base = self.frame()?.base;
                    let upvalue = self.capture_upvalue(base + index as usize)?;
                    upvalues.push(upvalue);
                }
                Op::CaptureUpvalue(index) => {
                    upvalues.push(self.frame_upvalue(index)?);
                }
                _ => {
                    return Err(RuntimeError::internal(
                        "expected capture instruction after closure",
                    ));
                }
            }
        }

        let closure = self.gc_alloc(Obj::Closure(ClosureObj { function, upvalues }));
        self.stack.push(Value::Obj(closure));
        Ok(())
    }

    /// Find or create the open upvalue for a stack slot. The list is sorted
    /// by descending slot, so there is at most one upvalue per live slot.
    fn capture_upvalue(&mut self, slot: usize) -> Result<ObjKey, RuntimeError> {
        let mut previous: Option<ObjKey> = None;
        let mut current = self.open_upvalues;

        while let Some(key) = current {
            let (upvalue_slot, next) = match self.heap.get(key) {
                Some(Obj::Upvalue(u)) => match u.state {
                    UpvalueState::Open(s) => (s, u.next),
                    UpvalueState::Closed(_) => {
                        return Err(RuntimeError::internal("closed upvalue on open list"));
                    }
                },
                _ => return Err(RuntimeError::internal("non-upvalue on open list")),
            };

            if upvalue_slot > slot {
                previous = Some(key);
                current = next;
            } else if upvalue_slot == slot {
                return Ok(key);
            } else {
                break;
            }
        }

        let created = self.gc_alloc(Obj::Upvalue(UpvalueObj {
            state: UpvalueState::Open(slot),
            next: current,
        }));

        match previous {
            None => self.open_upvalues = Some(created),
            Some(previous) => {
                if let Some(Obj::Upvalue(u)) = self.heap.get_mut(previous) {
                    u.next = Some(created);
                }
            }
        }

        Ok(created)
    }

    /// Close every open upvalue at or above `from`: copy the slot's value
    /// into the upvalue and unlink it. A no-op when nothing is open there.
    fn close_upvalues(&mut self, from: usize) {
        while let Some(key) = self.open_upvalues {
            let slot = match self.heap.get(key) {
                Some(Obj::Upvalue(u)) => match u.state {
                    UpvalueState::Open(slot) => slot,
                    UpvalueState::Closed(_) => break,
                },
                _ => break,
            };
            if slot < from {
                break;
            }

            let value = self.stack.get(slot).unwrap_or(Value::Nil);
            if let Some(Obj::Upvalue(u)) = self.heap.get_mut(key) {
                u.state = UpvalueState::Closed(value);
                self.open_upvalues = u.next;
            } else {
                break;
            }
        }
    }

    /// The upvalue key at `slot` in the current frame's closure.
    fn frame_upvalue(&self, slot: u8) -> Result<ObjKey, RuntimeError> {
        let closure = self.frame()?.closure;
        match self.heap.get(closure) {
            Some(Obj::Closure(c)) => c
                .upvalues
                .get(slot as usize)
                .copied()
                .ok_or_else(|| RuntimeError::internal("upvalue index out of range")),
            _ => Err(RuntimeError::internal("frame closure missing")),
        }
    }

    // ------------------------------------------------------------------------
    // Allocation & collection
    // ------------------------------------------------------------------------

    fn gc_alloc(&mut self, obj: Obj) -> ObjKey {
        self.maybe_collect();
        self.heap.alloc(obj)
    }

    fn gc_intern_owned(&mut self, chars: String) -> StrId {
        self.maybe_collect();
        self.heap.intern_owned(chars)
    }

    fn gc_intern(&mut self, chars: &str) -> StrId {
        self.maybe_collect();
        self.heap.intern(chars)
    }

    fn maybe_collect(&mut self) {
        if self.gc_stress || self.heap.should_collect() {
            let roots = RootSet {
                stack: self.stack.as_slice(),
                frames: &self.frames,
                globals: &self.globals,
                open_upvalues: self.open_upvalues,
                init_string: self.init_string,
            };
            self.heap.collect(&roots);
        }
    }

    fn define_native(&mut self, name: &str, function: NativeFn) {
        let name = self.gc_intern(name);
        // Both objects are rooted on the stack until the global binding
        // holds them.
        self.stack.push(Value::Obj(name.key()));
        let native = self.gc_alloc(Obj::Native(NativeObj { function }));
        self.stack.push(Value::Obj(native));
        self.globals.set(name, Value::Obj(native));
        let _ = self.stack.pop();
        let _ = self.stack.pop();
    }

    // ------------------------------------------------------------------------
    // Frame & stack access
    // ------------------------------------------------------------------------

    fn read_op(&mut self) -> Result<Op, RuntimeError> {
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| RuntimeError::internal("no active frame"))?;
        match frame.chunk.code.get(frame.ip).copied() {
            Some(op) => {
                frame.ip += 1;
                Ok(op)
            }
            None => Err(RuntimeError::internal("instruction pointer out of range")),
        }
    }

    fn read_constant(&self, idx: u8) -> Result<Value, RuntimeError> {
        self.frame()?
            .chunk
            .constants
            .get(idx as usize)
            .copied()
            .ok_or_else(|| RuntimeError::internal("constant index out of range"))
    }

    fn read_string(&self, idx: u8) -> Result<StrId, RuntimeError> {
        match self.read_constant(idx)? {
            Value::Obj(key) => self
                .heap
                .str_id(key)
                .ok_or_else(|| RuntimeError::internal("name constant is not a string")),
            _ => Err(RuntimeError::internal("name constant is not a string")),
        }
    }

    fn frame(&self) -> Result<&CallFrame, RuntimeError> {
        self.frames
            .last()
            .ok_or_else(|| RuntimeError::internal("no active frame"))
    }

    fn frame_mut(&mut self) -> Result<&mut CallFrame, RuntimeError> {
        self.frames
            .last_mut()
            .ok_or_else(|| RuntimeError::internal("no active frame"))
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack
            .pop()
            .ok_or_else(|| RuntimeError::internal("stack underflow"))
    }

    fn peek(&self, distance: usize) -> Result<Value, RuntimeError> {
        self.stack
            .peek(distance)
            .ok_or_else(|| RuntimeError::internal("stack underflow"))
    }

    fn stack_get(&self, slot: usize) -> Result<Value, RuntimeError> {
        self.stack
            .get(slot)
            .ok_or_else(|| RuntimeError::internal("stack slot out of range"))
    }

    fn stack_set(&mut self, slot: usize, value: Value) -> OpResult {
        if self.stack.set(slot, value) {
            Ok(())
        } else {
            Err(RuntimeError::internal("stack slot out of range"))
        }
    }

    fn reset_stack(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues = None;
    }

    // ------------------------------------------------------------------------
    // Errors
    // ------------------------------------------------------------------------

    /// Build a runtime error carrying the current stack trace, newest frame
    /// first. The instruction pointer sits one past the failing instruction.
    fn error(&self, message: impl Into<String>) -> RuntimeError {
        let mut stack_trace = Vec::with_capacity(self.frames.len());
        for frame in self.frames.iter().rev() {
            let line = frame.chunk.line(frame.ip.saturating_sub(1));
            stack_trace.push(TraceFrame {
                line,
                function: self.frame_function_name(frame),
            });
        }
        RuntimeError {
            message: message.into(),
            stack_trace,
        }
    }

    fn frame_function_name(&self, frame: &CallFrame) -> Option<String> {
        match self.heap.get(frame.closure) {
            Some(Obj::Closure(closure)) => match self.heap.get(closure.function) {
                Some(Obj::Function(function)) => {
                    function.name.map(|name| self.heap.string(name).to_string())
                }
                _ => None,
            },
            _ => None,
        }
    }

    fn undefined_variable(&self, name: StrId) -> RuntimeError {
        self.error(format!(
            "Undefined variable '{}'.",
            self.heap.string(name)
        ))
    }

    fn undefined_property(&self, name: StrId) -> RuntimeError {
        self.error(format!(
            "Undefined property '{}'.",
            self.heap.string(name)
        ))
    }
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new()
    }
}
