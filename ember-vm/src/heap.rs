// ember-vm - Bytecode compiler and virtual machine for the Ember programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! The garbage-collected heap.
//!
//! Every heap object lives in a single slotmap arena; a [`Value`] references
//! it by key and object identity is key equality. The arena doubles as the
//! authoritative heap enumeration for the sweep phase.
//!
//! Collection is precise tri-color mark-sweep: roots are supplied by the VM
//! as a [`RootSet`], discovered objects go onto a gray worklist, and sweep
//! retains marked objects while recounting live payload bytes exactly. The
//! interned-string pool is weak: entries whose string was not marked are
//! pruned before sweep so unreferenced strings cannot survive through the
//! pool.
//!
//! The heap's own entry points never trigger collection; the VM decides when
//! to collect at its allocation wrappers, with every value it needs alive
//! rooted on its stack first.

use slotmap::{new_key_type, SlotMap};

use crate::chunk::Chunk;
use crate::object::{Obj, StrObj, UpvalueState};
use crate::table::Table;
use crate::value::Value;
use crate::vm::frame::CallFrame;

new_key_type! {
    /// Key of a heap object in the arena.
    pub struct ObjKey;
}

const GC_HEAP_GROW_FACTOR: usize = 2;
const FIRST_GC_THRESHOLD: usize = 1024 * 1024;

/// Handle to an interned string: the arena key plus the cached FNV-1a hash,
/// so hash tables can probe without touching the heap. Equality is identity;
/// interning makes that coincide with byte equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrId {
    key: ObjKey,
    hash: u32,
}

impl StrId {
    /// The underlying arena key.
    pub fn key(&self) -> ObjKey {
        self.key
    }

    pub(crate) fn hash(&self) -> u32 {
        self.hash
    }
}

#[derive(Debug)]
struct GcBox {
    marked: bool,
    obj: Obj,
}

/// The roots a collection starts from, borrowed from the VM.
pub struct RootSet<'a> {
    pub stack: &'a [Value],
    pub frames: &'a [CallFrame],
    pub globals: &'a Table,
    pub open_upvalues: Option<ObjKey>,
    pub init_string: StrId,
}

/// The object arena, interned-string pool, and collector.
pub struct Heap {
    objects: SlotMap<ObjKey, GcBox>,
    /// Weak pool of interned strings: key = the string, value unused.
    strings: Table,
    /// Gray worklist; plain storage, not GC-managed.
    gray: Vec<ObjKey>,
    bytes_allocated: usize,
    next_gc: usize,
    log_gc: bool,
}

impl Heap {
    /// Create an empty heap.
    pub fn new() -> Self {
        Heap {
            objects: SlotMap::with_key(),
            strings: Table::new(),
            gray: Vec::new(),
            bytes_allocated: 0,
            next_gc: FIRST_GC_THRESHOLD,
            log_gc: false,
        }
    }

    /// Print `-- gc begin` / `-- gc end` with byte counts around collections.
    pub fn set_log_gc(&mut self, log: bool) {
        self.log_gc = log;
    }

    /// Allocate an object. Never collects; the caller decides when.
    pub fn alloc(&mut self, obj: Obj) -> ObjKey {
        let size = obj_size(&obj);
        self.bytes_allocated += size;
        let key = self.objects.insert(GcBox { marked: false, obj });
        if self.log_gc {
            eprintln!("{:?} allocate {} bytes", key, size);
        }
        key
    }

    /// True once allocation has crossed the growth threshold.
    pub fn should_collect(&self) -> bool {
        self.bytes_allocated > self.next_gc
    }

    /// Intern a borrowed string, returning the canonical handle.
    pub fn intern(&mut self, chars: &str) -> StrId {
        let hash = fnv1a(chars.as_bytes());
        match self.find_string(chars, hash) {
            Some(id) => id,
            None => self.insert_string(chars.to_string(), hash),
        }
    }

    /// Intern an owned string; on a pool hit the buffer is dropped.
    pub fn intern_owned(&mut self, chars: String) -> StrId {
        let hash = fnv1a(chars.as_bytes());
        match self.find_string(&chars, hash) {
            Some(id) => id,
            None => self.insert_string(chars, hash),
        }
    }

    fn find_string(&self, chars: &str, hash: u32) -> Option<StrId> {
        let objects = &self.objects;
        self.strings.find_key(hash, |id| {
            matches!(objects.get(id.key()), Some(b) if matches!(&b.obj, Obj::Str(s) if s.chars == chars))
        })
    }

    fn insert_string(&mut self, chars: String, hash: u32) -> StrId {
        let key = self.alloc(Obj::Str(StrObj { chars, hash }));
        let id = StrId { key, hash };
        self.strings.set(id, Value::Nil);
        id
    }

    /// Rebuild the [`StrId`] for a string object key.
    pub fn str_id(&self, key: ObjKey) -> Option<StrId> {
        match self.get(key)? {
            Obj::Str(s) => Some(StrId { key, hash: s.hash }),
            _ => None,
        }
    }

    /// The bytes of an interned string.
    pub fn string(&self, id: StrId) -> &str {
        match self.get(id.key()) {
            Some(Obj::Str(s)) => &s.chars,
            _ => "",
        }
    }

    /// Borrow an object.
    pub fn get(&self, key: ObjKey) -> Option<&Obj> {
        self.objects.get(key).map(|b| &b.obj)
    }

    /// Mutably borrow an object.
    pub fn get_mut(&mut self, key: ObjKey) -> Option<&mut Obj> {
        self.objects.get_mut(key).map(|b| &mut b.obj)
    }

    /// Bytes attributed to live objects at the last accounting point.
    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    /// Number of live objects in the arena.
    pub fn live_objects(&self) -> usize {
        self.objects.len()
    }

    /// Recompute the payload bytes of everything currently live.
    pub fn live_bytes(&self) -> usize {
        self.objects.values().map(|b| obj_size(&b.obj)).sum()
    }

    // ------------------------------------------------------------------------
    // Collection
    // ------------------------------------------------------------------------

    /// Run a full mark-sweep collection from the given roots.
    pub fn collect(&mut self, roots: &RootSet<'_>) {
        if self.log_gc {
            eprintln!("-- gc begin");
        }
        let before = self.bytes_allocated;

        self.mark_roots(roots);
        self.trace_references();
        self.remove_white_strings();
        self.sweep();

        self.next_gc = self.bytes_allocated * GC_HEAP_GROW_FACTOR;

        if self.log_gc {
            eprintln!("-- gc end");
            // The recount can exceed the running total when backing storage
            // grew after allocation, so saturate.
            eprintln!(
                "   collected {} bytes (from {} to {}) next at {}",
                before.saturating_sub(self.bytes_allocated),
                before,
                self.bytes_allocated,
                self.next_gc
            );
        }
    }

    fn mark_roots(&mut self, roots: &RootSet<'_>) {
        for value in roots.stack {
            self.mark_value(*value);
        }

        for frame in roots.frames {
            self.mark_object(frame.closure);
        }

        let mut upvalue = roots.open_upvalues;
        while let Some(key) = upvalue {
            self.mark_object(key);
            upvalue = match self.get(key) {
                Some(Obj::Upvalue(u)) => u.next,
                _ => None,
            };
        }

        self.mark_table(roots.globals);
        self.mark_object(roots.init_string.key());
    }

    fn mark_value(&mut self, value: Value) {
        if let Value::Obj(key) = value {
            self.mark_object(key);
        }
    }

    fn mark_object(&mut self, key: ObjKey) {
        if let Some(boxed) = self.objects.get_mut(key) {
            if boxed.marked {
                return;
            }
            boxed.marked = true;
            if self.log_gc {
                eprintln!("{:?} mark", key);
            }
            self.gray.push(key);
        }
    }

    fn mark_table(&mut self, table: &Table) {
        for (key, value) in table.iter() {
            self.mark_object(key.key());
            self.mark_value(value);
        }
    }

    fn trace_references(&mut self) {
        while let Some(key) = self.gray.pop() {
            self.blacken(key);
        }
    }

    fn blacken(&mut self, key: ObjKey) {
        if self.log_gc {
            eprintln!("{:?} blacken", key);
        }

        let obj = match self.get(key) {
            Some(obj) => obj,
            None => return,
        };

        match obj {
            Obj::Str(_) | Obj::Native(_) => {}
            Obj::Upvalue(upvalue) => {
                // Safe whether open or closed: an open upvalue's slot is on
                // the stack and marked as a root.
                if let UpvalueState::Closed(value) = upvalue.state {
                    self.mark_value(value);
                }
            }
            Obj::Function(function) => {
                let name = function.name;
                let chunk = function.chunk.clone();
                if let Some(name) = name {
                    self.mark_object(name.key());
                }
                for constant in &chunk.constants {
                    self.mark_value(*constant);
                }
            }
            Obj::Closure(closure) => {
                let function = closure.function;
                let upvalues = closure.upvalues.clone();
                self.mark_object(function);
                for upvalue in upvalues {
                    self.mark_object(upvalue);
                }
            }
            Obj::Class(class) => {
                let name = class.name;
                let methods: Vec<(StrId, Value)> = class.methods.iter().collect();
                self.mark_object(name.key());
                for (method_name, method) in methods {
                    self.mark_object(method_name.key());
                    self.mark_value(method);
                }
            }
            Obj::Instance(instance) => {
                let class = instance.class;
                let fields: Vec<(StrId, Value)> = instance.fields.iter().collect();
                self.mark_object(class);
                for (field_name, field) in fields {
                    self.mark_object(field_name.key());
                    self.mark_value(field);
                }
            }
            Obj::BoundMethod(bound) => {
                let receiver = bound.receiver;
                let method = bound.method;
                self.mark_value(receiver);
                self.mark_object(method);
            }
        }
    }

    /// Prune interned-string entries whose string was not marked. Must run
    /// after tracing and before sweep.
    fn remove_white_strings(&mut self) {
        let objects = &self.objects;
        let dead: Vec<StrId> = self
            .strings
            .iter()
            .filter(|(id, _)| !objects.get(id.key()).map_or(false, |b| b.marked))
            .map(|(id, _)| id)
            .collect();
        for id in dead {
            self.strings.delete(id);
        }
    }

    fn sweep(&mut self) {
        let log_gc = self.log_gc;
        let mut live_bytes = 0;
        self.objects.retain(|key, boxed| {
            if boxed.marked {
                boxed.marked = false;
                live_bytes += obj_size(&boxed.obj);
                true
            } else {
                if log_gc {
                    eprintln!("{:?} free", key);
                }
                false
            }
        });
        self.bytes_allocated = live_bytes;
    }
}

impl Default for Heap {
    fn default() -> Self {
        Heap::new()
    }
}

/// FNV-1a, 32-bit.
pub fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 2166136261;
    for byte in bytes {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

/// Approximate payload size of an object, counted at allocation and
/// recounted exactly over live objects at every sweep.
fn obj_size(obj: &Obj) -> usize {
    use std::mem::size_of;

    let base = size_of::<GcBox>();
    base + match obj {
        Obj::Str(s) => s.chars.capacity(),
        Obj::Function(f) => chunk_bytes(&f.chunk),
        Obj::Closure(c) => c.upvalues.capacity() * size_of::<ObjKey>(),
        Obj::Class(c) => c.methods.payload_bytes(),
        Obj::Instance(i) => i.fields.payload_bytes(),
        Obj::Upvalue(_) | Obj::BoundMethod(_) | Obj::Native(_) => 0,
    }
}

fn chunk_bytes(chunk: &Chunk) -> usize {
    use std::mem::size_of;

    chunk.code.capacity() * size_of::<crate::opcode::Op>()
        + chunk.lines.capacity() * size_of::<u32>()
        + chunk.constants.capacity() * size_of::<Value>()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_roots<'a>(globals: &'a Table, init: StrId) -> RootSet<'a> {
        RootSet {
            stack: &[],
            frames: &[],
            globals,
            open_upvalues: None,
            init_string: init,
        }
    }

    #[test]
    fn test_interning_is_canonical() {
        let mut heap = Heap::new();
        let a = heap.intern("hello");
        let b = heap.intern("hello");
        let c = heap.intern_owned("hello".to_string());
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(heap.string(a), "hello");
    }

    #[test]
    fn test_distinct_strings_get_distinct_objects() {
        let mut heap = Heap::new();
        let a = heap.intern("a");
        let b = heap.intern("b");
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_collect_frees_unreachable() {
        let mut heap = Heap::new();
        let init = heap.intern("init");
        let globals = Table::new();

        heap.intern("garbage");
        assert_eq!(heap.live_objects(), 2);

        heap.collect(&empty_roots(&globals, init));

        // Only the init string survives.
        assert_eq!(heap.live_objects(), 1);
        assert_eq!(heap.string(init), "init");
    }

    #[test]
    fn test_weak_pool_is_pruned_and_reusable() {
        let mut heap = Heap::new();
        let init = heap.intern("init");
        let globals = Table::new();

        let old = heap.intern("ephemeral");
        heap.collect(&empty_roots(&globals, init));

        // Re-interning after the prune builds a fresh canonical object.
        let new = heap.intern("ephemeral");
        assert_ne!(old.key(), new.key());
        assert_eq!(heap.string(new), "ephemeral");
    }

    #[test]
    fn test_globals_are_roots() {
        let mut heap = Heap::new();
        let init = heap.intern("init");
        let name = heap.intern("kept");
        let mut globals = Table::new();
        globals.set(name, Value::Obj(name.key()));

        heap.collect(&empty_roots(&globals, init));

        assert_eq!(heap.string(name), "kept");
        // The pool still knows the string, so re-interning is identity.
        assert_eq!(heap.intern("kept"), name);
    }

    #[test]
    fn test_bytes_allocated_matches_live_after_collect() {
        let mut heap = Heap::new();
        let init = heap.intern("init");
        let globals = Table::new();

        for i in 0..32 {
            heap.intern(&format!("gone{}", i));
        }
        heap.collect(&empty_roots(&globals, init));

        assert_eq!(heap.bytes_allocated(), heap.live_bytes());
    }

    #[test]
    fn test_fnv1a_known_values() {
        // FNV-1a test vectors.
        assert_eq!(fnv1a(b""), 2166136261);
        assert_eq!(fnv1a(b"a"), 0xe40c292c);
        assert_eq!(fnv1a(b"foobar"), 0xbf9cf968);
    }
}
