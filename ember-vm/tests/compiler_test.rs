// ember-vm - Bytecode emission tests
// Copyright (c) 2025 Tom Waddington. MIT licensed.

use std::rc::Rc;

use ember_vm::object::Obj;
use ember_vm::{compile, Chunk, Heap, ObjKey, Op, Value};

/// Compile source and return the script function's chunk.
fn script_chunk(heap: &mut Heap, source: &str) -> Rc<Chunk> {
    let key = compile(source, heap).expect("compile error");
    chunk_of(heap, key)
}

fn chunk_of(heap: &Heap, key: ObjKey) -> Rc<Chunk> {
    match heap.get(key) {
        Some(Obj::Function(f)) => f.chunk.clone(),
        other => panic!("not a function: {:?}", other),
    }
}

/// Find a function constant by name anywhere in the reachable chunks.
fn find_function(heap: &Heap, chunk: &Chunk, name: &str) -> Option<ObjKey> {
    for constant in &chunk.constants {
        if let Value::Obj(key) = constant {
            if let Some(Obj::Function(f)) = heap.get(*key) {
                let fn_name = f.name.map(|n| heap.string(n).to_string());
                if fn_name.as_deref() == Some(name) {
                    return Some(*key);
                }
                if let Some(found) = find_function(heap, &f.chunk, name) {
                    return Some(found);
                }
            }
        }
    }
    None
}

#[test]
fn test_script_ends_with_nil_return() {
    let mut heap = Heap::new();
    let chunk = script_chunk(&mut heap, "1;");
    let len = chunk.code.len();
    assert_eq!(&chunk.code[len - 2..], &[Op::Nil, Op::Return]);
}

#[test]
fn test_synthesized_comparisons() {
    let mut heap = Heap::new();
    let chunk = script_chunk(&mut heap, "print 1 <= 2;");
    let code = &chunk.code;
    let at = code
        .iter()
        .position(|op| *op == Op::Greater)
        .expect("<= lowers to GREATER + NOT");
    assert_eq!(code[at + 1], Op::Not);

    let chunk = script_chunk(&mut heap, "print 1 != 2;");
    let at = chunk
        .code
        .iter()
        .position(|op| *op == Op::Equal)
        .expect("!= lowers to EQUAL + NOT");
    assert_eq!(chunk.code[at + 1], Op::Not);
}

#[test]
fn test_if_else_jump_patching() {
    let mut heap = Heap::new();
    let chunk = script_chunk(&mut heap, "if (true) print 1; else print 2;");

    // [True, JumpIfFalse, Pop, Constant, Print, Jump, Pop, Constant, Print,
    //  Nil, Return]
    assert_eq!(chunk.code[0], Op::True);
    assert_eq!(chunk.code[1], Op::JumpIfFalse(4));
    assert_eq!(chunk.code[5], Op::Jump(3));
}

#[test]
fn test_while_loop_jumps_back_to_condition() {
    let mut heap = Heap::new();
    let chunk = script_chunk(&mut heap, "while (false) {}");

    // [False, JumpIfFalse, Pop, Loop, Pop, Nil, Return]
    assert_eq!(chunk.code[0], Op::False);
    assert_eq!(chunk.code[1], Op::JumpIfFalse(2));
    // After reading the Loop at offset 3 the ip is 4; the distance lands it
    // back on the condition at offset 0.
    assert_eq!(chunk.code[3], Op::Loop(4));
}

#[test]
fn test_closure_capture_metadata_for_local() {
    let mut heap = Heap::new();
    let chunk = script_chunk(
        &mut heap,
        "fun outer() { var a = 1; fun inner() { return a; } }",
    );

    let inner = find_function(&heap, &chunk, "inner").expect("inner exists");
    let upvalue_count = match heap.get(inner) {
        Some(Obj::Function(f)) => f.upvalue_count,
        _ => unreachable!(),
    };
    assert_eq!(upvalue_count, 1);

    // In outer's chunk the Closure instruction is followed by exactly one
    // capture instruction naming local slot 1.
    let outer = find_function(&heap, &chunk, "outer").expect("outer exists");
    let outer_chunk = chunk_of(&heap, outer);
    let at = outer_chunk
        .code
        .iter()
        .position(|op| matches!(op, Op::Closure(_)))
        .expect("outer emits a closure");
    assert_eq!(outer_chunk.code[at + 1], Op::CaptureLocal(1));
    assert!(!matches!(
        outer_chunk.code[at + 2],
        Op::CaptureLocal(_) | Op::CaptureUpvalue(_)
    ));
}

#[test]
fn test_closure_capture_metadata_transitive() {
    let mut heap = Heap::new();
    let chunk = script_chunk(
        &mut heap,
        "fun a() { var x = 1; fun b() { fun c() { return x; } } }",
    );

    // `c` reaches x through b's upvalue array, so b's chunk captures it as
    // an upvalue, not a local.
    let b = find_function(&heap, &chunk, "b").expect("b exists");
    let b_chunk = chunk_of(&heap, b);
    let at = b_chunk
        .code
        .iter()
        .position(|op| matches!(op, Op::Closure(_)))
        .expect("b emits a closure");
    assert_eq!(b_chunk.code[at + 1], Op::CaptureUpvalue(0));
}

#[test]
fn test_capture_count_matches_upvalue_count() {
    let mut heap = Heap::new();
    let chunk = script_chunk(
        &mut heap,
        "fun outer() { var a = 1; var b = 2; var c = 3; \
         fun inner() { return a + b + c; } }",
    );

    let inner = find_function(&heap, &chunk, "inner").expect("inner exists");
    let upvalue_count = match heap.get(inner) {
        Some(Obj::Function(f)) => f.upvalue_count,
        _ => unreachable!(),
    };
    assert_eq!(upvalue_count, 3);

    let outer = find_function(&heap, &chunk, "outer").expect("outer exists");
    let outer_chunk = chunk_of(&heap, outer);
    let at = outer_chunk
        .code
        .iter()
        .position(|op| matches!(op, Op::Closure(_)))
        .expect("outer emits a closure");
    let captures = outer_chunk.code[at + 1..]
        .iter()
        .take_while(|op| matches!(op, Op::CaptureLocal(_) | Op::CaptureUpvalue(_)))
        .count();
    assert_eq!(captures, upvalue_count);
}

#[test]
fn test_repeated_capture_is_deduplicated() {
    let mut heap = Heap::new();
    let chunk = script_chunk(
        &mut heap,
        "fun outer() { var a = 1; fun inner() { return a + a; } }",
    );

    let inner = find_function(&heap, &chunk, "inner").expect("inner exists");
    match heap.get(inner) {
        Some(Obj::Function(f)) => assert_eq!(f.upvalue_count, 1),
        _ => unreachable!(),
    }
}

#[test]
fn test_initializer_returns_receiver_slot() {
    let mut heap = Heap::new();
    let chunk = script_chunk(&mut heap, "class A { init() { this.x = 1; } }");

    let init = find_function(&heap, &chunk, "init").expect("init exists");
    let init_chunk = chunk_of(&heap, init);
    let len = init_chunk.code.len();
    assert_eq!(&init_chunk.code[len - 2..], &[Op::GetLocal(0), Op::Return]);
}

#[test]
fn test_plain_function_returns_nil() {
    let mut heap = Heap::new();
    let chunk = script_chunk(&mut heap, "fun f() { 1; }");

    let f = find_function(&heap, &chunk, "f").expect("f exists");
    let f_chunk = chunk_of(&heap, f);
    let len = f_chunk.code.len();
    assert_eq!(&f_chunk.code[len - 2..], &[Op::Nil, Op::Return]);
}

#[test]
fn test_method_call_fuses_to_invoke() {
    let mut heap = Heap::new();
    let chunk = script_chunk(&mut heap, "class A { m() {} } A().m(1, 2);");
    assert!(chunk.code.iter().any(|op| matches!(op, Op::Invoke(_, 2))));

    // Bare property access does not fuse.
    let chunk = script_chunk(&mut heap, "class A { m() {} } var f = A().m; f();");
    assert!(chunk
        .code
        .iter()
        .any(|op| matches!(op, Op::GetProperty(_))));
    assert!(!chunk.code.iter().any(|op| matches!(op, Op::Invoke(..))));
}

#[test]
fn test_super_call_fuses_to_super_invoke() {
    let mut heap = Heap::new();
    let chunk = script_chunk(
        &mut heap,
        "class A { m() {} } class B < A { m() { super.m(); } }",
    );

    // One of the two `m` bodies (B's override) dispatches through
    // SuperInvoke.
    let mut functions = Vec::new();
    collect_functions(&heap, &chunk, &mut functions);
    let found = functions.iter().any(|key| {
        chunk_of(&heap, *key)
            .code
            .iter()
            .any(|op| matches!(op, Op::SuperInvoke(_, 0)))
    });
    assert!(found);
}

fn collect_functions(heap: &Heap, chunk: &Chunk, out: &mut Vec<ObjKey>) {
    for constant in &chunk.constants {
        if let Value::Obj(key) = constant {
            if let Some(Obj::Function(f)) = heap.get(*key) {
                out.push(*key);
                collect_functions(heap, &f.chunk, out);
            }
        }
    }
}
