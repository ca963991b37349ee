// ember-vm - End-to-end interpreter tests
// Copyright (c) 2025 Tom Waddington. MIT licensed.

mod common;
use common::*;

#[test]
fn test_arithmetic() {
    assert_prints("print 1 + 2;", &["3"]);
    assert_prints("print 1 + 2 * 3;", &["7"]);
    assert_prints("print (1 + 2) * 3;", &["9"]);
    assert_prints("print 7 / 2;", &["3.5"]);
    assert_prints("print 10 - 4 - 3;", &["3"]);
    assert_prints("print -4 + 2;", &["-2"]);
    assert_prints("print --3;", &["3"]);
}

#[test]
fn test_modulo_truncates_to_integer() {
    assert_prints("print 7 % 3;", &["1"]);
    assert_prints("print 7.9 % 3;", &["1"]);
    assert_prints("print -7 % 3;", &["-1"]);
}

#[test]
fn test_number_formatting() {
    assert_prints("print 100;", &["100"]);
    assert_prints("print 2.5;", &["2.5"]);
    assert_prints("print 0.25;", &["0.25"]);
}

#[test]
fn test_comparison_and_equality() {
    assert_prints("print 1 < 2;", &["true"]);
    assert_prints("print 2 <= 1;", &["false"]);
    assert_prints("print 3 >= 3;", &["true"]);
    assert_prints("print 2 > 3;", &["false"]);
    assert_prints("print 1 != 2;", &["true"]);
    assert_prints("print nil == nil;", &["true"]);
    assert_prints("print nil == false;", &["false"]);
    assert_prints("print 1 == \"1\";", &["false"]);
}

#[test]
fn test_truthiness() {
    // Only nil and false are falsy.
    assert_prints("print !nil;", &["true"]);
    assert_prints("print !false;", &["true"]);
    assert_prints("print !0;", &["false"]);
    assert_prints("print !\"\";", &["false"]);
}

#[test]
fn test_string_concatenation() {
    assert_prints("print \"foo\" + \"bar\";", &["foobar"]);
    assert_prints("print \"\" + \"x\" + \"\";", &["x"]);
}

#[test]
fn test_equal_string_literals_are_identical() {
    assert_prints("var a = \"hi\"; var b = \"hi\"; print a == b;", &["true"]);
}

#[test]
fn test_and_or_return_operand_values() {
    assert_prints("print 1 and 2;", &["2"]);
    assert_prints("print nil and 2;", &["nil"]);
    assert_prints("print false or \"x\";", &["x"]);
    assert_prints("print 1 or 2;", &["1"]);
}

#[test]
fn test_short_circuit_skips_side_effects() {
    assert_prints(
        "var a = 0; fun bump() { a = a + 1; return true; } \
         false and bump(); print a; \
         true or bump(); print a;",
        &["0", "0"]
    );
}

#[test]
fn test_globals() {
    assert_prints("var a = 1; a = a + 1; print a;", &["2"]);
    assert_prints("var a; print a;", &["nil"]);
    // Re-declaring a global is permitted.
    assert_prints("var a = 1; var a = 2; print a;", &["2"]);
}

#[test]
fn test_locals_and_shadowing() {
    assert_prints(
        "var a = \"global\"; { var a = \"local\"; print a; } print a;",
        &["local", "global"]
    );
    assert_prints(
        "{ var a = 1; { var a = 2; print a; } print a; }",
        &["2", "1"]
    );
}

#[test]
fn test_mixed_global_and_local_slots() {
    // A top-level var must not leave a stray value behind on the stack.
    assert_prints(
        "var g = 1; { var l = 2; print l; print g; }",
        &["2", "1"]
    );
}

#[test]
fn test_if_else() {
    assert_prints("if (true) print \"then\"; else print \"else\";", &["then"]);
    assert_prints("if (nil) print \"then\"; else print \"else\";", &["else"]);
    assert_prints("if (false) print \"skipped\";", &[]);
}

#[test]
fn test_while_loop() {
    assert_prints(
        "var i = 0; while (i < 3) { print i; i = i + 1; }",
        &["0", "1", "2"]
    );
    assert_prints("while (false) { print \"never\"; }", &[]);
}

#[test]
fn test_for_loop() {
    assert_prints(
        "for (var i = 0; i < 3; i = i + 1) print i;",
        &["0", "1", "2"]
    );
    // Initialiser and increment clauses are optional.
    assert_prints(
        "var i = 0; for (; i < 2;) { print i; i = i + 1; }",
        &["0", "1"]
    );
}

#[test]
fn test_functions() {
    assert_prints(
        "fun add(a, b) { return a + b; } print add(1, 2);",
        &["3"]
    );
    assert_prints("fun f() {} print f();", &["nil"]);
    assert_prints("fun f() { return; } print f();", &["nil"]);
}

#[test]
fn test_recursion() {
    assert_prints(
        "fun fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); } print fib(10);",
        &["55"]
    );
}

#[test]
fn test_value_representations() {
    assert_prints("fun f() {} print f;", &["<fn f>"]);
    assert_prints("class A {} print A;", &["<class A>"]);
    assert_prints("class A {} print A();", &["<instance of A>"]);
    assert_prints("print clock;", &["<native fn>"]);
}

#[test]
fn test_clock_native() {
    assert_prints("print clock() >= 0;", &["true"]);
    assert_prints("var a = clock(); var b = clock(); print b >= a;", &["true"]);
}

#[test]
fn test_expression_statement_prints_nothing() {
    assert_eq!(run_ok("1 + 2;"), "");
}

#[test]
fn test_globals_persist_across_interprets() {
    let (mut vm, output) = new_vm();
    vm.interpret("var a = 41;").expect("first line");
    vm.interpret("a = a + 1;").expect("second line");
    vm.interpret("print a;").expect("third line");
    assert_eq!(output.contents(), "42\n");
}

#[test]
fn test_vm_usable_after_runtime_error() {
    let (mut vm, output) = new_vm();
    vm.interpret("var a = 1;").expect("define");
    assert!(vm.interpret("print missing;").is_err());
    vm.interpret("print a;").expect("globals survive the error");
    assert_eq!(output.contents(), "1\n");
}
