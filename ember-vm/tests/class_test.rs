// ember-vm - Class, method, and inheritance tests
// Copyright (c) 2025 Tom Waddington. MIT licensed.

mod common;
use common::*;

#[test]
fn test_inherited_method_call() {
    assert_prints(
        "class A { greet() { print \"hi\"; } } class B < A {} B().greet();",
        &["hi"]
    );
}

#[test]
fn test_initializer_sets_fields() {
    assert_prints(
        "class P { init(n) { this.n = n; } } print P(7).n;",
        &["7"]
    );
}

#[test]
fn test_fields() {
    assert_prints(
        "class Box {} var b = Box(); b.value = 3; b.value = b.value + 1; print b.value;",
        &["4"]
    );
    // Assignment evaluates to the stored value.
    assert_prints(
        "class Box {} var b = Box(); print b.value = 9;",
        &["9"]
    );
}

#[test]
fn test_method_reads_receiver_state() {
    assert_prints(
        "class C { m() { return this.v; } } var c = C(); c.v = 5; print c.m();",
        &["5"]
    );
}

#[test]
fn test_bound_method_keeps_receiver() {
    assert_prints(
        "class C { m() { return this.v; } } var c = C(); c.v = 5; \
         var m = c.m; print m;",
        &["<fn m>"]
    );
    assert_prints(
        "class C { m() { return this.v; } } var c = C(); c.v = 5; \
         var m = c.m; print m();",
        &["5"]
    );
}

#[test]
fn test_field_shadows_method() {
    assert_prints(
        "class D { m() { return \"method\"; } } \
         var d = D(); \
         fun shadow() { return \"field\"; } \
         d.m = shadow; \
         print d.m();",
        &["field"]
    );
}

#[test]
fn test_init_returns_receiver() {
    assert_prints("class E { init() { this.x = 1; } } print E();", &["<instance of E>"]);
    assert_prints("class E { init() { this.x = 1; } } print E().x;", &["1"]);
}

#[test]
fn test_bare_return_in_init() {
    assert_prints(
        "class F { init() { this.x = 1; return; this.x = 2; } } print F().x;",
        &["1"]
    );
}

#[test]
fn test_inherited_initializer() {
    assert_prints(
        "class A { init(n) { this.n = n; } } class B < A {} print B(3).n;",
        &["3"]
    );
}

#[test]
fn test_override_and_super_invoke() {
    assert_prints(
        "class A { m() { return \"A\"; } } \
         class B < A { m() { return \"B>\" + super.m(); } } \
         print B().m();",
        &["B>A"]
    );
}

#[test]
fn test_super_method_as_value() {
    assert_prints(
        "class A { m() { return \"A\"; } } \
         class B < A { m() { var f = super.m; return f(); } } \
         print B().m();",
        &["A"]
    );
}

#[test]
fn test_super_skips_own_override() {
    // The lexically captured superclass decides the dispatch, not the
    // receiver's class.
    assert_prints(
        "class A { m() { return \"A\"; } } \
         class B < A { m() { return super.m(); } } \
         class C < B {} \
         print C().m();",
        &["A"]
    );
}

#[test]
fn test_methods_chain_through_this() {
    assert_prints(
        "class Counter { \
           init() { this.n = 0; } \
           bump() { this.n = this.n + 1; return this; } \
         } \
         print Counter().bump().bump().n;",
        &["2"]
    );
}

#[test]
fn test_method_closure_captures_this() {
    assert_prints(
        "class G { \
           init(v) { this.v = v; } \
           getter() { fun get() { return this.v; } return get; } \
         } \
         var g = G(\"inner\").getter(); print g();",
        &["inner"]
    );
}

#[test]
fn test_inheritance_does_not_leak_back() {
    // The subclass copies the method table; later additions to it do not
    // appear on the superclass.
    assert_prints(
        "class A { m() { return \"A.m\"; } } \
         class B < A { extra() { return \"B.extra\"; } } \
         print B().m(); print A().m();",
        &["A.m", "A.m"]
    );
}
