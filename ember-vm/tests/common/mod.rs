// ember-vm - Common test utilities
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Shared helpers for Ember integration tests.
//!
//! # Usage
//!
//! In your test file, add:
//! ```ignore
//! mod common;
//! use common::*;
//! ```
//!
//! # Available Helpers
//!
//! - [`new_vm`] - A VM whose `print` output is captured
//! - [`run_ok`] - Interpret a source string, returning its printed output
//! - [`run_lines`] - Same, split into lines
//! - [`run_err`] - Interpret a source string that must fail
//! - [`runtime_message`] - The message of an expected runtime error
//! - [`compile_messages`] - The rendered diagnostics of an expected
//!   compile failure
//! - [`assert_prints`] - Assert a program's exact printed lines

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use ember_vm::{InterpretError, Vm};

/// A cloneable writer the VM prints into, so tests can read it back.
#[derive(Clone, Default)]
pub struct CapturedOutput(Rc<RefCell<Vec<u8>>>);

impl CapturedOutput {
    pub fn new() -> Self {
        CapturedOutput::default()
    }

    /// Everything printed so far.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A VM with captured output.
pub fn new_vm() -> (Vm, CapturedOutput) {
    let output = CapturedOutput::new();
    let vm = Vm::with_output(Box::new(output.clone()));
    (vm, output)
}

/// Interpret `source` in a fresh VM, panicking on any error, and return the
/// captured `print` output.
#[track_caller]
#[allow(dead_code)]
pub fn run_ok(source: &str) -> String {
    let (mut vm, output) = new_vm();
    if let Err(e) = vm.interpret(source) {
        panic!("unexpected error for {:?}: {}", source, e);
    }
    output.contents()
}

/// Like [`run_ok`], split into printed lines.
#[track_caller]
#[allow(dead_code)]
pub fn run_lines(source: &str) -> Vec<String> {
    run_ok(source).lines().map(str::to_string).collect()
}

/// Interpret `source` in a fresh VM, panicking if it succeeds.
#[track_caller]
#[allow(dead_code)]
pub fn run_err(source: &str) -> InterpretError {
    let (mut vm, _output) = new_vm();
    match vm.interpret(source) {
        Ok(()) => panic!("expected an error for {:?}", source),
        Err(e) => e,
    }
}

/// The message of the runtime error `source` must produce.
#[track_caller]
#[allow(dead_code)]
pub fn runtime_message(source: &str) -> String {
    match run_err(source) {
        InterpretError::Runtime(e) => e.message,
        other => panic!("expected runtime error for {:?}, got: {}", source, other),
    }
}

/// The rendered compile diagnostics `source` must produce.
#[track_caller]
#[allow(dead_code)]
pub fn compile_messages(source: &str) -> Vec<String> {
    match run_err(source) {
        InterpretError::Compile(errors) => errors.iter().map(|e| e.to_string()).collect(),
        other => panic!("expected compile error for {:?}, got: {}", source, other),
    }
}

/// Assert that a program prints exactly the given lines.
#[track_caller]
#[allow(dead_code)]
pub fn assert_prints(source: &str, expected: &[&str]) {
    let expected: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
    assert_eq!(
        run_lines(source),
        expected,
        "program {:?} printed something else",
        source
    );
}
