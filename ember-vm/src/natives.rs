// ember-vm - Bytecode compiler and virtual machine for the Ember programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Native functions callable from Ember code.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::value::Value;

/// The native function ABI: arguments in, one value out.
///
/// Natives must not hold heap references across a return; anything they
/// allocate has to be reachable from the returned value.
pub type NativeFn = fn(&[Value]) -> Value;

/// Seconds since the Unix epoch, for timing scripts.
pub fn clock_native(_args: &[Value]) -> Value {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    Value::Number(seconds)
}
