// ember - A small class-based scripting language with a bytecode VM
// Copyright (c) 2025 Tom Waddington. MIT licensed.

use std::env;
use std::fs;
use std::io::{self, Write};
use std::process;

use ember_vm::{InterpretError, Vm};

/// Exit codes follow the BSD sysexits convention: 65 for bad input,
/// 70 for an internal software error, 74 for an I/O error.
const EXIT_USAGE: i32 = 64;
const EXIT_COMPILE_ERROR: i32 = 65;
const EXIT_RUNTIME_ERROR: i32 = 70;
const EXIT_IO_ERROR: i32 = 74;

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() == 2 && (args[1] == "--version" || args[1] == "-v") {
        println!("Ember v0.1.0");
        return;
    }

    match args.len() {
        1 => run_repl(),
        2 => run_file(&args[1]),
        _ => {
            eprintln!("Usage: ember [path]");
            process::exit(EXIT_USAGE);
        }
    }
}

/// Run a source file, mapping each error domain to its exit code.
fn run_file(path: &str) {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error reading '{}': {}", path, e);
            process::exit(EXIT_IO_ERROR);
        }
    };

    let mut vm = Vm::new();
    match vm.interpret(&source) {
        Ok(()) => {}
        Err(InterpretError::Compile(errors)) => {
            for error in errors {
                eprintln!("{}", error);
            }
            process::exit(EXIT_COMPILE_ERROR);
        }
        Err(InterpretError::Runtime(error)) => {
            eprintln!("{}", error);
            process::exit(EXIT_RUNTIME_ERROR);
        }
    }
}

/// Read-eval-print loop. One VM lives for the whole session, so globals and
/// the heap carry over between lines.
fn run_repl() {
    println!("Ember v0.1.0");

    let mut vm = Vm::new();

    loop {
        print!("> ");
        let _ = io::stdout().flush();

        let mut line = String::new();
        match io::stdin().read_line(&mut line) {
            Ok(0) => {
                println!();
                break;
            }
            Ok(_) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if let Err(error) = vm.interpret(line) {
                    eprintln!("{}", error);
                }
            }
            Err(e) => {
                eprintln!("Read error: {}", e);
                break;
            }
        }
    }
}
