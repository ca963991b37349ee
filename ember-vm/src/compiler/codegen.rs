// ember-vm - Bytecode compiler and virtual machine for the Ember programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Code generation: the parser and emitter in one pass.

use std::rc::Rc;

use ember_scanner::{Scanner, Token, TokenKind};

use crate::chunk::Chunk;
use crate::heap::{Heap, ObjKey, StrId};
use crate::object::{FunctionObj, Obj};
use crate::opcode::Op;
use crate::value::Value;

use super::types::{
    CompileError, ErrorLocation, FunctionKind, Local, Precedence, UpvalueMeta, MAX_CONSTANTS,
    MAX_LOCALS, MAX_UPVALUES,
};

/// Compile a source string into a top-level script function allocated on the
/// heap. On failure every collected diagnostic is returned.
pub fn compile(source: &str, heap: &mut Heap) -> Result<ObjKey, Vec<CompileError>> {
    let mut compiler = Compiler::new(source, heap);
    compiler.advance();
    while !compiler.matches(TokenKind::Eof) {
        compiler.declaration();
    }
    compiler.finish()
}

type ParseFn<'src, 'h> = fn(&mut Compiler<'src, 'h>, bool);

struct ParseRule<'src, 'h> {
    prefix: Option<ParseFn<'src, 'h>>,
    infix: Option<ParseFn<'src, 'h>>,
    precedence: Precedence,
}

/// State for one function being compiled. The compiler keeps a stack of
/// these; the bottom entry is the implicit top-level script.
struct FunctionCompiler<'src> {
    kind: FunctionKind,
    name: Option<StrId>,
    arity: u8,
    chunk: Chunk,
    locals: Vec<Local<'src>>,
    upvalues: Vec<UpvalueMeta>,
    scope_depth: i32,
}

impl<'src> FunctionCompiler<'src> {
    fn new(kind: FunctionKind, name: Option<StrId>) -> Self {
        // Slot 0 is reserved: `this` inside methods, unusable padding
        // everywhere else.
        let reserved = Local {
            name: match kind {
                FunctionKind::Method | FunctionKind::Initializer => "this",
                _ => "",
            },
            depth: 0,
            is_captured: false,
        };

        FunctionCompiler {
            kind,
            name,
            arity: 0,
            chunk: Chunk::new(),
            locals: vec![reserved],
            upvalues: Vec::new(),
            scope_depth: 0,
        }
    }
}

/// Tracks whether the innermost enclosing class has a superclass, for
/// `this`/`super` validation.
struct ClassState {
    has_superclass: bool,
}

pub struct Compiler<'src, 'h> {
    scanner: Scanner<'src>,
    heap: &'h mut Heap,
    current: Token<'src>,
    previous: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    errors: Vec<CompileError>,
    functions: Vec<FunctionCompiler<'src>>,
    classes: Vec<ClassState>,
}

impl<'src, 'h> Compiler<'src, 'h> {
    fn new(source: &'src str, heap: &'h mut Heap) -> Self {
        let placeholder = Token {
            kind: TokenKind::Eof,
            lexeme: "",
            line: 0,
        };

        Compiler {
            scanner: Scanner::new(source),
            heap,
            current: placeholder,
            previous: placeholder,
            had_error: false,
            panic_mode: false,
            errors: Vec::new(),
            functions: vec![FunctionCompiler::new(FunctionKind::Script, None)],
            classes: Vec::new(),
        }
    }

    fn finish(mut self) -> Result<ObjKey, Vec<CompileError>> {
        let (function, _) = self.end_function();
        if self.had_error {
            Err(self.errors)
        } else {
            Ok(function)
        }
    }

    // ------------------------------------------------------------------------
    // Token plumbing
    // ------------------------------------------------------------------------

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let message = self.current.lexeme;
            self.error_at(self.current, message);
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    // ------------------------------------------------------------------------
    // Errors
    // ------------------------------------------------------------------------

    fn error(&mut self, message: &str) {
        self.error_at(self.previous, message);
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current, message);
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;

        let location = match token.kind {
            TokenKind::Eof => ErrorLocation::End,
            TokenKind::Error => ErrorLocation::Hidden,
            _ => ErrorLocation::Token(token.lexeme.to_string()),
        };
        self.errors.push(CompileError {
            line: token.line,
            location,
            message: message.to_string(),
        });
    }

    /// Skip to the next statement boundary after an error, so one mistake
    /// does not cascade.
    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    // ------------------------------------------------------------------------
    // Emission helpers
    // ------------------------------------------------------------------------

    fn current_fn(&self) -> &FunctionCompiler<'src> {
        self.functions.last().expect("compiler stack is never empty")
    }

    fn current_fn_mut(&mut self) -> &mut FunctionCompiler<'src> {
        self.functions
            .last_mut()
            .expect("compiler stack is never empty")
    }

    fn chunk(&self) -> &Chunk {
        &self.current_fn().chunk
    }

    fn emit(&mut self, op: Op) {
        let line = self.previous.line;
        self.current_fn_mut().chunk.write(op, line);
    }

    fn emit_return(&mut self) {
        if self.current_fn().kind == FunctionKind::Initializer {
            self.emit(Op::GetLocal(0));
        } else {
            self.emit(Op::Nil);
        }
        self.emit(Op::Return);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        let index = self.current_fn_mut().chunk.add_constant(value);
        if index >= MAX_CONSTANTS {
            self.error("Too many constants in one chunk.");
            return 0;
        }
        index as u8
    }

    fn emit_constant(&mut self, value: Value) {
        let index = self.make_constant(value);
        self.emit(Op::Constant(index));
    }

    fn identifier_constant(&mut self, name: Token<'src>) -> u8 {
        let id = self.heap.intern(name.lexeme);
        self.make_constant(Value::Obj(id.key()))
    }

    fn emit_jump(&mut self, op: Op) -> usize {
        self.emit(op);
        self.chunk().current_offset() - 1
    }

    fn patch_jump(&mut self, offset: usize) {
        // -1 because the distance is measured from the instruction after the
        // jump itself.
        let distance = self.chunk().current_offset() - offset - 1;
        if distance > u16::MAX as usize {
            self.error("Too much code to jump over.");
            return;
        }
        self.current_fn_mut()
            .chunk
            .patch_jump(offset, distance as u16);
    }

    fn emit_loop(&mut self, loop_start: usize) {
        let distance = self.chunk().current_offset() - loop_start + 1;
        if distance > u16::MAX as usize {
            self.error("Loop body too large.");
            return;
        }
        self.emit(Op::Loop(distance as u16));
    }

    /// Finish the innermost function: emit the implicit return, move its
    /// chunk into a heap-allocated function object, and hand back the capture
    /// metadata for the enclosing `Closure` instruction.
    fn end_function(&mut self) -> (ObjKey, Vec<UpvalueMeta>) {
        self.emit_return();
        let fc = self
            .functions
            .pop()
            .expect("compiler stack is never empty");

        let function = FunctionObj {
            arity: fc.arity,
            upvalue_count: fc.upvalues.len(),
            chunk: Rc::new(fc.chunk),
            name: fc.name,
        };
        (self.heap.alloc(Obj::Function(function)), fc.upvalues)
    }

    // ------------------------------------------------------------------------
    // Scopes, locals, upvalues
    // ------------------------------------------------------------------------

    fn begin_scope(&mut self) {
        self.current_fn_mut().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.current_fn_mut().scope_depth -= 1;

        loop {
            let doomed = {
                let fc = self.current_fn();
                match fc.locals.last() {
                    Some(local) if local.depth > fc.scope_depth => Some(local.is_captured),
                    _ => None,
                }
            };
            match doomed {
                Some(true) => self.emit(Op::CloseUpvalue),
                Some(false) => self.emit(Op::Pop),
                None => break,
            }
            self.current_fn_mut().locals.pop();
        }
    }

    fn add_local(&mut self, name: Token<'src>) {
        if self.current_fn().locals.len() == MAX_LOCALS {
            self.error("Too many local variables in a function.");
            return;
        }
        self.current_fn_mut().locals.push(Local {
            name: name.lexeme,
            depth: -1,
            is_captured: false,
        });
    }

    fn declare_variable(&mut self) {
        if self.current_fn().scope_depth == 0 {
            return;
        }

        let name = self.previous;
        let mut duplicate = false;
        {
            let fc = self.current_fn();
            for local in fc.locals.iter().rev() {
                if local.depth != -1 && local.depth < fc.scope_depth {
                    break;
                }
                if local.name == name.lexeme {
                    duplicate = true;
                    break;
                }
            }
        }
        if duplicate {
            self.error("Variable with the same name already declared in scope.");
        }
        self.add_local(name);
    }

    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();
        if self.current_fn().scope_depth > 0 {
            return 0;
        }
        self.identifier_constant(self.previous)
    }

    fn mark_initialized(&mut self) {
        let fc = self.current_fn_mut();
        if fc.scope_depth == 0 {
            return;
        }
        let depth = fc.scope_depth;
        if let Some(local) = fc.locals.last_mut() {
            local.depth = depth;
        }
    }

    fn define_variable(&mut self, global: u8) {
        if self.current_fn().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit(Op::DefineGlobal(global));
    }

    fn resolve_local(&mut self, fi: usize, name: &str) -> Option<u8> {
        let found = self.functions[fi]
            .locals
            .iter()
            .enumerate()
            .rev()
            .find(|(_, local)| local.name == name)
            .map(|(slot, local)| (slot, local.depth));

        if let Some((slot, depth)) = found {
            if depth == -1 {
                self.error("Can't read local variable in its own initializer.");
            }
            return Some(slot as u8);
        }
        None
    }

    /// Resolve a name against the enclosing compiler chain, recording the
    /// capture path as upvalue metadata in every function it crosses.
    fn resolve_upvalue(&mut self, fi: usize, name: &str) -> Option<u8> {
        if fi == 0 {
            return None;
        }

        if let Some(local) = self.resolve_local(fi - 1, name) {
            self.functions[fi - 1].locals[local as usize].is_captured = true;
            return Some(self.add_upvalue(fi, local, true));
        }

        if let Some(upvalue) = self.resolve_upvalue(fi - 1, name) {
            return Some(self.add_upvalue(fi, upvalue, false));
        }

        None
    }

    fn add_upvalue(&mut self, fi: usize, index: u8, is_local: bool) -> u8 {
        let meta = UpvalueMeta { index, is_local };
        let upvalues = &mut self.functions[fi].upvalues;

        if let Some(existing) = upvalues.iter().position(|u| *u == meta) {
            return existing as u8;
        }

        if upvalues.len() == MAX_UPVALUES {
            self.error("Too many closure variables in a function.");
            return 0;
        }

        upvalues.push(meta);
        (upvalues.len() - 1) as u8
    }

    fn named_variable(&mut self, name: Token<'src>, can_assign: bool) {
        let fi = self.functions.len() - 1;
        let (get_op, set_op) = if let Some(slot) = self.resolve_local(fi, name.lexeme) {
            (Op::GetLocal(slot), Op::SetLocal(slot))
        } else if let Some(slot) = self.resolve_upvalue(fi, name.lexeme) {
            (Op::GetUpvalue(slot), Op::SetUpvalue(slot))
        } else {
            let index = self.identifier_constant(name);
            (Op::GetGlobal(index), Op::SetGlobal(index))
        };

        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit(set_op);
        } else {
            self.emit(get_op);
        }
    }

    // ------------------------------------------------------------------------
    // Declarations & statements
    // ------------------------------------------------------------------------

    fn declaration(&mut self) {
        if self.matches(TokenKind::Class) {
            self.class_declaration();
        } else if self.matches(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.matches(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expected class name.");
        let class_name = self.previous;
        let name_constant = self.identifier_constant(class_name);
        self.declare_variable();

        self.emit(Op::Class(name_constant));
        self.define_variable(name_constant);

        self.classes.push(ClassState {
            has_superclass: false,
        });

        if self.matches(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "Expected superclass name.");
            self.variable(false);

            if class_name.lexeme == self.previous.lexeme {
                self.error("A class can't inherit from itself.");
            }

            // The superclass value just pushed becomes a synthetic local so
            // every method can capture it for `super` dispatch.
            self.begin_scope();
            self.add_local(Token::synthetic("super"));
            self.define_variable(0);

            self.named_variable(class_name, false);
            self.emit(Op::Inherit);

            if let Some(class) = self.classes.last_mut() {
                class.has_superclass = true;
            }
        }

        self.named_variable(class_name, false);
        self.consume(TokenKind::LeftBrace, "Expected '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "Expected '}' after class body.");
        self.emit(Op::Pop);

        let has_superclass = self
            .classes
            .last()
            .map(|class| class.has_superclass)
            .unwrap_or(false);
        if has_superclass {
            self.end_scope();
        }
        self.classes.pop();
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "Expected method name.");
        let constant = self.identifier_constant(self.previous);

        let kind = if self.previous.lexeme == "init" {
            FunctionKind::Initializer
        } else {
            FunctionKind::Method
        };
        self.function(kind);

        self.emit(Op::Method(constant));
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expected function name.");
        self.mark_initialized();
        self.function(FunctionKind::Function);
        self.define_variable(global);
    }

    fn function(&mut self, kind: FunctionKind) {
        let name = self.heap.intern(self.previous.lexeme);
        self.functions
            .push(FunctionCompiler::new(kind, Some(name)));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expected '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                if self.current_fn().arity == u8::MAX {
                    self.error_at_current("Can't have more than 255 parameters.");
                } else {
                    self.current_fn_mut().arity += 1;
                }

                let constant = self.parse_variable("Expected parameter name.");
                self.define_variable(constant);

                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expected ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expected '{' before function body.");
        self.block();

        // No end_scope: the frame teardown discards the whole stack window.
        let (function, upvalues) = self.end_function();
        let constant = self.make_constant(Value::Obj(function));
        self.emit(Op::Closure(constant));
        for upvalue in upvalues {
            if upvalue.is_local {
                self.emit(Op::CaptureLocal(upvalue.index));
            } else {
                self.emit(Op::CaptureUpvalue(upvalue.index));
            }
        }
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expected variable name.");

        if self.matches(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit(Op::Nil);
        }
        self.consume(
            TokenKind::Semicolon,
            "Expected ';' after variable declaration.",
        );

        self.define_variable(global);
    }

    fn statement(&mut self) {
        if self.matches(TokenKind::Print) {
            self.print_statement();
        } else if self.matches(TokenKind::For) {
            self.for_statement();
        } else if self.matches(TokenKind::If) {
            self.if_statement();
        } else if self.matches(TokenKind::Return) {
            self.return_statement();
        } else if self.matches(TokenKind::While) {
            self.while_statement();
        } else if self.matches(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expected '}' after block.");
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expected ';' after value.");
        self.emit(Op::Print);
    }

    fn return_statement(&mut self) {
        if self.current_fn().kind == FunctionKind::Script {
            self.error("Can't return from top-level code.");
        }

        if self.matches(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            if self.current_fn().kind == FunctionKind::Initializer {
                self.error("Can't return from an initializer.");
            }
            self.expression();
            self.consume(TokenKind::Semicolon, "Expected ';' after return value.");
            self.emit(Op::Return);
        }
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expected ';' after expression.");
        self.emit(Op::Pop);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expected '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expected ')' after condition.");

        let then_jump = self.emit_jump(Op::JumpIfFalse(0xffff));
        self.emit(Op::Pop);
        self.statement();

        let else_jump = self.emit_jump(Op::Jump(0xffff));

        self.patch_jump(then_jump);
        self.emit(Op::Pop);

        if self.matches(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.chunk().current_offset();

        self.consume(TokenKind::LeftParen, "Expected '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expected ')' after condition.");

        let exit_jump = self.emit_jump(Op::JumpIfFalse(0xffff));
        self.emit(Op::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit(Op::Pop);
    }

    fn for_statement(&mut self) {
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expected '(' after 'for'.");
        if self.matches(TokenKind::Semicolon) {
            // No initialiser.
        } else if self.matches(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.chunk().current_offset();

        let mut exit_jump = None;
        if !self.matches(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expected ';' after loop condition.");

            exit_jump = Some(self.emit_jump(Op::JumpIfFalse(0xffff)));
            self.emit(Op::Pop);
        }

        // The increment runs after the body but before the next condition
        // test, so the body jumps over it and loops back to it.
        if !self.matches(TokenKind::RightParen) {
            let body_jump = self.emit_jump(Op::Jump(0xffff));
            let increment_start = self.chunk().current_offset();

            self.expression();
            self.emit(Op::Pop);
            self.consume(TokenKind::RightParen, "Expected ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit(Op::Pop);
        }

        self.end_scope();
    }

    // ------------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------------

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();

        let prefix = match get_rule(self.previous.kind).prefix {
            Some(prefix) => prefix,
            None => {
                self.error("Expected expression.");
                return;
            }
        };

        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= get_rule(self.current.kind).precedence {
            self.advance();
            if let Some(infix) = get_rule(self.previous.kind).infix {
                infix(self, can_assign);
            }
        }

        if can_assign && self.matches(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expected ')' after expression.");
    }

    fn unary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match operator {
            TokenKind::Bang => self.emit(Op::Not),
            TokenKind::Minus => self.emit(Op::Negate),
            _ => {}
        }
    }

    fn binary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        let rule = get_rule(operator);
        self.parse_precedence(rule.precedence.next());

        match operator {
            TokenKind::Plus => self.emit(Op::Add),
            TokenKind::Minus => self.emit(Op::Subtract),
            TokenKind::Star => self.emit(Op::Multiply),
            TokenKind::Slash => self.emit(Op::Divide),
            TokenKind::Percent => self.emit(Op::Modulo),
            TokenKind::BangEqual => {
                self.emit(Op::Equal);
                self.emit(Op::Not);
            }
            TokenKind::EqualEqual => self.emit(Op::Equal),
            TokenKind::Greater => self.emit(Op::Greater),
            TokenKind::GreaterEqual => {
                self.emit(Op::Less);
                self.emit(Op::Not);
            }
            TokenKind::Less => self.emit(Op::Less),
            TokenKind::LessEqual => {
                self.emit(Op::Greater);
                self.emit(Op::Not);
            }
            _ => {}
        }
    }

    fn call(&mut self, _can_assign: bool) {
        let argc = self.argument_list();
        self.emit(Op::Call(argc));
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expected property name after '.'.");
        let name = self.identifier_constant(self.previous);

        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit(Op::SetProperty(name));
        } else if self.matches(TokenKind::LeftParen) {
            let argc = self.argument_list();
            self.emit(Op::Invoke(name, argc));
        } else {
            self.emit(Op::GetProperty(name));
        }
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: u32 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if count == 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                count += 1;
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expected ')' after arguments.");
        count.min(255) as u8
    }

    fn and_expr(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(Op::JumpIfFalse(0xffff));
        self.emit(Op::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_expr(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(Op::JumpIfFalse(0xffff));
        let end_jump = self.emit_jump(Op::Jump(0xffff));

        self.patch_jump(else_jump);
        self.emit(Op::Pop);

        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn number(&mut self, _can_assign: bool) {
        match self.previous.lexeme.parse::<f64>() {
            Ok(value) => self.emit_constant(Value::Number(value)),
            Err(_) => self.error("Invalid number literal."),
        }
    }

    fn string(&mut self, _can_assign: bool) {
        let lexeme = self.previous.lexeme;
        let id = self.heap.intern(&lexeme[1..lexeme.len() - 1]);
        self.emit_constant(Value::Obj(id.key()));
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::False => self.emit(Op::False),
            TokenKind::True => self.emit(Op::True),
            TokenKind::Nil => self.emit(Op::Nil),
            _ => {}
        }
    }

    fn variable(&mut self, can_assign: bool) {
        self.named_variable(self.previous, can_assign);
    }

    fn this_expr(&mut self, _can_assign: bool) {
        if self.classes.is_empty() {
            self.error("Can't use 'this' outside of a class.");
            return;
        }
        self.variable(false);
    }

    fn super_expr(&mut self, _can_assign: bool) {
        match self.classes.last().map(|class| class.has_superclass) {
            None => self.error("Can't use 'super' outside of class."),
            Some(false) => self.error("Can't use 'super' in a class with no superclass."),
            Some(true) => {}
        }

        self.consume(TokenKind::Dot, "Expected '.' after 'super'.");
        self.consume(TokenKind::Identifier, "Expected superclass method name.");
        let name = self.identifier_constant(self.previous);

        self.named_variable(Token::synthetic("this"), false);
        if self.matches(TokenKind::LeftParen) {
            let argc = self.argument_list();
            self.named_variable(Token::synthetic("super"), false);
            self.emit(Op::SuperInvoke(name, argc));
        } else {
            self.named_variable(Token::synthetic("super"), false);
            self.emit(Op::GetSuper(name));
        }
    }
}

fn get_rule<'src, 'h>(kind: TokenKind) -> ParseRule<'src, 'h> {
    use TokenKind as T;

    let (prefix, infix, precedence): (
        Option<ParseFn<'src, 'h>>,
        Option<ParseFn<'src, 'h>>,
        Precedence,
    ) = match kind {
        T::LeftParen => (
            Some(Compiler::grouping),
            Some(Compiler::call),
            Precedence::Call,
        ),
        T::Dot => (None, Some(Compiler::dot), Precedence::Call),
        T::Minus => (
            Some(Compiler::unary),
            Some(Compiler::binary),
            Precedence::Term,
        ),
        T::Plus => (None, Some(Compiler::binary), Precedence::Term),
        T::Slash | T::Star | T::Percent => (None, Some(Compiler::binary), Precedence::Factor),
        T::Bang => (Some(Compiler::unary), None, Precedence::None),
        T::BangEqual | T::EqualEqual => (None, Some(Compiler::binary), Precedence::Equality),
        T::Greater | T::GreaterEqual | T::Less | T::LessEqual => {
            (None, Some(Compiler::binary), Precedence::Comparison)
        }
        T::Identifier => (Some(Compiler::variable), None, Precedence::None),
        T::String => (Some(Compiler::string), None, Precedence::None),
        T::Number => (Some(Compiler::number), None, Precedence::None),
        T::And => (None, Some(Compiler::and_expr), Precedence::And),
        T::Or => (None, Some(Compiler::or_expr), Precedence::Or),
        T::False | T::True | T::Nil => (Some(Compiler::literal), None, Precedence::None),
        T::Super => (Some(Compiler::super_expr), None, Precedence::None),
        T::This => (Some(Compiler::this_expr), None, Precedence::None),
        _ => (None, None, Precedence::None),
    };

    ParseRule {
        prefix,
        infix,
        precedence,
    }
}
