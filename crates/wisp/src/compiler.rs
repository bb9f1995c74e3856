//! Single-pass Pratt parser and bytecode emitter (spec.md §4.2).
//!
//! `litter::compiler` walks an AST handed to it by
//! `ruff_python_parser` and keeps its helper methods — `emit`, `emit_jump`,
//! `patch_jump`, `add_const`, `add_name` — as small building blocks around
//! that walk. There's no AST here: spec.md §1 calls for a single-pass
//! compiler that parses and emits in the same step, so this module drives
//! the scanner token-by-token with a Pratt precedence climb instead. The
//! helper-method idiom carries over; the AST-walking doesn't. Per the design
//! notes in spec.md §9, parse-rule dispatch is a `match` on token kind
//! inside two functions (`parse_prefix`/`parse_infix`) rather than a table
//! of function pointers, and the "enclosing compiler" back-pointer becomes
//! an owned `Vec<FunctionScope>` stack with no cyclic ownership.

use std::rc::Rc;

use crate::bytecode::{Chunk, OpCode};
use crate::diagnostic::Diagnostic;
use crate::error::CompileError;
use crate::scanner::{Scanner, Token, TokenKind};
use crate::value::{FunctionObj, Interner, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < <= > >=
    Term,       // + -
    Factor,     // * /
    Unary,      // ! -
    Call,       // . () []
    Primary,
}

impl Precedence {
    fn next(self) -> Precedence {
        use Precedence::*;
        match self {
            None => Assignment,
            Assignment => Or,
            Or => And,
            And => Equality,
            Equality => Comparison,
            Comparison => Term,
            Term => Factor,
            Factor => Unary,
            Unary => Call,
            Call => Primary,
            Primary => Primary,
        }
    }
}

fn precedence_of(kind: TokenKind) -> Precedence {
    use TokenKind::*;
    match kind {
        Or => Precedence::Or,
        And => Precedence::And,
        BangEqual | EqualEqual => Precedence::Equality,
        Less | LessEqual | Greater | GreaterEqual => Precedence::Comparison,
        Plus | Minus => Precedence::Term,
        Star | Slash => Precedence::Factor,
        LeftParen | Dot | LeftBracket => Precedence::Call,
        _ => Precedence::None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionType {
    Script,
    Function,
}

struct Local<'src> {
    name: &'src str,
    /// -1 means declared but not yet initialized.
    depth: i32,
}

/// Per-function compilation state. `Compiler` owns a stack of these instead
/// of each one pointing at an `enclosing` compiler, per spec.md §9.
struct FunctionScope<'src> {
    name: Rc<str>,
    arity: u8,
    chunk: Chunk,
    function_type: FunctionType,
    locals: Vec<Local<'src>>,
    scope_depth: i32,
    /// Set when the script's very last top-level statement was a bare
    /// expression statement, so its value should flow out as the result of
    /// running the program instead of being discarded. Mirrors
    /// `litter::Sandbox::run`, which likewise returns the value of the
    /// last top-level expression (`littrs::vm`'s `end_frame` for the
    /// top-level frame: "returns TOS or None").
    pending_tail_value: bool,
}

impl<'src> FunctionScope<'src> {
    fn new(name: Rc<str>, function_type: FunctionType) -> Self {
        // Slot 0 is reserved for the callee itself (spec.md §3).
        Self {
            name,
            arity: 0,
            chunk: Chunk::new(),
            function_type,
            locals: vec![Local { name: "", depth: 0 }],
            scope_depth: 0,
            pending_tail_value: false,
        }
    }
}

pub struct Compiler<'src> {
    scanner: Scanner<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    diagnostics: Vec<Diagnostic>,
    scopes: Vec<FunctionScope<'src>>,
    interner: &'src mut Interner,
}

impl<'src> Compiler<'src> {
    fn new(source: &'src str, interner: &'src mut Interner) -> Self {
        let scanner = Scanner::new(source);
        // `current`/`previous` both start out as an unused placeholder;
        // the first real call to `advance()` (from `compile()`) overwrites
        // `current` with the actual first token, routed through the same
        // error-skipping loop every later token goes through.
        let placeholder = Token {
            kind: TokenKind::Eof,
            lexeme: "",
            line: 0,
        };
        Self {
            scanner,
            current: placeholder,
            previous: placeholder,
            had_error: false,
            panic_mode: false,
            diagnostics: Vec::new(),
            scopes: vec![FunctionScope::new(Rc::from("script"), FunctionType::Script)],
            interner,
        }
    }

    fn scope(&self) -> &FunctionScope<'src> {
        self.scopes.last().expect("at least one function scope")
    }

    fn scope_mut(&mut self) -> &mut FunctionScope<'src> {
        self.scopes.last_mut().expect("at least one function scope")
    }

    fn chunk_mut(&mut self) -> &mut Chunk {
        &mut self.scope_mut().chunk
    }

    // ---- token stream -----------------------------------------------

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let message = self.current.lexeme.to_string();
            self.error_at_current(&message);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
        } else {
            self.error_at_current(message);
        }
    }

    // ---- error reporting ----------------------------------------------

    fn error_at_current(&mut self, message: &str) {
        let token = self.current;
        self.error_at(token, message);
    }

    fn error(&mut self, message: &str) {
        let token = self.previous;
        self.error_at(token, message);
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        let where_ = match token.kind {
            TokenKind::Eof => "at end".to_string(),
            TokenKind::Error => String::new(),
            _ => format!("at '{}'", token.lexeme),
        };
        self.diagnostics.push(Diagnostic::new(token.line, where_, message));
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            use TokenKind::*;
            match self.current.kind {
                Struct | Fun | Var | For | If | While | Print | Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    // ---- emission helpers ----------------------------------------------

    fn emit(&mut self, op: OpCode) {
        let line = self.previous.line;
        self.chunk_mut().write_op(op, line);
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.chunk_mut().write_byte(byte, line);
    }

    fn emit_two(&mut self, op: OpCode, operand: u8) {
        self.emit(op);
        self.emit_byte(operand);
    }

    /// Emits `op` followed by a two-byte forward-jump placeholder, returning
    /// the placeholder's offset for a later `patch_jump`.
    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit(op);
        let line = self.previous.line;
        let offset = self.chunk_mut().len();
        self.chunk_mut().write_u16(0xFFFF, line);
        offset
    }

    fn patch_jump(&mut self, offset: usize) {
        if self.chunk_mut().patch_jump(offset).is_err() {
            self.error("Too much code to jump over.");
        }
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit(OpCode::Loop);
        let line = self.previous.line;
        let jump = self.chunk_mut().len() - loop_start + 2;
        if jump > u16::MAX as usize {
            self.error("Too much code to jump over.");
            return;
        }
        self.chunk_mut().write_u16(jump as u16, line);
    }

    fn current_offset(&mut self) -> usize {
        self.chunk_mut().len()
    }

    fn add_constant(&mut self, value: Value) -> u8 {
        match self.chunk_mut().add_constant(value) {
            Some(idx) => idx,
            None => {
                self.error("Too many constants in one chunk.");
                0
            }
        }
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        let interned = self.interner.intern(name);
        self.add_constant(Value::Str(interned))
    }

    // ---- scopes and locals ----------------------------------------------

    fn begin_scope(&mut self) {
        self.scope_mut().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.scope_mut().scope_depth -= 1;
        let depth = self.scope().scope_depth;
        while let Some(local) = self.scope().locals.last() {
            if local.depth <= depth {
                break;
            }
            self.emit(OpCode::Pop);
            self.scope_mut().locals.pop();
        }
    }

    fn declare_variable(&mut self) {
        if self.scope().scope_depth == 0 {
            return;
        }
        let name = self.previous.lexeme;
        let depth = self.scope().scope_depth;
        for local in self.scope().locals.iter().rev() {
            if local.depth != -1 && local.depth < depth {
                break;
            }
            if local.name == name {
                self.error("Already a variable with this name in this scope.");
                return;
            }
        }
        self.add_local(name);
    }

    fn add_local(&mut self, name: &'src str) {
        if self.scope().locals.len() >= 256 {
            self.error("Too many local variables in function.");
            return;
        }
        self.scope_mut().locals.push(Local { name, depth: -1 });
    }

    fn mark_initialized(&mut self) {
        if self.scope().scope_depth == 0 {
            return;
        }
        let depth = self.scope().scope_depth;
        if let Some(local) = self.scope_mut().locals.last_mut() {
            local.depth = depth;
        }
    }

    fn resolve_local(&mut self, name: &str) -> Option<u8> {
        let scope = self.scope();
        for (i, local) in scope.locals.iter().enumerate().rev() {
            if local.name == name {
                if local.depth == -1 {
                    self.error("Can't read local variable in its own initializer.");
                }
                return Some(i as u8);
            }
        }
        None
    }

    /// Emits the opcode that finishes defining the variable just declared:
    /// nothing for locals (they're already on the stack in place), or
    /// `DEFINE_GLOBAL` for globals.
    fn define_variable(&mut self, global: u8) {
        if self.scope().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_two(OpCode::DefineGlobal, global);
    }

    // ---- expressions -----------------------------------------------------

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let can_assign = precedence <= Precedence::Assignment;
        if !self.parse_prefix(self.previous.kind, can_assign) {
            self.error("Expect expression.");
            return;
        }

        while precedence <= precedence_of(self.current.kind) {
            self.advance();
            self.parse_infix(self.previous.kind, can_assign);
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn parse_prefix(&mut self, kind: TokenKind, can_assign: bool) -> bool {
        use TokenKind::*;
        match kind {
            LeftParen => self.grouping(),
            Minus | Bang => self.unary(),
            Number => self.number(),
            String => self.string(),
            True | False | Nil => self.literal(),
            Identifier => self.variable(can_assign),
            LeftBracket => self.array(),
            LeftBrace => self.map(),
            _ => return false,
        }
        true
    }

    fn parse_infix(&mut self, kind: TokenKind, can_assign: bool) {
        use TokenKind::*;
        match kind {
            Plus | Minus | Star | Slash | BangEqual | EqualEqual | Greater | GreaterEqual
            | Less | LessEqual => self.binary(),
            And => self.and(),
            Or => self.or(),
            LeftParen => self.call(),
            Dot => self.dot(can_assign),
            LeftBracket => self.index(),
            _ => {}
        }
    }

    fn grouping(&mut self) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn unary(&mut self) {
        let operator = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match operator {
            TokenKind::Minus => self.emit(OpCode::Negate),
            TokenKind::Bang => self.emit(OpCode::Not),
            _ => unreachable!("unary() dispatched for non-unary token"),
        }
    }

    fn binary(&mut self) {
        let operator = self.previous.kind;
        let rule = precedence_of(operator);
        self.parse_precedence(rule.next());
        use TokenKind::*;
        match operator {
            Plus => self.emit(OpCode::Add),
            Minus => self.emit(OpCode::Subtract),
            Star => self.emit(OpCode::Multiply),
            Slash => self.emit(OpCode::Divide),
            EqualEqual => self.emit(OpCode::Equal),
            BangEqual => {
                self.emit(OpCode::Equal);
                self.emit(OpCode::Not);
            }
            Greater => self.emit(OpCode::Greater),
            GreaterEqual => {
                self.emit(OpCode::Less);
                self.emit(OpCode::Not);
            }
            Less => self.emit(OpCode::Less),
            LessEqual => {
                self.emit(OpCode::Greater);
                self.emit(OpCode::Not);
            }
            _ => unreachable!("binary() dispatched for non-binary token"),
        }
    }

    fn number(&mut self) {
        let value: f64 = self.previous.lexeme.parse().unwrap_or(0.0);
        let idx = self.add_constant(Value::Number(value));
        self.emit_two(OpCode::Constant, idx);
    }

    fn string(&mut self) {
        let lexeme = self.previous.lexeme;
        let contents = &lexeme[1..lexeme.len() - 1];
        let interned = self.interner.intern(contents);
        let idx = self.add_constant(Value::Str(interned));
        self.emit_two(OpCode::Constant, idx);
    }

    fn literal(&mut self) {
        match self.previous.kind {
            TokenKind::True => self.emit(OpCode::True),
            TokenKind::False => self.emit(OpCode::False),
            TokenKind::Nil => self.emit(OpCode::Nil),
            _ => unreachable!("literal() dispatched for non-literal token"),
        }
    }

    fn variable(&mut self, can_assign: bool) {
        let name = self.previous.lexeme;
        if let Some(slot) = self.resolve_local(name) {
            if can_assign && self.match_token(TokenKind::Equal) {
                self.expression();
                self.emit_two(OpCode::SetLocal, slot);
            } else {
                self.emit_two(OpCode::GetLocal, slot);
            }
            return;
        }
        let global = self.identifier_constant(name);
        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_two(OpCode::SetGlobal, global);
        } else {
            self.emit_two(OpCode::GetGlobal, global);
        }
    }

    fn array(&mut self) {
        let mut count: u32 = 0;
        if !self.check(TokenKind::RightBracket) {
            loop {
                self.expression();
                count += 1;
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightBracket, "Expect ']' after array elements.");
        if count > 255 {
            self.error("Can't have more than 255 elements in an array literal.");
        }
        self.emit_two(OpCode::Array, count as u8);
    }

    /// `{ key: value, ... }` — a map literal. Only valid in expression
    /// position; a `{` at the start of a statement is always a block
    /// (`statement()` checks for it first), so there's no grammar conflict.
    /// Keys are written as a bare identifier or a string literal, either way
    /// compiled to the same string constant the `MAP` opcode expects
    /// (spec.md §3: map keys are always `String`).
    fn map(&mut self) {
        let mut count: u32 = 0;
        if !self.check(TokenKind::RightBrace) {
            loop {
                self.map_key();
                self.consume(TokenKind::Colon, "Expect ':' after map key.");
                self.expression();
                count += 2;
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after map entries.");
        if count / 2 > 255 {
            self.error("Can't have more than 255 entries in a map literal.");
        }
        self.emit_two(OpCode::Map, count as u8);
    }

    fn map_key(&mut self) {
        if self.match_token(TokenKind::String) {
            let lexeme = self.previous.lexeme;
            let contents = &lexeme[1..lexeme.len() - 1];
            let interned = self.interner.intern(contents);
            let idx = self.add_constant(Value::Str(interned));
            self.emit_two(OpCode::Constant, idx);
        } else if self.match_token(TokenKind::Identifier) {
            let name = self.previous.lexeme;
            let idx = self.identifier_constant(name);
            self.emit_two(OpCode::Constant, idx);
        } else {
            self.error_at_current("Expect map key.");
            self.advance();
        }
    }

    fn and(&mut self) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or(&mut self) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn call(&mut self) {
        let argc = self.argument_list();
        self.emit_two(OpCode::Call, argc);
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: u32 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                count += 1;
                if count > 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        count as u8
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let name = self.previous.lexeme;
        let name_const = self.identifier_constant(name);
        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_two(OpCode::SetProperty, name_const);
        } else {
            self.emit_two(OpCode::GetProperty, name_const);
        }
    }

    fn index(&mut self) {
        self.expression();
        self.consume(TokenKind::RightBracket, "Expect ']' after index.");
        self.emit(OpCode::Index);
    }

    // ---- statements -----------------------------------------------------

    fn declaration(&mut self) {
        if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else if self.match_token(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.match_token(TokenKind::Struct) {
            self.struct_declaration();
        } else {
            self.statement();
        }
        if self.panic_mode {
            self.synchronize();
        }
    }

    fn var_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect variable name.");
        self.declare_variable();
        let name = self.previous.lexeme;
        let global = if self.scope().scope_depth > 0 {
            0
        } else {
            self.identifier_constant(name)
        };

        if self.match_token(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit(OpCode::Nil);
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.");
        self.define_variable(global);
    }

    fn fun_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect function name.");
        let name = self.previous.lexeme;
        self.declare_variable();
        let global = if self.scope().scope_depth > 0 {
            self.mark_initialized();
            0
        } else {
            self.identifier_constant(name)
        };
        self.function(name, FunctionType::Function);
        self.define_variable(global);
    }

    fn function(&mut self, name: &'src str, function_type: FunctionType) {
        let interned_name = self.interner.intern(name);
        self.scopes.push(FunctionScope::new(interned_name, function_type));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                if self.scope().arity == 255 {
                    self.error_at_current("Can't have more than 255 parameters.");
                }
                self.scope_mut().arity += 1;
                self.consume(TokenKind::Identifier, "Expect parameter name.");
                self.declare_variable();
                self.mark_initialized();
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        let function = self.end_function();
        let idx = self.add_constant(Value::Function(function));
        self.emit_two(OpCode::Constant, idx);
    }

    fn struct_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect struct name.");
        let name = self.previous.lexeme;
        self.declare_variable();
        let global = if self.scope().scope_depth > 0 {
            0
        } else {
            self.identifier_constant(name)
        };
        // The STRUCT opcode always needs the struct's own name as a
        // constant (for diagnostics/`to_print_string`), independent of
        // whether this declaration ends up stored in a global or a local.
        let name_const = self.identifier_constant(name);
        self.emit_two(OpCode::Struct, name_const);

        self.consume(TokenKind::LeftBrace, "Expect '{' before struct body.");
        if !self.check(TokenKind::RightBrace) {
            loop {
                self.consume(TokenKind::Identifier, "Expect field name.");
                let field = self.previous.lexeme;
                let field_const = self.identifier_constant(field);
                self.emit_two(OpCode::StructArg, field_const);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after struct body.");
        self.define_variable(global);
    }

    fn statement(&mut self) {
        if self.match_token(TokenKind::Print) {
            self.print_statement();
        } else if self.match_token(TokenKind::If) {
            self.if_statement();
        } else if self.match_token(TokenKind::While) {
            self.while_statement();
        } else if self.match_token(TokenKind::For) {
            self.for_statement();
        } else if self.match_token(TokenKind::Return) {
            self.return_statement();
        } else if self.match_token(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit(OpCode::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");

        // At the very top level — not nested inside any block or function —
        // the last expression statement in the source becomes the value the
        // whole program evaluates to, rather than being discarded like every
        // other expression statement.
        let is_top_level_tail =
            self.scopes.len() == 1 && self.scope().scope_depth == 0 && self.check(TokenKind::Eof);
        if is_top_level_tail {
            self.scope_mut().pending_tail_value = true;
        } else {
            self.emit(OpCode::Pop);
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit(OpCode::Pop);
        self.statement();

        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit(OpCode::Pop);

        if self.match_token(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.current_offset();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit(OpCode::Pop);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");

        if self.match_token(TokenKind::Semicolon) {
            // No initializer.
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.current_offset();
        let mut exit_jump = None;
        if !self.match_token(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit(OpCode::Pop);
        }

        if !self.check(TokenKind::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.current_offset();
            self.expression();
            self.emit(OpCode::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        } else {
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit(OpCode::Pop);
        }
        self.end_scope();
    }

    fn return_statement(&mut self) {
        if self.scope().function_type == FunctionType::Script {
            self.error("Can't return from top-level code.");
        }
        if self.match_token(TokenKind::Semicolon) {
            self.emit(OpCode::Nil);
            self.emit(OpCode::Return);
        } else {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit(OpCode::Return);
        }
    }

    // ---- finishing a function -------------------------------------------

    fn end_function(&mut self) -> Rc<FunctionObj> {
        if !self.scope().pending_tail_value {
            self.emit(OpCode::Nil);
        }
        self.emit(OpCode::Return);
        let scope = self.scopes.pop().expect("function scope pushed before end_function");
        Rc::new(FunctionObj {
            name: scope.name,
            arity: scope.arity,
            chunk: scope.chunk,
        })
    }

    fn finish(mut self) -> Result<Rc<FunctionObj>, CompileError> {
        self.consume(TokenKind::Eof, "Expect end of expression.");
        let function = self.end_function();
        if self.had_error {
            Err(CompileError(self.diagnostics))
        } else {
            Ok(function)
        }
    }
}

/// Compiles `source` into a top-level function object, per spec.md §4.2.
///
/// Every string literal and identifier name encountered along the way is
/// interned through `interner`, so later VM execution sees already-canonical
/// `Rc<str>` handles for every compile-time-known string.
pub fn compile<'src>(
    source: &'src str,
    interner: &'src mut Interner,
) -> Result<Rc<FunctionObj>, CompileError> {
    let mut compiler = Compiler::new(source, interner);
    compiler.advance();
    while !compiler.check(TokenKind::Eof) {
        compiler.declaration();
    }
    compiler.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::OpCode;

    fn compile_ok(source: &str) -> Rc<FunctionObj> {
        let mut interner = Interner::new();
        compile(source, &mut interner).expect("expected successful compile")
    }

    #[test]
    fn compiles_arithmetic_expression_statement() {
        let function = compile_ok("1 + 2 * 3;");
        let ops: Vec<OpCode> = collect_ops(&function.chunk);
        assert!(ops.contains(&OpCode::Add));
        assert!(ops.contains(&OpCode::Multiply));
        // The lone top-level expression statement becomes the script's
        // result, so no Pop and no implicit Nil precede the final Return.
        assert!(!ops.contains(&OpCode::Pop));
        assert_eq!(ops.last(), Some(&OpCode::Return));
    }

    #[test]
    fn undefined_name_in_assignment_target_is_error() {
        let mut interner = Interner::new();
        let result = compile("1 = 2;", &mut interner);
        assert!(result.is_err());
    }

    #[test]
    fn duplicate_local_in_same_scope_is_error() {
        let mut interner = Interner::new();
        let result = compile("{ var a = 1; var a = 2; }", &mut interner);
        assert!(result.is_err());
    }

    #[test]
    fn return_outside_function_is_error() {
        let mut interner = Interner::new();
        let result = compile("return 1;", &mut interner);
        assert!(result.is_err());
    }

    #[test]
    fn reading_local_in_its_own_initializer_is_error() {
        let mut interner = Interner::new();
        let result = compile("{ var a = a; }", &mut interner);
        assert!(result.is_err());
    }

    #[test]
    fn compiles_map_literal_with_string_and_bare_keys() {
        let function = compile_ok(r#"var m = {"a": 1, b: 2};"#);
        let chunk = &function.chunk;
        let map_at = chunk
            .code
            .iter()
            .position(|&b| b == OpCode::Map as u8)
            .expect("MAP opcode emitted");
        // 2 entries => operand counts 4 values (2 keys + 2 values).
        assert_eq!(chunk.code[map_at + 1], 4);
    }

    #[test]
    fn compiles_struct_declaration_with_fields() {
        let function = compile_ok("struct P { x, y }");
        let ops = collect_ops(&function.chunk);
        assert!(ops.contains(&OpCode::Struct));
        assert_eq!(ops.iter().filter(|op| **op == OpCode::StructArg).count(), 2);
    }

    fn collect_ops(chunk: &Chunk) -> Vec<OpCode> {
        let mut ops = Vec::new();
        let mut offset = 0;
        while offset < chunk.len() {
            let op = chunk.read_op(offset).expect("valid opcode");
            offset += 1;
            offset += operand_width(op);
            ops.push(op);
        }
        ops
    }

    fn operand_width(op: OpCode) -> usize {
        use OpCode::*;
        match op {
            Constant | GetLocal | SetLocal | GetGlobal | DefineGlobal | SetGlobal
            | GetProperty | SetProperty | Call | Array | Map | Struct | StructArg => 1,
            Jump | JumpIfFalse | Loop => 2,
            _ => 0,
        }
    }
}
