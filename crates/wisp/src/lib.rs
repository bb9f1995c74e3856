//! Wisp: a small, dynamically typed scripting language in the Lox family,
//! compiled in a single pass to bytecode and executed by a stack-based
//! virtual machine.
//!
//! Supported surface: numbers, booleans, nil, strings, arrays, maps,
//! first-class functions, user-defined structs with call-syntax
//! instantiation, global and lexically scoped locals, `if`/`else`, `while`,
//! C-style `for`, short-circuit `and`/`or`, `print`, and host-registered
//! native functions.
//!
//! ```
//! use wisp::{Interpreter, Value};
//!
//! let mut interp = Interpreter::new();
//! let result = interp.run("var x = 1 + 2; x * 10;").unwrap();
//! assert_eq!(result, Value::Number(30.0));
//! ```

mod builtins;
mod bytecode;
mod compiler;
mod diagnostic;
mod error;
mod scanner;
mod value;
mod vm;

use std::time::Instant;

pub use diagnostic::Diagnostic;
pub use error::{CompileError, Error, Result, RuntimeError, TraceFrame};
pub use value::Value;

use vm::Vm;

/// The embeddable host API: compile-and-run a script against a VM whose
/// globals and registered natives persist across calls.
///
/// Modeled on `litter::Sandbox`: `Sandbox::new`/`with_builtins`,
/// `register_fn`, and `run` become `Interpreter::new` (which always
/// registers the built-ins, since spec.md treats `clock` as always
/// available rather than opt-in), `register_native`, and `run`.
pub struct Interpreter {
    vm: Vm,
}

impl Interpreter {
    /// Creates a fresh interpreter with the built-in natives (`clock`,
    /// `len`) already registered.
    pub fn new() -> Self {
        let mut vm = Vm::new();
        builtins::register(&mut vm, Instant::now());
        Self { vm }
    }

    /// Registers a host-provided native function, callable from Wisp source
    /// as `name(...)` with exactly `arity` arguments.
    ///
    /// Unlike `litter::Sandbox::register_fn` (arbitrary
    /// `Vec<PyValue> -> PyValue`, no arity contract), Wisp natives declare a
    /// fixed arity up front, matching spec.md §3's `Native` object and §4.4's
    /// `CALL` semantics for non-Function callees.
    pub fn register_native(
        &mut self,
        name: &str,
        arity: u8,
        function: impl Fn(&[Value]) -> std::result::Result<Value, String> + 'static,
    ) {
        self.vm.define_native(name, arity, function);
    }

    /// Sets a global variable directly, without going through Wisp source.
    pub fn set_global(&mut self, name: &str, value: Value) {
        self.vm.set_global(name, value);
    }

    /// Overrides the maximum call-frame depth (default matches the VM's
    /// built-in bound). Mirrors `litter::Sandbox::limit`'s `max_recursion_depth`
    /// knob, minus the instruction-count limit `Sandbox::limit` also carries:
    /// Wisp's deterministic stack VM has no equivalent notion of a host-side
    /// instruction budget to cap.
    pub fn set_max_call_depth(&mut self, depth: usize) {
        self.vm.set_max_call_depth(depth);
    }

    /// Compiles and runs `source`, returning the value of its last top-level
    /// expression statement (or `Value::Nil` if the program ends with a
    /// non-expression statement).
    ///
    /// Globals defined by `source` persist in this `Interpreter` and are
    /// visible to subsequent `run` calls, which is what makes a REPL built
    /// on top of this type workable (spec.md §6).
    pub fn run(&mut self, source: &str) -> Result<Value> {
        let function = compiler::compile(source, self.vm.interner_mut())?;
        let value = self.vm.interpret(function)?;
        Ok(value)
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}
