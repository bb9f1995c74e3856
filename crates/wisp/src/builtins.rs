//! Built-in native functions registered into every fresh [`crate::Interpreter`].
//!
//! Grounded on spec.md §4.4 ("`clock()` returns seconds since process start
//! as a Number") plus `littrs::lib`'s own published builtin list
//! ("Built-in Functions: `len()`, ..."), which supplements
//! spec.md's single example with the one other builtin a language with
//! arrays/maps/strings but no method syntax needs to stay usable: a way to
//! ask how big something is.

use std::time::Instant;

use crate::value::Value;
use crate::vm::Vm;

pub fn register(vm: &mut Vm, started_at: Instant) {
    vm.define_native("clock", 0, move |_args| {
        Ok(Value::Number(started_at.elapsed().as_secs_f64()))
    });

    vm.define_native("len", 1, |args| match &args[0] {
        Value::Str(s) => Ok(Value::Number(s.chars().count() as f64)),
        Value::Array(items) => Ok(Value::Number(items.borrow().len() as f64)),
        Value::Map(entries) => Ok(Value::Number(entries.borrow().len() as f64)),
        other => Err(format!("len() expects a string, array, or map, got {}.", other.type_name())),
    });
}

// See `tests/interpreter_tests.rs` for end-to-end coverage of `clock()` and
// `len()` driven through `Interpreter::run`, which exercises these natives
// the same way host code actually calls them (through `CALL`, not directly).
