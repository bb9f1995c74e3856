//! The runtime value model.
//!
//! Adapted from `litter::value::PyValue`, which keeps variants for the
//! handful of primitive/collection types a small embedded
//! language needs and a `type_name`/`is_truthy`/`to_print_string` trio for
//! diagnostics and the `print` statement. Two things don't carry over
//! unchanged: spec.md needs identity-based object types (functions, structs,
//! instances) that `PyValue` has no equivalent for, and spec.md §4.5 asks for
//! reference-counted heap objects rather than `PyValue`'s by-value `Vec`
//! clones, so collections and objects are wrapped in `Rc`/`Rc<RefCell<_>>`
//! instead of owned inline.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::bytecode::Chunk;

/// A compiled function: its chunk, arity, and name (for stack traces).
#[derive(Debug)]
pub struct FunctionObj {
    pub name: Rc<str>,
    pub arity: u8,
    pub chunk: Chunk,
}

/// A Rust function exposed to Wisp code via [`crate::Interpreter::register_native`].
pub struct NativeObj {
    pub name: Rc<str>,
    pub arity: u8,
    pub function: Box<dyn Fn(&[Value]) -> Result<Value, String>>,
}

impl fmt::Debug for NativeObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeObj")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

/// A struct declaration: its name and the ordered list of field names.
///
/// `fields` is built up one `STRUCT_ARG` opcode at a time after the struct
/// object itself has already been pushed (spec.md §4.3), so it needs
/// interior mutability even though the struct is conceptually immutable
/// once its declaration has finished compiling.
#[derive(Debug)]
pub struct StructObj {
    pub name: Rc<str>,
    pub fields: RefCell<Vec<Rc<str>>>,
}

/// An instance of a [`StructObj`], carrying the struct definition it was
/// built from and its per-instance field values.
///
/// Fields are stored positionally, aligned with `struct_def.fields` (spec.md
/// §3); `GET_PROPERTY`/`SET_PROPERTY` resolve a field name to an index via a
/// linear search over `struct_def.fields` before indexing here.
#[derive(Debug)]
pub struct InstanceObj {
    pub struct_def: Rc<StructObj>,
    pub fields: Vec<Value>,
}

pub type Array = Rc<RefCell<Vec<Value>>>;
pub type Map = Rc<RefCell<HashMap<Rc<str>, Value>>>;

/// A Wisp runtime value.
///
/// `Str`, `Function`, `Native`, `Struct`, `Array` and `Map` are all
/// reference-counted heap handles; cloning a `Value` clones the handle, not
/// the underlying data, which is what gives array/map/instance mutation its
/// shared-reference semantics (spec.md §3, §4.5).
#[derive(Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Function(Rc<FunctionObj>),
    Native(Rc<NativeObj>),
    Struct(Rc<StructObj>),
    Instance(Rc<RefCell<InstanceObj>>),
    Array(Array),
    Map(Map),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Function(_) => "function",
            Value::Native(_) => "native function",
            Value::Struct(_) => "struct",
            Value::Instance(_) => "instance",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
        }
    }

    /// Everything is truthy except `nil` and `false`, per spec.md §3.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Spec.md §3: `nil`/`bool`/`number`/`string` compare structurally;
    /// every other type compares by heap identity (pointer equality of the
    /// shared `Rc`/`Rc<RefCell<_>>` handle).
    pub fn values_equal(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Rc::ptr_eq(a, b),
            (Value::Struct(a), Value::Struct(b)) => Rc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Map(a), Value::Map(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// How `print` renders a value: no quotes around strings, numbers render
    /// via `f64`'s own `Display` (spec.md §8: `print 1 + 2 * 3;` → `7`, not
    /// `7.0`).
    pub fn to_print_string(&self) -> String {
        match self {
            Value::Nil => "nil".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::Str(s) => s.to_string(),
            Value::Function(f) => format!("<fn {}>", f.name),
            Value::Native(f) => format!("<native fn {}>", f.name),
            Value::Struct(s) => format!("<struct {}>", s.name),
            Value::Instance(i) => format!("<instance {}>", i.borrow().struct_def.name),
            Value::Array(items) => {
                let items = items.borrow();
                let rendered: Vec<String> = items.iter().map(Value::to_print_string).collect();
                format!("[{}]", rendered.join(", "))
            }
            Value::Map(entries) => {
                let entries = entries.borrow();
                let rendered: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v.to_print_string()))
                    .collect();
                format!("{{{}}}", rendered.join(", "))
            }
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_infinite() {
        return if n > 0.0 { "inf".to_string() } else { "-inf".to_string() };
    }
    if n.is_nan() {
        return "nan".to_string();
    }
    n.to_string()
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_print_string())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.values_equal(other)
    }
}

/// Interns strings so that equal lexical content maps to the same `Rc<str>`
/// allocation, giving `values_equal`'s `Str` arm its expected O(1) behavior
/// (pointer-equal for equal content) without requiring the VM thread itself
/// through the compiler. Grounded on `littrs::vm`'s string-interning intent
/// (interned identifiers) adapted to the simpler "intern every
/// string" policy spec.md §2 describes.
#[derive(Default)]
pub struct Interner {
    strings: HashMap<Box<str>, Rc<str>>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, s: &str) -> Rc<str> {
        if let Some(existing) = self.strings.get(s) {
            return Rc::clone(existing);
        }
        let rc: Rc<str> = Rc::from(s);
        self.strings.insert(Box::from(s), Rc::clone(&rc));
        rc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_matches_spec() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Bool(true).is_truthy());
        assert!(Value::Number(0.0).is_truthy());
        assert!(Value::Str(Rc::from("")).is_truthy());
    }

    #[test]
    fn strings_compare_structurally() {
        let a = Value::Str(Rc::from("hi"));
        let b = Value::Str(Rc::from("hi"));
        assert!(a.values_equal(&b));
    }

    #[test]
    fn arrays_compare_by_identity() {
        let a: Array = Rc::new(RefCell::new(vec![Value::Number(1.0)]));
        let b: Array = Rc::new(RefCell::new(vec![Value::Number(1.0)]));
        assert!(!Value::Array(Rc::clone(&a)).values_equal(&Value::Array(Rc::clone(&b))));
        assert!(Value::Array(Rc::clone(&a)).values_equal(&Value::Array(Rc::clone(&a))));
    }

    #[test]
    fn interner_reuses_allocation_for_equal_strings() {
        let mut interner = Interner::new();
        let a = interner.intern("hello");
        let b = interner.intern("hello");
        assert!(Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn print_formats_integral_floats_without_a_trailing_zero() {
        assert_eq!(Value::Number(3.0).to_print_string(), "3");
        assert_eq!(Value::Number(3.5).to_print_string(), "3.5");
    }
}
