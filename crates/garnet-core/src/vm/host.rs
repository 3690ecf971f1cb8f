//! Method dispatch for the reference executor
//!
//! Compiled code never resolves Ruby methods itself: every call site and
//! inline-cache call ends up in `Host::call`. `BasicHost` provides enough of
//! a core library to drive compiled units in tests and benchmarks.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::trace;

use super::error::{RuntimeError, RuntimeErrorKind, RuntimeResult};
use super::value::{Block, Inspect, RObject, Value};
use super::VM;
use crate::invocation::CallType;

/// One dynamic call as seen by the host
#[derive(Debug, Clone)]
pub struct HostCall {
    pub name: String,
    pub call_type: CallType,
    /// Self at the call site
    pub caller_self: Value,
    pub receiver: Value,
    pub args: Vec<Value>,
    pub block: Option<Rc<Block>>,
}

/// The method-resolution side of the runtime
pub trait Host: fmt::Debug {
    /// Dispatch a call
    fn call(&self, vm: &mut VM, call: HostCall) -> RuntimeResult<Value>;

    /// Look up a constant by (possibly `::`-qualified) name
    fn constant(&self, _name: &str) -> Option<Value> {
        None
    }

    /// `class Name < superclass`; returns the class object
    fn define_class(&self, name: &str, _superclass: &Value) -> RuntimeResult<Value> {
        Ok(Value::Class(Rc::from(name)))
    }
}

type Function = Box<dyn Fn(&[Value]) -> RuntimeResult<Value>>;

/// A small core library: integer and float arithmetic, arrays, attribute
/// objects, `puts`, and the unit's own methods called functionally
#[derive(Default)]
pub struct BasicHost {
    output: RefCell<Vec<String>>,
    calls: RefCell<HashMap<String, usize>>,
    constants: RefCell<HashMap<String, Value>>,
    functions: HashMap<String, Function>,
}

impl BasicHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a constant
    #[must_use]
    pub fn with_constant(self, name: &str, value: Value) -> Self {
        self.constants.borrow_mut().insert(name.to_string(), value);
        self
    }

    /// Define a functional method implemented in Rust
    #[must_use]
    pub fn with_function(
        mut self,
        name: &str,
        f: impl Fn(&[Value]) -> RuntimeResult<Value> + 'static,
    ) -> Self {
        self.functions.insert(name.to_string(), Box::new(f));
        self
    }

    /// Lines written by `puts` and `p`
    #[must_use]
    pub fn output(&self) -> Vec<String> {
        self.output.borrow().clone()
    }

    /// How many times a method named `name` was dispatched
    #[must_use]
    pub fn calls(&self, name: &str) -> usize {
        self.calls.borrow().get(name).copied().unwrap_or(0)
    }

    fn print(&self, line: String) {
        self.output.borrow_mut().push(line);
    }
}

impl fmt::Debug for BasicHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicHost")
            .field("output", &self.output.borrow().len())
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Host for BasicHost {
    fn call(&self, vm: &mut VM, call: HostCall) -> RuntimeResult<Value> {
        *self.calls.borrow_mut().entry(call.name.clone()).or_insert(0) += 1;
        trace!(target: "garnet::jit", name = %call.name, call_type = ?call.call_type, "host call");

        let implicit_self = matches!(call.call_type, CallType::Functional | CallType::Variable);
        if implicit_self {
            if let Some(f) = self.functions.get(&call.name) {
                return f(&call.args);
            }
            if vm.unit().entry_point(&call.name).is_some() {
                return vm.invoke(&call.name, call.receiver, call.args, call.block);
            }
        }

        match (call.name.as_str(), &call.receiver, call.args.as_slice()) {
            ("puts", _, args) if implicit_self => {
                if args.is_empty() {
                    self.print(String::new());
                }
                for arg in args {
                    match arg {
                        Value::Array(items) => {
                            for item in items.borrow().iter() {
                                self.print(item.to_string());
                            }
                        }
                        other => self.print(other.to_string()),
                    }
                }
                Ok(Value::Nil)
            }
            ("p", _, [arg]) if implicit_self => {
                self.print(Inspect(arg).to_string());
                Ok(arg.clone())
            }
            ("raise", _, [arg]) if implicit_self => {
                Err(RuntimeError::new(RuntimeErrorKind::Raise(arg.clone())))
            }
            ("block_given?", _, []) if implicit_self => Ok(Value::Bool(call.block.is_some())),

            (op, Value::Fixnum(a), [Value::Fixnum(b)]) if is_operator(op) => fixnum_op(op, *a, *b),
            (op, Value::Float(a), [Value::Float(b)]) if is_operator(op) => float_op(op, *a, *b),
            (op, Value::Fixnum(a), [Value::Float(b)]) if is_operator(op) => float_op(op, to_f64(*a), *b),
            (op, Value::Float(a), [Value::Fixnum(b)]) if is_operator(op) => float_op(op, *a, to_f64(*b)),
            ("==" | "===", a, [b]) => Ok(Value::Bool(a == b)),
            ("!=", a, [b]) => Ok(Value::Bool(a != b)),
            ("!", a, []) => Ok(Value::Bool(!a.is_truthy())),
            ("to_s", a, []) => Ok(Value::string(&a.to_string())),
            ("nil?", a, []) => Ok(Value::Bool(matches!(a, Value::Nil))),

            ("new", Value::Class(name), _) => Ok(Value::Object(Rc::new(RObject::new(Rc::clone(name))))),

            ("[]", Value::Array(items), [Value::Fixnum(index)]) => {
                let items = items.borrow();
                Ok(array_index(*index, items.len())
                    .and_then(|i| items.get(i).cloned())
                    .unwrap_or(Value::Nil))
            }
            ("[]=", Value::Array(items), [Value::Fixnum(index), value]) => {
                let mut items = items.borrow_mut();
                let len = items.len();
                let i = array_index(*index, len).ok_or_else(|| {
                    RuntimeError::new(RuntimeErrorKind::Raise(Value::string(&format!(
                        "IndexError: index {index} too small for array"
                    ))))
                })?;
                if i >= len {
                    items.resize(i + 1, Value::Nil);
                }
                items[i] = value.clone();
                Ok(value.clone())
            }
            ("<<" | "push", Value::Array(items), [value]) => {
                items.borrow_mut().push(value.clone());
                Ok(call.receiver.clone())
            }
            ("size" | "length", Value::Array(items), []) => Ok(Value::Fixnum(items.borrow().len() as i64)),
            ("size" | "length", Value::Str(s), []) => Ok(Value::Fixnum(s.borrow().bytes.len() as i64)),
            ("each", Value::Array(items), []) => {
                let block = require_block(&call)?;
                let snapshot = items.borrow().clone();
                for item in snapshot {
                    vm.yield_block(&block, vec![item])?;
                }
                Ok(call.receiver.clone())
            }
            ("map", Value::Array(items), []) => {
                let block = require_block(&call)?;
                let snapshot = items.borrow().clone();
                let mut mapped = Vec::with_capacity(snapshot.len());
                for item in snapshot {
                    mapped.push(vm.yield_block(&block, vec![item])?);
                }
                Ok(Value::array(mapped))
            }
            ("times", Value::Fixnum(n), []) => {
                let block = require_block(&call)?;
                for i in 0..*n {
                    vm.yield_block(&block, vec![Value::Fixnum(i)])?;
                }
                Ok(call.receiver.clone())
            }
            ("call" | "yield", Value::Block(block), args) => vm.yield_block(block, args.to_vec()),

            (name, Value::Object(obj), []) if is_identifier(name) => {
                Ok(obj.get(&format!("@{name}")).unwrap_or(Value::Nil))
            }
            (name, Value::Object(obj), [value]) if name.ends_with('=') && is_identifier(&name[..name.len() - 1]) => {
                obj.set(&format!("@{}", &name[..name.len() - 1]), value.clone());
                Ok(value.clone())
            }

            (name, receiver, _) => Err(RuntimeError::new(RuntimeErrorKind::NoMethodError {
                name: name.to_string(),
                receiver: receiver.type_name(),
            })),
        }
    }

    fn constant(&self, name: &str) -> Option<Value> {
        self.constants.borrow().get(name).cloned()
    }

    fn define_class(&self, name: &str, _superclass: &Value) -> RuntimeResult<Value> {
        let class = Value::Class(Rc::from(name));
        self.constants
            .borrow_mut()
            .entry(name.to_string())
            .or_insert_with(|| class.clone());
        Ok(class)
    }
}

fn require_block(call: &HostCall) -> RuntimeResult<Rc<Block>> {
    call.block.clone().ok_or_else(|| {
        RuntimeError::new(RuntimeErrorKind::LocalJumpError {
            reason: "yield",
            value: Value::Nil,
        })
    })
}

fn is_operator(name: &str) -> bool {
    matches!(
        name,
        "+" | "-" | "*" | "/" | "%" | "<" | ">" | "<=" | ">=" | "==" | "===" | "<=>"
    )
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Resolve a possibly negative Ruby index
fn array_index(index: i64, len: usize) -> Option<usize> {
    if index >= 0 {
        usize::try_from(index).ok()
    } else {
        let back = usize::try_from(index.unsigned_abs()).ok()?;
        len.checked_sub(back)
    }
}

fn zero_division() -> RuntimeError {
    RuntimeError::new(RuntimeErrorKind::Raise(Value::string("ZeroDivisionError: divided by 0")))
}

fn overflow(op: &str) -> RuntimeError {
    RuntimeError::new(RuntimeErrorKind::Raise(Value::string(&format!(
        "RangeError: integer overflow in {op}"
    ))))
}

fn fixnum_op(op: &str, a: i64, b: i64) -> RuntimeResult<Value> {
    let arithmetic = |result: Option<i64>| result.map(Value::Fixnum).ok_or_else(|| overflow(op));
    match op {
        "+" => arithmetic(a.checked_add(b)),
        "-" => arithmetic(a.checked_sub(b)),
        "*" => arithmetic(a.checked_mul(b)),
        "/" if b == 0 => Err(zero_division()),
        "/" => arithmetic(a.checked_div(b).map(|q| if a % b != 0 && (a < 0) != (b < 0) { q - 1 } else { q })),
        "%" if b == 0 => Err(zero_division()),
        "%" => arithmetic(a.checked_rem(b).map(|r| if r != 0 && (r < 0) != (b < 0) { r + b } else { r })),
        "<" => Ok(Value::Bool(a < b)),
        ">" => Ok(Value::Bool(a > b)),
        "<=" => Ok(Value::Bool(a <= b)),
        ">=" => Ok(Value::Bool(a >= b)),
        "==" | "===" => Ok(Value::Bool(a == b)),
        "<=>" => Ok(Value::Fixnum(a.cmp(&b) as i64)),
        _ => Err(overflow(op)),
    }
}

#[allow(clippy::cast_precision_loss)]
fn to_f64(n: i64) -> f64 {
    n as f64
}

fn float_op(op: &str, a: f64, b: f64) -> RuntimeResult<Value> {
    Ok(match op {
        "+" => Value::Float(a + b),
        "-" => Value::Float(a - b),
        "*" => Value::Float(a * b),
        "/" => Value::Float(a / b),
        "%" => Value::Float(a.rem_euclid(b)),
        "<" => Value::Bool(a < b),
        ">" => Value::Bool(a > b),
        "<=" => Value::Bool(a <= b),
        ">=" => Value::Bool(a >= b),
        "==" | "===" => Value::Bool(a == b),
        "<=>" => a.partial_cmp(&b).map_or(Value::Nil, |o| Value::Fixnum(o as i64)),
        _ => Value::Nil,
    })
}
