//! Runtime values for the reference executor
//!
//! One enum covers both levels the compiled code works with: the raw
//! operands of the instruction set (ints, longs, doubles, strings and null)
//! and the Ruby-level objects the runtime methods hand back.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use super::error::{RuntimeError, RuntimeErrorKind, RuntimeResult};
use crate::cache::ParsedBlockDescriptor;

/// A mutable Ruby string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RString {
    pub bytes: Vec<u8>,
    pub encoding: Rc<str>,
}

impl RString {
    pub fn new(bytes: impl Into<Vec<u8>>, encoding: impl Into<Rc<str>>) -> Self {
        Self {
            bytes: bytes.into(),
            encoding: encoding.into(),
        }
    }

    /// Contents decoded as UTF-8, replacing invalid sequences
    #[must_use]
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Immutable bytes shared by every string built from one literal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteList {
    pub bytes: Vec<u8>,
    pub encoding: Rc<str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Regexp {
    pub source: String,
    pub options: i32,
}

/// A plain object: a class name and its instance variables
#[derive(Debug)]
pub struct RObject {
    pub class: Rc<str>,
    pub ivars: RefCell<HashMap<String, Value>>,
}

impl RObject {
    #[must_use]
    pub fn new(class: impl Into<Rc<str>>) -> Self {
        Self {
            class: class.into(),
            ivars: RefCell::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.ivars.borrow().get(name).cloned()
    }

    pub fn set(&self, name: &str, value: Value) {
        self.ivars.borrow_mut().insert(name.to_string(), value);
    }
}

/// Heap storage for the variables of one frame
///
/// Slots grow on demand; a slot never written reads as nil.
#[derive(Debug, Default)]
pub struct DynamicScope {
    values: RefCell<Vec<Value>>,
    parent: Option<Rc<DynamicScope>>,
}

impl DynamicScope {
    #[must_use]
    pub fn new(parent: Option<Rc<DynamicScope>>) -> Self {
        Self {
            values: RefCell::new(Vec::new()),
            parent,
        }
    }

    #[must_use]
    pub fn parent(&self) -> Option<&Rc<DynamicScope>> {
        self.parent.as_ref()
    }

    /// The outermost scope of the chain: the scope of the method a block
    /// was created in
    #[must_use]
    pub fn method_scope(self: &Rc<Self>) -> Rc<DynamicScope> {
        let mut scope = Rc::clone(self);
        while let Some(parent) = scope.parent.clone() {
            scope = parent;
        }
        scope
    }

    fn at_depth(&self, depth: usize) -> RuntimeResult<&DynamicScope> {
        let mut scope = self;
        for _ in 0..depth {
            scope = scope.parent.as_deref().ok_or_else(|| {
                RuntimeError::new(RuntimeErrorKind::Internal(format!(
                    "no enclosing scope at depth {depth}"
                )))
            })?;
        }
        Ok(scope)
    }

    pub fn get_value_or_nil(&self, index: usize, depth: usize) -> RuntimeResult<Value> {
        let scope = self.at_depth(depth)?;
        let values = scope.values.borrow();
        Ok(match values.get(index) {
            Some(Value::Null) | None => Value::Nil,
            Some(value) => value.clone(),
        })
    }

    pub fn set_value(&self, index: usize, depth: usize, value: Value) -> RuntimeResult<()> {
        let scope = self.at_depth(depth)?;
        let mut values = scope.values.borrow_mut();
        if values.len() <= index {
            values.resize(index + 1, Value::Nil);
        }
        values[index] = value;
        Ok(())
    }
}

/// Block body materialized from a closure descriptor
pub type BlockBody = ParsedBlockDescriptor;

/// A block: a compiled closure bound to the self and scope that created it
pub struct Block {
    pub body: Rc<BlockBody>,
    pub self_value: Value,
    pub scope: Rc<DynamicScope>,
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("method", &self.body.method)
            .field("arity", &self.body.arity)
            .finish_non_exhaustive()
    }
}

/// A runtime value
#[derive(Debug, Clone, Default)]
pub enum Value {
    // ===== Operands =====
    /// Null reference
    #[default]
    Null,
    /// 32-bit integer; booleans are 0 or 1
    Int(i32),
    Long(i64),
    Double(f64),
    /// Constant string operand
    Text(Rc<str>),

    // ===== Ruby Objects =====
    Nil,
    Bool(bool),
    Fixnum(i64),
    Float(f64),
    Symbol(Rc<str>),
    Str(Rc<RefCell<RString>>),
    /// Base-16 digits of a big integer
    Bignum(Rc<str>),
    Regexp(Rc<Regexp>),
    Array(Rc<RefCell<Vec<Value>>>),
    Object(Rc<RObject>),
    Class(Rc<str>),
    /// The `Encoding` object of a named encoding
    RubyEncoding(Rc<str>),

    // ===== Runtime Objects =====
    /// A `Value[]` argument array
    Values(Rc<RefCell<Vec<Value>>>),
    ByteList(Rc<ByteList>),
    Encoding(Rc<str>),
    Scope(Rc<DynamicScope>),
    /// Variable names of a decoded static scope
    StaticScope(Rc<[String]>),
    Block(Rc<Block>),
    BlockBody(Rc<BlockBody>),
    /// Names the unit method a callback block invokes
    BlockCallback(Rc<str>),
    CallSite(usize),
    Method(Rc<str>),
    Context,
    Runtime,
    /// The compiled unit instance
    Unit,
    Throwable(Rc<RuntimeError>),
}

impl Value {
    /// A fresh string
    pub fn string(text: &str) -> Self {
        Value::Str(Rc::new(RefCell::new(RString::new(text.as_bytes(), "UTF-8"))))
    }

    /// A fresh Ruby array
    #[must_use]
    pub fn array(values: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(values)))
    }

    /// A fresh argument array
    #[must_use]
    pub fn values(values: Vec<Value>) -> Self {
        Value::Values(Rc::new(RefCell::new(values)))
    }

    pub fn symbol(name: &str) -> Self {
        Value::Symbol(Rc::from(name))
    }

    /// Name of this value's type, for error messages
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Double(_) => "double",
            Value::Text(_) => "java string",
            Value::Nil => "NilClass",
            Value::Bool(true) => "TrueClass",
            Value::Bool(false) => "FalseClass",
            Value::Fixnum(_) => "Integer",
            Value::Float(_) => "Float",
            Value::Symbol(_) => "Symbol",
            Value::Str(_) => "String",
            Value::Bignum(_) => "Integer",
            Value::Regexp(_) => "Regexp",
            Value::Array(_) => "Array",
            Value::Object(_) => "Object",
            Value::Class(_) => "Class",
            Value::RubyEncoding(_) => "Encoding",
            Value::Values(_) => "Value[]",
            Value::ByteList(_) => "ByteList",
            Value::Encoding(_) => "encoding",
            Value::Scope(_) => "DynamicScope",
            Value::StaticScope(_) => "StaticScope",
            Value::Block(_) => "Block",
            Value::BlockBody(_) => "BlockBody",
            Value::BlockCallback(_) => "BlockCallback",
            Value::CallSite(_) => "CallSite",
            Value::Method(_) => "DynamicMethod",
            Value::Context => "ThreadContext",
            Value::Runtime => "Runtime",
            Value::Unit => "script",
            Value::Throwable(_) => "Throwable",
        }
    }

    /// Ruby truthiness: everything except nil, false and null
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false) | Value::Null)
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn mismatch<T>(&self, expected: &'static str, operation: &'static str) -> RuntimeResult<T> {
        Err(RuntimeError::new(RuntimeErrorKind::TypeMismatch {
            expected,
            got: self.type_name(),
            operation,
        }))
    }

    /// An int operand, or a boolean
    pub fn as_int(&self, operation: &'static str) -> RuntimeResult<i32> {
        match self {
            Value::Int(n) => Ok(*n),
            Value::Bool(b) => Ok(i32::from(*b)),
            _ => self.mismatch("int", operation),
        }
    }

    /// An int operand used as an index or count
    pub fn as_index(&self, operation: &'static str) -> RuntimeResult<usize> {
        let n = self.as_int(operation)?;
        usize::try_from(n).or_else(|_| self.mismatch("non-negative int", operation))
    }

    pub fn as_long(&self, operation: &'static str) -> RuntimeResult<i64> {
        match self {
            Value::Long(n) => Ok(*n),
            Value::Int(n) => Ok(i64::from(*n)),
            _ => self.mismatch("long", operation),
        }
    }

    pub fn as_double(&self, operation: &'static str) -> RuntimeResult<f64> {
        match self {
            Value::Double(d) => Ok(*d),
            _ => self.mismatch("double", operation),
        }
    }

    pub fn as_text(&self, operation: &'static str) -> RuntimeResult<Rc<str>> {
        match self {
            Value::Text(s) => Ok(Rc::clone(s)),
            _ => self.mismatch("java string", operation),
        }
    }

    /// Elements of an argument array
    pub fn as_values(&self, operation: &'static str) -> RuntimeResult<Rc<RefCell<Vec<Value>>>> {
        match self {
            Value::Values(values) => Ok(Rc::clone(values)),
            _ => self.mismatch("Value[]", operation),
        }
    }

    pub fn as_scope(&self, operation: &'static str) -> RuntimeResult<Rc<DynamicScope>> {
        match self {
            Value::Scope(scope) => Ok(Rc::clone(scope)),
            _ => self.mismatch("DynamicScope", operation),
        }
    }

    /// A block argument; null means no block was passed
    pub fn as_block(&self, operation: &'static str) -> RuntimeResult<Option<Rc<Block>>> {
        match self {
            Value::Block(block) => Ok(Some(Rc::clone(block))),
            Value::Null => Ok(None),
            _ => self.mismatch("Block", operation),
        }
    }

    pub fn as_throwable(&self, operation: &'static str) -> RuntimeResult<Rc<RuntimeError>> {
        match self {
            Value::Throwable(err) => Ok(Rc::clone(err)),
            _ => self.mismatch("Throwable", operation),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null)
            | (Value::Nil, Value::Nil)
            | (Value::Context, Value::Context)
            | (Value::Runtime, Value::Runtime)
            | (Value::Unit, Value::Unit) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Fixnum(a), Value::Fixnum(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Fixnum(a), Value::Float(b)) | (Value::Float(b), Value::Fixnum(a)) => *a as f64 == *b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a.borrow().bytes == b.borrow().bytes,
            (Value::Bignum(a), Value::Bignum(b)) => a == b,
            (Value::Regexp(a), Value::Regexp(b)) => a == b,
            (Value::Array(a), Value::Array(b)) | (Value::Values(a), Value::Values(b)) => {
                Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow()
            }
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => a == b,
            (Value::RubyEncoding(a), Value::RubyEncoding(b)) | (Value::Encoding(a), Value::Encoding(b)) => a == b,
            (Value::ByteList(a), Value::ByteList(b)) => a == b,
            (Value::Scope(a), Value::Scope(b)) => Rc::ptr_eq(a, b),
            (Value::StaticScope(a), Value::StaticScope(b)) => a == b,
            (Value::Block(a), Value::Block(b)) => Rc::ptr_eq(a, b),
            (Value::BlockBody(a), Value::BlockBody(b)) => Rc::ptr_eq(a, b),
            (Value::BlockCallback(a), Value::BlockCallback(b)) | (Value::Method(a), Value::Method(b)) => a == b,
            (Value::CallSite(a), Value::CallSite(b)) => a == b,
            (Value::Throwable(a), Value::Throwable(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Long(n) | Value::Fixnum(n) => write!(f, "{n}"),
            Value::Double(d) | Value::Float(d) => {
                if d.fract() == 0.0 && d.is_finite() {
                    write!(f, "{d:.1}")
                } else {
                    write!(f, "{d}")
                }
            }
            Value::Text(s) => write!(f, "{s}"),
            Value::Nil => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Symbol(s) => write!(f, "{s}"),
            Value::Str(s) => write!(f, "{}", s.borrow().to_string_lossy()),
            Value::Bignum(hex) => write!(f, "0x{hex}"),
            Value::Regexp(r) => write!(f, "/{}/", r.source),
            Value::Array(items) | Value::Values(items) => {
                write!(f, "[")?;
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", Inspect(item))?;
                }
                write!(f, "]")
            }
            Value::Object(obj) => write!(f, "#<{}>", obj.class),
            Value::Class(name) => write!(f, "{name}"),
            Value::RubyEncoding(name) | Value::Encoding(name) => write!(f, "{name}"),
            Value::ByteList(list) => write!(f, "{}", String::from_utf8_lossy(&list.bytes)),
            Value::Block(block) => write!(f, "#<Proc {}>", block.body.method),
            Value::Throwable(err) => write!(f, "{}", err.kind),
            other => write!(f, "#<{}>", other.type_name()),
        }
    }
}

/// `inspect`-style formatting: strings quoted, symbols prefixed, nil spelled out
pub struct Inspect<'a>(pub &'a Value);

impl fmt::Display for Inspect<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Value::Nil => write!(f, "nil"),
            Value::Str(s) => write!(f, "{:?}", s.borrow().to_string_lossy()),
            Value::Symbol(s) => write!(f, ":{s}"),
            other => write!(f, "{other}"),
        }
    }
}
