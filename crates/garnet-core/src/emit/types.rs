//! Type descriptors and method signatures
//!
//! Runtime classes are referred to by their internal (slash-separated) names.
//! Every value occupies one stack slot and one local slot.

use std::fmt;

/// Internal names of the runtime classes emitted code refers to
pub mod class {
    /// Base class of every compiled unit; owns the runtime cache accessors
    pub const SCRIPT: &str = "garnet/runtime/AbstractScript";
    /// Static helper routines called from compiled code
    pub const HELPERS: &str = "garnet/runtime/Helpers";
    pub const VALUE: &str = "garnet/runtime/Value";
    pub const CONTEXT: &str = "garnet/runtime/ThreadContext";
    pub const RUNTIME: &str = "garnet/runtime/Runtime";
    pub const BLOCK: &str = "garnet/runtime/Block";
    pub const BLOCK_BODY: &str = "garnet/runtime/BlockBody";
    pub const BLOCK_CALLBACK: &str = "garnet/runtime/BlockCallback";
    pub const DYNAMIC_SCOPE: &str = "garnet/runtime/DynamicScope";
    pub const STATIC_SCOPE: &str = "garnet/runtime/StaticScope";
    pub const CALL_SITE: &str = "garnet/runtime/CallSite";
    pub const DYNAMIC_METHOD: &str = "garnet/runtime/DynamicMethod";
    pub const SYMBOL: &str = "garnet/runtime/Symbol";
    pub const FIXNUM: &str = "garnet/runtime/Fixnum";
    pub const FLOAT: &str = "garnet/runtime/Float";
    pub const BIGNUM: &str = "garnet/runtime/Bignum";
    pub const STRING: &str = "garnet/runtime/RString";
    pub const BYTE_LIST: &str = "garnet/runtime/ByteList";
    pub const REGEXP: &str = "garnet/runtime/Regexp";
    pub const ENCODING: &str = "garnet/runtime/Encoding";
    pub const RUBY_ENCODING: &str = "garnet/runtime/RubyEncoding";
    pub const JUMP: &str = "garnet/runtime/JumpException";
    pub const REDO_JUMP: &str = "garnet/runtime/RedoJump";
    pub const RAISE_EXCEPTION: &str = "garnet/runtime/RaiseException";
    pub const THROWABLE: &str = "java/lang/Throwable";
    pub const JAVA_STRING: &str = "java/lang/String";
    /// Bootstrap for dynamically-linked call sites
    pub const LINKER: &str = "garnet/runtime/InvocationLinker";
}

/// A value type in a method signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JType {
    Void,
    Int,
    Long,
    Double,
    Boolean,
    /// Reference to an instance of the named class
    Object(&'static str),
    /// Array of references to the named class
    Array(&'static str),
}

impl JType {
    /// Shorthand for a runtime value
    pub const VALUE: JType = JType::Object(class::VALUE);
    /// Shorthand for a boxed argument array
    pub const VALUE_ARRAY: JType = JType::Array(class::VALUE);
    pub const CONTEXT: JType = JType::Object(class::CONTEXT);
    pub const RUNTIME: JType = JType::Object(class::RUNTIME);
    pub const BLOCK: JType = JType::Object(class::BLOCK);
    pub const STRING: JType = JType::Object(class::JAVA_STRING);

    /// Field descriptor for this type
    #[must_use]
    pub fn descriptor(self) -> String {
        match self {
            JType::Void => "V".to_string(),
            JType::Int => "I".to_string(),
            JType::Long => "J".to_string(),
            JType::Double => "D".to_string(),
            JType::Boolean => "Z".to_string(),
            JType::Object(name) => format!("L{name};"),
            JType::Array(name) => format!("[L{name};"),
        }
    }
}

/// A method signature: parameter types and a return type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    pub params: Vec<JType>,
    pub ret: JType,
}

impl Signature {
    /// Create a signature
    pub fn new(ret: JType, params: impl Into<Vec<JType>>) -> Self {
        Self {
            params: params.into(),
            ret,
        }
    }

    /// Number of declared parameters (not counting the receiver)
    #[must_use]
    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    /// Returns true if a value is left on the stack after the call
    #[must_use]
    pub fn returns_value(&self) -> bool {
        self.ret != JType::Void
    }

    /// Method descriptor, e.g. `(LThreadContext;I)LValue;`
    #[must_use]
    pub fn descriptor(&self) -> String {
        let mut out = String::from("(");
        for param in &self.params {
            out.push_str(&param.descriptor());
        }
        out.push(')');
        out.push_str(&self.ret.descriptor());
        out
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.descriptor())
    }
}

/// Build a signature from a return type and a parameter list
pub fn sig(ret: JType, params: &[JType]) -> Signature {
    Signature::new(ret, params.to_vec())
}
