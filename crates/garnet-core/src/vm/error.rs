//! Runtime errors for the reference executor
//!
//! Non-local control flow (`return` out of a block, `break`, `next`, `redo`)
//! travels as error kinds too, the same way the compiled code throws jump
//! objects and catches them in exception handlers.

use std::fmt;
use std::rc::Rc;

use super::value::{DynamicScope, Value};
use crate::cache::DescriptorError;
use crate::emit::class;

/// A runtime error raised while executing a compiled unit
#[derive(Debug, Clone)]
pub struct RuntimeError {
    /// The kind of error
    pub kind: RuntimeErrorKind,

    /// Methods the error unwound through, innermost first
    pub stack_trace: Vec<StackFrame>,
}

impl RuntimeError {
    /// Create a new runtime error
    pub fn new(kind: RuntimeErrorKind) -> Self {
        Self {
            kind,
            stack_trace: Vec::new(),
        }
    }

    /// Add a stack frame to the trace
    pub fn with_frame(mut self, frame: StackFrame) -> Self {
        self.stack_trace.push(frame);
        self
    }

    /// Returns true if an exception-table entry catching `exception` (None
    /// for catch-all) handles this error
    #[must_use]
    pub fn is_caught_by(&self, exception: Option<&str>) -> bool {
        if !self.kind.is_catchable() {
            return false;
        }
        match exception {
            None => true,
            Some(name) if name == class::THROWABLE => true,
            Some(name) if name == class::JUMP => self.kind.is_jump(),
            Some(name) if name == class::REDO_JUMP => matches!(self.kind, RuntimeErrorKind::RedoJump),
            Some(name) if name == class::RAISE_EXCEPTION => self.kind.is_raise(),
            Some(_) => false,
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "RuntimeError: {}", self.kind)?;
        if !self.stack_trace.is_empty() {
            writeln!(f, "Stack trace:")?;
            for frame in &self.stack_trace {
                writeln!(f, "  at {} ({}:{})", frame.function_name, frame.source, frame.line)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

impl From<RuntimeErrorKind> for RuntimeError {
    fn from(kind: RuntimeErrorKind) -> Self {
        Self::new(kind)
    }
}

impl From<DescriptorError> for RuntimeError {
    fn from(err: DescriptorError) -> Self {
        Self::new(RuntimeErrorKind::Descriptor(err))
    }
}

/// A stack frame in a stack trace
#[derive(Debug, Clone)]
pub struct StackFrame {
    /// The compiled method name
    pub function_name: String,

    /// The most recent source line seen in the method
    pub line: u32,

    /// The unit's source file
    pub source: String,
}

impl StackFrame {
    pub fn new(function_name: String, line: u32, source: String) -> Self {
        Self {
            function_name,
            line,
            source,
        }
    }
}

/// The kind of runtime error
#[derive(Debug, Clone)]
pub enum RuntimeErrorKind {
    // ===== Jumps =====
    /// `return` from inside a block or protected region, bound for the
    /// method frame that owns `target`
    ReturnJump { value: Value, target: Rc<DynamicScope> },

    /// `break` out of a block
    BreakJump(Value),

    /// `next` out of a protected region of a block
    NextJump(Value),

    /// `redo` out of a protected region of a block
    RedoJump,

    // ===== Ruby Exceptions =====
    /// `break`, `next` or `redo` with nothing to transfer to
    LocalJumpError {
        reason: &'static str,
        value: Value,
    },

    /// An exception raised by user code
    Raise(Value),

    /// Wrong number of arguments
    ArgumentError {
        given: usize,
        required: usize,
        max: Option<usize>,
    },

    /// No method with this name on the receiver
    NoMethodError {
        name: String,
        receiver: &'static str,
    },

    /// Uninitialized constant
    NameError(String),

    // ===== Internal =====
    /// Operand of the wrong type for an instruction or runtime method
    TypeMismatch {
        expected: &'static str,
        got: &'static str,
        operation: &'static str,
    },

    /// A call to a runtime method the executor does not provide
    UnknownMethod { owner: String, name: String },

    /// Stack underflow
    StackUnderflow,

    /// Call depth limit reached
    StackOverflow,

    /// The unit's init descriptor is malformed
    Descriptor(DescriptorError),

    /// Internal executor error
    Internal(String),
}

impl RuntimeErrorKind {
    /// Returns true for the control-flow jumps
    #[must_use]
    pub fn is_jump(&self) -> bool {
        matches!(
            self,
            RuntimeErrorKind::ReturnJump { .. }
                | RuntimeErrorKind::BreakJump(_)
                | RuntimeErrorKind::NextJump(_)
                | RuntimeErrorKind::RedoJump
        )
    }

    /// Returns true for errors visible to `rescue`
    #[must_use]
    pub fn is_raise(&self) -> bool {
        matches!(
            self,
            RuntimeErrorKind::LocalJumpError { .. }
                | RuntimeErrorKind::Raise(_)
                | RuntimeErrorKind::ArgumentError { .. }
                | RuntimeErrorKind::NoMethodError { .. }
                | RuntimeErrorKind::NameError(_)
        )
    }

    /// Returns true if compiled exception handlers may intercept this error.
    /// Executor faults always propagate.
    #[must_use]
    pub fn is_catchable(&self) -> bool {
        self.is_jump() || self.is_raise()
    }
}

impl fmt::Display for RuntimeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeErrorKind::ReturnJump { value, .. } => write!(f, "unexpected return ({value})"),
            RuntimeErrorKind::BreakJump(value) => write!(f, "unexpected break ({value})"),
            RuntimeErrorKind::NextJump(value) => write!(f, "unexpected next ({value})"),
            RuntimeErrorKind::RedoJump => write!(f, "unexpected redo"),
            RuntimeErrorKind::LocalJumpError { reason, .. } => {
                write!(f, "LocalJumpError: unexpected {reason}")
            }
            RuntimeErrorKind::Raise(value) => write!(f, "{value}"),
            RuntimeErrorKind::ArgumentError { given, required, max } => match max {
                Some(max) if max == required => {
                    write!(f, "ArgumentError: wrong number of arguments ({given} for {required})")
                }
                Some(max) => write!(
                    f,
                    "ArgumentError: wrong number of arguments ({given} for {required}..{max})"
                ),
                None => write!(
                    f,
                    "ArgumentError: wrong number of arguments ({given} for {required}+)"
                ),
            },
            RuntimeErrorKind::NoMethodError { name, receiver } => {
                write!(f, "NoMethodError: undefined method '{name}' for {receiver}")
            }
            RuntimeErrorKind::NameError(name) => {
                write!(f, "NameError: uninitialized constant {name}")
            }
            RuntimeErrorKind::TypeMismatch {
                expected,
                got,
                operation,
            } => write!(f, "type error: {operation} expected {expected}, got {got}"),
            RuntimeErrorKind::UnknownMethod { owner, name } => {
                write!(f, "no runtime method {owner}.{name}")
            }
            RuntimeErrorKind::StackUnderflow => write!(f, "stack underflow"),
            RuntimeErrorKind::StackOverflow => write!(f, "stack overflow"),
            RuntimeErrorKind::Descriptor(err) => write!(f, "bad init descriptor: {err}"),
            RuntimeErrorKind::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

/// Result type for execution
pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jumps_are_caught_by_jump_handlers_only() {
        let err = RuntimeError::new(RuntimeErrorKind::NextJump(Value::Nil));
        assert!(err.is_caught_by(Some(class::JUMP)));
        assert!(err.is_caught_by(None));
        assert!(!err.is_caught_by(Some(class::RAISE_EXCEPTION)));
        assert!(!err.is_caught_by(Some(class::REDO_JUMP)));

        let redo = RuntimeError::new(RuntimeErrorKind::RedoJump);
        assert!(redo.is_caught_by(Some(class::REDO_JUMP)));
    }

    #[test]
    fn executor_faults_are_never_caught() {
        let err = RuntimeError::new(RuntimeErrorKind::StackUnderflow);
        assert!(!err.is_caught_by(None));
        assert!(!err.is_caught_by(Some(class::THROWABLE)));
    }

    #[test]
    fn display_includes_trace() {
        let err = RuntimeError::new(RuntimeErrorKind::ArgumentError {
            given: 1,
            required: 2,
            max: Some(2),
        })
        .with_frame(StackFrame::new("method__0$RUBY$pair".to_string(), 3, "t.rb".to_string()));
        let text = err.to_string();
        assert!(text.contains("wrong number of arguments (1 for 2)"));
        assert!(text.contains("at method__0$RUBY$pair (t.rb:3)"));
    }
}
