//! Local slot layout of compiled methods
//!
//! Every compiled body shares the same leading parameters:
//!
//! ```text
//! slot 0        this (the compiled unit)
//! slot 1        ThreadContext
//! slot 2        self
//! slot 3..      arguments: a boxed Value[], N specific values, or the single
//!               yielded value of a closure
//! args + 0      Block
//! args + 1      DynamicScope (heap-based variables)
//! args + 2      Runtime
//! args + 3      nil
//! args + 4      caught exception
//! args + 5..    variables (stack-based) and temps
//! ```

use crate::emit::{sig, JType, Signature};

/// Slot of the compiled unit
pub const THIS: u16 = 0;
/// Slot of the thread context
pub const CONTEXT: u16 = 1;
/// Slot of self
pub const SELF: u16 = 2;
/// First argument slot
pub const ARGS: u16 = 3;

const BLOCK_OFFSET: u16 = 0;
const DYNAMIC_SCOPE_OFFSET: u16 = 1;
const RUNTIME_OFFSET: u16 = 2;
const NIL_OFFSET: u16 = 3;
const EXCEPTION_OFFSET: u16 = 4;
const FIRST_TEMP_OFFSET: u16 = 5;

/// How a body receives its positional arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgsShape {
    /// One `Value[]` holding every argument
    Boxed,
    /// N individual `Value` parameters (N <= 3)
    Specific(u16),
    /// The single value a block was yielded
    Yielded,
}

/// Slot assignments for one body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameLayout {
    shape: ArgsShape,
}

impl FrameLayout {
    /// Layout of a method taking a boxed argument array
    #[must_use]
    pub fn boxed() -> Self {
        Self {
            shape: ArgsShape::Boxed,
        }
    }

    /// Layout of a method taking `arity` individual arguments
    #[must_use]
    pub fn specific(arity: u16) -> Self {
        Self {
            shape: ArgsShape::Specific(arity),
        }
    }

    /// Layout of a closure body
    #[must_use]
    pub fn closure() -> Self {
        Self {
            shape: ArgsShape::Yielded,
        }
    }

    #[must_use]
    pub fn shape(&self) -> ArgsShape {
        self.shape
    }

    /// Number of argument parameters between self and the block
    #[must_use]
    pub fn arg_param_count(&self) -> u16 {
        match self.shape {
            ArgsShape::Boxed | ArgsShape::Yielded => 1,
            ArgsShape::Specific(n) => n,
        }
    }

    #[must_use]
    pub fn block(&self) -> u16 {
        ARGS + self.arg_param_count() + BLOCK_OFFSET
    }

    #[must_use]
    pub fn dynamic_scope(&self) -> u16 {
        ARGS + self.arg_param_count() + DYNAMIC_SCOPE_OFFSET
    }

    #[must_use]
    pub fn runtime(&self) -> u16 {
        ARGS + self.arg_param_count() + RUNTIME_OFFSET
    }

    #[must_use]
    pub fn nil(&self) -> u16 {
        ARGS + self.arg_param_count() + NIL_OFFSET
    }

    #[must_use]
    pub fn exception(&self) -> u16 {
        ARGS + self.arg_param_count() + EXCEPTION_OFFSET
    }

    /// First slot free for variables and temps
    #[must_use]
    pub fn first_temp(&self) -> u16 {
        ARGS + self.arg_param_count() + FIRST_TEMP_OFFSET
    }

    /// Method signature for this layout:
    /// `(ThreadContext, self, args..., Block) -> Value`
    #[must_use]
    pub fn signature(&self) -> Signature {
        let mut params = vec![JType::CONTEXT, JType::VALUE];
        match self.shape {
            ArgsShape::Boxed => params.push(JType::VALUE_ARRAY),
            ArgsShape::Specific(n) => params.extend((0..n).map(|_| JType::VALUE)),
            ArgsShape::Yielded => params.push(JType::VALUE),
        }
        params.push(JType::BLOCK);
        sig(JType::VALUE, &params)
    }
}
