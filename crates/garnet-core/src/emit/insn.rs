//! Instruction set emitted into method bodies

use super::types::{JType, Signature};

/// A branch target inside one method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub(crate) u32);

impl Label {
    /// Numeric id of this label within its method
    #[must_use]
    pub fn id(self) -> u32 {
        self.0
    }
}

/// A constant pushed by `Ldc`
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Str(String),
    Long(i64),
    Double(f64),
}

/// Dispatch flavour of an `Invoke`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvokeKind {
    /// Instance method on a class; the receiver is popped before the arguments
    Virtual,
    /// Instance method on an interface
    Interface,
    /// Static method; no receiver
    Static,
}

/// One instruction
///
/// This is a stack-based instruction set. Most operations pop operands from
/// the stack and push results back onto it.
#[derive(Debug, Clone, PartialEq)]
pub enum Insn {
    // ===== Locals =====
    /// Push the value in a local slot
    Load(u16),
    /// Pop the top of stack into a local slot
    Store(u16),

    // ===== Constants =====
    /// Push a null reference
    PushNull,
    /// Push a 32-bit integer
    PushInt(i32),
    /// Push a string, long or double constant
    Ldc(Constant),

    // ===== Stack Shuffling =====
    Dup,
    Swap,
    Pop,

    // ===== Arrays =====
    /// Pop a length, push a new array of `elem`
    NewArray(JType),
    /// Pop array and index, push the element
    ArrayLoad,
    /// Pop array, index and value
    ArrayStore,

    // ===== Calls =====
    Invoke {
        kind: InvokeKind,
        owner: String,
        name: String,
        sig: Signature,
    },
    /// Dynamically-linked call bound at first execution by `bootstrap`
    InvokeDynamic {
        name: String,
        sig: Signature,
        bootstrap: &'static str,
        file: String,
        line: u32,
    },

    // ===== Control Flow =====
    /// Bind a label at this position
    Label(Label),
    Goto(Label),
    /// Pop an int, branch if non-zero
    IfTrue(Label),
    /// Pop an int, branch if zero
    IfFalse(Label),
    IfNull(Label),
    IfNonNull(Label),
    /// Pop a value and return it
    Return,
    /// Return from a void method
    ReturnVoid,
    /// Pop a throwable and raise it
    Throw,

    // ===== Debug Info =====
    /// Source line for the instructions that follow
    Line(u32),
}

impl Insn {
    /// Number of values popped and pushed by this instruction
    #[must_use]
    pub fn stack_effect(&self) -> (usize, usize) {
        match self {
            Insn::Load(_) | Insn::PushNull | Insn::PushInt(_) | Insn::Ldc(_) => (0, 1),
            Insn::Store(_) | Insn::Pop => (1, 0),
            Insn::Dup => (1, 2),
            Insn::Swap => (2, 2),
            Insn::NewArray(_) => (1, 1),
            Insn::ArrayLoad => (2, 1),
            Insn::ArrayStore => (3, 0),
            Insn::Invoke { kind, sig, .. } => {
                let receiver = usize::from(*kind != InvokeKind::Static);
                (
                    sig.param_count() + receiver,
                    usize::from(sig.returns_value()),
                )
            }
            Insn::InvokeDynamic { sig, .. } => {
                (sig.param_count(), usize::from(sig.returns_value()))
            }
            Insn::Label(_) | Insn::Goto(_) | Insn::Line(_) | Insn::ReturnVoid => (0, 0),
            Insn::IfTrue(_) | Insn::IfFalse(_) | Insn::IfNull(_) | Insn::IfNonNull(_) => (1, 0),
            Insn::Return | Insn::Throw => (1, 0),
        }
    }

    /// Estimated encoded size in bytes
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        match self {
            Insn::Load(slot) | Insn::Store(slot) => {
                if *slot < 4 {
                    1
                } else if *slot < 256 {
                    2
                } else {
                    4
                }
            }
            Insn::PushInt(value) => match *value {
                -1..=5 => 1,
                -128..=127 => 2,
                _ => 3,
            },
            Insn::Ldc(_) => 3,
            Insn::PushNull
            | Insn::Dup
            | Insn::Swap
            | Insn::Pop
            | Insn::ArrayLoad
            | Insn::ArrayStore
            | Insn::Return
            | Insn::ReturnVoid
            | Insn::Throw => 1,
            Insn::NewArray(_) => 3,
            Insn::Invoke { kind, .. } => {
                if *kind == InvokeKind::Interface {
                    5
                } else {
                    3
                }
            }
            Insn::InvokeDynamic { .. } => 5,
            Insn::Goto(_)
            | Insn::IfTrue(_)
            | Insn::IfFalse(_)
            | Insn::IfNull(_)
            | Insn::IfNonNull(_) => 3,
            Insn::Label(_) | Insn::Line(_) => 0,
        }
    }

    /// Branch target, if this instruction may jump
    #[must_use]
    pub fn branch_target(&self) -> Option<Label> {
        match self {
            Insn::Goto(l) | Insn::IfTrue(l) | Insn::IfFalse(l) | Insn::IfNull(l) | Insn::IfNonNull(l) => {
                Some(*l)
            }
            _ => None,
        }
    }

    /// Returns true if control never falls through to the next instruction
    #[must_use]
    pub fn ends_block(&self) -> bool {
        matches!(
            self,
            Insn::Goto(_) | Insn::Return | Insn::ReturnVoid | Insn::Throw
        )
    }
}
