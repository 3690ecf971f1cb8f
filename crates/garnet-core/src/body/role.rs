//! Body roles
//!
//! Every body compiles into one method in one of four roles. A chained
//! segment continues the frame of its predecessor and behaves like the role
//! the chain started from.

use std::fmt;

use crate::unit::SegmentId;

/// The role a chain of segments started from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseRole {
    /// A method body; `nested` when it runs inside an enclosing compiled frame
    Root { nested: bool },
    Closure,
    Class,
}

impl fmt::Display for BaseRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaseRole::Root { nested: false } => f.write_str("root"),
            BaseRole::Root { nested: true } => f.write_str("nested root"),
            BaseRole::Closure => f.write_str("closure"),
            BaseRole::Class => f.write_str("class"),
        }
    }
}

/// What the body being compiled is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyRole {
    /// A method; `specific_arity` when its body takes individual arguments
    RootMethod {
        specific_arity: Option<u16>,
        nested: bool,
    },
    /// A block body; `flat` when it declares no variables of its own
    Closure { flat: bool },
    ClassBody,
    /// A continuation segment split off a body that grew too large
    Chained {
        base: BaseRole,
        predecessor: SegmentId,
    },
}

impl BodyRole {
    /// The role whose return and jump semantics apply
    #[must_use]
    pub fn base(&self) -> BaseRole {
        match *self {
            BodyRole::RootMethod { nested, .. } => BaseRole::Root { nested },
            BodyRole::Closure { .. } => BaseRole::Closure,
            BodyRole::ClassBody => BaseRole::Class,
            BodyRole::Chained { base, .. } => base,
        }
    }

    #[must_use]
    pub fn is_chained(&self) -> bool {
        matches!(self, BodyRole::Chained { .. })
    }
}

/// Labels of the innermost loop
#[derive(Debug, Clone, Copy)]
pub(crate) struct LoopLabels {
    /// `next` re-tests the condition
    pub next: crate::emit::Label,
    /// `redo` re-runs the body without testing
    pub redo: crate::emit::Label,
    /// `break` leaves its value here
    pub brk: crate::emit::Label,
    /// Protection depth when the loop was entered
    pub protection_depth: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chained_segments_keep_their_base() {
        let role = BodyRole::Chained {
            base: BaseRole::Closure,
            predecessor: SegmentId(0),
        };
        assert_eq!(role.base(), BaseRole::Closure);
        assert!(role.is_chained());

        let root = BodyRole::RootMethod {
            specific_arity: Some(2),
            nested: true,
        };
        assert_eq!(root.base(), BaseRole::Root { nested: true });
        assert_eq!(root.base().to_string(), "nested root");
    }
}
