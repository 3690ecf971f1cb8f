//! Closure descriptors
//!
//! A block body is materialized lazily by the runtime from a descriptor
//! string naming the compiled method, its arity, its static scope and the
//! source position.

use crate::scope::{Inspector, StaticScope};

/// Everything the runtime needs to build a block body for a compiled closure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDescriptor {
    /// Name of the compiled closure method in the unit
    pub method: String,
    /// Block arity (-1 for any number of arguments)
    pub arity: i32,
    /// The closure's lexical scope
    pub scope: StaticScope,
    pub file: String,
    pub line: u32,
    /// Block parameters destructure their argument
    pub multiple_args_head: bool,
    /// Static facts about the closure body
    pub inspector: Inspector,
}

/// A parsed descriptor as read back by the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedBlockDescriptor {
    pub method: String,
    pub arity: i32,
    pub scope_index: usize,
    pub variables: Vec<String>,
    pub line: u32,
    pub multiple_args_head: bool,
    pub facts: u16,
    pub file: String,
}

impl BlockDescriptor {
    /// Render the descriptor, embedding the cache index reserved for the
    /// closure's static scope
    #[must_use]
    pub fn encode(&self, scope_index: usize) -> String {
        format!(
            "{},{},{},{},{},{},{},{}",
            self.method,
            self.arity,
            scope_index,
            self.scope.encode(),
            self.line,
            u8::from(self.multiple_args_head),
            self.inspector.bits(),
            self.file
        )
    }

    /// Parse a descriptor produced by `encode`
    #[must_use]
    pub fn parse(descriptor: &str) -> Option<ParsedBlockDescriptor> {
        let mut fields = descriptor.splitn(8, ',');
        let method = fields.next()?.to_string();
        let arity = fields.next()?.parse().ok()?;
        let scope_index = fields.next()?.parse().ok()?;
        let variables = StaticScope::decode(fields.next()?)
            .variable_names()
            .to_vec();
        let line = fields.next()?.parse().ok()?;
        let multiple_args_head = fields.next()? == "1";
        let facts = fields.next()?.parse().ok()?;
        let file = fields.next()?.to_string();

        Some(ParsedBlockDescriptor {
            method,
            arity,
            scope_index,
            variables,
            line,
            multiple_args_head,
            facts,
            file,
        })
    }
}
