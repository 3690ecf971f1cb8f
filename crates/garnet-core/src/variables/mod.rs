//! Variable compilers
//!
//! A variable compiler maps a lexical variable `(index, depth)` to storage and
//! owns the temp-local allocator of one method. Two strategies exist:
//!
//! - **Stack-based**: variable `i` lives in local slot `first_temp + i`.
//!   Fast, but invisible to closures and to runtime introspection, and unable
//!   to reach enclosing scopes.
//! - **Heap-based**: variables live in the `DynamicScope` the runtime pushed
//!   for this frame, reachable from nested closures through the scope's
//!   parent chain.
//!
//! `select_strategy` picks one from the body's static facts.

mod heap;
mod stack;

pub use heap::HeapBasedVariableCompiler;
pub use stack::StackBasedVariableCompiler;

use std::fmt;

use crate::emit::{Label, MethodEmitter};
use crate::error::{CompileError, CompileResult};
use crate::frame::FrameLayout;
use crate::scope::{Inspector, StaticScope};

/// Where a body keeps its local variables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableStrategy {
    StackBased,
    HeapBased,
}

impl VariableStrategy {
    /// Build a variable compiler of this strategy for one method
    #[must_use]
    pub fn compiler(self, layout: FrameLayout, variables: usize) -> Box<dyn VariableCompiler> {
        match self {
            VariableStrategy::StackBased => Box::new(StackBasedVariableCompiler::new(layout, variables)),
            VariableStrategy::HeapBased => Box::new(HeapBasedVariableCompiler::new(layout)),
        }
    }
}

impl fmt::Display for VariableStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableStrategy::StackBased => f.write_str("stack"),
            VariableStrategy::HeapBased => f.write_str("heap"),
        }
    }
}

/// Choose a strategy: heap-based whenever variables might escape the frame
/// (no analysis available, a nested closure, or scope-aware calls),
/// stack-based otherwise
#[must_use]
pub fn select_strategy(inspector: Option<&Inspector>) -> VariableStrategy {
    match inspector {
        Some(inspector) if !inspector.has_closure() && !inspector.has_scope_aware_methods() => {
            VariableStrategy::StackBased
        }
        _ => VariableStrategy::HeapBased,
    }
}

/// Storage operations for the variables and temps of one method
///
/// Assignment expects the value on top of the stack. With `expr` the value
/// is left there afterwards; otherwise it is consumed.
pub trait VariableCompiler: fmt::Debug {
    fn strategy(&self) -> VariableStrategy;

    /// Entry of a root method
    fn begin_method(&mut self, m: &mut MethodEmitter) -> CompileResult<()>;

    /// Entry of a closure body
    fn begin_closure(&mut self, m: &mut MethodEmitter) -> CompileResult<()>;

    /// Entry of a closure that declares no variables of its own
    fn begin_flat_closure(&mut self, m: &mut MethodEmitter) -> CompileResult<()>;

    /// Entry of a class body
    fn begin_class(&mut self, m: &mut MethodEmitter) -> CompileResult<()>;

    /// Entry of a chained segment continuing a predecessor's frame
    fn begin_chained(&mut self, m: &mut MethodEmitter) -> CompileResult<()>;

    fn assign_local(
        &mut self,
        m: &mut MethodEmitter,
        index: usize,
        depth: usize,
        expr: bool,
    ) -> CompileResult<()>;

    fn retrieve_local(&mut self, m: &mut MethodEmitter, index: usize, depth: usize) -> CompileResult<()>;

    /// Emit local-variable debug entries spanning `[start, end)`
    fn declare_locals(&mut self, m: &mut MethodEmitter, scope: &StaticScope, start: Label, end: Label);

    /// Allocate a scratch slot
    fn grab_temp_local(&mut self) -> u16;

    /// Free the most recently grabbed scratch slot
    fn release_temp_local(&mut self, slot: u16) -> CompileResult<()>;

    /// Highest slot count reached by temps
    fn temps_high_water(&self) -> u16;
}

/// LIFO allocator for scratch slots
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TempAllocator {
    base: u16,
    live: Vec<u16>,
    high_water: u16,
}

impl TempAllocator {
    pub(crate) fn new(base: u16) -> Self {
        Self {
            base,
            live: Vec::new(),
            high_water: base,
        }
    }

    pub(crate) fn grab(&mut self) -> u16 {
        let slot = self.base + self.live.len() as u16;
        self.live.push(slot);
        self.high_water = self.high_water.max(slot + 1);
        slot
    }

    pub(crate) fn release(&mut self, slot: u16) -> CompileResult<()> {
        match self.live.last() {
            Some(top) if *top == slot => {
                self.live.pop();
                Ok(())
            }
            Some(top) => Err(CompileError::internal(format!(
                "temp local {slot} released out of order (top is {top})"
            ))),
            None => Err(CompileError::internal(format!(
                "temp local {slot} released but none are live"
            ))),
        }
    }

    pub(crate) fn high_water(&self) -> u16 {
        self.high_water
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Fact;

    #[test]
    fn missing_inspector_selects_heap() {
        assert_eq!(select_strategy(None), VariableStrategy::HeapBased);
    }

    #[test]
    fn closure_selects_heap_regardless_of_other_facts() {
        let inspector = Inspector::new().with(Fact::Closure).with(Fact::FrameAware);
        assert_eq!(select_strategy(Some(&inspector)), VariableStrategy::HeapBased);
    }

    #[test]
    fn scope_aware_selects_heap() {
        let inspector = Inspector::new().with(Fact::ScopeAware);
        assert_eq!(select_strategy(Some(&inspector)), VariableStrategy::HeapBased);
    }

    #[test]
    fn plain_body_selects_stack() {
        let inspector = Inspector::new().with(Fact::FrameAware);
        assert_eq!(select_strategy(Some(&inspector)), VariableStrategy::StackBased);
    }

    #[test]
    fn temps_release_in_lifo_order() {
        let mut temps = TempAllocator::new(9);
        let a = temps.grab();
        let b = temps.grab();
        assert_eq!((a, b), (9, 10));
        assert!(matches!(temps.release(a), Err(CompileError::Internal(_))));
        temps.release(b).unwrap();
        temps.release(a).unwrap();
        assert_eq!(temps.grab(), 9);
        assert_eq!(temps.high_water(), 11);
    }
}
