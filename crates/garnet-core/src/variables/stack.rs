//! Stack-slot variables

use super::{TempAllocator, VariableCompiler, VariableStrategy};
use crate::emit::{Label, MethodEmitter};
use crate::error::{CompileError, CompileResult};
use crate::frame::FrameLayout;
use crate::scope::StaticScope;

/// Variables in plain local slots after the frame slots; temps after them
#[derive(Debug, Clone)]
pub struct StackBasedVariableCompiler {
    layout: FrameLayout,
    variables: usize,
    temps: TempAllocator,
}

impl StackBasedVariableCompiler {
    #[must_use]
    pub fn new(layout: FrameLayout, variables: usize) -> Self {
        let first_free = layout.first_temp() + variables as u16;
        Self {
            layout,
            variables,
            temps: TempAllocator::new(first_free),
        }
    }

    fn slot(&self, index: usize) -> CompileResult<u16> {
        if index >= self.variables {
            return Err(CompileError::internal(format!(
                "variable {index} out of range ({} declared)",
                self.variables
            )));
        }
        Ok(self.layout.first_temp() + index as u16)
    }

    /// Pre-fill every variable slot with nil
    fn fill_nil(&self, m: &mut MethodEmitter) {
        for index in 0..self.variables {
            m.load(self.layout.nil());
            m.store(self.layout.first_temp() + index as u16);
        }
    }

    fn check_depth(depth: usize) -> CompileResult<()> {
        if depth > 0 {
            return Err(CompileError::not_compilable(format!(
                "stack-based variables cannot reach an enclosing scope (depth {depth})"
            )));
        }
        Ok(())
    }
}

impl VariableCompiler for StackBasedVariableCompiler {
    fn strategy(&self) -> VariableStrategy {
        VariableStrategy::StackBased
    }

    fn begin_method(&mut self, m: &mut MethodEmitter) -> CompileResult<()> {
        self.fill_nil(m);
        Ok(())
    }

    fn begin_closure(&mut self, m: &mut MethodEmitter) -> CompileResult<()> {
        self.fill_nil(m);
        Ok(())
    }

    fn begin_flat_closure(&mut self, _m: &mut MethodEmitter) -> CompileResult<()> {
        Err(CompileError::not_compilable(
            "flat closures require heap-based variables",
        ))
    }

    fn begin_class(&mut self, m: &mut MethodEmitter) -> CompileResult<()> {
        self.fill_nil(m);
        Ok(())
    }

    fn begin_chained(&mut self, _m: &mut MethodEmitter) -> CompileResult<()> {
        Err(CompileError::not_compilable(
            "chained segments require heap-based variables",
        ))
    }

    fn assign_local(
        &mut self,
        m: &mut MethodEmitter,
        index: usize,
        depth: usize,
        expr: bool,
    ) -> CompileResult<()> {
        Self::check_depth(depth)?;
        let slot = self.slot(index)?;
        if expr {
            m.dup();
        }
        m.store(slot);
        Ok(())
    }

    fn retrieve_local(&mut self, m: &mut MethodEmitter, index: usize, depth: usize) -> CompileResult<()> {
        Self::check_depth(depth)?;
        let slot = self.slot(index)?;
        m.load(slot);
        Ok(())
    }

    fn declare_locals(&mut self, m: &mut MethodEmitter, scope: &StaticScope, start: Label, end: Label) {
        for (index, name) in scope.variable_names().iter().enumerate().take(self.variables) {
            m.local_variable(name.clone(), self.layout.first_temp() + index as u16, start, end);
        }
    }

    fn grab_temp_local(&mut self) -> u16 {
        self.temps.grab()
    }

    fn release_temp_local(&mut self, slot: u16) -> CompileResult<()> {
        self.temps.release(slot)
    }

    fn temps_high_water(&self) -> u16 {
        self.temps.high_water()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::{sig, Insn, JType};

    fn method() -> MethodEmitter {
        MethodEmitter::new("m", FrameLayout::boxed().signature())
    }

    #[test]
    fn begin_method_fills_nil() {
        let mut vars = StackBasedVariableCompiler::new(FrameLayout::boxed(), 2);
        let mut m = method();
        vars.begin_method(&mut m).unwrap();
        assert_eq!(
            m.code(),
            &[Insn::Load(7), Insn::Store(9), Insn::Load(7), Insn::Store(10)]
        );
    }

    #[test]
    fn assign_and_retrieve_use_slots() {
        let mut vars = StackBasedVariableCompiler::new(FrameLayout::boxed(), 2);
        let mut m = method();
        m.push_null();
        vars.assign_local(&mut m, 1, 0, true).unwrap();
        vars.retrieve_local(&mut m, 0, 0).unwrap();
        assert_eq!(
            m.code(),
            &[Insn::PushNull, Insn::Dup, Insn::Store(10), Insn::Load(9)]
        );
    }

    #[test]
    fn flat_closure_fails_without_emitting() {
        let mut vars = StackBasedVariableCompiler::new(FrameLayout::closure(), 1);
        let mut m = MethodEmitter::new("block", sig(JType::VALUE, &[]));
        let err = vars.begin_flat_closure(&mut m).unwrap_err();
        assert!(err.is_not_compilable());
        assert!(m.is_empty());

        let again = vars.begin_flat_closure(&mut m).unwrap_err();
        assert_eq!(err, again);
        assert!(m.is_empty());
    }

    #[test]
    fn depth_is_not_compilable() {
        let mut vars = StackBasedVariableCompiler::new(FrameLayout::boxed(), 1);
        let mut m = method();
        assert!(vars.retrieve_local(&mut m, 0, 1).unwrap_err().is_not_compilable());
        assert!(m.is_empty());
    }

    #[test]
    fn temps_follow_variables() {
        let mut vars = StackBasedVariableCompiler::new(FrameLayout::boxed(), 3);
        assert_eq!(vars.grab_temp_local(), 12);
    }
}
