//! Heap-frame variables

use super::{TempAllocator, VariableCompiler, VariableStrategy};
use crate::emit::{class, sig, JType, Label, MethodEmitter};
use crate::error::CompileResult;
use crate::frame::{FrameLayout, CONTEXT};
use crate::scope::StaticScope;

const DYNAMIC_SCOPE: JType = JType::Object(class::DYNAMIC_SCOPE);

/// Variables in the frame's `DynamicScope`; depth walks its parent chain
#[derive(Debug, Clone)]
pub struct HeapBasedVariableCompiler {
    layout: FrameLayout,
    temps: TempAllocator,
}

impl HeapBasedVariableCompiler {
    #[must_use]
    pub fn new(layout: FrameLayout) -> Self {
        Self {
            layout,
            temps: TempAllocator::new(layout.first_temp()),
        }
    }

    /// Cache the scope the runtime pushed for this frame in its slot
    fn load_current_scope(&self, m: &mut MethodEmitter) {
        m.load(CONTEXT);
        m.invoke_virtual(class::CONTEXT, "getCurrentScope", sig(DYNAMIC_SCOPE, &[]));
        m.store(self.layout.dynamic_scope());
    }
}

impl VariableCompiler for HeapBasedVariableCompiler {
    fn strategy(&self) -> VariableStrategy {
        VariableStrategy::HeapBased
    }

    fn begin_method(&mut self, m: &mut MethodEmitter) -> CompileResult<()> {
        self.load_current_scope(m);
        Ok(())
    }

    fn begin_closure(&mut self, m: &mut MethodEmitter) -> CompileResult<()> {
        // the runtime pushed a scope whose parent is the captured one
        self.load_current_scope(m);
        Ok(())
    }

    fn begin_flat_closure(&mut self, m: &mut MethodEmitter) -> CompileResult<()> {
        self.load_current_scope(m);
        Ok(())
    }

    fn begin_class(&mut self, m: &mut MethodEmitter) -> CompileResult<()> {
        self.load_current_scope(m);
        Ok(())
    }

    fn begin_chained(&mut self, m: &mut MethodEmitter) -> CompileResult<()> {
        self.load_current_scope(m);
        Ok(())
    }

    fn assign_local(
        &mut self,
        m: &mut MethodEmitter,
        index: usize,
        depth: usize,
        expr: bool,
    ) -> CompileResult<()> {
        m.load(self.layout.dynamic_scope());
        m.swap();
        m.push_index(index);
        if depth == 0 {
            m.invoke_virtual(
                class::DYNAMIC_SCOPE,
                "setValueDepthZero",
                sig(JType::VALUE, &[JType::VALUE, JType::Int]),
            );
        } else {
            m.push_index(depth);
            m.invoke_virtual(
                class::DYNAMIC_SCOPE,
                "setValue",
                sig(JType::VALUE, &[JType::VALUE, JType::Int, JType::Int]),
            );
        }
        if !expr {
            m.pop();
        }
        Ok(())
    }

    fn retrieve_local(&mut self, m: &mut MethodEmitter, index: usize, depth: usize) -> CompileResult<()> {
        m.load(self.layout.dynamic_scope());
        m.push_index(index);
        if depth == 0 {
            m.load(self.layout.nil());
            m.invoke_virtual(
                class::DYNAMIC_SCOPE,
                "getValueDepthZeroOrNil",
                sig(JType::VALUE, &[JType::Int, JType::VALUE]),
            );
        } else {
            m.push_index(depth);
            m.load(self.layout.nil());
            m.invoke_virtual(
                class::DYNAMIC_SCOPE,
                "getValueOrNil",
                sig(JType::VALUE, &[JType::Int, JType::Int, JType::VALUE]),
            );
        }
        Ok(())
    }

    fn declare_locals(&mut self, m: &mut MethodEmitter, _scope: &StaticScope, start: Label, end: Label) {
        m.local_variable("$scope", self.layout.dynamic_scope(), start, end);
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
    use crate::emit::Insn;

    fn method() -> MethodEmitter {
        MethodEmitter::new("m", FrameLayout::boxed().signature())
    }

    #[test]
    fn begin_caches_current_scope() {
        let mut vars = HeapBasedVariableCompiler::new(FrameLayout::boxed());
        let mut m = method();
        vars.begin_flat_closure(&mut m).unwrap();
        assert_eq!(m.code().first(), Some(&Insn::Load(CONTEXT)));
        assert_eq!(m.code().last(), Some(&Insn::Store(5)));
    }

    #[test]
    fn depth_selects_accessor() {
        let mut vars = HeapBasedVariableCompiler::new(FrameLayout::boxed());
        let mut m = method();
        vars.retrieve_local(&mut m, 1, 0).unwrap();
        vars.retrieve_local(&mut m, 1, 2).unwrap();
        m.swap();
        vars.assign_local(&mut m, 0, 1, false).unwrap();
        m.areturn();

        let code = m.end().unwrap();
        assert_eq!(
            code.invoked_names(),
            vec!["getValueDepthZeroOrNil", "getValueOrNil", "setValue"]
        );
    }

    #[test]
    fn temps_start_at_first_free_slot() {
        let mut vars = HeapBasedVariableCompiler::new(FrameLayout::specific(2));
        assert_eq!(vars.grab_temp_local(), FrameLayout::specific(2).first_temp());
    }
}
