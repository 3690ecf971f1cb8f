//! Outlining: splitting an oversized body into chained segments
//!
//! The current segment ends by forwarding its whole frame (context, self,
//! arguments, block) to a new method and returning whatever that returns.
//! Variables survive the split because they live in the heap scope, which
//! the runtime keeps current across the forwarding call.

use tracing::debug;

use super::{BaseRole, BodyCompiler, BodyRole};
use crate::emit::{class, MethodEmitter};
use crate::error::{CompileError, CompileResult};
use crate::frame::{ArgsShape, FrameLayout, ARGS};
use crate::variables::VariableStrategy;

impl BodyCompiler<'_> {
    /// End the current segment and continue in `chained_<n>_<name>`
    pub fn outline(&mut self, name: &str) -> CompileResult<()> {
        if self.variables.strategy() != VariableStrategy::HeapBased {
            return Err(CompileError::not_compilable(format!(
                "cannot outline {}: stack-based variables do not survive a split",
                self.name
            )));
        }
        if !self.loops.is_empty() || self.protection_depth > 0 || self.rescue_depth > 0 {
            return Err(CompileError::not_compilable(format!(
                "cannot outline {} inside a loop or protected region",
                self.name
            )));
        }

        let base = self.role.base();
        let layout = match base {
            BaseRole::Closure => FrameLayout::closure(),
            BaseRole::Root { .. } | BaseRole::Class => FrameLayout::boxed(),
        };
        let chained = format!("chained_{}_{}", self.script.next_chain_index(), name);
        let signature = layout.signature();

        self.load_this();
        self.load_context();
        self.load_self();
        match self.layout.shape() {
            ArgsShape::Specific(arity) => {
                self.method.push_int(i32::from(arity));
                self.method.new_array(class::VALUE);
                for index in 0..arity {
                    self.method.dup();
                    self.method.push_int(i32::from(index));
                    self.method.load(ARGS + index);
                    self.method.array_store();
                }
            }
            ArgsShape::Boxed | ArgsShape::Yielded => self.method.load(ARGS),
        }
        self.load_block();
        self.method
            .invoke_virtual(self.script.class_name().to_string(), chained.clone(), signature.clone());
        self.method.areturn();

        self.seal()?;
        let finished = std::mem::replace(&mut self.method, MethodEmitter::new(chained.clone(), signature));
        self.script.add_method(finished.end()?)?;

        let predecessor = self.segment;
        self.segment = self.script.push_segment(&chained, base, Some(predecessor));
        self.role = BodyRole::Chained { base, predecessor };
        self.layout = layout;
        self.variables = VariableStrategy::HeapBased.compiler(layout, self.scope.number_of_variables());
        self.scope_start = self.method.new_label();
        self.body_start = self.method.new_label();
        self.threw_return_jump = false;
        self.needs_next_handler = false;
        self.needs_redo_handler = false;
        self.last_line = None;

        debug!(
            target: "garnet::jit::body",
            from = %self.script.segment_name(predecessor),
            to = %chained,
            %base,
            "outlined segment"
        );

        self.begin_frame()?;
        if self.current_line > 0 {
            let line = self.current_line;
            self.line_number(line);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::body::{BaseRole, BodyRole};
    use crate::scope::{Fact, Inspector};
    use crate::testutil::{compile_root_with, simple_scope};

    #[test]
    fn outline_forwards_the_frame() {
        let inspector = Inspector::new().with(Fact::ScopeAware);
        let unit = compile_root_with(simple_scope(2), Some(inspector), |body| {
            body.outline("work")?;
            assert!(matches!(
                body.role(),
                BodyRole::Chained {
                    base: BaseRole::Root { nested: false },
                    ..
                }
            ));
            body.retrieve_local_variable(1, 0)
        })
        .unwrap();

        let first = unit.root().unwrap();
        assert_eq!(first.count_invocations("chained_0_work"), 1);
        let chained = unit.methods_named("chained_0_work").next().unwrap();
        assert_eq!(chained.signature.param_count(), 4);
        assert_eq!(chained.count_invocations("getCurrentScope"), 1);

        let chain = unit.segment_chain(&first.name);
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[1].predecessor, Some(chain[0].id));
    }

    #[test]
    fn outline_requires_heap_variables() {
        let err = compile_root_with(simple_scope(0), Some(Inspector::new()), |body| {
            body.outline("work")?;
            body.load_nil();
            Ok(())
        })
        .unwrap_err();
        assert!(err.is_not_compilable());
    }
}
