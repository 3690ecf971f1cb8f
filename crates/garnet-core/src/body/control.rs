//! Non-local control flow, loops and protected regions

use super::{BaseRole, BodyCompiler, LoopLabels};
use crate::emit::{class, sig, JType};
use crate::error::{CompileError, CompileResult};
use crate::frame::CONTEXT;
use crate::invocation::CompilerCallback;

const JUMP: JType = JType::Object(class::JUMP);
const THROWABLE: JType = JType::Object(class::THROWABLE);

impl BodyCompiler<'_> {
    // ===== Return / Break / Next / Redo =====

    /// Return the value on top of the stack from the enclosing method
    pub fn perform_return(&mut self) -> CompileResult<()> {
        match self.role.base() {
            BaseRole::Root { nested: false } if self.protection_depth == 0 => {
                self.method.areturn();
            }
            BaseRole::Root { .. } | BaseRole::Closure => self.throw_return_jump(),
            BaseRole::Class => {
                if self.rescue_depth > 0 {
                    self.method.load(CONTEXT);
                    self.method.invoke_static(
                        class::HELPERS,
                        "clearErrorInfo",
                        sig(JType::Void, &[JType::CONTEXT]),
                    );
                }
                self.throw_return_jump();
            }
        }
        Ok(())
    }

    fn throw_return_jump(&mut self) {
        self.method.load(CONTEXT);
        self.method.invoke_static(
            class::HELPERS,
            "returnJump",
            sig(JUMP, &[JType::VALUE, JType::CONTEXT]),
        );
        self.method.athrow();
        self.threw_return_jump = true;
    }

    /// Leave the innermost loop (or block) with the value on the stack
    pub fn issue_break(&mut self) -> CompileResult<()> {
        if let Some(target) = self.innermost_loop("break")? {
            self.method.goto(target.brk);
            return Ok(());
        }
        match self.role.base() {
            BaseRole::Closure => {
                self.method.load(CONTEXT);
                self.method.swap();
                self.method.invoke_static(
                    class::HELPERS,
                    "breakJump",
                    sig(JUMP, &[JType::CONTEXT, JType::VALUE]),
                );
            }
            BaseRole::Root { .. } | BaseRole::Class => {
                self.method.load(CONTEXT);
                self.method.invoke_static(
                    class::HELPERS,
                    "breakLocalJumpError",
                    sig(THROWABLE, &[JType::VALUE, JType::CONTEXT]),
                );
            }
        }
        self.method.athrow();
        Ok(())
    }

    /// Start the next iteration with the value on the stack as the block's
    /// result
    pub fn issue_next(&mut self) -> CompileResult<()> {
        if let Some(target) = self.innermost_loop("next")? {
            self.method.pop();
            self.method.goto(target.next);
            return Ok(());
        }
        match self.role.base() {
            BaseRole::Closure if self.protection_depth == 0 => self.method.areturn(),
            BaseRole::Closure => {
                self.method.invoke_static(class::HELPERS, "nextJump", sig(JUMP, &[JType::VALUE]));
                self.method.athrow();
                self.needs_next_handler = true;
            }
            BaseRole::Root { .. } | BaseRole::Class => {
                self.method.load(CONTEXT);
                self.method.invoke_static(
                    class::HELPERS,
                    "nextLocalJumpError",
                    sig(THROWABLE, &[JType::VALUE, JType::CONTEXT]),
                );
                self.method.athrow();
            }
        }
        Ok(())
    }

    /// Re-run the innermost loop body (or block body) without re-testing
    pub fn issue_redo(&mut self) -> CompileResult<()> {
        if let Some(target) = self.innermost_loop("redo")? {
            self.method.goto(target.redo);
            return Ok(());
        }
        match self.role.base() {
            BaseRole::Closure if self.protection_depth == 0 => self.method.goto(self.body_start),
            BaseRole::Closure => {
                self.method.invoke_static(class::HELPERS, "redoJump", sig(JUMP, &[]));
                self.method.athrow();
                self.needs_redo_handler = true;
            }
            BaseRole::Root { .. } | BaseRole::Class => {
                self.method.load(CONTEXT);
                self.method.invoke_static(
                    class::HELPERS,
                    "redoLocalJumpError",
                    sig(THROWABLE, &[JType::CONTEXT]),
                );
                self.method.athrow();
            }
        }
        Ok(())
    }

    /// Innermost loop, refusing transfers that would skip an ensure clause
    fn innermost_loop(&self, keyword: &str) -> CompileResult<Option<LoopLabels>> {
        match self.loops.last() {
            Some(labels) if self.protection_depth > labels.protection_depth => {
                Err(CompileError::not_compilable(format!(
                    "{keyword} out of an ensure region inside a loop"
                )))
            }
            Some(labels) => Ok(Some(*labels)),
            None => Ok(None),
        }
    }

    // ===== Loops and Branches =====

    /// `while`/`until` loop; leaves nil, or the value given to `break`.
    /// With `check_first` the condition is tested before the first run.
    pub fn perform_boolean_loop(
        &mut self,
        mut condition: CompilerCallback<'_>,
        mut body: CompilerCallback<'_>,
        check_first: bool,
    ) -> CompileResult<()> {
        let top = self.method.new_label();
        let test = self.method.new_label();
        let brk = self.method.new_label();

        if check_first {
            self.method.goto(test);
        }
        self.method.mark(top);
        self.loops.push(LoopLabels {
            next: test,
            redo: top,
            brk,
            protection_depth: self.protection_depth,
        });
        body.call(self)?;
        self.method.pop();
        self.loops.pop();

        self.method.mark(test);
        condition.call(self)?;
        self.is_true();
        self.method.if_true(top);
        self.load_nil();
        self.method.mark(brk);
        Ok(())
    }

    /// `if`/`unless`; leaves the value of the branch taken
    pub fn perform_boolean_branch(
        &mut self,
        mut condition: CompilerCallback<'_>,
        mut then_branch: CompilerCallback<'_>,
        mut else_branch: CompilerCallback<'_>,
    ) -> CompileResult<()> {
        let otherwise = self.method.new_label();
        let done = self.method.new_label();

        condition.call(self)?;
        self.is_true();
        self.method.if_false(otherwise);
        then_branch.call(self)?;
        self.method.goto(done);
        self.method.mark(otherwise);
        else_branch.call(self)?;
        self.method.mark(done);
        Ok(())
    }

    /// `a && b`; leaves `a` when it is falsy
    pub fn perform_logical_and(
        &mut self,
        left: CompilerCallback<'_>,
        right: CompilerCallback<'_>,
    ) -> CompileResult<()> {
        self.short_circuit(left, right, false)
    }

    /// `a || b`; leaves `a` when it is truthy
    pub fn perform_logical_or(
        &mut self,
        left: CompilerCallback<'_>,
        right: CompilerCallback<'_>,
    ) -> CompileResult<()> {
        self.short_circuit(left, right, true)
    }

    fn short_circuit(
        &mut self,
        mut left: CompilerCallback<'_>,
        mut right: CompilerCallback<'_>,
        keep_truthy: bool,
    ) -> CompileResult<()> {
        let done = self.method.new_label();
        left.call(self)?;
        self.method.dup();
        self.is_true();
        if keep_truthy {
            self.method.if_true(done);
        } else {
            self.method.if_false(done);
        }
        self.method.pop();
        right.call(self)?;
        self.method.mark(done);
        Ok(())
    }

    /// Convert the value on the stack to a branch condition
    pub fn is_true(&mut self) {
        self.method
            .invoke_interface(class::VALUE, "isTrue", sig(JType::Boolean, &[]));
    }

    // ===== Protected Regions =====

    /// `begin body ensure ensure_body end`; leaves the body's value.
    /// The ensure body runs on normal exit and on any throwable, which is
    /// then rethrown.
    pub fn perform_ensure(
        &mut self,
        mut body: CompilerCallback<'_>,
        mut ensure: CompilerCallback<'_>,
    ) -> CompileResult<()> {
        let done = self.method.new_label();

        let start = self.method.mark_new();
        self.protection_depth += 1;
        let result = body.call(self);
        self.protection_depth -= 1;
        result?;
        let end = self.method.mark_new();

        ensure.call(self)?;
        self.method.pop();
        self.method.goto(done);

        let handler = self.method.mark_new();
        let saved = self.grab_temp();
        self.store_temp(saved);
        ensure.call(self)?;
        self.method.pop();
        self.load_temp(saved);
        self.release_temp(saved)?;
        self.method.athrow();

        self.method.mark(done);
        self.method.try_catch(start, end, handler, None);
        Ok(())
    }

    /// `begin body rescue rescue_body end`; the rescue body sees the raised
    /// exception through `load_exception`
    pub fn perform_rescue(
        &mut self,
        mut body: CompilerCallback<'_>,
        mut rescue: CompilerCallback<'_>,
    ) -> CompileResult<()> {
        let done = self.method.new_label();

        let start = self.method.mark_new();
        body.call(self)?;
        let end = self.method.mark_new();
        self.method.goto(done);

        let handler = self.method.mark_new();
        self.method.store(self.layout.exception());
        self.rescue_depth += 1;
        let result = rescue.call(self);
        self.rescue_depth -= 1;
        result?;

        self.method.mark(done);
        self.method
            .try_catch(start, end, handler, Some(class::RAISE_EXCEPTION));
        Ok(())
    }

    /// Push the exception being rescued
    pub fn load_exception(&mut self) -> CompileResult<()> {
        if self.rescue_depth == 0 {
            return Err(CompileError::internal("exception loaded outside a rescue clause"));
        }
        self.method.load(self.layout.exception());
        self.method
            .invoke_virtual(class::RAISE_EXCEPTION, "getException", sig(JType::VALUE, &[]));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::body::BodyRole;
    use crate::emit::{class, Insn};
    use crate::invocation::CompilerCallback;
    use crate::scope::{Inspector, StaticScope};
    use crate::testutil::{compile_root, simple_scope};
    use crate::ScriptCompiler;

    fn nil() -> CompilerCallback<'static> {
        CompilerCallback::new(|body| {
            body.load_nil();
            Ok(())
        })
    }

    #[test]
    fn root_return_is_direct() {
        let unit = compile_root(simple_scope(0), |body| {
            body.load_nil();
            body.perform_return()?;
            body.load_nil();
            Ok(())
        })
        .unwrap();

        let root = unit.root().unwrap();
        assert_eq!(root.count_invocations("returnJump"), 0);
        assert!(root.try_catches.is_empty());
    }

    #[test]
    fn return_inside_ensure_throws_and_is_caught() {
        let unit = compile_root(simple_scope(0), |body| {
            body.perform_ensure(
                CompilerCallback::new(|body| {
                    body.load_nil();
                    body.perform_return()?;
                    body.load_nil();
                    Ok(())
                }),
                nil(),
            )
        })
        .unwrap();

        let root = unit.root().unwrap();
        assert_eq!(root.count_invocations("returnJump"), 1);
        assert_eq!(root.count_invocations("handleReturnJump"), 1);
        assert_eq!(root.try_catches.len(), 2);
        assert_eq!(root.try_catches[0].exception, None);
        assert_eq!(root.try_catches[1].exception, Some(class::JUMP));
    }

    #[test]
    fn break_outside_loop_in_root_raises() {
        let unit = compile_root(simple_scope(0), |body| {
            body.load_nil();
            body.issue_break()?;
            body.load_nil();
            Ok(())
        })
        .unwrap();

        assert_eq!(unit.root().unwrap().count_invocations("breakLocalJumpError"), 1);
    }

    #[test]
    fn break_in_loop_jumps_to_exit() {
        let unit = compile_root(simple_scope(0), |body| {
            body.perform_boolean_loop(
                CompilerCallback::new(|body| {
                    body.load_true();
                    Ok(())
                }),
                CompilerCallback::new(|body| {
                    body.load_nil();
                    body.issue_break()?;
                    body.load_nil();
                    Ok(())
                }),
                true,
            )
        })
        .unwrap();

        let root = unit.root().unwrap();
        assert_eq!(root.count_invocations("breakLocalJumpError"), 0);
        assert_eq!(root.count_invocations("isTrue"), 1);
    }

    #[test]
    fn next_out_of_ensure_inside_loop_is_rejected() {
        let err = compile_root(simple_scope(0), |body| {
            body.perform_boolean_loop(
                nil(),
                CompilerCallback::new(|body| {
                    body.perform_ensure(
                        CompilerCallback::new(|body| {
                            body.load_nil();
                            body.issue_next()?;
                            body.load_nil();
                            Ok(())
                        }),
                        nil(),
                    )
                }),
                false,
            )
        })
        .unwrap_err();
        assert!(err.is_not_compilable());
    }

    #[test]
    fn closure_jumps() {
        let mut script = ScriptCompiler::new("Unit", "t.rb", Default::default());
        let mut root = script
            .start_root("each_thing", simple_scope(0), None)
            .unwrap();
        root.create_new_closure(1, StaticScope::default(), 0, Some(Inspector::new()), |block| {
            assert_eq!(block.role(), BodyRole::Closure { flat: false });
            block.load_nil();
            block.issue_next()?;
            block.perform_ensure(
                CompilerCallback::new(|body| {
                    body.load_nil();
                    body.issue_next()?;
                    body.issue_redo()?;
                    body.load_nil();
                    Ok(())
                }),
                nil(),
            )?;
            block.issue_break()?;
            block.load_nil();
            Ok(())
        })
        .unwrap();
        root.end_body().unwrap();
        let unit = script.finish().unwrap();

        let block = unit
            .methods
            .iter()
            .find(|m| m.name.starts_with("block_0$RUBY$each_thing"))
            .unwrap();
        assert_eq!(block.count_invocations("nextJump"), 1);
        assert_eq!(block.count_invocations("redoJump"), 1);
        assert_eq!(block.count_invocations("breakJump"), 1);
        assert_eq!(block.count_invocations("handleNextJump"), 1);
        let handlers: Vec<_> = block.try_catches.iter().map(|tc| tc.exception).collect();
        assert_eq!(
            handlers,
            vec![None, Some(class::REDO_JUMP), Some(class::JUMP)]
        );
        assert!(block.code.contains(&Insn::Return));
    }

    #[test]
    fn rescue_in_class_body_clears_error_info() {
        let mut script = ScriptCompiler::new("Unit", "t.rb", Default::default());
        let mut root = script.start_root("main", simple_scope(0), None).unwrap();
        root.define_class("Widget", None, StaticScope::default(), None, |class_body| {
            class_body.perform_rescue(
                nil(),
                CompilerCallback::new(|body| {
                    body.load_exception()?;
                    body.perform_return()?;
                    body.load_nil();
                    Ok(())
                }),
            )
        })
        .unwrap();
        root.end_body().unwrap();
        let unit = script.finish().unwrap();

        let class_body = unit
            .methods
            .iter()
            .find(|m| m.name == "class_0$RUBY$Widget")
            .unwrap();
        assert_eq!(class_body.count_invocations("clearErrorInfo"), 1);
        assert_eq!(class_body.count_invocations("getException"), 1);
        assert_eq!(
            class_body.try_catches[0].exception,
            Some(class::RAISE_EXCEPTION)
        );
    }
}
