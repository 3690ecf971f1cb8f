//! Closures and class bodies
//!
//! Both compile into their own method of the unit while the enclosing body
//! is still open; the enclosing body then emits the code that materializes
//! the block or runs the class body.

use tracing::debug;

use super::{BodyCompiler, BodyRole, BodySetup};
use crate::cache::BlockDescriptor;
use crate::emit::{class, sig, JType};
use crate::error::CompileResult;
use crate::frame::FrameLayout;
use crate::invocation::CompilerCallback;
use crate::scope::{Fact, Inspector, StaticScope};

impl BodyCompiler<'_> {
    /// Compile a block body and push a `Block` capturing the current frame
    pub fn create_new_closure(
        &mut self,
        line: u32,
        scope: StaticScope,
        arity: i32,
        inspector: Option<Inspector>,
        body: impl FnOnce(&mut BodyCompiler<'_>) -> CompileResult<()>,
    ) -> CompileResult<()> {
        self.closure(line, scope, arity, inspector, false, body)
    }

    /// Like `create_new_closure` for a block that declares no variables;
    /// its frame shares the enclosing scope
    pub fn create_new_flat_closure(
        &mut self,
        line: u32,
        scope: StaticScope,
        arity: i32,
        inspector: Option<Inspector>,
        body: impl FnOnce(&mut BodyCompiler<'_>) -> CompileResult<()>,
    ) -> CompileResult<()> {
        self.closure(line, scope, arity, inspector, true, body)
    }

    fn closure(
        &mut self,
        line: u32,
        scope: StaticScope,
        arity: i32,
        inspector: Option<Inspector>,
        flat: bool,
        body: impl FnOnce(&mut BodyCompiler<'_>) -> CompileResult<()>,
    ) -> CompileResult<()> {
        let name = format!("block_{}$RUBY${}", self.script.closure_index(), self.base_name);
        let descriptor = BlockDescriptor {
            method: name.clone(),
            arity,
            scope: scope.clone(),
            file: self.script.source_file().to_string(),
            line,
            multiple_args_head: inspector.is_some_and(|i| i.has(Fact::MultipleArgsHead)),
            inspector: inspector.unwrap_or_default(),
        };

        {
            let mut child = BodyCompiler::begin(
                &mut *self.script,
                BodySetup {
                    name: name.clone(),
                    base_name: self.base_name.clone(),
                    role: BodyRole::Closure { flat },
                    layout: FrameLayout::closure(),
                    scope,
                    inspector,
                },
            )?;
            child.script.claim_closure_index();
            child.line_number(line);
            body(&mut child)?;
            child.end_body()?;
        }

        debug!(target: "garnet::jit::body", block = %name, flat, "closure compiled");

        self.load_context();
        self.load_self();
        self.script.cache.cache_closure(&mut self.method, &descriptor);
        self.method.invoke_static(
            class::HELPERS,
            "createBlock",
            sig(
                JType::BLOCK,
                &[JType::CONTEXT, JType::VALUE, JType::Object(class::BLOCK_BODY)],
            ),
        );
        Ok(())
    }

    /// `class Name < superclass; body; end`; leaves the class body's value
    pub fn define_class(
        &mut self,
        name: &str,
        superclass: Option<CompilerCallback<'_>>,
        scope: StaticScope,
        inspector: Option<Inspector>,
        body: impl FnOnce(&mut BodyCompiler<'_>) -> CompileResult<()>,
    ) -> CompileResult<()> {
        let method_name = format!("class_{}$RUBY${}", self.script.class_index(), name);

        {
            let mut child = BodyCompiler::begin(
                &mut *self.script,
                BodySetup {
                    name: method_name.clone(),
                    base_name: name.to_string(),
                    role: BodyRole::ClassBody,
                    layout: FrameLayout::boxed(),
                    scope,
                    inspector,
                },
            )?;
            child.script.claim_class_index();
            child.line_number(self.current_line);
            body(&mut child)?;
            child.end_body()?;
        }

        self.load_context();
        self.load_self();
        self.method.ldc_str(name);
        match superclass {
            Some(mut superclass) => superclass.call(self)?,
            None => self.load_nil(),
        }
        self.method.invoke_static(
            class::HELPERS,
            "defineClass",
            sig(
                JType::VALUE,
                &[JType::CONTEXT, JType::VALUE, JType::STRING, JType::VALUE],
            ),
        );

        self.load_this();
        self.method.swap();
        self.load_context();
        self.method.ldc_str(method_name);
        self.method.invoke_static(
            class::HELPERS,
            "invokeClassBody",
            sig(
                JType::VALUE,
                &[
                    JType::Object(class::SCRIPT),
                    JType::VALUE,
                    JType::CONTEXT,
                    JType::STRING,
                ],
            ),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::emit::{Constant, Insn};
    use crate::scope::{Fact, Inspector, StaticScope};
    use crate::testutil::simple_scope;
    use crate::ScriptCompiler;

    #[test]
    fn closure_is_named_after_its_method_and_cached() {
        let mut script = ScriptCompiler::new("Unit", "each.rb", Default::default());
        let mut root = script
            .start_root("each_pair", simple_scope(0), Some(Inspector::new().with(Fact::Closure)))
            .unwrap();
        let scope = StaticScope::new(["k", "v"]).with_required(2);
        root.create_new_closure(4, scope, 2, Some(Inspector::new()), |block| {
            block.retrieve_local_variable(1, 0)
        })
        .unwrap();
        root.end_body().unwrap();
        let unit = script.finish().unwrap();

        let block = unit.methods.iter().find(|m| m.name == "block_0$RUBY$each_pair").unwrap();
        assert_eq!(block.count_invocations("blockArgs"), 1);
        assert!(block.code.contains(&Insn::Line(4)));

        let root = unit.root().unwrap();
        assert_eq!(root.count_invocations("createBlock"), 1);
        let descriptor = root
            .code
            .iter()
            .find_map(|insn| match insn {
                Insn::Ldc(Constant::Str(s)) if s.starts_with("block_0") => Some(s.clone()),
                _ => None,
            })
            .unwrap();
        assert!(descriptor.starts_with("block_0$RUBY$each_pair,2,"));
        assert!(descriptor.contains("k;v"));
    }

    #[test]
    fn single_argument_closure_uses_null_to_nil() {
        let mut script = ScriptCompiler::new("Unit", "t.rb", Default::default());
        let mut root = script.start_root("m", simple_scope(0), None).unwrap();
        let scope = StaticScope::new(["x"]).with_required(1);
        root.create_new_closure(1, scope, 1, Some(Inspector::new()), |block| {
            block.retrieve_local_variable(0, 0)
        })
        .unwrap();
        root.end_body().unwrap();
        let unit = script.finish().unwrap();

        let block = unit.methods.iter().find(|m| m.name.starts_with("block_")).unwrap();
        assert_eq!(block.count_invocations("nullToNil"), 1);
        assert_eq!(block.count_invocations("blockArgs"), 0);
    }

    #[test]
    fn flat_closure_requires_an_empty_heap_scope() {
        let mut script = ScriptCompiler::new("Unit", "t.rb", Default::default());
        let mut root = script.start_root("m", simple_scope(0), None).unwrap();

        let err = root
            .create_new_flat_closure(1, StaticScope::default(), 0, Some(Inspector::new()), |block| {
                block.load_nil();
                Ok(())
            })
            .unwrap_err();
        assert!(err.is_not_compilable());

        let err = root
            .create_new_flat_closure(1, StaticScope::new(["x"]), 0, None, |block| {
                block.load_nil();
                Ok(())
            })
            .unwrap_err();
        assert!(err.is_not_compilable());

        root.create_new_flat_closure(1, StaticScope::default(), 0, None, |block| {
            block.load_nil();
            Ok(())
        })
        .unwrap();
        root.end_body().unwrap();
        let unit = script.finish().unwrap();

        // rejected closures do not use up a name
        let blocks: Vec<&str> = unit
            .methods
            .iter()
            .filter(|m| m.name.starts_with("block_"))
            .map(|m| m.name.as_str())
            .collect();
        assert_eq!(blocks, ["block_0$RUBY$m"]);
    }

    #[test]
    fn class_body_runs_through_helpers() {
        let mut script = ScriptCompiler::new("Unit", "t.rb", Default::default());
        let mut root = script.start_root("main", simple_scope(0), None).unwrap();
        root.define_class("Point", None, StaticScope::default(), None, |body| {
            body.load_self();
            Ok(())
        })
        .unwrap();
        root.end_body().unwrap();
        let unit = script.finish().unwrap();

        let root = unit.root().unwrap();
        assert_eq!(root.count_invocations("defineClass"), 1);
        assert_eq!(root.count_invocations("invokeClassBody"), 1);
        assert!(root
            .code
            .contains(&Insn::Ldc(Constant::Str("class_0$RUBY$Point".to_string()))));
    }
}
