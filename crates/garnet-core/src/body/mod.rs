//! Body compilers
//!
//! A `BodyCompiler` turns one lexical body (method, block, class body) into
//! one method of the unit, or into a chain of methods when the body is
//! outlined. It owns the method emitter, the body's variable compiler and
//! the control-flow bookkeeping (loops, protected regions, return handling)
//! that differs per role:
//!
//! | role    | `return`                         | `break` outside a loop |
//! |---------|----------------------------------|------------------------|
//! | root    | direct return, or jump if nested | `LocalJumpError`       |
//! | closure | return jump                      | break jump             |
//! | class   | return jump                      | `LocalJumpError`       |
//!
//! The front end drives a body compiler through callbacks; the compiler
//! decides the evaluation order and how often each callback runs.

mod chain;
mod closure;
mod control;
mod literals;
mod role;

pub use role::{BaseRole, BodyRole};

use tracing::{debug, trace};

use crate::emit::{class, sig, JType, Label, MethodEmitter};
use crate::error::{CompileError, CompileResult};
use crate::frame::{ArgsShape, FrameLayout, ARGS, CONTEXT, SELF, THIS};
use crate::invocation::{
    CallType, CompilerCallback, InlineCacheInvocationCompiler, InvocationCompiler,
    StandardInvocationCompiler,
};
use crate::scope::{Fact, Inspector, StaticScope};
use crate::script::ScriptCompiler;
use crate::unit::SegmentId;
use crate::variables::{select_strategy, VariableCompiler, VariableStrategy};

use role::LoopLabels;

/// Everything needed to open a body
#[derive(Debug, Clone)]
pub(crate) struct BodySetup {
    /// Method name in the unit
    pub name: String,
    /// Source-level name; closures and segments are named after it
    pub base_name: String,
    pub role: BodyRole,
    pub layout: FrameLayout,
    pub scope: StaticScope,
    pub inspector: Option<Inspector>,
}

/// Compiles one body into a method (or a chain of methods) of the unit
pub struct BodyCompiler<'s> {
    script: &'s mut ScriptCompiler,
    role: BodyRole,
    pub(crate) method: MethodEmitter,
    pub(crate) layout: FrameLayout,
    scope: StaticScope,
    inspector: Option<Inspector>,
    variables: Box<dyn VariableCompiler>,
    invocation: &'static dyn InvocationCompiler,
    segment: SegmentId,
    name: String,
    base_name: String,

    /// Start of the frame, before the prologue
    scope_start: Label,
    /// First instruction after argument seeding
    body_start: Label,

    loops: Vec<LoopLabels>,
    /// Ensure regions currently open
    protection_depth: usize,
    /// Rescue clauses currently open
    rescue_depth: usize,

    current_line: u32,
    last_line: Option<u32>,

    /// A return jump was thrown from this segment
    threw_return_jump: bool,
    /// A protected `next` in a closure needs an end-of-body handler
    needs_next_handler: bool,
    /// A protected `redo` in a closure needs an end-of-body handler
    needs_redo_handler: bool,
}

impl<'s> BodyCompiler<'s> {
    /// Open a body and emit its prologue
    pub(crate) fn begin(script: &'s mut ScriptCompiler, setup: BodySetup) -> CompileResult<Self> {
        let strategy = select_strategy(setup.inspector.as_ref());
        if matches!(setup.role, BodyRole::Closure { flat: true }) {
            if strategy != VariableStrategy::HeapBased {
                return Err(CompileError::not_compilable(format!(
                    "flat closure {} requires heap-based variables",
                    setup.name
                )));
            }
            if setup.scope.number_of_variables() > 0 {
                return Err(CompileError::not_compilable(format!(
                    "flat closure {} declares {} variables",
                    setup.name,
                    setup.scope.number_of_variables()
                )));
            }
        }

        let variables = strategy.compiler(setup.layout, setup.scope.number_of_variables());
        let invocation: &'static dyn InvocationCompiler = if script.config().invokedynamic {
            &InlineCacheInvocationCompiler
        } else {
            &StandardInvocationCompiler
        };
        let segment = script.push_segment(&setup.name, setup.role.base(), None);

        let mut method = MethodEmitter::new(setup.name.clone(), setup.layout.signature());
        let scope_start = method.new_label();
        let body_start = method.new_label();

        debug!(
            target: "garnet::jit::body",
            name = %setup.name,
            role = %setup.role.base(),
            variables = %strategy,
            "begin body"
        );

        let mut body = Self {
            script,
            role: setup.role,
            method,
            layout: setup.layout,
            scope: setup.scope,
            inspector: setup.inspector,
            variables,
            invocation,
            segment,
            name: setup.name,
            base_name: setup.base_name,
            scope_start,
            body_start,
            loops: Vec::new(),
            protection_depth: 0,
            rescue_depth: 0,
            current_line: 0,
            last_line: None,
            threw_return_jump: false,
            needs_next_handler: false,
            needs_redo_handler: false,
        };
        body.begin_frame()?;
        Ok(body)
    }

    /// Prologue: runtime and nil slots, variable storage, arguments
    fn begin_frame(&mut self) -> CompileResult<()> {
        self.method.mark(self.scope_start);

        self.method.load(CONTEXT);
        self.method
            .invoke_virtual(class::CONTEXT, "getRuntime", sig(JType::RUNTIME, &[]));
        self.method.store(self.layout.runtime());
        self.method.load(self.layout.runtime());
        self.method
            .invoke_virtual(class::RUNTIME, "getNil", sig(JType::VALUE, &[]));
        self.method.store(self.layout.nil());

        match self.role {
            BodyRole::RootMethod { .. } => {
                self.variables.begin_method(&mut self.method)?;
                self.seed_method_args()?;
            }
            BodyRole::Closure { flat: false } => {
                self.variables.begin_closure(&mut self.method)?;
                self.seed_closure_args()?;
            }
            BodyRole::Closure { flat: true } => {
                self.variables.begin_flat_closure(&mut self.method)?;
            }
            BodyRole::ClassBody => self.variables.begin_class(&mut self.method)?,
            BodyRole::Chained { .. } => self.variables.begin_chained(&mut self.method)?,
        }

        self.method.mark(self.body_start);
        Ok(())
    }

    fn seed_method_args(&mut self) -> CompileResult<()> {
        if let ArgsShape::Specific(arity) = self.layout.shape() {
            for index in 0..arity {
                self.method.load(ARGS + index);
                self.variables
                    .assign_local(&mut self.method, usize::from(index), 0, false)?;
            }
            return Ok(());
        }

        let required = self.scope.required_args();
        let optional = self.scope.optional_args();
        let max = self
            .scope
            .max_args()
            .map_or(-1, |max| i32::try_from(max).unwrap_or(i32::MAX));

        self.method.load(CONTEXT);
        self.method.load(ARGS);
        self.method.push_index(required);
        self.method.push_int(max);
        self.method.invoke_static(
            class::HELPERS,
            "checkArgumentCount",
            sig(JType::Int, &[JType::CONTEXT, JType::VALUE_ARRAY, JType::Int, JType::Int]),
        );
        self.method.pop();

        for index in 0..required {
            self.method.load(ARGS);
            self.method.push_index(index);
            self.method.array_load();
            self.variables.assign_local(&mut self.method, index, 0, false)?;
        }
        for index in required..required + optional {
            self.method.load(ARGS);
            self.method.push_index(index);
            self.method.load(self.layout.nil());
            self.method.invoke_static(
                class::HELPERS,
                "optionalArgument",
                sig(JType::VALUE, &[JType::VALUE_ARRAY, JType::Int, JType::VALUE]),
            );
            self.variables.assign_local(&mut self.method, index, 0, false)?;
        }
        if let Some(rest) = self.scope.rest_arg() {
            self.method.load(ARGS);
            self.method.push_index(required + optional);
            self.method.invoke_static(
                class::HELPERS,
                "restArgument",
                sig(JType::VALUE, &[JType::VALUE_ARRAY, JType::Int]),
            );
            self.variables.assign_local(&mut self.method, rest, 0, false)?;
        }
        Ok(())
    }

    fn seed_closure_args(&mut self) -> CompileResult<()> {
        let count = self.scope.required_args() + self.scope.optional_args();
        let rest = self.scope.rest_arg();
        let destructures = self
            .inspector
            .is_some_and(|i| i.has(Fact::MultipleArgsHead));

        if count == 0 && rest.is_none() {
            return Ok(());
        }
        if count == 1 && rest.is_none() && !destructures {
            self.method.load(ARGS);
            self.method.load(self.layout.nil());
            self.method.invoke_static(
                class::HELPERS,
                "nullToNil",
                sig(JType::VALUE, &[JType::VALUE, JType::VALUE]),
            );
            return self.variables.assign_local(&mut self.method, 0, 0, false);
        }

        self.method.load(ARGS);
        self.method.push_index(count);
        self.method.invoke_static(
            class::HELPERS,
            "blockArgs",
            sig(JType::VALUE_ARRAY, &[JType::VALUE, JType::Int]),
        );
        for index in 0..count {
            self.method.dup();
            self.method.push_index(index);
            self.method.array_load();
            self.variables.assign_local(&mut self.method, index, 0, false)?;
        }
        if let Some(rest) = rest {
            self.method.dup();
            self.method.push_index(count);
            self.method.invoke_static(
                class::HELPERS,
                "restArgument",
                sig(JType::VALUE, &[JType::VALUE_ARRAY, JType::Int]),
            );
            self.variables.assign_local(&mut self.method, rest, 0, false)?;
        }
        self.method.pop();
        Ok(())
    }

    // ===== Accessors =====

    /// The unit this body belongs to
    #[must_use]
    pub fn script(&self) -> &ScriptCompiler {
        self.script
    }

    #[must_use]
    pub fn role(&self) -> BodyRole {
        self.role
    }

    /// Name of the method currently being emitted
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn scope(&self) -> &StaticScope {
        &self.scope
    }

    #[must_use]
    pub fn inspector(&self) -> Option<&Inspector> {
        self.inspector.as_ref()
    }

    #[must_use]
    pub fn layout(&self) -> FrameLayout {
        self.layout
    }

    #[must_use]
    pub fn variable_strategy(&self) -> VariableStrategy {
        self.variables.strategy()
    }

    /// Segment currently being emitted
    #[must_use]
    pub fn segment(&self) -> SegmentId {
        self.segment
    }

    /// The invocation compiler selected for this unit
    #[must_use]
    pub fn invocation_compiler(&self) -> &'static dyn InvocationCompiler {
        self.invocation
    }

    /// Line of the most recent line-number entry
    #[must_use]
    pub fn current_line(&self) -> u32 {
        self.current_line
    }

    /// Estimated size of the current segment
    #[must_use]
    pub fn code_size(&self) -> usize {
        self.method.code_size()
    }

    /// Returns true once the current segment is larger than the configured
    /// chain size
    #[must_use]
    pub fn should_outline(&self) -> bool {
        self.method.code_size() > self.script.config().chain_size
    }

    // ===== Frame Loads =====

    pub fn load_this(&mut self) {
        self.method.load(THIS);
    }

    pub fn load_context(&mut self) {
        self.method.load(CONTEXT);
    }

    pub fn load_self(&mut self) {
        self.method.load(SELF);
    }

    pub fn load_block(&mut self) {
        self.method.load(self.layout.block());
    }

    pub fn load_runtime(&mut self) {
        self.method.load(self.layout.runtime());
    }

    pub fn load_nil(&mut self) {
        self.method.load(self.layout.nil());
    }

    pub fn load_true(&mut self) {
        self.load_runtime();
        self.method
            .invoke_virtual(class::RUNTIME, "getTrue", sig(JType::VALUE, &[]));
    }

    pub fn load_false(&mut self) {
        self.load_runtime();
        self.method
            .invoke_virtual(class::RUNTIME, "getFalse", sig(JType::VALUE, &[]));
    }

    /// Drop the value on top of the stack (a statement's unused result)
    pub fn discard(&mut self) {
        self.method.pop();
    }

    /// Record a source line; consecutive duplicates are dropped
    pub fn line_number(&mut self, line: u32) {
        self.current_line = line;
        if self.last_line != Some(line) {
            self.last_line = Some(line);
            self.method.line_number(line);
        }
    }

    // ===== Temps =====

    pub fn grab_temp(&mut self) -> u16 {
        self.variables.grab_temp_local()
    }

    pub fn release_temp(&mut self, slot: u16) -> CompileResult<()> {
        self.variables.release_temp_local(slot)
    }

    pub fn load_temp(&mut self, slot: u16) {
        self.method.load(slot);
    }

    pub fn store_temp(&mut self, slot: u16) {
        self.method.store(slot);
    }

    // ===== Variables =====

    /// Assign a local; runs `value` first when given, otherwise the value
    /// must already be on the stack. With `expr` the value stays there.
    pub fn assign_local_variable(
        &mut self,
        index: usize,
        depth: usize,
        value: Option<CompilerCallback<'_>>,
        expr: bool,
    ) -> CompileResult<()> {
        if let Some(mut value) = value {
            value.call(self)?;
        }
        self.variables
            .assign_local(&mut self.method, index, depth, expr)
    }

    pub fn retrieve_local_variable(&mut self, index: usize, depth: usize) -> CompileResult<()> {
        self.variables.retrieve_local(&mut self.method, index, depth)
    }

    // ===== Cache =====

    pub fn cache_call_site(&mut self, name: &str, call_type: CallType) -> CompileResult<usize> {
        self.script
            .cache
            .cache_call_site(&mut self.method, name, call_type)
    }

    // ===== Finishing =====

    /// Return the value on the stack and finish the body
    pub fn end_body(mut self) -> CompileResult<()> {
        self.method.areturn();
        self.seal()?;
        let code = self.method.end()?;
        trace!(
            target: "garnet::jit::body",
            name = %code.name,
            size = code.code_size,
            max_stack = code.max_stack,
            "end body"
        );
        self.script.add_method(code)
    }

    /// Close the current segment: end label, handlers, debug locals
    fn seal(&mut self) -> CompileResult<()> {
        if !self.loops.is_empty() || self.protection_depth > 0 {
            return Err(CompileError::internal(format!(
                "{} closed with open loops or protected regions",
                self.name
            )));
        }
        let end = self.method.mark_new();
        self.install_handlers(end);
        self.variables
            .declare_locals(&mut self.method, &self.scope, self.scope_start, end);
        Ok(())
    }

    /// Append the end-of-body handlers this segment needs
    fn install_handlers(&mut self, end: Label) {
        match self.role.base() {
            BaseRole::Closure => {
                if self.needs_redo_handler {
                    let handler = self.method.mark_new();
                    self.method.pop();
                    self.method.goto(self.body_start);
                    self.method
                        .try_catch(self.body_start, end, handler, Some(class::REDO_JUMP));
                }
                if self.needs_next_handler {
                    let handler = self.method.mark_new();
                    self.method.invoke_static(
                        class::HELPERS,
                        "handleNextJump",
                        sig(JType::VALUE, &[JType::Object(class::THROWABLE)]),
                    );
                    self.method.areturn();
                    self.method
                        .try_catch(self.body_start, end, handler, Some(class::JUMP));
                }
            }
            BaseRole::Root { nested: false } if self.catches_returns() => {
                let handler = self.method.mark_new();
                self.method.load(CONTEXT);
                self.method.invoke_static(
                    class::HELPERS,
                    "handleReturnJump",
                    sig(JType::VALUE, &[JType::Object(class::THROWABLE), JType::CONTEXT]),
                );
                self.method.areturn();
                self.method
                    .try_catch(self.scope_start, end, handler, Some(class::JUMP));
            }
            _ => {}
        }
    }

    /// Whether this root segment must turn return jumps into a return
    fn catches_returns(&self) -> bool {
        match self.role {
            BodyRole::RootMethod { .. } => {
                self.threw_return_jump || self.inspector.map_or(true, |i| i.has_closure())
            }
            _ => self.threw_return_jump,
        }
    }
}

impl std::fmt::Debug for BodyCompiler<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BodyCompiler")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("variables", &self.variables.strategy())
            .field("protection_depth", &self.protection_depth)
            .field("loops", &self.loops.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::Insn;
    use crate::scope::Fact;
    use crate::testutil::{compile_root, compile_root_with, simple_scope};

    #[test]
    fn prologue_caches_runtime_and_nil() {
        let unit = compile_root(simple_scope(0), |body| {
            body.load_nil();
            Ok(())
        })
        .unwrap();

        let layout = FrameLayout::specific(0);
        let code: Vec<&Insn> = unit
            .root()
            .unwrap()
            .code
            .iter()
            .filter(|insn| !matches!(insn, Insn::Label(_)))
            .collect();
        assert_eq!(code[0], &Insn::Load(CONTEXT));
        assert_eq!(code[2], &Insn::Store(layout.runtime()));
        assert_eq!(code[5], &Insn::Store(layout.nil()));
    }

    #[test]
    fn boxed_root_checks_arity_and_seeds_optionals() {
        let scope = StaticScope::new(["a", "b", "rest"])
            .with_required(1)
            .with_optional(1)
            .with_rest(2);
        let unit = compile_root(scope, |body| body.retrieve_local_variable(2, 0)).unwrap();

        let root = unit.root().unwrap();
        assert_eq!(root.signature.param_count(), 4);
        assert_eq!(root.count_invocations("checkArgumentCount"), 1);
        assert_eq!(root.count_invocations("optionalArgument"), 1);
        assert_eq!(root.count_invocations("restArgument"), 1);
        assert!(root.code.contains(&Insn::PushInt(-1)));
    }

    #[test]
    fn line_numbers_are_deduplicated() {
        let unit = compile_root(simple_scope(0), |body| {
            body.line_number(3);
            body.line_number(3);
            body.line_number(4);
            assert_eq!(body.current_line(), 4);
            body.load_nil();
            Ok(())
        })
        .unwrap();

        let lines = unit
            .root()
            .unwrap()
            .code
            .iter()
            .filter(|insn| matches!(insn, Insn::Line(_)))
            .count();
        assert_eq!(lines, 2);
    }

    #[test]
    fn closure_fact_installs_return_handler() {
        let inspector = Inspector::new().with(Fact::Closure);
        let unit = compile_root_with(simple_scope(0), Some(inspector), |body| {
            body.load_nil();
            Ok(())
        })
        .unwrap();

        let root = unit.root().unwrap();
        assert_eq!(root.try_catches.len(), 1);
        assert_eq!(root.try_catches[0].exception, Some(class::JUMP));
        assert_eq!(root.count_invocations("handleReturnJump"), 1);
    }

    #[test]
    fn should_outline_tracks_chain_size() {
        let config = crate::CompilerConfig {
            chain_size: 20,
            ..Default::default()
        };
        let mut script = ScriptCompiler::new("Unit", "t.rb", config);
        let mut body = script
            .start_root("big", simple_scope(0), Some(Inspector::new()))
            .unwrap();
        assert!(!body.should_outline());
        for value in 0..10 {
            body.create_new_fixnum(value);
            body.method.pop();
        }
        assert!(body.should_outline());
        body.load_nil();
        body.end_body().unwrap();
    }
}
