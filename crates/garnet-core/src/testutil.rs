//! Test utilities for Garnet
//!
//! Helpers for compiling small units straight through the body compiler API
//! and running them on the reference executor.

use std::rc::Rc;

use crate::body::BodyCompiler;
use crate::config::CompilerConfig;
use crate::error::CompileResult;
use crate::scope::{Inspector, StaticScope};
use crate::script::ScriptCompiler;
use crate::unit::CompiledUnit;
use crate::vm::{BasicHost, Host, Value, VM};

/// Result type for test helpers
pub type TestResult<T> = Result<T, String>;

/// Unit class name used by the helpers
pub const TEST_CLASS: &str = "Unit";

/// Source file name used by the helpers
pub const TEST_FILE: &str = "test.rb";

/// A scope of `n` required arguments named `a0`, `a1`, ...
#[must_use]
pub fn simple_scope(n: usize) -> StaticScope {
    StaticScope::new((0..n).map(|i| format!("a{i}"))).with_required(n)
}

/// Compile a unit holding one method `test` whose body is emitted by `f`.
/// `f` must leave the method's result on the stack.
///
/// The body is analysed as containing nothing but what `f` emits, which
/// selects stack-based variables when the scope allows it.
///
/// # Errors
/// Returns the compile error raised by `f` or while finishing the unit
pub fn compile_root(
    scope: StaticScope,
    f: impl FnOnce(&mut BodyCompiler<'_>) -> CompileResult<()>,
) -> CompileResult<CompiledUnit> {
    compile_root_with(scope, Some(Inspector::new()), f)
}

/// Like `compile_root` with explicit analysis facts; `None` compiles the
/// body pessimistically with heap-based variables
///
/// # Errors
/// Returns the compile error raised by `f` or while finishing the unit
pub fn compile_root_with(
    scope: StaticScope,
    inspector: Option<Inspector>,
    f: impl FnOnce(&mut BodyCompiler<'_>) -> CompileResult<()>,
) -> CompileResult<CompiledUnit> {
    compile_with_config(CompilerConfig::default(), scope, inspector, f)
}

/// Compile a single-method unit under `config`
///
/// # Errors
/// Returns the compile error raised by `f` or while finishing the unit
pub fn compile_with_config(
    config: CompilerConfig,
    scope: StaticScope,
    inspector: Option<Inspector>,
    f: impl FnOnce(&mut BodyCompiler<'_>) -> CompileResult<()>,
) -> CompileResult<CompiledUnit> {
    let mut script = ScriptCompiler::new(TEST_CLASS, TEST_FILE, config);
    let mut body = script.start_root("test", scope, inspector)?;
    f(&mut body)?;
    body.end_body()?;
    script.finish()
}

/// Load a unit on a fresh `BasicHost` and call `test` with `args`
///
/// # Errors
/// Returns error if loading the unit or the call fails
pub fn run_unit(unit: CompiledUnit, args: Vec<Value>) -> TestResult<Value> {
    run_unit_on(unit, Rc::new(BasicHost::new()), args)
}

/// Load a unit on `host` and call `test` with `args`
///
/// # Errors
/// Returns error if loading the unit or the call fails
pub fn run_unit_on(unit: CompiledUnit, host: Rc<dyn Host>, args: Vec<Value>) -> TestResult<Value> {
    let mut vm = VM::new(unit, host).map_err(|e| format!("Load error: {e}"))?;
    vm.invoke("test", main_object(), args, None)
        .map_err(|e| format!("Runtime error: {e}"))
}

/// Compile a single-method unit and run it with `args`
///
/// # Errors
/// Returns error if compilation or execution fails
pub fn eval_root(
    scope: StaticScope,
    args: Vec<Value>,
    f: impl FnOnce(&mut BodyCompiler<'_>) -> CompileResult<()>,
) -> TestResult<Value> {
    let unit = compile_root(scope, f).map_err(|e| format!("Compile error: {e}"))?;
    run_unit(unit, args)
}

/// Compile and run, expecting a fixnum result
///
/// # Errors
/// Returns error if evaluation fails or the result is not a fixnum
pub fn eval_fixnum(
    scope: StaticScope,
    args: Vec<Value>,
    f: impl FnOnce(&mut BodyCompiler<'_>) -> CompileResult<()>,
) -> TestResult<i64> {
    match eval_root(scope, args, f)? {
        Value::Fixnum(n) => Ok(n),
        other => Err(format!("Expected Integer, got {}", other.type_name())),
    }
}

/// A fresh top-level `self`
#[must_use]
pub fn main_object() -> Value {
    Value::Object(Rc::new(crate::vm::RObject::new("Object")))
}
