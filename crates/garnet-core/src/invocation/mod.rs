//! Invocation compilers
//!
//! An invocation compiler emits the calling sequence for one dynamic call:
//!
//! ```text
//! [call site] ctx self receiver arg0 .. argN [block] -> call
//! ```
//!
//! Receivers, arguments, values and blocks are supplied as callbacks by the
//! front end; the invocation compiler decides when (and how many times) each
//! runs. Two implementations share the contract:
//!
//! - `StandardInvocationCompiler` dispatches through a cached call-site
//!   object, one per call expression.
//! - `InlineCacheInvocationCompiler` emits dynamically-linked call
//!   instructions annotated with file and line, and falls back to the
//!   standard protocol for `super`.
//!
//! Compound operations (attribute assignment, op-assign, element op-assign,
//! yield and case/when dispatch) are written once, as default methods on the
//! trait, in terms of `invoke_dynamic`.

mod inline_cache;
mod standard;

pub use inline_cache::InlineCacheInvocationCompiler;
pub use standard::StandardInvocationCompiler;

use std::fmt;

use crate::body::BodyCompiler;
use crate::emit::{class, sig, JType};
use crate::error::{CompileError, CompileResult};

/// Largest argument count passed as individual values
pub const MAX_SPECIFIC_ARITY: usize = 3;

const BLOCK: JType = JType::BLOCK;

/// How a call resolves its target and checks visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallType {
    /// `recv.foo`: public methods only
    Normal,
    /// `foo(...)`: implicit self, private methods visible
    Functional,
    /// `foo` with no arguments or parens: may also be a local
    Variable,
    /// `super`: resolved against the superclass of the current method's owner
    Super,
}

impl CallType {
    /// One-letter tag used in the init descriptor
    #[must_use]
    pub fn tag(self) -> char {
        match self {
            CallType::Normal => 'N',
            CallType::Functional => 'F',
            CallType::Variable => 'V',
            CallType::Super => 'S',
        }
    }

    /// Inverse of `tag`
    #[must_use]
    pub fn from_tag(tag: char) -> Option<Self> {
        match tag {
            'N' => Some(CallType::Normal),
            'F' => Some(CallType::Functional),
            'V' => Some(CallType::Variable),
            'S' => Some(CallType::Super),
            _ => None,
        }
    }
}

type EmitFn<'a> = dyn FnMut(&mut BodyCompiler<'_>) -> CompileResult<()> + 'a;

/// Emits one sub-expression into the body, leaving its value on the stack
pub struct CompilerCallback<'a>(Box<EmitFn<'a>>);

impl<'a> CompilerCallback<'a> {
    pub fn new(f: impl FnMut(&mut BodyCompiler<'_>) -> CompileResult<()> + 'a) -> Self {
        Self(Box::new(f))
    }

    /// A callback that reloads a temp local
    #[must_use]
    pub fn temp(slot: u16) -> CompilerCallback<'static> {
        CompilerCallback::new(move |body| {
            body.load_temp(slot);
            Ok(())
        })
    }

    pub fn call(&mut self, body: &mut BodyCompiler<'_>) -> CompileResult<()> {
        (self.0)(body)
    }
}

impl fmt::Debug for CompilerCallback<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CompilerCallback")
    }
}

/// Number of values an arguments callback produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly this many
    Fixed(usize),
    /// Unknown until run time (splat)
    Splat,
}

impl Arity {
    /// Returns true if the values are passed individually rather than as one
    /// `Value[]`
    #[must_use]
    pub fn is_specific(self) -> bool {
        matches!(self, Arity::Fixed(n) if n <= MAX_SPECIFIC_ARITY)
    }

    /// Parameter types the values occupy on the stack
    #[must_use]
    pub fn params(self) -> Vec<JType> {
        match self {
            Arity::Fixed(n) if n <= MAX_SPECIFIC_ARITY => vec![JType::VALUE; n],
            _ => vec![JType::VALUE_ARRAY],
        }
    }
}

/// Emits a call's arguments: individual values for a specific arity,
/// otherwise a single `Value[]`
pub struct ArgumentsCallback<'a> {
    arity: Arity,
    emit: CompilerCallback<'a>,
}

impl<'a> ArgumentsCallback<'a> {
    pub fn new(
        arity: Arity,
        f: impl FnMut(&mut BodyCompiler<'_>) -> CompileResult<()> + 'a,
    ) -> Self {
        Self {
            arity,
            emit: CompilerCallback::new(f),
        }
    }

    /// Arguments reloaded from temp locals, in order
    #[must_use]
    pub fn temps(arity: Arity, slots: Vec<u16>) -> ArgumentsCallback<'static> {
        ArgumentsCallback::new(arity, move |body| {
            for slot in &slots {
                body.load_temp(*slot);
            }
            Ok(())
        })
    }

    #[must_use]
    pub fn arity(&self) -> Arity {
        self.arity
    }

    pub fn call(&mut self, body: &mut BodyCompiler<'_>) -> CompileResult<()> {
        self.emit.call(body)
    }
}

impl fmt::Debug for ArgumentsCallback<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArgumentsCallback")
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

/// One dynamic call
#[derive(Debug)]
pub struct Call<'a> {
    pub name: String,
    pub call_type: CallType,
    /// Explicit receiver; `None` calls on self
    pub receiver: Option<CompilerCallback<'a>>,
    pub args: Option<ArgumentsCallback<'a>>,
    pub block: Option<CompilerCallback<'a>>,
    /// The block is a literal at this call site rather than a forwarded one
    pub iterator: bool,
}

impl<'a> Call<'a> {
    pub fn new(name: impl Into<String>, call_type: CallType) -> Self {
        Self {
            name: name.into(),
            call_type,
            receiver: None,
            args: None,
            block: None,
            iterator: false,
        }
    }

    /// Functional call on self
    pub fn functional(name: impl Into<String>) -> Self {
        Self::new(name, CallType::Functional)
    }

    /// Normal call on an explicit receiver
    pub fn normal(name: impl Into<String>, receiver: CompilerCallback<'a>) -> Self {
        Self::new(name, CallType::Normal).receiver(receiver)
    }

    #[must_use]
    pub fn receiver(mut self, receiver: CompilerCallback<'a>) -> Self {
        self.receiver = Some(receiver);
        self
    }

    #[must_use]
    pub fn args(mut self, args: ArgumentsCallback<'a>) -> Self {
        self.args = Some(args);
        self
    }

    #[must_use]
    pub fn block(mut self, block: CompilerCallback<'a>) -> Self {
        self.block = Some(block);
        self
    }

    /// Pass a literal block (implies a block)
    #[must_use]
    pub fn iterator(mut self, block: CompilerCallback<'a>) -> Self {
        self.block = Some(block);
        self.iterator = true;
        self
    }

    /// Stack parameters the call's arguments occupy
    pub(crate) fn arg_params(&self) -> Vec<JType> {
        self.args
            .as_ref()
            .map_or_else(Vec::new, |args| args.arity().params())
    }

    /// Returns true if the arguments are boxed into one array
    pub(crate) fn is_varargs(&self) -> bool {
        self.args.as_ref().is_some_and(|args| !args.arity().is_specific())
    }

    /// Emit self-or-receiver, arguments and block, returning whether a block
    /// was pushed
    pub(crate) fn emit_operands(&mut self, body: &mut BodyCompiler<'_>) -> CompileResult<bool> {
        match &mut self.receiver {
            Some(receiver) => receiver.call(body)?,
            None => body.load_self(),
        }
        if let Some(args) = &mut self.args {
            args.call(body)?;
        }
        match &mut self.block {
            Some(block) => {
                block.call(body)?;
                Ok(true)
            }
            None if self.call_type == CallType::Super => {
                body.load_block();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// A literal right-hand operand of a binary operator
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    Fixnum(i64),
    Float(f64),
}

/// Emits calls, yields and case/when dispatch for one body
pub trait InvocationCompiler: Sync + fmt::Debug {
    /// Emit a dynamic call, leaving its result on the stack
    fn invoke_dynamic(&self, body: &mut BodyCompiler<'_>, call: Call<'_>) -> CompileResult<()>;

    /// Emit the specialized form of `receiver <op> literal`. Only called when
    /// fast ops are enabled.
    fn invoke_fast_operator(
        &self,
        body: &mut BodyCompiler<'_>,
        name: &str,
        receiver: CompilerCallback<'_>,
        operand: Operand,
    ) -> CompileResult<()>;

    /// `receiver <op> literal`. With fast ops on, uses the specialized form;
    /// otherwise an ordinary call with the literal loaded from the cache.
    fn invoke_binary_operator(
        &self,
        body: &mut BodyCompiler<'_>,
        name: &str,
        receiver: CompilerCallback<'_>,
        operand: Operand,
    ) -> CompileResult<()> {
        if body.script().config().fast_ops {
            return self.invoke_fast_operator(body, name, receiver, operand);
        }

        let literal = ArgumentsCallback::new(Arity::Fixed(1), move |body| {
            match operand {
                Operand::Fixnum(value) => body.create_new_fixnum(value),
                Operand::Float(value) => body.create_new_float(value),
            }
            Ok(())
        });
        self.invoke_dynamic(body, Call::normal(name, receiver).args(literal))
    }

    /// `receiver.name = value` or `receiver[args] = value`
    ///
    /// Leaves the assigned value on the stack when `expr` is set, otherwise
    /// the call's result.
    fn invoke_attr_assign(
        &self,
        body: &mut BodyCompiler<'_>,
        name: &str,
        receiver: Option<CompilerCallback<'_>>,
        mut args: Option<ArgumentsCallback<'_>>,
        mut value: CompilerCallback<'_>,
        expr: bool,
    ) -> CompileResult<()> {
        let call_type = if receiver.is_some() {
            CallType::Normal
        } else {
            CallType::Functional
        };
        let arity = args.as_ref().map_or(Arity::Fixed(0), ArgumentsCallback::arity);

        body.cache_call_site(name, call_type)?;
        body.load_context();
        body.load_self();
        match receiver {
            Some(mut receiver) => receiver.call(body)?,
            None => body.load_self(),
        }
        if let Some(args) = &mut args {
            args.call(body)?;
        }
        value.call(body)?;

        let temp = if expr {
            body.method.dup();
            let temp = body.grab_temp();
            body.store_temp(temp);
            Some(temp)
        } else {
            None
        };

        let params = match arity {
            Arity::Fixed(n) if n < MAX_SPECIFIC_ARITY => vec![JType::VALUE; n + 1],
            Arity::Fixed(n) if n == MAX_SPECIFIC_ARITY => {
                body.method.invoke_static(
                    class::HELPERS,
                    "constructObjectArray",
                    sig(JType::VALUE_ARRAY, &[JType::VALUE; 4]),
                );
                vec![JType::VALUE_ARRAY]
            }
            _ => {
                body.method.invoke_static(
                    class::HELPERS,
                    "appendToObjectArray",
                    sig(JType::VALUE_ARRAY, &[JType::VALUE_ARRAY, JType::VALUE]),
                );
                vec![JType::VALUE_ARRAY]
            }
        };
        let method = if params == [JType::VALUE_ARRAY] {
            "callVarargs"
        } else {
            "call"
        };
        body.method
            .invoke_virtual(class::CALL_SITE, method, call_site_sig(&params, false));

        if let Some(temp) = temp {
            body.method.pop();
            body.load_temp(temp);
            body.release_temp(temp)?;
        }
        Ok(())
    }

    /// `receiver.attr ||= value`
    fn invoke_op_asgn_with_or(
        &self,
        body: &mut BodyCompiler<'_>,
        attr: &str,
        receiver: CompilerCallback<'_>,
        value: CompilerCallback<'_>,
    ) -> CompileResult<()> {
        self.invoke_op_asgn_guarded(body, attr, receiver, value, true)
    }

    /// `receiver.attr &&= value`
    fn invoke_op_asgn_with_and(
        &self,
        body: &mut BodyCompiler<'_>,
        attr: &str,
        receiver: CompilerCallback<'_>,
        value: CompilerCallback<'_>,
    ) -> CompileResult<()> {
        self.invoke_op_asgn_guarded(body, attr, receiver, value, false)
    }

    /// Shared shape of `||=` and `&&=`: the receiver is evaluated once into a
    /// temp, the current value is tested, and the write happens only when the
    /// guard does not short-circuit
    fn invoke_op_asgn_guarded(
        &self,
        body: &mut BodyCompiler<'_>,
        attr: &str,
        mut receiver: CompilerCallback<'_>,
        value: CompilerCallback<'_>,
        or: bool,
    ) -> CompileResult<()> {
        receiver.call(body)?;
        let target = body.grab_temp();
        body.store_temp(target);

        self.invoke_dynamic(body, Call::normal(attr, CompilerCallback::temp(target)))?;
        let done = body.method.new_label();
        body.method.dup();
        body.method
            .invoke_interface(class::VALUE, "isTrue", sig(JType::Boolean, &[]));
        if or {
            body.method.if_true(done);
        } else {
            body.method.if_false(done);
        }
        body.method.pop();
        self.invoke_attr_assign(
            body,
            &format!("{attr}="),
            Some(CompilerCallback::temp(target)),
            None,
            value,
            true,
        )?;
        body.method.mark(done);

        body.release_temp(target)
    }

    /// `receiver.attr <op>= value`
    fn invoke_op_asgn_with_method(
        &self,
        body: &mut BodyCompiler<'_>,
        operator: &str,
        attr: &str,
        mut receiver: CompilerCallback<'_>,
        value: CompilerCallback<'_>,
    ) -> CompileResult<()> {
        receiver.call(body)?;
        let target = body.grab_temp();
        body.store_temp(target);

        self.invoke_dynamic(body, Call::normal(attr, CompilerCallback::temp(target)))?;
        let result = apply_operator(self, body, operator, value)?;
        self.invoke_attr_assign(
            body,
            &format!("{attr}="),
            Some(CompilerCallback::temp(target)),
            None,
            CompilerCallback::temp(result),
            true,
        )?;

        body.release_temp(result)?;
        body.release_temp(target)
    }

    /// `receiver[args] ||= value`
    fn invoke_op_element_asgn_with_or(
        &self,
        body: &mut BodyCompiler<'_>,
        receiver: CompilerCallback<'_>,
        args: ArgumentsCallback<'_>,
        value: CompilerCallback<'_>,
    ) -> CompileResult<()> {
        self.invoke_op_element_asgn_guarded(body, receiver, args, value, true)
    }

    /// `receiver[args] &&= value`
    fn invoke_op_element_asgn_with_and(
        &self,
        body: &mut BodyCompiler<'_>,
        receiver: CompilerCallback<'_>,
        args: ArgumentsCallback<'_>,
        value: CompilerCallback<'_>,
    ) -> CompileResult<()> {
        self.invoke_op_element_asgn_guarded(body, receiver, args, value, false)
    }

    /// Shared shape of element `||=` and `&&=`; receiver and index arguments
    /// are each evaluated once
    fn invoke_op_element_asgn_guarded(
        &self,
        body: &mut BodyCompiler<'_>,
        receiver: CompilerCallback<'_>,
        args: ArgumentsCallback<'_>,
        value: CompilerCallback<'_>,
        or: bool,
    ) -> CompileResult<()> {
        let saved = ElementOperands::evaluate(body, receiver, args)?;

        self.invoke_dynamic(
            body,
            Call::normal("[]", saved.receiver()).args(saved.args()),
        )?;
        let done = body.method.new_label();
        body.method.dup();
        body.method
            .invoke_interface(class::VALUE, "isTrue", sig(JType::Boolean, &[]));
        if or {
            body.method.if_true(done);
        } else {
            body.method.if_false(done);
        }
        body.method.pop();
        self.invoke_attr_assign(
            body,
            "[]=",
            Some(saved.receiver()),
            Some(saved.args()),
            value,
            true,
        )?;
        body.method.mark(done);

        saved.release(body)
    }

    /// `receiver[args] <op>= value`
    fn invoke_op_element_asgn_with_method(
        &self,
        body: &mut BodyCompiler<'_>,
        operator: &str,
        receiver: CompilerCallback<'_>,
        args: ArgumentsCallback<'_>,
        value: CompilerCallback<'_>,
    ) -> CompileResult<()> {
        let saved = ElementOperands::evaluate(body, receiver, args)?;

        self.invoke_dynamic(
            body,
            Call::normal("[]", saved.receiver()).args(saved.args()),
        )?;
        let result = apply_operator(self, body, operator, value)?;
        self.invoke_attr_assign(
            body,
            "[]=",
            Some(saved.receiver()),
            Some(saved.args()),
            CompilerCallback::temp(result),
            true,
        )?;

        body.release_temp(result)?;
        saved.release(body)
    }

    /// Yield individual values (at most three) to the current block
    fn yield_specific(
        &self,
        body: &mut BodyCompiler<'_>,
        args: Option<ArgumentsCallback<'_>>,
    ) -> CompileResult<()> {
        let arity = args.as_ref().map_or(Arity::Fixed(0), ArgumentsCallback::arity);
        if !arity.is_specific() {
            return Err(CompileError::not_compilable(
                "Can't do specific-arity call for > 3 args",
            ));
        }

        body.load_block();
        body.load_context();
        let mut params = vec![JType::CONTEXT];
        if let Some(mut args) = args {
            args.call(body)?;
            params.extend(arity.params());
        }
        body.method
            .invoke_virtual(class::BLOCK, "yieldSpecific", sig(JType::VALUE, &params));
        Ok(())
    }

    /// Yield one value (or none) to the current block. With `unwrap`, an
    /// array value is spread over the block's parameters.
    fn yield_(
        &self,
        body: &mut BodyCompiler<'_>,
        value: Option<CompilerCallback<'_>>,
        unwrap: bool,
    ) -> CompileResult<()> {
        body.load_block();
        body.load_context();
        match value {
            Some(mut value) => value.call(body)?,
            None => body.method.push_null(),
        }
        let method = if unwrap { "yieldArray" } else { "yield" };
        body.method.invoke_virtual(
            class::BLOCK,
            method,
            sig(JType::VALUE, &[JType::CONTEXT, JType::VALUE]),
        );
        Ok(())
    }

    /// `when` dispatch, leaving a boolean. With an argument this is
    /// `receiver === argument` for each receiver; without one (a `case` with
    /// no subject) each receiver is tested for truth.
    fn invoke_eqq(
        &self,
        body: &mut BodyCompiler<'_>,
        mut receivers: ArgumentsCallback<'_>,
        argument: Option<CompilerCallback<'_>>,
    ) -> CompileResult<()> {
        let receiver_params = receivers.arity().params();

        match argument {
            None => {
                receivers.call(body)?;
                body.method.invoke_static(
                    class::HELPERS,
                    "invokeEqqForCaselessWhen",
                    sig(JType::Boolean, &receiver_params),
                );
            }
            Some(mut argument) => {
                body.cache_call_site("===", CallType::Normal)?;
                body.load_context();
                body.load_self();
                argument.call(body)?;
                receivers.call(body)?;

                let mut params = vec![
                    JType::Object(class::CALL_SITE),
                    JType::CONTEXT,
                    JType::VALUE,
                    JType::VALUE,
                ];
                params.extend(receiver_params);
                body.method.invoke_static(
                    class::HELPERS,
                    "invokeEqqForCaseWhen",
                    sig(JType::Boolean, &params),
                );
            }
        }
        Ok(())
    }
}

/// Signature of a call-site `call*` method for the given argument types
pub(crate) fn call_site_sig(args: &[JType], block: bool) -> crate::emit::Signature {
    let mut params = vec![JType::CONTEXT, JType::VALUE, JType::VALUE];
    params.extend_from_slice(args);
    if block {
        params.push(BLOCK);
    }
    sig(JType::VALUE, &params)
}

/// Apply `operator` to the value on the stack and `value`, storing the result
/// in a fresh temp
fn apply_operator<I: InvocationCompiler + ?Sized>(
    invocation: &I,
    body: &mut BodyCompiler<'_>,
    operator: &str,
    mut value: CompilerCallback<'_>,
) -> CompileResult<u16> {
    let current = body.grab_temp();
    body.store_temp(current);
    invocation.invoke_dynamic(
        body,
        Call::normal(operator, CompilerCallback::temp(current)).args(ArgumentsCallback::new(
            Arity::Fixed(1),
            move |body| value.call(body),
        )),
    )?;
    body.release_temp(current)?;

    let result = body.grab_temp();
    body.store_temp(result);
    Ok(result)
}

/// Receiver and index arguments of an element op-assign, saved to temps
struct ElementOperands {
    receiver: u16,
    arity: Arity,
    /// One temp per value, or a single temp holding the `Value[]`
    args: Vec<u16>,
}

impl ElementOperands {
    fn evaluate(
        body: &mut BodyCompiler<'_>,
        mut receiver: CompilerCallback<'_>,
        mut args: ArgumentsCallback<'_>,
    ) -> CompileResult<Self> {
        let arity = args.arity();
        if arity == Arity::Fixed(0) {
            return Err(CompileError::not_compilable(
                "element assignment without index arguments",
            ));
        }

        receiver.call(body)?;
        let receiver = body.grab_temp();
        body.store_temp(receiver);

        args.call(body)?;
        let count = match arity {
            Arity::Fixed(n) if n <= MAX_SPECIFIC_ARITY => n,
            _ => 1,
        };
        let slots: Vec<u16> = (0..count).map(|_| body.grab_temp()).collect();
        for slot in slots.iter().rev() {
            body.store_temp(*slot);
        }

        Ok(Self {
            receiver,
            arity,
            args: slots,
        })
    }

    fn receiver(&self) -> CompilerCallback<'static> {
        CompilerCallback::temp(self.receiver)
    }

    fn args(&self) -> ArgumentsCallback<'static> {
        ArgumentsCallback::temps(self.arity, self.args.clone())
    }

    fn release(self, body: &mut BodyCompiler<'_>) -> CompileResult<()> {
        for slot in self.args.iter().rev() {
            body.release_temp(*slot)?;
        }
        body.release_temp(self.receiver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_type_tags_round_trip() {
        for call_type in [
            CallType::Normal,
            CallType::Functional,
            CallType::Variable,
            CallType::Super,
        ] {
            assert_eq!(CallType::from_tag(call_type.tag()), Some(call_type));
        }
        assert_eq!(CallType::from_tag('X'), None);
    }

    #[test]
    fn arity_parameter_shapes() {
        assert_eq!(Arity::Fixed(2).params(), vec![JType::VALUE; 2]);
        assert_eq!(Arity::Fixed(4).params(), vec![JType::VALUE_ARRAY]);
        assert_eq!(Arity::Splat.params(), vec![JType::VALUE_ARRAY]);
        assert!(Arity::Fixed(3).is_specific());
        assert!(!Arity::Splat.is_specific());
    }

    #[test]
    fn call_site_signature_with_block() {
        let s = call_site_sig(&[JType::VALUE], true);
        assert_eq!(s.param_count(), 5);
        assert_eq!(s.params.last(), Some(&JType::BLOCK));
    }
}
