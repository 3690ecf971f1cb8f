//! Cached call-site invocation

use super::{call_site_sig, Call, CallType, CompilerCallback, InvocationCompiler, Operand};
use crate::body::BodyCompiler;
use crate::emit::{class, JType};
use crate::error::CompileResult;

/// Dispatches every call through its own call-site object from the runtime
/// cache
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardInvocationCompiler;

impl InvocationCompiler for StandardInvocationCompiler {
    fn invoke_dynamic(&self, body: &mut BodyCompiler<'_>, mut call: Call<'_>) -> CompileResult<()> {
        body.cache_call_site(&call.name, call.call_type)?;
        body.load_context();
        body.load_self();

        let params = call.arg_params();
        let varargs = call.is_varargs();
        let has_block = call.emit_operands(body)?;

        let method = match (varargs, call.iterator && has_block) {
            (false, false) => "call",
            (false, true) => "callIter",
            (true, false) => "callVarargs",
            (true, true) => "callVarargsIter",
        };
        body.method
            .invoke_virtual(class::CALL_SITE, method, call_site_sig(&params, has_block));
        Ok(())
    }

    fn invoke_fast_operator(
        &self,
        body: &mut BodyCompiler<'_>,
        name: &str,
        mut receiver: CompilerCallback<'_>,
        operand: Operand,
    ) -> CompileResult<()> {
        body.cache_call_site(name, CallType::Normal)?;
        body.load_context();
        body.load_self();
        receiver.call(body)?;

        let param = match operand {
            Operand::Fixnum(value) => {
                body.method.ldc_long(value);
                JType::Long
            }
            Operand::Float(value) => {
                body.method.ldc_double(value);
                JType::Double
            }
        };
        body.method
            .invoke_virtual(class::CALL_SITE, "call", call_site_sig(&[param], false));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::Insn;
    use crate::invocation::{Arity, ArgumentsCallback};
    use crate::testutil::{compile_root, simple_scope};

    #[test]
    fn two_argument_call_uses_specific_signature() {
        let unit = compile_root(simple_scope(0), |body| {
            let call = Call::functional("puts").args(ArgumentsCallback::new(Arity::Fixed(2), |body| {
                body.create_new_fixnum(10);
                body.create_new_fixnum(20);
                Ok(())
            }));
            StandardInvocationCompiler.invoke_dynamic(body, call)
        })
        .unwrap();

        let method = unit.root().unwrap();
        let call = method
            .code
            .iter()
            .find_map(|insn| match insn {
                Insn::Invoke { owner, name, sig, .. } if owner == class::CALL_SITE => {
                    Some((name.clone(), sig.param_count()))
                }
                _ => None,
            })
            .unwrap();
        assert_eq!(call, ("call".to_string(), 5));
    }

    #[test]
    fn four_arguments_fall_back_to_varargs() {
        let unit = compile_root(simple_scope(0), |body| {
            let call = Call::functional("four").args(ArgumentsCallback::new(Arity::Fixed(4), |body| {
                body.method.push_int(4);
                body.method.new_array(class::VALUE);
                Ok(())
            }));
            StandardInvocationCompiler.invoke_dynamic(body, call)
        })
        .unwrap();

        assert_eq!(unit.root().unwrap().count_invocations("callVarargs"), 1);
    }

    #[test]
    fn super_forwards_the_current_block() {
        let unit = compile_root(simple_scope(0), |body| {
            StandardInvocationCompiler.invoke_dynamic(body, Call::new("initialize", CallType::Super))
        })
        .unwrap();

        let root = unit.root().unwrap();
        let call = root
            .code
            .iter()
            .find_map(|insn| match insn {
                Insn::Invoke { owner, sig, .. } if owner == class::CALL_SITE => Some(sig.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(call.params.last(), Some(&JType::BLOCK));
        assert_eq!(
            unit.descriptor.as_deref().map(|d| d.starts_with("super\u{FFFF}S")),
            Some(true)
        );
    }
}
