//! Dynamically-linked invocation with per-site inline caches

use super::{
    call_site_sig, Call, CallType, CompilerCallback, InvocationCompiler, Operand,
    StandardInvocationCompiler,
};
use crate::body::BodyCompiler;
use crate::emit::{class, sig, JType};
use crate::error::CompileResult;

/// Emits `invokedynamic` call instructions bound by the runtime linker.
/// The linker installs a polymorphic inline cache at each site; `super`
/// goes through a cached call site instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineCacheInvocationCompiler;

impl InvocationCompiler for InlineCacheInvocationCompiler {
    fn invoke_dynamic(&self, body: &mut BodyCompiler<'_>, mut call: Call<'_>) -> CompileResult<()> {
        let prefix = match call.call_type {
            CallType::Normal => "call",
            CallType::Functional => "fcall",
            CallType::Variable => "vcall",
            CallType::Super => return StandardInvocationCompiler.invoke_dynamic(body, call),
        };

        body.load_context();
        body.load_self();
        let params = call.arg_params();
        let has_block = call.emit_operands(body)?;

        let name = if call.iterator && has_block {
            format!("{prefix}Iter:{}", call.name)
        } else {
            format!("{prefix}:{}", call.name)
        };
        let file = body.script().source_file().to_string();
        let line = body.current_line();
        body.method.invoke_dynamic(
            name,
            call_site_sig(&params, has_block),
            class::LINKER,
            file,
            line,
        );
        Ok(())
    }

    fn invoke_fast_operator(
        &self,
        body: &mut BodyCompiler<'_>,
        name: &str,
        mut receiver: CompilerCallback<'_>,
        operand: Operand,
    ) -> CompileResult<()> {
        body.load_context();
        body.load_self();
        receiver.call(body)?;

        let (kind, param) = match operand {
            Operand::Fixnum(value) => {
                body.method.ldc_long(value);
                ("fixnumOperator", JType::Long)
            }
            Operand::Float(value) => {
                body.method.ldc_double(value);
                ("floatOperator", JType::Double)
            }
        };
        let file = body.script().source_file().to_string();
        let line = body.current_line();
        body.method.invoke_dynamic(
            format!("{kind}:{name}"),
            sig(
                JType::VALUE,
                &[JType::CONTEXT, JType::VALUE, JType::VALUE, param],
            ),
            class::LINKER,
            file,
            line,
        );
        Ok(())
    }
}
