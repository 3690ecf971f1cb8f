//! Disassembler for emitted methods

use std::fmt::Write;

use super::insn::{Constant, Insn, InvokeKind};
use super::method::MethodCode;

/// Disassemble a finished method to a string
pub fn disassemble_method(method: &MethodCode) -> String {
    let mut output = String::new();

    let _ = writeln!(
        output,
        "== {}{} (stack {}, locals {}, ~{} bytes) ==",
        method.name,
        method.descriptor(),
        method.max_stack,
        method.max_locals,
        method.code_size
    );

    for (offset, insn) in method.code.iter().enumerate() {
        let _ = write!(output, "{offset:04} ");
        write_insn(&mut output, insn);
        output.push('\n');
    }

    for tc in &method.try_catches {
        let _ = writeln!(
            output,
            "try L{} .. L{} -> L{} {}",
            tc.start.id(),
            tc.end.id(),
            tc.handler.id(),
            tc.exception.unwrap_or("any")
        );
    }

    for local in &method.local_variables {
        let _ = writeln!(
            output,
            "local {:<16} slot {} L{} .. L{}",
            local.name,
            local.slot,
            local.start.id(),
            local.end.id()
        );
    }

    output
}

fn write_insn(output: &mut String, insn: &Insn) {
    let _ = match insn {
        Insn::Load(slot) => write!(output, "{:16} {slot}", "LOAD"),
        Insn::Store(slot) => write!(output, "{:16} {slot}", "STORE"),
        Insn::PushNull => write!(output, "PUSH_NULL"),
        Insn::PushInt(value) => write!(output, "{:16} {value}", "PUSH_INT"),
        Insn::Ldc(Constant::Str(s)) => write!(output, "{:16} {:?}", "LDC", s),
        Insn::Ldc(Constant::Long(v)) => write!(output, "{:16} {v}L", "LDC"),
        Insn::Ldc(Constant::Double(v)) => write!(output, "{:16} {v}D", "LDC"),
        Insn::Dup => write!(output, "DUP"),
        Insn::Swap => write!(output, "SWAP"),
        Insn::Pop => write!(output, "POP"),
        Insn::NewArray(ty) => write!(output, "{:16} {}", "NEW_ARRAY", ty.descriptor()),
        Insn::ArrayLoad => write!(output, "ARRAY_LOAD"),
        Insn::ArrayStore => write!(output, "ARRAY_STORE"),
        Insn::Invoke {
            kind,
            owner,
            name,
            sig,
        } => {
            let op = match kind {
                InvokeKind::Virtual => "INVOKE_VIRTUAL",
                InvokeKind::Interface => "INVOKE_INTERFACE",
                InvokeKind::Static => "INVOKE_STATIC",
            };
            write!(output, "{op:16} {owner}.{name}{sig}")
        }
        Insn::InvokeDynamic {
            name,
            sig,
            file,
            line,
            ..
        } => write!(output, "{:16} {name}{sig} ({file}:{line})", "INVOKE_DYNAMIC"),
        Insn::Label(label) => write!(output, "L{}:", label.id()),
        Insn::Goto(label) => write!(output, "{:16} L{}", "GOTO", label.id()),
        Insn::IfTrue(label) => write!(output, "{:16} L{}", "IF_TRUE", label.id()),
        Insn::IfFalse(label) => write!(output, "{:16} L{}", "IF_FALSE", label.id()),
        Insn::IfNull(label) => write!(output, "{:16} L{}", "IF_NULL", label.id()),
        Insn::IfNonNull(label) => write!(output, "{:16} L{}", "IF_NON_NULL", label.id()),
        Insn::Return => write!(output, "RETURN"),
        Insn::ReturnVoid => write!(output, "RETURN_VOID"),
        Insn::Throw => write!(output, "THROW"),
        Insn::Line(line) => write!(output, "{:16} {line}", "LINE"),
    };
}
