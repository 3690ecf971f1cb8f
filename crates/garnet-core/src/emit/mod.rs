//! Instruction emission for compiled units
//!
//! This module provides:
//! - `Insn`: the stack-based instruction set
//! - `MethodEmitter`: builds one method, tracking labels, the exception
//!   table, local-variable debug entries and an encoded-size estimate
//! - `MethodCode`: a finished method with its computed max stack and locals
//! - `JType` / `Signature`: type and method descriptors
//! - Disassembler utilities for debugging

mod debug;
mod insn;
mod method;
pub mod types;

pub use debug::disassemble_method;
pub use insn::{Constant, Insn, InvokeKind, Label};
pub use method::{LocalVariable, MethodCode, MethodEmitter, TryCatch};
pub use types::{class, sig, JType, Signature};
