//! Garnet Core - JIT bytecode compiler backend for the Garnet Ruby runtime
//!
//! This crate provides the compiler core:
//! - Emit: JVM-style instruction stream, labels, try/catch tables
//! - Cache: per-unit literal, constant and call-site pools
//! - Variables: stack-slot and heap-frame variable strategies
//! - Invocation: cached call-site and inline-cache call protocols
//! - Body: method, closure, class-body and chained-segment compilers
//! - Script: orchestration of one compiled unit
//! - VM: reference executor for compiled units

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Compiler configuration
pub mod config;

/// Compile-time errors
pub mod error;

/// Instruction emission - the assembler facade every compiler writes into
pub mod emit;

/// Lexical scope and static-analysis inputs from the front end
pub mod scope;

/// Local slot layout shared by every compiled body
pub mod frame;

/// Runtime value caching - literal pools, call sites and the initializer
pub mod cache;

/// Variable compilers - stack-based and heap-based storage strategies
pub mod variables;

/// Invocation compilers - call, attribute assignment, yield and case dispatch
pub mod invocation;

/// Body compilers - role-specific method framing and control flow
pub mod body;

/// Script compiler - orchestrates one compiled unit
pub mod script;

/// Compiled unit - the output of a finished script compiler
pub mod unit;

/// Reference executor for compiled units
pub mod vm;

/// Test utilities - helpers for compiling and running small units
pub mod testutil;

/// Convenience re-export of the script compiler
pub use script::ScriptCompiler;

/// Convenience re-export of the body compiler
pub use body::BodyCompiler;

/// Convenience re-export of configuration
pub use config::CompilerConfig;

/// Convenience re-export of error types
pub use error::{CompileError, CompileResult};

/// Convenience re-export of the compiled unit
pub use unit::CompiledUnit;

/// Convenience re-export of the VM
pub use vm::VM;
