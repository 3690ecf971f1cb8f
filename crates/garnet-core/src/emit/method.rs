//! Method emitter - records one method body and finishes it into `MethodCode`

use std::fmt;

use super::insn::{Constant, Insn, InvokeKind, Label};
use super::types::{JType, Signature};
use crate::config::MAX_METHOD_SIZE;
use crate::error::{CompileError, CompileResult};

/// An exception-table entry: exceptions raised in `[start, end)` whose class
/// matches `exception` (any throwable when `None`) transfer to `handler`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryCatch {
    pub start: Label,
    pub end: Label,
    pub handler: Label,
    pub exception: Option<&'static str>,
}

/// Local-variable debug entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariable {
    pub name: String,
    pub slot: u16,
    pub start: Label,
    pub end: Label,
}

/// Builds the instruction stream of a single method
///
/// Slot 0 holds the owning unit (`this`); declared parameters follow in
/// slots `1..=n`.
pub struct MethodEmitter {
    /// Method name
    name: String,

    /// Declared signature
    signature: Signature,

    /// Instructions emitted so far
    code: Vec<Insn>,

    /// Bound position of each label, indexed by label id
    labels: Vec<Option<usize>>,

    /// Exception table
    try_catches: Vec<TryCatch>,

    /// Local-variable debug table
    local_variables: Vec<LocalVariable>,

    /// One past the highest local slot touched
    max_locals: u16,

    /// Estimated encoded size so far
    code_size: usize,

    /// Labels bound more than once
    rebound: Vec<Label>,
}

impl MethodEmitter {
    /// Start a new method
    pub fn new(name: impl Into<String>, signature: Signature) -> Self {
        let max_locals = signature.param_count() as u16 + 1;
        Self {
            name: name.into(),
            signature,
            code: Vec::new(),
            labels: Vec::new(),
            try_catches: Vec::new(),
            local_variables: Vec::new(),
            max_locals,
            code_size: 0,
            rebound: Vec::new(),
        }
    }

    /// Method name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared signature
    #[must_use]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Number of instructions emitted
    #[must_use]
    pub fn len(&self) -> usize {
        self.code.len()
    }

    /// Returns true if nothing has been emitted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Estimated encoded size so far
    #[must_use]
    pub fn code_size(&self) -> usize {
        self.code_size
    }

    /// Instructions emitted so far
    #[must_use]
    pub fn code(&self) -> &[Insn] {
        &self.code
    }

    /// Append an instruction
    pub fn emit(&mut self, insn: Insn) {
        if let Insn::Load(slot) | Insn::Store(slot) = insn {
            self.max_locals = self.max_locals.max(slot + 1);
        }
        self.code_size += insn.encoded_size();
        self.code.push(insn);
    }

    // ===== Labels =====

    /// Allocate a fresh, unbound label
    pub fn new_label(&mut self) -> Label {
        let label = Label(self.labels.len() as u32);
        self.labels.push(None);
        label
    }

    /// Bind a label at the current position
    pub fn mark(&mut self, label: Label) {
        let position = self.code.len();
        match self.labels.get_mut(label.0 as usize) {
            Some(slot @ None) => *slot = Some(position),
            _ => self.rebound.push(label),
        }
        self.code.push(Insn::Label(label));
    }

    /// Create a label and bind it here
    pub fn mark_new(&mut self) -> Label {
        let label = self.new_label();
        self.mark(label);
        label
    }

    // ===== Locals =====

    pub fn load(&mut self, slot: u16) {
        self.emit(Insn::Load(slot));
    }

    pub fn store(&mut self, slot: u16) {
        self.emit(Insn::Store(slot));
    }

    // ===== Constants =====

    pub fn push_null(&mut self) {
        self.emit(Insn::PushNull);
    }

    pub fn push_int(&mut self, value: i32) {
        self.emit(Insn::PushInt(value));
    }

    /// Push an index or count as an int
    pub fn push_index(&mut self, value: usize) {
        self.emit(Insn::PushInt(value as i32));
    }

    pub fn ldc_str(&mut self, value: impl Into<String>) {
        self.emit(Insn::Ldc(Constant::Str(value.into())));
    }

    pub fn ldc_long(&mut self, value: i64) {
        self.emit(Insn::Ldc(Constant::Long(value)));
    }

    pub fn ldc_double(&mut self, value: f64) {
        self.emit(Insn::Ldc(Constant::Double(value)));
    }

    // ===== Stack =====

    pub fn dup(&mut self) {
        self.emit(Insn::Dup);
    }

    pub fn swap(&mut self) {
        self.emit(Insn::Swap);
    }

    pub fn pop(&mut self) {
        self.emit(Insn::Pop);
    }

    // ===== Arrays =====

    /// Pop a length and push a new array of `elem`
    pub fn new_array(&mut self, elem: &'static str) {
        self.emit(Insn::NewArray(JType::Array(elem)));
    }

    pub fn array_load(&mut self) {
        self.emit(Insn::ArrayLoad);
    }

    pub fn array_store(&mut self) {
        self.emit(Insn::ArrayStore);
    }

    // ===== Calls =====

    pub fn invoke_virtual(&mut self, owner: impl Into<String>, name: impl Into<String>, sig: Signature) {
        self.invoke(InvokeKind::Virtual, owner, name, sig);
    }

    pub fn invoke_interface(&mut self, owner: impl Into<String>, name: impl Into<String>, sig: Signature) {
        self.invoke(InvokeKind::Interface, owner, name, sig);
    }

    pub fn invoke_static(&mut self, owner: impl Into<String>, name: impl Into<String>, sig: Signature) {
        self.invoke(InvokeKind::Static, owner, name, sig);
    }

    fn invoke(&mut self, kind: InvokeKind, owner: impl Into<String>, name: impl Into<String>, sig: Signature) {
        self.emit(Insn::Invoke {
            kind,
            owner: owner.into(),
            name: name.into(),
            sig,
        });
    }

    pub fn invoke_dynamic(
        &mut self,
        name: impl Into<String>,
        sig: Signature,
        bootstrap: &'static str,
        file: impl Into<String>,
        line: u32,
    ) {
        self.emit(Insn::InvokeDynamic {
            name: name.into(),
            sig,
            bootstrap,
            file: file.into(),
            line,
        });
    }

    // ===== Control Flow =====

    pub fn goto(&mut self, label: Label) {
        self.emit(Insn::Goto(label));
    }

    pub fn if_true(&mut self, label: Label) {
        self.emit(Insn::IfTrue(label));
    }

    pub fn if_false(&mut self, label: Label) {
        self.emit(Insn::IfFalse(label));
    }

    pub fn if_null(&mut self, label: Label) {
        self.emit(Insn::IfNull(label));
    }

    pub fn if_non_null(&mut self, label: Label) {
        self.emit(Insn::IfNonNull(label));
    }

    pub fn areturn(&mut self) {
        self.emit(Insn::Return);
    }

    pub fn return_void(&mut self) {
        self.emit(Insn::ReturnVoid);
    }

    pub fn athrow(&mut self) {
        self.emit(Insn::Throw);
    }

    // ===== Metadata =====

    pub fn line_number(&mut self, line: u32) {
        self.emit(Insn::Line(line));
    }

    pub fn try_catch(&mut self, start: Label, end: Label, handler: Label, exception: Option<&'static str>) {
        self.try_catches.push(TryCatch {
            start,
            end,
            handler,
            exception,
        });
    }

    pub fn local_variable(&mut self, name: impl Into<String>, slot: u16, start: Label, end: Label) {
        self.max_locals = self.max_locals.max(slot + 1);
        self.local_variables.push(LocalVariable {
            name: name.into(),
            slot,
            start,
            end,
        });
    }

    // ===== Finishing =====

    /// Resolve labels, compute the maximum stack depth and freeze the method
    pub fn end(self) -> CompileResult<MethodCode> {
        if let Some(label) = self.rebound.first() {
            return Err(CompileError::internal(format!(
                "label L{} bound twice in {}",
                label.0, self.name
            )));
        }

        let mut referenced = vec![false; self.labels.len()];
        let targets = self.code.iter().filter_map(Insn::branch_target);
        let regions = self
            .try_catches
            .iter()
            .flat_map(|tc| [tc.start, tc.end, tc.handler]);
        for label in targets.chain(regions) {
            if let Some(flag) = referenced.get_mut(label.0 as usize) {
                *flag = true;
            }
        }

        let mut labels = Vec::with_capacity(self.labels.len());
        for (id, position) in self.labels.iter().enumerate() {
            if position.is_none() && referenced[id] {
                return Err(CompileError::internal(format!(
                    "label L{id} used but never bound in {}",
                    self.name
                )));
            }
            labels.push(position.unwrap_or(usize::MAX));
        }

        if self.code_size > MAX_METHOD_SIZE {
            return Err(CompileError::not_compilable(format!(
                "method {} is {} bytes, over the {} byte limit",
                self.name, self.code_size, MAX_METHOD_SIZE
            )));
        }

        let max_stack = compute_max_stack(&self.name, &self.code, &labels, &self.try_catches)?;

        Ok(MethodCode {
            name: self.name,
            signature: self.signature,
            code: self.code,
            labels,
            try_catches: self.try_catches,
            local_variables: self.local_variables,
            max_stack,
            max_locals: self.max_locals,
            code_size: self.code_size,
        })
    }
}

impl fmt::Debug for MethodEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodEmitter")
            .field("name", &self.name)
            .field("signature", &self.signature.descriptor())
            .field("len", &self.code.len())
            .field("code_size", &self.code_size)
            .finish_non_exhaustive()
    }
}

/// Dataflow over the branch graph: every reachable instruction must be
/// entered with one consistent stack height.
fn compute_max_stack(
    name: &str,
    code: &[Insn],
    labels: &[usize],
    try_catches: &[TryCatch],
) -> CompileResult<usize> {
    let resolve = |label: Label| labels.get(label.0 as usize).copied().unwrap_or(usize::MAX);

    let mut heights: Vec<Option<usize>> = vec![None; code.len()];
    let mut worklist = vec![(0usize, 0usize)];
    for tc in try_catches {
        worklist.push((resolve(tc.handler), 1));
    }

    let mut max_stack = usize::from(!try_catches.is_empty());
    while let Some((position, height)) = worklist.pop() {
        if code.is_empty() {
            break;
        }
        let Some(insn) = code.get(position) else {
            return Err(CompileError::internal(format!(
                "control falls off the end of {name}"
            )));
        };

        match heights[position] {
            Some(existing) if existing == height => continue,
            Some(existing) => {
                return Err(CompileError::not_compilable(format!(
                    "inconsistent stack height at {position} in {name}: {existing} vs {height}"
                )));
            }
            None => heights[position] = Some(height),
        }

        let (pops, pushes) = insn.stack_effect();
        if height < pops {
            return Err(CompileError::internal(format!(
                "stack underflow at {position} ({insn:?}) in {name}"
            )));
        }
        let after = height - pops + pushes;
        max_stack = max_stack.max(after).max(height);

        if let Some(target) = insn.branch_target() {
            worklist.push((resolve(target), after));
        }
        if !insn.ends_block() {
            worklist.push((position + 1, after));
        }
    }

    Ok(max_stack)
}

/// A finished method body
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCode {
    pub name: String,
    pub signature: Signature,
    pub code: Vec<Insn>,

    /// Instruction position of each label, indexed by label id
    labels: Vec<usize>,

    pub try_catches: Vec<TryCatch>,
    pub local_variables: Vec<LocalVariable>,
    pub max_stack: usize,
    pub max_locals: u16,
    pub code_size: usize,
}

impl MethodCode {
    /// Instruction position a label is bound to
    #[must_use]
    pub fn label_position(&self, label: Label) -> Option<usize> {
        self.labels
            .get(label.0 as usize)
            .copied()
            .filter(|p| *p != usize::MAX)
    }

    /// Method descriptor
    #[must_use]
    pub fn descriptor(&self) -> String {
        self.signature.descriptor()
    }

    /// Names of every method invoked, in emission order
    #[must_use]
    pub fn invoked_names(&self) -> Vec<&str> {
        self.code
            .iter()
            .filter_map(|insn| match insn {
                Insn::Invoke { name, .. } | Insn::InvokeDynamic { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Number of invocations of `name`
    #[must_use]
    pub fn count_invocations(&self, name: &str) -> usize {
        self.invoked_names().iter().filter(|n| **n == name).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::types::sig;

    fn value_method() -> MethodEmitter {
        MethodEmitter::new("test", sig(JType::VALUE, &[JType::CONTEXT]))
    }

    #[test]
    fn max_stack_straight_line() {
        let mut m = value_method();
        m.load(1);
        m.push_int(1);
        m.push_int(2);
        m.pop();
        m.pop();
        m.areturn();

        let code = m.end().unwrap();
        assert_eq!(code.max_stack, 3);
        assert_eq!(code.max_locals, 2);
    }

    #[test]
    fn branches_merge_with_equal_height() {
        let mut m = value_method();
        let else_label = m.new_label();
        let done = m.new_label();
        m.push_int(0);
        m.if_false(else_label);
        m.push_null();
        m.goto(done);
        m.mark(else_label);
        m.load(1);
        m.mark(done);
        m.areturn();

        let code = m.end().unwrap();
        assert_eq!(code.max_stack, 1);
        assert_eq!(code.label_position(done), Some(6));
    }

    #[test]
    fn inconsistent_merge_is_rejected() {
        let mut m = value_method();
        let done = m.new_label();
        m.push_int(0);
        m.if_false(done);
        m.push_null();
        m.mark(done);
        m.push_null();
        m.areturn();

        let err = m.end().unwrap_err();
        assert!(err.is_not_compilable());
    }

    #[test]
    fn unbound_label_is_internal_error() {
        let mut m = value_method();
        let nowhere = m.new_label();
        m.goto(nowhere);

        assert!(matches!(m.end(), Err(CompileError::Internal(_))));
    }

    #[test]
    fn handler_entered_with_exception() {
        let mut m = value_method();
        let start = m.mark_new();
        m.push_null();
        let end = m.mark_new();
        m.areturn();
        let handler = m.mark_new();
        m.athrow();
        m.try_catch(start, end, handler, None);

        let code = m.end().unwrap();
        assert_eq!(code.max_stack, 1);
        assert_eq!(code.try_catches.len(), 1);
    }

    #[test]
    fn falling_off_the_end_is_internal_error() {
        let mut m = value_method();
        m.push_null();
        m.pop();

        assert!(matches!(m.end(), Err(CompileError::Internal(_))));
    }
}
