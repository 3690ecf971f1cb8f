//! Reference executor for compiled units
//!
//! This module runs the instruction streams a `ScriptCompiler` produces,
//! providing the runtime classes the compiled code calls into: the unit's
//! cache accessors, the helper methods, thread context, dynamic scopes,
//! blocks and call sites. Ruby method resolution is delegated to a `Host`.
//!
//! The executor exists to check compiled code end to end; it trades speed
//! for strictness and rejects operand-stack overflows, wrongly typed
//! operands and unknown runtime methods.

mod accessors;
mod cache;
mod error;
mod helpers;
mod host;
mod value;

pub use cache::RuntimeCache;
pub use error::{RuntimeError, RuntimeErrorKind, RuntimeResult, StackFrame};
pub use host::{BasicHost, Host, HostCall};
pub use value::{Block, BlockBody, ByteList, DynamicScope, Inspect, RObject, RString, Regexp, Value};

use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::emit::{class, Constant, Insn, InvokeKind, JType, Label, MethodCode, Signature};
use crate::frame::FrameLayout;
use crate::invocation::CallType;
use crate::unit::CompiledUnit;

/// Maximum call depth
const MAX_FRAMES: usize = 256;

/// One activation of a compiled method
struct Frame<'m> {
    method: &'m MethodCode,
    locals: Vec<Value>,
    stack: Vec<Value>,
    pc: usize,
    line: u32,
}

impl<'m> Frame<'m> {
    fn new(method: &'m MethodCode, args: Vec<Value>) -> Self {
        let mut locals = args;
        let size = usize::from(method.max_locals).max(locals.len());
        locals.resize(size, Value::Null);
        Self {
            method,
            locals,
            stack: Vec::with_capacity(method.max_stack),
            pc: 0,
            line: 0,
        }
    }

    fn push(&mut self, value: Value) -> RuntimeResult<()> {
        if self.stack.len() >= self.method.max_stack {
            return Err(internal(format!(
                "operand stack of {} exceeds its declared maximum {}",
                self.method.name, self.method.max_stack
            )));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> RuntimeResult<Value> {
        self.stack
            .pop()
            .ok_or_else(|| RuntimeError::new(RuntimeErrorKind::StackUnderflow))
    }

    fn pop_n(&mut self, n: usize) -> RuntimeResult<Vec<Value>> {
        let at = self
            .stack
            .len()
            .checked_sub(n)
            .ok_or_else(|| RuntimeError::new(RuntimeErrorKind::StackUnderflow))?;
        Ok(self.stack.split_off(at))
    }

    fn local(&self, slot: u16) -> RuntimeResult<Value> {
        self.locals
            .get(usize::from(slot))
            .cloned()
            .ok_or_else(|| internal(format!("load of slot {slot} past max locals")))
    }

    fn jump(&mut self, label: Label) -> RuntimeResult<()> {
        self.pc = self
            .method
            .label_position(label)
            .ok_or_else(|| internal(format!("unbound label L{}", label.id())))?;
        Ok(())
    }
}

/// Executes the methods of one compiled unit
pub struct VM {
    unit: Rc<CompiledUnit>,
    /// (name, descriptor) -> index into the unit's methods
    methods: HashMap<(String, String), usize>,
    host: Rc<dyn Host>,
    cache: RuntimeCache,
    /// Dynamic scopes pushed at method, block and class-body entry
    scopes: Vec<Rc<DynamicScope>>,
    depth: usize,
    /// Exception currently being rescued
    error_info: Option<Value>,
}

impl VM {
    /// Load a unit: run its constructor, which initializes the runtime cache
    pub fn new(unit: CompiledUnit, host: Rc<dyn Host>) -> RuntimeResult<Self> {
        let methods = unit
            .methods
            .iter()
            .enumerate()
            .map(|(i, m)| ((m.name.clone(), m.descriptor()), i))
            .collect();
        let unit = Rc::new(unit);
        let mut vm = Self {
            unit: Rc::clone(&unit),
            methods,
            host,
            cache: RuntimeCache::default(),
            scopes: vec![Rc::new(DynamicScope::new(None))],
            depth: 0,
            error_info: None,
        };
        vm.execute(&unit.init, vec![Value::Unit])?;
        debug!(
            target: "garnet::vm",
            unit = %unit.class_name,
            methods = unit.methods.len(),
            call_sites = vm.cache.call_sites().len(),
            "loaded unit"
        );
        Ok(vm)
    }

    #[must_use]
    pub fn unit(&self) -> &CompiledUnit {
        &self.unit
    }

    #[must_use]
    pub fn cache(&self) -> &RuntimeCache {
        &self.cache
    }

    #[must_use]
    pub fn host(&self) -> Rc<dyn Host> {
        Rc::clone(&self.host)
    }

    /// The exception being handled by the innermost running rescue clause
    #[must_use]
    pub fn error_info(&self) -> Option<&Value> {
        self.error_info.as_ref()
    }

    /// Call the method defined under `name` through its boxed entry
    pub fn invoke(
        &mut self,
        name: &str,
        self_value: Value,
        args: Vec<Value>,
        block: Option<Rc<Block>>,
    ) -> RuntimeResult<Value> {
        let unit = Rc::clone(&self.unit);
        let entry = unit.entry_point(name).ok_or_else(|| {
            RuntimeError::new(RuntimeErrorKind::NoMethodError {
                name: name.to_string(),
                receiver: self_value.type_name(),
            })
        })?;
        let block = block.map_or(Value::Null, Value::Block);
        self.call_method(
            &entry.name,
            &FrameLayout::boxed().signature(),
            vec![Value::Context, self_value, Value::values(args), block],
        )
    }

    /// Run the first method of the unit with a fresh main object as self
    pub fn run(&mut self) -> RuntimeResult<Value> {
        let name = self
            .unit
            .entry_points
            .first()
            .map(|e| e.ruby_name.clone())
            .ok_or_else(|| internal("unit has no entry point".to_string()))?;
        let main = Value::Object(Rc::new(RObject::new("Object")));
        self.invoke(&name, main, Vec::new(), None)
    }

    /// Call a unit method by name and signature in a fresh scope. `args`
    /// are the parameters after `this`.
    pub fn call_method(&mut self, name: &str, signature: &Signature, args: Vec<Value>) -> RuntimeResult<Value> {
        let unit = Rc::clone(&self.unit);
        let method = self.lookup(&unit, name, signature)?;
        self.with_scope(None, |vm| vm.execute(method, with_this(args)))
    }

    /// Yield to a block: no values pass null, one value passes it as is,
    /// several pass an array the block destructures
    pub fn yield_block(&mut self, block: &Block, mut args: Vec<Value>) -> RuntimeResult<Value> {
        let value = match args.len() {
            0 => Value::Null,
            1 => args.pop().unwrap_or(Value::Null),
            _ => Value::array(args),
        };
        self.yield_value(block, value)
    }

    fn yield_value(&mut self, block: &Block, value: Value) -> RuntimeResult<Value> {
        let unit = Rc::clone(&self.unit);
        let method = self.lookup(&unit, &block.body.method, &FrameLayout::closure().signature())?;
        let args = vec![
            Value::Unit,
            Value::Context,
            block.self_value.clone(),
            value,
            Value::Null,
        ];
        self.with_scope(Some(Rc::clone(&block.scope)), |vm| vm.execute(method, args))
    }

    /// Run a class body with the class as self
    fn run_class_body(&mut self, class_value: Value, method: &str) -> RuntimeResult<Value> {
        self.call_method(
            method,
            &FrameLayout::boxed().signature(),
            vec![Value::Context, class_value, Value::values(Vec::new()), Value::Null],
        )
    }

    fn lookup<'u>(&self, unit: &'u CompiledUnit, name: &str, signature: &Signature) -> RuntimeResult<&'u MethodCode> {
        self.methods
            .get(&(name.to_string(), signature.descriptor()))
            .and_then(|i| unit.methods.get(*i))
            .ok_or_else(|| {
                RuntimeError::new(RuntimeErrorKind::UnknownMethod {
                    owner: unit.class_name.clone(),
                    name: format!("{name}{}", signature.descriptor()),
                })
            })
    }

    fn with_scope<T>(&mut self, parent: Option<Rc<DynamicScope>>, f: impl FnOnce(&mut Self) -> T) -> T {
        self.scopes.push(Rc::new(DynamicScope::new(parent)));
        let result = f(self);
        self.scopes.pop();
        result
    }

    fn current_scope(&self) -> RuntimeResult<Rc<DynamicScope>> {
        self.scopes
            .last()
            .cloned()
            .ok_or_else(|| internal("no current scope".to_string()))
    }

    fn call_host(&mut self, call: HostCall) -> RuntimeResult<Value> {
        let host = Rc::clone(&self.host);
        host.call(self, call)
    }

    // ===== Execution =====

    fn execute(&mut self, method: &MethodCode, args: Vec<Value>) -> RuntimeResult<Value> {
        if self.depth >= MAX_FRAMES {
            return Err(RuntimeError::new(RuntimeErrorKind::StackOverflow));
        }
        self.depth += 1;
        trace!(target: "garnet::vm", method = %method.name, depth = self.depth, "enter");
        let result = self.run_frame(Frame::new(method, args));
        self.depth -= 1;
        result
    }

    fn run_frame(&mut self, mut frame: Frame<'_>) -> RuntimeResult<Value> {
        loop {
            let at = frame.pc;
            match self.step(&mut frame) {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => {}
                Err(err) => match handler_for(frame.method, at, &err) {
                    Some(handler) => {
                        trace!(target: "garnet::vm", method = %frame.method.name, at, handler, "caught");
                        if err.kind.is_raise() {
                            self.error_info = Some(exception_value(&err));
                        }
                        frame.stack.clear();
                        frame.push(Value::Throwable(Rc::new(err)))?;
                        frame.pc = handler;
                    }
                    None if err.kind.is_jump() => return Err(err),
                    None => {
                        let source = self.unit.source_file.clone();
                        return Err(err.with_frame(StackFrame::new(
                            frame.method.name.clone(),
                            frame.line,
                            source,
                        )));
                    }
                },
            }
        }
    }

    /// Execute one instruction; returns the method's result when it returns
    fn step(&mut self, frame: &mut Frame<'_>) -> RuntimeResult<Option<Value>> {
        let method = frame.method;
        let insn = method
            .code
            .get(frame.pc)
            .ok_or_else(|| internal(format!("fell off the end of {}", method.name)))?;
        frame.pc += 1;

        match insn {
            Insn::Load(slot) => {
                let value = frame.local(*slot)?;
                frame.push(value)?;
            }
            Insn::Store(slot) => {
                let value = frame.pop()?;
                let slot = usize::from(*slot);
                if slot >= frame.locals.len() {
                    return Err(internal(format!("store to slot {slot} past max locals")));
                }
                frame.locals[slot] = value;
            }
            Insn::PushNull => frame.push(Value::Null)?,
            Insn::PushInt(n) => frame.push(Value::Int(*n))?,
            Insn::Ldc(constant) => frame.push(match constant {
                Constant::Str(s) => Value::Text(Rc::from(s.as_str())),
                Constant::Long(n) => Value::Long(*n),
                Constant::Double(d) => Value::Double(*d),
            })?,
            Insn::Dup => {
                let top = frame.pop()?;
                frame.push(top.clone())?;
                frame.push(top)?;
            }
            Insn::Swap => {
                let top = frame.pop()?;
                let below = frame.pop()?;
                frame.push(top)?;
                frame.push(below)?;
            }
            Insn::Pop => {
                frame.pop()?;
            }
            Insn::NewArray(_) => {
                let len = frame.pop()?.as_index("newarray")?;
                frame.push(Value::values(vec![Value::Null; len]))?;
            }
            Insn::ArrayLoad => {
                let index = frame.pop()?.as_index("aaload")?;
                let array = frame.pop()?.as_values("aaload")?;
                let value = array
                    .borrow()
                    .get(index)
                    .cloned()
                    .ok_or_else(|| internal(format!("array index {index} out of bounds")))?;
                frame.push(value)?;
            }
            Insn::ArrayStore => {
                let value = frame.pop()?;
                let index = frame.pop()?.as_index("aastore")?;
                let array = frame.pop()?.as_values("aastore")?;
                let mut array = array.borrow_mut();
                let slot = array
                    .get_mut(index)
                    .ok_or_else(|| internal(format!("array index {index} out of bounds")))?;
                *slot = value;
            }
            Insn::Invoke { kind, owner, name, sig } => {
                let args = frame.pop_n(sig.param_count())?;
                let receiver = match kind {
                    InvokeKind::Static => Value::Null,
                    InvokeKind::Virtual | InvokeKind::Interface => frame.pop()?,
                };
                let result = self.invoke_runtime(owner, name, sig, receiver, args)?;
                if sig.returns_value() {
                    frame.push(result)?;
                }
            }
            Insn::InvokeDynamic { name, sig, .. } => {
                let args = frame.pop_n(sig.param_count())?;
                let result = self.invoke_linked(name, sig, args)?;
                frame.push(result)?;
            }
            Insn::Label(_) => {}
            Insn::Goto(label) => frame.jump(*label)?,
            Insn::IfTrue(label) => {
                if frame.pop()?.as_int("ifne")? != 0 {
                    frame.jump(*label)?;
                }
            }
            Insn::IfFalse(label) => {
                if frame.pop()?.as_int("ifeq")? == 0 {
                    frame.jump(*label)?;
                }
            }
            Insn::IfNull(label) => {
                if frame.pop()?.is_null() {
                    frame.jump(*label)?;
                }
            }
            Insn::IfNonNull(label) => {
                if !frame.pop()?.is_null() {
                    frame.jump(*label)?;
                }
            }
            Insn::Return => return frame.pop().map(Some),
            Insn::ReturnVoid => return Ok(Some(Value::Null)),
            Insn::Throw => {
                let throwable = frame.pop()?.as_throwable("athrow")?;
                return Err((*throwable).clone());
            }
            Insn::Line(line) => frame.line = *line,
        }
        Ok(None)
    }

    // ===== Runtime Classes =====

    fn invoke_runtime(
        &mut self,
        owner: &str,
        name: &str,
        sig: &Signature,
        receiver: Value,
        args: Vec<Value>,
    ) -> RuntimeResult<Value> {
        match owner {
            class::HELPERS => self.helper(name, args),
            class::SCRIPT => self.script_method(name, args),
            class::FIXNUM if name == "newFixnum" => match args.as_slice() {
                [_, value] => Ok(Value::Fixnum(value.as_long("newFixnum")?)),
                _ => Err(bad_arguments(owner, name)),
            },
            class::CONTEXT => match name {
                "getRuntime" => Ok(Value::Runtime),
                "getCurrentScope" => Ok(Value::Scope(self.current_scope()?)),
                _ => Err(unknown(owner, name)),
            },
            class::RUNTIME => match (name, args.as_slice()) {
                ("getNil", []) => Ok(Value::Nil),
                ("getTrue", []) => Ok(Value::Bool(true)),
                ("getFalse", []) => Ok(Value::Bool(false)),
                ("getEncoding", [Value::Encoding(name)]) => Ok(Value::RubyEncoding(Rc::clone(name))),
                _ => Err(unknown(owner, name)),
            },
            class::DYNAMIC_SCOPE => self.scope_method(name, &receiver, args),
            class::BLOCK => self.block_method(name, &receiver, args),
            class::CALL_SITE => match receiver {
                Value::CallSite(index) => {
                    let (site, call_type) = self.cache.call_site(index)?.clone();
                    let params = sig.params.get(3..).unwrap_or_default();
                    self.dispatch_call(site, call_type, name.ends_with("Iter"), params, args)
                }
                other => Err(RuntimeError::new(RuntimeErrorKind::TypeMismatch {
                    expected: "CallSite",
                    got: other.type_name(),
                    operation: "call",
                })),
            },
            class::VALUE if name == "isTrue" => Ok(Value::Int(i32::from(receiver.is_truthy()))),
            class::RAISE_EXCEPTION if name == "getException" => {
                let err = receiver.as_throwable("getException")?;
                Ok(exception_value(&err))
            }
            unit if unit == self.unit.class_name => {
                let target = Rc::clone(&self.unit);
                let method = self.lookup(&target, name, sig)?;
                self.execute(method, with_this(args))
            }
            _ => Err(unknown(owner, name)),
        }
    }

    fn scope_method(&mut self, name: &str, receiver: &Value, args: Vec<Value>) -> RuntimeResult<Value> {
        let scope = receiver.as_scope(class::DYNAMIC_SCOPE)?;
        match (name, args.as_slice()) {
            ("setValueDepthZero", [value, index]) => {
                scope.set_value(index.as_index("setValueDepthZero")?, 0, value.clone())?;
                Ok(value.clone())
            }
            ("setValue", [value, index, depth]) => {
                scope.set_value(index.as_index("setValue")?, depth.as_index("setValue")?, value.clone())?;
                Ok(value.clone())
            }
            ("getValueDepthZeroOrNil", [index, _nil]) => scope.get_value_or_nil(index.as_index("getValue")?, 0),
            ("getValueOrNil", [index, depth, _nil]) => {
                scope.get_value_or_nil(index.as_index("getValue")?, depth.as_index("getValue")?)
            }
            _ => Err(unknown(class::DYNAMIC_SCOPE, name)),
        }
    }

    fn block_method(&mut self, name: &str, receiver: &Value, mut args: Vec<Value>) -> RuntimeResult<Value> {
        let block = receiver.as_block(class::BLOCK)?.ok_or_else(|| {
            RuntimeError::new(RuntimeErrorKind::LocalJumpError {
                reason: "yield",
                value: Value::Nil,
            })
        })?;
        if args.is_empty() {
            return Err(bad_arguments(class::BLOCK, name));
        }
        args.remove(0);
        match name {
            "yieldSpecific" => self.yield_block(&block, args),
            "yield" | "yieldArray" => {
                let value = args.pop().unwrap_or(Value::Null);
                self.yield_value(&block, value)
            }
            _ => Err(unknown(class::BLOCK, name)),
        }
    }

    /// An inline-cache call: `call:name`, `fcallIter:name`, `fixnumOperator:+` ...
    fn invoke_linked(&mut self, name: &str, sig: &Signature, args: Vec<Value>) -> RuntimeResult<Value> {
        let (kind, method) = name
            .split_once(':')
            .ok_or_else(|| internal(format!("malformed dynamic call {name}")))?;
        let (call_type, iter) = match kind {
            "call" => (CallType::Normal, false),
            "callIter" => (CallType::Normal, true),
            "fcall" => (CallType::Functional, false),
            "fcallIter" => (CallType::Functional, true),
            "vcall" => (CallType::Variable, false),
            "vcallIter" => (CallType::Variable, true),
            "fixnumOperator" | "floatOperator" => (CallType::Normal, false),
            _ => return Err(unknown(class::LINKER, name)),
        };
        let params = sig.params.get(3..).unwrap_or_default();
        self.dispatch_call(method.to_string(), call_type, iter, params, args)
    }

    /// Common tail of call sites and linked calls: `args` is
    /// `[context, self, receiver, operands...]` typed by `params`
    fn dispatch_call(
        &mut self,
        name: String,
        call_type: CallType,
        iter: bool,
        params: &[JType],
        args: Vec<Value>,
    ) -> RuntimeResult<Value> {
        let [_, caller_self, receiver, operands @ ..] = args.as_slice() else {
            return Err(internal(format!("call to {name} without context, self and receiver")));
        };

        let mut call_args = Vec::with_capacity(operands.len());
        let mut block = None;
        for (param, operand) in params.iter().zip(operands) {
            match *param {
                JType::Long => call_args.push(Value::Fixnum(operand.as_long("call")?)),
                JType::Double => call_args.push(Value::Float(operand.as_double("call")?)),
                p if p == JType::VALUE_ARRAY => {
                    call_args.extend(operand.as_values("call")?.borrow().iter().cloned());
                }
                p if p == JType::BLOCK => block = operand.as_block("call")?,
                _ => call_args.push(operand.clone()),
            }
        }

        let call = HostCall {
            name,
            call_type,
            caller_self: caller_self.clone(),
            receiver: receiver.clone(),
            args: call_args,
            block,
        };
        match self.call_host(call) {
            Err(err) if iter => match err.kind {
                RuntimeErrorKind::BreakJump(value) => Ok(value),
                _ => Err(err),
            },
            result => result,
        }
    }
}

impl std::fmt::Debug for VM {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VM")
            .field("unit", &self.unit.class_name)
            .field("depth", &self.depth)
            .field("scopes", &self.scopes.len())
            .finish_non_exhaustive()
    }
}

fn with_this(args: Vec<Value>) -> Vec<Value> {
    let mut locals = Vec::with_capacity(args.len() + 1);
    locals.push(Value::Unit);
    locals.extend(args);
    locals
}

/// First exception-table entry covering `at` that catches `err`
fn handler_for(method: &MethodCode, at: usize, err: &RuntimeError) -> Option<usize> {
    method.try_catches.iter().find_map(|tc| {
        let start = method.label_position(tc.start)?;
        let end = method.label_position(tc.end)?;
        (start <= at && at < end && err.is_caught_by(tc.exception))
            .then(|| method.label_position(tc.handler))
            .flatten()
    })
}

/// The Ruby-level exception object of a raised error
fn exception_value(err: &RuntimeError) -> Value {
    match &err.kind {
        RuntimeErrorKind::Raise(value) => value.clone(),
        other => Value::string(&other.to_string()),
    }
}

fn internal(message: String) -> RuntimeError {
    RuntimeError::new(RuntimeErrorKind::Internal(message))
}

fn unknown(owner: &str, name: &str) -> RuntimeError {
    RuntimeError::new(RuntimeErrorKind::UnknownMethod {
        owner: owner.to_string(),
        name: name.to_string(),
    })
}

fn bad_arguments(owner: &str, name: &str) -> RuntimeError {
    internal(format!("wrong operands for {owner}.{name}"))
}

/// A throwable carrying `kind`
fn throwable(kind: RuntimeErrorKind) -> Value {
    Value::Throwable(Rc::new(RuntimeError::new(kind)))
}
