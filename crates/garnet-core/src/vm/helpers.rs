//! Static helper routines called from compiled code

use std::rc::Rc;

use super::value::{Block, Value};
use super::{bad_arguments, internal, throwable, unknown, RuntimeError, RuntimeErrorKind, RuntimeResult, VM};
use crate::emit::{class, JType};

impl VM {
    pub(super) fn helper(&mut self, name: &str, args: Vec<Value>) -> RuntimeResult<Value> {
        match (name, args.as_slice()) {
            // ===== Arguments =====
            ("checkArgumentCount", [_, args, required, max]) => {
                let given = args.as_values("checkArgumentCount")?.borrow().len();
                let required = required.as_index("checkArgumentCount")?;
                let max = usize::try_from(max.as_int("checkArgumentCount")?).ok();
                if given < required || max.is_some_and(|max| given > max) {
                    return Err(RuntimeError::new(RuntimeErrorKind::ArgumentError { given, required, max }));
                }
                Ok(Value::Int(i32::try_from(given).unwrap_or(i32::MAX)))
            }
            ("optionalArgument", [args, index, nil]) => {
                let index = index.as_index("optionalArgument")?;
                Ok(args.as_values("optionalArgument")?.borrow().get(index).cloned().unwrap_or_else(|| nil.clone()))
            }
            ("restArgument", [args, index]) => {
                let index = index.as_index("restArgument")?;
                let rest = args.as_values("restArgument")?.borrow().iter().skip(index).cloned().collect();
                Ok(Value::array(rest))
            }
            ("nullToNil", [value, nil]) => Ok(if value.is_null() { nil.clone() } else { value.clone() }),
            ("blockArgs", [value, count]) => {
                let mut values = match value {
                    Value::Null => Vec::new(),
                    Value::Array(items) | Value::Values(items) => items.borrow().clone(),
                    other => vec![other.clone()],
                };
                let count = count.as_index("blockArgs")?;
                if values.len() < count {
                    values.resize(count, Value::Nil);
                }
                Ok(Value::values(values))
            }

            // ===== Blocks and Arrays =====
            ("createBlock", [_, self_value, Value::BlockBody(body)]) => Ok(Value::Block(Rc::new(Block {
                body: Rc::clone(body),
                self_value: self_value.clone(),
                scope: self.current_scope()?,
            }))),
            ("newArray", [_, values]) => Ok(Value::array(values.as_values("newArray")?.borrow().clone())),
            ("constructObjectArray", values) => Ok(Value::values(values.to_vec())),
            ("appendToObjectArray", [values, value]) => {
                let mut items = values.as_values("appendToObjectArray")?.borrow().clone();
                items.push(value.clone());
                Ok(Value::values(items))
            }

            // ===== Jumps =====
            ("returnJump", [value, _]) => Ok(throwable(RuntimeErrorKind::ReturnJump {
                value: value.clone(),
                target: self.current_scope()?.method_scope(),
            })),
            ("breakJump", [_, value]) => Ok(throwable(RuntimeErrorKind::BreakJump(value.clone()))),
            ("nextJump", [value]) => Ok(throwable(RuntimeErrorKind::NextJump(value.clone()))),
            ("redoJump", []) => Ok(throwable(RuntimeErrorKind::RedoJump)),
            ("breakLocalJumpError", [value, _]) => Ok(local_jump_error("break", value.clone())),
            ("nextLocalJumpError", [value, _]) => Ok(local_jump_error("next", value.clone())),
            ("redoLocalJumpError", [_]) => Ok(local_jump_error("redo", Value::Nil)),
            ("handleReturnJump", [jump, _]) => {
                let err = jump.as_throwable("handleReturnJump")?;
                let home = self.current_scope()?.method_scope();
                match &err.kind {
                    RuntimeErrorKind::ReturnJump { value, target } if Rc::ptr_eq(target, &home) => Ok(value.clone()),
                    _ => Err((*err).clone()),
                }
            }
            ("handleNextJump", [jump]) => {
                let err = jump.as_throwable("handleNextJump")?;
                match &err.kind {
                    RuntimeErrorKind::NextJump(value) => Ok(value.clone()),
                    _ => Err((*err).clone()),
                }
            }
            ("clearErrorInfo", [_]) => {
                self.error_info = None;
                Ok(Value::Null)
            }

            // ===== Case / When =====
            ("invokeEqqForCaselessWhen", receivers) => {
                let hit = spread(receivers)?.iter().any(Value::is_truthy);
                Ok(Value::Int(i32::from(hit)))
            }
            ("invokeEqqForCaseWhen", [Value::CallSite(site), context, self_value, argument, receivers @ ..]) => {
                let (site_name, call_type) = self.cache.call_site(*site)?.clone();
                for receiver in spread(receivers)? {
                    let args = vec![context.clone(), self_value.clone(), receiver, argument.clone()];
                    let params = [JType::VALUE];
                    if self
                        .dispatch_call(site_name.clone(), call_type, false, &params, args)?
                        .is_truthy()
                    {
                        return Ok(Value::Int(1));
                    }
                }
                Ok(Value::Int(0))
            }

            // ===== Classes =====
            ("defineClass", [_, _, class_name, superclass]) => {
                let class_name = class_name.as_text("defineClass")?;
                let host = self.host();
                host.define_class(&class_name, superclass)
            }
            ("invokeClassBody", [_, class_value, _, method]) => {
                let method = method.as_text("invokeClassBody")?;
                self.run_class_body(class_value.clone(), &method)
            }

            (name, _) if is_helper(name) => Err(bad_arguments(class::HELPERS, name)),
            (name, _) => Err(unknown(class::HELPERS, name)),
        }
    }
}

fn local_jump_error(reason: &'static str, value: Value) -> Value {
    throwable(RuntimeErrorKind::LocalJumpError { reason, value })
}

/// `when` receivers arrive individually or as one `Value[]`
fn spread(receivers: &[Value]) -> RuntimeResult<Vec<Value>> {
    match receivers {
        [Value::Values(items)] => Ok(items.borrow().clone()),
        [Value::Values(_), ..] => Err(internal("mixed when receivers".to_string())),
        values => Ok(values.to_vec()),
    }
}

fn is_helper(name: &str) -> bool {
    matches!(
        name,
        "checkArgumentCount"
            | "optionalArgument"
            | "restArgument"
            | "nullToNil"
            | "blockArgs"
            | "createBlock"
            | "newArray"
            | "appendToObjectArray"
            | "returnJump"
            | "breakJump"
            | "nextJump"
            | "redoJump"
            | "breakLocalJumpError"
            | "nextLocalJumpError"
            | "redoLocalJumpError"
            | "handleReturnJump"
            | "handleNextJump"
            | "clearErrorInfo"
            | "invokeEqqForCaseWhen"
            | "defineClass"
            | "invokeClassBody"
    )
}
