//! The compiled unit's base class: runtime cache setup and accessors
//!
//! Accessors come in two shapes. `getSymbol3(ctx, "name")` carries its slot
//! index in the method name; `getSymbol(ctx, 42, "name")` passes it after
//! the leading arguments.

use std::cell::RefCell;
use std::rc::Rc;

use super::cache::RuntimeCache;
use super::value::{RString, Regexp, Value};
use super::{bad_arguments, unknown, Host, RuntimeError, RuntimeErrorKind, RuntimeResult, VM};
use crate::cache::{BlockDescriptor, CacheKind};
use crate::emit::class;
use crate::scope::StaticScope;

/// A decoded accessor call
struct Access<'a> {
    stem: &'a str,
    index: usize,
    leading: &'a [Value],
    trailing: &'a [Value],
}

impl VM {
    pub(super) fn script_method(&mut self, name: &str, args: Vec<Value>) -> RuntimeResult<Value> {
        match (name, args.as_slice()) {
            ("initRuntimeCache", []) => {
                self.cache = RuntimeCache::default();
                Ok(Value::Null)
            }
            ("initFromDescriptor", [descriptor]) => {
                let descriptor = descriptor.as_text("initFromDescriptor")?;
                self.cache = RuntimeCache::from_descriptor(&descriptor)?;
                Ok(Value::Null)
            }
            ("setEncoding", [index, encoding]) => {
                let encoding = encoding.as_text("setEncoding")?;
                self.cache.set_encoding(index.as_index("setEncoding")?, &encoding)?;
                Ok(Value::Null)
            }
            ("setByteList", [index, raw, Value::Encoding(encoding)]) => {
                let raw = raw.as_text("setByteList")?;
                self.cache
                    .set_byte_list(index.as_index("setByteList")?, &raw, Rc::clone(encoding))?;
                Ok(Value::Null)
            }
            ("getCachedRegexp", [index]) => Ok(self
                .cache
                .get(CacheKind::Regexp, index.as_index("getCachedRegexp")?)?
                .unwrap_or(Value::Null)),
            ("cacheRegexp", [Value::Str(pattern), index, options]) => {
                let source = pattern.borrow().to_string_lossy();
                let options = options.as_int("cacheRegexp")?;
                self.cache.get_or_init(CacheKind::Regexp, index.as_index("cacheRegexp")?, || {
                    Ok(Value::Regexp(Rc::new(Regexp { source, options })))
                })
            }
            _ => {
                let access = split_accessor(name, &args)?;
                self.access(access)
            }
        }
    }

    fn access(&mut self, access: Access<'_>) -> RuntimeResult<Value> {
        let Access {
            stem,
            index,
            leading,
            trailing,
        } = access;

        match (stem, leading, trailing) {
            ("getCallSite", [], []) => {
                self.cache.call_site(index)?;
                Ok(Value::CallSite(index))
            }
            ("getByteList", [], []) => Ok(Value::ByteList(self.cache.byte_list(index)?)),
            ("getEncoding", [], []) => Ok(Value::Encoding(self.cache.encoding(index)?)),

            // ===== Literals =====
            ("getSymbol", [_], [name]) => {
                let name = name.as_text("getSymbol")?;
                self.cache
                    .get_or_init(CacheKind::Symbol, index, || Ok(Value::Symbol(name)))
            }
            ("getFixnum", [_], [value]) => {
                let value = value.as_long("getFixnum")?;
                self.cache
                    .get_or_init(CacheKind::Fixnum, index, || Ok(Value::Fixnum(value)))
            }
            ("getFloat", [_], [value]) => {
                let value = value.as_double("getFloat")?;
                self.cache
                    .get_or_init(CacheKind::Float, index, || Ok(Value::Float(value)))
            }
            ("getBigInteger", [_], [hex]) => {
                let hex = hex.as_text("getBigInteger")?;
                self.cache
                    .get_or_init(CacheKind::BigInteger, index, || Ok(Value::Bignum(hex)))
            }
            ("getString", [_], []) => {
                let list = self.cache.byte_list(index)?;
                let string = RString::new(list.bytes.clone(), Rc::clone(&list.encoding));
                Ok(Value::Str(Rc::new(RefCell::new(string))))
            }
            ("getRegexp", [_], [Value::ByteList(pattern), options]) => {
                let options = options.as_int("getRegexp")?;
                let source = String::from_utf8_lossy(&pattern.bytes).into_owned();
                self.cache.get_or_init(CacheKind::Regexp, index, || {
                    Ok(Value::Regexp(Rc::new(Regexp { source, options })))
                })
            }

            // ===== Constants =====
            ("getConstant", [_], [name]) => {
                let name = name.as_text("getConstant")?;
                let host = self.host();
                self.cache
                    .get_or_init(CacheKind::Constant, index, || lookup_constant(&*host, &name))
            }
            ("getConstantDefined", [_], [name]) => {
                let name = name.as_text("getConstantDefined")?;
                Ok(match self.host().constant(&name) {
                    Some(_) => Value::string("constant"),
                    None => Value::Nil,
                })
            }
            ("getConstantBoolean", [_], [name]) => {
                let name = name.as_text("getConstantBoolean")?;
                let host = self.host();
                let value = self
                    .cache
                    .get_or_init(CacheKind::Constant, index, || lookup_constant(&*host, &name))?;
                Ok(Value::Int(i32::from(value.is_truthy())))
            }
            ("getConstantFrom", [target, _], [name]) => {
                let name = name.as_text("getConstantFrom")?;
                let qualified = format!("{target}::{name}");
                let host = self.host();
                self.cache
                    .get_or_init(CacheKind::Constant, index, || lookup_constant(&*host, &qualified))
            }

            // ===== Instance Variables =====
            ("getVariable", [_, self_value], [name]) => {
                let name = self.cache_variable_name(CacheKind::VariableReader, index, name)?;
                Ok(match self_value {
                    Value::Object(obj) => obj.get(&name).unwrap_or(Value::Nil),
                    _ => Value::Nil,
                })
            }
            ("getVariableDefined", [_, self_value], [name]) => {
                let name = self.cache_variable_name(CacheKind::VariableReader, index, name)?;
                Ok(match self_value {
                    Value::Object(obj) if obj.get(&name).is_some() => Value::string("instance-variable"),
                    _ => Value::Nil,
                })
            }
            ("setVariable", [self_value, value], [name]) => {
                let name = self.cache_variable_name(CacheKind::VariableWriter, index, name)?;
                match self_value {
                    Value::Object(obj) => {
                        obj.set(&name, value.clone());
                        Ok(value.clone())
                    }
                    other => Err(RuntimeError::new(RuntimeErrorKind::TypeMismatch {
                        expected: "Object",
                        got: other.type_name(),
                        operation: "setVariable",
                    })),
                }
            }

            // ===== Methods, Closures, Scopes =====
            ("getMethod", [_, _], [name]) => {
                let name = name.as_text("getMethod")?;
                self.cache
                    .get_or_init(CacheKind::Method, index, || Ok(Value::Method(name)))
            }
            ("getBlockBody", [_], [descriptor]) => {
                let descriptor = descriptor.as_text("getBlockBody")?;
                let cache = &self.cache;
                cache.get_or_init(CacheKind::BlockBody, index, || {
                    let body = BlockDescriptor::parse(&descriptor).ok_or_else(|| {
                        RuntimeError::new(RuntimeErrorKind::Internal(format!(
                            "malformed block descriptor {descriptor:?}"
                        )))
                    })?;
                    let variables: Rc<[String]> = body.variables.clone().into();
                    cache.get_or_init(CacheKind::Scope, body.scope_index, || {
                        Ok(Value::StaticScope(variables))
                    })?;
                    Ok(Value::BlockBody(Rc::new(body)))
                })
            }
            ("getBlockCallback", [_], [method]) => {
                let method = method.as_text("getBlockCallback")?;
                self.cache
                    .get_or_init(CacheKind::BlockCallback, index, || Ok(Value::BlockCallback(method)))
            }
            ("getScope", [_], [encoded]) => {
                let encoded = encoded.as_text("getScope")?;
                self.cache.get_or_init(CacheKind::Scope, index, || {
                    let names: Rc<[String]> = StaticScope::decode(&encoded).variable_names().into();
                    Ok(Value::StaticScope(names))
                })
            }
            ("getScope", [], []) => self.cache.get(CacheKind::Scope, index)?.ok_or_else(|| {
                RuntimeError::new(RuntimeErrorKind::Internal(format!(
                    "static scope {index} loaded before it was decoded"
                )))
            }),

            (stem, _, _) if leading_arity(stem).is_some() => Err(bad_arguments(class::SCRIPT, stem)),
            (stem, _, _) => Err(unknown(class::SCRIPT, stem)),
        }
    }

    /// Variable accessors memoize the name they resolve
    fn cache_variable_name(&self, kind: CacheKind, index: usize, name: &Value) -> RuntimeResult<Rc<str>> {
        let name = name.as_text("variable accessor")?;
        self.cache
            .get_or_init(kind, index, || Ok(Value::Text(name)))?
            .as_text("variable accessor")
    }
}

fn lookup_constant(host: &dyn Host, name: &str) -> RuntimeResult<Value> {
    host.constant(name)
        .ok_or_else(|| RuntimeError::new(RuntimeErrorKind::NameError(name.to_string())))
}

/// Number of arguments an accessor takes before its slot index
fn leading_arity(stem: &str) -> Option<usize> {
    match stem {
        "getCallSite" | "getByteList" | "getEncoding" => Some(0),
        "getSymbol" | "getFixnum" | "getFloat" | "getBigInteger" | "getString" | "getRegexp"
        | "getConstant" | "getConstantDefined" | "getConstantBoolean" | "getBlockBody"
        | "getBlockCallback" => Some(1),
        "getConstantFrom" | "getVariable" | "getVariableDefined" | "setVariable" | "getMethod" => Some(2),
        _ => None,
    }
}

/// Decode a numbered or generic accessor call
fn split_accessor<'a>(name: &'a str, args: &'a [Value]) -> RuntimeResult<Access<'a>> {
    let stem = name.trim_end_matches(|c: char| c.is_ascii_digit());
    let numbered = &name[stem.len()..];

    let leading = match stem {
        "getScope" => usize::from(matches!(args.first(), Some(Value::Context))),
        other => leading_arity(other).ok_or_else(|| unknown(class::SCRIPT, name))?,
    };
    if args.len() < leading {
        return Err(bad_arguments(class::SCRIPT, name));
    }
    let (leading, rest) = args.split_at(leading);

    if numbered.is_empty() {
        let (index, trailing) = rest
            .split_first()
            .ok_or_else(|| bad_arguments(class::SCRIPT, name))?;
        Ok(Access {
            stem,
            index: index.as_index("accessor")?,
            leading,
            trailing,
        })
    } else {
        let index = numbered
            .parse()
            .map_err(|_| bad_arguments(class::SCRIPT, name))?;
        Ok(Access {
            stem,
            index,
            leading,
            trailing: rest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbered_accessors_carry_the_index_in_the_name() {
        let args = [Value::Context, Value::Text(Rc::from("foo"))];
        let access = split_accessor("getSymbol7", &args).unwrap();
        assert_eq!(access.stem, "getSymbol");
        assert_eq!(access.index, 7);
        assert_eq!(access.leading.len(), 1);
        assert_eq!(access.trailing.len(), 1);
    }

    #[test]
    fn generic_accessors_take_the_index_after_leading_args() {
        let args = [
            Value::Unit,
            Value::Context,
            Value::Int(12),
            Value::Text(Rc::from("Foo")),
        ];
        let access = split_accessor("getConstantFrom", &args).unwrap();
        assert_eq!(access.index, 12);
        assert_eq!(access.leading.len(), 2);
        assert_eq!(access.trailing, &[Value::Text(Rc::from("Foo"))]);
    }

    #[test]
    fn scope_reload_has_no_leading_args() {
        let access = split_accessor("getScope3", &[]).unwrap();
        assert_eq!(access.index, 3);
        assert!(access.leading.is_empty());

        let args = [Value::Context, Value::Text(Rc::from("a;b"))];
        let access = split_accessor("getScope3", &args).unwrap();
        assert_eq!(access.leading.len(), 1);
    }

    #[test]
    fn unknown_stems_are_rejected() {
        assert!(split_accessor("getWidget2", &[]).is_err());
    }
}
