//! End-to-end tests: bodies compiled through the public API and run on the
//! reference executor

use std::cell::Cell;
use std::io::Write;
use std::rc::Rc;

use garnet_core::cache::CacheKind;
use garnet_core::emit::Insn;
use garnet_core::frame::FrameLayout;
use garnet_core::invocation::{ArgumentsCallback, Arity, Call, CompilerCallback, Operand};
use garnet_core::scope::{Fact, Inspector, StaticScope};
use garnet_core::testutil::{
    compile_root, compile_root_with, compile_with_config, eval_fixnum, eval_root, main_object, run_unit,
    run_unit_on, simple_scope, TEST_CLASS, TEST_FILE,
};
use garnet_core::variables::VariableStrategy;
use garnet_core::vm::{BasicHost, RObject, RuntimeError, RuntimeErrorKind, Value};
use garnet_core::VM;
use garnet_core::{BodyCompiler, CompileResult, CompilerConfig, ScriptCompiler};

// =============================================================================
// Helpers
// =============================================================================

fn call(body: &mut BodyCompiler<'_>, call: Call<'_>) -> CompileResult<()> {
    let invocation = body.invocation_compiler();
    invocation.invoke_dynamic(body, call)
}

fn binary(body: &mut BodyCompiler<'_>, op: &str, receiver: CompilerCallback<'_>, operand: i64) -> CompileResult<()> {
    let invocation = body.invocation_compiler();
    invocation.invoke_binary_operator(body, op, receiver, Operand::Fixnum(operand))
}

fn fixnum(value: i64) -> CompilerCallback<'static> {
    CompilerCallback::new(move |body| {
        body.create_new_fixnum(value);
        Ok(())
    })
}

fn local(index: usize, depth: usize) -> CompilerCallback<'static> {
    CompilerCallback::new(move |body| body.retrieve_local_variable(index, depth))
}

fn nil() -> CompilerCallback<'static> {
    CompilerCallback::new(|body| {
        body.load_nil();
        Ok(())
    })
}

fn args(values: &[i64]) -> Vec<Value> {
    values.iter().map(|v| Value::Fixnum(*v)).collect()
}

// =============================================================================
// Method entry
// =============================================================================

#[test]
fn test_specific_arity_method_has_two_entries() {
    let unit = compile_root(simple_scope(2), |body| binary_locals(body, "+")).unwrap();

    let entry = unit.entry_point("test").unwrap();
    assert_eq!(entry.specific_arity, Some(2));
    assert_eq!(unit.methods_named(&entry.name).count(), 2);

    assert_eq!(run_unit(unit.clone(), args(&[3, 4])).unwrap(), Value::Fixnum(7));
    let err = run_unit(unit, args(&[3, 4, 5])).unwrap_err();
    assert!(err.contains("wrong number of arguments (3 for 2)"), "{err}");
}

#[test]
fn test_specific_entry_matches_boxed_entry() {
    let unit = compile_root(simple_scope(2), |body| binary_locals(body, "*")).unwrap();
    let entry = unit.entry_point("test").unwrap().clone();
    let mut vm = VM::new(unit, Rc::new(BasicHost::new())).unwrap();

    let boxed = vm.invoke("test", main_object(), args(&[6, 7]), None).unwrap();
    let specific = vm
        .call_method(
            &entry.name,
            &FrameLayout::specific(2).signature(),
            vec![Value::Context, main_object(), Value::Fixnum(6), Value::Fixnum(7), Value::Null],
        )
        .unwrap();

    assert_eq!(boxed, Value::Fixnum(42));
    assert_eq!(specific, boxed);
}

fn binary_locals(body: &mut BodyCompiler<'_>, op: &str) -> CompileResult<()> {
    let rhs = ArgumentsCallback::new(Arity::Fixed(1), |body| body.retrieve_local_variable(1, 0));
    call(body, Call::normal(op, local(0, 0)).args(rhs))
}

#[test]
fn test_optional_argument_defaults_to_nil() {
    let scope = StaticScope::new(["a", "b"]).with_required(1).with_optional(1);
    let unit = compile_root(scope, |body| body.retrieve_local_variable(1, 0)).unwrap();

    assert_eq!(unit.entry_point("test").unwrap().specific_arity, None);
    assert_eq!(run_unit(unit.clone(), args(&[1])).unwrap(), Value::Nil);
    assert_eq!(run_unit(unit, args(&[1, 2])).unwrap(), Value::Fixnum(2));
}

#[test]
fn test_rest_argument_collects_the_tail() {
    let scope = StaticScope::new(["first", "rest"]).with_required(1).with_rest(1);
    let unit = compile_root(scope, |body| body.retrieve_local_variable(1, 0)).unwrap();

    let result = run_unit(unit, args(&[1, 2, 3])).unwrap();
    assert_eq!(result, Value::array(args(&[2, 3])));
}

// =============================================================================
// Variable strategies
// =============================================================================

#[test]
fn test_strategy_follows_analysis() {
    let cases = [
        (Some(Inspector::new()), VariableStrategy::StackBased),
        (Some(Inspector::new().with(Fact::Closure)), VariableStrategy::HeapBased),
        (Some(Inspector::new().with(Fact::ScopeAware)), VariableStrategy::HeapBased),
        (None, VariableStrategy::HeapBased),
    ];

    for (inspector, expected) in cases {
        compile_root_with(simple_scope(1), inspector, |body| {
            assert_eq!(body.variable_strategy(), expected);
            body.retrieve_local_variable(0, 0)
        })
        .unwrap();
    }
}

#[test]
fn test_nested_blocks_reach_the_method_scope() {
    // x = 10; 2.times { |i| 3.times { |j| x = x + 1 } }; x
    let scope = StaticScope::new(["x"]);
    let unit = compile_root_with(scope, None, |body| {
        body.assign_local_variable(0, 0, Some(fixnum(10)), false)?;
        let outer = CompilerCallback::new(|body| {
            body.create_new_closure(1, StaticScope::new(["i"]).with_required(1), 1, None, |outer| {
                let inner = CompilerCallback::new(|body| {
                    body.create_new_closure(2, StaticScope::new(["j"]).with_required(1), 1, None, |inner| {
                        let sum = CompilerCallback::new(|body| binary(body, "+", local(0, 2), 1));
                        inner.assign_local_variable(0, 2, Some(sum), true)
                    })
                });
                call(outer, Call::normal("times", fixnum(3)).iterator(inner))
            })
        });
        call(body, Call::normal("times", fixnum(2)).iterator(outer))?;
        body.discard();
        body.retrieve_local_variable(0, 0)
    })
    .unwrap();

    assert_eq!(run_unit(unit, Vec::new()).unwrap(), Value::Fixnum(16));
}

// =============================================================================
// Loops and jumps
// =============================================================================

#[test]
fn test_loop_with_next_and_break() {
    // i = 0; while true; i = i + 1; if i < 3 then next else break i * 10 end; end
    let result = eval_fixnum(StaticScope::new(["i"]), Vec::new(), |body| {
        body.assign_local_variable(0, 0, Some(fixnum(0)), false)?;
        body.perform_boolean_loop(
            CompilerCallback::new(|body| {
                body.load_true();
                Ok(())
            }),
            CompilerCallback::new(|body| {
                let step = CompilerCallback::new(|body| binary(body, "+", local(0, 0), 1));
                body.assign_local_variable(0, 0, Some(step), false)?;
                body.perform_boolean_branch(
                    CompilerCallback::new(|body| binary(body, "<", local(0, 0), 3)),
                    CompilerCallback::new(|body| {
                        body.load_nil();
                        body.issue_next()?;
                        body.load_nil();
                        Ok(())
                    }),
                    CompilerCallback::new(|body| {
                        binary(body, "*", local(0, 0), 10)?;
                        body.issue_break()?;
                        body.load_nil();
                        Ok(())
                    }),
                )
            }),
            true,
        )
    })
    .unwrap();

    assert_eq!(result, 30);
}

#[test]
fn test_next_gives_the_block_value() {
    // [1, 2].map { |x| next x * 2 }
    let unit = compile_root_with(simple_scope(0), None, |body| {
        let block = CompilerCallback::new(|body| {
            body.create_new_closure(1, StaticScope::new(["x"]).with_required(1), 1, None, |block| {
                binary(block, "*", local(0, 0), 2)?;
                block.issue_next()?;
                block.load_nil();
                Ok(())
            })
        });
        let receiver = CompilerCallback::new(|body| body.create_new_array(vec![fixnum(1), fixnum(2)]));
        call(body, Call::normal("map", receiver).iterator(block))
    })
    .unwrap();

    assert_eq!(run_unit(unit, Vec::new()).unwrap(), Value::array(args(&[2, 4])));
}

#[test]
fn test_redo_reruns_the_block_body() {
    // count = 0; [1].each { count = count + 1; redo if count < 3 }; count
    let unit = compile_root_with(StaticScope::new(["count"]), None, |body| {
        body.assign_local_variable(0, 0, Some(fixnum(0)), false)?;
        let block = CompilerCallback::new(|body| {
            body.create_new_closure(1, StaticScope::default(), 0, None, |block| {
                let step = CompilerCallback::new(|body| binary(body, "+", local(0, 1), 1));
                block.assign_local_variable(0, 1, Some(step), false)?;
                block.perform_boolean_branch(
                    CompilerCallback::new(|body| binary(body, "<", local(0, 1), 3)),
                    CompilerCallback::new(|body| {
                        body.issue_redo()?;
                        body.load_nil();
                        Ok(())
                    }),
                    nil(),
                )
            })
        });
        let receiver = CompilerCallback::new(|body| body.create_new_array(vec![fixnum(1)]));
        call(body, Call::normal("each", receiver).iterator(block))?;
        body.discard();
        body.retrieve_local_variable(0, 0)
    })
    .unwrap();

    assert_eq!(run_unit(unit, Vec::new()).unwrap(), Value::Fixnum(3));
}

#[test]
fn test_return_from_block_inside_ensure() {
    // begin; [1].each { return 4 }; 0; ensure; puts :done; end
    let unit = compile_root_with(simple_scope(0), None, |body| {
        body.perform_ensure(
            CompilerCallback::new(|body| {
                let block = CompilerCallback::new(|body| {
                    body.create_new_closure(1, StaticScope::default(), 0, None, |block| {
                        block.create_new_fixnum(4);
                        block.perform_return()?;
                        block.load_nil();
                        Ok(())
                    })
                });
                let receiver = CompilerCallback::new(|body| body.create_new_array(vec![fixnum(1)]));
                call(body, Call::normal("each", receiver).iterator(block))?;
                body.discard();
                body.create_new_fixnum(0);
                Ok(())
            }),
            CompilerCallback::new(|body| {
                let arg = ArgumentsCallback::new(Arity::Fixed(1), |body| {
                    body.create_new_symbol("done");
                    Ok(())
                });
                call(body, Call::functional("puts").args(arg))
            }),
        )
    })
    .unwrap();

    let host = Rc::new(BasicHost::new());
    let result = run_unit_on(unit, host.clone(), Vec::new()).unwrap();
    assert_eq!(result, Value::Fixnum(4));
    assert_eq!(host.output(), vec!["done".to_string()]);
}

// =============================================================================
// Invocation
// =============================================================================

#[test]
fn test_or_assign_evaluates_the_receiver_once() {
    // target.cache ||= 42
    let object = Rc::new(RObject::new("Object"));
    let shared = Rc::clone(&object);
    let host = Rc::new(BasicHost::new().with_function("target", move |_| Ok(Value::Object(Rc::clone(&shared)))));

    let unit = compile_root(simple_scope(0), |body| {
        let invocation = body.invocation_compiler();
        let receiver = CompilerCallback::new(|body| call(body, Call::functional("target")));
        invocation.invoke_op_asgn_with_or(body, "cache", receiver, fixnum(42))
    })
    .unwrap();

    let result = run_unit_on(unit.clone(), host.clone(), Vec::new()).unwrap();
    assert_eq!(result, Value::Fixnum(42));
    assert_eq!(host.calls("target"), 1);
    assert_eq!(object.get("@cache"), Some(Value::Fixnum(42)));

    // already set: no write
    object.set("@cache", Value::Fixnum(7));
    let result = run_unit_on(unit, host.clone(), Vec::new()).unwrap();
    assert_eq!(result, Value::Fixnum(7));
    assert_eq!(host.calls("target"), 2);
    assert_eq!(host.calls("cache="), 1);
}

#[test]
fn test_element_op_assign_updates_in_place() {
    // a = [1, 2]; a[1] += 5; a
    let unit = compile_root(StaticScope::new(["a"]), |body| {
        let array = CompilerCallback::new(|body| body.create_new_array(vec![fixnum(1), fixnum(2)]));
        body.assign_local_variable(0, 0, Some(array), false)?;
        let invocation = body.invocation_compiler();
        let index = ArgumentsCallback::new(Arity::Fixed(1), |body| {
            body.create_new_fixnum(1);
            Ok(())
        });
        invocation.invoke_op_element_asgn_with_method(body, "+", local(0, 0), index, fixnum(5))?;
        body.discard();
        body.retrieve_local_variable(0, 0)
    })
    .unwrap();

    assert_eq!(run_unit(unit, Vec::new()).unwrap(), Value::array(args(&[1, 7])));
}

#[test]
fn test_case_when_tests_every_receiver() {
    let when = |subject: i64| {
        compile_root(simple_scope(0), move |body| {
            let invocation = body.invocation_compiler();
            let receivers = ArgumentsCallback::new(Arity::Fixed(2), |body| {
                body.create_new_fixnum(1);
                body.create_new_fixnum(20);
                Ok(())
            });
            invocation.invoke_eqq(body, receivers, Some(fixnum(subject)))
        })
        .unwrap()
    };

    assert_eq!(run_unit(when(20), Vec::new()).unwrap(), Value::Int(1));
    assert_eq!(run_unit(when(9), Vec::new()).unwrap(), Value::Int(0));
}

#[test]
fn test_caseless_when_tests_truth() {
    let unit = compile_root(simple_scope(0), |body| {
        let invocation = body.invocation_compiler();
        let receivers = ArgumentsCallback::new(Arity::Fixed(2), |body| {
            body.load_false();
            body.load_nil();
            Ok(())
        });
        invocation.invoke_eqq(body, receivers, None)
    })
    .unwrap();

    assert_eq!(run_unit(unit, Vec::new()).unwrap(), Value::Int(0));
}

#[test]
fn test_yield_passes_values_to_the_block() {
    // def pair(a, b) = yield(a, b)
    // def test = pair(3, 4) { |x, y| x * y }
    let mut script = ScriptCompiler::new(TEST_CLASS, TEST_FILE, CompilerConfig::default());

    let mut pair = script.start_root("pair", simple_scope(2), Some(Inspector::new())).unwrap();
    let invocation = pair.invocation_compiler();
    let values = ArgumentsCallback::new(Arity::Fixed(2), |body| {
        body.retrieve_local_variable(0, 0)?;
        body.retrieve_local_variable(1, 0)
    });
    invocation.yield_specific(&mut pair, Some(values)).unwrap();
    pair.end_body().unwrap();

    let mut test = script.start_root("test", simple_scope(0), None).unwrap();
    let block = CompilerCallback::new(|body| {
        body.create_new_closure(1, StaticScope::new(["x", "y"]).with_required(2), 2, None, |block| {
            let rhs = ArgumentsCallback::new(Arity::Fixed(1), |body| body.retrieve_local_variable(1, 0));
            call(block, Call::normal("*", local(0, 0)).args(rhs))
        })
    });
    let values = ArgumentsCallback::new(Arity::Fixed(2), |body| {
        body.create_new_fixnum(3);
        body.create_new_fixnum(4);
        Ok(())
    });
    call(&mut test, Call::functional("pair").args(values).block(block)).unwrap();
    test.end_body().unwrap();

    let unit = script.finish().unwrap();
    assert_eq!(unit.entry_points.len(), 2);
    assert_eq!(run_unit(unit, Vec::new()).unwrap(), Value::Fixnum(12));
}

// =============================================================================
// Classes and constants
// =============================================================================

#[test]
fn test_class_body_value_and_constant() {
    let unit = compile_root(simple_scope(0), |body| {
        body.define_class("Point", None, StaticScope::default(), None, |class_body| {
            class_body.create_new_fixnum(99);
            Ok(())
        })
    })
    .unwrap();
    assert_eq!(run_unit(unit, Vec::new()).unwrap(), Value::Fixnum(99));

    let unit = compile_root(simple_scope(0), |body| {
        body.define_class("Point", None, StaticScope::default(), None, |class_body| {
            class_body.load_nil();
            Ok(())
        })?;
        body.discard();
        body.retrieve_constant("Point");
        Ok(())
    })
    .unwrap();
    assert_eq!(run_unit(unit, Vec::new()).unwrap(), Value::Class(Rc::from("Point")));
}

#[test]
fn test_missing_constant_raises_name_error() {
    let err = eval_root(simple_scope(0), Vec::new(), |body| {
        body.retrieve_constant("Nowhere");
        Ok(())
    })
    .unwrap_err();
    assert!(err.contains("uninitialized constant Nowhere"), "{err}");
}

#[test]
fn test_rescue_sees_the_raised_value() {
    // begin; fail; rescue => e; e; end
    let host = Rc::new(BasicHost::new().with_function("fail", |_| {
        Err(RuntimeError::new(RuntimeErrorKind::Raise(Value::string("boom"))))
    }));
    let unit = compile_root(simple_scope(0), |body| {
        body.perform_rescue(
            CompilerCallback::new(|body| call(body, Call::functional("fail"))),
            CompilerCallback::new(|body| body.load_exception()),
        )
    })
    .unwrap();

    assert_eq!(run_unit_on(unit, host.clone(), Vec::new()).unwrap(), Value::string("boom"));
    assert_eq!(host.calls("fail"), 1);
}

#[test]
fn test_scoped_constant_lookup() {
    // Outer::Inner
    let host = Rc::new(
        BasicHost::new()
            .with_constant("Outer", Value::Class(Rc::from("Outer")))
            .with_constant("Outer::Inner", Value::Fixnum(5)),
    );
    let unit = compile_root(simple_scope(0), |body| {
        let target = CompilerCallback::new(|body| {
            body.retrieve_constant("Outer");
            Ok(())
        });
        body.retrieve_constant_from(target, "Inner")
    })
    .unwrap();
    assert_eq!(run_unit_on(unit, host, Vec::new()).unwrap(), Value::Fixnum(5));
}

#[test]
fn test_constant_defined_and_truthiness() {
    let host = Rc::new(
        BasicHost::new()
            .with_constant("ENABLED", Value::Fixnum(1))
            .with_constant("QUIET", Value::Bool(false)),
    );
    let defined = |name: &'static str| {
        compile_root(simple_scope(0), move |body| {
            body.is_constant_defined(name);
            Ok(())
        })
        .unwrap()
    };
    assert_eq!(run_unit_on(defined("ENABLED"), host.clone(), Vec::new()).unwrap(), Value::string("constant"));
    assert_eq!(run_unit_on(defined("MISSING"), host.clone(), Vec::new()).unwrap(), Value::Nil);

    let truthy = |name: &'static str| {
        compile_root(simple_scope(0), move |body| {
            body.retrieve_constant_boolean(name);
            Ok(())
        })
        .unwrap()
    };
    assert_eq!(run_unit_on(truthy("ENABLED"), host.clone(), Vec::new()).unwrap(), Value::Int(1));
    assert_eq!(run_unit_on(truthy("QUIET"), host, Vec::new()).unwrap(), Value::Int(0));
}

// =============================================================================
// Literals
// =============================================================================

#[test]
fn test_bignum_and_encoding_literals() {
    let bignum = eval_root(simple_scope(0), Vec::new(), |body| {
        body.create_new_bignum("-1ffffffffffffffff");
        Ok(())
    })
    .unwrap();
    assert_eq!(bignum, Value::Bignum(Rc::from("-1ffffffffffffffff")));

    let encoding = eval_root(simple_scope(0), Vec::new(), |body| {
        body.create_new_encoding("ASCII-8BIT");
        Ok(())
    })
    .unwrap();
    assert_eq!(encoding, Value::RubyEncoding(Rc::from("ASCII-8BIT")));
}

#[test]
fn test_regexp_literal_is_shared_across_runs() {
    let unit = compile_root(simple_scope(0), |body| {
        body.create_new_regexp(b"a+b", 1);
        Ok(())
    })
    .unwrap();
    let mut vm = VM::new(unit, Rc::new(BasicHost::new())).unwrap();

    let first = vm.invoke("test", main_object(), Vec::new(), None).unwrap();
    let second = vm.invoke("test", main_object(), Vec::new(), None).unwrap();
    match (&first, &second) {
        (Value::Regexp(a), Value::Regexp(b)) => {
            assert!(Rc::ptr_eq(a, b));
            assert_eq!(a.source, "a+b");
            assert_eq!(a.options, 1);
        }
        other => panic!("expected regexps, got {other:?}"),
    }
}

#[test]
fn test_dregexp_is_built_once() {
    // /#{pattern}/o
    let built = Rc::new(Cell::new(0));
    let counter = Rc::clone(&built);
    let host = Rc::new(BasicHost::new().with_function("pattern", move |_| {
        counter.set(counter.get() + 1);
        Ok(Value::string(&format!("v{}", counter.get())))
    }));

    let unit = compile_root(simple_scope(0), |body| {
        let pattern = CompilerCallback::new(|body| call(body, Call::functional("pattern")));
        body.create_new_dregexp(pattern, 0)
    })
    .unwrap();
    let mut vm = VM::new(unit, host.clone()).unwrap();

    let first = vm.invoke("test", main_object(), Vec::new(), None).unwrap();
    assert_eq!(vm.cache().populated(CacheKind::Regexp), 1);
    let second = vm.invoke("test", main_object(), Vec::new(), None).unwrap();

    assert_eq!(first, second);
    assert_eq!(first.to_string(), "/v1/");
    assert_eq!(host.calls("pattern"), 1);
    assert_eq!(built.get(), 1);
}

#[test]
fn test_method_and_block_callback_handles() {
    let method = eval_root(simple_scope(0), Vec::new(), |body| {
        body.retrieve_method("to_s");
        Ok(())
    })
    .unwrap();
    assert_eq!(method, Value::Method(Rc::from("to_s")));

    let callback = eval_root(simple_scope(0), Vec::new(), |body| {
        body.create_block_callback("method__0$RUBY$test");
        Ok(())
    })
    .unwrap();
    assert_eq!(callback, Value::BlockCallback(Rc::from("method__0$RUBY$test")));
}

// =============================================================================
// Configuration and outlining
// =============================================================================

#[test]
fn test_config_file_drives_outlining_and_fast_ops() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "fast_ops = true").unwrap();
    writeln!(file, "chain_size = 4").unwrap();
    let config = CompilerConfig::from_path(file.path()).unwrap();

    // x = 10; <split>; y = x + 5; <split>; y
    let inspector = Inspector::new().with(Fact::ScopeAware);
    let unit = compile_with_config(config, StaticScope::new(["x", "y"]), Some(inspector), |body| {
        body.assign_local_variable(0, 0, Some(fixnum(10)), false)?;
        assert!(body.should_outline());
        body.outline("test")?;
        let sum = CompilerCallback::new(|body| binary(body, "+", local(0, 0), 5));
        body.assign_local_variable(1, 0, Some(sum), false)?;
        body.outline("test")?;
        body.retrieve_local_variable(1, 0)
    })
    .unwrap();

    assert_eq!(unit.stats.chained_segments, 2);
    let root = unit.root().unwrap();
    let names: Vec<&str> = unit
        .segment_chain(&root.name)
        .iter()
        .map(|segment| segment.name.as_str())
        .collect();
    assert_eq!(names, vec![root.name.as_str(), "chained_0_test", "chained_1_test"]);

    assert_eq!(run_unit(unit, Vec::new()).unwrap(), Value::Fixnum(15));
}

#[test]
fn test_three_outlines_chain_every_segment() {
    // x = 0; <split>; x = x + 1; <split>; x = x + 1; <split>; x
    let inspector = Inspector::new().with(Fact::ScopeAware);
    let unit = compile_root_with(StaticScope::new(["x"]), Some(inspector), |body| {
        body.assign_local_variable(0, 0, Some(fixnum(0)), false)?;
        for _ in 0..2 {
            body.outline("work")?;
            let next = CompilerCallback::new(|body| binary(body, "+", local(0, 0), 1));
            body.assign_local_variable(0, 0, Some(next), false)?;
        }
        body.outline("work")?;
        body.retrieve_local_variable(0, 0)
    })
    .unwrap();

    let root = unit.root().unwrap();
    let chain: Vec<&str> = unit
        .segment_chain(&root.name)
        .iter()
        .map(|segment| segment.name.as_str())
        .collect();
    assert_eq!(chain, ["method__0$RUBY$test", "chained_0_work", "chained_1_work", "chained_2_work"]);

    for hop in chain.windows(2) {
        let from = unit.methods_named(hop[0]).next().unwrap();
        let forwards: Vec<usize> = from
            .code
            .iter()
            .filter_map(|insn| match insn {
                Insn::Invoke { name, sig, .. } if name == hop[1] => Some(sig.param_count()),
                _ => None,
            })
            .collect();
        assert_eq!(forwards, [4], "{} -> {}", hop[0], hop[1]);
    }

    assert_eq!(run_unit(unit, Vec::new()).unwrap(), Value::Fixnum(2));
}

#[test]
fn test_inline_cache_calls_run() {
    let config = CompilerConfig::parse("invokedynamic = true").unwrap();
    let unit = compile_with_config(config, simple_scope(2), Some(Inspector::new()), |body| binary_locals(body, "-")).unwrap();

    let root = unit.root().unwrap();
    assert_eq!(root.count_invocations("call:-"), 1);
    assert_eq!(root.count_invocations("call"), 0);
    assert_eq!(run_unit(unit, args(&[10, 4])).unwrap(), Value::Fixnum(6));
}
