//! Script compiler
//!
//! Owns everything shared by the bodies of one compiled unit: the cache
//! compiler, the finished methods, the segment arena and the counters that
//! keep generated method names unique. Bodies are opened with `start_root`
//! and borrow the script compiler mutably until they end; closures and class
//! bodies they contain reborrow it for their own (nested) compilation.
//!
//! ```text
//! let mut script = ScriptCompiler::new("Foo", "foo.rb", config);
//! let mut body = script.start_root("bar", scope, inspector)?;
//! ...emit...
//! body.end_body()?;
//! let unit = script.finish()?;
//! ```

use tracing::{debug, info};

use crate::body::{BaseRole, BodyCompiler, BodyRole, BodySetup};
use crate::cache::CacheCompiler;
use crate::config::CompilerConfig;
use crate::emit::{class, disassemble_method, sig, JType, MethodCode, MethodEmitter};
use crate::error::{CompileError, CompileResult};
use crate::frame::{FrameLayout, ARGS, CONTEXT, SELF, THIS};
use crate::scope::{Fact, Inspector, StaticScope};
use crate::unit::{CompiledUnit, EntryPoint, SegmentId, SegmentInfo, UnitStats};

/// Compiles the bodies of one unit and assembles the result
#[derive(Debug)]
pub struct ScriptCompiler {
    class_name: String,
    source_file: String,
    config: CompilerConfig,

    pub(crate) cache: CacheCompiler,

    /// Unit constructor; receives the cache initializer at `finish`
    init: MethodEmitter,

    methods: Vec<MethodCode>,
    segments: Vec<SegmentInfo>,
    entry_points: Vec<EntryPoint>,

    method_count: usize,
    closure_count: usize,
    class_count: usize,
    chain_count: usize,
}

impl ScriptCompiler {
    pub fn new(class_name: impl Into<String>, source_file: impl Into<String>, config: CompilerConfig) -> Self {
        let class_name = class_name.into();
        let source_file = source_file.into();
        debug!(target: "garnet::jit", unit = %class_name, file = %source_file, "begin unit");
        Self {
            class_name,
            source_file,
            config,
            cache: CacheCompiler::new(),
            init: MethodEmitter::new("<init>", sig(JType::Void, &[])),
            methods: Vec::new(),
            segments: Vec::new(),
            entry_points: Vec::new(),
            method_count: 0,
            closure_count: 0,
            class_count: 0,
            chain_count: 0,
        }
    }

    /// Internal name of the unit's class
    #[must_use]
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    #[must_use]
    pub fn source_file(&self) -> &str {
        &self.source_file
    }

    #[must_use]
    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    #[must_use]
    pub fn cache(&self) -> &CacheCompiler {
        &self.cache
    }

    /// Methods finished so far
    #[must_use]
    pub fn methods(&self) -> &[MethodCode] {
        &self.methods
    }

    /// Open a method body named after `name`.
    ///
    /// A method whose arguments are all required (at most three) and that
    /// neither takes a block argument nor destructures gets a body with one
    /// parameter per argument, plus a boxed entry of the same name that
    /// checks the argument count and forwards.
    pub fn start_root(
        &mut self,
        name: &str,
        scope: StaticScope,
        inspector: Option<Inspector>,
    ) -> CompileResult<BodyCompiler<'_>> {
        let method_name = format!("method__{}$RUBY${}", self.method_count, name);
        self.method_count += 1;

        let boxed_only = inspector.is_some_and(|i| i.has(Fact::BlockArg) || i.has(Fact::MultipleArgsHead));
        let specific_arity = if scope.has_specific_arity() && !boxed_only {
            u16::try_from(scope.required_args()).ok()
        } else {
            None
        };
        let nested = inspector.is_some_and(|i| i.in_nested_frame());

        let layout = match specific_arity {
            Some(arity) => {
                let wrapper = boxed_entry(&self.class_name, &method_name, arity)?;
                self.add_method(wrapper)?;
                FrameLayout::specific(arity)
            }
            None => FrameLayout::boxed(),
        };

        self.entry_points.push(EntryPoint {
            name: method_name.clone(),
            ruby_name: name.to_string(),
            specific_arity,
        });

        BodyCompiler::begin(
            self,
            BodySetup {
                name: method_name,
                base_name: name.to_string(),
                role: BodyRole::RootMethod { specific_arity, nested },
                layout,
                scope,
                inspector,
            },
        )
    }

    /// Index the next closure body will be named with; claimed only once
    /// the body has begun
    pub(crate) fn closure_index(&self) -> usize {
        self.closure_count
    }

    pub(crate) fn claim_closure_index(&mut self) {
        self.closure_count += 1;
    }

    pub(crate) fn class_index(&self) -> usize {
        self.class_count
    }

    pub(crate) fn claim_class_index(&mut self) {
        self.class_count += 1;
    }

    pub(crate) fn next_chain_index(&mut self) -> usize {
        let index = self.chain_count;
        self.chain_count += 1;
        index
    }

    pub(crate) fn push_segment(&mut self, name: &str, base: BaseRole, predecessor: Option<SegmentId>) -> SegmentId {
        let id = SegmentId(self.segments.len());
        self.segments.push(SegmentInfo {
            id,
            name: name.to_string(),
            base,
            predecessor,
        });
        id
    }

    pub(crate) fn segment_name(&self, id: SegmentId) -> &str {
        self.segments.get(id.0).map_or("", |s| s.name.as_str())
    }

    /// Add a finished method; a unit may not hold two methods with the same
    /// name and signature
    pub(crate) fn add_method(&mut self, code: MethodCode) -> CompileResult<()> {
        let descriptor = code.descriptor();
        if self
            .methods
            .iter()
            .any(|m| m.name == code.name && m.descriptor() == descriptor)
        {
            return Err(CompileError::internal(format!(
                "duplicate method {}{} in {}",
                code.name, descriptor, self.class_name
            )));
        }
        if self.config.dump_bytecode {
            debug!(target: "garnet::jit::dump", method = %code.name, "\n{}", disassemble_method(&code));
        }
        self.methods.push(code);
        Ok(())
    }

    /// Write the cache initializer and assemble the unit
    pub fn finish(mut self) -> CompileResult<CompiledUnit> {
        let descriptor = self.cache.finish(&mut self.init)?;
        self.init.return_void();
        let init = self.init.end()?;

        let stats = UnitStats {
            methods: self.methods.len(),
            total_code_size: self.methods.iter().map(|m| m.code_size).sum(),
            largest_method: self.methods.iter().map(|m| m.code_size).max().unwrap_or(0),
            chained_segments: self
                .segments
                .iter()
                .filter(|s| s.predecessor.is_some())
                .count(),
            cache_counts: self.cache.counts(),
        };

        info!(
            target: "garnet::jit",
            unit = %self.class_name,
            methods = stats.methods,
            code_size = stats.total_code_size,
            largest = stats.largest_method,
            chained = stats.chained_segments,
            cache_entries = stats.cache_counts.total(),
            "compiled unit"
        );
        if self.config.dump_bytecode {
            debug!(target: "garnet::jit::dump", method = %init.name, "\n{}", disassemble_method(&init));
        }

        Ok(CompiledUnit {
            class_name: self.class_name,
            source_file: self.source_file,
            methods: self.methods,
            init,
            descriptor,
            segments: self.segments,
            entry_points: self.entry_points,
            stats,
        })
    }
}

/// Boxed entry for a specific-arity body: check the count, unpack the
/// arguments and call the body
fn boxed_entry(class_name: &str, body: &str, arity: u16) -> CompileResult<MethodCode> {
    let boxed = FrameLayout::boxed();
    let mut m = MethodEmitter::new(body, boxed.signature());

    m.load(CONTEXT);
    m.load(ARGS);
    m.push_int(i32::from(arity));
    m.push_int(i32::from(arity));
    m.invoke_static(
        class::HELPERS,
        "checkArgumentCount",
        sig(JType::Int, &[JType::CONTEXT, JType::VALUE_ARRAY, JType::Int, JType::Int]),
    );
    m.pop();

    m.load(THIS);
    m.load(CONTEXT);
    m.load(SELF);
    for index in 0..arity {
        m.load(ARGS);
        m.push_int(i32::from(index));
        m.array_load();
    }
    m.load(boxed.block());
    m.invoke_virtual(class_name.to_string(), body, FrameLayout::specific(arity).signature());
    m.areturn();
    m.end()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::simple_scope;

    #[test]
    fn specific_root_gets_a_boxed_entry() {
        let mut script = ScriptCompiler::new("Unit", "t.rb", CompilerConfig::default());
        let mut body = script.start_root("pair", simple_scope(2), None).unwrap();
        body.retrieve_local_variable(0, 0).unwrap();
        body.end_body().unwrap();
        let unit = script.finish().unwrap();

        let entry = unit.entry_point("pair").unwrap();
        assert_eq!(entry.name, "method__0$RUBY$pair");
        let boxed = unit
            .find(&entry.name, &FrameLayout::boxed().signature().descriptor())
            .unwrap();
        assert_eq!(boxed.count_invocations("checkArgumentCount"), 1);
        assert_eq!(boxed.count_invocations(&entry.name), 1);
        assert_eq!(unit.root().unwrap().signature.param_count(), 5);
    }

    #[test]
    fn block_argument_forces_boxed_body() {
        let mut script = ScriptCompiler::new("Unit", "t.rb", CompilerConfig::default());
        let inspector = Inspector::new().with(Fact::BlockArg);
        let mut body = script.start_root("each", simple_scope(1), Some(inspector)).unwrap();
        body.load_nil();
        body.end_body().unwrap();
        let unit = script.finish().unwrap();

        assert_eq!(unit.methods.len(), 1);
        assert_eq!(unit.entry_points[0].specific_arity, None);
        assert_eq!(unit.root().unwrap().signature.param_count(), 4);
    }

    #[test]
    fn empty_unit_has_no_descriptor() {
        let script = ScriptCompiler::new("Empty", "e.rb", CompilerConfig::default());
        let unit = script.finish().unwrap();
        assert!(unit.descriptor.is_none());
        assert!(unit.methods.is_empty());
        assert_eq!(unit.init.code.len(), 1);
    }

    #[test]
    fn stats_count_methods_and_cache_entries() {
        let mut script = ScriptCompiler::new("Unit", "t.rb", CompilerConfig::default());
        let mut body = script.start_root("sym", simple_scope(0), None).unwrap();
        body.create_new_symbol("a");
        body.end_body().unwrap();
        let unit = script.finish().unwrap();

        assert_eq!(unit.stats.methods, 2);
        assert_eq!(unit.stats.cache_counts.total(), 1);
        assert!(unit.stats.largest_method <= unit.stats.total_code_size);
        assert!(unit.descriptor.is_some());
    }
}
