//! Runtime value caching for compiled units
//!
//! The cache compiler is the single owner of a unit's runtime cache layout.
//! Every literal, constant lookup, call site, closure and scope a method body
//! needs is assigned a slot here, and the body loads it through an accessor
//! on the unit's base class:
//!
//! ```text
//! load this, [context args], getSymbol3(ctx, "name")          index < 10
//! load this, [context args], getSymbol(ctx, 42, "name")       index >= 10
//! ```
//!
//! Accessors resolve the value on first use and memoize it in the slot.
//! Literal kinds are pooled (equal keys share a slot); site kinds get a slot
//! per emission. At the end of compilation `finish` writes the unit's
//! initializer: one `initFromDescriptor` call carrying the per-kind counts
//! and call-site list, then explicit bindings for encodings and strings.

mod block;
mod descriptor;
mod kind;

pub use block::{BlockDescriptor, ParsedBlockDescriptor};
pub use descriptor::{DescriptorError, InitDescriptor, MAX_ENCODABLE_COUNT, SENTINEL};
pub use kind::{CacheCounts, CacheKind, NUMBERED_ACCESSORS};

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::emit::{class, sig, JType, Label, MethodEmitter};
use crate::error::{CompileError, CompileResult};
use crate::frame::{FrameLayout, CONTEXT, SELF, THIS};
use crate::invocation::CallType;
use crate::scope::StaticScope;

const SYMBOL: JType = JType::Object(class::SYMBOL);
const FIXNUM: JType = JType::Object(class::FIXNUM);
const FLOAT: JType = JType::Object(class::FLOAT);
const BIGNUM: JType = JType::Object(class::BIGNUM);
const RSTRING: JType = JType::Object(class::STRING);
const BYTE_LIST: JType = JType::Object(class::BYTE_LIST);
const REGEXP: JType = JType::Object(class::REGEXP);
const ENCODING: JType = JType::Object(class::ENCODING);
const RUBY_ENCODING: JType = JType::Object(class::RUBY_ENCODING);
const STATIC_SCOPE: JType = JType::Object(class::STATIC_SCOPE);
const BLOCK_BODY: JType = JType::Object(class::BLOCK_BODY);
const BLOCK_CALLBACK: JType = JType::Object(class::BLOCK_CALLBACK);
const DYNAMIC_METHOD: JType = JType::Object(class::DYNAMIC_METHOD);
const CALL_SITE: JType = JType::Object(class::CALL_SITE);

/// Slots reserved for a compiled closure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosureSlots {
    pub block_body: usize,
    pub scope: usize,
}

/// An open lazily-published dynamic regexp slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DRegexpSlot {
    pub index: usize,
    pub(crate) done: Label,
}

/// Raw bytes and encoding of a pooled string
#[derive(Debug, Clone, PartialEq, Eq)]
struct StringEntry {
    raw: Vec<u8>,
    encoding: usize,
}

/// Assigns cache slots and emits their accessors for one unit
#[derive(Debug, Default)]
pub struct CacheCompiler {
    /// Running counts per kind
    counts: CacheCounts,

    /// Call sites in slot order
    call_sites: Vec<(String, CallType)>,

    symbols: HashMap<String, usize>,
    fixnums: HashMap<i64, usize>,
    /// Keyed by bit pattern so that `-0.0` and `0.0` stay distinct
    floats: HashMap<u64, usize>,
    big_integers: HashMap<String, usize>,
    regexps: HashMap<(usize, i32), usize>,
    strings: HashMap<(Vec<u8>, String), usize>,
    string_entries: Vec<StringEntry>,
    encodings: HashMap<String, usize>,
    encoding_names: Vec<String>,

    /// Whether the init method already creates the runtime cache
    runtime_cache_inited: bool,
}

impl CacheCompiler {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Running entry counts
    #[must_use]
    pub fn counts(&self) -> CacheCounts {
        self.counts
    }

    /// Call sites allocated so far, in slot order
    #[must_use]
    pub fn call_sites(&self) -> &[(String, CallType)] {
        &self.call_sites
    }

    // ===== Call Sites =====

    /// Allocate a call site and load it. Never pooled: every call expression
    /// tracks its own dispatch history.
    pub fn cache_call_site(&mut self, m: &mut MethodEmitter, name: &str, call_type: CallType) -> CompileResult<usize> {
        if name.contains(SENTINEL) {
            return Err(CompileError::not_compilable(format!(
                "call site name {name:?} contains the descriptor separator"
            )));
        }
        let index = self.counts.next(CacheKind::CallSite);
        self.call_sites.push((name.to_string(), call_type));
        trace!(target: "garnet::jit::cache", index, name, ?call_type, "call site");

        m.load(THIS);
        invoke_accessor(m, CacheKind::CallSite, index, "getCallSite", &[], &[], CALL_SITE, |_| {});
        Ok(index)
    }

    // ===== Literals =====

    /// Load a symbol
    pub fn cache_symbol(&mut self, m: &mut MethodEmitter, name: &str) -> usize {
        let index = pooled(&mut self.counts, &mut self.symbols, name.to_string(), CacheKind::Symbol);

        m.load(THIS);
        m.load(CONTEXT);
        invoke_accessor(
            m,
            CacheKind::Symbol,
            index,
            "getSymbol",
            &[JType::CONTEXT],
            &[JType::STRING],
            SYMBOL,
            |m| m.ldc_str(name),
        );
        index
    }

    /// Load a fixnum. Values in `-1..=5` come from runtime singletons and get
    /// no slot.
    pub fn cache_fixnum(&mut self, m: &mut MethodEmitter, frame: &FrameLayout, value: i64) -> Option<usize> {
        if (-1..=5).contains(&value) {
            m.load(frame.runtime());
            m.ldc_long(value);
            m.invoke_static(class::FIXNUM, "newFixnum", sig(FIXNUM, &[JType::RUNTIME, JType::Long]));
            return None;
        }

        let index = pooled(&mut self.counts, &mut self.fixnums, value, CacheKind::Fixnum);

        m.load(THIS);
        m.load(frame.runtime());
        match i32::try_from(value) {
            Ok(small) => invoke_accessor(
                m,
                CacheKind::Fixnum,
                index,
                "getFixnum",
                &[JType::RUNTIME],
                &[JType::Int],
                FIXNUM,
                |m| m.push_int(small),
            ),
            Err(_) => {
                // no numbered accessor takes a long
                m.push_index(index);
                m.ldc_long(value);
                m.invoke_virtual(
                    class::SCRIPT,
                    "getFixnum",
                    sig(FIXNUM, &[JType::RUNTIME, JType::Int, JType::Long]),
                );
            }
        }
        Some(index)
    }

    /// Load a float
    pub fn cache_float(&mut self, m: &mut MethodEmitter, frame: &FrameLayout, value: f64) -> usize {
        let index = pooled(&mut self.counts, &mut self.floats, value.to_bits(), CacheKind::Float);

        m.load(THIS);
        m.load(frame.runtime());
        invoke_accessor(
            m,
            CacheKind::Float,
            index,
            "getFloat",
            &[JType::RUNTIME],
            &[JType::Double],
            FLOAT,
            |m| m.ldc_double(value),
        );
        index
    }

    /// Load a big integer given as a base-16 digit string (with optional `-`)
    pub fn cache_big_integer(&mut self, m: &mut MethodEmitter, frame: &FrameLayout, hex: &str) -> usize {
        let index = pooled(&mut self.counts, &mut self.big_integers, hex.to_string(), CacheKind::BigInteger);

        m.load(THIS);
        m.load(frame.runtime());
        invoke_accessor(
            m,
            CacheKind::BigInteger,
            index,
            "getBigInteger",
            &[JType::RUNTIME],
            &[JType::STRING],
            BIGNUM,
            |m| m.ldc_str(hex),
        );
        index
    }

    /// Load a fresh mutable string built from a pooled byte list
    pub fn cache_string(&mut self, m: &mut MethodEmitter, frame: &FrameLayout, bytes: &[u8], encoding: &str) -> usize {
        let index = self.string_index(bytes, encoding);

        m.load(THIS);
        m.load(frame.runtime());
        invoke_accessor(m, CacheKind::String, index, "getString", &[JType::RUNTIME], &[], RSTRING, |_| {});
        index
    }

    /// Load the shared byte list of a pooled string
    pub fn cache_byte_list(&mut self, m: &mut MethodEmitter, bytes: &[u8], encoding: &str) -> usize {
        let index = self.string_index(bytes, encoding);

        m.load(THIS);
        invoke_accessor(m, CacheKind::String, index, "getByteList", &[], &[], BYTE_LIST, |_| {});
        index
    }

    fn string_index(&mut self, bytes: &[u8], encoding: &str) -> usize {
        let key = (bytes.to_vec(), encoding.to_string());
        if let Some(index) = self.strings.get(&key) {
            return *index;
        }

        let encoding = self.encoding_index(encoding);
        let index = self.counts.next(CacheKind::String);
        trace!(target: "garnet::jit::cache", index, len = bytes.len(), "string");
        self.string_entries.push(StringEntry {
            raw: bytes.to_vec(),
            encoding,
        });
        self.strings.insert(key, index);
        index
    }

    /// Load an encoding
    pub fn cache_encoding(&mut self, m: &mut MethodEmitter, name: &str) -> usize {
        let index = self.encoding_index(name);
        load_encoding(m, index);
        index
    }

    /// Load the Ruby-level object of an encoding
    pub fn cache_ruby_encoding(&mut self, m: &mut MethodEmitter, frame: &FrameLayout, name: &str) -> usize {
        let index = self.cache_encoding(m, name);
        m.load(frame.runtime());
        m.swap();
        m.invoke_virtual(class::RUNTIME, "getEncoding", sig(RUBY_ENCODING, &[ENCODING]));
        index
    }

    fn encoding_index(&mut self, name: &str) -> usize {
        if let Some(index) = self.encodings.get(name) {
            return *index;
        }
        let index = self.counts.next(CacheKind::Encoding);
        trace!(target: "garnet::jit::cache", index, name, "encoding");
        self.encodings.insert(name.to_string(), index);
        self.encoding_names.push(name.to_string());
        index
    }

    /// Load a literal regexp; its pattern is pooled as a byte list
    pub fn cache_regexp(
        &mut self,
        m: &mut MethodEmitter,
        pattern: &[u8],
        encoding: &str,
        options: i32,
    ) -> usize {
        let pattern_index = self.string_index(pattern, encoding);
        let index = pooled(&mut self.counts, &mut self.regexps, (pattern_index, options), CacheKind::Regexp);

        m.load(THIS);
        m.load(CONTEXT);
        invoke_accessor(
            m,
            CacheKind::Regexp,
            index,
            "getRegexp",
            &[JType::CONTEXT],
            &[BYTE_LIST, JType::Int],
            REGEXP,
            |m| {
                m.load(THIS);
                invoke_accessor(m, CacheKind::String, pattern_index, "getByteList", &[], &[], BYTE_LIST, |_| {});
                m.push_int(options);
            },
        );
        index
    }

    /// Open a lazily-published regexp slot: leaves the cached regexp on the
    /// stack and jumps to the slot's end when it is already set. Otherwise
    /// falls through with an empty stack; the caller pushes the pattern
    /// string and calls `publish_dregexp`.
    pub fn begin_dregexp(&mut self, m: &mut MethodEmitter) -> DRegexpSlot {
        let index = self.counts.next(CacheKind::Regexp);
        trace!(target: "garnet::jit::cache", index, "dynamic regexp");
        let done = m.new_label();

        m.load(THIS);
        m.push_index(index);
        m.invoke_virtual(class::SCRIPT, "getCachedRegexp", sig(REGEXP, &[JType::Int]));
        m.dup();
        m.if_non_null(done);
        m.pop();

        DRegexpSlot { index, done }
    }

    /// Publish the regexp compiled from the pattern string on the stack. The
    /// runtime stores it only if the slot is still empty and returns the
    /// slot's value, so every execution observes the same regexp.
    pub fn publish_dregexp(&mut self, m: &mut MethodEmitter, slot: DRegexpSlot, options: i32) {
        m.load(THIS);
        m.swap();
        m.push_index(slot.index);
        m.push_int(options);
        m.invoke_virtual(class::SCRIPT, "cacheRegexp", sig(REGEXP, &[RSTRING, JType::Int, JType::Int]));
        m.mark(slot.done);
    }

    // ===== Constants =====

    /// Look up a constant in the current lexical scope
    pub fn cache_constant(&mut self, m: &mut MethodEmitter, name: &str) -> usize {
        let index = self.site(CacheKind::Constant, name);

        m.load(THIS);
        m.load(CONTEXT);
        invoke_accessor(
            m,
            CacheKind::Constant,
            index,
            "getConstant",
            &[JType::CONTEXT],
            &[JType::STRING],
            JType::VALUE,
            |m| m.ldc_str(name),
        );
        index
    }

    /// `defined?(Name)`: the description string or nil
    pub fn cache_constant_defined(&mut self, m: &mut MethodEmitter, name: &str) -> usize {
        let index = self.site(CacheKind::Constant, name);

        m.load(THIS);
        m.load(CONTEXT);
        m.push_index(index);
        m.ldc_str(name);
        m.invoke_virtual(
            class::SCRIPT,
            "getConstantDefined",
            sig(JType::VALUE, &[JType::CONTEXT, JType::Int, JType::STRING]),
        );
        index
    }

    /// Look up a constant and leave its truthiness as a boolean
    pub fn cache_constant_boolean(&mut self, m: &mut MethodEmitter, name: &str) -> usize {
        let index = self.site(CacheKind::Constant, name);

        m.load(THIS);
        m.load(CONTEXT);
        m.push_index(index);
        m.ldc_str(name);
        m.invoke_virtual(
            class::SCRIPT,
            "getConstantBoolean",
            sig(JType::Boolean, &[JType::CONTEXT, JType::Int, JType::STRING]),
        );
        index
    }

    /// `Target::Name` with the target module on the stack
    pub fn cache_constant_from(&mut self, m: &mut MethodEmitter, name: &str) -> usize {
        let index = self.site(CacheKind::Constant, name);

        m.load(THIS);
        m.swap();
        m.load(CONTEXT);
        m.push_index(index);
        m.ldc_str(name);
        m.invoke_virtual(
            class::SCRIPT,
            "getConstantFrom",
            sig(JType::VALUE, &[JType::VALUE, JType::CONTEXT, JType::Int, JType::STRING]),
        );
        index
    }

    // ===== Instance Variables =====

    /// Read an instance variable of self
    pub fn cached_get_variable(&mut self, m: &mut MethodEmitter, name: &str) -> usize {
        let index = self.site(CacheKind::VariableReader, name);

        m.load(THIS);
        m.load(CONTEXT);
        m.load(SELF);
        invoke_accessor(
            m,
            CacheKind::VariableReader,
            index,
            "getVariable",
            &[JType::CONTEXT, JType::VALUE],
            &[JType::STRING],
            JType::VALUE,
            |m| m.ldc_str(name),
        );
        index
    }

    /// `defined?(@name)`
    pub fn cached_get_variable_defined(&mut self, m: &mut MethodEmitter, name: &str) -> usize {
        let index = self.site(CacheKind::VariableReader, name);

        m.load(THIS);
        m.load(CONTEXT);
        m.load(SELF);
        m.push_index(index);
        m.ldc_str(name);
        m.invoke_virtual(
            class::SCRIPT,
            "getVariableDefined",
            sig(JType::VALUE, &[JType::CONTEXT, JType::VALUE, JType::Int, JType::STRING]),
        );
        index
    }

    /// First half of an instance-variable write: pushes the accessor target
    /// and self. The caller pushes the value, then calls `finish_set_variable`.
    pub fn begin_set_variable(&mut self, m: &mut MethodEmitter) {
        m.load(THIS);
        m.load(SELF);
    }

    /// Second half of an instance-variable write; leaves the value on the stack
    pub fn finish_set_variable(&mut self, m: &mut MethodEmitter, name: &str) -> usize {
        let index = self.site(CacheKind::VariableWriter, name);

        invoke_accessor(
            m,
            CacheKind::VariableWriter,
            index,
            "setVariable",
            &[JType::VALUE, JType::VALUE],
            &[JType::STRING],
            JType::VALUE,
            |m| m.ldc_str(name),
        );
        index
    }

    // ===== Methods, Closures, Scopes =====

    /// Look up a method on self
    pub fn cache_method(&mut self, m: &mut MethodEmitter, name: &str) -> usize {
        self.cache_method_on(m, name, SELF)
    }

    /// Look up a method on the object held in `receiver_slot`
    pub fn cache_method_on(&mut self, m: &mut MethodEmitter, name: &str, receiver_slot: u16) -> usize {
        let index = self.site(CacheKind::Method, name);

        m.load(THIS);
        m.load(CONTEXT);
        m.load(receiver_slot);
        invoke_accessor(
            m,
            CacheKind::Method,
            index,
            "getMethod",
            &[JType::CONTEXT, JType::VALUE],
            &[JType::STRING],
            DYNAMIC_METHOD,
            |m| m.ldc_str(name),
        );
        index
    }

    /// Load the block body of a compiled closure. A static-scope slot is
    /// reserved for the closure and threaded into its descriptor.
    pub fn cache_closure(&mut self, m: &mut MethodEmitter, block: &BlockDescriptor) -> ClosureSlots {
        let scope = self.reserve_static_scope();
        let block_body = self.site(CacheKind::BlockBody, &block.method);
        let descriptor = block.encode(scope);

        m.load(THIS);
        m.load(CONTEXT);
        invoke_accessor(
            m,
            CacheKind::BlockBody,
            block_body,
            "getBlockBody",
            &[JType::CONTEXT],
            &[JType::STRING],
            BLOCK_BODY,
            |m| m.ldc_str(descriptor),
        );
        ClosureSlots { block_body, scope }
    }

    /// Load a callback that invokes a compiled method of this unit as a block
    pub fn cache_special_closure(&mut self, m: &mut MethodEmitter, frame: &FrameLayout, method: &str) -> usize {
        let index = self.site(CacheKind::BlockCallback, method);

        m.load(THIS);
        m.load(frame.runtime());
        invoke_accessor(
            m,
            CacheKind::BlockCallback,
            index,
            "getBlockCallback",
            &[JType::RUNTIME],
            &[JType::STRING],
            BLOCK_CALLBACK,
            |m| m.ldc_str(method),
        );
        index
    }

    /// Reserve a static-scope slot without emitting anything
    pub fn reserve_static_scope(&mut self) -> usize {
        let index = self.counts.next(CacheKind::Scope);
        trace!(target: "garnet::jit::cache", index, "static scope");
        index
    }

    /// Load a static scope, decoding it on first use
    pub fn cache_static_scope(&mut self, m: &mut MethodEmitter, scope: &StaticScope) -> usize {
        let index = self.reserve_static_scope();

        m.load(THIS);
        m.load(CONTEXT);
        invoke_accessor(
            m,
            CacheKind::Scope,
            index,
            "getScope",
            &[JType::CONTEXT],
            &[JType::STRING],
            STATIC_SCOPE,
            |m| m.ldc_str(scope.encode()),
        );
        index
    }

    /// Load a static scope whose slot was populated earlier
    pub fn load_static_scope(&self, m: &mut MethodEmitter, index: usize) -> CompileResult<()> {
        if index >= self.counts.get(CacheKind::Scope) {
            return Err(CompileError::internal(format!(
                "static scope {index} was never reserved"
            )));
        }
        m.load(THIS);
        invoke_accessor(m, CacheKind::Scope, index, "getScope", &[], &[], STATIC_SCOPE, |_| {});
        Ok(())
    }

    fn site(&mut self, kind: CacheKind, name: &str) -> usize {
        let index = self.counts.next(kind);
        trace!(target: "garnet::jit::cache", index, name, %kind, "site");
        index
    }

    // ===== Finishing =====

    fn ensure_runtime_cache_inited(&mut self, init: &mut MethodEmitter) {
        if !self.runtime_cache_inited {
            init.load(THIS);
            init.invoke_virtual(class::SCRIPT, "initRuntimeCache", sig(JType::Void, &[]));
            self.runtime_cache_inited = true;
        }
    }

    /// The descriptor for the current cache state
    pub fn descriptor(&self) -> InitDescriptor {
        InitDescriptor {
            call_sites: self.call_sites.clone(),
            counts: self.counts,
        }
    }

    /// Write the cache initializer into `init`. Returns the descriptor string,
    /// or `None` when the unit caches nothing.
    pub fn finish(&mut self, init: &mut MethodEmitter) -> CompileResult<Option<String>> {
        if self.counts.total() == 0 {
            return Ok(None);
        }

        let descriptor = self.descriptor().encode()?;
        self.ensure_runtime_cache_inited(init);

        init.load(THIS);
        init.ldc_str(descriptor.clone());
        init.invoke_virtual(class::SCRIPT, "initFromDescriptor", sig(JType::Void, &[JType::STRING]));

        // strings load their encoding from the cache, so encodings go first
        for (index, name) in self.encoding_names.iter().enumerate() {
            init.load(THIS);
            init.push_index(index);
            init.ldc_str(name.clone());
            init.invoke_virtual(class::SCRIPT, "setEncoding", sig(JType::Void, &[JType::Int, JType::STRING]));
        }

        for (index, entry) in self.string_entries.iter().enumerate() {
            init.load(THIS);
            init.push_index(index);
            init.ldc_str(raw_bytes_to_string(&entry.raw));
            load_encoding(init, entry.encoding);
            init.invoke_virtual(
                class::SCRIPT,
                "setByteList",
                sig(JType::Void, &[JType::Int, JType::STRING, ENCODING]),
            );
        }

        debug!(
            target: "garnet::jit::cache",
            call_sites = self.call_sites.len(),
            entries = self.counts.total(),
            strings = self.string_entries.len(),
            encodings = self.encoding_names.len(),
            "wrote cache initializer"
        );
        Ok(Some(descriptor))
    }
}

/// Look up or assign the index of a pooled key
fn pooled<K: std::hash::Hash + Eq>(
    counts: &mut CacheCounts,
    map: &mut HashMap<K, usize>,
    key: K,
    kind: CacheKind,
) -> usize {
    *map.entry(key).or_insert_with(|| {
        let index = counts.next(kind);
        trace!(target: "garnet::jit::cache", index, %kind, "pooled");
        index
    })
}

/// Invoke the numbered or generic accessor for `index`. The caller has
/// already pushed `this` and the leading arguments; `push_trailing` pushes
/// the arguments that follow the index in the generic form.
#[allow(clippy::too_many_arguments)]
fn invoke_accessor(
    m: &mut MethodEmitter,
    kind: CacheKind,
    index: usize,
    stem: &str,
    leading: &[JType],
    trailing: &[JType],
    ret: JType,
    push_trailing: impl FnOnce(&mut MethodEmitter),
) {
    let mut params = leading.to_vec();
    if index < kind.numbered_threshold() {
        push_trailing(m);
        params.extend_from_slice(trailing);
        m.invoke_virtual(class::SCRIPT, format!("{stem}{index}"), sig(ret, &params));
    } else {
        m.push_index(index);
        push_trailing(m);
        params.push(JType::Int);
        params.extend_from_slice(trailing);
        m.invoke_virtual(class::SCRIPT, stem, sig(ret, &params));
    }
}

fn load_encoding(m: &mut MethodEmitter, index: usize) {
    m.load(THIS);
    invoke_accessor(m, CacheKind::Encoding, index, "getEncoding", &[], &[], ENCODING, |_| {});
}

/// One char per byte (ISO-8859-1), so the runtime can recover the exact bytes
fn raw_bytes_to_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| char::from(*b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::{Insn, InvokeKind};

    fn method() -> MethodEmitter {
        MethodEmitter::new("test", FrameLayout::boxed().signature())
    }

    fn last_invoke(m: &MethodEmitter) -> (String, usize) {
        m.code()
            .iter()
            .rev()
            .find_map(|insn| match insn {
                Insn::Invoke {
                    kind: InvokeKind::Virtual,
                    name,
                    sig,
                    ..
                } => Some((name.clone(), sig.param_count())),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn symbols_are_pooled() {
        let mut cache = CacheCompiler::new();
        let mut m = method();

        let a = cache.cache_symbol(&mut m, "foo");
        let b = cache.cache_symbol(&mut m, "bar");
        let c = cache.cache_symbol(&mut m, "foo");

        assert_eq!((a, b, c), (0, 1, 0));
        assert_eq!(cache.counts().get(CacheKind::Symbol), 2);
    }

    #[test]
    fn call_sites_are_never_pooled() {
        let mut cache = CacheCompiler::new();
        let mut m = method();

        let a = cache.cache_call_site(&mut m, "puts", CallType::Functional).unwrap();
        let b = cache.cache_call_site(&mut m, "puts", CallType::Functional).unwrap();

        assert_ne!(a, b);
        assert_eq!(cache.counts().get(CacheKind::CallSite), 2);
    }

    #[test]
    fn symbol_accessor_threshold() {
        let mut cache = CacheCompiler::new();
        let mut m = method();

        for i in 0..9 {
            cache.cache_symbol(&mut m, &format!("s{i}"));
        }
        assert_eq!(last_invoke(&m), ("getSymbol8".to_string(), 2));

        cache.cache_symbol(&mut m, "s9");
        assert_eq!(last_invoke(&m), ("getSymbol9".to_string(), 2));

        cache.cache_symbol(&mut m, "s10");
        assert_eq!(last_invoke(&m), ("getSymbol".to_string(), 3));
        assert_eq!(
            m.code()[m.len() - 3..],
            [
                Insn::PushInt(10),
                Insn::Ldc(crate::emit::Constant::Str("s10".to_string())),
                m.code()[m.len() - 1].clone(),
            ]
        );
    }

    #[test]
    fn small_fixnums_skip_the_cache() {
        let mut cache = CacheCompiler::new();
        let mut m = method();
        let frame = FrameLayout::boxed();

        assert_eq!(cache.cache_fixnum(&mut m, &frame, 5), None);
        assert_eq!(cache.cache_fixnum(&mut m, &frame, -1), None);
        assert_eq!(cache.cache_fixnum(&mut m, &frame, 6), Some(0));
        assert_eq!(cache.counts().get(CacheKind::Fixnum), 1);
    }

    #[test]
    fn wide_fixnums_use_generic_accessor() {
        let mut cache = CacheCompiler::new();
        let mut m = method();
        let frame = FrameLayout::boxed();

        cache.cache_fixnum(&mut m, &frame, 1 << 40);
        assert_eq!(last_invoke(&m), ("getFixnum".to_string(), 3));
    }

    #[test]
    fn floats_keep_signed_zero_apart() {
        let mut cache = CacheCompiler::new();
        let mut m = method();
        let frame = FrameLayout::boxed();

        let pos = cache.cache_float(&mut m, &frame, 0.0);
        let neg = cache.cache_float(&mut m, &frame, -0.0);
        let again = cache.cache_float(&mut m, &frame, 0.0);
        assert_ne!(pos, neg);
        assert_eq!(pos, again);
    }

    #[test]
    fn strings_register_their_encoding() {
        let mut cache = CacheCompiler::new();
        let mut m = method();
        let frame = FrameLayout::boxed();

        let a = cache.cache_string(&mut m, &frame, b"hi", "UTF-8");
        let b = cache.cache_string(&mut m, &frame, b"hi", "ASCII-8BIT");
        let c = cache.cache_string(&mut m, &frame, b"hi", "UTF-8");

        assert_eq!((a, b, c), (0, 1, 0));
        assert_eq!(cache.counts().get(CacheKind::String), 2);
        assert_eq!(cache.counts().get(CacheKind::Encoding), 2);
    }

    #[test]
    fn constants_get_a_slot_per_site() {
        let mut cache = CacheCompiler::new();
        let mut m = method();

        let a = cache.cache_constant(&mut m, "Foo");
        let b = cache.cache_constant(&mut m, "Foo");
        assert_ne!(a, b);
    }

    #[test]
    fn dregexp_leaves_one_value() {
        let mut cache = CacheCompiler::new();
        let mut m = method();

        let slot = cache.begin_dregexp(&mut m);
        m.push_null();
        cache.publish_dregexp(&mut m, slot, 0);
        m.areturn();

        let code = m.end().unwrap();
        assert_eq!(code.count_invocations("getCachedRegexp"), 1);
        assert_eq!(code.count_invocations("cacheRegexp"), 1);
    }

    #[test]
    fn load_unreserved_scope_fails() {
        let cache = CacheCompiler::new();
        let mut m = method();
        assert!(cache.load_static_scope(&mut m, 0).is_err());
    }

    #[test]
    fn empty_cache_writes_nothing() {
        let mut cache = CacheCompiler::new();
        let mut init = MethodEmitter::new("<init>", sig(JType::Void, &[]));

        assert_eq!(cache.finish(&mut init).unwrap(), None);
        assert!(init.is_empty());
    }

    #[test]
    fn finish_binds_encodings_before_strings() {
        let mut cache = CacheCompiler::new();
        let mut m = method();
        let frame = FrameLayout::boxed();
        cache.cache_string(&mut m, &frame, b"caf\xc3\xa9", "UTF-8");
        cache.cache_call_site(&mut m, "puts", CallType::Functional).unwrap();

        let mut init = MethodEmitter::new("<init>", sig(JType::Void, &[]));
        let descriptor = cache.finish(&mut init).unwrap().unwrap();
        init.return_void();
        let init = init.end().unwrap();

        let names = init.invoked_names();
        let set_encoding = names.iter().position(|n| *n == "setEncoding").unwrap();
        let set_byte_list = names.iter().position(|n| *n == "setByteList").unwrap();
        assert_eq!(names[0], "initRuntimeCache");
        assert_eq!(names[1], "initFromDescriptor");
        assert!(set_encoding < set_byte_list);

        let parsed = InitDescriptor::parse(&descriptor).unwrap();
        assert_eq!(parsed.counts, cache.counts());
    }
}
