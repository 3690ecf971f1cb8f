//! Literals, constants and instance variables
//!
//! Thin wrappers that route through the unit's cache compiler with this
//! body's frame layout.

use super::BodyCompiler;
use crate::emit::{class, sig, JType};
use crate::error::CompileResult;
use crate::invocation::CompilerCallback;
use crate::scope::StaticScope;

impl BodyCompiler<'_> {
    pub fn create_new_fixnum(&mut self, value: i64) {
        self.script
            .cache
            .cache_fixnum(&mut self.method, &self.layout, value);
    }

    pub fn create_new_float(&mut self, value: f64) {
        self.script
            .cache
            .cache_float(&mut self.method, &self.layout, value);
    }

    /// `hex` is the base-16 magnitude, optionally prefixed with `-`
    pub fn create_new_bignum(&mut self, hex: &str) {
        self.script
            .cache
            .cache_big_integer(&mut self.method, &self.layout, hex);
    }

    pub fn create_new_symbol(&mut self, name: &str) {
        self.script.cache.cache_symbol(&mut self.method, name);
    }

    /// A fresh string in the source encoding
    pub fn create_new_string(&mut self, bytes: &[u8]) {
        let encoding = self.script.config().source_encoding.clone();
        self.create_new_string_with_encoding(bytes, &encoding);
    }

    pub fn create_new_string_with_encoding(&mut self, bytes: &[u8], encoding: &str) {
        self.script
            .cache
            .cache_string(&mut self.method, &self.layout, bytes, encoding);
    }

    /// The `Encoding` object named `name`
    pub fn create_new_encoding(&mut self, name: &str) {
        self.script
            .cache
            .cache_ruby_encoding(&mut self.method, &self.layout, name);
    }

    pub fn create_new_regexp(&mut self, pattern: &[u8], options: i32) {
        let encoding = self.script.config().source_encoding.clone();
        self.script
            .cache
            .cache_regexp(&mut self.method, pattern, &encoding, options);
    }

    /// Interpolated regexp compiled once, on first execution. `pattern`
    /// pushes the interpolated string.
    pub fn create_new_dregexp(&mut self, mut pattern: CompilerCallback<'_>, options: i32) -> CompileResult<()> {
        let slot = self.script.cache.begin_dregexp(&mut self.method);
        pattern.call(self)?;
        self.script.cache.publish_dregexp(&mut self.method, slot, options);
        Ok(())
    }

    /// An array literal with one callback per element
    pub fn create_new_array(&mut self, elements: Vec<CompilerCallback<'_>>) -> CompileResult<()> {
        self.load_runtime();
        self.method.push_index(elements.len());
        self.method.new_array(class::VALUE);
        for (index, mut element) in elements.into_iter().enumerate() {
            self.method.dup();
            self.method.push_index(index);
            element.call(self)?;
            self.method.array_store();
        }
        self.method.invoke_static(
            class::HELPERS,
            "newArray",
            sig(JType::VALUE, &[JType::RUNTIME, JType::VALUE_ARRAY]),
        );
        Ok(())
    }

    // ===== Constants =====

    pub fn retrieve_constant(&mut self, name: &str) {
        self.script.cache.cache_constant(&mut self.method, name);
    }

    /// `Target::Name`; `target` pushes the module
    pub fn retrieve_constant_from(&mut self, mut target: CompilerCallback<'_>, name: &str) -> CompileResult<()> {
        target.call(self)?;
        self.script.cache.cache_constant_from(&mut self.method, name);
        Ok(())
    }

    /// `defined?(Name)`
    pub fn is_constant_defined(&mut self, name: &str) {
        self.script
            .cache
            .cache_constant_defined(&mut self.method, name);
    }

    /// Branch condition on a constant's truthiness
    pub fn retrieve_constant_boolean(&mut self, name: &str) {
        self.script
            .cache
            .cache_constant_boolean(&mut self.method, name);
    }

    // ===== Instance Variables =====

    pub fn retrieve_instance_variable(&mut self, name: &str) {
        self.script.cache.cached_get_variable(&mut self.method, name);
    }

    /// `@name = value`; leaves the value
    pub fn assign_instance_variable(&mut self, name: &str, mut value: CompilerCallback<'_>) -> CompileResult<()> {
        self.script.cache.begin_set_variable(&mut self.method);
        value.call(self)?;
        self.script.cache.finish_set_variable(&mut self.method, name);
        Ok(())
    }

    /// `defined?(@name)`
    pub fn is_instance_variable_defined(&mut self, name: &str) {
        self.script
            .cache
            .cached_get_variable_defined(&mut self.method, name);
    }

    // ===== Methods and Scopes =====

    /// The method `name` as seen from self
    pub fn retrieve_method(&mut self, name: &str) {
        self.script.cache.cache_method(&mut self.method, name);
    }

    /// A block that calls back into the compiled method `method` of this unit
    pub fn create_block_callback(&mut self, method: &str) {
        self.script
            .cache
            .cache_special_closure(&mut self.method, &self.layout, method);
    }

    /// A static scope, decoded once; returns its cache slot
    pub fn retrieve_static_scope(&mut self, scope: &StaticScope) -> usize {
        self.script.cache.cache_static_scope(&mut self.method, scope)
    }

    /// Reload a static scope cached earlier in this unit
    pub fn reload_static_scope(&mut self, index: usize) -> CompileResult<()> {
        self.script.cache.load_static_scope(&mut self.method, index)
    }
}
