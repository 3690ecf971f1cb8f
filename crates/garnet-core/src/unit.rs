//! Compiled units
//!
//! A `CompiledUnit` is the immutable output of one `ScriptCompiler`: every
//! method it emitted, the cache initializer, the descriptor string that
//! initializer hands the runtime, and the arena of body segments.

use std::fmt::Write;

use crate::body::BaseRole;
use crate::cache::CacheCounts;
use crate::emit::{disassemble_method, MethodCode};
use crate::frame::FrameLayout;

/// Index of a segment in a unit's segment arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentId(pub(crate) usize);

impl SegmentId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// One physical method a body was compiled into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    pub id: SegmentId,
    /// Method name
    pub name: String,
    pub base: BaseRole,
    /// The segment that forwards into this one
    pub predecessor: Option<SegmentId>,
}

/// A root method callers can invoke
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    /// Method name in the unit
    pub name: String,
    /// Name the method was defined with
    pub ruby_name: String,
    /// Set when a specific-arity body exists alongside the boxed entry
    pub specific_arity: Option<u16>,
}

impl EntryPoint {
    /// Layout of the method holding the body
    #[must_use]
    pub fn body_layout(&self) -> FrameLayout {
        self.specific_arity
            .map_or_else(FrameLayout::boxed, FrameLayout::specific)
    }
}

/// Size and cache statistics of a finished unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnitStats {
    pub methods: usize,
    pub total_code_size: usize,
    pub largest_method: usize,
    pub chained_segments: usize,
    pub cache_counts: CacheCounts,
}

/// Output of a finished script compiler
#[derive(Debug, Clone)]
pub struct CompiledUnit {
    pub class_name: String,
    pub source_file: String,
    pub methods: Vec<MethodCode>,
    /// Unit constructor; runs the cache initializer
    pub init: MethodCode,
    /// Descriptor handed to the runtime cache, if anything was cached
    pub descriptor: Option<String>,
    pub segments: Vec<SegmentInfo>,
    pub entry_points: Vec<EntryPoint>,
    pub stats: UnitStats,
}

impl CompiledUnit {
    /// Method with the given name and descriptor
    #[must_use]
    pub fn find(&self, name: &str, descriptor: &str) -> Option<&MethodCode> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.descriptor() == descriptor)
    }

    /// Every method with the given name (one per signature)
    pub fn methods_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a MethodCode> + 'a {
        self.methods.iter().filter(move |m| m.name == name)
    }

    /// Entry point defined under `ruby_name`
    #[must_use]
    pub fn entry_point(&self, ruby_name: &str) -> Option<&EntryPoint> {
        self.entry_points.iter().find(|e| e.ruby_name == ruby_name)
    }

    /// Body method of the first entry point
    #[must_use]
    pub fn root(&self) -> Option<&MethodCode> {
        let entry = self.entry_points.first()?;
        self.find(&entry.name, &entry.body_layout().signature().descriptor())
    }

    /// Segments in forwarding order, starting from the one named `first`
    #[must_use]
    pub fn segment_chain(&self, first: &str) -> Vec<&SegmentInfo> {
        let mut chain = Vec::new();
        let mut current = self.segments.iter().find(|s| s.name == first);
        while let Some(segment) = current {
            chain.push(segment);
            current = self
                .segments
                .iter()
                .find(|s| s.predecessor == Some(segment.id));
        }
        chain
    }

    /// Disassembly of every method, initializer last
    #[must_use]
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "unit {} ({})", self.class_name, self.source_file);
        for method in self.methods.iter().chain(std::iter::once(&self.init)) {
            out.push('\n');
            out.push_str(&disassemble_method(method));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{compile_root, simple_scope};

    #[test]
    fn root_finds_the_body_method() {
        let unit = compile_root(simple_scope(2), |body| {
            body.retrieve_local_variable(1, 0)
        })
        .unwrap();

        let entry = &unit.entry_points[0];
        assert_eq!(entry.specific_arity, Some(2));
        assert_eq!(unit.methods_named(&entry.name).count(), 2);
        assert_eq!(unit.root().unwrap().signature.param_count(), 5);
        assert!(unit.disassemble().contains(&entry.name));
    }
}
