//! Cache entry kinds and per-kind counters

use std::fmt;

/// Number of numbered accessors (`getSymbol0` .. `getSymbol9`) the runtime
/// base class provides per kind
pub const NUMBERED_ACCESSORS: usize = 10;

/// Kind of a runtime cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheKind {
    Scope,
    Symbol,
    Fixnum,
    Float,
    Constant,
    Regexp,
    BigInteger,
    VariableReader,
    VariableWriter,
    BlockBody,
    BlockCallback,
    Method,
    String,
    Encoding,
    CallSite,
}

impl CacheKind {
    /// Kinds whose counts are written to the init descriptor, in order
    pub const COUNTED: [CacheKind; 14] = [
        CacheKind::Scope,
        CacheKind::Symbol,
        CacheKind::Fixnum,
        CacheKind::Float,
        CacheKind::Constant,
        CacheKind::Regexp,
        CacheKind::BigInteger,
        CacheKind::VariableReader,
        CacheKind::VariableWriter,
        CacheKind::BlockBody,
        CacheKind::BlockCallback,
        CacheKind::Method,
        CacheKind::String,
        CacheKind::Encoding,
    ];

    /// Indices below this use a numbered accessor, others the generic one
    #[must_use]
    pub fn numbered_threshold(self) -> usize {
        match self {
            CacheKind::Scope
            | CacheKind::Symbol
            | CacheKind::Fixnum
            | CacheKind::Float
            | CacheKind::Constant
            | CacheKind::Regexp
            | CacheKind::BigInteger
            | CacheKind::VariableReader
            | CacheKind::VariableWriter
            | CacheKind::BlockBody
            | CacheKind::BlockCallback
            | CacheKind::Method
            | CacheKind::String
            | CacheKind::Encoding
            | CacheKind::CallSite => NUMBERED_ACCESSORS,
        }
    }

    /// Returns true if equal keys share one slot
    ///
    /// Literal kinds are pooled. Site kinds (call sites, constant lookups,
    /// variable accessors, method lookups, closures, scopes and dynamic
    /// regexps) carry per-site runtime state and get a slot per emission.
    #[must_use]
    pub fn is_pooled(self) -> bool {
        matches!(
            self,
            CacheKind::Symbol
                | CacheKind::Fixnum
                | CacheKind::Float
                | CacheKind::Regexp
                | CacheKind::BigInteger
                | CacheKind::String
                | CacheKind::Encoding
        )
    }

    fn position(self) -> Option<usize> {
        Self::COUNTED.iter().position(|k| *k == self)
    }
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CacheKind::Scope => "scope",
            CacheKind::Symbol => "symbol",
            CacheKind::Fixnum => "fixnum",
            CacheKind::Float => "float",
            CacheKind::Constant => "constant",
            CacheKind::Regexp => "regexp",
            CacheKind::BigInteger => "big integer",
            CacheKind::VariableReader => "variable reader",
            CacheKind::VariableWriter => "variable writer",
            CacheKind::BlockBody => "block body",
            CacheKind::BlockCallback => "block callback",
            CacheKind::Method => "method",
            CacheKind::String => "string",
            CacheKind::Encoding => "encoding",
            CacheKind::CallSite => "call site",
        };
        f.write_str(name)
    }
}

/// Running entry counts for every kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheCounts {
    counted: [usize; 14],
    call_sites: usize,
}

impl CacheCounts {
    /// Count for one kind
    #[must_use]
    pub fn get(&self, kind: CacheKind) -> usize {
        match kind.position() {
            Some(position) => self.counted[position],
            None => self.call_sites,
        }
    }

    /// Set the count for one kind
    pub fn set(&mut self, kind: CacheKind, count: usize) {
        match kind.position() {
            Some(position) => self.counted[position] = count,
            None => self.call_sites = count,
        }
    }

    /// Allocate the next index of a kind
    pub(crate) fn next(&mut self, kind: CacheKind) -> usize {
        let index = self.get(kind);
        self.set(kind, index + 1);
        index
    }

    /// Sum over every kind, call sites included
    #[must_use]
    pub fn total(&self) -> usize {
        self.counted.iter().sum::<usize>() + self.call_sites
    }

    /// Counts of the descriptor kinds, in descriptor order
    pub fn counted(&self) -> impl Iterator<Item = (CacheKind, usize)> + '_ {
        CacheKind::COUNTED.iter().copied().zip(self.counted.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_track_kinds_independently() {
        let mut counts = CacheCounts::default();
        assert_eq!(counts.next(CacheKind::Symbol), 0);
        assert_eq!(counts.next(CacheKind::Symbol), 1);
        assert_eq!(counts.next(CacheKind::CallSite), 0);
        assert_eq!(counts.get(CacheKind::Symbol), 2);
        assert_eq!(counts.get(CacheKind::Fixnum), 0);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn descriptor_order_is_stable() {
        let kinds: Vec<_> = CacheCounts::default().counted().map(|(k, _)| k).collect();
        assert_eq!(kinds.first(), Some(&CacheKind::Scope));
        assert_eq!(kinds.last(), Some(&CacheKind::Encoding));
        assert!(!kinds.contains(&CacheKind::CallSite));
    }
}
