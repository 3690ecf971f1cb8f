//! Init descriptor - the compact string a unit's initializer hands to the
//! runtime to rebuild its cache table
//!
//! ```text
//! name \uFFFF tag \uFFFF name \uFFFF tag ... \uFFFF <counts>
//! ```
//!
//! Each call site contributes its method name and a one-letter call type
//! (`N`ormal, `F`unctional, `V`ariable, `S`uper; super sites are named
//! `super`). `<counts>` holds one character per counted kind whose code point
//! is that kind's entry count, in `CacheKind::COUNTED` order.

use thiserror::Error;

use super::kind::{CacheCounts, CacheKind};
use crate::error::{CompileError, CompileResult};
use crate::invocation::CallType;

/// Separator between descriptor fields
pub const SENTINEL: char = '\u{FFFF}';

/// Largest count one descriptor character can hold (below the surrogates)
pub const MAX_ENCODABLE_COUNT: usize = 0xD7FF;

/// Errors reported while parsing a descriptor
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("descriptor has no counts section")]
    MissingCounts,

    #[error("expected {expected} count characters, found {found}")]
    WrongCountLength { expected: usize, found: usize },

    #[error("call site list has an odd number of fields")]
    UnpairedCallSite,

    #[error("unknown call type tag {0:?}")]
    UnknownCallType(String),
}

/// Decoded form of a descriptor
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InitDescriptor {
    /// Call sites in slot order
    pub call_sites: Vec<(String, CallType)>,
    /// Per-kind entry counts (the call-site count equals `call_sites.len()`)
    pub counts: CacheCounts,
}

impl InitDescriptor {
    /// Render the descriptor string
    pub fn encode(&self) -> CompileResult<String> {
        let mut out = String::with_capacity(self.call_sites.len() * 5 + 16);

        for (i, (name, call_type)) in self.call_sites.iter().enumerate() {
            if i > 0 {
                out.push(SENTINEL);
            }
            if *call_type == CallType::Super {
                out.push_str("super");
            } else {
                out.push_str(name);
            }
            out.push(SENTINEL);
            out.push(call_type.tag());
        }

        out.push(SENTINEL);
        for (kind, count) in self.counts.counted() {
            out.push(encode_count(kind, count)?);
        }
        Ok(out)
    }

    /// Parse a descriptor string the way the runtime initializer does
    pub fn parse(descriptor: &str) -> Result<Self, DescriptorError> {
        let mut pieces: Vec<&str> = descriptor.split(SENTINEL).collect();
        let counts_piece = pieces.pop().ok_or(DescriptorError::MissingCounts)?;
        if pieces.is_empty() {
            return Err(DescriptorError::MissingCounts);
        }

        let found = counts_piece.chars().count();
        if found != CacheKind::COUNTED.len() {
            return Err(DescriptorError::WrongCountLength {
                expected: CacheKind::COUNTED.len(),
                found,
            });
        }

        let mut counts = CacheCounts::default();
        for (kind, ch) in CacheKind::COUNTED.iter().zip(counts_piece.chars()) {
            counts.set(*kind, ch as usize);
        }

        let mut call_sites = Vec::new();
        if pieces != [""] {
            if pieces.len() % 2 != 0 {
                return Err(DescriptorError::UnpairedCallSite);
            }
            for pair in pieces.chunks(2) {
                let mut tag = pair[1].chars();
                let call_type = match (tag.next(), tag.next()) {
                    (Some(c), None) => CallType::from_tag(c),
                    _ => None,
                }
                .ok_or_else(|| DescriptorError::UnknownCallType(pair[1].to_string()))?;
                call_sites.push((pair[0].to_string(), call_type));
            }
        }
        counts.set(CacheKind::CallSite, call_sites.len());

        Ok(Self { call_sites, counts })
    }
}

fn encode_count(kind: CacheKind, count: usize) -> CompileResult<char> {
    if count > MAX_ENCODABLE_COUNT {
        return Err(CompileError::TooLarge { kind, count });
    }
    char::from_u32(count as u32).ok_or(CompileError::TooLarge { kind, count })
}
