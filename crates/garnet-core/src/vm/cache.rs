//! Runtime cache of one loaded unit
//!
//! Built from the init descriptor the compiler wrote, then populated by the
//! unit's constructor (encodings and byte lists) and lazily by the
//! accessors (everything else). Each slot is written at most once.

use std::cell::OnceCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use super::error::{RuntimeError, RuntimeErrorKind, RuntimeResult};
use super::value::{ByteList, Value};
use crate::cache::{CacheCounts, CacheKind, DescriptorError, InitDescriptor};
use crate::invocation::CallType;

#[derive(Debug, Default)]
pub struct RuntimeCache {
    call_sites: Vec<(String, CallType)>,
    counts: CacheCounts,
    slots: HashMap<CacheKind, Vec<OnceCell<Value>>>,
    encodings: Vec<Option<Rc<str>>>,
    byte_lists: Vec<Option<Rc<ByteList>>>,
}

impl RuntimeCache {
    /// Size every table from an encoded init descriptor
    pub fn from_descriptor(descriptor: &str) -> Result<Self, DescriptorError> {
        let InitDescriptor { call_sites, counts } = InitDescriptor::parse(descriptor)?;

        let slots = CacheKind::COUNTED
            .iter()
            .map(|kind| (*kind, (0..counts.get(*kind)).map(|_| OnceCell::new()).collect()))
            .collect();

        debug!(
            target: "garnet::jit::cache",
            call_sites = call_sites.len(),
            entries = counts.total(),
            "runtime cache initialized"
        );
        Ok(Self {
            encodings: vec![None; counts.get(CacheKind::Encoding)],
            byte_lists: vec![None; counts.get(CacheKind::String)],
            call_sites,
            counts,
            slots,
        })
    }

    #[must_use]
    pub fn counts(&self) -> CacheCounts {
        self.counts
    }

    #[must_use]
    pub fn call_sites(&self) -> &[(String, CallType)] {
        &self.call_sites
    }

    pub fn call_site(&self, index: usize) -> RuntimeResult<&(String, CallType)> {
        self.call_sites
            .get(index)
            .ok_or_else(|| out_of_range(CacheKind::CallSite, index))
    }

    fn cell(&self, kind: CacheKind, index: usize) -> RuntimeResult<&OnceCell<Value>> {
        self.slots
            .get(&kind)
            .and_then(|cells| cells.get(index))
            .ok_or_else(|| out_of_range(kind, index))
    }

    /// The value in a slot, if it has been populated
    pub fn get(&self, kind: CacheKind, index: usize) -> RuntimeResult<Option<Value>> {
        Ok(self.cell(kind, index)?.get().cloned())
    }

    /// The value in a slot, computing and storing it on first use
    pub fn get_or_init(
        &self,
        kind: CacheKind,
        index: usize,
        init: impl FnOnce() -> RuntimeResult<Value>,
    ) -> RuntimeResult<Value> {
        let cell = self.cell(kind, index)?;
        if let Some(value) = cell.get() {
            return Ok(value.clone());
        }
        let value = init()?;
        Ok(cell.get_or_init(|| value).clone())
    }

    /// Number of populated slots of `kind`
    #[must_use]
    pub fn populated(&self, kind: CacheKind) -> usize {
        self.slots
            .get(&kind)
            .map_or(0, |cells| cells.iter().filter(|c| c.get().is_some()).count())
    }

    pub fn set_encoding(&mut self, index: usize, name: &str) -> RuntimeResult<()> {
        let slot = self
            .encodings
            .get_mut(index)
            .ok_or_else(|| out_of_range(CacheKind::Encoding, index))?;
        *slot = Some(Rc::from(name));
        Ok(())
    }

    pub fn encoding(&self, index: usize) -> RuntimeResult<Rc<str>> {
        self.encodings
            .get(index)
            .cloned()
            .flatten()
            .ok_or_else(|| unset(CacheKind::Encoding, index))
    }

    /// Store a pooled string. `raw` carries one byte per char.
    pub fn set_byte_list(&mut self, index: usize, raw: &str, encoding: Rc<str>) -> RuntimeResult<()> {
        let bytes = raw
            .chars()
            .map(|c| {
                u8::try_from(u32::from(c)).map_err(|_| {
                    RuntimeError::new(RuntimeErrorKind::Internal(format!(
                        "byte list {index} holds non-latin-1 char {c:?}"
                    )))
                })
            })
            .collect::<RuntimeResult<Vec<u8>>>()?;
        let slot = self
            .byte_lists
            .get_mut(index)
            .ok_or_else(|| out_of_range(CacheKind::String, index))?;
        *slot = Some(Rc::new(ByteList { bytes, encoding }));
        Ok(())
    }

    pub fn byte_list(&self, index: usize) -> RuntimeResult<Rc<ByteList>> {
        self.byte_lists
            .get(index)
            .cloned()
            .flatten()
            .ok_or_else(|| unset(CacheKind::String, index))
    }
}

fn out_of_range(kind: CacheKind, index: usize) -> RuntimeError {
    RuntimeError::new(RuntimeErrorKind::Internal(format!(
        "{kind} slot {index} out of range"
    )))
}

fn unset(kind: CacheKind, index: usize) -> RuntimeError {
    RuntimeError::new(RuntimeErrorKind::Internal(format!(
        "{kind} slot {index} read before initialization"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> String {
        let mut counts = CacheCounts::default();
        counts.set(CacheKind::Symbol, 2);
        counts.set(CacheKind::String, 1);
        counts.set(CacheKind::Encoding, 1);
        counts.set(CacheKind::CallSite, 1);
        InitDescriptor {
            call_sites: vec![("puts".to_string(), CallType::Functional)],
            counts,
        }
        .encode()
        .unwrap()
    }

    #[test]
    fn tables_are_sized_from_the_descriptor() {
        let cache = RuntimeCache::from_descriptor(&descriptor()).unwrap();
        assert_eq!(cache.call_site(0).unwrap().0, "puts");
        assert!(cache.call_site(1).is_err());
        assert_eq!(cache.get(CacheKind::Symbol, 1).unwrap(), None);
        assert!(cache.get(CacheKind::Symbol, 2).is_err());
    }

    #[test]
    fn slots_are_written_once() {
        let cache = RuntimeCache::from_descriptor(&descriptor()).unwrap();
        let first = cache
            .get_or_init(CacheKind::Symbol, 0, || Ok(Value::symbol("a")))
            .unwrap();
        let second = cache
            .get_or_init(CacheKind::Symbol, 0, || Ok(Value::symbol("b")))
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.populated(CacheKind::Symbol), 1);
    }

    #[test]
    fn byte_lists_keep_raw_bytes() {
        let mut cache = RuntimeCache::from_descriptor(&descriptor()).unwrap();
        cache.set_encoding(0, "ASCII-8BIT").unwrap();
        let raw: String = [0xffu8, 0x00, b'a'].iter().map(|b| char::from(*b)).collect();
        cache.set_byte_list(0, &raw, cache.encoding(0).unwrap()).unwrap();

        let list = cache.byte_list(0).unwrap();
        assert_eq!(list.bytes, vec![0xff, 0x00, b'a']);
        assert_eq!(&*list.encoding, "ASCII-8BIT");
    }
}
