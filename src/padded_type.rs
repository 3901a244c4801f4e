use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64};

// all padding in this crate targets 64-byte lines; the worker slot asserts
// this at compile time as well
pub(crate) const CACHE_LINE: usize = 64;

/// Aligns the wrapped value to its own cache line so independently mutated
/// atomics never share one.
#[repr(align(64))]
pub(crate) struct CacheAligned<T>(T);

impl<T> CacheAligned<T> {
    pub(crate) const fn new(value: T) -> Self {
        CacheAligned(value)
    }
}

impl<T> Deref for CacheAligned<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> DerefMut for CacheAligned<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

pub(crate) type PaddedAtomicU32 = CacheAligned<AtomicU32>;
pub(crate) type PaddedAtomicU64 = CacheAligned<AtomicU64>;
pub(crate) type PaddedAtomicI64 = CacheAligned<AtomicI64>;

const _: () = assert!(std::mem::align_of::<PaddedAtomicU32>() == CACHE_LINE);
const _: () = assert!(std::mem::size_of::<PaddedAtomicI64>() == CACHE_LINE);
