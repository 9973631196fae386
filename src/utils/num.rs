//! Numeric utilities: safe and centralized integer conversions.
//!
//! Guidelines
//! - Prefer fallible conversions (returning Option<T>) when a value out of range should stop the operation (e.g., parsing a length before slicing).
//! - Prefer lossless widening with explicit helpers to keep call sites consistent and searchable.

#[inline]
#[must_use]
pub fn u64_to_usize(v: u64) -> Option<usize> {
    usize::try_from(v).ok()
}

#[inline]
#[must_use]
pub fn i32_to_usize(v: i32) -> Option<usize> {
    usize::try_from(v).ok()
}

#[inline]
#[must_use]
pub fn usize_to_i32(v: usize) -> Option<i32> {
    i32::try_from(v).ok()
}

#[inline]
#[must_use]
pub fn usize_to_u32(v: usize) -> Option<u32> {
    u32::try_from(v).ok()
}

#[inline]
#[must_use]
pub fn usize_to_u64(v: usize) -> u64 {
    v as u64
}
