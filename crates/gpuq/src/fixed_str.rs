use std::ffi::c_char;
use std::ffi::CStr;
use std::fmt;

use serde::Serialize;
use serde::Serializer;

/// NUL-terminated string stored inline in `N` bytes.
///
/// Holds at most `N - 1` bytes of text. Longer input is cut at the last
/// UTF-8 character boundary that fits.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixedStr<const N: usize> {
    bytes: [u8; N],
}

impl<const N: usize> FixedStr<N> {
    pub const CAPACITY: usize = N;

    pub const fn new() -> Self {
        Self { bytes: [0; N] }
    }

    /// Builds a string from `value`, truncating if needed.
    pub fn from_str_truncate(value: &str) -> Self {
        let mut fixed = Self::new();
        fixed.set(value);
        fixed
    }

    /// Replaces the content with `value`, truncating if needed.
    ///
    /// Returns `true` when `value` had to be truncated.
    pub fn set(&mut self, value: &str) -> bool {
        let max = N.saturating_sub(1);
        let mut len = value.len().min(max);
        while !value.is_char_boundary(len) {
            len -= 1;
        }

        self.bytes = [0; N];
        self.bytes[..len].copy_from_slice(&value.as_bytes()[..len]);
        len < value.len()
    }

    /// Copies a NUL-terminated buffer filled by a vendor library.
    ///
    /// Reading stops at the first NUL or at the end of `raw`, whichever comes
    /// first, so an unterminated buffer is never overrun. Invalid UTF-8 is
    /// replaced lossily.
    pub fn set_from_c_buf(&mut self, raw: &[c_char]) -> bool {
        // c_char is i8 or u8 depending on the target; both are one byte wide
        let raw: Vec<u8> = raw
            .iter()
            .take_while(|&&c| c != 0)
            .map(|&c| c as u8)
            .collect();
        self.set(&String::from_utf8_lossy(&raw))
    }

    pub fn as_str(&self) -> &str {
        let len = self.len();
        // only ever written from &str cut at a char boundary
        std::str::from_utf8(&self.bytes[..len]).unwrap_or_default()
    }

    pub fn as_c_str(&self) -> &CStr {
        let len = self.len();
        CStr::from_bytes_with_nul(&self.bytes[..=len]).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.bytes.iter().position(|&b| b == 0).unwrap_or(N)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The raw storage, always NUL-terminated.
    pub fn as_bytes_with_nul(&self) -> &[u8; N] {
        &self.bytes
    }
}

impl<const N: usize> Default for FixedStr<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> fmt::Display for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<const N: usize> fmt::Debug for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl<const N: usize> PartialEq<str> for FixedStr<N> {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl<const N: usize> PartialEq<&str> for FixedStr<N> {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl<const N: usize> Serialize for FixedStr<N> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}
