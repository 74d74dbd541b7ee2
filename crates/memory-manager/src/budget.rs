// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Pool ceilings and their human-readable form.
//!
//! A [`MemoryBudget`] caps the number of live bytes a
//! [`PoolAllocator`](crate::PoolAllocator) may hand out. Embedded targets
//! typically size it from a config string such as `"64M"`.

use crate::MemoryError;
use std::fmt;

const KB: usize = 1024;
const MB: usize = 1024 * KB;
const GB: usize = 1024 * MB;

/// A hard ceiling on live allocator bytes.
///
/// # Parsing
/// Case-insensitive, binary multiples:
/// - `"512M"` / `"512MB"` → 512 × 1024² bytes
/// - `"1G"` / `"1GB"` → 1024³ bytes
/// - `"64K"` / `"64KB"` → 64 × 1024 bytes
/// - `"4096"` / `"4096B"` → raw byte count
///
/// # Examples
/// ```
/// use memory_manager::MemoryBudget;
///
/// let b = MemoryBudget::parse("64M").unwrap();
/// assert_eq!(b.as_bytes(), 64 * 1024 * 1024);
/// assert!(MemoryBudget::unlimited().is_unlimited());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MemoryBudget {
    bytes: usize,
}

impl MemoryBudget {
    /// A budget that never rejects a request.
    pub const fn unlimited() -> Self {
        Self { bytes: usize::MAX }
    }

    pub const fn from_bytes(bytes: usize) -> Self {
        Self { bytes }
    }

    pub const fn from_kb(kb: usize) -> Self {
        Self { bytes: kb * KB }
    }

    pub const fn from_mb(mb: usize) -> Self {
        Self { bytes: mb * MB }
    }

    pub fn as_bytes(&self) -> usize {
        self.bytes
    }

    pub fn is_unlimited(&self) -> bool {
        self.bytes == usize::MAX
    }

    /// Returns `true` if `live + request` stays within the ceiling.
    pub fn admits(&self, live: usize, request: usize) -> bool {
        live.checked_add(request).is_some_and(|total| total <= self.bytes)
    }

    /// Parses a human-readable budget string.
    ///
    /// `"unlimited"` (any case) yields [`MemoryBudget::unlimited`].
    ///
    /// # Errors
    /// [`MemoryError::InvalidBudget`] for malformed, zero or overflowing values.
    pub fn parse(s: &str) -> Result<Self, MemoryError> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("unlimited") {
            return Ok(Self::unlimited());
        }

        let upper = trimmed.to_ascii_uppercase();
        let body = upper.strip_suffix('B').unwrap_or(&upper);
        let (digits, multiplier) = match body.chars().last() {
            Some('G') => (&body[..body.len() - 1], GB),
            Some('M') => (&body[..body.len() - 1], MB),
            Some('K') => (&body[..body.len() - 1], KB),
            _ => (body, 1),
        };

        let invalid = || MemoryError::InvalidBudget(trimmed.to_string());
        let value: usize = digits.trim().parse().map_err(|_| invalid())?;
        let bytes = value.checked_mul(multiplier).ok_or_else(invalid)?;
        if bytes == 0 {
            return Err(invalid());
        }
        Ok(Self { bytes })
    }
}

impl Default for MemoryBudget {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl fmt::Display for MemoryBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bytes {
            usize::MAX => write!(f, "unlimited"),
            b if b >= GB && b % GB == 0 => write!(f, "{} GB", b / GB),
            b if b >= MB && b % MB == 0 => write!(f, "{} MB", b / MB),
            b if b >= KB && b % KB == 0 => write!(f, "{} KB", b / KB),
            b => write!(f, "{b} B"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_suffixes() {
        assert_eq!(MemoryBudget::parse("512M").unwrap().as_bytes(), 512 * MB);
        assert_eq!(MemoryBudget::parse("512mb").unwrap().as_bytes(), 512 * MB);
        assert_eq!(MemoryBudget::parse("2g").unwrap().as_bytes(), 2 * GB);
        assert_eq!(MemoryBudget::parse("64K").unwrap().as_bytes(), 64 * KB);
        assert_eq!(MemoryBudget::parse("4096").unwrap().as_bytes(), 4096);
        assert_eq!(MemoryBudget::parse("100B").unwrap().as_bytes(), 100);
        assert_eq!(MemoryBudget::parse("  8M ").unwrap().as_bytes(), 8 * MB);
    }

    #[test]
    fn test_parse_unlimited() {
        assert!(MemoryBudget::parse("Unlimited").unwrap().is_unlimited());
    }

    #[test]
    fn test_parse_invalid() {
        for bad in ["", "abc", "0M", "12Q", "99999999999999999999G"] {
            assert!(
                matches!(MemoryBudget::parse(bad), Err(MemoryError::InvalidBudget(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_admits() {
        let b = MemoryBudget::from_bytes(1000);
        assert!(b.admits(400, 600));
        assert!(!b.admits(401, 600));
        assert!(MemoryBudget::unlimited().admits(usize::MAX - 1, 1));
        assert!(!MemoryBudget::unlimited().admits(usize::MAX, 1));
    }

    #[test]
    fn test_display() {
        assert_eq!(MemoryBudget::from_mb(2048).to_string(), "2 GB");
        assert_eq!(MemoryBudget::from_mb(64).to_string(), "64 MB");
        assert_eq!(MemoryBudget::from_kb(3).to_string(), "3 KB");
        assert_eq!(MemoryBudget::from_bytes(100).to_string(), "100 B");
        assert_eq!(MemoryBudget::unlimited().to_string(), "unlimited");
    }

    #[test]
    fn test_serde_roundtrip() {
        let b = MemoryBudget::from_mb(256);
        let json = serde_json::to_string(&b).unwrap();
        let back: MemoryBudget = serde_json::from_str(&json).unwrap();
        assert_eq!(b, back);
    }
}
