// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Storage types for tensor lanes.

use half::{bf16, f16};
use std::fmt;
use std::str::FromStr;

/// Numeric type of a single lane.
///
/// Activations are computed in f32. The 16-bit types are storage formats
/// that halve blob memory; `I8` is used for quantised weights and
/// activations when int8 inference is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    #[default]
    F32,
    F16,
    BF16,
    I8,
}

impl DType {
    /// Bytes per lane.
    pub fn size_bytes(self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F16 | DType::BF16 => 2,
            DType::I8 => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DType::F32 => "f32",
            DType::F16 => "f16",
            DType::BF16 => "bf16",
            DType::I8 => "i8",
        }
    }

    /// Writes `value` into `out` (exactly `size_bytes()` long) in this encoding.
    ///
    /// Integers saturate to `[-127, 127]` after rounding to nearest.
    pub fn encode(self, value: f32, out: &mut [u8]) {
        match self {
            DType::F32 => out.copy_from_slice(&value.to_ne_bytes()),
            DType::F16 => out.copy_from_slice(&f16::from_f32(value).to_bits().to_ne_bytes()),
            DType::BF16 => out.copy_from_slice(&bf16::from_f32(value).to_bits().to_ne_bytes()),
            DType::I8 => out[0] = quantize_i8(value) as u8,
        }
    }

    /// Reads one lane in this encoding.
    pub fn decode(self, lane: &[u8]) -> f32 {
        match self {
            DType::F32 => f32::from_ne_bytes([lane[0], lane[1], lane[2], lane[3]]),
            DType::F16 => f16::from_bits(u16::from_ne_bytes([lane[0], lane[1]])).to_f32(),
            DType::BF16 => bf16::from_bits(u16::from_ne_bytes([lane[0], lane[1]])).to_f32(),
            DType::I8 => lane[0] as i8 as f32,
        }
    }
}

fn quantize_i8(value: f32) -> i8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(-127.0, 127.0) as i8
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "f32" | "fp32" => Ok(DType::F32),
            "f16" | "fp16" => Ok(DType::F16),
            "bf16" => Ok(DType::BF16),
            "i8" | "int8" => Ok(DType::I8),
            other => Err(format!("unknown dtype '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_bytes() {
        assert_eq!(DType::F32.size_bytes(), 4);
        assert_eq!(DType::BF16.size_bytes(), 2);
        assert_eq!(DType::I8.size_bytes(), 1);
    }

    #[test]
    fn test_half_encodings_are_exact_for_small_integers() {
        for dtype in [DType::F16, DType::BF16] {
            let mut buf = [0u8; 2];
            dtype.encode(-3.0, &mut buf);
            assert_eq!(dtype.decode(&buf), -3.0);
        }
    }

    #[test]
    fn test_i8_saturates() {
        let mut buf = [0u8; 1];
        DType::I8.encode(300.0, &mut buf);
        assert_eq!(DType::I8.decode(&buf), 127.0);
        DType::I8.encode(-2.6, &mut buf);
        assert_eq!(DType::I8.decode(&buf), -3.0);
        DType::I8.encode(f32::NAN, &mut buf);
        assert_eq!(DType::I8.decode(&buf), 0.0);
    }

    #[test]
    fn test_parse() {
        assert_eq!("fp16".parse::<DType>().unwrap(), DType::F16);
        assert_eq!("BF16".parse::<DType>().unwrap(), DType::BF16);
        assert!("f64".parse::<DType>().is_err());
    }
}
