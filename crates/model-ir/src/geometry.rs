// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Parameter schemas with their defaults and output-extent rules.
//!
//! Graph validation and the operator implementations must agree on what a
//! parameter set means, so both read them through these structs.

use crate::{ModelError, ParamDict};

/// Window parameters shared by convolution and deconvolution.
///
/// `kernel_h`, `dilation_h` and `stride_h` default to their `_w`
/// counterparts; `pad_right`/`pad_top`/`pad_bottom` default to `pad_left`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvParams {
    pub num_output: usize,
    pub kernel_w: usize,
    pub kernel_h: usize,
    pub dilation_w: usize,
    pub dilation_h: usize,
    pub stride_w: usize,
    pub stride_h: usize,
    pub pad_left: usize,
    pub pad_right: usize,
    pub pad_top: usize,
    pub pad_bottom: usize,
    pub pad_value: f32,
    pub bias_term: bool,
    /// 0 none, 1 relu, 2 leaky relu, 3 clip, 4 sigmoid, 5 hardswish.
    pub activation_type: i32,
    pub activation_params: Vec<f32>,
    /// Deconvolution only: extra output columns / rows.
    pub output_pad_right: usize,
    pub output_pad_bottom: usize,
}

impl ConvParams {
    pub fn from_params(p: &ParamDict) -> Result<Self, ModelError> {
        let kernel_w = p.usize("kernel_w", 1)?;
        let dilation_w = p.usize("dilation_w", 1)?;
        let stride_w = p.usize("stride_w", 1)?;
        let pad_left = p.usize("pad_left", 0)?;
        let parsed = Self {
            num_output: p.usize("num_output", 0)?,
            kernel_w,
            kernel_h: p.usize("kernel_h", kernel_w)?,
            dilation_w,
            dilation_h: p.usize("dilation_h", dilation_w)?,
            stride_w,
            stride_h: p.usize("stride_h", stride_w)?,
            pad_left,
            pad_right: p.usize("pad_right", pad_left)?,
            pad_top: p.usize("pad_top", pad_left)?,
            pad_bottom: p.usize("pad_bottom", pad_left)?,
            pad_value: p.float("pad_value", 0.0)?,
            bias_term: p.int("bias_term", 0)? != 0,
            activation_type: p.int("activation_type", 0)?,
            activation_params: p.floats("activation_params")?,
            output_pad_right: p.usize("output_pad_right", 0)?,
            output_pad_bottom: p.usize("output_pad_bottom", 0)?,
        };
        parsed.check()?;
        Ok(parsed)
    }

    fn check(&self) -> Result<(), ModelError> {
        let positive = [
            ("num_output", self.num_output),
            ("kernel_w", self.kernel_w),
            ("kernel_h", self.kernel_h),
            ("dilation_w", self.dilation_w),
            ("dilation_h", self.dilation_h),
            ("stride_w", self.stride_w),
            ("stride_h", self.stride_h),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ModelError::InvalidParam {
                    key: key.into(),
                    expected: "a positive integer",
                });
            }
        }
        if !(0..=5).contains(&self.activation_type) {
            return Err(ModelError::InvalidParam {
                key: "activation_type".into(),
                expected: "an activation id in 0..=5",
            });
        }
        Ok(())
    }

    pub fn kernel_extent_w(&self) -> usize {
        self.dilation_w * (self.kernel_w - 1) + 1
    }

    pub fn kernel_extent_h(&self) -> usize {
        self.dilation_h * (self.kernel_h - 1) + 1
    }

    /// Taps per output position and input channel.
    pub fn maxk(&self) -> usize {
        self.kernel_w * self.kernel_h
    }

    pub fn has_padding(&self) -> bool {
        self.pad_left + self.pad_right + self.pad_top + self.pad_bottom > 0
    }

    /// Convolution output `(w, h)`, `None` if the window does not fit.
    pub fn conv_output(&self, w: usize, h: usize) -> Option<(usize, usize)> {
        let padded_w = w + self.pad_left + self.pad_right;
        let padded_h = h + self.pad_top + self.pad_bottom;
        if padded_w < self.kernel_extent_w() || padded_h < self.kernel_extent_h() {
            return None;
        }
        Some((
            (padded_w - self.kernel_extent_w()) / self.stride_w + 1,
            (padded_h - self.kernel_extent_h()) / self.stride_h + 1,
        ))
    }

    /// Full (uncropped) deconvolution extent `(w, h)`.
    pub fn deconv_full(&self, w: usize, h: usize) -> (usize, usize) {
        (
            (w - 1) * self.stride_w + self.kernel_extent_w() + self.output_pad_right,
            (h - 1) * self.stride_h + self.kernel_extent_h() + self.output_pad_bottom,
        )
    }

    /// Deconvolution output after cropping pads, `None` if nothing remains.
    pub fn deconv_output(&self, w: usize, h: usize) -> Option<(usize, usize)> {
        if w == 0 || h == 0 {
            return None;
        }
        let (full_w, full_h) = self.deconv_full(w, h);
        let crop_w = self.pad_left + self.pad_right;
        let crop_h = self.pad_top + self.pad_bottom;
        if full_w <= crop_w || full_h <= crop_h {
            return None;
        }
        Some((full_w - crop_w, full_h - crop_h))
    }
}

/// Border fill rule for [`PadParams`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadMode {
    Constant,
    Replicate,
    Reflect,
}

/// Padding margins. `front`/`behind` pad channels for rank-3 tensors and
/// depth for rank-4 tensors.
#[derive(Debug, Clone, PartialEq)]
pub struct PadParams {
    pub top: usize,
    pub bottom: usize,
    pub left: usize,
    pub right: usize,
    pub front: usize,
    pub behind: usize,
    pub mode: PadMode,
    pub value: f32,
}

impl PadParams {
    pub fn from_params(p: &ParamDict) -> Result<Self, ModelError> {
        let mode = match p.int("type", 0)? {
            0 => PadMode::Constant,
            1 => PadMode::Replicate,
            2 => PadMode::Reflect,
            _ => {
                return Err(ModelError::InvalidParam {
                    key: "type".into(),
                    expected: "0 (constant), 1 (replicate) or 2 (reflect)",
                })
            }
        };
        Ok(Self {
            top: p.usize("top", 0)?,
            bottom: p.usize("bottom", 0)?,
            left: p.usize("left", 0)?,
            right: p.usize("right", 0)?,
            front: p.usize("front", 0)?,
            behind: p.usize("behind", 0)?,
            mode,
            value: p.float("value", 0.0)?,
        })
    }

    /// All margins zero: padding is the identity.
    pub fn is_identity(&self) -> bool {
        self.top + self.bottom + self.left + self.right + self.front + self.behind == 0
    }

    /// Logical output extents for a rank/extents input.
    pub fn output_shape(&self, input: tensor_core::Shape) -> tensor_core::Shape {
        use tensor_core::Shape;
        match input.rank() {
            1 => Shape::d1(input.w() + self.left + self.right),
            2 => Shape::d2(input.w() + self.left + self.right, input.h() + self.top + self.bottom),
            3 => Shape::d3(
                input.w() + self.left + self.right,
                input.h() + self.top + self.bottom,
                input.c() + self.front + self.behind,
            ),
            4 => Shape::d4(
                input.w() + self.left + self.right,
                input.h() + self.top + self.bottom,
                input.d() + self.front + self.behind,
                input.c(),
            ),
            _ => input,
        }
    }
}
