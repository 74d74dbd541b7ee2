// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Typed layer parameters.
//!
//! Parameters arrive as a JSON object per layer. Values are integers,
//! floats, or homogeneous arrays of either; a missing key means "use the
//! operator's default".

use crate::ModelError;
use std::collections::BTreeMap;

/// A single parameter value.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i32),
    Float(f32),
    IntArray(Vec<i32>),
    FloatArray(Vec<f32>),
}

/// Parameters of one layer, keyed by name.
///
/// # Examples
/// ```
/// use model_ir::ParamDict;
///
/// let params: ParamDict = serde_json::from_str(r#"{ "num_output": 16, "slope": 0.1 }"#).unwrap();
/// assert_eq!(params.int("num_output", 0).unwrap(), 16);
/// assert_eq!(params.int("kernel_w", 3).unwrap(), 3);
/// assert!((params.float("slope", 0.0).unwrap() - 0.1).abs() < 1e-6);
/// ```
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ParamDict {
    values: BTreeMap<String, ParamValue>,
}

impl ParamDict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: ParamValue) -> Self {
        self.values.insert(key.to_string(), value);
        self
    }

    pub fn set(&mut self, key: &str, value: ParamValue) {
        self.values.insert(key.to_string(), value);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Integer parameter, or `default` when absent.
    ///
    /// # Errors
    /// [`ModelError::InvalidParam`] if the value is not an integer.
    pub fn int(&self, key: &str, default: i32) -> Result<i32, ModelError> {
        match self.values.get(key) {
            None => Ok(default),
            Some(ParamValue::Int(v)) => Ok(*v),
            Some(_) => Err(invalid(key, "an integer")),
        }
    }

    /// Float parameter, or `default` when absent. Integers are widened.
    pub fn float(&self, key: &str, default: f32) -> Result<f32, ModelError> {
        match self.values.get(key) {
            None => Ok(default),
            Some(ParamValue::Float(v)) => Ok(*v),
            Some(ParamValue::Int(v)) => Ok(*v as f32),
            Some(_) => Err(invalid(key, "a number")),
        }
    }

    /// Non-negative integer parameter as `usize`.
    pub fn usize(&self, key: &str, default: usize) -> Result<usize, ModelError> {
        let v = self.int(key, default as i32)?;
        usize::try_from(v).map_err(|_| invalid(key, "a non-negative integer"))
    }

    /// Float array parameter, empty when absent. Scalars and integer arrays
    /// are accepted and widened.
    pub fn floats(&self, key: &str) -> Result<Vec<f32>, ModelError> {
        match self.values.get(key) {
            None => Ok(Vec::new()),
            Some(ParamValue::FloatArray(v)) => Ok(v.clone()),
            Some(ParamValue::IntArray(v)) => Ok(v.iter().map(|&x| x as f32).collect()),
            Some(ParamValue::Float(v)) => Ok(vec![*v]),
            Some(ParamValue::Int(v)) => Ok(vec![*v as f32]),
        }
    }

    /// Integer array parameter, empty when absent.
    pub fn ints(&self, key: &str) -> Result<Vec<i32>, ModelError> {
        match self.values.get(key) {
            None => Ok(Vec::new()),
            Some(ParamValue::IntArray(v)) => Ok(v.clone()),
            Some(ParamValue::Int(v)) => Ok(vec![*v]),
            Some(_) => Err(invalid(key, "an integer array")),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

fn invalid(key: &str, expected: &'static str) -> ModelError {
    ModelError::InvalidParam {
        key: key.to_string(),
        expected,
    }
}
