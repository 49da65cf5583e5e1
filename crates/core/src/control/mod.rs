//! The runtime mutation surface of a show.
//!
//! Every entity the operator may touch implements [`Controllable`], which
//! exposes a fixed set of parameter names, each backed by one of the typed
//! validators in this module. Entities are addressed by name through a
//! [`Registry`].

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{HustlerError, Result};

/// Capability contract for entities with named, validated runtime parameters.
///
/// Implementations must validate the whole payload before assigning anything,
/// so a rejected call leaves the entity untouched.
pub trait Controllable {
    /// Short type name used in error messages (`"trigger"`, `"noise"`, ...).
    fn kind(&self) -> &'static str;

    /// The parameter names this entity accepts.
    fn parameters(&self) -> &'static [&'static str];

    /// Parses `value` with the validator declared for `name` and assigns it.
    fn set_parameter(&mut self, name: &str, value: &Value) -> Result<()>;
}

/// Error for a parameter name that `entity` does not declare.
pub fn unknown_parameter(entity: &str, parameter: &str) -> HustlerError {
    HustlerError::UnknownParameter {
        entity: entity.to_string(),
        parameter: parameter.to_string(),
    }
}

/// Parses a finite float. Numeric strings are accepted as well.
pub fn parse_f64(parameter: &str, value: &Value) -> Result<f64> {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(HustlerError::invalid_value(
            parameter,
            format!("expected a number, got {value}"),
        )),
    }
}

/// Parses a strictly positive float.
pub fn parse_positive(parameter: &str, value: &Value) -> Result<f64> {
    let v = parse_f64(parameter, value)?;
    if v <= 0.0 {
        return Err(HustlerError::invalid_value(
            parameter,
            format!("must be greater than zero, got {v}"),
        ));
    }
    Ok(v)
}

/// Parses a float and clamps it to the unit interval.
pub fn parse_unit(parameter: &str, value: &Value) -> Result<f64> {
    parse_f64(parameter, value).map(|v| v.clamp(0.0, 1.0))
}

/// Parses a boolean flag. Numbers are truthy when non-zero and `null` is
/// false.
pub fn parse_bool(parameter: &str, value: &Value) -> Result<bool> {
    match value {
        Value::Bool(flag) => Ok(*flag),
        Value::Null => Ok(false),
        Value::Number(number) => Ok(number.as_f64().map(|v| v != 0.0).unwrap_or(false)),
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" | "" => Ok(false),
            _ => Err(HustlerError::invalid_value(
                parameter,
                format!("expected a boolean, got {value}"),
            )),
        },
        _ => Err(HustlerError::invalid_value(
            parameter,
            format!("expected a boolean, got {value}"),
        )),
    }
}

/// Parses a non-empty list of floats.
pub fn parse_float_list(parameter: &str, value: &Value) -> Result<Vec<f64>> {
    let items = value.as_array().ok_or_else(|| {
        HustlerError::invalid_value(parameter, format!("expected a list, got {value}"))
    })?;
    if items.is_empty() {
        return Err(HustlerError::invalid_value(
            parameter,
            "must provide at least one value",
        ));
    }
    items.iter().map(|item| parse_f64(parameter, item)).collect()
}

/// Parses a string constant into one of the variants of `T`.
pub fn parse_choice<T: DeserializeOwned>(parameter: &str, value: &Value) -> Result<T> {
    serde_json::from_value(value.clone())
        .map_err(|err| HustlerError::invalid_value(parameter, err.to_string()))
}

/// Parses a non-empty list of non-empty index lists, each index below `len`.
pub fn parse_index_patterns(parameter: &str, value: &Value, len: usize) -> Result<Vec<Vec<usize>>> {
    let outer = value.as_array().ok_or_else(|| {
        HustlerError::invalid_value(parameter, format!("expected a list of lists, got {value}"))
    })?;
    if outer.is_empty() {
        return Err(HustlerError::invalid_value(
            parameter,
            "must provide at least one pattern",
        ));
    }

    let mut patterns = Vec::with_capacity(outer.len());
    for entry in outer {
        let inner = entry.as_array().ok_or_else(|| {
            HustlerError::invalid_value(parameter, format!("expected a list, got {entry}"))
        })?;
        if inner.is_empty() {
            return Err(HustlerError::invalid_value(parameter, "empty pattern"));
        }
        let mut pattern = Vec::with_capacity(inner.len());
        for index in inner {
            match index.as_u64() {
                Some(i) if (i as usize) < len => pattern.push(i as usize),
                _ => {
                    return Err(HustlerError::invalid_value(
                        parameter,
                        format!("index {index} is out of range 0..{len}"),
                    ))
                }
            }
        }
        patterns.push(pattern);
    }
    Ok(patterns)
}

/// Name directory for the entities of a show.
///
/// Names are immutable once registered. They may not be empty and may not
/// contain `.` or whitespace, since commands address parameters as
/// `entity.parameter`.
#[derive(Debug, Clone)]
pub struct Registry<K> {
    entries: BTreeMap<String, K>,
}

impl<K> Default for Registry<K> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<K> Registry<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `key` under `name`, rejecting duplicates and malformed names.
    pub fn register(&mut self, name: impl Into<String>, key: K) -> Result<()> {
        let name = name.into();
        self.check_available(&name)?;
        self.entries.insert(name, key);
        Ok(())
    }

    /// Fails if `name` is malformed or already taken.
    pub fn check_available(&self, name: &str) -> Result<()> {
        if !is_valid_name(name) {
            return Err(HustlerError::InvalidName(name.to_string()));
        }
        if self.entries.contains_key(name) {
            return Err(HustlerError::DuplicateEntity(name.to_string()));
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&K> {
        self.entries
            .get(name)
            .ok_or_else(|| HustlerError::UnknownEntity(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names in lexical order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('.') && !name.chars().any(char::is_whitespace)
}
