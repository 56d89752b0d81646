//! Instrument configuration value-tree helpers
//!
//! Configurations arrive as a `serde_json::Value` tree and are validated
//! eagerly into typed structs. Every failure names the offending field.

use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Build a typed configuration from a value tree
pub trait FromConfig: Sized {
    fn from_config(config: &Value) -> Result<Self>;
}

/// Linear interpolation between two configurations
pub trait Lerp {
    /// `self` at `pos == 0.0`, `other` at `pos == 1.0`
    fn lerp(&self, other: &Self, pos: f32) -> Self;
}

impl Lerp for f32 {
    fn lerp(&self, other: &Self, pos: f32) -> Self {
        self + (other - self) * pos
    }
}

pub(crate) fn invalid(context: &str, message: impl std::fmt::Display) -> Error {
    Error::InvalidInstrumentConfig(format!("{}: {}", context, message))
}

/// Borrow `config` as an object
pub fn require_object<'a>(config: &'a Value, context: &str) -> Result<&'a Map<String, Value>> {
    config
        .as_object()
        .ok_or_else(|| invalid(context, "root is not an object"))
}

/// Fetch a mandatory child node
pub fn get_node<'a>(config: &'a Value, name: &str, context: &str) -> Result<&'a Value> {
    require_object(config, context)?
        .get(name)
        .ok_or_else(|| invalid(context, format_args!("{} is missing", name)))
}

/// Fetch an optional number, falling back to `default` when absent
pub fn number_or(
    object: &Map<String, Value>,
    name: &str,
    default: f32,
    context: &str,
) -> Result<f32> {
    match object.get(name) {
        None => Ok(default),
        Some(value) => value
            .as_f64()
            .map(|v| v as f32)
            .ok_or_else(|| invalid(context, format_args!("{} is not a number", name))),
    }
}

/// Parse an object key as an unsigned integer no larger than `max`
pub fn parse_key(key: &str, max: u32, what: &str, context: &str) -> Result<u32> {
    let value: u32 = key
        .parse()
        .map_err(|_| invalid(context, format_args!("cannot parse {} {:?}", what, key)))?;
    if value > max {
        return Err(invalid(context, format_args!("{} {} is too large", what, value)));
    }
    Ok(value)
}
