//! String-keyed module parameters and typed access to them.
//!
//! Configuration files may give parameter values as any TOML scalar; they are
//! stored as text and interpreted by the module that owns them.

use std::collections::BTreeMap;
use std::str::FromStr;

use thiserror::Error;

pub type Parameters = BTreeMap<String, String>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    #[error("missing parameter '{0}'")]
    Missing(String),

    #[error("parameter '{key}' = '{value}' is not a valid {expected}")]
    Malformed { key: String, value: String, expected: &'static str },
}

type ParamResult<T> = Result<T, ParameterError>;

fn lookup<'p>(params: &'p Parameters, key: &str) -> ParamResult<&'p str> {
    params.get(key)
        .map(|s| s.trim())
        .ok_or_else(|| ParameterError::Missing(key.into()))
}

fn parse_as<T: FromStr>(key: &str, value: &str, expected: &'static str) -> ParamResult<T> {
    value.parse().map_err(|_| ParameterError::Malformed { key: key.into(), value: value.into(), expected })
}

pub fn get_string_parameter(params: &Parameters, key: &str) -> ParamResult<String> {
    lookup(params, key).map(String::from)
}

pub fn get_float_parameter(params: &Parameters, key: &str) -> ParamResult<f32> {
    parse_as(key, lookup(params, key)?, "number")
}

pub fn get_int_parameter(params: &Parameters, key: &str) -> ParamResult<i64> {
    parse_as(key, lookup(params, key)?, "integer")
}

pub fn get_bool_parameter(params: &Parameters, key: &str) -> ParamResult<bool> {
    match lookup(params, key)?.to_lowercase().as_str() {
        "true"  | "yes" | "on"  | "1" => Ok(true),
        "false" | "no"  | "off" | "0" => Ok(false),
        other => Err(ParameterError::Malformed { key: key.into(), value: other.into(), expected: "boolean" }),
    }
}

/// Parse any `FromStr` type, typically a module's own option enum.
pub fn get_enum_parameter<T: FromStr>(params: &Parameters, key: &str) -> ParamResult<T> {
    parse_as(key, lookup(params, key)?, "option")
}

/// Like the getter it is given, but a missing key yields `default`. A value
/// that is present but malformed is still an error.
pub fn or_default<T>(result: ParamResult<T>, default: T) -> ParamResult<T> {
    match result {
        Err(ParameterError::Missing(_)) => Ok(default),
        other => other,
    }
}
