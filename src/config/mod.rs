//! Configuration file parsing

mod recon;

pub use recon::*;

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, de};

use crate::parameters::Parameters;

fn deserialize_uom_opt<'d, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'d>,
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    Option::<String>::deserialize(deserializer)?
        .map(|s| s.parse::<T>())
        .transpose()
        .map_err(de::Error::custom)
}

fn deserialize_uom<'d, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'d>,
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    String::deserialize(deserializer)?
        .parse::<T>()
        .map_err(de::Error::custom)
}

/// Accept any scalar TOML value and keep its textual form.
fn deserialize_parameters<'d, D>(deserializer: D) -> Result<Parameters, D::Error>
where
    D: Deserializer<'d>,
{
    use toml::Value;
    BTreeMap::<String, Value>::deserialize(deserializer)?
        .into_iter()
        .map(|(key, value)| {
            let text = match value {
                Value::String (s) => s,
                Value::Integer(i) => i.to_string(),
                Value::Float  (x) => x.to_string(),
                Value::Boolean(b) => b.to_string(),
                other => return Err(de::Error::custom(
                    format!("parameter '{key}' must be a scalar, found {}", other.type_str()))),
            };
            Ok((key, text))
        })
        .collect()
}
