// src/tasks/args.rs

//! Flat task arguments and the serde helpers used to decode them.
//!
//! After interpolation every argument is a string, so typed task argument
//! structs pick the helper matching their field:
//!
//! ```ignore
//! #[derive(Deserialize)]
//! #[serde(rename_all = "camelCase")]
//! struct Args {
//!     #[serde(default, deserialize_with = "de::quoted_bool")]
//!     keep_original: bool,
//!     #[serde(default, deserialize_with = "de::quoted_duration")]
//!     timeout: Duration,
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::TaskError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskArgs(BTreeMap<String, String>);

impl TaskArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// The value of `key`, or `""` if absent.
    pub fn str(&self, key: &str) -> &str {
        self.get(key).unwrap_or("")
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Decode the arguments into a typed struct.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, TaskError> {
        let object: Map<String, Value> = self
            .0
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        serde_json::from_value(Value::Object(object))
            .map_err(|e| TaskError::BadArguments(e.to_string()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TaskArgs {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl fmt::Display for TaskArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {:?}", k, v)?;
        }
        f.write_str("}")
    }
}

/// Parse a duration like `500ms`, `10s`, `5m`, `2h` or `1m30s`.
///
/// A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Result<std::time::Duration, String> {
    use std::time::Duration;

    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        // Find the boundary between digits and suffix.
        let idx = rest
            .chars()
            .position(|c| !c.is_ascii_digit())
            .ok_or_else(|| "duration missing unit suffix".to_string())?;
        let (num_part, tail) = rest.split_at(idx);
        let value: u64 = num_part
            .parse()
            .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;

        let unit_len = tail
            .chars()
            .position(|c| c.is_ascii_digit())
            .unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_len);

        let multiplier: u64 = match unit.trim().to_lowercase().as_str() {
            "ms" => 1,
            "s" => 1_000,
            "m" => 60_000,
            "h" => 3_600_000,
            other => {
                return Err(format!(
                    "unsupported duration unit '{}'; expected ms, s, m, or h",
                    other
                ));
            }
        };
        let too_long = || format!("duration '{}' is too long", s);
        let millis = value.checked_mul(multiplier).ok_or_else(too_long)?;
        total = total
            .checked_add(Duration::from_millis(millis))
            .ok_or_else(too_long)?;
        rest = next;
    }
    Ok(total)
}

/// Field helpers for `#[serde(deserialize_with = ...)]`.
pub mod de {
    use std::str::FromStr;
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, de::Error};

    /// `"true"`, `"1"`, `"t"` and friends; an empty string is `false`.
    pub fn quoted_bool<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        let s = String::deserialize(d)?;
        match s.trim() {
            "" => Ok(false),
            "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
            "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
            other => Err(D::Error::custom(format!("invalid boolean {:?}", other))),
        }
    }

    /// A duration string; an empty string is zero.
    pub fn quoted_duration<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(d)?;
        if s.trim().is_empty() {
            return Ok(Duration::ZERO);
        }
        super::parse_duration(&s).map_err(D::Error::custom)
    }

    /// Any `FromStr` value carried as a string (`"6"`, `"-1"`, ...).
    pub fn from_str<'de, D, T>(d: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let s = String::deserialize(d)?;
        s.trim()
            .parse()
            .map_err(|e| D::Error::custom(format!("invalid value {:?}: {}", s, e)))
    }

    /// Like [`from_str`], with an empty string meaning `None`.
    pub fn opt_from_str<'de, D, T>(d: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let s = String::deserialize(d)?;
        if s.trim().is_empty() {
            return Ok(None);
        }
        s.trim()
            .parse()
            .map(Some)
            .map_err(|e| D::Error::custom(format!("invalid value {:?}: {}", s, e)))
    }

    /// Comma-separated list; blank items are dropped.
    pub fn comma_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
        let s = String::deserialize(d)?;
        Ok(s.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect())
    }
}
