// ── Write requests ──
//
// A closed set of remote write shapes. The variant picks the remote
// operation, the local apply path, and the verification lookup.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Relative tolerance for numeric verification.
const NUMERIC_EPSILON: f64 = 1e-6;

/// A typed field value carried by a write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Flag(bool),
    Number(f64),
    Text(String),
}

impl FieldValue {
    /// Whether a remote value satisfies this write, compared by the
    /// declared type of `self`.
    ///
    /// - `Number` matches a JSON number, or a string that parses as one,
    ///   within a small tolerance (`"68.0"` matches `68`).
    /// - `Text` matches only an identical string.
    /// - `Flag` matches a boolean, or the strings `on`/`off`/`true`/`false`.
    pub fn matches(&self, remote: &Value) -> bool {
        match self {
            Self::Number(expected) => numeric(remote).is_some_and(|actual| {
                (actual - expected).abs() <= NUMERIC_EPSILON * expected.abs().max(1.0)
            }),
            Self::Text(expected) => remote.as_str() == Some(expected.as_str()),
            Self::Flag(expected) => flag(remote) == Some(*expected),
        }
    }

    /// JSON to store locally, following the representation of `existing`.
    ///
    /// Remote documents often carry numbers and flags as strings; a local
    /// write keeps that shape so later reads see a consistent document.
    pub fn to_json_like(&self, existing: Option<&Value>) -> Value {
        let stringly = matches!(existing, Some(Value::String(_)));
        match self {
            Self::Number(n) if stringly => Value::String(n.to_string()),
            Self::Number(n) => serde_json::Number::from_f64(*n).map_or(Value::Null, Value::Number),
            Self::Flag(b) if stringly => {
                let on = if *b { "on" } else { "off" };
                let word = match existing.and_then(Value::as_str) {
                    Some("true" | "false") => b.to_string(),
                    _ => on.to_owned(),
                };
                Value::String(word)
            }
            Self::Flag(b) => Value::Bool(*b),
            Self::Text(s) => Value::String(s.clone()),
        }
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

fn flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "on" | "true" => Some(true),
            "off" | "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flag(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s:?}"),
        }
    }
}

/// Parses command-line input: numbers, then `true`/`false`, then text.
impl FromStr for FieldValue {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(n) = s.parse::<f64>() {
            if n.is_finite() {
                return Ok(Self::Number(n));
            }
        }
        Ok(match s {
            "true" => Self::Flag(true),
            "false" => Self::Flag(false),
            _ => Self::Text(s.to_owned()),
        })
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for FieldValue {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        Self::Flag(b)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// Fields set by one write, in the order they were given.
pub type Fields = IndexMap<String, FieldValue>;

/// Where a write lands.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// The resource root (the whole-system config).
    System,
    /// A named zone.
    Zone(String),
    /// A nested activity within a zone.
    Activity { zone: String, activity: String },
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => f.write_str("system"),
            Self::Zone(zone) => write!(f, "zone {zone}"),
            Self::Activity { zone, activity } => write!(f, "zone {zone} activity {activity}"),
        }
    }
}

/// One remote write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum WriteRequest {
    System {
        fields: Fields,
    },
    Zone {
        zone: String,
        fields: Fields,
    },
    Activity {
        zone: String,
        activity: String,
        fields: Fields,
    },
}

fn collect_fields<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Fields
where
    K: Into<String>,
    V: Into<FieldValue>,
{
    fields
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

impl WriteRequest {
    pub fn system<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<FieldValue>,
    {
        Self::System {
            fields: collect_fields(fields),
        }
    }

    pub fn zone<K, V>(zone: impl Into<String>, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<FieldValue>,
    {
        Self::Zone {
            zone: zone.into(),
            fields: collect_fields(fields),
        }
    }

    pub fn activity<K, V>(
        zone: impl Into<String>,
        activity: impl Into<String>,
        fields: impl IntoIterator<Item = (K, V)>,
    ) -> Self
    where
        K: Into<String>,
        V: Into<FieldValue>,
    {
        Self::Activity {
            zone: zone.into(),
            activity: activity.into(),
            fields: collect_fields(fields),
        }
    }

    pub fn target(&self) -> Target {
        match self {
            Self::System { .. } => Target::System,
            Self::Zone { zone, .. } => Target::Zone(zone.clone()),
            Self::Activity { zone, activity, .. } => Target::Activity {
                zone: zone.clone(),
                activity: activity.clone(),
            },
        }
    }

    pub fn fields(&self) -> &Fields {
        match self {
            Self::System { fields } | Self::Zone { fields, .. } | Self::Activity { fields, .. } => {
                fields
            }
        }
    }
}
