use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ApiException;

/// Largest value a counter entry can hold. Increments saturate here.
pub const COUNTER_MAX: u32 = u32::MAX;

/// Host-assigned node identity, stable for the lifetime of a graph session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKey {
    Counter,
    CacheText,
}

impl StateKey {
    /// Every key a node can own, in lock order.
    pub const ALL: [StateKey; 2] = [StateKey::Counter, StateKey::CacheText];

    pub fn as_str(self) -> &'static str {
        match self {
            StateKey::Counter => "counter",
            StateKey::CacheText => "cache_text",
        }
    }

    pub fn default_value(self) -> StateValue {
        match self {
            StateKey::Counter => StateValue::Counter(0),
            StateKey::CacheText => StateValue::Text(String::new()),
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StateKey {
    type Err = ApiException;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "counter" => Ok(StateKey::Counter),
            "cache_text" => Ok(StateKey::CacheText),
            other => Err(ApiException::validation(format!(
                "unknown state key '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum StateValue {
    Counter(u32),
    Text(String),
}

impl StateValue {
    pub fn key(&self) -> StateKey {
        match self {
            StateValue::Counter(_) => StateKey::Counter,
            StateValue::Text(_) => StateKey::CacheText,
        }
    }

    pub fn as_counter(&self) -> Option<u32> {
        match self {
            StateValue::Counter(value) => Some(*value),
            StateValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            StateValue::Text(text) => Some(text),
            StateValue::Counter(_) => None,
        }
    }
}

/// Clamps a raw client-supplied counter into the valid domain.
pub fn clamp_counter(raw: i64) -> u32 {
    raw.clamp(0, i64::from(COUNTER_MAX)) as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterMode {
    #[default]
    Fixed,
    Increment,
    Decrement,
    Randomize,
}

impl CounterMode {
    pub fn as_str(self) -> &'static str {
        match self {
            CounterMode::Fixed => "fixed",
            CounterMode::Increment => "increment",
            CounterMode::Decrement => "decrement",
            CounterMode::Randomize => "randomize",
        }
    }
}

impl fmt::Display for CounterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CounterMode {
    type Err = ApiException;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(CounterMode::Fixed),
            "increment" => Ok(CounterMode::Increment),
            "decrement" => Ok(CounterMode::Decrement),
            "randomize" => Ok(CounterMode::Randomize),
            other => Err(ApiException::validation(format!(
                "unknown counter mode '{other}'"
            ))),
        }
    }
}

/// Inclusive range for counters that wrap instead of saturating. Always
/// satisfies `min <= max`, including when deserialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawCounterRange")]
pub struct CounterRange {
    min: u32,
    max: u32,
}

#[derive(Deserialize)]
struct RawCounterRange {
    min: u32,
    max: u32,
}

impl TryFrom<RawCounterRange> for CounterRange {
    type Error = ApiException;

    fn try_from(raw: RawCounterRange) -> Result<Self, Self::Error> {
        CounterRange::new(raw.min, raw.max)
    }
}

impl CounterRange {
    pub fn new(min: u32, max: u32) -> Result<Self, ApiException> {
        if min > max {
            return Err(ApiException::validation(format!(
                "counter range min {min} exceeds max {max}"
            )));
        }
        Ok(Self { min, max })
    }

    pub fn min(self) -> u32 {
        self.min
    }

    pub fn max(self) -> u32 {
        self.max
    }

    pub fn clamp(self, value: u32) -> u32 {
        value.clamp(self.min, self.max)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStateEntry {
    pub node_id: NodeId,
    pub state_key: StateKey,
    pub value: StateValue,
    pub version: u64,
}

impl NodeStateEntry {
    pub fn uninitialized(node_id: NodeId, state_key: StateKey) -> Self {
        Self {
            node_id,
            state_key,
            value: state_key.default_value(),
            version: 0,
        }
    }
}
