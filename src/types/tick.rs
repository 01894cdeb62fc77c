//! Instrument keys and the tick value fanned out to consumers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::FeedError;

// ---------------------------------------------------------------------------
// SymbolKey
// ---------------------------------------------------------------------------

/// Separator between the segment and the symbol in a [`SymbolKey`].
pub const KEY_SEPARATOR: char = '|';

/// Provider-qualified instrument identifier, e.g. `NSE_EQ|RELIANCE`.
///
/// Serialized as a plain string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SymbolKey(String);

impl SymbolKey {
    /// Build a key from a segment and a symbol.
    pub fn new(segment: impl AsRef<str>, symbol: impl AsRef<str>) -> Self {
        Self(format!("{}{KEY_SEPARATOR}{}", segment.as_ref(), symbol.as_ref()))
    }

    /// Parse a key, qualifying a bare symbol with `default_segment`.
    pub fn qualify(raw: &str, default_segment: &str) -> Result<Self, FeedError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(FeedError::InvalidArgument("empty symbol".into()));
        }
        if raw.contains(KEY_SEPARATOR) {
            raw.parse()
        } else {
            Ok(Self::new(default_segment, raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The segment part, if the key is qualified.
    pub fn segment(&self) -> Option<&str> {
        self.0.split_once(KEY_SEPARATOR).map(|(segment, _)| segment)
    }

    /// The symbol part (the whole key when unqualified).
    pub fn symbol(&self) -> &str {
        self.0
            .split_once(KEY_SEPARATOR)
            .map_or(self.0.as_str(), |(_, symbol)| symbol)
    }
}

impl fmt::Display for SymbolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SymbolKey {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(KEY_SEPARATOR) {
            Some((segment, symbol)) if !segment.is_empty() && !symbol.is_empty() => {
                Ok(Self(s.to_owned()))
            }
            _ => Err(FeedError::InvalidArgument(format!(
                "symbol key '{s}' is not of the form SEGMENT{KEY_SEPARATOR}SYMBOL"
            ))),
        }
    }
}

impl From<&str> for SymbolKey {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for SymbolKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ---------------------------------------------------------------------------
// Tick
// ---------------------------------------------------------------------------

/// One price/volume update for an instrument.
///
/// On the JSON wire the timestamp is epoch milliseconds (`timestamp`, or `ts`).
/// Any additional provider fields are preserved in [`raw`](Self::raw).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tick {
    /// Instrument this tick belongs to.
    pub symbol_key: SymbolKey,
    /// Last traded price.
    pub price: f64,
    /// Traded volume, when the provider reports it.
    #[serde(default)]
    pub volume: i64,
    /// Exchange time of the update.
    #[serde(alias = "ts", with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    /// Remaining provider fields.
    #[serde(flatten)]
    pub raw: Map<String, Value>,
}

impl Tick {
    /// Create a tick with no extra fields.
    pub fn new(symbol_key: SymbolKey, price: f64, volume: i64, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol_key,
            price,
            volume,
            timestamp,
            raw: Map::new(),
        }
    }

    /// Attach an extra provider field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.raw.insert(name.into(), value.into());
        self
    }
}
