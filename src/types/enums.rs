//! Shared enum types for the feed multiplexer and the Dhan wire protocol.
//!
//! Exchange segment variants use `SCREAMING_SNAKE_CASE` to match the strings
//! expected on the DhanHQ wire, so we suppress the Rust naming convention lint.
#![allow(non_camel_case_types)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FeedError;

// ---------------------------------------------------------------------------
// Connection State
// ---------------------------------------------------------------------------

/// Lifecycle of the single upstream connection.
///
/// ```text
/// Disconnected ──start──▶ Connecting ──handshake──▶ Connected
///       ▲                    │   ▲                     │
///       │                 failure │                 close/error
///       │                    ▼   │ backoff             ▼
///       └──── stop ──── Reconnecting ◀─────────────────┘
/// ```
///
/// Every state moves to `Disconnected` on stop or authentication failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Exchange Segment
// ---------------------------------------------------------------------------

/// Exchange and segment identifier used in Dhan instrument keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExchangeSegment {
    /// Index value (segment code 0).
    IDX_I,
    /// NSE Equity Cash (segment code 1).
    NSE_EQ,
    /// NSE Futures & Options (segment code 2).
    NSE_FNO,
    /// NSE Currency (segment code 3).
    NSE_CURRENCY,
    /// BSE Equity Cash (segment code 4).
    BSE_EQ,
    /// MCX Commodity (segment code 5).
    MCX_COMM,
    /// BSE Currency (segment code 7).
    BSE_CURRENCY,
    /// BSE Futures & Options (segment code 8).
    BSE_FNO,
}

impl ExchangeSegment {
    /// Returns the numeric segment code used in binary feed packets.
    pub fn segment_code(self) -> u8 {
        match self {
            Self::IDX_I => 0,
            Self::NSE_EQ => 1,
            Self::NSE_FNO => 2,
            Self::NSE_CURRENCY => 3,
            Self::BSE_EQ => 4,
            Self::MCX_COMM => 5,
            Self::BSE_CURRENCY => 7,
            Self::BSE_FNO => 8,
        }
    }

    /// Construct from a numeric segment code (as found in binary feed packets).
    pub fn from_segment_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::IDX_I),
            1 => Some(Self::NSE_EQ),
            2 => Some(Self::NSE_FNO),
            3 => Some(Self::NSE_CURRENCY),
            4 => Some(Self::BSE_EQ),
            5 => Some(Self::MCX_COMM),
            7 => Some(Self::BSE_CURRENCY),
            8 => Some(Self::BSE_FNO),
            _ => None,
        }
    }

    /// The wire name, e.g. `"NSE_EQ"`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IDX_I => "IDX_I",
            Self::NSE_EQ => "NSE_EQ",
            Self::NSE_FNO => "NSE_FNO",
            Self::NSE_CURRENCY => "NSE_CURRENCY",
            Self::BSE_EQ => "BSE_EQ",
            Self::MCX_COMM => "MCX_COMM",
            Self::BSE_CURRENCY => "BSE_CURRENCY",
            Self::BSE_FNO => "BSE_FNO",
        }
    }
}

impl fmt::Display for ExchangeSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeSegment {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IDX_I" => Ok(Self::IDX_I),
            "NSE_EQ" => Ok(Self::NSE_EQ),
            "NSE_FNO" => Ok(Self::NSE_FNO),
            "NSE_CURRENCY" => Ok(Self::NSE_CURRENCY),
            "BSE_EQ" => Ok(Self::BSE_EQ),
            "MCX_COMM" => Ok(Self::MCX_COMM),
            "BSE_CURRENCY" => Ok(Self::BSE_CURRENCY),
            "BSE_FNO" => Ok(Self::BSE_FNO),
            other => Err(FeedError::InvalidArgument(format!(
                "unknown exchange segment '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Feed Mode
// ---------------------------------------------------------------------------

/// Data mode requested from the Dhan feed for every subscribed instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedMode {
    /// LTP + last trade time.
    #[default]
    Ticker,
    /// LTP + OHLC + volume + buy/sell quantities.
    Quote,
    /// Quote + OI + 5-level market depth.
    Full,
}

impl FeedMode {
    /// Request code that subscribes instruments in this mode.
    pub fn subscribe_code(self) -> FeedRequestCode {
        match self {
            Self::Ticker => FeedRequestCode::SubscribeTicker,
            Self::Quote => FeedRequestCode::SubscribeQuote,
            Self::Full => FeedRequestCode::SubscribeFull,
        }
    }

    /// Request code that unsubscribes instruments in this mode.
    pub fn unsubscribe_code(self) -> FeedRequestCode {
        match self {
            Self::Ticker => FeedRequestCode::UnsubscribeTicker,
            Self::Quote => FeedRequestCode::UnsubscribeQuote,
            Self::Full => FeedRequestCode::UnsubscribeFull,
        }
    }
}

impl FromStr for FeedMode {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ticker" => Ok(Self::Ticker),
            "quote" => Ok(Self::Quote),
            "full" => Ok(Self::Full),
            other => Err(FeedError::Config(format!("unknown feed mode '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Feed Request Code (WebSocket market feed)
// ---------------------------------------------------------------------------

/// Request codes sent over the Dhan market feed WebSocket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FeedRequestCode {
    /// Disconnect from feed.
    Disconnect = 12,
    /// Subscribe to Ticker packets.
    SubscribeTicker = 15,
    /// Unsubscribe from Ticker packets.
    UnsubscribeTicker = 16,
    /// Subscribe to Quote packets.
    SubscribeQuote = 17,
    /// Unsubscribe from Quote packets.
    UnsubscribeQuote = 18,
    /// Subscribe to Full packets.
    SubscribeFull = 21,
    /// Unsubscribe from Full packets.
    UnsubscribeFull = 22,
}

impl Serialize for FeedRequestCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

// ---------------------------------------------------------------------------
// Feed Response Code (WebSocket market feed)
// ---------------------------------------------------------------------------

/// Response codes received in binary market feed packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FeedResponseCode {
    /// Index packet.
    Index = 1,
    /// Ticker packet (LTP + LTT).
    Ticker = 2,
    /// Quote packet (LTP, qty, ATP, volume, OHLC, etc.).
    Quote = 4,
    /// Open Interest packet.
    OI = 5,
    /// Previous close packet.
    PrevClose = 6,
    /// Market status packet.
    MarketStatus = 7,
    /// Full packet (quote + depth + OI).
    Full = 8,
    /// Feed disconnect packet.
    Disconnect = 50,
}

impl FeedResponseCode {
    /// Parse a response code from the first byte of a binary packet header.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Index),
            2 => Some(Self::Ticker),
            4 => Some(Self::Quote),
            5 => Some(Self::OI),
            6 => Some(Self::PrevClose),
            7 => Some(Self::MarketStatus),
            8 => Some(Self::Full),
            50 => Some(Self::Disconnect),
            _ => None,
        }
    }
}
