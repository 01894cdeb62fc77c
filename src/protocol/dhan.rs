#![allow(missing_docs)]
//! DhanHQ v2 live market feed protocol.
//!
//! Connects to `wss://api-feed.dhan.co` with credentials in the query string
//! and receives market data as **binary packets**:
//!
//! - **Ticker** — LTP + last trade time (8 byte payload)
//! - **Quote** — LTP + OHLC + volume + buy/sell quantities (42 bytes)
//! - **Full** — Quote + OI + 5-level market depth (154 bytes)
//!
//! Every packet starts with an 8-byte header (response code, message length,
//! exchange segment code, security id). Ticker, Quote and Full packets are
//! turned into [`Tick`]s keyed `SEGMENT|securityId`; the other packet types are
//! ignored. A frame may carry several packets back to back.
//!
//! Subscriptions are JSON requests of at most 100 instruments each.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::constants::{disconnect_codes, limits};
use crate::credentials::Credentials;
use crate::error::{FeedError, Result};
use crate::protocol::{FeedProtocol, Inbound};
use crate::types::enums::{ExchangeSegment, FeedMode, FeedRequestCode, FeedResponseCode};
use crate::types::tick::{SymbolKey, Tick};

const HEADER_LEN: usize = 8;

// ---------------------------------------------------------------------------
// Subscribe / Unsubscribe request types
// ---------------------------------------------------------------------------

/// An instrument entry in a subscribe request.
#[derive(Debug, Clone, Serialize)]
#[allow(non_snake_case)]
struct Instrument<'a> {
    ExchangeSegment: &'a str,
    SecurityId: &'a str,
}

/// JSON subscribe/unsubscribe request sent over the WebSocket.
#[derive(Debug, Serialize)]
#[allow(non_snake_case)]
struct FeedSubscribeRequest<'a> {
    RequestCode: FeedRequestCode,
    InstrumentCount: usize,
    InstrumentList: Vec<Instrument<'a>>,
}

/// JSON disconnect request.
#[derive(Debug, Serialize)]
#[allow(non_snake_case)]
struct FeedDisconnectRequest {
    RequestCode: FeedRequestCode,
}

// ---------------------------------------------------------------------------
// Parsed binary packets
// ---------------------------------------------------------------------------

/// Header parsed from the first 8 bytes of every binary market feed packet.
#[derive(Debug, Clone, Copy)]
pub struct PacketHeader {
    pub response_code: FeedResponseCode,
    /// Total message length in bytes (including header).
    pub message_length: u16,
    pub exchange_segment: Option<ExchangeSegment>,
    /// Raw exchange segment byte (always available even if enum variant unknown).
    pub exchange_segment_raw: u8,
    pub security_id: u32,
}

impl PacketHeader {
    /// Key of the instrument this packet belongs to.
    pub fn symbol_key(&self) -> SymbolKey {
        let security_id = self.security_id.to_string();
        match self.exchange_segment {
            Some(segment) => SymbolKey::new(segment.as_str(), security_id),
            None => SymbolKey::new(self.exchange_segment_raw.to_string(), security_id),
        }
    }
}

/// A single level of market depth from a Full packet.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepthLevel {
    pub bid_qty: i32,
    pub ask_qty: i32,
    pub bid_orders: i16,
    pub ask_orders: i16,
    pub bid_price: f32,
    pub ask_price: f32,
}

/// Quote fields shared by Quote and Full packets.
#[derive(Debug, Clone, Copy)]
struct QuoteFields {
    ltp: f32,
    last_qty: i16,
    ltt: i32,
    atp: f32,
    volume: i32,
    total_sell_qty: i32,
    total_buy_qty: i32,
}

/// Little-endian cursor over a packet payload whose length was checked.
struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.offset..self.offset + N]);
        self.offset += N;
        out
    }

    fn u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    fn u16(&mut self) -> u16 {
        u16::from_le_bytes(self.take())
    }

    fn i16(&mut self) -> i16 {
        i16::from_le_bytes(self.take())
    }

    fn i32(&mut self) -> i32 {
        i32::from_le_bytes(self.take())
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    fn f32(&mut self) -> f32 {
        f32::from_le_bytes(self.take())
    }

    fn quote(&mut self) -> QuoteFields {
        QuoteFields {
            ltp: self.f32(),
            last_qty: self.i16(),
            ltt: self.i32(),
            atp: self.f32(),
            volume: self.i32(),
            total_sell_qty: self.i32(),
            total_buy_qty: self.i32(),
        }
    }
}

fn require(payload: &[u8], len: usize, what: &str) -> Result<()> {
    if payload.len() < len {
        return Err(FeedError::MalformedFrame(format!(
            "{what} packet payload too short: {} bytes (need ≥ {len})",
            payload.len()
        )));
    }
    Ok(())
}

/// Parse the 8-byte packet header.
pub fn parse_header(data: &[u8]) -> Result<PacketHeader> {
    if data.len() < HEADER_LEN {
        return Err(FeedError::MalformedFrame(format!(
            "packet too short for header: {} bytes",
            data.len()
        )));
    }
    let mut r = Reader::new(data);

    let response_code_byte = r.u8();
    let response_code = FeedResponseCode::from_byte(response_code_byte).ok_or_else(|| {
        FeedError::MalformedFrame(format!("unknown feed response code: {response_code_byte}"))
    })?;
    let message_length = r.u16();
    let exchange_segment_raw = r.u8();
    let exchange_segment = ExchangeSegment::from_segment_code(exchange_segment_raw);
    let security_id = r.u32();

    Ok(PacketHeader {
        response_code,
        message_length,
        exchange_segment,
        exchange_segment_raw,
        security_id,
    })
}

fn ltt_to_datetime(ltt: i32) -> DateTime<Utc> {
    DateTime::from_timestamp(i64::from(ltt), 0).unwrap_or_else(Utc::now)
}

fn quote_tick(header: &PacketHeader, q: QuoteFields) -> Tick {
    Tick::new(
        header.symbol_key(),
        f64::from(q.ltp),
        i64::from(q.volume),
        ltt_to_datetime(q.ltt),
    )
    .with_field("lastQty", q.last_qty)
    .with_field("atp", q.atp)
    .with_field("totalSellQty", q.total_sell_qty)
    .with_field("totalBuyQty", q.total_buy_qty)
}

/// Outcome of parsing one packet.
enum Packet {
    Tick(Tick),
    Skip,
    Disconnect(i16),
}

/// Parse one complete binary packet.
fn parse_packet(data: &[u8]) -> Result<Packet> {
    let header = parse_header(data)?;
    let payload = &data[HEADER_LEN..];

    match header.response_code {
        FeedResponseCode::Ticker => {
            require(payload, 8, "ticker")?;
            let mut r = Reader::new(payload);
            let ltp = r.f32();
            let ltt = r.i32();
            Ok(Packet::Tick(Tick::new(
                header.symbol_key(),
                f64::from(ltp),
                0,
                ltt_to_datetime(ltt),
            )))
        }

        FeedResponseCode::Quote => {
            require(payload, 42, "quote")?;
            let mut r = Reader::new(payload);
            let q = r.quote();
            let open = r.f32();
            let close = r.f32();
            let high = r.f32();
            let low = r.f32();
            Ok(Packet::Tick(
                quote_tick(&header, q)
                    .with_field("open", open)
                    .with_field("close", close)
                    .with_field("high", high)
                    .with_field("low", low),
            ))
        }

        FeedResponseCode::Full => {
            require(payload, 154, "full")?;
            let mut r = Reader::new(payload);
            let q = r.quote();
            let oi = r.i32();
            let oi_day_high = r.i32();
            let oi_day_low = r.i32();
            let open = r.f32();
            let close = r.f32();
            let high = r.f32();
            let low = r.f32();

            // 5 depth levels × 20 bytes each
            let mut depth = [DepthLevel::default(); 5];
            for level in &mut depth {
                level.bid_qty = r.i32();
                level.ask_qty = r.i32();
                level.bid_orders = r.i16();
                level.ask_orders = r.i16();
                level.bid_price = r.f32();
                level.ask_price = r.f32();
            }

            Ok(Packet::Tick(
                quote_tick(&header, q)
                    .with_field("oi", oi)
                    .with_field("oiDayHigh", oi_day_high)
                    .with_field("oiDayLow", oi_day_low)
                    .with_field("open", open)
                    .with_field("close", close)
                    .with_field("high", high)
                    .with_field("low", low)
                    .with_field("depth", json!(depth)),
            ))
        }

        FeedResponseCode::Disconnect => {
            require(payload, 2, "disconnect")?;
            Ok(Packet::Disconnect(Reader::new(payload).i16()))
        }

        FeedResponseCode::PrevClose
        | FeedResponseCode::OI
        | FeedResponseCode::MarketStatus
        | FeedResponseCode::Index => Ok(Packet::Skip),
    }
}

/// Split a frame into packets using the header's message length.
///
/// A length that is zero, shorter than the header or longer than the rest of
/// the frame means "the rest of the frame".
fn split_packets(frame: &[u8]) -> Vec<&[u8]> {
    let mut packets = Vec::new();
    let mut rest = frame;
    while !rest.is_empty() {
        // A fragment shorter than a header is left for the parser to reject.
        let len = if rest.len() < HEADER_LEN {
            rest.len()
        } else {
            match usize::from(u16::from_le_bytes([rest[1], rest[2]])) {
                len if len < HEADER_LEN || len > rest.len() => rest.len(),
                len => len,
            }
        };
        let (packet, tail) = rest.split_at(len);
        packets.push(packet);
        rest = tail;
    }
    packets
}

// ---------------------------------------------------------------------------
// Protocol
// ---------------------------------------------------------------------------

/// The DhanHQ v2 market feed protocol in a fixed [`FeedMode`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DhanProtocol {
    mode: FeedMode,
}

impl DhanProtocol {
    pub fn new(mode: FeedMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> FeedMode {
        self.mode
    }

    fn requests(&self, code: FeedRequestCode, keys: &[SymbolKey]) -> Result<Vec<Message>> {
        let instruments: Vec<Instrument<'_>> = keys
            .iter()
            .filter_map(|key| match (key.segment(), key.symbol()) {
                (Some(segment), symbol) if !symbol.is_empty() => Some(Instrument {
                    ExchangeSegment: segment,
                    SecurityId: symbol,
                }),
                _ => {
                    tracing::warn!(symbol = %key, "Skipping key without an exchange segment");
                    None
                }
            })
            .collect();

        if instruments.len() > limits::MAX_INSTRUMENTS_PER_CONNECTION {
            tracing::warn!(
                count = instruments.len(),
                limit = limits::MAX_INSTRUMENTS_PER_CONNECTION,
                "Batch exceeds the per-connection instrument limit"
            );
        }

        instruments
            .chunks(limits::MAX_INSTRUMENTS_PER_SUBSCRIBE)
            .map(|chunk| {
                let req = FeedSubscribeRequest {
                    RequestCode: code,
                    InstrumentCount: chunk.len(),
                    InstrumentList: chunk.to_vec(),
                };
                Ok(Message::Text(serde_json::to_string(&req)?.into()))
            })
            .collect()
    }

    fn decode_binary(&self, frame: &[u8]) -> Result<Inbound> {
        let mut ticks = Vec::new();
        let mut malformed = None;
        for packet in split_packets(frame) {
            let parsed = match parse_packet(packet) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::warn!(error = %e, len = packet.len(), "Skipping malformed packet");
                    malformed.get_or_insert(e);
                    continue;
                }
            };
            match parsed {
                Packet::Tick(tick) => ticks.push(tick),
                Packet::Skip => {}
                Packet::Disconnect(code) if disconnect_codes::is_authentication(code) => {
                    return Ok(Inbound::Rejected(format!("feed disconnect code {code}")));
                }
                Packet::Disconnect(code) => {
                    return Ok(Inbound::Disconnected(format!("feed disconnect code {code}")));
                }
            }
        }
        match malformed {
            Some(e) if ticks.is_empty() => Err(e),
            _ if ticks.is_empty() => Ok(Inbound::Ignored),
            _ => Ok(Inbound::Ticks(ticks)),
        }
    }
}

impl FeedProtocol for DhanProtocol {
    fn name(&self) -> &'static str {
        "dhan"
    }

    fn endpoint(&self, base_url: &str, credentials: &Credentials) -> Result<Url> {
        let mut url = Url::parse(base_url)?;
        url.query_pairs_mut()
            .append_pair("version", "2")
            .append_pair("token", &credentials.token)
            .append_pair("clientId", &credentials.client_id)
            .append_pair("authType", "2");
        Ok(url)
    }

    fn subscribe_messages(&self, keys: &[SymbolKey]) -> Result<Vec<Message>> {
        self.requests(self.mode.subscribe_code(), keys)
    }

    fn unsubscribe_messages(&self, keys: &[SymbolKey]) -> Result<Vec<Message>> {
        self.requests(self.mode.unsubscribe_code(), keys)
    }

    fn decode(&self, message: &Message) -> Result<Inbound> {
        match message {
            Message::Binary(data) => self.decode_binary(data),
            Message::Text(text) => {
                tracing::debug!("Received text on market feed: {}", text.as_str());
                Ok(Inbound::Ignored)
            }
            _ => Ok(Inbound::Ignored),
        }
    }

    fn disconnect_message(&self) -> Option<Message> {
        let req = FeedDisconnectRequest {
            RequestCode: FeedRequestCode::Disconnect,
        };
        serde_json::to_string(&req)
            .ok()
            .map(|json| Message::Text(json.into()))
    }
}
