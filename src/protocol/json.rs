//! JSON-over-WebSocket feed protocol.
//!
//! Authentication travels in the query string (`token`, `clientId`). Frames:
//!
//! ```text
//! → {"action":"subscribe","keys":["NSE_EQ|RELIANCE","NSE_EQ|TCS"]}
//! → {"action":"unsubscribe","keys":["NSE_EQ|TCS"]}
//! ← {"symbolKey":"NSE_EQ|RELIANCE","price":2450.5,"volume":120,"timestamp":1718000000000}
//! ← [{...tick...},{...tick...}]
//! ← {"type":"error","code":401,"message":"invalid token"}
//! ← {"type":"disconnect","message":"maintenance"}
//! ```

use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::credentials::Credentials;
use crate::error::{FeedError, Result};
use crate::protocol::{FeedProtocol, Inbound};
use crate::types::tick::{SymbolKey, Tick};

/// Outbound subscription request.
#[derive(Debug, Serialize)]
struct ActionRequest<'a> {
    action: &'static str,
    keys: &'a [SymbolKey],
}

/// Non-tick frames sent by the provider.
#[derive(Debug, Deserialize)]
struct ControlFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Frame {
    Batch(Vec<Tick>),
    One(Tick),
    Control(ControlFrame),
}

/// The JSON text protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonProtocol;

impl JsonProtocol {
    fn action(action: &'static str, keys: &[SymbolKey]) -> Result<Vec<Message>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let json = serde_json::to_string(&ActionRequest { action, keys })?;
        Ok(vec![Message::Text(json.into())])
    }

    fn decode_text(text: &str) -> Result<Inbound> {
        let frame: Frame = serde_json::from_str(text)
            .map_err(|e| FeedError::MalformedFrame(format!("{e}: {}", preview(text))))?;

        Ok(match frame {
            Frame::Batch(ticks) => Inbound::Ticks(ticks),
            Frame::One(tick) => Inbound::Ticks(vec![tick]),
            Frame::Control(control) => {
                let message = control.message.unwrap_or_default();
                match control.kind.as_str() {
                    "error" if matches!(control.code, Some(401 | 403)) => {
                        Inbound::Rejected(message)
                    }
                    "disconnect" => Inbound::Disconnected(message),
                    "error" => {
                        tracing::warn!(code = ?control.code, %message, "Upstream reported an error");
                        Inbound::Ignored
                    }
                    _ => Inbound::Ignored,
                }
            }
        })
    }
}

impl FeedProtocol for JsonProtocol {
    fn name(&self) -> &'static str {
        "json"
    }

    fn endpoint(&self, base_url: &str, credentials: &Credentials) -> Result<Url> {
        let mut url = Url::parse(base_url)?;
        url.query_pairs_mut()
            .append_pair("token", &credentials.token)
            .append_pair("clientId", &credentials.client_id);
        Ok(url)
    }

    fn subscribe_messages(&self, keys: &[SymbolKey]) -> Result<Vec<Message>> {
        Self::action("subscribe", keys)
    }

    fn unsubscribe_messages(&self, keys: &[SymbolKey]) -> Result<Vec<Message>> {
        Self::action("unsubscribe", keys)
    }

    fn decode(&self, message: &Message) -> Result<Inbound> {
        match message {
            Message::Text(text) => Self::decode_text(text.as_str()),
            Message::Binary(data) => {
                let text = std::str::from_utf8(data).map_err(|e| {
                    FeedError::MalformedFrame(format!("binary frame is not UTF-8: {e}"))
                })?;
                Self::decode_text(text)
            }
            _ => Ok(Inbound::Ignored),
        }
    }
}

/// First bytes of a frame, for log messages.
fn preview(text: &str) -> &str {
    let end = text
        .char_indices()
        .nth(80)
        .map_or(text.len(), |(idx, _)| idx);
    &text[..end]
}
