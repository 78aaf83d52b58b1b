//! Raw broker ticks.
//!
//! A `RawTick` carries the broker-native fields of one market data update. Every
//! field except the exchange and token may be absent on a given update, and an
//! absent field is distinct from a zero value: `None` means "not present in this
//! update", which is what the merge rule in [`crate::quote`] relies on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::FeedError;
use crate::instruments::InstrumentKey;
use crate::result::Result;

/// One market data update as delivered by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTick {
    /// Exchange segment.
    pub exchange: String,
    /// Scrip token.
    pub token: String,
    /// Trading symbol, usually only sent on the first (acknowledgement) tick.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trading_symbol: Option<String>,
    /// Last traded price.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_price: Option<f64>,
    /// Cumulative traded volume for the session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cumulative_volume: Option<u64>,
    /// Open interest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_interest: Option<f64>,
    /// Best bid price.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid_price: Option<f64>,
    /// Best bid quantity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid_qty: Option<u64>,
    /// Best ask price.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ask_price: Option<f64>,
    /// Best ask quantity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ask_qty: Option<u64>,
    /// Exchange-reported time of the update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange_time: Option<DateTime<Utc>>,
}

impl RawTick {
    /// A tick for `exchange|token` with every optional field absent.
    pub fn new(exchange: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            token: token.into(),
            trading_symbol: None,
            last_price: None,
            cumulative_volume: None,
            open_interest: None,
            bid_price: None,
            bid_qty: None,
            ask_price: None,
            ask_qty: None,
            exchange_time: None,
        }
    }

    /// Cache key of the instrument this tick belongs to.
    pub fn key(&self) -> InstrumentKey {
        InstrumentKey::new(self.exchange.as_str(), self.token.as_str())
    }

    /// Sets the last traded price.
    pub fn with_last_price(mut self, price: f64) -> Self {
        self.last_price = Some(price);
        self
    }

    /// Sets the cumulative volume.
    pub fn with_volume(mut self, volume: u64) -> Self {
        self.cumulative_volume = Some(volume);
        self
    }

    /// Sets the open interest.
    pub fn with_open_interest(mut self, open_interest: f64) -> Self {
        self.open_interest = Some(open_interest);
        self
    }

    /// Sets the best bid level.
    pub fn with_bid(mut self, price: f64, qty: u64) -> Self {
        self.bid_price = Some(price);
        self.bid_qty = Some(qty);
        self
    }

    /// Sets the best ask level.
    pub fn with_ask(mut self, price: f64, qty: u64) -> Self {
        self.ask_price = Some(price);
        self.ask_qty = Some(qty);
        self
    }

    /// Sets the exchange timestamp.
    pub fn with_exchange_time(mut self, time: DateTime<Utc>) -> Self {
        self.exchange_time = Some(time);
        self
    }

    /// Normalizes a broker touchline message.
    ///
    /// Recognized keys: `e`, `tk`, `ts`, `lp`, `v`, `oi`, `bp1`, `bq1`, `sp1`,
    /// `sq1` and `ft` (epoch seconds). Numbers may arrive as JSON numbers or as
    /// strings. `e` and `tk` are mandatory; optional fields that fail to parse
    /// are treated as absent.
    pub fn from_broker_json(message: &Value) -> Result<Self> {
        let fields = message
            .as_object()
            .ok_or_else(|| FeedError::Decode(format!("tick is not an object: {}", message)))?;

        let exchange = text_field(fields, "e")
            .ok_or_else(|| FeedError::Decode(format!("tick without exchange: {}", message)))?;
        let token = text_field(fields, "tk")
            .ok_or_else(|| FeedError::Decode(format!("tick without token: {}", message)))?;

        Ok(Self {
            exchange,
            token,
            trading_symbol: text_field(fields, "ts"),
            last_price: number_field(fields, "lp"),
            cumulative_volume: count_field(fields, "v"),
            open_interest: number_field(fields, "oi"),
            bid_price: number_field(fields, "bp1"),
            bid_qty: count_field(fields, "bq1"),
            ask_price: number_field(fields, "sp1"),
            ask_qty: count_field(fields, "sq1"),
            exchange_time: number_field(fields, "ft")
                .and_then(|secs| DateTime::from_timestamp(secs as i64, 0)),
        })
    }
}

fn text_field(fields: &Map<String, Value>, name: &str) -> Option<String> {
    match fields.get(name)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number_field(fields: &Map<String, Value>, name: &str) -> Option<f64> {
    let value = match fields.get(name)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    value.filter(|v| v.is_finite())
}

fn count_field(fields: &Map<String, Value>, name: &str) -> Option<u64> {
    number_field(fields, name)
        .filter(|v| *v >= 0.0)
        .map(|v| v as u64)
}
