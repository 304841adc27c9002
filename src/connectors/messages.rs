// src/connectors/messages.rs
use crate::error::{ExchangeError, Result, KUCOIN_OK_CODE};
use crate::types::Candle;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Every KuCoin REST body: `{"code":"200000","data":...}`.
#[derive(Debug, Deserialize)]
pub struct KucoinResponse<T> {
    pub code: String,
    pub data: Option<T>,
    #[serde(default)]
    pub msg: Option<String>,
}

impl<T> KucoinResponse<T> {
    pub fn into_data(self) -> Result<T> {
        if self.code != KUCOIN_OK_CODE {
            return Err(ExchangeError::Api {
                code: self.code,
                msg: self.msg.unwrap_or_default(),
            });
        }
        self.data
            .ok_or_else(|| ExchangeError::Protocol("response envelope without data".into()))
    }
}

#[derive(Debug, Deserialize)]
pub struct AccountBalance {
    pub currency: String,
    pub balance: Decimal,
}

/// `[time, open, high, low, close, volume, ...]`
#[derive(Debug, Deserialize)]
#[serde(transparent)]
pub struct RawKline(pub Vec<Decimal>);

impl RawKline {
    pub fn into_candle(self, interval_minutes: u32) -> Result<Candle> {
        let v = self.0;
        if v.len() < 6 {
            return Err(ExchangeError::Protocol(format!(
                "kline row has {} fields, expected at least 6",
                v.len()
            )));
        }
        let open_time = v[0]
            .to_i64()
            .ok_or_else(|| ExchangeError::Protocol(format!("invalid kline time {}", v[0])))?;
        Ok(Candle {
            open_time,
            close_time: open_time + i64::from(interval_minutes) * 60_000,
            open: v[1],
            high: v[2],
            low: v[3],
            close: v[4],
            volume: v[5],
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkPriceData {
    pub value: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionData {
    pub current_qty: Decimal,
    #[serde(default)]
    pub avg_entry_price: Option<Decimal>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest<'a> {
    pub client_oid: &'a str,
    pub side: &'a str,
    pub symbol: &'a str,
    #[serde(rename = "type")]
    pub order_type: &'a str,
    pub leverage: String,
    pub size: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderData {
    pub order_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulletData {
    pub token: String,
    pub instance_servers: Vec<InstanceServer>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceServer {
    pub endpoint: String,
    #[serde(default)]
    pub ping_interval: Option<u64>,
}

// --- Websocket frames ---

#[derive(Debug, Serialize)]
pub struct WsControl<'a> {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<bool>,
}

impl<'a> WsControl<'a> {
    pub fn subscribe(id: String, symbol: &str) -> Self {
        Self {
            id,
            kind: "subscribe",
            topic: Some(instrument_topic(symbol)),
            response: Some(true),
        }
    }

    pub fn ping(id: String) -> Self {
        Self {
            id,
            kind: "ping",
            topic: None,
            response: None,
        }
    }
}

pub fn instrument_topic(symbol: &str) -> String {
    format!("/contract/instrument:{}", symbol.to_uppercase())
}

pub const MESSAGE_TYPE: &str = "message";
pub const MARK_INDEX_PRICE_SUBJECT: &str = "mark.index.price";

/// Inbound envelope. Welcome, ack and pong frames carry no subject.
#[derive(Debug, Deserialize)]
pub struct WsEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl WsEnvelope {
    pub fn is_mark_price(&self) -> bool {
        self.kind == MESSAGE_TYPE && self.subject.as_deref() == Some(MARK_INDEX_PRICE_SUBJECT)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkIndexPrice {
    pub mark_price: Decimal,
}
