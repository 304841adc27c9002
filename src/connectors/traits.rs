use crate::error::Result;
use crate::types::{BulletToken, Candle, PositionDetails, ProfitCheck, Side};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait MarketDataService: Send + Sync {
    /// Candles in ascending open-time order.
    async fn get_klines(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval_minutes: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<Candle>>;

    async fn get_symbol_price(&self, symbol: &str, cancel: &CancellationToken) -> Result<Decimal>;
}

#[async_trait]
pub trait BrokerService: Send + Sync {
    /// Returns the exchange order id. `limit_price = None` means a market order.
    async fn place_order(
        &self,
        symbol: &str,
        side: Side,
        amount: Decimal,
        limit_price: Option<Decimal>,
        cancel: &CancellationToken,
    ) -> Result<String>;

    async fn buy_market(&self, symbol: &str, amount: Decimal, cancel: &CancellationToken) -> Result<String> {
        self.place_order(symbol, Side::Buy, amount, None, cancel).await
    }

    async fn sell_market(&self, symbol: &str, amount: Decimal, cancel: &CancellationToken) -> Result<String> {
        self.place_order(symbol, Side::Sell, amount, None, cancel).await
    }

    async fn buy_limit(
        &self,
        symbol: &str,
        amount: Decimal,
        limit_price: Decimal,
        cancel: &CancellationToken,
    ) -> Result<String> {
        self.place_order(symbol, Side::Buy, amount, Some(limit_price), cancel).await
    }

    async fn sell_limit(
        &self,
        symbol: &str,
        amount: Decimal,
        limit_price: Decimal,
        cancel: &CancellationToken,
    ) -> Result<String> {
        self.place_order(symbol, Side::Sell, amount, Some(limit_price), cancel).await
    }
}

#[async_trait]
pub trait PositionInfoService: Send + Sync {
    async fn get_position_info(&self, symbol: &str, cancel: &CancellationToken) -> Result<PositionDetails>;
}

#[async_trait]
pub trait BalanceService: Send + Sync {
    /// `None` means USDT.
    async fn get_balance(&self, currency: Option<&str>, cancel: &CancellationToken) -> Result<Decimal>;
}

/// One profit-target evaluation for an open position.
#[async_trait]
pub trait ProfitWatcher: Send + Sync {
    async fn watch_target_profit(
        &self,
        symbol: &str,
        entry_price: Decimal,
        target_ratio: Decimal,
        cancel: &CancellationToken,
    ) -> Result<ProfitCheck>;
}

/// Issues the short-lived `(endpoint, token)` pair a websocket connect needs.
#[async_trait]
pub trait BulletTokenProvider: Send + Sync {
    async fn bullet_token(&self, cancel: &CancellationToken) -> Result<BulletToken>;
}
