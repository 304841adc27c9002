// src/connectors/kucoin.rs
use crate::config::{AppConfig, StrategyConfig};
use crate::connectors::messages::{
    AccountBalance, BulletData, KucoinResponse, MarkPriceData, OrderData, OrderRequest,
    PositionData, RawKline,
};
use crate::connectors::signer::RequestSigner;
use crate::connectors::traits::{
    BalanceService, BrokerService, BulletTokenProvider, MarketDataService, PositionInfoService,
    ProfitWatcher,
};
use crate::core::retry::RetryPolicy;
use crate::error::{ExchangeError, Result};
use crate::types::{BulletToken, Candle, PositionDetails, ProfitCheck, Side, SignalType};
use crate::utils::precision::{normalize_price, normalize_quantity};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const DEFAULT_CURRENCY: &str = "USDT";
const DEFAULT_PING_INTERVAL_MS: u64 = 18_000;

/// Which KuCoin host a request goes to.
#[derive(Debug, Clone, Copy)]
enum Host {
    Spot,
    Futures,
}

#[derive(Debug, Clone)]
pub struct OrderSettings {
    pub leverage: u32,
    pub lot_size: Decimal,
    pub tick_size: Decimal,
}

impl From<&StrategyConfig> for OrderSettings {
    fn from(cfg: &StrategyConfig) -> Self {
        Self {
            leverage: cfg.leverage,
            lot_size: cfg.lot_size,
            tick_size: cfg.tick_size,
        }
    }
}

/// Signed REST client for KuCoin spot accounts and USDT-margined futures.
#[derive(Clone)]
pub struct KucoinClient {
    http_client: Client,
    signer: Arc<RequestSigner>,
    base_url: String,
    futures_base_url: String,
    http_policy: RetryPolicy,
    orders: OrderSettings,
}

impl KucoinClient {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ExchangeError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self::with_client(
            http_client,
            RequestSigner::new(&config.kucoin),
            config.kucoin.base_url.clone(),
            config.kucoin.futures_base_url.clone(),
            RetryPolicy::http(&config.http_retry),
            OrderSettings::from(&config.strategy),
        ))
    }

    pub fn with_client(
        http_client: Client,
        signer: RequestSigner,
        base_url: String,
        futures_base_url: String,
        http_policy: RetryPolicy,
        orders: OrderSettings,
    ) -> Self {
        Self {
            http_client,
            signer: Arc::new(signer),
            base_url: base_url.trim_end_matches('/').to_string(),
            futures_base_url: futures_base_url.trim_end_matches('/').to_string(),
            http_policy,
            orders,
        }
    }

    fn host_url(&self, host: Host) -> &str {
        match host {
            Host::Spot => &self.base_url,
            Host::Futures => &self.futures_base_url,
        }
    }

    /// One signed request through the HTTP retry policy. Each attempt is
    /// re-signed so the timestamp stays fresh.
    async fn send_signed_request<T: DeserializeOwned>(
        &self,
        method: Method,
        host: Host,
        endpoint: &str,
        params: &[(&str, String)],
        body: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<T> {
        let path_and_query = if params.is_empty() {
            endpoint.to_string()
        } else {
            let query = serde_urlencoded::to_string(params)
                .map_err(|e| ExchangeError::Protocol(format!("cannot encode query: {}", e)))?;
            format!("{}?{}", endpoint, query)
        };
        let url = format!("{}{}", self.host_url(host), path_and_query);
        let body = body.unwrap_or_default();
        let (method, url, body, path_and_query) = (&method, &url, &body, &path_and_query);

        self.http_policy
            .execute(cancel, move || async move {
                let headers = self.signer.sign(method.as_str(), path_and_query, body)?;

                let mut request = self.http_client.request(method.clone(), url);
                if !body.is_empty() {
                    request = request
                        .header(reqwest::header::CONTENT_TYPE, "application/json")
                        .body(body.clone());
                }
                let response = headers.apply(request).send().await?;
                let status = response.status();
                let text = response.text().await?;

                if !status.is_success() {
                    return Err(status_error(status.as_u16(), text));
                }

                let envelope: KucoinResponse<T> = serde_json::from_str(&text)?;
                envelope.into_data()
            })
            .await
    }

    /// `POST /api/v1/bullet-private` on the futures host.
    pub async fn get_bullet_private(&self, cancel: &CancellationToken) -> Result<BulletToken> {
        let data: BulletData = self
            .send_signed_request(
                Method::POST,
                Host::Futures,
                "/api/v1/bullet-private",
                &[],
                None,
                cancel,
            )
            .await?;

        let server = data
            .instance_servers
            .into_iter()
            .next()
            .ok_or_else(|| ExchangeError::Protocol("bullet response without instance servers".into()))?;

        Ok(BulletToken {
            endpoint: server.endpoint,
            token: data.token,
            ping_interval: Duration::from_millis(
                server.ping_interval.unwrap_or(DEFAULT_PING_INTERVAL_MS),
            ),
        })
    }
}

/// Non-2xx answer. 5xx/429 stay retryable; otherwise prefer the exchange's code.
fn status_error(status: u16, body: String) -> ExchangeError {
    if status != 429 && status < 500 {
        if let Ok(envelope) = serde_json::from_str::<KucoinResponse<serde_json::Value>>(&body) {
            return ExchangeError::Api {
                code: envelope.code,
                msg: envelope.msg.unwrap_or_default(),
            };
        }
    }
    ExchangeError::HttpStatus { status, body }
}

#[async_trait]
impl MarketDataService for KucoinClient {
    async fn get_klines(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval_minutes: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<Candle>> {
        let params = vec![
            ("symbol", symbol.to_uppercase()),
            ("granularity", interval_minutes.to_string()),
            ("from", start.timestamp_millis().to_string()),
            ("to", end.timestamp_millis().to_string()),
        ];

        let rows: Vec<RawKline> = self
            .send_signed_request(
                Method::GET,
                Host::Futures,
                "/api/v1/kline/query",
                &params,
                None,
                cancel,
            )
            .await?;

        let mut candles = rows
            .into_iter()
            .map(|row| row.into_candle(interval_minutes))
            .collect::<Result<Vec<_>>>()?;
        candles.sort_by_key(|c| c.open_time);

        debug!("Fetched {} candles for {}", candles.len(), symbol);
        Ok(candles)
    }

    async fn get_symbol_price(&self, symbol: &str, cancel: &CancellationToken) -> Result<Decimal> {
        let endpoint = format!("/api/v1/mark-price/{}/current", symbol.to_uppercase());
        let data: MarkPriceData = self
            .send_signed_request(Method::GET, Host::Futures, &endpoint, &[], None, cancel)
            .await?;
        Ok(data.value)
    }
}

#[async_trait]
impl BrokerService for KucoinClient {
    async fn place_order(
        &self,
        symbol: &str,
        side: Side,
        amount: Decimal,
        limit_price: Option<Decimal>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let size = normalize_quantity(amount, self.orders.lot_size);
        if size <= Decimal::ZERO {
            return Err(ExchangeError::Domain(format!(
                "order size {} rounds to zero lots (lot size {})",
                amount, self.orders.lot_size
            )));
        }

        let symbol = symbol.to_uppercase();
        // Generated once so retries of the same order stay idempotent.
        let client_oid = uuid::Uuid::new_v4().to_string();
        let price = limit_price.map(|p| normalize_price(p, self.orders.tick_size));
        let order = OrderRequest {
            client_oid: &client_oid,
            side: side.as_str(),
            symbol: &symbol,
            order_type: if price.is_some() { "limit" } else { "market" },
            leverage: self.orders.leverage.to_string(),
            size: size.to_string(),
            price: price.map(|p| p.to_string()),
        };
        let body = serde_json::to_string(&order)?;

        info!(
            "Sending {} {} order: {} {} @ {:?}",
            order.order_type,
            side.as_str(),
            size,
            symbol,
            price
        );

        let data: OrderData = self
            .send_signed_request(
                Method::POST,
                Host::Futures,
                "/api/v1/orders",
                &[],
                Some(body),
                cancel,
            )
            .await?;

        info!("Order accepted: {} (clientOid {})", data.order_id, client_oid);
        Ok(data.order_id)
    }
}

#[async_trait]
impl PositionInfoService for KucoinClient {
    async fn get_position_info(&self, symbol: &str, cancel: &CancellationToken) -> Result<PositionDetails> {
        let data: PositionData = self
            .send_signed_request(
                Method::GET,
                Host::Futures,
                "/api/v1/position",
                &[("symbol", symbol.to_uppercase())],
                None,
                cancel,
            )
            .await?;

        let side = if data.current_qty > Decimal::ZERO {
            SignalType::Buy
        } else if data.current_qty < Decimal::ZERO {
            SignalType::Sell
        } else {
            SignalType::Undefined
        };

        Ok(PositionDetails {
            size: data.current_qty.abs(),
            entry_price: data.avg_entry_price.unwrap_or_default(),
            side,
        })
    }
}

#[async_trait]
impl BalanceService for KucoinClient {
    async fn get_balance(&self, currency: Option<&str>, cancel: &CancellationToken) -> Result<Decimal> {
        let currency = currency.unwrap_or(DEFAULT_CURRENCY).to_uppercase();
        let accounts: Vec<AccountBalance> = self
            .send_signed_request(Method::GET, Host::Spot, "/api/v1/accounts", &[], None, cancel)
            .await?;

        accounts
            .into_iter()
            .find(|a| a.currency == currency)
            .map(|a| a.balance)
            .ok_or_else(|| ExchangeError::Domain(format!("no {} account found", currency)))
    }
}

#[async_trait]
impl BulletTokenProvider for KucoinClient {
    async fn bullet_token(&self, cancel: &CancellationToken) -> Result<BulletToken> {
        self.get_bullet_private(cancel).await
    }
}

/// Profit check by polling the REST mark price once per call.
pub struct PollingWatcher {
    market_data: Arc<dyn MarketDataService>,
}

impl PollingWatcher {
    pub fn new(market_data: Arc<dyn MarketDataService>) -> Self {
        Self { market_data }
    }
}

#[async_trait]
impl ProfitWatcher for PollingWatcher {
    async fn watch_target_profit(
        &self,
        symbol: &str,
        entry_price: Decimal,
        target_ratio: Decimal,
        cancel: &CancellationToken,
    ) -> Result<ProfitCheck> {
        let mark_price = self.market_data.get_symbol_price(symbol, cancel).await?;
        ProfitCheck::evaluate(mark_price, entry_price, target_ratio)
    }
}
