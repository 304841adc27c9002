// src/connectors/futures_hub.rs
use crate::connectors::messages::{MarkIndexPrice, WsControl, WsEnvelope};
use crate::connectors::traits::{BulletTokenProvider, ProfitWatcher};
use crate::core::retry::RetryPolicy;
use crate::error::{ExchangeError, Result};
use crate::types::ProfitCheck;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{interval_at, timeout_at, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const MIN_PING_INTERVAL: Duration = Duration::from_secs(1);

/// A connected socket that has already sent its subscribe frame.
pub struct MarketDataSocket {
    stream: WsStream,
    symbol: String,
    ping_interval: Duration,
}

impl MarketDataSocket {
    async fn ping(&mut self) -> Result<()> {
        let frame = serde_json::to_string(&WsControl::ping(uuid::Uuid::new_v4().to_string()))?;
        self.stream.send(Message::Text(frame)).await?;
        Ok(())
    }

    /// Sends a close frame. Dropping the socket also tears the connection down.
    pub async fn close(mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!("Close of {} stream failed: {}", self.symbol, e);
        }
    }
}

/// Live mark-price stream for KuCoin futures.
pub struct FuturesHub {
    tokens: Arc<dyn BulletTokenProvider>,
    ws_policy: RetryPolicy,
    receive_timeout: Duration,
}

impl FuturesHub {
    pub fn new(tokens: Arc<dyn BulletTokenProvider>, ws_policy: RetryPolicy, receive_timeout: Duration) -> Self {
        Self {
            tokens,
            ws_policy,
            receive_timeout,
        }
    }

    /// Bullet token, connect, subscribe: retried as one unit.
    pub async fn market_data_socket(&self, symbol: &str, cancel: &CancellationToken) -> Result<MarketDataSocket> {
        self.ws_policy
            .execute(cancel, move || self.subscribe(symbol, cancel))
            .await
    }

    /// A single pass of the subscribe sequence. A fresh token is requested every time.
    async fn subscribe(&self, symbol: &str, cancel: &CancellationToken) -> Result<MarketDataSocket> {
        let token = self.tokens.bullet_token(cancel).await?;

        let mut url = Url::parse(&token.endpoint)?;
        url.query_pairs_mut()
            .append_pair("token", &token.token)
            .append_pair("connectId", &uuid::Uuid::new_v4().to_string());

        let (mut stream, _) = connect_async(url.as_str()).await?;

        let frame = serde_json::to_string(&WsControl::subscribe(
            uuid::Uuid::new_v4().to_string(),
            symbol,
        ))?;
        stream.send(Message::Text(frame)).await?;
        info!("Subscribed to /contract/instrument:{}", symbol.to_uppercase());

        Ok(MarketDataSocket {
            stream,
            symbol: symbol.to_uppercase(),
            ping_interval: token.ping_interval.max(MIN_PING_INTERVAL),
        })
    }

    /// Reads one frame. `Ok(None)` means the frame was not a mark price update.
    async fn receive_mark_price(&self, socket: &mut MarketDataSocket, deadline: Instant) -> Result<Option<Decimal>> {
        let frame = match timeout_at(deadline, socket.stream.next()).await {
            Err(_) => return Err(ExchangeError::StreamDisconnect("receive timeout".into())),
            Ok(None) => return Err(ExchangeError::StreamDisconnect("stream ended".into())),
            Ok(Some(frame)) => frame?,
        };

        match frame {
            Message::Text(text) => {
                let envelope: WsEnvelope = serde_json::from_str(&text)?;
                if !envelope.is_mark_price() {
                    debug!("Skipping {} frame on {}", envelope.kind, socket.symbol);
                    return Ok(None);
                }
                let data = envelope
                    .data
                    .ok_or_else(|| ExchangeError::Protocol("mark price frame without data".into()))?;
                let price: MarkIndexPrice = serde_json::from_value(data)?;
                Ok(Some(price.mark_price))
            }
            Message::Close(reason) => Err(ExchangeError::StreamDisconnect(format!(
                "closed by server: {:?}",
                reason
            ))),
            _ => Ok(None),
        }
    }

    async fn receive_until_target(
        &self,
        socket: &mut MarketDataSocket,
        entry_price: Decimal,
        target_ratio: Decimal,
        cancel: &CancellationToken,
    ) -> Result<ProfitCheck> {
        let mut last = ProfitCheck {
            take_profit: false,
            ratio: Decimal::ZERO,
        };
        let mut keep_alive = interval_at(Instant::now() + socket.ping_interval, socket.ping_interval);
        let mut deadline = Instant::now() + self.receive_timeout;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(last),
                _ = keep_alive.tick() => socket.ping().await?,
                frame = self.receive_mark_price(socket, deadline) => {
                    deadline = Instant::now() + self.receive_timeout;
                    let Some(mark_price) = frame? else { continue };

                    let check = ProfitCheck::evaluate(mark_price, entry_price, target_ratio)?;
                    debug!("{} mark {} -> ratio {}", socket.symbol, mark_price, check.ratio);
                    if check.take_profit {
                        info!("PROFIT TARGET REACHED on {}: {}", socket.symbol, check.ratio);
                        return Ok(check);
                    }
                    last = check;
                }
            }
        }
    }

    /// Subscribe, then read until the target is met. The socket is closed on
    /// every return path.
    async fn watch_session(
        &self,
        symbol: &str,
        entry_price: Decimal,
        target_ratio: Decimal,
        cancel: &CancellationToken,
    ) -> Result<ProfitCheck> {
        let mut socket = self.subscribe(symbol, cancel).await?;
        let result = self
            .receive_until_target(&mut socket, entry_price, target_ratio, cancel)
            .await;
        if let Err(e) = &result {
            warn!("Watch session on {} ended: {}", symbol, e);
        }
        socket.close().await;
        result
    }
}

#[async_trait]
impl ProfitWatcher for FuturesHub {
    /// Streams mark prices until the target ratio is met or `cancel` fires.
    /// A dropped connection triggers a complete resubscribe with a new token.
    async fn watch_target_profit(
        &self,
        symbol: &str,
        entry_price: Decimal,
        target_ratio: Decimal,
        cancel: &CancellationToken,
    ) -> Result<ProfitCheck> {
        self.ws_policy
            .execute(cancel, move || {
                self.watch_session(symbol, entry_price, target_ratio, cancel)
            })
            .await
    }
}
