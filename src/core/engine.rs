// src/core/engine.rs
use crate::config::StrategyConfig;
use crate::connectors::traits::{BrokerService, MarketDataService, PositionInfoService, ProfitWatcher};
use crate::error::{ExchangeError, Result};
use crate::strategies::traits::Strategy;
use crate::types::{PositionDetails, SignalType};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How many intervals of history feed the indicator.
pub const HISTORY_INTERVALS: u32 = 50;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub symbol: String,
    pub amount: Decimal,
    pub profit_ratio: Decimal,
    pub interval_minutes: u32,
    /// Length of the profit-watch phase of each cycle.
    pub watch_window: Duration,
    pub poll_interval: Duration,
}

impl From<&StrategyConfig> for EngineSettings {
    fn from(cfg: &StrategyConfig) -> Self {
        Self {
            symbol: cfg.symbol.to_uppercase(),
            amount: cfg.amount,
            profit_ratio: cfg.profit_ratio,
            interval_minutes: cfg.interval,
            watch_window: Duration::from_secs(u64::from(cfg.interval) * 60),
            poll_interval: Duration::from_secs(cfg.poll_interval_secs),
        }
    }
}

pub struct TradingEngine<S> {
    strategy: S,
    market_data: Arc<dyn MarketDataService>,
    broker: Arc<dyn BrokerService>,
    positions: Arc<dyn PositionInfoService>,
    watcher: Arc<dyn ProfitWatcher>,
    settings: EngineSettings,
}

impl<S> TradingEngine<S>
where
    S: Strategy,
{
    pub fn new(
        strategy: S,
        market_data: Arc<dyn MarketDataService>,
        broker: Arc<dyn BrokerService>,
        positions: Arc<dyn PositionInfoService>,
        watcher: Arc<dyn ProfitWatcher>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            strategy,
            market_data,
            broker,
            positions,
            watcher,
            settings,
        }
    }

    /// Runs until `cancel` fires (`Ok`) or a fatal error stops the run (`Err`).
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!(
            "Engine starting: {} on {}, interval {}m, target {}",
            self.strategy.name(),
            self.settings.symbol,
            self.settings.interval_minutes,
            self.settings.profit_ratio
        );

        let mut held = SignalType::Undefined;
        let mut amount = self.settings.amount;

        while !cancel.is_cancelled() {
            match self.run_cycle(&mut held, &mut amount, &cancel).await {
                Ok(()) => {}
                Err(ExchangeError::Cancelled) => break,
                Err(e) => {
                    error!("Strategy run on {} stopped: {}", self.settings.symbol, e);
                    return Err(e);
                }
            }
        }

        info!("Engine stopped (held: {}, amount: {})", held, amount);
        Ok(())
    }

    async fn run_cycle(
        &self,
        held: &mut SignalType,
        amount: &mut Decimal,
        cancel: &CancellationToken,
    ) -> Result<()> {
        info!("....................... AMOUNT: {} .......................", amount);

        let action = self.target_action(*held, cancel).await?;
        self.rebalance(*held, action, *amount, cancel).await?;

        if action != SignalType::Hold {
            *held = action;
        }

        let position = self.position_snapshot(cancel).await?;
        if !position.is_open() {
            info!("No open position on {}", self.settings.symbol);
        }
        *amount = position.size;

        self.watch_profit(*held, position.entry_price, amount, cancel).await
    }

    async fn target_action(&self, held: SignalType, cancel: &CancellationToken) -> Result<SignalType> {
        let end = Utc::now();
        let lookback = i64::from(self.settings.interval_minutes) * i64::from(HISTORY_INTERVALS);
        let start = end - chrono::Duration::minutes(lookback);

        let candles = self
            .market_data
            .get_klines(&self.settings.symbol, start, end, self.settings.interval_minutes, cancel)
            .await?;

        self.strategy.target_action(held, &candles)
    }

    async fn try_buy_or_sell(
        &self,
        action: SignalType,
        amount: Decimal,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let symbol = &self.settings.symbol;
        let order_id = match action {
            SignalType::Buy => self.broker.buy_market(symbol, amount, cancel).await?,
            SignalType::Sell => self.broker.sell_market(symbol, amount, cancel).await?,
            SignalType::Hold | SignalType::Undefined => return Ok(None),
        };
        Ok(Some(order_id))
    }

    /// Closes the held side first, then opens `action`. The exchange rejects
    /// an open against a conflicting position, so the order matters.
    ///
    /// `amount` is the last snapshot size (the configured amount before the
    /// first snapshot). A flat snapshot skips the close and opens with the
    /// configured amount.
    async fn rebalance(
        &self,
        held: SignalType,
        action: SignalType,
        amount: Decimal,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if action == SignalType::Hold {
            info!("Holding {} ({})", self.settings.symbol, held);
            return Ok(());
        }

        let open_amount = if amount.is_zero() {
            self.settings.amount
        } else {
            amount
        };

        if held != SignalType::Undefined {
            if amount.is_zero() {
                warn!("Exchange reports {} flat, skipping close of {}", self.settings.symbol, held);
            } else {
                info!("CLOSING {} POSITION BEFORE {}", held, action);
                self.try_buy_or_sell(held.opposite(), amount, cancel).await?;
            }
        }
        self.try_buy_or_sell(action, open_amount, cancel).await?;
        Ok(())
    }

    async fn position_snapshot(&self, cancel: &CancellationToken) -> Result<PositionDetails> {
        self.positions
            .get_position_info(&self.settings.symbol, cancel)
            .await
            .map_err(|e| match e {
                ExchangeError::Cancelled => ExchangeError::Cancelled,
                other => ExchangeError::Domain(format!("position fetch failed: {}", other)),
            })
    }

    /// Polls the watcher until the watch window closes. Watch errors skip the tick.
    async fn watch_profit(
        &self,
        held: SignalType,
        entry_price: Decimal,
        amount: &mut Decimal,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let deadline = Instant::now() + self.settings.watch_window;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ExchangeError::Cancelled),
                _ = sleep_until(deadline) => break,
                _ = sleep(self.settings.poll_interval) => {}
            }

            let check = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ExchangeError::Cancelled),
                _ = sleep_until(deadline) => break,
                res = self.watcher.watch_target_profit(
                    &self.settings.symbol,
                    entry_price,
                    self.settings.profit_ratio,
                    cancel,
                ) => res,
            };

            match check {
                Err(ExchangeError::Cancelled) => return Err(ExchangeError::Cancelled),
                Err(e) => warn!("Error watching target profit: {}", e),
                Ok(check) if check.take_profit => {
                    self.take_profit(held, check.ratio, amount, cancel).await?;
                }
                Ok(check) => debug!("Profit ratio {} below target", check.ratio),
            }
        }

        info!("PROFIT WATCH TIMEOUT. CLOSING WATCH.");
        Ok(())
    }

    /// Sells (or buys back) `amount * ratio` and re-reads the position.
    async fn take_profit(
        &self,
        held: SignalType,
        ratio: Decimal,
        amount: &mut Decimal,
        cancel: &CancellationToken,
    ) -> Result<()> {
        info!("Realized Pnl: {}", ratio);
        info!("Taking profit....");

        let profit_amount = *amount * ratio;
        match self.try_buy_or_sell(held.opposite(), profit_amount, cancel).await {
            Ok(_) => {}
            Err(ExchangeError::Cancelled) => return Err(ExchangeError::Cancelled),
            Err(e) => {
                warn!("Take-profit order for {} failed: {}", profit_amount, e);
                return Ok(());
            }
        }

        let position = self.position_snapshot(cancel).await?;
        *amount = position.size;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Candle, ProfitCheck, Side};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a fixed list of actions, then cancels the run.
    struct ScriptedStrategy {
        actions: Mutex<VecDeque<SignalType>>,
        cancel: CancellationToken,
    }

    impl Strategy for ScriptedStrategy {
        fn name(&self) -> String {
            "scripted".into()
        }

        fn target_action(&self, _held: SignalType, _candles: &[Candle]) -> Result<SignalType> {
            match self.actions.lock().unwrap().pop_front() {
                Some(action) => Ok(action),
                None => {
                    self.cancel.cancel();
                    Ok(SignalType::Hold)
                }
            }
        }
    }

    struct StaticMarket;

    #[async_trait]
    impl MarketDataService for StaticMarket {
        async fn get_klines(
            &self,
            _symbol: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
            _interval_minutes: u32,
            _cancel: &CancellationToken,
        ) -> Result<Vec<Candle>> {
            Ok(vec![Candle {
                open_time: 0,
                close_time: 60_000,
                open: dec!(100),
                high: dec!(100),
                low: dec!(100),
                close: dec!(100),
                volume: dec!(1),
            }])
        }

        async fn get_symbol_price(&self, _symbol: &str, _cancel: &CancellationToken) -> Result<Decimal> {
            Ok(dec!(100))
        }
    }

    #[derive(Default)]
    struct RecordingBroker {
        orders: Mutex<Vec<(Side, Decimal)>>,
    }

    #[async_trait]
    impl BrokerService for RecordingBroker {
        async fn place_order(
            &self,
            _symbol: &str,
            side: Side,
            amount: Decimal,
            _limit_price: Option<Decimal>,
            _cancel: &CancellationToken,
        ) -> Result<String> {
            let mut orders = self.orders.lock().unwrap();
            orders.push((side, amount));
            Ok(format!("order-{}", orders.len()))
        }
    }

    struct ScriptedPositions {
        snapshots: Mutex<VecDeque<Result<PositionDetails>>>,
        fallback: PositionDetails,
        calls: Mutex<u32>,
    }

    impl ScriptedPositions {
        fn new(fallback: PositionDetails, snapshots: Vec<Result<PositionDetails>>) -> Self {
            Self {
                snapshots: Mutex::new(snapshots.into()),
                fallback,
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl PositionInfoService for ScriptedPositions {
        async fn get_position_info(&self, _symbol: &str, _cancel: &CancellationToken) -> Result<PositionDetails> {
            *self.calls.lock().unwrap() += 1;
            self.snapshots
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(self.fallback.clone()))
        }
    }

    struct ScriptedWatcher {
        checks: Mutex<VecDeque<Result<ProfitCheck>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedWatcher {
        fn new(checks: Vec<Result<ProfitCheck>>) -> Self {
            Self {
                checks: Mutex::new(checks.into()),
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl ProfitWatcher for ScriptedWatcher {
        async fn watch_target_profit(
            &self,
            _symbol: &str,
            _entry_price: Decimal,
            _target_ratio: Decimal,
            _cancel: &CancellationToken,
        ) -> Result<ProfitCheck> {
            *self.calls.lock().unwrap() += 1;
            self.checks.lock().unwrap().pop_front().unwrap_or(Ok(ProfitCheck {
                take_profit: false,
                ratio: dec!(0.01),
            }))
        }
    }

    fn position(size: Decimal, side: SignalType) -> PositionDetails {
        PositionDetails {
            size,
            entry_price: dec!(100),
            side,
        }
    }

    fn settings(watch_window: Duration, poll_interval: Duration) -> EngineSettings {
        EngineSettings {
            symbol: "XBTUSDTM".into(),
            amount: dec!(1),
            profit_ratio: dec!(0.05),
            interval_minutes: 15,
            watch_window,
            poll_interval,
        }
    }

    struct Harness {
        engine: TradingEngine<ScriptedStrategy>,
        broker: Arc<RecordingBroker>,
        positions: Arc<ScriptedPositions>,
        watcher: Arc<ScriptedWatcher>,
        cancel: CancellationToken,
    }

    fn harness(
        actions: Vec<SignalType>,
        positions: ScriptedPositions,
        watcher: ScriptedWatcher,
        settings: EngineSettings,
    ) -> Harness {
        let cancel = CancellationToken::new();
        let broker = Arc::new(RecordingBroker::default());
        let positions = Arc::new(positions);
        let watcher = Arc::new(watcher);
        let engine = TradingEngine::new(
            ScriptedStrategy {
                actions: Mutex::new(actions.into()),
                cancel: cancel.clone(),
            },
            Arc::new(StaticMarket),
            broker.clone(),
            positions.clone(),
            watcher.clone(),
            settings,
        );
        Harness {
            engine,
            broker,
            positions,
            watcher,
            cancel,
        }
    }

    #[tokio::test]
    async fn first_signal_opens_without_closing() {
        let h = harness(
            vec![SignalType::Buy],
            ScriptedPositions::new(position(dec!(1), SignalType::Buy), vec![]),
            ScriptedWatcher::new(vec![]),
            settings(Duration::from_millis(20), Duration::from_millis(5)),
        );

        h.engine.run(h.cancel.clone()).await.unwrap();

        assert_eq!(*h.broker.orders.lock().unwrap(), vec![(Side::Buy, dec!(1))]);
    }

    #[tokio::test]
    async fn side_switch_closes_before_opening() {
        let h = harness(
            vec![SignalType::Buy, SignalType::Sell],
            ScriptedPositions::new(position(dec!(2), SignalType::Buy), vec![]),
            ScriptedWatcher::new(vec![]),
            settings(Duration::from_millis(20), Duration::from_millis(5)),
        );

        h.engine.run(h.cancel.clone()).await.unwrap();

        assert_eq!(
            *h.broker.orders.lock().unwrap(),
            vec![
                (Side::Buy, dec!(1)),
                // close the long with the snapshot size, then open the short
                (Side::Sell, dec!(2)),
                (Side::Sell, dec!(2)),
            ]
        );
    }

    #[tokio::test]
    async fn flat_snapshot_skips_the_close_leg() {
        let mut cfg = settings(Duration::from_millis(20), Duration::from_millis(5));
        cfg.amount = dec!(3);
        let h = harness(
            vec![SignalType::Buy, SignalType::Sell],
            ScriptedPositions::new(position(Decimal::ZERO, SignalType::Undefined), vec![]),
            ScriptedWatcher::new(vec![]),
            cfg,
        );

        h.engine.run(h.cancel.clone()).await.unwrap();

        // nothing to close, so the short opens with the configured amount only
        assert_eq!(
            *h.broker.orders.lock().unwrap(),
            vec![(Side::Buy, dec!(3)), (Side::Sell, dec!(3))]
        );
    }

    #[tokio::test]
    async fn flip_is_sized_from_the_snapshot() {
        let h = harness(
            vec![SignalType::Sell, SignalType::Buy],
            ScriptedPositions::new(
                position(dec!(1), SignalType::Sell),
                vec![Ok(position(dec!(5), SignalType::Sell))],
            ),
            ScriptedWatcher::new(vec![]),
            settings(Duration::from_millis(20), Duration::from_millis(5)),
        );

        h.engine.run(h.cancel.clone()).await.unwrap();

        // the flip is sized from the snapshot, not the configured amount
        let orders = h.broker.orders.lock().unwrap().clone();
        assert_eq!(orders[0], (Side::Sell, dec!(1)));
        assert_eq!(orders[1], (Side::Buy, dec!(5)));
        assert_eq!(orders[2], (Side::Buy, dec!(5)));
    }

    #[tokio::test]
    async fn hold_places_no_orders() {
        let h = harness(
            vec![SignalType::Hold],
            ScriptedPositions::new(position(Decimal::ZERO, SignalType::Undefined), vec![]),
            ScriptedWatcher::new(vec![]),
            settings(Duration::from_millis(20), Duration::from_millis(5)),
        );

        h.engine.run(h.cancel.clone()).await.unwrap();

        assert!(h.broker.orders.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn profit_target_sells_a_slice_and_refreshes_position() {
        let h = harness(
            vec![SignalType::Buy],
            ScriptedPositions::new(
                position(dec!(2), SignalType::Buy),
                vec![Ok(position(dec!(4), SignalType::Buy))],
            ),
            ScriptedWatcher::new(vec![Ok(ProfitCheck {
                take_profit: true,
                ratio: dec!(0.5),
            })]),
            settings(Duration::from_millis(200), Duration::from_millis(5)),
        );

        h.engine.run(h.cancel.clone()).await.unwrap();

        let orders = h.broker.orders.lock().unwrap().clone();
        assert_eq!(orders[0], (Side::Buy, dec!(1)));
        // 4 lots * 0.5
        assert_eq!(orders[1], (Side::Sell, dec!(2)));
        assert!(*h.positions.calls.lock().unwrap() >= 2);
    }

    #[tokio::test]
    async fn watch_errors_do_not_stop_the_run() {
        let h = harness(
            vec![SignalType::Sell],
            ScriptedPositions::new(position(dec!(1), SignalType::Sell), vec![]),
            ScriptedWatcher::new(vec![
                Err(ExchangeError::TransientNetwork("timeout".into())),
                Err(ExchangeError::Protocol("bad frame".into())),
            ]),
            settings(Duration::from_millis(100), Duration::from_millis(5)),
        );

        assert!(h.engine.run(h.cancel.clone()).await.is_ok());
        assert!(*h.watcher.calls.lock().unwrap() >= 3);
    }

    #[tokio::test]
    async fn position_failure_is_fatal() {
        let h = harness(
            vec![SignalType::Buy, SignalType::Sell],
            ScriptedPositions::new(
                position(dec!(1), SignalType::Buy),
                vec![Err(ExchangeError::HttpStatus {
                    status: 503,
                    body: "down".into(),
                })],
            ),
            ScriptedWatcher::new(vec![]),
            settings(Duration::from_millis(20), Duration::from_millis(5)),
        );

        let err = h.engine.run(h.cancel.clone()).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Domain(_)));
        assert_eq!(h.broker.orders.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancellation_cuts_the_poll_delay_short() {
        let h = harness(
            vec![SignalType::Buy, SignalType::Buy],
            ScriptedPositions::new(position(dec!(1), SignalType::Buy), vec![]),
            ScriptedWatcher::new(vec![]),
            settings(Duration::from_secs(600), Duration::from_secs(30)),
        );

        let trigger = h.cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        h.engine.run(h.cancel.clone()).await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(*h.watcher.calls.lock().unwrap(), 0);
    }
}
