use crate::error::{ExchangeError, Result};
use crate::strategies::t3::calculate_t3;
use crate::strategies::traits::Strategy;
use crate::types::{Candle, SignalType};
use rust_decimal::prelude::ToPrimitive;
use tracing::info;

/// T3-vs-close crossover.
pub struct TilsonStrategy {
    period: usize,
    volume_factor: f64,
}

impl TilsonStrategy {
    pub fn new(period: usize, volume_factor: f64) -> Self {
        Self {
            period,
            volume_factor,
        }
    }
}

impl Default for TilsonStrategy {
    fn default() -> Self {
        Self::new(6, 0.5)
    }
}

/// Smoothed above close means Buy, below means Sell, but never re-signal the side already held.
pub fn crossover_signal(held: SignalType, smoothed_last: f64, close_last: f64) -> SignalType {
    if held != SignalType::Buy && smoothed_last > close_last {
        SignalType::Buy
    } else if held != SignalType::Sell && smoothed_last < close_last {
        SignalType::Sell
    } else {
        SignalType::Hold
    }
}

impl Strategy for TilsonStrategy {
    fn name(&self) -> String {
        format!("TilsonT3({}, {})", self.period, self.volume_factor)
    }

    fn target_action(&self, held: SignalType, candles: &[Candle]) -> Result<SignalType> {
        let closes = candles
            .iter()
            .map(|c| {
                c.close
                    .to_f64()
                    .ok_or_else(|| ExchangeError::Protocol(format!("close {} out of range", c.close)))
            })
            .collect::<Result<Vec<f64>>>()?;

        let close_last = *closes
            .last()
            .ok_or_else(|| ExchangeError::Domain("no candles returned".into()))?;
        let t3 = calculate_t3(&closes, self.period, self.volume_factor)?;
        let smoothed_last = t3.last().copied().unwrap_or(close_last);

        let signal = crossover_signal(held, smoothed_last, close_last);
        info!(
            "{}: t3 {:.4} vs close {:.4}, held {} -> {}",
            self.name(),
            smoothed_last,
            close_last,
            held,
            signal
        );
        Ok(signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn candles(closes: &[i64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle {
                open_time: i as i64 * 60_000,
                close_time: (i as i64 + 1) * 60_000,
                open: Decimal::from(c),
                high: Decimal::from(c),
                low: Decimal::from(c),
                close: Decimal::from(c),
                volume: Decimal::ONE,
            })
            .collect()
    }

    #[test]
    fn crossover_from_undefined() {
        assert_eq!(crossover_signal(SignalType::Undefined, 101.0, 100.0), SignalType::Buy);
        assert_eq!(crossover_signal(SignalType::Undefined, 99.0, 100.0), SignalType::Sell);
        assert_eq!(crossover_signal(SignalType::Undefined, 100.0, 100.0), SignalType::Hold);
    }

    #[test]
    fn held_side_is_not_signalled_again() {
        assert_eq!(crossover_signal(SignalType::Buy, 101.0, 100.0), SignalType::Hold);
        assert_eq!(crossover_signal(SignalType::Sell, 99.0, 100.0), SignalType::Hold);
    }

    #[test]
    fn held_side_can_flip() {
        assert_eq!(crossover_signal(SignalType::Buy, 99.0, 100.0), SignalType::Sell);
        assert_eq!(crossover_signal(SignalType::Sell, 101.0, 100.0), SignalType::Buy);
    }

    #[test]
    fn rising_market_lags_into_a_sell() {
        // T3 trails a rising close, so it sits below the last close.
        let rising: Vec<i64> = (100..150).collect();
        let action = TilsonStrategy::default()
            .target_action(SignalType::Undefined, &candles(&rising))
            .unwrap();
        assert_eq!(action, SignalType::Sell);
    }

    #[test]
    fn falling_market_gives_buy() {
        let falling: Vec<i64> = (100..150).rev().collect();
        let action = TilsonStrategy::default()
            .target_action(SignalType::Undefined, &candles(&falling))
            .unwrap();
        assert_eq!(action, SignalType::Buy);
    }

    #[test]
    fn empty_window_is_an_error() {
        let err = TilsonStrategy::default()
            .target_action(SignalType::Undefined, &[])
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Domain(_)));
    }
}
