//! Tilson T3 moving average.
//!
//! Six cascaded EMAs over the input, recombined with coefficients derived from
//! the volume factor `a`:
//!
//! ```text
//! T3 = c1*e6 + c2*e5 + c3*e4 + c4*e3
//! c1 = -a^3
//! c2 = 3a^2 + 3a^3
//! c3 = -6a^2 - 3a - 3a^3
//! c4 = 1 + 3a + a^3 + 3a^2
//! ```
//!
//! `a = 0` reduces to a triple EMA; `a = 1` gives the most overshoot and least lag.
//! The first `period - 1` outputs are warm-up values.

use crate::error::{ExchangeError, Result};
use ta::indicators::ExponentialMovingAverage;
use ta::Next;

pub fn calculate_t3(prices: &[f64], period: usize, volume_factor: f64) -> Result<Vec<f64>> {
    if period == 0 {
        return Err(ExchangeError::Indicator("T3 period must be positive".into()));
    }

    let a = volume_factor;
    let c1 = -a.powi(3);
    let c2 = 3.0 * a.powi(2) + 3.0 * a.powi(3);
    let c3 = -6.0 * a.powi(2) - 3.0 * a - 3.0 * a.powi(3);
    let c4 = 1.0 + 3.0 * a + a.powi(3) + 3.0 * a.powi(2);

    let mut emas = (0..6)
        .map(|_| {
            ExponentialMovingAverage::new(period)
                .map_err(|e| ExchangeError::Indicator(format!("{:?}", e)))
        })
        .collect::<Result<Vec<_>>>()?;

    let series = prices
        .iter()
        .map(|&price| {
            let mut e = [0.0_f64; 6];
            let mut input = price;
            for (slot, ema) in e.iter_mut().zip(emas.iter_mut()) {
                input = ema.next(input);
                *slot = input;
            }
            c1 * e[5] + c2 * e[4] + c3 * e[3] + c4 * e[2]
        })
        .collect();

    Ok(series)
}
