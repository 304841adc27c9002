// src/strategies/traits.rs
use crate::error::Result;
use crate::types::{Candle, SignalType};

pub trait Strategy: Send + Sync {
    fn name(&self) -> String;

    /// Decide the next action from a candle window, given the side currently held.
    fn target_action(&self, held: SignalType, candles: &[Candle]) -> Result<SignalType>;
}
