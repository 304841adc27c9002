// src/utils/precision.rs
use rust_decimal::Decimal;

/// Rounds an order size DOWN to a whole number of lots.
/// Example: amount=10.999, lot=1 -> 10
pub fn normalize_quantity(amount: Decimal, lot_size: Decimal) -> Decimal {
    if lot_size.is_zero() {
        return amount;
    }
    ((amount / lot_size).floor() * lot_size).normalize()
}

/// Rounds a limit price to the NEAREST multiple of tick_size.
/// Example: price=100.16, tick=0.1 -> 100.2
pub fn normalize_price(price: Decimal, tick_size: Decimal) -> Decimal {
    if tick_size.is_zero() {
        return price;
    }
    ((price / tick_size).round() * tick_size).normalize()
}
