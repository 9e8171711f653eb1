//! Fees, position sizing and P&L, all in integer cents.

/// Win probability assumed by the sizing rule.
pub const ASSUMED_WIN_RATE: f64 = 0.935;

/// Fraction of full Kelly we actually bet.
pub const KELLY_FRACTION: f64 = 0.25;

/// Per-contract fee coefficient used by the sizing rule.
const SIZING_FEE_RATE: f64 = 0.07;

/// Exchange taker fee in cents:
/// `ceil(0.07 * contracts * P * (1 - P) * 100)` with `P = price / 100`.
///
/// Evaluated in integer arithmetic (`7 * c * p * (100 - p) / 10_000`) so
/// exact results are not pushed over an integer boundary by float error.
pub fn taker_fee(contracts: i64, price_cents: i64) -> i64 {
    if contracts <= 0 {
        return 0;
    }
    let variance = (price_cents * (100 - price_cents)).max(0);
    let numerator = 7 * contracts * variance;
    (numerator + 9_999) / 10_000
}

/// Quarter-Kelly contract count for a limit at `limit_price_cents`.
///
/// ```text
/// fee         = 0.07 * min(entry, 100 - entry)
/// win_profit  = 100 - entry - fee
/// loss_amount = entry + fee
/// b           = win_profit / loss_amount
/// kelly       = p - (1 - p) / b
/// contracts   = floor(0.25 * kelly * balance / loss_amount)
/// ```
///
/// Returns 0 whenever the inputs are invalid or Kelly says not to bet.
/// There is no minimum-one-contract override.
pub fn kelly_size(limit_price_cents: i64, balance_cents: i64) -> i64 {
    if limit_price_cents <= 0 || limit_price_cents >= 100 || balance_cents <= 0 {
        return 0;
    }

    let entry = limit_price_cents as f64;
    let fee = SIZING_FEE_RATE * entry.min(100.0 - entry);
    let win_profit = 100.0 - entry - fee;
    let loss_amount = entry + fee;

    if win_profit <= 0.0 || loss_amount <= 0.0 {
        return 0;
    }

    let p = ASSUMED_WIN_RATE;
    let b = win_profit / loss_amount;
    let kelly = p - (1.0 - p) / b;
    if kelly <= 0.0 {
        return 0;
    }

    let contracts = (KELLY_FRACTION * kelly * balance_cents as f64 / loss_amount).floor() as i64;
    if contracts < 1 {
        return 0;
    }
    contracts
}

/// Realised P&L in cents for a settled position.
///
/// Win: `(100 - entry) * contracts - fee`. Loss: `-(entry * contracts + fee)`.
pub fn compute_pnl(won: bool, entry_price_cents: i64, contracts: i64, fee_cents: i64) -> i64 {
    if won {
        (100 - entry_price_cents) * contracts - fee_cents
    } else {
        -(entry_price_cents * contracts + fee_cents)
    }
}
