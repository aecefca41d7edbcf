use rust_decimal::{Decimal, RoundingStrategy};

/// Storage scale for money fields: 4 fractional digits
pub const MONEY_SCALE: u32 = 4;

/// Round to the money storage scale using half-to-even (banker's rounding)
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointNearestEven)
}

/// Closed-interval tolerance comparison: |a - b| <= eps.
///
/// The interval is closed on both ends so a difference of exactly eps passes.
pub fn within_tolerance(a: Decimal, b: Decimal, eps: Decimal) -> bool {
    (a - b).abs() <= eps
}

/// Parse an extracted amount string into a decimal.
///
/// Accepts plain decimals with an optional leading sign and thousands
/// separators ("1,234.50"). Currency symbols are the extractor's problem.
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<Decimal>().ok()
}
