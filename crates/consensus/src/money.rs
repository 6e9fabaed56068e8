//! Monetary units and amount conversion rules.

pub type Amount = i64;

pub const COIN: Amount = 100_000_000;

/// No amount larger than this (in satoshi) is valid.
pub const MAX_MONEY: Amount = 21_000_000 * COIN;

pub fn money_range(value: Amount) -> bool {
    (0..=MAX_MONEY).contains(&value)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AmountError {
    NotFinite,
    Negative,
    TooLarge,
}

impl std::fmt::Display for AmountError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AmountError::NotFinite => write!(f, "amount is not a finite number"),
            AmountError::Negative => write!(f, "amount is negative"),
            AmountError::TooLarge => write!(f, "amount exceeds maximum money"),
        }
    }
}

impl std::error::Error for AmountError {}

/// Convert a floating-point BTC amount into satoshis, rounding to the
/// nearest unit.
pub fn amount_from_btc(btc: f64) -> Result<Amount, AmountError> {
    if !btc.is_finite() {
        return Err(AmountError::NotFinite);
    }
    if btc < 0.0 {
        return Err(AmountError::Negative);
    }
    let satoshis = (btc * COIN as f64).round();
    if satoshis > MAX_MONEY as f64 {
        return Err(AmountError::TooLarge);
    }
    Ok(satoshis as Amount)
}

/// Render an amount as a BTC decimal string, trimming trailing zeros.
pub fn format_btc(amount: Amount) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    let whole = abs / COIN as u64;
    let frac = abs % COIN as u64;
    if frac == 0 {
        return format!("{sign}{whole} BTC");
    }
    let mut frac = format!("{frac:08}");
    while frac.ends_with('0') {
        frac.pop();
    }
    format!("{sign}{whole}.{frac} BTC")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn btc_conversion() {
        assert_eq!(amount_from_btc(0.0005).unwrap(), 50_000);
        assert_eq!(amount_from_btc(1.0).unwrap(), COIN);
        assert_eq!(amount_from_btc(0.0).unwrap(), 0);
        assert_eq!(amount_from_btc(f64::NAN), Err(AmountError::NotFinite));
        assert_eq!(amount_from_btc(f64::INFINITY), Err(AmountError::NotFinite));
        assert_eq!(amount_from_btc(-0.1), Err(AmountError::Negative));
        assert_eq!(amount_from_btc(22_000_000.0), Err(AmountError::TooLarge));
    }

    #[test]
    fn btc_formatting() {
        assert_eq!(format_btc(0), "0 BTC");
        assert_eq!(format_btc(COIN), "1 BTC");
        assert_eq!(format_btc(50_000), "0.0005 BTC");
        assert_eq!(format_btc(123_456), "0.00123456 BTC");
    }
}
