//! Decision helpers that consume [`ConnectorPolicyConfig`]: outgoing transfer
//! expiry, spread-adjusted quotes and slippage checks on settled payments.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use connector_policy::ConnectorPolicyConfig;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq)]
pub enum RiskError {
    #[error("expiry {incoming} plus a window of {window_ms}ms is out of range")]
    ExpiryOverflow {
        incoming: DateTime<Utc>,
        window_ms: u128,
    },
    #[error("exchange rate must not be negative (got {0})")]
    NegativeRate(BigDecimal),
    #[error("fx spread must not be negative (got {0})")]
    NegativeSpread(BigDecimal),
    #[error("quoted amount must be positive (got {0})")]
    InvalidQuotedAmount(BigDecimal),
    #[error("slippage {ratio} exceeds tolerance {tolerance}")]
    SlippageExceeded {
        ratio: BigDecimal,
        tolerance: BigDecimal,
    },
}

/// Expiry to put on the outgoing transfer: the incoming expiry with the
/// policy's window appended.
pub fn outgoing_expiry(
    incoming: DateTime<Utc>,
    policy: &ConnectorPolicyConfig,
) -> Result<DateTime<Utc>, RiskError> {
    let window = policy.transfer_expiry_window();
    let overflow = || RiskError::ExpiryOverflow {
        incoming,
        window_ms: window.as_millis(),
    };
    let window = chrono::Duration::from_std(window).map_err(|_| overflow())?;
    incoming.checked_add_signed(window).ok_or_else(overflow)
}

/// `raw_rate * (1 + spread)`.
pub fn quote_rate_with_spread(
    raw_rate: &BigDecimal,
    spread: &BigDecimal,
) -> Result<BigDecimal, RiskError> {
    let zero = BigDecimal::from(0);
    if *raw_rate < zero {
        return Err(RiskError::NegativeRate(raw_rate.clone()));
    }
    if *spread < zero {
        return Err(RiskError::NegativeSpread(spread.clone()));
    }
    Ok(raw_rate * (BigDecimal::from(1) + spread))
}

pub fn quote_rate(
    raw_rate: &BigDecimal,
    policy: &ConnectorPolicyConfig,
) -> Result<BigDecimal, RiskError> {
    quote_rate_with_spread(raw_rate, policy.fx_spread())
}

/// `|actual - quoted| / quoted`.
pub fn slippage_ratio(quoted: &BigDecimal, actual: &BigDecimal) -> Result<BigDecimal, RiskError> {
    if *quoted <= BigDecimal::from(0) {
        return Err(RiskError::InvalidQuotedAmount(quoted.clone()));
    }
    Ok((actual - quoted).abs() / quoted)
}

/// Accepts a payment whose deviation from the quote is at most `tolerance`,
/// boundary included.
pub fn check_slippage(
    quoted: &BigDecimal,
    actual: &BigDecimal,
    tolerance: &BigDecimal,
) -> Result<(), RiskError> {
    let ratio = slippage_ratio(quoted, actual)?;
    // compare |a - q| <= tolerance * q, which stays exact where the ratio may not
    let deviation = (actual - quoted).abs();
    if deviation <= tolerance * quoted {
        return Ok(());
    }
    debug!(%quoted, %actual, %ratio, %tolerance, "payment rejected for slippage");
    Err(RiskError::SlippageExceeded {
        ratio: ratio.normalized(),
        tolerance: tolerance.clone(),
    })
}

pub fn validate_payment(
    quoted: &BigDecimal,
    actual: &BigDecimal,
    policy: &ConnectorPolicyConfig,
) -> Result<(), RiskError> {
    check_slippage(quoted, actual, policy.default_slippage_percent())
}
