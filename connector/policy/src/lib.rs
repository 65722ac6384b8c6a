//! Connector-wide policy parameters: the transfer-expiry window, the FX
//! spread added to quoted rates and the slippage tolerated on settled
//! payments.
//!
//! A [`ConnectorPolicyConfig`] is built once (from defaults, a file, the
//! environment or any other [`PolicySource`]) and is read-only afterwards.
//! Every value it hands out has already been validated.

use bigdecimal::BigDecimal;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

mod handle;
mod overrides;
mod source;

pub use handle::PolicyHandle;
pub use overrides::PolicyOverrides;
pub use source::{
    DefaultSource, EnvSource, FileSource, LayeredSource, PolicySource, DEFAULT_ENV_PREFIX,
};

pub const TRANSFER_EXPIRY_WINDOW: &str = "transfer_expiry_window";
pub const FX_SPREAD: &str = "fx_spread";
pub const DEFAULT_SLIPPAGE_PERCENT: &str = "default_slippage_percent";

/// Called the "minimum message window" by the JavaScript connector.
pub const DEFAULT_TRANSFER_EXPIRY_WINDOW: Duration = Duration::from_secs(5);

/// Windows longer than this are accepted but logged.
pub const LONG_EXPIRY_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("failed to read policy file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse policy file {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },
    #[error("invalid value for {field}: {value:?}")]
    InvalidValue { field: &'static str, value: String },
    #[error("{field} must not be negative (got {value})")]
    Negative { field: &'static str, value: String },
    #[error("{field} must be below 1 (got {value})")]
    OutOfRange { field: &'static str, value: String },
    #[error("transfer_expiry_window must be a whole number of milliseconds below 2^64 (got {0:?})")]
    WindowPrecision(Duration),
}

/// Validated connector policy. Fields are private so a value can only come
/// from [`Default`] or from [`ConnectorPolicyConfig::new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorPolicyConfig {
    transfer_expiry_window_ms: u64,
    fx_spread: BigDecimal,
    default_slippage_percent: BigDecimal,
}

impl ConnectorPolicyConfig {
    pub fn new(
        transfer_expiry_window: Duration,
        fx_spread: BigDecimal,
        default_slippage_percent: BigDecimal,
    ) -> Result<Self, PolicyError> {
        ensure_fraction(FX_SPREAD, &fx_spread)?;
        ensure_fraction(DEFAULT_SLIPPAGE_PERCENT, &default_slippage_percent)?;
        let transfer_expiry_window_ms = whole_millis(transfer_expiry_window)
            .ok_or(PolicyError::WindowPrecision(transfer_expiry_window))?;
        if transfer_expiry_window > LONG_EXPIRY_WINDOW {
            warn!(
                window_ms = transfer_expiry_window_ms,
                "transfer expiry window is unusually long; check it against ledger settlement timeouts"
            );
        }
        Ok(Self {
            transfer_expiry_window_ms,
            fx_spread,
            default_slippage_percent,
        })
    }

    /// Time budget added to an incoming transfer's expiry to obtain the
    /// expiry of the matching outgoing transfer. If a source transfer
    /// expires at 08:00:00 and the window is 5 seconds, the outgoing
    /// transfer is created with an expiry of 08:00:05.
    pub fn transfer_expiry_window(&self) -> Duration {
        Duration::from_millis(self.transfer_expiry_window_ms)
    }

    pub fn transfer_expiry_window_ms(&self) -> u64 {
        self.transfer_expiry_window_ms
    }

    /// Markup, in decimal form, applied to every quoted rate (0.002 = 0.2%).
    pub fn fx_spread(&self) -> &BigDecimal {
        &self.fx_spread
    }

    /// Largest fractional deviation from a quoted amount that a payment may
    /// show before it is rejected. Ledgers without exact quoting can drift
    /// between quote and payment; this bounds how far.
    pub fn default_slippage_percent(&self) -> &BigDecimal {
        &self.default_slippage_percent
    }

    /// Every field set, so the result can be written out as an override
    /// file that reproduces this policy.
    pub fn to_overrides(&self) -> PolicyOverrides {
        PolicyOverrides {
            transfer_expiry_window_ms: Some(self.transfer_expiry_window_ms),
            fx_spread: Some(self.fx_spread.clone()),
            default_slippage_percent: Some(self.default_slippage_percent.clone()),
        }
    }
}

impl Default for ConnectorPolicyConfig {
    fn default() -> Self {
        Self {
            transfer_expiry_window_ms: DEFAULT_TRANSFER_EXPIRY_WINDOW.as_secs() * 1_000,
            // 0.2%
            fx_spread: BigDecimal::new(2.into(), 3),
            // 0.1%
            default_slippage_percent: BigDecimal::new(1.into(), 3),
        }
    }
}

fn whole_millis(window: Duration) -> Option<u64> {
    if window.subsec_nanos() % 1_000_000 != 0 {
        return None;
    }
    u64::try_from(window.as_millis()).ok()
}

fn ensure_fraction(field: &'static str, value: &BigDecimal) -> Result<(), PolicyError> {
    if *value < BigDecimal::from(0) {
        return Err(PolicyError::Negative {
            field,
            value: value.to_string(),
        });
    }
    if *value >= BigDecimal::from(1) {
        return Err(PolicyError::OutOfRange {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}
