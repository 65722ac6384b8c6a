use bigdecimal::BigDecimal;
use chrono::{TimeZone, Utc};
use connector_policy::ConnectorPolicyConfig;
use connector_risk::{check_slippage, outgoing_expiry, quote_rate_with_spread, RiskError};
use proptest::prelude::*;
use std::time::Duration;

fn policy_with_window(millis: u64) -> ConnectorPolicyConfig {
    let defaults = ConnectorPolicyConfig::default();
    ConnectorPolicyConfig::new(
        Duration::from_millis(millis),
        defaults.fx_spread().clone(),
        defaults.default_slippage_percent().clone(),
    )
    .unwrap()
}

proptest! {
    #[test]
    fn outgoing_expiry_is_incoming_plus_window(secs in 0i64..4_000_000_000, millis in 0u64..3_600_000) {
        let incoming = Utc.timestamp_opt(secs, 0).unwrap();
        let outgoing = outgoing_expiry(incoming, &policy_with_window(millis)).unwrap();
        prop_assert!(outgoing >= incoming);
        prop_assert_eq!((outgoing - incoming).num_milliseconds(), millis as i64);
    }

    #[test]
    fn quote_is_rate_times_one_plus_spread(rate in 0u64..10_000_000, rate_scale in 0i64..8, spread in 0u32..1000) {
        let raw = BigDecimal::new(rate.into(), rate_scale);
        let spread = BigDecimal::new(spread.into(), 3);
        let quoted = quote_rate_with_spread(&raw, &spread).unwrap();
        prop_assert_eq!(&quoted, &(&raw + &raw * &spread));
        prop_assert!(quoted >= raw);
    }

    #[test]
    fn slippage_accepts_exactly_up_to_tolerance(quoted in 1u64..1_000_000_000, tolerance in 0u32..1000, delta in 0u64..2_000_000) {
        let q = BigDecimal::from(quoted);
        let tol = BigDecimal::new(tolerance.into(), 3);
        let limit = &q * &tol;
        let delta = BigDecimal::new(delta.into(), 2);
        for actual in [&q + &delta, &q - &delta] {
            let result = check_slippage(&q, &actual, &tol);
            if delta <= limit {
                prop_assert!(result.is_ok());
            } else {
                let is_exceeded = matches!(result, Err(RiskError::SlippageExceeded { .. }));
                prop_assert!(is_exceeded);
            }
        }
    }

    #[test]
    fn exact_boundary_is_inclusive(quoted in 1u64..1_000_000_000, tolerance in 0u32..1000) {
        let q = BigDecimal::from(quoted);
        let tol = BigDecimal::new(tolerance.into(), 3);
        let actual = &q + &q * &tol;
        prop_assert!(check_slippage(&q, &actual, &tol).is_ok());
    }
}
