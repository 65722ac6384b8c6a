use bigdecimal::BigDecimal;
use serde::de::value::MapAccessDeserializer;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::{ConnectorPolicyConfig, PolicyError, DEFAULT_SLIPPAGE_PERCENT, FX_SPREAD};

/// Partial policy as supplied by one configuration layer. Unset fields fall
/// through to the layer below.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyOverrides {
    #[serde(
        default,
        alias = "min_message_window_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub transfer_expiry_window_ms: Option<u64>,
    #[serde(
        default,
        deserialize_with = "deserialize_decimal",
        serialize_with = "serialize_decimal",
        skip_serializing_if = "Option::is_none"
    )]
    pub fx_spread: Option<BigDecimal>,
    #[serde(
        default,
        deserialize_with = "deserialize_decimal",
        serialize_with = "serialize_decimal",
        skip_serializing_if = "Option::is_none"
    )]
    pub default_slippage_percent: Option<BigDecimal>,
}

/// YAML layout of [`PolicyOverrides`]. serde_yaml hands a plain scalar to a
/// string field as its literal text, so `0.002` never passes through `f64`.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct YamlOverrides {
    #[serde(default, alias = "min_message_window_ms")]
    transfer_expiry_window_ms: Option<u64>,
    #[serde(default)]
    fx_spread: Option<String>,
    #[serde(default)]
    default_slippage_percent: Option<String>,
}

impl PolicyOverrides {
    pub fn from_json_str(text: &str) -> Result<Self, String> {
        serde_json::from_str(text).map_err(|err| err.to_string())
    }

    /// An empty document means "no overrides".
    pub fn from_yaml_str(text: &str) -> Result<Self, String> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let raw: YamlOverrides = serde_yaml::from_str(text).map_err(|err| err.to_string())?;
        let decimal = |field: &str, text: Option<String>| {
            text.map(|text| parse_decimal_text(&text).map_err(|err| format!("{field}: {err}")))
                .transpose()
        };
        Ok(Self {
            transfer_expiry_window_ms: raw.transfer_expiry_window_ms,
            fx_spread: decimal(FX_SPREAD, raw.fx_spread)?,
            default_slippage_percent: decimal(DEFAULT_SLIPPAGE_PERCENT, raw.default_slippage_percent)?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.transfer_expiry_window_ms.is_none()
            && self.fx_spread.is_none()
            && self.default_slippage_percent.is_none()
    }

    /// Field-by-field merge where `other` wins.
    pub fn merge(self, other: PolicyOverrides) -> PolicyOverrides {
        PolicyOverrides {
            transfer_expiry_window_ms: other
                .transfer_expiry_window_ms
                .or(self.transfer_expiry_window_ms),
            fx_spread: other.fx_spread.or(self.fx_spread),
            default_slippage_percent: other
                .default_slippage_percent
                .or(self.default_slippage_percent),
        }
    }

    pub fn apply(self, base: &ConnectorPolicyConfig) -> Result<ConnectorPolicyConfig, PolicyError> {
        let window = self
            .transfer_expiry_window_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| base.transfer_expiry_window());
        let fx_spread = self
            .fx_spread
            .unwrap_or_else(|| base.fx_spread().clone());
        let slippage = self
            .default_slippage_percent
            .unwrap_or_else(|| base.default_slippage_percent().clone());
        ConnectorPolicyConfig::new(window, fx_spread, slippage)
    }
}

fn parse_decimal_text(text: &str) -> Result<BigDecimal, String> {
    BigDecimal::from_str(text.trim()).map_err(|err| format!("invalid decimal {text:?}: {err}"))
}

struct DecimalVisitor;

impl<'de> Visitor<'de> for DecimalVisitor {
    type Value = BigDecimal;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a decimal string or an exact number")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<BigDecimal, E> {
        parse_decimal_text(value).map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<BigDecimal, E> {
        Ok(BigDecimal::from(value))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<BigDecimal, E> {
        Ok(BigDecimal::from(value))
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> Result<BigDecimal, E> {
        Err(E::custom(format!(
            "decimal {value} was read as a binary float; quote it as a string"
        )))
    }

    // serde_json with arbitrary_precision hands numbers over as a one-entry
    // map carrying the literal text
    fn visit_map<A: de::MapAccess<'de>>(self, map: A) -> Result<BigDecimal, A::Error> {
        let number = serde_json::Number::deserialize(MapAccessDeserializer::new(map))?;
        parse_decimal_text(&number.to_string()).map_err(de::Error::custom)
    }
}

struct DecimalField(BigDecimal);

impl<'de> Deserialize<'de> for DecimalField {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(DecimalVisitor).map(DecimalField)
    }
}

fn deserialize_decimal<'de, D>(deserializer: D) -> Result<Option<BigDecimal>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<DecimalField>::deserialize(deserializer)?.map(|field| field.0))
}

fn serialize_decimal<S>(value: &Option<BigDecimal>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(decimal) => serializer.serialize_str(&decimal.normalized().to_string()),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(text: &str) -> BigDecimal {
        BigDecimal::from_str(text).unwrap()
    }

    #[test]
    fn bare_numbers_keep_their_decimal_text() {
        let parsed = PolicyOverrides::from_yaml_str(
            "fx_spread: 0.002\ndefault_slippage_percent: \"0.001\"\n",
        )
        .unwrap();
        assert_eq!(parsed.fx_spread, Some(dec("0.002")));
        assert_eq!(parsed.default_slippage_percent, Some(dec("0.001")));
    }

    #[test]
    fn long_json_numbers_are_not_rounded() {
        let parsed =
            PolicyOverrides::from_json_str(r#"{"fx_spread": 0.00200000000000000001}"#).unwrap();
        assert_eq!(parsed.fx_spread, Some(dec("0.00200000000000000001")));
        assert_ne!(parsed.fx_spread, Some(dec("0.002")));
    }

    #[test]
    fn long_yaml_scalars_are_not_rounded() {
        let parsed = PolicyOverrides::from_yaml_str(
            "fx_spread: 0.00200000000000000001\ndefault_slippage_percent: 0.0009999999999999999999\n",
        )
        .unwrap();
        assert_eq!(parsed.fx_spread, Some(dec("0.00200000000000000001")));
        assert_eq!(
            parsed.default_slippage_percent,
            Some(dec("0.0009999999999999999999"))
        );
    }

    #[test]
    fn float_from_a_generic_deserializer_is_refused() {
        let err = serde_yaml::from_str::<PolicyOverrides>("fx_spread: 0.002\n").unwrap_err();
        assert!(err.to_string().contains("quote it as a string"));
    }

    #[test]
    fn integers_are_accepted_as_decimals() {
        let parsed = PolicyOverrides::from_json_str(r#"{"fx_spread": 0}"#).unwrap();
        assert_eq!(parsed.fx_spread, Some(BigDecimal::from(0)));
        let parsed = PolicyOverrides::from_yaml_str("fx_spread: 0\n").unwrap();
        assert_eq!(parsed.fx_spread, Some(BigDecimal::from(0)));
    }

    #[test]
    fn garbage_decimal_is_a_parse_error() {
        let err = PolicyOverrides::from_json_str(r#"{"fx_spread": "two percent"}"#).unwrap_err();
        assert!(err.contains("invalid decimal"));
        let err = PolicyOverrides::from_yaml_str("fx_spread: .inf\n").unwrap_err();
        assert!(err.starts_with("fx_spread: invalid decimal"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(PolicyOverrides::from_json_str(r#"{"fx_sprad": "0.1"}"#).is_err());
        assert!(PolicyOverrides::from_yaml_str("fx_sprad: 0.1\n").is_err());
    }

    #[test]
    fn javascript_window_name_is_an_alias() {
        let parsed = PolicyOverrides::from_json_str(r#"{"min_message_window_ms": 1500}"#).unwrap();
        assert_eq!(parsed.transfer_expiry_window_ms, Some(1500));
        let parsed = PolicyOverrides::from_yaml_str("min_message_window_ms: 1500\n").unwrap();
        assert_eq!(parsed.transfer_expiry_window_ms, Some(1500));
    }

    #[test]
    fn emptiness_tracks_every_field() {
        assert!(PolicyOverrides::default().is_empty());
        assert!(PolicyOverrides::from_yaml_str("").unwrap().is_empty());
        assert!(!PolicyOverrides::from_json_str(r#"{"fx_spread": "0.01"}"#)
            .unwrap()
            .is_empty());
        assert!(!ConnectorPolicyConfig::default().to_overrides().is_empty());
    }
}
