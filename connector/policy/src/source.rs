use bigdecimal::BigDecimal;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

use crate::{
    ConnectorPolicyConfig, PolicyError, PolicyOverrides, DEFAULT_SLIPPAGE_PERCENT, FX_SPREAD,
    TRANSFER_EXPIRY_WINDOW,
};

pub const DEFAULT_ENV_PREFIX: &str = "CONNECTOR_";

/// Where a connector's policy comes from. Implementations only report the
/// fields they set; `load` applies them over the defaults and validates.
pub trait PolicySource: Send + Sync {
    fn overrides(&self) -> Result<PolicyOverrides, PolicyError>;

    fn describe(&self) -> String;

    fn load(&self) -> Result<ConnectorPolicyConfig, PolicyError> {
        let overrides = self.overrides()?;
        if overrides.is_empty() {
            debug!(source = %self.describe(), "no policy overrides, using defaults");
        }
        let config = overrides.apply(&ConnectorPolicyConfig::default())?;
        info!(
            source = %self.describe(),
            window_ms = config.transfer_expiry_window_ms(),
            fx_spread = %config.fx_spread(),
            slippage = %config.default_slippage_percent(),
            "loaded connector policy"
        );
        Ok(config)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSource;

impl PolicySource for DefaultSource {
    fn overrides(&self) -> Result<PolicyOverrides, PolicyError> {
        Ok(PolicyOverrides::default())
    }

    fn describe(&self) -> String {
        "defaults".into()
    }
}

/// YAML for `.yaml`/`.yml` files, JSON for everything else.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_yaml(&self) -> bool {
        matches!(
            self.path.extension().and_then(|ext| ext.to_str()),
            Some("yaml") | Some("yml")
        )
    }
}

impl PolicySource for FileSource {
    fn overrides(&self) -> Result<PolicyOverrides, PolicyError> {
        let contents = fs::read_to_string(&self.path).map_err(|source| PolicyError::Io {
            path: self.path.clone(),
            source,
        })?;
        let parsed = if self.is_yaml() {
            PolicyOverrides::from_yaml_str(&contents)
        } else {
            PolicyOverrides::from_json_str(&contents)
        };
        parsed.map_err(|message| PolicyError::Parse {
            path: self.path.clone(),
            message,
        })
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Reads `<prefix>TRANSFER_EXPIRY_WINDOW_MS`, `<prefix>FX_SPREAD` and
/// `<prefix>DEFAULT_SLIPPAGE_PERCENT`. Unset or blank variables are ignored.
pub struct EnvSource {
    prefix: String,
    lookup: Lookup,
}

impl EnvSource {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self::with_lookup(prefix, |key| env::var(key).ok())
    }

    pub fn with_lookup(
        prefix: impl Into<String>,
        lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            lookup: Box::new(lookup),
        }
    }

    fn var(&self, suffix: &str) -> Option<String> {
        let key = format!("{}{}", self.prefix, suffix);
        let value = (self.lookup)(&key)?;
        let value = value.trim().to_string();
        if value.is_empty() {
            return None;
        }
        debug!(%key, %value, "policy override from environment");
        Some(value)
    }
}

impl Default for EnvSource {
    fn default() -> Self {
        Self::new(DEFAULT_ENV_PREFIX)
    }
}

impl std::fmt::Debug for EnvSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvSource")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl PolicySource for EnvSource {
    fn overrides(&self) -> Result<PolicyOverrides, PolicyError> {
        let transfer_expiry_window_ms = self
            .var("TRANSFER_EXPIRY_WINDOW_MS")
            .map(|raw| parse_millis(TRANSFER_EXPIRY_WINDOW, &raw))
            .transpose()?;
        let fx_spread = self
            .var("FX_SPREAD")
            .map(|raw| parse_decimal(FX_SPREAD, &raw))
            .transpose()?;
        let default_slippage_percent = self
            .var("DEFAULT_SLIPPAGE_PERCENT")
            .map(|raw| parse_decimal(DEFAULT_SLIPPAGE_PERCENT, &raw))
            .transpose()?;
        Ok(PolicyOverrides {
            transfer_expiry_window_ms,
            fx_spread,
            default_slippage_percent,
        })
    }

    fn describe(&self) -> String {
        format!("environment {}*", self.prefix)
    }
}

/// Merges layers in order, later layers winning, and validates once at the
/// end so an invalid value in a lower layer can still be corrected above it.
#[derive(Default)]
pub struct LayeredSource {
    layers: Vec<Box<dyn PolicySource>>,
}

impl LayeredSource {
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    pub fn with(mut self, layer: impl PolicySource + 'static) -> Self {
        self.layers.push(Box::new(layer));
        self
    }

    pub fn push(&mut self, layer: Box<dyn PolicySource>) {
        self.layers.push(layer);
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl PolicySource for LayeredSource {
    fn overrides(&self) -> Result<PolicyOverrides, PolicyError> {
        let mut merged = PolicyOverrides::default();
        for layer in &self.layers {
            merged = merged.merge(layer.overrides()?);
        }
        Ok(merged)
    }

    fn describe(&self) -> String {
        if self.layers.is_empty() {
            return DefaultSource.describe();
        }
        self.layers
            .iter()
            .map(|layer| layer.describe())
            .collect::<Vec<_>>()
            .join(" < ")
    }
}

fn parse_millis(field: &'static str, raw: &str) -> Result<u64, PolicyError> {
    if let Ok(millis) = raw.parse::<u64>() {
        return Ok(millis);
    }
    match raw.parse::<i64>() {
        Ok(negative) if negative < 0 => Err(PolicyError::Negative {
            field,
            value: raw.to_string(),
        }),
        _ => Err(PolicyError::InvalidValue {
            field,
            value: raw.to_string(),
        }),
    }
}

fn parse_decimal(field: &'static str, raw: &str) -> Result<BigDecimal, PolicyError> {
    BigDecimal::from_str(raw).map_err(|_| PolicyError::InvalidValue {
        field,
        value: raw.to_string(),
    })
}
