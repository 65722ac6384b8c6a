use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};

use crate::{ConnectorPolicyConfig, PolicyError, PolicySource};

/// Shared view of the current policy. Readers take a whole snapshot, so a
/// reload can never be observed half applied.
#[derive(Debug, Clone, Default)]
pub struct PolicyHandle {
    current: Arc<RwLock<Arc<ConnectorPolicyConfig>>>,
}

impl PolicyHandle {
    pub fn new(config: ConnectorPolicyConfig) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    pub fn from_source(source: &dyn PolicySource) -> Result<Self, PolicyError> {
        Ok(Self::new(source.load()?))
    }

    pub fn snapshot(&self) -> Arc<ConnectorPolicyConfig> {
        // the guarded value is a single Arc swap, a poisoned lock still holds a whole snapshot
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn publish(&self, config: ConnectorPolicyConfig) {
        let next = Arc::new(config);
        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = next;
    }

    /// Loads from `source` and publishes. On error the previous snapshot
    /// stays in place.
    pub fn reload(&self, source: &dyn PolicySource) -> Result<(), PolicyError> {
        match source.load() {
            Ok(config) => {
                self.publish(config);
                info!(source = %source.describe(), "published new connector policy");
                Ok(())
            }
            Err(err) => {
                warn!(source = %source.describe(), "policy reload rejected: {err}");
                Err(err)
            }
        }
    }
}
