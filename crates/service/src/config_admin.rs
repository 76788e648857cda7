//! Config administration: validated publish with an audit trail.

use std::sync::Arc;

use tracing::info;

use lotmatch_engine::DedupConfig;
use lotmatch_store::{AuditLog, ConfigStore, StoreResult};

pub struct ConfigManager {
    configs: Arc<dyn ConfigStore>,
    audit: Arc<dyn AuditLog>,
}

impl ConfigManager {
    pub fn new(configs: Arc<dyn ConfigStore>, audit: Arc<dyn AuditLog>) -> Self {
        Self { configs, audit }
    }

    pub fn active(&self) -> StoreResult<DedupConfig> {
        self.configs.active()
    }

    pub fn version(&self, version: u64) -> StoreResult<Option<DedupConfig>> {
        self.configs.version(version)
    }

    /// Validate and publish a new config version. Existing matches keep the
    /// version that scored them; re-scoring under the new version happens on
    /// the next detect run per pair.
    pub fn publish(&self, config: DedupConfig, actor: &str) -> StoreResult<u64> {
        let name = config.name.clone();
        let version = self.configs.publish(config)?;
        self.audit
            .append(actor, "config_published", &format!("'{name}' v{version}"))?;
        info!(version, actor, "config published");
        Ok(version)
    }
}
