//! Carries quarantined deployment ids between convergence passes

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::consul::keys;
use crate::consul::kv::{get_json, put_json, KeyValueStore};
use crate::converge::server_role::ServerRole;
use crate::errors::AgentError;
use crate::storage::settings::QuarantineMode;

const MAX_CAS_ATTEMPTS: u32 = 5;

pub struct QuarantineStore {
    mode: QuarantineMode,
    kv: Arc<dyn KeyValueStore>,
    key: String,
    ids: BTreeSet<String>,
}

impl QuarantineStore {
    pub fn new(mode: QuarantineMode, kv: Arc<dyn KeyValueStore>, instance_id: &str) -> Self {
        Self {
            mode,
            kv,
            key: keys::quarantine_key(instance_id),
            ids: BTreeSet::new(),
        }
    }

    pub fn mode(&self) -> QuarantineMode {
        self.mode
    }

    /// Ids carried over to the next role
    pub fn ids(&self) -> &BTreeSet<String> {
        &self.ids
    }

    /// Restore persisted ids
    pub async fn load(&mut self) -> Result<(), AgentError> {
        if self.mode != QuarantineMode::Persistent {
            return Ok(());
        }
        if let Some((ids, _)) = get_json::<BTreeSet<String>>(self.kv.as_ref(), &self.key).await? {
            info!("Restored {} quarantined deployment(s)", ids.len());
            self.ids = ids;
        }
        Ok(())
    }

    /// Seed a freshly loaded role with the carried ids
    pub fn apply(&self, role: &mut ServerRole) {
        if self.mode == QuarantineMode::Pass {
            return;
        }
        role.extend_quarantine(self.ids.iter().cloned());
    }

    /// Quarantine `deployment_id` on `role` and remember it according to the mode
    pub async fn quarantine(&mut self, role: &mut ServerRole, deployment_id: &str) {
        role.quarantine(deployment_id);
        match self.mode {
            QuarantineMode::Pass => {}
            QuarantineMode::Process => {
                self.ids.insert(deployment_id.to_string());
            }
            QuarantineMode::Persistent => {
                self.ids.insert(deployment_id.to_string());
                if let Err(e) = self.persist(deployment_id).await {
                    warn!("Failed to persist quarantine of {}: {}", deployment_id, e);
                }
            }
        }
    }

    async fn persist(&mut self, deployment_id: &str) -> Result<(), AgentError> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let (mut stored, index) = get_json::<BTreeSet<String>>(self.kv.as_ref(), &self.key)
                .await?
                .unwrap_or_default();
            stored.insert(deployment_id.to_string());
            if put_json(self.kv.as_ref(), &self.key, &stored, Some(index)).await? {
                self.ids.extend(stored);
                return Ok(());
            }
        }
        Err(AgentError::StoreError(format!(
            "Concurrent updates to {} kept conflicting",
            self.key
        )))
    }
}
