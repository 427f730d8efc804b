//! NPC manager - owns the map from identity to running NPC
//!
//! The map is the only in-process shared state; every operation takes the
//! one mutex for a short critical section and never holds it across an
//! await or a store call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::info;

use crate::config::{ManagerConfig, NpcConfig};
use crate::db::{Database, StoreError};
use crate::npc::{Npc, NpcHandle};

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("NPC already running: {0}")]
    AlreadyRunning(String),
    #[error("NPC not found: {0}")]
    NotFound(String),
    #[error("NPC limit reached ({0})")]
    AtCapacity(usize),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct NpcManager {
    db: Arc<Database>,
    npc_config: NpcConfig,
    config: ManagerConfig,
    npcs: Mutex<HashMap<String, NpcHandle>>,
}

impl NpcManager {
    pub fn new(db: Arc<Database>, npc_config: NpcConfig, config: ManagerConfig) -> Self {
        Self {
            db,
            npc_config,
            config,
            npcs: Mutex::new(HashMap::new()),
        }
    }

    /// Start an NPC under the given identity. Fails if one is already
    /// running or the configured cap is reached.
    pub fn start_npc(&self, id: &str) -> Result<(), ManagerError> {
        // Account setup happens before taking the map lock
        let (cash, shares) = self.db.account_seed()?;
        self.db.ensure_account(id, cash, shares)?;

        let mut npcs = self.npcs.lock().unwrap();
        if npcs.contains_key(id) {
            return Err(ManagerError::AlreadyRunning(id.to_string()));
        }
        if npcs.len() >= self.config.max_npcs {
            return Err(ManagerError::AtCapacity(self.config.max_npcs));
        }

        let handle = Npc::spawn(id, self.db.clone(), self.npc_config.clone());
        npcs.insert(id.to_string(), handle);
        Ok(())
    }

    /// Stop an NPC and wait for its loop to exit. The entry is removed
    /// before the join, so a subsequent `start_npc` with the same identity
    /// succeeds immediately.
    pub async fn stop_npc(&self, id: &str) -> Result<(), ManagerError> {
        let handle = self
            .npcs
            .lock()
            .unwrap()
            .remove(id)
            .ok_or_else(|| ManagerError::NotFound(id.to_string()))?;

        handle.stop();
        handle.join().await;
        Ok(())
    }

    /// Snapshot of the currently registered identities.
    pub fn list_npcs(&self) -> Vec<String> {
        self.npcs.lock().unwrap().keys().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.npcs.lock().unwrap().len()
    }

    /// Stop every NPC, join all loops and empty the registry.
    pub async fn stop_all_and_clear(&self) {
        let handles: Vec<NpcHandle> = {
            let mut npcs = self.npcs.lock().unwrap();
            npcs.drain().map(|(_, handle)| handle).collect()
        };

        if handles.is_empty() {
            return;
        }

        info!("🛑 Stopping {} NPCs", handles.len());
        for handle in &handles {
            handle.stop();
        }
        for handle in handles {
            handle.join().await;
        }
    }
}
